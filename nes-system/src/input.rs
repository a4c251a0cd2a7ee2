//! Scripted controller input.
//!
//! Headless runs and tests drive controller 1 with button holds pinned to
//! frame numbers. A hold is a level, not an edge pair: each frame the
//! script recomputes every scripted button from the holds covering that
//! frame, then discards the ones that have run out.

use crate::joypad::Joypad;

/// Logical button on the NES controller.
///
/// The discriminant is the button's bit position in the shift register,
/// which fixes the serial read-out order: A, B, Select, Start, Up, Down,
/// Left, Right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NesButton {
    A = 0,
    B = 1,
    Select = 2,
    Start = 3,
    Up = 4,
    Down = 5,
    Left = 6,
    Right = 7,
}

impl NesButton {
    /// Bit position in the controller's shift register.
    #[must_use]
    pub const fn bit(self) -> u8 {
        self as u8
    }
}

/// A button held down over a span of frames.
#[derive(Debug, Clone, Copy)]
pub struct ButtonHold {
    pub button: NesButton,
    /// First frame on which the button is down.
    pub from: u64,
    /// First frame on which it is up again.
    pub until: u64,
}

/// Frame-scripted input for controller 1.
///
/// Holds may be added in any order and may overlap; a button is down on a
/// frame when any of its holds covers that frame.
pub struct InputScript {
    holds: Vec<ButtonHold>,
}

impl InputScript {
    #[must_use]
    pub fn new() -> Self {
        Self { holds: Vec::new() }
    }

    /// Hold `button` down for `frames` frames starting at `from`.
    pub fn hold(&mut self, button: NesButton, from: u64, frames: u64) {
        self.holds.push(ButtonHold {
            button,
            from,
            until: from + frames,
        });
    }

    pub fn push(&mut self, hold: ButtonHold) {
        self.holds.push(hold);
    }

    /// Apply the script for `frame` to the controller.
    ///
    /// Only buttons the script has started driving are touched, so input
    /// set directly on the pad is left alone. Expired holds are dropped.
    pub fn apply(&mut self, frame: u64, joypad: &mut Joypad) {
        let mut driven: u8 = 0;
        let mut down: u8 = 0;
        for hold in &self.holds {
            if hold.from > frame {
                continue;
            }
            driven |= 1 << hold.button.bit();
            if frame < hold.until {
                down |= 1 << hold.button.bit();
            }
        }

        for bit in 0..8u8 {
            if driven & (1 << bit) != 0 {
                joypad.set_button(bit, down & (1 << bit) != 0);
            }
        }

        self.holds.retain(|hold| hold.until > frame);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.holds.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.holds.is_empty()
    }
}

impl Default for InputScript {
    fn default() -> Self {
        Self::new()
    }
}
