//! APU stub.
//!
//! The audio unit is a write-only set of registers from the core's point of
//! view: channel enables, the DMC direct level, and the frame-counter
//! options byte. No synthesis.

/// Channel enable bit positions in the $4015 status write.
pub mod channel {
    pub const PULSE1: u8 = 0x01;
    pub const PULSE2: u8 = 0x02;
    pub const TRIANGLE: u8 = 0x04;
    pub const NOISE: u8 = 0x08;
    pub const DMC: u8 = 0x10;
}

/// APU register state.
pub struct Apu {
    /// One enable bit per channel ($4015).
    channel_enable: u8,
    /// 7-bit DMC direct level ($4011).
    dmc_value: u8,
    /// Frame counter options ($4017).
    frame_counter: u8,
}

impl Apu {
    #[must_use]
    pub fn new() -> Self {
        Self {
            channel_enable: 0,
            dmc_value: 0,
            frame_counter: 0,
        }
    }

    /// $4015 write: one enable bit per channel.
    pub fn set_status(&mut self, value: u8) {
        self.channel_enable = value & 0x1F;
    }

    /// $4011 write: the low 7 bits set the DMC level directly.
    pub fn set_dmc_value(&mut self, value: u8) {
        self.dmc_value = value & 0x7F;
    }

    /// $4017 write: frame counter options.
    pub fn set_frame_counter(&mut self, value: u8) {
        self.frame_counter = value;
    }

    #[must_use]
    pub fn channel_enable(&self) -> u8 {
        self.channel_enable
    }

    #[must_use]
    pub fn dmc_value(&self) -> u8 {
        self.dmc_value
    }

    #[must_use]
    pub fn frame_counter(&self) -> u8 {
        self.frame_counter
    }
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_masks_to_five_channels() {
        let mut apu = Apu::new();
        apu.set_status(0xFF);
        assert_eq!(apu.channel_enable(), 0x1F);
        apu.set_status(channel::PULSE1 | channel::DMC);
        assert_eq!(apu.channel_enable(), 0x11);
    }

    #[test]
    fn dmc_value_is_seven_bits() {
        let mut apu = Apu::new();
        apu.set_dmc_value(0xFF);
        assert_eq!(apu.dmc_value(), 0x7F);
    }
}
