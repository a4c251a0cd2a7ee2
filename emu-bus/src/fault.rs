//! Bus access faults.

use std::{error, fmt};

/// A failed bus access.
///
/// Devices report faults with device-local offsets; the memory controller
/// rebases them to absolute bus addresses before they propagate further.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusFault {
    /// No device is mapped at the address.
    Unmapped { addr: u16 },
    /// Write to a read-only device.
    ReadOnly { addr: u16 },
    /// Read from a write-only register.
    WriteOnly { addr: u16 },
    /// The device has no behaviour for this access.
    Unimplemented { addr: u16, what: &'static str },
}

impl BusFault {
    /// Shift the fault address from device-local to absolute.
    #[must_use]
    pub fn rebase(self, base: u16) -> Self {
        match self {
            Self::Unmapped { addr } => Self::Unmapped {
                addr: addr.wrapping_add(base),
            },
            Self::ReadOnly { addr } => Self::ReadOnly {
                addr: addr.wrapping_add(base),
            },
            Self::WriteOnly { addr } => Self::WriteOnly {
                addr: addr.wrapping_add(base),
            },
            Self::Unimplemented { addr, what } => Self::Unimplemented {
                addr: addr.wrapping_add(base),
                what,
            },
        }
    }
}

impl fmt::Display for BusFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unmapped { addr } => write!(f, "no device mapped at ${addr:04X}"),
            Self::ReadOnly { addr } => write!(f, "write to read-only memory at ${addr:04X}"),
            Self::WriteOnly { addr } => write!(f, "read from write-only register at ${addr:04X}"),
            Self::Unimplemented { addr, what } => {
                write!(f, "unimplemented {what} at ${addr:04X}")
            }
        }
    }
}

impl error::Error for BusFault {}
