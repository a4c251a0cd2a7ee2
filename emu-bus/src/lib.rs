//! Memory bus primitives for memory-mapped 8-bit systems.
//!
//! A machine wires leaf devices (RAM, ROM, their mirrored variants, or
//! register adapters) into a [`MemoryController`], which dispatches 16-bit
//! addresses to the owning device by half-open range. Illegal accesses
//! surface as [`BusFault`] values rather than being silently absorbed.

mod controller;
mod device;
mod fault;

pub use controller::{Bus, MemoryController};
pub use device::{BusDevice, MirroredRam, MirroredRom, Ram, Rom};
pub use fault::BusFault;
