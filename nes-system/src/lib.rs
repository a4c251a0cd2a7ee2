//! NES system emulation.
//!
//! Two cooperatively-scheduled processors - a 65C02-derivative CPU and the
//! PPU - talk through a range-mapped bus and a one-way interrupt channel.
//! The CPU sees the machine through its memory controller (RAM mirrors,
//! PPU register window, APU/IO window, PRG ROM); the PPU owns a second
//! controller for its own address space (CHR, nametables, palette). One
//! host frame = a batch of CPU instructions followed by one PPU frame's
//! work.

mod apu;
pub mod capture;
mod cartridge;
pub mod input;
mod joypad;
mod nes;
mod palette;
mod ports;
pub mod ppu;
mod region;

pub use apu::Apu;
pub use cartridge::{Cartridge, CartridgeError, Mirroring};
pub use input::{InputScript, NesButton};
pub use joypad::Joypad;
pub use nes::{Nes, NesConfig, SystemError};
pub use palette::PALETTE;
pub use ppu::Ppu;
pub use region::Region;
