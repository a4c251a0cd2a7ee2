//! CPU-side bus devices.
//!
//! The CPU's memory controller dispatches into this closed set: internal
//! RAM, the PPU register window, the APU/IO window, and PRG ROM. The
//! adapters hold reference-counted handles to the peripherals - a forward
//! reference from the bus to components owned alongside it, not a cycle.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use emu_bus::{BusDevice, BusFault, MirroredRam, MirroredRom};

use crate::apu::Apu;
use crate::joypad::Joypad;
use crate::ppu::Ppu;

/// A device in the CPU's address space.
pub enum CpuPort {
    /// 2 KiB internal RAM, mirrored across $0000-$1FFF.
    Ram(MirroredRam),
    /// PPU registers, mirrored every 8 bytes across $2000-$3FFF.
    Ppu(PpuRegisters),
    /// APU and IO registers at $4000-$4017.
    Apu(ApuRegisters),
    /// PRG ROM across $8000-$FFFF.
    Prg(MirroredRom),
}

impl BusDevice for CpuPort {
    fn read(&mut self, offset: u16) -> Result<u8, BusFault> {
        match self {
            Self::Ram(ram) => ram.read(offset),
            Self::Ppu(ppu) => ppu.read(offset),
            Self::Apu(apu) => apu.read(offset),
            Self::Prg(rom) => rom.read(offset),
        }
    }

    fn write(&mut self, offset: u16, value: u8) -> Result<(), BusFault> {
        match self {
            Self::Ram(ram) => ram.write(offset, value),
            Self::Ppu(ppu) => ppu.write(offset, value),
            Self::Apu(apu) => apu.write(offset, value),
            Self::Prg(rom) => rom.write(offset, value),
        }
    }
}

/// The PPU's eight register ports, selected by `offset mod 8`.
pub struct PpuRegisters {
    ppu: Rc<RefCell<Ppu>>,
}

impl PpuRegisters {
    #[must_use]
    pub fn new(ppu: Rc<RefCell<Ppu>>) -> Self {
        Self { ppu }
    }
}

impl BusDevice for PpuRegisters {
    fn read(&mut self, offset: u16) -> Result<u8, BusFault> {
        let mut ppu = self.ppu.borrow_mut();
        match offset % 8 {
            2 => Ok(ppu.read_status()),
            4 => Ok(ppu.read_oam_data()),
            // PPUCTRL, PPUMASK, OAMADDR, PPUSCROLL, PPUADDR, PPUDATA
            _ => Err(BusFault::WriteOnly { addr: offset }),
        }
    }

    fn write(&mut self, offset: u16, value: u8) -> Result<(), BusFault> {
        let mut ppu = self.ppu.borrow_mut();
        match offset % 8 {
            0 => ppu.write_ctrl(value),
            1 => ppu.write_mask(value),
            2 => return Err(BusFault::ReadOnly { addr: offset }),
            3 => ppu.write_oam_addr(value),
            4 => ppu.write_oam_data(value),
            5 => ppu.write_scroll(value),
            6 => ppu.write_addr(value),
            _ => ppu.write_data(value)?,
        }
        Ok(())
    }
}

/// APU registers, the controller ports, and the OAM DMA trigger.
///
/// A $4014 write only latches the source page here; the system performs
/// the copy between instructions.
pub struct ApuRegisters {
    apu: Rc<RefCell<Apu>>,
    joypad1: Rc<RefCell<Joypad>>,
    joypad2: Rc<RefCell<Joypad>>,
    oam_dma: Rc<Cell<Option<u8>>>,
}

impl ApuRegisters {
    #[must_use]
    pub fn new(
        apu: Rc<RefCell<Apu>>,
        joypad1: Rc<RefCell<Joypad>>,
        joypad2: Rc<RefCell<Joypad>>,
        oam_dma: Rc<Cell<Option<u8>>>,
    ) -> Self {
        Self {
            apu,
            joypad1,
            joypad2,
            oam_dma,
        }
    }
}

impl BusDevice for ApuRegisters {
    fn read(&mut self, offset: u16) -> Result<u8, BusFault> {
        match offset {
            0x16 => Ok(self.joypad1.borrow_mut().read()),
            0x17 => Ok(self.joypad2.borrow_mut().read()),
            _ => Err(BusFault::Unimplemented {
                addr: offset,
                what: "APU register read",
            }),
        }
    }

    fn write(&mut self, offset: u16, value: u8) -> Result<(), BusFault> {
        match offset {
            0x11 => self.apu.borrow_mut().set_dmc_value(value),
            0x14 => self.oam_dma.set(Some(value)),
            0x15 => self.apu.borrow_mut().set_status(value),
            0x16 => {
                self.joypad1.borrow_mut().write_strobe(value);
                self.joypad2.borrow_mut().write_strobe(value);
            }
            0x17 => self.apu.borrow_mut().set_frame_counter(value),
            _ => {
                return Err(BusFault::Unimplemented {
                    addr: offset,
                    what: "APU register write",
                })
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpu_65c02::InterruptLine;
    use emu_bus::{Bus, MemoryController};

    fn cpu_bus() -> (
        MemoryController<CpuPort>,
        Rc<RefCell<Ppu>>,
        Rc<RefCell<Apu>>,
        Rc<RefCell<Joypad>>,
        Rc<Cell<Option<u8>>>,
    ) {
        let ppu = Rc::new(RefCell::new(Ppu::new(vec![0; 8192], InterruptLine::new())));
        let apu = Rc::new(RefCell::new(Apu::new()));
        let joypad1 = Rc::new(RefCell::new(Joypad::new()));
        let joypad2 = Rc::new(RefCell::new(Joypad::new()));
        let oam_dma = Rc::new(Cell::new(None));

        let mut bus = MemoryController::new();
        bus.add_memory(CpuPort::Ram(MirroredRam::new(0x800)), 0x0000, 0x2000);
        bus.add_memory(
            CpuPort::Ppu(PpuRegisters::new(ppu.clone())),
            0x2000,
            0x4000,
        );
        bus.add_memory(
            CpuPort::Apu(ApuRegisters::new(
                apu.clone(),
                joypad1.clone(),
                joypad2.clone(),
                oam_dma.clone(),
            )),
            0x4000,
            0x4018,
        );
        bus.add_memory(
            CpuPort::Prg(MirroredRom::new(vec![0xEA; 0x4000], 0x8000)),
            0x8000,
            0x1_0000,
        );
        (bus, ppu, apu, joypad1, oam_dma)
    }

    #[test]
    fn ram_mirrors_across_window() {
        let (mut bus, ..) = cpu_bus();
        bus.write(0x0000, 0xAB).unwrap();
        assert_eq!(bus.read(0x0800).unwrap(), 0xAB);
        assert_eq!(bus.read(0x1000).unwrap(), 0xAB);
        assert_eq!(bus.read(0x1800).unwrap(), 0xAB);
    }

    #[test]
    fn ppu_registers_mirror_every_eight_bytes() {
        let (mut bus, ppu, ..) = cpu_bus();
        bus.write(0x2000, 0x80).unwrap();
        bus.write(0x3FF8, 0x90).unwrap(); // mirror of $2000
        assert_eq!(ppu.borrow().nametable_base(), 0x2000);
        // ctrl took the last write
        bus.write(0x2006, 0x21).unwrap();
        bus.write(0x2006, 0x00).unwrap();
        assert_eq!(ppu.borrow().vram_addr(), 0x2100);
    }

    #[test]
    fn write_only_ports_fault_on_read() {
        let (mut bus, ..) = cpu_bus();
        for reg in [0x2000, 0x2001, 0x2003, 0x2005, 0x2006, 0x2007] {
            assert_eq!(
                bus.read(reg).unwrap_err(),
                BusFault::WriteOnly { addr: reg },
                "${reg:04X}"
            );
        }
        // Status and OAM data are readable
        assert!(bus.read(0x2002).is_ok());
        assert!(bus.read(0x2004).is_ok());
    }

    #[test]
    fn status_read_through_bus() {
        let (mut bus, ..) = cpu_bus();
        let value = bus.read(0x2002).unwrap();
        assert_eq!(value & 0x1F, 0);
    }

    #[test]
    fn apu_writes_reach_the_stub() {
        let (mut bus, _, apu, ..) = cpu_bus();
        bus.write(0x4015, 0x1F).unwrap();
        bus.write(0x4011, 0xFF).unwrap();
        bus.write(0x4017, 0x40).unwrap();
        assert_eq!(apu.borrow().channel_enable(), 0x1F);
        assert_eq!(apu.borrow().dmc_value(), 0x7F);
        assert_eq!(apu.borrow().frame_counter(), 0x40);
    }

    #[test]
    fn unimplemented_apu_ports_fail_loudly() {
        let (mut bus, ..) = cpu_bus();
        assert!(matches!(
            bus.write(0x4000, 0x01).unwrap_err(),
            BusFault::Unimplemented { addr: 0x4000, .. }
        ));
        assert!(matches!(
            bus.read(0x4015).unwrap_err(),
            BusFault::Unimplemented { addr: 0x4015, .. }
        ));
    }

    #[test]
    fn controller_strobe_and_shift_through_bus() {
        use crate::input::NesButton;

        let (mut bus, _, _, joypad1, _) = cpu_bus();
        joypad1
            .borrow_mut()
            .set_button(NesButton::A.bit(), true);
        joypad1
            .borrow_mut()
            .set_button(NesButton::Start.bit(), true);

        bus.write(0x4016, 1).unwrap();
        bus.write(0x4016, 0).unwrap();

        let bits: Vec<u8> = (0..8).map(|_| bus.read(0x4016).unwrap()).collect();
        assert_eq!(bits, [1, 0, 0, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn dma_write_latches_page() {
        let (mut bus, _, _, _, oam_dma) = cpu_bus();
        assert_eq!(oam_dma.get(), None);
        bus.write(0x4014, 0x02).unwrap();
        assert_eq!(oam_dma.get(), Some(0x02));
    }

    #[test]
    fn gap_between_io_and_prg_is_unmapped() {
        let (mut bus, ..) = cpu_bus();
        assert_eq!(
            bus.read(0x4018).unwrap_err(),
            BusFault::Unmapped { addr: 0x4018 }
        );
        assert_eq!(
            bus.read(0x6000).unwrap_err(),
            BusFault::Unmapped { addr: 0x6000 }
        );
    }

    #[test]
    fn sixteen_k_prg_mirrors() {
        let mut prg = vec![0u8; 0x4000];
        prg[0x0123] = 0x42;
        let mut bus = MemoryController::new();
        bus.add_memory(
            CpuPort::Prg(MirroredRom::new(prg, 0x8000)),
            0x8000,
            0x1_0000,
        );
        // 16K image appears at both halves of the 32K window
        assert_eq!(bus.read(0x8123).unwrap(), 0x42);
        assert_eq!(bus.read(0xC123).unwrap(), 0x42);
        assert!(matches!(
            bus.write(0x8123, 0).unwrap_err(),
            BusFault::ReadOnly { addr: 0x8123 }
        ));
    }
}
