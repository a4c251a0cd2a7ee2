//! Top-level NES system.
//!
//! Owns the CPU, the CPU-side memory controller, and handles to the
//! peripherals wired into it. Scheduling is cooperative on one worker: a
//! host frame is a batch of CPU instructions followed by one frame of PPU
//! work. The PPU signals vertical blanking back through the interrupt
//! channel, which the CPU drains at instruction boundaries.

use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;
use std::{error, fmt};

use cpu_65c02::{Cpu, Interrupt, InterruptLine, StepError};
use emu_bus::{Bus, BusFault, MemoryController, MirroredRam, MirroredRom};

use crate::apu::Apu;
use crate::cartridge::{Cartridge, CartridgeError};
use crate::input::{InputScript, NesButton};
use crate::joypad::Joypad;
use crate::ports::{ApuRegisters, CpuPort, PpuRegisters};
use crate::ppu::{Ppu, FB_HEIGHT, FB_WIDTH};
use crate::region::Region;

/// CPU instructions executed per host frame.
///
/// A pacing knob, not a timing claim: roughly one NTSC frame's worth of
/// instructions (29,780 CPU cycles at ~3.5 cycles each).
const STEPS_PER_FRAME: usize = 8_500;

/// NES configuration.
pub struct NesConfig {
    /// iNES file contents.
    pub rom_data: Vec<u8>,
    /// CPU instructions per frame.
    pub steps_per_frame: usize,
}

impl NesConfig {
    #[must_use]
    pub fn new(rom_data: Vec<u8>) -> Self {
        Self {
            rom_data,
            steps_per_frame: STEPS_PER_FRAME,
        }
    }
}

/// A fault from either processor, as surfaced by [`Nes::run_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemError {
    Cpu(StepError),
    Ppu(BusFault),
}

impl fmt::Display for SystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu(err) => write!(f, "CPU fault {err}"),
            Self::Ppu(fault) => write!(f, "PPU fault: {fault}"),
        }
    }
}

impl error::Error for SystemError {}

impl From<StepError> for SystemError {
    fn from(err: StepError) -> Self {
        Self::Cpu(err)
    }
}

/// The NES.
pub struct Nes {
    cpu: Cpu,
    bus: MemoryController<CpuPort>,
    ppu: Rc<RefCell<Ppu>>,
    apu: Rc<RefCell<Apu>>,
    joypad1: Rc<RefCell<Joypad>>,
    joypad2: Rc<RefCell<Joypad>>,
    oam_dma: Rc<Cell<Option<u8>>>,
    interrupts: InterruptLine,
    input_script: InputScript,
    frame_count: u64,
    steps_per_frame: usize,
    region: Region,
}

impl Nes {
    /// Build a NES from the given configuration.
    ///
    /// The reset interrupt is already queued: the first CPU step vectors
    /// through $FFFC.
    ///
    /// # Errors
    ///
    /// Returns an error if the ROM image is invalid or unsupported.
    pub fn new(config: &NesConfig) -> Result<Self, CartridgeError> {
        let cartridge = Cartridge::parse(&config.rom_data)?;
        let region = cartridge.region;

        let interrupts = InterruptLine::new();
        let ppu = Rc::new(RefCell::new(Ppu::new(cartridge.chr, interrupts.clone())));
        let apu = Rc::new(RefCell::new(Apu::new()));
        let joypad1 = Rc::new(RefCell::new(Joypad::new()));
        let joypad2 = Rc::new(RefCell::new(Joypad::new()));
        let oam_dma = Rc::new(Cell::new(None));

        let mut bus = MemoryController::new();
        bus.add_memory(CpuPort::Ram(MirroredRam::new(0x800)), 0x0000, 0x2000);
        bus.add_memory(CpuPort::Ppu(PpuRegisters::new(ppu.clone())), 0x2000, 0x4000);
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
            CpuPort::Prg(MirroredRom::new(cartridge.prg, 0x8000)),
            0x8000,
            0x1_0000,
        );

        let cpu = Cpu::new(interrupts.clone());
        interrupts.raise(Interrupt::Reset);

        Ok(Self {
            cpu,
            bus,
            ppu,
            apu,
            joypad1,
            joypad2,
            oam_dma,
            interrupts,
            input_script: InputScript::new(),
            frame_count: 0,
            steps_per_frame: config.steps_per_frame,
            region,
        })
    }

    /// Run one host frame: scripted input, a batch of CPU instructions
    /// (with OAM DMA serviced between them), then one PPU frame.
    ///
    /// # Errors
    ///
    /// The first fault either processor raises; the machine should not be
    /// stepped further after one.
    pub fn run_frame(&mut self) -> Result<(), SystemError> {
        self.input_script
            .apply(self.frame_count, &mut self.joypad1.borrow_mut());
        self.frame_count += 1;

        for _ in 0..self.steps_per_frame {
            self.step()?;
        }

        self.ppu.borrow_mut().run_frame().map_err(SystemError::Ppu)
    }

    /// One CPU instruction plus any OAM DMA it triggered.
    ///
    /// # Errors
    ///
    /// CPU step faults, or bus faults from the DMA copy (reported at the
    /// PC of the triggering instruction).
    pub fn step(&mut self) -> Result<(), SystemError> {
        self.cpu.step(&mut self.bus)?;
        self.service_oam_dma().map_err(|fault| {
            SystemError::Cpu(StepError {
                pc: self.cpu.regs.pc_prev,
                cause: fault.into(),
            })
        })
    }

    /// A $4014 write copies 256 bytes from `page << 8` into OAM through
    /// $2004, atomically between instructions.
    fn service_oam_dma(&mut self) -> Result<(), BusFault> {
        if let Some(page) = self.oam_dma.take() {
            let base = u16::from(page) << 8;
            for i in 0..256 {
                let byte = self.bus.read(base.wrapping_add(i))?;
                self.bus.write(0x2004, byte)?;
            }
        }
        Ok(())
    }

    /// Queue a reset; it is serviced at the next instruction boundary.
    pub fn reset(&mut self) {
        self.interrupts.raise(Interrupt::Reset);
    }

    // === Observation and input ===

    /// The PPU framebuffer (palette indices, 256×240 row-major).
    #[must_use]
    pub fn framebuffer(&self) -> Ref<'_, [u8; FB_WIDTH * FB_HEIGHT]> {
        Ref::map(self.ppu.borrow(), Ppu::framebuffer)
    }

    #[must_use]
    pub fn framebuffer_width(&self) -> usize {
        FB_WIDTH
    }

    #[must_use]
    pub fn framebuffer_height(&self) -> usize {
        FB_HEIGHT
    }

    #[must_use]
    pub fn region(&self) -> Region {
        self.region
    }

    #[must_use]
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    /// The CPU-side memory controller.
    pub fn bus_mut(&mut self) -> &mut MemoryController<CpuPort> {
        &mut self.bus
    }

    /// Shared handle to the PPU.
    #[must_use]
    pub fn ppu(&self) -> Rc<RefCell<Ppu>> {
        self.ppu.clone()
    }

    /// Shared handle to the APU.
    #[must_use]
    pub fn apu(&self) -> Rc<RefCell<Apu>> {
        self.apu.clone()
    }

    /// Read internal RAM without register side effects.
    ///
    /// # Errors
    ///
    /// Bus faults (unmapped addresses).
    pub fn peek_ram(&mut self, addr: u16) -> Result<u8, BusFault> {
        self.bus.read(addr & 0x1FFF)
    }

    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Scripted input for controller 1.
    pub fn input_script(&mut self) -> &mut InputScript {
        &mut self.input_script
    }

    /// Press a button on controller 1.
    pub fn press_button(&mut self, button: NesButton) {
        self.joypad1.borrow_mut().set_button(button.bit(), true);
    }

    /// Release a button on controller 1.
    pub fn release_button(&mut self, button: NesButton) {
        self.joypad1.borrow_mut().set_button(button.bit(), false);
    }

    /// Controller 2 handle (no input source in this core).
    #[must_use]
    pub fn joypad2(&self) -> Rc<RefCell<Joypad>> {
        self.joypad2.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::make_ines;

    /// NOP-sled ROM with the reset vector pointing at $8000.
    fn nop_rom() -> Vec<u8> {
        let mut rom = make_ines(2, 1, 0x00);
        for i in 0..0x8000 {
            rom[16 + i] = 0xEA; // NOP
        }
        rom[16 + 0x7FFC] = 0x00;
        rom[16 + 0x7FFD] = 0x80;
        rom
    }

    fn nes() -> Nes {
        Nes::new(&NesConfig::new(nop_rom())).expect("valid ROM")
    }

    #[test]
    fn first_step_services_reset() {
        let mut nes = nes();
        nes.step().unwrap();
        assert_eq!(nes.cpu().regs.pc, 0x8000);
    }

    #[test]
    fn steps_advance_through_the_sled() {
        let mut nes = nes();
        nes.step().unwrap(); // reset
        nes.step().unwrap(); // NOP at $8000
        nes.step().unwrap(); // NOP at $8001
        assert_eq!(nes.cpu().regs.pc, 0x8002);
    }

    #[test]
    fn oam_dma_copies_a_page() {
        let mut nes = nes();
        nes.step().unwrap(); // reset

        for i in 0..256u16 {
            nes.bus_mut().write(0x0200 + i, (i & 0xFF) as u8).unwrap();
        }
        nes.bus_mut().write(0x4014, 0x02).unwrap();
        nes.step().unwrap(); // a NOP; DMA serviced after it

        let ppu = nes.ppu();
        let ppu = ppu.borrow();
        for (i, entry) in ppu.oam().iter().enumerate() {
            let base = (i * 4) as u8;
            assert_eq!(entry.y, base);
            assert_eq!(entry.tile, base + 1);
            assert_eq!(entry.attribute, base + 2);
            assert_eq!(entry.x, base + 3);
        }
    }

    #[test]
    fn run_frame_counts_frames_and_paints() {
        let mut nes = Nes::new(&NesConfig {
            rom_data: nop_rom(),
            steps_per_frame: 50,
        })
        .expect("valid ROM");

        nes.run_frame().unwrap();
        assert_eq!(nes.frame_count(), 1);
        // Rendering disabled: backdrop colour everywhere
        let fb = nes.framebuffer();
        assert!(fb.iter().all(|&p| p == fb[0]));
    }

    #[test]
    fn vblank_nmi_reaches_the_cpu() {
        // Enable NMI-on-vblank via $2000, then let a frame run. The NMI
        // vector points at $8000 (same as reset, harmless for NOPs).
        let mut rom = nop_rom();
        rom[16 + 0x7FFA] = 0x00;
        rom[16 + 0x7FFB] = 0x80;

        let mut nes = Nes::new(&NesConfig {
            rom_data: rom,
            steps_per_frame: 10,
        })
        .expect("valid ROM");

        nes.step().unwrap(); // reset
        nes.bus_mut().write(0x2000, 0x80).unwrap();

        nes.run_frame().unwrap(); // PPU queues the NMI at the end
        let s_before = nes.cpu().regs.s;
        nes.step().unwrap(); // services the NMI
        assert_eq!(nes.cpu().regs.pc, 0x8000);
        assert_eq!(nes.cpu().regs.s, s_before.wrapping_sub(3));
    }

    #[test]
    fn unmapped_access_stops_the_machine() {
        // Jump into the unmapped $4018-$7FFF hole: JMP $6000
        let mut rom = make_ines(2, 1, 0x00);
        let code = [0x4C, 0x00, 0x60]; // JMP $6000
        rom[16..16 + code.len()].copy_from_slice(&code);
        rom[16 + 0x7FFC] = 0x00;
        rom[16 + 0x7FFD] = 0x80;

        let mut nes = Nes::new(&NesConfig::new(rom)).expect("valid ROM");
        nes.step().unwrap(); // reset
        nes.step().unwrap(); // JMP
        let err = nes.step().unwrap_err();
        match err {
            SystemError::Cpu(step) => {
                assert_eq!(step.pc, 0x6000);
            }
            SystemError::Ppu(_) => panic!("expected CPU fault"),
        }
    }

    #[test]
    fn scripted_input_is_applied_at_frame_start() {
        let mut nes = Nes::new(&NesConfig {
            rom_data: nop_rom(),
            steps_per_frame: 5,
        })
        .expect("valid ROM");

        nes.input_script().hold(NesButton::Start, 0, 1);
        nes.run_frame().unwrap();

        // Strobe through the bus and read back
        nes.bus_mut().write(0x4016, 1).unwrap();
        nes.bus_mut().write(0x4016, 0).unwrap();
        let mut bits = Vec::new();
        for _ in 0..4 {
            bits.push(nes.bus_mut().read(0x4016).unwrap());
        }
        assert_eq!(bits, [0, 0, 0, 1]); // A, B, Select, Start
    }
}
