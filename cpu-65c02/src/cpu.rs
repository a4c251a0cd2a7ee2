//! Fetch/decode/execute core.
//!
//! `step()` runs one whole instruction: latch PC, fetch and decode the
//! opcode, fetch the operand bytes, then either service a pending interrupt
//! from the channel (discarding the fetched instruction) or execute.
//! Addressing is resolved by two paths - a value read and an effective
//! write address - because the read path dereferences indirection one level
//! deeper than the write path.

use emu_bus::{Bus, BusFault};

use crate::decode::decode;
use crate::error::{CpuError, StepError};
use crate::flags::{self, Status};
use crate::instruction::{AddressingMode, Instruction, Opcode};
use crate::interrupt::{Interrupt, InterruptLine};
use crate::registers::Registers;

use crate::instruction::AddressingMode::{
    Absolute, AbsoluteIndexedIndirect, AbsoluteIndirect, Accumulator, Immediate, Implied,
    IndexedAbsoluteX, IndexedAbsoluteY, IndexedIndirect, IndexedZeroPageX, IndexedZeroPageY,
    IndirectIndexed, Relative, ZeroPage, ZeroPageIndirect,
};

/// Modes accepted by the accumulator load/ALU group ("the load group").
const LOAD_MODES: &[AddressingMode] = &[
    Immediate,
    Absolute,
    ZeroPage,
    IndexedIndirect,
    IndirectIndexed,
    IndexedZeroPageX,
    IndexedAbsoluteX,
    IndexedAbsoluteY,
    ZeroPageIndirect,
];

/// The load group minus Immediate ("the store group").
const STORE_MODES: &[AddressingMode] = &[
    Absolute,
    ZeroPage,
    IndexedIndirect,
    IndirectIndexed,
    IndexedZeroPageX,
    IndexedAbsoluteX,
    IndexedAbsoluteY,
    ZeroPageIndirect,
];

const LDX_MODES: &[AddressingMode] = &[
    Immediate,
    Absolute,
    ZeroPage,
    IndexedZeroPageY,
    IndexedAbsoluteY,
];

const LDY_MODES: &[AddressingMode] = &[
    Immediate,
    Absolute,
    ZeroPage,
    IndexedZeroPageX,
    IndexedAbsoluteX,
];

const STX_MODES: &[AddressingMode] = &[Absolute, ZeroPage, IndexedZeroPageY];
const STY_MODES: &[AddressingMode] = &[Absolute, ZeroPage, IndexedZeroPageX];
const STZ_MODES: &[AddressingMode] = &[ZeroPage, IndexedZeroPageX, Absolute, IndexedAbsoluteX];

const COMPARE_INDEX_MODES: &[AddressingMode] = &[Immediate, Absolute, ZeroPage];

const BIT_MODES: &[AddressingMode] = &[
    Immediate,
    Absolute,
    ZeroPage,
    IndexedZeroPageX,
    IndexedAbsoluteX,
];

/// Shift/rotate targets: the accumulator or a read-modify-write location.
const SHIFT_MODES: &[AddressingMode] = &[
    Accumulator,
    Absolute,
    ZeroPage,
    IndexedZeroPageX,
    IndexedAbsoluteX,
];

const INC_DEC_MODES: &[AddressingMode] = &[Absolute, ZeroPage, IndexedZeroPageX, IndexedAbsoluteX];
const TEST_BITS_MODES: &[AddressingMode] = &[Absolute, ZeroPage];
const BRANCH_MODES: &[AddressingMode] = &[Relative];
const JMP_MODES: &[AddressingMode] = &[Absolute, AbsoluteIndirect, AbsoluteIndexedIndirect];
const JSR_MODES: &[AddressingMode] = &[Absolute];
const IMPLIED_ONLY: &[AddressingMode] = &[Implied];

/// The 65C02 CPU.
pub struct Cpu {
    pub regs: Registers,
    interrupts: InterruptLine,
}

impl Cpu {
    /// Create a CPU consuming interrupts from `interrupts`.
    #[must_use]
    pub fn new(interrupts: InterruptLine) -> Self {
        Self {
            regs: Registers::new(),
            interrupts,
        }
    }

    /// Handle to the interrupt channel this CPU drains.
    #[must_use]
    pub fn interrupt_line(&self) -> InterruptLine {
        self.interrupts.clone()
    }

    /// Run one instruction (or service one interrupt).
    ///
    /// # Errors
    ///
    /// Any decode, addressing, or bus failure, tagged with the PC of the
    /// instruction that raised it. The CPU is not usable for resuming after
    /// an error; the host loop is expected to stop.
    pub fn step<B: Bus>(&mut self, bus: &mut B) -> Result<(), StepError> {
        self.regs.pc_prev = self.regs.pc;
        self.step_inner(bus).map_err(|cause| StepError {
            pc: self.regs.pc_prev,
            cause,
        })
    }

    fn step_inner<B: Bus>(&mut self, bus: &mut B) -> Result<(), CpuError> {
        let byte = self.fetch(bus)?;
        let (opcode, mode) = decode(byte)?;
        let mut operands = [0u8; 2];
        for slot in operands.iter_mut().take(mode.operand_length()) {
            *slot = self.fetch(bus)?;
        }
        let instruction = Instruction::new(opcode, mode, operands);

        // Interrupts are observed only between instructions. A pending
        // source wins over the instruction just fetched: pc_prev still
        // points at it, so the pushed return address re-fetches it after
        // the handler returns.
        match self.interrupts.take() {
            Some(source) => self.service(bus, source),
            None => self.execute(bus, &instruction),
        }
    }

    /// Service an interrupt: push the interrupted PC and status, mask IRQs,
    /// vector.
    ///
    /// # Errors
    ///
    /// Bus faults from the stack pushes or the vector reads.
    pub fn service<B: Bus>(&mut self, bus: &mut B, source: Interrupt) -> Result<(), CpuError> {
        let ret = self.regs.pc_prev;
        self.push(bus, (ret >> 8) as u8)?;
        self.push(bus, (ret & 0xFF) as u8)?;
        self.push(bus, self.regs.p.bits())?;
        // I must be set before vectoring, even if the vector read faults.
        self.regs.p.set(flags::I);
        let vector = source.vector();
        let lo = bus.read(vector)?;
        let hi = bus.read(vector.wrapping_add(1))?;
        self.regs.pc = u16::from_le_bytes([lo, hi]);
        Ok(())
    }

    /// Execute one already-decoded instruction.
    ///
    /// Public so tests and tools can drive hand-built instructions without
    /// going through memory.
    ///
    /// # Errors
    ///
    /// [`CpuError::IllegalAddressMode`] when the mode is outside the
    /// operation's allow-list, or any bus fault from operand traffic.
    #[allow(clippy::too_many_lines)]
    pub fn execute<B: Bus>(&mut self, bus: &mut B, ins: &Instruction) -> Result<(), CpuError> {
        match ins.opcode {
            // === Loads ===
            Opcode::Lda => {
                self.check_mode(ins, LOAD_MODES)?;
                let value = self.operand_value(bus, ins)?;
                self.regs.a = value;
                self.regs.p.update_nz(value);
            }
            Opcode::Ldx => {
                self.check_mode(ins, LDX_MODES)?;
                let value = self.operand_value(bus, ins)?;
                self.regs.x = value;
                self.regs.p.update_nz(value);
            }
            Opcode::Ldy => {
                self.check_mode(ins, LDY_MODES)?;
                let value = self.operand_value(bus, ins)?;
                self.regs.y = value;
                self.regs.p.update_nz(value);
            }

            // === Stores ===
            Opcode::Sta => {
                self.check_mode(ins, STORE_MODES)?;
                let addr = self.effective_address(bus, ins)?;
                bus.write(addr, self.regs.a)?;
            }
            Opcode::Stx => {
                self.check_mode(ins, STX_MODES)?;
                let addr = self.effective_address(bus, ins)?;
                bus.write(addr, self.regs.x)?;
            }
            Opcode::Sty => {
                self.check_mode(ins, STY_MODES)?;
                let addr = self.effective_address(bus, ins)?;
                bus.write(addr, self.regs.y)?;
            }
            Opcode::Stz => {
                self.check_mode(ins, STZ_MODES)?;
                let addr = self.effective_address(bus, ins)?;
                bus.write(addr, 0)?;
            }

            // === Register transfers ===
            Opcode::Tax => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.regs.x = self.regs.a;
                self.regs.p.update_nz(self.regs.x);
            }
            Opcode::Tay => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.regs.y = self.regs.a;
                self.regs.p.update_nz(self.regs.y);
            }
            Opcode::Txa => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.regs.a = self.regs.x;
                self.regs.p.update_nz(self.regs.a);
            }
            Opcode::Tya => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.regs.a = self.regs.y;
                self.regs.p.update_nz(self.regs.a);
            }
            Opcode::Txs => {
                // No flag update: the stack pointer is not an ALU result.
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.regs.s = self.regs.x;
            }
            Opcode::Tsx => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.regs.x = self.regs.s;
                self.regs.p.update_nz(self.regs.x);
            }

            // === Arithmetic ===
            Opcode::Adc => {
                self.check_mode(ins, LOAD_MODES)?;
                let value = self.operand_value(bus, ins)?;
                let sum = u16::from(self.regs.a)
                    + u16::from(value)
                    + u16::from(self.regs.p.carry_bit());
                let result = (sum & 0xFF) as u8;
                self.regs.p.set_if(flags::C, sum > 0xFF);
                self.regs.p.set_if(flags::V, sum > 0xFF);
                self.regs.p.update_nz(result);
                self.regs.a = result;
            }
            Opcode::Sbc => {
                self.check_mode(ins, LOAD_MODES)?;
                let value = self.operand_value(bus, ins)?;
                let borrow = i16::from(1 - self.regs.p.carry_bit());
                let diff = i16::from(self.regs.a) - i16::from(value) - borrow;
                self.regs.p.set_if(flags::Z, diff == 0);
                self.regs.p.set_if(flags::C, diff >= 0);
                self.regs.p.set_if(flags::V, diff < -128);
                self.regs.p.set_if(flags::N, diff < 0);
                self.regs.a = (diff & 0xFF) as u8;
            }

            // === Compares ===
            Opcode::Cmp => {
                self.check_mode(ins, LOAD_MODES)?;
                let value = self.operand_value(bus, ins)?;
                self.compare(self.regs.a, value);
            }
            Opcode::Cpx => {
                self.check_mode(ins, COMPARE_INDEX_MODES)?;
                let value = self.operand_value(bus, ins)?;
                self.compare(self.regs.x, value);
            }
            Opcode::Cpy => {
                self.check_mode(ins, COMPARE_INDEX_MODES)?;
                let value = self.operand_value(bus, ins)?;
                self.compare(self.regs.y, value);
            }

            // === Bitwise ===
            Opcode::And => {
                self.check_mode(ins, LOAD_MODES)?;
                self.regs.a &= self.operand_value(bus, ins)?;
                self.regs.p.update_nz(self.regs.a);
            }
            Opcode::Ora => {
                self.check_mode(ins, LOAD_MODES)?;
                self.regs.a |= self.operand_value(bus, ins)?;
                self.regs.p.update_nz(self.regs.a);
            }
            Opcode::Eor => {
                self.check_mode(ins, LOAD_MODES)?;
                self.regs.a ^= self.operand_value(bus, ins)?;
                self.regs.p.update_nz(self.regs.a);
            }
            Opcode::Bit => {
                self.check_mode(ins, BIT_MODES)?;
                let value = self.operand_value(bus, ins)?;
                let masked = value & self.regs.a;
                self.regs.p.set_if(flags::Z, masked == 0);
                self.regs.p.set_if(flags::N, masked & 0x80 != 0);
                self.regs.p.set_if(flags::V, masked & 0x40 != 0);
            }

            // === Shifts and rotates ===
            Opcode::Asl => {
                self.modify(bus, ins, SHIFT_MODES, |p, value| {
                    p.set_if(flags::C, value & 0x80 != 0);
                    value << 1
                })?;
            }
            Opcode::Lsr => {
                self.modify(bus, ins, SHIFT_MODES, |p, value| {
                    p.set_if(flags::C, value & 0x01 != 0);
                    value >> 1
                })?;
            }
            Opcode::Rol => {
                self.modify(bus, ins, SHIFT_MODES, |p, value| {
                    let carry_in = p.carry_bit();
                    p.set_if(flags::C, value & 0x80 != 0);
                    (value << 1) | carry_in
                })?;
            }
            Opcode::Ror => {
                self.modify(bus, ins, SHIFT_MODES, |p, value| {
                    let carry_in = p.carry_bit() << 7;
                    p.set_if(flags::C, value & 0x01 != 0);
                    (value >> 1) | carry_in
                })?;
            }

            // === Increments and decrements ===
            Opcode::Inc => {
                self.modify(bus, ins, INC_DEC_MODES, |_, value| value.wrapping_add(1))?;
            }
            Opcode::Dec => {
                self.modify(bus, ins, INC_DEC_MODES, |_, value| value.wrapping_sub(1))?;
            }
            Opcode::Inx => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.regs.x = self.regs.x.wrapping_add(1);
                self.regs.p.update_nz(self.regs.x);
            }
            Opcode::Iny => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.regs.y = self.regs.y.wrapping_add(1);
                self.regs.p.update_nz(self.regs.y);
            }
            Opcode::Dex => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.regs.x = self.regs.x.wrapping_sub(1);
                self.regs.p.update_nz(self.regs.x);
            }
            Opcode::Dey => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.regs.y = self.regs.y.wrapping_sub(1);
                self.regs.p.update_nz(self.regs.y);
            }

            // === Test-and-set / test-and-reset bits ===
            Opcode::Tsb => {
                self.check_mode(ins, TEST_BITS_MODES)?;
                let addr = self.effective_address(bus, ins)?;
                let value = bus.read(addr)?;
                self.regs.p.set_if(flags::Z, value & self.regs.a == 0);
                bus.write(addr, value | self.regs.a)?;
            }
            Opcode::Trb => {
                self.check_mode(ins, TEST_BITS_MODES)?;
                let addr = self.effective_address(bus, ins)?;
                let value = bus.read(addr)?;
                self.regs.p.set_if(flags::Z, value & self.regs.a == 0);
                bus.write(addr, value & !self.regs.a)?;
            }

            // === Branches ===
            Opcode::Bcc => self.branch(bus, ins, !self.regs.p.is_set(flags::C))?,
            Opcode::Bcs => self.branch(bus, ins, self.regs.p.is_set(flags::C))?,
            Opcode::Bne => self.branch(bus, ins, !self.regs.p.is_set(flags::Z))?,
            Opcode::Beq => self.branch(bus, ins, self.regs.p.is_set(flags::Z))?,
            Opcode::Bpl => self.branch(bus, ins, !self.regs.p.is_set(flags::N))?,
            Opcode::Bmi => self.branch(bus, ins, self.regs.p.is_set(flags::N))?,
            Opcode::Bvc => self.branch(bus, ins, !self.regs.p.is_set(flags::V))?,
            Opcode::Bvs => self.branch(bus, ins, self.regs.p.is_set(flags::V))?,
            Opcode::Bra => self.branch(bus, ins, true)?,

            // === Jumps and returns ===
            Opcode::Jmp => {
                self.check_mode(ins, JMP_MODES)?;
                self.regs.pc = self.effective_address(bus, ins)?;
            }
            Opcode::Jsr => {
                self.check_mode(ins, JSR_MODES)?;
                let target = self.effective_address(bus, ins)?;
                let ret = self.regs.pc;
                self.push(bus, (ret >> 8) as u8)?;
                self.push(bus, (ret & 0xFF) as u8)?;
                self.regs.pc = target;
            }
            Opcode::Rts => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                let lo = self.pop(bus)?;
                let hi = self.pop(bus)?;
                self.regs.pc = u16::from_le_bytes([lo, hi]);
            }
            Opcode::Rti => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                let status = self.pop(bus)?;
                self.regs.p = Status::from_byte(status);
                let lo = self.pop(bus)?;
                let hi = self.pop(bus)?;
                self.regs.pc = u16::from_le_bytes([lo, hi]);
            }

            // === Stack ===
            Opcode::Pha => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.push(bus, self.regs.a)?;
            }
            Opcode::Php => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.push(bus, self.regs.p.bits())?;
            }
            Opcode::Phx => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.push(bus, self.regs.x)?;
            }
            Opcode::Phy => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.push(bus, self.regs.y)?;
            }
            Opcode::Pla => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.regs.a = self.pop(bus)?;
                self.regs.p.update_nz(self.regs.a);
            }
            Opcode::Plp => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                let status = self.pop(bus)?;
                self.regs.p = Status::from_byte(status);
            }
            Opcode::Plx => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.regs.x = self.pop(bus)?;
                self.regs.p.update_nz(self.regs.x);
            }
            Opcode::Ply => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.regs.y = self.pop(bus)?;
                self.regs.p.update_nz(self.regs.y);
            }

            // === Flag operations ===
            Opcode::Clc => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.regs.p.clear(flags::C);
            }
            Opcode::Sec => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.regs.p.set(flags::C);
            }
            Opcode::Cli => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.regs.p.clear(flags::I);
            }
            Opcode::Sei => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.regs.p.set(flags::I);
            }
            Opcode::Cld => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.regs.p.clear(flags::D);
            }
            Opcode::Sed => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.regs.p.set(flags::D);
            }
            Opcode::Clv => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.regs.p.clear(flags::V);
            }

            // === System ===
            Opcode::Nop => {
                self.check_mode(ins, IMPLIED_ONLY)?;
            }
            Opcode::Brk => {
                self.check_mode(ins, IMPLIED_ONLY)?;
                self.service(bus, Interrupt::Brk)?;
            }
        }

        Ok(())
    }

    // === Fetch and stack ===

    fn fetch<B: Bus>(&mut self, bus: &mut B) -> Result<u8, BusFault> {
        let value = bus.read(self.regs.pc)?;
        self.regs.pc = self.regs.pc.wrapping_add(1);
        Ok(value)
    }

    fn push<B: Bus>(&mut self, bus: &mut B, value: u8) -> Result<(), BusFault> {
        bus.write(0x0100 + u16::from(self.regs.s), value)?;
        self.regs.s = self.regs.s.wrapping_sub(1);
        Ok(())
    }

    fn pop<B: Bus>(&mut self, bus: &mut B) -> Result<u8, BusFault> {
        self.regs.s = self.regs.s.wrapping_add(1);
        bus.read(0x0100 + u16::from(self.regs.s))
    }

    // === Addressing resolution ===

    /// Read path: the operand value, through indirection where the mode has
    /// any.
    fn operand_value<B: Bus>(&mut self, bus: &mut B, ins: &Instruction) -> Result<u8, CpuError> {
        match ins.mode {
            Immediate => Ok(ins.operands[0]),
            Accumulator => Ok(self.regs.a),
            Implied | Relative => Err(CpuError::IllegalAddressMode(ins.opcode, ins.mode)),
            _ => {
                let addr = self.effective_address(bus, ins)?;
                Ok(bus.read(addr)?)
            }
        }
    }

    /// Write path: the effective address the operation targets. For the
    /// indirect modes this is the fetched pointer itself (one level
    /// shallower than the read path's final access).
    fn effective_address<B: Bus>(
        &mut self,
        bus: &mut B,
        ins: &Instruction,
    ) -> Result<u16, CpuError> {
        let b0 = ins.operands[0];
        let b1 = ins.operands[1];
        let addr = match ins.mode {
            ZeroPage => u16::from(b0),
            IndexedZeroPageX => u16::from(b0.wrapping_add(self.regs.x)),
            IndexedZeroPageY => u16::from(b0.wrapping_add(self.regs.y)),
            Absolute => u16::from_le_bytes([b0, b1]),
            IndexedAbsoluteX => u16::from_le_bytes([b0, b1]).wrapping_add(u16::from(self.regs.x)),
            IndexedAbsoluteY => u16::from_le_bytes([b0, b1]).wrapping_add(u16::from(self.regs.y)),
            IndexedIndirect => self.zero_page_pointer(bus, b0.wrapping_add(self.regs.x))?,
            IndirectIndexed => self
                .zero_page_pointer(bus, b0)?
                .wrapping_add(u16::from(self.regs.y)),
            ZeroPageIndirect => self.zero_page_pointer(bus, b0)?,
            AbsoluteIndirect => self.pointer_at(bus, u16::from_le_bytes([b0, b1]))?,
            AbsoluteIndexedIndirect => {
                let ptr = u16::from_le_bytes([b0, b1]).wrapping_add(u16::from(self.regs.x));
                self.pointer_at(bus, ptr)?
            }
            Relative => {
                let offset = i16::from(b0 as i8);
                self.regs.pc.wrapping_add(offset as u16)
            }
            Immediate | Accumulator | Implied => {
                return Err(CpuError::IllegalAddressMode(ins.opcode, ins.mode))
            }
        };
        Ok(addr)
    }

    /// Little-endian pointer in page zero; the high byte wraps within the
    /// page.
    fn zero_page_pointer<B: Bus>(&mut self, bus: &mut B, zp: u8) -> Result<u16, CpuError> {
        let lo = bus.read(u16::from(zp))?;
        let hi = bus.read(u16::from(zp.wrapping_add(1)))?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    /// Little-endian pointer anywhere in the address space.
    fn pointer_at<B: Bus>(&mut self, bus: &mut B, ptr: u16) -> Result<u16, CpuError> {
        let lo = bus.read(ptr)?;
        let hi = bus.read(ptr.wrapping_add(1))?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    // === Shared operation bodies ===

    fn check_mode(&self, ins: &Instruction, allowed: &[AddressingMode]) -> Result<(), CpuError> {
        if allowed.contains(&ins.mode) {
            Ok(())
        } else {
            Err(CpuError::IllegalAddressMode(ins.opcode, ins.mode))
        }
    }

    /// Read-modify-write body: resolve the target once, transform, write
    /// back, update N/Z from the result. Accumulator forms skip the bus.
    fn modify<B: Bus>(
        &mut self,
        bus: &mut B,
        ins: &Instruction,
        allowed: &[AddressingMode],
        transform: impl FnOnce(&mut Status, u8) -> u8,
    ) -> Result<(), CpuError> {
        self.check_mode(ins, allowed)?;
        if ins.mode == Accumulator {
            let result = transform(&mut self.regs.p, self.regs.a);
            self.regs.a = result;
            self.regs.p.update_nz(result);
        } else {
            let addr = self.effective_address(bus, ins)?;
            let value = bus.read(addr)?;
            let result = transform(&mut self.regs.p, value);
            bus.write(addr, result)?;
            self.regs.p.update_nz(result);
        }
        Ok(())
    }

    fn compare(&mut self, register: u8, value: u8) {
        let diff = register.wrapping_sub(value);
        self.regs.p.set_if(flags::N, diff & 0x80 != 0);
        self.regs.p.set_if(flags::Z, register == value);
        self.regs.p.set_if(flags::C, register >= value);
    }

    fn branch<B: Bus>(
        &mut self,
        bus: &mut B,
        ins: &Instruction,
        condition: bool,
    ) -> Result<(), CpuError> {
        self.check_mode(ins, BRANCH_MODES)?;
        if condition {
            self.regs.pc = self.effective_address(bus, ins)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_bus::{MemoryController, Ram};

    fn flat_bus() -> MemoryController<Ram> {
        let mut bus = MemoryController::new();
        bus.add_memory(Ram::new(0x1_0000), 0x0000, 0x1_0000);
        bus
    }

    fn cpu() -> Cpu {
        Cpu::new(InterruptLine::new())
    }

    fn ins(opcode: Opcode, mode: AddressingMode, operands: [u8; 2]) -> Instruction {
        Instruction::new(opcode, mode, operands)
    }

    #[test]
    fn load_updates_nz() {
        let mut bus = flat_bus();
        let mut cpu = cpu();

        cpu.execute(&mut bus, &ins(Opcode::Lda, Immediate, [0x00, 0]))
            .unwrap();
        assert!(cpu.regs.p.is_set(flags::Z));
        assert!(!cpu.regs.p.is_set(flags::N));

        cpu.execute(&mut bus, &ins(Opcode::Lda, Immediate, [0x80, 0]))
            .unwrap();
        assert!(!cpu.regs.p.is_set(flags::Z));
        assert!(cpu.regs.p.is_set(flags::N));
    }

    #[test]
    fn adc_carry_chain() {
        let mut bus = flat_bus();
        let mut cpu = cpu();

        cpu.regs.a = 0xFF;
        cpu.execute(&mut bus, &ins(Opcode::Adc, Immediate, [0x01, 0]))
            .unwrap();
        assert_eq!(cpu.regs.a, 0x00);
        assert!(cpu.regs.p.is_set(flags::C));
        assert!(cpu.regs.p.is_set(flags::Z));

        // Carry feeds the next addition
        cpu.execute(&mut bus, &ins(Opcode::Adc, Immediate, [0x10, 0]))
            .unwrap();
        assert_eq!(cpu.regs.a, 0x11);
        assert!(!cpu.regs.p.is_set(flags::C));
    }

    #[test]
    fn sbc_updates_only_a() {
        let mut bus = flat_bus();
        bus.write(0x0040, 0x08).unwrap();
        let mut cpu = cpu();
        cpu.regs.a = 0x10;
        cpu.regs.p.set(flags::C);

        cpu.execute(&mut bus, &ins(Opcode::Sbc, ZeroPage, [0x40, 0]))
            .unwrap();
        assert_eq!(cpu.regs.a, 0x08);
        assert!(cpu.regs.p.is_set(flags::C));
        // The operand cell is untouched
        assert_eq!(bus.read(0x0040).unwrap(), 0x08);
    }

    #[test]
    fn sbc_borrow_flags() {
        let mut bus = flat_bus();
        let mut cpu = cpu();
        cpu.regs.a = 0x05;
        cpu.regs.p.set(flags::C);

        cpu.execute(&mut bus, &ins(Opcode::Sbc, Immediate, [0x06, 0]))
            .unwrap();
        assert_eq!(cpu.regs.a, 0xFF);
        assert!(!cpu.regs.p.is_set(flags::C));
        assert!(cpu.regs.p.is_set(flags::N));
        assert!(!cpu.regs.p.is_set(flags::Z));
    }

    #[test]
    fn compare_flag_triple() {
        let mut bus = flat_bus();
        let mut cpu = cpu();
        cpu.regs.a = 0x40;

        // A > operand: C set, Z clear
        cpu.execute(&mut bus, &ins(Opcode::Cmp, Immediate, [0x30, 0]))
            .unwrap();
        assert!(cpu.regs.p.is_set(flags::C));
        assert!(!cpu.regs.p.is_set(flags::Z));

        // A == operand: C and Z set, N clear
        cpu.execute(&mut bus, &ins(Opcode::Cmp, Immediate, [0x40, 0]))
            .unwrap();
        assert!(cpu.regs.p.is_set(flags::C));
        assert!(cpu.regs.p.is_set(flags::Z));
        assert!(!cpu.regs.p.is_set(flags::N));

        // A < operand: C and Z clear, N from the difference
        cpu.execute(&mut bus, &ins(Opcode::Cmp, Immediate, [0x41, 0]))
            .unwrap();
        assert!(!cpu.regs.p.is_set(flags::C));
        assert!(!cpu.regs.p.is_set(flags::Z));
        assert!(cpu.regs.p.is_set(flags::N));
    }

    #[test]
    fn rotate_through_carry() {
        let mut bus = flat_bus();
        let mut cpu = cpu();
        cpu.regs.a = 0x80;
        cpu.regs.p.clear(flags::C);

        cpu.execute(&mut bus, &ins(Opcode::Rol, Accumulator, [0, 0]))
            .unwrap();
        assert_eq!(cpu.regs.a, 0x00);
        assert!(cpu.regs.p.is_set(flags::C));

        cpu.execute(&mut bus, &ins(Opcode::Rol, Accumulator, [0, 0]))
            .unwrap();
        assert_eq!(cpu.regs.a, 0x01);
        assert!(!cpu.regs.p.is_set(flags::C));
    }

    #[test]
    fn ror_carry_in_lands_in_bit7() {
        let mut bus = flat_bus();
        let mut cpu = cpu();
        cpu.regs.a = 0x01;
        cpu.regs.p.set(flags::C);

        cpu.execute(&mut bus, &ins(Opcode::Ror, Accumulator, [0, 0]))
            .unwrap();
        assert_eq!(cpu.regs.a, 0x80);
        assert!(cpu.regs.p.is_set(flags::C));
        assert!(cpu.regs.p.is_set(flags::N));
    }

    #[test]
    fn shift_memory_form_reads_once_writes_once() {
        use emu_bus::{BusDevice, BusFault};
        use std::cell::Cell;
        use std::rc::Rc;

        /// RAM that counts accesses.
        struct CountingRam {
            bytes: Vec<u8>,
            reads: Rc<Cell<u32>>,
            writes: Rc<Cell<u32>>,
        }

        impl BusDevice for CountingRam {
            fn read(&mut self, offset: u16) -> Result<u8, BusFault> {
                self.reads.set(self.reads.get() + 1);
                Ok(self.bytes[offset as usize])
            }
            fn write(&mut self, offset: u16, value: u8) -> Result<(), BusFault> {
                self.writes.set(self.writes.get() + 1);
                self.bytes[offset as usize] = value;
                Ok(())
            }
        }

        let reads = Rc::new(Cell::new(0));
        let writes = Rc::new(Cell::new(0));
        let mut bytes = vec![0u8; 0x1_0000];
        bytes[0x0300] = 0x41;
        let mut bus = MemoryController::new();
        bus.add_memory(
            CountingRam {
                bytes,
                reads: reads.clone(),
                writes: writes.clone(),
            },
            0x0000,
            0x1_0000,
        );

        let mut cpu = Cpu::new(InterruptLine::new());
        cpu.execute(&mut bus, &ins(Opcode::Asl, Absolute, [0x00, 0x03]))
            .unwrap();

        assert_eq!(reads.get(), 1);
        assert_eq!(writes.get(), 1);
        assert_eq!(bus.read(0x0300).unwrap(), 0x82);
    }

    #[test]
    fn trb_tsb() {
        let mut bus = flat_bus();
        bus.write(0x0010, 0b1100_0011).unwrap();
        let mut cpu = cpu();
        cpu.regs.a = 0b0000_0110;

        cpu.execute(&mut bus, &ins(Opcode::Tsb, ZeroPage, [0x10, 0]))
            .unwrap();
        assert_eq!(bus.read(0x0010).unwrap(), 0b1100_0111);
        assert!(!cpu.regs.p.is_set(flags::Z));

        cpu.execute(&mut bus, &ins(Opcode::Trb, ZeroPage, [0x10, 0]))
            .unwrap();
        assert_eq!(bus.read(0x0010).unwrap(), 0b1100_0001);
    }

    #[test]
    fn illegal_mode_is_rejected() {
        let mut bus = flat_bus();
        let mut cpu = cpu();
        let err = cpu
            .execute(&mut bus, &ins(Opcode::Lda, Implied, [0, 0]))
            .unwrap_err();
        assert_eq!(
            err,
            CpuError::IllegalAddressMode(Opcode::Lda, Implied)
        );

        // Sta rejects Immediate (the store group has no immediate form)
        let err = cpu
            .execute(&mut bus, &ins(Opcode::Sta, Immediate, [0, 0]))
            .unwrap_err();
        assert_eq!(
            err,
            CpuError::IllegalAddressMode(Opcode::Sta, Immediate)
        );
    }

    #[test]
    fn pending_interrupt_discards_fetched_instruction() {
        let mut bus = flat_bus();
        // Program at $0200: LDA #$55
        bus.write(0x0200, 0xA9).unwrap();
        bus.write(0x0201, 0x55).unwrap();
        // NMI vector -> $0300, where RTI waits
        bus.write(0xFFFA, 0x00).unwrap();
        bus.write(0xFFFB, 0x03).unwrap();
        bus.write(0x0300, 0x40).unwrap();

        let mut cpu = cpu();
        cpu.regs.pc = 0x0200;
        cpu.interrupt_line().raise(Interrupt::Nmi);

        cpu.step(&mut bus).unwrap();
        // The LDA was fetched but discarded
        assert_eq!(cpu.regs.pc, 0x0300);
        assert_eq!(cpu.regs.a, 0x00);
        assert!(cpu.regs.p.is_set(flags::I));

        // RTI returns to the discarded instruction, which now executes
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.regs.pc, 0x0200);
        cpu.step(&mut bus).unwrap();
        assert_eq!(cpu.regs.a, 0x55);
    }

    #[test]
    fn step_error_carries_instruction_pc() {
        let mut bus = flat_bus();
        bus.write(0x0200, 0xFF).unwrap(); // illegal opcode
        let mut cpu = cpu();
        cpu.regs.pc = 0x0200;

        let err = cpu.step(&mut bus).unwrap_err();
        assert_eq!(err.pc, 0x0200);
        assert_eq!(err.cause, CpuError::IllegalOpcode(0xFF));
    }

    #[test]
    fn stack_wraps_modulo_256() {
        let mut bus = flat_bus();
        let mut cpu = cpu();
        cpu.regs.s = 0x00;
        cpu.regs.a = 0xAB;
        cpu.execute(&mut bus, &ins(Opcode::Pha, Implied, [0, 0]))
            .unwrap();
        assert_eq!(bus.read(0x0100).unwrap(), 0xAB);
        assert_eq!(cpu.regs.s, 0xFF);
    }
}
