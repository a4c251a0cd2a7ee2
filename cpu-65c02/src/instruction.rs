//! Decoded instruction values.

/// How an instruction finds its operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    /// No operand bytes; the operation involves no memory operand.
    Implied,
    /// The operand is the accumulator itself.
    Accumulator,
    /// The operand byte is the value.
    Immediate,
    /// One-byte address in page zero.
    ZeroPage,
    /// Zero-page address plus X, wrapping within page zero.
    IndexedZeroPageX,
    /// Zero-page address plus Y, wrapping within page zero.
    IndexedZeroPageY,
    /// Two-byte little-endian address.
    Absolute,
    /// Absolute address plus X.
    IndexedAbsoluteX,
    /// Absolute address plus Y.
    IndexedAbsoluteY,
    /// Pointer at (zero-page operand + X); the pointer is the effective
    /// address.
    IndexedIndirect,
    /// Pointer at the zero-page operand, plus Y.
    IndirectIndexed,
    /// Pointer at the zero-page operand.
    ZeroPageIndirect,
    /// Pointer at the absolute operand (JMP).
    AbsoluteIndirect,
    /// Pointer at the absolute operand + X (JMP).
    AbsoluteIndexedIndirect,
    /// Signed one-byte branch displacement from PC.
    Relative,
}

impl AddressingMode {
    /// Number of operand bytes following the opcode.
    #[must_use]
    pub const fn operand_length(self) -> usize {
        match self {
            Self::Implied | Self::Accumulator => 0,
            Self::Immediate
            | Self::ZeroPage
            | Self::IndexedZeroPageX
            | Self::IndexedZeroPageY
            | Self::IndexedIndirect
            | Self::IndirectIndexed
            | Self::ZeroPageIndirect
            | Self::Relative => 1,
            Self::Absolute
            | Self::IndexedAbsoluteX
            | Self::IndexedAbsoluteY
            | Self::AbsoluteIndirect
            | Self::AbsoluteIndexedIndirect => 2,
        }
    }
}

/// Operation mnemonics of the 65C02 subset this core executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Bra, Brk, Bvc, Bvs,
    Clc, Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx, Iny,
    Jmp, Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Phx, Phy, Pla, Plp,
    Plx, Ply, Rol, Ror, Rti, Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Stz,
    Tax, Tay, Trb, Tsb, Tsx, Txa, Txs, Tya,
}

/// One decoded instruction: operation, addressing mode, operand bytes.
///
/// Construction trusts the decoder; an instruction whose mode is outside
/// its operation's allow-list is rejected at execution time, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub mode: AddressingMode,
    pub operands: [u8; 2],
}

impl Instruction {
    #[must_use]
    pub const fn new(opcode: Opcode, mode: AddressingMode, operands: [u8; 2]) -> Self {
        Self {
            opcode,
            mode,
            operands,
        }
    }

    /// Number of operand bytes that are meaningful.
    #[must_use]
    pub const fn operand_length(&self) -> usize {
        self.mode.operand_length()
    }
}
