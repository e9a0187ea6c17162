use serde::{Deserialize, Serialize};

use crate::types::BitWidth;

/// Relative offset left in a jump or call until the fixup pass patches it.
pub const UNRESOLVED_OFFSET: i32 = i32::MIN;

// =============================================================================
// REGISTERS & OPERANDS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Register {
    A,
    B,
    C,
    D,
    /// Stack pointer. The stack grows toward lower addresses.
    SP,
    /// Base pointer of the current frame.
    BP,
    /// Code pointer (instruction index), read-only.
    CP,
}

impl Register {
    pub fn name(self) -> &'static str {
        match self {
            Register::A => "a",
            Register::B => "b",
            Register::C => "c",
            Register::D => "d",
            Register::SP => "sp",
            Register::BP => "bp",
            Register::CP => "cp",
        }
    }
}

impl std::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a memory operand points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressOperand {
    Absolute(u32),
    /// `base + offset`, where `base` holds a pointer.
    Relative { base: Register, offset: i32 },
}

impl AddressOperand {
    pub fn relative(base: Register, offset: i32) -> Self {
        AddressOperand::Relative { base, offset }
    }
}

impl std::fmt::Display for AddressOperand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressOperand::Absolute(address) => write!(f, "[{:#x}]", address),
            AddressOperand::Relative { base, offset: 0 } => write!(f, "[{}]", base),
            AddressOperand::Relative { base, offset } if *offset < 0 => {
                write!(f, "[{} - {}]", base, offset.unsigned_abs())
            }
            AddressOperand::Relative { base, offset } => write!(f, "[{} + {}]", base, offset),
        }
    }
}

/// One operand. Every operand carries the width it is read or written at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstructionOperand {
    /// Raw bits, already truncated to `width`.
    Immediate { value: u64, width: BitWidth },
    Register { register: Register, width: BitWidth },
    Memory { address: AddressOperand, width: BitWidth },
}

impl InstructionOperand {
    pub fn immediate(value: u64, width: BitWidth) -> Self {
        InstructionOperand::Immediate {
            value: width.truncate(value),
            width,
        }
    }

    /// A 32-bit relative offset for jumps and calls.
    pub fn offset(offset: i32) -> Self {
        Self::immediate(offset as u32 as u64, BitWidth::W32)
    }

    pub fn register(register: Register, width: BitWidth) -> Self {
        InstructionOperand::Register { register, width }
    }

    pub fn memory(address: AddressOperand, width: BitWidth) -> Self {
        InstructionOperand::Memory { address, width }
    }

    pub fn width(&self) -> BitWidth {
        match self {
            InstructionOperand::Immediate { width, .. }
            | InstructionOperand::Register { width, .. }
            | InstructionOperand::Memory { width, .. } => *width,
        }
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, InstructionOperand::Immediate { .. })
    }

    /// The immediate read as a signed 32-bit offset.
    pub fn as_offset(&self) -> Option<i32> {
        match self {
            InstructionOperand::Immediate {
                value,
                width: BitWidth::W32,
            } => Some(*value as u32 as i32),
            _ => None,
        }
    }
}

impl std::fmt::Display for InstructionOperand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstructionOperand::Immediate { value, width } => {
                write!(f, "{}:{}", width.sign_extend(*value), width)
            }
            InstructionOperand::Register { register, width } => write!(f, "{}:{}", register, width),
            InstructionOperand::Memory { address, width } => write!(f, "{}:{}", address, width),
        }
    }
}

// =============================================================================
// OPCODES
// =============================================================================

/// Binary instructions read `operand1 op operand2` and write `operand1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    // control
    Nop,
    /// Stops the processor with `operand1` as the exit code.
    Exit,
    /// Raises a user fault carrying `operand1`.
    Crash,

    // stack
    Push,
    PopTo,
    /// Drops `operand1` bytes.
    Discard,
    /// Reserves `operand1` zeroed bytes.
    StackAlloc,

    // moves
    Move,
    MoveZeroExtend,
    MoveSignExtend,

    // integer arithmetic
    MathAdd,
    MathSub,
    MathMult,
    MathDiv,
    MathMod,
    UMathDiv,
    UMathMod,
    MathNeg,

    // float arithmetic (f32 bit patterns)
    FMathAdd,
    FMathSub,
    FMathMult,
    FMathDiv,
    FMathMod,
    FMathNeg,

    // bits
    BitsAnd,
    BitsOr,
    BitsXor,
    BitsNot,
    BitsShiftLeft,
    BitsShiftRight,
    UBitsShiftRight,

    // logic, results are 0 or 1
    LogicAnd,
    LogicOr,
    LogicNot,

    // comparisons, results are 0 or 1
    CompareEq,
    CompareNe,
    CompareLt,
    CompareLe,
    CompareGt,
    CompareGe,
    UCompareLt,
    UCompareLe,
    UCompareGt,
    UCompareGe,
    FCompareEq,
    FCompareNe,
    FCompareLt,
    FCompareLe,
    FCompareGt,
    FCompareGe,

    // conversions
    IntToFloat,
    UIntToFloat,
    FloatToInt,
    FloatToUInt,

    // ==========================================================================
    // Jumps & calls
    // ==========================================================================
    /// Relative jump: target = ip + offset.
    Jump,
    /// Jump by `operand2` if `operand1` is zero.
    JumpIfZero,
    JumpIfNotZero,
    /// An immediate target is relative; a register or memory target is an
    /// absolute instruction index.
    Call,
    /// Pops the frame, then drops `operand1` bytes of parameters.
    Return,
    /// Calls the host function with id `operand1`.
    CallExternal,

    // heap
    /// Writes the address of a zeroed block of `operand2` bytes to `operand1`.
    HeapAlloc,
    HeapFree,

    /// Faults unless `0 <= operand1 < operand2` (signed).
    BoundsCheck,
}

impl Opcode {
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::Exit => "EXIT",
            Opcode::Crash => "CRASH",
            Opcode::Push => "PUSH",
            Opcode::PopTo => "POP",
            Opcode::Discard => "DISCARD",
            Opcode::StackAlloc => "STACK_ALLOC",
            Opcode::Move => "MOV",
            Opcode::MoveZeroExtend => "MOVZX",
            Opcode::MoveSignExtend => "MOVSX",
            Opcode::MathAdd => "ADD",
            Opcode::MathSub => "SUB",
            Opcode::MathMult => "MUL",
            Opcode::MathDiv => "DIV",
            Opcode::MathMod => "MOD",
            Opcode::UMathDiv => "UDIV",
            Opcode::UMathMod => "UMOD",
            Opcode::MathNeg => "NEG",
            Opcode::FMathAdd => "FADD",
            Opcode::FMathSub => "FSUB",
            Opcode::FMathMult => "FMUL",
            Opcode::FMathDiv => "FDIV",
            Opcode::FMathMod => "FMOD",
            Opcode::FMathNeg => "FNEG",
            Opcode::BitsAnd => "AND",
            Opcode::BitsOr => "OR",
            Opcode::BitsXor => "XOR",
            Opcode::BitsNot => "NOT",
            Opcode::BitsShiftLeft => "SHL",
            Opcode::BitsShiftRight => "SAR",
            Opcode::UBitsShiftRight => "SHR",
            Opcode::LogicAnd => "LAND",
            Opcode::LogicOr => "LOR",
            Opcode::LogicNot => "LNOT",
            Opcode::CompareEq => "CMP_EQ",
            Opcode::CompareNe => "CMP_NE",
            Opcode::CompareLt => "CMP_LT",
            Opcode::CompareLe => "CMP_LE",
            Opcode::CompareGt => "CMP_GT",
            Opcode::CompareGe => "CMP_GE",
            Opcode::UCompareLt => "UCMP_LT",
            Opcode::UCompareLe => "UCMP_LE",
            Opcode::UCompareGt => "UCMP_GT",
            Opcode::UCompareGe => "UCMP_GE",
            Opcode::FCompareEq => "FCMP_EQ",
            Opcode::FCompareNe => "FCMP_NE",
            Opcode::FCompareLt => "FCMP_LT",
            Opcode::FCompareLe => "FCMP_LE",
            Opcode::FCompareGt => "FCMP_GT",
            Opcode::FCompareGe => "FCMP_GE",
            Opcode::IntToFloat => "ITOF",
            Opcode::UIntToFloat => "UITOF",
            Opcode::FloatToInt => "FTOI",
            Opcode::FloatToUInt => "FTOUI",
            Opcode::Jump => "JUMP",
            Opcode::JumpIfZero => "JUMP_ZERO",
            Opcode::JumpIfNotZero => "JUMP_NZERO",
            Opcode::Call => "CALL",
            Opcode::Return => "RETURN",
            Opcode::CallExternal => "CALL_EXT",
            Opcode::HeapAlloc => "HEAP_ALLOC",
            Opcode::HeapFree => "HEAP_FREE",
            Opcode::BoundsCheck => "BOUNDS",
        }
    }

    /// How many operands the opcode requires.
    pub fn arity(self) -> usize {
        match self {
            Opcode::Nop => 0,
            Opcode::Exit
            | Opcode::Crash
            | Opcode::Push
            | Opcode::PopTo
            | Opcode::Discard
            | Opcode::StackAlloc
            | Opcode::MathNeg
            | Opcode::FMathNeg
            | Opcode::BitsNot
            | Opcode::LogicNot
            | Opcode::Jump
            | Opcode::Call
            | Opcode::Return
            | Opcode::CallExternal
            | Opcode::HeapFree => 1,
            _ => 2,
        }
    }

    /// True if the opcode writes its first operand.
    pub fn writes_first(self) -> bool {
        !matches!(
            self,
            Opcode::Nop
                | Opcode::Exit
                | Opcode::Crash
                | Opcode::Push
                | Opcode::Discard
                | Opcode::StackAlloc
                | Opcode::Jump
                | Opcode::JumpIfZero
                | Opcode::JumpIfNotZero
                | Opcode::Call
                | Opcode::Return
                | Opcode::CallExternal
                | Opcode::HeapFree
                | Opcode::BoundsCheck
        )
    }

    /// Binary opcodes whose operands must share one width.
    pub fn requires_equal_widths(self) -> bool {
        self.arity() == 2
            && !matches!(
                self,
                Opcode::MoveZeroExtend
                    | Opcode::MoveSignExtend
                    | Opcode::IntToFloat
                    | Opcode::UIntToFloat
                    | Opcode::FloatToInt
                    | Opcode::FloatToUInt
                    | Opcode::JumpIfZero
                    | Opcode::JumpIfNotZero
                    | Opcode::HeapAlloc
                    | Opcode::BoundsCheck
            )
    }

    /// Relative jump offset operand, if the opcode has one.
    pub fn offset_operand(self) -> Option<usize> {
        match self {
            Opcode::Jump | Opcode::Call => Some(0),
            Opcode::JumpIfZero | Opcode::JumpIfNotZero => Some(1),
            _ => None,
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// INSTRUCTION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand1: Option<InstructionOperand>,
    pub operand2: Option<InstructionOperand>,
}

impl Instruction {
    pub fn nullary(opcode: Opcode) -> Self {
        Self {
            opcode,
            operand1: None,
            operand2: None,
        }
    }

    pub fn unary(opcode: Opcode, operand: InstructionOperand) -> Self {
        Self {
            opcode,
            operand1: Some(operand),
            operand2: None,
        }
    }

    pub fn binary(opcode: Opcode, first: InstructionOperand, second: InstructionOperand) -> Self {
        Self {
            opcode,
            operand1: Some(first),
            operand2: Some(second),
        }
    }

    pub fn jump(offset: i32) -> Self {
        Self::unary(Opcode::Jump, InstructionOperand::offset(offset))
    }

    pub fn call(offset: i32) -> Self {
        Self::unary(Opcode::Call, InstructionOperand::offset(offset))
    }

    /// The relative offset of a jump or immediate call.
    pub fn relative_offset(&self) -> Option<i32> {
        let index = self.opcode.offset_operand()?;
        let operand = if index == 0 { self.operand1 } else { self.operand2 };
        operand?.as_offset()
    }

    /// Rewrites the relative offset of a jump or immediate call.
    pub fn set_relative_offset(&mut self, offset: i32) -> bool {
        let slot = match self.opcode.offset_operand() {
            Some(0) => &mut self.operand1,
            Some(_) => &mut self.operand2,
            None => return false,
        };
        match slot {
            Some(operand) if operand.is_immediate() => {
                *operand = InstructionOperand::offset(offset);
                true
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.opcode)?;
        if let Some(first) = &self.operand1 {
            write!(f, " {}", first)?;
        }
        if let Some(second) = &self.operand2 {
            write!(f, ", {}", second)?;
        }
        Ok(())
    }
}
