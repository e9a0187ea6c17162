use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::bytecode::{
    AddressOperand, BytecodeProgram, Instruction, InstructionOperand, Opcode, Register,
};
use crate::numeric::{self, Comparison, FloatOp, IntegerOp};
use crate::types::BitWidth;

use super::external::{ExternalError, ExternalFunction, ExternalFunctions, PendingCall};
use super::memory::{Heap, HeapSnapshot, Memory};
use super::runtime_error::{RuntimeError, RuntimeErrorKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorSettings {
    /// Instructions to execute before faulting; `None` runs forever.
    pub max_steps: Option<u64>,
    pub max_call_depth: usize,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        ProcessorSettings {
            max_steps: None,
            max_call_depth: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// An asynchronous external has not completed yet; tick again later.
    Waiting,
    Exited(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramResult {
    pub exit_code: i32,
    pub heap: HeapSnapshot,
    pub steps: u64,
}

enum Flow {
    Next,
    Jump(u32),
    Exit(i32),
    Wait,
}

enum State {
    Running,
    Exited(i32),
    Faulted(RuntimeError),
}

struct PendingExternal {
    name: String,
    parameters_size: u32,
    return_size: u32,
    call: Box<dyn PendingCall>,
}

/// Executes a [`BytecodeProgram`] one instruction per [`tick`](Self::tick).
pub struct Processor {
    program: BytecodeProgram,
    externals: ExternalFunctions,
    settings: ProcessorSettings,
    memory: Memory,
    heap: Heap,
    registers: [u64; 4],
    sp: u32,
    bp: u32,
    ip: u32,
    steps: u64,
    call_depth: usize,
    pending: Option<PendingExternal>,
    state: State,
}

impl Processor {
    pub fn new(program: BytecodeProgram, externals: ExternalFunctions, settings: ProcessorSettings) -> Self {
        let layout = program.layout;
        let mut memory = Memory::new(&layout);
        let heap = Heap::new(&layout, &mut memory);
        let top = layout.stack_top();
        Self {
            program,
            externals,
            settings,
            memory,
            heap,
            registers: [0; 4],
            sp: top,
            bp: top,
            ip: 0,
            steps: 0,
            call_depth: 0,
            pending: None,
            state: State::Running,
        }
    }

    pub fn program(&self) -> &BytecodeProgram {
        &self.program
    }

    pub fn register(&self, register: Register) -> u64 {
        match register {
            Register::A => self.registers[0],
            Register::B => self.registers[1],
            Register::C => self.registers[2],
            Register::D => self.registers[3],
            Register::SP => self.sp as u64,
            Register::BP => self.bp as u64,
            Register::CP => self.ip as u64,
        }
    }

    pub fn stack_pointer(&self) -> u32 {
        self.sp
    }

    pub fn instruction_pointer(&self) -> u32 {
        self.ip
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn read_memory(&self, address: u32, width: BitWidth) -> Result<u64, RuntimeErrorKind> {
        self.memory.read(address as u64, width)
    }

    /// Current value of a scalar global, by name.
    pub fn read_global(&self, name: &str) -> Option<u64> {
        let global = self.program.debug.global(name)?;
        let width = BitWidth::from_size(global.size)?;
        self.memory.read(global.address as u64, width).ok()
    }

    pub fn heap_snapshot(&self) -> HeapSnapshot {
        self.heap.snapshot(&self.memory)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.state {
            State::Exited(code) => Some(code),
            _ => None,
        }
    }

    /// Runs until the program exits or faults, polling pending externals
    /// in between.
    pub fn run(&mut self) -> Result<ProgramResult, RuntimeError> {
        loop {
            match self.tick()? {
                TickOutcome::Continue => {}
                TickOutcome::Waiting => std::thread::yield_now(),
                TickOutcome::Exited(exit_code) => {
                    return Ok(ProgramResult {
                        exit_code,
                        heap: self.heap_snapshot(),
                        steps: self.steps,
                    });
                }
            }
        }
    }

    /// Executes one instruction, or polls the pending external call.
    pub fn tick(&mut self) -> Result<TickOutcome, RuntimeError> {
        match &self.state {
            State::Exited(code) => return Ok(TickOutcome::Exited(*code)),
            State::Faulted(err) => return Err(err.clone()),
            State::Running => {}
        }

        let result = if self.pending.is_some() {
            self.poll_pending()
        } else {
            self.step()
        };

        match result {
            Ok(Flow::Next) => {
                self.ip += 1;
                Ok(TickOutcome::Continue)
            }
            Ok(Flow::Jump(target)) => {
                self.ip = target;
                Ok(TickOutcome::Continue)
            }
            Ok(Flow::Wait) => Ok(TickOutcome::Waiting),
            Ok(Flow::Exit(code)) => {
                debug!(code, steps = self.steps, "program exited");
                self.state = State::Exited(code);
                Ok(TickOutcome::Exited(code))
            }
            Err(kind) => {
                let err = RuntimeError::new(kind, self.ip).with_call_trace(self.call_trace());
                debug!(ip = self.ip, error = %err.kind, "processor fault");
                self.state = State::Faulted(err.clone());
                Err(err)
            }
        }
    }

    /// The faulting ip followed by each live return address, walked
    /// through the saved base pointers.
    fn call_trace(&self) -> Vec<u32> {
        let top = self.program.layout.stack_top();
        let mut trace = vec![self.ip];
        let mut bp = self.bp;
        while bp < top && trace.len() <= self.call_depth {
            let (Ok(saved), Ok(ret)) = (
                self.memory.read(bp as u64, BitWidth::W32),
                self.memory.read(bp as u64 + 4, BitWidth::W32),
            ) else {
                break;
            };
            trace.push(ret as u32);
            if saved as u32 <= bp {
                break;
            }
            bp = saved as u32;
        }
        trace
    }

    fn check_limits(&mut self) -> Result<(), RuntimeErrorKind> {
        self.steps += 1;
        if let Some(max) = self.settings.max_steps {
            if self.steps > max {
                return Err(RuntimeErrorKind::StepLimitExceeded(max));
            }
        }
        Ok(())
    }

    fn step(&mut self) -> Result<Flow, RuntimeErrorKind> {
        self.check_limits()?;
        let instruction = *self
            .program
            .instructions
            .get(self.ip as usize)
            .ok_or(RuntimeErrorKind::CodeOutOfBounds(self.ip))?;
        trace!(ip = self.ip, %instruction, "execute");
        self.execute(&instruction)
    }

    // =========================================================================
    // Operands
    // =========================================================================

    fn first(instruction: &Instruction) -> Result<InstructionOperand, RuntimeErrorKind> {
        instruction.operand1.ok_or_else(|| {
            RuntimeErrorKind::InvalidInstruction(format!("{} is missing operand 1", instruction.opcode))
        })
    }

    fn second(instruction: &Instruction) -> Result<InstructionOperand, RuntimeErrorKind> {
        instruction.operand2.ok_or_else(|| {
            RuntimeErrorKind::InvalidInstruction(format!("{} is missing operand 2", instruction.opcode))
        })
    }

    fn address(&self, address: AddressOperand) -> Result<u64, RuntimeErrorKind> {
        match address {
            AddressOperand::Absolute(address) => Ok(address as u64),
            AddressOperand::Relative { base, offset } => {
                let base = self.register(base) as i64;
                let address = base + offset as i64;
                if address < 0 {
                    return Err(RuntimeErrorKind::MemoryOutOfBounds {
                        address: address as u64,
                        size: 0,
                    });
                }
                Ok(address as u64)
            }
        }
    }

    fn read(&self, operand: InstructionOperand) -> Result<u64, RuntimeErrorKind> {
        match operand {
            InstructionOperand::Immediate { value, width } => Ok(width.truncate(value)),
            InstructionOperand::Register { register, width } => Ok(width.truncate(self.register(register))),
            InstructionOperand::Memory { address, width } => self.memory.read(self.address(address)?, width),
        }
    }

    /// Register writes zero-extend to the full register.
    fn write(&mut self, operand: InstructionOperand, value: u64) -> Result<(), RuntimeErrorKind> {
        match operand {
            InstructionOperand::Immediate { .. } => Err(RuntimeErrorKind::InvalidInstruction(
                "cannot write to an immediate".to_string(),
            )),
            InstructionOperand::Register { register, width } => {
                let value = width.truncate(value);
                match register {
                    Register::A => self.registers[0] = value,
                    Register::B => self.registers[1] = value,
                    Register::C => self.registers[2] = value,
                    Register::D => self.registers[3] = value,
                    Register::SP => self.sp = value as u32,
                    Register::BP => self.bp = value as u32,
                    Register::CP => {
                        return Err(RuntimeErrorKind::InvalidInstruction(
                            "cp is read-only".to_string(),
                        ));
                    }
                }
                Ok(())
            }
            InstructionOperand::Memory { address, width } => {
                let address = self.address(address)?;
                self.memory.write(address, width, value)
            }
        }
    }

    // =========================================================================
    // Stack
    // =========================================================================

    fn stack_bottom(&self) -> u32 {
        self.program.layout.heap_size
    }

    fn reserve(&mut self, size: u32) -> Result<u32, RuntimeErrorKind> {
        let sp = self
            .sp
            .checked_sub(size)
            .filter(|&sp| sp >= self.stack_bottom())
            .ok_or(RuntimeErrorKind::StackOverflow)?;
        self.sp = sp;
        Ok(sp)
    }

    fn release(&mut self, size: u32) -> Result<(), RuntimeErrorKind> {
        let sp = self
            .sp
            .checked_add(size)
            .filter(|&sp| sp <= self.program.layout.stack_top())
            .ok_or(RuntimeErrorKind::StackUnderflow)?;
        self.sp = sp;
        Ok(())
    }

    fn push(&mut self, value: u64, width: BitWidth) -> Result<(), RuntimeErrorKind> {
        let sp = self.reserve(width.bytes())?;
        self.memory.write(sp as u64, width, value)
    }

    fn pop(&mut self, width: BitWidth) -> Result<u64, RuntimeErrorKind> {
        let value = self.memory.read(self.sp as u64, width)?;
        self.release(width.bytes())?;
        Ok(value)
    }

    fn relative_target(&self, offset: i32) -> Result<u32, RuntimeErrorKind> {
        let target = self.ip as i64 + offset as i64;
        if target < 0 || target > self.program.instructions.len() as i64 {
            return Err(RuntimeErrorKind::CodeOutOfBounds(target.clamp(0, u32::MAX as i64) as u32));
        }
        Ok(target as u32)
    }

    fn offset(operand: InstructionOperand) -> Result<i32, RuntimeErrorKind> {
        operand
            .as_offset()
            .ok_or_else(|| RuntimeErrorKind::InvalidInstruction(format!("{} is not a jump offset", operand)))
    }

    // =========================================================================
    // Execution
    // =========================================================================

    fn execute(&mut self, instruction: &Instruction) -> Result<Flow, RuntimeErrorKind> {
        use Opcode::*;

        match instruction.opcode {
            Nop => {}
            Exit => {
                let op = Self::first(instruction)?;
                let code = op.width().sign_extend(self.read(op)?);
                return Ok(Flow::Exit(code as i32));
            }
            Crash => {
                let op = Self::first(instruction)?;
                let payload = op.width().sign_extend(self.read(op)?);
                return Err(RuntimeErrorKind::UserCrash(payload));
            }

            Push => {
                let op = Self::first(instruction)?;
                let value = self.read(op)?;
                self.push(value, op.width())?;
            }
            PopTo => {
                let op = Self::first(instruction)?;
                let value = self.pop(op.width())?;
                self.write(op, value)?;
            }
            Discard => {
                let size = self.read(Self::first(instruction)?)?;
                self.release(size as u32)?;
            }
            StackAlloc => {
                let size = self.read(Self::first(instruction)?)? as u32;
                let sp = self.reserve(size)?;
                self.memory.fill_zero(sp as u64, size)?;
            }

            Move => {
                let (dst, src) = (Self::first(instruction)?, Self::second(instruction)?);
                let value = self.read(src)?;
                self.write(dst, value)?;
            }
            MoveZeroExtend | MoveSignExtend => {
                let (dst, src) = (Self::first(instruction)?, Self::second(instruction)?);
                let raw = self.read(src)?;
                let value = if instruction.opcode == MoveSignExtend {
                    src.width().sign_extend(raw) as u64
                } else {
                    raw
                };
                self.write(dst, dst.width().truncate(value))?;
            }

            MathAdd | MathSub | MathMult | MathDiv | MathMod | UMathDiv | UMathMod | BitsAnd
            | BitsOr | BitsXor | BitsShiftLeft | BitsShiftRight | UBitsShiftRight => {
                let (op, signed) = integer_op(instruction.opcode);
                let (dst, src) = (Self::first(instruction)?, Self::second(instruction)?);
                let (a, b) = (self.read(dst)?, self.read(src)?);
                let value = numeric::integer(op, a, b, dst.width(), signed)
                    .map_err(|_| RuntimeErrorKind::DivisionByZero)?;
                self.write(dst, value)?;
            }
            MathNeg => {
                let dst = Self::first(instruction)?;
                let value = numeric::negate(self.read(dst)?, dst.width());
                self.write(dst, value)?;
            }
            BitsNot => {
                let dst = Self::first(instruction)?;
                let value = dst.width().truncate(!self.read(dst)?);
                self.write(dst, value)?;
            }

            FMathAdd | FMathSub | FMathMult | FMathDiv | FMathMod => {
                let op = match instruction.opcode {
                    FMathAdd => FloatOp::Add,
                    FMathSub => FloatOp::Sub,
                    FMathMult => FloatOp::Mul,
                    FMathDiv => FloatOp::Div,
                    _ => FloatOp::Mod,
                };
                let (dst, src) = (Self::first(instruction)?, Self::second(instruction)?);
                let (a, b) = (as_float(self.read(dst)?), as_float(self.read(src)?));
                self.write(dst, numeric::float(op, a, b).to_bits() as u64)?;
            }
            FMathNeg => {
                let dst = Self::first(instruction)?;
                let value = -as_float(self.read(dst)?);
                self.write(dst, value.to_bits() as u64)?;
            }

            LogicAnd | LogicOr => {
                let (dst, src) = (Self::first(instruction)?, Self::second(instruction)?);
                let (a, b) = (self.read(dst)? != 0, self.read(src)? != 0);
                let value = if instruction.opcode == LogicAnd { a && b } else { a || b };
                self.write(dst, value as u64)?;
            }
            LogicNot => {
                let dst = Self::first(instruction)?;
                let value = self.read(dst)? == 0;
                self.write(dst, value as u64)?;
            }

            CompareEq | CompareNe | CompareLt | CompareLe | CompareGt | CompareGe | UCompareLt
            | UCompareLe | UCompareGt | UCompareGe => {
                let (cmp, signed) = integer_comparison(instruction.opcode);
                let (dst, src) = (Self::first(instruction)?, Self::second(instruction)?);
                let (a, b) = (self.read(dst)?, self.read(src)?);
                let value = numeric::compare_integer(cmp, a, b, dst.width(), signed);
                self.write(dst, value as u64)?;
            }
            FCompareEq | FCompareNe | FCompareLt | FCompareLe | FCompareGt | FCompareGe => {
                let cmp = match instruction.opcode {
                    FCompareEq => Comparison::Eq,
                    FCompareNe => Comparison::Ne,
                    FCompareLt => Comparison::Lt,
                    FCompareLe => Comparison::Le,
                    FCompareGt => Comparison::Gt,
                    _ => Comparison::Ge,
                };
                let (dst, src) = (Self::first(instruction)?, Self::second(instruction)?);
                let (a, b) = (as_float(self.read(dst)?), as_float(self.read(src)?));
                self.write(dst, numeric::compare_float(cmp, a, b) as u64)?;
            }

            IntToFloat | UIntToFloat => {
                let (dst, src) = (Self::first(instruction)?, Self::second(instruction)?);
                let value = numeric::int_to_float(self.read(src)?, src.width(), instruction.opcode == IntToFloat);
                self.write(dst, value.to_bits() as u64)?;
            }
            FloatToInt | FloatToUInt => {
                let (dst, src) = (Self::first(instruction)?, Self::second(instruction)?);
                let value = as_float(self.read(src)?);
                let raw = numeric::float_to_int(value, dst.width(), instruction.opcode == FloatToInt);
                self.write(dst, raw)?;
            }

            Jump => {
                let offset = Self::offset(Self::first(instruction)?)?;
                return Ok(Flow::Jump(self.relative_target(offset)?));
            }
            JumpIfZero | JumpIfNotZero => {
                let condition = self.read(Self::first(instruction)?)?;
                let offset = Self::offset(Self::second(instruction)?)?;
                if (condition == 0) == (instruction.opcode == JumpIfZero) {
                    return Ok(Flow::Jump(self.relative_target(offset)?));
                }
            }
            Call => {
                let target = Self::first(instruction)?;
                let target = if target.is_immediate() {
                    self.relative_target(Self::offset(target)?)?
                } else {
                    self.read(target)? as u32
                };
                if self.call_depth >= self.settings.max_call_depth {
                    return Err(RuntimeErrorKind::CallDepthExceeded(self.settings.max_call_depth));
                }
                self.push(self.ip as u64 + 1, BitWidth::W32)?;
                self.push(self.bp as u64, BitWidth::W32)?;
                self.bp = self.sp;
                self.call_depth += 1;
                return Ok(Flow::Jump(target));
            }
            Return => {
                let parameters = self.read(Self::first(instruction)?)? as u32;
                self.sp = self.bp;
                self.bp = self.pop(BitWidth::W32)? as u32;
                let return_address = self.pop(BitWidth::W32)? as u32;
                self.release(parameters)?;
                self.call_depth = self.call_depth.saturating_sub(1);
                return Ok(Flow::Jump(return_address));
            }
            CallExternal => {
                let id = self.read(Self::first(instruction)?)? as u32;
                return self.call_external(id);
            }

            HeapAlloc => {
                let (dst, size) = (Self::first(instruction)?, Self::second(instruction)?);
                let size = self.read(size)? as u32;
                let address = self.heap.allocate(&mut self.memory, size)?;
                self.write(dst, address as u64)?;
            }
            HeapFree => {
                let address = self.read(Self::first(instruction)?)? as u32;
                self.heap.free(&mut self.memory, address)?;
            }

            BoundsCheck => {
                let (index, length) = (Self::first(instruction)?, Self::second(instruction)?);
                let index = index.width().sign_extend(self.read(index)?);
                let length = self.read(length)?;
                if index < 0 || index as u64 >= length {
                    return Err(RuntimeErrorKind::IndexOutOfRange { index, length });
                }
            }
        }
        Ok(Flow::Next)
    }

    // =========================================================================
    // External calls
    // =========================================================================

    /// Parameters sit at `[sp, sp + parameters_size)` with the return slot
    /// directly above. On completion the parameters are dropped.
    fn call_external(&mut self, id: u32) -> Result<Flow, RuntimeErrorKind> {
        let expected = self
            .program
            .external(id)
            .cloned()
            .ok_or(RuntimeErrorKind::UnknownExternalFunction(id))?;
        let registered = self
            .externals
            .get_mut(id)
            .ok_or(RuntimeErrorKind::UnknownExternalFunction(id))?;
        let info = &registered.info;
        if info.parameters_size != expected.parameters_size || info.return_size != expected.return_size {
            return Err(RuntimeErrorKind::External {
                name: expected.name,
                source: ExternalError::Signature {
                    registered: info.parameters_size,
                    registered_return: info.return_size,
                    expected: expected.parameters_size,
                    expected_return: expected.return_size,
                },
            });
        }

        let args = self
            .memory
            .read_bytes(self.sp as u64, expected.parameters_size)?
            .to_vec();
        let fail = |source| RuntimeErrorKind::External {
            name: expected.name.clone(),
            source,
        };

        match &mut registered.function {
            ExternalFunction::Sync(function) => {
                let mut ret = vec![0u8; expected.return_size as usize];
                function(&args, &mut ret).map_err(fail)?;
                self.finish_external(expected.parameters_size, &ret)?;
                Ok(Flow::Next)
            }
            ExternalFunction::Async(begin) => {
                let call = begin(&args).map_err(fail)?;
                trace!(name = %expected.name, "external call pending");
                self.pending = Some(PendingExternal {
                    name: expected.name.clone(),
                    parameters_size: expected.parameters_size,
                    return_size: expected.return_size,
                    call,
                });
                Ok(Flow::Wait)
            }
        }
    }

    fn poll_pending(&mut self) -> Result<Flow, RuntimeErrorKind> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(Flow::Wait);
        };
        let polled = pending.call.poll().map_err(|source| RuntimeErrorKind::External {
            name: pending.name.clone(),
            source,
        })?;
        let Some(ret) = polled else {
            return Ok(Flow::Wait);
        };
        if ret.len() != pending.return_size as usize {
            return Err(RuntimeErrorKind::External {
                name: pending.name.clone(),
                source: ExternalError::ReturnSize {
                    expected: pending.return_size,
                    got: ret.len(),
                },
            });
        }
        let parameters_size = pending.parameters_size;
        self.pending = None;
        self.finish_external(parameters_size, &ret)?;
        Ok(Flow::Next)
    }

    fn finish_external(&mut self, parameters_size: u32, ret: &[u8]) -> Result<(), RuntimeErrorKind> {
        self.memory
            .write_bytes(self.sp as u64 + parameters_size as u64, ret)?;
        self.release(parameters_size)
    }
}

fn as_float(raw: u64) -> f32 {
    f32::from_bits(raw as u32)
}

fn integer_op(opcode: Opcode) -> (IntegerOp, bool) {
    match opcode {
        Opcode::MathAdd => (IntegerOp::Add, true),
        Opcode::MathSub => (IntegerOp::Sub, true),
        Opcode::MathMult => (IntegerOp::Mul, true),
        Opcode::MathDiv => (IntegerOp::Div, true),
        Opcode::MathMod => (IntegerOp::Mod, true),
        Opcode::UMathDiv => (IntegerOp::Div, false),
        Opcode::UMathMod => (IntegerOp::Mod, false),
        Opcode::BitsAnd => (IntegerOp::And, false),
        Opcode::BitsOr => (IntegerOp::Or, false),
        Opcode::BitsXor => (IntegerOp::Xor, false),
        Opcode::BitsShiftLeft => (IntegerOp::ShiftLeft, false),
        Opcode::BitsShiftRight => (IntegerOp::ShiftRight, true),
        _ => (IntegerOp::ShiftRight, false),
    }
}

fn integer_comparison(opcode: Opcode) -> (Comparison, bool) {
    match opcode {
        Opcode::CompareEq => (Comparison::Eq, false),
        Opcode::CompareNe => (Comparison::Ne, false),
        Opcode::CompareLt => (Comparison::Lt, true),
        Opcode::CompareLe => (Comparison::Le, true),
        Opcode::CompareGt => (Comparison::Gt, true),
        Opcode::CompareGe => (Comparison::Ge, true),
        Opcode::UCompareLt => (Comparison::Lt, false),
        Opcode::UCompareLe => (Comparison::Le, false),
        Opcode::UCompareGt => (Comparison::Gt, false),
        _ => (Comparison::Ge, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{ExternalFunctionInfo, MemoryLayout};
    use std::cell::RefCell;
    use std::rc::Rc;

    use BitWidth::*;
    use Register::{A, B, BP, C, SP};

    // ============================================================
    // Test Helpers
    // ============================================================

    fn imm(value: i64, width: BitWidth) -> InstructionOperand {
        InstructionOperand::immediate(value as u64, width)
    }

    fn reg(register: Register, width: BitWidth) -> InstructionOperand {
        InstructionOperand::register(register, width)
    }

    fn mem(base: Register, offset: i32, width: BitWidth) -> InstructionOperand {
        InstructionOperand::memory(AddressOperand::relative(base, offset), width)
    }

    fn op1(opcode: Opcode, a: InstructionOperand) -> Instruction {
        Instruction::unary(opcode, a)
    }

    fn op2(opcode: Opcode, a: InstructionOperand, b: InstructionOperand) -> Instruction {
        Instruction::binary(opcode, a, b)
    }

    fn exit_a() -> Instruction {
        op1(Opcode::Exit, reg(A, W32))
    }

    /// Create a program with a small memory from a list of instructions
    fn program_from_ops(ops: Vec<Instruction>) -> BytecodeProgram {
        BytecodeProgram {
            instructions: ops,
            layout: MemoryLayout {
                heap_size: 256,
                stack_size: 256,
                pointer_size: 4,
            },
            ..Default::default()
        }
    }

    fn run_ops_with(
        ops: Vec<Instruction>,
        externals: ExternalFunctions,
        settings: ProcessorSettings,
    ) -> Result<Processor, RuntimeError> {
        let mut processor = Processor::new(program_from_ops(ops), externals, settings);
        processor.run()?;
        Ok(processor)
    }

    /// Run instructions and return the processor after it exits
    fn run_ops(ops: Vec<Instruction>) -> Result<Processor, RuntimeError> {
        run_ops_with(ops, ExternalFunctions::new(), ProcessorSettings::default())
    }

    fn assert_exit(ops: Vec<Instruction>, expected: i32) {
        let processor = run_ops(ops).expect("execution should succeed");
        assert_eq!(processor.exit_code(), Some(expected), "exit code mismatch");
    }

    /// Assert execution produces an error containing the given substring
    fn assert_error(ops: Vec<Instruction>, error_contains: &str) {
        match run_ops(ops) {
            Ok(processor) => panic!(
                "expected error containing '{}', got exit code {:?}",
                error_contains,
                processor.exit_code()
            ),
            Err(e) => assert!(
                e.to_string().contains(error_contains),
                "expected error containing '{}', got: {}",
                error_contains,
                e
            ),
        }
    }

    // ============================================================
    // Moves & arithmetic
    // ============================================================

    #[test]
    fn test_exit_code() {
        assert_exit(vec![op1(Opcode::Exit, imm(-3, W32))], -3);
    }

    #[test]
    fn test_add_wraps_at_width() {
        assert_exit(
            vec![
                op2(Opcode::Move, reg(A, W8), imm(250, W8)),
                op2(Opcode::MathAdd, reg(A, W8), imm(10, W8)),
                exit_a(),
            ],
            4,
        );
    }

    #[test]
    fn test_register_write_zero_extends() {
        let processor = run_ops(vec![
            op2(Opcode::Move, reg(A, W64), imm(-1, W64)),
            op2(Opcode::Move, reg(A, W16), imm(7, W16)),
            exit_a(),
        ])
        .unwrap();
        assert_eq!(processor.register(A), 7);
    }

    #[test]
    fn test_signed_and_unsigned_division() {
        assert_exit(
            vec![
                op2(Opcode::Move, reg(A, W32), imm(-7, W32)),
                op2(Opcode::MathDiv, reg(A, W32), imm(2, W32)),
                exit_a(),
            ],
            -3,
        );
        let processor = run_ops(vec![
            op2(Opcode::Move, reg(A, W8), imm(-2, W8)),
            op2(Opcode::UMathDiv, reg(A, W8), imm(2, W8)),
            exit_a(),
        ])
        .unwrap();
        assert_eq!(processor.register(A), 127);
    }

    #[test]
    fn test_div_by_zero() {
        assert_error(
            vec![
                op2(Opcode::Move, reg(A, W32), imm(1, W32)),
                op2(Opcode::MathMod, reg(A, W32), reg(B, W32)),
                exit_a(),
            ],
            "division by zero",
        );
    }

    #[test]
    fn test_float_division_by_zero_is_infinite() {
        let processor = run_ops(vec![
            op2(Opcode::Move, reg(A, W32), imm(1.0f32.to_bits() as i64, W32)),
            op2(Opcode::FMathDiv, reg(A, W32), imm(0, W32)),
            op1(Opcode::Exit, imm(0, W32)),
        ])
        .unwrap();
        assert_eq!(as_float(processor.register(A)), f32::INFINITY);
    }

    #[test]
    fn test_sign_and_zero_extension() {
        let processor = run_ops(vec![
            op2(Opcode::Move, reg(B, W8), imm(-1, W8)),
            op2(Opcode::MoveSignExtend, reg(A, W32), reg(B, W8)),
            op2(Opcode::MoveZeroExtend, reg(C, W32), reg(B, W8)),
            op1(Opcode::Exit, imm(0, W32)),
        ])
        .unwrap();
        assert_eq!(processor.register(A), 0xFFFF_FFFF);
        assert_eq!(processor.register(C), 0xFF);
    }

    #[test]
    fn test_comparisons_write_booleans() {
        let processor = run_ops(vec![
            op2(Opcode::Move, reg(A, W32), imm(-1, W32)),
            op2(Opcode::Move, reg(B, W32), imm(-1, W32)),
            op2(Opcode::CompareLt, reg(A, W32), imm(0, W32)),
            op2(Opcode::UCompareLt, reg(B, W32), imm(0, W32)),
            op1(Opcode::Exit, imm(0, W32)),
        ])
        .unwrap();
        assert_eq!(processor.register(A), 1);
        assert_eq!(processor.register(B), 0);
    }

    #[test]
    fn test_float_to_int_saturates() {
        let processor = run_ops(vec![
            op2(Opcode::Move, reg(B, W32), imm(1e10f32.to_bits() as i64, W32)),
            op2(Opcode::FloatToInt, reg(A, W16), reg(B, W32)),
            op1(Opcode::Exit, imm(0, W32)),
        ])
        .unwrap();
        assert_eq!(processor.register(A), i16::MAX as u64);
    }

    #[test]
    fn test_logic_not() {
        let processor = run_ops(vec![
            op2(Opcode::Move, reg(A, W32), imm(5, W32)),
            op1(Opcode::LogicNot, reg(A, W32)),
            op1(Opcode::LogicNot, reg(B, W32)),
            op1(Opcode::Exit, imm(0, W32)),
        ])
        .unwrap();
        assert_eq!(processor.register(A), 0);
        assert_eq!(processor.register(B), 1);
    }

    // ============================================================
    // Stack & control flow
    // ============================================================

    #[test]
    fn test_push_pop() {
        let processor = run_ops(vec![
            op1(Opcode::Push, imm(0x1234, W16)),
            op1(Opcode::Push, imm(9, W32)),
            op1(Opcode::PopTo, reg(A, W32)),
            op1(Opcode::PopTo, reg(B, W16)),
            op1(Opcode::Exit, imm(0, W32)),
        ])
        .unwrap();
        assert_eq!(processor.register(A), 9);
        assert_eq!(processor.register(B), 0x1234);
        assert_eq!(processor.stack_pointer(), 512);
    }

    #[test]
    fn test_stack_alloc_is_zeroed() {
        assert_exit(
            vec![
                op1(Opcode::Push, imm(-1, W32)),
                op1(Opcode::Discard, imm(4, W32)),
                op1(Opcode::StackAlloc, imm(4, W32)),
                op2(Opcode::Move, reg(A, W32), mem(SP, 0, W32)),
                exit_a(),
            ],
            0,
        );
    }

    #[test]
    fn test_stack_overflow() {
        assert_error(vec![op1(Opcode::StackAlloc, imm(1024, W32))], "stack overflow");
    }

    #[test]
    fn test_stack_underflow() {
        assert_error(vec![op1(Opcode::PopTo, reg(A, W32))], "out of bounds");
        assert_error(vec![op1(Opcode::Discard, imm(4, W32))], "stack underflow");
    }

    #[test]
    fn test_countdown_loop() {
        // a = 5; b = 0; while a != 0 { b += a; a -= 1 }
        assert_exit(
            vec![
                op2(Opcode::Move, reg(A, W32), imm(5, W32)),
                op2(Opcode::JumpIfZero, reg(A, W32), InstructionOperand::offset(4)),
                op2(Opcode::MathAdd, reg(B, W32), reg(A, W32)),
                op2(Opcode::MathSub, reg(A, W32), imm(1, W32)),
                Instruction::jump(-3),
                op1(Opcode::Exit, reg(B, W32)),
            ],
            15,
        );
    }

    #[test]
    fn test_call_and_return() {
        // main: reserve 4, push 20, push 22, call add, pop result
        // add: [bp + 8] = b, [bp + 12] = a, [bp + 16] = return slot
        let processor = run_ops(vec![
            op1(Opcode::StackAlloc, imm(4, W32)),
            op1(Opcode::Push, imm(20, W32)),
            op1(Opcode::Push, imm(22, W32)),
            Instruction::call(3),
            op1(Opcode::PopTo, reg(A, W32)),
            exit_a(),
            op2(Opcode::Move, reg(A, W32), mem(BP, 12, W32)),
            op2(Opcode::MathAdd, reg(A, W32), mem(BP, 8, W32)),
            op2(Opcode::Move, mem(BP, 16, W32), reg(A, W32)),
            op1(Opcode::Return, imm(8, W32)),
        ])
        .unwrap();
        assert_eq!(processor.exit_code(), Some(42));
        assert_eq!(processor.stack_pointer(), 512);
    }

    #[test]
    fn test_call_through_register() {
        assert_exit(
            vec![
                op2(Opcode::Move, reg(C, W32), imm(3, W32)),
                op1(Opcode::Call, reg(C, W32)),
                exit_a(),
                op2(Opcode::Move, reg(A, W32), imm(11, W32)),
                op1(Opcode::Return, imm(0, W32)),
            ],
            11,
        );
    }

    #[test]
    fn test_call_depth_limit() {
        let settings = ProcessorSettings {
            max_call_depth: 5,
            ..Default::default()
        };
        let err = run_ops_with(
            vec![Instruction::call(0)],
            ExternalFunctions::new(),
            settings,
        )
        .err()
        .unwrap();
        assert_eq!(err.kind, RuntimeErrorKind::CallDepthExceeded(5));
        assert!(err.to_string().contains("possible infinite recursion"));
        assert_eq!(err.call_trace.len(), 6);
    }

    #[test]
    fn test_step_limit() {
        let settings = ProcessorSettings {
            max_steps: Some(100),
            ..Default::default()
        };
        let err = run_ops_with(vec![Instruction::jump(0)], ExternalFunctions::new(), settings)
            .err()
            .unwrap();
        assert_eq!(err.kind, RuntimeErrorKind::StepLimitExceeded(100));
    }

    #[test]
    fn test_running_off_the_end() {
        assert_error(vec![op0_nop()], "outside the program");
    }

    fn op0_nop() -> Instruction {
        Instruction::nullary(Opcode::Nop)
    }

    #[test]
    fn test_user_crash() {
        let err = run_ops(vec![op1(Opcode::Crash, imm(42, W32))]).err().unwrap();
        assert!(err.is_user_crash());
        assert_eq!(err.kind, RuntimeErrorKind::UserCrash(42));
    }

    #[test]
    fn test_fault_is_sticky() {
        let mut processor = Processor::new(
            program_from_ops(vec![op1(Opcode::Crash, imm(1, W32))]),
            ExternalFunctions::new(),
            ProcessorSettings::default(),
        );
        let first = processor.tick().err().unwrap();
        let second = processor.tick().err().unwrap();
        assert_eq!(first, second);
    }

    // ============================================================
    // Memory & heap
    // ============================================================

    #[test]
    fn test_null_dereference() {
        assert_error(
            vec![op2(Opcode::Move, reg(A, W32), mem(B, 0, W32)), exit_a()],
            "null pointer",
        );
    }

    #[test]
    fn test_heap_alloc_and_free() {
        let processor = run_ops(vec![
            op2(Opcode::HeapAlloc, reg(A, W32), imm(8, W32)),
            op2(Opcode::Move, mem(A, 4, W32), imm(99, W32)),
            op2(Opcode::Move, reg(B, W32), mem(A, 4, W32)),
            op1(Opcode::HeapFree, reg(A, W32)),
            op1(Opcode::Exit, reg(B, W32)),
        ])
        .unwrap();
        assert_eq!(processor.exit_code(), Some(99));
        assert!(processor.heap_snapshot().is_clean());
    }

    #[test]
    fn test_double_free() {
        assert_error(
            vec![
                op2(Opcode::HeapAlloc, reg(A, W32), imm(8, W32)),
                op1(Opcode::HeapFree, reg(A, W32)),
                op1(Opcode::HeapFree, reg(A, W32)),
                exit_a(),
            ],
            "invalid free",
        );
    }

    #[test]
    fn test_leak_is_visible_in_result() {
        let mut processor = Processor::new(
            program_from_ops(vec![
                op2(Opcode::HeapAlloc, reg(A, W32), imm(12, W32)),
                op1(Opcode::Exit, imm(0, W32)),
            ]),
            ExternalFunctions::new(),
            ProcessorSettings::default(),
        );
        let result = processor.run().unwrap();
        assert_eq!(result.heap.used_bytes(), 12);
        assert_eq!(result.steps, 2);
    }

    #[test]
    fn test_bounds_check() {
        assert_exit(
            vec![
                op2(Opcode::BoundsCheck, imm(2, W32), imm(3, W32)),
                op1(Opcode::Exit, imm(0, W32)),
            ],
            0,
        );
        assert_error(
            vec![op2(Opcode::BoundsCheck, imm(3, W32), imm(3, W32))],
            "index 3 out of range for length 3",
        );
        assert_error(
            vec![op2(Opcode::BoundsCheck, imm(-1, W32), imm(3, W32))],
            "index -1 out of range",
        );
    }

    // ============================================================
    // External calls
    // ============================================================

    fn program_with_external(ops: Vec<Instruction>, info: ExternalFunctionInfo) -> BytecodeProgram {
        let mut program = program_from_ops(ops);
        program.externals.push(info);
        program
    }

    fn square_call() -> Vec<Instruction> {
        vec![
            op1(Opcode::StackAlloc, imm(4, W32)),
            op1(Opcode::Push, imm(7, W32)),
            op1(Opcode::CallExternal, imm(1, W32)),
            op1(Opcode::PopTo, reg(A, W32)),
            exit_a(),
        ]
    }

    #[test]
    fn test_sync_external() {
        let info = ExternalFunctionInfo::new(1, "square", 4, 4);
        let mut externals = ExternalFunctions::new();
        externals.register_sync(info.clone(), |args, ret| {
            let x = i32::from_le_bytes([args[0], args[1], args[2], args[3]]);
            ret.copy_from_slice(&(x * x).to_le_bytes());
            Ok(())
        });
        let mut processor = Processor::new(
            program_with_external(square_call(), info),
            externals,
            ProcessorSettings::default(),
        );
        let result = processor.run().unwrap();
        assert_eq!(result.exit_code, 49);
        assert_eq!(processor.stack_pointer(), 512);
    }

    struct Countdown {
        remaining: Rc<RefCell<u32>>,
        value: i32,
    }

    impl PendingCall for Countdown {
        fn poll(&mut self) -> Result<Option<Vec<u8>>, ExternalError> {
            let mut remaining = self.remaining.borrow_mut();
            if *remaining == 0 {
                return Ok(Some((self.value * self.value).to_le_bytes().to_vec()));
            }
            *remaining -= 1;
            Ok(None)
        }
    }

    #[test]
    fn test_async_external_waits() {
        let info = ExternalFunctionInfo::new(1, "square", 4, 4);
        let remaining = Rc::new(RefCell::new(2));
        let shared = remaining.clone();
        let mut externals = ExternalFunctions::new();
        externals.register_async(info.clone(), move |args| {
            let value = i32::from_le_bytes([args[0], args[1], args[2], args[3]]);
            Ok(Box::new(Countdown {
                remaining: shared.clone(),
                value,
            }) as Box<dyn PendingCall>)
        });
        let mut processor = Processor::new(
            program_with_external(square_call(), info),
            externals,
            ProcessorSettings::default(),
        );

        assert_eq!(processor.tick().unwrap(), TickOutcome::Continue);
        assert_eq!(processor.tick().unwrap(), TickOutcome::Continue);
        assert_eq!(processor.tick().unwrap(), TickOutcome::Waiting);
        assert_eq!(processor.instruction_pointer(), 2);
        assert_eq!(processor.tick().unwrap(), TickOutcome::Waiting);
        assert_eq!(processor.tick().unwrap(), TickOutcome::Waiting);
        assert_eq!(processor.tick().unwrap(), TickOutcome::Continue);
        assert_eq!(*remaining.borrow(), 0);
        assert_eq!(processor.instruction_pointer(), 3);
        assert_eq!(processor.run().unwrap().exit_code, 49);
    }

    #[test]
    fn test_unknown_external() {
        assert_error(
            vec![op1(Opcode::CallExternal, imm(9, W32))],
            "unknown external function 9",
        );
    }

    #[test]
    fn test_external_failure() {
        let info = ExternalFunctionInfo::new(1, "square", 4, 4);
        let mut externals = ExternalFunctions::new();
        externals.register_sync(info.clone(), |_, _| Err(ExternalError::Failed("boom".to_string())));
        let mut processor = Processor::new(
            program_with_external(square_call(), info),
            externals,
            ProcessorSettings::default(),
        );
        let err = processor.run().err().unwrap();
        assert_eq!(err.instruction_pointer, 2);
        assert!(err.to_string().contains("external function `square` failed: boom"));
    }

    #[test]
    fn test_external_signature_mismatch() {
        let mut externals = ExternalFunctions::new();
        externals.register_sync(ExternalFunctionInfo::new(1, "square", 8, 4), |_, _| Ok(()));
        let mut processor = Processor::new(
            program_with_external(square_call(), ExternalFunctionInfo::new(1, "square", 4, 4)),
            externals,
            ProcessorSettings::default(),
        );
        let err = processor.run().err().unwrap();
        assert!(matches!(
            err.kind,
            RuntimeErrorKind::External {
                source: ExternalError::Signature { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = ProcessorSettings::default();
        assert_eq!(settings.max_call_depth, 1000);
        assert_eq!(settings.max_steps, None);
    }
}
