//! Lowers a [`CompilerResult`] to one flat instruction array.
//!
//! Layout of the output:
//!
//! ```text
//! 0          STACK_ALLOC main frame
//!            top-level statements
//!            EXIT 0
//! f0.start   STACK_ALLOC frame; body; RETURN params
//! f1.start   ...
//! ```
//!
//! Jumps inside a body and calls between bodies are emitted with a
//! placeholder offset and patched once their targets are known. The
//! finished array goes through [`verify`](super::verify::verify).

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::compiler::{
    CompiledBlock, CompiledBranch, CompiledCleanup, CompiledExpression, CompiledFor, CompiledIf,
    CompiledSetter, CompiledStatement, CompiledVariableDefinition, CompiledWhile, CompilerResult, FunctionId,
    LabelId, VariableId,
};
use crate::lang::Location;
use crate::types::{BitWidth, GeneralType};

use super::address::{Address, chunks};
use super::frame::FrameLayout;
use super::generate_error::GenerateError;
use super::ir::{
    BytecodeProgram, DebugInformation, ExternalFunctionInfo, FunctionMapping, GlobalMapping,
    MemoryLayout, StatementMapping,
};
use super::op::{Instruction, InstructionOperand, Opcode, Register, UNRESOLVED_OFFSET};
use super::verify::verify;

/// Generates bytecode and records each function's instruction offset in
/// `result`.
pub fn generate(
    result: &mut CompilerResult,
    layout: MemoryLayout,
) -> Result<BytecodeProgram, GenerateError> {
    let _span = tracing::debug_span!("generate").entered();
    let (program, offsets) = Generator::new(result, layout)?.run()?;
    for (id, offset) in offsets {
        if let Some(function) = result.functions.get_mut(id.index()) {
            function.instruction_offset = Some(offset);
        }
    }
    debug!(
        instructions = program.instructions.len(),
        functions = program.debug.functions.len(),
        "generated"
    );
    Ok(program)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct JumpLabel(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FixupKind {
    /// Relative offset of a `CALL`.
    Call,
    /// Absolute instruction index pushed as a function value.
    Address,
}

/// An instruction waiting for a function's first instruction index.
#[derive(Debug, Clone, Copy)]
pub(super) struct PendingFixup {
    pub index: usize,
    pub function: FunctionId,
    pub kind: FixupKind,
}

#[derive(Debug, Clone, Copy)]
struct Cleanup {
    address: Address,
    cleanup: CompiledCleanup,
}

#[derive(Debug, Clone, Copy)]
struct LoopContext {
    end: JumpLabel,
    /// Scopes open when the loop started; `break` cleans up the rest.
    depth: usize,
}

pub(super) struct Generator<'a> {
    pub(super) result: &'a CompilerResult,
    layout: MemoryLayout,
    pub(super) pointer_width: BitWidth,
    instructions: Vec<Instruction>,
    debug: DebugInformation,
    main_frame: FrameLayout,
    pub(super) frame: FrameLayout,
    function: Option<FunctionId>,

    scopes: Vec<Vec<Cleanup>>,
    loops: Vec<LoopContext>,
    labels: HashMap<LabelId, (JumpLabel, usize)>,
    label_positions: Vec<Option<usize>>,
    pending_jumps: Vec<(usize, JumpLabel)>,

    fixups: Vec<PendingFixup>,
    offsets: HashMap<FunctionId, u32>,
}

impl<'a> Generator<'a> {
    pub(super) fn new(result: &'a CompilerResult, layout: MemoryLayout) -> Result<Self, GenerateError> {
        if result.pointer_size != layout.pointer_size {
            return Err(GenerateError::pointer_size(result.pointer_size, layout.pointer_size));
        }
        let pointer_width = BitWidth::from_size(layout.pointer_size)
            .filter(|w| *w >= BitWidth::W32)
            .ok_or_else(|| {
                GenerateError::internal(format!("unsupported pointer size {}", layout.pointer_size))
            })?;
        let main_frame = FrameLayout::main(&result.statements, layout.stack_top(), result)?;
        Ok(Self {
            result,
            layout,
            pointer_width,
            instructions: Vec::new(),
            debug: DebugInformation::default(),
            frame: main_frame.clone(),
            main_frame,
            function: None,
            scopes: Vec::new(),
            loops: Vec::new(),
            labels: HashMap::new(),
            label_positions: Vec::new(),
            pending_jumps: Vec::new(),
            fixups: Vec::new(),
            offsets: HashMap::new(),
        })
    }

    pub(super) fn run(mut self) -> Result<(BytecodeProgram, HashMap<FunctionId, u32>), GenerateError> {
        self.record_globals()?;
        self.emit_main()?;

        let result = self.result;
        for function in &result.functions {
            if function.external.is_none() && function.body.is_some() {
                self.emit_function(function.id)?;
            }
        }

        self.apply_fixups()?;
        verify(&self.instructions)?;

        let mut externals: Vec<ExternalFunctionInfo> = Vec::new();
        for function in &result.functions {
            if let Some(external) = &function.external {
                if !externals.iter().any(|e| e.id == external.id) {
                    externals.push(external.clone());
                }
            }
        }

        let program = BytecodeProgram {
            instructions: self.instructions,
            layout: self.layout,
            externals,
            debug: self.debug,
        };
        Ok((program, self.offsets))
    }

    fn record_globals(&mut self) -> Result<(), GenerateError> {
        for variable in self.result.globals() {
            let Some(Address::Absolute(address)) = self.main_frame.variable(variable.id) else {
                continue;
            };
            self.debug.globals.push(GlobalMapping {
                name: variable.name.clone(),
                address,
                size: variable.ty.size(self.result)?,
                ty: variable.ty.to_string(),
            });
        }
        Ok(())
    }

    fn emit_main(&mut self) -> Result<(), GenerateError> {
        let result = self.result;
        self.reserve(self.main_frame.locals_size);
        self.scopes.push(Vec::new());
        self.declare_labels(&result.statements);
        for statement in &result.statements {
            self.emit_statement(statement)?;
        }
        self.emit_cleanups_from(0)?;
        self.scopes.clear();
        self.emit(Instruction::unary(Opcode::Exit, InstructionOperand::immediate(0, BitWidth::W32)));
        self.resolve_jumps()
    }

    fn emit_function(&mut self, id: FunctionId) -> Result<(), GenerateError> {
        let result = self.result;
        let function = result
            .function(id)
            .ok_or_else(|| GenerateError::internal(format!("unknown function {}", id)))?;
        let Some(body) = &function.body else {
            return Ok(());
        };

        let start = self.position();
        self.offsets.insert(id, start as u32);
        self.frame = FrameLayout::function(function, result)?;
        self.function = Some(id);
        self.labels.clear();

        self.reserve(self.frame.locals_size);
        self.emit_block(body)?;
        self.emit(Instruction::unary(
            Opcode::Return,
            InstructionOperand::immediate(self.frame.parameters_size as u64, BitWidth::W32),
        ));
        self.resolve_jumps()?;

        let end = self.position();
        self.debug.functions.push(FunctionMapping {
            name: function.to_string(),
            start: start as u32,
            end: end as u32,
        });
        trace!(function = %function.name, start, size = end - start, "emitted function");
        Ok(())
    }

    // =========================================================================
    // Emission primitives
    // =========================================================================

    pub(super) fn position(&self) -> usize {
        self.instructions.len()
    }

    pub(super) fn emit(&mut self, instruction: Instruction) -> usize {
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    pub(super) fn op1(&mut self, opcode: Opcode, operand: InstructionOperand) -> usize {
        self.emit(Instruction::unary(opcode, operand))
    }

    pub(super) fn op2(&mut self, opcode: Opcode, first: InstructionOperand, second: InstructionOperand) -> usize {
        self.emit(Instruction::binary(opcode, first, second))
    }

    fn reserve(&mut self, bytes: u32) {
        if bytes > 0 {
            self.op1(
                Opcode::StackAlloc,
                InstructionOperand::immediate(bytes as u64, BitWidth::W32),
            );
        }
    }

    pub(super) fn discard(&mut self, bytes: u32) {
        if bytes > 0 {
            self.op1(
                Opcode::Discard,
                InstructionOperand::immediate(bytes as u64, BitWidth::W32),
            );
        }
    }

    pub(super) fn new_label(&mut self) -> JumpLabel {
        self.label_positions.push(None);
        JumpLabel(self.label_positions.len() - 1)
    }

    pub(super) fn bind(&mut self, label: JumpLabel) {
        self.label_positions[label.0] = Some(self.position());
    }

    pub(super) fn jump_to(&mut self, label: JumpLabel) {
        let index = self.emit(Instruction::jump(UNRESOLVED_OFFSET));
        self.pending_jumps.push((index, label));
    }

    /// `JUMP_ZERO` / `JUMP_NZERO` on `condition`.
    pub(super) fn jump_if(&mut self, opcode: Opcode, condition: InstructionOperand, label: JumpLabel) {
        let index = self.op2(opcode, condition, InstructionOperand::offset(UNRESOLVED_OFFSET));
        self.pending_jumps.push((index, label));
    }

    fn resolve_jumps(&mut self) -> Result<(), GenerateError> {
        for (index, label) in std::mem::take(&mut self.pending_jumps) {
            let target = self.label_positions[label.0]
                .ok_or_else(|| GenerateError::internal(format!("jump at {} has no target", index)))?;
            let offset = target as i64 - index as i64;
            self.instructions[index].set_relative_offset(offset as i32);
        }
        self.label_positions.clear();
        Ok(())
    }

    pub(super) fn call_function(&mut self, function: FunctionId) {
        let index = self.emit(Instruction::call(UNRESOLVED_OFFSET));
        self.fixups.push(PendingFixup {
            index,
            function,
            kind: FixupKind::Call,
        });
    }

    pub(super) fn push_function_address(&mut self, function: FunctionId) {
        let index = self.op1(Opcode::Push, InstructionOperand::immediate(0, self.pointer_width));
        self.fixups.push(PendingFixup {
            index,
            function,
            kind: FixupKind::Address,
        });
    }

    fn apply_fixups(&mut self) -> Result<(), GenerateError> {
        for fixup in std::mem::take(&mut self.fixups) {
            let target = *self.offsets.get(&fixup.function).ok_or_else(|| {
                GenerateError::internal(format!("function {} was never generated", fixup.function))
            })?;
            let instruction = &mut self.instructions[fixup.index];
            match fixup.kind {
                FixupKind::Call => {
                    instruction.set_relative_offset(target as i32 - fixup.index as i32);
                }
                FixupKind::Address => {
                    instruction.operand1 =
                        Some(InstructionOperand::immediate(target as u64, self.pointer_width));
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Sizes & storage
    // =========================================================================

    pub(super) fn size_of(&self, ty: &GeneralType) -> Result<u32, GenerateError> {
        if ty.is_void() {
            return Ok(0);
        }
        Ok(ty.size(self.result)?)
    }

    pub(super) fn width_of(&self, ty: &GeneralType) -> Result<BitWidth, GenerateError> {
        Ok(ty.bit_width(self.result)?)
    }

    pub(super) fn variable_address(&self, id: VariableId) -> Result<Address, GenerateError> {
        self.frame
            .variable(id)
            .or_else(|| self.main_frame.variable(id))
            .ok_or_else(|| GenerateError::internal(format!("variable {} has no storage", id)))
    }

    /// Pops `size` bytes off the stack into `address`.
    pub(super) fn pop_to_address(&mut self, address: Address, size: u32) {
        if address.is_indirect() {
            self.pop_pointer_to(Register::D);
        }
        for (offset, width) in chunks(size) {
            self.op1(Opcode::PopTo, address.operand(offset, width));
        }
    }

    /// Pushes `size` bytes read from `address`.
    pub(super) fn push_from_address(&mut self, address: Address, size: u32) {
        if address.is_indirect() {
            self.pop_pointer_to(Register::D);
        }
        for (offset, width) in chunks(size).into_iter().rev() {
            self.op1(Opcode::Push, address.operand(offset, width));
        }
    }

    pub(super) fn pop_pointer_to(&mut self, register: Register) {
        self.op1(Opcode::PopTo, InstructionOperand::register(register, self.pointer_width));
    }

    pub(super) fn register(&self, register: Register) -> InstructionOperand {
        InstructionOperand::register(register, self.pointer_width)
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn emit_block(&mut self, block: &CompiledBlock) -> Result<(), GenerateError> {
        self.scopes.push(Vec::new());
        self.declare_labels(&block.statements);
        for statement in &block.statements {
            self.emit_statement(statement)?;
        }
        let depth = self.scopes.len() - 1;
        self.emit_cleanups_from(depth)?;
        self.scopes.pop();
        Ok(())
    }

    /// Labels are visible from the start of their block so forward gotos
    /// know which scopes they leave.
    fn declare_labels(&mut self, statements: &[CompiledStatement]) {
        let depth = self.scopes.len();
        for statement in statements {
            if let CompiledStatement::Label(id, _) = statement {
                let label = self.new_label();
                self.labels.insert(*id, (label, depth));
            }
        }
    }

    fn emit_statement(&mut self, statement: &CompiledStatement) -> Result<(), GenerateError> {
        let start = self.position();
        match statement {
            CompiledStatement::Block(block) => self.emit_block(block)?,
            CompiledStatement::If(branch) => {
                let end = self.new_label();
                self.emit_if(branch, end)?;
                self.bind(end);
            }
            CompiledStatement::While(w) => self.emit_while(w)?,
            CompiledStatement::For(f) => self.emit_for(f)?,
            CompiledStatement::VariableDefinition(definition) => self.emit_definition(definition)?,
            CompiledStatement::Return(value, _) => self.emit_return(value.as_ref())?,
            CompiledStatement::Break(location) => {
                let context = *self
                    .loops
                    .last()
                    .ok_or_else(|| break_outside_loop(location))?;
                self.emit_cleanups_from(context.depth)?;
                self.jump_to(context.end);
            }
            CompiledStatement::Goto(id, _) => {
                let (label, depth) = *self
                    .labels
                    .get(id)
                    .ok_or_else(|| GenerateError::internal(format!("label {} is not in scope", id)))?;
                self.emit_cleanups_from(depth)?;
                self.jump_to(label);
            }
            CompiledStatement::Label(id, _) => {
                if let Some((label, _)) = self.labels.get(id).copied() {
                    self.bind(label);
                }
            }
            CompiledStatement::Setter(setter) => self.emit_setter(setter)?,
            CompiledStatement::Expression(expression) => {
                self.emit_expression(expression)?;
                let size = self.size_of(&expression.ty)?;
                self.discard(size);
            }
            CompiledStatement::Delete { value, cleanup, .. } => {
                self.emit_expression(value)?;
                self.release_pointer(*cleanup);
            }
            CompiledStatement::Crash(value, _) => {
                let width = self.width_of(&value.ty)?;
                self.emit_expression(value)?;
                let a = InstructionOperand::register(Register::A, width);
                self.op1(Opcode::PopTo, a);
                self.op1(Opcode::Crash, a);
            }
            CompiledStatement::Empty(_) => {}
        }

        let end = self.position();
        if end > start {
            self.debug.statements.push(StatementMapping {
                start: start as u32,
                end: end as u32,
                location: statement.location().clone(),
            });
        }
        Ok(())
    }

    /// Each branch ends with a jump past the whole chain.
    fn emit_if(&mut self, branch: &CompiledIf, end: JumpLabel) -> Result<(), GenerateError> {
        let next = self.new_label();
        self.emit_condition(&branch.condition, next)?;
        self.emit_block(&branch.body)?;
        if branch.next.is_some() {
            self.jump_to(end);
        }
        self.bind(next);
        match branch.next.as_deref() {
            Some(CompiledBranch::ElseIf(inner)) => self.emit_if(inner, end)?,
            Some(CompiledBranch::Else(block)) => self.emit_block(block)?,
            None => {}
        }
        Ok(())
    }

    fn emit_while(&mut self, w: &CompiledWhile) -> Result<(), GenerateError> {
        let top = self.new_label();
        let end = self.new_label();
        self.bind(top);
        self.emit_condition(&w.condition, end)?;
        self.loops.push(LoopContext {
            end,
            depth: self.scopes.len(),
        });
        self.emit_block(&w.body)?;
        self.loops.pop();
        self.jump_to(top);
        self.bind(end);
        Ok(())
    }

    fn emit_for(&mut self, f: &CompiledFor) -> Result<(), GenerateError> {
        self.scopes.push(Vec::new());
        let depth = self.scopes.len();
        if let Some(init) = &f.init {
            self.emit_statement(init)?;
        }
        let top = self.new_label();
        let end = self.new_label();
        self.bind(top);
        if let Some(condition) = &f.condition {
            self.emit_condition(condition, end)?;
        }
        self.loops.push(LoopContext { end, depth });
        self.emit_block(&f.body)?;
        self.loops.pop();
        if let Some(step) = &f.step {
            self.emit_statement(step)?;
        }
        self.jump_to(top);
        self.bind(end);
        self.emit_cleanups_from(depth - 1)?;
        self.scopes.pop();
        Ok(())
    }

    /// Evaluates `condition` and jumps to `otherwise` when it is zero.
    pub(super) fn emit_condition(
        &mut self,
        condition: &CompiledExpression,
        otherwise: JumpLabel,
    ) -> Result<(), GenerateError> {
        let width = self.width_of(&condition.ty)?;
        self.emit_expression(condition)?;
        let a = InstructionOperand::register(Register::A, width);
        self.op1(Opcode::PopTo, a);
        if condition.ty.is_float() {
            self.op2(Opcode::FCompareNe, a, InstructionOperand::immediate(0, width));
        }
        self.jump_if(Opcode::JumpIfZero, a, otherwise);
        Ok(())
    }

    fn emit_definition(&mut self, definition: &CompiledVariableDefinition) -> Result<(), GenerateError> {
        let address = self.variable_address(definition.variable)?;
        let size = self.size_of(&definition.ty)?;
        match &definition.initial {
            Some(initial) => {
                self.emit_expression(initial)?;
                self.pop_to_address(address, size);
            }
            None => {
                for (offset, width) in chunks(size) {
                    self.op2(
                        Opcode::Move,
                        address.operand(offset, width),
                        InstructionOperand::immediate(0, width),
                    );
                }
            }
        }
        if let Some(cleanup) = definition.cleanup {
            if let Some(scope) = self.scopes.last_mut() {
                scope.push(Cleanup { address, cleanup });
            }
        }
        Ok(())
    }

    fn emit_setter(&mut self, setter: &CompiledSetter) -> Result<(), GenerateError> {
        let size = self.size_of(&setter.target.ty)?;
        self.emit_expression(&setter.value)?;
        let address = self.emit_place(&setter.target)?;
        self.pop_to_address(address, size);
        Ok(())
    }

    fn emit_return(&mut self, value: Option<&CompiledExpression>) -> Result<(), GenerateError> {
        match self.function {
            Some(_) => {
                if let Some(value) = value {
                    self.emit_expression(value)?;
                    let slot = self.frame.return_slot();
                    let size = self.frame.return_size;
                    self.pop_to_address(slot, size);
                }
                self.emit_cleanups_from(0)?;
                self.op1(
                    Opcode::Return,
                    InstructionOperand::immediate(self.frame.parameters_size as u64, BitWidth::W32),
                );
            }
            None => {
                let Some(value) = value else {
                    self.emit_cleanups_from(0)?;
                    self.op1(Opcode::Exit, InstructionOperand::immediate(0, BitWidth::W32));
                    return Ok(());
                };
                let width = self.width_of(&value.ty)?;
                self.emit_expression(value)?;
                self.emit_cleanups_from(0)?;
                let a = InstructionOperand::register(Register::A, width);
                self.op1(Opcode::PopTo, a);
                self.op1(Opcode::Exit, a);
            }
        }
        Ok(())
    }

    // =========================================================================
    // Cleanup
    // =========================================================================

    /// Runs the cleanups of every scope at `depth` and deeper, innermost
    /// first. Scopes stay open: this is used for early exits too.
    fn emit_cleanups_from(&mut self, depth: usize) -> Result<(), GenerateError> {
        let pending: Vec<Cleanup> = self
            .scopes
            .iter()
            .skip(depth)
            .rev()
            .flat_map(|scope| scope.iter().rev().copied())
            .collect();
        for cleanup in pending {
            self.emit_cleanup(cleanup);
        }
        Ok(())
    }

    fn emit_cleanup(&mut self, cleanup: Cleanup) {
        if cleanup.cleanup.deallocate {
            self.push_from_address(cleanup.address, self.layout.pointer_size);
            self.release_pointer(cleanup.cleanup);
        } else if let Some(destructor) = cleanup.cleanup.destructor {
            self.push_address(cleanup.address);
            self.call_function(destructor);
        }
    }

    /// Consumes the pointer on top of the stack: runs the destructor on it
    /// and frees it. Null pointers are skipped.
    pub(super) fn release_pointer(&mut self, cleanup: CompiledCleanup) {
        let a = self.register(Register::A);
        let skip = self.new_label();
        self.op1(Opcode::PopTo, a);
        self.jump_if(Opcode::JumpIfZero, a, skip);
        if let Some(destructor) = cleanup.destructor {
            self.op1(Opcode::Push, a);
            self.op1(Opcode::Push, a);
            self.call_function(destructor);
            self.op1(Opcode::PopTo, a);
        }
        if cleanup.deallocate {
            self.op1(Opcode::HeapFree, a);
        }
        self.bind(skip);
    }
}

fn break_outside_loop(location: &Location) -> GenerateError {
    GenerateError::internal(format!("{}: break outside of a loop", location))
}
