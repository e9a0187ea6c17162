use crate::compiler::{
    CompiledExpression, CompiledFunction, ConversionKind, ExpressionKind, FunctionId,
};
use crate::lang::{BinaryOp, UnaryOp};
use crate::types::{BitWidth, GeneralType, NumericType};

use super::address::{Address, chunks};
use super::generate::Generator;
use super::generate_error::GenerateError;
use super::op::{AddressOperand, InstructionOperand, Opcode, Register};

/// Every expression leaves exactly `size_of(ty)` bytes on the stack.
impl Generator<'_> {
    pub(super) fn emit_expression(&mut self, expr: &CompiledExpression) -> Result<(), GenerateError> {
        match &expr.kind {
            ExpressionKind::Literal(value) => {
                self.op1(
                    Opcode::Push,
                    InstructionOperand::immediate(value.bits(), value.width()),
                );
            }
            ExpressionKind::Variable(_)
            | ExpressionKind::Parameter(_)
            | ExpressionKind::Dereference(_)
            | ExpressionKind::Index { .. } => {
                let size = self.size_of(&expr.ty)?;
                let address = self.emit_place(expr)?;
                self.push_from_address(address, size);
            }
            ExpressionKind::Field { object, offset } => {
                let size = self.size_of(&expr.ty)?;
                if object.is_place() {
                    let address = self.emit_place(expr)?;
                    self.push_from_address(address, size);
                } else {
                    let object_size = self.size_of(&object.ty)?;
                    self.emit_expression(object)?;
                    self.extract_field(object_size, *offset, size);
                }
            }
            ExpressionKind::FunctionAddress(id) => {
                let function = self.function_info(*id)?;
                if function.external.is_some() {
                    return Err(GenerateError::external_address(&function.name, &expr.location));
                }
                self.push_function_address(*id);
            }
            ExpressionKind::Binary { op, left, right } => self.emit_binary(*op, left, right)?,
            ExpressionKind::Logical { op, left, right } => self.emit_logical(*op, left, right)?,
            ExpressionKind::Unary { op, operand } => self.emit_unary(*op, operand)?,
            ExpressionKind::Conversion { kind, value } => {
                self.emit_conversion(*kind, value, &expr.ty)?
            }
            ExpressionKind::Call { function, args } => self.emit_call(*function, args)?,
            ExpressionKind::CallIndirect { callee, args } => {
                let return_size = self.size_of(&expr.ty)?;
                self.reserve_return(return_size);
                for arg in args {
                    self.emit_expression(arg)?;
                }
                self.emit_expression(callee)?;
                let c = self.register(Register::C);
                self.op1(Opcode::PopTo, c);
                self.op1(Opcode::Call, c);
            }
            ExpressionKind::Construct { constructor, args } => {
                self.emit_allocation(&expr.ty)?;
                let a = self.register(Register::A);
                self.op1(Opcode::Push, a);
                self.op1(Opcode::Push, a);
                for arg in args {
                    self.emit_expression(arg)?;
                }
                self.call_function(*constructor);
            }
            ExpressionKind::Allocate => {
                self.emit_allocation(&expr.ty)?;
                let a = self.register(Register::A);
                self.op1(Opcode::Push, a);
            }
            ExpressionKind::AddressOf(inner) => {
                let address = self.emit_place(inner)?;
                self.push_address(address);
            }
        }
        Ok(())
    }

    /// Resolves a place to an address. Runtime bases are pushed on the
    /// stack and the result is [`Address::Indirect`].
    pub(super) fn emit_place(&mut self, expr: &CompiledExpression) -> Result<Address, GenerateError> {
        match &expr.kind {
            ExpressionKind::Variable(id) => self.variable_address(*id),
            ExpressionKind::Parameter(index) => self.frame.parameter(*index).ok_or_else(|| {
                GenerateError::internal(format!("parameter {} is out of range", index))
            }),
            ExpressionKind::Field { object, offset } => {
                Ok(self.emit_place(object)?.offset(*offset as i32))
            }
            ExpressionKind::Dereference(pointer) => {
                self.emit_expression(pointer)?;
                Ok(Address::Indirect(0))
            }
            ExpressionKind::Index {
                object,
                index,
                length,
            } => {
                let element_size = self.size_of(&expr.ty)?;
                if object.ty.is_pointer() {
                    self.emit_expression(object)?;
                } else {
                    let base = self.emit_place(object)?;
                    self.push_address(base);
                }
                self.emit_scaled_index(index, *length, element_size)?;
                Ok(Address::Indirect(0))
            }
            _ => Err(GenerateError::internal(format!(
                "{}: expression is not a storage location",
                expr.location
            ))),
        }
    }

    /// With a base pointer on the stack, replaces it by
    /// `base + index * element_size`.
    fn emit_scaled_index(
        &mut self,
        index: &CompiledExpression,
        length: Option<u32>,
        element_size: u32,
    ) -> Result<(), GenerateError> {
        let index_width = self.width_of(&index.ty)?;
        self.emit_expression(index)?;
        let b_index = InstructionOperand::register(Register::B, index_width);
        self.op1(Opcode::PopTo, b_index);
        if let Some(length) = length {
            self.op2(
                Opcode::BoundsCheck,
                b_index,
                InstructionOperand::immediate(length as u64, index_width),
            );
        }
        let a = self.register(Register::A);
        let b = self.register(Register::B);
        if index_width != self.pointer_width {
            let signed = index.ty.numeric_type() != Some(NumericType::UnsignedInteger);
            let opcode = if signed {
                Opcode::MoveSignExtend
            } else {
                Opcode::MoveZeroExtend
            };
            self.op2(opcode, b, b_index);
        }
        if element_size != 1 {
            self.op2(
                Opcode::MathMult,
                b,
                InstructionOperand::immediate(element_size as u64, self.pointer_width),
            );
        }
        self.op1(Opcode::PopTo, a);
        self.op2(Opcode::MathAdd, a, b);
        self.op1(Opcode::Push, a);
        Ok(())
    }

    /// Pushes the runtime value of an address.
    pub(super) fn push_address(&mut self, address: Address) {
        let a = self.register(Register::A);
        match address {
            Address::Absolute(absolute) => {
                self.op1(
                    Opcode::Push,
                    InstructionOperand::immediate(absolute as u64, self.pointer_width),
                );
            }
            Address::Frame(offset) => {
                self.op2(Opcode::Move, a, self.register(Register::BP));
                self.add_offset(offset);
                self.op1(Opcode::Push, a);
            }
            Address::Indirect(0) => {}
            Address::Indirect(offset) => {
                self.op1(Opcode::PopTo, a);
                self.add_offset(offset);
                self.op1(Opcode::Push, a);
            }
        }
    }

    fn add_offset(&mut self, offset: i32) {
        if offset != 0 {
            self.op2(
                Opcode::MathAdd,
                self.register(Register::A),
                InstructionOperand::immediate(offset as i64 as u64, self.pointer_width),
            );
        }
    }

    /// With a struct of `object_size` bytes on the stack, keeps only the
    /// `size` bytes at `offset`.
    fn extract_field(&mut self, object_size: u32, offset: u32, size: u32) {
        let target = object_size - size;
        if target != offset {
            // Highest chunk first: the target never lies below the source.
            for (chunk, width) in chunks(size).into_iter().rev() {
                let a = InstructionOperand::register(Register::A, width);
                let at = |position: u32| {
                    InstructionOperand::memory(
                        AddressOperand::relative(Register::SP, position as i32),
                        width,
                    )
                };
                self.op2(Opcode::Move, a, at(offset + chunk));
                self.op2(Opcode::Move, at(target + chunk), a);
            }
        }
        self.discard(target);
    }

    fn emit_allocation(&mut self, pointer: &GeneralType) -> Result<(), GenerateError> {
        let pointee = pointer
            .pointee()
            .ok_or_else(|| GenerateError::internal(format!("allocation of non-pointer `{}`", pointer)))?;
        let size = self.size_of(pointee)?;
        self.op2(
            Opcode::HeapAlloc,
            self.register(Register::A),
            InstructionOperand::immediate(size as u64, BitWidth::W32),
        );
        Ok(())
    }

    fn reserve_return(&mut self, size: u32) {
        if size > 0 {
            self.op1(
                Opcode::StackAlloc,
                InstructionOperand::immediate(size as u64, BitWidth::W32),
            );
        }
    }

    fn function_info(&self, id: FunctionId) -> Result<&CompiledFunction, GenerateError> {
        self.result
            .function(id)
            .ok_or_else(|| GenerateError::internal(format!("unknown function {}", id)))
    }

    /// Caller side of the call protocol: reserve the return slot, push the
    /// arguments left to right, call. The callee pops its parameters.
    fn emit_call(&mut self, id: FunctionId, args: &[CompiledExpression]) -> Result<(), GenerateError> {
        let result = self.result;
        let function = result
            .function(id)
            .ok_or_else(|| GenerateError::internal(format!("unknown function {}", id)))?;
        let return_size = self.size_of(&function.return_type)?;
        self.reserve_return(return_size);
        for arg in args {
            self.emit_expression(arg)?;
        }
        match &function.external {
            Some(external) => {
                self.op1(
                    Opcode::CallExternal,
                    InstructionOperand::immediate(external.id as u64, BitWidth::W32),
                );
            }
            None => self.call_function(id),
        }
        Ok(())
    }

    // =========================================================================
    // Operators
    // =========================================================================

    fn emit_binary(
        &mut self,
        op: BinaryOp,
        left: &CompiledExpression,
        right: &CompiledExpression,
    ) -> Result<(), GenerateError> {
        let width = self.width_of(&left.ty)?;
        let class = arithmetic_class(&left.ty);
        let opcode = binary_opcode(op, class);
        self.emit_expression(left)?;
        self.emit_expression(right)?;

        let a = InstructionOperand::register(Register::A, width);
        let b = InstructionOperand::register(Register::B, width);
        self.op1(Opcode::PopTo, b);
        self.op1(Opcode::PopTo, a);
        self.op2(opcode, a, b);
        let result_width = if op.is_comparison() { BitWidth::W8 } else { width };
        self.op1(Opcode::Push, InstructionOperand::register(Register::A, result_width));
        Ok(())
    }

    /// Short-circuit `&&` and `||`; the result is a `u8` 0 or 1.
    fn emit_logical(
        &mut self,
        op: BinaryOp,
        left: &CompiledExpression,
        right: &CompiledExpression,
    ) -> Result<(), GenerateError> {
        let short = self.new_label();
        let end = self.new_label();

        self.emit_truth(left)?;
        let a8 = InstructionOperand::register(Register::A, BitWidth::W8);
        let jump = if op == BinaryOp::LogicalOr {
            Opcode::JumpIfNotZero
        } else {
            Opcode::JumpIfZero
        };
        self.jump_if(jump, a8, short);

        self.emit_truth(right)?;
        self.op1(Opcode::Push, a8);
        self.jump_to(end);

        self.bind(short);
        let shortcut = u64::from(op == BinaryOp::LogicalOr);
        self.op1(Opcode::Push, InstructionOperand::immediate(shortcut, BitWidth::W8));
        self.bind(end);
        Ok(())
    }

    /// Evaluates `expr` and leaves 0 or 1 in register A.
    fn emit_truth(&mut self, expr: &CompiledExpression) -> Result<(), GenerateError> {
        let width = self.width_of(&expr.ty)?;
        self.emit_expression(expr)?;
        let a = InstructionOperand::register(Register::A, width);
        self.op1(Opcode::PopTo, a);
        let compare = if expr.ty.is_float() {
            Opcode::FCompareNe
        } else {
            Opcode::CompareNe
        };
        self.op2(compare, a, InstructionOperand::immediate(0, width));
        Ok(())
    }

    fn emit_unary(&mut self, op: UnaryOp, operand: &CompiledExpression) -> Result<(), GenerateError> {
        let width = self.width_of(&operand.ty)?;
        self.emit_expression(operand)?;
        let a = InstructionOperand::register(Register::A, width);
        self.op1(Opcode::PopTo, a);
        match op {
            UnaryOp::Negate => {
                let opcode = if operand.ty.is_float() {
                    Opcode::FMathNeg
                } else {
                    Opcode::MathNeg
                };
                self.op1(opcode, a);
                self.op1(Opcode::Push, a);
            }
            UnaryOp::BitNot => {
                self.op1(Opcode::BitsNot, a);
                self.op1(Opcode::Push, a);
            }
            UnaryOp::LogicalNot => {
                if operand.ty.is_float() {
                    self.op2(Opcode::FCompareEq, a, InstructionOperand::immediate(0, width));
                } else {
                    self.op1(Opcode::LogicNot, a);
                }
                self.op1(
                    Opcode::Push,
                    InstructionOperand::register(Register::A, BitWidth::W8),
                );
            }
        }
        Ok(())
    }

    fn emit_conversion(
        &mut self,
        kind: ConversionKind,
        value: &CompiledExpression,
        to: &GeneralType,
    ) -> Result<(), GenerateError> {
        self.emit_expression(value)?;
        if kind == ConversionKind::Reinterpret && self.size_of(&value.ty)? == self.size_of(to)? {
            return Ok(());
        }
        let from_width = self.width_of(&value.ty)?;
        let to_width = self.width_of(to)?;
        let from = InstructionOperand::register(Register::A, from_width);
        let into = InstructionOperand::register(Register::A, to_width);
        let opcode = match kind {
            ConversionKind::Resize { .. } | ConversionKind::Reinterpret if from_width == to_width => {
                return Ok(());
            }
            ConversionKind::Resize { signed: true } => Opcode::MoveSignExtend,
            ConversionKind::Resize { signed: false } | ConversionKind::Reinterpret => {
                Opcode::MoveZeroExtend
            }
            ConversionKind::IntToFloat { signed: true } => Opcode::IntToFloat,
            ConversionKind::IntToFloat { signed: false } => Opcode::UIntToFloat,
            ConversionKind::FloatToInt { signed: true } => Opcode::FloatToInt,
            ConversionKind::FloatToInt { signed: false } => Opcode::FloatToUInt,
        };
        self.op1(Opcode::PopTo, from);
        self.op2(opcode, into, from);
        self.op1(Opcode::Push, into);
        Ok(())
    }
}

/// Function values are addresses and share the signed class of pointers.
fn arithmetic_class(ty: &GeneralType) -> NumericType {
    match ty.resolved() {
        GeneralType::Function(_) => NumericType::SignedInteger,
        other => other.numeric_type().unwrap_or(NumericType::UnsignedInteger),
    }
}

fn binary_opcode(op: BinaryOp, class: NumericType) -> Opcode {
    use NumericType::{Float, SignedInteger as Signed, UnsignedInteger as Unsigned};
    match (op, class) {
        (BinaryOp::Add, Float) => Opcode::FMathAdd,
        (BinaryOp::Add, _) => Opcode::MathAdd,
        (BinaryOp::Sub, Float) => Opcode::FMathSub,
        (BinaryOp::Sub, _) => Opcode::MathSub,
        (BinaryOp::Mul, Float) => Opcode::FMathMult,
        (BinaryOp::Mul, _) => Opcode::MathMult,
        (BinaryOp::Div, Float) => Opcode::FMathDiv,
        (BinaryOp::Div, Unsigned) => Opcode::UMathDiv,
        (BinaryOp::Div, Signed) => Opcode::MathDiv,
        (BinaryOp::Mod, Float) => Opcode::FMathMod,
        (BinaryOp::Mod, Unsigned) => Opcode::UMathMod,
        (BinaryOp::Mod, Signed) => Opcode::MathMod,
        (BinaryOp::BitAnd, _) => Opcode::BitsAnd,
        (BinaryOp::BitOr, _) => Opcode::BitsOr,
        (BinaryOp::BitXor, _) => Opcode::BitsXor,
        (BinaryOp::ShiftLeft, _) => Opcode::BitsShiftLeft,
        (BinaryOp::ShiftRight, Signed) => Opcode::BitsShiftRight,
        (BinaryOp::ShiftRight, _) => Opcode::UBitsShiftRight,
        (BinaryOp::LogicalAnd, _) => Opcode::LogicAnd,
        (BinaryOp::LogicalOr, _) => Opcode::LogicOr,
        (BinaryOp::Eq, Float) => Opcode::FCompareEq,
        (BinaryOp::Eq, _) => Opcode::CompareEq,
        (BinaryOp::NotEq, Float) => Opcode::FCompareNe,
        (BinaryOp::NotEq, _) => Opcode::CompareNe,
        (BinaryOp::Lt, Float) => Opcode::FCompareLt,
        (BinaryOp::Lt, Unsigned) => Opcode::UCompareLt,
        (BinaryOp::Lt, Signed) => Opcode::CompareLt,
        (BinaryOp::LtEq, Float) => Opcode::FCompareLe,
        (BinaryOp::LtEq, Unsigned) => Opcode::UCompareLe,
        (BinaryOp::LtEq, Signed) => Opcode::CompareLe,
        (BinaryOp::Gt, Float) => Opcode::FCompareGt,
        (BinaryOp::Gt, Unsigned) => Opcode::UCompareGt,
        (BinaryOp::Gt, Signed) => Opcode::CompareGt,
        (BinaryOp::GtEq, Float) => Opcode::FCompareGe,
        (BinaryOp::GtEq, Unsigned) => Opcode::UCompareGe,
        (BinaryOp::GtEq, Signed) => Opcode::CompareGe,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signedness_picks_opcode() {
        assert_eq!(binary_opcode(BinaryOp::Div, NumericType::SignedInteger), Opcode::MathDiv);
        assert_eq!(binary_opcode(BinaryOp::Div, NumericType::UnsignedInteger), Opcode::UMathDiv);
        assert_eq!(binary_opcode(BinaryOp::Lt, NumericType::Float), Opcode::FCompareLt);
        assert_eq!(
            binary_opcode(BinaryOp::ShiftRight, NumericType::UnsignedInteger),
            Opcode::UBitsShiftRight
        );
    }

    #[test]
    fn test_addresses_compare_signed() {
        let pointer = GeneralType::pointer(GeneralType::I32);
        assert_eq!(arithmetic_class(&pointer), NumericType::SignedInteger);
        let function = GeneralType::function(GeneralType::VOID, Vec::new());
        assert_eq!(arithmetic_class(&function), NumericType::SignedInteger);
        assert_eq!(arithmetic_class(&GeneralType::U32), NumericType::UnsignedInteger);
        assert_eq!(arithmetic_class(&GeneralType::I16), NumericType::SignedInteger);
        assert_eq!(arithmetic_class(&GeneralType::F32), NumericType::Float);
    }
}
