//! Expression lowering.

use crate::lang::{BinaryOp, Expression, Location, TypeInstance, UnaryOp};
use crate::types::{BuiltinType, GeneralType, StructType};

use super::Compiler;
use super::compile_error::{InternalError, Lower};
use super::diagnostics::Diagnostic;
use super::entities::{FunctionId, FunctionKind, GeneralFunctionKind};
use super::statement::{CompiledExpression, ExpressionKind};
use super::value::CompiledValue;

impl Compiler<'_> {
    pub(crate) fn compile_expression(&mut self, expression: &Expression) -> Lower<CompiledExpression> {
        match expression {
            Expression::Literal(literal, location) => Ok(CompiledExpression::literal(
                CompiledValue::from_literal(literal),
                location.clone(),
            )),
            Expression::Identifier(name, location) => self.compile_identifier(name, location, true),
            Expression::Binary {
                op,
                left,
                right,
                location,
            } => {
                let left = self.compile_expression(left)?;
                let right = self.compile_expression(right)?;
                self.compile_binary(*op, left, right, location)
            }
            Expression::Unary {
                op,
                operand,
                location,
            } => {
                let operand = self.compile_expression(operand)?;
                self.compile_unary(*op, operand, location)
            }
            Expression::Cast {
                value,
                to,
                location,
            } => {
                let value = self.compile_expression(value)?;
                let to = self.resolve_local_type(to)?;
                self.cast(value, &to, location)
            }
            Expression::Call {
                name,
                type_arguments,
                args,
                location,
            } => self.compile_call(name, type_arguments, args, location),
            Expression::MethodCall {
                receiver,
                name,
                args,
                location,
            } => self.compile_method_call(receiver, name, args, location),
            Expression::New { ty, args, location } => self.compile_new(ty, args.as_deref(), location),
            Expression::Field {
                object,
                field,
                location,
            } => self.compile_field(object, field, location),
            Expression::Index {
                object,
                index,
                location,
            } => self.compile_index(object, index, location),
            Expression::AddressOf(value, location) => {
                let value = self.compile_expression(value)?;
                if matches!(value.kind, ExpressionKind::FunctionAddress(_)) {
                    return Ok(value);
                }
                self.address_of(value, location)
            }
            Expression::Dereference(value, location) => {
                let value = self.compile_expression(value)?;
                self.dereference(value, location)
            }
        }
    }

    pub(crate) fn resolve_local_type(&mut self, ty: &TypeInstance) -> Lower<GeneralType> {
        let arguments = self.scope.type_arguments.clone();
        self.resolve_type(ty, &arguments)
    }

    fn compile_arguments(&mut self, args: &[Expression]) -> Lower<Vec<CompiledExpression>> {
        args.iter().map(|arg| self.compile_expression(arg)).collect()
    }

    // =========================================================================
    // Names
    // =========================================================================

    /// Resolves a bare name: locals, then parameters, then globals, then
    /// constants, then functions. `read` records a getter reference.
    pub(crate) fn compile_identifier(
        &mut self,
        name: &str,
        location: &Location,
        read: bool,
    ) -> Lower<CompiledExpression> {
        let local = self.scope.lookup_variable(name);
        if let Some(id) = local {
            return Ok(self.variable_expression(id, location, read));
        }
        if let Some((index, parameter)) = self.scope.lookup_parameter(name) {
            let ty = parameter.ty.clone();
            return Ok(CompiledExpression::new(
                ExpressionKind::Parameter(index),
                ty,
                location.clone(),
            ));
        }
        if let Some(&id) = self.globals.get(name) {
            return Ok(self.variable_expression(id, location, read));
        }
        if let Some(value) = self.constants.get(name) {
            return Ok(CompiledExpression::literal(*value, location.clone()));
        }

        let candidates = self.free_functions(name);
        match candidates.as_slice() {
            [] => self.report(Diagnostic::unresolved_identifier(name, location)),
            [single] if !self.templates[single.index()].is_generic() => {
                let function = self.instantiate(*single, Default::default(), location)?;
                self.functions[function.index()].references.push(location.clone());
                let ty = self.functions[function.index()].signature();
                Ok(CompiledExpression::new(
                    ExpressionKind::FunctionAddress(function),
                    ty,
                    location.clone(),
                ))
            }
            [_] => self.report(Diagnostic::error(
                format!("generic function `{}` cannot be used as a value", name),
                location,
            )),
            many => self.report(Diagnostic::ambiguous_call(name, many.len(), location)),
        }
    }

    fn variable_expression(
        &mut self,
        id: super::entities::VariableId,
        location: &Location,
        read: bool,
    ) -> CompiledExpression {
        if read {
            self.references.add_getter(id, location);
        }
        let ty = self.variables[id.index()].ty.clone();
        CompiledExpression::new(ExpressionKind::Variable(id), ty, location.clone())
    }

    fn is_value_name(&self, name: &str) -> bool {
        self.scope.lookup_variable(name).is_some()
            || self.scope.lookup_parameter(name).is_some()
            || self.globals.contains_key(name)
    }

    // =========================================================================
    // Operators
    // =========================================================================

    pub(crate) fn compile_binary(
        &mut self,
        op: BinaryOp,
        left: CompiledExpression,
        right: CompiledExpression,
        location: &Location,
    ) -> Lower<CompiledExpression> {
        if op.is_logical() {
            self.expect_condition(&left)?;
            self.expect_condition(&right)?;
            if let (Some(a), Some(b)) = (left.as_literal(), right.as_literal()) {
                let value = match op {
                    BinaryOp::LogicalAnd => a.is_truthy() && b.is_truthy(),
                    _ => a.is_truthy() || b.is_truthy(),
                };
                return Ok(CompiledExpression::literal(CompiledValue::boolean(value), location.clone()));
            }
            return Ok(CompiledExpression::new(
                ExpressionKind::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                GeneralType::U8,
                location.clone(),
            ));
        }

        if left.ty.as_struct().is_some() || right.ty.as_struct().is_some() {
            let symbol = op.symbol();
            let candidates =
                self.templates_where(|t| t.kind == FunctionKind::Operator && t.name == symbol);
            let (function, args) = self.resolve_call(symbol, &candidates, &[], vec![left, right], location)?;
            return Ok(self.call_expression(function, args, location));
        }

        if left.ty.is_pointer() || right.ty.is_pointer() {
            return self.compile_pointer_binary(op, left, right, location);
        }

        let operand_type = if op.is_shift() {
            Some(left.ty.clone()).filter(|ty| ty.as_builtin().is_some_and(BuiltinType::is_integer))
        } else {
            self.binary_operand_type(&left, &right)
        };
        let Some(operand_type) = operand_type else {
            return self.report(invalid_operands(op, &left.ty, &right.ty, location));
        };
        if operand_type.is_float() && op.is_bitwise() {
            return self.report(invalid_operands(op, &left.ty, &right.ty, location));
        }

        let left = self.convert(left, &operand_type)?;
        let right = if op.is_shift() {
            self.coerce_integer(right, &operand_type)?
        } else {
            self.convert(right, &operand_type)?
        };
        let result_type = if op.is_comparison() {
            GeneralType::U8
        } else {
            operand_type
        };

        if let (Some(a), Some(b)) = (left.as_literal(), right.as_literal()) {
            return match a.binary(op, b) {
                Ok(Some(value)) => Ok(CompiledExpression::literal(value, location.clone())),
                Ok(None) => self.report(invalid_operands(op, &left.ty, &right.ty, location)),
                Err(error) => self.report(Diagnostic::error(
                    format!("{} in constant expression", error),
                    location,
                )),
            };
        }

        Ok(CompiledExpression::new(
            ExpressionKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            result_type,
            location.clone(),
        ))
    }

    /// Pointer `+`/`-` an integer moves by bytes; pointers compare as
    /// addresses.
    fn compile_pointer_binary(
        &mut self,
        op: BinaryOp,
        left: CompiledExpression,
        right: CompiledExpression,
        location: &Location,
    ) -> Lower<CompiledExpression> {
        let is_integer = |e: &CompiledExpression| e.ty.as_builtin().is_some_and(BuiltinType::is_integer);
        let (left, right, result_type) = if matches!(op, BinaryOp::Add | BinaryOp::Sub)
            && left.ty.is_pointer()
            && is_integer(&right)
        {
            let ty = left.ty.clone();
            let right = self.coerce_integer(right, &ty)?;
            (left, right, ty)
        } else if op.is_comparison() {
            if left.ty.is_pointer() {
                let ty = left.ty.clone();
                let right = self.convert(right, &ty)?;
                (left, right, GeneralType::U8)
            } else {
                let ty = right.ty.clone();
                let left = self.convert(left, &ty)?;
                (left, right, GeneralType::U8)
            }
        } else {
            return self.report(invalid_operands(op, &left.ty, &right.ty, location));
        };
        Ok(CompiledExpression::new(
            ExpressionKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            result_type,
            location.clone(),
        ))
    }

    fn compile_unary(
        &mut self,
        op: UnaryOp,
        operand: CompiledExpression,
        location: &Location,
    ) -> Lower<CompiledExpression> {
        let builtin = operand.ty.as_builtin().filter(|b| b.numeric_type().is_some());
        let ty = match op {
            UnaryOp::Negate if builtin.is_some() => operand.ty.clone(),
            UnaryOp::BitNot if builtin.is_some_and(BuiltinType::is_integer) => operand.ty.clone(),
            UnaryOp::LogicalNot if operand.ty.is_scalar() => GeneralType::U8,
            _ => {
                return self.report(Diagnostic::error(
                    format!("operator `{}` cannot be applied to `{}`", op.symbol(), operand.ty),
                    location,
                ));
            }
        };
        if let Some(value) = operand.as_literal().and_then(|v| v.unary(op)) {
            return Ok(CompiledExpression::literal(value, location.clone()));
        }
        Ok(CompiledExpression::new(
            ExpressionKind::Unary {
                op,
                operand: Box::new(operand),
            },
            ty,
            location.clone(),
        ))
    }

    /// Conditions are tested against zero at their own width.
    pub(crate) fn expect_condition(&mut self, condition: &CompiledExpression) -> Lower<()> {
        if condition.ty.is_scalar() {
            Ok(())
        } else {
            self.report(Diagnostic::type_mismatch("a scalar condition", &condition.ty, &condition.location))
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    pub(crate) fn call_expression(
        &self,
        function: FunctionId,
        args: Vec<CompiledExpression>,
        location: &Location,
    ) -> CompiledExpression {
        let ty = self.functions[function.index()].return_type.clone();
        CompiledExpression::new(ExpressionKind::Call { function, args }, ty, location.clone())
    }

    fn compile_call(
        &mut self,
        name: &str,
        type_arguments: &[TypeInstance],
        args: &[Expression],
        location: &Location,
    ) -> Lower<CompiledExpression> {
        if self.is_value_name(name) {
            let callee = self.compile_identifier(name, location, true)?;
            let args = self.compile_arguments(args)?;
            return self.compile_indirect_call(callee, args, location);
        }
        let candidates = self.free_functions(name);
        if candidates.is_empty() {
            return self.report(Diagnostic::unresolved_identifier(name, location));
        }
        let mut resolved = Vec::with_capacity(type_arguments.len());
        for ty in type_arguments {
            resolved.push(self.resolve_local_type(ty)?);
        }
        let args = self.compile_arguments(args)?;
        let (function, args) = self.resolve_call(name, &candidates, &resolved, args, location)?;
        Ok(self.call_expression(function, args, location))
    }

    fn compile_indirect_call(
        &mut self,
        callee: CompiledExpression,
        args: Vec<CompiledExpression>,
        location: &Location,
    ) -> Lower<CompiledExpression> {
        let GeneralType::Function(signature) = callee.ty.resolved().clone() else {
            return self.report(Diagnostic::error(
                format!("`{}` is not callable", callee.ty),
                location,
            ));
        };
        if signature.parameters.len() != args.len() {
            let described: Vec<String> = args.iter().map(|a| a.ty.to_string()).collect();
            return self.report(Diagnostic::no_matching_overload(
                &callee.ty.to_string(),
                &described,
                location,
            ));
        }
        let mut converted = Vec::with_capacity(args.len());
        for (arg, ty) in args.into_iter().zip(&signature.parameters) {
            converted.push(self.convert(arg, ty)?);
        }
        Ok(CompiledExpression::new(
            ExpressionKind::CallIndirect {
                callee: Box::new(callee),
                args: converted,
            },
            *signature.return_type,
            location.clone(),
        ))
    }

    fn compile_method_call(
        &mut self,
        receiver: &Expression,
        name: &str,
        args: &[Expression],
        location: &Location,
    ) -> Lower<CompiledExpression> {
        let receiver = self.compile_expression(receiver)?;
        let (this, structure) = self.receiver_pointer(receiver, location)?;
        let candidates = self.member_functions(structure.id, FunctionKind::Method(structure.id), Some(name));

        if candidates.is_empty() {
            // A field holding a function value.
            if let Ok(field) = structure.field(name, &*self) {
                if matches!(field.ty.resolved(), GeneralType::Function(_)) {
                    let object = self.dereference(this, location)?;
                    let callee = CompiledExpression::new(
                        ExpressionKind::Field {
                            object: Box::new(object),
                            offset: field.offset,
                        },
                        field.ty,
                        location.clone(),
                    );
                    let args = self.compile_arguments(args)?;
                    return self.compile_indirect_call(callee, args, location);
                }
            }
            let qualified = format!("{}.{}", structure.name, name);
            return self.report(Diagnostic::unresolved_identifier(&qualified, location));
        }

        let mut compiled = vec![this];
        compiled.extend(self.compile_arguments(args)?);
        let (function, args) = self.resolve_call(name, &candidates, &[], compiled, location)?;
        Ok(self.call_expression(function, args, location))
    }

    /// A `this` pointer for a struct value (by address) or struct pointer.
    fn receiver_pointer(
        &mut self,
        receiver: CompiledExpression,
        location: &Location,
    ) -> Lower<(CompiledExpression, StructType)> {
        if let Some(structure) = receiver.ty.as_struct().cloned() {
            let this = self.address_of(receiver, location)?;
            return Ok((this, structure));
        }
        if let Some(structure) = receiver.ty.pointee().and_then(GeneralType::as_struct).cloned() {
            return Ok((receiver, structure));
        }
        self.report(Diagnostic::error(
            format!("type `{}` has no methods", receiver.ty),
            location,
        ))
    }

    fn compile_new(
        &mut self,
        ty: &TypeInstance,
        args: Option<&[Expression]>,
        location: &Location,
    ) -> Lower<CompiledExpression> {
        let ty = self.resolve_local_type(ty)?;
        self.size_of(&ty, location)?;
        let pointer = GeneralType::pointer(ty.clone());
        let allocation = CompiledExpression::new(ExpressionKind::Allocate, pointer.clone(), location.clone());
        let Some(args) = args else {
            return Ok(allocation);
        };

        let constructors = match ty.as_struct() {
            Some(structure) => {
                self.member_functions(structure.id, FunctionKind::Constructor(structure.id), None)
            }
            None => Vec::new(),
        };
        if constructors.is_empty() {
            if args.is_empty() {
                return Ok(allocation);
            }
            return self.report(Diagnostic::error(
                format!("type `{}` has no constructor", ty),
                location,
            ));
        }

        let mut compiled = vec![allocation];
        compiled.extend(self.compile_arguments(args)?);
        let name = ty.to_string();
        let (constructor, mut args) = self.resolve_call(&name, &constructors, &[], compiled, location)?;
        args.remove(0);
        Ok(CompiledExpression::new(
            ExpressionKind::Construct { constructor, args },
            pointer,
            location.clone(),
        ))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    fn compile_field(
        &mut self,
        object: &Expression,
        field: &str,
        location: &Location,
    ) -> Lower<CompiledExpression> {
        let object = self.compile_expression(object)?;
        let object = if object.ty.pointee().is_some() {
            self.dereference(object, location)?
        } else {
            object
        };

        if let GeneralType::Array(array) = object.ty.resolved() {
            if field == "length" {
                if let Some(length) = array.length {
                    let value = CompiledValue::integer(length as i64, BuiltinType::I32)
                        .ok_or_else(|| InternalError::invariant("i32 literal"))?;
                    return Ok(CompiledExpression::literal(value, location.clone()));
                }
            }
        }

        let Some(structure) = object.ty.as_struct().cloned() else {
            return self.report(Diagnostic::error(
                format!("type `{}` has no field `{}`", object.ty, field),
                location,
            ));
        };
        let field = match structure.field(field, &*self) {
            Ok(field) => field,
            Err(error) if error.is_internal() => return Err(InternalError::from(error).into()),
            Err(error) => return self.report(Diagnostic::error(error.to_string(), location)),
        };
        Ok(CompiledExpression::new(
            ExpressionKind::Field {
                object: Box::new(object),
                offset: field.offset,
            },
            field.ty,
            location.clone(),
        ))
    }

    fn compile_index(
        &mut self,
        object: &Expression,
        index: &Expression,
        location: &Location,
    ) -> Lower<CompiledExpression> {
        let object = self.compile_expression(object)?;
        let index = self.compile_expression(index)?;

        if let Some(structure) = object.ty.as_struct().cloned() {
            let candidates = self.member_functions(
                structure.id,
                FunctionKind::General(structure.id, GeneralFunctionKind::IndexerGet),
                None,
            );
            if candidates.is_empty() {
                return self.report(Diagnostic::error(
                    format!("type `{}` has no indexer", object.ty),
                    location,
                ));
            }
            let this = self.address_of(object, location)?;
            let (function, args) = self.resolve_call("indexer_get", &candidates, &[], vec![this, index], location)?;
            return Ok(self.call_expression(function, args, location));
        }

        self.element_access(object, index, location)
    }

    /// `object[index]` for arrays and pointers.
    pub(crate) fn element_access(
        &mut self,
        object: CompiledExpression,
        index: CompiledExpression,
        location: &Location,
    ) -> Lower<CompiledExpression> {
        let index = self.coerce_integer(index, &GeneralType::I32)?;
        match object.ty.resolved().clone() {
            GeneralType::Array(array) => {
                if !object.is_place() {
                    return self.report(Diagnostic::error("only stored arrays can be indexed", location));
                }
                if let (Some(length), Some(value)) = (array.length, index.as_literal()) {
                    let n = value.as_i64();
                    if n < 0 || n >= length as i64 {
                        return self.report(Diagnostic::error(
                            format!("index {} is out of range for `{}`", n, object.ty),
                            location,
                        ));
                    }
                }
                Ok(CompiledExpression::new(
                    ExpressionKind::Index {
                        object: Box::new(object),
                        index: Box::new(index),
                        length: array.length,
                    },
                    *array.of,
                    location.clone(),
                ))
            }
            GeneralType::Pointer(to) if to.as_builtin().is_none_or(|b| b.size().is_ok()) => {
                Ok(CompiledExpression::new(
                    ExpressionKind::Index {
                        object: Box::new(object),
                        index: Box::new(index),
                        length: None,
                    },
                    *to,
                    location.clone(),
                ))
            }
            _ => self.report(Diagnostic::error(
                format!("type `{}` cannot be indexed", object.ty),
                location,
            )),
        }
    }

    pub(crate) fn address_of(
        &mut self,
        value: CompiledExpression,
        location: &Location,
    ) -> Lower<CompiledExpression> {
        if !value.is_place() {
            return self.report(Diagnostic::error(
                "cannot take the address of a temporary value",
                location,
            ));
        }
        let ty = GeneralType::pointer(value.ty.clone());
        Ok(CompiledExpression::new(
            ExpressionKind::AddressOf(Box::new(value)),
            ty,
            location.clone(),
        ))
    }

    pub(crate) fn dereference(
        &mut self,
        value: CompiledExpression,
        location: &Location,
    ) -> Lower<CompiledExpression> {
        let pointee = match value.ty.pointee() {
            Some(pointee) if pointee.as_builtin().is_none_or(|b| b.size().is_ok()) => pointee.clone(),
            _ => {
                return self.report(Diagnostic::error(
                    format!("type `{}` cannot be dereferenced", value.ty),
                    location,
                ));
            }
        };
        Ok(CompiledExpression::new(
            ExpressionKind::Dereference(Box::new(value)),
            pointee,
            location.clone(),
        ))
    }
}

fn invalid_operands(op: BinaryOp, left: &GeneralType, right: &GeneralType, location: &Location) -> Diagnostic {
    Diagnostic::error(
        format!("operator `{}` cannot be applied to `{}` and `{}`", op, left, right),
        location,
    )
}
