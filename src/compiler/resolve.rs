//! Type resolution and conversion rules.

use crate::lang::{Location, TypeInstance};
use crate::types::{BuiltinType, GeneralType, TypeArguments};

use super::Compiler;
use super::compile_error::Lower;
use super::diagnostics::Diagnostic;
use super::statement::{CompiledExpression, ConversionKind, ExpressionKind};
use super::value::CompiledValue;

/// How an argument reaches a parameter type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Coercion {
    Exact,
    /// A literal retyped in place.
    Literal(CompiledValue),
    Convert(ConversionKind),
}

impl Coercion {
    /// Overload ranking: lower is better.
    pub fn cost(&self) -> u32 {
        match self {
            Coercion::Exact => 0,
            Coercion::Literal(_) => 1,
            Coercion::Convert(_) => 2,
        }
    }
}

impl Compiler<'_> {
    /// Resolves a written type. Names bound in `arguments` (template
    /// parameters) take precedence over everything else.
    pub(crate) fn resolve_type(
        &mut self,
        ty: &TypeInstance,
        arguments: &TypeArguments,
    ) -> Lower<GeneralType> {
        match ty {
            TypeInstance::Simple {
                name,
                type_arguments,
                location,
            } => {
                if let Some(bound) = arguments.get(name) {
                    if !type_arguments.is_empty() {
                        return self.report(Diagnostic::error(
                            format!("template parameter `{}` takes no type arguments", name),
                            location,
                        ));
                    }
                    return Ok(bound.clone());
                }
                if let Some(builtin) = BuiltinType::from_name(name) {
                    if !type_arguments.is_empty() {
                        return self.report(Diagnostic::error(
                            format!("type `{}` takes no type arguments", name),
                            location,
                        ));
                    }
                    return Ok(GeneralType::Builtin(builtin));
                }
                if let Some(value) = self.aliases.get(name) {
                    return Ok(GeneralType::alias(name.clone(), value.clone()));
                }
                if let Some(&id) = self.struct_names.get(name) {
                    let parameters = self.structs[id.0 as usize].template_parameters.clone();
                    if parameters.len() != type_arguments.len() {
                        return self.report(Diagnostic::error(
                            format!(
                                "struct `{}` expects {} type arguments, got {}",
                                name,
                                parameters.len(),
                                type_arguments.len()
                            ),
                            location,
                        ));
                    }
                    let mut resolved = TypeArguments::new();
                    for (parameter, argument) in parameters.iter().zip(type_arguments) {
                        let argument = self.resolve_type(argument, arguments)?;
                        resolved.insert(parameter.clone(), argument);
                    }
                    return Ok(GeneralType::structure(id, name.clone(), resolved));
                }
                if ty.is_inferred() {
                    return self.report(Diagnostic::invalid_position(
                        "var",
                        "is only allowed in variable definitions with an initial value",
                        location,
                    ));
                }
                self.report(Diagnostic::unresolved_type(name, location))
            }
            TypeInstance::Pointer { to, .. } => {
                Ok(GeneralType::pointer(self.resolve_type(to, arguments)?))
            }
            TypeInstance::StackArray { of, length, .. } => {
                let element = self.resolve_type(of, arguments)?;
                let length = match length {
                    Some(expression) => Some(self.array_length(expression)?),
                    None => None,
                };
                Ok(GeneralType::array(element, length))
            }
            TypeInstance::Function { ret, params, .. } => {
                let return_type = self.resolve_type(ret, arguments)?;
                let mut parameters = Vec::with_capacity(params.len());
                for param in params {
                    parameters.push(self.resolve_type(param, arguments)?);
                }
                Ok(GeneralType::function(return_type, parameters))
            }
        }
    }

    fn array_length(&mut self, expression: &crate::lang::Expression) -> Lower<u32> {
        let compiled = self.compile_expression(expression)?;
        let length = compiled
            .as_literal()
            .filter(|v| v.ty().is_integer())
            .map(CompiledValue::as_i64)
            .and_then(|n| u32::try_from(n).ok());
        match length {
            Some(length) => Ok(length),
            None => self.report(Diagnostic::error(
                "array length must be a non-negative integer constant",
                expression.location(),
            )),
        }
    }

    // =========================================================================
    // Conversions
    // =========================================================================

    /// Finds the implicit conversion from `expression` to `to`, if any.
    ///
    /// Integers widen to strictly larger sizes and to `f32`; any pointer
    /// converts to `any*`; literals adapt to every type that holds them;
    /// the integer literal `0` converts to any pointer.
    pub(crate) fn implicit_coercion(
        &self,
        expression: &CompiledExpression,
        to: &GeneralType,
    ) -> Option<Coercion> {
        let from = &expression.ty;
        if from.strict_eq(to) {
            return Some(Coercion::Exact);
        }
        if let (Some(value), Some(target)) = (expression.as_literal(), to.as_builtin()) {
            if target.numeric_type().is_some() && value.fits(target) {
                return value.cast(target).map(Coercion::Literal);
            }
        }
        match (from.resolved(), to.resolved()) {
            (GeneralType::Builtin(a), GeneralType::Builtin(b)) => implicit_builtin(*a, *b),
            (GeneralType::Pointer(_), GeneralType::Pointer(pointee))
                if pointee.as_builtin() == Some(BuiltinType::Any) =>
            {
                Some(Coercion::Convert(ConversionKind::Reinterpret))
            }
            (GeneralType::Builtin(_), GeneralType::Pointer(_))
                if expression.as_literal().is_some_and(|v| v.ty().is_integer() && v.bits() == 0) =>
            {
                Some(Coercion::Convert(ConversionKind::Resize { signed: false }))
            }
            _ => None,
        }
    }

    /// Converts implicitly or reports a type mismatch.
    pub(crate) fn convert(
        &mut self,
        expression: CompiledExpression,
        to: &GeneralType,
    ) -> Lower<CompiledExpression> {
        match self.implicit_coercion(&expression, to) {
            Some(coercion) => Ok(apply(expression, coercion, to)),
            None => {
                let location = expression.location.clone();
                self.report(Diagnostic::type_mismatch(to, &expression.ty, &location))
            }
        }
    }

    /// `value as T`.
    pub(crate) fn cast(
        &mut self,
        expression: CompiledExpression,
        to: &GeneralType,
        location: &Location,
    ) -> Lower<CompiledExpression> {
        if let (Some(value), Some(target)) = (expression.as_literal(), to.as_builtin()) {
            if let Some(cast) = value.cast(target) {
                return Ok(CompiledExpression::literal(cast, location.clone()));
            }
        }
        if let Some(coercion) = self.implicit_coercion(&expression, to) {
            return Ok(apply(expression, coercion, to));
        }
        match explicit_conversion(&expression.ty, to, self.settings.pointer_size) {
            Some(kind) => Ok(wrap(expression, kind, to)),
            None => self.report(Diagnostic::error(
                format!("cannot cast `{}` to `{}`", expression.ty, to),
                location,
            )),
        }
    }

    /// Unconditional integer resize used for shift counts and pointer
    /// offsets, where narrowing is intended.
    pub(crate) fn coerce_integer(
        &mut self,
        expression: CompiledExpression,
        to: &GeneralType,
    ) -> Lower<CompiledExpression> {
        if expression.ty.strict_eq(to) {
            return Ok(expression);
        }
        let signed = expression.ty.as_builtin().is_some_and(BuiltinType::is_signed);
        match expression.ty.as_builtin() {
            Some(builtin) if builtin.is_integer() => {
                if let (Some(value), Some(target)) = (expression.as_literal(), to.as_builtin()) {
                    if let Some(cast) = value.cast(target) {
                        return Ok(CompiledExpression::literal(cast, expression.location.clone()));
                    }
                }
                Ok(wrap(expression, ConversionKind::Resize { signed }, to))
            }
            _ => {
                let location = expression.location.clone();
                self.report(Diagnostic::type_mismatch("integer", &expression.ty, &location))
            }
        }
    }

    /// The common operand type of a numeric binary operator: a literal
    /// takes the other side's type if it fits, `f32` wins over integers,
    /// then the larger size, then signed over unsigned.
    pub(crate) fn binary_operand_type(
        &self,
        left: &CompiledExpression,
        right: &CompiledExpression,
    ) -> Option<GeneralType> {
        let a = left.ty.as_builtin().filter(|b| b.numeric_type().is_some())?;
        let b = right.ty.as_builtin().filter(|b| b.numeric_type().is_some())?;
        match (left.as_literal(), right.as_literal()) {
            (Some(value), None) if value.fits(b) => return Some(right.ty.clone()),
            (None, Some(value)) if value.fits(a) => return Some(left.ty.clone()),
            _ => {}
        }
        if a == b {
            return Some(left.ty.clone());
        }
        if a == BuiltinType::F32 || b == BuiltinType::F32 {
            return Some(GeneralType::F32);
        }
        let (size_a, size_b) = (a.size().ok()?, b.size().ok()?);
        let winner = if size_a != size_b {
            if size_a > size_b { left } else { right }
        } else if b.is_signed() && !a.is_signed() {
            right
        } else {
            left
        };
        Some(winner.ty.clone())
    }
}

fn implicit_builtin(from: BuiltinType, to: BuiltinType) -> Option<Coercion> {
    if from == to {
        return Some(Coercion::Exact);
    }
    if from.is_integer() && to == BuiltinType::F32 {
        return Some(Coercion::Convert(ConversionKind::IntToFloat {
            signed: from.is_signed(),
        }));
    }
    if !from.is_integer() || !to.is_integer() {
        return None;
    }
    let (from_size, to_size) = (from.size().ok()?, to.size().ok()?);
    if to_size > from_size {
        Some(Coercion::Convert(ConversionKind::Resize {
            signed: from.is_signed(),
        }))
    } else if to_size == from_size && !from.is_signed() && !to.is_signed() {
        // char and u16 share a representation
        Some(Coercion::Convert(ConversionKind::Reinterpret))
    } else {
        None
    }
}

fn explicit_conversion(from: &GeneralType, to: &GeneralType, pointer_size: u32) -> Option<ConversionKind> {
    let pointer_like = |ty: &GeneralType| {
        matches!(ty.resolved(), GeneralType::Pointer(_) | GeneralType::Function(_))
    };
    match (from.as_builtin(), to.as_builtin()) {
        (Some(a), Some(b)) if a.numeric_type().is_some() && b.numeric_type().is_some() => {
            Some(match (a == BuiltinType::F32, b == BuiltinType::F32) {
                (true, true) => ConversionKind::Reinterpret,
                (true, false) => ConversionKind::FloatToInt { signed: b.is_signed() },
                (false, true) => ConversionKind::IntToFloat { signed: a.is_signed() },
                (false, false) if a.size().ok() == b.size().ok() => ConversionKind::Reinterpret,
                (false, false) => ConversionKind::Resize { signed: a.is_signed() },
            })
        }
        (None, None) if pointer_like(from) && pointer_like(to) => Some(ConversionKind::Reinterpret),
        (Some(a), None) if a.is_integer() && pointer_like(to) => {
            if a.size().ok() == Some(pointer_size) {
                Some(ConversionKind::Reinterpret)
            } else {
                Some(ConversionKind::Resize { signed: a.is_signed() })
            }
        }
        (None, Some(b)) if b.is_integer() && pointer_like(from) => {
            if b.size().ok() == Some(pointer_size) {
                Some(ConversionKind::Reinterpret)
            } else {
                Some(ConversionKind::Resize { signed: false })
            }
        }
        _ => None,
    }
}

fn wrap(expression: CompiledExpression, kind: ConversionKind, to: &GeneralType) -> CompiledExpression {
    let location = expression.location.clone();
    CompiledExpression::new(
        ExpressionKind::Conversion {
            kind,
            value: Box::new(expression),
        },
        to.clone(),
        location,
    )
}

pub(crate) fn apply(expression: CompiledExpression, coercion: Coercion, to: &GeneralType) -> CompiledExpression {
    match coercion {
        Coercion::Exact => CompiledExpression {
            ty: to.clone(),
            ..expression
        },
        Coercion::Literal(value) => CompiledExpression::literal(value, expression.location),
        Coercion::Convert(kind) => wrap(expression, kind, to),
    }
}
