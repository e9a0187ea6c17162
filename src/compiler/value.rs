use crate::lang::{BinaryOp, Literal, UnaryOp};
use crate::numeric::{self, ArithmeticError, Comparison, FloatOp, IntegerOp};
use crate::types::{BitWidth, BuiltinType, NumericType};

/// A compile-time scalar: a builtin type plus its raw bit pattern.
///
/// Integers are stored truncated to their width, floats as `f32::to_bits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledValue {
    ty: BuiltinType,
    bits: u64,
}

impl CompiledValue {
    /// Returns `None` for `void`/`any`, which carry no value.
    pub fn from_bits(ty: BuiltinType, bits: u64) -> Option<Self> {
        let width = ty.bit_width().ok()?;
        Some(Self {
            ty,
            bits: width.truncate(bits),
        })
    }

    pub fn integer(value: i64, ty: BuiltinType) -> Option<Self> {
        if !ty.is_integer() {
            return None;
        }
        Self::from_bits(ty, value as u64)
    }

    pub fn float(value: f32) -> Self {
        Self {
            ty: BuiltinType::F32,
            bits: value.to_bits() as u64,
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self {
            ty: BuiltinType::U8,
            bits: value as u64,
        }
    }

    /// Integer literals default to `i32`, widening to `i64` when needed.
    pub fn from_literal(literal: &Literal) -> Self {
        match *literal {
            Literal::Integer(n) if i32::try_from(n).is_ok() => Self {
                ty: BuiltinType::I32,
                bits: BitWidth::W32.truncate(n as u64),
            },
            Literal::Integer(n) => Self {
                ty: BuiltinType::I64,
                bits: n as u64,
            },
            Literal::Float(f) => Self::float(f),
            Literal::Char(c) => Self {
                ty: BuiltinType::Char,
                bits: c as u64,
            },
        }
    }

    pub fn ty(&self) -> BuiltinType {
        self.ty
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    pub fn width(&self) -> BitWidth {
        match self.ty.bit_width() {
            Ok(width) => width,
            Err(_) => BitWidth::W8,
        }
    }

    fn is_float(&self) -> bool {
        self.ty == BuiltinType::F32
    }

    /// The value as a signed integer, honoring the type's signedness.
    pub fn as_i64(&self) -> i64 {
        if self.is_float() {
            self.as_f32() as i64
        } else if self.ty.is_signed() {
            self.width().sign_extend(self.bits)
        } else {
            self.bits as i64
        }
    }

    pub fn as_f32(&self) -> f32 {
        if self.is_float() {
            f32::from_bits(self.bits as u32)
        } else {
            numeric::int_to_float(self.bits, self.width(), self.ty.is_signed())
        }
    }

    pub fn is_truthy(&self) -> bool {
        if self.is_float() {
            self.as_f32() != 0.0
        } else {
            self.bits != 0
        }
    }

    /// True if converting to `to` keeps the value exactly. Integers must
    /// lie in the target range, or be representable as `f32` when `to` is
    /// `f32`. Floats only fit `f32`.
    pub fn fits(&self, to: BuiltinType) -> bool {
        if to == BuiltinType::F32 {
            if self.is_float() {
                return true;
            }
            let exact = if self.ty == BuiltinType::U64 {
                i128::from(self.bits)
            } else {
                i128::from(self.as_i64())
            };
            return (exact as f32) as i128 == exact;
        }
        if self.is_float() || !to.is_integer() {
            return false;
        }
        let Ok(width) = to.bit_width() else {
            return false;
        };
        let value = self.as_i64();
        if self.ty == BuiltinType::U64 && self.bits > i64::MAX as u64 {
            return to == BuiltinType::U64;
        }
        if to.is_signed() {
            let (min, max) = width.signed_range();
            (min..=max).contains(&value)
        } else {
            value >= 0 && (value as u64) <= width.mask()
        }
    }

    /// Explicit numeric conversion.
    ///
    /// Integer to integer truncates or extends by the source signedness.
    /// Float to integer truncates toward zero and saturates.
    pub fn cast(&self, to: BuiltinType) -> Option<CompiledValue> {
        let to_width = to.bit_width().ok()?;
        let from_signed = self.ty.is_signed();
        let bits = match (self.is_float(), to == BuiltinType::F32) {
            (true, true) => self.bits,
            (true, false) => numeric::float_to_int(self.as_f32(), to_width, to.is_signed()),
            (false, true) => numeric::int_to_float(self.bits, self.width(), from_signed).to_bits() as u64,
            (false, false) => numeric::resize(self.bits, self.width(), to_width, from_signed),
        };
        Some(Self { ty: to, bits })
    }

    /// Folds `self op rhs`. Both operands must already share a type.
    ///
    /// Returns `Ok(None)` when the operation does not apply to the type.
    pub fn binary(&self, op: BinaryOp, rhs: &CompiledValue) -> Result<Option<CompiledValue>, ArithmeticError> {
        if self.ty != rhs.ty {
            return Ok(None);
        }
        if let Some(cmp) = comparison(op) {
            let result = if self.is_float() {
                numeric::compare_float(cmp, self.as_f32(), rhs.as_f32())
            } else {
                numeric::compare_integer(cmp, self.bits, rhs.bits, self.width(), self.ty.is_signed())
            };
            return Ok(Some(Self::boolean(result)));
        }
        match op {
            BinaryOp::LogicalAnd => return Ok(Some(Self::boolean(self.is_truthy() && rhs.is_truthy()))),
            BinaryOp::LogicalOr => return Ok(Some(Self::boolean(self.is_truthy() || rhs.is_truthy()))),
            _ => {}
        }
        match self.ty.numeric_type() {
            Some(NumericType::Float) => {
                let Some(op) = float_op(op) else {
                    return Ok(None);
                };
                Ok(Some(Self::float(numeric::float(op, self.as_f32(), rhs.as_f32()))))
            }
            Some(kind) => {
                let Some(op) = integer_op(op) else {
                    return Ok(None);
                };
                let signed = kind == NumericType::SignedInteger;
                let bits = numeric::integer(op, self.bits, rhs.bits, self.width(), signed)?;
                Ok(Some(Self { ty: self.ty, bits }))
            }
            None => Ok(None),
        }
    }

    pub fn unary(&self, op: UnaryOp) -> Option<CompiledValue> {
        match op {
            UnaryOp::Negate if self.is_float() => Some(Self::float(-self.as_f32())),
            UnaryOp::Negate => Some(Self {
                ty: self.ty,
                bits: numeric::negate(self.bits, self.width()),
            }),
            UnaryOp::LogicalNot => Some(Self::boolean(!self.is_truthy())),
            UnaryOp::BitNot if self.is_float() => None,
            UnaryOp::BitNot => Some(Self {
                ty: self.ty,
                bits: self.width().truncate(!self.bits),
            }),
        }
    }
}

impl std::fmt::Display for CompiledValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ty {
            BuiltinType::F32 => write!(f, "{}f", self.as_f32()),
            BuiltinType::Char => match char::from_u32(self.bits as u32) {
                Some(c) => write!(f, "'{}'", c.escape_default()),
                None => write!(f, "'\\u{{{:04x}}}'", self.bits),
            },
            BuiltinType::U64 => write!(f, "{}u64", self.bits),
            ty => write!(f, "{}{}", self.as_i64(), ty),
        }
    }
}

pub(crate) fn comparison(op: BinaryOp) -> Option<Comparison> {
    Some(match op {
        BinaryOp::Eq => Comparison::Eq,
        BinaryOp::NotEq => Comparison::Ne,
        BinaryOp::Lt => Comparison::Lt,
        BinaryOp::LtEq => Comparison::Le,
        BinaryOp::Gt => Comparison::Gt,
        BinaryOp::GtEq => Comparison::Ge,
        _ => return None,
    })
}

pub(crate) fn integer_op(op: BinaryOp) -> Option<IntegerOp> {
    Some(match op {
        BinaryOp::Add => IntegerOp::Add,
        BinaryOp::Sub => IntegerOp::Sub,
        BinaryOp::Mul => IntegerOp::Mul,
        BinaryOp::Div => IntegerOp::Div,
        BinaryOp::Mod => IntegerOp::Mod,
        BinaryOp::BitAnd => IntegerOp::And,
        BinaryOp::BitOr => IntegerOp::Or,
        BinaryOp::BitXor => IntegerOp::Xor,
        BinaryOp::ShiftLeft => IntegerOp::ShiftLeft,
        BinaryOp::ShiftRight => IntegerOp::ShiftRight,
        _ => return None,
    })
}

pub(crate) fn float_op(op: BinaryOp) -> Option<FloatOp> {
    Some(match op {
        BinaryOp::Add => FloatOp::Add,
        BinaryOp::Sub => FloatOp::Sub,
        BinaryOp::Mul => FloatOp::Mul,
        BinaryOp::Div => FloatOp::Div,
        BinaryOp::Mod => FloatOp::Mod,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64) -> CompiledValue {
        CompiledValue::from_literal(&Literal::Integer(n))
    }

    #[test]
    fn test_literal_defaults() {
        assert_eq!(int(5).ty(), BuiltinType::I32);
        assert_eq!(int(1 << 40).ty(), BuiltinType::I64);
        assert_eq!(CompiledValue::from_literal(&Literal::Char(65)).ty(), BuiltinType::Char);
    }

    #[test]
    fn test_fits() {
        assert!(int(255).fits(BuiltinType::U8));
        assert!(!int(256).fits(BuiltinType::U8));
        assert!(!int(-1).fits(BuiltinType::U32));
        assert!(int(-128).fits(BuiltinType::I8));
        assert!(!int(-129).fits(BuiltinType::I8));
        assert!(int(7).fits(BuiltinType::F32));
        assert!(!CompiledValue::float(1.0).fits(BuiltinType::I32));
    }

    #[test]
    fn test_fits_f32_only_when_exact() {
        assert!(int(16_777_216).fits(BuiltinType::F32));
        assert!(!int(16_777_217).fits(BuiltinType::F32));
        assert!(int(-16_777_216).fits(BuiltinType::F32));
        assert!(int(1 << 40).fits(BuiltinType::F32));
        assert!(!int(i64::MAX).fits(BuiltinType::F32));

        let huge = CompiledValue::from_bits(BuiltinType::U64, u64::MAX).unwrap();
        assert!(!huge.fits(BuiltinType::F32));
        let top_bit = CompiledValue::from_bits(BuiltinType::U64, 1 << 63).unwrap();
        assert!(top_bit.fits(BuiltinType::F32));
        assert!(CompiledValue::float(0.1).fits(BuiltinType::F32));
    }

    #[test]
    fn test_cast_matrix() {
        let minus_one = CompiledValue::integer(-1, BuiltinType::I8).unwrap();
        assert_eq!(minus_one.cast(BuiltinType::I32).unwrap().as_i64(), -1);
        assert_eq!(minus_one.cast(BuiltinType::U16).unwrap().bits(), 0xffff);

        let big = CompiledValue::integer(0x1234, BuiltinType::U16).unwrap();
        assert_eq!(big.cast(BuiltinType::U8).unwrap().bits(), 0x34);

        let f = CompiledValue::float(-3.7);
        assert_eq!(f.cast(BuiltinType::I32).unwrap().as_i64(), -3);
        assert_eq!(f.cast(BuiltinType::U8).unwrap().bits(), 0);
        assert_eq!(int(3).cast(BuiltinType::F32).unwrap().as_f32(), 3.0);
        assert!(int(3).cast(BuiltinType::Void).is_none());
    }

    #[test]
    fn test_fold_precedence_result() {
        let product = int(3).binary(BinaryOp::Mul, &int(4)).unwrap().unwrap();
        let sum = int(2).binary(BinaryOp::Add, &product).unwrap().unwrap();
        assert_eq!(sum.as_i64(), 14);
        assert_eq!(sum.ty(), BuiltinType::I32);
    }

    #[test]
    fn test_fold_comparison_is_u8() {
        let r = int(2).binary(BinaryOp::Lt, &int(3)).unwrap().unwrap();
        assert_eq!(r.ty(), BuiltinType::U8);
        assert_eq!(r.bits(), 1);
    }

    #[test]
    fn test_fold_division_by_zero() {
        assert_eq!(
            int(1).binary(BinaryOp::Div, &int(0)),
            Err(ArithmeticError::DivisionByZero)
        );
    }

    #[test]
    fn test_fold_mismatched_types_declines() {
        let byte = CompiledValue::integer(1, BuiltinType::U8).unwrap();
        assert_eq!(int(1).binary(BinaryOp::Add, &byte), Ok(None));
        let f = CompiledValue::float(1.0);
        assert_eq!(f.binary(BinaryOp::BitAnd, &f), Ok(None));
    }

    #[test]
    fn test_unary() {
        assert_eq!(int(5).unary(UnaryOp::Negate).unwrap().as_i64(), -5);
        assert_eq!(int(0).unary(UnaryOp::LogicalNot).unwrap().bits(), 1);
        let byte = CompiledValue::integer(0x0f, BuiltinType::U8).unwrap();
        assert_eq!(byte.unary(UnaryOp::BitNot).unwrap().bits(), 0xf0);
        assert!(CompiledValue::float(1.0).unary(UnaryOp::BitNot).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(int(-4).to_string(), "-4i32");
        assert_eq!(CompiledValue::float(1.5).to_string(), "1.5f");
    }
}
