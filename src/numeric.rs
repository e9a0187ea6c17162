//! Scalar arithmetic shared by the constant folder and the processor.
//!
//! Values travel as raw `u64` bit patterns plus a [`BitWidth`]; signedness
//! is a property of the operation, not of the value. Integer results wrap
//! at the operand width. Shift amounts are taken modulo the width.

use thiserror::Error;

use crate::types::BitWidth;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArithmeticError {
    #[error("division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegerOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    ShiftLeft,
    ShiftRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

pub fn integer(
    op: IntegerOp,
    a: u64,
    b: u64,
    width: BitWidth,
    signed: bool,
) -> Result<u64, ArithmeticError> {
    let a = width.truncate(a);
    let b = width.truncate(b);
    let raw = match op {
        IntegerOp::Add => a.wrapping_add(b),
        IntegerOp::Sub => a.wrapping_sub(b),
        IntegerOp::Mul => a.wrapping_mul(b),
        IntegerOp::Div | IntegerOp::Mod => {
            if b == 0 {
                return Err(ArithmeticError::DivisionByZero);
            }
            if signed {
                let (sa, sb) = (width.sign_extend(a), width.sign_extend(b));
                let r = if op == IntegerOp::Div {
                    sa.wrapping_div(sb)
                } else {
                    sa.wrapping_rem(sb)
                };
                r as u64
            } else if op == IntegerOp::Div {
                a / b
            } else {
                a % b
            }
        }
        IntegerOp::And => a & b,
        IntegerOp::Or => a | b,
        IntegerOp::Xor => a ^ b,
        IntegerOp::ShiftLeft => a << (b % width.bits() as u64),
        IntegerOp::ShiftRight => {
            let amount = (b % width.bits() as u64) as u32;
            if signed {
                (width.sign_extend(a) >> amount) as u64
            } else {
                a >> amount
            }
        }
    };
    Ok(width.truncate(raw))
}

pub fn float(op: FloatOp, a: f32, b: f32) -> f32 {
    match op {
        FloatOp::Add => a + b,
        FloatOp::Sub => a - b,
        FloatOp::Mul => a * b,
        FloatOp::Div => a / b,
        FloatOp::Mod => a % b,
    }
}

pub fn compare_integer(cmp: Comparison, a: u64, b: u64, width: BitWidth, signed: bool) -> bool {
    if signed {
        compare(cmp, width.sign_extend(a), width.sign_extend(b))
    } else {
        compare(cmp, width.truncate(a), width.truncate(b))
    }
}

pub fn compare_float(cmp: Comparison, a: f32, b: f32) -> bool {
    match cmp {
        Comparison::Eq => a == b,
        Comparison::Ne => a != b,
        Comparison::Lt => a < b,
        Comparison::Le => a <= b,
        Comparison::Gt => a > b,
        Comparison::Ge => a >= b,
    }
}

fn compare<T: PartialOrd>(cmp: Comparison, a: T, b: T) -> bool {
    match cmp {
        Comparison::Eq => a == b,
        Comparison::Ne => a != b,
        Comparison::Lt => a < b,
        Comparison::Le => a <= b,
        Comparison::Gt => a > b,
        Comparison::Ge => a >= b,
    }
}

pub fn negate(a: u64, width: BitWidth) -> u64 {
    width.truncate(a.wrapping_neg())
}

/// Widens or narrows an integer. Widening sign-extends when `signed`.
pub fn resize(raw: u64, from: BitWidth, to: BitWidth, signed: bool) -> u64 {
    let value = if signed {
        from.sign_extend(raw) as u64
    } else {
        from.truncate(raw)
    };
    to.truncate(value)
}

pub fn int_to_float(raw: u64, from: BitWidth, signed: bool) -> f32 {
    if signed {
        from.sign_extend(raw) as f32
    } else {
        from.truncate(raw) as f32
    }
}

/// Truncates toward zero and saturates at the target range. NaN becomes 0.
pub fn float_to_int(value: f32, to: BitWidth, signed: bool) -> u64 {
    if signed {
        let (min, max) = to.signed_range();
        to.truncate((value as i64).clamp(min, max) as u64)
    } else {
        (value as u64).min(to.mask())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_wraps_at_width() {
        assert_eq!(integer(IntegerOp::Add, 0xff, 1, BitWidth::W8, false).unwrap(), 0);
        assert_eq!(
            integer(IntegerOp::Add, i32::MAX as u64, 1, BitWidth::W32, true).unwrap(),
            i32::MIN as u32 as u64
        );
    }

    #[test]
    fn test_signed_division() {
        let minus_seven = (-7i32) as u32 as u64;
        let r = integer(IntegerOp::Div, minus_seven, 2, BitWidth::W32, true).unwrap();
        assert_eq!(BitWidth::W32.sign_extend(r), -3);
        let m = integer(IntegerOp::Mod, minus_seven, 2, BitWidth::W32, true).unwrap();
        assert_eq!(BitWidth::W32.sign_extend(m), -1);
    }

    #[test]
    fn test_min_over_minus_one_wraps() {
        let r = integer(IntegerOp::Div, 0x80, 0xff, BitWidth::W8, true).unwrap();
        assert_eq!(r, 0x80);
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(
            integer(IntegerOp::Div, 1, 0, BitWidth::W16, false),
            Err(ArithmeticError::DivisionByZero)
        );
        assert_eq!(
            integer(IntegerOp::Mod, 1, 0x100, BitWidth::W8, true),
            Err(ArithmeticError::DivisionByZero)
        );
    }

    #[test]
    fn test_shifts() {
        assert_eq!(integer(IntegerOp::ShiftLeft, 1, 9, BitWidth::W8, false).unwrap(), 2);
        assert_eq!(integer(IntegerOp::ShiftRight, 0x80, 7, BitWidth::W8, true).unwrap(), 0xff);
        assert_eq!(integer(IntegerOp::ShiftRight, 0x80, 7, BitWidth::W8, false).unwrap(), 1);
    }

    #[test]
    fn test_unsigned_compare_differs_from_signed() {
        assert!(compare_integer(Comparison::Lt, 0xff, 1, BitWidth::W8, true));
        assert!(!compare_integer(Comparison::Lt, 0xff, 1, BitWidth::W8, false));
    }

    #[test]
    fn test_resize() {
        assert_eq!(resize(0xff, BitWidth::W8, BitWidth::W32, true), 0xffff_ffff);
        assert_eq!(resize(0xff, BitWidth::W8, BitWidth::W32, false), 0xff);
        assert_eq!(resize(0x1234, BitWidth::W16, BitWidth::W8, false), 0x34);
    }

    #[test]
    fn test_float_to_int_saturates() {
        assert_eq!(float_to_int(300.7, BitWidth::W8, false), 255);
        assert_eq!(float_to_int(-5.0, BitWidth::W8, false), 0);
        assert_eq!(BitWidth::W8.sign_extend(float_to_int(-200.0, BitWidth::W8, true)), -128);
        assert_eq!(float_to_int(-2.9, BitWidth::W32, true), (-2i32) as u32 as u64);
        assert_eq!(float_to_int(f32::NAN, BitWidth::W32, true), 0);
    }
}
