//! Property tests: executed arithmetic agrees with the host, struct
//! layouts are packed and contiguous.

mod common;

use cinder::compiler::{CompilerSettings, compile};
use cinder::lang::{BinaryOp, Expression, FieldDefinition, ParsedFile, ParsedProgram, Statement, StructDefinition};
use cinder::runtime::ExternalFunctions;
use cinder::types::{GeneralType, TypeArguments};
use proptest::prelude::*;

use common::*;

fn arithmetic_op() -> impl Strategy<Value = BinaryOp> {
    prop_oneof![
        Just(BinaryOp::Add),
        Just(BinaryOp::Sub),
        Just(BinaryOp::Mul),
        Just(BinaryOp::Div),
        Just(BinaryOp::Mod),
        Just(BinaryOp::BitAnd),
        Just(BinaryOp::BitOr),
        Just(BinaryOp::BitXor),
    ]
}

fn comparison_op() -> impl Strategy<Value = BinaryOp> {
    prop_oneof![
        Just(BinaryOp::Eq),
        Just(BinaryOp::NotEq),
        Just(BinaryOp::Lt),
        Just(BinaryOp::LtEq),
        Just(BinaryOp::Gt),
        Just(BinaryOp::GtEq),
    ]
}

fn field_type() -> impl Strategy<Value = (&'static str, u32)> {
    prop_oneof![
        Just(("u8", 1)),
        Just(("i8", 1)),
        Just(("i16", 2)),
        Just(("char", 2)),
        Just(("i32", 4)),
        Just(("f32", 4)),
        Just(("u64", 8)),
    ]
}

fn host_i32(op: BinaryOp, a: i32, b: i32) -> i32 {
    match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => a.wrapping_div(b),
        BinaryOp::Mod => a.wrapping_rem(b),
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        _ => unreachable!("not an arithmetic operator"),
    }
}

fn host_comparison<T: PartialOrd>(op: BinaryOp, a: T, b: T) -> bool {
    match op {
        BinaryOp::Eq => a == b,
        BinaryOp::NotEq => a != b,
        BinaryOp::Lt => a < b,
        BinaryOp::LtEq => a <= b,
        BinaryOp::Gt => a > b,
        BinaryOp::GtEq => a >= b,
        _ => unreachable!("not a comparison"),
    }
}

/// `T a = ..; T b = ..; R r = a op b;` run to completion, returns `r`.
fn evaluate(operand: &str, result: &str, a: i64, b: i64, op: BinaryOp) -> u64 {
    let file = ParsedFile::new("main.cin")
        .statement(Statement::define(ty(operand), "a", Some(int(a))))
        .statement(Statement::define(ty(operand), "b", Some(int(b))))
        .statement(Statement::define(
            ty(result),
            "r",
            Some(Expression::binary(op, ident("a"), ident("b"))),
        ));
    let mut processor = load(file, ExternalFunctions::new());
    processor.run().unwrap();
    processor.read_global("r").unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// i32 arithmetic wraps like the host
    #[test]
    fn i32_arithmetic_matches_host(a in any::<i32>(), b in any::<i32>(), op in arithmetic_op()) {
        prop_assume!(!matches!(op, BinaryOp::Div | BinaryOp::Mod) || b != 0);
        let got = evaluate("i32", "i32", a as i64, b as i64, op);
        prop_assert_eq!(got, host_i32(op, a, b) as u32 as u64);
    }

    /// u8 addition and multiplication wrap at eight bits
    #[test]
    fn u8_arithmetic_wraps(a in any::<u8>(), b in any::<u8>(), multiply in any::<bool>()) {
        let (op, expected) = if multiply {
            (BinaryOp::Mul, a.wrapping_mul(b))
        } else {
            (BinaryOp::Add, a.wrapping_add(b))
        };
        let got = evaluate("u8", "u8", a as i64, b as i64, op);
        prop_assert_eq!(got, expected as u64);
    }

    /// Signed comparisons yield 0 or 1
    #[test]
    fn i32_comparisons_match_host(a in any::<i32>(), b in any::<i32>(), op in comparison_op()) {
        let got = evaluate("i32", "u8", a as i64, b as i64, op);
        prop_assert_eq!(got, host_comparison(op, a, b) as u64);
    }

    /// Unsigned comparisons do not see the sign bit
    #[test]
    fn u32_comparisons_match_host(a in any::<u32>(), b in any::<u32>(), op in comparison_op()) {
        let got = evaluate("u32", "u8", a as i64, b as i64, op);
        prop_assert_eq!(got, host_comparison(op, a, b) as u64);
    }

    /// Field offsets are contiguous and the size is their sum
    #[test]
    fn struct_fields_are_packed(fields in prop::collection::vec(field_type(), 1..8)) {
        let definitions = fields
            .iter()
            .enumerate()
            .map(|(i, (name, _))| FieldDefinition::new(ty(name), format!("f{}", i)))
            .collect();
        let file = ParsedFile::new("main.cin").structure(StructDefinition::new("Record", definitions, loc()));
        let result = compile(&ParsedProgram::single(file), &CompilerSettings::default(), &[]).unwrap();

        let id = result.find_struct("Record").unwrap().id;
        let record = GeneralType::structure(id, "Record", TypeArguments::new());
        let structure = record.as_struct().unwrap();

        let mut expected_offset = 0;
        for (i, (_, size)) in fields.iter().enumerate() {
            let offset = structure.field_offset(&format!("f{}", i), &result).unwrap();
            prop_assert_eq!(offset, expected_offset);
            expected_offset += size;
        }
        prop_assert_eq!(record.size(&result).unwrap(), expected_offset);
        // stable across calls
        prop_assert_eq!(record.size(&result).unwrap(), expected_offset);
    }
}
