//! Whole programs built from syntax trees, compiled, generated and run.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use cinder::bytecode::ExternalFunctionInfo;
use cinder::lang::{
    BinaryOp, ConstantDefinition, ConstructorDefinition, Expression, FieldDefinition,
    FunctionDefinition, Parameter, ParsedFile, Statement, StructDefinition, TypeInstance, UnaryOp,
};
use cinder::runtime::{ExternalError, ExternalFunctions, PendingCall, RuntimeErrorKind, TickOutcome};

use common::*;

fn print_i32() -> FunctionDefinition {
    FunctionDefinition::external("print", "print_i32", ty("void"), vec![Parameter::new(ty("i32"), "value")])
}

fn fib() -> FunctionDefinition {
    // i32 fib(i32 n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }
    let n = || ident("n");
    FunctionDefinition::new(
        "fib",
        ty("i32"),
        vec![Parameter::new(ty("i32"), "n")],
        block(vec![
            Statement::If {
                condition: Expression::binary(BinaryOp::Lt, n(), int(2)),
                body: block(vec![Statement::Return(Some(n()), loc())]),
                else_branch: None,
                location: loc(),
            },
            Statement::Return(
                Some(Expression::binary(
                    BinaryOp::Add,
                    call("fib", vec![Expression::binary(BinaryOp::Sub, n(), int(1))]),
                    call("fib", vec![Expression::binary(BinaryOp::Sub, n(), int(2))]),
                )),
                loc(),
            ),
        ]),
    )
}

#[test]
fn test_folded_global() {
    let value = Expression::binary(
        BinaryOp::Add,
        int(2),
        Expression::binary(BinaryOp::Mul, int(3), int(4)),
    );
    let file = ParsedFile::new("main.cin").statement(Statement::define(ty("i32"), "x", Some(value)));
    let mut processor = load(file, ExternalFunctions::new());

    let result = processor.run().unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(processor.read_global("x"), Some(14));
}

#[test]
fn test_fib_keeps_stack_balanced() {
    let file = ParsedFile::new("main.cin")
        .function(fib())
        .statement(Statement::define(ty("i32"), "result", Some(call("fib", vec![int(10)]))));
    let mut processor = load(file, ExternalFunctions::new());

    processor.run().unwrap();
    assert_eq!(processor.read_global("result"), Some(55));
    // only the main frame is left
    assert_eq!(processor.stack_pointer(), small_layout().stack_top() - 4);
}

#[test]
fn test_while_loop_output() {
    // i32 n = 5; while (n > 0) { print(n); n -= 1; }
    let file = ParsedFile::new("main.cin")
        .function(print_i32())
        .statement(Statement::define(ty("i32"), "n", Some(int(5))))
        .statement(Statement::While {
            condition: Expression::binary(BinaryOp::Gt, ident("n"), int(0)),
            body: block(vec![
                Statement::Expression(call("print", vec![ident("n")])),
                Statement::compound(ident("n"), BinaryOp::Sub, int(1)),
            ]),
            location: loc(),
        });
    let (mut processor, out) = load_with_output(file);

    processor.run().unwrap();
    assert_eq!(output(&out), "5\n4\n3\n2\n1\n");
    assert_eq!(processor.read_global("n"), Some(0));
}

#[test]
fn test_for_loop_with_break() {
    // i32 total = 0; for (i32 i = 0; i < 100; i += 1) { if (i == 4) break; total += i; }
    let file = ParsedFile::new("main.cin")
        .statement(Statement::define(ty("i32"), "total", Some(int(0))))
        .statement(Statement::For {
            init: Some(Box::new(Statement::define(ty("i32"), "i", Some(int(0))))),
            condition: Some(Expression::binary(BinaryOp::Lt, ident("i"), int(100))),
            step: Some(Box::new(Statement::compound(ident("i"), BinaryOp::Add, int(1)))),
            body: block(vec![
                Statement::If {
                    condition: Expression::binary(BinaryOp::Eq, ident("i"), int(4)),
                    body: block(vec![Statement::Break(loc())]),
                    else_branch: None,
                    location: loc(),
                },
                Statement::compound(ident("total"), BinaryOp::Add, ident("i")),
            ]),
            location: loc(),
        });
    let mut processor = load(file, ExternalFunctions::new());

    processor.run().unwrap();
    assert_eq!(processor.read_global("total"), Some(6));
}

#[test]
fn test_array_index_out_of_range() {
    // i32[3] arr; i32 i = 5; arr[i] = 7;
    let file = ParsedFile::new("main.cin")
        .statement(Statement::define(TypeInstance::array(ty("i32"), Some(int(3))), "arr", None))
        .statement(Statement::define(ty("i32"), "i", Some(int(5))))
        .statement(Statement::assign(
            Expression::index(Expression::ident("arr", at(3, 5)), ident("i")),
            int(7),
        ));
    let mut processor = load(file, ExternalFunctions::new());

    let err = processor.run().unwrap_err();
    assert_eq!(err.kind, RuntimeErrorKind::IndexOutOfRange { index: 5, length: 3 });
    let text = err.describe(&processor.program().debug);
    assert!(text.contains("main.cin:3:5"), "got: {}", text);
}

#[test]
fn test_crash_is_a_user_fault() {
    let file = ParsedFile::new("main.cin").statement(Statement::Crash(int(42), loc()));
    let mut processor = load(file, ExternalFunctions::new());

    let err = processor.run().unwrap_err();
    assert!(err.is_user_crash());
    assert_eq!(err.kind, RuntimeErrorKind::UserCrash(42));
}

#[test]
fn test_division_by_zero_faults() {
    let file = ParsedFile::new("main.cin")
        .statement(Statement::define(ty("i32"), "zero", Some(int(0))))
        .statement(Statement::define(
            ty("i32"),
            "x",
            Some(Expression::binary(BinaryOp::Div, int(1), ident("zero"))),
        ));
    let mut processor = load(file, ExternalFunctions::new());

    let err = processor.run().unwrap_err();
    assert_eq!(err.kind, RuntimeErrorKind::DivisionByZero);
}

#[test]
fn test_external_round_trip() {
    // u8 is_even(i32 v), parameters 4 bytes, return 1 byte
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut externals = ExternalFunctions::new();
    let log = seen.clone();
    externals.register_sync(ExternalFunctionInfo::new(10, "is_even", 4, 1), move |args, ret| {
        let value = i32::from_le_bytes([args[0], args[1], args[2], args[3]]);
        log.borrow_mut().push(value);
        ret[0] = (value % 2 == 0) as u8;
        Ok(())
    });

    let file = ParsedFile::new("main.cin")
        .function(FunctionDefinition::external(
            "is_even",
            "is_even",
            ty("u8"),
            vec![Parameter::new(ty("i32"), "value")],
        ))
        .statement(Statement::define(ty("i32"), "guard", Some(int(0x1234_5678))))
        .statement(Statement::define(ty("u8"), "a", Some(call("is_even", vec![int(1_000_000)]))))
        .statement(Statement::define(ty("u8"), "b", Some(call("is_even", vec![int(-7)]))))
        .statement(Statement::define(ty("i32"), "after", Some(int(-1))));
    let mut processor = load(file, externals);

    processor.run().unwrap();
    assert_eq!(*seen.borrow(), vec![1_000_000, -7]);
    assert_eq!(processor.read_global("a"), Some(1));
    assert_eq!(processor.read_global("b"), Some(0));
    assert_eq!(processor.read_global("guard"), Some(0x1234_5678));
    assert_eq!(processor.read_global("after"), Some(0xFFFF_FFFF));
}

struct Countdown {
    polls_left: u32,
    value: i32,
}

impl PendingCall for Countdown {
    fn poll(&mut self) -> Result<Option<Vec<u8>>, ExternalError> {
        if self.polls_left == 0 {
            return Ok(Some(self.value.to_le_bytes().to_vec()));
        }
        self.polls_left -= 1;
        Ok(None)
    }
}

#[test]
fn test_async_external_suspends_the_processor() {
    let mut externals = ExternalFunctions::new();
    externals.register_async(ExternalFunctionInfo::new(3, "read_value", 0, 4), |_| {
        Ok(Box::new(Countdown {
            polls_left: 2,
            value: 99,
        }) as Box<dyn PendingCall>)
    });
    let file = ParsedFile::new("main.cin")
        .function(FunctionDefinition::external("read_value", "read_value", ty("i32"), Vec::new()))
        .statement(Statement::define(ty("i32"), "v", Some(call("read_value", Vec::new()))));
    let mut processor = load(file, externals);

    let mut waits = 0;
    let exit_code = loop {
        match processor.tick().unwrap() {
            TickOutcome::Continue => {}
            TickOutcome::Waiting => waits += 1,
            TickOutcome::Exited(code) => break code,
        }
    };
    assert_eq!(exit_code, 0);
    assert!(waits >= 2, "expected the call to wait, waited {} times", waits);
    assert_eq!(processor.read_global("v"), Some(99));
}

#[test]
fn test_heap_allocation_and_delete() {
    // i32* p = new i32; *p = 21; i32 doubled = *p * 2; delete p;
    let file = ParsedFile::new("main.cin")
        .statement(Statement::define(
            TypeInstance::pointer(ty("i32")),
            "p",
            Some(Expression::New {
                ty: ty("i32"),
                args: None,
                location: loc(),
            }),
        ))
        .statement(Statement::assign(Expression::deref(ident("p")), int(21)))
        .statement(Statement::define(
            ty("i32"),
            "doubled",
            Some(Expression::binary(BinaryOp::Mul, Expression::deref(ident("p")), int(2))),
        ))
        .statement(Statement::Delete(ident("p"), loc()));
    let mut processor = load(file, ExternalFunctions::new());

    let result = processor.run().unwrap();
    assert_eq!(processor.read_global("doubled"), Some(42));
    assert!(result.heap.is_clean());
}

#[test]
fn test_leaked_allocation_is_reported() {
    let file = ParsedFile::new("main.cin").statement(Statement::define(
        TypeInstance::pointer(ty("i32")),
        "p",
        Some(Expression::New {
            ty: ty("i32"),
            args: None,
            location: loc(),
        }),
    ));
    let mut processor = load(file, ExternalFunctions::new());

    let result = processor.run().unwrap();
    assert_eq!(result.heap.used_blocks().count(), 1);
}

#[test]
fn test_struct_fields_through_pointer() {
    // struct Point { i32 x; i32 y; }  Point pt; pt.x = 3; pt.y = 4; Point* q = &pt; i32 sum = (*q).x + (*q).y;
    let point = StructDefinition::new(
        "Point",
        vec![FieldDefinition::new(ty("i32"), "x"), FieldDefinition::new(ty("i32"), "y")],
        loc(),
    );
    let q = || Expression::deref(ident("q"));
    let file = ParsedFile::new("main.cin")
        .structure(point)
        .statement(Statement::define(ty("Point"), "pt", None))
        .statement(Statement::assign(Expression::field(ident("pt"), "x"), int(3)))
        .statement(Statement::assign(Expression::field(ident("pt"), "y"), int(4)))
        .statement(Statement::define(
            TypeInstance::pointer(ty("Point")),
            "q",
            Some(Expression::address_of(ident("pt"))),
        ))
        .statement(Statement::define(
            ty("i32"),
            "sum",
            Some(Expression::binary(
                BinaryOp::Add,
                Expression::field(q(), "x"),
                Expression::field(q(), "y"),
            )),
        ));
    let mut processor = load(file, ExternalFunctions::new());

    processor.run().unwrap();
    assert_eq!(processor.read_global("sum"), Some(7));
}

#[test]
fn test_generic_pair_layouts() {
    let pair = StructDefinition::new(
        "Pair",
        vec![FieldDefinition::new(ty("T"), "a"), FieldDefinition::new(ty("T"), "b")],
        loc(),
    )
    .with_template(&["T"]);
    let file = ParsedFile::new("main.cin")
        .structure(pair)
        .statement(Statement::define(TypeInstance::generic("Pair", vec![ty("i32")], loc()), "wide", None))
        .statement(Statement::define(TypeInstance::generic("Pair", vec![ty("char")], loc()), "narrow", None));
    let processor = load(file, ExternalFunctions::new());

    let globals = &processor.program().debug.globals;
    let size = |name: &str| globals.iter().find(|g| g.name == name).unwrap().size;
    assert_eq!(size("wide"), 8);
    assert_eq!(size("narrow"), 4);
}

#[test]
fn test_step_limit_stops_infinite_loop() {
    let file = ParsedFile::new("main.cin").statement(Statement::While {
        condition: int(1),
        body: block(Vec::new()),
        location: loc(),
    });
    let mut processor = load(file, ExternalFunctions::new());

    let err = processor.run().unwrap_err();
    assert!(matches!(err.kind, RuntimeErrorKind::StepLimitExceeded(_)));
}

fn this_field(name: &str) -> Expression {
    Expression::field(Expression::deref(ident("this")), name)
}

fn counter() -> StructDefinition {
    // struct Counter { i32 value; Counter(i32 start) { this.value = start; } ~ { destroyed += 1; } i32 get() }
    let mut counter = StructDefinition::new("Counter", vec![FieldDefinition::new(ty("i32"), "value")], loc());
    counter.constructors.push(ConstructorDefinition {
        parameters: vec![Parameter::new(ty("i32"), "start")],
        body: block(vec![Statement::assign(this_field("value"), ident("start"))]),
        location: loc(),
    });
    counter.destructor = Some(block(vec![Statement::compound(
        ident("destroyed"),
        BinaryOp::Add,
        int(1),
    )]));
    counter.methods.push(FunctionDefinition::new(
        "get",
        ty("i32"),
        Vec::new(),
        block(vec![Statement::Return(Some(this_field("value")), loc())]),
    ));
    counter
}

fn temp_counter(name: &str, start: i64) -> Statement {
    Statement::VariableDefinition {
        temp: true,
        ty: TypeInstance::pointer(ty("Counter")),
        name: name.to_string(),
        initial: Some(Expression::New {
            ty: ty("Counter"),
            args: Some(vec![int(start)]),
            location: loc(),
        }),
        location: loc(),
    }
}

#[test]
fn test_temp_runs_destructor_and_frees() {
    // { temp Counter* c = new Counter(7); seen = c.get(); }
    let scoped = Statement::Block(block(vec![
        temp_counter("c", 7),
        Statement::assign(
            ident("seen"),
            Expression::method(Expression::deref(ident("c")), "get", Vec::new()),
        ),
    ]));
    let file = ParsedFile::new("main.cin")
        .structure(counter())
        .statement(Statement::define(ty("i32"), "destroyed", Some(int(0))))
        .statement(Statement::define(ty("i32"), "seen", Some(int(0))))
        .statement(scoped);
    let mut processor = load(file, ExternalFunctions::new());

    let result = processor.run().unwrap();
    assert_eq!(processor.read_global("seen"), Some(7));
    assert_eq!(processor.read_global("destroyed"), Some(1));
    assert!(result.heap.is_clean());
}

#[test]
fn test_function_pointer_call() {
    // i32 twice(i32 v) { return v * 2; }  i32(i32) f = twice; i32 r = f(21);
    let twice = FunctionDefinition::new(
        "twice",
        ty("i32"),
        vec![Parameter::new(ty("i32"), "v")],
        block(vec![Statement::Return(
            Some(Expression::binary(BinaryOp::Mul, ident("v"), int(2))),
            loc(),
        )]),
    );
    let file = ParsedFile::new("main.cin")
        .function(twice)
        .statement(Statement::define(
            TypeInstance::function(ty("i32"), vec![ty("i32")]),
            "f",
            Some(ident("twice")),
        ))
        .statement(Statement::define(ty("i32"), "r", Some(call("f", vec![int(21)]))));
    let mut processor = load(file, ExternalFunctions::new());

    processor.run().unwrap();
    assert_eq!(processor.read_global("r"), Some(42));
}

#[test]
fn test_constant_inlined() {
    let file = ParsedFile::new("main.cin")
        .constant(ConstantDefinition {
            name: "LIMIT".to_string(),
            ty: ty("i32"),
            value: int(3),
            location: loc(),
        })
        .statement(Statement::define(
            ty("i32"),
            "x",
            Some(Expression::binary(BinaryOp::Mul, ident("LIMIT"), int(2))),
        ));
    let mut processor = load(file, ExternalFunctions::new());

    processor.run().unwrap();
    assert_eq!(processor.read_global("x"), Some(6));
}

#[test]
fn test_else_if_chain_picks_one_branch() {
    // i32 classify(i32 x) { i32 r = 0; if (x < 0) r = 1; else if (x < 10) r = 2; else r = 3; return r; }
    let x = || ident("x");
    let set = |value: i64| block(vec![Statement::assign(ident("r"), int(value))]);
    let chain = Statement::If {
        condition: Expression::binary(BinaryOp::Lt, x(), int(0)),
        body: set(1),
        else_branch: Some(Box::new(Statement::If {
            condition: Expression::binary(BinaryOp::Lt, x(), int(10)),
            body: set(2),
            else_branch: Some(Box::new(Statement::Block(set(3)))),
            location: loc(),
        })),
        location: loc(),
    };
    let classify = FunctionDefinition::new(
        "classify",
        ty("i32"),
        vec![Parameter::new(ty("i32"), "x")],
        block(vec![
            Statement::define(ty("i32"), "r", Some(int(0))),
            chain,
            Statement::Return(Some(ident("r")), loc()),
        ]),
    );
    let file = ParsedFile::new("main.cin")
        .function(classify)
        .statement(Statement::define(ty("i32"), "negative", Some(call("classify", vec![int(-4)]))))
        .statement(Statement::define(ty("i32"), "small", Some(call("classify", vec![int(5)]))))
        .statement(Statement::define(ty("i32"), "large", Some(call("classify", vec![int(50)]))));
    let mut processor = load(file, ExternalFunctions::new());

    processor.run().unwrap();
    assert_eq!(processor.read_global("negative"), Some(1));
    assert_eq!(processor.read_global("small"), Some(2));
    assert_eq!(processor.read_global("large"), Some(3));
}

#[test]
fn test_backward_goto_loops() {
    // i32 count = 0; again: count += 1; if (count < 5) goto again;
    let file = ParsedFile::new("main.cin")
        .statement(Statement::define(ty("i32"), "count", Some(int(0))))
        .statement(Statement::Label("again".to_string(), loc()))
        .statement(Statement::compound(ident("count"), BinaryOp::Add, int(1)))
        .statement(Statement::If {
            condition: Expression::binary(BinaryOp::Lt, ident("count"), int(5)),
            body: block(vec![Statement::Goto("again".to_string(), loc())]),
            else_branch: None,
            location: loc(),
        });
    let mut processor = load(file, ExternalFunctions::new());

    processor.run().unwrap();
    assert_eq!(processor.read_global("count"), Some(5));
}

#[test]
fn test_goto_out_of_block_runs_cleanups() {
    // { temp Counter* c = new Counter(3); seen = c.get(); goto done; seen = 99; } skipped = 1; done:
    let scoped = Statement::Block(block(vec![
        temp_counter("c", 3),
        Statement::assign(
            ident("seen"),
            Expression::method(Expression::deref(ident("c")), "get", Vec::new()),
        ),
        Statement::Goto("done".to_string(), loc()),
        Statement::assign(ident("seen"), int(99)),
    ]));
    let file = ParsedFile::new("main.cin")
        .structure(counter())
        .statement(Statement::define(ty("i32"), "destroyed", Some(int(0))))
        .statement(Statement::define(ty("i32"), "seen", Some(int(0))))
        .statement(Statement::define(ty("i32"), "skipped", Some(int(0))))
        .statement(scoped)
        .statement(Statement::assign(ident("skipped"), int(1)))
        .statement(Statement::Label("done".to_string(), loc()));
    let mut processor = load(file, ExternalFunctions::new());

    let result = processor.run().unwrap();
    assert_eq!(processor.read_global("seen"), Some(3));
    assert_eq!(processor.read_global("skipped"), Some(0));
    assert_eq!(processor.read_global("destroyed"), Some(1));
    assert!(result.heap.is_clean());
}

#[test]
fn test_pointer_compares_signed() {
    // i32* p = (i32*)(-8); i32 r = 0; if (p < 0) r = 1;
    let file = ParsedFile::new("main.cin")
        .statement(Statement::define(
            TypeInstance::pointer(ty("i32")),
            "p",
            Some(Expression::cast(
                Expression::unary(UnaryOp::Negate, int(8)),
                TypeInstance::pointer(ty("i32")),
            )),
        ))
        .statement(Statement::define(ty("i32"), "r", Some(int(0))))
        .statement(Statement::If {
            condition: Expression::binary(BinaryOp::Lt, ident("p"), int(0)),
            body: block(vec![Statement::assign(ident("r"), int(1))]),
            else_branch: None,
            location: loc(),
        });
    let mut processor = load(file, ExternalFunctions::new());

    processor.run().unwrap();
    assert_eq!(processor.read_global("r"), Some(1));
}
