//! The typed IR produced by the compiler.
//!
//! Every value-producing node carries its resolved [`GeneralType`], every
//! identifier is replaced by an arena id, and every implicit conversion is
//! an explicit [`ExpressionKind::Conversion`] node.

use crate::lang::{BinaryOp, Location, UnaryOp};
use crate::types::GeneralType;

use super::entities::{FunctionId, LabelId, VariableId};
use super::value::CompiledValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionKind {
    /// Integer (or pointer) width change; `signed` picks sign extension.
    Resize { signed: bool },
    IntToFloat { signed: bool },
    FloatToInt { signed: bool },
    /// Same bits, new type: pointer casts and same-width integers.
    Reinterpret,
}

#[derive(Debug, Clone)]
pub struct CompiledExpression {
    pub kind: ExpressionKind,
    pub ty: GeneralType,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub enum ExpressionKind {
    // ───────────────────────────── Atoms ─────────────────────────────
    Literal(CompiledValue),
    Variable(VariableId),
    /// Index into the current function's parameter list.
    Parameter(usize),
    FunctionAddress(FunctionId),

    // ─────────────────────────── Operators ───────────────────────────
    /// Both operands share one type; comparisons yield `u8`.
    Binary {
        op: BinaryOp,
        left: Box<CompiledExpression>,
        right: Box<CompiledExpression>,
    },
    /// Short-circuit `&&` / `||`.
    Logical {
        op: BinaryOp,
        left: Box<CompiledExpression>,
        right: Box<CompiledExpression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<CompiledExpression>,
    },
    Conversion {
        kind: ConversionKind,
        value: Box<CompiledExpression>,
    },

    // ───────────────────────────── Calls ─────────────────────────────
    /// Direct call, including externals and bound methods.
    Call {
        function: FunctionId,
        args: Vec<CompiledExpression>,
    },
    CallIndirect {
        callee: Box<CompiledExpression>,
        args: Vec<CompiledExpression>,
    },
    /// `new T(args)`: allocate `size_of(T)`, then run the constructor on
    /// the new pointer. `args` exclude `this`.
    Construct {
        constructor: FunctionId,
        args: Vec<CompiledExpression>,
    },
    /// `new T`: zeroed heap allocation of the pointee type.
    Allocate,

    // ─────────────────────────── Accessors ───────────────────────────
    /// A field of a struct-valued operand at a fixed byte offset.
    Field {
        object: Box<CompiledExpression>,
        offset: u32,
    },
    /// Array or pointer element. `length` is set when a bounds check
    /// is known at compile time.
    Index {
        object: Box<CompiledExpression>,
        index: Box<CompiledExpression>,
        length: Option<u32>,
    },
    Dereference(Box<CompiledExpression>),
    AddressOf(Box<CompiledExpression>),
}

impl CompiledExpression {
    pub fn new(kind: ExpressionKind, ty: GeneralType, location: Location) -> Self {
        Self { kind, ty, location }
    }

    pub fn literal(value: CompiledValue, location: Location) -> Self {
        Self {
            ty: GeneralType::Builtin(value.ty()),
            kind: ExpressionKind::Literal(value),
            location,
        }
    }

    pub fn as_literal(&self) -> Option<&CompiledValue> {
        match &self.kind {
            ExpressionKind::Literal(value) => Some(value),
            _ => None,
        }
    }

    /// True if the node names storage and can be assigned or addressed.
    pub fn is_place(&self) -> bool {
        match &self.kind {
            ExpressionKind::Variable(_)
            | ExpressionKind::Parameter(_)
            | ExpressionKind::Dereference(_) => true,
            ExpressionKind::Field { object, .. } => object.is_place(),
            ExpressionKind::Index { object, .. } => object.ty.is_pointer() || object.is_place(),
            _ => false,
        }
    }

    /// The variable at the root of a place, if any.
    pub fn root_variable(&self) -> Option<VariableId> {
        match &self.kind {
            ExpressionKind::Variable(id) => Some(*id),
            ExpressionKind::Field { object, .. } => object.root_variable(),
            ExpressionKind::Index { object, .. } if !object.ty.is_pointer() => object.root_variable(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompiledBlock {
    pub statements: Vec<CompiledStatement>,
    pub location: Location,
}

/// Release work attached to a binding or a `delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledCleanup {
    pub destructor: Option<FunctionId>,
    /// Free the heap block the value points to.
    pub deallocate: bool,
}

#[derive(Debug, Clone)]
pub struct CompiledIf {
    pub condition: CompiledExpression,
    pub body: CompiledBlock,
    pub next: Option<Box<CompiledBranch>>,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub enum CompiledBranch {
    ElseIf(CompiledIf),
    Else(CompiledBlock),
}

#[derive(Debug, Clone)]
pub struct CompiledWhile {
    pub condition: CompiledExpression,
    pub body: CompiledBlock,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct CompiledFor {
    pub init: Option<Box<CompiledStatement>>,
    pub condition: Option<CompiledExpression>,
    pub step: Option<Box<CompiledStatement>>,
    pub body: CompiledBlock,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct CompiledVariableDefinition {
    pub variable: VariableId,
    pub ty: GeneralType,
    pub initial: Option<CompiledExpression>,
    pub cleanup: Option<CompiledCleanup>,
    pub is_global: bool,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct CompiledSetter {
    pub target: CompiledExpression,
    /// For compound assignment this is already `target op value`.
    pub value: CompiledExpression,
    pub compound: bool,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub enum CompiledStatement {
    Block(CompiledBlock),
    If(CompiledIf),
    While(CompiledWhile),
    For(CompiledFor),
    VariableDefinition(CompiledVariableDefinition),
    Return(Option<CompiledExpression>, Location),
    Break(Location),
    Goto(LabelId, Location),
    Label(LabelId, Location),
    Setter(CompiledSetter),
    Expression(CompiledExpression),
    Delete {
        value: CompiledExpression,
        cleanup: CompiledCleanup,
        location: Location,
    },
    Crash(CompiledExpression, Location),
    /// Lowered to nothing, such as `goto L; L:`.
    Empty(Location),
}

impl CompiledStatement {
    pub fn location(&self) -> &Location {
        match self {
            CompiledStatement::Block(block) => &block.location,
            CompiledStatement::If(branch) => &branch.location,
            CompiledStatement::While(w) => &w.location,
            CompiledStatement::For(f) => &f.location,
            CompiledStatement::VariableDefinition(def) => &def.location,
            CompiledStatement::Setter(setter) => &setter.location,
            CompiledStatement::Expression(expr) => &expr.location,
            CompiledStatement::Return(_, location)
            | CompiledStatement::Break(location)
            | CompiledStatement::Goto(_, location)
            | CompiledStatement::Label(_, location)
            | CompiledStatement::Delete { location, .. }
            | CompiledStatement::Crash(_, location)
            | CompiledStatement::Empty(location) => location,
        }
    }
}
