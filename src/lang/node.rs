use super::location::Location;
use super::value::Literal;

/// A type as written in source, before name resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeInstance {
    /// A named type with optional template arguments: `i32`, `Pair<T>`.
    Simple {
        name: String,
        type_arguments: Vec<TypeInstance>,
        location: Location,
    },

    /// `T*`
    Pointer {
        to: Box<TypeInstance>,
        location: Location,
    },

    /// `T[N]`, where `N` must fold to a constant. `T[]` has no length.
    StackArray {
        of: Box<TypeInstance>,
        length: Option<Box<Expression>>,
        location: Location,
    },

    /// `R(A, B)`: the type of a function value.
    Function {
        ret: Box<TypeInstance>,
        params: Vec<TypeInstance>,
        location: Location,
    },
}

impl TypeInstance {
    pub fn simple(name: impl Into<String>, location: Location) -> Self {
        TypeInstance::Simple {
            name: name.into(),
            type_arguments: Vec::new(),
            location,
        }
    }

    pub fn generic(
        name: impl Into<String>,
        type_arguments: Vec<TypeInstance>,
        location: Location,
    ) -> Self {
        TypeInstance::Simple {
            name: name.into(),
            type_arguments,
            location,
        }
    }

    pub fn pointer(to: TypeInstance) -> Self {
        let location = to.location().clone();
        TypeInstance::Pointer {
            to: Box::new(to),
            location,
        }
    }

    pub fn array(of: TypeInstance, length: Option<Expression>) -> Self {
        let location = of.location().clone();
        TypeInstance::StackArray {
            of: Box::new(of),
            length: length.map(Box::new),
            location,
        }
    }

    pub fn function(ret: TypeInstance, params: Vec<TypeInstance>) -> Self {
        let location = ret.location().clone();
        TypeInstance::Function {
            ret: Box::new(ret),
            params,
            location,
        }
    }

    pub fn location(&self) -> &Location {
        match self {
            TypeInstance::Simple { location, .. }
            | TypeInstance::Pointer { location, .. }
            | TypeInstance::StackArray { location, .. }
            | TypeInstance::Function { location, .. } => location,
        }
    }

    /// `var` asks the compiler to take the initializer's type.
    pub fn is_inferred(&self) -> bool {
        matches!(self, TypeInstance::Simple { name, type_arguments, .. } if name == "var" && type_arguments.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    LogicalAnd,
    LogicalOr,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl BinaryOp {
    /// The source symbol; operator overloads are looked up by it.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::LogicalAnd | BinaryOp::LogicalOr)
    }

    pub fn is_shift(self) -> bool {
        matches!(self, BinaryOp::ShiftLeft | BinaryOp::ShiftRight)
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::ShiftLeft | BinaryOp::ShiftRight
        )
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `-x`
    Negate,
    /// `!x`
    LogicalNot,
    /// `~x`
    BitNot,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Negate => "-",
            UnaryOp::LogicalNot => "!",
            UnaryOp::BitNot => "~",
        }
    }
}

/// A value-producing node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    // ───────────────────────────── Atoms ─────────────────────────────
    Literal(Literal, Location),

    /// A variable, parameter, constant or function name.
    Identifier(String, Location),

    // ─────────────────────────── Operators ───────────────────────────
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
        location: Location,
    },

    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
        location: Location,
    },

    /// `value as T`
    Cast {
        value: Box<Expression>,
        to: TypeInstance,
        location: Location,
    },

    // ───────────────────────────── Calls ─────────────────────────────
    /// `name<T..>(args)`: a function, external function or function value.
    Call {
        name: String,
        type_arguments: Vec<TypeInstance>,
        args: Vec<Expression>,
        location: Location,
    },

    /// `receiver.name(args)`: the receiver becomes the `this` argument.
    MethodCall {
        receiver: Box<Expression>,
        name: String,
        args: Vec<Expression>,
        location: Location,
    },

    /// `new T` allocates; `new T(args)` allocates and runs a constructor.
    New {
        ty: TypeInstance,
        args: Option<Vec<Expression>>,
        location: Location,
    },

    // ─────────────────────────── Accessors ───────────────────────────
    Field {
        object: Box<Expression>,
        field: String,
        location: Location,
    },

    Index {
        object: Box<Expression>,
        index: Box<Expression>,
        location: Location,
    },

    AddressOf(Box<Expression>, Location),

    Dereference(Box<Expression>, Location),
}

impl Expression {
    pub fn location(&self) -> &Location {
        match self {
            Expression::Literal(_, location)
            | Expression::Identifier(_, location)
            | Expression::AddressOf(_, location)
            | Expression::Dereference(_, location) => location,
            Expression::Binary { location, .. }
            | Expression::Unary { location, .. }
            | Expression::Cast { location, .. }
            | Expression::Call { location, .. }
            | Expression::MethodCall { location, .. }
            | Expression::New { location, .. }
            | Expression::Field { location, .. }
            | Expression::Index { location, .. } => location,
        }
    }

    pub fn int(value: i64, location: Location) -> Self {
        Expression::Literal(Literal::Integer(value), location)
    }

    pub fn float(value: f32, location: Location) -> Self {
        Expression::Literal(Literal::Float(value), location)
    }

    pub fn char(value: char, location: Location) -> Self {
        let mut units = [0u16; 2];
        let unit = value.encode_utf16(&mut units)[0];
        Expression::Literal(Literal::Char(unit), location)
    }

    pub fn ident(name: impl Into<String>, location: Location) -> Self {
        Expression::Identifier(name.into(), location)
    }

    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        let location = left.location().clone();
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            location,
        }
    }

    pub fn unary(op: UnaryOp, operand: Expression) -> Self {
        let location = operand.location().clone();
        Expression::Unary {
            op,
            operand: Box::new(operand),
            location,
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expression>, location: Location) -> Self {
        Expression::Call {
            name: name.into(),
            type_arguments: Vec::new(),
            args,
            location,
        }
    }

    pub fn method(receiver: Expression, name: impl Into<String>, args: Vec<Expression>) -> Self {
        let location = receiver.location().clone();
        Expression::MethodCall {
            receiver: Box::new(receiver),
            name: name.into(),
            args,
            location,
        }
    }

    pub fn field(object: Expression, field: impl Into<String>) -> Self {
        let location = object.location().clone();
        Expression::Field {
            object: Box::new(object),
            field: field.into(),
            location,
        }
    }

    pub fn index(object: Expression, index: Expression) -> Self {
        let location = object.location().clone();
        Expression::Index {
            object: Box::new(object),
            index: Box::new(index),
            location,
        }
    }

    pub fn cast(value: Expression, to: TypeInstance) -> Self {
        let location = value.location().clone();
        Expression::Cast {
            value: Box::new(value),
            to,
            location,
        }
    }

    pub fn address_of(value: Expression) -> Self {
        let location = value.location().clone();
        Expression::AddressOf(Box::new(value), location)
    }

    pub fn deref(value: Expression) -> Self {
        let location = value.location().clone();
        Expression::Dereference(Box::new(value), location)
    }
}

/// A braced statement list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub statements: Vec<Statement>,
    pub location: Location,
}

impl Block {
    pub fn new(statements: Vec<Statement>, location: Location) -> Self {
        Self {
            statements,
            location,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// An expression evaluated for its side effects.
    Expression(Expression),

    /// `[temp] T name [= initial];`
    VariableDefinition {
        temp: bool,
        ty: TypeInstance,
        name: String,
        initial: Option<Expression>,
        location: Location,
    },

    /// `target = value;` or `target op= value;`
    Assignment {
        target: Expression,
        value: Expression,
        compound: Option<BinaryOp>,
        location: Location,
    },

    /// `if (c) {..} else ..`; `else_branch` is another `If` for `else if`.
    If {
        condition: Expression,
        body: Block,
        else_branch: Option<Box<Statement>>,
        location: Location,
    },

    While {
        condition: Expression,
        body: Block,
        location: Location,
    },

    For {
        init: Option<Box<Statement>>,
        condition: Option<Expression>,
        step: Option<Box<Statement>>,
        body: Block,
        location: Location,
    },

    Return(Option<Expression>, Location),

    Break(Location),

    Goto(String, Location),

    Label(String, Location),

    /// `delete p;` runs the destructor of `*p`, then frees it.
    Delete(Expression, Location),

    /// `crash v;` halts the program with a user fault carrying `v`.
    Crash(Expression, Location),

    Block(Block),
}

impl Statement {
    pub fn location(&self) -> &Location {
        match self {
            Statement::Expression(expression) => expression.location(),
            Statement::VariableDefinition { location, .. }
            | Statement::Assignment { location, .. }
            | Statement::If { location, .. }
            | Statement::While { location, .. }
            | Statement::For { location, .. } => location,
            Statement::Return(_, location)
            | Statement::Break(location)
            | Statement::Goto(_, location)
            | Statement::Label(_, location)
            | Statement::Delete(_, location)
            | Statement::Crash(_, location) => location,
            Statement::Block(block) => &block.location,
        }
    }

    pub fn define(ty: TypeInstance, name: impl Into<String>, initial: Option<Expression>) -> Self {
        let location = ty.location().clone();
        Statement::VariableDefinition {
            temp: false,
            ty,
            name: name.into(),
            initial,
            location,
        }
    }

    pub fn assign(target: Expression, value: Expression) -> Self {
        let location = target.location().clone();
        Statement::Assignment {
            target,
            value,
            compound: None,
            location,
        }
    }

    pub fn compound(target: Expression, op: BinaryOp, value: Expression) -> Self {
        let location = target.location().clone();
        Statement::Assignment {
            target,
            value,
            compound: Some(op),
            location,
        }
    }
}
