use std::rc::Rc;

use super::location::Location;
use super::node::{Block, Expression, Statement, TypeInstance};

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub ty: TypeInstance,
    pub location: Location,
}

impl Parameter {
    pub fn new(ty: TypeInstance, name: impl Into<String>) -> Self {
        let location = ty.location().clone();
        Self {
            name: name.into(),
            ty,
            location,
        }
    }
}

/// A function, method or operator definition.
///
/// Operators use their symbol (`+`, `==`, ..) as `name`. A definition with
/// an `external` name has no body and is bound to a host function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub template_parameters: Vec<String>,
    pub return_type: TypeInstance,
    pub parameters: Vec<Parameter>,
    pub body: Option<Block>,
    pub external: Option<String>,
    pub location: Location,
}

impl FunctionDefinition {
    pub fn new(
        name: impl Into<String>,
        return_type: TypeInstance,
        parameters: Vec<Parameter>,
        body: Block,
    ) -> Self {
        let location = return_type.location().clone();
        Self {
            name: name.into(),
            template_parameters: Vec::new(),
            return_type,
            parameters,
            body: Some(body),
            external: None,
            location,
        }
    }

    pub fn external(
        name: impl Into<String>,
        external: impl Into<String>,
        return_type: TypeInstance,
        parameters: Vec<Parameter>,
    ) -> Self {
        let location = return_type.location().clone();
        Self {
            name: name.into(),
            template_parameters: Vec::new(),
            return_type,
            parameters,
            body: None,
            external: Some(external.into()),
            location,
        }
    }

    pub fn with_template(mut self, parameters: &[&str]) -> Self {
        self.template_parameters = parameters.iter().map(|p| p.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefinition {
    pub name: String,
    pub ty: TypeInstance,
    pub location: Location,
}

impl FieldDefinition {
    pub fn new(ty: TypeInstance, name: impl Into<String>) -> Self {
        let location = ty.location().clone();
        Self {
            name: name.into(),
            ty,
            location,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstructorDefinition {
    pub parameters: Vec<Parameter>,
    pub body: Block,
    pub location: Location,
}

/// A struct with its members.
///
/// Methods, constructors, the destructor and the indexers all receive an
/// implicit `this` parameter of type `Self*`.
#[derive(Debug, Clone, PartialEq)]
pub struct StructDefinition {
    pub name: String,
    pub template_parameters: Vec<String>,
    pub fields: Vec<FieldDefinition>,
    pub methods: Vec<FunctionDefinition>,
    pub constructors: Vec<ConstructorDefinition>,
    pub destructor: Option<Block>,
    /// `T indexer_get(i32 index)`
    pub indexer_get: Option<FunctionDefinition>,
    /// `void indexer_set(i32 index, T value)`
    pub indexer_set: Option<FunctionDefinition>,
    pub location: Location,
}

impl StructDefinition {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDefinition>, location: Location) -> Self {
        Self {
            name: name.into(),
            template_parameters: Vec::new(),
            fields,
            methods: Vec::new(),
            constructors: Vec::new(),
            destructor: None,
            indexer_get: None,
            indexer_set: None,
            location,
        }
    }

    pub fn with_template(mut self, parameters: &[&str]) -> Self {
        self.template_parameters = parameters.iter().map(|p| p.to_string()).collect();
        self
    }
}

/// `const T NAME = value;`
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantDefinition {
    pub name: String,
    pub ty: TypeInstance,
    pub value: Expression,
    pub location: Location,
}

/// `alias NAME = T;`
#[derive(Debug, Clone, PartialEq)]
pub struct AliasDefinition {
    pub name: String,
    pub value: TypeInstance,
    pub location: Location,
}

/// One parsed source file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedFile {
    pub file: String,
    pub functions: Vec<Rc<FunctionDefinition>>,
    pub structs: Vec<Rc<StructDefinition>>,
    pub operators: Vec<Rc<FunctionDefinition>>,
    pub constants: Vec<ConstantDefinition>,
    pub aliases: Vec<AliasDefinition>,
    /// Top-level statements, executed in order as the program entry.
    pub statements: Vec<Statement>,
}

impl ParsedFile {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            ..Self::default()
        }
    }

    pub fn function(mut self, function: FunctionDefinition) -> Self {
        self.functions.push(Rc::new(function));
        self
    }

    pub fn structure(mut self, structure: StructDefinition) -> Self {
        self.structs.push(Rc::new(structure));
        self
    }

    pub fn operator(mut self, operator: FunctionDefinition) -> Self {
        self.operators.push(Rc::new(operator));
        self
    }

    pub fn constant(mut self, constant: ConstantDefinition) -> Self {
        self.constants.push(constant);
        self
    }

    pub fn alias(mut self, alias: AliasDefinition) -> Self {
        self.aliases.push(alias);
        self
    }

    pub fn statement(mut self, statement: Statement) -> Self {
        self.statements.push(statement);
        self
    }
}

/// Everything the parser produced, in load order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedProgram {
    pub files: Vec<ParsedFile>,
}

impl ParsedProgram {
    pub fn new(files: Vec<ParsedFile>) -> Self {
        Self { files }
    }

    pub fn single(file: ParsedFile) -> Self {
        Self { files: vec![file] }
    }
}
