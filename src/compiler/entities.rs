use std::rc::Rc;

use crate::bytecode::ExternalFunctionInfo;
use crate::lang::{Block, ConstructorDefinition, FunctionDefinition, Location, StructDefinition};
use crate::types::{CompiledField, GeneralType, StructId, TypeArguments};

use super::statement::CompiledBlock;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

arena_id!(
    /// Index into [`CompilerResult::functions`](super::CompilerResult).
    FunctionId
);
arena_id!(
    /// Index into [`CompilerResult::variables`](super::CompilerResult).
    VariableId
);
arena_id!(LabelId);
arena_id!(
    /// A declared function, method or operator before instantiation.
    TemplateId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeneralFunctionKind {
    Destructor,
    IndexerGet,
    IndexerSet,
}

impl GeneralFunctionKind {
    pub fn name(self) -> &'static str {
        match self {
            GeneralFunctionKind::Destructor => "destructor",
            GeneralFunctionKind::IndexerGet => "indexer_get",
            GeneralFunctionKind::IndexerSet => "indexer_set",
        }
    }
}

/// What role a compiled function plays. Methods, constructors and general
/// functions all take `this: Self*` as their first parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Function,
    Method(StructId),
    Operator,
    Constructor(StructId),
    General(StructId, GeneralFunctionKind),
}

impl FunctionKind {
    pub fn owner(self) -> Option<StructId> {
        match self {
            FunctionKind::Method(id)
            | FunctionKind::Constructor(id)
            | FunctionKind::General(id, _) => Some(id),
            FunctionKind::Function | FunctionKind::Operator => None,
        }
    }
}

/// The syntax a function was compiled from.
#[derive(Debug, Clone)]
pub enum FunctionOrigin {
    Function(Rc<FunctionDefinition>),
    /// Constructor `index` of a struct.
    Constructor(Rc<StructDefinition>, usize),
    Destructor(Rc<StructDefinition>),
}

impl FunctionOrigin {
    pub fn body(&self) -> Option<&Block> {
        match self {
            FunctionOrigin::Function(definition) => definition.body.as_ref(),
            FunctionOrigin::Constructor(definition, index) => {
                definition.constructors.get(*index).map(|c: &ConstructorDefinition| &c.body)
            }
            FunctionOrigin::Destructor(definition) => definition.destructor.as_ref(),
        }
    }

    pub fn location(&self) -> &Location {
        match self {
            FunctionOrigin::Function(definition) => &definition.location,
            FunctionOrigin::Constructor(definition, index) => definition
                .constructors
                .get(*index)
                .map(|c| &c.location)
                .unwrap_or(&definition.location),
            FunctionOrigin::Destructor(definition) => &definition.location,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledParameter {
    pub name: String,
    pub ty: GeneralType,
    pub location: Location,
}

/// A concrete function: every type in its signature is resolved.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub id: FunctionId,
    pub name: String,
    pub kind: FunctionKind,
    pub return_type: GeneralType,
    pub parameters: Vec<CompiledParameter>,
    pub origin: FunctionOrigin,
    pub template: TemplateId,
    pub type_arguments: TypeArguments,
    /// Set for functions bound to a host function.
    pub external: Option<ExternalFunctionInfo>,
    pub body: Option<CompiledBlock>,
    /// Call sites and address-of sites.
    pub references: Vec<Location>,
    /// First instruction, patched in by the generator.
    pub instruction_offset: Option<u32>,
    pub location: Location,
}

impl CompiledFunction {
    pub fn signature(&self) -> GeneralType {
        GeneralType::function(
            self.return_type.clone(),
            self.parameters.iter().map(|p| p.ty.clone()).collect(),
        )
    }

    pub fn is_template_instance(&self) -> bool {
        !self.type_arguments.is_empty()
    }
}

impl std::fmt::Display for CompiledFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.return_type, self.name)?;
        if !self.type_arguments.is_empty() {
            write!(f, "<")?;
            for (i, ty) in self.type_arguments.values().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", ty)?;
            }
            write!(f, ">")?;
        }
        write!(f, "(")?;
        for (i, param) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", param.ty, param.name)?;
        }
        write!(f, ")")
    }
}

/// A struct definition with resolved field types. Field types may still
/// mention the struct's own template parameters.
#[derive(Debug, Clone)]
pub struct CompiledStruct {
    pub id: StructId,
    pub name: String,
    pub template_parameters: Vec<String>,
    pub fields: Vec<CompiledField>,
    pub definition: Rc<StructDefinition>,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableScope {
    /// Stored at a fixed absolute address in the main frame.
    Global,
    /// Stored in the frame of its function.
    Local(Option<FunctionId>),
}

#[derive(Debug, Clone)]
pub struct CompiledVariable {
    pub id: VariableId,
    pub name: String,
    pub ty: GeneralType,
    pub scope: VariableScope,
    pub location: Location,
}

impl CompiledVariable {
    pub fn is_global(&self) -> bool {
        self.scope == VariableScope::Global
    }
}

#[derive(Debug, Clone)]
pub struct CompiledLabel {
    pub id: LabelId,
    pub name: String,
    pub location: Location,
}
