//! Semantic compilation: [`ParsedProgram`] to typed IR.
//!
//! The compiler runs one front-to-back pass:
//!
//! 1. declare structs, aliases and constants
//! 2. resolve struct fields and declare every function as a template
//! 3. lower top-level statements, instantiating templates on demand
//! 4. lower instantiated function bodies until the worklist is empty
//!
//! User errors accumulate in a [`DiagnosticsCollection`] and are returned
//! together at the end. Internal errors abort at once.

pub mod compile_error;
pub mod diagnostics;
pub mod entities;
mod expression;
mod functions;
mod resolve;
pub mod result;
mod scope;
pub mod statement;
mod statements;
pub mod value;

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bytecode::ExternalFunctionInfo;
use crate::lang::{Location, ParsedProgram};
use crate::types::{
    BuiltinType, CompiledField, GeneralType, LayoutProvider, RuntimeInfoProvider, StructId,
    TypeArguments,
};

pub use compile_error::{CompileError, InternalError};
pub use diagnostics::{Diagnostic, DiagnosticLevel, DiagnosticsCollection};
pub use entities::{
    CompiledFunction, CompiledLabel, CompiledParameter, CompiledStruct, CompiledVariable,
    FunctionId, FunctionKind, FunctionOrigin, GeneralFunctionKind, LabelId, TemplateId,
    VariableId, VariableScope,
};
pub use result::{CompilerResult, ReferenceTable};
pub use statement::{
    CompiledBlock, CompiledBranch, CompiledCleanup, CompiledExpression, CompiledFor, CompiledIf,
    CompiledSetter, CompiledStatement, CompiledVariableDefinition, CompiledWhile, ConversionKind,
    ExpressionKind,
};
pub use value::CompiledValue;

use compile_error::{Failure, Lower, recover};
use functions::FunctionTemplate;
use scope::FunctionScope;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerSettings {
    /// Size of pointers and function values in bytes.
    pub pointer_size: u32,
    /// Emit warnings for unread variables and uncalled functions.
    pub warn_unused: bool,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        CompilerSettings {
            pointer_size: 4,
            warn_unused: true,
        }
    }
}

/// Compiles a parsed program against the host's external functions.
pub fn compile(
    program: &ParsedProgram,
    settings: &CompilerSettings,
    externals: &[ExternalFunctionInfo],
) -> Result<CompilerResult, CompileError> {
    Compiler::new(settings.clone(), externals).compile_program(program)
}

pub(crate) struct Compiler<'a> {
    settings: CompilerSettings,
    externals: &'a [ExternalFunctionInfo],
    diagnostics: DiagnosticsCollection,
    references: ReferenceTable,

    structs: Vec<CompiledStruct>,
    struct_names: HashMap<String, StructId>,
    aliases: HashMap<String, GeneralType>,
    constants: HashMap<String, CompiledValue>,

    templates: Vec<FunctionTemplate>,
    /// Instantiation cache keyed by template and argument keys in
    /// template-parameter order.
    instances: HashMap<(TemplateId, Vec<String>), FunctionId>,
    functions: Vec<CompiledFunction>,
    /// How many generic instances led to each instance.
    instantiation_depth: HashMap<FunctionId, u32>,
    pending: VecDeque<FunctionId>,

    variables: Vec<CompiledVariable>,
    globals: HashMap<String, VariableId>,
    labels: Vec<CompiledLabel>,

    scope: FunctionScope,
}

impl<'a> Compiler<'a> {
    pub fn new(settings: CompilerSettings, externals: &'a [ExternalFunctionInfo]) -> Self {
        Self {
            settings,
            externals,
            diagnostics: DiagnosticsCollection::new(),
            references: ReferenceTable::default(),
            structs: Vec::new(),
            struct_names: HashMap::new(),
            aliases: HashMap::new(),
            constants: HashMap::new(),
            templates: Vec::new(),
            instances: HashMap::new(),
            functions: Vec::new(),
            instantiation_depth: HashMap::new(),
            pending: VecDeque::new(),
            variables: Vec::new(),
            globals: HashMap::new(),
            labels: Vec::new(),
            scope: FunctionScope::top_level(),
        }
    }

    pub fn compile_program(mut self, program: &ParsedProgram) -> Result<CompilerResult, CompileError> {
        let _span = tracing::debug_span!("compile", files = program.files.len()).entered();

        self.declare_structs(program);
        self.declare_aliases(program)?;
        self.resolve_struct_fields()?;
        self.declare_constants(program)?;
        self.declare_functions(program)?;

        let statements = self.compile_top_level(program)?;
        self.compile_pending()?;
        self.check_unused();

        if self.diagnostics.has_errors() {
            debug!(errors = self.diagnostics.error_count(), "compilation failed");
            return Err(CompileError::Diagnostics(self.diagnostics));
        }

        debug!(
            functions = self.functions.len(),
            structs = self.structs.len(),
            variables = self.variables.len(),
            "compilation finished"
        );

        Ok(CompilerResult {
            statements,
            functions: self.functions,
            structs: self.structs,
            variables: self.variables,
            labels: self.labels,
            references: self.references,
            diagnostics: self.diagnostics,
            pointer_size: self.settings.pointer_size,
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    pub(crate) fn report<T>(&mut self, diagnostic: Diagnostic) -> Lower<T> {
        self.diagnostics.add(diagnostic);
        Err(Failure::Reported)
    }

    /// Sizes a type. Generic leftovers are internal errors; anything else
    /// is the user's.
    pub(crate) fn size_of(&mut self, ty: &GeneralType, location: &Location) -> Lower<u32> {
        match ty.size(&*self) {
            Ok(size) => Ok(size),
            Err(error) if error.is_internal() => Err(InternalError::Layout(error).into()),
            Err(error) => self.report(Diagnostic::error(error.to_string(), location)),
        }
    }

    fn is_type_name(&self, name: &str) -> bool {
        BuiltinType::from_name(name).is_some()
            || self.struct_names.contains_key(name)
            || self.aliases.contains_key(name)
    }

    // =========================================================================
    // Declarations
    // =========================================================================

    fn declare_structs(&mut self, program: &ParsedProgram) {
        for file in &program.files {
            for definition in &file.structs {
                if self.is_type_name(&definition.name) {
                    self.diagnostics.add(Diagnostic::duplicate_definition(
                        "type",
                        &definition.name,
                        &definition.location,
                    ));
                    continue;
                }
                let id = StructId(self.structs.len() as u32);
                self.struct_names.insert(definition.name.clone(), id);
                self.structs.push(CompiledStruct {
                    id,
                    name: definition.name.clone(),
                    template_parameters: definition.template_parameters.clone(),
                    fields: Vec::new(),
                    definition: Rc::clone(definition),
                    location: definition.location.clone(),
                });
            }
        }
    }

    fn declare_aliases(&mut self, program: &ParsedProgram) -> Result<(), InternalError> {
        for file in &program.files {
            for alias in &file.aliases {
                if self.is_type_name(&alias.name) {
                    self.diagnostics.add(Diagnostic::duplicate_definition(
                        "type",
                        &alias.name,
                        &alias.location,
                    ));
                    continue;
                }
                if let Some(ty) = recover(self.resolve_type(&alias.value, &TypeArguments::new()))? {
                    self.aliases.insert(alias.name.clone(), ty);
                }
            }
        }
        Ok(())
    }

    fn resolve_struct_fields(&mut self) -> Result<(), InternalError> {
        for index in 0..self.structs.len() {
            let definition = Rc::clone(&self.structs[index].definition);
            let arguments = generic_arguments(&definition.template_parameters);
            let mut fields: Vec<CompiledField> = Vec::new();
            for field in &definition.fields {
                if fields.iter().any(|f| f.name == field.name) {
                    self.diagnostics.add(Diagnostic::duplicate_definition(
                        "field",
                        &field.name,
                        &field.location,
                    ));
                    continue;
                }
                let Some(ty) = recover(self.resolve_type(&field.ty, &arguments))? else {
                    continue;
                };
                if ty.is_void() {
                    self.diagnostics.add(Diagnostic::unsized_field(
                        &definition.name,
                        &field.name,
                        "`void` has no size",
                        &field.location,
                    ));
                    continue;
                }
                fields.push(CompiledField {
                    name: field.name.clone(),
                    ty,
                    location: field.location.clone(),
                });
            }
            self.structs[index].fields = fields;
        }

        // Generic structs are sized per instantiation.
        for index in 0..self.structs.len() {
            let structure = &self.structs[index];
            if !structure.template_parameters.is_empty() {
                continue;
            }
            let ty = GeneralType::structure(structure.id, structure.name.clone(), TypeArguments::new());
            let location = structure.location.clone();
            recover(self.size_of(&ty, &location))?;
        }
        Ok(())
    }

    fn declare_constants(&mut self, program: &ParsedProgram) -> Result<(), InternalError> {
        for file in &program.files {
            for constant in &file.constants {
                if self.constants.contains_key(&constant.name) {
                    self.diagnostics.add(Diagnostic::duplicate_definition(
                        "constant",
                        &constant.name,
                        &constant.location,
                    ));
                    continue;
                }
                let value = recover(self.evaluate_constant(&constant.ty, &constant.value))?;
                if let Some(value) = value {
                    self.constants.insert(constant.name.clone(), value);
                }
            }
        }
        Ok(())
    }

    fn evaluate_constant(
        &mut self,
        ty: &crate::lang::TypeInstance,
        value: &crate::lang::Expression,
    ) -> Lower<CompiledValue> {
        let ty = self.resolve_type(ty, &TypeArguments::new())?;
        let compiled = self.compile_expression(value)?;
        let compiled = self.convert(compiled, &ty)?;
        match compiled.as_literal() {
            Some(value) => Ok(*value),
            None => self.report(Diagnostic::error(
                "constant value must be known at compile time",
                value.location(),
            )),
        }
    }

    // =========================================================================
    // Analysis
    // =========================================================================

    fn check_unused(&mut self) {
        if !self.settings.warn_unused {
            return;
        }
        let mut warnings = Vec::new();
        for function in &self.functions {
            if function.kind == FunctionKind::Function
                && function.references.is_empty()
                && !function.name.starts_with('_')
            {
                warnings.push(Diagnostic::warning(
                    format!("function `{}` is never used", function.name),
                    &function.location,
                ));
            }
        }
        for variable in &self.variables {
            if self.references.getters(variable.id).is_empty() && !variable.name.starts_with('_') {
                warnings.push(Diagnostic::warning(
                    format!("variable `{}` is never read", variable.name),
                    &variable.location,
                ));
            }
        }
        for warning in warnings {
            self.diagnostics.add(warning);
        }
    }
}

/// Maps each template parameter to itself, for resolving signatures.
fn generic_arguments(parameters: &[String]) -> TypeArguments {
    parameters
        .iter()
        .map(|p| (p.clone(), GeneralType::generic(p.clone())))
        .collect()
}

impl RuntimeInfoProvider for Compiler<'_> {
    fn pointer_size(&self) -> u32 {
        self.settings.pointer_size
    }
}

impl LayoutProvider for Compiler<'_> {
    fn struct_template_parameters(&self, id: StructId) -> &[String] {
        self.structs
            .get(id.0 as usize)
            .map(|s| s.template_parameters.as_slice())
            .unwrap_or(&[])
    }

    fn struct_fields(&self, id: StructId) -> &[CompiledField] {
        self.structs
            .get(id.0 as usize)
            .map(|s| s.fields.as_slice())
            .unwrap_or(&[])
    }
}
