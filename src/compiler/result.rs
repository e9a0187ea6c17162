use std::collections::HashMap;

use crate::lang::Location;
use crate::types::{CompiledField, LayoutProvider, RuntimeInfoProvider, StructId};

use super::diagnostics::DiagnosticsCollection;
use super::entities::{CompiledFunction, CompiledLabel, CompiledStruct, CompiledVariable, FunctionId, LabelId, VariableId};
use super::statement::CompiledStatement;

/// Who reads, writes and jumps to what. Filled while lowering and frozen
/// with the result, so IR nodes never hold back-references.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    getters: HashMap<VariableId, Vec<Location>>,
    setters: HashMap<VariableId, Vec<Location>>,
    gotos: HashMap<LabelId, Vec<Location>>,
}

impl ReferenceTable {
    pub fn add_getter(&mut self, variable: VariableId, location: &Location) {
        self.getters.entry(variable).or_default().push(location.clone());
    }

    pub fn add_setter(&mut self, variable: VariableId, location: &Location) {
        self.setters.entry(variable).or_default().push(location.clone());
    }

    pub fn add_goto(&mut self, label: LabelId, location: &Location) {
        self.gotos.entry(label).or_default().push(location.clone());
    }

    pub fn getters(&self, variable: VariableId) -> &[Location] {
        self.getters.get(&variable).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn setters(&self, variable: VariableId) -> &[Location] {
        self.setters.get(&variable).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn gotos(&self, label: LabelId) -> &[Location] {
        self.gotos.get(&label).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Everything the generator needs: the entry statements, every
/// instantiated function and the arenas they index into.
#[derive(Debug, Clone)]
pub struct CompilerResult {
    /// Top-level statements of all files, in load order.
    pub statements: Vec<CompiledStatement>,
    pub functions: Vec<CompiledFunction>,
    pub structs: Vec<CompiledStruct>,
    pub variables: Vec<CompiledVariable>,
    pub labels: Vec<CompiledLabel>,
    pub references: ReferenceTable,
    /// Warnings only; a result is never produced with errors.
    pub diagnostics: DiagnosticsCollection,
    pub pointer_size: u32,
}

impl CompilerResult {
    pub fn function(&self, id: FunctionId) -> Option<&CompiledFunction> {
        self.functions.get(id.index())
    }

    pub fn variable(&self, id: VariableId) -> Option<&CompiledVariable> {
        self.variables.get(id.index())
    }

    pub fn find_function(&self, name: &str) -> impl Iterator<Item = &CompiledFunction> {
        self.functions.iter().filter(move |f| f.name == name)
    }

    pub fn find_struct(&self, name: &str) -> Option<&CompiledStruct> {
        self.structs.iter().find(|s| s.name == name)
    }

    pub fn globals(&self) -> impl Iterator<Item = &CompiledVariable> {
        self.variables.iter().filter(|v| v.is_global())
    }
}

impl RuntimeInfoProvider for CompilerResult {
    fn pointer_size(&self) -> u32 {
        self.pointer_size
    }
}

impl LayoutProvider for CompilerResult {
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
