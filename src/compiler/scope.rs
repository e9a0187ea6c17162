use crate::types::{GeneralType, TypeArguments};

use super::entities::{CompiledParameter, FunctionId, LabelId, VariableId};

#[derive(Debug, Default)]
struct BlockScope {
    variables: Vec<(String, VariableId)>,
    labels: Vec<(String, LabelId)>,
}

/// Name lookup state for the function (or top-level code) being lowered.
///
/// Locals and parameters live on separate stacks; nothing leaks from one
/// function into the next.
#[derive(Debug)]
pub(crate) struct FunctionScope {
    /// `None` while lowering top-level statements.
    pub function: Option<FunctionId>,
    pub return_type: GeneralType,
    pub parameters: Vec<CompiledParameter>,
    /// Template parameter bindings of the instance being lowered.
    pub type_arguments: TypeArguments,
    pub loop_depth: u32,
    blocks: Vec<BlockScope>,
}

impl FunctionScope {
    /// Top-level code returns its exit code as `i32`.
    pub fn top_level() -> Self {
        Self {
            function: None,
            return_type: GeneralType::I32,
            parameters: Vec::new(),
            type_arguments: TypeArguments::new(),
            loop_depth: 0,
            blocks: vec![BlockScope::default()],
        }
    }

    pub fn function(
        id: FunctionId,
        return_type: GeneralType,
        parameters: Vec<CompiledParameter>,
        type_arguments: TypeArguments,
    ) -> Self {
        Self {
            function: Some(id),
            return_type,
            parameters,
            type_arguments,
            loop_depth: 0,
            blocks: Vec::new(),
        }
    }

    pub fn push_block(&mut self) {
        self.blocks.push(BlockScope::default());
    }

    pub fn pop_block(&mut self) {
        self.blocks.pop();
    }

    /// Definitions directly in top-level code become globals.
    pub fn is_global_block(&self) -> bool {
        self.function.is_none() && self.blocks.len() == 1
    }

    /// Returns false if the innermost block already has `name`.
    pub fn declare_variable(&mut self, name: &str, id: VariableId) -> bool {
        let Some(block) = self.blocks.last_mut() else {
            return false;
        };
        if block.variables.iter().any(|(n, _)| n == name) {
            return false;
        }
        block.variables.push((name.to_string(), id));
        true
    }

    pub fn lookup_variable(&self, name: &str) -> Option<VariableId> {
        self.blocks.iter().rev().find_map(|block| {
            block
                .variables
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, id)| *id)
        })
    }

    pub fn lookup_parameter(&self, name: &str) -> Option<(usize, &CompiledParameter)> {
        self.parameters
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == name)
    }

    pub fn declare_label(&mut self, name: &str, id: LabelId) -> bool {
        let Some(block) = self.blocks.last_mut() else {
            return false;
        };
        if block.labels.iter().any(|(n, _)| n == name) {
            return false;
        }
        block.labels.push((name.to_string(), id));
        true
    }

    /// Labels are visible in their block and every block nested in it.
    pub fn lookup_label(&self, name: &str) -> Option<LabelId> {
        self.blocks.iter().rev().find_map(|block| {
            block
                .labels
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, id)| *id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_innermost_variable_wins() {
        let mut scope = FunctionScope::top_level();
        assert!(scope.declare_variable("x", VariableId(0)));
        scope.push_block();
        assert!(scope.declare_variable("x", VariableId(1)));
        assert_eq!(scope.lookup_variable("x"), Some(VariableId(1)));
        scope.pop_block();
        assert_eq!(scope.lookup_variable("x"), Some(VariableId(0)));
    }

    #[test]
    fn test_duplicate_in_same_block() {
        let mut scope = FunctionScope::top_level();
        assert!(scope.declare_variable("x", VariableId(0)));
        assert!(!scope.declare_variable("x", VariableId(1)));
    }

    #[test]
    fn test_global_block_only_at_top_level() {
        let mut scope = FunctionScope::top_level();
        assert!(scope.is_global_block());
        scope.push_block();
        assert!(!scope.is_global_block());

        let mut function = FunctionScope::function(FunctionId(0), GeneralType::VOID, Vec::new(), TypeArguments::new());
        function.push_block();
        assert!(!function.is_global_block());
    }

    #[test]
    fn test_labels_visible_from_nested_blocks() {
        let mut scope = FunctionScope::top_level();
        assert!(scope.declare_label("end", LabelId(3)));
        scope.push_block();
        assert_eq!(scope.lookup_label("end"), Some(LabelId(3)));
        scope.pop_block();
        assert!(!scope.declare_label("end", LabelId(4)));
    }
}
