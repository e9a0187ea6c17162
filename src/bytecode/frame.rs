use std::collections::HashMap;

use crate::compiler::{
    CompiledBlock, CompiledBranch, CompiledFunction, CompiledIf, CompiledStatement,
    CompiledVariableDefinition, VariableId,
};
use crate::types::{GeneralType, LayoutProvider, TypeError};

use super::address::Address;
use super::generate_error::GenerateError;
use super::ir::FRAME_HEADER_SIZE;

/// Where every variable and parameter of one frame lives.
///
/// All locals get a fixed slot for the whole call, so the frame is reserved
/// once at entry and the stack depth is the same at every statement.
#[derive(Debug, Clone, Default)]
pub struct FrameLayout {
    variables: HashMap<VariableId, Address>,
    parameters: Vec<Address>,
    /// Bytes of locals reserved at entry.
    pub locals_size: u32,
    pub parameters_size: u32,
    pub return_size: u32,
}

impl FrameLayout {
    /// Frame of a function body.
    ///
    /// ```text
    /// bp + 8 + params   return slot
    /// bp + 8            parameters, last one lowest
    /// bp + 4            return address
    /// bp                caller's base pointer
    /// bp - locals       locals
    /// ```
    pub fn function(function: &CompiledFunction, layout: &dyn LayoutProvider) -> Result<Self, GenerateError> {
        let mut frame = FrameLayout {
            return_size: size_or_zero(&function.return_type, layout)?,
            ..FrameLayout::default()
        };

        let sizes = function
            .parameters
            .iter()
            .map(|p| p.ty.size(layout))
            .collect::<Result<Vec<_>, _>>()?;
        frame.parameters_size = sizes.iter().try_fold(0, |total, &size| grow(total, size, &function.name))?;
        let mut offset = grow(FRAME_HEADER_SIZE, frame.parameters_size, &function.name)?;
        for size in &sizes {
            offset -= size;
            frame.parameters.push(Address::Frame(offset as i32));
        }

        if let Some(body) = &function.body {
            for definition in definitions_in_block(body) {
                let size = definition.ty.size(layout)?;
                frame.locals_size = grow(frame.locals_size, size, &function.name)?;
                let offset = i32::try_from(frame.locals_size)
                    .map_err(|_| TypeError::too_large(format!("frame of `{}`", function.name)))?;
                frame.variables.insert(definition.variable, Address::Frame(-offset));
            }
        }
        Ok(frame)
    }

    /// The main frame at the top of the stack. Its variables, globals
    /// included, have absolute addresses so functions can reach them.
    pub fn main(
        statements: &[CompiledStatement],
        stack_top: u32,
        layout: &dyn LayoutProvider,
    ) -> Result<Self, GenerateError> {
        let mut frame = FrameLayout::default();
        let mut found = Vec::new();
        for statement in statements {
            collect(statement, &mut found);
        }
        for definition in found {
            let size = definition.ty.size(layout)?;
            frame.locals_size = grow(frame.locals_size, size, "main")?;
            let address = stack_top
                .checked_sub(frame.locals_size)
                .ok_or_else(|| TypeError::too_large("frame of `main`"))?;
            frame.variables.insert(definition.variable, Address::Absolute(address));
        }
        Ok(frame)
    }

    pub fn variable(&self, id: VariableId) -> Option<Address> {
        self.variables.get(&id).copied()
    }

    pub fn parameter(&self, index: usize) -> Option<Address> {
        self.parameters.get(index).copied()
    }

    pub fn return_slot(&self) -> Address {
        Address::Frame((FRAME_HEADER_SIZE + self.parameters_size) as i32)
    }
}

fn grow(total: u32, size: u32, owner: &str) -> Result<u32, GenerateError> {
    total
        .checked_add(size)
        .ok_or_else(|| TypeError::too_large(format!("frame of `{}`", owner)).into())
}

fn size_or_zero(ty: &GeneralType, layout: &dyn LayoutProvider) -> Result<u32, GenerateError> {
    if ty.is_void() {
        Ok(0)
    } else {
        Ok(ty.size(layout)?)
    }
}

fn definitions_in_block(block: &CompiledBlock) -> Vec<&CompiledVariableDefinition> {
    let mut found = Vec::new();
    for statement in &block.statements {
        collect(statement, &mut found);
    }
    found
}

/// Every variable definition reachable without entering a function.
fn collect<'a>(statement: &'a CompiledStatement, found: &mut Vec<&'a CompiledVariableDefinition>) {
    match statement {
        CompiledStatement::Block(block) => {
            for inner in &block.statements {
                collect(inner, found);
            }
        }
        CompiledStatement::If(branch) => collect_if(branch, found),
        CompiledStatement::While(w) => {
            for inner in &w.body.statements {
                collect(inner, found);
            }
        }
        CompiledStatement::For(f) => {
            if let Some(init) = &f.init {
                collect(init, found);
            }
            if let Some(step) = &f.step {
                collect(step, found);
            }
            for inner in &f.body.statements {
                collect(inner, found);
            }
        }
        CompiledStatement::VariableDefinition(definition) => found.push(definition),
        CompiledStatement::Return(..)
        | CompiledStatement::Break(_)
        | CompiledStatement::Goto(..)
        | CompiledStatement::Label(..)
        | CompiledStatement::Setter(_)
        | CompiledStatement::Expression(_)
        | CompiledStatement::Delete { .. }
        | CompiledStatement::Crash(..)
        | CompiledStatement::Empty(_) => {}
    }
}

fn collect_if<'a>(branch: &'a CompiledIf, found: &mut Vec<&'a CompiledVariableDefinition>) {
    for inner in &branch.body.statements {
        collect(inner, found);
    }
    match branch.next.as_deref() {
        Some(CompiledBranch::ElseIf(next)) => collect_if(next, found),
        Some(CompiledBranch::Else(block)) => {
            for inner in &block.statements {
                collect(inner, found);
            }
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{CompilerResult, CompilerSettings, compile};
    use crate::lang::{
        Block, Expression, FunctionDefinition, Location, Parameter, ParsedFile, ParsedProgram,
        Statement, TypeInstance,
    };

    fn loc() -> Location {
        Location::new("frame.cin", 1, 1)
    }

    fn ty(name: &str) -> TypeInstance {
        TypeInstance::simple(name, loc())
    }

    fn compile_file(file: ParsedFile) -> CompilerResult {
        compile(&ParsedProgram::single(file), &CompilerSettings::default(), &[]).unwrap()
    }

    fn variable_id(result: &CompilerResult, name: &str) -> VariableId {
        result.variables.iter().find(|v| v.name == name).unwrap().id
    }

    #[test]
    fn test_function_frame() {
        // i32 pick(i32 a, u8 b) { i32 x = a; { i16 y = 2; } return x; }
        let body = Block::new(
            vec![
                Statement::define(ty("i32"), "x", Some(Expression::ident("a", loc()))),
                Statement::Block(Block::new(
                    vec![Statement::define(ty("i16"), "y", Some(Expression::int(2, loc())))],
                    loc(),
                )),
                Statement::Return(Some(Expression::ident("x", loc())), loc()),
            ],
            loc(),
        );
        let pick = FunctionDefinition::new(
            "pick",
            ty("i32"),
            vec![Parameter::new(ty("i32"), "a"), Parameter::new(ty("u8"), "b")],
            body,
        );
        let result = compile_file(ParsedFile::new("frame.cin").function(pick));
        let function = result.find_function("pick").next().unwrap();
        let frame = FrameLayout::function(function, &result).unwrap();

        assert_eq!(frame.parameters_size, 5);
        assert_eq!(frame.return_size, 4);
        // last parameter sits right above the header
        assert_eq!(frame.parameter(1), Some(Address::Frame(8)));
        assert_eq!(frame.parameter(0), Some(Address::Frame(9)));
        assert_eq!(frame.return_slot(), Address::Frame(13));

        // nested blocks share the one frame
        assert_eq!(frame.locals_size, 6);
        assert_eq!(frame.variable(variable_id(&result, "x")), Some(Address::Frame(-4)));
        assert_eq!(frame.variable(variable_id(&result, "y")), Some(Address::Frame(-6)));
    }

    #[test]
    fn test_void_function_has_no_return_slot_bytes() {
        let noop = FunctionDefinition::new("noop", ty("void"), Vec::new(), Block::new(Vec::new(), loc()));
        let result = compile_file(ParsedFile::new("frame.cin").function(noop));
        let frame = FrameLayout::function(&result.functions[0], &result).unwrap();

        assert_eq!(frame.return_size, 0);
        assert_eq!(frame.locals_size, 0);
        assert_eq!(frame.return_slot(), Address::Frame(8));
    }

    #[test]
    fn test_main_frame_is_absolute() {
        let file = ParsedFile::new("frame.cin")
            .statement(Statement::define(ty("i32"), "a", None))
            .statement(Statement::While {
                condition: Expression::int(0, loc()),
                body: Block::new(vec![Statement::define(ty("u8"), "b", None)], loc()),
                location: loc(),
            });
        let result = compile_file(file);
        let frame = FrameLayout::main(&result.statements, 1024, &result).unwrap();

        assert_eq!(frame.locals_size, 5);
        assert_eq!(frame.variable(variable_id(&result, "a")), Some(Address::Absolute(1020)));
        assert_eq!(frame.variable(variable_id(&result, "b")), Some(Address::Absolute(1019)));
    }

    #[test]
    fn test_main_frame_larger_than_stack_is_rejected() {
        let buffer = TypeInstance::array(ty("u8"), Some(Expression::int(2000, loc())));
        let result = compile_file(ParsedFile::new("frame.cin").statement(Statement::define(buffer, "buffer", None)));

        let err = FrameLayout::main(&result.statements, 1024, &result).unwrap_err();
        assert!(matches!(err, GenerateError::Layout(TypeError::TooLarge(_))));
        assert!(FrameLayout::main(&result.statements, 4096, &result).is_ok());
    }
}
