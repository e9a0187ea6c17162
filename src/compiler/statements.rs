//! Statement lowering.

use crate::lang::{Block, Expression, Location, ParsedProgram, Statement, TypeInstance};
use crate::types::GeneralType;

use super::Compiler;
use super::compile_error::{InternalError, Lower, recover};
use super::diagnostics::Diagnostic;
use super::entities::{
    CompiledLabel, CompiledVariable, FunctionKind, GeneralFunctionKind, LabelId, VariableId,
    VariableScope,
};
use super::scope::FunctionScope;
use super::statement::{
    CompiledBlock, CompiledBranch, CompiledCleanup, CompiledExpression, CompiledFor, CompiledIf,
    CompiledSetter, CompiledStatement, CompiledVariableDefinition, CompiledWhile, ExpressionKind,
};

impl Compiler<'_> {
    /// Lowers the top-level statements of every file as one block whose
    /// definitions are globals.
    pub(crate) fn compile_top_level(
        &mut self,
        program: &ParsedProgram,
    ) -> Result<Vec<CompiledStatement>, InternalError> {
        self.scope = FunctionScope::top_level();
        for file in &program.files {
            self.declare_labels(&file.statements);
        }
        let mut statements = Vec::new();
        for file in &program.files {
            statements.extend(self.compile_statements(&file.statements)?);
        }
        Ok(statements)
    }

    pub(crate) fn compile_block(&mut self, block: &Block) -> Result<CompiledBlock, InternalError> {
        self.scope.push_block();
        self.declare_labels(&block.statements);
        let statements = self.compile_statements(&block.statements);
        self.scope.pop_block();
        Ok(CompiledBlock {
            statements: statements?,
            location: block.location.clone(),
        })
    }

    fn declare_labels(&mut self, statements: &[Statement]) {
        for statement in statements {
            let Statement::Label(name, location) = statement else {
                continue;
            };
            let id = LabelId(self.labels.len() as u32);
            if !self.scope.declare_label(name, id) {
                self.diagnostics.add(Diagnostic::duplicate_definition("label", name, location));
                continue;
            }
            self.labels.push(CompiledLabel {
                id,
                name: name.clone(),
                location: location.clone(),
            });
        }
    }

    fn compile_statements(&mut self, statements: &[Statement]) -> Result<Vec<CompiledStatement>, InternalError> {
        let mut compiled = Vec::with_capacity(statements.len());
        for (index, statement) in statements.iter().enumerate() {
            if let Statement::Goto(target, location) = statement {
                if let Some(Statement::Label(next, _)) = statements.get(index + 1) {
                    if next == target {
                        // `goto L; L:` jumps nowhere
                        if let Some(label) = self.scope.lookup_label(target) {
                            self.references.add_goto(label, location);
                        }
                        compiled.push(CompiledStatement::Empty(location.clone()));
                        continue;
                    }
                }
            }
            if let Some(statement) = recover(self.compile_statement(statement))? {
                compiled.push(statement);
            }
        }
        Ok(compiled)
    }

    fn compile_statement(&mut self, statement: &Statement) -> Lower<CompiledStatement> {
        match statement {
            Statement::Expression(expression) => {
                Ok(CompiledStatement::Expression(self.compile_expression(expression)?))
            }
            Statement::VariableDefinition {
                temp,
                ty,
                name,
                initial,
                location,
            } => self.compile_variable_definition(*temp, ty, name, initial.as_ref(), location),
            Statement::Assignment {
                target,
                value,
                compound,
                location,
            } => self.compile_assignment(target, value, *compound, location),
            Statement::If {
                condition,
                body,
                else_branch,
                location,
            } => Ok(CompiledStatement::If(self.compile_if(
                condition,
                body,
                else_branch.as_deref(),
                location,
            )?)),
            Statement::While {
                condition,
                body,
                location,
            } => {
                let condition = self.compile_expression(condition)?;
                self.expect_condition(&condition)?;
                self.scope.loop_depth += 1;
                let body = self.compile_block(body);
                self.scope.loop_depth -= 1;
                Ok(CompiledStatement::While(CompiledWhile {
                    condition,
                    body: body?,
                    location: location.clone(),
                }))
            }
            Statement::For {
                init,
                condition,
                step,
                body,
                location,
            } => {
                self.scope.push_block();
                let compiled = self.compile_for(init.as_deref(), condition.as_ref(), step.as_deref(), body, location);
                self.scope.pop_block();
                compiled.map(CompiledStatement::For)
            }
            Statement::Return(value, location) => self.compile_return(value.as_ref(), location),
            Statement::Break(location) => {
                if self.scope.loop_depth == 0 {
                    return self.report(Diagnostic::invalid_position("break", "is only allowed inside a loop", location));
                }
                Ok(CompiledStatement::Break(location.clone()))
            }
            Statement::Goto(name, location) => match self.scope.lookup_label(name) {
                Some(label) => {
                    self.references.add_goto(label, location);
                    Ok(CompiledStatement::Goto(label, location.clone()))
                }
                None => self.report(Diagnostic::error(format!("label `{}` not found", name), location)),
            },
            Statement::Label(name, location) => match self.scope.lookup_label(name) {
                Some(label) => Ok(CompiledStatement::Label(label, location.clone())),
                None => Err(InternalError::invariant(format!("label `{}` was not declared", name)).into()),
            },
            Statement::Delete(value, location) => {
                let value = self.compile_expression(value)?;
                let Some(pointee) = value.ty.pointee().cloned() else {
                    return self.report(Diagnostic::type_mismatch("a pointer", &value.ty, location));
                };
                let destructor = self.destructor_for(&pointee, location)?;
                Ok(CompiledStatement::Delete {
                    value,
                    cleanup: CompiledCleanup {
                        destructor,
                        deallocate: true,
                    },
                    location: location.clone(),
                })
            }
            Statement::Crash(value, location) => {
                let value = self.compile_expression(value)?;
                if !value.ty.is_scalar() {
                    return self.report(Diagnostic::type_mismatch("a scalar value", &value.ty, location));
                }
                Ok(CompiledStatement::Crash(value, location.clone()))
            }
            Statement::Block(block) => Ok(CompiledStatement::Block(self.compile_block(block)?)),
        }
    }

    fn compile_variable_definition(
        &mut self,
        temp: bool,
        ty: &TypeInstance,
        name: &str,
        initial: Option<&Expression>,
        location: &Location,
    ) -> Lower<CompiledStatement> {
        let initial = match initial {
            Some(expression) => Some(self.compile_expression(expression)?),
            None => None,
        };
        let (ty, initial) = if ty.is_inferred() {
            let Some(initial) = initial else {
                return self.report(Diagnostic::invalid_position(
                    "var",
                    "needs an initial value to infer from",
                    location,
                ));
            };
            (initial.ty.clone(), Some(initial))
        } else {
            let ty = self.resolve_local_type(ty)?;
            let initial = match initial {
                Some(initial) => Some(self.convert(initial, &ty)?),
                None => None,
            };
            (ty, initial)
        };
        if ty.is_void() {
            return self.report(Diagnostic::type_mismatch("a sized type", &ty, location));
        }
        self.size_of(&ty, location)?;

        let cleanup = if temp {
            let Some(pointee) = ty.pointee().cloned() else {
                return self.report(Diagnostic::invalid_position("temp", "requires a pointer type", location));
            };
            Some(CompiledCleanup {
                destructor: self.destructor_for(&pointee, location)?,
                deallocate: true,
            })
        } else {
            self.destructor_for(&ty, location)?.map(|destructor| CompiledCleanup {
                destructor: Some(destructor),
                deallocate: false,
            })
        };

        let is_global = self.scope.is_global_block();
        let id = VariableId(self.variables.len() as u32);
        let declared = if is_global {
            if self.globals.contains_key(name) {
                false
            } else {
                self.globals.insert(name.to_string(), id);
                true
            }
        } else {
            self.scope.declare_variable(name, id)
        };
        if !declared {
            return self.report(Diagnostic::duplicate_definition("variable", name, location));
        }
        self.variables.push(CompiledVariable {
            id,
            name: name.to_string(),
            ty: ty.clone(),
            scope: if is_global {
                VariableScope::Global
            } else {
                VariableScope::Local(self.scope.function)
            },
            location: location.clone(),
        });
        if initial.is_some() {
            self.references.add_setter(id, location);
        }

        Ok(CompiledStatement::VariableDefinition(CompiledVariableDefinition {
            variable: id,
            ty,
            initial,
            cleanup,
            is_global,
            location: location.clone(),
        }))
    }

    fn compile_assignment(
        &mut self,
        target: &Expression,
        value: &Expression,
        compound: Option<crate::lang::BinaryOp>,
        location: &Location,
    ) -> Lower<CompiledStatement> {
        let target = match target {
            Expression::Identifier(name, location) => self.compile_identifier(name, location, compound.is_some())?,
            Expression::Index { object, index, .. } => {
                let object = self.compile_expression(object)?;
                let index = self.compile_expression(index)?;
                if object.ty.as_struct().is_some() {
                    return self.compile_indexer_set(object, index, value, compound, location);
                }
                self.element_access(object, index, location)?
            }
            other => self.compile_expression(other)?,
        };
        if !target.is_place() {
            return self.report(Diagnostic::error("cannot assign to this expression", location));
        }

        let value = self.compile_expression(value)?;
        let value = match compound {
            Some(op) => {
                let combined = self.compile_binary(op, target.clone(), value, location)?;
                self.convert(combined, &target.ty)?
            }
            None => self.convert(value, &target.ty)?,
        };
        if let Some(variable) = target.root_variable() {
            self.references.add_setter(variable, location);
        }
        Ok(CompiledStatement::Setter(CompiledSetter {
            target,
            value,
            compound: compound.is_some(),
            location: location.clone(),
        }))
    }

    /// `s[i] = v` on a struct calls its `indexer_set`; `s[i] op= v` reads
    /// through `indexer_get` first.
    fn compile_indexer_set(
        &mut self,
        object: CompiledExpression,
        index: CompiledExpression,
        value: &Expression,
        compound: Option<crate::lang::BinaryOp>,
        location: &Location,
    ) -> Lower<CompiledStatement> {
        let Some(structure) = object.ty.as_struct().cloned() else {
            return Err(InternalError::invariant("indexer target is not a struct").into());
        };
        let setters = self.member_functions(
            structure.id,
            FunctionKind::General(structure.id, GeneralFunctionKind::IndexerSet),
            None,
        );
        if setters.is_empty() {
            return self.report(Diagnostic::error(
                format!("type `{}` has no `indexer_set`", object.ty),
                location,
            ));
        }
        let this = self.address_of(object, location)?;
        let mut value = self.compile_expression(value)?;
        if let Some(op) = compound {
            let getters = self.member_functions(
                structure.id,
                FunctionKind::General(structure.id, GeneralFunctionKind::IndexerGet),
                None,
            );
            let (getter, args) =
                self.resolve_call("indexer_get", &getters, &[], vec![this.clone(), index.clone()], location)?;
            let current = self.call_expression(getter, args, location);
            value = self.compile_binary(op, current, value, location)?;
        }
        if let ExpressionKind::AddressOf(inner) = &this.kind {
            if let Some(variable) = inner.root_variable() {
                self.references.add_setter(variable, location);
            }
        }
        let (setter, args) = self.resolve_call("indexer_set", &setters, &[], vec![this, index, value], location)?;
        Ok(CompiledStatement::Expression(self.call_expression(setter, args, location)))
    }

    fn compile_if(
        &mut self,
        condition: &Expression,
        body: &Block,
        else_branch: Option<&Statement>,
        location: &Location,
    ) -> Lower<CompiledIf> {
        let condition = self.compile_expression(condition)?;
        self.expect_condition(&condition)?;
        let body = self.compile_block(body)?;
        let next = match else_branch {
            None => None,
            Some(Statement::If {
                condition,
                body,
                else_branch,
                location,
            }) => Some(Box::new(CompiledBranch::ElseIf(self.compile_if(
                condition,
                body,
                else_branch.as_deref(),
                location,
            )?))),
            Some(Statement::Block(block)) => Some(Box::new(CompiledBranch::Else(self.compile_block(block)?))),
            Some(other) => {
                let block = Block::new(vec![other.clone()], other.location().clone());
                Some(Box::new(CompiledBranch::Else(self.compile_block(&block)?)))
            }
        };
        Ok(CompiledIf {
            condition,
            body,
            next,
            location: location.clone(),
        })
    }

    fn compile_for(
        &mut self,
        init: Option<&Statement>,
        condition: Option<&Expression>,
        step: Option<&Statement>,
        body: &Block,
        location: &Location,
    ) -> Lower<CompiledFor> {
        let init = match init {
            Some(statement) => Some(Box::new(self.compile_statement(statement)?)),
            None => None,
        };
        let condition = match condition {
            Some(expression) => {
                let condition = self.compile_expression(expression)?;
                self.expect_condition(&condition)?;
                Some(condition)
            }
            None => None,
        };
        let step = match step {
            Some(statement) => Some(Box::new(self.compile_statement(statement)?)),
            None => None,
        };
        self.scope.loop_depth += 1;
        let body = self.compile_block(body);
        self.scope.loop_depth -= 1;
        Ok(CompiledFor {
            init,
            condition,
            step,
            body: body?,
            location: location.clone(),
        })
    }

    fn compile_return(&mut self, value: Option<&Expression>, location: &Location) -> Lower<CompiledStatement> {
        let return_type = self.scope.return_type.clone();
        let top_level = self.scope.function.is_none();
        let value = match value {
            Some(expression) => {
                let value = self.compile_expression(expression)?;
                if return_type.is_void() {
                    return self.report(Diagnostic::error("a `void` function cannot return a value", location));
                }
                Some(self.convert(value, &return_type)?)
            }
            None if !return_type.is_void() && !top_level => {
                return self.report(Diagnostic::type_mismatch(&return_type, GeneralType::VOID, location));
            }
            None => None,
        };
        Ok(CompiledStatement::Return(value, location.clone()))
    }
}

