//! Function templates, overload resolution and instantiation.
//!
//! Every declared function becomes a [`FunctionTemplate`], generic or not.
//! A [`CompiledFunction`] is an instance of a template for one tuple of
//! type arguments; non-generic templates are instantiated right away so
//! their bodies are checked even when nothing calls them.

use std::rc::Rc;

use tracing::trace;

use crate::lang::{FunctionDefinition, Location, Parameter, ParsedProgram, StructDefinition, TypeInstance};
use crate::types::{GeneralType, StructId, TypeArguments};

use super::compile_error::{InternalError, Lower, recover};
use super::diagnostics::Diagnostic;
use super::entities::{
    CompiledFunction, CompiledParameter, FunctionId, FunctionKind, FunctionOrigin,
    GeneralFunctionKind, TemplateId,
};
use super::scope::FunctionScope;
use super::statement::CompiledExpression;
use super::{Compiler, generic_arguments};

#[derive(Debug, Clone)]
pub(crate) struct FunctionTemplate {
    pub id: TemplateId,
    pub name: String,
    pub kind: FunctionKind,
    pub origin: FunctionOrigin,
    /// Owner struct parameters first, then the function's own.
    pub template_parameters: Vec<String>,
    /// Signature with template parameters left as generics.
    pub parameters: Vec<CompiledParameter>,
    pub return_type: GeneralType,
    pub external: Option<String>,
    pub location: Location,
}

impl FunctionTemplate {
    pub fn is_generic(&self) -> bool {
        !self.template_parameters.is_empty()
    }
}

/// Generic instances may request further instances this many times in a
/// chain before the chain is treated as unbounded.
const MAX_INSTANTIATION_DEPTH: u32 = 64;

/// A template that accepts a call, with what it takes to get there.
struct Candidate {
    template: TemplateId,
    bindings: TypeArguments,
    parameter_types: Vec<GeneralType>,
    cost: u32,
    generic: bool,
}

impl Compiler<'_> {
    // =========================================================================
    // Declaration
    // =========================================================================

    pub(crate) fn declare_functions(&mut self, program: &ParsedProgram) -> Result<(), InternalError> {
        for file in &program.files {
            for definition in &file.functions {
                recover(self.declare_function(definition, FunctionKind::Function, None))?;
            }
            for definition in &file.operators {
                if definition.parameters.len() != 2 {
                    self.diagnostics.add(Diagnostic::error(
                        format!("operator `{}` must take exactly two parameters", definition.name),
                        &definition.location,
                    ));
                    continue;
                }
                recover(self.declare_function(definition, FunctionKind::Operator, None))?;
            }
        }

        for index in 0..self.structs.len() {
            let structure = Rc::clone(&self.structs[index].definition);
            let id = self.structs[index].id;
            self.declare_members(id, &structure)?;
        }

        // Instantiate everything that needs no type arguments.
        for index in 0..self.templates.len() {
            let template = &self.templates[index];
            if template.is_generic() {
                continue;
            }
            let (id, location) = (template.id, template.location.clone());
            recover(self.instantiate(id, TypeArguments::new(), &location))?;
        }
        Ok(())
    }

    fn declare_members(&mut self, id: StructId, structure: &Rc<StructDefinition>) -> Result<(), InternalError> {
        let owner = Some((id, structure));
        for method in &structure.methods {
            recover(self.declare_function(&Rc::new(method.clone()), FunctionKind::Method(id), owner))?;
        }
        for (index, constructor) in structure.constructors.iter().enumerate() {
            let origin = FunctionOrigin::Constructor(Rc::clone(structure), index);
            let void = TypeInstance::simple("void", constructor.location.clone());
            recover(self.declare_template(
                &structure.name,
                FunctionKind::Constructor(id),
                origin,
                &[],
                &void,
                &constructor.parameters,
                None,
                owner,
                &constructor.location,
            ))?;
        }
        if structure.destructor.is_some() {
            let origin = FunctionOrigin::Destructor(Rc::clone(structure));
            let void = TypeInstance::simple("void", structure.location.clone());
            recover(self.declare_template(
                GeneralFunctionKind::Destructor.name(),
                FunctionKind::General(id, GeneralFunctionKind::Destructor),
                origin,
                &[],
                &void,
                &[],
                None,
                owner,
                &structure.location,
            ))?;
        }
        let indexers = [
            (&structure.indexer_get, GeneralFunctionKind::IndexerGet, 1),
            (&structure.indexer_set, GeneralFunctionKind::IndexerSet, 2),
        ];
        for (indexer, kind, arity) in indexers {
            let Some(definition) = indexer else {
                continue;
            };
            if definition.parameters.len() != arity {
                self.diagnostics.add(Diagnostic::error(
                    format!("`{}` must take {} parameter(s)", kind.name(), arity),
                    &definition.location,
                ));
                continue;
            }
            recover(self.declare_function(
                &Rc::new(definition.clone()),
                FunctionKind::General(id, kind),
                owner,
            ))?;
        }
        Ok(())
    }

    fn declare_function(
        &mut self,
        definition: &Rc<FunctionDefinition>,
        kind: FunctionKind,
        owner: Option<(StructId, &Rc<StructDefinition>)>,
    ) -> Lower<TemplateId> {
        if definition.external.is_some() && !definition.template_parameters.is_empty() {
            return self.report(Diagnostic::error(
                format!("external function `{}` cannot be generic", definition.name),
                &definition.location,
            ));
        }
        if definition.external.is_none() && definition.body.is_none() {
            return self.report(Diagnostic::error(
                format!("function `{}` has no body", definition.name),
                &definition.location,
            ));
        }
        self.declare_template(
            &definition.name,
            kind,
            FunctionOrigin::Function(Rc::clone(definition)),
            &definition.template_parameters,
            &definition.return_type,
            &definition.parameters,
            definition.external.clone(),
            owner,
            &definition.location,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn declare_template(
        &mut self,
        name: &str,
        kind: FunctionKind,
        origin: FunctionOrigin,
        own_parameters: &[String],
        return_type: &TypeInstance,
        parameters: &[Parameter],
        external: Option<String>,
        owner: Option<(StructId, &Rc<StructDefinition>)>,
        location: &Location,
    ) -> Lower<TemplateId> {
        let mut template_parameters: Vec<String> = owner
            .map(|(_, s)| s.template_parameters.clone())
            .unwrap_or_default();
        template_parameters.extend(own_parameters.iter().cloned());
        let arguments = generic_arguments(&template_parameters);

        let mut compiled = Vec::with_capacity(parameters.len() + 1);
        if let Some((id, structure)) = owner {
            let this = GeneralType::structure(
                id,
                structure.name.clone(),
                generic_arguments(&structure.template_parameters),
            );
            compiled.push(CompiledParameter {
                name: "this".to_string(),
                ty: GeneralType::pointer(this),
                location: location.clone(),
            });
        }
        for parameter in parameters {
            if compiled.iter().any(|p: &CompiledParameter| p.name == parameter.name) {
                return self.report(Diagnostic::duplicate_definition(
                    "parameter",
                    &parameter.name,
                    &parameter.location,
                ));
            }
            let ty = self.resolve_type(&parameter.ty, &arguments)?;
            if ty.is_void() {
                return self.report(Diagnostic::type_mismatch("a sized type", &ty, &parameter.location));
            }
            compiled.push(CompiledParameter {
                name: parameter.name.clone(),
                ty,
                location: parameter.location.clone(),
            });
        }
        let return_type = self.resolve_type(return_type, &arguments)?;

        let duplicate = self.templates.iter().any(|t| {
            t.name == name
                && t.kind == kind
                && t.template_parameters.len() == template_parameters.len()
                && t.parameters.len() == compiled.len()
                && t.parameters.iter().zip(&compiled).all(|(a, b)| a.ty.strict_eq(&b.ty))
        });
        if duplicate {
            return self.report(Diagnostic::duplicate_definition("function", name, location));
        }

        let id = TemplateId(self.templates.len() as u32);
        self.templates.push(FunctionTemplate {
            id,
            name: name.to_string(),
            kind,
            origin,
            template_parameters,
            parameters: compiled,
            return_type,
            external,
            location: location.clone(),
        });
        Ok(id)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub(crate) fn templates_where(&self, predicate: impl Fn(&FunctionTemplate) -> bool) -> Vec<TemplateId> {
        self.templates
            .iter()
            .filter(|t| predicate(t))
            .map(|t| t.id)
            .collect()
    }

    pub(crate) fn free_functions(&self, name: &str) -> Vec<TemplateId> {
        self.templates_where(|t| t.kind == FunctionKind::Function && t.name == name)
    }

    pub(crate) fn member_functions(&self, owner: StructId, kind: FunctionKind, name: Option<&str>) -> Vec<TemplateId> {
        self.templates_where(|t| {
            t.kind.owner() == Some(owner) && t.kind == kind && name.is_none_or(|n| t.name == n)
        })
    }

    /// The destructor instance for a struct instantiation, if it has one.
    pub(crate) fn destructor_for(&mut self, ty: &GeneralType, location: &Location) -> Lower<Option<FunctionId>> {
        let Some(structure) = ty.as_struct() else {
            return Ok(None);
        };
        let kind = FunctionKind::General(structure.id, GeneralFunctionKind::Destructor);
        let Some(&template) = self.member_functions(structure.id, kind, None).first() else {
            return Ok(None);
        };
        let bindings = structure.type_arguments.clone();
        let function = self.instantiate(template, bindings, location)?;
        self.functions[function.index()].references.push(location.clone());
        Ok(Some(function))
    }

    // =========================================================================
    // Overload resolution
    // =========================================================================

    /// Picks the best template for `args` and returns its instance with the
    /// arguments converted to the parameter types.
    ///
    /// A candidate matches if the counts agree, its template parameters can
    /// be bound (explicitly or by inference) and every argument converts.
    /// Lower total conversion cost wins; on a tie a non-generic candidate
    /// beats a generic one; any remaining tie is ambiguous.
    pub(crate) fn resolve_call(
        &mut self,
        name: &str,
        candidates: &[TemplateId],
        type_arguments: &[GeneralType],
        args: Vec<CompiledExpression>,
        location: &Location,
    ) -> Lower<(FunctionId, Vec<CompiledExpression>)> {
        let mut matches: Vec<Candidate> = Vec::new();
        for &id in candidates {
            if let Some(candidate) = self.match_candidate(id, type_arguments, &args)? {
                matches.push(candidate);
            }
        }

        let Some(best) = matches.iter().map(|c| (c.cost, c.generic)).min() else {
            let described: Vec<String> = args.iter().map(|a| a.ty.to_string()).collect();
            return self.report(Diagnostic::no_matching_overload(name, &described, location));
        };
        let mut winners: Vec<Candidate> = matches
            .into_iter()
            .filter(|c| (c.cost, c.generic) == best)
            .collect();
        if winners.len() > 1 {
            return self.report(Diagnostic::ambiguous_call(name, winners.len(), location));
        }
        let Some(winner) = winners.pop() else {
            return Err(InternalError::invariant("overload winner vanished").into());
        };

        let function = self.instantiate(winner.template, winner.bindings, location)?;
        self.functions[function.index()].references.push(location.clone());

        let mut converted = Vec::with_capacity(args.len());
        for (arg, ty) in args.into_iter().zip(&winner.parameter_types) {
            converted.push(self.convert(arg, ty)?);
        }
        Ok((function, converted))
    }

    fn match_candidate(
        &self,
        id: TemplateId,
        type_arguments: &[GeneralType],
        args: &[CompiledExpression],
    ) -> Lower<Option<Candidate>> {
        let template = &self.templates[id.index()];
        if template.parameters.len() != args.len() {
            return Ok(None);
        }
        let mut bindings = TypeArguments::new();
        if !type_arguments.is_empty() {
            // Explicit arguments bind the function's own parameters, which
            // follow the owner struct's.
            let own = template.template_parameters.len().saturating_sub(type_arguments.len());
            if template.template_parameters.len() < type_arguments.len() {
                return Ok(None);
            }
            for (name, ty) in template.template_parameters[own..].iter().zip(type_arguments) {
                bindings.insert(name.clone(), ty.clone());
            }
        }
        for (parameter, arg) in template.parameters.iter().zip(args) {
            if parameter.ty.contains_generic() && !parameter.ty.infer(&arg.ty, &mut bindings) {
                return Ok(None);
            }
        }
        if template
            .template_parameters
            .iter()
            .any(|p| !bindings.contains_key(p))
        {
            return Ok(None);
        }

        let mut parameter_types = Vec::with_capacity(args.len());
        let mut cost = 0;
        for (parameter, arg) in template.parameters.iter().zip(args) {
            let ty = parameter
                .ty
                .substitute(&bindings)
                .map_err(InternalError::from)?;
            match self.implicit_coercion(arg, &ty) {
                Some(coercion) => cost += coercion.cost(),
                None => return Ok(None),
            }
            parameter_types.push(ty);
        }
        Ok(Some(Candidate {
            template: id,
            bindings,
            parameter_types,
            cost,
            generic: template.is_generic(),
        }))
    }

    // =========================================================================
    // Instantiation
    // =========================================================================

    /// Returns the instance of `template` for `bindings`, creating and
    /// queueing it on first use.
    pub(crate) fn instantiate(
        &mut self,
        template: TemplateId,
        bindings: TypeArguments,
        location: &Location,
    ) -> Lower<FunctionId> {
        let source = self.templates[template.index()].clone();
        let key: Vec<String> = source
            .template_parameters
            .iter()
            .map(|p| bindings.get(p).map(GeneralType::key).unwrap_or_default())
            .collect();
        if let Some(&existing) = self.instances.get(&(template, key.clone())) {
            return Ok(existing);
        }

        let requested_by = self
            .scope
            .function
            .and_then(|f| self.instantiation_depth.get(&f).copied())
            .unwrap_or(0);
        let depth = if source.is_generic() { requested_by + 1 } else { 0 };
        if depth > MAX_INSTANTIATION_DEPTH {
            return self.report(Diagnostic::error(
                format!(
                    "recursive template instantiation of `{}` exceeds depth {}",
                    source.name, MAX_INSTANTIATION_DEPTH
                ),
                location,
            ));
        }

        let type_arguments: TypeArguments = source
            .template_parameters
            .iter()
            .filter_map(|p| bindings.get(p).map(|ty| (p.clone(), ty.clone())))
            .collect();
        let mut parameters = Vec::with_capacity(source.parameters.len());
        for parameter in &source.parameters {
            parameters.push(CompiledParameter {
                ty: parameter.ty.substitute(&type_arguments).map_err(InternalError::from)?,
                ..parameter.clone()
            });
        }
        let return_type = source
            .return_type
            .substitute(&type_arguments)
            .map_err(InternalError::from)?;
        for parameter in &parameters {
            self.size_of(&parameter.ty, location)?;
        }

        let external = match &source.external {
            Some(name) => Some(self.bind_external(name, &parameters, &return_type, &source.location)?),
            None => None,
        };

        let id = FunctionId(self.functions.len() as u32);
        trace!(function = %source.name, id = id.0, arguments = ?key, "instantiated");
        let has_body = source.origin.body().is_some();
        self.functions.push(CompiledFunction {
            id,
            name: source.name.clone(),
            kind: source.kind,
            return_type,
            parameters,
            origin: source.origin.clone(),
            template,
            type_arguments,
            external,
            body: None,
            references: Vec::new(),
            instruction_offset: None,
            location: source.location.clone(),
        });
        self.instances.insert((template, key), id);
        self.instantiation_depth.insert(id, depth);
        if has_body {
            self.pending.push_back(id);
        }
        Ok(id)
    }

    fn bind_external(
        &mut self,
        name: &str,
        parameters: &[CompiledParameter],
        return_type: &GeneralType,
        location: &Location,
    ) -> Lower<crate::bytecode::ExternalFunctionInfo> {
        let Some(info) = self.externals.iter().find(|e| e.name == name).cloned() else {
            return self.report(Diagnostic::error(
                format!("external function `{}` is not provided by the host", name),
                location,
            ));
        };
        let mut parameters_size = 0;
        for parameter in parameters {
            parameters_size += self.size_of(&parameter.ty, location)?;
        }
        let return_size = if return_type.is_void() {
            0
        } else {
            self.size_of(return_type, location)?
        };
        if parameters_size != info.parameters_size || return_size != info.return_size {
            return self.report(Diagnostic::error(
                format!(
                    "external function `{}` takes {} bytes and returns {}, but the declaration takes {} and returns {}",
                    name, info.parameters_size, info.return_size, parameters_size, return_size
                ),
                location,
            ));
        }
        Ok(info)
    }

    // =========================================================================
    // Bodies
    // =========================================================================

    pub(crate) fn compile_pending(&mut self) -> Result<(), InternalError> {
        while let Some(id) = self.pending.pop_front() {
            self.compile_function_body(id)?;
        }
        Ok(())
    }

    fn compile_function_body(&mut self, id: FunctionId) -> Result<(), InternalError> {
        let function = &self.functions[id.index()];
        let origin = function.origin.clone();
        let Some(body) = origin.body() else {
            return Ok(());
        };
        let _span = tracing::trace_span!("function", name = %function.name).entered();
        self.scope = FunctionScope::function(
            id,
            function.return_type.clone(),
            function.parameters.clone(),
            function.type_arguments.clone(),
        );
        let block = self.compile_block(body)?;
        self.functions[id.index()].body = Some(block);
        self.scope = FunctionScope::top_level();
        Ok(())
    }
}
