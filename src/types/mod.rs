//! Resolved types.
//!
//! [`GeneralType`] is the closed set of type shapes the compiler works
//! with after name resolution. Layout queries (`size`, `bit_width`) need a
//! [`LayoutProvider`] because struct fields live in the compiler's struct
//! arena and pointer sizes come from the target.

pub mod builtin;
pub mod error;
pub mod layout;

use std::collections::BTreeMap;
use std::fmt::Write as _;

pub use builtin::{BitWidth, BuiltinType, NumericType};
pub use error::TypeError;
pub use layout::{CompiledField, FieldOffset, LayoutProvider, RuntimeInfoProvider};

/// Stable identity of a struct definition (an arena index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructId(pub u32);

/// Template parameter name to bound type. Ordered so keys are stable.
pub type TypeArguments = BTreeMap<String, GeneralType>;

/// A struct definition paired with its template arguments.
#[derive(Debug, Clone)]
pub struct StructType {
    pub id: StructId,
    pub name: String,
    pub type_arguments: TypeArguments,
}

#[derive(Debug, Clone)]
pub struct ArrayType {
    pub of: Box<GeneralType>,
    pub length: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct FunctionType {
    pub return_type: Box<GeneralType>,
    pub parameters: Vec<GeneralType>,
}

/// An unresolved template parameter.
#[derive(Debug, Clone)]
pub struct GenericType {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct AliasType {
    pub name: String,
    pub value: Box<GeneralType>,
}

#[derive(Debug, Clone)]
pub enum GeneralType {
    Builtin(BuiltinType),
    Pointer(Box<GeneralType>),
    Array(ArrayType),
    Function(FunctionType),
    Struct(StructType),
    Generic(GenericType),
    Alias(AliasType),
}

/// Guards against structs that contain themselves by value.
const MAX_LAYOUT_DEPTH: u32 = 64;

impl GeneralType {
    pub const VOID: GeneralType = GeneralType::Builtin(BuiltinType::Void);
    pub const ANY: GeneralType = GeneralType::Builtin(BuiltinType::Any);
    pub const U8: GeneralType = GeneralType::Builtin(BuiltinType::U8);
    pub const I8: GeneralType = GeneralType::Builtin(BuiltinType::I8);
    pub const CHAR: GeneralType = GeneralType::Builtin(BuiltinType::Char);
    pub const I16: GeneralType = GeneralType::Builtin(BuiltinType::I16);
    pub const U16: GeneralType = GeneralType::Builtin(BuiltinType::U16);
    pub const U32: GeneralType = GeneralType::Builtin(BuiltinType::U32);
    pub const I32: GeneralType = GeneralType::Builtin(BuiltinType::I32);
    pub const U64: GeneralType = GeneralType::Builtin(BuiltinType::U64);
    pub const I64: GeneralType = GeneralType::Builtin(BuiltinType::I64);
    pub const F32: GeneralType = GeneralType::Builtin(BuiltinType::F32);

    pub fn pointer(to: GeneralType) -> Self {
        GeneralType::Pointer(Box::new(to))
    }

    pub fn array(of: GeneralType, length: Option<u32>) -> Self {
        GeneralType::Array(ArrayType {
            of: Box::new(of),
            length,
        })
    }

    pub fn function(return_type: GeneralType, parameters: Vec<GeneralType>) -> Self {
        GeneralType::Function(FunctionType {
            return_type: Box::new(return_type),
            parameters,
        })
    }

    pub fn generic(name: impl Into<String>) -> Self {
        GeneralType::Generic(GenericType { name: name.into() })
    }

    pub fn structure(id: StructId, name: impl Into<String>, type_arguments: TypeArguments) -> Self {
        GeneralType::Struct(StructType {
            id,
            name: name.into(),
            type_arguments,
        })
    }

    pub fn alias(name: impl Into<String>, value: GeneralType) -> Self {
        GeneralType::Alias(AliasType {
            name: name.into(),
            value: Box::new(value),
        })
    }

    /// Follows alias chains to the underlying type.
    pub fn resolved(&self) -> &GeneralType {
        let mut current = self;
        while let GeneralType::Alias(alias) = current {
            current = &alias.value;
        }
        current
    }

    pub fn as_builtin(&self) -> Option<BuiltinType> {
        match self.resolved() {
            GeneralType::Builtin(builtin) => Some(*builtin),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructType> {
        match self.resolved() {
            GeneralType::Struct(structure) => Some(structure),
            _ => None,
        }
    }

    pub fn pointee(&self) -> Option<&GeneralType> {
        match self.resolved() {
            GeneralType::Pointer(to) => Some(to),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        self.as_builtin() == Some(BuiltinType::Void)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.resolved(), GeneralType::Pointer(_))
    }

    pub fn is_float(&self) -> bool {
        self.as_builtin() == Some(BuiltinType::F32)
    }

    /// True if the type can live in a register (builtin scalar, pointer or
    /// function value).
    pub fn is_scalar(&self) -> bool {
        match self.resolved() {
            GeneralType::Builtin(builtin) => builtin.size().is_ok(),
            GeneralType::Pointer(_) | GeneralType::Function(_) => true,
            _ => false,
        }
    }

    /// Maps the type to its arithmetic class. Pointers count as signed
    /// integers.
    pub fn numeric_type(&self) -> Option<NumericType> {
        match self.resolved() {
            GeneralType::Builtin(builtin) => builtin.numeric_type(),
            GeneralType::Pointer(_) => Some(NumericType::SignedInteger),
            _ => None,
        }
    }

    /// True if a template parameter occurs anywhere inside.
    pub fn contains_generic(&self) -> bool {
        match self {
            GeneralType::Builtin(_) => false,
            GeneralType::Pointer(to) => to.contains_generic(),
            GeneralType::Array(array) => array.of.contains_generic(),
            GeneralType::Function(function) => {
                function.return_type.contains_generic()
                    || function.parameters.iter().any(GeneralType::contains_generic)
            }
            GeneralType::Struct(structure) => structure
                .type_arguments
                .values()
                .any(GeneralType::contains_generic),
            GeneralType::Generic(_) => true,
            GeneralType::Alias(alias) => alias.value.contains_generic(),
        }
    }

    pub fn size(&self, layout: &dyn LayoutProvider) -> Result<u32, TypeError> {
        self.size_at_depth(layout, 0)
    }

    pub(crate) fn size_at_depth(
        &self,
        layout: &dyn LayoutProvider,
        depth: u32,
    ) -> Result<u32, TypeError> {
        if depth > MAX_LAYOUT_DEPTH {
            return Err(TypeError::Recursive(self.to_string()));
        }
        match self {
            GeneralType::Builtin(builtin) => builtin.size(),
            GeneralType::Pointer(_) | GeneralType::Function(_) => Ok(layout.pointer_size()),
            GeneralType::Array(array) => {
                let length = array
                    .length
                    .ok_or_else(|| TypeError::UnknownLength(array.of.to_string()))?;
                array
                    .of
                    .size_at_depth(layout, depth + 1)?
                    .checked_mul(length)
                    .ok_or_else(|| TypeError::too_large(self.to_string()))
            }
            GeneralType::Struct(structure) => structure.size_at_depth(layout, depth + 1),
            GeneralType::Generic(generic) => Err(TypeError::GenericSize(generic.name.clone())),
            GeneralType::Alias(alias) => alias.value.size_at_depth(layout, depth),
        }
    }

    pub fn bit_width(&self, layout: &dyn LayoutProvider) -> Result<BitWidth, TypeError> {
        if let GeneralType::Generic(generic) = self.resolved() {
            return Err(TypeError::GenericSize(generic.name.clone()));
        }
        let size = self.size(layout)?;
        BitWidth::from_size(size).ok_or_else(|| TypeError::NoBitWidth(self.to_string()))
    }

    /// Replaces every template parameter with its bound argument.
    pub fn substitute(&self, arguments: &TypeArguments) -> Result<GeneralType, TypeError> {
        Ok(match self {
            GeneralType::Builtin(_) => self.clone(),
            GeneralType::Pointer(to) => GeneralType::pointer(to.substitute(arguments)?),
            GeneralType::Array(array) => {
                GeneralType::array(array.of.substitute(arguments)?, array.length)
            }
            GeneralType::Function(function) => GeneralType::function(
                function.return_type.substitute(arguments)?,
                function
                    .parameters
                    .iter()
                    .map(|p| p.substitute(arguments))
                    .collect::<Result<_, _>>()?,
            ),
            GeneralType::Struct(structure) => {
                let mut type_arguments = TypeArguments::new();
                for (name, value) in &structure.type_arguments {
                    type_arguments.insert(name.clone(), value.substitute(arguments)?);
                }
                GeneralType::structure(structure.id, structure.name.clone(), type_arguments)
            }
            GeneralType::Generic(generic) => arguments
                .get(&generic.name)
                .cloned()
                .ok_or_else(|| TypeError::TypeArgumentNotFound(generic.name.clone()))?,
            GeneralType::Alias(alias) => {
                GeneralType::alias(alias.name.clone(), alias.value.substitute(arguments)?)
            }
        })
    }

    /// Binds template parameters in `self` (a parameter pattern) by matching
    /// it against `actual`. Returns false on a shape mismatch or a
    /// conflicting binding.
    pub fn infer(&self, actual: &GeneralType, bindings: &mut TypeArguments) -> bool {
        match (self.resolved(), actual.resolved()) {
            (GeneralType::Generic(generic), _) => match bindings.get(&generic.name) {
                Some(bound) => bound.strict_eq(actual),
                None => {
                    bindings.insert(generic.name.clone(), actual.resolved().clone());
                    true
                }
            },
            (GeneralType::Pointer(pattern), GeneralType::Pointer(actual)) => {
                pattern.infer(actual, bindings)
            }
            (GeneralType::Array(pattern), GeneralType::Array(actual)) => {
                pattern.of.infer(&actual.of, bindings)
            }
            (GeneralType::Function(pattern), GeneralType::Function(actual)) => {
                pattern.parameters.len() == actual.parameters.len()
                    && pattern.return_type.infer(&actual.return_type, bindings)
                    && pattern
                        .parameters
                        .iter()
                        .zip(&actual.parameters)
                        .all(|(p, a)| p.infer(a, bindings))
            }
            (GeneralType::Struct(pattern), GeneralType::Struct(actual)) => {
                pattern.id == actual.id
                    && pattern.type_arguments.iter().all(|(name, p)| {
                        actual
                            .type_arguments
                            .get(name)
                            .is_some_and(|a| p.infer(a, bindings))
                    })
            }
            (pattern, actual) => pattern.strict_eq(actual),
        }
    }

    /// Equality that also distinguishes struct instantiations.
    pub fn strict_eq(&self, other: &GeneralType) -> bool {
        match (self.resolved(), other.resolved()) {
            (GeneralType::Struct(a), GeneralType::Struct(b)) => {
                a.id == b.id
                    && a.type_arguments.len() == b.type_arguments.len()
                    && a.type_arguments
                        .iter()
                        .zip(&b.type_arguments)
                        .all(|((na, ta), (nb, tb))| na == nb && ta.strict_eq(tb))
            }
            (GeneralType::Pointer(a), GeneralType::Pointer(b)) => a.strict_eq(b),
            (GeneralType::Array(a), GeneralType::Array(b)) => {
                a.length == b.length && a.of.strict_eq(&b.of)
            }
            (GeneralType::Function(a), GeneralType::Function(b)) => {
                a.return_type.strict_eq(&b.return_type)
                    && a.parameters.len() == b.parameters.len()
                    && a.parameters
                        .iter()
                        .zip(&b.parameters)
                        .all(|(x, y)| x.strict_eq(y))
            }
            (a, b) => a == b,
        }
    }

    /// Structural key used to cache template instantiations. Unlike
    /// `Display`, it names structs by identity.
    pub fn key(&self) -> String {
        let mut out = String::new();
        self.write_key(&mut out);
        out
    }

    fn write_key(&self, out: &mut String) {
        match self.resolved() {
            GeneralType::Builtin(builtin) => out.push_str(builtin.name()),
            GeneralType::Pointer(to) => {
                to.write_key(out);
                out.push('*');
            }
            GeneralType::Array(array) => {
                array.of.write_key(out);
                match array.length {
                    Some(length) => {
                        let _ = write!(out, "[{}]", length);
                    }
                    None => out.push_str("[]"),
                }
            }
            GeneralType::Function(function) => {
                function.return_type.write_key(out);
                out.push('(');
                for (i, param) in function.parameters.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    param.write_key(out);
                }
                out.push(')');
            }
            GeneralType::Struct(structure) => {
                let _ = write!(out, "#{}", structure.id.0);
                if !structure.type_arguments.is_empty() {
                    out.push('<');
                    for (i, (name, value)) in structure.type_arguments.iter().enumerate() {
                        if i > 0 {
                            out.push(',');
                        }
                        out.push_str(name);
                        out.push('=');
                        value.write_key(out);
                    }
                    out.push('>');
                }
            }
            GeneralType::Generic(generic) => {
                out.push('$');
                out.push_str(&generic.name);
            }
            GeneralType::Alias(alias) => alias.value.write_key(out),
        }
    }
}

impl PartialEq for GeneralType {
    /// Struct types compare by definition identity only; use
    /// [`GeneralType::strict_eq`] to tell instantiations apart.
    fn eq(&self, other: &Self) -> bool {
        match (self.resolved(), other.resolved()) {
            (GeneralType::Builtin(a), GeneralType::Builtin(b)) => a == b,
            (GeneralType::Pointer(a), GeneralType::Pointer(b)) => a == b,
            (GeneralType::Array(a), GeneralType::Array(b)) => a.length == b.length && a.of == b.of,
            (GeneralType::Function(a), GeneralType::Function(b)) => {
                a.return_type == b.return_type && a.parameters == b.parameters
            }
            (GeneralType::Struct(a), GeneralType::Struct(b)) => a.id == b.id,
            (GeneralType::Generic(a), GeneralType::Generic(b)) => a.name == b.name,
            _ => false,
        }
    }
}

impl From<BuiltinType> for GeneralType {
    fn from(builtin: BuiltinType) -> Self {
        GeneralType::Builtin(builtin)
    }
}

impl std::fmt::Display for GeneralType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeneralType::Builtin(builtin) => write!(f, "{}", builtin),
            GeneralType::Pointer(to) => write!(f, "{}*", to),
            GeneralType::Array(array) => match array.length {
                Some(length) => write!(f, "{}[{}]", array.of, length),
                None => write!(f, "{}[]", array.of),
            },
            GeneralType::Function(function) => {
                write!(f, "{}(", function.return_type)?;
                for (i, param) in function.parameters.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param)?;
                }
                write!(f, ")")
            }
            GeneralType::Struct(structure) => {
                write!(f, "{}", structure.name)?;
                if !structure.type_arguments.is_empty() {
                    write!(f, "<")?;
                    for (i, value) in structure.type_arguments.values().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", value)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            GeneralType::Generic(generic) => write!(f, "{}", generic.name),
            GeneralType::Alias(alias) => write!(f, "{}", alias.name),
        }
    }
}
