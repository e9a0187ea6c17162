use crate::lang::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    Hint,
    Warning,
    Error,
}

impl std::fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagnosticLevel::Hint => write!(f, "hint"),
            DiagnosticLevel::Warning => write!(f, "warning"),
            DiagnosticLevel::Error => write!(f, "error"),
        }
    }
}

/// A user-facing compile-time message.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    pub location: Location,
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, location: &Location) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            message: message.into(),
            location: location.clone(),
            hint: None,
        }
    }

    pub fn warning(message: impl Into<String>, location: &Location) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            message: message.into(),
            location: location.clone(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagnosticLevel::Error
    }

    // ─────────────────────────── Constructors ───────────────────────────

    pub fn unresolved_identifier(name: &str, location: &Location) -> Self {
        Self::error(format!("symbol `{}` not found", name), location)
    }

    pub fn unresolved_type(name: &str, location: &Location) -> Self {
        Self::error(format!("type `{}` not found", name), location)
    }

    pub fn duplicate_definition(kind: &str, name: &str, location: &Location) -> Self {
        Self::error(format!("{} `{}` is already defined", kind, name), location)
    }

    pub fn type_mismatch(expected: impl std::fmt::Display, got: impl std::fmt::Display, location: &Location) -> Self {
        Self::error(
            format!("type mismatch: expected `{}`, got `{}`", expected, got),
            location,
        )
    }

    pub fn no_matching_overload(name: &str, arguments: &[String], location: &Location) -> Self {
        Self::error(
            format!(
                "no function `{}` accepts arguments ({})",
                name,
                arguments.join(", ")
            ),
            location,
        )
    }

    pub fn ambiguous_call(name: &str, candidates: usize, location: &Location) -> Self {
        Self::error(
            format!("call to `{}` is ambiguous between {} overloads", name, candidates),
            location,
        )
        .with_hint("add an explicit cast to pick one overload")
    }

    pub fn unsized_field(structure: &str, field: &str, reason: impl std::fmt::Display, location: &Location) -> Self {
        Self::error(
            format!("field `{}.{}` has no size: {}", structure, field, reason),
            location,
        )
    }

    pub fn invalid_position(what: &str, reason: &str, location: &Location) -> Self {
        Self::error(format!("`{}` {}", what, reason), location)
    }
}

impl std::fmt::Display for Diagnostic {
    /// Formats as `file:line:col: level: message` with an optional hint line.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.location, self.level, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// Diagnostics accumulated over one compilation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagnosticsCollection {
    items: Vec<Diagnostic>,
}

impl DiagnosticsCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(Diagnostic::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.items.iter().filter(|d| d.is_error()).count()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Warning)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl std::fmt::Display for DiagnosticsCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, diagnostic) in self.items.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", diagnostic)?;
        }
        Ok(())
    }
}
