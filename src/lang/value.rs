use serde::{Deserialize, Serialize};

/// A literal as written in source.
///
/// Literals are untyped here; the compiler picks the narrowest type that
/// fits the surrounding context (an integer literal assigned to a `u8`
/// becomes a `u8` without a conversion node).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    /// Integer literal, defaults to `i32`.
    Integer(i64),

    /// Float literal, always `f32`.
    Float(f32),

    /// Character literal, a UTF-16 code unit.
    Char(u16),
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Integer(n) => write!(f, "{}", n),
            Literal::Float(n) => write!(f, "{}f", n),
            Literal::Char(c) => match char::from_u32(*c as u32) {
                Some(ch) => write!(f, "'{}'", ch.escape_default()),
                None => write!(f, "'\\u{{{:04x}}}'", c),
            },
        }
    }
}
