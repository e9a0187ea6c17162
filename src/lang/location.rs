use serde::{Deserialize, Serialize};

/// A 1-based line/column pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self { line: 1, column: 1 }
    }
}

/// Where a node came from: file identity plus position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub position: Position,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            position: Position::new(line, column),
        }
    }
}

impl std::fmt::Display for Location {
    /// Formats as `file:line:col` for CLI-friendly diagnostics.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.file.is_empty() {
            write!(f, "{}:{}", self.position.line, self.position.column)
        } else {
            write!(
                f,
                "{}:{}:{}",
                self.file, self.position.line, self.position.column
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_file() {
        let loc = Location::new("main.cin", 3, 14);
        assert_eq!(loc.to_string(), "main.cin:3:14");
    }

    #[test]
    fn test_display_without_file() {
        let loc = Location::new("", 1, 2);
        assert_eq!(loc.to_string(), "1:2");
    }
}
