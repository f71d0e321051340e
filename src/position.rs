// ABOUTME: Source position records attached to tokens, AST nodes, and diagnostics

use std::rc::Rc;

/// `(filename, line, column, line_start_offset, length)` — the position of a
/// span of source text. Cheap to clone (the filename is shared via `Rc`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexerPosition {
    pub filename: Rc<str>,
    pub line: i32,
    pub column: i32,
    pub line_start: usize,
    pub length: i32,
}

impl LexerPosition {
    pub fn new(filename: Rc<str>, line: i32, column: i32, line_start: usize, length: i32) -> Self {
        LexerPosition {
            filename,
            line,
            column,
            line_start,
            length,
        }
    }
}

impl std::fmt::Display for LexerPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.filename, self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_as_file_line_column() {
        let pos = LexerPosition::new(Rc::from("test.sm"), 3, 7, 40, 4);
        assert_eq!(format!("{}", pos), "test.sm:3:7");
    }

    #[test]
    fn equality_ignores_nothing_but_content() {
        let a = LexerPosition::new(Rc::from("f.sm"), 1, 1, 0, 1);
        let b = LexerPosition::new(Rc::from("f.sm"), 1, 1, 0, 1);
        assert_eq!(a, b);
    }
}
