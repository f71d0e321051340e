// ABOUTME: Ordered, severity-tagged diagnostic list shared by lexer/parser/compiler reporting

use crate::position::LexerPosition;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    #[serde(serialize_with = "serialize_position")]
    pub position: Option<LexerPosition>,
    pub message: String,
}

fn serialize_position<S>(
    position: &Option<LexerPosition>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match position {
        Some(p) => serializer.serialize_str(&p.to_string()),
        None => serializer.serialize_none(),
    }
}

impl Diagnostic {
    pub fn new(severity: Severity, position: Option<LexerPosition>, message: impl Into<String>) -> Self {
        Diagnostic {
            severity,
            position,
            message: message.into(),
        }
    }

    pub fn error(position: Option<LexerPosition>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, position, message)
    }

    pub fn warning(position: Option<LexerPosition>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, position, message)
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sev = match self.severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        };
        match &self.position {
            Some(pos) => write!(f, "{sev}: {}: {}", pos, self.message),
            None => write!(f, "{sev}: {}", self.message),
        }
    }
}

/// The ordered list of diagnostics accumulated by one lex/parse/compile pass.
#[derive(Debug, Default, Clone)]
pub struct DiagnosticList {
    messages: Vec<Diagnostic>,
}

impl DiagnosticList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.messages.push(diagnostic);
    }

    pub fn error(&mut self, position: Option<LexerPosition>, message: impl Into<String>) {
        self.push(Diagnostic::error(position, message));
    }

    pub fn has_errors(&self) -> bool {
        self.messages
            .iter()
            .any(|m| matches!(m.severity, Severity::Error | Severity::Fatal))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.messages.iter()
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_errors_ignores_warnings() {
        let mut list = DiagnosticList::new();
        list.push(Diagnostic::warning(None, "heads up"));
        assert!(!list.has_errors());
        list.error(None, "boom");
        assert!(list.has_errors());
    }

    #[test]
    fn preserves_order() {
        let mut list = DiagnosticList::new();
        list.error(None, "first");
        list.error(None, "second");
        let messages: Vec<_> = list.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }
}
