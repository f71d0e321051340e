// ABOUTME: Fatal/library-boundary error types; recoverable lex/parse/compile
// ABOUTME: problems go through diagnostics::DiagnosticList instead

use thiserror::Error;

/// Errors that cross a library boundary and are not part of the normal
/// diagnostic-accumulation regime described in spec.md §7: out-of-memory
/// and invariant violations abort the process via `abort_fatal` rather than
/// being returned, so the only things that reach this type in practice are
/// CLI-level I/O failures and runtime misuse (double init, reset while a
/// compile is in flight).
#[derive(Error, Debug)]
pub enum SmileCoreError {
    #[error("failed to read source file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("runtime was reset while a compilation was in flight")]
    ResetWhileActive,

    #[error("symbol id {0} was never interned by this table")]
    UnknownSymbol(u32),
}

/// Abort the process on an unrecoverable invariant violation (spec.md §7,
/// §5: "Process-wide state ... must not run while any compilation or
/// execution is in flight"). This is deliberately not a `Result` — the
/// source treats these as fatal, not diagnosable, conditions.
pub fn abort_fatal(message: &str) -> ! {
    tracing::error!(message, "fatal invariant violation, aborting");
    panic!("smile-core: fatal: {message}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_mentions_path() {
        let err = SmileCoreError::Io {
            path: "missing.sm".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "nope"),
        };
        assert!(format!("{err}").contains("missing.sm"));
    }
}
