pub mod ansi;
pub mod json;

use crate::compiler::CompileError;
use crate::vm::{RuntimeError, VmError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Error,
    #[allow(dead_code)] // no warnings are produced yet
    Warning,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<&'static str>,
    pub message: String,
    /// Source line of the failing node or instruction, when known.
    pub line: Option<u32>,
    /// Name of the input the line refers to.
    pub source: Option<String>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            code: None,
            message: message.into(),
            line: None,
            source: None,
            notes: Vec::new(),
            suggestion: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    /// Line 0 means "unknown" and is dropped.
    pub fn with_line(mut self, line: u32) -> Self {
        if line > 0 {
            self.line = Some(line);
        }
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

// ---- From impls for the engine's error types ----

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        let d = Diagnostic::error(e.to_string()).with_code(e.code()).with_line(e.line());
        match e {
            CompileError::Redeclaration { .. } => d.with_suggestion("assign without `var` to reuse the variable"),
            CompileError::UnresolvedLocal { name, .. } => {
                d.with_suggestion(format!("declare it first with `var {} = ...`", name))
            }
            CompileError::DuplicateField { .. } => d,
        }
    }
}

impl From<&RuntimeError> for Diagnostic {
    fn from(e: &RuntimeError) -> Self {
        let d = Diagnostic::error(e.error.to_string())
            .with_code(e.code())
            .with_line(e.line)
            .with_note(format!("in function '{}', at {}", e.function, e.op));
        match &e.error {
            VmError::HeapExhausted { .. } => d.with_suggestion("raise the heap size with --heap-words"),
            VmError::StackOverflow { .. } => d.with_suggestion("raise the stack limit with --max-stack"),
            VmError::UnknownField { .. } => d.with_note("fields can only be added in the object literal"),
            _ => d,
        }
    }
}

impl From<&crate::Error> for Diagnostic {
    fn from(e: &crate::Error) -> Self {
        match e {
            crate::Error::Compile(e) => Diagnostic::from(e),
            crate::Error::Runtime(e) => Diagnostic::from(e),
            other => Diagnostic::error(other.to_string()).with_code(other.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_error_builder() {
        let d = Diagnostic::error("something went wrong");
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.message, "something went wrong");
        assert!(d.line.is_none());
        assert!(d.notes.is_empty());
        assert!(d.suggestion.is_none());
    }

    #[test]
    fn unknown_line_is_dropped() {
        assert_eq!(Diagnostic::error("x").with_line(0).line, None);
        assert_eq!(Diagnostic::error("x").with_line(7).line, Some(7));
    }

    #[test]
    fn from_compile_error() {
        let e = CompileError::UnresolvedLocal { name: "x".to_string(), line: 3 };
        let d = Diagnostic::from(&e);
        assert!(d.message.contains("'x'"));
        assert_eq!(d.code, Some("SJ-C002"));
        assert_eq!(d.line, Some(3));
        assert!(d.suggestion.as_deref().is_some_and(|s| s.contains("var x")));
    }

    #[test]
    fn from_runtime_error() {
        let e = RuntimeError {
            error: VmError::UnknownField { name: "z".into() },
            function: "main".into(),
            line: 4,
            op: "PUT",
        };
        let d = Diagnostic::from(&e);
        assert!(d.message.contains("'z'"));
        assert_eq!(d.code, Some("SJ-R002"));
        assert_eq!(d.line, Some(4));
        assert!(d.notes.iter().any(|n| n.contains("main") && n.contains("PUT")));
    }

    #[test]
    fn from_crate_error_keeps_codes() {
        let e = crate::Error::Runtime(RuntimeError {
            error: VmError::DivisionByZero,
            function: "f".into(),
            line: 2,
            op: "FUNCALL",
        });
        assert_eq!(Diagnostic::from(&e).code, Some("SJ-R008"));
    }
}
