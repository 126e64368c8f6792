//! Backend diagnostics.
//!
//! The front end owns the rich multi-span reporting; by the time codegen
//! runs, user errors have already been printed and anything this crate
//! raises is either an environment failure (bad triple, unwritable header),
//! a verification failure, or an internal contract violation from a
//! lowering site. A backend [`Diagnostic`] is therefore one message, one
//! span, a typed error code, and the key/value context the emitting site
//! attached (the operand type, the missing field, the intrinsic name).
//!
//! # Error Codes
//!
//! The backend owns the E0700 range:
//!
//! - **E0700-E0749**: Code generation errors (unsupported constructs,
//!   backend failures, module verification)
//! - **E0750-E0799**: Output emission errors (header file I/O)

use crate::span::Span;
use ariadne::{Color, Label, Report, ReportKind, Source};
use thiserror::Error;

/// Compiler error codes owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    /// An IR construct the backend does not support reached lowering.
    UnsupportedConstruct = 700,
    /// The target triple could not be understood.
    InvalidTarget = 701,
    /// The backend library reported a failure while building the module.
    BackendFailure = 702,
    /// Module verification failed (debug builds only).
    VerifyFailed = 703,
    /// A test build contained no test functions.
    NoTestsToRun = 704,
    /// An internal invariant of the lowering contract was violated.
    InternalError = 705,
    /// Failed to write the exported-function header.
    HeaderEmission = 750,
}

impl ErrorCode {
    /// Get the formatted error code string (e.g., "E0700").
    pub fn as_str(&self) -> String {
        format!("E{:04}", *self as u16)
    }

    /// Get a human-readable description of the error.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::UnsupportedConstruct => "construct not supported by code generation",
            ErrorCode::InvalidTarget => "unable to understand target triple",
            ErrorCode::BackendFailure => "backend failure while building module",
            ErrorCode::VerifyFailed => "module verification failed",
            ErrorCode::NoTestsToRun => "no tests to run",
            ErrorCode::InternalError => "internal code generation error",
            ErrorCode::HeaderEmission => "unable to write exported-function header",
        }
    }
}

/// Whether a diagnostic stops the compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Fatal; the backend produces no module.
    Error,
    /// Informational; compilation continues.
    Warning,
}

/// One backend diagnostic: a message anchored at the instruction (or
/// declaration) that raised it, plus whatever context the site attached.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub code: Option<ErrorCode>,
    /// The main error message.
    pub message: String,
    /// Where in the source the offending entity came from.
    pub span: Span,
    /// Key/value details from the emitting site, e.g.
    /// `("type", "?*u8")` or `("intrinsic", "llvm.sadd.with.overflow")`.
    pub context: Vec<(String, String)>,
    /// Free-form follow-up lines.
    pub notes: Vec<String>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self {
            kind: DiagnosticKind::Error,
            code: None,
            message: message.into(),
            span,
            context: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// Create a new warning diagnostic.
    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self {
            kind: DiagnosticKind::Warning,
            code: None,
            message: message.into(),
            span,
            context: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// Create an internal-compiler-error diagnostic. Reaching one of these
    /// is a bug in the compiler, not in user code.
    pub fn bug(message: impl Into<String>, span: Span) -> Self {
        let mut diag = Self::error(
            format!("internal compiler error: {}", message.into()),
            span,
        );
        diag.code = Some(ErrorCode::InternalError);
        diag.notes
            .push("this is a bug in the compiler, please report it".to_string());
        diag
    }

    /// Set the error code.
    pub fn with_error_code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Create an error diagnostic from an ErrorCode with its standard
    /// message.
    pub fn from_error_code(code: ErrorCode, span: Span) -> Self {
        let mut diag = Self::error(code.description(), span);
        diag.code = Some(code);
        diag
    }

    /// Attach a key/value detail from the emitting site.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.push((key.into(), value.into()));
        self
    }

    /// Attach a follow-up line.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// The "[E0700] message" form used in rendered output.
    pub fn coded_message(&self) -> String {
        match self.code {
            Some(code) => format!("[{}] {}", code.as_str(), self.message),
            None => self.message.clone(),
        }
    }
}

/// Renders backend diagnostics against the root source file.
///
/// Diagnostics that point at real source get an underlined snippet; the
/// context pairs and notes are folded below it. Spans synthesized by the
/// backend (environment failures, verification) render without a snippet.
pub struct DiagnosticEmitter<'a> {
    filename: &'a str,
    source: &'a str,
}

impl<'a> DiagnosticEmitter<'a> {
    pub fn new(filename: &'a str, source: &'a str) -> Self {
        Self { filename, source }
    }

    /// Emit a diagnostic to stderr.
    pub fn emit(&self, diagnostic: &Diagnostic) {
        if diagnostic.span.is_dummy() {
            // Nothing to underline; a plain line beats an empty snippet.
            let prefix = match diagnostic.kind {
                DiagnosticKind::Error => "error",
                DiagnosticKind::Warning => "warning",
            };
            eprintln!("{}: {}", prefix, self.plain_text(diagnostic));
            return;
        }

        let (report_kind, color) = match diagnostic.kind {
            DiagnosticKind::Error => (ReportKind::Error, Color::Red),
            DiagnosticKind::Warning => (ReportKind::Warning, Color::Yellow),
        };

        let mut builder = Report::build(report_kind, self.filename, diagnostic.span.start)
            .with_message(diagnostic.coded_message())
            .with_label(
                Label::new((self.filename, diagnostic.span.byte_range()))
                    .with_color(color)
                    .with_message(&diagnostic.message),
            );

        if !diagnostic.context.is_empty() {
            let detail: Vec<String> = diagnostic
                .context
                .iter()
                .map(|(key, value)| format!("{}: {}", key, value))
                .collect();
            builder = builder.with_note(detail.join("\n"));
        }
        if !diagnostic.notes.is_empty() {
            builder = builder.with_help(diagnostic.notes.join("\n"));
        }

        builder
            .finish()
            .eprint((self.filename, Source::from(self.source)))
            .expect("Failed to write diagnostic");
    }

    fn plain_text(&self, diagnostic: &Diagnostic) -> String {
        let mut text = diagnostic.coded_message();
        for (key, value) in &diagnostic.context {
            text.push_str(&format!("\n  {}: {}", key, value));
        }
        for note in &diagnostic.notes {
            text.push_str(&format!("\n  note: {}", note));
        }
        text
    }
}

/// Failures that come from the operating system or the backend library
/// rather than from user code. All of these are terminal.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("unable to create target based on: {triple}")]
    InvalidTarget { triple: String },

    #[error("unable to open {path}: {source}")]
    HeaderIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("module verification failed: {message}")]
    Verify { message: String },
}

impl From<BackendError> for Diagnostic {
    fn from(error: BackendError) -> Self {
        let code = match &error {
            BackendError::InvalidTarget { .. } => ErrorCode::InvalidTarget,
            BackendError::HeaderIo { .. } => ErrorCode::HeaderEmission,
            BackendError::Verify { .. } => ErrorCode::VerifyFailed,
        };
        Diagnostic::error(error.to_string(), Span::dummy()).with_error_code(code)
    }
}

/// Build an internal-compiler-error [`Diagnostic`].
///
/// Reaching an `ice!` means an IR producer handed the backend something the
/// contract forbids (an unhandled opcode, a compile-time-only type at
/// runtime, a missing temporary). Optional `"key" => value` pairs attach
/// context from the lowering site.
#[macro_export]
macro_rules! ice {
    ($span:expr, $($fmt:expr),+ $(,)?) => {
        $crate::diagnostics::Diagnostic::bug(format!($($fmt),+), $span)
    };
    ($span:expr, $($fmt:expr),+ ; $($key:expr => $val:expr),+ $(,)?) => {{
        let mut diag = $crate::diagnostics::Diagnostic::bug(format!($($fmt),+), $span);
        $(
            diag = diag.with_context($key, format!("{}", $val));
        )+
        diag
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::UnsupportedConstruct.as_str(), "E0700");
        assert_eq!(ErrorCode::HeaderEmission.as_str(), "E0750");
    }

    #[test]
    fn test_ice_macro() {
        let diag = ice!(Span::dummy(), "unhandled opcode {}", 3);
        assert!(diag.message.contains("internal compiler error"));
        assert!(diag.message.contains("unhandled opcode 3"));
        assert_eq!(diag.code, Some(ErrorCode::InternalError));

        let diag = ice!(Span::dummy(), "bad type"; "type" => "void");
        assert_eq!(diag.context, vec![("type".to_string(), "void".to_string())]);
    }

    #[test]
    fn test_backend_error_to_diagnostic() {
        let err = BackendError::InvalidTarget {
            triple: "sparc9000-acme-dos".to_string(),
        };
        let diag: Diagnostic = err.into();
        assert_eq!(diag.code, Some(ErrorCode::InvalidTarget));
        assert!(diag.span.is_dummy());
    }

    #[test]
    fn test_coded_message() {
        let diag = Diagnostic::from_error_code(ErrorCode::NoTestsToRun, Span::dummy());
        assert_eq!(diag.coded_message(), "[E0704] no tests to run");
    }
}
