use miette::Diagnostic;
use sassette_engine::{EngineReport, ErrorPayload};
use thiserror::Error;

/// A malformed or missing option, detected before any engine call.
///
/// Always reported synchronously on the calling thread, never through the
/// asynchronous error continuation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum ConfigError {
    #[error("\"{0}\" option is missing")]
    #[diagnostic(code(sassette::config::missing_field))]
    MissingField(&'static str),
    #[error("either \"data\" or \"file\" must be provided")]
    #[diagnostic(code(sassette::config::missing_input))]
    MissingInput,
    #[error("\"{field}\" must be non-negative, got {value}")]
    #[diagnostic(code(sassette::config::negative_field))]
    NegativeField { field: &'static str, value: i64 },
    #[error("\"{field}\" is out of range: {value}")]
    #[diagnostic(code(sassette::config::out_of_range))]
    OutOfRange { field: &'static str, value: i64 },
}

/// A non-zero engine status: the compilation itself failed, including
/// failures raised inside host extension callbacks and routed back through
/// the engine's error channel.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
#[error("{message}")]
#[diagnostic(code(sassette::compile))]
pub struct CompileFailure {
    pub message: String,
    pub line: u32,
    pub column: u32,
    pub file: Option<String>,
    /// The engine's error JSON, verbatim, when it produced one.
    pub json: Option<String>,
}

impl CompileFailure {
    pub(crate) fn from_report(report: &EngineReport) -> Self {
        let json = report.error_json.clone();
        match json
            .as_deref()
            .and_then(|json| serde_json::from_str::<ErrorPayload>(json).ok())
        {
            Some(payload) => Self {
                message: payload.message,
                line: payload.line,
                column: payload.column,
                file: payload.file,
                json,
            },
            None => Self {
                message: format!("engine failed with status {}", report.status),
                line: 0,
                column: 0,
                file: None,
                json,
            },
        }
    }
}

/// A bridge invariant was violated. Not recoverable; never swallowed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum InternalError {
    #[error("compilation result delivered more than once")]
    #[diagnostic(code(sassette::internal::double_completion))]
    DoubleCompletion,
    #[error("invalid job transition: {from} -> {to}")]
    #[diagnostic(code(sassette::internal::invalid_transition))]
    InvalidTransition { from: &'static str, to: &'static str },
    #[error("worker pool is shut down")]
    #[diagnostic(code(sassette::internal::pool_shut_down))]
    PoolShutDown,
}

/// A failure raised by a host extension callback (an importer or a custom
/// function). Converted to the engine's callback-failure convention and
/// re-surfaced as a [`CompileFailure`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CallbackFailure(pub String);

impl CallbackFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<&str> for CallbackFailure {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for CallbackFailure {
    fn from(message: String) -> Self {
        Self(message)
    }
}

#[derive(Debug, Clone, PartialEq, Error, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Compile(#[from] CompileFailure),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Internal(#[from] InternalError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_failure_from_report() {
        let report = EngineReport::failure(ErrorPayload {
            message: "invalid property name".to_string(),
            line: 3,
            column: 7,
            file: Some("entry.scss".to_string()),
            status: 1,
        });
        let failure = CompileFailure::from_report(&report);
        assert_eq!(failure.message, "invalid property name");
        assert_eq!((failure.line, failure.column), (3, 7));
        assert_eq!(failure.file.as_deref(), Some("entry.scss"));
        assert!(failure.json.is_some());
    }

    #[test]
    fn test_compile_failure_from_garbled_report() {
        let report = EngineReport {
            status: 5,
            error_json: Some("not json".to_string()),
            ..EngineReport::default()
        };
        let failure = CompileFailure::from_report(&report);
        assert_eq!(failure.message, "engine failed with status 5");
        assert_eq!(failure.json.as_deref(), Some("not json"));
    }

    #[test]
    fn test_error_conversions() {
        let err: Error = ConfigError::MissingField("indentWidth").into();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "\"indentWidth\" option is missing");
    }
}
