use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::options::EngineOptions;
use crate::value::Value;

/// The input of a single compilation: exactly one of an owned source
/// buffer or a path, by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineInput {
    Source {
        data: String,
        /// Path reported in diagnostics for string-based input, when known.
        path: Option<PathBuf>,
    },
    Path(PathBuf),
}

/// One resolved import, as returned by an importer callback.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImportRecord {
    pub uri: String,
    /// Inline contents; when absent the engine loads `uri` itself.
    pub contents: Option<String>,
    pub source_map: Option<String>,
}

impl ImportRecord {
    pub fn path(uri: impl Into<String>) -> Self {
        ImportRecord {
            uri: uri.into(),
            ..ImportRecord::default()
        }
    }

    pub fn inline(uri: impl Into<String>, contents: impl Into<String>) -> Self {
        ImportRecord {
            uri: uri.into(),
            contents: Some(contents.into()),
            source_map: None,
        }
    }
}

/// Engine-facing return convention for importer callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum ImporterOutcome {
    /// The engine tries the next importer by descending priority.
    NotHandled,
    /// One logical import, possibly expanding to several engine-visible
    /// imports (a glob, for instance).
    Imports(Vec<ImportRecord>),
    /// Callback failure, routed through the engine's error channel.
    Error(String),
}

/// Importer callback: argv carries the url being resolved and the path of
/// the importing file (`None` for the entry file).
pub type ImporterFn = dyn Fn(&str, Option<&str>) -> ImporterOutcome + Send + Sync;

/// Custom-function callback. Failure is signalled by returning
/// [`Value::Error`].
pub type FunctionFn = dyn Fn(&[Value]) -> Value + Send + Sync;

/// One registered importer, tried in descending `priority` order.
#[derive(Clone)]
pub struct ImporterEntry {
    pub priority: i32,
    pub handler: Arc<ImporterFn>,
}

impl std::fmt::Debug for ImporterEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImporterEntry")
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// One registered custom function, keyed by its verbatim signature string
/// (`"foo($a, $b: 1)"`). Uniqueness of signatures is the engine's to
/// enforce.
#[derive(Clone)]
pub struct FunctionEntry {
    pub signature: String,
    pub handler: Arc<FunctionFn>,
}

impl std::fmt::Debug for FunctionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionEntry")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Everything the engine needs for one compile call.
#[derive(Debug)]
pub struct EngineJob {
    pub input: EngineInput,
    pub options: EngineOptions,
    pub importers: Vec<ImporterEntry>,
    pub functions: Vec<FunctionEntry>,
}

impl EngineJob {
    pub fn new(input: EngineInput, options: EngineOptions) -> Self {
        Self {
            input,
            options,
            importers: Vec::new(),
            functions: Vec::new(),
        }
    }
}

/// Structured error description the engine serializes as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub column: u32,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_status")]
    pub status: i32,
}

fn default_status() -> i32 {
    1
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: 0,
            column: 0,
            file: None,
            status: 1,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"message\":{:?}}}", self.message))
    }
}

/// The pull-based result of one compile call. The bridge's result
/// translator reads `status` first and then only the fields that apply.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineReport {
    pub status: i32,
    pub output: Option<String>,
    pub source_map: Option<String>,
    pub included_files: Vec<String>,
    pub error_json: Option<String>,
}

impl EngineReport {
    pub fn success(output: String, source_map: Option<String>, included_files: Vec<String>) -> Self {
        Self {
            status: 0,
            output: Some(output),
            source_map,
            included_files,
            error_json: None,
        }
    }

    pub fn failure(payload: ErrorPayload) -> Self {
        Self {
            status: payload.status,
            output: None,
            source_map: None,
            included_files: Vec::new(),
            error_json: Some(payload.to_json()),
        }
    }
}

/// The seam standing in for the pre-built compiler library.
///
/// `compile` is synchronous from the engine's point of view and may call
/// back into the job's importer and function entries while it runs. One
/// invocation per job; the caller owns the job for the whole call.
pub trait Engine: Send + Sync {
    fn compile(&self, job: &EngineJob) -> EngineReport;

    fn version(&self) -> String;

    /// Whether `compile` may run concurrently from several threads.
    /// Unless an engine build is verified reentrant, callers must
    /// serialize entry.
    fn reentrant(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_payload_round_trip() {
        let payload = ErrorPayload {
            message: "property \"color\" must be followed by a ':'".to_string(),
            line: 2,
            column: 10,
            file: Some("entry.scss".to_string()),
            status: 1,
        };
        let parsed: ErrorPayload = serde_json::from_str(&payload.to_json()).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn test_error_payload_defaults() {
        let parsed: ErrorPayload = serde_json::from_str(r#"{"message":"boom"}"#).unwrap();
        assert_eq!(parsed.line, 0);
        assert_eq!(parsed.column, 0);
        assert_eq!(parsed.file, None);
        assert_eq!(parsed.status, 1);
    }

    #[test]
    fn test_report_constructors() {
        let ok = EngineReport::success("a{color:red}".to_string(), None, vec![]);
        assert_eq!(ok.status, 0);
        assert!(ok.error_json.is_none());

        let failed = EngineReport::failure(ErrorPayload::new("boom"));
        assert_eq!(failed.status, 1);
        assert!(failed.output.is_none());
        assert!(failed.error_json.is_some());
    }

    #[test]
    fn test_import_record_helpers() {
        let rec = ImportRecord::inline("partials/_a.scss", "a{x:1}");
        assert_eq!(rec.uri, "partials/_a.scss");
        assert_eq!(rec.contents.as_deref(), Some("a{x:1}"));
        assert!(ImportRecord::path("b.scss").contents.is_none());
    }
}
