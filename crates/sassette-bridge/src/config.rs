use std::path::PathBuf;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use sassette_engine::{ImportRecord, IndentStyle, OutputStyle, Value};
use serde::Deserialize;

use crate::error::CallbackFailure;

/// One import-resolution request handed to a host importer: the url being
/// resolved and the path of the importing file (`None` for the entry file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    pub url: String,
    pub prev: Option<String>,
}

/// What a host importer may answer with.
#[derive(Debug, Clone, PartialEq)]
pub enum ImporterReply {
    /// Let the engine try the next importer in declaration order.
    NotHandled,
    /// One resolved import.
    Import(ImportRecord),
    /// One logical import expanding to several engine-visible imports.
    Imports(Vec<ImportRecord>),
}

/// A host-supplied custom function. Kept alive for the duration of every
/// job it is registered with.
pub type HostFunction = Arc<dyn Fn(&[Value]) -> Result<Value, CallbackFailure> + Send + Sync>;

/// A host-supplied importer.
pub type HostImporter =
    Arc<dyn Fn(&ImportRequest) -> Result<ImporterReply, CallbackFailure> + Send + Sync>;

/// The `importer` option: absent, a single callable, or an ordered list
/// of callables tried in declaration order.
#[derive(Clone, Default)]
pub enum Importers {
    #[default]
    None,
    Single(HostImporter),
    List(Vec<HostImporter>),
}

impl Importers {
    pub(crate) fn to_vec(&self) -> Vec<HostImporter> {
        match self {
            Importers::None => Vec::new(),
            Importers::Single(importer) => vec![Arc::clone(importer)],
            Importers::List(importers) => importers.clone(),
        }
    }
}

impl std::fmt::Debug for Importers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Importers::None => write!(f, "Importers::None"),
            Importers::Single(_) => write!(f, "Importers::Single"),
            Importers::List(list) => write!(f, "Importers::List({})", list.len()),
        }
    }
}

/// The recognized host option object.
///
/// Scalar fields deserialize from the host's camelCase option names; the
/// two extension points (`importer`, `functions`) are set programmatically.
/// Fields the option translator requires are `Option` so that an absent
/// field is representable and reported as a `ConfigError` naming it;
/// numerics are wide and signed so out-of-range input reaches validation
/// instead of failing opaquely at the boundary.
#[derive(Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub data: Option<String>,
    pub file: Option<PathBuf>,
    pub indent_width: Option<i64>,
    pub indent_type: Option<IndentStyle>,
    pub linefeed: Option<String>,
    pub include_paths: Vec<PathBuf>,
    pub out_file: Option<String>,
    pub source_map: Option<String>,
    pub source_map_root: Option<String>,
    pub style: Option<OutputStyle>,
    pub indented_syntax: Option<bool>,
    pub source_comments: Option<bool>,
    pub omit_source_map_url: Option<bool>,
    pub source_map_embed: Option<bool>,
    pub source_map_contents: Option<bool>,
    pub precision: Option<i64>,
    #[serde(skip)]
    pub importer: Importers,
    /// Signature string (`"foo($a, $b: 1)"`) to callable, passed to the
    /// engine verbatim; duplicate signatures are the engine's to reject.
    #[serde(skip)]
    pub functions: FxHashMap<String, HostFunction>,
}

impl Config {
    /// A configuration with every required scalar populated with the
    /// conventional defaults, the way the host runtime's option layer
    /// fills an option object before handing it over.
    pub fn standard() -> Self {
        Self {
            indent_width: Some(2),
            indent_type: Some(IndentStyle::Space),
            style: Some(OutputStyle::Nested),
            precision: Some(5),
            indented_syntax: Some(false),
            source_comments: Some(false),
            omit_source_map_url: Some(false),
            source_map_embed: Some(false),
            source_map_contents: Some(false),
            ..Self::default()
        }
    }

    pub fn with_data(data: impl Into<String>) -> Self {
        Self {
            data: Some(data.into()),
            ..Self::standard()
        }
    }

    pub fn with_file(file: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(file.into()),
            ..Self::standard()
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("data", &self.data.as_ref().map(|d| d.len()))
            .field("file", &self.file)
            .field("indent_width", &self.indent_width)
            .field("indent_type", &self.indent_type)
            .field("style", &self.style)
            .field("precision", &self.precision)
            .field("importer", &self.importer)
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
