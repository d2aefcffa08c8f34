//! The option translator: host configuration in, engine options plus
//! attached callback bridges out. Validation happens first; bridges are
//! allocated last and attached to the job context in the same step, so a
//! failed translation never leaves a bridge behind.

use itertools::Itertools;
use sassette_engine::{EngineInput, EngineJob, EngineOptions};
use tracing::debug;

use crate::callback::{Dispatch, FunctionBridge, ImporterBridge};
use crate::config::Config;
use crate::error::{ConfigError, Error};
use crate::job::JobContext;

/// Which entry point accepted the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InputKind {
    String,
    File,
}

const MAX_INDENT_WIDTH: i64 = 255;
const MAX_PRECISION: i64 = u8::MAX as i64;

fn required<T: Copy>(field: Option<T>, name: &'static str) -> Result<T, ConfigError> {
    field.ok_or(ConfigError::MissingField(name))
}

fn non_negative(value: i64, field: &'static str, max: i64) -> Result<i64, ConfigError> {
    if value < 0 {
        Err(ConfigError::NegativeField { field, value })
    } else if value > max {
        Err(ConfigError::OutOfRange { field, value })
    } else {
        Ok(value)
    }
}

fn input_for(config: &Config, kind: InputKind) -> Result<EngineInput, ConfigError> {
    match kind {
        InputKind::String => match (&config.data, &config.file) {
            // `file` alongside `data` is the display path: diagnostics
            // and source maps name it, but the data is what compiles.
            (Some(data), path) => Ok(EngineInput::Source {
                data: data.clone(),
                path: path.clone(),
            }),
            (None, Some(_)) => Err(ConfigError::MissingField("data")),
            (None, None) => Err(ConfigError::MissingInput),
        },
        InputKind::File => match (&config.file, &config.data) {
            (Some(path), _) => Ok(EngineInput::Path(path.clone())),
            (None, Some(_)) => Err(ConfigError::MissingField("file")),
            (None, None) => Err(ConfigError::MissingInput),
        },
    }
}

/// Validates `config`, builds the engine-facing options and callback
/// bridges, and binds them to `ctx`. Fails with a `ConfigError` naming the
/// first malformed field, leaving `ctx` untouched in `Created`.
pub(crate) fn bind(
    ctx: &mut JobContext,
    config: &Config,
    kind: InputKind,
    dispatch: Dispatch,
) -> Result<(), Error> {
    let input = input_for(config, kind)?;

    let indent_width = non_negative(
        required(config.indent_width, "indentWidth")?,
        "indentWidth",
        MAX_INDENT_WIDTH,
    )?;
    let indent_type = required(config.indent_type, "indentType")?;
    let style = required(config.style, "style")?;
    let precision = non_negative(
        required(config.precision, "precision")?,
        "precision",
        MAX_PRECISION,
    )?;
    let indented_syntax = required(config.indented_syntax, "indentedSyntax")?;
    let source_comments = required(config.source_comments, "sourceComments")?;
    let omit_source_map_url = required(config.omit_source_map_url, "omitSourceMapUrl")?;
    let source_map_embed = required(config.source_map_embed, "sourceMapEmbed")?;
    let source_map_contents = required(config.source_map_contents, "sourceMapContents")?;

    let options = EngineOptions {
        output_style: style,
        indent: indent_type.character().to_string().repeat(indent_width as usize),
        linefeed: config.linefeed.clone().unwrap_or_else(|| "\n".to_string()),
        precision: precision as u8,
        indented_syntax,
        source_comments,
        omit_source_map_url,
        source_map_embed,
        source_map_contents,
        include_paths: config.include_paths.clone(),
        out_file: config.out_file.clone(),
        source_map_file: config.source_map.clone(),
        source_map_root: config.source_map_root.clone(),
    };

    let mut engine_job = EngineJob::new(input, options);

    // Importers are tried by descending priority; assigning
    // `count - index - 1` makes try order match declaration order.
    let importers = config.importer.to_vec();
    let count = importers.len();
    for (index, callable) in importers.into_iter().enumerate() {
        let bridge = ImporterBridge::new(callable, dispatch.clone());
        engine_job.importers.push(bridge.entry((count - index - 1) as i32));
    }

    // Stable registration order; dispatch is by signature, so order only
    // matters for reproducibility.
    for (signature, callable) in config
        .functions
        .iter()
        .sorted_by(|a, b| a.0.cmp(b.0))
    {
        let bridge = FunctionBridge::new(signature.clone(), callable.clone(), dispatch.clone());
        engine_job.functions.push(bridge.entry());
    }

    debug!(
        importers = engine_job.importers.len(),
        functions = engine_job.functions.len(),
        "options bound"
    );

    ctx.bind(engine_job)?;
    Ok(())
}
