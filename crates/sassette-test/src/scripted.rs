//! A small scripted engine that stands in for the pre-built compiler in
//! tests. It understands just enough of a stylesheet-shaped language to
//! exercise every callback seam:
//!
//! - `@import "url";` runs the registered importers by descending
//!   priority and splices the resolved contents in place.
//! - `@fail message` aborts the compile with a structured error.
//! - `name(arg, ...)` anywhere in a line invokes the custom function
//!   registered under a signature starting with `name(` and splices the
//!   rendered result back into the line.
//! - Every other line passes through untouched.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::ThreadId;

use sassette_engine::{
    Engine, EngineInput, EngineJob, EngineReport, ErrorPayload, ImporterEntry, ImporterOutcome,
    Value,
};

const SCRIPTED_VERSION: &str = "3.6.6-scripted";
const MAX_IMPORT_DEPTH: usize = 16;

/// The test double. One instance can serve any number of compiles; the
/// call counter makes "the engine was never entered" assertions possible.
#[derive(Default)]
pub struct ScriptedEngine {
    compiles: AtomicUsize,
    last_thread: Mutex<Option<ThreadId>>,
    reentrant: bool,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the engine as safe for concurrent entry, disabling the
    /// bridge's serialization lock.
    pub fn with_reentrancy(mut self) -> Self {
        self.reentrant = true;
        self
    }

    /// How many times `compile` has been called.
    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    /// Thread that ran the most recent `compile`, if any.
    pub fn last_compile_thread(&self) -> Option<ThreadId> {
        *self.last_thread.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Engine for ScriptedEngine {
    fn compile(&self, job: &EngineJob) -> EngineReport {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        *self.last_thread.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(std::thread::current().id());

        let (data, entry_path) = match &job.input {
            EngineInput::Source { data, path } => (data.clone(), path.clone()),
            EngineInput::Path(path) => match std::fs::read_to_string(path) {
                Ok(data) => (data, Some(path.clone())),
                Err(err) => {
                    return EngineReport::failure(ErrorPayload {
                        message: format!("failed to read {}: {err}", path.display()),
                        line: 0,
                        column: 0,
                        file: Some(path.display().to_string()),
                        status: 1,
                    });
                }
            },
        };

        let mut run = Run {
            job,
            included: Vec::new(),
            lines: Vec::new(),
        };
        if let Some(path) = &entry_path {
            run.included.push(path.display().to_string());
        }

        let prev = entry_path.as_ref().map(|path| path.display().to_string());
        if let Err(payload) = run.process(&data, prev.as_deref(), 0) {
            return EngineReport::failure(payload);
        }

        let mut css = run.lines.join(&job.options.linefeed);
        if !css.is_empty() {
            css.push_str(&job.options.linefeed);
        }
        let source_map = job.options.wants_source_map().then(|| {
            serde_json::json!({
                "version": 3,
                "file": job.options.out_file.clone().unwrap_or_default(),
                "sources": run.included,
            })
            .to_string()
        });
        EngineReport::success(css, source_map, run.included)
    }

    fn version(&self) -> String {
        SCRIPTED_VERSION.to_string()
    }

    fn reentrant(&self) -> bool {
        self.reentrant
    }
}

struct Run<'a> {
    job: &'a EngineJob,
    included: Vec<String>,
    lines: Vec<String>,
}

impl Run<'_> {
    fn process(&mut self, data: &str, prev: Option<&str>, depth: usize) -> Result<(), ErrorPayload> {
        if depth > MAX_IMPORT_DEPTH {
            return Err(fail("import nesting too deep", 0, prev));
        }
        for (index, raw) in data.lines().enumerate() {
            let line = raw.trim();
            let line_no = (index + 1) as u32;
            if let Some(rest) = line.strip_prefix("@import ") {
                let url = quoted(rest)
                    .ok_or_else(|| fail(&format!("malformed import: {line}"), line_no, prev))?;
                self.import(&url, prev, line_no, depth)?;
            } else if let Some(rest) = line.strip_prefix("@fail") {
                let message = rest.trim();
                let message = if message.is_empty() {
                    "forced failure"
                } else {
                    message
                };
                return Err(fail(message, line_no, prev));
            } else if !line.is_empty() {
                let line = self.apply_functions(line, line_no, prev)?;
                self.lines.push(line);
            }
        }
        Ok(())
    }

    fn import(
        &mut self,
        url: &str,
        prev: Option<&str>,
        line_no: u32,
        depth: usize,
    ) -> Result<(), ErrorPayload> {
        for entry in by_priority(&self.job.importers) {
            match (entry.handler)(url, prev) {
                ImporterOutcome::NotHandled => continue,
                ImporterOutcome::Error(message) => return Err(fail(&message, line_no, prev)),
                ImporterOutcome::Imports(records) => {
                    for record in records {
                        match record.contents {
                            Some(contents) => {
                                self.included.push(record.uri.clone());
                                self.process(&contents, Some(&record.uri), depth + 1)?;
                            }
                            None => self.import_file(Path::new(&record.uri), line_no, depth)?,
                        }
                    }
                    return Ok(());
                }
            }
        }
        // No importer claimed it; fall back to the include paths.
        let Some(path) = self.locate(url) else {
            return Err(fail(
                &format!("file to import not found or unreadable: \"{url}\""),
                line_no,
                prev,
            ));
        };
        self.import_file(&path, line_no, depth)
    }

    fn import_file(&mut self, path: &Path, line_no: u32, depth: usize) -> Result<(), ErrorPayload> {
        let shown = path.display().to_string();
        let contents = std::fs::read_to_string(path)
            .map_err(|err| fail(&format!("failed to read {shown}: {err}"), line_no, None))?;
        self.included.push(shown.clone());
        self.process(&contents, Some(&shown), depth + 1)
    }

    fn locate(&self, url: &str) -> Option<PathBuf> {
        let direct = PathBuf::from(url);
        if direct.is_file() {
            return Some(direct);
        }
        self.job
            .options
            .include_paths
            .iter()
            .map(|base| base.join(url))
            .find(|candidate| candidate.is_file())
    }

    fn apply_functions(
        &self,
        line: &str,
        line_no: u32,
        prev: Option<&str>,
    ) -> Result<String, ErrorPayload> {
        let mut line = line.to_string();
        for entry in &self.job.functions {
            let Some(name) = entry.signature.split('(').next() else {
                continue;
            };
            let needle = format!("{name}(");
            let mut from = 0;
            let mut budget = MAX_IMPORT_DEPTH;
            while let Some(found) = line[from..].find(&needle) {
                if budget == 0 {
                    break;
                }
                budget -= 1;
                let start = from + found;
                // `madd(` must not hit a function named `add`.
                if !starts_identifier(&line[..start]) {
                    from = start + needle.len();
                    continue;
                }
                let Some(close) = line[start..].find(')') else {
                    break;
                };
                let close = start + close;
                let args = parse_args(&line[start + needle.len()..close]);
                let result = (entry.handler)(&args);
                if let Value::Error(message) = result {
                    return Err(fail(&message, line_no, prev));
                }
                line.replace_range(start..=close, &result.to_string());
                from = start;
            }
        }
        Ok(line)
    }
}

fn by_priority(entries: &[ImporterEntry]) -> Vec<&ImporterEntry> {
    let mut sorted: Vec<&ImporterEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| b.priority.cmp(&a.priority));
    sorted
}

fn fail(message: &str, line: u32, file: Option<&str>) -> ErrorPayload {
    ErrorPayload {
        message: message.to_string(),
        line,
        column: 0,
        file: file.map(ToString::to_string),
        status: 1,
    }
}

/// True when a call found right after `before` begins a fresh identifier
/// rather than the tail of a longer one.
fn starts_identifier(before: &str) -> bool {
    before
        .chars()
        .next_back()
        .is_none_or(|c| !(c.is_alphanumeric() || c == '_' || c == '-'))
}

fn quoted(text: &str) -> Option<String> {
    let text = text.trim().trim_end_matches(';').trim();
    let inner = text
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .or_else(|| {
            text.strip_prefix('\'')
                .and_then(|rest| rest.strip_suffix('\''))
        })?;
    Some(inner.to_string())
}

fn parse_args(text: &str) -> Vec<Value> {
    text.split(',')
        .map(str::trim)
        .filter(|arg| !arg.is_empty())
        .map(|arg| {
            if let Some(inner) = quoted(arg) {
                Value::String(inner)
            } else if arg == "true" || arg == "false" {
                Value::Boolean(arg == "true")
            } else if let Ok(value) = arg.parse::<f64>() {
                Value::number(value)
            } else {
                Value::String(arg.to_string())
            }
        })
        .collect()
}
