//! Engine-facing contract for the sassette compilation bridge.
//!
//! The actual stylesheet compiler is an external, pre-built library with a
//! synchronous C entry point; this crate pins down the shape the bridge
//! relies on. [`Engine`] is the seam: one `compile` call per job, a
//! pull-based [`EngineReport`], and two callback conventions (importers
//! and custom functions) that the engine may invoke reentrantly while
//! compiling. The [`abi`] module spells out the assumed C ABI and adapts
//! an engine supplied as a table of C function pointers ([`abi::RawEngine`])
//! to the [`Engine`] trait.
//!
//! ```
//! use std::sync::Arc;
//! use sassette_engine::{
//!     Engine, EngineInput, EngineJob, EngineOptions, FunctionEntry, Value,
//! };
//!
//! fn register(job: &mut EngineJob) {
//!     job.functions.push(FunctionEntry {
//!         signature: "double($n)".to_string(),
//!         handler: Arc::new(|args: &[Value]| {
//!             match args.first().and_then(Value::as_number) {
//!                 Some(n) => Value::number(n * 2.0),
//!                 None => Value::Error("double($n): expected a number".to_string()),
//!             }
//!         }),
//!     });
//! }
//!
//! let mut job = EngineJob::new(
//!     EngineInput::Source { data: "a{b:double(2)}".to_string(), path: None },
//!     EngineOptions::default(),
//! );
//! register(&mut job);
//! assert_eq!(job.functions.len(), 1);
//! ```

pub mod abi;
mod engine;
mod options;
mod value;

pub use engine::{
    Engine, EngineInput, EngineJob, EngineReport, ErrorPayload, FunctionEntry, FunctionFn,
    ImportRecord, ImporterEntry, ImporterFn, ImporterOutcome,
};
pub use options::{EngineOptions, IndentStyle, OutputStyle};
pub use value::{ListSeparator, Value};
