//! An asynchronous bridge between a host scripting runtime and a native
//! stylesheet compiler.
//!
//! The bridge accepts a loosely-typed [`Config`], translates it into the
//! engine's strongly-typed options, runs the compile either inline on the
//! calling thread or on a worker pool, and translates the engine's report
//! back into a host-facing [`RenderOutput`] or [`CompileFailure`]. Host
//! extension callbacks (importers and custom functions) registered in the
//! configuration are invoked by the engine mid-compile; on the
//! asynchronous path the worker blocks while the callback runs on the
//! host thread.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use sassette_bridge::{BridgeBuilder, Config};
//! use sassette_test::ScriptedEngine;
//!
//! let (bridge, _host) = BridgeBuilder::new(Arc::new(ScriptedEngine::new())).build();
//! let output = bridge.compile_from_string(&Config::with_data("a { color: red; }"))?;
//! assert!(output.css.contains("color: red"));
//! # Ok::<(), sassette_bridge::Error>(())
//! ```

mod callback;
mod config;
mod error;
mod exec;
mod host;
mod job;
mod result;
mod translate;

use std::sync::Arc;

use tracing::debug;

use crate::callback::Dispatch;
use crate::exec::{DEFAULT_WORKERS, Shared, WorkerPool};
use crate::job::{JobContext, JobOutcome};
use crate::translate::InputKind;

pub use crate::config::{Config, HostFunction, HostImporter, ImportRequest, Importers, ImporterReply};
pub use crate::error::{CallbackFailure, CompileFailure, ConfigError, Error, InternalError};
pub use crate::host::{HostHandle, HostLoop};
pub use crate::job::{JobState, RenderOutput, Stats};
// Engine-facing types a host needs to write callbacks and plug in engines.
pub use sassette_engine::{Engine, ImportRecord, IndentStyle, OutputStyle, Value};

/// Continuation invoked on the host thread when an asynchronous compile
/// succeeds.
pub type OnSuccess = Box<dyn FnOnce(RenderOutput) + Send>;
/// Continuation invoked on the host thread when an asynchronous compile
/// fails.
pub type OnError = Box<dyn FnOnce(CompileFailure) + Send>;

/// Builder for a [`Bridge`] and its paired [`HostLoop`].
pub struct BridgeBuilder {
    engine: Arc<dyn Engine>,
    workers: usize,
}

impl BridgeBuilder {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            workers: DEFAULT_WORKERS,
        }
    }

    /// Sets the worker pool size for the asynchronous entry points.
    /// Clamped to at least one.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Builds the bridge. The returned [`HostLoop`] must be driven by the
    /// thread that owns the host callables; asynchronous results and
    /// mid-compile callback hops are delivered through it.
    pub fn build(self) -> (Bridge, HostLoop) {
        let (host, host_loop) = HostLoop::channel();
        let shared = Arc::new(Shared::new(
            Arc::clone(&self.engine),
            host.clone(),
            host_loop.stealer(),
        ));
        let pool = WorkerPool::new(Arc::clone(&shared), self.workers);
        debug!(workers = self.workers, "bridge built");
        (
            Bridge {
                engine: self.engine,
                shared,
                host,
                pool,
            },
            host_loop,
        )
    }
}

/// The compilation bridge. One instance fronts one engine; it is cheap to
/// share behind an `Arc` and every entry point takes `&self`.
pub struct Bridge {
    engine: Arc<dyn Engine>,
    shared: Arc<Shared>,
    host: HostHandle,
    pool: WorkerPool,
}

impl Bridge {
    pub fn builder(engine: Arc<dyn Engine>) -> BridgeBuilder {
        BridgeBuilder::new(engine)
    }

    /// Compiles an in-memory source string, blocking the calling thread.
    pub fn compile_from_string(&self, config: &Config) -> Result<RenderOutput, Error> {
        self.compile_sync(config, InputKind::String)
    }

    /// Compiles a stylesheet file, blocking the calling thread.
    pub fn compile_from_file(&self, config: &Config) -> Result<RenderOutput, Error> {
        self.compile_sync(config, InputKind::File)
    }

    /// Queues an in-memory source string for compilation on the worker
    /// pool. Configuration errors are returned synchronously and neither
    /// continuation fires for them; otherwise exactly one of the two
    /// continuations runs on the host thread.
    pub fn compile_from_string_async(
        &self,
        config: &Config,
        on_success: OnSuccess,
        on_error: OnError,
    ) -> Result<(), Error> {
        self.compile_async(config, InputKind::String, on_success, on_error)
    }

    /// Queues a stylesheet file for compilation on the worker pool.
    pub fn compile_from_file_async(
        &self,
        config: &Config,
        on_success: OnSuccess,
        on_error: OnError,
    ) -> Result<(), Error> {
        self.compile_async(config, InputKind::File, on_success, on_error)
    }

    /// The engine's own version string.
    pub fn engine_version(&self) -> String {
        self.engine.version()
    }

    /// Jobs accepted but not yet retired by the host loop.
    pub fn pending_jobs(&self) -> usize {
        self.host.pending_jobs()
    }

    fn compile_sync(&self, config: &Config, kind: InputKind) -> Result<RenderOutput, Error> {
        let mut ctx = JobContext::sync();
        if let Err(err) = translate::bind(&mut ctx, config, kind, Dispatch::Inline) {
            ctx.transition(JobState::Released)?;
            return Err(err);
        }

        ctx.transition(JobState::Running)?;
        let report = exec::run_engine_on_host(&self.shared, &ctx);
        ctx.transition(JobState::Completed)?;

        let outcome: JobOutcome = result::finalize(&report);
        ctx.sink.fill(outcome.clone())?;
        ctx.transition(JobState::Released)?;
        outcome.map_err(Error::from)
    }

    fn compile_async(
        &self,
        config: &Config,
        kind: InputKind,
        on_success: OnSuccess,
        on_error: OnError,
    ) -> Result<(), Error> {
        let mut ctx = JobContext::r#async(on_success, on_error);
        if let Err(err) = translate::bind(&mut ctx, config, kind, Dispatch::Hop(self.host.clone())) {
            ctx.transition(JobState::Released)?;
            return Err(err);
        }
        self.pool.submit(ctx, &self.host)?;
        Ok(())
    }
}
