//! Per-compilation state: the job context owns everything one compile
//! needs, moves through an enforced lifecycle, and delivers exactly one
//! terminal outcome through a write-once sink.

use std::sync::OnceLock;

use sassette_engine::EngineJob;

use crate::error::{CompileFailure, InternalError};

/// The job lifecycle. Only the transitions checked by
/// [`JobContext::transition`] are legal; anything else is a bridge bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    OptionsBound,
    Running,
    Completed,
    Released,
}

impl JobState {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::OptionsBound => "options-bound",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Released => "released",
        }
    }

    fn may_become(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Created, JobState::OptionsBound)
                // Configuration failure: released directly, nothing ran.
                | (JobState::Created, JobState::Released)
                | (JobState::OptionsBound, JobState::Running)
                | (JobState::Running, JobState::Completed)
                | (JobState::Completed, JobState::Released)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Sync,
    Async,
}

/// Everything a successful compilation hands back to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
    pub css: String,
    pub map: Option<String>,
    pub stats: Stats,
}

/// Post-compilation diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Stats {
    /// Every file the engine reports as transitively included, in engine
    /// order.
    pub included_files: Vec<String>,
}

pub(crate) type JobOutcome = Result<RenderOutput, CompileFailure>;

/// Write-once holder for the job's outcome. The second fill is the
/// double-completion guard; the single successful write happens-before
/// the continuation that delivers it, so no locking is involved.
#[derive(Default)]
pub(crate) struct ResultSink {
    slot: OnceLock<JobOutcome>,
}

impl ResultSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fill(&self, outcome: JobOutcome) -> Result<(), InternalError> {
        self.slot
            .set(outcome)
            .map_err(|_| InternalError::DoubleCompletion)
    }
}

pub(crate) type SuccessContinuation = Box<dyn FnOnce(RenderOutput) + Send>;
pub(crate) type ErrorContinuation = Box<dyn FnOnce(CompileFailure) + Send>;

/// The central owned aggregate for one compilation request.
///
/// Created when a compile request is accepted, mutated only by the option
/// translator (setup) and the result translator (completion), and dropped
/// after the terminal action. The engine job inside holds the callback
/// bridges alive through its handler closures, so bridges never outlive
/// the context that owns them.
pub(crate) struct JobContext {
    state: JobState,
    mode: Mode,
    pub(crate) engine_job: Option<EngineJob>,
    pub(crate) sink: ResultSink,
    on_success: Option<SuccessContinuation>,
    on_error: Option<ErrorContinuation>,
}

impl JobContext {
    pub(crate) fn sync() -> Self {
        Self {
            state: JobState::Created,
            mode: Mode::Sync,
            engine_job: None,
            sink: ResultSink::new(),
            on_success: None,
            on_error: None,
        }
    }

    pub(crate) fn r#async(on_success: SuccessContinuation, on_error: ErrorContinuation) -> Self {
        Self {
            state: JobState::Created,
            mode: Mode::Async,
            engine_job: None,
            sink: ResultSink::new(),
            on_success: Some(on_success),
            on_error: Some(on_error),
        }
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    pub(crate) fn state(&self) -> JobState {
        self.state
    }

    pub(crate) fn transition(&mut self, next: JobState) -> Result<(), InternalError> {
        if self.state.may_become(next) {
            self.state = next;
            Ok(())
        } else {
            Err(InternalError::InvalidTransition {
                from: self.state.name(),
                to: next.name(),
            })
        }
    }

    /// Attaches the translated engine job; the option translator is the
    /// only caller.
    pub(crate) fn bind(&mut self, engine_job: EngineJob) -> Result<(), InternalError> {
        self.transition(JobState::OptionsBound)?;
        self.engine_job = Some(engine_job);
        Ok(())
    }

    /// Takes both continuations for terminal delivery. Async jobs only.
    pub(crate) fn take_continuations(&mut self) -> Option<(SuccessContinuation, ErrorContinuation)> {
        self.on_success.take().zip(self.on_error.take())
    }
}
