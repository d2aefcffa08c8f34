//! The asynchronous execution strategy: a fixed pool of worker threads that
//! drain a queue of job contexts, run the engine, and hand the terminal
//! action back to the host loop.
//!
//! The synchronous strategy is [`run_engine_on_host`]: the same compile
//! run inline on the calling thread, except that waiting for the engine
//! lock doubles as servicing the host queue, since a worker holding the
//! lock may be blocked on a callback hop only the host thread can answer.

use std::sync::{Arc, Mutex, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use sassette_engine::{Engine, EngineJob, EngineReport};
use tracing::{debug, error, warn};

use crate::error::InternalError;
use crate::host::{HostHandle, TaskStealer};
use crate::job::{JobContext, JobState};
use crate::result;

pub(crate) const DEFAULT_WORKERS: usize = 4;

/// How long the synchronous path waits on the host queue between attempts
/// to take the engine lock.
const LOCK_POLL: Duration = Duration::from_millis(1);

fn bound_job(ctx: &JobContext) -> &EngineJob {
    match ctx.engine_job.as_ref() {
        Some(job) => job,
        // bind() ran before the context was accepted, so this is a state
        // machine violation, not a recoverable condition.
        None => abort(InternalError::InvalidTransition {
            from: ctx.state().name(),
            to: JobState::Running.name(),
        }),
    }
}

/// Runs one compile against the engine on a worker thread, serializing
/// entry when the engine does not declare itself reentrant.
pub(crate) fn run_engine(shared: &Shared, ctx: &JobContext) -> EngineReport {
    let job = bound_job(ctx);
    match &shared.serial {
        Some(lock) => {
            // Poisoning only happens if the engine panicked through a
            // previous guard; every later job would deadlock on a wedged
            // native library anyway.
            let _guard = match lock.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            shared.engine.compile(job)
        }
        None => shared.engine.compile(job),
    }
}

/// Runs one compile on the host thread itself (the synchronous strategy).
///
/// The worker holding the engine lock may be blocked on a callback hop
/// that only this thread can answer, so parking on the lock here would
/// hang both jobs. This path keeps servicing the host queue until the
/// lock frees up.
pub(crate) fn run_engine_on_host(shared: &Shared, ctx: &JobContext) -> EngineReport {
    let job = bound_job(ctx);
    match &shared.serial {
        Some(lock) => {
            let _guard = loop {
                match lock.try_lock() {
                    Ok(guard) => break guard,
                    Err(TryLockError::Poisoned(poisoned)) => break poisoned.into_inner(),
                    Err(TryLockError::WouldBlock) => {
                        if !shared.tasks.steal(LOCK_POLL) {
                            thread::yield_now();
                        }
                    }
                }
            };
            shared.engine.compile(job)
        }
        None => shared.engine.compile(job),
    }
}

fn abort(err: InternalError) -> ! {
    error!(error = %err, "bridge invariant violated");
    panic!("bridge invariant violated: {err}");
}

/// State shared by every worker.
pub(crate) struct Shared {
    pub(crate) engine: Arc<dyn Engine>,
    /// Present when the engine must not be entered concurrently.
    pub(crate) serial: Option<Mutex<()>>,
    pub(crate) host: HostHandle,
    /// Lets the synchronous path answer callback hops while it waits for
    /// the engine lock.
    tasks: TaskStealer,
}

impl Shared {
    pub(crate) fn new(engine: Arc<dyn Engine>, host: HostHandle, tasks: TaskStealer) -> Self {
        let serial = if engine.reentrant() {
            None
        } else {
            Some(Mutex::new(()))
        };
        Self {
            engine,
            serial,
            host,
            tasks,
        }
    }
}

/// Drives one queued job from `Running` to its terminal action.
///
/// The compile and both state transitions happen here on the worker
/// thread; the continuation, the `Released` transition, and the drop of
/// the context are posted to the host loop so host callables only ever run
/// on the host thread.
fn run_job(shared: &Shared, mut ctx: JobContext) {
    if let Err(err) = ctx.transition(JobState::Running) {
        abort(err);
    }
    let report = run_engine(shared, &ctx);
    if let Err(err) = ctx.transition(JobState::Completed) {
        abort(err);
    }

    let outcome = result::finalize(&report);
    debug!(mode = ?ctx.mode(), ok = outcome.is_ok(), "job completed");
    if let Err(err) = ctx.sink.fill(outcome.clone()) {
        abort(err);
    }

    let host = shared.host.clone();
    let retire = shared.host.clone();
    let delivered = host.post(Box::new(move || {
        let mut ctx = ctx;
        if let Some((on_success, on_error)) = ctx.take_continuations() {
            match outcome {
                Ok(output) => on_success(output),
                Err(failure) => on_error(failure),
            }
        }
        if let Err(err) = ctx.transition(JobState::Released) {
            abort(err);
        }
        retire.job_retired();
    }));
    if !delivered {
        // The host loop is gone; the outcome stays in the sink but the
        // continuation can never fire.
        warn!("host loop dropped before job delivery");
        shared.host.job_retired();
    }
}

/// The fixed-size worker pool behind the asynchronous entry points.
///
/// Dropping the pool closes the queue and joins every worker; jobs already
/// queued still run to completion first.
pub(crate) struct WorkerPool {
    tx: Option<Sender<JobContext>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn new(shared: Arc<Shared>, workers: usize) -> Self {
        let (tx, rx) = unbounded::<JobContext>();
        let workers = (0..workers.max(1))
            .map(|index| {
                let shared = Arc::clone(&shared);
                let rx: Receiver<JobContext> = rx.clone();
                thread::Builder::new()
                    .name(format!("sassette-worker-{index}"))
                    .spawn(move || {
                        for ctx in rx {
                            run_job(&shared, ctx);
                        }
                        debug!(worker = index, "worker exiting");
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .unwrap_or_else(|err| {
                error!(error = %err, "failed to spawn worker thread");
                panic!("failed to spawn worker thread: {err}");
            });
        Self {
            tx: Some(tx),
            workers,
        }
    }

    /// Queues a bound context. The pending-job count is raised before the
    /// send so the host loop cannot observe an idle window between accept
    /// and dispatch.
    pub(crate) fn submit(&self, ctx: JobContext, host: &HostHandle) -> Result<(), InternalError> {
        host.job_enqueued();
        let Some(tx) = self.tx.as_ref() else {
            host.job_retired();
            return Err(InternalError::PoolShutDown);
        };
        if tx.send(ctx).is_err() {
            host.job_retired();
            return Err(InternalError::PoolShutDown);
        }
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.tx.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use sassette_test::ScriptedEngine;

    use crate::host::HostLoop;

    use super::*;

    #[test]
    fn test_submit_after_shutdown_reports_pool_shut_down() {
        let (handle, host) = HostLoop::channel();
        let shared = Arc::new(Shared::new(
            Arc::new(ScriptedEngine::new()),
            handle.clone(),
            host.stealer(),
        ));
        let mut pool = WorkerPool::new(Arc::clone(&shared), 1);
        pool.tx.take();

        let err = pool.submit(JobContext::sync(), &handle).unwrap_err();
        assert_eq!(err, InternalError::PoolShutDown);
        assert_eq!(handle.pending_jobs(), 0);
    }
}
