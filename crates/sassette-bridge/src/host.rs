//! The host's single logical thread, modelled as a single-consumer task
//! queue. Engine worker threads post work here (callback hops, completion
//! continuations) and the thread driving [`HostLoop`] executes it, the way
//! the host runtime's event loop would.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use tracing::debug;

pub(crate) type HostTask = Box<dyn FnOnce() + Send>;

/// Cloneable posting side of the host queue, held by the bridge and by
/// asynchronous callback bridges.
#[derive(Clone)]
pub struct HostHandle {
    tx: Sender<HostTask>,
    pending: Arc<AtomicUsize>,
}

impl HostHandle {
    /// Posts a task for the host thread. Returns false when the loop is
    /// gone, which callers treat as a host shutdown.
    pub(crate) fn post(&self, task: HostTask) -> bool {
        self.tx.send(task).is_ok()
    }

    pub(crate) fn job_enqueued(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn job_retired(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    /// Number of asynchronous jobs accepted but not yet retired.
    pub fn pending_jobs(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// A second consumer handle for the host queue. The bridge's synchronous
/// path services callback hops through it while it waits for the engine
/// lock on the host thread. Dropping the [`HostLoop`] empties the handle,
/// so tasks queued after the loop is gone still disconnect instead of
/// piling up unseen.
#[derive(Clone)]
pub(crate) struct TaskStealer {
    slot: Arc<Mutex<Option<Receiver<HostTask>>>>,
}

impl TaskStealer {
    /// Waits up to `wait` for a queued task and runs it. Returns whether a
    /// task ran; false also covers a dropped host loop.
    pub(crate) fn steal(&self, wait: Duration) -> bool {
        let slot = match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(rx) = slot.as_ref() else {
            return false;
        };
        match rx.recv_timeout(wait) {
            Ok(task) => {
                // The task may re-enter the bridge; run it unlocked.
                drop(slot);
                task();
                true
            }
            Err(_) => false,
        }
    }
}

/// The consuming side of the host queue. Exactly one thread drives it.
pub struct HostLoop {
    rx: Receiver<HostTask>,
    pending: Arc<AtomicUsize>,
    stealer: TaskStealer,
}

impl HostLoop {
    pub(crate) fn channel() -> (HostHandle, HostLoop) {
        let (tx, rx) = unbounded();
        let pending = Arc::new(AtomicUsize::new(0));
        let stealer = TaskStealer {
            slot: Arc::new(Mutex::new(Some(rx.clone()))),
        };
        (
            HostHandle {
                tx,
                pending: Arc::clone(&pending),
            },
            HostLoop {
                rx,
                pending,
                stealer,
            },
        )
    }

    pub(crate) fn stealer(&self) -> TaskStealer {
        self.stealer.clone()
    }

    /// Runs one queued task, if any. Returns whether a task ran.
    pub fn tick(&self) -> bool {
        match self.rx.try_recv() {
            Ok(task) => {
                task();
                true
            }
            Err(_) => false,
        }
    }

    /// Drains tasks until every in-flight job has delivered its terminal
    /// continuation and the queue is empty.
    pub fn run_until_idle(&self) {
        loop {
            match self.rx.recv_timeout(Duration::from_millis(10)) {
                Ok(task) => task(),
                Err(RecvTimeoutError::Timeout) => {
                    if self.pending.load(Ordering::SeqCst) == 0 {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        while self.tick() {}
        debug!("host loop idle");
    }
}

impl Drop for HostLoop {
    fn drop(&mut self) {
        let mut slot = match self.stealer.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.take();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_tick_runs_posted_task() {
        let (handle, host) = HostLoop::channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_task = Arc::clone(&seen);
        assert!(handle.post(Box::new(move || seen_task.lock().unwrap().push(1))));

        assert!(host.tick());
        assert!(!host.tick());
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_run_until_idle_waits_for_pending_jobs() {
        let (handle, host) = HostLoop::channel();
        handle.job_enqueued();
        assert_eq!(handle.pending_jobs(), 1);

        let worker_handle = handle.clone();
        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            let retire = worker_handle.clone();
            worker_handle.post(Box::new(move || retire.job_retired()));
        });

        host.run_until_idle();
        assert_eq!(handle.pending_jobs(), 0);
        worker.join().unwrap();
    }

    #[test]
    fn test_stealer_services_queue_and_dies_with_the_loop() {
        let (handle, host) = HostLoop::channel();
        let stealer = host.stealer();
        let seen = Arc::new(Mutex::new(0));
        let seen_task = Arc::clone(&seen);
        assert!(handle.post(Box::new(move || *seen_task.lock().unwrap() += 1)));

        assert!(stealer.steal(Duration::from_millis(10)));
        assert_eq!(*seen.lock().unwrap(), 1);

        drop(host);
        assert!(!stealer.steal(Duration::from_millis(1)));
        assert!(!handle.post(Box::new(|| {})));
    }

    #[test]
    fn test_run_until_idle_with_no_work() {
        let (handle, host) = HostLoop::channel();
        host.run_until_idle();
        assert_eq!(handle.pending_jobs(), 0);
    }
}
