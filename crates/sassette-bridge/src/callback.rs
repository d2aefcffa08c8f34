//! Callback bridges: host-supplied extension functions made callable from
//! the engine's synchronous callback convention.
//!
//! In synchronous jobs the engine runs on the caller's thread, which *is*
//! the host's logical thread, so a bridge calls straight through. In
//! asynchronous jobs the engine runs on a worker thread while host
//! callables may only execute on the host thread: the bridge posts the
//! invocation to the host queue and blocks the worker on a rendezvous
//! until the host replies. The worker blocking on the host is an accepted
//! priority inversion; the engine's callback protocol is synchronous and
//! cannot be restructured from this side.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use sassette_engine::{FunctionEntry, ImporterEntry, ImporterOutcome, Value};
use tracing::debug;

use crate::config::{HostFunction, HostImporter, ImportRequest, ImporterReply};
use crate::host::HostHandle;

/// How a bridge reaches the host's logical thread.
#[derive(Clone)]
pub(crate) enum Dispatch {
    /// The current thread is the host thread; call through.
    Inline,
    /// Hand off to the host queue and block until it answers.
    Hop(HostHandle),
}

enum DispatchFailure {
    Panicked(String),
    HostGone,
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_string()
    }
}

impl Dispatch {
    /// Runs `f` on the host's logical thread, blocking the caller until it
    /// finishes. Panics inside `f` are contained and reported as failures;
    /// they never cross the queue or unwind into the engine.
    fn run<T: Send + 'static>(
        &self,
        f: impl FnOnce() -> T + Send + 'static,
    ) -> Result<T, DispatchFailure> {
        match self {
            Dispatch::Inline => {
                catch_unwind(AssertUnwindSafe(f)).map_err(|p| DispatchFailure::Panicked(panic_message(p)))
            }
            Dispatch::Hop(host) => {
                let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
                let posted = host.post(Box::new(move || {
                    let result = catch_unwind(AssertUnwindSafe(f));
                    let _ = reply_tx.send(result);
                }));
                if !posted {
                    return Err(DispatchFailure::HostGone);
                }
                match reply_rx.recv() {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(payload)) => Err(DispatchFailure::Panicked(panic_message(payload))),
                    Err(_) => Err(DispatchFailure::HostGone),
                }
            }
        }
    }
}

/// Bridge for one custom function, registered under its signature string.
pub(crate) struct FunctionBridge {
    signature: String,
    callable: HostFunction,
    dispatch: Dispatch,
}

impl FunctionBridge {
    pub(crate) fn new(signature: String, callable: HostFunction, dispatch: Dispatch) -> Arc<Self> {
        Arc::new(Self {
            signature,
            callable,
            dispatch,
        })
    }

    /// The engine-facing entry. The handler closure keeps the bridge alive
    /// for as long as the entry is registered with a job.
    pub(crate) fn entry(self: &Arc<Self>) -> FunctionEntry {
        let bridge = Arc::clone(self);
        FunctionEntry {
            signature: self.signature.clone(),
            handler: Arc::new(move |args| bridge.invoke(args)),
        }
    }

    fn invoke(&self, args: &[Value]) -> Value {
        debug!(signature = %self.signature, argc = args.len(), "invoking custom function");
        let args = args.to_vec();
        let callable = Arc::clone(&self.callable);
        match self.dispatch.run(move || callable(&args)) {
            Ok(Ok(value)) => value,
            Ok(Err(failure)) => Value::Error(format!("{}: {}", self.signature, failure)),
            Err(DispatchFailure::Panicked(message)) => {
                Value::Error(format!("{}: {}", self.signature, message))
            }
            Err(DispatchFailure::HostGone) => {
                Value::Error(format!("{}: host loop is gone", self.signature))
            }
        }
    }
}

/// Bridge for one importer.
pub(crate) struct ImporterBridge {
    callable: HostImporter,
    dispatch: Dispatch,
}

impl ImporterBridge {
    pub(crate) fn new(callable: HostImporter, dispatch: Dispatch) -> Arc<Self> {
        Arc::new(Self { callable, dispatch })
    }

    pub(crate) fn entry(self: &Arc<Self>, priority: i32) -> ImporterEntry {
        let bridge = Arc::clone(self);
        ImporterEntry {
            priority,
            handler: Arc::new(move |url, prev| bridge.invoke(url, prev)),
        }
    }

    fn invoke(&self, url: &str, prev: Option<&str>) -> ImporterOutcome {
        debug!(url = %url, prev = ?prev, "invoking importer");
        let request = ImportRequest {
            url: url.to_string(),
            prev: prev.map(str::to_string),
        };
        let callable = Arc::clone(&self.callable);
        let reply = self.dispatch.run(move || callable(&request));
        match reply {
            Ok(Ok(ImporterReply::NotHandled)) => ImporterOutcome::NotHandled,
            Ok(Ok(ImporterReply::Import(record))) => ImporterOutcome::Imports(vec![record]),
            Ok(Ok(ImporterReply::Imports(records))) => ImporterOutcome::Imports(records),
            Ok(Err(failure)) => ImporterOutcome::Error(format!("importer for \"{}\": {}", url, failure)),
            Err(DispatchFailure::Panicked(message)) => {
                ImporterOutcome::Error(format!("importer for \"{}\": {}", url, message))
            }
            Err(DispatchFailure::HostGone) => {
                ImporterOutcome::Error(format!("importer for \"{}\": host loop is gone", url))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use sassette_engine::ImportRecord;

    use crate::host::HostLoop;

    use super::*;

    #[test]
    fn test_inline_function_invoke() {
        let bridge = FunctionBridge::new(
            "add($a, $b)".to_string(),
            Arc::new(|args: &[Value]| {
                Ok(Value::number(args.iter().filter_map(Value::as_number).sum()))
            }),
            Dispatch::Inline,
        );
        let entry = bridge.entry();
        let result = (entry.handler)(&[Value::number(1.0), Value::number(2.0)]);
        assert_eq!(result, Value::number(3.0));
    }

    #[test]
    fn test_inline_function_failure_names_signature() {
        let bridge = FunctionBridge::new(
            "fail($x)".to_string(),
            Arc::new(|_args: &[Value]| Err("no good".into())),
            Dispatch::Inline,
        );
        match bridge.invoke(&[]) {
            Value::Error(message) => assert_eq!(message, "fail($x): no good"),
            other => panic!("expected error value, got {:?}", other),
        }
    }

    #[test]
    fn test_inline_function_panic_is_contained() {
        let bridge = FunctionBridge::new(
            "boom()".to_string(),
            Arc::new(|_args: &[Value]| panic!("host exploded")),
            Dispatch::Inline,
        );
        match bridge.invoke(&[]) {
            Value::Error(message) => {
                assert!(message.starts_with("boom():"));
                assert!(message.contains("host exploded"));
            }
            other => panic!("expected error value, got {:?}", other),
        }
    }

    #[test]
    fn test_hop_runs_callable_on_host_thread() {
        let (handle, host) = HostLoop::channel();
        let host_thread = std::thread::current().id();

        let bridge = FunctionBridge::new(
            "where()".to_string(),
            Arc::new(move |_args: &[Value]| {
                assert_eq!(std::thread::current().id(), host_thread);
                Ok(Value::from("host"))
            }),
            Dispatch::Hop(handle.clone()),
        );

        handle.job_enqueued();
        let retire = handle.clone();
        let worker = std::thread::spawn(move || {
            let value = bridge.invoke(&[]);
            let done = retire.clone();
            retire.post(Box::new(move || done.job_retired()));
            value
        });

        host.run_until_idle();
        assert_eq!(worker.join().unwrap(), Value::from("host"));
    }

    #[test]
    fn test_importer_reply_translation() {
        let bridge = ImporterBridge::new(
            Arc::new(|req: &ImportRequest| {
                if req.url == "miss" {
                    Ok(ImporterReply::NotHandled)
                } else {
                    Ok(ImporterReply::Import(ImportRecord::inline(&req.url, "x{y:1}")))
                }
            }),
            Dispatch::Inline,
        );

        assert_eq!(bridge.invoke("miss", None), ImporterOutcome::NotHandled);
        match bridge.invoke("hit", Some("entry.scss")) {
            ImporterOutcome::Imports(records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].uri, "hit");
            }
            other => panic!("expected imports, got {:?}", other),
        }
    }

    #[test]
    fn test_importer_failure_names_url() {
        let bridge = ImporterBridge::new(
            Arc::new(|_req: &ImportRequest| Err("network down".into())),
            Dispatch::Inline,
        );
        match bridge.invoke("remote/thing", None) {
            ImporterOutcome::Error(message) => {
                assert_eq!(message, "importer for \"remote/thing\": network down");
            }
            other => panic!("expected error, got {:?}", other),
        }
    }
}
