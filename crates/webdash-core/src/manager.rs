//! Worker manager
//!
//! Owns the channel to the interpreter worker and turns its fire-and-forget
//! messages into awaitable calls.
//!
//! ```text
//!   execute_with_*()                    process_message()
//!         │                                    ▲
//!         │ register PendingCall(uuid)         │ { uuid, results | error }
//!         │ post { uuid, python, ..ctx }       │ { consoleMessage | consoleError }
//!         ▼                                    │
//!   ┌───────────┐        MessageChannel        ┌┴──────────┐
//!   │  pending  │ ───────────────────────────► │  worker   │
//!   └───────────┘                              └───────────┘
//! ```
//!
//! Replies are matched by correlation id only, so concurrent calls may
//! complete in any order. A reply is delivered at most once: the pending
//! entry is removed before its sender fires.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use futures::channel::oneshot;
use webdash_hal::{Console, MessageChannel, OutputStream};
use webdash_ipc::{
    CorrelationId, ExecValue, ExecuteRequest, ExecutionContext, ResponseEnvelope, ValueKind,
    WorkerReply, EVAL_PREFIX,
};

use crate::error::BridgeError;

type Outcome = Result<ExecValue, String>;

/// A dispatched call waiting for its reply.
struct PendingCall {
    reply: oneshot::Sender<Outcome>,
}

/// Page-side half of the bridge.
///
/// Cheap to clone; clones share the channel and the pending set.
pub struct WorkerManager<C, K> {
    channel: Rc<C>,
    console: Rc<K>,
    pending: Rc<RefCell<HashMap<CorrelationId, PendingCall>>>,
    disconnected: Rc<Cell<bool>>,
    verbose: bool,
}

impl<C, K> Clone for WorkerManager<C, K> {
    fn clone(&self) -> Self {
        Self {
            channel: Rc::clone(&self.channel),
            console: Rc::clone(&self.console),
            pending: Rc::clone(&self.pending),
            disconnected: Rc::clone(&self.disconnected),
            verbose: self.verbose,
        }
    }
}

impl<C: MessageChannel, K: Console> WorkerManager<C, K> {
    pub fn new(channel: C, console: K) -> Self {
        Self {
            channel: Rc::new(channel),
            console: Rc::new(console),
            pending: Rc::new(RefCell::new(HashMap::new())),
            disconnected: Rc::new(Cell::new(false)),
            verbose: false,
        }
    }

    /// Emit request trace lines.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn console(&self) -> &K {
        &self.console
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Write a trace line when verbose.
    pub fn trace(&self, msg: &str) {
        if self.verbose {
            self.console.debug_write(msg);
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Run `code` in the worker with `context` merged into its environment.
    pub async fn execute_with_any_response(
        &self,
        code: &str,
        context: ExecutionContext,
    ) -> Result<ExecValue, BridgeError> {
        if self.disconnected.get() {
            return Err(BridgeError::Disconnected);
        }

        let (tx, rx) = oneshot::channel();
        let uuid = {
            let mut pending = self.pending.borrow_mut();
            let uuid = fresh_correlation_id(&pending);
            pending.insert(uuid.clone(), PendingCall { reply: tx });
            uuid
        };

        let request = ExecuteRequest::new(uuid.clone(), code).with_context(context);
        if let Err(e) = self.channel.post(&request) {
            self.pending.borrow_mut().remove(&uuid);
            return Err(e.into());
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(BridgeError::Runtime(error)),
            Err(oneshot::Canceled) => Err(BridgeError::Disconnected),
        }
    }

    /// Like [`execute_with_any_response`](Self::execute_with_any_response),
    /// but the result must be a string. An empty string is a valid result.
    pub async fn execute_with_string_response(
        &self,
        code: &str,
        context: ExecutionContext,
    ) -> Result<String, BridgeError> {
        match self.execute_with_any_response(code, context).await? {
            ExecValue::Text(text) => Ok(text),
            other => Err(mismatch(ValueKind::String, &other)),
        }
    }

    /// Like [`execute_with_any_response`](Self::execute_with_any_response),
    /// but the result must be a byte array.
    pub async fn execute_with_binary_response(
        &self,
        code: &str,
        context: ExecutionContext,
    ) -> Result<Vec<u8>, BridgeError> {
        match self.execute_with_any_response(code, context).await? {
            ExecValue::Binary(bytes) => Ok(bytes),
            other => Err(mismatch(ValueKind::Binary, &other)),
        }
    }

    /// Like [`execute_with_any_response`](Self::execute_with_any_response),
    /// but the result must be a converted response object.
    pub async fn execute_with_envelope_response(
        &self,
        code: &str,
        context: ExecutionContext,
    ) -> Result<ResponseEnvelope, BridgeError> {
        match self.execute_with_any_response(code, context).await? {
            ExecValue::Response(envelope) => Ok(envelope),
            other => Err(mismatch(ValueKind::Response, &other)),
        }
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Handle one message posted by the worker.
    pub fn process_message(&self, reply: WorkerReply) {
        self.trace("[4. Message received from worker]");

        match reply {
            WorkerReply::ConsoleMessage(text) => {
                if let Some(script) = text.strip_prefix(EVAL_PREFIX) {
                    if let Err(e) = self.console.eval_script(script) {
                        self.console
                            .error_write(&format!("[worker-manager] Page eval failed: {}", e));
                    }
                    return;
                }
                if !self.console.show_status(OutputStream::Stdout, &text) {
                    self.console.debug_write(&text);
                }
            }
            WorkerReply::ConsoleError(text) => {
                if !self.console.show_status(OutputStream::Stderr, &text) {
                    self.console.error_write(&text);
                }
            }
            WorkerReply::Results { uuid, results } => self.settle(uuid, Ok(results)),
            WorkerReply::Error { uuid, error } => {
                self.console
                    .error_write(&format!("[worker-manager] WORKER ERROR: {}", error));
                self.settle(uuid, Err(error));
            }
        }
    }

    /// Handle an uncaught error raised by the worker itself.
    ///
    /// Pending calls are left alone; they are only ever settled by a
    /// correlated reply.
    pub fn process_worker_error(&self, message: &str) {
        self.console
            .error_write(&format!("[worker-manager] INTERNAL WORKER ERROR: {}", message));
    }

    /// Fail every pending call with [`BridgeError::Disconnected`]. Later
    /// calls fail the same way without reaching the channel.
    pub fn disconnect(&self) {
        self.disconnected.set(true);
        let drained: Vec<_> = self.pending.borrow_mut().drain().collect();
        if !drained.is_empty() {
            self.console.error_write(&format!(
                "[worker-manager] Dropping {} pending call(s)",
                drained.len()
            ));
        }
    }

    fn settle(&self, uuid: CorrelationId, outcome: Outcome) {
        let call = self.pending.borrow_mut().remove(&uuid);
        match call {
            Some(call) => {
                // The caller may have stopped waiting; nothing to deliver to.
                let _ = call.reply.send(outcome);
            }
            None => self.console.error_write(&format!(
                "[worker-manager] UNPAIRED WORKER MESSAGE: {}",
                uuid
            )),
        }
    }
}

fn fresh_correlation_id(pending: &HashMap<CorrelationId, PendingCall>) -> CorrelationId {
    loop {
        let id = CorrelationId(uuid::Uuid::new_v4().to_string());
        if !pending.contains_key(&id) {
            return id;
        }
    }
}

fn mismatch(expected: ValueKind, found: &ExecValue) -> BridgeError {
    BridgeError::TypeMismatch {
        expected,
        found: found.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CapturingConsole, RecordingChannel};
    use futures::executor::LocalPool;
    use futures::task::LocalSpawnExt;

    fn manager() -> WorkerManager<RecordingChannel, CapturingConsole> {
        WorkerManager::new(RecordingChannel::new(), CapturingConsole::new())
    }

    #[test]
    fn test_request_carries_code_and_context() {
        let manager = manager();
        let mut pool = LocalPool::new();

        let mut context = ExecutionContext::new();
        context.insert("dataset".to_string(), serde_json::json!("autompg.csv").into());

        let m = manager.clone();
        pool.spawner()
            .spawn_local(async move {
                let _ = m.execute_with_any_response("app.title", context).await;
            })
            .unwrap();
        pool.run_until_stalled();

        let sent = manager.channel().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].python, "app.title");
        assert_eq!(
            sent[0].context["dataset"].as_json(),
            Some(&serde_json::json!("autompg.csv"))
        );
        assert_eq!(manager.pending_count(), 1);
    }

    #[test]
    fn test_out_of_order_replies_reach_their_callers() {
        let manager = manager();
        let mut pool = LocalPool::new();
        let first = Rc::new(RefCell::new(None));
        let second = Rc::new(RefCell::new(None));

        for (code, slot) in [("first", first.clone()), ("second", second.clone())] {
            let m = manager.clone();
            pool.spawner()
                .spawn_local(async move {
                    let result = m
                        .execute_with_string_response(code, ExecutionContext::new())
                        .await;
                    *slot.borrow_mut() = Some(result);
                })
                .unwrap();
        }
        pool.run_until_stalled();

        let sent = manager.channel().sent();
        assert_ne!(sent[0].uuid, sent[1].uuid);

        manager.process_message(WorkerReply::Results {
            uuid: sent[1].uuid.clone(),
            results: ExecValue::Text("two".to_string()),
        });
        manager.process_message(WorkerReply::Results {
            uuid: sent[0].uuid.clone(),
            results: ExecValue::Text("one".to_string()),
        });
        pool.run_until_stalled();

        assert_eq!(*first.borrow(), Some(Ok("one".to_string())));
        assert_eq!(*second.borrow(), Some(Ok("two".to_string())));
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn test_duplicate_reply_is_unpaired() {
        let manager = manager();
        let mut pool = LocalPool::new();
        let settled = Rc::new(Cell::new(0));

        let m = manager.clone();
        let s = settled.clone();
        pool.spawner()
            .spawn_local(async move {
                let _ = m.execute_with_any_response("1 + 1", ExecutionContext::new()).await;
                s.set(s.get() + 1);
            })
            .unwrap();
        pool.run_until_stalled();

        let uuid = manager.channel().sent()[0].uuid.clone();
        let reply = WorkerReply::Results {
            uuid,
            results: ExecValue::Json(serde_json::json!(2)),
        };
        manager.process_message(reply.clone());
        manager.process_message(reply);
        pool.run_until_stalled();

        assert_eq!(settled.get(), 1);
        assert!(manager
            .console()
            .errors()
            .iter()
            .any(|line| line.contains("UNPAIRED WORKER MESSAGE")));
    }

    #[test]
    fn test_error_reply_rejects() {
        let manager = manager();
        let mut pool = LocalPool::new();
        let result = Rc::new(RefCell::new(None));

        let m = manager.clone();
        let r = result.clone();
        pool.spawner()
            .spawn_local(async move {
                *r.borrow_mut() = Some(m.execute_with_any_response("1/0", ExecutionContext::new()).await);
            })
            .unwrap();
        pool.run_until_stalled();

        let uuid = manager.channel().sent()[0].uuid.clone();
        manager.process_message(WorkerReply::Error {
            uuid,
            error: "ZeroDivisionError: division by zero".to_string(),
        });
        pool.run_until_stalled();

        assert_eq!(
            *result.borrow(),
            Some(Err(BridgeError::Runtime(
                "ZeroDivisionError: division by zero".to_string()
            )))
        );
    }

    #[test]
    fn test_typed_accessors_reject_wrong_shape() {
        let manager = manager();
        let mut pool = LocalPool::new();
        let text = Rc::new(RefCell::new(None));
        let bytes = Rc::new(RefCell::new(None));

        let (m, t) = (manager.clone(), text.clone());
        pool.spawner()
            .spawn_local(async move {
                *t.borrow_mut() =
                    Some(m.execute_with_string_response("a", ExecutionContext::new()).await);
            })
            .unwrap();
        let (m, b) = (manager.clone(), bytes.clone());
        pool.spawner()
            .spawn_local(async move {
                *b.borrow_mut() =
                    Some(m.execute_with_binary_response("b", ExecutionContext::new()).await);
            })
            .unwrap();
        pool.run_until_stalled();

        let sent = manager.channel().sent();
        manager.process_message(WorkerReply::Results {
            uuid: sent[0].uuid.clone(),
            results: ExecValue::Binary(vec![1, 2, 3]),
        });
        manager.process_message(WorkerReply::Results {
            uuid: sent[1].uuid.clone(),
            results: ExecValue::Text(String::new()),
        });
        pool.run_until_stalled();

        assert_eq!(
            *text.borrow(),
            Some(Err(BridgeError::TypeMismatch {
                expected: ValueKind::String,
                found: ValueKind::Binary,
            }))
        );
        assert_eq!(
            *bytes.borrow(),
            Some(Err(BridgeError::TypeMismatch {
                expected: ValueKind::Binary,
                found: ValueKind::String,
            }))
        );
    }

    #[test]
    fn test_side_channel_messages() {
        let manager = manager();
        manager.console().set_status_bar(true);

        manager.process_message(WorkerReply::ConsoleMessage("Loading numpy".to_string()));
        manager.process_message(WorkerReply::ConsoleError("warning".to_string()));
        manager.process_message(WorkerReply::ConsoleMessage(
            "pyodide-eval:window.done = true".to_string(),
        ));

        assert_eq!(
            manager.console().status_lines(),
            vec![
                (OutputStream::Stdout, "Loading numpy".to_string()),
                (OutputStream::Stderr, "warning".to_string()),
            ]
        );
        assert_eq!(manager.console().evaluated(), vec!["window.done = true".to_string()]);
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn test_side_channel_without_status_bar_goes_to_log() {
        let manager = manager();

        manager.process_message(WorkerReply::ConsoleMessage("hello".to_string()));
        manager.process_message(WorkerReply::ConsoleError("oops".to_string()));

        assert!(manager.console().status_lines().is_empty());
        assert_eq!(manager.console().debug(), vec!["hello".to_string()]);
        assert_eq!(manager.console().errors(), vec!["oops".to_string()]);
    }

    #[test]
    fn test_post_failure_unregisters_call() {
        let manager = manager();
        manager.channel().fail_next_post();

        let result = futures::executor::block_on(
            manager.execute_with_any_response("x", ExecutionContext::new()),
        );

        assert!(matches!(result, Err(BridgeError::Hal(_))));
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn test_disconnect_rejects_pending_calls() {
        let manager = manager();
        let mut pool = LocalPool::new();
        let result = Rc::new(RefCell::new(None));

        let (m, r) = (manager.clone(), result.clone());
        pool.spawner()
            .spawn_local(async move {
                *r.borrow_mut() = Some(m.execute_with_any_response("x", ExecutionContext::new()).await);
            })
            .unwrap();
        pool.run_until_stalled();

        manager.disconnect();
        pool.run_until_stalled();

        assert_eq!(*result.borrow(), Some(Err(BridgeError::Disconnected)));
    }

    #[test]
    fn test_calls_after_disconnect_fail_immediately() {
        let manager = manager();
        manager.disconnect();

        let result = futures::executor::block_on(
            manager.execute_with_any_response("x", ExecutionContext::new()),
        );

        assert_eq!(result, Err(BridgeError::Disconnected));
        assert_eq!(manager.pending_count(), 0);
        assert!(manager.channel().sent().is_empty());

        // Clones share the state
        let clone = manager.clone();
        let result = futures::executor::block_on(
            clone.execute_with_string_response("y", ExecutionContext::new()),
        );
        assert_eq!(result, Err(BridgeError::Disconnected));
    }

    #[test]
    fn test_worker_error_event_does_not_settle_calls() {
        let manager = manager();
        let mut pool = LocalPool::new();

        let m = manager.clone();
        pool.spawner()
            .spawn_local(async move {
                let _ = m.execute_with_any_response("x", ExecutionContext::new()).await;
            })
            .unwrap();
        pool.run_until_stalled();

        manager.process_worker_error("worker.js:1 SyntaxError");
        assert_eq!(manager.pending_count(), 1);
        assert!(manager.console().errors()[0].contains("INTERNAL WORKER ERROR"));
    }
}
