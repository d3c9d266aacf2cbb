//! Worker-side executor
//!
//! Runs inside the worker. Each inbound [`ExecuteRequest`] is handled to
//! completion before the next one starts:
//!
//! 1. wait for the interpreter to be ready
//! 2. merge the request context into the cumulative [`Environment`]
//! 3. preload packages named by the snippet's imports
//! 4. run, loading missing dependencies and retrying until the snippet
//!    succeeds or fails for another reason
//! 5. convert a response handle into a [`ResponseEnvelope`], releasing it
//! 6. honour the import directive carried by a 424 response
//! 7. post `{ uuid, results }` or `{ uuid, error }`

use std::collections::BTreeMap;
use std::future::Future;
use std::ops::{Deref, DerefMut};

use futures::{Stream, StreamExt};
use webdash_hal::{Interpreter, ResponseHandle, RunOutput, RuntimeError, WorkerPort};
use webdash_ipc::{
    Body, ContextValue, ExecValue, ExecuteRequest, ExecutionContext, ResponseEnvelope,
    WorkerReply,
};

// =============================================================================
// Environment
// =============================================================================

/// The worker's global variable store.
///
/// Shared by every call and never reset, so the application instance built
/// by the bootstrap program stays addressable by later calls.
#[derive(Clone, Debug, Default)]
pub struct Environment {
    vars: BTreeMap<String, ContextValue>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ContextValue> {
        self.vars.get(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Merge `context` into the store and bind each entry in `interpreter`.
    pub fn merge<I: Interpreter>(
        &mut self,
        interpreter: &I,
        context: ExecutionContext,
    ) -> Result<(), RuntimeError> {
        for (name, value) in context {
            interpreter.set_global(&name, &value)?;
            self.vars.insert(name, value);
        }
        Ok(())
    }
}

// =============================================================================
// Handle Guard
// =============================================================================

/// Releases a response handle when dropped, on every exit path.
pub struct HandleGuard<H: ResponseHandle> {
    handle: H,
}

impl<H: ResponseHandle> HandleGuard<H> {
    pub fn new(handle: H) -> Self {
        Self { handle }
    }

    /// Read the handle into a plain envelope.
    pub fn to_envelope(&self) -> Result<ResponseEnvelope, RuntimeError> {
        let body = Body::from_bytes(self.handle.body_bytes()?);
        let status = self.handle.status()?;
        let headers = self.handle.headers()?.into_iter().collect();
        Ok(ResponseEnvelope {
            body,
            status,
            headers,
        })
    }
}

impl<H: ResponseHandle> Deref for HandleGuard<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.handle
    }
}

impl<H: ResponseHandle> DerefMut for HandleGuard<H> {
    fn deref_mut(&mut self) -> &mut H {
        &mut self.handle
    }
}

impl<H: ResponseHandle> Drop for HandleGuard<H> {
    fn drop(&mut self) {
        self.handle.release();
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Handles execute requests against an interpreter and posts the replies.
pub struct Executor<I, P> {
    interpreter: I,
    port: P,
    env: Environment,
}

impl<I: Interpreter, P: WorkerPort> Executor<I, P> {
    pub fn new(interpreter: I, port: P) -> Self {
        Self {
            interpreter,
            port,
            env: Environment::new(),
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn interpreter(&self) -> &I {
        &self.interpreter
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    /// Handle requests one at a time, in arrival order, until the stream ends.
    pub async fn serve<S>(&mut self, mut requests: S)
    where
        S: Stream<Item = ExecuteRequest> + Unpin,
    {
        while let Some(request) = requests.next().await {
            self.handle(request).await;
        }
    }

    /// Execute one request and post its reply.
    pub async fn handle(&mut self, request: ExecuteRequest) {
        let ExecuteRequest {
            uuid,
            python,
            context,
        } = request;

        let reply = match self.execute(&python, context).await {
            Ok(results) => WorkerReply::Results { uuid, results },
            Err(e) => WorkerReply::Error {
                uuid,
                error: e.to_string(),
            },
        };

        if let Err(e) = self.port.post(&reply) {
            // Usually a result the channel cannot carry; the caller still
            // needs an answer.
            if let Some(uuid) = reply.uuid() {
                let fallback = WorkerReply::Error {
                    uuid: uuid.clone(),
                    error: e.to_string(),
                };
                let _ = self.port.post(&fallback);
            }
        }
    }

    async fn execute(
        &mut self,
        code: &str,
        context: ExecutionContext,
    ) -> Result<ExecValue, RuntimeError> {
        self.interpreter.ready().await?;
        self.env.merge(&self.interpreter, context)?;
        self.interpreter.load_packages_from_imports(code).await?;

        let interpreter = &self.interpreter;
        let output = resolving_dependencies(interpreter, move || interpreter.run(code)).await?;

        let value = match output {
            RunOutput::Value(value) => value,
            RunOutput::Handle(handle) => ExecValue::Response(HandleGuard::new(handle).to_envelope()?),
        };

        if let ExecValue::Response(envelope) = &value {
            if let Some(module) = envelope.import_directive() {
                resolving_dependencies(interpreter, move || interpreter.import_module(module)).await?;
            }
        }

        Ok(value)
    }
}

/// Run `op`, loading any missing dependency it reports and retrying.
///
/// Stops on success, on any other error, or when a dependency is reported
/// missing again after it was loaded. The last case fails with the
/// interpreter's own error text.
async fn resolving_dependencies<I, T, F, Fut>(interpreter: &I, mut op: F) -> Result<T, RuntimeError>
where
    I: Interpreter,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RuntimeError>>,
{
    let mut loaded: Vec<String> = Vec::new();
    loop {
        match op().await {
            Err(RuntimeError::MissingDependency { name, message }) => {
                if loaded.contains(&name) {
                    return Err(RuntimeError::Failed(message));
                }
                interpreter.load_package(&name).await?;
                loaded.push(name);
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeResponse, RecordingPort, Scripted, ScriptedInterpreter};
    use futures::executor::block_on;
    use webdash_ipc::CorrelationId;

    fn request(uuid: &str, python: &str) -> ExecuteRequest {
        ExecuteRequest::new(CorrelationId::from(uuid), python)
    }

    fn executor(interpreter: ScriptedInterpreter) -> Executor<ScriptedInterpreter, RecordingPort> {
        Executor::new(interpreter, RecordingPort::new())
    }

    #[test]
    fn test_environment_is_cumulative() {
        let mut executor = executor(ScriptedInterpreter::new());

        let mut first = ExecutionContext::new();
        first.insert("dataset".to_string(), serde_json::json!("a.csv").into());
        block_on(executor.handle(request("1", "x").with_context(first)));

        let mut second = ExecutionContext::new();
        second.insert("limit".to_string(), serde_json::json!(10).into());
        second.insert("raw".to_string(), vec![0u8, 255].into());
        block_on(executor.handle(request("2", "y").with_context(second)));

        let env = executor.environment();
        assert_eq!(
            env.get("dataset").and_then(ContextValue::as_json),
            Some(&serde_json::json!("a.csv"))
        );
        assert_eq!(
            env.get("limit").and_then(ContextValue::as_json),
            Some(&serde_json::json!(10))
        );
        assert_eq!(
            executor.interpreter().global("dataset"),
            Some(ContextValue::from(serde_json::json!("a.csv")))
        );
        assert_eq!(
            executor.interpreter().global("raw"),
            Some(ContextValue::Binary(vec![0, 255]))
        );
    }

    #[test]
    fn test_missing_dependency_is_loaded_and_retried() {
        let interpreter = ScriptedInterpreter::new().script(
            "import sklearn",
            Scripted::requires("scikit-learn", Scripted::Value(ExecValue::Text("ok".to_string()))),
        );
        let mut executor = executor(interpreter);

        block_on(executor.handle(request("1", "import sklearn")));

        assert_eq!(executor.interpreter().loaded_packages(), vec!["scikit-learn".to_string()]);
        assert_eq!(executor.interpreter().run_count("import sklearn"), 2);
        assert_eq!(
            executor.port().replies(),
            vec![WorkerReply::Results {
                uuid: CorrelationId::from("1"),
                results: ExecValue::Text("ok".to_string()),
            }]
        );
    }

    #[test]
    fn test_dependency_loop_stops_when_load_does_not_help() {
        let interpreter = ScriptedInterpreter::new()
            .script(
                "import broken",
                Scripted::requires("broken", Scripted::Value(ExecValue::None)),
            )
            .with_broken_package("broken");
        let mut executor = executor(interpreter);

        block_on(executor.handle(request("1", "import broken")));

        assert_eq!(executor.interpreter().run_count("import broken"), 2);
        assert_eq!(
            executor.port().replies(),
            vec![WorkerReply::Error {
                uuid: CorrelationId::from("1"),
                error: "ModuleNotFoundError: No module named 'broken'".to_string(),
            }]
        );
    }

    #[test]
    fn test_runtime_failure_is_reported_verbatim_without_retry() {
        let interpreter = ScriptedInterpreter::new()
            .script("df['x']", Scripted::Fail("KeyError: 'x'".to_string()));
        let mut executor = executor(interpreter);

        block_on(executor.handle(request("1", "df['x']")));

        assert_eq!(
            executor.port().replies(),
            vec![WorkerReply::Error {
                uuid: CorrelationId::from("1"),
                error: "KeyError: 'x'".to_string(),
            }]
        );
        assert_eq!(executor.interpreter().runs(), vec!["df['x']".to_string()]);
        assert_eq!(executor.interpreter().run_count("df['x']"), 1);
        assert!(executor.interpreter().loaded_packages().is_empty());
    }

    #[test]
    fn test_unloadable_dependency_becomes_runtime_failure() {
        let interpreter = ScriptedInterpreter::new().script(
            "import nothere",
            Scripted::requires("nothere", Scripted::Value(ExecValue::None)),
        )
        .with_unavailable_package("nothere");
        let mut executor = executor(interpreter);

        block_on(executor.handle(request("1", "import nothere")));

        assert!(matches!(
            executor.port().replies()[0],
            WorkerReply::Error { .. }
        ));
    }

    #[test]
    fn test_response_handle_is_converted_and_released() {
        let response = FakeResponse::new(200, b"{\"a\":1}".to_vec())
            .with_header("Content-Type", "application/json");
        let released = response.release_counter();
        let interpreter =
            ScriptedInterpreter::new().script("response", Scripted::Response(response));
        let mut executor = executor(interpreter);

        block_on(executor.handle(request("1", "response")));

        let expected = ResponseEnvelope::new(200, Body::Text("{\"a\":1}".to_string()))
            .with_header("Content-Type", "application/json");
        assert_eq!(
            executor.port().replies(),
            vec![WorkerReply::Results {
                uuid: CorrelationId::from("1"),
                results: ExecValue::Response(expected),
            }]
        );
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn test_response_handle_released_when_conversion_fails() {
        let response = FakeResponse::new(200, Vec::new()).with_failing_body();
        let released = response.release_counter();
        let interpreter =
            ScriptedInterpreter::new().script("response", Scripted::Response(response));
        let mut executor = executor(interpreter);

        block_on(executor.handle(request("1", "response")));

        assert!(matches!(executor.port().replies()[0], WorkerReply::Error { .. }));
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn test_binary_body_passes_through() {
        let response = FakeResponse::new(200, vec![0x89, b'P', b'N', b'G', 0xff]);
        let interpreter =
            ScriptedInterpreter::new().script("png", Scripted::Response(response));
        let mut executor = executor(interpreter);

        block_on(executor.handle(request("1", "png")));

        match &executor.port().replies()[0] {
            WorkerReply::Results {
                results: ExecValue::Response(envelope),
                ..
            } => assert_eq!(envelope.body, Body::Binary(vec![0x89, b'P', b'N', b'G', 0xff])),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_import_directive_is_honoured_before_reply() {
        let interpreter = ScriptedInterpreter::new().script(
            "lazy",
            Scripted::Response(FakeResponse::new(424, b"some.module".to_vec())),
        );
        let mut executor = executor(interpreter);

        block_on(executor.handle(request("1", "lazy")));

        assert_eq!(
            executor.interpreter().imported_modules(),
            vec!["some.module".to_string()]
        );
        assert!(matches!(
            executor.port().replies()[0],
            WorkerReply::Results { .. }
        ));
    }

    #[test]
    fn test_failed_import_directive_is_an_error() {
        let interpreter = ScriptedInterpreter::new()
            .script(
                "lazy",
                Scripted::Response(FakeResponse::new(424, b"missing.module".to_vec())),
            )
            .with_unimportable_module("missing.module");
        let mut executor = executor(interpreter);

        block_on(executor.handle(request("1", "lazy")));

        assert!(matches!(executor.port().replies()[0], WorkerReply::Error { .. }));
    }

    #[test]
    fn test_startup_failure_fails_every_request() {
        let mut executor = executor(ScriptedInterpreter::new().with_startup_failure("no wasm"));

        block_on(executor.handle(request("1", "a")));
        block_on(executor.handle(request("2", "b")));

        let replies = executor.port().replies();
        assert_eq!(replies.len(), 2);
        for reply in replies {
            match reply {
                WorkerReply::Error { error, .. } => assert_eq!(error, "no wasm"),
                other => panic!("unexpected reply {:?}", other),
            }
        }
        assert_eq!(executor.interpreter().run_count("a"), 0);
    }

    #[test]
    fn test_imports_are_preloaded() {
        let mut executor = executor(ScriptedInterpreter::new());

        block_on(executor.handle(request("1", "import pandas\npandas.__version__")));

        assert_eq!(
            executor.interpreter().preloaded(),
            vec!["import pandas\npandas.__version__".to_string()]
        );
    }

    #[test]
    fn test_unpostable_result_falls_back_to_error() {
        let mut executor = Executor::new(
            ScriptedInterpreter::new().script(
                "x",
                Scripted::Value(ExecValue::Json(serde_json::json!({"k": 1}))),
            ),
            RecordingPort::new().rejecting_results(),
        );

        block_on(executor.handle(request("1", "x")));

        match &executor.port().replies()[..] {
            [WorkerReply::Error { uuid, .. }] => assert_eq!(uuid.as_str(), "1"),
            other => panic!("unexpected replies {:?}", other),
        }
    }

    #[test]
    fn test_serve_is_sequential() {
        let mut executor = executor(ScriptedInterpreter::new());
        let requests = futures::stream::iter(vec![request("a", "1"), request("b", "2"), request("c", "3")]);

        block_on(executor.serve(requests));

        let order: Vec<_> = executor
            .port()
            .replies()
            .iter()
            .filter_map(|r| r.uuid().map(|u| u.as_str().to_string()))
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }
}
