//! In-memory implementations of the HAL traits for tests.
//!
//! None of these touch a browser: channels record what they are given,
//! the console captures lines, the document keeps an event log, and the
//! interpreter answers from a script.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::rc::Rc;

use futures::FutureExt;
use webdash_hal::{
    Console, Document, HalError, InlineScript, Interpreter, MessageChannel, OutputStream,
    ResponseHandle, RunOutput, RuntimeError, SourceLoader, WorkerPort,
};
use webdash_ipc::{ContextValue, ExecValue, ExecuteRequest, WorkerReply};

use crate::manager::WorkerManager;

// =============================================================================
// Page Side
// =============================================================================

/// Channel that records every posted request.
#[derive(Default)]
pub struct RecordingChannel {
    sent: RefCell<Vec<ExecuteRequest>>,
    fail_next: Cell<bool>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request posted so far, oldest first.
    pub fn sent(&self) -> Vec<ExecuteRequest> {
        self.sent.borrow().clone()
    }

    /// Make the next `post` fail.
    pub fn fail_next_post(&self) {
        self.fail_next.set(true);
    }
}

impl MessageChannel for RecordingChannel {
    fn post(&self, request: &ExecuteRequest) -> Result<(), HalError> {
        if self.fail_next.replace(false) {
            return Err(HalError::PostFailed("DataCloneError".to_string()));
        }
        self.sent.borrow_mut().push(request.clone());
        Ok(())
    }
}

/// Console that captures everything written to it.
#[derive(Default)]
pub struct CapturingConsole {
    status_bar: Cell<bool>,
    status: RefCell<Vec<(OutputStream, String)>>,
    debug: RefCell<Vec<String>>,
    errors: RefCell<Vec<String>>,
    evaluated: RefCell<Vec<String>>,
}

impl CapturingConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend a status display element exists.
    pub fn set_status_bar(&self, present: bool) {
        self.status_bar.set(present);
    }

    pub fn status_lines(&self) -> Vec<(OutputStream, String)> {
        self.status.borrow().clone()
    }

    pub fn debug(&self) -> Vec<String> {
        self.debug.borrow().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.borrow().clone()
    }

    pub fn evaluated(&self) -> Vec<String> {
        self.evaluated.borrow().clone()
    }
}

impl Console for CapturingConsole {
    fn show_status(&self, stream: OutputStream, text: &str) -> bool {
        if !self.status_bar.get() {
            return false;
        }
        self.status.borrow_mut().push((stream, text.to_string()));
        true
    }

    fn debug_write(&self, msg: &str) {
        self.debug.borrow_mut().push(msg.to_string());
    }

    fn error_write(&self, msg: &str) {
        self.errors.borrow_mut().push(msg.to_string());
    }

    fn eval_script(&self, code: &str) -> Result<(), HalError> {
        self.evaluated.borrow_mut().push(code.to_string());
        Ok(())
    }
}

/// A DOM mutation recorded by [`MemoryDocument`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DomEvent {
    Head(String),
    Body(String),
    Container { tag: String, html: String },
    ExternalScript { parent: usize, src: String },
    InlineScript {
        parent: usize,
        code: String,
        id: Option<String>,
        script_type: String,
    },
}

/// Document that records mutations instead of applying them.
///
/// Containers are identified by their creation index.
pub struct MemoryDocument {
    pathname: String,
    events: RefCell<Vec<DomEvent>>,
    containers: Cell<usize>,
    failing_src: RefCell<Option<String>>,
}

impl MemoryDocument {
    pub fn new(pathname: impl Into<String>) -> Self {
        Self {
            pathname: pathname.into(),
            events: RefCell::new(Vec::new()),
            containers: Cell::new(0),
            failing_src: RefCell::new(None),
        }
    }

    /// Make the external script with this source fire `error`.
    pub fn fail_script(&self, src: impl Into<String>) {
        *self.failing_src.borrow_mut() = Some(src.into());
    }

    pub fn events(&self) -> Vec<DomEvent> {
        self.events.borrow().clone()
    }
}

impl Document for MemoryDocument {
    type Element = usize;

    fn location_pathname(&self) -> String {
        self.pathname.clone()
    }

    fn set_head_html(&self, html: &str) -> Result<(), HalError> {
        self.events.borrow_mut().push(DomEvent::Head(html.to_string()));
        Ok(())
    }

    fn set_body_html(&self, html: &str) -> Result<(), HalError> {
        self.events.borrow_mut().push(DomEvent::Body(html.to_string()));
        Ok(())
    }

    fn append_container(&self, tag: &str, html: &str) -> Result<usize, HalError> {
        let id = self.containers.get();
        self.containers.set(id + 1);
        self.events.borrow_mut().push(DomEvent::Container {
            tag: tag.to_string(),
            html: html.to_string(),
        });
        Ok(id)
    }

    async fn append_external_script(&self, parent: &usize, src: &str) -> Result<(), HalError> {
        self.events.borrow_mut().push(DomEvent::ExternalScript {
            parent: *parent,
            src: src.to_string(),
        });
        if self.failing_src.borrow().as_deref() == Some(src) {
            return Err(HalError::ScriptLoadFailed(src.to_string()));
        }
        Ok(())
    }

    fn append_inline_script(
        &self,
        parent: &usize,
        script: InlineScript<'_>,
    ) -> Result<(), HalError> {
        self.events.borrow_mut().push(DomEvent::InlineScript {
            parent: *parent,
            code: script.code.to_string(),
            id: script.id.map(str::to_string),
            script_type: script.script_type.to_string(),
        });
        Ok(())
    }
}

/// Loader serving fixed documents.
#[derive(Default)]
pub struct StaticLoader {
    files: HashMap<String, String>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, url: impl Into<String>, text: impl Into<String>) -> Self {
        self.files.insert(url.into(), text.into());
        self
    }
}

impl SourceLoader for StaticLoader {
    async fn load_text(&self, url: &str) -> Result<String, HalError> {
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| HalError::FetchFailed(format!("404 {}", url)))
    }
}

/// Poll `future` to completion, answering each request the manager posts
/// with `respond`.
///
/// Panics if the future stalls with no request left to answer.
pub fn run_bridged<K, F, R>(
    manager: &WorkerManager<RecordingChannel, K>,
    mut respond: R,
    future: F,
) -> F::Output
where
    K: Console,
    F: Future,
    R: FnMut(&ExecuteRequest) -> WorkerReply,
{
    let mut future = Box::pin(future);
    let mut answered = 0;
    loop {
        if let Some(output) = (&mut future).now_or_never() {
            return output;
        }
        let sent = manager.channel().sent();
        if sent.len() == answered {
            panic!("future stalled with no request to answer");
        }
        for request in &sent[answered..] {
            manager.process_message(respond(request));
        }
        answered = sent.len();
    }
}

// =============================================================================
// Worker Side
// =============================================================================

/// Port that records every posted reply.
#[derive(Default)]
pub struct RecordingPort {
    replies: RefCell<Vec<WorkerReply>>,
    reject_results: bool,
}

impl RecordingPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse `results` replies, as `postMessage` does for uncloneable values.
    pub fn rejecting_results(mut self) -> Self {
        self.reject_results = true;
        self
    }

    pub fn replies(&self) -> Vec<WorkerReply> {
        self.replies.borrow().clone()
    }
}

impl WorkerPort for RecordingPort {
    fn post(&self, reply: &WorkerReply) -> Result<(), HalError> {
        if self.reject_results && matches!(reply, WorkerReply::Results { .. }) {
            return Err(HalError::PostFailed("DataCloneError".to_string()));
        }
        self.replies.borrow_mut().push(reply.clone());
        Ok(())
    }
}

/// Response handle with canned content that counts its releases.
#[derive(Clone, Debug)]
pub struct FakeResponse {
    status: u16,
    body: Vec<u8>,
    headers: Vec<(String, String)>,
    failing_body: bool,
    released: Rc<Cell<u32>>,
    done: bool,
}

impl FakeResponse {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            body,
            headers: Vec::new(),
            failing_body: false,
            released: Rc::new(Cell::new(0)),
            done: false,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Make `body_bytes` fail, as a non-UTF-8 strict decode would.
    pub fn with_failing_body(mut self) -> Self {
        self.failing_body = true;
        self
    }

    /// Shared counter of releases across clones of this response.
    pub fn release_counter(&self) -> Rc<Cell<u32>> {
        Rc::clone(&self.released)
    }
}

impl ResponseHandle for FakeResponse {
    fn body_bytes(&self) -> Result<Vec<u8>, RuntimeError> {
        if self.failing_body {
            return Err(RuntimeError::Failed("body unavailable".to_string()));
        }
        Ok(self.body.clone())
    }

    fn status(&self) -> Result<u16, RuntimeError> {
        Ok(self.status)
    }

    fn headers(&self) -> Result<Vec<(String, String)>, RuntimeError> {
        Ok(self.headers.clone())
    }

    fn release(&mut self) {
        if !self.done {
            self.done = true;
            self.released.set(self.released.get() + 1);
        }
    }
}

/// What a scripted snippet does when run.
#[derive(Clone, Debug)]
pub enum Scripted {
    Value(ExecValue),
    Response(FakeResponse),
    Fail(String),
    /// Fails with a missing dependency until `package` is loaded
    Requires {
        package: String,
        then: Box<Scripted>,
    },
}

impl Scripted {
    pub fn requires(package: impl Into<String>, then: Scripted) -> Self {
        Scripted::Requires {
            package: package.into(),
            then: Box::new(then),
        }
    }
}

/// Interpreter that answers snippets from a script.
///
/// Unscripted snippets evaluate to `None`.
#[derive(Default)]
pub struct ScriptedInterpreter {
    scripts: HashMap<String, Scripted>,
    startup_failure: Option<String>,
    broken_packages: HashSet<String>,
    unavailable_packages: HashSet<String>,
    unimportable_modules: HashSet<String>,
    available: RefCell<HashSet<String>>,
    globals: RefCell<BTreeMap<String, ContextValue>>,
    loaded: RefCell<Vec<String>>,
    imported: RefCell<Vec<String>>,
    preloaded: RefCell<Vec<String>>,
    runs: RefCell<Vec<String>>,
}

impl ScriptedInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, code: impl Into<String>, outcome: Scripted) -> Self {
        self.scripts.insert(code.into(), outcome);
        self
    }

    pub fn with_startup_failure(mut self, msg: impl Into<String>) -> Self {
        self.startup_failure = Some(msg.into());
        self
    }

    /// The package loads but does not provide what was missing.
    pub fn with_broken_package(mut self, name: impl Into<String>) -> Self {
        self.broken_packages.insert(name.into());
        self
    }

    /// The package cannot be loaded at all.
    pub fn with_unavailable_package(mut self, name: impl Into<String>) -> Self {
        self.unavailable_packages.insert(name.into());
        self
    }

    pub fn with_unimportable_module(mut self, name: impl Into<String>) -> Self {
        self.unimportable_modules.insert(name.into());
        self
    }

    pub fn global(&self, name: &str) -> Option<ContextValue> {
        self.globals.borrow().get(name).cloned()
    }

    pub fn loaded_packages(&self) -> Vec<String> {
        self.loaded.borrow().clone()
    }

    pub fn imported_modules(&self) -> Vec<String> {
        self.imported.borrow().clone()
    }

    pub fn preloaded(&self) -> Vec<String> {
        self.preloaded.borrow().clone()
    }

    /// How many times `code` was run.
    pub fn run_count(&self, code: &str) -> usize {
        self.runs.borrow().iter().filter(|c| *c == code).count()
    }

    /// Every snippet run so far, oldest first.
    pub fn runs(&self) -> Vec<String> {
        self.runs.borrow().clone()
    }

    fn evaluate(&self, outcome: &Scripted) -> Result<RunOutput<FakeResponse>, RuntimeError> {
        match outcome {
            Scripted::Value(value) => Ok(RunOutput::Value(value.clone())),
            Scripted::Response(response) => Ok(RunOutput::Handle(response.clone())),
            Scripted::Fail(msg) => Err(RuntimeError::Failed(msg.clone())),
            Scripted::Requires { package, then } => {
                if self.available.borrow().contains(package) {
                    self.evaluate(then)
                } else {
                    Err(RuntimeError::MissingDependency {
                        name: package.clone(),
                        message: format!("ModuleNotFoundError: No module named '{}'", package),
                    })
                }
            }
        }
    }
}

impl Interpreter for ScriptedInterpreter {
    type Handle = FakeResponse;

    async fn ready(&self) -> Result<(), RuntimeError> {
        match &self.startup_failure {
            Some(msg) => Err(RuntimeError::Failed(msg.clone())),
            None => Ok(()),
        }
    }

    fn set_global(&self, name: &str, value: &ContextValue) -> Result<(), RuntimeError> {
        self.globals
            .borrow_mut()
            .insert(name.to_string(), value.clone());
        Ok(())
    }

    async fn load_packages_from_imports(&self, code: &str) -> Result<(), RuntimeError> {
        self.preloaded.borrow_mut().push(code.to_string());
        Ok(())
    }

    async fn run(&self, code: &str) -> Result<RunOutput<FakeResponse>, RuntimeError> {
        self.runs.borrow_mut().push(code.to_string());
        match self.scripts.get(code) {
            Some(outcome) => self.evaluate(outcome),
            None => Ok(RunOutput::Value(ExecValue::None)),
        }
    }

    async fn load_package(&self, name: &str) -> Result<(), RuntimeError> {
        if self.unavailable_packages.contains(name) {
            return Err(RuntimeError::Failed(format!(
                "ValueError: Can't find a pure Python 3 wheel for '{}'",
                name
            )));
        }
        self.loaded.borrow_mut().push(name.to_string());
        if !self.broken_packages.contains(name) {
            self.available.borrow_mut().insert(name.to_string());
        }
        Ok(())
    }

    async fn import_module(&self, name: &str) -> Result<(), RuntimeError> {
        if self.unimportable_modules.contains(name) {
            return Err(RuntimeError::Failed(format!(
                "ModuleNotFoundError: No module named '{}'",
                name
            )));
        }
        self.imported.borrow_mut().push(name.to_string());
        Ok(())
    }
}
