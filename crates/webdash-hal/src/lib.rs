//! Platform Abstraction Layer for WebDash
//!
//! This crate defines the traits that let the bridge logic in `webdash-core`
//! run against a real browser (Web Workers, DOM, Pyodide) or against test
//! doubles on the host.
//!
//! # Seams
//!
//! - **Page side**: [`MessageChannel`] (post to the worker), [`Console`]
//!   (status bar and diagnostics), [`Document`] (DOM injection),
//!   [`SourceLoader`] (network reads that bypass the bridge)
//! - **Worker side**: [`WorkerPort`] (post to the page), [`Interpreter`]
//!   (the embedded runtime), [`ResponseHandle`] (an opaque runtime proxy
//!   that must be released)

#![no_std]
#![allow(async_fn_in_trait)]

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use webdash_ipc::{ContextValue, ExecValue, ExecuteRequest, WorkerReply};

// =============================================================================
// Errors
// =============================================================================

/// Platform errors
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HalError {
    /// The other side of the message channel is gone
    ChannelClosed,
    /// `postMessage` rejected the payload
    PostFailed(String),
    /// A required DOM element does not exist
    ElementNotFound(String),
    /// A DOM operation threw
    DomError(String),
    /// A script element fired its error event
    ScriptLoadFailed(String),
    /// A pass-through network read failed
    FetchFailed(String),
    /// Operation not supported on this platform
    NotSupported,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HalError::ChannelClosed => write!(f, "Message channel closed"),
            HalError::PostFailed(msg) => write!(f, "Failed to post message: {}", msg),
            HalError::ElementNotFound(what) => write!(f, "Element not found: {}", what),
            HalError::DomError(msg) => write!(f, "DOM error: {}", msg),
            HalError::ScriptLoadFailed(src) => write!(f, "Failed to load script: {}", src),
            HalError::FetchFailed(msg) => write!(f, "Fetch failed: {}", msg),
            HalError::NotSupported => write!(f, "Operation not supported"),
        }
    }
}

/// Errors raised by the embedded interpreter
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuntimeError {
    /// Code raised an import error for a dependency that can be loaded.
    /// `message` is the interpreter's own error text.
    MissingDependency { name: String, message: String },
    /// Any other failure, carrying its textual description
    Failed(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::MissingDependency { message, .. } => f.write_str(message),
            RuntimeError::Failed(msg) => f.write_str(msg),
        }
    }
}

// =============================================================================
// Page Side
// =============================================================================

/// Outgoing half of the page → worker channel.
pub trait MessageChannel {
    /// Post a request to the worker.
    fn post(&self, request: &ExecuteRequest) -> Result<(), HalError>;
}

/// Which interpreter stream a side-channel line came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputStream {
    /// `consoleMessage`
    Stdout,
    /// `consoleError`
    Stderr,
}

impl OutputStream {
    /// CSS class used for status-bar lines of this stream.
    pub fn class_name(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Diagnostics sink and status display.
pub trait Console {
    /// Append a line to the status display.
    ///
    /// Returns `false` when there is no status display, in which case the
    /// caller falls back to the diagnostic log.
    fn show_status(&self, stream: OutputStream, text: &str) -> bool;

    /// Write a diagnostic line.
    fn debug_write(&self, msg: &str);

    /// Write an error-level diagnostic line.
    fn error_write(&self, msg: &str);

    /// Evaluate a snippet of page script.
    fn eval_script(&self, code: &str) -> Result<(), HalError>;
}

/// Attributes of an inline script element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InlineScript<'a> {
    /// Script text
    pub code: &'a str,
    /// Element id, if any
    pub id: Option<&'a str>,
    /// `type` attribute
    pub script_type: &'a str,
}

/// The page document.
pub trait Document {
    /// Handle to an element created by [`Document::append_container`].
    type Element;

    /// Path component of the page's current location.
    fn location_pathname(&self) -> String;

    /// Replace the contents of `<head>`.
    fn set_head_html(&self, html: &str) -> Result<(), HalError>;

    /// Replace the contents of `<body>`.
    fn set_body_html(&self, html: &str) -> Result<(), HalError>;

    /// Create a `<tag>` element holding `html` and append it to `<body>`.
    fn append_container(&self, tag: &str, html: &str) -> Result<Self::Element, HalError>;

    /// Append a script with an external source to `parent`.
    ///
    /// Resolves once the element fires `load`; fails on `error`.
    async fn append_external_script(&self, parent: &Self::Element, src: &str)
        -> Result<(), HalError>;

    /// Append an inline script to `parent`. Runs synchronously on insertion.
    fn append_inline_script(
        &self,
        parent: &Self::Element,
        script: InlineScript<'_>,
    ) -> Result<(), HalError>;
}

/// Reads resources straight from the network, bypassing the bridge.
pub trait SourceLoader {
    /// Fetch `url` and return its body as text.
    async fn load_text(&self, url: &str) -> Result<String, HalError>;
}

// =============================================================================
// Worker Side
// =============================================================================

/// Outgoing half of the worker → page channel.
pub trait WorkerPort {
    /// Post a reply or side-channel line to the page.
    fn post(&self, reply: &WorkerReply) -> Result<(), HalError>;
}

/// An opaque response object owned by the interpreter.
///
/// Handles hold cross-runtime references; [`ResponseHandle::release`] must
/// be called exactly when the handle is no longer needed and must tolerate
/// being called more than once.
pub trait ResponseHandle {
    /// Raw body bytes.
    fn body_bytes(&self) -> Result<Vec<u8>, RuntimeError>;

    /// HTTP status code.
    fn status(&self) -> Result<u16, RuntimeError>;

    /// Header pairs.
    fn headers(&self) -> Result<Vec<(String, String)>, RuntimeError>;

    /// Destroy the handle and any proxies it owns.
    fn release(&mut self);
}

/// Result of running a snippet.
#[derive(Debug)]
pub enum RunOutput<H> {
    /// A plain value
    Value(ExecValue),
    /// An opaque response handle to be converted
    Handle(H),
}

/// The embedded interpreter running inside the worker.
pub trait Interpreter {
    /// Response proxy type produced by this interpreter.
    type Handle: ResponseHandle;

    /// Wait until the interpreter has started.
    async fn ready(&self) -> Result<(), RuntimeError>;

    /// Bind a value in the interpreter's global environment.
    fn set_global(&self, name: &str, value: &ContextValue) -> Result<(), RuntimeError>;

    /// Preload packages referenced by `code`'s import statements.
    async fn load_packages_from_imports(&self, code: &str) -> Result<(), RuntimeError>;

    /// Run `code` and return its trailing expression.
    async fn run(&self, code: &str) -> Result<RunOutput<Self::Handle>, RuntimeError>;

    /// Load a package by name.
    async fn load_package(&self, name: &str) -> Result<(), RuntimeError>;

    /// Import a module by name for its side effects.
    async fn import_module(&self, name: &str) -> Result<(), RuntimeError>;
}
