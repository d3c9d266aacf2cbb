//! Wire protocol for WebDash
//!
//! This crate defines the messages exchanged between the page (main thread)
//! and the interpreter worker. It is the single source of truth for field
//! names, so the page bindings and the worker bindings cannot drift apart.
//!
//! # Message Flow
//!
//! ```text
//! Page (WorkerManager)
//!        │
//!        │ { uuid, python, ...context }
//!        ▼
//! ┌─────────────────┐
//! │     Worker      │  ◄── merges context, runs python
//! │   (Executor)    │
//! └────────┬────────┘
//!          │
//!          │ { uuid, results }  or  { uuid, error }
//!          │ { consoleMessage } or  { consoleError }   (uncorrelated)
//!          ▼
//! ┌─────────────────┐
//! │ WorkerManager   │  ◄── correlates by uuid
//! └─────────────────┘
//! ```
//!
//! With the `js` feature enabled, [`js`] converts these types to and from
//! the plain JavaScript objects that travel over `postMessage`.

#![no_std]

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use serde::{Deserialize, Serialize};

#[cfg(feature = "js")]
pub mod js;

// =============================================================================
// Wire Constants
// =============================================================================

/// Field names used on the wire.
pub mod fields {
    /// Correlation identifier (page → worker, worker → page)
    pub const UUID: &str = "uuid";
    /// Code to execute (page → worker)
    pub const PYTHON: &str = "python";
    /// Successful result (worker → page)
    pub const RESULTS: &str = "results";
    /// Failure description (worker → page)
    pub const ERROR: &str = "error";
    /// Uncorrelated interpreter stdout line (worker → page)
    pub const CONSOLE_MESSAGE: &str = "consoleMessage";
    /// Uncorrelated interpreter stderr line (worker → page)
    pub const CONSOLE_ERROR: &str = "consoleError";
    /// Body of a converted response object
    pub const RESPONSE: &str = "response";
    /// Status code of a converted response object
    pub const STATUS: &str = "status";
    /// Headers of a converted response object
    pub const HEADERS: &str = "headers";
}

/// Status code reserved as the "import this module" directive.
///
/// A local response with this status carries the module name as its text
/// body. The worker imports the module before replying.
pub const STATUS_IMPORT_DIRECTIVE: u16 = 424;

/// Prefix of a `consoleMessage` that must be evaluated as page script
/// instead of being displayed.
pub const EVAL_PREFIX: &str = "pyodide-eval:";

// =============================================================================
// Correlation
// =============================================================================

/// Opaque token pairing a dispatched call with its reply.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Borrow the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        CorrelationId(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        CorrelationId(String::from(s))
    }
}

/// Extra variables merged into the worker's global environment.
pub type ExecutionContext = BTreeMap<String, ContextValue>;

/// A context variable.
///
/// Byte arrays are kept apart from structured data so they reach the
/// worker as a `Uint8Array` rather than as a JSON object. The serde view
/// writes bytes as a number array and always reads back [`ContextValue::Json`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    /// Structured data
    Json(serde_json::Value),
    /// Byte array
    Binary(Vec<u8>),
}

impl ContextValue {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ContextValue::Json(value) => Some(value),
            ContextValue::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ContextValue::Binary(bytes) => Some(bytes),
            ContextValue::Json(_) => None,
        }
    }
}

impl From<serde_json::Value> for ContextValue {
    fn from(value: serde_json::Value) -> Self {
        ContextValue::Json(value)
    }
}

impl From<String> for ContextValue {
    fn from(text: String) -> Self {
        ContextValue::Json(serde_json::Value::String(text))
    }
}

impl From<Vec<u8>> for ContextValue {
    fn from(bytes: Vec<u8>) -> Self {
        ContextValue::Binary(bytes)
    }
}

// =============================================================================
// Page → Worker
// =============================================================================

/// A request to execute code in the worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Correlation identifier echoed back in the reply
    pub uuid: CorrelationId,
    /// Code to run in the interpreter
    pub python: String,
    /// Remaining fields, merged into the worker environment
    #[serde(flatten)]
    pub context: ExecutionContext,
}

impl ExecuteRequest {
    /// Create a request without extra context.
    pub fn new(uuid: CorrelationId, python: impl Into<String>) -> Self {
        Self {
            uuid,
            python: python.into(),
            context: ExecutionContext::new(),
        }
    }

    /// Attach context variables.
    ///
    /// `uuid` and `python` are reserved by the protocol and are dropped here
    /// so the flattened wire object stays unambiguous.
    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context
            .into_iter()
            .filter(|(key, _)| key != fields::UUID && key != fields::PYTHON)
            .collect();
        self
    }
}

// =============================================================================
// Response Envelope
// =============================================================================

/// Body of a converted response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Body {
    /// Empty body (e.g. 204). Encoded as `null`.
    Empty,
    /// Body that decoded as UTF-8
    Text(String),
    /// Body that is not legal UTF-8
    Binary(Vec<u8>),
}

impl Body {
    /// Classify raw response bytes.
    ///
    /// Empty input becomes [`Body::Empty`], legal UTF-8 becomes
    /// [`Body::Text`], anything else is kept as [`Body::Binary`].
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            return Body::Empty;
        }
        match String::from_utf8(bytes) {
            Ok(text) => Body::Text(text),
            Err(e) => Body::Binary(e.into_bytes()),
        }
    }

    /// Text content, if the body is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Body::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Check whether the body is empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

/// Normalized `{ body, status, headers }` produced from a runtime response
/// handle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Response body (`response` on the wire)
    #[serde(rename = "response")]
    pub body: Body,
    /// HTTP status code
    pub status: u16,
    /// Response headers, order-insensitive
    pub headers: BTreeMap<String, String>,
}

impl ResponseEnvelope {
    /// Create an envelope with no headers.
    pub fn new(status: u16, body: Body) -> Self {
        Self {
            body,
            status,
            headers: BTreeMap::new(),
        }
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Check if this envelope is the dynamic-import directive.
    ///
    /// Returns the module name carried in the body.
    pub fn import_directive(&self) -> Option<&str> {
        if self.status != STATUS_IMPORT_DIRECTIVE {
            return None;
        }
        self.body
            .as_text()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

// =============================================================================
// Execution Results
// =============================================================================

/// Shape of a value returned by the interpreter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    /// `None` / `null` / `undefined`
    None,
    /// A string
    String,
    /// A byte array
    Binary,
    /// A converted response object
    Response,
    /// Any other structured value
    Json,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::None => "none",
            ValueKind::String => "string",
            ValueKind::Binary => "binary",
            ValueKind::Response => "response",
            ValueKind::Json => "json",
        };
        f.write_str(name)
    }
}

/// A value produced by running code in the worker.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecValue {
    /// No value
    None,
    /// String result
    Text(String),
    /// Binary result
    Binary(Vec<u8>),
    /// Response handle converted to plain data
    Response(ResponseEnvelope),
    /// Any other value
    Json(serde_json::Value),
}

impl ExecValue {
    /// Shape of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            ExecValue::None => ValueKind::None,
            ExecValue::Text(_) => ValueKind::String,
            ExecValue::Binary(_) => ValueKind::Binary,
            ExecValue::Response(_) => ValueKind::Response,
            ExecValue::Json(_) => ValueKind::Json,
        }
    }
}

// =============================================================================
// Worker → Page
// =============================================================================

/// A message posted by the worker.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkerReply {
    /// Successful execution of a correlated request
    Results {
        /// Correlation identifier of the request
        uuid: CorrelationId,
        /// Value of the snippet's trailing expression
        results: ExecValue,
    },
    /// Failed execution of a correlated request
    Error {
        /// Correlation identifier of the request
        uuid: CorrelationId,
        /// Textual description of the failure
        error: String,
    },
    /// Interpreter stdout line (uncorrelated)
    ConsoleMessage(String),
    /// Interpreter stderr line (uncorrelated)
    ConsoleError(String),
}

impl WorkerReply {
    /// Correlation identifier, if this reply is correlated.
    pub fn uuid(&self) -> Option<&CorrelationId> {
        match self {
            WorkerReply::Results { uuid, .. } | WorkerReply::Error { uuid, .. } => Some(uuid),
            WorkerReply::ConsoleMessage(_) | WorkerReply::ConsoleError(_) => None,
        }
    }
}
