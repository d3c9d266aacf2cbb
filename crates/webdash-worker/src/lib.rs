//! Worker-side bindings for WebDash
//!
//! Runs inside the dedicated worker spawned by the page. Incoming
//! `postMessage` requests are queued and executed one at a time against a
//! single Pyodide instance; replies and interpreter output go back through
//! the worker's global scope.
//!
//! ```text
//!   onmessage ──decode──► mpsc queue ──► Executor::serve ──► WorkerScopePort
//!                                              │
//!                                              ▼
//!                                     PyodideInterpreter
//! ```
//!
//! ## Usage
//!
//! The worker script loads the generated glue and calls the entry point:
//!
//! ```text
//! importScripts("./webdash_worker.js");
//! wasm_bindgen("./webdash_worker_bg.wasm").then(() => wasm_bindgen.start_worker());
//! ```

pub mod port;
pub mod pyodide;
pub(crate) mod util;

use futures::channel::mpsc;
use futures::StreamExt;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::spawn_local;
use web_sys::{DedicatedWorkerGlobalScope, MessageEvent};
use webdash_core::{Executor, WorkerConfig};
use webdash_hal::WorkerPort;
use webdash_ipc::js::{decode_request, describe_error, request_uuid};
use webdash_ipc::{CorrelationId, WorkerReply};

use crate::port::WorkerScopePort;
use crate::pyodide::{PyodideInterpreter, DEFAULT_INDEX_URL};
use crate::util::log;

/// Start the interpreter and begin serving requests.
///
/// `config_json` is an optional JSON [`WorkerConfig`].
#[wasm_bindgen]
pub fn start_worker(config_json: Option<String>) -> Result<(), JsValue> {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    let config = WorkerConfig::from_json(config_json.as_deref())
        .map_err(|e| js_sys::Error::new(&e.to_string()))?;
    let scope: DedicatedWorkerGlobalScope = js_sys::global()
        .dyn_into()
        .map_err(|_| JsValue::from_str("start_worker must run in a dedicated worker"))?;

    ensure_loader(&scope, &config)?;

    let port = WorkerScopePort::new(scope.clone());
    let interpreter = PyodideInterpreter::start(&config, port.clone())?;

    let (sender, requests) = mpsc::unbounded();
    let reject_port = port.clone();
    let onmessage_closure = Closure::wrap(Box::new(move |event: MessageEvent| {
        let data = event.data();
        match decode_request(&data) {
            Ok(request) => {
                if sender.unbounded_send(request).is_err() {
                    log("[worker] Request queue closed, dropping message");
                }
            }
            Err(e) => {
                let reply = malformed_request_reply(request_uuid(&data), &describe_error(&e));
                let _ = reject_port.post(&reply);
            }
        }
    }) as Box<dyn FnMut(MessageEvent)>);
    scope.set_onmessage(Some(onmessage_closure.as_ref().unchecked_ref()));
    // The handler lives as long as the worker
    onmessage_closure.forget();

    let verbose = config.verbose;
    spawn_local(async move {
        let mut executor = Executor::new(interpreter, port);
        let requests = requests.inspect(move |request| {
            if verbose {
                log(&format!("[worker] Executing request {}", request.uuid.as_str()));
            }
        });
        executor.serve(requests).await;
        log("[worker] Request queue closed");
    });

    log("[worker] Waiting for requests");
    Ok(())
}

/// Answer a request that could not be decoded.
///
/// A readable uuid gets a correlated error so the waiting call settles.
/// Without one there is no call to answer, so the problem goes to the page
/// console.
fn malformed_request_reply(uuid: Option<CorrelationId>, reason: &str) -> WorkerReply {
    match uuid {
        Some(uuid) => WorkerReply::Error {
            uuid,
            error: format!("Malformed request: {}", reason),
        },
        None => WorkerReply::ConsoleError(format!("[worker] Malformed request: {}", reason)),
    }
}

/// Import the Pyodide loader script unless the worker already did.
fn ensure_loader(scope: &DedicatedWorkerGlobalScope, config: &WorkerConfig) -> Result<(), JsValue> {
    if js_sys::Reflect::has(scope, &"loadPyodide".into())? {
        return Ok(());
    }
    let url = loader_url(config.index_url.as_deref().unwrap_or(DEFAULT_INDEX_URL));
    log(&format!("[worker] Loading interpreter from {}", url));
    scope.import_scripts_1(&url)
}

fn loader_url(index_url: &str) -> String {
    if index_url.ends_with('/') {
        format!("{}pyodide.js", index_url)
    } else {
        format!("{}/pyodide.js", index_url)
    }
}
