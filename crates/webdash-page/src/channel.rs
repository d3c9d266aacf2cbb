//! Web Worker message channel
//!
//! Spawns the interpreter worker and connects its `onmessage` / `onerror`
//! events to a [`WorkerManager`].

use std::cell::RefCell;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{MessageEvent, Worker};
use webdash_core::WorkerManager;
use webdash_hal::{Console, HalError, MessageChannel};
use webdash_ipc::js::{decode_reply, describe_error, encode_request};
use webdash_ipc::ExecuteRequest;

use crate::console::WebConsole;
use crate::util::log;

/// Worker manager wired to the browser.
pub type PageManager = WorkerManager<WebWorkerChannel, WebConsole>;

/// `postMessage` channel to a dedicated worker.
pub struct WebWorkerChannel {
    worker: Worker,
    /// Event closures must outlive the worker's handlers
    _onmessage_closure: RefCell<Option<Closure<dyn FnMut(MessageEvent)>>>,
    _onerror_closure: RefCell<Option<Closure<dyn FnMut(JsValue)>>>,
}

impl WebWorkerChannel {
    /// Start the worker script at `url`.
    pub fn spawn(url: &str) -> Result<Self, HalError> {
        let worker = Worker::new(url).map_err(|e| {
            log(&format!("[worker-manager] Failed to create Worker: {}", describe_error(&e)));
            HalError::DomError(describe_error(&e))
        })?;
        Ok(Self {
            worker,
            _onmessage_closure: RefCell::new(None),
            _onerror_closure: RefCell::new(None),
        })
    }

    /// Stop the worker immediately.
    pub fn terminate(&self) {
        self.worker.terminate();
    }
}

impl MessageChannel for WebWorkerChannel {
    fn post(&self, request: &ExecuteRequest) -> Result<(), HalError> {
        let msg = encode_request(request).map_err(|e| HalError::PostFailed(describe_error(&e)))?;
        self.worker
            .post_message(&msg)
            .map_err(|e| HalError::PostFailed(describe_error(&e)))
    }
}

/// Route the worker's events into `manager`.
pub fn connect(manager: &PageManager) {
    let channel = manager.channel();

    let on_message = manager.clone();
    let onmessage_closure = Closure::wrap(Box::new(move |event: MessageEvent| {
        match decode_reply(&event.data()) {
            Ok(reply) => on_message.process_message(reply),
            Err(e) => on_message.console().error_write(&format!(
                "[worker-manager] Malformed worker message: {}",
                describe_error(&e)
            )),
        }
    }) as Box<dyn FnMut(MessageEvent)>);
    channel
        .worker
        .set_onmessage(Some(onmessage_closure.as_ref().unchecked_ref()));

    // JsValue rather than ErrorEvent: script load failures fire a plain Event
    let on_error = manager.clone();
    let onerror_closure = Closure::wrap(Box::new(move |event: JsValue| {
        let msg = js_sys::Reflect::get(&event, &"message".into())
            .ok()
            .and_then(|v| v.as_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        on_error.process_worker_error(&msg);
    }) as Box<dyn FnMut(JsValue)>);
    channel
        .worker
        .set_onerror(Some(onerror_closure.as_ref().unchecked_ref()));

    *channel._onmessage_closure.borrow_mut() = Some(onmessage_closure);
    *channel._onerror_closure.borrow_mut() = Some(onerror_closure);
}
