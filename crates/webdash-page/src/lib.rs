//! Browser main-thread bindings for WebDash
//!
//! This crate runs on the page. It spawns the interpreter worker, replaces
//! `window.fetch` so the Dash frontend talks to the in-worker Flask server,
//! and bootstraps the Dash page.
//!
//! ## Module Structure
//!
//! - `channel` - `postMessage` channel to the worker and its event wiring
//! - `console` - status bar and `console.*` output
//! - `document` - DOM injection for the bootstrap sequence
//! - `native` - the page's original `fetch`
//! - `fetch` - the `window.fetch` override
//!
//! ## Usage
//!
//! ```text
//! import init, { WebDash } from "./webdash_page.js";
//! await init();
//! window.web_dash = new WebDash(JSON.stringify({ verbose: true }));
//! ```

// =============================================================================
// Module declarations
// =============================================================================

pub mod channel;
pub mod console;
pub mod document;
pub mod fetch;
pub mod native;
pub(crate) mod util;

use js_sys::{Object, Promise, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{future_to_promise, spawn_local};
use webdash_core::{BootOrchestrator, BridgeConfig, FetchInterceptor, RequestCodeGenerator, WorkerManager};
use webdash_ipc::js::{context_value_from_js, exec_value_to_js};
use webdash_ipc::ExecutionContext;

use crate::channel::{PageManager, WebWorkerChannel};
use crate::console::WebConsole;
use crate::document::WebDocument;
use crate::native::NativeFetch;
use crate::util::{error, log, to_js_error};

pub use crate::fetch::envelope_to_response;

/// The WebDash page runtime.
///
/// Constructing it starts the worker, installs the fetch override and
/// kicks off the bootstrap sequence in the background.
#[wasm_bindgen]
pub struct WebDash {
    manager: PageManager,
    native: NativeFetch,
}

#[wasm_bindgen]
impl WebDash {
    /// Create the runtime from an optional JSON configuration.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<WebDash, JsValue> {
        #[cfg(feature = "console_error_panic_hook")]
        console_error_panic_hook::set_once();

        let config = BridgeConfig::from_json(config_json.as_deref()).map_err(|e| to_js_error(&e))?;
        let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
        let document = window
            .document()
            .ok_or_else(|| JsValue::from_str("no document"))?;

        // Must run before the override is installed
        let native = NativeFetch::capture(&window)?;

        let channel = WebWorkerChannel::spawn(&config.worker_url)
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        let console = WebConsole::new(document.clone(), config.status_selector.clone());
        let manager = WorkerManager::new(channel, console).with_verbose(config.verbose);
        crate::channel::connect(&manager);
        log(&format!("[webdash] Worker started from {}", config.worker_url));

        let interceptor = FetchInterceptor::new(
            manager.clone(),
            RequestCodeGenerator::new(config.app_variable.clone()),
        );
        fetch::install(&window, interceptor, native.clone())?;

        let mut boot = BootOrchestrator::new(
            manager.clone(),
            WebDocument::new(window, document),
            native.clone(),
            config,
        );
        spawn_local(async move {
            match boot.run().await {
                Ok(()) => log("[boot] Dash app bootstrapped"),
                Err(e) => error(&format!(
                    "[boot] Bootstrap aborted during {} stage: {}",
                    boot.stage(),
                    e
                )),
            }
        });

        Ok(WebDash { manager, native })
    }

    /// Run code in the worker; resolves with whatever it returns.
    #[wasm_bindgen(js_name = executeWithAnyResponse)]
    pub fn execute_with_any_response(&self, code: String, context: JsValue) -> Promise {
        let manager = self.manager.clone();
        future_to_promise(async move {
            let context = context_from_js(&context)?;
            let value = manager
                .execute_with_any_response(&code, context)
                .await
                .map_err(|e| to_js_error(&e))?;
            exec_value_to_js(&value)
        })
    }

    /// Run code in the worker; rejects with a `TypeError` unless it returns a string.
    #[wasm_bindgen(js_name = executeWithStringResponse)]
    pub fn execute_with_string_response(&self, code: String, context: JsValue) -> Promise {
        let manager = self.manager.clone();
        future_to_promise(async move {
            let context = context_from_js(&context)?;
            manager
                .execute_with_string_response(&code, context)
                .await
                .map(|text| JsValue::from_str(&text))
                .map_err(|e| to_js_error(&e))
        })
    }

    /// Run code in the worker; rejects with a `TypeError` unless it returns bytes.
    #[wasm_bindgen(js_name = executeWithBinaryResponse)]
    pub fn execute_with_binary_response(&self, code: String, context: JsValue) -> Promise {
        let manager = self.manager.clone();
        future_to_promise(async move {
            let context = context_from_js(&context)?;
            manager
                .execute_with_binary_response(&code, context)
                .await
                .map(|bytes| js_sys::Uint8Array::from(&bytes[..]).into())
                .map_err(|e| to_js_error(&e))
        })
    }

    /// `fetch` as it was before the override.
    #[wasm_bindgen(js_name = nativeFetch)]
    pub fn native_fetch(&self, input: JsValue, init: JsValue) -> Promise {
        let native = self.native.clone();
        future_to_promise(async move { native.call(&input, &init).await })
    }

    /// Stop the worker. Calls still waiting on it reject.
    pub fn terminate(&self) {
        self.manager.channel().terminate();
        self.manager.disconnect();
        log("[webdash] Worker terminated");
    }

    /// Number of calls waiting for the worker.
    #[wasm_bindgen(getter, js_name = pendingCalls)]
    pub fn pending_calls(&self) -> usize {
        self.manager.pending_count()
    }
}

/// Read a plain object into an execution context. `undefined`/`null` give
/// an empty context.
fn context_from_js(value: &JsValue) -> Result<ExecutionContext, JsValue> {
    let mut context = ExecutionContext::new();
    if value.is_undefined() || value.is_null() {
        return Ok(context);
    }
    let object: &Object = value
        .dyn_ref()
        .ok_or_else(|| js_sys::TypeError::new("context must be an object"))?;
    for key in Object::keys(object).iter() {
        if let Some(name) = key.as_string() {
            let entry = Reflect::get(value, &key)?;
            context.insert(name, context_value_from_js(&entry)?);
        }
    }
    Ok(context)
}
