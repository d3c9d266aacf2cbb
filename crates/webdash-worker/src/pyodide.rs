//! Pyodide interpreter bindings
//!
//! ```text
//!   Executor ──run(code)──► PyodideInterpreter ──runPython──► Pyodide
//!                                  │                             │
//!                                  │◄──── PyProxy (Response) ────┘
//!                                  ▼
//!                           PyProxyResponse ──release()──► proxy.destroy()
//! ```
//!
//! The interpreter starts once. Every trait method waits on the shared
//! start-up future, so requests posted early queue behind it and a failed
//! start-up fails every request with the same error.

use futures::future::{FutureExt, LocalBoxFuture, Shared};
use js_sys::{Array, Function, Object, Promise, Reflect, Uint8Array};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use webdash_core::WorkerConfig;
use webdash_hal::{Interpreter, ResponseHandle, RunOutput, RuntimeError, WorkerPort};
use webdash_ipc::js::{context_value_to_js, describe_error, exec_value_from_js};
use webdash_ipc::{ContextValue, WorkerReply};

use crate::util::log;

/// Distribution used when the configuration names none.
pub const DEFAULT_INDEX_URL: &str = "https://cdn.jsdelivr.net/pyodide/v0.24.0/full/";

/// Evaluates to the missing module's name if the last uncaught exception
/// was an `ImportError`, else `None`.
const MISSING_DEPENDENCY_QUERY: &str =
    "import sys; None if not isinstance(sys.last_value, ImportError) else sys.last_value.name";

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_name = loadPyodide, catch)]
    fn load_pyodide(options: &Object) -> Result<Promise, JsValue>;

    /// The `PyodideInterface` returned by `loadPyodide`.
    #[derive(Clone, Debug)]
    pub type Pyodide;

    #[wasm_bindgen(method, catch, js_name = runPython)]
    fn run_python(this: &Pyodide, code: &str) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(method, catch, js_name = loadPackagesFromImports)]
    fn load_packages_from_imports(
        this: &Pyodide,
        code: &str,
        options: &Object,
    ) -> Result<Promise, JsValue>;

    #[wasm_bindgen(method, catch, js_name = loadPackage)]
    fn load_package(this: &Pyodide, name: &str, options: &Object) -> Result<Promise, JsValue>;

    #[wasm_bindgen(method, getter)]
    fn ffi(this: &Pyodide) -> JsValue;
}

fn js_failure(e: JsValue) -> RuntimeError {
    RuntimeError::Failed(describe_error(&e))
}

/// Call `target[name](...args)`.
fn call_method(target: &JsValue, name: &str, args: &Array) -> Result<JsValue, JsValue> {
    let method: Function = Reflect::get(target, &JsValue::from_str(name))?
        .dyn_into()
        .map_err(|_| JsValue::from_str(&format!("{} is not callable", name)))?;
    method.apply(target, args)
}

/// Destroy a proxy; plain values are left alone.
fn destroy(value: &JsValue) {
    if !value.is_object() && !value.is_function() {
        return;
    }
    if let Err(e) = call_method(value, "destroy", &Array::new()) {
        log(&format!("[worker] Failed to destroy proxy: {}", describe_error(&e)));
    }
}

/// `import` only accepts dotted identifiers.
fn is_module_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c == '_' || c.is_alphabetic())
                && chars.all(|c| c == '_' || c.is_alphanumeric())
        })
}

/// Run `code`, classifying a raised `ImportError` as a missing dependency.
fn run_checked(pyodide: &Pyodide, code: &str) -> Result<JsValue, RuntimeError> {
    pyodide.run_python(code).map_err(|error| {
        let missing = pyodide
            .run_python(MISSING_DEPENDENCY_QUERY)
            .ok()
            .and_then(|name| name.as_string());
        match missing {
            Some(name) => RuntimeError::MissingDependency {
                name,
                message: describe_error(&error),
            },
            None => js_failure(error),
        }
    })
}

// =============================================================================
// Interpreter
// =============================================================================

type Startup = Shared<LocalBoxFuture<'static, Result<Pyodide, RuntimeError>>>;

/// Pyodide running in this worker.
pub struct PyodideInterpreter {
    startup: Startup,
    /// `messageCallback` / `errorCallback` options for package loading
    callbacks: Object,
    /// `(value, type) => value instanceof type`
    instance_of: Function,
    /// `toJs` options producing plain objects for dicts
    to_js_options: Object,
    _stdout_closure: Closure<dyn FnMut(String)>,
    _stderr_closure: Closure<dyn FnMut(String)>,
}

impl PyodideInterpreter {
    /// Begin loading the interpreter. `loadPyodide` must already be defined.
    ///
    /// Interpreter output and package-loading progress are forwarded
    /// through `port` as side-channel lines.
    pub fn start<P>(config: &WorkerConfig, port: P) -> Result<Self, JsValue>
    where
        P: WorkerPort + Clone + 'static,
    {
        let stdout_port = port.clone();
        let stdout_closure = Closure::wrap(Box::new(move |line: String| {
            let _ = stdout_port.post(&WorkerReply::ConsoleMessage(line));
        }) as Box<dyn FnMut(String)>);
        let stderr_closure = Closure::wrap(Box::new(move |line: String| {
            let _ = port.post(&WorkerReply::ConsoleError(line));
        }) as Box<dyn FnMut(String)>);

        let options = Object::new();
        if let Some(index_url) = &config.index_url {
            Reflect::set(&options, &"indexURL".into(), &JsValue::from_str(index_url))?;
        }
        Reflect::set(&options, &"fullStdLib".into(), &JsValue::from_bool(config.full_stdlib))?;
        Reflect::set(&options, &"stdout".into(), stdout_closure.as_ref())?;
        Reflect::set(&options, &"stderr".into(), stderr_closure.as_ref())?;

        let callbacks = Object::new();
        Reflect::set(&callbacks, &"messageCallback".into(), stdout_closure.as_ref())?;
        Reflect::set(&callbacks, &"errorCallback".into(), stderr_closure.as_ref())?;

        let from_entries = Reflect::get(&Object::new().constructor(), &"fromEntries".into())?;
        let to_js_options = Object::new();
        Reflect::set(&to_js_options, &"dict_converter".into(), &from_entries)?;

        let loading = JsFuture::from(load_pyodide(&options)?);
        let startup = async move {
            match loading.await {
                Ok(pyodide) => {
                    log("[worker] Interpreter started");
                    Ok(pyodide.unchecked_into::<Pyodide>())
                }
                Err(e) => {
                    let msg = format!("Interpreter failed to start: {}", describe_error(&e));
                    log(&format!("[worker] {}", msg));
                    Err(RuntimeError::Failed(msg))
                }
            }
        }
        .boxed_local()
        .shared();

        Ok(Self {
            startup,
            callbacks,
            instance_of: Function::new_with_args("value, type", "return value instanceof type"),
            to_js_options,
            _stdout_closure: stdout_closure,
            _stderr_closure: stderr_closure,
        })
    }

    async fn pyodide(&self) -> Result<Pyodide, RuntimeError> {
        self.startup.clone().await
    }

    fn is_proxy(&self, pyodide: &Pyodide, value: &JsValue) -> bool {
        let Ok(proxy_type) = Reflect::get(&pyodide.ffi(), &"PyProxy".into()) else {
            return false;
        };
        self.instance_of
            .call2(&JsValue::UNDEFINED, value, &proxy_type)
            .map(|is| is.is_truthy())
            .unwrap_or(false)
    }

    /// Convert a non-response proxy into a plain value and destroy it.
    fn convert_proxy(&self, proxy: &JsValue) -> Result<JsValue, RuntimeError> {
        let converted = call_method(proxy, "toJs", &Array::of1(&self.to_js_options));
        destroy(proxy);
        converted.map_err(js_failure)
    }
}

impl Interpreter for PyodideInterpreter {
    type Handle = PyProxyResponse;

    async fn ready(&self) -> Result<(), RuntimeError> {
        self.pyodide().await.map(|_| ())
    }

    /// Context values become properties of the worker's global object,
    /// reachable from Python through the `js` module.
    fn set_global(&self, name: &str, value: &ContextValue) -> Result<(), RuntimeError> {
        let value = context_value_to_js(value).map_err(js_failure)?;
        Reflect::set(&js_sys::global(), &JsValue::from_str(name), &value)
            .map(|_| ())
            .map_err(js_failure)
    }

    async fn load_packages_from_imports(&self, code: &str) -> Result<(), RuntimeError> {
        let pyodide = self.pyodide().await?;
        let loading = pyodide
            .load_packages_from_imports(code, &self.callbacks)
            .map_err(js_failure)?;
        JsFuture::from(loading).await.map(|_| ()).map_err(js_failure)
    }

    async fn run(&self, code: &str) -> Result<RunOutput<PyProxyResponse>, RuntimeError> {
        let pyodide = self.pyodide().await?;
        let result = run_checked(&pyodide, code)?;

        let value = if !self.is_proxy(&pyodide, &result) {
            result
        } else if Reflect::has(&result, &"get_data".into()).unwrap_or(false) {
            return Ok(RunOutput::Handle(PyProxyResponse::from_proxy(result)));
        } else {
            self.convert_proxy(&result)?
        };
        exec_value_from_js(&value)
            .map(RunOutput::Value)
            .map_err(js_failure)
    }

    async fn load_package(&self, name: &str) -> Result<(), RuntimeError> {
        let pyodide = self.pyodide().await?;
        log(&format!("[worker] Loading package {}", name));
        let loading = pyodide.load_package(name, &self.callbacks).map_err(js_failure)?;
        JsFuture::from(loading).await.map(|_| ()).map_err(js_failure)
    }

    async fn import_module(&self, name: &str) -> Result<(), RuntimeError> {
        if !is_module_name(name) {
            return Err(RuntimeError::Failed(format!("Invalid module name: {:?}", name)));
        }
        let pyodide = self.pyodide().await?;
        let result = run_checked(&pyodide, &format!("import {}", name))?;
        destroy(&result);
        Ok(())
    }
}

// =============================================================================
// Response Handle
// =============================================================================

/// A Flask response object held as a `PyProxy`.
pub struct PyProxyResponse {
    proxy: Option<JsValue>,
}

impl PyProxyResponse {
    pub fn from_proxy(proxy: JsValue) -> Self {
        Self { proxy: Some(proxy) }
    }

    fn live(&self) -> Result<&JsValue, RuntimeError> {
        self.proxy
            .as_ref()
            .ok_or_else(|| RuntimeError::Failed("Response proxy already destroyed".to_string()))
    }
}

fn collect_headers(headers: &JsValue, keys: &JsValue) -> Result<Vec<(String, String)>, JsValue> {
    let iter = js_sys::try_iter(keys)?
        .ok_or_else(|| JsValue::from_str("Response header keys are not iterable"))?;
    let mut pairs = Vec::new();
    for key in iter {
        let key = key?;
        let value = call_method(headers, "get", &Array::of1(&key))?;
        if let (Some(key), Some(value)) = (key.as_string(), value.as_string()) {
            pairs.push((key, value));
        }
    }
    Ok(pairs)
}

impl ResponseHandle for PyProxyResponse {
    fn body_bytes(&self) -> Result<Vec<u8>, RuntimeError> {
        let data = call_method(self.live()?, "get_data", &Array::of1(&JsValue::FALSE))
            .map_err(js_failure)?;
        if let Some(bytes) = data.dyn_ref::<Uint8Array>() {
            return Ok(bytes.to_vec());
        }

        // `bytes` comes back as a proxy of its own
        let converted = call_method(&data, "toJs", &Array::new());
        destroy(&data);
        converted
            .map_err(js_failure)?
            .dyn_into::<Uint8Array>()
            .map(|bytes| bytes.to_vec())
            .map_err(|_| RuntimeError::Failed("Response body is not bytes".to_string()))
    }

    fn status(&self) -> Result<u16, RuntimeError> {
        Reflect::get(self.live()?, &"status_code".into())
            .map_err(js_failure)?
            .as_f64()
            .map(|status| status as u16)
            .ok_or_else(|| RuntimeError::Failed("Response has no numeric status_code".to_string()))
    }

    fn headers(&self) -> Result<Vec<(String, String)>, RuntimeError> {
        let headers = Reflect::get(self.live()?, &"headers".into()).map_err(js_failure)?;
        let pairs = call_method(&headers, "keys", &Array::new()).and_then(|keys| {
            let pairs = collect_headers(&headers, &keys);
            destroy(&keys);
            pairs
        });
        destroy(&headers);
        pairs.map_err(js_failure)
    }

    fn release(&mut self) {
        if let Some(proxy) = self.proxy.take() {
            destroy(&proxy);
        }
    }
}
