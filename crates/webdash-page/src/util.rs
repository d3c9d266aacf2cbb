//! Logging and error conversion helpers

use wasm_bindgen::prelude::*;
use webdash_core::BridgeError;
use webdash_hal::HalError;
use webdash_ipc::js::describe_error;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    pub fn log(s: &str);

    #[wasm_bindgen(js_namespace = console, js_name = error)]
    pub fn error(s: &str);
}

/// Convert a bridge error into a thrown JS value.
///
/// Result-shape mismatches become `TypeError`s, everything else `Error`.
pub fn to_js_error(e: &BridgeError) -> JsValue {
    match e {
        BridgeError::TypeMismatch { .. } => js_sys::TypeError::new(&e.to_string()).into(),
        _ => js_sys::Error::new(&e.to_string()).into(),
    }
}

/// Wrap a thrown DOM exception.
pub fn dom_error(e: JsValue) -> HalError {
    HalError::DomError(describe_error(&e))
}
