//! The page's original `fetch`
//!
//! Captured before the override is installed and shared by every component
//! that must reach the network directly.

use std::cell::RefCell;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Response, Window};
use webdash_hal::{HalError, SourceLoader};
use webdash_ipc::js::describe_error;

thread_local! {
    static ORIGINAL_FETCH: RefCell<Option<js_sys::Function>> = const { RefCell::new(None) };
}

/// Handle to the pre-override `fetch`.
#[derive(Clone)]
pub struct NativeFetch {
    window: Window,
    fetch: js_sys::Function,
}

impl NativeFetch {
    /// Capture `window.fetch` the first time this is called; later calls
    /// return the same function even after the override is installed.
    pub fn capture(window: &Window) -> Result<Self, JsValue> {
        let fetch = ORIGINAL_FETCH.with(|cell| -> Result<js_sys::Function, JsValue> {
            if let Some(fetch) = cell.borrow().as_ref() {
                return Ok(fetch.clone());
            }
            let fetch: js_sys::Function = js_sys::Reflect::get(window, &"fetch".into())?
                .dyn_into()
                .map_err(|_| JsValue::from_str("window.fetch is not a function"))?;
            *cell.borrow_mut() = Some(fetch.clone());
            Ok(fetch)
        })?;
        Ok(Self {
            window: window.clone(),
            fetch,
        })
    }

    /// Call the original `fetch(input, init)`.
    pub async fn call(&self, input: &JsValue, init: &JsValue) -> Result<JsValue, JsValue> {
        let promise: js_sys::Promise = self.fetch.call2(&self.window, input, init)?.dyn_into()?;
        JsFuture::from(promise).await
    }
}

impl SourceLoader for NativeFetch {
    async fn load_text(&self, url: &str) -> Result<String, HalError> {
        let fetch_failed = |e: JsValue| HalError::FetchFailed(format!("{}: {}", url, describe_error(&e)));

        let response: Response = self
            .call(&JsValue::from_str(url), &JsValue::UNDEFINED)
            .await
            .map_err(fetch_failed)?
            .dyn_into()
            .map_err(fetch_failed)?;
        if !response.ok() {
            return Err(HalError::FetchFailed(format!("{}: HTTP {}", url, response.status())));
        }

        let text = JsFuture::from(response.text().map_err(fetch_failed)?)
            .await
            .map_err(fetch_failed)?;
        text.as_string()
            .ok_or_else(|| HalError::FetchFailed(format!("{}: body is not text", url)))
    }
}
