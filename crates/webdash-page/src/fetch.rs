//! Global `fetch` override
//!
//! `window.fetch` is replaced once per page. The replacement hands local
//! requests to the [`FetchInterceptor`] and everything else to the captured
//! original, with the caller's arguments untouched.

use std::cell::Cell;

use js_sys::{Object, Promise, Reflect, Uint8Array};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::future_to_promise;
use web_sys::{Headers, Request, Response, ResponseInit, Window};
use webdash_core::{classify, BridgeError, FetchInterceptor, FetchRequest, Fetched};
use webdash_ipc::{Body, ResponseEnvelope};

use crate::channel::WebWorkerChannel;
use crate::console::WebConsole;
use crate::native::NativeFetch;
use crate::util::{log, to_js_error};

pub type PageInterceptor = FetchInterceptor<WebWorkerChannel, WebConsole>;

thread_local! {
    static INSTALLED: Cell<bool> = const { Cell::new(false) };
}

/// Replace `window.fetch`. Returns `false` if an override is already in place.
pub fn install(
    window: &Window,
    interceptor: PageInterceptor,
    native: NativeFetch,
) -> Result<bool, JsValue> {
    if INSTALLED.with(|installed| installed.replace(true)) {
        log("[fetch] Override already installed");
        return Ok(false);
    }

    let page = window.clone();
    let closure = Closure::wrap(Box::new(move |input: JsValue, init: JsValue| -> Promise {
        let interceptor = interceptor.clone();
        let native = native.clone();
        let page = page.clone();
        future_to_promise(async move { intercept(&interceptor, &native, &page, input, init).await })
    }) as Box<dyn FnMut(JsValue, JsValue) -> Promise>);

    Reflect::set(window, &"fetch".into(), closure.as_ref())?;
    // Lives as long as the page
    closure.forget();
    Ok(true)
}

async fn intercept(
    interceptor: &PageInterceptor,
    native: &NativeFetch,
    window: &Window,
    input: JsValue,
    init: JsValue,
) -> Result<JsValue, JsValue> {
    let location = window.location().href()?;
    let (request, text_body) = fetch_request(&input, &init)?;
    if !text_body && classify(&request.url, &location).is_local() {
        return Err(js_sys::TypeError::new("Only text request bodies can be served locally").into());
    }

    let fetched = interceptor
        .fetch(request, &location, || async {
            // Forwarded as-is, including rejections
            Ok::<_, BridgeError>(native.call(&input, &init).await)
        })
        .await
        .map_err(|e| to_js_error(&e))?;

    match fetched {
        Fetched::Local(envelope) => envelope_to_response(&envelope).map(JsValue::from),
        Fetched::Remote(result) => result,
    }
}

/// Read url, method and body from `fetch`'s arguments.
///
/// The flag is `false` when the body is present but not text.
fn fetch_request(input: &JsValue, init: &JsValue) -> Result<(FetchRequest, bool), JsValue> {
    let (url, mut method) = match input.dyn_ref::<Request>() {
        Some(request) => (request.url(), Some(request.method())),
        None => match input.as_string() {
            Some(url) => (url, None),
            // URL objects and anything else stringifiable
            None => (String::from(input.unchecked_ref::<Object>().to_string()), None),
        },
    };

    let mut body = None;
    let mut text_body = true;
    if init.is_object() {
        if let Some(m) = Reflect::get(init, &"method".into())?.as_string() {
            method = Some(m);
        }
        let init_body = Reflect::get(init, &"body".into())?;
        if !init_body.is_undefined() && !init_body.is_null() {
            body = init_body.as_string();
            text_body = body.is_some();
        }
    }

    Ok((FetchRequest { url, method, body }, text_body))
}

/// Build a standard `Response` from an envelope.
pub fn envelope_to_response(envelope: &ResponseEnvelope) -> Result<Response, JsValue> {
    let headers = Headers::new()?;
    for (key, value) in &envelope.headers {
        headers.set(key, value)?;
    }
    let init = ResponseInit::new();
    init.set_status(envelope.status);
    init.set_headers(&headers);

    match &envelope.body {
        Body::Empty => Response::new_with_opt_str_and_init(None, &init),
        Body::Text(text) => Response::new_with_opt_str_and_init(Some(text.as_str()), &init),
        Body::Binary(bytes) => {
            let array: Object = Uint8Array::from(&bytes[..]).into();
            Response::new_with_opt_buffer_source_and_init(Some(&array), &init)
        }
    }
}
