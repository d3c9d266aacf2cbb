#![cfg(target_arch = "wasm32")]

use js_sys::Function;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_test::*;
use webdash_hal::ResponseHandle;
use webdash_ipc::js::{context_value_from_js, decode_request, request_uuid};
use webdash_ipc::{ContextValue, CorrelationId};
use webdash_worker::pyodide::PyProxyResponse;

wasm_bindgen_test_configure!(run_in_browser);

/// A stand-in for a Flask response proxy that counts `destroy` calls.
fn fake_response(body: &str) -> JsValue {
    let make = Function::new_with_args(
        "body",
        r#"
        const destroyed = { count: 0 };
        const proxy = (extra) => Object.assign({ destroy() { destroyed.count += 1; } }, extra);
        const headers = { "Content-Type": "text/plain", "X-Trace": "abc" };
        return proxy({
            destroyed,
            status_code: 201,
            get_data(as_text) { return proxy({ toJs() { return new TextEncoder().encode(body); } }); },
            headers: proxy({
                keys() { return proxy({ [Symbol.iterator]() { return Object.keys(headers)[Symbol.iterator](); } }); },
                get(key) { return headers[key]; },
            }),
        });
        "#,
    );
    make.call1(&JsValue::UNDEFINED, &JsValue::from_str(body))
        .expect("fake response")
}

fn destroy_count(proxy: &JsValue) -> f64 {
    let destroyed = js_sys::Reflect::get(proxy, &"destroyed".into()).unwrap();
    js_sys::Reflect::get(&destroyed, &"count".into())
        .unwrap()
        .as_f64()
        .unwrap()
}

#[wasm_bindgen_test]
fn test_proxy_response_fields() {
    let proxy = fake_response("hello");
    let response = PyProxyResponse::from_proxy(proxy);

    assert_eq!(response.body_bytes().unwrap(), b"hello".to_vec());
    assert_eq!(response.status().unwrap(), 201);
    assert_eq!(
        response.headers().unwrap(),
        vec![
            ("Content-Type".to_string(), "text/plain".to_string()),
            ("X-Trace".to_string(), "abc".to_string()),
        ]
    );
}

#[wasm_bindgen_test]
fn test_release_destroys_once() {
    let proxy = fake_response("");
    let mut response = PyProxyResponse::from_proxy(proxy.clone());

    response.release();
    response.release();
    assert_eq!(destroy_count(&proxy), 1.0);
    assert!(response.status().is_err());
}

#[wasm_bindgen_test]
fn test_malformed_request_keeps_its_uuid() {
    let data = js_sys::JSON::parse(r#"{"uuid":"abc","dataset":"a.csv"}"#).unwrap();

    assert!(decode_request(&data).is_err());
    assert_eq!(request_uuid(&data), Some(CorrelationId::from("abc")));
    assert_eq!(request_uuid(&js_sys::Object::new().into()), None);
}

#[wasm_bindgen_test]
fn test_byte_arrays_cross_as_binary_context() {
    let bytes = js_sys::Uint8Array::from(&[1u8, 2, 255][..]);

    assert_eq!(
        context_value_from_js(&bytes.into()).unwrap(),
        ContextValue::Binary(vec![1, 2, 255])
    );
    assert_eq!(
        context_value_from_js(&js_sys::ArrayBuffer::new(2).into()).unwrap(),
        ContextValue::Binary(vec![0, 0])
    );
}

#[wasm_bindgen_test]
fn test_unsendable_context_values_are_rejected() {
    let function: JsValue = Function::new_no_args("return 1").into();
    let bigint: JsValue = js_sys::BigInt::from(7u64).into();
    let symbol: JsValue = js_sys::Symbol::for_("webdash").into();

    for value in [function, bigint, symbol] {
        let error = context_value_from_js(&value).unwrap_err();
        assert!(error.is_instance_of::<js_sys::TypeError>());
    }
}
