//! JavaScript object codec for the wire protocol
//!
//! Converts [`ExecuteRequest`] and [`WorkerReply`] to and from the plain
//! objects carried by `postMessage`. Context values cross as JSON unless
//! they are byte arrays; string and byte results are mapped to JS strings
//! and `Uint8Array`s.

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;

use js_sys::{ArrayBuffer, Object, Reflect, TypeError, Uint8Array, JSON};
use wasm_bindgen::{JsCast, JsValue};

use crate::{
    fields, Body, ContextValue, CorrelationId, ExecValue, ExecuteRequest, ExecutionContext,
    ResponseEnvelope, WorkerReply,
};

fn set(target: &Object, key: &str, value: &JsValue) -> Result<(), JsValue> {
    Reflect::set(target, &JsValue::from_str(key), value).map(|_| ())
}

fn get(source: &JsValue, key: &str) -> JsValue {
    Reflect::get(source, &JsValue::from_str(key)).unwrap_or(JsValue::UNDEFINED)
}

fn is_present(value: &JsValue) -> bool {
    !value.is_undefined() && !value.is_null()
}

/// Convert a JSON value to a JS value.
pub fn json_to_js(value: &serde_json::Value) -> Result<JsValue, JsValue> {
    let text = serde_json::to_string(value)
        .map_err(|e| JsValue::from_str(&format!("Failed to encode context value: {}", e)))?;
    JSON::parse(&text)
}

/// Convert a JS value to a JSON value.
///
/// Values `JSON.stringify` cannot represent (functions, `undefined`)
/// become `null`.
pub fn json_from_js(value: &JsValue) -> Result<serde_json::Value, JsValue> {
    let text = match JSON::stringify(value)?.as_string() {
        Some(text) => text,
        None => return Ok(serde_json::Value::Null),
    };
    serde_json::from_str(&text)
        .map_err(|e| JsValue::from_str(&format!("Failed to decode context value: {}", e)))
}

/// Convert a context variable to a JS value.
pub fn context_value_to_js(value: &ContextValue) -> Result<JsValue, JsValue> {
    match value {
        ContextValue::Json(json) => json_to_js(json),
        ContextValue::Binary(bytes) => Ok(Uint8Array::from(&bytes[..]).into()),
    }
}

/// Convert a JS value to a context variable.
///
/// `Uint8Array`s and `ArrayBuffer`s become bytes. Functions, symbols and
/// `BigInt`s cannot cross the channel and are rejected with a `TypeError`.
pub fn context_value_from_js(value: &JsValue) -> Result<ContextValue, JsValue> {
    if value.is_function() || value.is_symbol() || value.is_bigint() {
        return Err(TypeError::new("Context values must be JSON data or byte arrays").into());
    }
    if let Some(bytes) = value.dyn_ref::<Uint8Array>() {
        return Ok(ContextValue::Binary(bytes.to_vec()));
    }
    if let Some(buffer) = value.dyn_ref::<ArrayBuffer>() {
        return Ok(ContextValue::Binary(Uint8Array::new(buffer).to_vec()));
    }
    json_from_js(value).map(ContextValue::Json)
}

// =============================================================================
// Page → Worker
// =============================================================================

/// Encode a request as `{ ...context, uuid, python }`.
pub fn encode_request(request: &ExecuteRequest) -> Result<JsValue, JsValue> {
    let msg = Object::new();
    for (key, value) in &request.context {
        set(&msg, key, &context_value_to_js(value)?)?;
    }
    set(&msg, fields::UUID, &JsValue::from_str(request.uuid.as_str()))?;
    set(&msg, fields::PYTHON, &JsValue::from_str(&request.python))?;
    Ok(msg.into())
}

/// Correlation id of a request message, even one that fails to decode.
pub fn request_uuid(data: &JsValue) -> Option<CorrelationId> {
    get(data, fields::UUID).as_string().map(CorrelationId)
}

/// Decode a request posted by the page.
pub fn decode_request(data: &JsValue) -> Result<ExecuteRequest, JsValue> {
    let uuid = get(data, fields::UUID)
        .as_string()
        .ok_or_else(|| JsValue::from_str("Message is missing its uuid"))?;
    let python = get(data, fields::PYTHON)
        .as_string()
        .ok_or_else(|| JsValue::from_str("Message is missing its python code"))?;

    let mut context = ExecutionContext::new();
    let object: &Object = data
        .dyn_ref()
        .ok_or_else(|| JsValue::from_str("Message is not an object"))?;
    for key in Object::keys(object).iter() {
        let Some(key) = key.as_string() else { continue };
        if key == fields::UUID || key == fields::PYTHON {
            continue;
        }
        context.insert(key.clone(), context_value_from_js(&get(data, &key))?);
    }

    Ok(ExecuteRequest {
        uuid: CorrelationId(uuid),
        python,
        context,
    })
}

// =============================================================================
// Results
// =============================================================================

fn body_to_js(body: &Body) -> JsValue {
    match body {
        Body::Empty => JsValue::NULL,
        Body::Text(text) => JsValue::from_str(text),
        Body::Binary(bytes) => Uint8Array::from(&bytes[..]).into(),
    }
}

fn body_from_js(value: &JsValue) -> Body {
    if let Some(text) = value.as_string() {
        if text.is_empty() {
            return Body::Empty;
        }
        return Body::Text(text);
    }
    if let Some(bytes) = value.dyn_ref::<Uint8Array>() {
        return Body::from_bytes(bytes.to_vec());
    }
    Body::Empty
}

/// Encode a response envelope as `{ response, status, headers }`.
pub fn envelope_to_js(envelope: &ResponseEnvelope) -> Result<JsValue, JsValue> {
    let msg = Object::new();
    set(&msg, fields::RESPONSE, &body_to_js(&envelope.body))?;
    set(&msg, fields::STATUS, &JsValue::from(envelope.status))?;
    let headers = Object::new();
    for (key, value) in &envelope.headers {
        set(&headers, key, &JsValue::from_str(value))?;
    }
    set(&msg, fields::HEADERS, &headers)?;
    Ok(msg.into())
}

/// Decode a `{ response, status, headers }` object, if the value has that shape.
pub fn envelope_from_js(value: &JsValue) -> Option<ResponseEnvelope> {
    if !value.is_object() || value.is_instance_of::<Uint8Array>() {
        return None;
    }
    let status = get(value, fields::STATUS).as_f64()?;
    let headers_val = get(value, fields::HEADERS);
    let headers_obj: &Object = headers_val.dyn_ref()?;

    let mut headers = BTreeMap::new();
    for key in Object::keys(headers_obj).iter() {
        if let Some(key) = key.as_string() {
            let header = get(&headers_val, &key)
                .as_string()
                .unwrap_or_default();
            headers.insert(key, header);
        }
    }

    Some(ResponseEnvelope {
        body: body_from_js(&get(value, fields::RESPONSE)),
        status: status as u16,
        headers,
    })
}

/// Convert an execution result to a JS value.
pub fn exec_value_to_js(value: &ExecValue) -> Result<JsValue, JsValue> {
    match value {
        ExecValue::None => Ok(JsValue::NULL),
        ExecValue::Text(text) => Ok(JsValue::from_str(text)),
        ExecValue::Binary(bytes) => Ok(Uint8Array::from(&bytes[..]).into()),
        ExecValue::Response(envelope) => envelope_to_js(envelope),
        ExecValue::Json(json) => json_to_js(json),
    }
}

/// Convert a JS value to an execution result.
pub fn exec_value_from_js(value: &JsValue) -> Result<ExecValue, JsValue> {
    if !is_present(value) {
        return Ok(ExecValue::None);
    }
    if let Some(text) = value.as_string() {
        return Ok(ExecValue::Text(text));
    }
    if let Some(bytes) = value.dyn_ref::<Uint8Array>() {
        return Ok(ExecValue::Binary(bytes.to_vec()));
    }
    if let Some(envelope) = envelope_from_js(value) {
        return Ok(ExecValue::Response(envelope));
    }
    Ok(ExecValue::Json(json_from_js(value)?))
}

// =============================================================================
// Worker → Page
// =============================================================================

/// Encode a worker reply.
pub fn encode_reply(reply: &WorkerReply) -> Result<JsValue, JsValue> {
    let msg = Object::new();
    match reply {
        WorkerReply::Results { uuid, results } => {
            set(&msg, fields::UUID, &JsValue::from_str(uuid.as_str()))?;
            set(&msg, fields::RESULTS, &exec_value_to_js(results)?)?;
        }
        WorkerReply::Error { uuid, error } => {
            set(&msg, fields::UUID, &JsValue::from_str(uuid.as_str()))?;
            set(&msg, fields::ERROR, &JsValue::from_str(error))?;
        }
        WorkerReply::ConsoleMessage(text) => {
            set(&msg, fields::CONSOLE_MESSAGE, &JsValue::from_str(text))?;
        }
        WorkerReply::ConsoleError(text) => {
            set(&msg, fields::CONSOLE_ERROR, &JsValue::from_str(text))?;
        }
    }
    Ok(msg.into())
}

/// Decode a message posted by the worker.
///
/// Side-channel fields take precedence over correlation, so a console line
/// is never mistaken for a reply.
pub fn decode_reply(data: &JsValue) -> Result<WorkerReply, JsValue> {
    let console_message = get(data, fields::CONSOLE_MESSAGE);
    if let Some(text) = console_message.as_string() {
        return Ok(WorkerReply::ConsoleMessage(text));
    }
    let console_error = get(data, fields::CONSOLE_ERROR);
    if let Some(text) = console_error.as_string() {
        return Ok(WorkerReply::ConsoleError(text));
    }

    let uuid = get(data, fields::UUID)
        .as_string()
        .map(CorrelationId)
        .ok_or_else(|| JsValue::from_str("Worker message has no uuid"))?;

    let error = get(data, fields::ERROR);
    if is_present(&error) {
        let error = error
            .as_string()
            .unwrap_or_else(|| format!("{:?}", error));
        return Ok(WorkerReply::Error { uuid, error });
    }

    Ok(WorkerReply::Results {
        uuid,
        results: exec_value_from_js(&get(data, fields::RESULTS))?,
    })
}

/// Describe a thrown JS value for logs and error replies.
pub fn describe_error(value: &JsValue) -> String {
    if let Some(text) = value.as_string() {
        return text;
    }
    let message = get(value, "message");
    if let Some(text) = message.as_string() {
        return text;
    }
    format!("{:?}", value)
}
