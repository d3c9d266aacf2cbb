//! Fetch interception
//!
//! Decides, per request, whether the embedded application or the network
//! answers it. Local requests are rendered to code, executed through the
//! [`WorkerManager`], and come back as a [`ResponseEnvelope`]; remote
//! requests are handed to the caller-supplied pass-through untouched.

use std::future::Future;

use webdash_hal::{Console, MessageChannel};
use webdash_ipc::{Body, ExecValue, ResponseEnvelope};

use crate::codegen::{FetchRequest, RequestCodeGenerator};
use crate::error::BridgeError;
use crate::manager::WorkerManager;
use crate::route::{classify, RouteClassification};

/// Result of an intercepted fetch.
#[derive(Debug)]
pub enum Fetched<R> {
    /// Answered by the embedded application
    Local(ResponseEnvelope),
    /// Answered by the network
    Remote(R),
}

pub struct FetchInterceptor<C, K> {
    manager: WorkerManager<C, K>,
    codegen: RequestCodeGenerator,
}

impl<C, K> Clone for FetchInterceptor<C, K> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            codegen: self.codegen.clone(),
        }
    }
}

impl<C: MessageChannel, K: Console> FetchInterceptor<C, K> {
    pub fn new(manager: WorkerManager<C, K>, codegen: RequestCodeGenerator) -> Self {
        Self { manager, codegen }
    }

    pub fn manager(&self) -> &WorkerManager<C, K> {
        &self.manager
    }

    /// Route `request` relative to the page at `location_href`.
    ///
    /// `passthrough` is only invoked for remote requests.
    pub async fn fetch<R, F, Fut>(
        &self,
        request: FetchRequest,
        location_href: &str,
        passthrough: F,
    ) -> Result<Fetched<R>, BridgeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, BridgeError>>,
    {
        let url = request.url.clone();
        self.manager
            .trace(&format!("[1. Request {} intercepted]", url));

        match classify(&request.url, location_href) {
            RouteClassification::Local(resolved) => {
                let envelope = self
                    .fetch_local(&request.with_url(resolved.as_str()))
                    .await?;
                self.manager.trace(&format!("[5. Request {} done]", url));
                Ok(Fetched::Local(envelope))
            }
            RouteClassification::Remote => {
                self.manager
                    .trace(&format!("[2. Request {} passthrough]", url));
                passthrough().await.map(Fetched::Remote)
            }
        }
    }

    /// Execute an already-resolved local request.
    pub async fn fetch_local(&self, request: &FetchRequest) -> Result<ResponseEnvelope, BridgeError> {
        let generated = self.codegen.generate(request);
        self.manager
            .trace(&format!("[2. Request {} generated]", request.url));

        let value = self
            .manager
            .execute_with_any_response(&generated.code, generated.context)
            .await?;
        self.manager
            .trace(&format!("[4. Response for {} received]", request.url));

        Ok(into_envelope(value))
    }
}

/// Wrap a non-response result so callers always get status, headers and body.
fn into_envelope(value: ExecValue) -> ResponseEnvelope {
    match value {
        ExecValue::Response(envelope) => envelope,
        ExecValue::None => ResponseEnvelope::new(204, Body::Empty),
        ExecValue::Text(text) => ResponseEnvelope::new(200, Body::from_bytes(text.into_bytes())),
        ExecValue::Binary(bytes) => ResponseEnvelope::new(200, Body::from_bytes(bytes)),
        ExecValue::Json(json) => {
            ResponseEnvelope::new(200, Body::Text(json.to_string()))
                .with_header("Content-Type", "application/json")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{run_bridged, CapturingConsole, RecordingChannel};
    use std::cell::Cell;
    use webdash_ipc::WorkerReply;

    const PAGE: &str = "http://localhost:8080/app/index.html";

    fn interceptor() -> FetchInterceptor<RecordingChannel, CapturingConsole> {
        let manager = WorkerManager::new(RecordingChannel::new(), CapturingConsole::new());
        FetchInterceptor::new(manager, RequestCodeGenerator::new("app"))
    }

    #[test]
    fn test_local_request_never_hits_network() {
        let interceptor = interceptor();
        let network_calls = Cell::new(0);

        let result = run_bridged(
            interceptor.manager(),
            |req| WorkerReply::Results {
                uuid: req.uuid.clone(),
                results: ExecValue::Response(
                    ResponseEnvelope::new(200, Body::Text("{}".to_string()))
                        .with_header("Content-Type", "application/json"),
                ),
            },
            interceptor.fetch(FetchRequest::get("api/data"), PAGE, || {
                network_calls.set(network_calls.get() + 1);
                async { Ok::<_, BridgeError>(()) }
            }),
        );

        match result.unwrap() {
            Fetched::Local(envelope) => {
                assert_eq!(envelope.status, 200);
                assert_eq!(envelope.headers["Content-Type"], "application/json");
            }
            Fetched::Remote(()) => panic!("local request went to the network"),
        }
        assert_eq!(network_calls.get(), 0);

        let sent = interceptor.manager().channel().sent();
        assert!(sent[0].python.contains("\"http://localhost:8080/app/api/data\""));
        assert!(sent[0].python.contains("method=\"GET\""));
    }

    #[test]
    fn test_remote_request_passes_through() {
        let interceptor = interceptor();

        let result = futures::executor::block_on(interceptor.fetch(
            FetchRequest::get("https://cdn.example.com/plotly.js"),
            PAGE,
            || async { Ok::<_, BridgeError>("network") },
        ));

        assert!(matches!(result, Ok(Fetched::Remote("network"))));
        assert!(interceptor.manager().channel().sent().is_empty());
    }

    #[test]
    fn test_runtime_failure_rejects_fetch() {
        let interceptor = interceptor();

        let result = run_bridged(
            interceptor.manager(),
            |req| WorkerReply::Error {
                uuid: req.uuid.clone(),
                error: "KeyError: 'x'".to_string(),
            },
            interceptor.fetch(FetchRequest::get("/app/_dash-layout"), PAGE, || async {
                Ok::<_, BridgeError>(())
            }),
        );

        assert!(matches!(result, Err(BridgeError::Runtime(msg)) if msg == "KeyError: 'x'"));
    }

    #[test]
    fn test_plain_results_become_envelopes() {
        assert_eq!(into_envelope(ExecValue::None).status, 204);
        assert_eq!(
            into_envelope(ExecValue::Text("hi".to_string())).body,
            Body::Text("hi".to_string())
        );
        let json = into_envelope(ExecValue::Json(serde_json::json!({"a": 1})));
        assert_eq!(json.body, Body::Text("{\"a\":1}".to_string()));
        assert_eq!(json.headers["Content-Type"], "application/json");
    }

    #[test]
    fn test_verbose_trace() {
        let manager = WorkerManager::new(RecordingChannel::new(), CapturingConsole::new())
            .with_verbose(true);
        let interceptor = FetchInterceptor::new(manager, RequestCodeGenerator::new("app"));

        let _ = futures::executor::block_on(interceptor.fetch(
            FetchRequest::get("/elsewhere"),
            PAGE,
            || async { Ok::<_, BridgeError>(()) },
        ));

        assert_eq!(
            interceptor.manager().console().debug(),
            vec![
                "[1. Request /elsewhere intercepted]".to_string(),
                "[2. Request /elsewhere passthrough]".to_string(),
            ]
        );
    }
}
