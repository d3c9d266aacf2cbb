//! Request code generation
//!
//! Turns an intercepted HTTP request into a snippet that replays it against
//! the embedded Flask server through its test client and leaves the
//! response object as the trailing expression:
//!
//! ```text
//! with app.server.app_context():
//!     with app.server.test_client() as client:
//!         response = client.open(
//!             "http://localhost/app/_dash-layout",
//!             data=None,
//!             content_type=None,
//!             method="GET",
//!         )
//! response
//! ```
//!
//! URL and method are emitted as escaped string literals. The body is
//! embedded as a raw triple-quoted literal when that cannot terminate early;
//! otherwise it travels through the execution context and the snippet reads
//! it back from there.

use webdash_ipc::{ContextValue, ExecutionContext};

/// Context variable that carries a body unsafe to embed as a literal.
pub const REQUEST_BODY_VAR: &str = "__webdash_request_body";

/// Content type attached to every request with a body.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// An intercepted fetch call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    /// `None` means GET
    pub method: Option<String>,
    /// Text payload; binary bodies are not supported
    pub body: Option<String>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: None,
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Some("POST".to_string()),
            body: Some(body.into()),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Upper-cased method, defaulting to GET.
    pub fn method(&self) -> String {
        self.method
            .as_deref()
            .map(str::to_ascii_uppercase)
            .unwrap_or_else(|| "GET".to_string())
    }
}

/// Code to run plus the context it needs.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedRequest {
    pub code: String,
    pub context: ExecutionContext,
}

/// Builds test-client snippets for a given application variable.
#[derive(Clone, Debug)]
pub struct RequestCodeGenerator {
    app_variable: String,
}

impl RequestCodeGenerator {
    pub fn new(app_variable: impl Into<String>) -> Self {
        Self {
            app_variable: app_variable.into(),
        }
    }

    /// Generate the snippet for `request`.
    pub fn generate(&self, request: &FetchRequest) -> GeneratedRequest {
        let mut context = ExecutionContext::new();

        let (data, content_type) = match &request.body {
            None => ("None".to_string(), "None".to_string()),
            Some(body) => {
                let data = match raw_literal(body) {
                    Some(literal) => literal,
                    None => {
                        context.insert(REQUEST_BODY_VAR.to_string(), ContextValue::from(body.clone()));
                        format!("__import__(\"js\").{}", REQUEST_BODY_VAR)
                    }
                };
                (data, py_str(JSON_CONTENT_TYPE))
            }
        };

        let app = &self.app_variable;
        let code = format!(
            "with {app}.server.app_context():\n\
             \x20   with {app}.server.test_client() as client:\n\
             \x20       response = client.open(\n\
             \x20           {url},\n\
             \x20           data={data},\n\
             \x20           content_type={content_type},\n\
             \x20           method={method},\n\
             \x20       )\n\
             response\n",
            app = app,
            url = py_str(&request.url),
            data = data,
            content_type = content_type,
            method = py_str(&request.method()),
        );

        GeneratedRequest { code, context }
    }
}

/// Double-quoted string literal. JSON escapes are valid Python escapes.
fn py_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Raw triple-quoted literal for `body`, if one exists that cannot end early.
fn raw_literal(body: &str) -> Option<String> {
    // Source text cannot hold NUL and its newlines are normalised to `\n`.
    // A trailing backslash escapes the closing delimiter even in a raw literal.
    if body.contains('\0') || body.contains('\r') || body.ends_with('\\') {
        return None;
    }
    for quote in ['"', '\''] {
        let delimiter: String = std::iter::repeat(quote).take(3).collect();
        if body.contains(&delimiter) || body.ends_with(quote) {
            continue;
        }
        return Some(format!("r{0}{1}{0}", delimiter, body));
    }
    None
}
