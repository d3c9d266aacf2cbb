//! Development Server for WebDash
//!
//! Serves a built WebDash page: the page and worker glue, their wasm
//! binaries, the bootstrap program and any Python wheels.
//!
//! - `PORT` - listen port (default 8080)
//! - `WEBDASH_ROOT` - directory to serve (default `dist`)

use axum::{
    body::Body,
    http::{header, HeaderValue, Request, StatusCode},
    response::Response,
    routing::get_service,
    Router,
};
use std::net::SocketAddr;
use tower_http::services::ServeDir;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let root = std::env::var("WEBDASH_ROOT").unwrap_or_else(|_| "dist".to_string());

    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let app = app(&root);

    println!("╔═══════════════════════════════════════════════════╗");
    println!("║             WebDash Development Server            ║");
    println!("╠═══════════════════════════════════════════════════╣");
    println!("║  URL: http://localhost:{}                       ║", port);
    println!("║  Root: {:<43}║", root);
    println!("║  Press Ctrl+C to stop                             ║");
    println!("╚═══════════════════════════════════════════════════╝");
    println!();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

/// Static files under `root` with corrected content types.
fn app(root: &str) -> Router {
    let serve_dir = ServeDir::new(root).precompressed_gzip().precompressed_br();

    Router::new()
        .fallback_service(get_service(serve_dir).handle_error(|_| async {
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }))
        .layer(axum::middleware::from_fn(set_content_type))
}

/// Content type for a request path, by extension.
fn content_type(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext)?;
    let mime = match ext {
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "wasm" => "application/wasm",
        "css" => "text/css; charset=utf-8",
        "html" => "text/html; charset=utf-8",
        "json" => "application/json; charset=utf-8",
        // Fetched as text by the bootstrap sequence
        "py" => "text/x-python; charset=utf-8",
        // Wheels are zip archives
        "whl" => "application/zip",
        _ => return None,
    };
    Some(mime)
}

/// Fix MIME types for module scripts, wasm and Python sources
async fn set_content_type(request: Request<Body>, next: axum::middleware::Next) -> Response<Body> {
    let path = request.uri().path().to_string();

    let mut response = next.run(request).await;
    if let Some(mime) = content_type(&path) {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(mime));
    }

    response
}
