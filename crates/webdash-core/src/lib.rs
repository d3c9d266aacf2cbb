//! WebDash bridge core
//!
//! Runs a Dash (Flask) application inside an interpreter worker and serves
//! the page's `fetch` traffic from it. This crate holds every decision the
//! bridge makes; the browser crates only supply the HAL implementations.
//!
//! # Architecture
//!
//! ```text
//!  page                                              worker
//! ┌──────────────────────────────────────────┐      ┌─────────────────────┐
//! │ fetch() ──► FetchInterceptor             │      │                     │
//! │               │ route::classify          │      │  Executor           │
//! │               │ codegen::generate        │      │   ├─ Environment    │
//! │               ▼                          │      │   ├─ dependency     │
//! │ BootOrchestrator ──► WorkerManager ──────┼─────►│   │  retry loop     │
//! │                        ▲  pending calls  │      │   └─ HandleGuard    │
//! │                        └─────────────────┼◄─────┤                     │
//! └──────────────────────────────────────────┘      └─────────────────────┘
//! ```

pub mod bootstrap;
pub mod codegen;
pub mod config;
pub mod error;
pub mod executor;
pub mod interceptor;
pub mod manager;
pub mod manifest;
pub mod route;
pub mod testing;

pub use bootstrap::{BootOrchestrator, BootStage};
pub use codegen::{FetchRequest, GeneratedRequest, RequestCodeGenerator, REQUEST_BODY_VAR};
pub use config::{AppCalls, BridgeConfig, WorkerConfig};
pub use error::BridgeError;
pub use executor::{Environment, Executor, HandleGuard};
pub use interceptor::{FetchInterceptor, Fetched};
pub use manager::WorkerManager;
pub use manifest::{
    parse_script_manifest, strip_cache_buster, strip_href_cache_busters, ScriptDescriptor,
};
pub use route::{base_route, base_url, classify, RouteClassification};
