//! Runtime configuration
//!
//! Both entry points accept an optional JSON document. Every field has a
//! default, so `{}` (or no document at all) yields a working setup for a
//! Dash app served next to `worker.js` and `bootstrap.py`.

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Interpreter expressions evaluated by each bootstrap stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppCalls {
    pub meta_html: String,
    pub title: String,
    pub favicon_url: String,
    pub css_html: String,
    pub entry_point: String,
    pub config_html: String,
    pub scripts_html: String,
    pub renderer: String,
}

impl Default for AppCalls {
    fn default() -> Self {
        Self {
            meta_html: "app._generate_meta_html()".to_string(),
            title: "app.title".to_string(),
            favicon_url: "app.get_asset_url(app._favicon)".to_string(),
            css_html: "app._generate_css_dist_html()".to_string(),
            entry_point: "dash.dash._app_entry".to_string(),
            config_html: "app._generate_config_html()".to_string(),
            scripts_html: "app._generate_scripts_html()".to_string(),
            renderer: "app.renderer".to_string(),
        }
    }
}

/// Page-side configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Script URL the worker is spawned from
    pub worker_url: String,
    /// Selector of the optional status display element
    pub status_selector: String,
    /// URL of the bootstrap program, loaded without going through the bridge
    pub bootstrap_url: String,
    /// Global name the constructed application instance is bound to
    pub app_variable: String,
    /// Function defined by the bootstrap program that builds the app
    pub app_constructor: String,
    /// Tag of the container that holds config and scripts
    pub container_tag: String,
    /// Element id of the renderer script
    pub renderer_id: String,
    /// Emit request trace lines
    pub verbose: bool,
    pub calls: AppCalls,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            worker_url: "./worker.js".to_string(),
            status_selector: ".status".to_string(),
            bootstrap_url: "bootstrap.py".to_string(),
            app_variable: "app".to_string(),
            app_constructor: "bootstrap_dash_app".to_string(),
            container_tag: "footer".to_string(),
            renderer_id: "_dash-renderer".to_string(),
            verbose: false,
            calls: AppCalls::default(),
        }
    }
}

impl BridgeConfig {
    /// Parse a configuration document. Missing or blank input gives defaults.
    pub fn from_json(text: Option<&str>) -> Result<Self, BridgeError> {
        parse_or_default(text)
    }
}

/// Worker-side configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Where the interpreter distribution is served from; `None` uses the
    /// loader's built-in location
    pub index_url: Option<String>,
    /// Load the complete standard library up front
    pub full_stdlib: bool,
    /// Log every handled message
    pub verbose: bool,
}

impl WorkerConfig {
    /// Parse a configuration document. Missing or blank input gives defaults.
    pub fn from_json(text: Option<&str>) -> Result<Self, BridgeError> {
        parse_or_default(text)
    }
}

fn parse_or_default<T>(text: Option<&str>) -> Result<T, BridgeError>
where
    T: Default + for<'de> Deserialize<'de>,
{
    match text.map(str::trim) {
        None | Some("") => Ok(T::default()),
        Some(text) => serde_json::from_str(text).map_err(|e| BridgeError::Config(e.to_string())),
    }
}
