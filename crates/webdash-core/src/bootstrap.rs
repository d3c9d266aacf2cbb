//! Page bootstrap
//!
//! Drives the page from an empty shell to a running Dash app. Every stage
//! awaits the previous one; there is at most one bridge call in flight.
//!
//! ```text
//! Init ──► Head ──► Body ──► Config ──► Scripts ──► Renderer ──► Done
//!  │        │        │         │           │            │
//!  │        │        │         │           │            └─ <script id="_dash-renderer">
//!  │        │        │         │           └─ external: append + await load
//!  │        │        │         │              inline:   append, no await
//!  │        │        │         └─ <footer> with config markup (kept for later stages)
//!  │        │        └─ entry markup → <body>
//!  │        └─ meta + <title> + favicon + css → <head>
//!  └─ bootstrap.py + `app = bootstrap_dash_app("<base route>")`
//! ```
//!
//! A failing stage aborts the sequence and leaves the DOM as it was.

use std::fmt;

use webdash_hal::{Console, Document, InlineScript, MessageChannel, SourceLoader};
use webdash_ipc::ExecutionContext;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::manager::WorkerManager;
use crate::manifest::{
    parse_script_manifest, strip_cache_buster, strip_href_cache_busters, ScriptDescriptor,
};
use crate::route::base_route;

/// Bootstrap progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootStage {
    Init,
    Head,
    Body,
    Config,
    Scripts,
    Renderer,
    Done,
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootStage::Init => "init",
            BootStage::Head => "head",
            BootStage::Body => "body",
            BootStage::Config => "config",
            BootStage::Scripts => "scripts",
            BootStage::Renderer => "renderer",
            BootStage::Done => "done",
        };
        f.write_str(name)
    }
}

pub struct BootOrchestrator<C, K, D, L> {
    manager: WorkerManager<C, K>,
    document: D,
    loader: L,
    config: BridgeConfig,
    stage: BootStage,
}

impl<C, K, D, L> BootOrchestrator<C, K, D, L>
where
    C: MessageChannel,
    K: Console,
    D: Document,
    L: SourceLoader,
{
    pub fn new(manager: WorkerManager<C, K>, document: D, loader: L, config: BridgeConfig) -> Self {
        Self {
            manager,
            document,
            loader,
            config,
            stage: BootStage::Init,
        }
    }

    /// Stage currently running, or the one that failed.
    pub fn stage(&self) -> BootStage {
        self.stage
    }

    pub fn document(&self) -> &D {
        &self.document
    }

    /// Run every stage in order.
    pub async fn run(&mut self) -> Result<(), BridgeError> {
        self.enter(BootStage::Init);
        self.initialise_app().await?;

        self.enter(BootStage::Head);
        self.inject_head().await?;

        self.enter(BootStage::Body);
        self.inject_entry_point().await?;

        self.enter(BootStage::Config);
        let container = self.inject_config().await?;

        self.enter(BootStage::Scripts);
        self.inject_scripts(&container).await?;

        self.enter(BootStage::Renderer);
        self.inject_renderer(&container).await?;

        self.enter(BootStage::Done);
        Ok(())
    }

    fn enter(&mut self, stage: BootStage) {
        self.stage = stage;
        self.manager.trace(&format!("[boot] Stage: {}", stage));
    }

    async fn call(&self, code: &str) -> Result<String, BridgeError> {
        self.manager
            .execute_with_string_response(code, ExecutionContext::new())
            .await
    }

    async fn initialise_app(&self) -> Result<(), BridgeError> {
        self.manager
            .console()
            .debug_write("[boot] Initialising and bootstrapping the dash app");

        let source = self.loader.load_text(&self.config.bootstrap_url).await?;
        let base = base_route(&self.document.location_pathname());
        let base_literal =
            serde_json::to_string(&base).map_err(|e| BridgeError::Config(e.to_string()))?;

        let code = format!(
            "{}\n\n# Initialise and bootstrap the dash app\n{} = {}({})\n",
            source, self.config.app_variable, self.config.app_constructor, base_literal
        );
        self.manager
            .execute_with_any_response(&code, ExecutionContext::new())
            .await?;
        Ok(())
    }

    async fn inject_head(&self) -> Result<(), BridgeError> {
        let calls = &self.config.calls;
        let meta = self.call(&calls.meta_html).await?;
        let title = self.call(&calls.title).await?;
        let favicon = self.call(&calls.favicon_url).await?;
        let css = self.call(&calls.css_html).await?;

        let head = format!(
            "{}\n<title>{}</title>\n<link rel=\"icon\" type=\"image/x-icon\" href=\"{}\">\n{}",
            meta,
            html_escape::encode_text(&title),
            html_escape::encode_double_quoted_attribute(strip_cache_buster(&favicon)),
            strip_href_cache_busters(&css),
        );
        self.document.set_head_html(&head)?;
        Ok(())
    }

    async fn inject_entry_point(&self) -> Result<(), BridgeError> {
        let entry = self.call(&self.config.calls.entry_point).await?;
        self.document.set_body_html(&entry)?;
        Ok(())
    }

    async fn inject_config(&self) -> Result<D::Element, BridgeError> {
        let config = self.call(&self.config.calls.config_html).await?;
        Ok(self
            .document
            .append_container(&self.config.container_tag, &config)?)
    }

    async fn inject_scripts(&self, container: &D::Element) -> Result<(), BridgeError> {
        let manifest = self.call(&self.config.calls.scripts_html).await?;

        for script in parse_script_manifest(&manifest) {
            match script {
                ScriptDescriptor::External { src } => {
                    self.manager.trace(&format!("[boot] Loading {}", src));
                    self.document
                        .append_external_script(container, &src)
                        .await?;
                }
                ScriptDescriptor::Inline { code } => {
                    self.document.append_inline_script(
                        container,
                        InlineScript {
                            code: &code,
                            id: None,
                            script_type: "text/javascript",
                        },
                    )?;
                }
            }
        }
        Ok(())
    }

    async fn inject_renderer(&self, container: &D::Element) -> Result<(), BridgeError> {
        let renderer = self.call(&self.config.calls.renderer).await?;
        self.document.append_inline_script(
            container,
            InlineScript {
                code: &renderer,
                id: Some(&self.config.renderer_id),
                script_type: "application/javascript",
            },
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        run_bridged, CapturingConsole, DomEvent, MemoryDocument, RecordingChannel, StaticLoader,
    };
    use webdash_ipc::{ExecValue, ExecuteRequest, WorkerReply};

    type Boot = BootOrchestrator<RecordingChannel, CapturingConsole, MemoryDocument, StaticLoader>;

    const MANIFEST: &str = "<script src=\"/deps/react.js?v=16\"></script>\n\
        <script>window.inline = 1;</script>\n\
        <script src=\"/deps/dash.js?m=1\"></script>\n  ";

    fn dash_app(req: &ExecuteRequest) -> WorkerReply {
        let text = match req.python.as_str() {
            "app._generate_meta_html()" => "<meta charset=\"UTF-8\">",
            "app.title" => "Dash & Co",
            "app.get_asset_url(app._favicon)" => "/assets/favicon.ico?m=1699",
            "app._generate_css_dist_html()" => "<link rel=\"stylesheet\" href=\"styles.css?m=169900000\">",
            "dash.dash._app_entry" => "<div id=\"react-entry-point\"></div>",
            "app._generate_config_html()" => "<script id=\"_dash-config\">{}</script>",
            "app._generate_scripts_html()" => MANIFEST,
            "app.renderer" => "var renderer = new DashRenderer();",
            _ => {
                return WorkerReply::Results {
                    uuid: req.uuid.clone(),
                    results: ExecValue::None,
                }
            }
        };
        WorkerReply::Results {
            uuid: req.uuid.clone(),
            results: ExecValue::Text(text.to_string()),
        }
    }

    fn boot(document: MemoryDocument) -> Boot {
        let manager = WorkerManager::new(RecordingChannel::new(), CapturingConsole::new());
        let loader = StaticLoader::new().with_file("bootstrap.py", "def bootstrap_dash_app(base): ...");
        BootOrchestrator::new(manager, document, loader, BridgeConfig::default())
    }

    #[test]
    fn test_full_bootstrap_order() {
        let mut boot = boot(MemoryDocument::new("/app/index.html"));
        let manager = boot.manager.clone();

        run_bridged(&manager, dash_app, boot.run()).unwrap();
        assert_eq!(boot.stage(), BootStage::Done);

        let sent = manager.channel().sent();
        assert!(sent[0].python.starts_with("def bootstrap_dash_app(base): ..."));
        assert!(sent[0].python.ends_with("app = bootstrap_dash_app(\"/app/\")\n"));
        let calls: Vec<_> = sent[1..].iter().map(|r| r.python.as_str()).collect();
        assert_eq!(
            calls,
            vec![
                "app._generate_meta_html()",
                "app.title",
                "app.get_asset_url(app._favicon)",
                "app._generate_css_dist_html()",
                "dash.dash._app_entry",
                "app._generate_config_html()",
                "app._generate_scripts_html()",
                "app.renderer",
            ]
        );

        let events = boot.document().events();
        assert_eq!(events.len(), 7);
        match &events[0] {
            DomEvent::Head(head) => {
                assert!(head.contains("<title>Dash &amp; Co</title>"));
                assert!(head.contains("href=\"/assets/favicon.ico\""));
                assert!(head.contains("href=\"styles.css\""));
                assert!(!head.contains("169900000"));
            }
            other => panic!("expected head first, got {:?}", other),
        }
        assert_eq!(
            events[1],
            DomEvent::Body("<div id=\"react-entry-point\"></div>".to_string())
        );
        assert_eq!(
            events[2],
            DomEvent::Container {
                tag: "footer".to_string(),
                html: "<script id=\"_dash-config\">{}</script>".to_string(),
            }
        );
        assert_eq!(
            events[3],
            DomEvent::ExternalScript {
                parent: 0,
                src: "/deps/react.js".to_string()
            }
        );
        assert_eq!(
            events[4],
            DomEvent::InlineScript {
                parent: 0,
                code: "window.inline = 1;".to_string(),
                id: None,
                script_type: "text/javascript".to_string(),
            }
        );
        assert_eq!(
            events[5],
            DomEvent::ExternalScript {
                parent: 0,
                src: "/deps/dash.js".to_string()
            }
        );
        assert_eq!(
            events[6],
            DomEvent::InlineScript {
                parent: 0,
                code: "var renderer = new DashRenderer();".to_string(),
                id: Some("_dash-renderer".to_string()),
                script_type: "application/javascript".to_string(),
            }
        );
    }

    #[test]
    fn test_failed_script_aborts_sequence() {
        let document = MemoryDocument::new("/app/");
        document.fail_script("/deps/react.js");
        let mut boot = boot(document);
        let manager = boot.manager.clone();

        let result = run_bridged(&manager, dash_app, boot.run());

        assert_eq!(result, Err(BridgeError::ScriptLoad("/deps/react.js".to_string())));
        assert_eq!(boot.stage(), BootStage::Scripts);
        assert!(!manager
            .channel()
            .sent()
            .iter()
            .any(|r| r.python == "app.renderer"));
        assert!(matches!(
            boot.document().events().last(),
            Some(DomEvent::ExternalScript { .. })
        ));
    }

    #[test]
    fn test_wrong_result_shape_aborts_at_stage() {
        let mut boot = boot(MemoryDocument::new("/app/"));
        let manager = boot.manager.clone();

        let result = run_bridged(
            &manager,
            |req| {
                if req.python == "app.title" {
                    WorkerReply::Results {
                        uuid: req.uuid.clone(),
                        results: ExecValue::Binary(vec![1]),
                    }
                } else {
                    dash_app(req)
                }
            },
            boot.run(),
        );

        assert!(matches!(result, Err(BridgeError::TypeMismatch { .. })));
        assert_eq!(boot.stage(), BootStage::Head);
        assert!(boot.document().events().is_empty());
    }

    #[test]
    fn test_missing_bootstrap_program() {
        let manager = WorkerManager::new(RecordingChannel::new(), CapturingConsole::new());
        let mut boot = BootOrchestrator::new(
            manager.clone(),
            MemoryDocument::new("/"),
            StaticLoader::new(),
            BridgeConfig::default(),
        );

        let result = futures::executor::block_on(boot.run());

        assert!(matches!(result, Err(BridgeError::Hal(_))));
        assert_eq!(boot.stage(), BootStage::Init);
        assert!(manager.channel().sent().is_empty());
    }
}
