//! Script manifests and cache-busting fragments
//!
//! Dash appends `?m=<mtime>` / `?v=<version>` to generated asset URLs. Those
//! fragments are stripped before the URLs are placed into the page so that
//! repeated loads hit a stable path.

use std::sync::LazyLock;

use regex::Regex;

static HREF_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bhref="([^"?]+?)(?:\?[^"]*)?""#).expect("invalid href pattern")
});

static SRC_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bsrc="([^"?]+?)(?:\?[^"]*)?""#).expect("invalid src pattern")
});

static SCRIPT_OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<script\b[^>]*>").expect("invalid script tag pattern"));

const SCRIPT_CLOSE_TAG: &str = "</script>";

/// One entry of a script manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptDescriptor {
    /// `<script src="...">`, with the cache-busting fragment already removed
    External { src: String },
    /// `<script>...</script>`
    Inline { code: String },
}

/// Drop a `?...` fragment from an asset URL. Idempotent.
pub fn strip_cache_buster(url: &str) -> &str {
    match url.find('?') {
        Some(idx) => &url[..idx],
        None => url,
    }
}

/// Strip cache-busting fragments from every `href="..."` in `markup`.
pub fn strip_href_cache_busters(markup: &str) -> String {
    HREF_ATTR.replace_all(markup, r#"href="$1""#).into_owned()
}

/// Split a script manifest into descriptors, in document order.
///
/// Chunks with no `src` and only whitespace content are skipped.
pub fn parse_script_manifest(manifest: &str) -> Vec<ScriptDescriptor> {
    let mut scripts = Vec::new();

    for chunk in manifest.split(SCRIPT_CLOSE_TAG) {
        let (tag, content) = match SCRIPT_OPEN_TAG.find(chunk) {
            Some(m) => (m.as_str(), &chunk[m.end()..]),
            None => ("", chunk),
        };

        if let Some(caps) = SRC_ATTR.captures(tag) {
            scripts.push(ScriptDescriptor::External {
                src: caps[1].to_string(),
            });
            continue;
        }

        if content.trim().is_empty() {
            continue;
        }
        scripts.push(ScriptDescriptor::Inline {
            code: content.to_string(),
        });
    }

    scripts
}
