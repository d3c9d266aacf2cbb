//! Base route derivation and request classification
//!
//! The base route is the page's path with a trailing file-like segment
//! (`/<name>.<ext>`) or `/index` removed, keeping the trailing slash:
//!
//! ```text
//! /app/index.html  →  /app/
//! /app/index       →  /app/
//! /app/            →  /app/
//! /app/view        →  /app/view
//! ```
//!
//! A request is local when its absolute URL starts with the page's origin
//! followed by that base route.

use url::Url;

use crate::error::BridgeError;

/// Where a request is serviced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteClassification {
    /// Serviced by the embedded application; carries the resolved URL
    Local(Url),
    /// Forwarded to the network untouched
    Remote,
}

impl RouteClassification {
    pub fn is_local(&self) -> bool {
        matches!(self, RouteClassification::Local(_))
    }
}

/// Remove a trailing `/<name>.<ext>` or `/index` segment, keeping the slash.
pub fn strip_last_segment(path: &str) -> &str {
    let Some(slash) = path.rfind('/') else {
        return path;
    };
    let segment = &path[slash + 1..];
    // `<name>.<ext>` needs at least one character before the dot
    let file_like = segment.char_indices().skip(1).any(|(_, c)| c == '.');
    if segment == "index" || file_like {
        &path[..=slash]
    } else {
        path
    }
}

/// Base route of a page path, e.g. `/app/index.html` → `/app/`.
pub fn base_route(pathname: &str) -> String {
    strip_last_segment(pathname).to_string()
}

/// Absolute prefix that local request URLs start with.
///
/// Query and fragment of the location are not part of the route.
pub fn base_url(location_href: &str) -> Result<String, BridgeError> {
    let mut location = Url::parse(location_href)
        .map_err(|e| BridgeError::InvalidUrl(format!("{}: {}", location_href, e)))?;
    location.set_query(None);
    location.set_fragment(None);
    Ok(strip_last_segment(location.as_str()).to_string())
}

/// Classify `request_url` (absolute, or relative to the page) against the
/// page's location.
///
/// URLs that cannot be resolved are left to the network, which reports the
/// failure in its own terms.
pub fn classify(request_url: &str, location_href: &str) -> RouteClassification {
    let Ok(base) = base_url(location_href) else {
        return RouteClassification::Remote;
    };
    let resolved = match Url::parse(location_href).and_then(|loc| loc.join(request_url)) {
        Ok(url) => url,
        Err(_) => return RouteClassification::Remote,
    };
    if resolved.as_str().starts_with(&base) {
        RouteClassification::Local(resolved)
    } else {
        RouteClassification::Remote
    }
}
