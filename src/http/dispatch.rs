//! Connection and request classification.
//!
//! # Responsibilities
//! - Decide, per connection, whether an upgrade goes to the tunnel engine
//!   or is torn down
//! - Decide, per request, whether a path is a static asset or belongs to
//!   the rendered-page handler
//!
//! # Design Decisions
//! - Upgrade classification happens on the raw head, before any HTTP layer
//! - The tunnel prefix is a literal string prefix of the request target
//! - Static matches are exact: a regular file under the asset root, never a
//!   directory, never outside the root

use std::path::{Path, PathBuf};

use axum::http::Method;
use percent_encoding::percent_decode_str;

/// Where an inbound connection or request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchTarget {
    /// Serve this file from the asset root.
    StaticAsset(PathBuf),
    /// Hand the request to the rendered-page handler.
    RenderedPage,
    /// Hand the raw socket to the tunnel engine.
    TunnelUpgrade,
    /// Drop the connection without a response.
    Rejected,
}

impl DispatchTarget {
    /// Metric/log label.
    pub fn label(&self) -> &'static str {
        match self {
            DispatchTarget::StaticAsset(_) => "static",
            DispatchTarget::RenderedPage => "rendered",
            DispatchTarget::TunnelUpgrade => "tunnel",
            DispatchTarget::Rejected => "rejected",
        }
    }
}

/// Classifies connections and requests.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tunnel_prefix: String,
    asset_root: PathBuf,
}

impl Dispatcher {
    pub fn new(tunnel_prefix: impl Into<String>, asset_root: impl Into<PathBuf>) -> Self {
        Self {
            tunnel_prefix: tunnel_prefix.into(),
            asset_root: asset_root.into(),
        }
    }

    pub fn tunnel_prefix(&self) -> &str {
        &self.tunnel_prefix
    }

    pub fn asset_root(&self) -> &Path {
        &self.asset_root
    }

    /// Connection-level decision for an upgrade request.
    pub fn classify_upgrade(&self, target: &str) -> DispatchTarget {
        if target.starts_with(&self.tunnel_prefix) {
            DispatchTarget::TunnelUpgrade
        } else {
            DispatchTarget::Rejected
        }
    }

    /// Request-level decision for a normal HTTP request.
    pub async fn classify_request(&self, method: &Method, path: &str) -> DispatchTarget {
        if method != Method::GET && method != Method::HEAD {
            return DispatchTarget::RenderedPage;
        }
        match self.resolve_asset(path).await {
            Some(file) => DispatchTarget::StaticAsset(file),
            None => DispatchTarget::RenderedPage,
        }
    }

    /// Map a request path to a regular file under the asset root.
    pub async fn resolve_asset(&self, path: &str) -> Option<PathBuf> {
        let relative = sanitize_path(path)?;
        let candidate = self.asset_root.join(relative);
        match tokio::fs::metadata(&candidate).await {
            Ok(meta) if meta.is_file() => Some(candidate),
            _ => None,
        }
    }
}

/// Percent-decode `path` and turn it into a relative path, segment by
/// segment. The path must name a file exactly: empty segments (`//`, a
/// trailing `/`), `.` and `..` all refuse the match instead of being
/// normalized away.
fn sanitize_path(path: &str) -> Option<PathBuf> {
    let decoded = percent_decode_str(path).decode_utf8().ok()?;
    let trimmed = decoded.strip_prefix('/')?;
    if trimmed.contains('\0') || trimmed.contains('\\') {
        return None;
    }

    let mut relative = PathBuf::new();
    for segment in trimmed.split('/') {
        match segment {
            "" | "." | ".." => return None,
            segment => relative.push(segment),
        }
    }
    Some(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset_fixture() -> (tempfile::TempDir, Dispatcher) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("_astro")).unwrap();
        std::fs::write(dir.path().join("_astro/app.js"), "console.log(1)").unwrap();
        std::fs::write(dir.path().join("favicon ico.png"), [0u8; 4]).unwrap();
        let dispatcher = Dispatcher::new("/f", dir.path());
        (dir, dispatcher)
    }

    #[test]
    fn upgrade_prefix_is_literal() {
        let dispatcher = Dispatcher::new("/f", "/nonexistent");
        assert_eq!(dispatcher.classify_upgrade("/f/abc"), DispatchTarget::TunnelUpgrade);
        assert_eq!(dispatcher.classify_upgrade("/f"), DispatchTarget::TunnelUpgrade);
        assert_eq!(dispatcher.classify_upgrade("/notf"), DispatchTarget::Rejected);
        assert_eq!(dispatcher.classify_upgrade("/"), DispatchTarget::Rejected);
    }

    #[test]
    fn asset_paths_are_not_tunnel_targets() {
        let (_dir, dispatcher) = asset_fixture();
        assert_eq!(dispatcher.classify_upgrade("/_astro/app.js"), DispatchTarget::Rejected);
    }

    #[tokio::test]
    async fn static_files_match_exactly() {
        let (dir, dispatcher) = asset_fixture();

        assert_eq!(
            dispatcher.classify_request(&Method::GET, "/_astro/app.js").await,
            DispatchTarget::StaticAsset(dir.path().join("_astro/app.js"))
        );
        assert_eq!(
            dispatcher.classify_request(&Method::GET, "/favicon%20ico.png").await,
            DispatchTarget::StaticAsset(dir.path().join("favicon ico.png"))
        );
        assert_eq!(dispatcher.classify_request(&Method::GET, "/_astro").await, DispatchTarget::RenderedPage);
        assert_eq!(dispatcher.classify_request(&Method::GET, "/").await, DispatchTarget::RenderedPage);
        assert_eq!(dispatcher.classify_request(&Method::GET, "/missing.js").await, DispatchTarget::RenderedPage);
    }

    #[tokio::test]
    async fn near_miss_spellings_of_an_asset_are_not_served() {
        let (_dir, dispatcher) = asset_fixture();

        for path in ["/_astro/app.js/", "/_astro//app.js", "//_astro/app.js", "/_astro/./app.js"] {
            assert_eq!(
                dispatcher.classify_request(&Method::GET, path).await,
                DispatchTarget::RenderedPage,
                "{path}"
            );
        }
    }

    #[tokio::test]
    async fn non_read_methods_go_to_renderer() {
        let (_dir, dispatcher) = asset_fixture();
        assert_eq!(
            dispatcher.classify_request(&Method::POST, "/_astro/app.js").await,
            DispatchTarget::RenderedPage
        );
    }

    #[test]
    fn traversal_is_refused() {
        assert_eq!(sanitize_path("/../etc/passwd"), None);
        assert_eq!(sanitize_path("/a/%2e%2e/b"), None);
        assert_eq!(sanitize_path("/a\\b"), None);
        assert_eq!(sanitize_path("relative"), None);
        assert_eq!(sanitize_path("/a/./b"), None);
        assert_eq!(sanitize_path("/a/b/"), None);
        assert_eq!(sanitize_path("/a//b"), None);
        assert_eq!(sanitize_path("/"), None);
        assert_eq!(sanitize_path("/a/b"), Some(PathBuf::from("a/b")));
    }
}
