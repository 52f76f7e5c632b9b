//! Reload script injection for the entry document.
//!
//! Requests for `/`, `/<entry>` or any path whose last segment is the entry
//! file name are answered here: the file is read from the served root, the
//! reload snippet is spliced in, and the result is returned as HTML. A missing
//! file is a 404, never a fall-through. Every other request goes to the wrapped
//! static file service untouched.
//!
//! The insertion point is found with a plain, case-sensitive substring search
//! so that malformed markup is never rewritten beyond the single splice.

use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;
use tracing::debug;

use crate::site::Site;

const BODY_CLOSE: &[u8] = b"</body>";
const HTML_CLOSE: &[u8] = b"</html>";

/// Where the snippet ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionPoint {
    BeforeBodyClose,
    BeforeHtmlClose,
    Append,
}

/// Splice `snippet` into `html`.
///
/// Tried in order, first match wins: before the first `</body>`, before the
/// first `</html>`, or at the very end. Bytes outside the splice are kept
/// as they are, so non-UTF-8 documents survive.
pub fn inject(html: &[u8], snippet: &str) -> (Vec<u8>, InjectionPoint) {
    let (at, point) = if let Some(pos) = find(html, BODY_CLOSE) {
        (pos, InjectionPoint::BeforeBodyClose)
    } else if let Some(pos) = find(html, HTML_CLOSE) {
        (pos, InjectionPoint::BeforeHtmlClose)
    } else {
        (html.len(), InjectionPoint::Append)
    };

    let mut out = Vec::with_capacity(html.len() + snippet.len());
    out.extend_from_slice(&html[..at]);
    out.extend_from_slice(snippet.as_bytes());
    out.extend_from_slice(&html[at..]);
    (out, point)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Whether a decoded request path targets the entry document.
pub fn should_inject(path: &str, entry: &str) -> bool {
    if path == "/" {
        return true;
    }
    if path.strip_prefix('/') == Some(entry) {
        return true;
    }
    path.trim_end_matches('/').rsplit('/').next() == Some(entry)
}

/// Map a decoded request path onto a file under `root`.
///
/// `/` maps to the entry document. Paths that try to climb out of the root
/// yield `None`.
pub fn resolve(root: &Path, entry: &str, path: &str) -> Option<PathBuf> {
    let relative = path.trim_start_matches('/');
    if relative.is_empty() {
        return Some(root.join(entry));
    }

    let relative = Path::new(relative);
    let contained = relative.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    contained.then(|| root.join(relative))
}

/// State for [`inject_reload_script`].
#[derive(Debug)]
pub struct Injector {
    site: Site,
    snippet: String,
}

impl Injector {
    pub fn new(site: Site, snippet: impl Into<String>) -> Self {
        Self { site, snippet: snippet.into() }
    }

    /// Build the response for an entry-document request.
    async fn respond(&self, path: &str) -> Response {
        let Some(file) = resolve(self.site.root(), self.site.entry(), path) else {
            return not_found();
        };

        let html = match tokio::fs::read(&file).await {
            Ok(html) => html,
            Err(e) => {
                debug!(file = %file.display(), "entry document unreadable: {e}");
                return not_found();
            }
        };

        let (body, point) = inject(&html, &self.snippet);
        debug!(file = %file.display(), ?point, "injected reload script");

        (
            [
                (header::CONTENT_TYPE, "text/html; charset=utf-8"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            body,
        )
            .into_response()
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "404 page not found").into_response()
}

/// Middleware placed in front of the static file service.
pub async fn inject_reload_script(
    State(injector): State<Arc<Injector>>,
    req: Request,
    next: Next,
) -> Response {
    let decoded = percent_decode_str(req.uri().path())
        .decode_utf8()
        .map(Cow::into_owned);
    // Not UTF-8, so not a name we could have been asked to inject into.
    let Ok(path) = decoded else {
        return next.run(req).await;
    };

    if !should_inject(&path, injector.site.entry()) {
        return next.run(req).await;
    }

    injector.respond(&path).await
}
