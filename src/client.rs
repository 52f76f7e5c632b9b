//! Browser-side reload client, embedded in the binary.

use rust_embed::RustEmbed;

use crate::error::{Error, Result};

const SNIPPET_FILE: &str = "livereload.html";
const PATH_PLACEHOLDER: &str = "__RELOAD_PATH__";

#[derive(RustEmbed)]
#[folder = "assets/"]
struct Asset;

/// Render the `<script>` block that connects to `reload_path` and reloads the
/// page on any message. Reconnects after a second if the socket closes.
pub fn reload_snippet(reload_path: &str) -> Result<String> {
    let file = Asset::get(SNIPPET_FILE).ok_or(Error::MissingAsset(SNIPPET_FILE))?;
    let template = String::from_utf8_lossy(&file.data);
    Ok(template.replace(PATH_PLACEHOLDER, reload_path))
}
