//! Shared helpers for request handling and upstream error hygiene.

use std::sync::LazyLock;

use axum::http::HeaderMap;
use regex::Regex;

/// Longest sanitized upstream message that may reach a client.
const MAX_UPSTREAM_MESSAGE_CHARS: usize = 200;

/// Visible part of a purchase token or bearer token in logs.
const TOKEN_PREFIX_CHARS: usize = 8;

/// Extract a Bearer token from the Authorization header.
///
/// Returns the token string without the "Bearer " prefix, or None if
/// the header is missing, malformed, or empty after the prefix.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

/// First few characters of a secret, safe to log.
pub fn token_prefix(token: &str) -> String {
    let prefix: String = token.chars().take(TOKEN_PREFIX_CHARS).collect();
    if token.chars().count() > TOKEN_PREFIX_CHARS {
        format!("{}…", prefix)
    } else {
        prefix
    }
}

/// Whether an upstream body looks like markup rather than JSON/plain text.
pub fn looks_like_html(body: &str) -> bool {
    let head = body.trim_start().to_ascii_lowercase();
    head.starts_with("<!doctype")
        || head.starts_with("<html")
        || head.starts_with("<?xml")
        || (head.starts_with('<') && head.contains('>'))
}

/// `<script>`/`<style>` blocks, contents included. An unclosed block runs to the end.
static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:script|style)\b.*?(?:</\s*(?:script|style)\s*>|\z)")
        .expect("Failed to create script/style regex")
});

/// Any complete tag, comment or doctype.
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^<>]*>").expect("Failed to create tag regex"));

/// Reduce an upstream message to plain, short text.
///
/// Tags (and the contents of `<script>`/`<style>` blocks) are removed, entities
/// for the common characters decoded, whitespace collapsed and the result
/// truncated. A stray `<` or `>` is blanked out rather than ending the text.
/// Returns `None` when nothing readable is left.
pub fn sanitize_upstream_message(raw: &str) -> Option<String> {
    let without_blocks = SCRIPT_OR_STYLE.replace_all(raw, " ");
    let without_tags = TAG.replace_all(&without_blocks, " ");
    let text = without_tags.replace(['<', '>'], " ");

    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", " ")
        .replace("&gt;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    let collapsed = decoded.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }

    let truncated: String = collapsed.chars().take(MAX_UPSTREAM_MESSAGE_CHARS).collect();
    if collapsed.chars().count() > MAX_UPSTREAM_MESSAGE_CHARS {
        Some(format!("{}…", truncated.trim_end()))
    } else {
        Some(truncated)
    }
}
