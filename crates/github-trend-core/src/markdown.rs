//! README normalization.
//!
//! Strips Markdown and inline HTML down to plain prose before the text is
//! stored or embedded.

use std::sync::LazyLock;

use regex::Regex;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```[\s\S]*?```").unwrap());
static IMAGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").unwrap());
static LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").unwrap());
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static HTML_ENTITY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"&[a-zA-Z0-9#]+;").unwrap());
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`[^`]*`").unwrap());
static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]{0,3}#{1,6}[ \t]+").unwrap());
static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:[-*+]|\d+\.)[ \t]+").unwrap());
static RULE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-{3,}|={3,}").unwrap());
static EMPHASIS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*{1,3}([^*]+)\*{1,3}").unwrap());
static UNDERSCORE_BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"__([^_]+)__").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Reduce Markdown to single-spaced plain text.
///
/// Links keep their anchor text, images keep their alt text; HTML tags,
/// entities, and code are dropped; heading, list, emphasis and rule
/// markers are removed.
pub fn clean_markdown(markdown: &str) -> String {
    if markdown.trim().is_empty() {
        return String::new();
    }

    let text = CODE_FENCE.replace_all(markdown, " ");
    let text = IMAGE.replace_all(&text, "$1");
    let text = LINK.replace_all(&text, "$1");
    let text = HTML_TAG.replace_all(&text, " ");
    let text = HTML_ENTITY.replace_all(&text, " ");
    let text = INLINE_CODE.replace_all(&text, " ");
    let text = HEADING.replace_all(&text, "");
    let text = LIST_MARKER.replace_all(&text, "");
    let text = RULE.replace_all(&text, " ");
    let text = EMPHASIS.replace_all(&text, "$1");
    let text = UNDERSCORE_BOLD.replace_all(&text, "$1");
    let text = WHITESPACE.replace_all(&text, " ");

    text.trim().to_string()
}
