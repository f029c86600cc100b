// ABOUTME: Text escaping for the frontend line protocol
// ABOUTME: HTML escape/unescape for message bodies and URL path escaping for names

use regex::Regex;
use std::sync::LazyLock;

static BR_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br/>").expect("Failed to compile <br/> pattern"));

/// Escape `& < > ' "` so a message body fits on one protocol line
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&#34;"),
            _ => out.push(c),
        }
    }
    out
}

/// Decode HTML entities: named (full HTML5 set) and numeric references.
/// Unknown entities are kept as-is.
pub fn unescape_html(s: &str) -> String {
    html_escape::decode_html_entities(s).into_owned()
}

/// Turn a frontend message into plain text: `<br/>` becomes a newline,
/// then HTML entities are decoded
pub fn unescape_message(msg: &str) -> String {
    unescape_html(&BR_TAG.replace_all(msg, "\n"))
}

/// Escape a name for use as a single protocol token
pub fn path_escape(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}
