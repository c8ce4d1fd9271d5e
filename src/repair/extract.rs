use std::sync::OnceLock;

use regex::Regex;

fn fenced_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"```(?:python|py|python3)?[ \t]*\r?\n([\s\S]*?)```").expect("static regex")
    })
}

fn open_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:python|py|python3)?[ \t]*\r?\n").expect("static regex"))
}

/// First fenced code block in a model reply.
///
/// A reply cut off by the token budget may open a fence and never close it;
/// everything after the opening fence is taken in that case.
pub fn extract_code(reply: &str) -> Option<String> {
    if let Some(c) = fenced_block().captures(reply) {
        let body = c.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        return Some(body.to_string());
    }

    open_fence()
        .find(reply)
        .map(|m| reply[m.end()..].trim().to_string())
}

/// Fenced code if present, otherwise the whole reply.
pub fn code_or_raw(reply: &str) -> String {
    extract_code(reply).unwrap_or_else(|| reply.trim().to_string())
}
