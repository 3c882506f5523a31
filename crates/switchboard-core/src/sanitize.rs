//! Reply sanitizer. Turns raw model output into text a customer can read
//!
//! Models sometimes echo the contract name (`AgentReply: ...`), wrap the answer
//! in a JSON object, or prefix it with a role marker. [`clean_reply_text`]
//! peels those layers off one at a time until nothing more comes off.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Keys that carry the user-facing message, in preference order
const MESSAGE_KEYS: &[&str] = &["response", "resposta", "mensagem", "message", "content", "text"];

static AGENT_REPLY_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^<?AgentReply>?[:\s]*").expect("valid regex"));

static AGENT_REPLY_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</AgentReply>\s*$").expect("valid regex"));

static KEYED_MESSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^[\s({\[]*["']?(?:response|resposta|mensagem|message|content|text)["']?\s*[:=]\s*(?:"([^"]*)"|'([^']*)')"#,
    )
    .expect("valid regex")
});

static ROLE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^["']?(?:response|resposta|mensagem|message|content|text|cliente|client|bot|atendente|assistant)["']?\s*[:=]\s*"#,
    )
    .expect("valid regex")
});

/// Strip structural artifacts from a model reply.
///
/// Idempotent: `clean_reply_text(&clean_reply_text(x)) == clean_reply_text(x)`.
pub fn clean_reply_text(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = clean_once(&current);
        // Each pass either strips something (strictly shorter) or is a no-op.
        if next.len() >= current.len() {
            return current;
        }
        current = next;
    }
}

/// One peeling pass
fn clean_once(text: &str) -> String {
    let s = text.trim();
    if s.is_empty() {
        return String::new();
    }

    if let Some(inner) = strip_code_fence(s) {
        return inner.to_string();
    }

    let stripped = AGENT_REPLY_PREFIX.replace(s, "");
    let stripped = AGENT_REPLY_SUFFIX.replace(&stripped, "");
    if stripped.len() < s.len() {
        return stripped.trim().to_string();
    }

    for quotes in ["\"\"\"", "'''"] {
        if let Some(inner) = s.strip_prefix(quotes).and_then(|r| r.strip_suffix(quotes)) {
            return inner.to_string();
        }
    }

    if let Some(rest) = s.strip_prefix(':') {
        return rest.to_string();
    }

    if let Some(message) = message_from_json(s) {
        return message;
    }

    if let Some(caps) = KEYED_MESSAGE.captures(s) {
        if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
            if !m.as_str().trim().is_empty() {
                return m.as_str().to_string();
            }
        }
    }

    let without_role = ROLE_PREFIX.replace(s, "");
    if without_role.len() < s.len() {
        return without_role.into_owned();
    }

    if let Some(inner) = strip_enclosing(s) {
        return inner.to_string();
    }

    if s.chars().count() < 5 && !s.chars().any(char::is_alphanumeric) {
        return String::new();
    }

    s.to_string()
}

fn strip_code_fence(s: &str) -> Option<&str> {
    let body = s.strip_prefix("```")?.strip_suffix("```")?;
    let body = body.trim_start();
    let body = body
        .strip_prefix("json")
        .or_else(|| body.strip_prefix("JSON"))
        .unwrap_or(body);
    Some(body.trim())
}

/// Message field of a JSON object, or the value of a JSON string literal
fn message_from_json(s: &str) -> Option<String> {
    match serde_json::from_str::<Value>(s).ok()? {
        Value::String(text) => Some(text),
        Value::Object(map) => MESSAGE_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .or_else(|| map.values().find_map(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

/// One layer of matching quotes or brackets, when the delimiters only occur
/// at the edges
fn strip_enclosing(s: &str) -> Option<&str> {
    const PAIRS: &[(char, char)] = &[('"', '"'), ('\'', '\''), ('(', ')'), ('{', '}'), ('[', ']')];
    if s.chars().count() < 2 {
        return None;
    }
    PAIRS.iter().find_map(|&(open, close)| {
        let inner = s.strip_prefix(open)?.strip_suffix(close)?;
        if inner.contains(open) || inner.contains(close) {
            None
        } else {
            Some(inner)
        }
    })
}

/// First non-empty text: the cleaned reply, else `fallback`
pub fn clean_or(text: &str, fallback: &str) -> String {
    let cleaned = clean_reply_text(text);
    if cleaned.trim().is_empty() {
        fallback.to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(clean_reply_text("O pneu 205/55 custa R$ 450,00."), "O pneu 205/55 custa R$ 450,00.");
    }

    #[test]
    fn test_json_object_message() {
        let raw = r#"{"acao": "responder", "mensagem": "Temos o pneu em estoque!", "precisa_humano": false}"#;
        assert_eq!(clean_reply_text(raw), "Temos o pneu em estoque!");
    }

    #[test]
    fn test_agent_reply_wrapper() {
        assert_eq!(clean_reply_text("AgentReply: Olá, tudo bem?"), "Olá, tudo bem?");
        assert_eq!(clean_reply_text("<AgentReply>Olá</AgentReply>"), "Olá");
        assert_eq!(
            clean_reply_text("AgentReply(mensagem='Posso ajudar?', acao='perguntar')"),
            "Posso ajudar?"
        );
    }

    #[test]
    fn test_code_fenced_json() {
        let raw = "```json\n{\"message\": \"Bom dia!\"}\n```";
        assert_eq!(clean_reply_text(raw), "Bom dia!");
    }

    #[test]
    fn test_role_prefix_and_quotes() {
        assert_eq!(clean_reply_text("assistant: \"Claro, vou verificar.\""), "Claro, vou verificar.");
        assert_eq!(clean_reply_text("'''Oi'''"), "Oi");
        assert_eq!(clean_reply_text("resposta = 'Sim, temos.'"), "Sim, temos.");
    }

    #[test]
    fn test_brackets_only_when_enclosing() {
        assert_eq!(clean_reply_text("(Sem resposta)"), "Sem resposta");
        assert_eq!(clean_reply_text("[Promo] pneus com [desconto]"), "[Promo] pneus com [desconto]");
    }

    #[test]
    fn test_garbage_becomes_empty() {
        assert_eq!(clean_reply_text("{}"), "");
        assert_eq!(clean_reply_text(" \"\" "), "");
        assert_eq!(clean_reply_text("..."), "");
        assert_eq!(clean_reply_text(""), "");
    }

    #[test]
    fn test_nested_layers() {
        let raw = r#"AgentReply: "{\"mensagem\": \"Pode me passar a placa?\"}""#;
        assert_eq!(clean_reply_text(raw), "Pode me passar a placa?");
    }

    #[test]
    fn test_clean_or_fallback() {
        assert_eq!(clean_or("{}", "Sem resposta."), "Sem resposta.");
        assert_eq!(clean_or("Oi", "Sem resposta."), "Oi");
    }

    proptest! {
        #[test]
        fn prop_clean_is_idempotent(text in ".{0,80}") {
            let once = clean_reply_text(&text);
            prop_assert_eq!(clean_reply_text(&once), once);
        }

        #[test]
        fn prop_clean_is_idempotent_on_wrapped(body in "[a-zA-Z0-9 ,.!?'\"]{0,40}", wrap in 0usize..5) {
            let text = match wrap {
                0 => format!("AgentReply: {}", body),
                1 => format!("{{\"mensagem\": {:?}}}", body),
                2 => format!("'{}'", body),
                3 => format!("```json\n{}\n```", body),
                _ => format!("message = \"{}\"", body),
            };
            let once = clean_reply_text(&text);
            prop_assert_eq!(clean_reply_text(&once), once);
        }
    }
}
