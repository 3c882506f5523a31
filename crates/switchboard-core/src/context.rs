//! Conversation context, built once per inbound message, read by every agent

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::InvalidContextError;

/// Raw fields as delivered by a transport (webhook, playground, simulator)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub local_time: Option<String>,
    #[serde(default)]
    pub out_of_hours: Option<bool>,
    #[serde(default)]
    pub requested_human: Option<bool>,
    #[serde(default)]
    pub mentioned_names: Vec<String>,
    #[serde(default)]
    pub conversation_id: Option<i64>,
    #[serde(default)]
    pub inbox_id: Option<i64>,
    #[serde(default)]
    pub contact_id: Option<i64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl InboundMessage {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn on_channel(mut self, channel: impl Into<String>, origin: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self.origin = Some(origin.into());
        self
    }
}

/// Immutable snapshot of everything an agent needs to respond
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentContext {
    message: String,
    channel: Option<String>,
    origin: Option<String>,
    local_time: Option<String>,
    out_of_hours: Option<bool>,
    requested_human: bool,
    mentioned_names: Vec<String>,
    conversation_id: Option<i64>,
    inbox_id: Option<i64>,
    contact_id: Option<i64>,
    metadata: BTreeMap<String, Value>,
}

impl AgentContext {
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn local_time(&self) -> Option<&str> {
        self.local_time.as_deref()
    }

    pub fn out_of_hours(&self) -> Option<bool> {
        self.out_of_hours
    }

    pub fn requested_human(&self) -> bool {
        self.requested_human
    }

    pub fn mentioned_names(&self) -> &[String] {
        &self.mentioned_names
    }

    pub fn conversation_id(&self) -> Option<i64> {
        self.conversation_id
    }

    pub fn inbox_id(&self) -> Option<i64> {
        self.inbox_id
    }

    pub fn contact_id(&self) -> Option<i64> {
        self.contact_id
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    /// Same context with a different message text. Used by the simulator,
    /// where each exchange is a new inbound message on the same conversation.
    pub fn with_message(&self, message: &str) -> Result<Self, InvalidContextError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(InvalidContextError::EmptyMessage);
        }
        Ok(Self {
            message: message.to_string(),
            ..self.clone()
        })
    }

    /// Render the context as the text block injected into system prompts
    pub fn render(&self) -> String {
        let out_of_hours = match self.out_of_hours {
            Some(true) => "sim",
            Some(false) => "nao",
            None => "-",
        };

        let mut lines = vec![
            format!("Mensagem do cliente: {}", self.message),
            format!("Canal: {}", self.channel.as_deref().unwrap_or("-")),
            format!("Origem: {}", self.origin.as_deref().unwrap_or("-")),
            format!("Horario local: {}", self.local_time.as_deref().unwrap_or("-")),
            format!("Fora do horario: {}", out_of_hours),
            format!(
                "Pediu humano: {}",
                if self.requested_human { "sim" } else { "nao" }
            ),
        ];
        if !self.mentioned_names.is_empty() {
            lines.push(format!("Nomes citados: {}", self.mentioned_names.join(", ")));
        }
        if let Some(id) = self.conversation_id {
            lines.push(format!("Conversation ID: {}", id));
        }
        if let Some(id) = self.inbox_id {
            lines.push(format!("Inbox ID: {}", id));
        }
        if let Some(id) = self.contact_id {
            lines.push(format!("Contact ID: {}", id));
        }
        if !self.metadata.is_empty() {
            let metadata = serde_json::to_string(&self.metadata).unwrap_or_default();
            lines.push(format!("Metadados: {}", metadata));
        }
        lines.join("\n")
    }
}

/// Opening hours used to derive the out-of-hours flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl BusinessHours {
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.open <= self.close {
            time >= self.open && time < self.close
        } else {
            // window wraps past midnight
            time >= self.open || time < self.close
        }
    }
}

const HUMAN_REQUEST_SIGNALS: &[&str] = &[
    "atendente",
    "humano",
    "falar com alguem",
    "falar com alguém",
    "pessoa de verdade",
    "pessoa real",
];

/// Turns transport fields into an [`AgentContext`]
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    business_hours: Option<BusinessHours>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_business_hours(mut self, hours: BusinessHours) -> Self {
        self.business_hours = Some(hours);
        self
    }

    /// Validate and normalise. Only the message text is required.
    pub fn build(&self, raw: InboundMessage) -> Result<AgentContext, InvalidContextError> {
        let message = raw.message.trim().to_string();
        if message.is_empty() {
            return Err(InvalidContextError::EmptyMessage);
        }
        if let Some(key) = raw.metadata.keys().find(|k| k.trim().is_empty()) {
            return Err(InvalidContextError::EmptyMetadataKey(key.clone()));
        }

        let requested_human = raw
            .requested_human
            .unwrap_or_else(|| mentions_human_request(&message));

        let out_of_hours = raw.out_of_hours.or_else(|| {
            let hours = self.business_hours?;
            let time = raw.local_time.as_deref().and_then(parse_local_time)?;
            Some(!hours.contains(time))
        });

        let mentioned_names = raw
            .mentioned_names
            .into_iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();

        debug!(
            "Built context (channel={:?}, requested_human={}, out_of_hours={:?})",
            raw.channel, requested_human, out_of_hours
        );

        Ok(AgentContext {
            message,
            channel: non_empty(raw.channel),
            origin: non_empty(raw.origin),
            local_time: non_empty(raw.local_time),
            out_of_hours,
            requested_human,
            mentioned_names,
            conversation_id: raw.conversation_id,
            inbox_id: raw.inbox_id,
            contact_id: raw.contact_id,
            metadata: raw.metadata,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn mentions_human_request(message: &str) -> bool {
    let lower = message.to_lowercase();
    HUMAN_REQUEST_SIGNALS.iter().any(|s| lower.contains(s))
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM[:SS]`, or a bare `HH:MM[:SS]`
fn parse_local_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.time());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%d/%m/%Y %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(dt.time());
        }
    }
    ["%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(value, fmt).ok())
        .map(|t| t.with_nanosecond(0).unwrap_or(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hours() -> BusinessHours {
        BusinessHours {
            open: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            close: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_empty_message_is_rejected() {
        let builder = ContextBuilder::new();
        assert_eq!(
            builder.build(InboundMessage::text("   ")).unwrap_err(),
            InvalidContextError::EmptyMessage
        );
    }

    #[test]
    fn test_optional_fields_default() {
        let ctx = ContextBuilder::new()
            .build(InboundMessage::text(" Quanto custa o pneu 205/55? "))
            .unwrap();
        assert_eq!(ctx.message(), "Quanto custa o pneu 205/55?");
        assert!(ctx.channel().is_none());
        assert!(ctx.out_of_hours().is_none());
        assert!(!ctx.requested_human());
        assert!(ctx.metadata().is_empty());
    }

    #[test]
    fn test_requested_human_detected_from_text() {
        let ctx = ContextBuilder::new()
            .build(InboundMessage::text("Quero falar com um atendente"))
            .unwrap();
        assert!(ctx.requested_human());

        let mut raw = InboundMessage::text("Quero falar com um atendente");
        raw.requested_human = Some(false);
        assert!(!ContextBuilder::new().build(raw).unwrap().requested_human());
    }

    #[test]
    fn test_out_of_hours_from_business_hours() {
        let builder = ContextBuilder::new().with_business_hours(hours());

        let mut raw = InboundMessage::text("oi");
        raw.local_time = Some("2026-03-02 21:15".to_string());
        assert_eq!(builder.build(raw).unwrap().out_of_hours(), Some(true));

        let mut raw = InboundMessage::text("oi");
        raw.local_time = Some("09:30".to_string());
        assert_eq!(builder.build(raw).unwrap().out_of_hours(), Some(false));

        let mut raw = InboundMessage::text("oi");
        raw.local_time = Some("2026-03-02T07:59:00-03:00".to_string());
        assert_eq!(builder.build(raw).unwrap().out_of_hours(), Some(true));
    }

    #[test]
    fn test_explicit_out_of_hours_wins() {
        let builder = ContextBuilder::new().with_business_hours(hours());
        let mut raw = InboundMessage::text("oi");
        raw.local_time = Some("09:30".to_string());
        raw.out_of_hours = Some(true);
        assert_eq!(builder.build(raw).unwrap().out_of_hours(), Some(true));
    }

    #[test]
    fn test_wrapping_business_hours() {
        let night = BusinessHours {
            open: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            close: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        };
        assert!(night.contains(NaiveTime::from_hms_opt(23, 0, 0).unwrap()));
        assert!(night.contains(NaiveTime::from_hms_opt(2, 0, 0).unwrap()));
        assert!(!night.contains(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    }

    #[test]
    fn test_empty_metadata_key_is_rejected() {
        let mut raw = InboundMessage::text("oi");
        raw.metadata.insert(" ".to_string(), Value::Bool(true));
        assert!(matches!(
            ContextBuilder::new().build(raw),
            Err(InvalidContextError::EmptyMetadataKey(_))
        ));
    }

    #[test]
    fn test_render_context() {
        let mut raw = InboundMessage::text("Oi, tudo bem?").on_channel("whatsapp", "chatwoot");
        raw.mentioned_names = vec!["Carlos".to_string(), " ".to_string()];
        raw.conversation_id = Some(42);
        raw.metadata.insert("placa".to_string(), Value::String("ABC1D23".to_string()));
        let rendered = ContextBuilder::new().build(raw).unwrap().render();

        assert!(rendered.starts_with("Mensagem do cliente: Oi, tudo bem?"));
        assert!(rendered.contains("Canal: whatsapp"));
        assert!(rendered.contains("Fora do horario: -"));
        assert!(rendered.contains("Pediu humano: nao"));
        assert!(rendered.contains("Nomes citados: Carlos\n"));
        assert!(rendered.contains("Conversation ID: 42"));
        assert!(!rendered.contains("Inbox ID"));
        assert!(rendered.contains(r#"Metadados: {"placa":"ABC1D23"}"#));
    }

    #[test]
    fn test_with_message_keeps_conversation_fields() {
        let mut raw = InboundMessage::text("primeira");
        raw.conversation_id = Some(7);
        let ctx = ContextBuilder::new().build(raw).unwrap();
        let next = ctx.with_message("segunda").unwrap();
        assert_eq!(next.message(), "segunda");
        assert_eq!(next.conversation_id(), Some(7));
        assert!(ctx.with_message("").is_err());
    }
}
