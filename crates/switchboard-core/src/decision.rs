//! Structured agent outputs and their parsers
//!
//! Model output is validated into these types at the boundary. Field names on
//! the wire are the Portuguese ones the agent prompts ask for; English aliases
//! are accepted as well.

use std::collections::BTreeSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::agents::role::{AgentRole, OutputContract, refers_to_human, resolve_role_label};
use crate::error::{ContractError, RouteParseError};

pub const CRITICAL_MARKER: &str = "[CRITICO]";
pub const SAFETY_LIMIT_TAG: &str = "safety-limit";

/// Where triage (or the coordinator) wants the conversation to go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RouteDestination {
    Agent(AgentRole),
    Human,
    #[default]
    Undetermined,
}

impl RouteDestination {
    pub fn from_label(label: &str) -> Self {
        if label.trim().is_empty() {
            return Self::Undetermined;
        }
        if refers_to_human(label) {
            return Self::Human;
        }
        resolve_role_label(label).map_or(Self::Undetermined, Self::Agent)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Agent(role) => role.label(),
            Self::Human => "humano",
            Self::Undetermined => "indefinido",
        }
    }

    pub fn agent(&self) -> Option<AgentRole> {
        match self {
            Self::Agent(role) => Some(*role),
            _ => None,
        }
    }
}

impl std::fmt::Display for RouteDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for RouteDestination {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for RouteDestination {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = Option::<String>::deserialize(deserializer)?;
        Ok(label.map_or(Self::Undetermined, |l| Self::from_label(&l)))
    }
}

/// What a specialist or the coordinator decided to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyAction {
    #[default]
    #[serde(rename = "responder", alias = "respond")]
    Respond,
    #[serde(rename = "perguntar", alias = "ask")]
    Ask,
    #[serde(rename = "redirecionar", alias = "redirect")]
    Redirect,
    #[serde(rename = "escalar_humano", alias = "escalate", alias = "escalate_to_human")]
    Escalate,
}

/// Output of the triage agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    #[serde(rename = "agente_destino", alias = "destination", default)]
    pub destination: RouteDestination,
    #[serde(rename = "confianca", alias = "confidence")]
    pub confidence: f32,
    #[serde(rename = "pergunta_clareadora", alias = "clarifying_question", default)]
    pub clarifying_question: Option<String>,
    #[serde(rename = "mensagem_transicao", alias = "transition_message", default)]
    pub transition_message: Option<String>,
    #[serde(
        rename = "precisa_humano",
        alias = "needs_human",
        default,
        deserialize_with = "null_as_default"
    )]
    pub needs_human: bool,
    #[serde(rename = "motivo", alias = "reason")]
    pub reason: String,
    #[serde(rename = "intencao", alias = "intent", default)]
    pub intent: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: BTreeSet<String>,
}

/// Output of a specialist agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    #[serde(rename = "acao", alias = "action", default, deserialize_with = "null_as_default")]
    pub action: ReplyAction,
    #[serde(rename = "mensagem", alias = "message")]
    pub message: String,
    #[serde(
        rename = "precisa_humano",
        alias = "needs_human",
        default,
        deserialize_with = "null_as_default"
    )]
    pub needs_human: bool,
    #[serde(rename = "motivo_escalacao", alias = "escalation_reason", default)]
    pub escalation_reason: Option<String>,
    #[serde(
        rename = "dados_faltantes",
        alias = "missing_data",
        default,
        deserialize_with = "null_as_default"
    )]
    pub missing_data: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: BTreeSet<String>,
}

/// Output of the coordinator agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorDecision {
    #[serde(rename = "acao", alias = "action")]
    pub action: ReplyAction,
    #[serde(rename = "mensagem", alias = "message", default)]
    pub message: Option<String>,
    #[serde(rename = "agente_destino", alias = "destination", default)]
    pub destination: Option<RouteDestination>,
    #[serde(
        rename = "precisa_resumo",
        alias = "needs_summary",
        default,
        deserialize_with = "null_as_default"
    )]
    pub needs_summary: bool,
    #[serde(rename = "motivo", alias = "reason")]
    pub reason: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: BTreeSet<String>,
}

/// Condensed narrative handed to the human operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffSummary {
    #[serde(rename = "resumo", alias = "summary")]
    pub summary: String,
    #[serde(
        rename = "dados_relevantes",
        alias = "relevant_data",
        default,
        deserialize_with = "null_as_default"
    )]
    pub relevant_data: Vec<String>,
    #[serde(
        rename = "pendencias",
        alias = "pending",
        default,
        deserialize_with = "null_as_default"
    )]
    pub pending: Vec<String>,
    #[serde(rename = "sentimento", alias = "sentiment", default)]
    pub sentiment: Option<String>,
    #[serde(rename = "sugestao_proxima_acao", alias = "next_action", default)]
    pub next_action: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: BTreeSet<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Trimmed, `None` when blank
fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// A structured output the orchestrator can ask an agent for
pub trait Contract: DeserializeOwned + Sized {
    const CONTRACT: OutputContract;

    /// Normalize and check invariants serde cannot express
    fn validate(self) -> Result<Self, String>;
}

impl Contract for RouteDecision {
    const CONTRACT: OutputContract = OutputContract::RouteDecision;

    fn validate(mut self) -> Result<Self, String> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confianca {} is outside [0, 1]", self.confidence));
        }
        self.reason = self.reason.trim().to_string();
        if self.reason.is_empty() {
            return Err("motivo is empty".to_string());
        }
        self.clarifying_question = non_blank(self.clarifying_question);
        self.transition_message = non_blank(self.transition_message);
        self.intent = non_blank(self.intent);
        if self.destination == RouteDestination::Human {
            self.needs_human = true;
        }
        Ok(self)
    }
}

impl Contract for AgentReply {
    const CONTRACT: OutputContract = OutputContract::AgentReply;

    fn validate(mut self) -> Result<Self, String> {
        self.message = self.message.trim().to_string();
        if self.message.is_empty() {
            return Err("mensagem is empty".to_string());
        }
        self.escalation_reason = non_blank(self.escalation_reason);
        if self.action == ReplyAction::Escalate {
            self.needs_human = true;
        }
        Ok(self)
    }
}

impl Contract for CoordinatorDecision {
    const CONTRACT: OutputContract = OutputContract::CoordinatorDecision;

    fn validate(mut self) -> Result<Self, String> {
        self.reason = self.reason.trim().to_string();
        if self.reason.is_empty() {
            return Err("motivo is empty".to_string());
        }
        self.message = non_blank(self.message);
        match self.action {
            ReplyAction::Respond | ReplyAction::Ask if self.message.is_none() => {
                Err("mensagem is required when acao answers the customer".to_string())
            }
            ReplyAction::Redirect
                if matches!(self.destination, None | Some(RouteDestination::Undetermined)) =>
            {
                Err("agente_destino is required when acao=redirecionar".to_string())
            }
            _ => Ok(self),
        }
    }
}

impl Contract for HandoffSummary {
    const CONTRACT: OutputContract = OutputContract::HandoffSummary;

    fn validate(mut self) -> Result<Self, String> {
        self.summary = self.summary.trim().to_string();
        if self.summary.is_empty() {
            return Err("resumo is empty".to_string());
        }
        self.sentiment = non_blank(self.sentiment);
        self.next_action = non_blank(self.next_action);
        Ok(self)
    }
}

impl RouteDecision {
    /// The destination is only acted on when no human was asked for
    pub fn wants_human(&self) -> bool {
        self.needs_human || self.destination == RouteDestination::Human
    }

    /// Message shown when triage itself hands off
    pub fn handoff_message(&self) -> String {
        handoff_message(Some(&self.reason))
    }
}

impl AgentReply {
    pub fn handoff_message(&self) -> String {
        handoff_message(self.escalation_reason.as_deref())
    }
}

impl CoordinatorDecision {
    /// Escalation, explicitly or by pointing at a human
    pub fn wants_human(&self) -> bool {
        self.action == ReplyAction::Escalate || self.destination == Some(RouteDestination::Human)
    }
}

pub const DEFAULT_HANDOFF_MESSAGE: &str = "Um atendente humano entrará em contato em breve.";

/// Customer-facing handoff notice
pub fn handoff_message(reason: Option<&str>) -> String {
    match reason.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reason) => format!(
            "Vou encaminhar seu atendimento para um humano. Motivo: {}",
            reason
        ),
        None => DEFAULT_HANDOFF_MESSAGE.to_string(),
    }
}

impl HandoffSummary {
    /// Used when no summary agent is linked or it failed
    pub fn fallback(customer_message: &str, reason: &str) -> Self {
        Self {
            summary: format!(
                "Atendimento transferido sem resumo automatico. Motivo: {}",
                reason
            ),
            relevant_data: vec![format!("Ultima mensagem do cliente: {}", customer_message)],
            pending: vec!["Revisar o historico da conversa".to_string()],
            sentiment: None,
            next_action: Some("Assumir o atendimento e confirmar a necessidade do cliente".to_string()),
            tags: BTreeSet::new(),
        }
    }

    pub fn is_critical(&self) -> bool {
        self.summary.trim_start().starts_with(CRITICAL_MARKER)
    }

    /// Prefix the urgency marker once
    pub fn mark_critical(&mut self) {
        if !self.is_critical() {
            self.summary = format!("{} {}", CRITICAL_MARKER, self.summary);
        }
    }

    pub fn tag(&mut self, tag: &str) {
        self.tags.insert(tag.to_string());
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Plain-text rendering for the operator
    pub fn render(&self) -> String {
        let mut out = self.summary.clone();
        if !self.relevant_data.is_empty() {
            out.push_str("\nDados relevantes:");
            for item in &self.relevant_data {
                out.push_str(&format!("\n- {}", item));
            }
        }
        if !self.pending.is_empty() {
            out.push_str("\nPendencias:");
            for item in &self.pending {
                out.push_str(&format!("\n- {}", item));
            }
        }
        if let Some(sentiment) = &self.sentiment {
            out.push_str(&format!("\nSentimento: {}", sentiment));
        }
        if let Some(next) = &self.next_action {
            out.push_str(&format!("\nProxima acao sugerida: {}", next));
        }
        if !self.tags.is_empty() {
            let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
            out.push_str(&format!("\nTags: {}", tags.join(", ")));
        }
        out
    }
}

/// Pull the JSON object out of a model reply.
///
/// Handles code fences and prose around the object; anything that is not a
/// JSON object yields `None`.
pub fn extract_json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    let mut payload = text.trim();
    if payload.is_empty() {
        return None;
    }

    if payload.starts_with("```") {
        payload = payload.trim_matches('`').trim();
        if payload.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("json")) {
            payload = payload[4..].trim();
        }
    }

    if !(payload.starts_with('{') && payload.ends_with('}')) {
        if let (Some(start), Some(end)) = (payload.find('{'), payload.rfind('}')) {
            if end > start {
                payload = &payload[start..=end];
            }
        }
    }

    match serde_json::from_str::<Value>(payload).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Parse raw output of `agent` into the contract `T`
pub fn parse_contract<T: Contract>(agent: &str, raw: &str) -> Result<T, ContractError> {
    let error = |reason: String| ContractError {
        agent: agent.to_string(),
        contract: T::CONTRACT.name(),
        reason,
    };
    let object = extract_json_object(raw).ok_or_else(|| error("no JSON object found".to_string()))?;
    let value: T = serde_json::from_value(Value::Object(object)).map_err(|e| error(e.to_string()))?;
    value.validate().map_err(error)
}

/// Parse triage output; failures are [`RouteParseError`]s
pub fn parse_route_decision(agent: &str, raw: &str) -> Result<RouteDecision, RouteParseError> {
    parse_contract::<RouteDecision>(agent, raw).map_err(|e| RouteParseError {
        agent: e.agent,
        reason: e.reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_decision_portuguese_fields() {
        let raw = r#"{"agente_destino": "cotador", "confianca": 0.9, "pergunta_clareadora": "",
            "mensagem_transicao": "Vou te passar para o cotador.", "precisa_humano": false,
            "motivo": "Cliente pediu preco", "intencao": "cotacao", "tags": ["preco", "pneu"]}"#;
        let decision = parse_route_decision("Triagem", raw).unwrap();
        assert_eq!(decision.destination, RouteDestination::Agent(AgentRole::Quoter));
        assert_eq!(decision.confidence, 0.9);
        assert!(decision.clarifying_question.is_none());
        assert_eq!(decision.transition_message.as_deref(), Some("Vou te passar para o cotador."));
        assert_eq!(decision.tags.len(), 2);
        assert!(!decision.wants_human());
    }

    #[test]
    fn test_route_decision_english_aliases_and_nulls() {
        let raw = r#"{"destination": "Agente Comercial", "confidence": 1, "needs_human": null,
            "reason": "venda", "tags": null}"#;
        let decision = parse_route_decision("Triagem", raw).unwrap();
        assert_eq!(decision.destination, RouteDestination::Agent(AgentRole::Commercial));
        assert!(!decision.needs_human);
        assert!(decision.tags.is_empty());
    }

    #[test]
    fn test_human_destination_forces_needs_human() {
        let raw = r#"{"agente_destino": "humano", "confianca": 0.8, "motivo": "pediu atendente"}"#;
        let decision = parse_route_decision("Triagem", raw).unwrap();
        assert_eq!(decision.destination, RouteDestination::Human);
        assert!(decision.needs_human);
        assert_eq!(
            decision.handoff_message(),
            "Vou encaminhar seu atendimento para um humano. Motivo: pediu atendente"
        );
    }

    #[test]
    fn test_unknown_or_missing_destination_is_undetermined() {
        let raw = r#"{"agente_destino": "astronauta", "confianca": 0.4, "motivo": "?"}"#;
        let decision = parse_route_decision("Triagem", raw).unwrap();
        assert_eq!(decision.destination, RouteDestination::Undetermined);

        let raw = r#"{"agente_destino": null, "confianca": 0.4, "motivo": "?"}"#;
        let decision = parse_route_decision("Triagem", raw).unwrap();
        assert_eq!(decision.destination, RouteDestination::Undetermined);
    }

    #[test]
    fn test_route_decision_rejects_bad_confidence_and_reason() {
        let err = parse_route_decision(
            "Triagem",
            r#"{"agente_destino": "cotador", "confianca": 1.5, "motivo": "x"}"#,
        )
        .unwrap_err();
        assert!(err.reason.contains("outside"));

        let err = parse_route_decision(
            "Triagem",
            r#"{"agente_destino": "cotador", "confianca": 0.5, "motivo": "  "}"#,
        )
        .unwrap_err();
        assert!(err.reason.contains("motivo"));

        let err = parse_route_decision("Triagem", "nao sei").unwrap_err();
        assert_eq!(err.agent, "Triagem");
    }

    #[test]
    fn test_agent_reply_escalate_implies_needs_human() {
        let raw = r#"{"acao": "escalar_humano", "mensagem": "Vou chamar um atendente.",
            "precisa_humano": false, "motivo_escalacao": "reclamacao"}"#;
        let reply: AgentReply = parse_contract("Cotador", raw).unwrap();
        assert_eq!(reply.action, ReplyAction::Escalate);
        assert!(reply.needs_human);
        assert_eq!(
            reply.handoff_message(),
            "Vou encaminhar seu atendimento para um humano. Motivo: reclamacao"
        );
    }

    #[test]
    fn test_agent_reply_defaults() {
        let reply: AgentReply =
            parse_contract("Cotador", r#"{"mensagem": "O pneu custa R$ 350."}"#).unwrap();
        assert_eq!(reply.action, ReplyAction::Respond);
        assert!(!reply.needs_human);
        assert!(reply.missing_data.is_empty());

        let err = parse_contract::<AgentReply>("Cotador", r#"{"acao": "responder", "mensagem": ""}"#)
            .unwrap_err();
        assert_eq!(err.contract, "AgentReply");
    }

    #[test]
    fn test_coordinator_decision_validation() {
        let ok: CoordinatorDecision = parse_contract(
            "Coordenador",
            r#"{"acao": "redirecionar", "agente_destino": "guia_unidades", "motivo": "endereco"}"#,
        )
        .unwrap();
        assert_eq!(ok.destination, Some(RouteDestination::Agent(AgentRole::UnitsGuide)));

        assert!(parse_contract::<CoordinatorDecision>(
            "Coordenador",
            r#"{"acao": "redirecionar", "motivo": "x"}"#
        )
        .is_err());
        assert!(parse_contract::<CoordinatorDecision>(
            "Coordenador",
            r#"{"acao": "perguntar", "mensagem": " ", "motivo": "x"}"#
        )
        .is_err());

        let escalate: CoordinatorDecision = parse_contract(
            "Coordenador",
            r#"{"acao": "escalar_humano", "agente_destino": "humano", "precisa_resumo": true, "motivo": "x"}"#,
        )
        .unwrap();
        assert!(escalate.wants_human());
        assert!(escalate.needs_summary);
    }

    #[test]
    fn test_handoff_summary_marker_and_render() {
        let mut summary: HandoffSummary = parse_contract(
            "Resumo",
            r#"{"resumo": "Cliente quer trocar pneus.", "dados_relevantes": ["Placa ABC1D23"],
                "pendencias": [], "sentimento": "neutro", "sugestao_proxima_acao": "Enviar orcamento"}"#,
        )
        .unwrap();
        assert!(!summary.is_critical());
        summary.mark_critical();
        summary.mark_critical();
        assert_eq!(summary.summary, "[CRITICO] Cliente quer trocar pneus.");

        summary.tag(SAFETY_LIMIT_TAG);
        let text = summary.render();
        assert!(text.starts_with("[CRITICO] Cliente quer trocar pneus.\nDados relevantes:\n- Placa ABC1D23"));
        assert!(text.contains("Sentimento: neutro"));
        assert!(text.ends_with("Tags: safety-limit"));
    }

    #[test]
    fn test_fallback_summary() {
        let summary = HandoffSummary::fallback("quero falar com alguem", "pedido do cliente");
        assert!(summary.summary.contains("pedido do cliente"));
        assert_eq!(summary.relevant_data.len(), 1);
        assert!(!summary.has_tag(SAFETY_LIMIT_TAG));
    }

    #[test]
    fn test_extract_json_object() {
        let fenced = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json_object(fenced).unwrap()["a"], 1);

        let prose = "Claro! Segue: {\"a\": {\"b\": 2}} obrigado";
        assert_eq!(extract_json_object(prose).unwrap()["a"]["b"], 2);

        assert!(extract_json_object("[1, 2]").is_none());
        assert!(extract_json_object("").is_none());
        assert!(extract_json_object("sem json aqui").is_none());
    }

    #[test]
    fn test_handoff_message_default() {
        assert_eq!(handoff_message(None), DEFAULT_HANDOFF_MESSAGE);
        assert_eq!(handoff_message(Some("  ")), DEFAULT_HANDOFF_MESSAGE);
    }
}
