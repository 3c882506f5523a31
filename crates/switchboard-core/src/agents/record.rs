//! Agent and bot records as handed over by the persistence layer

use serde::{Deserialize, Deserializer, Serialize};

use super::role::{AgentRole, resolve_role_label};

/// Read-only projection of a persisted agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    #[serde(deserialize_with = "deserialize_role")]
    pub role: AgentRole,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub knowledge_collection: Option<String>,
}

fn default_active() -> bool {
    true
}

fn deserialize_role<'de, D>(deserializer: D) -> Result<AgentRole, D::Error>
where
    D: Deserializer<'de>,
{
    let label = String::deserialize(deserializer)?;
    resolve_role_label(&label)
        .ok_or_else(|| serde::de::Error::custom(format!("unknown agent role '{}'", label)))
}

impl AgentRecord {
    /// Record with the role's default prompt and display name
    pub fn new(id: impl Into<String>, role: AgentRole, model: impl Into<String>) -> Self {
        let profile = role.profile();
        Self {
            id: id.into(),
            name: profile.display_name.to_string(),
            role,
            system_prompt: profile.default_prompt.to_string(),
            model: model.into(),
            active: true,
            knowledge_collection: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_knowledge(mut self, collection: impl Into<String>) -> Self {
        self.knowledge_collection = Some(collection.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Active with a model id set
    pub fn is_usable(&self) -> bool {
        self.active && !self.model.trim().is_empty()
    }
}

/// Thresholds that decide when a triage decision is acted on
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    /// Decisions below this confidence go to the coordinator
    #[serde(default)]
    pub min_route_confidence: f32,
    /// A clarifying question is surfaced first when confidence is below this
    #[serde(default = "default_clarify_below")]
    pub clarify_below_confidence: f32,
}

fn default_clarify_below() -> f32 {
    0.6
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            min_route_confidence: 0.0,
            clarify_below_confidence: default_clarify_below(),
        }
    }
}

/// A named grouping of agents sharing a persona
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub policy: RoutingPolicy,
}

impl BotRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            persona: None,
            policy: RoutingPolicy::default(),
        }
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_record_new_uses_role_defaults() {
        let record = AgentRecord::new("a1", AgentRole::Quoter, "gpt-4o-mini");
        assert_eq!(record.name, "Agente Cotador");
        assert!(record.system_prompt.contains("AgentReply"));
        assert!(record.is_usable());
    }

    #[test]
    fn test_inactive_or_modelless_is_not_usable() {
        assert!(!AgentRecord::new("a1", AgentRole::Quoter, "gpt-4o").inactive().is_usable());
        assert!(!AgentRecord::new("a1", AgentRole::Quoter, "  ").is_usable());
    }

    #[test]
    fn test_deserialize_resolves_free_form_role() {
        let json = r#"{"id": "7", "name": "Vendas", "role": "Agente Comercial", "model": "gpt-4o"}"#;
        let record: AgentRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.role, AgentRole::Commercial);
        assert!(record.active);
        assert!(record.knowledge_collection.is_none());
    }

    #[test]
    fn test_deserialize_rejects_unknown_role() {
        let json = r#"{"id": "7", "name": "X", "role": "financeiro"}"#;
        let err = serde_json::from_str::<AgentRecord>(json).unwrap_err();
        assert!(err.to_string().contains("unknown agent role"));
    }

    #[test]
    fn test_routing_policy_defaults() {
        let policy = RoutingPolicy::default();
        assert_eq!(policy.min_route_confidence, 0.0);
        assert_eq!(policy.clarify_below_confidence, 0.6);
    }
}
