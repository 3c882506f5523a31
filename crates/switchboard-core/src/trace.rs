//! Per-run debug trace
//!
//! Owned by a single run. Every invocation lands here in order, whether it
//! parsed, failed to parse, or never produced output.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::agents::AgentRole;
use crate::invoker::{Invocation, KnowledgeStatus};
use crate::usage::{TokenUsage, accumulate};

/// States of the orchestration state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Start,
    Triage,
    Specialist(AgentRole),
    Coordinator,
    HumanHandoff,
    SafetyStop,
    Done,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SafetyStop | Self::Done)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "START"),
            Self::Triage => write!(f, "TRIAGE"),
            Self::Specialist(role) => write!(f, "SPECIALIST({})", role),
            Self::Coordinator => write!(f, "COORDINATOR"),
            Self::HumanHandoff => write!(f, "HUMAN_HANDOFF"),
            Self::SafetyStop => write!(f, "SAFETY_STOP"),
            Self::Done => write!(f, "DONE"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub from: RunState,
    pub to: RunState,
    pub reason: String,
}

/// What one invocation produced
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryOutcome {
    Parsed { value: Value },
    ParseError { reason: String },
    /// Plain-text roles have nothing to parse
    Text,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub role: AgentRole,
    pub agent_name: String,
    pub model: String,
    pub raw_output: Option<String>,
    pub outcome: EntryOutcome,
    pub usage: Option<TokenUsage>,
    pub knowledge: Option<KnowledgeStatus>,
}

impl TraceEntry {
    pub fn is_failure(&self) -> bool {
        matches!(
            self.outcome,
            EntryOutcome::Failed { .. } | EntryOutcome::ParseError { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunTrace {
    pub run_id: Uuid,
    pub bot_id: String,
    pub started_at: DateTime<Utc>,
    pub entries: Vec<TraceEntry>,
    pub transitions: Vec<Transition>,
    pub usage_total: TokenUsage,
}

impl RunTrace {
    pub fn new(bot_id: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            bot_id: bot_id.into(),
            started_at: Utc::now(),
            entries: Vec::new(),
            transitions: Vec::new(),
            usage_total: TokenUsage::default(),
        }
    }

    /// Record a completed call and fold its usage into the total
    pub fn record(&mut self, invocation: &Invocation, outcome: EntryOutcome) {
        self.usage_total = accumulate(self.usage_total, invocation.usage.as_ref());
        self.entries.push(TraceEntry {
            role: invocation.role,
            agent_name: invocation.agent_name.clone(),
            model: invocation.model.clone(),
            raw_output: Some(invocation.raw.clone()),
            outcome,
            usage: invocation.usage,
            knowledge: Some(invocation.knowledge.status.clone()),
        });
    }

    /// Record output that failed its contract; tokens were still spent
    pub fn record_unparsed(
        &mut self,
        role: AgentRole,
        agent_name: &str,
        model: &str,
        raw: &str,
        usage: Option<TokenUsage>,
        reason: String,
    ) {
        self.usage_total = accumulate(self.usage_total, usage.as_ref());
        self.entries.push(TraceEntry {
            role,
            agent_name: agent_name.to_string(),
            model: model.to_string(),
            raw_output: Some(raw.to_string()),
            outcome: EntryOutcome::ParseError { reason },
            usage,
            knowledge: None,
        });
    }

    /// Record a call that produced no output
    pub fn record_failure(&mut self, role: AgentRole, agent_name: &str, model: &str, reason: String) {
        self.entries.push(TraceEntry {
            role,
            agent_name: agent_name.to_string(),
            model: model.to_string(),
            raw_output: None,
            outcome: EntryOutcome::Failed { reason },
            usage: None,
            knowledge: None,
        });
    }

    pub fn transition(&mut self, from: RunState, to: RunState, reason: impl Into<String>) {
        self.transitions.push(Transition {
            from,
            to,
            reason: reason.into(),
        });
    }

    /// Latest state, `Start` before any transition
    pub fn state(&self) -> RunState {
        self.transitions.last().map_or(RunState::Start, |t| t.to)
    }

    pub fn invocation_count(&self) -> usize {
        self.entries.len()
    }

    pub fn failure_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_failure()).count()
    }

    /// States visited, starting at `Start`
    pub fn path(&self) -> Vec<RunState> {
        std::iter::once(RunState::Start)
            .chain(self.transitions.iter().map(|t| t.to))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(RunState::Specialist(AgentRole::Quoter).to_string(), "SPECIALIST(cotador)");
        assert_eq!(RunState::SafetyStop.to_string(), "SAFETY_STOP");
        assert!(RunState::Done.is_terminal());
        assert!(!RunState::HumanHandoff.is_terminal());
    }

    #[test]
    fn test_trace_accumulates_usage_and_failures() {
        let mut trace = RunTrace::new("loja");
        trace.record_unparsed(
            AgentRole::Triage,
            "Agente Triagem",
            "gpt-4o-mini",
            "???",
            Some(TokenUsage::new(50, 5)),
            "no JSON object found".to_string(),
        );
        trace.record_failure(
            AgentRole::Coordinator,
            "Agente Coordenador",
            "gpt-4o",
            "timeout".to_string(),
        );
        assert_eq!(trace.invocation_count(), 2);
        assert_eq!(trace.failure_count(), 2);
        assert_eq!(trace.usage_total.total_tokens, 55);
        assert_eq!(trace.usage_total.calls, 1);
    }

    #[test]
    fn test_path_and_state() {
        let mut trace = RunTrace::new("loja");
        assert_eq!(trace.state(), RunState::Start);
        trace.transition(RunState::Start, RunState::Triage, "inicio");
        trace.transition(RunState::Triage, RunState::Coordinator, "indefinido");
        assert_eq!(trace.state(), RunState::Coordinator);
        assert_eq!(
            trace.path(),
            vec![RunState::Start, RunState::Triage, RunState::Coordinator]
        );
    }

    #[test]
    fn test_trace_serializes() {
        let mut trace = RunTrace::new("loja");
        trace.transition(RunState::Start, RunState::Specialist(AgentRole::Quoter), "x");
        let value = serde_json::to_value(&trace).unwrap();
        assert_eq!(value["transitions"][0]["to"]["state"], "SPECIALIST");
        assert_eq!(value["transitions"][0]["to"]["role"], "cotador");
    }
}
