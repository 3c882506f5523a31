//! switchboard-core - multi-agent customer conversation routing
//!
//! This crate provides:
//! - Context building from inbound channel messages
//! - A single agent invoker over pluggable model providers with failover
//! - Triage routing, specialist replies, coordinator fallback and human handoff
//! - Reply sanitizing and token usage aggregation
//! - Per-run traces plus an interaction log (`llm_history.log`, JSONL run logs)
//! - A conversation simulator driving a simulated customer against a bot

pub mod agents;
pub mod context;
pub mod decision;
pub mod error;
pub mod interaction_log;
pub mod invoker;
pub mod knowledge;
pub mod orchestrator;
pub mod providers;
pub mod sanitize;
pub mod simulation;
pub mod trace;
pub mod triage;
pub mod usage;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use agents::{
    AgentRecord, AgentRole, AgentStore, BotLinks, BotRecord, BotRoster, InMemoryAgentStore,
    RosterCache, RoutingPolicy,
};
pub use context::{AgentContext, BusinessHours, ContextBuilder, InboundMessage};
pub use decision::{AgentReply, CoordinatorDecision, HandoffSummary, RouteDecision, RouteDestination};
pub use error::{
    AgentInvocationError, FatalOrchestrationError, InvalidContextError, OrchestrationError,
    RouteParseError, SafetyLimitExceeded, TriageError,
};
pub use interaction_log::{FileInteractionLog, InteractionLog, MemoryInteractionLog, TracingInteractionLog};
pub use invoker::{AgentInvoker, Invocation, InvokerConfig};
pub use knowledge::{KnowledgeSearch, KnowledgeSnippet, MarkdownKnowledgeBase};
pub use orchestrator::{OrchestrationReply, Orchestrator, OrchestratorConfig, RunOutcome};
pub use providers::{ModelProvider, ModelRouter, OpenAiCompatProvider, OpenAiProvider};
pub use sanitize::clean_reply_text;
pub use simulation::{ConversationSimulator, SimulationEnd, SimulationReport};
pub use trace::{RunState, RunTrace};
pub use triage::Router;
pub use usage::TokenUsage;
