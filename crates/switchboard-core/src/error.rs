//! Error taxonomy for a conversation run
//!
//! Only [`InvalidContextError`] and [`FatalOrchestrationError`] ever reach the
//! caller of a run. Everything else is recovered inside the orchestrator and
//! shows up in the run trace instead.

use serde::Serialize;
use thiserror::Error;

use crate::usage::TokenUsage;

/// The inbound message could not be turned into an agent context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidContextError {
    #[error("message text is empty")]
    EmptyMessage,

    #[error("metadata key '{0}' is empty")]
    EmptyMetadataKey(String),
}

/// Why a single agent invocation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationFailure {
    /// The agent record has no model identifier
    ModelNotConfigured,
    /// The provider call exceeded the configured deadline
    Timeout,
    /// Transport, HTTP status, or rate-limit failure reported by the provider
    Provider,
    /// The provider answered with no text at all
    EmptyResponse,
}

impl std::fmt::Display for InvocationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModelNotConfigured => write!(f, "model_not_configured"),
            Self::Timeout => write!(f, "timeout"),
            Self::Provider => write!(f, "provider"),
            Self::EmptyResponse => write!(f, "empty_response"),
        }
    }
}

/// One agent call failed. Never retried by the invoker itself.
#[derive(Debug, Clone, Error)]
#[error("agent '{agent}' invocation failed ({kind}): {cause}")]
pub struct AgentInvocationError {
    pub agent: String,
    pub kind: InvocationFailure,
    pub cause: String,
}

impl AgentInvocationError {
    pub fn new(agent: impl Into<String>, kind: InvocationFailure, cause: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            kind,
            cause: cause.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == InvocationFailure::Timeout
    }
}

/// Triage output did not satisfy the `RouteDecision` contract.
#[derive(Debug, Clone, Error)]
#[error("agent '{agent}' returned an invalid route decision: {reason}")]
pub struct RouteParseError {
    pub agent: String,
    pub reason: String,
}

/// Output of a non-triage agent did not satisfy its contract.
#[derive(Debug, Clone, Error)]
#[error("agent '{agent}' output does not match the {contract} contract: {reason}")]
pub struct ContractError {
    pub agent: String,
    pub contract: &'static str,
    pub reason: String,
}

/// Everything that can go wrong in the triage step
#[derive(Debug, Clone, Error)]
pub enum TriageError {
    #[error(transparent)]
    Invocation(#[from] AgentInvocationError),

    /// The call succeeded, so its output and token usage are kept
    #[error("{source}")]
    Parse {
        source: RouteParseError,
        raw: String,
        usage: Option<TokenUsage>,
    },
}

/// The automated turn budget for the run is spent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("automated turn limit reached ({used} of {max})")]
pub struct SafetyLimitExceeded {
    pub used: u32,
    pub max: u32,
}

/// Every fallback path is exhausted. The caller gets this as an explicit failure.
#[derive(Debug, Clone, Error)]
#[error("bot '{bot}' cannot be orchestrated: {reason}")]
pub struct FatalOrchestrationError {
    pub bot: String,
    pub reason: String,
}

/// Errors returned by a run to its caller
#[derive(Debug, Clone, Error)]
pub enum OrchestrationError {
    #[error("invalid inbound message: {0}")]
    InvalidContext(#[from] InvalidContextError),

    #[error(transparent)]
    Fatal(#[from] FatalOrchestrationError),
}
