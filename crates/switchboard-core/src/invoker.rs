//! Agent invoker: the single boundary between a run and the model provider

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use crate::agents::{AgentRecord, AgentRole};
use crate::context::AgentContext;
use crate::error::{AgentInvocationError, InvocationFailure};
use crate::interaction_log::{InteractionLog, LlmInteraction};
use crate::knowledge::{
    DEFAULT_KNOWLEDGE_MAX_CHARS, DEFAULT_KNOWLEDGE_TOP_K, KnowledgeSearch, KnowledgeSnippet,
    format_knowledge_context,
};
use crate::providers::{ChatRequest, ChatResponse, ModelProvider};
use crate::usage::TokenUsage;

const PERSONA_HEADER: &str = "=== INSTRUÇÕES GLOBAIS (PERSONA) ===";
const AGENT_HEADER: &str = "=== INSTRUÇÕES DO AGENTE ===";
const CONTEXT_HEADER: &str = "=== CONTEXTO DA SESSÃO ===";
const KNOWLEDGE_HEADER: &str = "=== CONTEXTO RAG ===";

/// Invoker settings
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    /// Deadline for one provider call, on top of the HTTP client's own timeouts
    pub request_timeout: Duration,
    pub max_tokens: Option<u32>,
    pub knowledge_top_k: usize,
    pub knowledge_max_chars: usize,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            max_tokens: None,
            knowledge_top_k: DEFAULT_KNOWLEDGE_TOP_K,
            knowledge_max_chars: DEFAULT_KNOWLEDGE_MAX_CHARS,
        }
    }
}

/// Outcome of the knowledge lookup for one invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum KnowledgeStatus {
    NotConfigured,
    NoSearchBackend,
    NoResults,
    Found,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeTrace {
    pub collection: Option<String>,
    pub status: KnowledgeStatus,
    pub top_k: usize,
    pub snippets: Vec<KnowledgeSnippet>,
}

impl KnowledgeTrace {
    fn skipped(collection: Option<String>, status: KnowledgeStatus) -> Self {
        Self {
            collection,
            status,
            top_k: 0,
            snippets: Vec::new(),
        }
    }
}

/// A successful agent call
#[derive(Debug, Clone, Serialize)]
pub struct Invocation {
    pub agent_id: String,
    pub agent_name: String,
    pub role: AgentRole,
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub raw: String,
    pub usage: Option<TokenUsage>,
    pub knowledge: KnowledgeTrace,
    pub elapsed_ms: u64,
}

/// Runs one agent record against the provider
pub struct AgentInvoker {
    provider: Arc<dyn ModelProvider>,
    log: Arc<dyn InteractionLog>,
    knowledge: Option<Arc<dyn KnowledgeSearch>>,
    config: InvokerConfig,
}

impl AgentInvoker {
    pub fn new(provider: Arc<dyn ModelProvider>, log: Arc<dyn InteractionLog>) -> Self {
        Self {
            provider,
            log,
            knowledge: None,
            config: InvokerConfig::default(),
        }
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeSearch>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn with_config(mut self, config: InvokerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    /// Call `record` once.
    ///
    /// The interaction is logged exactly once, after the provider call
    /// resolved or its deadline fired, even if the caller stops waiting.
    /// Never retries.
    pub async fn invoke(
        &self,
        record: &AgentRecord,
        persona: Option<&str>,
        user_message: &str,
        context: &AgentContext,
    ) -> Result<Invocation, AgentInvocationError> {
        let started = Instant::now();
        let model = record.model.trim();

        let (knowledge_text, knowledge) = self.knowledge_context(record, user_message).await;
        let system_prompt = compose_system_prompt(persona, record, context, &knowledge_text);

        if model.is_empty() {
            let err = AgentInvocationError::new(
                &record.name,
                InvocationFailure::ModelNotConfigured,
                "agent has no model id",
            );
            self.log_failure(record, &system_prompt, user_message, &err);
            return Err(err);
        }

        let mut request = ChatRequest::new(model, system_prompt.clone()).with_user(user_message);
        if record.role.contract().is_structured() {
            request = request.json();
        }
        if let Some(max_tokens) = self.config.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        debug!(
            "Invoking agent '{}' ({}) with model {} via {}",
            record.name,
            record.role,
            model,
            self.provider.provider_name()
        );

        // Spawned so a run abandoned mid-call still lets the call finish and be logged
        let call = tokio::spawn(call_and_log(
            Arc::clone(&self.provider),
            Arc::clone(&self.log),
            request,
            record.name.clone(),
            user_message.to_string(),
            self.config.request_timeout,
        ));
        let response = match call.await {
            Ok(response) => response,
            Err(join_err) => {
                let err = AgentInvocationError::new(
                    &record.name,
                    InvocationFailure::Provider,
                    format!("provider task aborted: {}", join_err),
                );
                self.log_failure(record, &system_prompt, user_message, &err);
                Err(err)
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let response = response.inspect_err(|err| warn!("{}", err))?;
        debug!(
            "Agent '{}' answered in {}ms ({} chars)",
            record.name,
            elapsed_ms,
            response.text.len()
        );
        Ok(Invocation {
            agent_id: record.id.clone(),
            agent_name: record.name.clone(),
            role: record.role,
            model: model.to_string(),
            system_prompt,
            user_prompt: user_message.to_string(),
            raw: response.text.trim().to_string(),
            usage: response.usage,
            knowledge,
            elapsed_ms,
        })
    }

    fn log_failure(
        &self,
        record: &AgentRecord,
        system_prompt: &str,
        user_message: &str,
        err: &AgentInvocationError,
    ) {
        self.log.record_interaction(&LlmInteraction {
            timestamp: Utc::now(),
            agent_name: record.name.clone(),
            model: record.model.clone(),
            system_prompt: system_prompt.to_string(),
            user_prompt: user_message.to_string(),
            response: None,
            error: Some(format!("{}: {}", err.kind, err.cause)),
            usage: None,
        });
    }

    /// Knowledge block for the prompt plus what happened while fetching it.
    /// A failed search degrades to no knowledge rather than failing the call.
    async fn knowledge_context(&self, record: &AgentRecord, query: &str) -> (String, KnowledgeTrace) {
        let Some(collection) = record
            .knowledge_collection
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
        else {
            return (String::new(), KnowledgeTrace::skipped(None, KnowledgeStatus::NotConfigured));
        };
        let Some(search) = &self.knowledge else {
            return (
                String::new(),
                KnowledgeTrace::skipped(Some(collection.to_string()), KnowledgeStatus::NoSearchBackend),
            );
        };

        let top_k = self.config.knowledge_top_k;
        match search.search(collection, query, top_k).await {
            Ok(snippets) => {
                let status = if snippets.is_empty() {
                    KnowledgeStatus::NoResults
                } else {
                    KnowledgeStatus::Found
                };
                let text = format_knowledge_context(&snippets, self.config.knowledge_max_chars);
                (
                    text,
                    KnowledgeTrace {
                        collection: Some(collection.to_string()),
                        status,
                        top_k,
                        snippets,
                    },
                )
            }
            Err(e) => {
                warn!("Knowledge search in '{}' failed: {:#}", collection, e);
                (
                    String::new(),
                    KnowledgeTrace::skipped(
                        Some(collection.to_string()),
                        KnowledgeStatus::Failed(e.to_string()),
                    ),
                )
            }
        }
    }
}

/// Persona first, then the agent's own prompt, the session context, and
/// retrieved knowledge. Empty sections are left out.
pub fn compose_system_prompt(
    persona: Option<&str>,
    record: &AgentRecord,
    context: &AgentContext,
    knowledge: &str,
) -> String {
    let mut parts = Vec::with_capacity(4);
    if let Some(persona) = persona.map(str::trim).filter(|p| !p.is_empty()) {
        parts.push(format!("{}\n{}", PERSONA_HEADER, persona));
    }
    let agent_prompt = record.system_prompt.trim();
    if !agent_prompt.is_empty() {
        parts.push(format!("{}\n{}", AGENT_HEADER, agent_prompt));
    }
    parts.push(format!("{}\n{}", CONTEXT_HEADER, context.render()));
    if !knowledge.trim().is_empty() {
        parts.push(format!("{}\n{}", KNOWLEDGE_HEADER, knowledge));
    }
    parts.join("\n\n")
}

/// One provider call under `deadline`, classified and logged exactly once.
async fn call_and_log(
    provider: Arc<dyn ModelProvider>,
    log: Arc<dyn InteractionLog>,
    request: ChatRequest,
    agent_name: String,
    user_prompt: String,
    deadline: Duration,
) -> Result<ChatResponse, AgentInvocationError> {
    let outcome = tokio::time::timeout(deadline, provider.chat(&request)).await;

    let response = match outcome {
        Err(_) => Err(AgentInvocationError::new(
            &agent_name,
            InvocationFailure::Timeout,
            format!("no response within {:?}", deadline),
        )),
        Ok(Err(e)) => {
            let cause = format!("{:#}", e);
            let kind = if looks_like_timeout(&cause) {
                InvocationFailure::Timeout
            } else {
                InvocationFailure::Provider
            };
            Err(AgentInvocationError::new(&agent_name, kind, cause))
        }
        Ok(Ok(response)) if response.text.trim().is_empty() => Err(AgentInvocationError::new(
            &agent_name,
            InvocationFailure::EmptyResponse,
            format!("finish reason {:?}", response.finish_reason),
        )),
        Ok(Ok(response)) => Ok(response),
    };

    let (text, error, usage) = match &response {
        Ok(r) => (Some(r.text.clone()), None, r.usage),
        Err(err) => (None, Some(format!("{}: {}", err.kind, err.cause)), None),
    };
    log.record_interaction(&LlmInteraction {
        timestamp: Utc::now(),
        agent_name,
        model: request.model,
        system_prompt: request.system,
        user_prompt,
        response: text,
        error,
        usage,
    });
    response
}

fn looks_like_timeout(cause: &str) -> bool {
    let lower = cause.to_lowercase();
    lower.contains("timed out") || lower.contains("timeout")
}
