//! Scripted providers and fixtures shared by the flow tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::agents::{AgentRecord, AgentRole, BotRecord, BotRoster};
use crate::context::{AgentContext, ContextBuilder, InboundMessage};
use crate::providers::{ChatRequest, ChatResponse, FinishReason, ModelProvider};
use crate::usage::TokenUsage;

pub enum Step {
    Reply(String),
    Fail(String),
    /// Never resolves; the caller's deadline has to fire
    Hang,
    /// Replies after a pause
    Delay(Duration, String),
}

pub fn reply(text: impl Into<String>) -> Step {
    Step::Reply(text.into())
}

pub fn fail(error: impl Into<String>) -> Step {
    Step::Fail(error.into())
}

/// Answers from a per-model queue so each agent gets its own script
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, model: &str, step: Step) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.entry(model.to_string()).or_default().push_back(step);
        }
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<ChatRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, model: &str) -> usize {
        self.calls().iter().filter(|r| r.model == model).count()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.calls.lock().unwrap().push(request.clone());
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.model)
            .and_then(VecDeque::pop_front);

        match step {
            Some(Step::Reply(text)) => Ok(ChatResponse {
                text,
                finish_reason: FinishReason::Stop,
                usage: Some(TokenUsage::new(100, 20)),
            }),
            Some(Step::Fail(error)) => Err(anyhow!("{}", error)),
            Some(Step::Hang) => std::future::pending::<Result<ChatResponse>>().await,
            Some(Step::Delay(pause, text)) => {
                tokio::time::sleep(pause).await;
                Ok(ChatResponse {
                    text,
                    finish_reason: FinishReason::Stop,
                    usage: Some(TokenUsage::new(100, 20)),
                })
            }
            None => Err(anyhow!("no scripted reply left for model {}", request.model)),
        }
    }
}

/// Agent whose model id is its role label, so scripts can be keyed by role
pub fn agent(role: AgentRole) -> AgentRecord {
    AgentRecord::new(format!("{}-id", role.label()), role, role.label())
}

/// Roster linking the given roles; triage and coordinator are picked up by role
pub fn roster(roles: &[AgentRole]) -> BotRoster {
    let bot = BotRecord::new("loja", "Loja de Pneus").with_persona("Seja cordial e objetivo.");
    let linked = roles.iter().map(|r| agent(*r)).collect();
    BotRoster::from_parts(bot, None, None, linked)
}

pub fn context(message: &str) -> AgentContext {
    ContextBuilder::new()
        .build(InboundMessage::text(message).on_channel("whatsapp", "webhook"))
        .unwrap()
}
