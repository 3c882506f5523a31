//! Persistence boundary for agent and bot definitions
//!
//! The orchestration core never writes agent data. It reads records through
//! [`AgentStore`]; [`InMemoryAgentStore`] backs the CLI and the tests.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::record::{AgentRecord, BotRecord};
use super::role::AgentRole;

/// Read-only access to persisted agents and bots
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn get_bot(&self, bot_id: &str) -> Result<Option<BotRecord>>;

    async fn get_agent_record(&self, agent_id: &str) -> Result<Option<AgentRecord>>;

    /// All agents linked to a bot, in link order, active or not
    async fn list_linked_agents(&self, bot_id: &str) -> Result<Vec<AgentRecord>>;

    async fn get_default_triage_agent(&self, bot_id: &str) -> Result<Option<AgentRecord>>;

    async fn get_coordinator_agent(&self, bot_id: &str) -> Result<Option<AgentRecord>>;
}

/// How a bot is wired to its agents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotLinks {
    #[serde(flatten)]
    pub bot: BotRecord,
    #[serde(default)]
    pub triage_agent: Option<String>,
    #[serde(default)]
    pub coordinator_agent: Option<String>,
    #[serde(default)]
    pub linked_agents: Vec<String>,
}

/// Store that keeps everything in memory
#[derive(Debug, Default, Clone)]
pub struct InMemoryAgentStore {
    agents: HashMap<String, AgentRecord>,
    bots: HashMap<String, BotLinks>,
}

impl InMemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_agent(&mut self, agent: AgentRecord) {
        self.agents.insert(agent.id.clone(), agent);
    }

    pub fn insert_bot(&mut self, links: BotLinks) {
        self.bots.insert(links.bot.id.clone(), links);
    }

    pub fn bot_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.bots.keys().map(|k| k.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    fn linked(&self, bot_id: &str) -> Vec<AgentRecord> {
        self.bots
            .get(bot_id)
            .map(|links| {
                links
                    .linked_agents
                    .iter()
                    .filter_map(|id| self.agents.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Explicitly configured agent, else the first linked agent with `role`
    fn pick(&self, bot_id: &str, explicit: Option<&String>, role: AgentRole) -> Option<AgentRecord> {
        if let Some(agent) = explicit.and_then(|id| self.agents.get(id)) {
            return Some(agent.clone());
        }
        self.linked(bot_id).into_iter().find(|a| a.role == role)
    }
}

#[async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn get_bot(&self, bot_id: &str) -> Result<Option<BotRecord>> {
        Ok(self.bots.get(bot_id).map(|links| links.bot.clone()))
    }

    async fn get_agent_record(&self, agent_id: &str) -> Result<Option<AgentRecord>> {
        Ok(self.agents.get(agent_id).cloned())
    }

    async fn list_linked_agents(&self, bot_id: &str) -> Result<Vec<AgentRecord>> {
        Ok(self.linked(bot_id))
    }

    async fn get_default_triage_agent(&self, bot_id: &str) -> Result<Option<AgentRecord>> {
        let explicit = self.bots.get(bot_id).and_then(|l| l.triage_agent.as_ref());
        Ok(self.pick(bot_id, explicit, AgentRole::Triage))
    }

    async fn get_coordinator_agent(&self, bot_id: &str) -> Result<Option<AgentRecord>> {
        let explicit = self.bots.get(bot_id).and_then(|l| l.coordinator_agent.as_ref());
        Ok(self.pick(bot_id, explicit, AgentRole::Coordinator))
    }
}
