//! Compiled bot rosters, the role → agent mapping a run dispatches on

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use tracing::{debug, info, warn};

use super::record::{AgentRecord, BotRecord, RoutingPolicy};
use super::role::AgentRole;
use super::store::AgentStore;

/// A bot with its agents resolved by role. Immutable once built.
#[derive(Debug, Clone)]
pub struct BotRoster {
    bot: BotRecord,
    triage: Option<AgentRecord>,
    coordinator: Option<AgentRecord>,
    by_role: HashMap<AgentRole, AgentRecord>,
    linked: Vec<AgentRecord>,
}

impl BotRoster {
    /// Build a roster from already-fetched records.
    ///
    /// Inactive or model-less agents are kept in the linked list but never
    /// dispatched to. When two usable agents share a role the first link wins.
    pub fn from_parts(
        bot: BotRecord,
        triage: Option<AgentRecord>,
        coordinator: Option<AgentRecord>,
        linked: Vec<AgentRecord>,
    ) -> Self {
        let mut by_role = HashMap::new();
        for agent in linked.iter().filter(|a| a.is_usable()) {
            by_role.entry(agent.role).or_insert_with(|| agent.clone());
        }

        let triage = triage
            .or_else(|| by_role.get(&AgentRole::Triage).cloned())
            .filter(|a| a.is_usable());
        let coordinator = coordinator
            .or_else(|| by_role.get(&AgentRole::Coordinator).cloned())
            .filter(|a| a.is_usable());

        if triage.is_none() {
            warn!("Bot '{}' has no usable triage agent", bot.id);
        }

        Self {
            bot,
            triage,
            coordinator,
            by_role,
            linked,
        }
    }

    /// Fetch everything a run needs for `bot_id` from the store
    pub async fn load(store: &dyn AgentStore, bot_id: &str) -> Result<Self> {
        let bot = store
            .get_bot(bot_id)
            .await?
            .ok_or_else(|| anyhow!("Bot '{}' not found", bot_id))?;
        let linked = store.list_linked_agents(bot_id).await?;
        let triage = store.get_default_triage_agent(bot_id).await?;
        let coordinator = store.get_coordinator_agent(bot_id).await?;

        let roster = Self::from_parts(bot, triage, coordinator, linked);
        info!(
            "Loaded roster for bot '{}' ({} linked agents, {} usable roles)",
            roster.bot.id,
            roster.linked.len(),
            roster.by_role.len()
        );
        Ok(roster)
    }

    pub fn bot(&self) -> &BotRecord {
        &self.bot
    }

    pub fn persona(&self) -> Option<&str> {
        self.bot
            .persona
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.bot.policy
    }

    pub fn triage(&self) -> Option<&AgentRecord> {
        self.triage.as_ref()
    }

    pub fn coordinator(&self) -> Option<&AgentRecord> {
        self.coordinator.as_ref()
    }

    /// Usable agent for `role`, if the bot links one
    pub fn agent_for(&self, role: AgentRole) -> Option<&AgentRecord> {
        match role {
            AgentRole::Triage => self.triage(),
            AgentRole::Coordinator => self.coordinator(),
            other => self.by_role.get(&other),
        }
    }

    pub fn linked(&self) -> &[AgentRecord] {
        &self.linked
    }
}

/// Process-wide cache of compiled rosters.
///
/// Filled once at startup and only read afterwards, so it is shared as a plain
/// `Arc` without locking.
#[derive(Debug, Default)]
pub struct RosterCache {
    rosters: HashMap<String, Arc<BotRoster>>,
}

impl RosterCache {
    pub async fn load(store: &dyn AgentStore, bot_ids: &[&str]) -> Result<Self> {
        let mut rosters = HashMap::new();
        for bot_id in bot_ids {
            let roster = BotRoster::load(store, bot_id).await?;
            rosters.insert(bot_id.to_string(), Arc::new(roster));
        }
        debug!("Roster cache holds {} bots", rosters.len());
        Ok(Self { rosters })
    }

    pub fn get(&self, bot_id: &str) -> Option<Arc<BotRoster>> {
        self.rosters.get(bot_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rosters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rosters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::store::{BotLinks, InMemoryAgentStore};

    #[test]
    fn test_first_usable_agent_wins_per_role() {
        let linked = vec![
            AgentRecord::new("q0", AgentRole::Quoter, "gpt-4o").inactive(),
            AgentRecord::new("q1", AgentRole::Quoter, "gpt-4o"),
            AgentRecord::new("q2", AgentRole::Quoter, "gpt-4o"),
        ];
        let roster = BotRoster::from_parts(BotRecord::new("b", "Bot"), None, None, linked);
        assert_eq!(roster.agent_for(AgentRole::Quoter).unwrap().id, "q1");
        assert!(roster.agent_for(AgentRole::Commercial).is_none());
        assert_eq!(roster.linked().len(), 3);
    }

    #[test]
    fn test_inactive_triage_is_dropped() {
        let triage = AgentRecord::new("t", AgentRole::Triage, "gpt-4o").inactive();
        let roster = BotRoster::from_parts(BotRecord::new("b", "Bot"), Some(triage), None, vec![]);
        assert!(roster.triage().is_none());
    }

    #[test]
    fn test_blank_persona_is_ignored() {
        let bot = BotRecord::new("b", "Bot").with_persona("   ");
        let roster = BotRoster::from_parts(bot, None, None, vec![]);
        assert!(roster.persona().is_none());
    }

    #[tokio::test]
    async fn test_cache_loads_from_store() {
        let mut store = InMemoryAgentStore::new();
        store.insert_agent(AgentRecord::new("t", AgentRole::Triage, "gpt-4o-mini"));
        store.insert_bot(BotLinks {
            bot: BotRecord::new("b", "Bot").with_persona("Seja cordial."),
            triage_agent: Some("t".into()),
            coordinator_agent: None,
            linked_agents: vec![],
        });

        let cache = RosterCache::load(&store, &["b"]).await.unwrap();
        assert_eq!(cache.len(), 1);
        let roster = cache.get("b").unwrap();
        assert_eq!(roster.triage().unwrap().id, "t");
        assert_eq!(roster.persona(), Some("Seja cordial."));
        assert!(cache.get("other").is_none());
    }

    #[tokio::test]
    async fn test_load_unknown_bot_fails() {
        let store = InMemoryAgentStore::new();
        let err = BotRoster::load(&store, "ghost").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
