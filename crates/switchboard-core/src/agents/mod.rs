//! Agent definitions: roles, persisted records and compiled bot rosters

pub mod record;
pub mod role;
pub mod roster;
pub mod store;

pub use record::{AgentRecord, BotRecord, RoutingPolicy};
pub use role::{AgentRole, OutputContract, RoleProfile, refers_to_human, resolve_role_label};
pub use roster::{BotRoster, RosterCache};
pub use store::{AgentStore, BotLinks, InMemoryAgentStore};
