use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use switchboard_core::agents::resolve_role_label;
use switchboard_core::providers::{HttpTimeouts, ModelProvider};
use switchboard_core::{
    AgentInvoker, AgentRecord, AgentRole, BotLinks, BotRecord, FileInteractionLog,
    InMemoryAgentStore, InteractionLog, InvokerConfig, MarkdownKnowledgeBase, ModelRouter,
    OpenAiCompatProvider, OpenAiProvider, Orchestrator, OrchestratorConfig, RoutingPolicy,
    TracingInteractionLog,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchboardConfig {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
    #[serde(default)]
    pub bots: Vec<BotEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub openai: Option<OpenAiProviderConfig>,
    #[serde(default)]
    pub openai_compat: Option<OpenAiCompatProviderConfig>,
    #[serde(default)]
    pub failover_order: Vec<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Attempts per provider before failing over
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_request_timeout() -> u64 {
    60
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_max_retries() -> u32 {
    1
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

impl std::fmt::Debug for OpenAiProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProviderConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OpenAiCompatProviderConfig {
    #[serde(default = "default_compat_name")]
    pub name: String,
    #[serde(default)]
    pub api_key: String,
    pub base_url: String,
}

impl std::fmt::Debug for OpenAiCompatProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProviderConfig")
            .field("name", &self.name)
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn default_compat_name() -> String {
    "openai_compat".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_max_automated_turns")]
    pub max_automated_turns: u32,
    /// Default routing floor for bots that set none
    #[serde(default)]
    pub min_route_confidence: f32,
    #[serde(default = "default_clarify_below")]
    pub clarify_below_confidence: f32,
}

fn default_max_automated_turns() -> u32 {
    switchboard_core::orchestrator::DEFAULT_MAX_AUTOMATED_TURNS
}
fn default_clarify_below() -> f32 {
    RoutingPolicy::default().clarify_below_confidence
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_automated_turns: default_max_automated_turns(),
            min_route_confidence: 0.0,
            clarify_below_confidence: default_clarify_below(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for `llm_history.log`; unset logs through tracing only
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub run_logs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

fn default_top_k() -> usize {
    switchboard_core::knowledge::DEFAULT_KNOWLEDGE_TOP_K
}
fn default_max_chars() -> usize {
    switchboard_core::knowledge::DEFAULT_KNOWLEDGE_MAX_CHARS
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            dir: None,
            top_k: default_top_k(),
            max_chars: default_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Falls back to the role's built-in prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub knowledge_collection: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl AgentEntry {
    pub fn to_record(&self) -> Result<AgentRecord> {
        let role = resolve_role_label(&self.role)
            .ok_or_else(|| anyhow!("Agent '{}' has unknown role '{}'", self.id, self.role))?;
        let mut record = AgentRecord::new(&self.id, role, &self.model);
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            record = record.with_name(name);
        }
        if let Some(prompt) = self.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            record = record.with_prompt(prompt);
        }
        if let Some(collection) = &self.knowledge_collection {
            record = record.with_knowledge(collection);
        }
        if !self.active {
            record = record.inactive();
        }
        Ok(record)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub triage_agent: Option<String>,
    #[serde(default)]
    pub coordinator_agent: Option<String>,
    #[serde(default)]
    pub linked_agents: Vec<String>,
    #[serde(default)]
    pub min_route_confidence: Option<f32>,
    #[serde(default)]
    pub clarify_below_confidence: Option<f32>,
}

/// Mask a secret string for safe display in Debug output / logs.
/// Shows first 3 and last 4 chars for keys longer than 7 chars, otherwise "***".
fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".switchboard")
}

impl SwitchboardConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(&path) {
                let mode = metadata.permissions().mode();
                // Refuse to start if group or other can read
                if mode & 0o077 != 0 {
                    return Err(anyhow!(
                        "Config file {:?} has overly permissive permissions ({:o}). \
                         It may contain secrets. Fix with: chmod 600 {:?}",
                        path,
                        mode & 0o777,
                        path
                    ));
                }
            }
        }

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `switchboard init` first.",
                path.display()
            )
        })?;

        let config = Self::parse(&expand_env_vars(&content))
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;

        if let Some(openai) = &config.provider.openai {
            if openai.api_key.starts_with("sk-") {
                warn!(
                    "OpenAI API key is hardcoded in config file. For security, use environment variables: api_key = \"${{OPENAI_API_KEY}}\""
                );
            }
        }

        Ok(config)
    }

    /// Parse and validate an already expanded config
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.orchestrator.max_automated_turns == 0 {
            bail!("orchestrator.max_automated_turns must be at least 1");
        }
        for entry in &self.agents {
            entry.to_record()?;
        }
        for bot in &self.bots {
            for id in bot
                .linked_agents
                .iter()
                .chain(bot.triage_agent.iter())
                .chain(bot.coordinator_agent.iter())
            {
                if !self.agents.iter().any(|a| &a.id == id) {
                    bail!("Bot '{}' references unknown agent '{}'", bot.id, id);
                }
            }
        }
        Ok(())
    }

    pub fn build_store(&self) -> Result<InMemoryAgentStore> {
        let mut store = InMemoryAgentStore::new();
        for entry in &self.agents {
            store.insert_agent(entry.to_record()?);
        }
        for bot in &self.bots {
            let mut record = BotRecord::new(&bot.id, &bot.name);
            if let Some(persona) = &bot.persona {
                record = record.with_persona(persona);
            }
            record.policy = RoutingPolicy {
                min_route_confidence: bot
                    .min_route_confidence
                    .unwrap_or(self.orchestrator.min_route_confidence),
                clarify_below_confidence: bot
                    .clarify_below_confidence
                    .unwrap_or(self.orchestrator.clarify_below_confidence),
            };
            store.insert_bot(BotLinks {
                bot: record,
                triage_agent: bot.triage_agent.clone(),
                coordinator_agent: bot.coordinator_agent.clone(),
                linked_agents: bot.linked_agents.clone(),
            });
        }
        Ok(store)
    }

    fn timeouts(&self) -> HttpTimeouts {
        HttpTimeouts {
            connect: Duration::from_secs(self.provider.connect_timeout_secs),
            request: Duration::from_secs(self.provider.request_timeout_secs),
        }
    }

    /// Providers in failover order; without an explicit order every
    /// configured provider is used, OpenAI first
    pub fn build_router(&self) -> Result<ModelRouter> {
        let order: Vec<String> = if self.provider.failover_order.is_empty() {
            let mut names = Vec::new();
            if self.provider.openai.is_some() {
                names.push("openai".to_string());
            }
            if self.provider.openai_compat.is_some() {
                names.push("openai_compat".to_string());
            }
            names
        } else {
            self.provider.failover_order.clone()
        };

        let mut providers: Vec<Box<dyn ModelProvider>> = Vec::new();
        for name in &order {
            match name.as_str() {
                "openai" => {
                    let cfg = self
                        .provider
                        .openai
                        .as_ref()
                        .ok_or_else(|| anyhow!("failover_order names 'openai' but [provider.openai] is missing"))?;
                    if cfg.api_key.trim().is_empty() {
                        warn!("OpenAI API key is empty; requests will be rejected");
                    }
                    providers.push(Box::new(OpenAiProvider::new(
                        cfg.api_key.clone(),
                        cfg.base_url.clone(),
                        self.provider.max_tokens,
                        self.timeouts(),
                    )?));
                }
                "openai_compat" => {
                    let cfg = self.provider.openai_compat.as_ref().ok_or_else(|| {
                        anyhow!("failover_order names 'openai_compat' but [provider.openai_compat] is missing")
                    })?;
                    providers.push(Box::new(OpenAiCompatProvider::new(
                        cfg.name.clone(),
                        cfg.api_key.clone(),
                        cfg.base_url.clone(),
                        self.provider.max_tokens,
                        self.timeouts(),
                    )?));
                }
                other => bail!("Unknown provider '{}' in failover_order", other),
            }
        }

        let router = ModelRouter::with_failover(providers)
            .context("No model provider configured")?
            .with_max_retries(self.provider.max_retries);
        info!("Model router ready with {} provider(s)", router.provider_count());
        Ok(router)
    }

    pub fn build_log(&self) -> Arc<dyn InteractionLog> {
        match &self.logging.dir {
            Some(dir) => Arc::new(FileInteractionLog::new(shellexpand(dir), self.logging.run_logs)),
            None => Arc::new(TracingInteractionLog),
        }
    }

    pub fn build_orchestrator(&self) -> Result<Orchestrator> {
        let log = self.build_log();
        let mut invoker = AgentInvoker::new(Arc::new(self.build_router()?), log.clone()).with_config(
            InvokerConfig {
                request_timeout: Duration::from_secs(self.provider.request_timeout_secs),
                max_tokens: Some(self.provider.max_tokens),
                knowledge_top_k: self.knowledge.top_k,
                knowledge_max_chars: self.knowledge.max_chars,
            },
        );
        if let Some(dir) = &self.knowledge.dir {
            invoker = invoker.with_knowledge(Arc::new(MarkdownKnowledgeBase::new(shellexpand(dir))));
        }
        Ok(Orchestrator::new(invoker, log).with_config(OrchestratorConfig {
            max_automated_turns: self.orchestrator.max_automated_turns,
        }))
    }

    /// The agent playing the customer: `id` when given, else the first
    /// configured simulated-customer agent
    pub fn simulated_customer(&self, id: Option<&str>) -> Result<AgentRecord> {
        let entry = match id {
            Some(id) => self
                .agents
                .iter()
                .find(|a| a.id == id)
                .ok_or_else(|| anyhow!("Agent '{}' not found", id))?,
            None => self
                .agents
                .iter()
                .find(|a| resolve_role_label(&a.role) == Some(AgentRole::SimulatedCustomer))
                .ok_or_else(|| anyhow!("No simulated customer agent configured"))?,
        };
        entry.to_record()
    }
}

/// Allowlist of environment variable names that may be expanded in config files.
/// This prevents an attacker who can modify the config from reading arbitrary env vars.
const ALLOWED_ENV_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "CUSTOM_LLM_API_KEY",
    "SWITCHBOARD_HOME",
    "HOME",
    "USER",
];

fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            // Leave the ${VAR} unexpanded so it's obvious
            pos = abs_start + end + 1;
            continue;
        }

        let value = std::env::var(&var_name).unwrap_or_default();
        let value_len = value.len();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value_len;
    }
    result
}

/// Expand a leading `~/` in paths
pub fn shellexpand(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
