//! Interaction log — one record per model call plus structured run events
//!
//! Writing a log entry never fails a run: sinks report their own I/O errors
//! through `tracing` and carry on.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::usage::TokenUsage;

pub const LLM_HISTORY_FILE: &str = "llm_history.log";
pub const RUN_LOG_DIR: &str = "debug_runs";

/// One resolved model call, successful or not
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmInteraction {
    pub timestamp: DateTime<Utc>,
    pub agent_name: String,
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    /// Raw model output, absent when the call failed
    pub response: Option<String>,
    pub error: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl LlmInteraction {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A structured event inside one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: Uuid,
    pub run_started_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub data: Value,
}

pub trait InteractionLog: Send + Sync {
    /// Called exactly once per invocation, after the provider call resolved
    fn record_interaction(&self, interaction: &LlmInteraction);

    fn record_event(&self, _event: &RunEvent) {}
}

/// Logs through `tracing` only
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingInteractionLog;

impl InteractionLog for TracingInteractionLog {
    fn record_interaction(&self, interaction: &LlmInteraction) {
        match (&interaction.response, &interaction.error) {
            (_, Some(error)) => warn!(
                "LLM call failed: agent='{}' model={} error={}",
                interaction.agent_name, interaction.model, error
            ),
            (Some(response), None) => debug!(
                "LLM call: agent='{}' model={} response_chars={} usage={}",
                interaction.agent_name,
                interaction.model,
                response.chars().count(),
                interaction.usage.unwrap_or_default()
            ),
            (None, None) => debug!(
                "LLM call: agent='{}' model={} (no response)",
                interaction.agent_name, interaction.model
            ),
        }
    }

    fn record_event(&self, event: &RunEvent) {
        debug!("run {} event {}: {}", event.run_id, event.event, event.data);
    }
}

/// Appends to `llm_history.log` and, when enabled, one JSONL file per run
#[derive(Debug, Clone)]
pub struct FileInteractionLog {
    dir: PathBuf,
    run_logs: bool,
}

impl FileInteractionLog {
    pub fn new(dir: impl Into<PathBuf>, run_logs: bool) -> Self {
        Self {
            dir: dir.into(),
            run_logs,
        }
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(LLM_HISTORY_FILE)
    }

    /// `debug_runs/debug_<YYYYmmdd_HHMMSS>_<run>.jsonl`
    pub fn run_log_path(&self, run_id: &Uuid, started_at: &DateTime<Utc>) -> PathBuf {
        let stamp = started_at.with_timezone(&Local).format("%Y%m%d_%H%M%S");
        let short = run_id.simple().to_string();
        self.dir
            .join(RUN_LOG_DIR)
            .join(format!("debug_{}_{}.jsonl", stamp, &short[..8]))
    }

    fn append(path: &Path, text: &str) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(text.as_bytes())
    }
}

/// Human-readable history entry
pub fn format_history_entry(interaction: &LlmInteraction) -> String {
    let divider = "-".repeat(80);
    let timestamp = interaction
        .timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S");
    let agent = if interaction.agent_name.is_empty() {
        "Unknown"
    } else {
        &interaction.agent_name
    };
    let response = match (&interaction.response, &interaction.error) {
        (_, Some(error)) => format!("[ERRO] {}", error),
        (Some(text), None) => text.clone(),
        (None, None) => String::new(),
    };
    let usage = interaction
        .usage
        .map(|u| format!("\n(Tokens: {})", u))
        .unwrap_or_default();

    format!(
        "\n{divider}\n[{timestamp}]\nAGENT: {agent}\nMODEL: {model}\n\n\
         >>> SYSTEM PROMPT:\n{system}\n\n>>> USER PROMPT:\n{user}\n\n\
         <<< RESPONSE:\n{response}\n{usage}\n{divider}\n",
        model = interaction.model,
        system = interaction.system_prompt,
        user = interaction.user_prompt,
    )
}

impl InteractionLog for FileInteractionLog {
    fn record_interaction(&self, interaction: &LlmInteraction) {
        let path = self.history_path();
        if let Err(e) = Self::append(&path, &format_history_entry(interaction)) {
            warn!("Failed to write {}: {}", path.display(), e);
        }
    }

    fn record_event(&self, event: &RunEvent) {
        if !self.run_logs {
            return;
        }
        let path = self.run_log_path(&event.run_id, &event.run_started_at);
        let line = serde_json::json!({
            "timestamp": event.timestamp.to_rfc3339(),
            "event": event.event,
            "data": event.data,
        });
        if let Err(e) = Self::append(&path, &format!("{}\n", line)) {
            warn!("Failed to write run log {}: {}", path.display(), e);
        }
    }
}

/// Keeps everything in memory; used by tests and the simulator report
#[derive(Debug, Default)]
pub struct MemoryInteractionLog {
    interactions: Mutex<Vec<LlmInteraction>>,
    events: Mutex<Vec<RunEvent>>,
}

impl MemoryInteractionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interactions(&self) -> Vec<LlmInteraction> {
        self.interactions
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl InteractionLog for MemoryInteractionLog {
    fn record_interaction(&self, interaction: &LlmInteraction) {
        if let Ok(mut v) = self.interactions.lock() {
            v.push(interaction.clone());
        }
    }

    fn record_event(&self, event: &RunEvent) {
        if let Ok(mut v) = self.events.lock() {
            v.push(event.clone());
        }
    }
}
