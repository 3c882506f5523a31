//! Conversation simulator
//!
//! Plays a simulated-customer agent against the orchestrator for one bot,
//! one exchange at a time, so a bot can be exercised end to end without a
//! real customer.

use serde::Serialize;
use tracing::{info, warn};

use crate::agents::{AgentRecord, BotRoster};
use crate::context::{AgentContext, ContextBuilder, InboundMessage};
use crate::decision::{DEFAULT_HANDOFF_MESSAGE, HandoffSummary, SAFETY_LIMIT_TAG};
use crate::error::OrchestrationError;
use crate::orchestrator::{Orchestrator, RunOutcome};
use crate::sanitize::clean_reply_text;
use crate::usage::{TokenUsage, accumulate};

pub const DEFAULT_MAX_EXCHANGES: u32 = 25;
pub const END_MARKER: &str = "[FIM]";

/// Messages of recent history shown to the simulated customer
const HISTORY_WINDOW: usize = 6;
const SIMULATOR_CHANNEL: &str = "simulador";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Customer,
    Bot,
}

impl Speaker {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Customer => "Cliente",
            Self::Bot => "Atendente",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulatedMessage {
    pub speaker: Speaker,
    pub text: String,
    /// Set on bot messages
    pub outcome: Option<RunOutcome>,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SimulationEnd {
    CustomerFinished,
    HandedOff,
    SafetyStop,
    CustomerFailed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub transcript: Vec<SimulatedMessage>,
    pub exchanges: u32,
    pub end: SimulationEnd,
    pub usage_total: TokenUsage,
    pub handoff: Option<HandoffSummary>,
}

/// Alternates a customer agent and the orchestrator
pub struct ConversationSimulator<'a> {
    orchestrator: &'a Orchestrator,
    customer: AgentRecord,
    max_exchanges: u32,
}

impl<'a> ConversationSimulator<'a> {
    pub fn new(orchestrator: &'a Orchestrator, customer: AgentRecord) -> Self {
        Self {
            orchestrator,
            customer,
            max_exchanges: DEFAULT_MAX_EXCHANGES,
        }
    }

    pub fn with_max_exchanges(mut self, max: u32) -> Self {
        self.max_exchanges = max;
        self
    }

    /// Run one simulated conversation with `roster`'s bot.
    ///
    /// `scenario` steers the customer's opening message. Bot-side runs use
    /// `context` with each customer message swapped in.
    pub async fn run(
        &self,
        roster: &BotRoster,
        context: &AgentContext,
        scenario: Option<&str>,
    ) -> Result<SimulationReport, OrchestrationError> {
        let mut transcript: Vec<SimulatedMessage> = Vec::new();
        let mut usage_total = TokenUsage::default();
        let mut exchanges = 0;

        let (end, handoff) = loop {
            if exchanges >= self.max_exchanges {
                warn!(
                    "Simulation for bot '{}' paused after {} exchanges",
                    roster.bot().id,
                    exchanges
                );
                let last = transcript
                    .iter()
                    .rev()
                    .find(|m| m.speaker == Speaker::Customer)
                    .map_or("", |m| m.text.as_str());
                let mut summary =
                    HandoffSummary::fallback(last, "limite de interacoes da simulacao atingido");
                summary.tag(SAFETY_LIMIT_TAG);
                summary.mark_critical();
                transcript.push(SimulatedMessage {
                    speaker: Speaker::Bot,
                    text: DEFAULT_HANDOFF_MESSAGE.to_string(),
                    outcome: Some(RunOutcome::SafetyStop),
                    usage: TokenUsage::default(),
                });
                break (SimulationEnd::SafetyStop, Some(summary));
            }

            let prompt = customer_prompt(&transcript, scenario);
            let customer_text = match self.customer_turn(&prompt).await {
                Ok((text, usage)) => {
                    usage_total = accumulate(usage_total, usage.as_ref());
                    transcript.push(SimulatedMessage {
                        speaker: Speaker::Customer,
                        text: text.clone(),
                        outcome: None,
                        usage: usage.unwrap_or_default(),
                    });
                    text
                }
                Err(reason) => break (SimulationEnd::CustomerFailed(reason), None),
            };

            if customer_finished(&customer_text) {
                break (SimulationEnd::CustomerFinished, None);
            }

            exchanges += 1;
            let reply = self
                .orchestrator
                .run_orchestrator_reply(roster, context, &customer_text)
                .await?;
            usage_total = usage_total + reply.usage;
            transcript.push(SimulatedMessage {
                speaker: Speaker::Bot,
                text: reply.text,
                outcome: Some(reply.outcome),
                usage: reply.usage,
            });

            match reply.outcome {
                RunOutcome::HandedOff => break (SimulationEnd::HandedOff, reply.handoff),
                RunOutcome::SafetyStop => break (SimulationEnd::SafetyStop, reply.handoff),
                RunOutcome::Answered(_) | RunOutcome::Clarified => {}
            }
        };

        info!(
            "Simulation for bot '{}' ended after {} exchanges: {:?} ({})",
            roster.bot().id,
            exchanges,
            end,
            usage_total
        );
        Ok(SimulationReport {
            transcript,
            exchanges,
            end,
            usage_total,
            handoff,
        })
    }

    /// Sanitized customer message, or why there is none
    async fn customer_turn(&self, prompt: &str) -> Result<(String, Option<TokenUsage>), String> {
        let context = ContextBuilder::new()
            .build(InboundMessage::text(prompt).on_channel(SIMULATOR_CHANNEL, SIMULATOR_CHANNEL))
            .map_err(|e| e.to_string())?;
        let invocation = self
            .orchestrator
            .invoker()
            .invoke(&self.customer, None, prompt, &context)
            .await
            .map_err(|e| e.to_string())?;

        let text = clean_reply_text(&invocation.raw);
        if text.trim().is_empty() {
            return Err("simulated customer sent an empty message".to_string());
        }
        Ok((text, invocation.usage))
    }
}

/// Prompt for the customer's next message
pub fn customer_prompt(transcript: &[SimulatedMessage], scenario: Option<&str>) -> String {
    let scenario = scenario.map(str::trim).filter(|s| !s.is_empty());
    if transcript.is_empty() {
        return match scenario {
            Some(scenario) => format!(
                "O usuário definiu este cenário de teste: '{}'. Inicie a conversa com o atendente baseado nisso.",
                scenario
            ),
            None => "Inicie a conversa com o atendente.".to_string(),
        };
    }

    let start = transcript.len().saturating_sub(HISTORY_WINDOW);
    let history: Vec<String> = transcript[start..]
        .iter()
        .map(|m| format!("{}: {}", m.speaker.label(), m.text))
        .collect();
    let last_bot = transcript
        .iter()
        .rev()
        .find(|m| m.speaker == Speaker::Bot)
        .map_or("", |m| m.text.as_str());

    format!(
        "Histórico da conversa recente:\n{}\n\nÚltima mensagem do atendente: '{}'.\nResponda como um cliente, mantendo a continuidade do assunto.",
        history.join("\n"),
        last_bot
    )
}

/// The customer said goodbye
pub fn customer_finished(text: &str) -> bool {
    let upper = text.to_uppercase();
    upper.contains(END_MARKER) || (upper.contains("TCHAU") && upper.contains("OBRIGAD"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::agents::AgentRole::*;
    use crate::interaction_log::MemoryInteractionLog;
    use crate::invoker::AgentInvoker;
    use crate::orchestrator::OrchestratorConfig;
    use crate::testing::{ScriptedProvider, agent, context, reply, roster};

    const ROUTE: &str = r#"{"agente_destino": "cotador", "confianca": 0.9, "motivo": "preco"}"#;
    const ANSWER: &str = r#"{"acao": "responder", "mensagem": "Custa R$ 300."}"#;

    fn orchestrator(provider: Arc<ScriptedProvider>) -> Orchestrator {
        let log = Arc::new(MemoryInteractionLog::new());
        Orchestrator::new(AgentInvoker::new(provider, log.clone()), log)
    }

    #[test]
    fn test_customer_finished() {
        assert!(customer_finished("Valeu, obrigado e tchau!"));
        assert!(customer_finished("Ok [FIM]"));
        assert!(!customer_finished("Obrigado pela informacao"));
    }

    #[test]
    fn test_prompt_uses_scenario_then_recent_history() {
        let opening = customer_prompt(&[], Some("pneu furado"));
        assert!(opening.contains("'pneu furado'"));

        let transcript: Vec<SimulatedMessage> = (0..8)
            .map(|i| SimulatedMessage {
                speaker: if i % 2 == 0 { Speaker::Customer } else { Speaker::Bot },
                text: format!("msg{}", i),
                outcome: None,
                usage: TokenUsage::default(),
            })
            .collect();
        let prompt = customer_prompt(&transcript, Some("pneu furado"));
        assert!(!prompt.contains("msg1\n"));
        assert!(prompt.contains("Cliente: msg2"));
        assert!(prompt.contains("Atendente: msg7"));
        assert!(prompt.contains("Última mensagem do atendente: 'msg7'"));
    }

    #[tokio::test]
    async fn test_customer_goodbye_ends_simulation() {
        let provider = ScriptedProvider::new()
            .on("cliente_simulado_padrao", reply("Quanto custa o pneu?"))
            .on("cliente_simulado_padrao", reply("Obrigado, tchau!"))
            .on("triagem", reply(ROUTE))
            .on("cotador", reply(ANSWER))
            .shared();
        let orch = orchestrator(provider.clone());

        let report = ConversationSimulator::new(&orch, agent(SimulatedCustomer))
            .run(&roster(&[Triage, Quoter]), &context("inicio"), Some("preco de pneu"))
            .await
            .unwrap();

        assert_eq!(report.end, SimulationEnd::CustomerFinished);
        assert_eq!(report.exchanges, 1);
        assert_eq!(report.transcript.len(), 3);
        assert_eq!(report.transcript[1].text, "Custa R$ 300.");
        assert_eq!(report.usage_total.calls, 4);
        let second_prompt = provider
            .calls()
            .iter()
            .filter(|r| r.model == "cliente_simulado_padrao")
            .nth(1)
            .map(|r| r.user_prompt().to_string())
            .unwrap();
        assert!(second_prompt.contains("'Custa R$ 300.'"));
    }

    #[tokio::test]
    async fn test_exchange_limit_ends_in_safety_stop() {
        let mut provider = ScriptedProvider::new();
        for i in 0..26 {
            provider = provider
                .on("cliente_simulado_padrao", reply(format!("Pergunta {}", i)))
                .on("triagem", reply(ROUTE))
                .on("cotador", reply(ANSWER));
        }
        let provider = provider.shared();
        let orch = orchestrator(provider.clone()).with_config(OrchestratorConfig::default());

        let report = ConversationSimulator::new(&orch, agent(SimulatedCustomer))
            .with_max_exchanges(25)
            .run(&roster(&[Triage, Quoter]), &context("inicio"), None)
            .await
            .unwrap();

        assert_eq!(report.end, SimulationEnd::SafetyStop);
        assert_eq!(report.exchanges, 25);
        assert_eq!(provider.calls_to("cliente_simulado_padrao"), 25);
        let summary = report.handoff.unwrap();
        assert!(summary.has_tag(SAFETY_LIMIT_TAG));
        assert!(summary.is_critical());
        assert_eq!(report.transcript.last().unwrap().text, DEFAULT_HANDOFF_MESSAGE);
    }

    #[tokio::test]
    async fn test_handoff_ends_simulation() {
        let provider = ScriptedProvider::new()
            .on("cliente_simulado_padrao", reply("Quero falar com um humano"))
            .on(
                "triagem",
                reply(r#"{"agente_destino": "humano", "confianca": 1.0, "motivo": "pedido explicito"}"#),
            )
            .shared();
        let orch = orchestrator(provider);

        let report = ConversationSimulator::new(&orch, agent(SimulatedCustomer))
            .run(&roster(&[Triage, Quoter]), &context("inicio"), None)
            .await
            .unwrap();

        assert_eq!(report.end, SimulationEnd::HandedOff);
        assert!(report.handoff.is_some());
    }

    #[tokio::test]
    async fn test_customer_failure_is_reported() {
        let provider = ScriptedProvider::new().shared();
        let orch = orchestrator(provider);

        let report = ConversationSimulator::new(&orch, agent(SimulatedCustomer))
            .run(&roster(&[Triage]), &context("inicio"), None)
            .await
            .unwrap();

        assert!(matches!(report.end, SimulationEnd::CustomerFailed(_)));
        assert!(report.transcript.is_empty());
    }
}
