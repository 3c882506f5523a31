//! Orchestrator: the per-message state machine over a bot's agents
//!
//! A run walks `Start → Triage → {Specialist, Coordinator, HumanHandoff} → Done`.
//! Every model call spends one automated turn; a call that would exceed the
//! budget sends the run to `SafetyStop` instead. Agent failures are downgraded
//! to other transitions and never reach the caller.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::agents::{AgentRecord, AgentRole, BotRoster};
use crate::context::AgentContext;
use crate::decision::{
    AgentReply, CoordinatorDecision, DEFAULT_HANDOFF_MESSAGE, HandoffSummary, ReplyAction,
    RouteDecision, RouteDestination, SAFETY_LIMIT_TAG, parse_contract,
};
use crate::error::{
    AgentInvocationError, FatalOrchestrationError, OrchestrationError, SafetyLimitExceeded,
    TriageError,
};
use crate::interaction_log::{InteractionLog, RunEvent};
use crate::invoker::{AgentInvoker, Invocation};
use crate::sanitize::{clean_or, clean_reply_text};
use crate::trace::{EntryOutcome, RunState, RunTrace};
use crate::triage::Router;
use crate::usage::TokenUsage;

pub const DEFAULT_NO_RESPONSE: &str = "Sem resposta.";
pub const DEFAULT_MAX_AUTOMATED_TURNS: u32 = 25;

const SAFETY_STOP_REASON: &str = "limite de turnos automatizados atingido";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Model calls one run may make before it is stopped
    pub max_automated_turns: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_automated_turns: DEFAULT_MAX_AUTOMATED_TURNS,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "by", rename_all = "snake_case")]
pub enum RunOutcome {
    Answered(AgentRole),
    Clarified,
    HandedOff,
    SafetyStop,
}

impl RunOutcome {
    pub fn is_handoff(&self) -> bool {
        matches!(self, Self::HandedOff | Self::SafetyStop)
    }
}

/// Result of one run, always carrying user-visible text
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationReply {
    pub text: String,
    pub outcome: RunOutcome,
    pub handoff: Option<HandoffSummary>,
    pub usage: TokenUsage,
    pub trace: RunTrace,
}

type Step = (RunState, String);

/// Mutable state of one run. Owned by the run, never shared.
struct Run<'a> {
    roster: &'a BotRoster,
    context: AgentContext,
    trace: RunTrace,
    max_turns: u32,
    turns_used: u32,
    triage_failures: u32,
    /// Triage's hand-over line, prefixed to a specialist answer
    transition_message: Option<String>,
    /// Why the current routing happened; forwarded to the coordinator and the summary
    note: Option<String>,
    handoff_message: Option<String>,
    critical: bool,
    text: String,
    outcome: RunOutcome,
    handoff: Option<HandoffSummary>,
}

impl<'a> Run<'a> {
    fn persona(&self) -> Option<&'a str> {
        self.roster.persona()
    }

    fn customer_message(&self) -> &str {
        self.context.message()
    }

    /// Reserve one model call
    fn take_turn(&mut self) -> Result<(), SafetyLimitExceeded> {
        if self.turns_used >= self.max_turns {
            return Err(SafetyLimitExceeded {
                used: self.turns_used,
                max: self.max_turns,
            });
        }
        self.turns_used += 1;
        Ok(())
    }

    fn has_turn_left(&self) -> bool {
        self.turns_used < self.max_turns
    }

    fn answer(&mut self, by: AgentRole, text: String) -> Step {
        self.text = text;
        self.outcome = RunOutcome::Answered(by);
        (RunState::Done, format!("{} respondeu", by))
    }

    fn hand_off(&mut self, message: Option<String>, reason: impl Into<String>) -> Step {
        let reason = reason.into();
        if message.is_some() {
            self.handoff_message = message;
        }
        self.note = Some(reason.clone());
        (RunState::HumanHandoff, reason)
    }

    /// Coordinator when one is linked, otherwise a human
    fn escalate_to_coordinator(&mut self, reason: impl Into<String>) -> Step {
        let reason = reason.into();
        if self.roster.coordinator().is_some() {
            self.note = Some(reason.clone());
            (RunState::Coordinator, reason)
        } else {
            self.hand_off(None, format!("{} (sem coordenador)", reason))
        }
    }
}

/// Runs one inbound message through a bot's agents
pub struct Orchestrator {
    invoker: AgentInvoker,
    log: Arc<dyn InteractionLog>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(invoker: AgentInvoker, log: Arc<dyn InteractionLog>) -> Self {
        Self {
            invoker,
            log,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn invoker(&self) -> &AgentInvoker {
        &self.invoker
    }

    /// Answer `user_message` on behalf of `roster`'s bot.
    ///
    /// Fails only when the message is empty or the bot has neither a triage
    /// nor a coordinator agent. Everything else ends in an answer, a
    /// clarifying question, or a human handoff.
    pub async fn run_orchestrator_reply(
        &self,
        roster: &BotRoster,
        context: &AgentContext,
        user_message: &str,
    ) -> Result<OrchestrationReply, OrchestrationError> {
        let context = context.with_message(user_message)?;
        let bot_id = roster.bot().id.clone();

        let first = match (roster.triage(), roster.coordinator()) {
            (Some(_), _) => RunState::Triage,
            (None, Some(_)) => RunState::Coordinator,
            (None, None) => {
                return Err(FatalOrchestrationError {
                    bot: bot_id,
                    reason: "no usable triage or coordinator agent".to_string(),
                }
                .into());
            }
        };

        let mut run = Run {
            roster,
            context,
            trace: RunTrace::new(&bot_id),
            max_turns: self.config.max_automated_turns,
            turns_used: 0,
            triage_failures: 0,
            transition_message: None,
            note: None,
            handoff_message: None,
            critical: false,
            text: DEFAULT_NO_RESPONSE.to_string(),
            outcome: RunOutcome::HandedOff,
            handoff: None,
        };

        info!("Run {} started for bot '{}'", run.trace.run_id, bot_id);
        self.emit(
            &run,
            "run_start",
            json!({
                "bot_id": bot_id,
                "message": run.customer_message(),
                "context": run.context.render(),
            }),
        );

        let mut state = RunState::Start;
        let mut next: Step = (first, "inicio".to_string());
        loop {
            let (to, reason) = next;
            info!("Run {}: {} -> {} ({})", run.trace.run_id, state, to, reason);
            self.emit(
                &run,
                "transition",
                json!({ "from": state.to_string(), "to": to.to_string(), "reason": reason }),
            );
            run.trace.transition(state, to, reason);
            state = to;

            next = match state {
                RunState::Triage => self.triage_step(&mut run).await,
                RunState::Specialist(role) => self.specialist_step(&mut run, role).await,
                RunState::Coordinator => self.coordinator_step(&mut run).await,
                RunState::HumanHandoff => self.handoff_step(&mut run).await,
                RunState::SafetyStop => {
                    self.safety_stop(&mut run);
                    break;
                }
                RunState::Start | RunState::Done => break,
            };
        }

        if let (RunOutcome::Answered(_), Some(prefix)) = (run.outcome, run.transition_message.take()) {
            run.text = format!("{}\n\n{}", prefix, run.text);
        }

        info!(
            "Run {} finished: {:?} after {} model calls ({})",
            run.trace.run_id, run.outcome, run.turns_used, run.trace.usage_total
        );
        self.emit(
            &run,
            "run_end",
            json!({
                "outcome": run.outcome,
                "text": run.text,
                "usage": run.trace.usage_total,
                "turns": run.turns_used,
            }),
        );

        Ok(OrchestrationReply {
            text: run.text,
            outcome: run.outcome,
            handoff: run.handoff,
            usage: run.trace.usage_total,
            trace: run.trace,
        })
    }

    async fn triage_step(&self, run: &mut Run<'_>) -> Step {
        let roster = run.roster;
        let Some(record) = roster.triage() else {
            return run.escalate_to_coordinator("bot sem agente de triagem");
        };
        if let Err(limit) = run.take_turn() {
            return (RunState::SafetyStop, limit.to_string());
        }

        self.emit_agent_start(run, record);
        let router = Router::new(&self.invoker, run.persona());
        match router.route(&run.context, record).await {
            Ok(routed) => {
                self.emit_agent_success(run, &routed.invocation);
                run.trace.record(
                    &routed.invocation,
                    EntryOutcome::Parsed {
                        value: to_value(&routed.decision),
                    },
                );
                self.follow_route(run, routed.decision)
            }
            Err(TriageError::Invocation(err)) => {
                self.record_failure(run, record, &err);
                run.triage_failures += 1;
                if run.triage_failures >= 2 {
                    run.critical = true;
                    return run.hand_off(None, "triagem falhou duas vezes");
                }
                if run.roster.coordinator().is_some() {
                    run.escalate_to_coordinator(format!("falha na triagem: {}", err.kind))
                } else {
                    (RunState::Triage, format!("nova tentativa de triagem apos {}", err.kind))
                }
            }
            Err(TriageError::Parse { source, raw, usage }) => {
                warn!("{}", source);
                run.trace.record_unparsed(
                    record.role,
                    &record.name,
                    &record.model,
                    &raw,
                    usage,
                    source.reason.clone(),
                );
                self.emit(
                    run,
                    "agent_error",
                    json!({ "agent": record.name, "error": source.to_string() }),
                );
                run.escalate_to_coordinator("saida da triagem invalida")
            }
        }
    }

    fn follow_route(&self, run: &mut Run<'_>, decision: RouteDecision) -> Step {
        if decision.wants_human() {
            return run.hand_off(Some(decision.handoff_message()), decision.reason);
        }

        let roster = run.roster;
        let policy = *roster.policy();
        if let Some(question) = decision
            .clarifying_question
            .as_deref()
            .filter(|q| !q.trim().is_empty())
        {
            if decision.confidence < policy.clarify_below_confidence {
                run.text = clean_or(question, DEFAULT_NO_RESPONSE);
                run.outcome = RunOutcome::Clarified;
                return (
                    RunState::Done,
                    format!("pergunta de esclarecimento (confianca {:.2})", decision.confidence),
                );
            }
        }

        match decision.destination {
            RouteDestination::Agent(role) if role.is_specialist() => {
                if decision.confidence < policy.min_route_confidence {
                    return run.escalate_to_coordinator(format!(
                        "confianca {:.2} abaixo do minimo para {}",
                        decision.confidence, role
                    ));
                }
                if roster.agent_for(role).is_none() {
                    return run.escalate_to_coordinator(format!("{} nao esta vinculado ao bot", role));
                }
                run.transition_message = decision
                    .transition_message
                    .as_deref()
                    .map(clean_reply_text)
                    .filter(|t| !t.is_empty());
                (RunState::Specialist(role), decision.reason)
            }
            RouteDestination::Agent(AgentRole::Coordinator) => run.escalate_to_coordinator(decision.reason),
            other => run.escalate_to_coordinator(format!("destino {}", other.label())),
        }
    }

    async fn specialist_step(&self, run: &mut Run<'_>, role: AgentRole) -> Step {
        let roster = run.roster;
        let Some(record) = roster.agent_for(role) else {
            return run.hand_off(None, format!("{} indisponivel", role));
        };
        if let Err(limit) = run.take_turn() {
            return (RunState::SafetyStop, limit.to_string());
        }

        let message = run.customer_message().to_string();
        self.emit_agent_start(run, record);
        let invocation = match self
            .invoker
            .invoke(record, run.persona(), &message, &run.context)
            .await
        {
            Ok(invocation) => invocation,
            Err(err) => {
                self.record_failure(run, record, &err);
                return run.hand_off(None, format!("falha do agente {}", role));
            }
        };
        self.emit_agent_success(run, &invocation);

        match parse_contract::<AgentReply>(&record.name, &invocation.raw) {
            Ok(reply) => {
                run.trace.record(&invocation, EntryOutcome::Parsed { value: to_value(&reply) });
                if reply.needs_human {
                    let reason = reply
                        .escalation_reason
                        .clone()
                        .unwrap_or_else(|| format!("{} pediu um humano", role));
                    return run.hand_off(Some(reply.handoff_message()), reason);
                }
                let text = clean_or(&reply.message, DEFAULT_NO_RESPONSE);
                run.answer(role, text)
            }
            Err(err) => {
                warn!("{}", err);
                run.trace.record(
                    &invocation,
                    EntryOutcome::ParseError {
                        reason: err.reason.clone(),
                    },
                );
                run.hand_off(None, format!("saida do agente {} invalida", role))
            }
        }
    }

    async fn coordinator_step(&self, run: &mut Run<'_>) -> Step {
        let roster = run.roster;
        let Some(record) = roster.coordinator() else {
            return run.hand_off(None, "bot sem coordenador");
        };
        if let Err(limit) = run.take_turn() {
            return (RunState::SafetyStop, limit.to_string());
        }

        let message = match run.note.as_deref() {
            Some(note) => format!(
                "{}\n\n[Encaminhado ao coordenador. Motivo: {}]",
                run.customer_message(),
                note
            ),
            None => run.customer_message().to_string(),
        };

        self.emit_agent_start(run, record);
        let invocation = match self
            .invoker
            .invoke(record, run.persona(), &message, &run.context)
            .await
        {
            Ok(invocation) => invocation,
            Err(err) => {
                self.record_failure(run, record, &err);
                return run.hand_off(None, "falha do coordenador");
            }
        };
        self.emit_agent_success(run, &invocation);

        let decision = match parse_contract::<CoordinatorDecision>(&record.name, &invocation.raw) {
            Ok(decision) => decision,
            Err(err) => {
                warn!("{}", err);
                run.trace.record(
                    &invocation,
                    EntryOutcome::ParseError {
                        reason: err.reason.clone(),
                    },
                );
                return run.hand_off(None, "saida do coordenador invalida");
            }
        };
        run.trace.record(&invocation, EntryOutcome::Parsed { value: to_value(&decision) });

        if decision.wants_human() {
            let message = decision
                .message
                .as_deref()
                .map(clean_reply_text)
                .filter(|m| !m.is_empty());
            return run.hand_off(message, decision.reason);
        }

        match decision.action {
            ReplyAction::Respond | ReplyAction::Ask => {
                let text = clean_or(decision.message.as_deref().unwrap_or_default(), DEFAULT_NO_RESPONSE);
                run.answer(AgentRole::Coordinator, text)
            }
            ReplyAction::Redirect => match decision.destination {
                Some(RouteDestination::Agent(AgentRole::Triage)) if run.roster.triage().is_some() => {
                    run.note = Some(decision.reason.clone());
                    (RunState::Triage, decision.reason)
                }
                Some(RouteDestination::Agent(role))
                    if role.is_specialist() && run.roster.agent_for(role).is_some() =>
                {
                    (RunState::Specialist(role), decision.reason)
                }
                other => run.hand_off(
                    None,
                    format!(
                        "coordenador redirecionou para destino indisponivel ({})",
                        other.map_or("indefinido", |d| d.label())
                    ),
                ),
            },
            ReplyAction::Escalate => run.hand_off(None, decision.reason),
        }
    }

    async fn handoff_step(&self, run: &mut Run<'_>) -> Step {
        let reason = run
            .note
            .clone()
            .unwrap_or_else(|| "transferencia solicitada".to_string());

        let roster = run.roster;
        let mut summary = match roster.agent_for(AgentRole::Summary) {
            Some(_) if !run.has_turn_left() => {
                return (RunState::SafetyStop, "sem turnos para o resumo".to_string());
            }
            Some(record) => self.summarize(run, record, &reason).await,
            None => None,
        }
        .unwrap_or_else(|| HandoffSummary::fallback(run.customer_message(), &reason));

        if run.critical || run.trace.failure_count() >= 2 {
            summary.mark_critical();
        }

        run.text = run
            .handoff_message
            .take()
            .unwrap_or_else(|| DEFAULT_HANDOFF_MESSAGE.to_string());
        run.outcome = RunOutcome::HandedOff;
        run.handoff = Some(summary);
        (RunState::Done, "transferido para humano".to_string())
    }

    /// Best effort; `None` means the caller falls back to a generic summary
    async fn summarize(
        &self,
        run: &mut Run<'_>,
        record: &AgentRecord,
        reason: &str,
    ) -> Option<HandoffSummary> {
        run.take_turn().ok()?;
        let transcript = self.compose_transcript(run, reason);

        self.emit_agent_start(run, record);
        let invocation = match self
            .invoker
            .invoke(record, run.persona(), &transcript, &run.context)
            .await
        {
            Ok(invocation) => invocation,
            Err(err) => {
                self.record_failure(run, record, &err);
                return None;
            }
        };
        self.emit_agent_success(run, &invocation);

        match parse_contract::<HandoffSummary>(&record.name, &invocation.raw) {
            Ok(summary) => {
                run.trace.record(&invocation, EntryOutcome::Parsed { value: to_value(&summary) });
                Some(summary)
            }
            Err(err) => {
                warn!("{}", err);
                run.trace.record(
                    &invocation,
                    EntryOutcome::ParseError {
                        reason: err.reason.clone(),
                    },
                );
                None
            }
        }
    }

    fn safety_stop(&self, run: &mut Run<'_>) {
        warn!(
            "Run {} stopped after {} automated turns",
            run.trace.run_id, run.turns_used
        );
        let reason = match run.note.as_deref() {
            Some(note) => format!("{}; {}", SAFETY_STOP_REASON, note),
            None => SAFETY_STOP_REASON.to_string(),
        };
        let mut summary = HandoffSummary::fallback(run.customer_message(), &reason);
        summary.tag(SAFETY_LIMIT_TAG);
        summary.mark_critical();
        run.text = run
            .handoff_message
            .take()
            .unwrap_or_else(|| DEFAULT_HANDOFF_MESSAGE.to_string());
        run.outcome = RunOutcome::SafetyStop;
        run.handoff = Some(summary);
        run.transition_message = None;
    }

    /// Input for the summary agent: the message and what the run did with it
    fn compose_transcript(&self, run: &Run<'_>, reason: &str) -> String {
        let mut out = format!(
            "Mensagem do cliente: {}\nMotivo da transferencia: {}\n\nEtapas do atendimento:",
            run.customer_message(),
            reason
        );
        for entry in &run.trace.entries {
            let detail = match &entry.outcome {
                EntryOutcome::Failed { reason } => format!("falhou ({})", reason),
                _ => entry
                    .raw_output
                    .as_deref()
                    .map(clean_reply_text)
                    .unwrap_or_default(),
            };
            out.push_str(&format!("\n- {}: {}", entry.agent_name, detail));
        }
        out
    }

    fn record_failure(&self, run: &mut Run<'_>, record: &AgentRecord, err: &AgentInvocationError) {
        run.trace
            .record_failure(record.role, &record.name, &record.model, err.to_string());
        self.emit(
            run,
            "agent_error",
            json!({ "agent": record.name, "kind": err.kind.to_string(), "error": err.cause }),
        );
    }

    fn emit_agent_start(&self, run: &Run<'_>, record: &AgentRecord) {
        self.emit(
            run,
            "agent_start",
            json!({
                "agent": record.name,
                "role": record.role,
                "model": record.model,
                "turn": run.turns_used,
            }),
        );
    }

    fn emit_agent_success(&self, run: &Run<'_>, invocation: &Invocation) {
        self.emit(
            run,
            "agent_success",
            json!({
                "agent": invocation.agent_name,
                "elapsed_ms": invocation.elapsed_ms,
                "usage": invocation.usage,
                "knowledge": invocation.knowledge,
            }),
        );
    }

    fn emit(&self, run: &Run<'_>, event: &str, data: Value) {
        self.log.record_event(&RunEvent {
            run_id: run.trace.run_id,
            run_started_at: run.trace.started_at,
            timestamp: Utc::now(),
            event: event.to_string(),
            data,
        });
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
