//! Triage router: one triage agent call parsed into a [`RouteDecision`]

use tracing::{debug, info};

use crate::agents::AgentRecord;
use crate::context::AgentContext;
use crate::decision::{RouteDecision, parse_route_decision};
use crate::error::TriageError;
use crate::invoker::{AgentInvoker, Invocation};

/// A parsed routing decision with the call that produced it
#[derive(Debug, Clone)]
pub struct Routed {
    pub decision: RouteDecision,
    pub invocation: Invocation,
}

pub struct Router<'a> {
    invoker: &'a AgentInvoker,
    persona: Option<&'a str>,
}

impl<'a> Router<'a> {
    pub fn new(invoker: &'a AgentInvoker, persona: Option<&'a str>) -> Self {
        Self { invoker, persona }
    }

    /// Ask `record` where the customer message should go
    pub async fn route(
        &self,
        context: &AgentContext,
        record: &AgentRecord,
    ) -> Result<Routed, TriageError> {
        let invocation = self
            .invoker
            .invoke(record, self.persona, context.message(), context)
            .await?;

        match parse_route_decision(&record.name, &invocation.raw) {
            Ok(decision) => {
                info!(
                    "Triage '{}' routed to {} (confidence {:.2}, needs_human={})",
                    record.name, decision.destination, decision.confidence, decision.needs_human
                );
                Ok(Routed {
                    decision,
                    invocation,
                })
            }
            Err(source) => {
                debug!("Unparseable triage output: {}", invocation.raw);
                Err(TriageError::Parse {
                    source,
                    raw: invocation.raw,
                    usage: invocation.usage,
                })
            }
        }
    }
}
