//! Exception escalation to the approval workflow

use chrono::{DateTime, Local};
use punch_api::ExceptionKind;
use punch_collab::{ApprovalRequest, ApprovalWorkflow, SourceRef};
use punch_config::EscalationPolicy;
use punch_store::{AuditEvent, AuditEventType, SessionStore, TicketRecord};
use punch_util::{TicketRef, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::{EngineError, EngineResult};

/// Outcome of raising an exception. A missing ticket is a soft failure,
/// described in `warnings`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Escalation {
    pub ticket_ref: Option<TicketRef>,
    pub warnings: Vec<String>,
}

/// Opens approval requests and records the resulting tickets
pub struct ExceptionEscalator {
    workflow: Arc<dyn ApprovalWorkflow>,
    store: Arc<dyn SessionStore>,
    allowed_kinds: HashSet<ExceptionKind>,
    timeout: Duration,
}

impl ExceptionEscalator {
    pub fn new(
        workflow: Arc<dyn ApprovalWorkflow>,
        store: Arc<dyn SessionStore>,
        policy: &EscalationPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            workflow,
            store,
            allowed_kinds: policy.allowed_kinds.clone(),
            timeout,
        }
    }

    pub fn is_allowed(&self, kind: ExceptionKind) -> bool {
        self.allowed_kinds.contains(&kind)
    }

    /// Forward an exception to the approval workflow.
    ///
    /// Only a disallowed kind is an error; an unreachable or slow workflow
    /// yields an [`Escalation`] without a ticket.
    pub async fn raise(
        &self,
        kind: ExceptionKind,
        source: SourceRef,
        requested_by: &UserId,
        reason: &str,
        now: DateTime<Local>,
    ) -> EngineResult<Escalation> {
        if !self.is_allowed(kind) {
            return Err(EngineError::Validation(format!(
                "Exception type {} is not accepted",
                kind
            )));
        }

        let request = ApprovalRequest {
            kind,
            source_ref: source,
            requested_by: requested_by.clone(),
            reason: reason.to_string(),
        };

        let ticket_ref =
            match tokio::time::timeout(self.timeout, self.workflow.create_request(&request)).await {
                Ok(Ok(ticket_ref)) => ticket_ref,
                Ok(Err(e)) => return Ok(self.failed(&request, e.to_string())),
                Err(_) => {
                    return Ok(self.failed(
                        &request,
                        format!("no answer within {}ms", self.timeout.as_millis()),
                    ));
                }
            };

        let session_id = request.source_ref.session_id();
        let record = TicketRecord {
            ticket_ref: ticket_ref.clone(),
            kind,
            user_id: requested_by.clone(),
            session_id,
            reason: request.reason.clone(),
            raised_at: now,
        };

        let mut warnings = Vec::new();
        if let Err(e) = self.store.record_ticket(&record) {
            warn!(ticket_ref = %ticket_ref, error = %e, "Failed to record ticket locally");
            warnings.push(format!(
                "Exception ticket {} was opened but could not be recorded",
                ticket_ref
            ));
        }

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::ExceptionRaised {
            user_id: requested_by.clone(),
            session_id,
            kind,
            ticket_ref: ticket_ref.clone(),
        }));

        info!(
            user_id = %requested_by,
            kind = %kind,
            ticket_ref = %ticket_ref,
            "Exception raised"
        );

        Ok(Escalation {
            ticket_ref: Some(ticket_ref),
            warnings,
        })
    }

    fn failed(&self, request: &ApprovalRequest, error: String) -> Escalation {
        warn!(
            user_id = %request.requested_by,
            kind = %request.kind,
            error = %error,
            "Approval workflow unavailable"
        );

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::EscalationFailed {
            user_id: request.requested_by.clone(),
            session_id: request.source_ref.session_id(),
            kind: request.kind,
            error,
        }));

        Escalation {
            ticket_ref: None,
            warnings: vec![format!(
                "Could not open a {} exception: approval workflow unavailable",
                request.kind
            )],
        }
    }
}
