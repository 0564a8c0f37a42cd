//! Audit event types

use chrono::{DateTime, Local};
use punch_api::{BreakType, ExceptionKind, FlagSet};
use punch_util::{BreakId, SessionId, SiteId, TicketRef, UserId};
use serde::{Deserialize, Serialize};

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    ServiceStarted,

    ServiceStopped,

    /// Policy loaded at startup
    PolicyLoaded { site_count: usize },

    ClockedIn {
        session_id: SessionId,
        user_id: UserId,
        workplace_id: SiteId,
        flags: FlagSet,
    },

    BreakStarted {
        session_id: SessionId,
        break_id: BreakId,
        break_type: BreakType,
    },

    BreakEnded {
        session_id: SessionId,
        break_id: BreakId,
    },

    ClockedOut {
        session_id: SessionId,
        user_id: UserId,
        work_duration_minutes: i64,
        flags: FlagSet,
    },

    /// A transition was refused by a guard
    PunchRejected {
        user_id: UserId,
        action: String,
        kind: String,
        reason: String,
    },

    /// Session was annotated after the fact (e.g. missed punch-out)
    SessionFlagged {
        session_id: SessionId,
        flags: FlagSet,
    },

    ExceptionRaised {
        user_id: UserId,
        session_id: Option<SessionId>,
        kind: ExceptionKind,
        ticket_ref: TicketRef,
    },

    EscalationFailed {
        user_id: UserId,
        session_id: Option<SessionId>,
        kind: ExceptionKind,
        error: String,
    },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp: punch_util::now(),
            event,
        }
    }
}
