//! Store trait definitions

use chrono::{DateTime, Local};
use punch_api::{AttendanceSession, ExceptionKind, HistoryQuery};
use punch_util::{SessionId, TicketRef, UserId};
use serde::{Deserialize, Serialize};

use crate::{AuditEvent, StoreResult};

/// Result of an atomic create-if-absent
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created,
    /// The user already had an open session; nothing was written
    Existing(AttendanceSession),
}

/// Result of a versioned update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Committed,
    /// Stored version moved on since the caller read the session
    Stale { stored_version: u64 },
    Missing,
}

/// Exception ticket as recorded locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub ticket_ref: TicketRef,
    pub kind: ExceptionKind,
    pub user_id: UserId,
    pub session_id: Option<SessionId>,
    pub reason: String,
    pub raised_at: DateTime<Local>,
}

/// Durable session storage.
///
/// Every write goes through either [`SessionStore::create_if_absent`] or
/// [`SessionStore::update_versioned`]; there is no unconditional overwrite.
pub trait SessionStore: Send + Sync {
    // Sessions

    /// Insert `session` unless `session.user_id` already has an open one
    fn create_if_absent(&self, session: &AttendanceSession) -> StoreResult<CreateOutcome>;

    /// Replace a session if its stored version equals `expected_version`.
    /// `session.version` is written as the new version.
    fn update_versioned(
        &self,
        session: &AttendanceSession,
        expected_version: u64,
    ) -> StoreResult<UpdateOutcome>;

    fn get_session(&self, id: &SessionId) -> StoreResult<Option<AttendanceSession>>;

    /// The user's Active or OnBreak session, if any
    fn get_open_session(&self, user_id: &UserId) -> StoreResult<Option<AttendanceSession>>;

    /// Most recently clocked-out session of the user
    fn last_completed_session(&self, user_id: &UserId) -> StoreResult<Option<AttendanceSession>>;

    /// All open sessions, oldest clock-in first
    fn list_open_sessions(&self) -> StoreResult<Vec<AttendanceSession>>;

    /// One page of a user's sessions, newest first, plus the total match count
    fn history(
        &self,
        user_id: &UserId,
        query: &HistoryQuery,
    ) -> StoreResult<(Vec<AttendanceSession>, u64)>;

    // Exception tickets

    fn record_ticket(&self, ticket: &TicketRecord) -> StoreResult<()>;

    fn tickets_for_user(&self, user_id: &UserId) -> StoreResult<Vec<TicketRecord>>;

    // Audit log

    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Health

    fn is_healthy(&self) -> bool;
}
