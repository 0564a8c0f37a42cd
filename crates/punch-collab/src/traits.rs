//! Collaborator traits

use async_trait::async_trait;
use punch_api::ExceptionKind;
use punch_util::{SessionId, TicketRef, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from collaborator calls
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Collaborator rejected request: {0}")]
    Rejected(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type CollabResult<T> = Result<T, CollabError>;

/// What a ticket is raised against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceRef {
    Session { session_id: SessionId },
    /// No open session to attach to; the ticket belongs to the user
    User { user_id: UserId },
}

impl SourceRef {
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            SourceRef::Session { session_id } => Some(*session_id),
            SourceRef::User { .. } => None,
        }
    }
}

/// Body of a `createRequest` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    #[serde(rename = "type")]
    pub kind: ExceptionKind,
    pub source_ref: SourceRef,
    pub requested_by: UserId,
    pub reason: String,
}

/// Multi-step approval service; only request creation is used here
#[async_trait]
pub trait ApprovalWorkflow: Send + Sync {
    async fn create_request(&self, request: &ApprovalRequest) -> CollabResult<TicketRef>;
}

/// Photo/evidence storage
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Whether the reference names a stored object
    async fn confirm(&self, evidence_ref: &str) -> CollabResult<bool>;
}

/// Org structure
#[async_trait]
pub trait OrgDirectory: Send + Sync {
    /// Direct reports of `manager`; empty when the user manages nobody
    async fn roster(&self, manager: &UserId) -> CollabResult<Vec<UserId>>;
}
