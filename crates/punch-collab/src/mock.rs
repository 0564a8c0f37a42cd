//! Mock collaborators for testing

use async_trait::async_trait;
use punch_util::{TicketRef, UserId};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{ApprovalRequest, ApprovalWorkflow, CollabError, CollabResult, EvidenceStore, OrgDirectory};

/// Mock approval workflow that records every request
#[derive(Clone, Default)]
pub struct MockApprovalWorkflow {
    next_id: Arc<AtomicU64>,
    requests: Arc<Mutex<Vec<ApprovalRequest>>>,

    /// Configure requests to fail as unavailable
    pub fail: Arc<Mutex<bool>>,

    /// Delay before answering (to exercise timeouts)
    pub delay: Arc<Mutex<Option<Duration>>>,
}

impl MockApprovalWorkflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Requests that were answered with a ticket
    pub fn requests(&self) -> Vec<ApprovalRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApprovalWorkflow for MockApprovalWorkflow {
    async fn create_request(&self, request: &ApprovalRequest) -> CollabResult<TicketRef> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if *self.fail.lock().unwrap() {
            return Err(CollabError::Unavailable("Mock approval failure".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.clone());
        Ok(TicketRef::new(format!("MOCK-{}", id)))
    }
}

/// Mock evidence store with a fixed set of known references
#[derive(Clone, Default)]
pub struct MockEvidenceStore {
    known: Arc<Mutex<HashSet<String>>>,

    /// Configure lookups to fail as unavailable
    pub fail: Arc<Mutex<bool>>,
}

impl MockEvidenceStore {
    pub fn with_refs<I, S>(refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::default();
        store
            .known
            .lock()
            .unwrap()
            .extend(refs.into_iter().map(Into::into));
        store
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[async_trait]
impl EvidenceStore for MockEvidenceStore {
    async fn confirm(&self, evidence_ref: &str) -> CollabResult<bool> {
        if *self.fail.lock().unwrap() {
            return Err(CollabError::Unavailable("Mock evidence failure".into()));
        }
        Ok(self.known.lock().unwrap().contains(evidence_ref))
    }
}

/// Mock org directory
#[derive(Clone, Default)]
pub struct MockOrgDirectory {
    teams: Arc<Mutex<BTreeMap<UserId, Vec<UserId>>>>,
}

impl MockOrgDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_roster(&self, manager: impl Into<UserId>, members: &[&str]) {
        self.teams.lock().unwrap().insert(
            manager.into(),
            members.iter().map(|m| UserId::new(*m)).collect(),
        );
    }
}

#[async_trait]
impl OrgDirectory for MockOrgDirectory {
    async fn roster(&self, manager: &UserId) -> CollabResult<Vec<UserId>> {
        Ok(self
            .teams
            .lock()
            .unwrap()
            .get(manager)
            .cloned()
            .unwrap_or_default())
    }
}
