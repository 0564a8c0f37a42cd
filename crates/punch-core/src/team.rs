//! Team presence for managers and admins

use punch_api::{
    AttendanceSession, Identity, Role, SessionStatus, TeamFilter, TeamMemberStatus, TeamPresence,
};
use punch_collab::OrgDirectory;
use punch_store::SessionStore;
use punch_util::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::engine::read_with_retry;
use crate::{EngineError, EngineResult};

pub struct TeamStatusAggregator {
    store: Arc<dyn SessionStore>,
    directory: Arc<dyn OrgDirectory>,
    timeout: Duration,
    read_retries: u32,
}

fn presence_of(member: &TeamMemberStatus) -> TeamPresence {
    match member.session.as_ref().map(|s| s.status) {
        Some(SessionStatus::Active) => TeamPresence::Active,
        Some(SessionStatus::OnBreak) => TeamPresence::OnBreak,
        _ => TeamPresence::Off,
    }
}

impl TeamStatusAggregator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        directory: Arc<dyn OrgDirectory>,
        timeout: Duration,
        read_retries: u32,
    ) -> Self {
        Self {
            store,
            directory,
            timeout,
            read_retries,
        }
    }

    async fn roster(&self, manager: &UserId) -> EngineResult<Vec<UserId>> {
        match tokio::time::timeout(self.timeout, self.directory.roster(manager)).await {
            Ok(Ok(roster)) => Ok(roster),
            Ok(Err(e)) => {
                warn!(manager = %manager, error = %e, "Org directory lookup failed");
                Err(EngineError::CollaboratorUnavailable("org directory".into()))
            }
            Err(_) => {
                warn!(manager = %manager, "Org directory lookup timed out");
                Err(EngineError::CollaboratorUnavailable("org directory".into()))
            }
        }
    }

    /// Presence of every member visible to `identity`.
    ///
    /// Managers see their own roster. Admins see a named manager's roster, or
    /// every open session when no manager is named.
    pub async fn status_for(
        &self,
        identity: &Identity,
        filter: &TeamFilter,
    ) -> EngineResult<Vec<TeamMemberStatus>> {
        let roster = match (identity.role, &filter.manager_id) {
            (Role::Employee, _) => {
                return Err(EngineError::Forbidden(
                    "Team status requires the manager or admin role".into(),
                ));
            }
            (Role::Manager, Some(manager)) if manager != &identity.user_id => {
                return Err(EngineError::Forbidden(
                    "Managers can only view their own team".into(),
                ));
            }
            (Role::Manager, _) => Some(self.roster(&identity.user_id).await?),
            (Role::Admin, Some(manager)) => Some(self.roster(manager).await?),
            (Role::Admin, None) => None,
        };

        let open = read_with_retry(self.read_retries, "list_open_sessions", || {
            self.store.list_open_sessions()
        })?;

        let members: Vec<TeamMemberStatus> = match roster {
            Some(roster) => {
                let mut by_user: HashMap<UserId, AttendanceSession> =
                    open.into_iter().map(|s| (s.user_id.clone(), s)).collect();
                roster
                    .into_iter()
                    .map(|user_id| TeamMemberStatus {
                        session: by_user.remove(&user_id).map(|s| s.summary()),
                        user_id,
                    })
                    .collect()
            }
            None => {
                let mut members: Vec<TeamMemberStatus> = open
                    .into_iter()
                    .map(|s| TeamMemberStatus {
                        user_id: s.user_id.clone(),
                        session: Some(s.summary()),
                    })
                    .collect();
                members.sort_by(|a, b| a.user_id.cmp(&b.user_id));
                members
            }
        };

        let members: Vec<TeamMemberStatus> = members
            .into_iter()
            .filter(|m| filter.status.is_none_or(|status| presence_of(m) == status))
            .filter(|m| {
                filter.workplace_id.as_ref().is_none_or(|site| {
                    m.session.as_ref().is_some_and(|s| &s.workplace_id == site)
                })
            })
            .collect();

        debug!(
            user_id = %identity.user_id,
            count = members.len(),
            "Team status computed"
        );

        Ok(members)
    }
}
