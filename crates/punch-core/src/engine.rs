//! Punch engine

use chrono::{DateTime, Local};
use punch_api::{
    AttendanceSession, BreakEndRequest, BreakStartRequest, Coordinates, CurrentStatus,
    ExceptionKind, ExceptionResponse, FlagKind, FlagSet, HistoryPage, HistoryQuery, Identity,
    LateExceptionRequest, LocationSample, PunchInRequest, PunchOutRequest, PunchResponse,
    RaisedTicket, TeamFilter, TeamMemberStatus, VerifyLocationResponse,
};
use punch_collab::{
    AcceptingEvidenceStore, ApprovalWorkflow, CollabResult, DisabledApprovalWorkflow,
    EvidenceStore, HttpApprovalWorkflow, OrgDirectory, SourceRef, StaticOrgDirectory,
};
use punch_config::Policy;
use punch_store::{
    AuditEvent, AuditEventType, CreateOutcome, SessionStore, StoreResult, UpdateOutcome,
};
use punch_util::{SessionId, SiteId, UserId};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::escalator::ExceptionEscalator;
use crate::spoof::SpoofGuard;
use crate::team::TeamStatusAggregator;
use crate::{geo, session, EngineError, EngineResult};

/// Run an idempotent store read, retrying up to `retries` extra times on error
pub(crate) fn read_with_retry<T>(
    retries: u32,
    what: &str,
    mut op: impl FnMut() -> StoreResult<T>,
) -> StoreResult<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!(read = what, attempt, error = %e, "Store read failed, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

/// External services the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub approvals: Arc<dyn ApprovalWorkflow>,
    pub evidence: Arc<dyn EvidenceStore>,
    pub directory: Arc<dyn OrgDirectory>,
}

impl Collaborators {
    /// HTTP approvals when an endpoint is configured, config-backed rosters
    pub fn from_policy(policy: &Policy) -> CollabResult<Self> {
        let approvals: Arc<dyn ApprovalWorkflow> = match &policy.escalation.approval_url {
            Some(url) => Arc::new(HttpApprovalWorkflow::new(
                url.clone(),
                policy.service.collaborator_timeout,
            )?),
            None => Arc::new(DisabledApprovalWorkflow),
        };

        Ok(Self {
            approvals,
            evidence: Arc::new(AcceptingEvidenceStore),
            directory: Arc::new(StaticOrgDirectory::new(policy.teams.clone())),
        })
    }
}

/// Counts from one missed punch-out sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub overdue: usize,
    pub flagged: usize,
    pub escalated: usize,
}

/// The attendance engine. Cheap to share behind an `Arc`; every operation
/// takes `&self` and serializes through the store.
pub struct PunchEngine {
    policy: Policy,
    store: Arc<dyn SessionStore>,
    spoof: SpoofGuard,
    evidence: Arc<dyn EvidenceStore>,
    escalator: ExceptionEscalator,
    team: TeamStatusAggregator,
    /// Held for a whole sweep so overlapping sweeps cannot escalate twice
    sweep_lock: tokio::sync::Mutex<()>,
}

impl PunchEngine {
    pub fn new(policy: Policy, store: Arc<dyn SessionStore>, collaborators: Collaborators) -> Self {
        info!(
            site_count = policy.sites.len(),
            team_count = policy.teams.len(),
            "Punch engine initialized"
        );

        let _ = store.append_audit(AuditEvent::new(AuditEventType::PolicyLoaded {
            site_count: policy.sites.len(),
        }));

        let timeout = policy.service.collaborator_timeout;
        let escalator = ExceptionEscalator::new(
            collaborators.approvals,
            store.clone(),
            &policy.escalation,
            timeout,
        );
        let team = TeamStatusAggregator::new(
            store.clone(),
            collaborators.directory,
            timeout,
            policy.service.read_retries,
        );

        Self {
            spoof: SpoofGuard::new(policy.spoof.clone()),
            evidence: collaborators.evidence,
            escalator,
            team,
            sweep_lock: tokio::sync::Mutex::new(()),
            store,
            policy,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn is_healthy(&self) -> bool {
        self.store.is_healthy()
    }

    fn read<T>(&self, what: &str, op: impl FnMut() -> StoreResult<T>) -> EngineResult<T> {
        Ok(read_with_retry(self.policy.service.read_retries, what, op)?)
    }

    /// Audit and log a refused transition, then hand the error back
    fn rejected(&self, user_id: &UserId, action: &str, err: EngineError) -> EngineError {
        info!(user_id = %user_id, action, kind = ?err.kind(), reason = %err, "Punch rejected");

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::PunchRejected {
            user_id: user_id.clone(),
            action: action.to_string(),
            kind: format!("{:?}", err.kind()),
            reason: err.to_string(),
        }));

        err
    }

    fn sample_from(coordinates: &Coordinates, now: DateTime<Local>) -> EngineResult<LocationSample> {
        if let (Some(lat), Some(lon)) = (coordinates.latitude, coordinates.longitude) {
            geo::check_coordinate(lat, lon)?;
        }
        coordinates.to_sample(now).map_err(EngineError::Validation)
    }

    /// Previous sample for teleport checks: where the user last clocked out
    fn previous_sample(&self, user_id: &UserId) -> EngineResult<Option<LocationSample>> {
        let last = self.read("last_completed_session", || {
            self.store.last_completed_session(user_id)
        })?;
        Ok(last.and_then(|s| s.clock_out_location))
    }

    async fn check_evidence(&self, evidence_ref: &str, warnings: &mut Vec<String>) -> EngineResult<()> {
        let timeout = self.policy.service.collaborator_timeout;
        match tokio::time::timeout(timeout, self.evidence.confirm(evidence_ref)).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(EngineError::Validation(format!(
                "Evidence photo {} was not found",
                evidence_ref
            ))),
            Ok(Err(e)) => {
                warn!(evidence_ref, error = %e, "Evidence store unavailable");
                warnings.push("Evidence photo could not be confirmed".into());
                Ok(())
            }
            Err(_) => {
                warn!(evidence_ref, "Evidence store timed out");
                warnings.push("Evidence photo could not be confirmed".into());
                Ok(())
            }
        }
    }

    /// Clock in at a workplace.
    ///
    /// Guards run in order: request shape, spoofing heuristics, geofence,
    /// evidence photo, then the atomic one-open-session check.
    pub async fn clock_in(
        &self,
        identity: &Identity,
        request: &PunchInRequest,
        now: DateTime<Local>,
    ) -> EngineResult<PunchResponse> {
        let user_id = &identity.user_id;
        let reject = |err: EngineError| self.rejected(user_id, "punch_in", err);

        let sample = Self::sample_from(&request.coordinates, now).map_err(reject)?;
        let (site_id, _) = request
            .validate(now)
            .map_err(|e| reject(EngineError::Validation(e)))?;
        let site = self
            .policy
            .get_site(&site_id)
            .ok_or_else(|| reject(EngineError::Validation(format!("Unknown workplace {}", site_id))))?;

        let previous = self.previous_sample(user_id)?;
        let mut flags = self.spoof.assess(&sample, previous.as_ref());
        if !self.spoof.rejecting(&flags).is_empty() {
            return Err(reject(EngineError::ImplausibleLocation { flags }));
        }

        let verdict = geo::verify(&sample, &site.site).map_err(reject)?;
        if !verdict.within_fence {
            return Err(reject(EngineError::OutsideGeofence {
                distance_meters: verdict.distance_meters,
                radius_meters: site.site.radius_meters,
            }));
        }

        let mut warnings = Vec::new();
        let evidence_ref = request
            .evidence_photo_ref
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());
        match evidence_ref {
            Some(r) => self.check_evidence(r, &mut warnings).await.map_err(reject)?,
            None if self.policy.punch.require_evidence_photo => {
                return Err(reject(EngineError::Validation(
                    "evidencePhotoRef is required".into(),
                )));
            }
            None => {}
        }

        let late_by = site.shift_start.and_then(|start| {
            let due = start.on_day_of(&now)? + chrono::Duration::from_std(site.late_grace).ok()?;
            (now > due).then(|| (now - due, start))
        });
        if late_by.is_some() {
            flags.insert(FlagKind::LateArrival);
        }

        let mut session = session::open_session(
            user_id.clone(),
            site_id.clone(),
            sample,
            evidence_ref.map(str::to_string),
            flags,
            now,
        );

        match self.store.create_if_absent(&session)? {
            CreateOutcome::Created => {}
            CreateOutcome::Existing(existing) => {
                return Err(reject(EngineError::AlreadyActive {
                    session_id: existing.id,
                }));
            }
        }

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::ClockedIn {
            session_id: session.id,
            user_id: user_id.clone(),
            workplace_id: site_id.clone(),
            flags: session.flags.clone(),
        }));

        info!(
            session_id = %session.id,
            user_id = %user_id,
            workplace_id = %site_id,
            distance_meters = verdict.distance_meters,
            "Clocked in"
        );

        if let Some((late, shift_start)) = late_by
            && self.escalator.is_allowed(ExceptionKind::LateArrival)
        {
            let reason = format!(
                "Clocked in {} after shift start {} plus grace",
                punch_util::format_minutes(late.num_minutes().max(1)),
                shift_start
            );
            let escalation = self
                .escalator
                .raise(
                    ExceptionKind::LateArrival,
                    SourceRef::Session {
                        session_id: session.id,
                    },
                    user_id,
                    &reason,
                    now,
                )
                .await?;
            if let Some(ticket_ref) = escalation.ticket_ref {
                session.exception_tickets.push(RaisedTicket {
                    ticket_ref,
                    kind: ExceptionKind::LateArrival,
                    raised_at: now,
                });
            }
            warnings.extend(escalation.warnings);
        }

        Ok(PunchResponse::new(session, warnings))
    }

    /// Load the session a mutation targets: an explicit id, or the caller's open session
    fn load_for_mutation(
        &self,
        identity: &Identity,
        session_id: Option<SessionId>,
    ) -> EngineResult<AttendanceSession> {
        match session_id {
            Some(id) => {
                let session = self
                    .read("get_session", || self.store.get_session(&id))?
                    .ok_or_else(|| EngineError::NotFound(format!("Session {}", id)))?;
                if session.user_id != identity.user_id {
                    return Err(EngineError::Forbidden(
                        "Only the session owner may change it".into(),
                    ));
                }
                Ok(session)
            }
            None => self
                .read("get_open_session", || {
                    self.store.get_open_session(&identity.user_id)
                })?
                .ok_or(EngineError::NoActiveSession),
        }
    }

    /// Apply `transition` to the target session and commit it with a versioned update
    fn mutate<T>(
        &self,
        identity: &Identity,
        action: &str,
        session_id: Option<SessionId>,
        expected_version: Option<u64>,
        transition: impl FnOnce(&mut AttendanceSession) -> EngineResult<T>,
    ) -> EngineResult<(AttendanceSession, T)> {
        let reject = |err: EngineError| self.rejected(&identity.user_id, action, err);

        let stored = self.load_for_mutation(identity, session_id).map_err(reject)?;
        let mut session = stored.clone();
        let output = transition(&mut session).map_err(reject)?;

        if let Some(expected) = expected_version
            && expected != stored.version
        {
            return Err(reject(EngineError::StaleSession {
                stored_version: stored.version,
            }));
        }

        match self.store.update_versioned(&session, stored.version)? {
            UpdateOutcome::Committed => Ok((session, output)),
            UpdateOutcome::Stale { stored_version } => {
                Err(reject(EngineError::StaleSession { stored_version }))
            }
            UpdateOutcome::Missing => {
                Err(reject(EngineError::NotFound(format!("Session {}", session.id))))
            }
        }
    }

    pub fn start_break(
        &self,
        identity: &Identity,
        session_id: Option<SessionId>,
        request: &BreakStartRequest,
        now: DateTime<Local>,
    ) -> EngineResult<PunchResponse> {
        let break_type = request
            .validate()
            .map_err(|e| self.rejected(&identity.user_id, "break_start", EngineError::Validation(e)))?;

        let (session, break_id) = self.mutate(
            identity,
            "break_start",
            session_id,
            request.expected_version,
            |s| session::begin_break(s, break_type, request.notes.clone(), now),
        )?;

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::BreakStarted {
            session_id: session.id,
            break_id,
            break_type,
        }));

        info!(session_id = %session.id, break_id = %break_id, "Break started");
        Ok(PunchResponse::new(session, Vec::new()))
    }

    pub fn end_break(
        &self,
        identity: &Identity,
        session_id: Option<SessionId>,
        request: &BreakEndRequest,
        now: DateTime<Local>,
    ) -> EngineResult<PunchResponse> {
        request
            .validate()
            .map_err(|e| self.rejected(&identity.user_id, "break_end", EngineError::Validation(e)))?;

        let (session, break_id) = self.mutate(
            identity,
            "break_end",
            session_id,
            request.expected_version,
            |s| session::end_break(s, request.notes.clone(), now),
        )?;

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::BreakEnded {
            session_id: session.id,
            break_id,
        }));

        info!(session_id = %session.id, break_id = %break_id, "Break ended");
        Ok(PunchResponse::new(session, Vec::new()))
    }

    /// Clock out. Location checks only annotate; they never block leaving.
    /// A punch-out outside the fence opens a location dispute.
    pub async fn clock_out(
        &self,
        identity: &Identity,
        session_id: Option<SessionId>,
        request: &PunchOutRequest,
        now: DateTime<Local>,
    ) -> EngineResult<PunchResponse> {
        let sample = Self::sample_from(&request.coordinates, now)
            .map_err(|e| self.rejected(&identity.user_id, "punch_out", e))?;

        let (mut session, minutes) = self.mutate(
            identity,
            "punch_out",
            session_id,
            request.expected_version,
            |s| {
                let mut flags = self.spoof.assess(&sample, s.clock_in_location.as_ref());
                if let Some(site) = self.policy.get_site(&s.workplace_id)
                    && !geo::verify(&sample, &site.site)?.within_fence
                {
                    flags.insert(FlagKind::OutsideGeofence);
                }
                session::close(s, sample, flags, now)
            },
        )?;

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::ClockedOut {
            session_id: session.id,
            user_id: session.user_id.clone(),
            work_duration_minutes: minutes,
            flags: session.flags.clone(),
        }));

        info!(
            session_id = %session.id,
            user_id = %session.user_id,
            worked = %punch_util::format_minutes(minutes),
            "Clocked out"
        );

        let mut warnings = Vec::new();
        if session.flags.contains(&FlagKind::OutsideGeofence)
            && self.escalator.is_allowed(ExceptionKind::LocationDispute)
        {
            let escalation = self
                .escalator
                .raise(
                    ExceptionKind::LocationDispute,
                    SourceRef::Session {
                        session_id: session.id,
                    },
                    &session.user_id,
                    "Punched out outside the workplace geofence",
                    now,
                )
                .await?;
            if let Some(ticket_ref) = escalation.ticket_ref {
                session.exception_tickets.push(RaisedTicket {
                    ticket_ref,
                    kind: ExceptionKind::LocationDispute,
                    raised_at: now,
                });
            }
            warnings.extend(escalation.warnings);
        }

        Ok(PunchResponse::new(session, warnings))
    }

    /// Ask for a late-arrival exception without touching any session
    pub async fn request_late_exception(
        &self,
        identity: &Identity,
        request: &LateExceptionRequest,
        now: DateTime<Local>,
    ) -> EngineResult<ExceptionResponse> {
        let reason = request.validate().map_err(EngineError::Validation)?;

        let open = self.read("get_open_session", || {
            self.store.get_open_session(&identity.user_id)
        })?;
        let source = match &open {
            Some(s) => SourceRef::Session { session_id: s.id },
            None => SourceRef::User {
                user_id: identity.user_id.clone(),
            },
        };
        let source_session_id = source.session_id();

        let escalation = self
            .escalator
            .raise(
                ExceptionKind::LateArrival,
                source,
                &identity.user_id,
                &reason,
                now,
            )
            .await?;

        Ok(ExceptionResponse {
            ticket_ref: escalation.ticket_ref,
            source_session_id,
            warnings: escalation.warnings,
        })
    }

    /// Flag sessions left open past the maximum shift length and raise a
    /// missed punch-out exception for each one that does not have a ticket yet.
    pub async fn sweep_missed_punch_outs(&self, now: DateTime<Local>) -> EngineResult<SweepReport> {
        let max_shift = chrono::Duration::from_std(self.policy.punch.max_shift)
            .unwrap_or_else(|_| chrono::Duration::hours(16));
        let missed: FlagSet = [FlagKind::MissedPunchOut].into_iter().collect();

        let _sweep = self.sweep_lock.lock().await;
        let open = self.read("list_open_sessions", || self.store.list_open_sessions())?;
        let mut report = SweepReport::default();

        for stored in open {
            let Some(clock_in_at) = stored.clock_in_at else {
                continue;
            };
            if now - clock_in_at <= max_shift {
                continue;
            }
            report.overdue += 1;

            let mut session = stored.clone();
            if session::add_flags(&mut session, &missed) {
                match self.store.update_versioned(&session, stored.version) {
                    Ok(UpdateOutcome::Committed) => {
                        report.flagged += 1;
                        let _ = self.store.append_audit(AuditEvent::new(
                            AuditEventType::SessionFlagged {
                                session_id: session.id,
                                flags: missed.clone(),
                            },
                        ));
                        info!(session_id = %session.id, user_id = %session.user_id, "Missed punch-out flagged");
                    }
                    Ok(outcome) => {
                        // Changed underneath us; the next sweep sees the new version
                        debug!(session_id = %session.id, ?outcome, "Skipping flag, session moved on");
                        continue;
                    }
                    Err(e) => {
                        warn!(session_id = %session.id, error = %e, "Failed to flag missed punch-out");
                        continue;
                    }
                }
            }

            if session.has_ticket(ExceptionKind::MissedPunchOut)
                || !self.escalator.is_allowed(ExceptionKind::MissedPunchOut)
            {
                continue;
            }

            let reason = format!(
                "Session open since {} without a punch-out",
                clock_in_at.format("%Y-%m-%d %H:%M")
            );
            let escalation = self
                .escalator
                .raise(
                    ExceptionKind::MissedPunchOut,
                    SourceRef::Session {
                        session_id: session.id,
                    },
                    &session.user_id,
                    &reason,
                    now,
                )
                .await?;
            if escalation.ticket_ref.is_some() {
                report.escalated += 1;
            }
        }

        if report.overdue > 0 {
            info!(
                overdue = report.overdue,
                flagged = report.flagged,
                escalated = report.escalated,
                "Missed punch-out sweep finished"
            );
        }

        Ok(report)
    }

    pub fn current(&self, identity: &Identity) -> EngineResult<CurrentStatus> {
        let open = self.read("get_open_session", || {
            self.store.get_open_session(&identity.user_id)
        })?;

        Ok(CurrentStatus {
            is_punched_in: open.is_some(),
            session: open.map(|s| s.summary()),
        })
    }

    pub fn history(&self, identity: &Identity, query: &HistoryQuery) -> EngineResult<HistoryPage> {
        if let (Some(from), Some(to)) = (query.from, query.to)
            && from > to
        {
            return Err(EngineError::Validation("from must not be after to".into()));
        }

        let query = query.clone().normalized();
        let (sessions, total) = self.read("history", || {
            self.store.history(&identity.user_id, &query)
        })?;

        Ok(HistoryPage {
            sessions,
            page: query.page,
            per_page: query.per_page,
            total,
        })
    }

    pub async fn team_status(
        &self,
        identity: &Identity,
        filter: &TeamFilter,
    ) -> EngineResult<Vec<TeamMemberStatus>> {
        self.team.status_for(identity, filter).await
    }

    /// Check a coordinate against a site without punching
    pub fn verify_location(
        &self,
        workplace_id: &SiteId,
        coordinates: &Coordinates,
        now: DateTime<Local>,
    ) -> EngineResult<VerifyLocationResponse> {
        let site = self
            .policy
            .get_site(workplace_id)
            .ok_or_else(|| EngineError::Validation(format!("Unknown workplace {}", workplace_id)))?;

        let latitude = coordinates
            .latitude
            .ok_or_else(|| EngineError::Validation("latitude is required".into()))?;
        let longitude = coordinates
            .longitude
            .ok_or_else(|| EngineError::Validation("longitude is required".into()))?;
        geo::check_coordinate(latitude, longitude)?;

        let accuracy_meters = match coordinates.accuracy {
            Some(a) if !a.is_finite() || a <= 0.0 => {
                return Err(EngineError::Validation(
                    "accuracy must be a positive number of meters".into(),
                ));
            }
            Some(a) => a,
            None => 0.0,
        };

        let sample = LocationSample {
            latitude,
            longitude,
            accuracy_meters,
            captured_at: now,
        };
        let verdict = geo::verify(&sample, &site.site)?;

        Ok(VerifyLocationResponse {
            is_valid: verdict.within_fence,
            distance_meters: verdict.distance_meters,
            radius_meters: site.site.radius_meters,
            plausibility: geo::plausibility_score(&sample, &site.site)?,
        })
    }
}
