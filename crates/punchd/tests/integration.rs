//! Integration tests for punchd
//!
//! Drive the engine the way the service wires it: config from a TOML file,
//! collaborators derived from that config, sessions in an on-disk database.

use chrono::{DateTime, Local, TimeZone};
use punch_api::{
    BreakStartRequest, BreakType, Coordinates, FlagKind, HistoryQuery, Identity,
    PunchInRequest, PunchOutRequest, Role, SessionStatus, TeamFilter, TeamPresence,
};
use punch_config::{load_config, Policy};
use punch_core::{Collaborators, EngineError, PunchEngine};
use punch_store::{AuditEventType, SessionStore, SqliteStore};
use punch_util::{UserId, DATABASE_FILENAME};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

const CONFIG: &str = r#"
    config_version = 1

    [punch]
    max_shift_hours = 12

    [[sites]]
    id = "hq"
    name = "Head Office"
    latitude = 40.7128
    longitude = -74.0060
    radius_meters = 100.0
    shift_start = "09:00"
    late_grace_minutes = 5

    [[teams]]
    manager_id = "mgr-1"
    members = ["emp-1", "emp-2"]
"#;

fn at(hour: u32, minute: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(2025, 6, 2, hour, minute, 0).unwrap()
}

fn load_policy(dir: &Path) -> Policy {
    let path = dir.join("config.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    load_config(&path).unwrap()
}

fn start_engine(dir: &Path) -> (PunchEngine, Arc<SqliteStore>) {
    let policy = load_policy(dir);
    let store = Arc::new(SqliteStore::open(dir.join(DATABASE_FILENAME)).unwrap());
    let collaborators = Collaborators::from_policy(&policy).unwrap();
    (PunchEngine::new(policy, store.clone(), collaborators), store)
}

fn here() -> Coordinates {
    Coordinates {
        latitude: Some(40.7128),
        longitude: Some(-74.0060),
        accuracy: Some(8.0),
    }
}

fn punch_in() -> PunchInRequest {
    PunchInRequest {
        workplace_id: Some("hq".into()),
        coordinates: here(),
        evidence_photo_ref: Some("photos/emp-1/0602.jpg".into()),
    }
}

fn employee(id: &str) -> Identity {
    Identity::new(id, Role::Employee)
}

#[tokio::test]
async fn test_work_day_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let emp = employee("emp-1");

    let session_id = {
        let (engine, _store) = start_engine(dir.path());
        let resp = engine.clock_in(&emp, &punch_in(), at(8, 55)).await.unwrap();
        assert!(!resp.session.flags.contains(&FlagKind::LateArrival));

        engine
            .start_break(
                &emp,
                None,
                &BreakStartRequest {
                    break_type: Some(BreakType::Lunch),
                    notes: None,
                    expected_version: None,
                },
                at(12, 0),
            )
            .unwrap();
        resp.session.id
    };

    // Fresh engine over the same database
    let (engine, _store) = start_engine(dir.path());
    let current = engine.current(&emp).unwrap();
    assert!(current.is_punched_in);
    let summary = current.session.unwrap();
    assert_eq!(summary.session_id, session_id);
    assert_eq!(summary.status, SessionStatus::OnBreak);

    let result = engine.clock_in(&emp, &punch_in(), at(12, 10)).await;
    assert!(matches!(result, Err(EngineError::AlreadyActive { .. })));

    engine
        .end_break(&emp, None, &Default::default(), at(12, 30))
        .unwrap();
    let resp = engine
        .clock_out(
            &emp,
            None,
            &PunchOutRequest {
                coordinates: here(),
                expected_version: None,
            },
            at(17, 0),
        )
        .await
        .unwrap();
    assert_eq!(resp.session.status, SessionStatus::Completed);
    assert_eq!(resp.session.work_duration_minutes, Some(455));

    let page = engine.history(&emp, &HistoryQuery::default()).unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn test_late_punch_without_workflow_still_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _store) = start_engine(dir.path());

    // No approval_url configured, so escalation degrades to a warning
    let resp = engine
        .clock_in(&employee("emp-1"), &punch_in(), at(9, 20))
        .await
        .unwrap();

    assert!(resp.session.flags.contains(&FlagKind::LateArrival));
    assert!(resp.session.exception_tickets.is_empty());
    assert!(!resp.warnings.is_empty());
}

#[tokio::test]
async fn test_sweep_flags_forgotten_sessions_once() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, store) = start_engine(dir.path());
    let emp = employee("emp-1");

    engine.clock_in(&emp, &punch_in(), at(8, 55)).await.unwrap();

    let report = engine.sweep_missed_punch_outs(at(12, 0)).await.unwrap();
    assert_eq!(report.overdue, 0);

    let report = engine.sweep_missed_punch_outs(at(22, 0)).await.unwrap();
    assert_eq!(report.overdue, 1);
    assert_eq!(report.flagged, 1);
    assert_eq!(report.escalated, 0);

    let report = engine.sweep_missed_punch_outs(at(23, 0)).await.unwrap();
    assert_eq!(report.overdue, 1);
    assert_eq!(report.flagged, 0);

    let open = store.get_open_session(&UserId::new("emp-1")).unwrap().unwrap();
    assert!(open.flags.contains(&FlagKind::MissedPunchOut));

    let audits = store.get_recent_audits(50).unwrap();
    assert!(audits
        .iter()
        .any(|a| matches!(a.event, AuditEventType::SessionFlagged { .. })));
    assert!(audits
        .iter()
        .any(|a| matches!(a.event, AuditEventType::EscalationFailed { .. })));
}

#[tokio::test]
async fn test_team_roster_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _store) = start_engine(dir.path());

    engine
        .clock_in(&employee("emp-2"), &punch_in(), at(8, 50))
        .await
        .unwrap();

    let manager = Identity::new("mgr-1", Role::Manager);
    let team = engine
        .team_status(&manager, &TeamFilter::default())
        .await
        .unwrap();
    assert_eq!(team.len(), 2);

    let active = engine
        .team_status(
            &manager,
            &TeamFilter {
                status: Some(TeamPresence::Active),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].user_id, UserId::new("emp-2"));

    let result = engine
        .team_status(&employee("emp-1"), &TeamFilter::default())
        .await;
    assert!(matches!(result, Err(EngineError::Forbidden(_))));
}

#[test]
fn test_policy_loading() {
    let dir = tempfile::tempdir().unwrap();
    let policy = load_policy(dir.path());

    assert_eq!(policy.sites.len(), 1);
    assert!(policy.punch.require_evidence_photo);
    assert!(policy.escalation.approval_url.is_none());
}
