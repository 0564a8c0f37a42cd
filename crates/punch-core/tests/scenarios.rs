//! End-to-end attendance scenarios against a real SQLite store

use chrono::{DateTime, Local, TimeZone};
use punch_api::{
    BreakEndRequest, BreakStartRequest, BreakType, Coordinates, FlagKind, Identity,
    PunchInRequest, PunchOutRequest, Role, SessionStatus, TeamFilter, TeamPresence,
    WorkplaceSite,
};
use punch_collab::{MockApprovalWorkflow, MockEvidenceStore, MockOrgDirectory};
use punch_config::{Policy, Site};
use punch_core::{Collaborators, EngineError, PunchEngine};
use punch_store::{SessionStore, SqliteStore};
use punch_util::{SiteId, UserId};
use std::sync::Arc;

fn at(h: u32, m: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(2025, 6, 2, h, m, 0).unwrap()
}

fn make_policy() -> Policy {
    let mut policy = Policy::default();
    for (id, lat, lon) in [("W1", 40.7128, -74.0060), ("W2", 40.7580, -73.9855)] {
        policy.sites.push(Site::unscheduled(WorkplaceSite {
            id: SiteId::new(id),
            name: format!("Site {}", id),
            address: None,
            center_latitude: lat,
            center_longitude: lon,
            radius_meters: 100.0,
        }));
    }
    policy
}

fn make_engine(store: Arc<dyn SessionStore>, directory: MockOrgDirectory) -> PunchEngine {
    let collaborators = Collaborators {
        approvals: Arc::new(MockApprovalWorkflow::new()),
        evidence: Arc::new(MockEvidenceStore::with_refs(["photo-1"])),
        directory: Arc::new(directory),
    };
    PunchEngine::new(make_policy(), store, collaborators)
}

fn engine() -> PunchEngine {
    make_engine(Arc::new(SqliteStore::in_memory().unwrap()), MockOrgDirectory::new())
}

fn punch_in_at(site: &str, lat: f64, lon: f64, accuracy: f64) -> PunchInRequest {
    PunchInRequest {
        workplace_id: Some(site.into()),
        coordinates: Coordinates {
            latitude: Some(lat),
            longitude: Some(lon),
            accuracy: Some(accuracy),
        },
        evidence_photo_ref: Some("photo-1".into()),
    }
}

fn punch_in(accuracy: f64) -> PunchInRequest {
    punch_in_at("W1", 40.7128, -74.0060, accuracy)
}

fn punch_out() -> PunchOutRequest {
    PunchOutRequest {
        coordinates: Coordinates {
            latitude: Some(40.7128),
            longitude: Some(-74.0060),
            accuracy: Some(5.0),
        },
        expected_version: None,
    }
}

fn employee(id: &str) -> Identity {
    Identity::new(id, Role::Employee)
}

#[tokio::test]
async fn scenario_a_clock_in_at_site_center() {
    let engine = engine();
    let response = engine.clock_in(&employee("emp-1"), &punch_in(5.0), at(9, 0)).await.unwrap();

    assert_eq!(response.session.status, SessionStatus::Active);
    assert_eq!(response.session.workplace_id, SiteId::new("W1"));
    assert_eq!(response.session.clock_in_at, Some(at(9, 0)));

    let current = engine.current(&employee("emp-1")).unwrap();
    assert!(current.is_punched_in);
}

#[tokio::test]
async fn scenario_b_sub_meter_accuracy_rejected() {
    let engine = engine();
    let err = engine
        .clock_in(&employee("emp-1"), &punch_in(0.1), at(9, 0))
        .await
        .unwrap_err();

    match err {
        EngineError::ImplausibleLocation { flags } => assert!(flags.contains(&FlagKind::LowAccuracy)),
        other => panic!("unexpected {:?}", other),
    }
    assert!(!engine.current(&employee("emp-1")).unwrap().is_punched_in);
}

#[tokio::test]
async fn spoofing_floor_boundary() {
    let engine = engine();
    let err = engine
        .clock_in(&employee("emp-1"), &punch_in(0.99), at(9, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ImplausibleLocation { .. }));

    assert!(engine.clock_in(&employee("emp-1"), &punch_in(5.0), at(9, 0)).await.is_ok());
}

#[tokio::test]
async fn scenario_c_full_day_duration() {
    let engine = engine();
    let me = employee("emp-1");

    engine.clock_in(&me, &punch_in(5.0), at(9, 0)).await.unwrap();

    let lunch = BreakStartRequest {
        break_type: Some(BreakType::Lunch),
        notes: None,
        expected_version: Some(1),
    };
    let on_break = engine.start_break(&me, None, &lunch, at(12, 0)).unwrap();
    assert_eq!(on_break.session.status, SessionStatus::OnBreak);

    let back = BreakEndRequest {
        notes: None,
        expected_version: Some(2),
    };
    engine.end_break(&me, None, &back, at(12, 30)).unwrap();

    let done = engine.clock_out(&me, None, &punch_out(), at(17, 0)).await.unwrap();
    assert_eq!(done.session.status, SessionStatus::Completed);
    assert_eq!(done.session.work_duration_minutes, Some(450));
    assert_eq!(done.session.version, 4);

    // Round-trips through the store unchanged
    let history = engine.history(&me, &Default::default()).unwrap();
    assert_eq!(history.sessions[0].work_duration_minutes, Some(450));
    assert_eq!(history.sessions[0].breaks.len(), 1);
}

#[tokio::test]
async fn duration_with_several_breaks() {
    let engine = engine();
    let me = employee("emp-1");
    let start = |t: BreakType| BreakStartRequest {
        break_type: Some(t),
        notes: None,
        expected_version: None,
    };

    engine.clock_in(&me, &punch_in(5.0), at(8, 0)).await.unwrap();

    engine.start_break(&me, None, &start(BreakType::Rest), at(10, 0)).unwrap();
    engine.end_break(&me, None, &BreakEndRequest::default(), at(10, 15)).unwrap();
    engine.start_break(&me, None, &start(BreakType::Lunch), at(12, 0)).unwrap();
    engine.end_break(&me, None, &BreakEndRequest::default(), at(12, 45)).unwrap();
    // Left open; punch-out closes it
    engine.start_break(&me, None, &start(BreakType::Rest), at(15, 30)).unwrap();

    let done = engine.clock_out(&me, None, &punch_out(), at(16, 0)).await.unwrap();
    let session = done.session;

    assert_eq!(session.breaks.len(), 3);
    assert!(session.breaks.iter().all(|b| b.end_at.is_some()));
    assert_eq!(session.breaks[2].end_at, Some(at(16, 0)));

    // 8h on the clock, minus 15 + 45 + 30 minutes of breaks
    assert_eq!(session.work_duration_minutes, Some(480 - 90));

    let history = engine.history(&me, &Default::default()).unwrap();
    assert_eq!(history.sessions[0].work_duration_minutes, Some(390));
}

#[tokio::test]
async fn scenario_d_break_end_without_break() {
    let engine = engine();
    let me = employee("emp-1");
    engine.clock_in(&me, &punch_in(5.0), at(9, 0)).await.unwrap();

    let err = engine
        .end_break(&me, None, &BreakEndRequest::default(), at(10, 0))
        .unwrap_err();
    assert!(matches!(err, EngineError::NoActiveSession));
}

#[tokio::test]
async fn scenario_e_clock_out_twice() {
    let engine = engine();
    let me = employee("emp-1");
    let session = engine.clock_in(&me, &punch_in(5.0), at(9, 0)).await.unwrap().session;
    engine.clock_out(&me, None, &punch_out(), at(17, 0)).await.unwrap();

    // Implicit target: nothing open any more
    let err = engine.clock_out(&me, None, &punch_out(), at(17, 5)).await.unwrap_err();
    assert!(matches!(err, EngineError::NoActiveSession));

    // Explicit target: the completed session itself
    let err = engine
        .clock_out(&me, Some(session.id), &punch_out(), at(17, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NoActiveSession));
}

#[tokio::test]
async fn second_clock_in_is_already_active() {
    let engine = engine();
    let me = employee("emp-1");
    let first = engine.clock_in(&me, &punch_in(5.0), at(9, 0)).await.unwrap();

    let err = engine.clock_in(&me, &punch_in(5.0), at(9, 1)).await.unwrap_err();
    match err {
        EngineError::AlreadyActive { session_id } => assert_eq!(session_id, first.session.id),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clock_in_race() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SessionStore> =
        Arc::new(SqliteStore::open(dir.path().join("race.db")).unwrap());
    let engine = Arc::new(make_engine(store.clone(), MockOrgDirectory::new()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .clock_in(&employee("emp-1"), &punch_in(5.0), at(9, 0))
                .await
        }));
    }

    let mut created = 0;
    let mut already_active = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(EngineError::AlreadyActive { .. }) => already_active += 1,
            Err(other) => panic!("unexpected {:?}", other),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(already_active, 7);
    assert_eq!(store.list_open_sessions().unwrap().len(), 1);
}

#[tokio::test]
async fn stale_writer_loses() {
    let engine = engine();
    let me = employee("emp-1");
    engine.clock_in(&me, &punch_in(5.0), at(9, 0)).await.unwrap();

    let rest = BreakStartRequest {
        break_type: Some(BreakType::Rest),
        notes: None,
        expected_version: Some(1),
    };
    engine.start_break(&me, None, &rest, at(10, 0)).unwrap();

    // A second device still holding version 1
    let mut out = punch_out();
    out.expected_version = Some(1);
    let err = engine.clock_out(&me, None, &out, at(10, 1)).await.unwrap_err();
    assert!(matches!(err, EngineError::StaleSession { stored_version: 2 }));

    let current = engine.current(&me).unwrap().session.unwrap();
    assert_eq!(current.status, SessionStatus::OnBreak);
}

#[tokio::test]
async fn team_status_for_manager() {
    let directory = MockOrgDirectory::new();
    directory.set_roster("mgr-1", &["emp-1", "emp-2", "emp-3"]);
    let engine = make_engine(Arc::new(SqliteStore::in_memory().unwrap()), directory);

    engine.clock_in(&employee("emp-1"), &punch_in(5.0), at(9, 0)).await.unwrap();
    engine
        .clock_in(&employee("emp-2"), &punch_in_at("W2", 40.7580, -73.9855, 5.0), at(9, 0))
        .await
        .unwrap();
    let rest = BreakStartRequest {
        break_type: Some(BreakType::Rest),
        notes: None,
        expected_version: None,
    };
    engine.start_break(&employee("emp-2"), None, &rest, at(10, 0)).unwrap();
    // Not on mgr-1's team
    engine.clock_in(&employee("emp-9"), &punch_in(5.0), at(9, 0)).await.unwrap();

    let manager = Identity::new("mgr-1", Role::Manager);
    let all = engine.team_status(&manager, &TeamFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|m| m.user_id != UserId::new("emp-9")));
    let emp3 = all.iter().find(|m| m.user_id == UserId::new("emp-3")).unwrap();
    assert!(emp3.session.is_none());

    let on_break = TeamFilter {
        status: Some(TeamPresence::OnBreak),
        ..Default::default()
    };
    let members = engine.team_status(&manager, &on_break).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_id, UserId::new("emp-2"));

    let off = TeamFilter {
        status: Some(TeamPresence::Off),
        ..Default::default()
    };
    let members = engine.team_status(&manager, &off).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_id, UserId::new("emp-3"));

    let at_w1 = TeamFilter {
        workplace_id: Some(SiteId::new("W1")),
        ..Default::default()
    };
    let members = engine.team_status(&manager, &at_w1).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_id, UserId::new("emp-1"));
}

#[tokio::test]
async fn team_status_roles() {
    let directory = MockOrgDirectory::new();
    directory.set_roster("mgr-1", &["emp-1"]);
    let engine = make_engine(Arc::new(SqliteStore::in_memory().unwrap()), directory);
    engine.clock_in(&employee("emp-1"), &punch_in(5.0), at(9, 0)).await.unwrap();
    engine.clock_in(&employee("emp-9"), &punch_in(5.0), at(9, 0)).await.unwrap();

    let err = engine
        .team_status(&employee("emp-1"), &TeamFilter::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    let other_team = TeamFilter {
        manager_id: Some(UserId::new("mgr-2")),
        ..Default::default()
    };
    let err = engine
        .team_status(&Identity::new("mgr-1", Role::Manager), &other_team)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    let admin = Identity::new("root", Role::Admin);
    let everyone = engine.team_status(&admin, &TeamFilter::default()).await.unwrap();
    assert_eq!(everyone.len(), 2);

    let named = TeamFilter {
        manager_id: Some(UserId::new("mgr-1")),
        ..Default::default()
    };
    let team = engine.team_status(&admin, &named).await.unwrap();
    assert_eq!(team.len(), 1);
    assert_eq!(team[0].user_id, UserId::new("emp-1"));
}
