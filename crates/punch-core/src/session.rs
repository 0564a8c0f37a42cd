//! Session state machine
//!
//! Pure transitions on an [`AttendanceSession`]. Every successful transition
//! bumps `version`; persistence and guards that need the outside world
//! (geofence, store, collaborators) live in the engine.

use chrono::{DateTime, Local};
use punch_api::{AttendanceSession, BreakRecord, BreakType, FlagSet, LocationSample, SessionStatus};
use punch_util::{BreakId, SessionId, SiteId, UserId};

use crate::{EngineError, EngineResult};

/// Build a fresh Active session
pub fn open_session(
    user_id: UserId,
    workplace_id: SiteId,
    sample: LocationSample,
    evidence_photo_ref: Option<String>,
    flags: FlagSet,
    now: DateTime<Local>,
) -> AttendanceSession {
    AttendanceSession {
        id: SessionId::new(),
        user_id,
        workplace_id,
        status: SessionStatus::Active,
        version: 1,
        clock_in_at: Some(now),
        clock_out_at: None,
        clock_in_location: Some(sample),
        clock_out_location: None,
        breaks: Vec::new(),
        evidence_photo_ref,
        work_duration_minutes: None,
        flags,
        exception_tickets: Vec::new(),
    }
}

/// Active -> OnBreak
pub fn begin_break(
    session: &mut AttendanceSession,
    break_type: BreakType,
    notes: Option<String>,
    now: DateTime<Local>,
) -> EngineResult<BreakId> {
    match session.status {
        SessionStatus::Active => {}
        SessionStatus::OnBreak => {
            return Err(EngineError::InvalidState("A break is already in progress".into()));
        }
        SessionStatus::Idle | SessionStatus::Completed => return Err(EngineError::NoActiveSession),
    }
    if session.open_break().is_some() {
        return Err(EngineError::InvalidState("A break is already in progress".into()));
    }

    let id = BreakId::new();
    session.breaks.push(BreakRecord {
        id,
        session_id: session.id,
        break_type,
        start_at: now,
        end_at: None,
        notes,
    });
    session.status = SessionStatus::OnBreak;
    session.version += 1;

    Ok(id)
}

fn append_note(existing: &mut Option<String>, note: Option<String>) {
    if let Some(note) = note {
        *existing = Some(match existing.take() {
            Some(prev) => format!("{}\n{}", prev, note),
            None => note,
        });
    }
}

/// OnBreak -> Active
pub fn end_break(
    session: &mut AttendanceSession,
    notes: Option<String>,
    now: DateTime<Local>,
) -> EngineResult<BreakId> {
    if session.status != SessionStatus::OnBreak {
        return Err(EngineError::NoActiveSession);
    }
    let open = session.open_break_mut().ok_or(EngineError::NoActiveSession)?;

    open.end_at = Some(now.max(open.start_at));
    append_note(&mut open.notes, notes);
    let id = open.id;

    session.status = SessionStatus::Active;
    session.version += 1;

    Ok(id)
}

/// Whole minutes worked between clock-in and clock-out, net of breaks.
/// Never negative.
pub fn work_minutes(
    clock_in_at: DateTime<Local>,
    clock_out_at: DateTime<Local>,
    breaks: chrono::Duration,
) -> i64 {
    let worked = clock_out_at - clock_in_at - breaks;
    worked.num_minutes().max(0)
}

/// Active | OnBreak -> Completed. Closes an open break at `now` first.
/// Returns the computed work duration in minutes.
pub fn close(
    session: &mut AttendanceSession,
    sample: LocationSample,
    flags: FlagSet,
    now: DateTime<Local>,
) -> EngineResult<i64> {
    if !session.status.is_open() {
        return Err(EngineError::NoActiveSession);
    }

    if let Some(open) = session.open_break_mut() {
        open.end_at = Some(now.max(open.start_at));
    }

    let clock_in_at = session.clock_in_at.unwrap_or(now);
    let minutes = work_minutes(clock_in_at, now, session.total_break_duration());

    session.status = SessionStatus::Completed;
    session.clock_out_at = Some(now);
    session.clock_out_location = Some(sample);
    session.work_duration_minutes = Some(minutes);
    session.flags.extend(flags);
    session.version += 1;

    Ok(minutes)
}

/// Add annotation flags. Returns false (and leaves the version alone) when
/// every flag was already present.
pub fn add_flags(session: &mut AttendanceSession, flags: &FlagSet) -> bool {
    if flags.is_subset(&session.flags) {
        return false;
    }
    session.flags.extend(flags.iter().copied());
    session.version += 1;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use punch_api::FlagKind;

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 2, h, m, 0).unwrap()
    }

    fn sample(t: DateTime<Local>) -> LocationSample {
        LocationSample {
            latitude: 40.7128,
            longitude: -74.0060,
            accuracy_meters: 5.0,
            captured_at: t,
        }
    }

    fn fresh(t: DateTime<Local>) -> AttendanceSession {
        open_session(
            UserId::new("emp-1"),
            SiteId::new("w1"),
            sample(t),
            Some("photo-1".into()),
            FlagSet::new(),
            t,
        )
    }

    #[test]
    fn full_day_with_lunch() {
        let mut s = fresh(at(9, 0));
        assert_eq!(s.status, SessionStatus::Active);
        assert_eq!(s.version, 1);

        begin_break(&mut s, BreakType::Lunch, None, at(12, 0)).unwrap();
        assert_eq!(s.status, SessionStatus::OnBreak);
        end_break(&mut s, Some("back".into()), at(12, 30)).unwrap();
        assert_eq!(s.status, SessionStatus::Active);

        let minutes = close(&mut s, sample(at(17, 0)), FlagSet::new(), at(17, 0)).unwrap();
        assert_eq!(minutes, 450);
        assert_eq!(s.work_duration_minutes, Some(450));
        assert_eq!(s.status, SessionStatus::Completed);
        assert_eq!(s.version, 4);
        assert_eq!(s.breaks[0].notes.as_deref(), Some("back"));
    }

    #[test]
    fn break_guards() {
        let mut s = fresh(at(9, 0));

        assert!(matches!(end_break(&mut s, None, at(10, 0)), Err(EngineError::NoActiveSession)));

        begin_break(&mut s, BreakType::Rest, None, at(10, 0)).unwrap();
        assert!(matches!(
            begin_break(&mut s, BreakType::Rest, None, at(10, 5)),
            Err(EngineError::InvalidState(_))
        ));
        assert_eq!(s.version, 2);
    }

    #[test]
    fn clock_out_closes_open_break() {
        let mut s = fresh(at(9, 0));
        begin_break(&mut s, BreakType::Lunch, None, at(16, 0)).unwrap();

        let minutes = close(&mut s, sample(at(17, 0)), FlagSet::new(), at(17, 0)).unwrap();
        assert_eq!(minutes, 7 * 60);
        assert_eq!(s.breaks[0].end_at, Some(at(17, 0)));
        assert!(s.open_break().is_none());
    }

    #[test]
    fn completed_session_is_final() {
        let mut s = fresh(at(9, 0));
        close(&mut s, sample(at(17, 0)), FlagSet::new(), at(17, 0)).unwrap();
        let before = s.clone();

        assert!(matches!(
            close(&mut s, sample(at(18, 0)), FlagSet::new(), at(18, 0)),
            Err(EngineError::NoActiveSession)
        ));
        assert!(matches!(
            begin_break(&mut s, BreakType::Rest, None, at(18, 0)),
            Err(EngineError::NoActiveSession)
        ));
        assert_eq!(s, before);
    }

    #[test]
    fn work_minutes_floors_and_clamps() {
        let t0 = at(9, 0);
        let t1 = t0 + chrono::Duration::seconds(59 * 60 + 59);
        assert_eq!(work_minutes(t0, t1, chrono::Duration::zero()), 59);
        assert_eq!(work_minutes(t0, at(9, 10), chrono::Duration::minutes(30)), 0);
    }

    #[test]
    fn clock_out_flags_are_merged() {
        let mut s = fresh(at(9, 0));
        let flags: FlagSet = [FlagKind::OutsideGeofence].into_iter().collect();
        close(&mut s, sample(at(17, 0)), flags, at(17, 0)).unwrap();
        assert!(s.flags.contains(&FlagKind::OutsideGeofence));
    }

    #[test]
    fn add_flags_only_bumps_on_change() {
        let mut s = fresh(at(9, 0));
        let flags: FlagSet = [FlagKind::MissedPunchOut].into_iter().collect();

        assert!(add_flags(&mut s, &flags));
        assert_eq!(s.version, 2);
        assert!(!add_flags(&mut s, &flags));
        assert_eq!(s.version, 2);
    }
}
