//! Request and response bodies for the attendance HTTP surface
//!
//! Each transition has its own strongly-typed body. Bodies are parsed with
//! serde and then checked with `validate()` before any guard runs.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use punch_util::{SessionId, SiteId, TicketRef, UserId};

use crate::{
    AttendanceSession, BreakType, LocationSample, SessionStatus, SessionSummary, API_VERSION,
};

/// Longest free-text note or reason accepted
pub const MAX_NOTE_LEN: usize = 500;

/// Coordinates as submitted by a device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
}

impl Coordinates {
    /// Check presence and range, then stamp the sample with `captured_at`
    pub fn to_sample(&self, captured_at: DateTime<Local>) -> Result<LocationSample, String> {
        let latitude = self.latitude.ok_or("latitude is required")?;
        let longitude = self.longitude.ok_or("longitude is required")?;
        let accuracy = self.accuracy.ok_or("accuracy is required")?;

        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(format!("latitude {} is out of range", latitude));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(format!("longitude {} is out of range", longitude));
        }
        if !accuracy.is_finite() || accuracy <= 0.0 {
            return Err("accuracy must be a positive number of meters".into());
        }

        Ok(LocationSample {
            latitude,
            longitude,
            accuracy_meters: accuracy,
            captured_at,
        })
    }
}

fn check_note(field: &str, note: &Option<String>) -> Result<(), String> {
    match note {
        Some(n) if n.chars().count() > MAX_NOTE_LEN => {
            Err(format!("{} must be at most {} characters", field, MAX_NOTE_LEN))
        }
        _ => Ok(()),
    }
}

/// `POST /attendance/punch-in`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PunchInRequest {
    pub workplace_id: Option<String>,
    #[serde(flatten)]
    pub coordinates: Coordinates,
    pub evidence_photo_ref: Option<String>,
}

impl PunchInRequest {
    pub fn validate(&self, now: DateTime<Local>) -> Result<(SiteId, LocationSample), String> {
        let workplace = self
            .workplace_id
            .as_deref()
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .ok_or("workplaceId is required")?;
        let sample = self.coordinates.to_sample(now)?;

        if let Some(photo) = &self.evidence_photo_ref
            && photo.trim().is_empty()
        {
            return Err("evidencePhotoRef must not be blank".into());
        }

        Ok((SiteId::new(workplace), sample))
    }
}

/// `POST /attendance/punch-out`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PunchOutRequest {
    #[serde(flatten)]
    pub coordinates: Coordinates,
    pub expected_version: Option<u64>,
}

/// `POST /attendance/break/start`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakStartRequest {
    #[serde(rename = "type")]
    pub break_type: Option<BreakType>,
    pub notes: Option<String>,
    pub expected_version: Option<u64>,
}

impl BreakStartRequest {
    pub fn validate(&self) -> Result<BreakType, String> {
        check_note("notes", &self.notes)?;
        self.break_type.ok_or_else(|| "type is required (lunch, rest, other)".into())
    }
}

/// `POST /attendance/break/end`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakEndRequest {
    pub notes: Option<String>,
    pub expected_version: Option<u64>,
}

impl BreakEndRequest {
    pub fn validate(&self) -> Result<(), String> {
        check_note("notes", &self.notes)
    }
}

/// `POST /attendance/exceptions/late`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LateExceptionRequest {
    pub reason: Option<String>,
}

impl LateExceptionRequest {
    pub fn validate(&self) -> Result<String, String> {
        let reason = self
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or("reason is required")?;
        check_note("reason", &Some(reason.to_string()))?;
        Ok(reason.to_string())
    }
}

/// Query for `GET /attendance/history`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryQuery {
    pub status: Option<SessionStatus>,
    pub from: Option<DateTime<Local>>,
    pub to: Option<DateTime<Local>>,
    /// 1-based page number
    pub page: u32,
    pub per_page: u32,
}

impl HistoryQuery {
    pub const DEFAULT_PER_PAGE: u32 = 20;
    pub const MAX_PER_PAGE: u32 = 100;

    /// Clamp paging parameters into their valid range
    pub fn normalized(mut self) -> Self {
        self.page = self.page.max(1);
        self.per_page = match self.per_page {
            0 => Self::DEFAULT_PER_PAGE,
            n => n.min(Self::MAX_PER_PAGE),
        };
        self
    }

    pub fn offset(&self) -> u64 {
        (self.page.saturating_sub(1) as u64) * self.per_page as u64
    }
}

/// Filters for `GET /attendance/team/status`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeamFilter {
    pub manager_id: Option<UserId>,
    pub status: Option<TeamPresence>,
    pub workplace_id: Option<SiteId>,
}

/// Presence of a team member, for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamPresence {
    Active,
    OnBreak,
    Off,
}

impl std::str::FromStr for TeamPresence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TeamPresence::Active),
            "on_break" => Ok(TeamPresence::OnBreak),
            "off" => Ok(TeamPresence::Off),
            other => Err(format!("Unknown team status filter: {}", other)),
        }
    }
}

/// Response to a successful punch or break transition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PunchResponse {
    pub api_version: u32,
    pub session: AttendanceSession,
    /// Soft failures (collaborators unreachable) that did not block the punch
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl PunchResponse {
    pub fn new(session: AttendanceSession, warnings: Vec<String>) -> Self {
        Self {
            api_version: API_VERSION,
            session,
            warnings,
        }
    }
}

/// `GET /attendance/current`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentStatus {
    pub is_punched_in: bool,
    pub session: Option<SessionSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub sessions: Vec<AttendanceSession>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMemberStatus {
    pub user_id: UserId,
    pub session: Option<SessionSummary>,
}

/// `GET /attendance/verify-location`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyLocationResponse {
    pub is_valid: bool,
    pub distance_meters: f64,
    pub radius_meters: f64,
    /// 1.0 when the accuracy circle sits inside the fence, 0.0 when it swamps it
    pub plausibility: f64,
}

/// Outcome of `POST /attendance/exceptions/late`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionResponse {
    pub ticket_ref: Option<TicketRef>,
    pub source_session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn punch_in_body_parses_flat_coordinates() {
        let body = r#"{"workplaceId":"hq","latitude":40.7128,"longitude":-74.006,"accuracy":5,"evidencePhotoRef":"photo-1"}"#;
        let req: PunchInRequest = serde_json::from_str(body).unwrap();

        let (site, sample) = req.validate(punch_util::now()).unwrap();
        assert_eq!(site.as_str(), "hq");
        assert_eq!(sample.accuracy_meters, 5.0);
    }

    #[test]
    fn punch_in_requires_workplace_and_coordinates() {
        let req: PunchInRequest =
            serde_json::from_str(r#"{"latitude":1.0,"longitude":1.0,"accuracy":5}"#).unwrap();
        assert!(req.validate(punch_util::now()).is_err());

        let req: PunchInRequest =
            serde_json::from_str(r#"{"workplaceId":"hq","longitude":1.0,"accuracy":5}"#).unwrap();
        assert_eq!(req.validate(punch_util::now()).unwrap_err(), "latitude is required");
    }

    #[test]
    fn coordinates_range_checked() {
        let coords = Coordinates {
            latitude: Some(91.0),
            longitude: Some(0.0),
            accuracy: Some(5.0),
        };
        assert!(coords.to_sample(punch_util::now()).is_err());

        let coords = Coordinates {
            latitude: Some(0.0),
            longitude: Some(0.0),
            accuracy: Some(0.0),
        };
        assert!(coords.to_sample(punch_util::now()).is_err());
    }

    #[test]
    fn break_start_requires_type() {
        let req: BreakStartRequest = serde_json::from_str(r#"{"notes":"coffee"}"#).unwrap();
        assert!(req.validate().is_err());

        let req: BreakStartRequest = serde_json::from_str(r#"{"type":"lunch"}"#).unwrap();
        assert_eq!(req.validate().unwrap(), BreakType::Lunch);
    }

    #[test]
    fn history_query_normalization() {
        let q = HistoryQuery {
            page: 0,
            per_page: 1000,
            ..Default::default()
        }
        .normalized();
        assert_eq!(q.page, 1);
        assert_eq!(q.per_page, HistoryQuery::MAX_PER_PAGE);
        assert_eq!(q.offset(), 0);

        let q = HistoryQuery {
            page: 3,
            per_page: 0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(q.per_page, HistoryQuery::DEFAULT_PER_PAGE);
        assert_eq!(q.offset(), 40);
    }

    #[test]
    fn late_exception_reason_trimmed() {
        let req = LateExceptionRequest {
            reason: Some("  train delayed ".into()),
        };
        assert_eq!(req.validate().unwrap(), "train delayed");

        let req = LateExceptionRequest {
            reason: Some("   ".into()),
        };
        assert!(req.validate().is_err());
    }
}
