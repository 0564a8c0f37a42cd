//! Shared domain types for the attendance API

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use punch_util::{BreakId, SessionId, SiteId, TicketRef, UserId};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of an attendance session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Active,
    OnBreak,
    Completed,
}

impl SessionStatus {
    /// Active and OnBreak sessions count against the one-open-session rule
    pub fn is_open(&self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::OnBreak)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Active => "active",
            SessionStatus::OnBreak => "on_break",
            SessionStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SessionStatus::Idle),
            "active" => Ok(SessionStatus::Active),
            "on_break" => Ok(SessionStatus::OnBreak),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(format!("Unknown session status: {}", other)),
        }
    }
}

/// Annotations attached to a session by location checks and policy sweeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    /// Reported accuracy is better than consumer GPS can deliver
    LowAccuracy,
    /// Reported accuracy is too coarse for a geofence decision
    StaleAccuracy,
    OutsideGeofence,
    /// Implied travel speed from the previous sample is not plausible
    Teleport,
    LateArrival,
    MissedPunchOut,
}

impl FlagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagKind::LowAccuracy => "low_accuracy",
            FlagKind::StaleAccuracy => "stale_accuracy",
            FlagKind::OutsideGeofence => "outside_geofence",
            FlagKind::Teleport => "teleport",
            FlagKind::LateArrival => "late_arrival",
            FlagKind::MissedPunchOut => "missed_punch_out",
        }
    }
}

impl fmt::Display for FlagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type FlagSet = BTreeSet<FlagKind>;

/// Kind of break
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakType {
    Lunch,
    Rest,
    Other,
}

/// Kinds of exception the approval workflow accepts from this service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionKind {
    LateArrival,
    MissedPunchOut,
    LocationDispute,
}

impl ExceptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExceptionKind::LateArrival => "late_arrival",
            ExceptionKind::MissedPunchOut => "missed_punch_out",
            ExceptionKind::LocationDispute => "location_dispute",
        }
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExceptionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "late_arrival" => Ok(ExceptionKind::LateArrival),
            "missed_punch_out" => Ok(ExceptionKind::MissedPunchOut),
            "location_dispute" => Ok(ExceptionKind::LocationDispute),
            other => Err(format!("Unknown exception kind: {}", other)),
        }
    }
}

/// A single GPS reading reported by a device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Reported sensor precision in meters
    pub accuracy_meters: f64,
    pub captured_at: DateTime<Local>,
}

/// A workplace and its circular geofence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkplaceSite {
    pub id: SiteId,
    pub name: String,
    pub address: Option<String>,
    pub center_latitude: f64,
    pub center_longitude: f64,
    pub radius_meters: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakRecord {
    pub id: BreakId,
    pub session_id: SessionId,
    #[serde(rename = "type")]
    pub break_type: BreakType,
    pub start_at: DateTime<Local>,
    pub end_at: Option<DateTime<Local>>,
    pub notes: Option<String>,
}

impl BreakRecord {
    pub fn is_open(&self) -> bool {
        self.end_at.is_none()
    }

    /// Length of a closed break; zero while still open
    pub fn duration(&self) -> chrono::Duration {
        match self.end_at {
            Some(end) => (end - self.start_at).max(chrono::Duration::zero()),
            None => chrono::Duration::zero(),
        }
    }
}

/// Ticket raised against a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaisedTicket {
    pub ticket_ref: TicketRef,
    pub kind: ExceptionKind,
    pub raised_at: DateTime<Local>,
}

/// One work period of one employee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub workplace_id: SiteId,
    pub status: SessionStatus,
    /// Optimistic concurrency counter, bumped on every committed change
    pub version: u64,
    pub clock_in_at: Option<DateTime<Local>>,
    pub clock_out_at: Option<DateTime<Local>>,
    pub clock_in_location: Option<LocationSample>,
    pub clock_out_location: Option<LocationSample>,
    pub breaks: Vec<BreakRecord>,
    pub evidence_photo_ref: Option<String>,
    pub work_duration_minutes: Option<i64>,
    pub flags: FlagSet,
    #[serde(default)]
    pub exception_tickets: Vec<RaisedTicket>,
}

impl AttendanceSession {
    pub fn open_break(&self) -> Option<&BreakRecord> {
        self.breaks.iter().find(|b| b.is_open())
    }

    pub fn open_break_mut(&mut self) -> Option<&mut BreakRecord> {
        self.breaks.iter_mut().find(|b| b.is_open())
    }

    /// Sum of closed break durations
    pub fn total_break_duration(&self) -> chrono::Duration {
        self.breaks
            .iter()
            .map(BreakRecord::duration)
            .fold(chrono::Duration::zero(), |acc, d| acc + d)
    }

    pub fn has_ticket(&self, kind: ExceptionKind) -> bool {
        self.exception_tickets.iter().any(|t| t.kind == kind)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id,
            workplace_id: self.workplace_id.clone(),
            status: self.status,
            version: self.version,
            clock_in_at: self.clock_in_at,
            clock_out_at: self.clock_out_at,
            on_break_since: self.open_break().map(|b| b.start_at),
            break_count: self.breaks.len(),
            work_duration_minutes: self.work_duration_minutes,
            flags: self.flags.clone(),
        }
    }
}

/// Compact view of a session for status displays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub workplace_id: SiteId,
    pub status: SessionStatus,
    pub version: u64,
    pub clock_in_at: Option<DateTime<Local>>,
    pub clock_out_at: Option<DateTime<Local>>,
    pub on_break_since: Option<DateTime<Local>>,
    pub break_count: usize,
    pub work_duration_minutes: Option<i64>,
    pub flags: FlagSet,
}

/// Role claim carried by every request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Employee,
    Manager,
    Admin,
}

impl Role {
    pub fn can_view_team(&self) -> bool {
        matches!(self, Role::Manager | Role::Admin)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "employee" => Ok(Role::Employee),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// Validated identity forwarded by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: impl Into<UserId>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
}
