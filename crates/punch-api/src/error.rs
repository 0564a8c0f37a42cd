//! Stable, machine-readable error kinds

use serde::{Deserialize, Serialize};

use crate::FlagSet;

/// Error kinds exposed to clients. Names are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    InvalidCoordinate,
    OutsideGeofence,
    ImplausibleLocation,
    AlreadyActive,
    NoActiveSession,
    InvalidState,
    StaleSession,
    Unauthenticated,
    Forbidden,
    NotFound,
    RateLimited,
    Timeout,
    CollaboratorUnavailable,
    Internal,
}

impl ErrorKind {
    /// HTTP status the gateway should surface for this kind
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::ValidationError
            | ErrorKind::InvalidCoordinate
            | ErrorKind::OutsideGeofence
            | ErrorKind::ImplausibleLocation
            | ErrorKind::NoActiveSession
            | ErrorKind::InvalidState => 400,
            ErrorKind::Unauthenticated => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::AlreadyActive | ErrorKind::StaleSession => 409,
            ErrorKind::RateLimited => 429,
            ErrorKind::Internal => 500,
            ErrorKind::CollaboratorUnavailable => 503,
            ErrorKind::Timeout => 504,
        }
    }
}

/// Error body returned for every rejection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    /// Location flags that caused an `implausible_location` rejection
    #[serde(default, skip_serializing_if = "FlagSet::is_empty")]
    pub flags: FlagSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_meters: Option<f64>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            flags: FlagSet::new(),
            distance_meters: None,
        }
    }

    pub fn with_flags(mut self, flags: FlagSet) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_distance(mut self, distance_meters: f64) -> Self {
        self.distance_meters = Some(distance_meters);
        self
    }
}
