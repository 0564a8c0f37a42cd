//! Engine errors

use punch_api::{ErrorInfo, ErrorKind, FlagSet};
use punch_store::StoreError;
use punch_util::SessionId;
use thiserror::Error;
use tracing::error;

fn flag_list(flags: &FlagSet) -> String {
    flags
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Typed rejection of an engine operation
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Location is {distance_meters:.1}m from the workplace, outside its {radius_meters}m geofence")]
    OutsideGeofence {
        distance_meters: f64,
        radius_meters: f64,
    },

    #[error("Location report is not plausible ({})", flag_list(.flags))]
    ImplausibleLocation { flags: FlagSet },

    #[error("Already punched in")]
    AlreadyActive { session_id: SessionId },

    #[error("No active session")]
    NoActiveSession,

    #[error("{0}")]
    InvalidState(String),

    #[error("Session was modified by another request (now at version {stored_version})")]
    StaleSession { stored_version: u64 },

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::ValidationError,
            EngineError::InvalidCoordinate(_) => ErrorKind::InvalidCoordinate,
            EngineError::OutsideGeofence { .. } => ErrorKind::OutsideGeofence,
            EngineError::ImplausibleLocation { .. } => ErrorKind::ImplausibleLocation,
            EngineError::AlreadyActive { .. } => ErrorKind::AlreadyActive,
            EngineError::NoActiveSession => ErrorKind::NoActiveSession,
            EngineError::InvalidState(_) => ErrorKind::InvalidState,
            EngineError::StaleSession { .. } => ErrorKind::StaleSession,
            EngineError::Forbidden(_) => ErrorKind::Forbidden,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::CollaboratorUnavailable(_) => ErrorKind::CollaboratorUnavailable,
            EngineError::Store(_) => ErrorKind::CollaboratorUnavailable,
        }
    }

    /// Client-facing body. Store details stay in the logs.
    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            EngineError::Store(_) => {
                ErrorInfo::new(self.kind(), "Attendance store is unavailable, try again")
            }
            EngineError::ImplausibleLocation { flags } => {
                ErrorInfo::new(self.kind(), self.to_string()).with_flags(flags.clone())
            }
            EngineError::OutsideGeofence {
                distance_meters, ..
            } => ErrorInfo::new(self.kind(), self.to_string()).with_distance(*distance_meters),
            _ => ErrorInfo::new(self.kind(), self.to_string()),
        }
    }
}

impl From<EngineError> for ErrorInfo {
    fn from(err: EngineError) -> Self {
        if let EngineError::Store(e) = &err {
            error!(error = %e, "Store failure");
        }
        err.to_error_info()
    }
}
