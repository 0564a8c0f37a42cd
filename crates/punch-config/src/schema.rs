//! Raw configuration schema (as parsed from TOML)

use punch_api::{ExceptionKind, FlagKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Service-level settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Location plausibility thresholds
    #[serde(default)]
    pub spoof: RawSpoofConfig,

    /// Punch policy
    #[serde(default)]
    pub punch: RawPunchConfig,

    /// Exception escalation settings
    #[serde(default)]
    pub exceptions: RawExceptionConfig,

    /// Workplace sites
    #[serde(default)]
    pub sites: Vec<RawSite>,

    /// Team roster (manager -> members)
    #[serde(default)]
    pub teams: Vec<RawTeam>,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// HTTP listen address (default: 127.0.0.1:8080)
    pub listen_addr: Option<String>,

    /// Data directory for the session database
    pub data_dir: Option<PathBuf>,

    /// Upper bound on a single request, in milliseconds
    pub request_timeout_ms: Option<u64>,

    /// Upper bound on a collaborator call, in milliseconds
    pub collaborator_timeout_ms: Option<u64>,

    /// Extra attempts for idempotent store reads
    pub read_retries: Option<u32>,

    /// How often to sweep for missed punch-outs, in seconds
    pub sweep_interval_secs: Option<u64>,

    /// Mutating requests allowed per user per minute
    pub punch_rate_per_minute: Option<u32>,
}

/// Location plausibility thresholds
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSpoofConfig {
    /// Accuracy below this is treated as fabricated (meters)
    pub min_accuracy_meters: Option<f64>,

    /// Accuracy above this is too coarse to decide (meters)
    pub max_accuracy_meters: Option<f64>,

    /// Fastest plausible travel between two samples (meters/second)
    pub max_speed_mps: Option<f64>,

    /// Flags that block a clock-in instead of only annotating it
    pub reject_flags: Option<Vec<FlagKind>>,
}

/// Punch policy
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawPunchConfig {
    /// Whether clock-in needs an evidence photo reference
    pub require_evidence_photo: Option<bool>,

    /// Open sessions older than this are flagged as missed punch-outs
    pub max_shift_hours: Option<u32>,
}

/// Exception escalation settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawExceptionConfig {
    /// Exception kinds the service may raise
    pub allowed_kinds: Option<Vec<ExceptionKind>>,

    /// Approval workflow endpoint; escalation is disabled when absent
    pub approval_url: Option<String>,
}

/// Workplace site
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawSite {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_meters: f64,

    /// Shift start (HH:MM local time); enables late-arrival detection
    pub shift_start: Option<String>,

    /// Minutes after shift start before a clock-in counts as late
    #[serde(default)]
    pub late_grace_minutes: u32,
}

/// Team roster entry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawTeam {
    pub manager_id: String,
    #[serde(default)]
    pub members: Vec<String>,
}
