//! Validated policy structures

use crate::schema::{RawConfig, RawServiceConfig, RawSite};
use punch_api::{ExceptionKind, FlagKind, FlagSet, WorkplaceSite};
use punch_util::{SiteId, UserId, WallClock};
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Validated policy ready for use by the engine
#[derive(Debug, Clone)]
pub struct Policy {
    pub service: ServiceConfig,
    pub spoof: SpoofThresholds,
    pub punch: PunchPolicy,
    pub escalation: EscalationPolicy,
    pub sites: Vec<Site>,
    /// Manager -> direct reports
    pub teams: BTreeMap<UserId, Vec<UserId>>,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let spoof_defaults = SpoofThresholds::default();
        let spoof = SpoofThresholds {
            min_accuracy_meters: raw
                .spoof
                .min_accuracy_meters
                .unwrap_or(spoof_defaults.min_accuracy_meters),
            max_accuracy_meters: raw
                .spoof
                .max_accuracy_meters
                .unwrap_or(spoof_defaults.max_accuracy_meters),
            max_speed_mps: raw.spoof.max_speed_mps.unwrap_or(spoof_defaults.max_speed_mps),
            reject_flags: raw
                .spoof
                .reject_flags
                .map(|flags| flags.into_iter().collect())
                .unwrap_or(spoof_defaults.reject_flags),
        };

        let punch_defaults = PunchPolicy::default();
        let punch = PunchPolicy {
            require_evidence_photo: raw
                .punch
                .require_evidence_photo
                .unwrap_or(punch_defaults.require_evidence_photo),
            max_shift: raw
                .punch
                .max_shift_hours
                .map(|h| Duration::from_secs(h as u64 * 3600))
                .unwrap_or(punch_defaults.max_shift),
        };

        let escalation = EscalationPolicy {
            allowed_kinds: raw
                .exceptions
                .allowed_kinds
                .map(|kinds| kinds.into_iter().collect())
                .unwrap_or_else(|| EscalationPolicy::default().allowed_kinds),
            approval_url: raw.exceptions.approval_url,
        };

        let teams = raw
            .teams
            .into_iter()
            .map(|t| {
                (
                    UserId::new(t.manager_id),
                    t.members.into_iter().map(UserId::new).collect(),
                )
            })
            .collect();

        Self {
            service: ServiceConfig::from_raw(raw.service),
            spoof,
            punch,
            escalation,
            sites: raw.sites.into_iter().map(Site::from_raw).collect(),
            teams,
        }
    }

    /// Get site by ID
    pub fn get_site(&self, id: &SiteId) -> Option<&Site> {
        self.sites.iter().find(|s| &s.site.id == id)
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            spoof: SpoofThresholds::default(),
            punch: PunchPolicy::default(),
            escalation: EscalationPolicy::default(),
            sites: Vec::new(),
            teams: BTreeMap::new(),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub listen_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
    pub collaborator_timeout: Duration,
    pub read_retries: u32,
    pub sweep_interval: Duration,
    pub punch_rate_per_minute: u32,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        let defaults = Self::default();
        Self {
            listen_addr: raw
                .listen_addr
                .and_then(|a| a.parse().ok())
                .unwrap_or(defaults.listen_addr),
            data_dir: raw
                .data_dir
                .unwrap_or_else(punch_util::default_data_dir),
            request_timeout: raw
                .request_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            collaborator_timeout: raw
                .collaborator_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.collaborator_timeout),
            read_retries: raw.read_retries.unwrap_or(defaults.read_retries),
            sweep_interval: raw
                .sweep_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            punch_rate_per_minute: raw
                .punch_rate_per_minute
                .unwrap_or(defaults.punch_rate_per_minute),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            data_dir: punch_util::default_data_dir(),
            request_timeout: Duration::from_secs(5),
            collaborator_timeout: Duration::from_secs(2),
            read_retries: 2,
            sweep_interval: Duration::from_secs(300),
            punch_rate_per_minute: 30,
        }
    }
}

/// Thresholds for the GPS plausibility heuristics
#[derive(Debug, Clone, PartialEq)]
pub struct SpoofThresholds {
    /// Accuracy below this is "too precise to be real"
    pub min_accuracy_meters: f64,
    /// Accuracy above this is "too imprecise to trust"
    pub max_accuracy_meters: f64,
    pub max_speed_mps: f64,
    /// Flags that reject a clock-in outright
    pub reject_flags: FlagSet,
}

impl Default for SpoofThresholds {
    fn default() -> Self {
        Self {
            min_accuracy_meters: 1.0,
            max_accuracy_meters: 500.0,
            // ~250 km/h
            max_speed_mps: 70.0,
            reject_flags: [FlagKind::LowAccuracy].into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PunchPolicy {
    pub require_evidence_photo: bool,
    pub max_shift: Duration,
}

impl Default for PunchPolicy {
    fn default() -> Self {
        Self {
            require_evidence_photo: true,
            max_shift: Duration::from_secs(16 * 3600),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EscalationPolicy {
    pub allowed_kinds: HashSet<ExceptionKind>,
    pub approval_url: Option<String>,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            allowed_kinds: [
                ExceptionKind::LateArrival,
                ExceptionKind::MissedPunchOut,
                ExceptionKind::LocationDispute,
            ]
            .into_iter()
            .collect(),
            approval_url: None,
        }
    }
}

/// A workplace site plus its schedule
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    pub site: WorkplaceSite,
    pub shift_start: Option<WallClock>,
    pub late_grace: Duration,
}

impl Site {
    fn from_raw(raw: RawSite) -> Self {
        Self {
            site: WorkplaceSite {
                id: SiteId::new(raw.id),
                name: raw.name,
                address: raw.address,
                center_latitude: raw.latitude,
                center_longitude: raw.longitude,
                radius_meters: raw.radius_meters,
            },
            shift_start: raw.shift_start.and_then(|s| WallClock::parse(&s).ok()),
            late_grace: Duration::from_secs(raw.late_grace_minutes as u64 * 60),
        }
    }

    /// A site with no shift schedule
    pub fn unscheduled(site: WorkplaceSite) -> Self {
        Self {
            site,
            shift_start: None,
            late_grace: Duration::ZERO,
        }
    }
}
