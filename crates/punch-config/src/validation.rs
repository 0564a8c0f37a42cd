//! Configuration validation

use crate::schema::{RawConfig, RawSite, RawTeam};
use punch_util::WallClock;
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Site '{site_id}': {message}")]
    SiteError { site_id: String, message: String },

    #[error("Duplicate site ID: {0}")]
    DuplicateSiteId(String),

    #[error("Team of manager '{manager_id}': {message}")]
    TeamError { manager_id: String, message: String },

    #[error("Invalid time format '{value}': {message}")]
    InvalidTimeFormat { value: String, message: String },

    #[error("Spoof thresholds: {0}")]
    SpoofError(String),

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration, collecting every problem found
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut seen_ids = HashSet::new();
    for site in &config.sites {
        if !seen_ids.insert(&site.id) {
            errors.push(ValidationError::DuplicateSiteId(site.id.clone()));
        }
    }

    for site in &config.sites {
        errors.extend(validate_site(site));
    }

    let mut seen_managers = HashSet::new();
    for team in &config.teams {
        if !seen_managers.insert(&team.manager_id) {
            errors.push(ValidationError::TeamError {
                manager_id: team.manager_id.clone(),
                message: "manager listed more than once".into(),
            });
        }
        errors.extend(validate_team(team));
    }

    errors.extend(validate_spoof(config));
    errors.extend(validate_service(config));

    errors
}

fn validate_site(site: &RawSite) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut site_error = |message: String| {
        errors.push(ValidationError::SiteError {
            site_id: site.id.clone(),
            message,
        })
    };

    if site.id.trim().is_empty() {
        site_error("id cannot be empty".into());
    }
    if site.name.trim().is_empty() {
        site_error("name cannot be empty".into());
    }
    if !site.latitude.is_finite() || !(-90.0..=90.0).contains(&site.latitude) {
        site_error(format!("latitude {} out of range", site.latitude));
    }
    if !site.longitude.is_finite() || !(-180.0..=180.0).contains(&site.longitude) {
        site_error(format!("longitude {} out of range", site.longitude));
    }
    if !site.radius_meters.is_finite() || site.radius_meters <= 0.0 {
        site_error(format!("radius_meters must be positive, got {}", site.radius_meters));
    }

    if let Some(start) = &site.shift_start
        && let Err(e) = WallClock::parse(start)
    {
        errors.push(ValidationError::InvalidTimeFormat {
            value: start.clone(),
            message: e,
        });
    }

    errors
}

fn validate_team(team: &RawTeam) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if team.manager_id.trim().is_empty() {
        errors.push(ValidationError::TeamError {
            manager_id: team.manager_id.clone(),
            message: "manager_id cannot be empty".into(),
        });
    }

    let mut seen = HashSet::new();
    for member in &team.members {
        if member.trim().is_empty() {
            errors.push(ValidationError::TeamError {
                manager_id: team.manager_id.clone(),
                message: "member id cannot be empty".into(),
            });
        } else if !seen.insert(member) {
            errors.push(ValidationError::TeamError {
                manager_id: team.manager_id.clone(),
                message: format!("member '{}' listed twice", member),
            });
        }
    }

    errors
}

fn validate_spoof(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let spoof = &config.spoof;

    let positive = |name: &str, value: Option<f64>| -> Option<ValidationError> {
        match value {
            Some(v) if !v.is_finite() || v <= 0.0 => Some(ValidationError::SpoofError(format!(
                "{} must be positive, got {}",
                name, v
            ))),
            _ => None,
        }
    };

    errors.extend(positive("min_accuracy_meters", spoof.min_accuracy_meters));
    errors.extend(positive("max_accuracy_meters", spoof.max_accuracy_meters));
    errors.extend(positive("max_speed_mps", spoof.max_speed_mps));

    if let (Some(min), Some(max)) = (spoof.min_accuracy_meters, spoof.max_accuracy_meters)
        && min >= max
    {
        errors.push(ValidationError::SpoofError(format!(
            "min_accuracy_meters ({}) must be below max_accuracy_meters ({})",
            min, max
        )));
    }

    errors
}

fn validate_service(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let service = &config.service;

    if let Some(addr) = &service.listen_addr
        && addr.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError::GlobalError(format!(
            "listen_addr '{}' is not a socket address",
            addr
        )));
    }

    for (name, value) in [
        ("request_timeout_ms", service.request_timeout_ms),
        ("collaborator_timeout_ms", service.collaborator_timeout_ms),
        ("sweep_interval_secs", service.sweep_interval_secs),
    ] {
        if value == Some(0) {
            errors.push(ValidationError::GlobalError(format!("{} must be non-zero", name)));
        }
    }

    if service.punch_rate_per_minute == Some(0) {
        errors.push(ValidationError::GlobalError(
            "punch_rate_per_minute must be non-zero".into(),
        ));
    }

    if config.punch.max_shift_hours == Some(0) {
        errors.push(ValidationError::GlobalError("max_shift_hours must be non-zero".into()));
    }

    if let Some(url) = &config.exceptions.approval_url
        && !(url.starts_with("http://") || url.starts_with("https://"))
    {
        errors.push(ValidationError::GlobalError(format!(
            "approval_url '{}' must be an http(s) URL",
            url
        )));
    }

    if let Some(kinds) = &config.exceptions.allowed_kinds
        && kinds.is_empty()
    {
        errors.push(ValidationError::GlobalError(
            "allowed_kinds cannot be empty; omit it for the defaults".into(),
        ));
    }

    errors
}
