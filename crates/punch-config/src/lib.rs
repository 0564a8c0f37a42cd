//! Configuration parsing and validation for punchclock
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Workplace sites with geofence radius and optional shift start
//! - Location plausibility thresholds and punch policy
//! - Team roster for manager views
//! - Validation with clear error messages

mod policy;
mod schema;
mod validation;

pub use policy::*;
pub use schema::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Policy> {
    let path = path.as_ref();
    debug!(path = %path.display(), "Loading config");
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<Policy> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    let policy = Policy::from_raw(raw);
    debug!(
        site_count = policy.sites.len(),
        team_count = policy.teams.len(),
        "Config validated"
    );
    Ok(policy)
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;
    use punch_api::FlagKind;
    use punch_util::{SiteId, UserId};
    use std::io::Write;
    use std::time::Duration;

    const SAMPLE: &str = r#"
        config_version = 1

        [service]
        listen_addr = "0.0.0.0:9000"
        request_timeout_ms = 3000

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

    #[test]
    fn parse_full_config() {
        let policy = parse_config(SAMPLE).unwrap();

        assert_eq!(policy.sites.len(), 1);
        let hq = policy.get_site(&SiteId::new("hq")).unwrap();
        assert_eq!(hq.site.radius_meters, 100.0);
        assert_eq!(hq.late_grace, Duration::from_secs(300));
        assert_eq!(hq.shift_start.unwrap().to_string(), "09:00");

        assert_eq!(policy.service.listen_addr.port(), 9000);
        assert_eq!(policy.service.request_timeout, Duration::from_secs(3));
        assert_eq!(policy.punch.max_shift, Duration::from_secs(12 * 3600));
        assert_eq!(policy.teams[&UserId::new("mgr-1")].len(), 2);
    }

    #[test]
    fn defaults_apply() {
        let policy = parse_config("config_version = 1").unwrap();

        assert_eq!(policy.spoof.min_accuracy_meters, 1.0);
        assert!(policy.spoof.reject_flags.contains(&FlagKind::LowAccuracy));
        assert!(!policy.spoof.reject_flags.contains(&FlagKind::Teleport));
        assert!(policy.punch.require_evidence_photo);
        assert!(policy.escalation.approval_url.is_none());
        assert_eq!(policy.escalation.allowed_kinds.len(), 3);
    }

    #[test]
    fn reject_wrong_version() {
        let result = parse_config("config_version = 99");
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_invalid_site() {
        let config = r#"
            config_version = 1

            [[sites]]
            id = "hq"
            name = "HQ"
            latitude = 95.0
            longitude = 0.0
            radius_meters = -1.0
        "#;

        match parse_config(config) {
            Err(ConfigError::ValidationFailed { errors }) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let policy = load_config(file.path()).unwrap();
        assert_eq!(policy.sites.len(), 1);
    }
}
