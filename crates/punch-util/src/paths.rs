//! Default paths for punchclock components
//!
//! - Config: `$PUNCH_CONFIG`, `$XDG_CONFIG_HOME/punchclock/config.toml` or `~/.config/punchclock/config.toml`
//! - Data: `$PUNCH_DATA_DIR`, `$XDG_DATA_HOME/punchclock` or `~/.local/share/punchclock`

use std::path::PathBuf;

/// Environment variable for overriding the config file path
pub const PUNCH_CONFIG_ENV: &str = "PUNCH_CONFIG";

/// Environment variable for overriding the data directory
pub const PUNCH_DATA_DIR_ENV: &str = "PUNCH_DATA_DIR";

const APP_DIR: &str = "punchclock";

const CONFIG_FILENAME: &str = "config.toml";

/// Database filename within the data directory
pub const DATABASE_FILENAME: &str = "punchclock.db";

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$PUNCH_CONFIG`
/// 2. `$XDG_CONFIG_HOME/punchclock/config.toml`
/// 3. `~/.config/punchclock/config.toml`
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(PUNCH_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$PUNCH_DATA_DIR`
/// 2. `$XDG_DATA_HOME/punchclock`
/// 3. `~/.local/share/punchclock`
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(PUNCH_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking PUNCH_DATA_DIR.
/// Used for config defaults where the env var is checked separately.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    // Last resort
    PathBuf::from("/tmp").join(APP_DIR).join("data")
}
