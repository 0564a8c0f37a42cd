//! Config validation CLI tool
//!
//! Validates a punchclock configuration file and reports any errors.

use punch_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a punchclock configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match punch_config::load_config(&config_path) {
        Ok(policy) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", punch_config::CURRENT_CONFIG_VERSION);
            println!("  Listen address: {}", policy.service.listen_addr);
            println!("  Sites: {}", policy.sites.len());
            println!("  Teams: {}", policy.teams.len());
            println!(
                "  Accuracy window: {}m - {}m",
                policy.spoof.min_accuracy_meters, policy.spoof.max_accuracy_meters
            );

            if !policy.sites.is_empty() {
                println!();
                println!("Sites:");
                for site in &policy.sites {
                    let shift = site
                        .shift_start
                        .map(|s| format!(", shift {} +{}m", s, site.late_grace.as_secs() / 60))
                        .unwrap_or_default();
                    println!(
                        "  - {} [{:.5}, {:.5} r={}m{}]: {}",
                        site.site.id,
                        site.site.center_latitude,
                        site.site.center_longitude,
                        site.site.radius_meters,
                        shift,
                        site.site.name
                    );
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                punch_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                punch_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                punch_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                punch_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        punch_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
