//! Configuration file resolution
//!
//! Services load their settings from a TOML file. The file location is
//! resolved in priority order; environment variables may still override
//! individual values afterwards (see the service config module).

use std::path::PathBuf;
use tracing::debug;

/// Resolve the configuration file path in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. `snapval.toml` in the working directory
/// 4. Platform config directory (e.g. `~/.config/snapval/snapval.toml`)
///
/// An explicitly given path (CLI or env) is returned as-is even when the
/// file does not exist, so the caller can report a precise error instead
/// of silently falling back. Discovered default locations are returned
/// only when present; `None` means "run on built-in defaults".
pub fn resolve_config_file(cli_arg: Option<&str>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Working directory
    let local = PathBuf::from("snapval.toml");
    if local.exists() {
        return Some(local);
    }

    // Priority 4: Platform config directory
    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("snapval").join("snapval.toml");
        if candidate.exists() {
            return Some(candidate);
        }
        debug!("No config file at {:?}, using built-in defaults", candidate);
    }

    None
}
