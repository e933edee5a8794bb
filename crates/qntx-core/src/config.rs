//! Layered configuration: environment file, then TOML settings, then environment overrides
//! (SPEC_FULL.md §1.1).

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Default path for the environment file.
pub const DEFAULT_ENV_FILE: &str = "/etc/qntx/environment";

/// Alternative paths to check, in priority order.
pub const ENV_FILE_PATHS: &[&str] = &["/etc/qntx/environment", "/etc/qntx.env", ".env"];

/// Load environment variables from the canonical configuration file.
///
/// Checks `QNTX_ENV_FILE` first, then each of [`ENV_FILE_PATHS`] in order. Never overrides a
/// variable already set in the process environment. Returns the path actually loaded.
pub fn load_environment() -> Option<String> {
    if let Ok(custom_path) = std::env::var("QNTX_ENV_FILE") {
        if let Some(path) = try_load_env_file(&custom_path) {
            return Some(path);
        }
    }

    for path in ENV_FILE_PATHS {
        if let Some(loaded_path) = try_load_env_file(path) {
            return Some(loaded_path);
        }
    }

    debug!("no environment file found, using existing environment");
    None
}

fn try_load_env_file(path: &str) -> Option<String> {
    let path_obj = Path::new(path);
    if !path_obj.exists() {
        return None;
    }

    match fs::read_to_string(path_obj) {
        Ok(content) => {
            let mut loaded = 0;
            let mut skipped = 0;
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = parse_env_line(line) {
                    if std::env::var(&key).is_err() {
                        let redacted = is_secret_key(&key);
                        std::env::set_var(&key, &value);
                        loaded += 1;
                        debug!("loaded: {}={}", key, if redacted { "***" } else { &value });
                    } else {
                        skipped += 1;
                    }
                }
            }
            info!("loaded {} environment variables from {} ({} skipped, already set)", loaded, path, skipped);
            Some(path.to_string())
        }
        Err(e) => {
            warn!("failed to read environment file {}: {}", path, e);
            None
        }
    }
}

fn is_secret_key(key: &str) -> bool {
    let upper = key.to_uppercase();
    upper.contains("KEY") || upper.contains("TOKEN") || upper.contains("SECRET")
}

fn parse_env_line(line: &str) -> Option<(String, String)> {
    let mut parts = line.splitn(2, '=');
    let key = parts.next()?.trim();
    let value = parts.next()?.trim();
    if key.is_empty() {
        return None;
    }
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);
    Some((key.to_string(), value.to_string()))
}

pub fn get_config(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn get_config_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

pub fn get_config_bool(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on")).unwrap_or(default)
}

pub fn get_config_int(key: &str, default: i64) -> i64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Provider credentials and defaults, read from the `[providers]` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default)]
    pub openrouter_api_key: Option<String>,
    #[serde(default)]
    pub local_base_url: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
}

/// One entry in the `[[plugins]]` array.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub binary_path: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
    /// Fixed loopback port, or `0` to let the host allocate one.
    #[serde(default)]
    pub port: u16,
    #[serde(default = "default_plugin_enabled")]
    pub enabled: bool,
}

fn default_plugin_enabled() -> bool {
    true
}

/// The process-wide settings file (TOML), loaded once at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub bind_addr: Option<String>,
    #[serde(default)]
    pub db_path: Option<String>,
    #[serde(default)]
    pub providers: ProviderSettings,
    #[serde(default)]
    pub plugins: Vec<PluginDescriptor>,
}

impl Settings {
    /// Load from `QNTX_CONFIG_PATH`, falling back to `./qntx.toml`; missing file yields
    /// defaults rather than an error — a config file is optional, environment variables are
    /// enough to run.
    pub fn load() -> crate::Result<Self> {
        let path = get_config_opt("QNTX_CONFIG_PATH").unwrap_or_else(|| "qntx.toml".to_string());
        if !Path::new(&path).exists() {
            debug!("no settings file at {}, using defaults + environment", path);
            return Ok(Settings::default());
        }
        let raw = fs::read_to_string(&path).map_err(crate::Error::from)?;
        let settings: Settings = toml::from_str(&raw)
            .map_err(|e| crate::Error::invalid_input(format!("malformed config file {}: {}", path, e)))?;
        info!("loaded settings from {}", path);
        Ok(settings)
    }

    pub fn db_path(&self) -> String {
        get_config_opt("QNTX_DB_PATH")
            .or_else(|| self.db_path.clone())
            .unwrap_or_else(|| "qntx.db".to_string())
    }

    pub fn bind_addr(&self) -> String {
        get_config_opt("QNTX_BIND_ADDR")
            .or_else(|| self.bind_addr.clone())
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_line_simple() {
        let (k, v) = parse_env_line("FOO=bar").unwrap();
        assert_eq!(k, "FOO");
        assert_eq!(v, "bar");
    }

    #[test]
    fn parse_env_line_quoted() {
        let (k, v) = parse_env_line("FOO=\"bar baz\"").unwrap();
        assert_eq!(k, "FOO");
        assert_eq!(v, "bar baz");
    }

    #[test]
    fn parse_env_line_empty() {
        assert!(parse_env_line("").is_none());
        assert!(parse_env_line("=value").is_none());
    }

    #[test]
    fn secret_keys_are_flagged_for_redaction() {
        assert!(is_secret_key("ANTHROPIC_API_KEY"));
        assert!(is_secret_key("JWT_SECRET"));
        assert!(!is_secret_key("BIND_ADDR"));
    }

    #[test]
    fn settings_default_when_no_file_present() {
        std::env::remove_var("QNTX_CONFIG_PATH");
        let settings = Settings::default();
        assert_eq!(settings.bind_addr(), "0.0.0.0:8080");
    }
}
