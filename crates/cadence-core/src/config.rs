use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `~/.cadence/config.toml`, then
/// overridden by environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub ai: AiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            daemon: DaemonConfig::default(),
            broker: BrokerConfig::default(),
            ai: AiConfig::default(),
        }
    }
}

impl Config {
    /// Load config from `~/.cadence/config.toml`, falling back to defaults
    /// when the file does not exist, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        let mut cfg = if path.exists() {
            let text =
                std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
            toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?
        } else {
            Config::default()
        };
        cfg.apply_env();
        Ok(cfg)
    }

    /// Load from a specific path (no environment overrides).
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Environment overrides: `CADENCE_DATA_DIR` (or `DATABASE_URL` pointing
    /// at the SQLite tree), `CADENCE_BIND`, `REDIS_URL`, `AI_API_KEY`,
    /// `TENANT_DOMAIN_SUFFIX`.
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("CADENCE_DATA_DIR") {
            self.general.data_dir = dir;
        } else if let Ok(url) = std::env::var("DATABASE_URL") {
            self.general.data_dir = url.trim_start_matches("sqlite://").to_string();
        }
        if let Ok(bind) = std::env::var("CADENCE_BIND") {
            if let Some((host, port)) = bind.rsplit_once(':') {
                if let Ok(port) = port.parse() {
                    self.daemon.host = host.to_string();
                    self.daemon.port = port;
                }
            }
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.broker.redis_url = Some(url);
        }
        if let Ok(key) = std::env::var("AI_API_KEY") {
            self.ai.default_api_key = Some(key);
        }
        if let Ok(suffix) = std::env::var("TENANT_DOMAIN_SUFFIX") {
            self.general.tenant_domain_suffix = Some(suffix);
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        let raw = &self.general.data_dir;
        if let Some(rest) = raw.strip_prefix("~/") {
            return dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(rest);
        }
        PathBuf::from(raw)
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cadence")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub tenant_domain_suffix: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            tenant_domain_suffix: None,
        }
    }
}

fn default_data_dir() -> String {
    "~/.cadence/data".into()
}
fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_daemon_host")]
    pub host: String,
    #[serde(default = "default_daemon_port")]
    pub port: u16,
    #[serde(default = "default_workers")]
    pub workers: u32,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_minutes: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_daemon_host(),
            port: default_daemon_port(),
            workers: default_workers(),
            sync_interval_minutes: default_sync_interval(),
        }
    }
}

fn default_daemon_host() -> String {
    "127.0.0.1".into()
}
fn default_daemon_port() -> u16 {
    9700
}
fn default_workers() -> u32 {
    4
}
fn default_sync_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// When set, the broker-backed publisher is used instead of the
    /// in-process one.
    #[serde(default)]
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Fallback provider key for tenants that carry none.
    #[serde(default)]
    pub default_api_key: Option<String>,
    #[serde(default = "default_ai_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            default_api_key: None,
            request_timeout_secs: default_ai_timeout(),
        }
    }
}

fn default_ai_timeout() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.daemon.port, 9700);
        assert_eq!(cfg.daemon.workers, 4);
        assert_eq!(cfg.ai.request_timeout_secs, 300);
        assert!(cfg.broker.redis_url.is_none());
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: Config = toml::from_str(
            r#"
            [daemon]
            port = 9999

            [ai]
            default_api_key = "k"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.daemon.port, 9999);
        assert_eq!(cfg.daemon.host, "127.0.0.1");
        assert_eq!(cfg.ai.default_api_key.as_deref(), Some("k"));
    }
}
