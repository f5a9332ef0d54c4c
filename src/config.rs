// Конфигурация приложения
// Логирование по умолчанию включено только в режиме разработки

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::peer::types::ServerConfig;
use crate::relay::CandidateMode;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено

pub const DEFAULT_LOG_FILTER: &str = "peercall=debug,webrtc=warn";

/// Период ожидания восстановления после `Disconnected`
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

pub const ENV_CONFIG_PATH: &str = "PEERCALL_CONFIG";
pub const ENV_ICE_SERVERS: &str = "PEERCALL_ICE_SERVERS";
pub const ENV_CANDIDATE_MODE: &str = "PEERCALL_CANDIDATE_MODE";
pub const ENV_GRACE_PERIOD: &str = "PEERCALL_GRACE_PERIOD_SECS";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub enabled: bool,
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: LOGGING_ENABLED,
            filter: DEFAULT_LOG_FILTER.into(),
        }
    }
}

/// Какие медиа-секции предлагать в offer
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct MediaConfig {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub ice_servers: Vec<ServerConfig>,
    pub ice_candidate_pool_size: u8,
    pub candidate_mode: CandidateMode,
    pub grace_period_secs: u64,
    pub media: MediaConfig,
    pub logging: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            ice_candidate_pool_size: 10,
            candidate_mode: CandidateMode::default(),
            grace_period_secs: GRACE_PERIOD.as_secs(),
            media: MediaConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

/// Публичные STUN серверы, если пользователь ничего не задал
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}

impl Config {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: Config = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    /// Файл из `PEERCALL_CONFIG` (если задан) плюс переопределения из окружения
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = match lookup(ENV_CONFIG_PATH) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(raw) = lookup(ENV_ICE_SERVERS) {
            cfg.ice_servers = serde_json::from_str(&raw)
                .map_err(|e| Error::Config(format!("{ENV_ICE_SERVERS}: {e}")))?;
        }
        if let Some(raw) = lookup(ENV_CANDIDATE_MODE) {
            cfg.candidate_mode = raw.parse()?;
        }
        if let Some(raw) = lookup(ENV_GRACE_PERIOD) {
            cfg.grace_period_secs = raw
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("{ENV_GRACE_PERIOD}: {e}")))?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(Error::Config(format!("ice server {}: url cannot be empty", server.id)));
            }
            match server.r#type.as_str() {
                "stun" => {}
                "turn" => {
                    if server.username.is_none() || server.credential.is_none() {
                        return Err(Error::Config(format!(
                            "turn server {} requires username and credential",
                            server.id
                        )));
                    }
                }
                other => {
                    return Err(Error::Config(format!(
                        "ice server {}: unknown type '{other}'",
                        server.id
                    )))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.ice_candidate_pool_size, 10);
        assert_eq!(cfg.candidate_mode, CandidateMode::Sequence);
        assert_eq!(cfg.grace_period(), GRACE_PERIOD);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg = Config::from_json_str(r#"{"candidate_mode":"single_slot","media":{"video":false}}"#)
            .unwrap();
        assert_eq!(cfg.candidate_mode, CandidateMode::SingleSlot);
        assert!(cfg.media.audio);
        assert!(!cfg.media.video);
        assert_eq!(cfg.ice_servers.len(), 2);
    }

    #[test]
    fn turn_without_credentials_is_rejected() {
        let json = r#"{"ice_servers":[{"id":"t","type":"turn","url":"turn.example.org:3478"}]}"#;
        let err = Config::from_json_str(json).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("username")));
    }

    #[test]
    fn empty_url_is_rejected() {
        let json = r#"{"ice_servers":[{"id":"s","type":"stun","url":""}]}"#;
        assert!(Config::from_json_str(json).is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_CANDIDATE_MODE, "single_slot"),
            (ENV_GRACE_PERIOD, "3"),
            (
                ENV_ICE_SERVERS,
                r#"[{"id":"t","type":"turn","url":"turn:relay.example.org","username":"u","credential":"p"}]"#,
            ),
        ]);
        let cfg = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.candidate_mode, CandidateMode::SingleSlot);
        assert_eq!(cfg.grace_period_secs, 3);
        assert_eq!(cfg.ice_servers[0].id, "t");
    }

    #[test]
    fn bad_env_value_is_a_config_error() {
        let cfg = Config::from_lookup(|k| (k == ENV_GRACE_PERIOD).then(|| "soon".to_string()));
        assert!(matches!(cfg, Err(Error::Config(_))));
    }
}
