use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid value {value:?} for ${var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub resources_dir: Option<PathBuf>,
    pub allow_model_download: bool,
    pub model_offload: Duration,
    pub max_new_tokens: usize,
    pub max_upload_bytes: usize,
    pub session_idle: Duration,
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            // This listens on IPv6 and IPv4
            addr: SocketAddr::from(([0u16; 8], 3001)),
            resources_dir: None,
            allow_model_download: true,
            model_offload: Duration::from_secs(300),
            max_new_tokens: ai::blip::DEFAULT_MAX_NEW_TOKENS,
            max_upload_bytes: 20 * 1024 * 1024,
            session_idle: Duration::from_secs(30 * 60),
            log_dir: None,
        }
    }
}

impl ServerConfig {
    /// Read the configuration from the process environment.
    ///
    /// Call after `dotenvy::dotenv()` so values from `.env` are visible.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let lookup = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        Ok(Self {
            addr: parse(&lookup, "SERVER_ADDR")?.unwrap_or(defaults.addr),
            resources_dir: lookup("LOCAL_RESOURCES_DIR").map(PathBuf::from),
            allow_model_download: parse_bool(&lookup, "ALLOW_MODEL_DOWNLOAD")?
                .unwrap_or(defaults.allow_model_download),
            model_offload: parse(&lookup, "MODEL_OFFLOAD_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.model_offload),
            max_new_tokens: parse_positive(&lookup, "MAX_NEW_TOKENS")?
                .unwrap_or(defaults.max_new_tokens),
            max_upload_bytes: parse(&lookup, "MAX_UPLOAD_BYTES")?
                .unwrap_or(defaults.max_upload_bytes),
            session_idle: parse(&lookup, "SESSION_IDLE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_idle),
            log_dir: lookup("LOCAL_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(var)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}

fn parse_positive(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<usize>, ConfigError> {
    match parse::<usize>(lookup, var)? {
        Some(0) => Err(ConfigError::Invalid {
            var,
            value: "0".to_string(),
            reason: "must be at least 1".to_string(),
        }),
        value => Ok(value),
    }
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<bool>, ConfigError> {
    lookup(var)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                var,
                value,
                reason: "expected a boolean".to_string(),
            }),
        })
        .transpose()
}
