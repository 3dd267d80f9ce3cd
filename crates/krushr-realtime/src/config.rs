use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::connection::ReconnectPolicy;

pub const PRODUCTION_WS_URL: &str = "wss://api.krushr.app/ws";
pub const DEVELOPMENT_WS_URL: &str = "ws://localhost:6001/app/krushr";
pub const PRODUCTION_RPC_URL: &str = "https://api.krushr.app/trpc";
pub const DEVELOPMENT_RPC_URL: &str = "http://localhost:3002/trpc";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid KRUSHR_{key}: {source}")]
    InvalidUrl {
        key: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("KRUSHR_WS_URL must use ws:// or wss://, got {0}")]
    SocketScheme(String),
}

/// Client configuration, read from `KRUSHR_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    #[serde(default = "default_toast_limit")]
    pub toast_limit: usize,
    #[serde(default = "default_toast_ttl_ms")]
    pub toast_ttl_ms: u64,
    #[serde(default = "default_draft_autosave_ms")]
    pub draft_autosave_ms: u64,
    #[serde(default)]
    pub log_path: Option<String>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            env: default_env(),
            ws_url: None,
            rpc_url: None,
            auth_token: None,
            reconnect_base_ms: default_reconnect_base_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            toast_limit: default_toast_limit(),
            toast_ttl_ms: default_toast_ttl_ms(),
            draft_autosave_ms: default_draft_autosave_ms(),
            log_path: None,
        }
    }
}

impl RealtimeConfig {
    /// Loads `.env` if present, then the environment. Falls back to defaults
    /// when the environment cannot be deserialized.
    pub fn from_env() -> Self {
        Self::try_from_env().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "invalid KRUSHR_* configuration; using defaults");
            Self::default().normalize()
        })
    }

    pub fn try_from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("KRUSHR").try_parsing(true))
            .build()?
            .try_deserialize::<RealtimeConfig>()?;
        config.normalize().validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        let ws = Url::parse(&self.ws_url()).map_err(|source| ConfigError::InvalidUrl {
            key: "WS_URL",
            source,
        })?;
        if !matches!(ws.scheme(), "ws" | "wss") {
            return Err(ConfigError::SocketScheme(ws.scheme().to_string()));
        }
        Url::parse(&self.rpc_url()).map_err(|source| ConfigError::InvalidUrl {
            key: "RPC_URL",
            source,
        })?;
        Ok(self)
    }

    fn normalize(mut self) -> Self {
        self.env = self.env.trim().to_ascii_lowercase();
        if self.env.is_empty() {
            self.env = default_env();
        }
        self.ws_url = Self::normalize_opt(self.ws_url.take());
        self.rpc_url = Self::normalize_opt(self.rpc_url.take());
        self.auth_token = Self::normalize_opt(self.auth_token.take());
        self.log_path = Self::normalize_opt(self.log_path.take());
        self
    }

    fn normalize_opt(value: Option<String>) -> Option<String> {
        value.and_then(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    pub fn is_production(&self) -> bool {
        self.env == "production"
    }

    /// Socket endpoint: the explicit override, else the one for the deployment.
    pub fn ws_url(&self) -> String {
        match &self.ws_url {
            Some(url) => url.clone(),
            None if self.is_production() => PRODUCTION_WS_URL.to_string(),
            None => DEVELOPMENT_WS_URL.to_string(),
        }
    }

    pub fn rpc_url(&self) -> String {
        match &self.rpc_url {
            Some(url) => url.clone(),
            None if self.is_production() => PRODUCTION_RPC_URL.to_string(),
            None => DEVELOPMENT_RPC_URL.to_string(),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(self.reconnect_base_ms),
            self.max_reconnect_attempts,
        )
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn toast_ttl(&self) -> Duration {
        Duration::from_millis(self.toast_ttl_ms)
    }

    pub fn draft_autosave_interval(&self) -> Duration {
        Duration::from_millis(self.draft_autosave_ms.max(1))
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.log_path.as_ref().map(PathBuf::from)
    }
}

fn default_env() -> String {
    "development".to_string()
}

fn default_reconnect_base_ms() -> u64 {
    2_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

fn default_toast_limit() -> usize {
    3
}

fn default_toast_ttl_ms() -> u64 {
    5_000
}

fn default_draft_autosave_ms() -> u64 {
    1_000
}
