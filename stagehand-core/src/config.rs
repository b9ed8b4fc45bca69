use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};

/// Hosted Stagehand API.
pub const DEFAULT_BASE_URL: &str = "https://api.stagehand.browserbase.com";
/// Stagehand server running on the developer's machine.
pub const LOCAL_BASE_URL: &str = "http://localhost:3000";

pub const ENV_BASE_URL: &str = "STAGEHAND_BASE_URL";
pub const ENV_API_URL: &str = "STAGEHAND_API_URL";
pub const ENV_BROWSERBASE_API_KEY: &str = "BROWSERBASE_API_KEY";
pub const ENV_BROWSERBASE_PROJECT_ID: &str = "BROWSERBASE_PROJECT_ID";
pub const ENV_MODEL_API_KEY: &str = "MODEL_API_KEY";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ApiCfg {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for ApiCfg {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

/// Names of the environment variables holding credentials.
/// Secrets never live in the config file itself.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CredentialsCfg {
    #[serde(default = "default_bb_key_env")]
    pub browserbase_api_key_env: String,
    #[serde(default = "default_bb_project_env")]
    pub browserbase_project_id_env: String,
    #[serde(default = "default_model_key_env")]
    pub model_api_key_env: String,
}

impl Default for CredentialsCfg {
    fn default() -> Self {
        Self {
            browserbase_api_key_env: default_bb_key_env(),
            browserbase_project_id_env: default_bb_project_env(),
            model_api_key_env: default_model_key_env(),
        }
    }
}

fn default_bb_key_env() -> String {
    ENV_BROWSERBASE_API_KEY.to_string()
}
fn default_bb_project_env() -> String {
    ENV_BROWSERBASE_PROJECT_ID.to_string()
}
fn default_model_key_env() -> String {
    ENV_MODEL_API_KEY.to_string()
}

/// Credentials resolved from the environment.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub browserbase_api_key: Option<SecretString>,
    pub browserbase_project_id: Option<String>,
    pub model_api_key: Option<SecretString>,
}

impl CredentialsCfg {
    pub fn resolve(&self) -> Credentials {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Resolve credentials through an arbitrary lookup. Empty values count as unset.
    pub fn resolve_with<F>(&self, lookup: F) -> Credentials
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Credentials {
            browserbase_api_key: get(&self.browserbase_api_key_env)
                .map(|v| SecretString::new(v.into())),
            browserbase_project_id: get(&self.browserbase_project_id_env),
            model_api_key: get(&self.model_api_key_env).map(|v| SecretString::new(v.into())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds (default 300000ms). Streams of long
    /// agent runs stay open for minutes, so this is much larger than a typical API default.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    300_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiCfg,
    #[serde(default)]
    pub credentials: CredentialsCfg,
    /// HTTP client configuration (timeouts, pooling). Missing → defaults.
    #[serde(default)]
    pub http: HttpCfg,
    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::StagehandError::from)?;
        let s = std::str::from_utf8(&bytes)
            .map_err(|e| crate::error::StagehandError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::StagehandError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::StagehandError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::StagehandError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::StagehandError::Other(e.into()))
                })?,
        };
        Ok(cfg)
    }

    /// Defaults, with the base URL taken from `STAGEHAND_BASE_URL`
    /// (or `STAGEHAND_API_URL`) when set.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(url) = lookup(ENV_BASE_URL)
            .or_else(|| lookup(ENV_API_URL))
            .filter(|u| !u.trim().is_empty())
        {
            cfg.api.base_url = url;
        }
        cfg
    }
}
