use secrecy::ExposeSecret;

use crate::config::{Config, Credentials};
use crate::error::CoreResult;
use crate::http_client::HttpClient;
use crate::options::RequestOptions;
use crate::session::SessionService;

pub const HEADER_BB_API_KEY: &str = "x-bb-api-key";
pub const HEADER_BB_PROJECT_ID: &str = "x-bb-project-id";
pub const HEADER_MODEL_API_KEY: &str = "x-model-api-key";

/// Entry point: owns the HTTP client and the client-level request defaults.
#[derive(Debug, Clone)]
pub struct StagehandClient {
    sessions: SessionService,
}

impl StagehandClient {
    /// Build from a config, resolving credentials from the process environment.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        Self::with_credentials(cfg, &cfg.credentials.resolve())
    }

    pub fn with_credentials(cfg: &Config, creds: &Credentials) -> CoreResult<Self> {
        let http = HttpClient::from_cfg(&cfg.http)?;
        Ok(Self {
            sessions: SessionService::new(http, default_options(cfg, creds)),
        })
    }

    pub fn sessions(&self) -> &SessionService {
        &self.sessions
    }
}

fn default_options(cfg: &Config, creds: &Credentials) -> RequestOptions {
    let mut opts = RequestOptions::new().base_url(cfg.api.base_url.clone());
    for (k, v) in &cfg.headers {
        opts = opts.header(k.clone(), v.clone());
    }
    match &creds.browserbase_api_key {
        Some(key) => opts = opts.header(HEADER_BB_API_KEY, key.expose_secret()),
        None => tracing::debug!(
            env = %cfg.credentials.browserbase_api_key_env,
            "browserbase api key not set"
        ),
    }
    if let Some(project) = &creds.browserbase_project_id {
        opts = opts.header(HEADER_BB_PROJECT_ID, project.clone());
    }
    if let Some(key) = &creds.model_api_key {
        opts = opts.header(HEADER_MODEL_API_KEY, key.expose_secret());
    }
    opts
}
