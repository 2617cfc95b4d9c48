//! Service configuration from the environment

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "stabilityai/stable-diffusion-xl-base-1.0";

/// Environment variables, upper-cased field names (`HTTP_PORT`, ...)
#[derive(Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Origin used for checkout redirects and media URLs
    #[serde(default = "default_public_url")]
    pub public_url: String,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,
    pub auth_api_key: Option<String>,
    pub auth_api_url: Option<String>,
    /// Without a key posters fall back to placeholder images
    pub huggingface_api_key: Option<String>,
    #[serde(default = "default_model")]
    pub huggingface_model: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub admin_api_token: Option<String>,
    #[serde(default = "default_rate_limit")]
    pub generation_rate_limit: usize,
    #[serde(default = "default_rate_window_secs")]
    pub generation_rate_window_secs: u64,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_pending_grace_secs")]
    pub pending_grace_secs: u64,
    pub rust_log: Option<String>,
    pub log_json: Option<bool>,
}

fn default_http_port() -> u16 {
    8080
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/postergen.db")
}

fn default_media_root() -> PathBuf {
    PathBuf::from("data/media")
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_rate_limit() -> usize {
    10
}

fn default_rate_window_secs() -> u64 {
    60
}

fn default_reconcile_interval_secs() -> u64 {
    300
}

fn default_pending_grace_secs() -> u64 {
    600
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env::<Config>()
    }

    pub fn public_url(&self) -> &str {
        self.public_url.trim_end_matches('/')
    }

    /// Prefix under which stored images are served
    pub fn media_url(&self) -> String {
        format!("{}/media", self.public_url())
    }

    pub fn pending_grace(&self) -> Duration {
        Duration::from_secs(self.pending_grace_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            http_port: 0,
            public_url: "https://postergen.test".into(),
            database_path: PathBuf::new(),
            media_root: PathBuf::new(),
            auth_api_key: None,
            auth_api_url: None,
            huggingface_api_key: None,
            huggingface_model: DEFAULT_MODEL.into(),
            stripe_secret_key: None,
            stripe_webhook_secret: Some("whsec_test".into()),
            admin_api_token: Some("admin-secret".into()),
            generation_rate_limit: 100,
            generation_rate_window_secs: 60,
            reconcile_interval_secs: 300,
            pending_grace_secs: 600,
            rust_log: None,
            log_json: None,
        }
    }
}
