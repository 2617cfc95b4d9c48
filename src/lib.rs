pub mod api;
pub mod auth;
pub mod billing;
pub mod config;
pub mod error;
pub mod generation;
pub mod object_store;
pub mod rate_limit;
pub mod store;
pub mod stripe_client;
pub mod synthesis;
pub mod webhook;

use anyhow::{anyhow, Context as _};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use auth::{IdentityToolkitVerifier, TokenVerifier};
use billing::PlanTransitionHandler;
use config::Config;
use generation::Generator;
use object_store::{LocalObjectStore, ObjectStore};
use rate_limit::RateLimiter;
use store::Database;
use stripe_client::{RealStripeClient, StripeClient};
use synthesis::{HuggingFaceClient, ImageSynthesizer};

pub use error::{Error, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared handles for every request
pub struct AppState {
    pub config: Config,
    pub db: Arc<Database>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub objects: Arc<dyn ObjectStore>,
    pub generator: Arc<Generator>,
    pub transitions: PlanTransitionHandler,
    /// `None` when no payment provider key is configured
    pub stripe: Option<Arc<dyn StripeClient>>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Build the production collaborators from `config`
    pub fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let db = Arc::new(
            Database::open(&config.database_path)
                .with_context(|| format!("opening {}", config.database_path.display()))?,
        );

        let api_key = config
            .auth_api_key
            .clone()
            .ok_or_else(|| anyhow!("AUTH_API_KEY must be set"))?;
        let verifier = IdentityToolkitVerifier::new(api_key, config.auth_api_url.clone())?;

        let synthesizer = match &config.huggingface_api_key {
            Some(key) => {
                let client = HuggingFaceClient::new(key.clone(), config.huggingface_model.clone())?;
                Some(Arc::new(client) as Arc<dyn ImageSynthesizer>)
            }
            None => None,
        };

        let stripe = match &config.stripe_secret_key {
            Some(key) => Some(Arc::new(RealStripeClient::new(key.clone())) as Arc<dyn StripeClient>),
            None => None,
        };

        let objects = LocalObjectStore::new(config.media_root.clone(), &config.media_url());

        Ok(Self::with_collaborators(
            config,
            db,
            Arc::new(verifier),
            synthesizer,
            Arc::new(objects),
            stripe,
        ))
    }

    pub fn with_collaborators(
        config: Config,
        db: Arc<Database>,
        verifier: Arc<dyn TokenVerifier>,
        synthesizer: Option<Arc<dyn ImageSynthesizer>>,
        objects: Arc<dyn ObjectStore>,
        stripe: Option<Arc<dyn StripeClient>>,
    ) -> Arc<Self> {
        let limiter = Arc::new(RateLimiter::new(
            config.generation_rate_limit,
            config.generation_rate_window_secs,
        ));
        let generator = Arc::new(Generator::new(
            db.clone(),
            verifier.clone(),
            synthesizer,
            objects.clone(),
            limiter.clone(),
        ));
        if stripe.is_none() {
            info!("No payment provider configured, checkout is disabled");
        }

        Arc::new(Self {
            transitions: PlanTransitionHandler::new(db.clone()),
            config,
            db,
            verifier,
            objects,
            generator,
            stripe,
            limiter,
        })
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the default filter; `LOG_JSON=true` switches to one
/// JSON object per line.
pub fn init_tracing(config: &Config) {
    let filter = config
        .rust_log
        .as_deref()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("warn,postergen=info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_json.unwrap_or(false) {
        builder.json().flatten_event(true).init();
    } else {
        builder.init();
    }
}
