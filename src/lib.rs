pub mod config;
pub mod error;
pub mod host_api;
pub mod logging;
pub mod oauth;

use std::sync::Arc;

use config::Config;
use host_api::rate_limit::RateLimiter;
use oauth::observer::{AuthObserver, SpanObserver};
use oauth::registry::{ClientRegistry, RegistryError};
use oauth::signing::{SigningKey, TokenSigner};
use oauth::{ScopeGate, TokenIssuer};

/// Service identity stamped onto every request span.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub name: String,
    pub environment: String,
}

/// Everything a request handler can reach. Cheap to clone; nothing in here
/// is mutated after start-up except the rate limiter's counters.
#[derive(Clone)]
pub struct AppState {
    pub issuer: Arc<TokenIssuer>,
    pub gate: Arc<ScopeGate>,
    pub rate_limiter: RateLimiter,
    pub observer: Arc<dyn AuthObserver>,
    pub service: ServiceInfo,
}

impl AppState {
    /// Wire the issuer and the gate around one signing key. Both sides must
    /// share the key or no issued token will ever verify.
    pub fn new(
        registry: Arc<dyn ClientRegistry>,
        key: &SigningKey,
        rate_limiter: RateLimiter,
        observer: Arc<dyn AuthObserver>,
        service: ServiceInfo,
    ) -> Self {
        let signer = Arc::new(TokenSigner::new(key));
        Self {
            issuer: Arc::new(TokenIssuer::new(registry, signer.clone(), observer.clone())),
            gate: Arc::new(ScopeGate::new(signer, observer.clone())),
            rate_limiter,
            observer,
            service,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        let registry = config.load_registry()?;
        Ok(Self::new(
            Arc::new(registry),
            &config.signing_key(),
            RateLimiter::new(config.rate_limit_max, config.rate_limit_window()),
            Arc::new(SpanObserver),
            config.service_info(),
        ))
    }
}
