use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::oauth::registry::{RegistryError, StaticClientRegistry};
use crate::oauth::signing::SigningKey;
use crate::ServiceInfo;

pub const FALLBACK_JWT_SECRET: &str = "fallback-secret-not-for-production";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable, multi-line output for local development.
    Pretty,
}

/// Process configuration. Every flag falls back to an environment variable,
/// so a container can be configured without a command line.
#[derive(Debug, Clone, Parser)]
#[command(name = "platform-core", version, about)]
pub struct Config {
    /// Interface to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Symmetric key used to both sign and verify access tokens.
    #[arg(long, env = "JWT_SECRET", default_value = FALLBACK_JWT_SECRET, hide_env_values = true)]
    pub jwt_secret: String,

    /// Requests allowed per caller per window.
    #[arg(long, env = "RATE_LIMIT_MAX", default_value_t = 100)]
    pub rate_limit_max: u64,

    /// Rate-limit window length in milliseconds.
    #[arg(long, env = "RATE_LIMIT_WINDOW_MS", default_value_t = 60_000)]
    pub rate_limit_window_ms: u64,

    /// `tracing_subscriber::EnvFilter` directive, e.g. `info` or `platform_core=debug`.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    #[arg(long, env = "OTEL_SERVICE_NAME", default_value = "platform-core")]
    pub service_name: String,

    #[arg(long, env = "APP_ENV", default_value = "development")]
    pub environment: String,

    /// JSON file holding `[{clientId, secret, allowedScopes}]`. When absent the
    /// built-in demo client is registered.
    #[arg(long, env = "CLIENTS_FILE")]
    pub clients_file: Option<PathBuf>,
}

impl Config {
    pub fn signing_key(&self) -> SigningKey {
        SigningKey::new(self.jwt_secret.as_bytes())
    }

    pub fn service_info(&self) -> ServiceInfo {
        ServiceInfo {
            name: self.service_name.clone(),
            environment: self.environment.clone(),
        }
    }

    pub fn uses_fallback_secret(&self) -> bool {
        self.jwt_secret == FALLBACK_JWT_SECRET
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn load_registry(&self) -> Result<StaticClientRegistry, RegistryError> {
        match &self.clients_file {
            Some(path) => StaticClientRegistry::from_json_file(path),
            None => Ok(StaticClientRegistry::demo()),
        }
    }

    /// Resolve the listen address. Hostnames other than IP literals are not
    /// looked up here; `localhost` is the one convenience alias.
    pub fn listen_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        let host = if self.host == "localhost" { "127.0.0.1" } else { self.host.as_str() };
        format!("{}:{}", host, self.port)
            .parse()
            .or_else(|e| format!("[{}]:{}", host, self.port).parse().map_err(|_| e))
    }
}
