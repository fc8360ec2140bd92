//! Runtime configuration for html-inference-dispatcher.
//!
//! Configuration is loaded once from a JSON file (or constructed programmatically)
//! and handed to the component constructors. Request handling never consults the
//! process environment; credentials supplied on the command line or through the
//! environment are folded in here at startup.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::catalog::descriptor::ModelDescriptor;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "html-inference-dispatcher",
    about = "Text/image generation dispatcher rendering HTML responses"
)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides `server.listen`).
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,

    /// Bedrock API key (overrides `providers.bedrock.bearer_token`).
    #[arg(long, env = "AWS_BEARER_TOKEN_BEDROCK", hide_env_values = true)]
    pub bedrock_token: Option<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Provider call policy (timeouts, retry, streaming channel).
    pub gateway: GatewayConfig,

    /// Upstream provider endpoints and credentials.
    pub providers: ProvidersConfig,

    /// Model catalog overrides.
    pub catalog: CatalogConfig,

    /// Observability hooks.
    pub observability: ObservabilityConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,

    /// Maximum concurrent requests.
    pub max_concurrent_requests: usize,

    /// Host execution limit per request, in seconds.
    pub request_timeout_secs: u64,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,

    /// Attach a permissive CORS layer.
    pub allow_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            max_concurrent_requests: 64,
            request_timeout_secs: 300,
            max_body_bytes: 64 * 1024,
            allow_cors: true,
        }
    }
}

/// Provider call policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Explicit provider-call budget in seconds. When unset the budget is the
    /// server request timeout minus `safety_margin_secs`.
    pub call_timeout_secs: Option<u64>,

    /// Margin kept between the provider budget and the host limit.
    pub safety_margin_secs: u64,

    /// Fixed backoff before the single retry on throttling.
    pub retry_backoff_ms: u64,

    /// Capacity of the per-request delta channel.
    pub channel_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: None,
            safety_margin_secs: 10,
            retry_backoff_ms: 1000,
            channel_capacity: 32,
        }
    }
}

/// Upstream provider settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub bedrock: BedrockConfig,
    pub ollama: OllamaConfig,
}

/// Amazon Bedrock runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BedrockConfig {
    /// AWS region of the runtime endpoint.
    pub region: String,

    /// Explicit endpoint; derived from `region` when unset.
    pub endpoint: Option<String>,

    /// Bedrock API key sent as a bearer token.
    #[serde(skip_serializing)]
    pub bearer_token: Option<SecretString>,
}

impl Default for BedrockConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            bearer_token: None,
        }
    }
}

impl BedrockConfig {
    /// Base URL of the Bedrock runtime API.
    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://bedrock-runtime.{}.amazonaws.com", self.region),
        }
    }
}

/// Ollama server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
        }
    }
}

/// Model catalog overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Model used for text tasks when the request names none.
    pub default_text_model: String,

    /// Model used for image tasks when the request names none.
    pub default_image_model: String,

    /// Extra descriptors added to (or replacing) the built-in entries.
    pub models: Vec<ModelDescriptor>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            default_text_model: "amazon.titan-text-express-v1".to_string(),
            default_image_model: "amazon.titan-image-generator-v1".to_string(),
            models: Vec::new(),
        }
    }
}

/// Observability hook selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Record a structured log event for every dispatcher stage.
    pub enabled: bool,

    /// Feed the Prometheus registry served on `/metrics`.
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics: true,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Fold command-line overrides into the loaded file configuration.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(listen) = &cli.listen {
            self.server.listen = listen.clone();
        }
        if let Some(token) = &cli.bedrock_token {
            self.providers.bedrock.bearer_token = Some(SecretString::from(token.clone()));
        }
    }

    /// Budget for a single provider call.
    pub fn call_timeout(&self) -> Duration {
        let secs = self.gateway.call_timeout_secs.unwrap_or_else(|| {
            self.server
                .request_timeout_secs
                .saturating_sub(self.gateway.safety_margin_secs)
                .max(1)
        });
        Duration::from_secs(secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.gateway.retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.gateway.channel_capacity, 32);
        assert_eq!(cfg.catalog.default_text_model, "amazon.titan-text-express-v1");
        assert!(cfg.providers.bedrock.bearer_token.is_none());
    }

    #[test]
    fn test_call_timeout_derived_from_host_limit() {
        let cfg = Config::default();
        assert_eq!(cfg.call_timeout(), Duration::from_secs(290));

        let mut cfg = Config::default();
        cfg.gateway.call_timeout_secs = Some(30);
        assert_eq!(cfg.call_timeout(), Duration::from_secs(30));

        let mut cfg = Config::default();
        cfg.server.request_timeout_secs = 5;
        cfg.gateway.safety_margin_secs = 10;
        assert_eq!(cfg.call_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "gateway": { "retry_backoff_ms": 5 }, "providers": { "bedrock": { "region": "eu-west-1", "bearer_token": "abc" } } }"#,
        )
        .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.retry_backoff(), Duration::from_millis(5));
        assert_eq!(cfg.gateway.channel_capacity, 32);
        assert_eq!(
            cfg.providers.bedrock.endpoint_url(),
            "https://bedrock-runtime.eu-west-1.amazonaws.com"
        );
        let token = cfg.providers.bedrock.bearer_token.as_ref().unwrap();
        assert_eq!(token.expose_secret(), "abc");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let cfg = Config::load(std::path::Path::new("/nonexistent/config.json")).unwrap();
        assert_eq!(cfg.server.listen, "0.0.0.0:8080");
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "html-inference-dispatcher",
            "--listen",
            "127.0.0.1:9000",
            "--bedrock-token",
            "secret",
        ]);
        let mut cfg = Config::default();
        cfg.apply_cli(&cli);
        assert_eq!(cfg.server.listen, "127.0.0.1:9000");
        assert_eq!(
            cfg.providers.bedrock.bearer_token.unwrap().expose_secret(),
            "secret"
        );
    }
}
