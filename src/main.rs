use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use prometheus::Registry;
use tokio::net::TcpListener;
use tracing::info;

use html_inference_dispatcher::catalog::registry::ModelCatalog;
use html_inference_dispatcher::config::{Cli, Config};
use html_inference_dispatcher::dispatch::router::RequestRouter;
use html_inference_dispatcher::dispatch::Dispatcher;
use html_inference_dispatcher::inference::gateway::ModelGateway;
use html_inference_dispatcher::observability::hook::{FanoutHook, NoopHook, SharedHook};
use html_inference_dispatcher::observability::metrics::MetricsHook;
use html_inference_dispatcher::observability::tracing_hook::TracingHook;
use html_inference_dispatcher::server::api::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "html_inference_dispatcher=debug,tower_http=debug"
    } else {
        "html_inference_dispatcher=info,tower_http=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    info!("html-inference-dispatcher v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    config.apply_cli(&cli);

    info!(
        listen = %config.server.listen,
        call_timeout_secs = config.call_timeout().as_secs(),
        retry_backoff_ms = config.gateway.retry_backoff_ms,
        bedrock_endpoint = %config.providers.bedrock.endpoint_url(),
        bedrock_auth = config.providers.bedrock.bearer_token.is_some(),
        ollama = %config.providers.ollama.base_url,
        "Configuration loaded"
    );

    // Model catalog.
    let catalog = Arc::new(ModelCatalog::from_config(&config.catalog)?);
    info!(
        models = catalog.len(),
        default_text = %config.catalog.default_text_model,
        default_image = %config.catalog.default_image_model,
        "Model catalog ready"
    );

    // Observability hooks.
    let registry = Registry::new();
    let mut hooks: Vec<SharedHook> = Vec::new();
    if config.observability.enabled {
        hooks.push(Arc::new(TracingHook));
    }
    if config.observability.metrics {
        hooks.push(Arc::new(
            MetricsHook::new(&registry).context("registering dispatcher metrics")?,
        ));
    }
    let hook: SharedHook = match hooks.len() {
        0 => Arc::new(NoopHook),
        1 => hooks.remove(0),
        _ => Arc::new(FanoutHook::new(hooks)),
    };

    // Provider gateway and dispatcher.
    let gateway = ModelGateway::from_config(&config).context("building provider HTTP client")?;
    let dispatcher = Dispatcher::new(RequestRouter::new(catalog.clone()), gateway, hook);

    let state = Arc::new(AppState::new(dispatcher, catalog, registry, &config.server));

    // Build the HTTP router.
    let app = build_router(state, &config.server);

    // Start the server.
    let listen_addr = config.server.listen.clone();
    info!(addr = listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
