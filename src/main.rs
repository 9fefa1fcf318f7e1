use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use holdfast::auth::AdminAuth;
use holdfast::booking::BookingService;
use holdfast::config::{Config, GatewayConfig};
use holdfast::engine::Engine;
use holdfast::http::{AppState, router};
use holdfast::notify::{LogSender, NotifyHub, run_dispatcher};
use holdfast::payment::{HttpGateway, PaymentGateway, SandboxGateway};
use holdfast::{janitor, observability};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(config.wal_path(), notify.clone())?);

    let gateway: Arc<dyn PaymentGateway> = match &config.gateway {
        GatewayConfig::Http { base_url, secret_key } => Arc::new(HttpGateway::new(base_url.clone(), secret_key.clone())?),
        GatewayConfig::Sandbox => {
            tracing::warn!("HOLDFAST_GATEWAY_KEY not set, using the sandbox gateway");
            Arc::new(SandboxGateway::new(config.public_url.clone()))
        }
    };
    let booking = Arc::new(BookingService::new(
        engine.clone(),
        gateway,
        config.currency.clone(),
        config.public_url.clone(),
    ));

    let token = CancellationToken::new();
    let background = [
        tokio::spawn(janitor::run_janitor(engine.clone(), config.janitor_interval, token.clone())),
        tokio::spawn(janitor::run_compactor(engine.clone(), config.compact_threshold, token.clone())),
        tokio::spawn(run_dispatcher(notify.subscribe(), Arc::new(LogSender), token.clone())),
    ];

    let app = router(
        AppState::new(booking, &config.webhook_secret),
        AdminAuth::new(&config.admin_token),
    );

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("holdfast listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  public_url: {}", config.public_url);
    info!("  janitor: every {}s", config.janitor_interval.as_secs());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, cancelling background tasks");
    token.cancel();
    for task in background {
        let _ = task.await;
    }
    info!("holdfast stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::error!("failed to register SIGTERM handler: {e}");
                ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    ctrl_c.await;
    info!("shutdown signal received");
}
