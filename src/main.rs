use {
    shop_sync::{
        AppState,
        adapters::{http, shopify::ShopifyClient},
        app::{self, App, AppSettings},
        config::Config,
        jobs::email::LogMailer,
    },
    std::sync::Arc,
    tokio::signal,
    tracing_subscriber::EnvFilter,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    tracing::info!(?config, "configuration loaded");

    let (backend, store) = app::connect(&config).await?;
    let shopify = Arc::new(ShopifyClient::new(
        &config.shop_domain,
        config.access_token.clone(),
    )?);
    let app = App::start(
        backend,
        store,
        shopify,
        Arc::new(LogMailer),
        AppSettings::from_config(&config),
    )?;

    let state = AppState {
        backend: app.backend(),
        store: app.store(),
        supervisor: app.supervisor(),
        webhook_secret: config.webhook_secret.as_str().into(),
        retention: config.job_retention,
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    let served = axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    app.shutdown().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
