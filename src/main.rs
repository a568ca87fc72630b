use antwort::{
    backend::{InferenceBackend, MockBackend, OpenAiCompatBackend},
    config::{BackendKind, Config},
    store::{ConversationStore, InMemoryConversationStore},
    AppState,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "antwort=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;

    let backend: Arc<dyn InferenceBackend> = match &config.backend {
        BackendKind::Mock => {
            info!("Using mock inference backend");
            Arc::new(MockBackend::new())
        }
        BackendKind::OpenAi { base_url, api_key } => {
            info!("Using chat completions backend at {}", base_url);
            Arc::new(OpenAiCompatBackend::new(
                base_url.clone(),
                api_key.clone(),
                config.backend_timeout,
            ))
        }
    };
    let store = Arc::new(InMemoryConversationStore::new(config.store_policy));

    let app_state = Arc::new(AppState::new(
        backend,
        store.clone(),
        config.engine_config(),
    ));
    let app = antwort::app(app_state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!("Listening on http://{}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
