//! Tourney sync server entrypoint wiring the packet websocket, REST mirror, storage and mesh discovery.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tourney_sync_core::{
    config::ServerConfig,
    dao::tournament_store::memory::MemoryStore,
    routes,
    services::{
        mesh,
        messaging::{LogSink, MessageSink},
    },
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ServerConfig::load();
    let messaging = build_messaging(&config);
    let port = config.websocket_port;
    let upnp_enabled = config.upnp_enabled;

    let app_state = match config.storage.mongo_uri.clone() {
        Some(uri) => start_mongo(config, messaging, uri),
        None => {
            info!("no storage URI configured; keeping tournaments in memory");
            let state = AppState::with_store(config, Arc::new(MemoryStore::new()), messaging);
            state
                .manager()
                .load_saved()
                .await
                .context("loading in-memory tournaments")?;
            state
        }
    };

    if upnp_enabled {
        warn!(port, "automatic port mapping is not available; forward the port manually");
    }

    // Verification binds the advertised port, so it must finish before the main listener starts.
    let listed = mesh::self_listing(&app_state.config()).await;
    tokio::spawn(run_discovery(app_state.clone(), listed));

    let app = build_router(app_state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Webhook announcements when configured, log lines otherwise.
fn build_messaging(config: &ServerConfig) -> Arc<dyn MessageSink> {
    #[cfg(feature = "webhook-messaging")]
    {
        if let Some(url) = config.webhook_url.as_deref() {
            match tourney_sync_core::services::messaging::WebhookSink::new(url) {
                Ok(sink) => return Arc::new(sink),
                Err(err) => warn!(error = %err, "failed to build webhook sink; announcements go to the log"),
            }
        }
    }
    #[cfg(not(feature = "webhook-messaging"))]
    {
        if config.webhook_url.is_some() {
            warn!("webhook messaging is not compiled in; announcements go to the log");
        }
    }
    Arc::new(LogSink)
}

#[cfg(feature = "mongo-store")]
fn start_mongo(config: ServerConfig, messaging: Arc<dyn MessageSink>, uri: String) -> SharedState {
    use tourney_sync_core::{
        dao::{
            storage::StorageError,
            tournament_store::{
                TournamentStore,
                mongodb::{MongoConfig, MongoTournamentStore},
            },
        },
        services::storage_supervisor,
    };

    let db_name = config.storage.mongo_db.clone();
    let state = AppState::new(config, messaging);
    tokio::spawn(storage_supervisor::run(state.clone(), move || {
        let uri = uri.clone();
        let db_name = db_name.clone();
        async move {
            let config = MongoConfig::from_uri(&uri, db_name.as_deref()).await?;
            let store = MongoTournamentStore::connect(config).await?;
            Ok::<_, StorageError>(Arc::new(store) as Arc<dyn TournamentStore>)
        }
    }));
    state
}

#[cfg(not(feature = "mongo-store"))]
fn start_mongo(config: ServerConfig, messaging: Arc<dyn MessageSink>, _uri: String) -> SharedState {
    warn!("MongoDB support is not compiled in; keeping tournaments in memory");
    AppState::with_store(config, Arc::new(MemoryStore::new()), messaging)
}

/// Startup discovery round. Failures leave the directory as it was.
async fn run_discovery(state: SharedState, listed: bool) {
    let probe = state.probe();
    if let Err(err) = mesh::refresh(&state, probe.as_ref(), listed).await {
        warn!(error = %err, "mesh discovery failed; continuing with the current directory");
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
