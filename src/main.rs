//! quiz-room-back binary entrypoint wiring REST, SSE, storage and the background drivers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quiz_room_back::{
    build_router,
    config::AppConfig,
    dao::room_store::{RoomStore, memory::InMemoryRoomStore},
    services::{deadline_scheduler, room_janitor},
    state::{AppState, SharedState, clock::SystemClock},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let app_state = build_state(config);

    tokio::spawn(deadline_scheduler::run(app_state.clone()));
    tokio::spawn(room_janitor::run(app_state.clone()));
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Pick the room store: MongoDB when `MONGO_URI` is set, memory otherwise.
fn build_state(config: AppConfig) -> SharedState {
    #[cfg(feature = "mongo-store")]
    {
        if let Ok(uri) = env::var("MONGO_URI") {
            let state = AppState::new(config, Arc::new(SystemClock));
            spawn_mongo_supervisor(&state, uri, env::var("MONGO_DB").ok());
            return state;
        }
    }

    info!("MONGO_URI not set; using the in-memory room store");
    let store: Arc<dyn RoomStore> = Arc::new(InMemoryRoomStore::new());
    AppState::with_store(config, Arc::new(SystemClock), store)
}

/// Keep a MongoDB connection installed in the state, starting in degraded mode.
#[cfg(feature = "mongo-store")]
fn spawn_mongo_supervisor(state: &SharedState, uri: String, db_name: Option<String>) {
    use quiz_room_back::{
        dao::{
            room_store::mongodb::{MongoConfig, MongoRoomStore},
            storage::StorageError,
        },
        services::storage_supervisor,
    };

    let connect = move || {
        let uri = uri.clone();
        let db_name = db_name.clone();
        async move {
            let config = MongoConfig::from_uri(&uri, db_name.as_deref()).await?;
            let store = MongoRoomStore::connect(config).await?;
            Ok::<Arc<dyn RoomStore>, StorageError>(Arc::new(store))
        }
    };
    tokio::spawn(storage_supervisor::run(state.clone(), connect));
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
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}
