//! Lunchline server binary.
//!
//! Loads the saved state and the student roster, spawns the authoritative
//! hub, and serves HTTP + WebSocket until Ctrl+C or SIGTERM. The state is
//! saved continuously while running and once more on the way out.

mod config;

use log::{error, info};
use tokio::signal::ctrl_c;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use lunchline_sync::hub::{Hub, HubConfig};
use lunchline_sync::roster::load_roster;
use lunchline_sync::server::{ServerConfig, SyncServer};
use lunchline_sync::store::StateStore;

use config::Config;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = Config::load();
    let store = StateStore::new(&config.data_file);

    info!("Loading state from {}", config.data_file.display());
    let mut state = store.load();
    info!(
        "Starting with {} orders, {} menu items",
        state.orders.len(),
        state.menu_items.len()
    );

    if let Some(students) = load_roster(&config.roster_file) {
        state.replace_students(students);
    }

    let hub = Hub::spawn(state, store, HubConfig::default());
    let server = SyncServer::new(
        hub.clone(),
        ServerConfig {
            bind_addr: config.bind_addr(),
        },
    );

    if let Err(e) = server.run(shutdown_signal()).await {
        error!("Server failed: {e}");
    }

    info!("Saving state before exit");
    if let Err(e) = hub.shutdown().await {
        error!("Final save failed: {e}");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
