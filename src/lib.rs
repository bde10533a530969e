pub mod types;
pub mod config;
pub mod store;
pub mod bracket;
pub mod compose;
pub mod publisher;
pub mod collect;
pub mod manager;

use compose::GridRenderer;
use config::*;
use manager::{PollManager, SystemControl};
use publisher::GraphClient;
use store::{load_or_seed, SnapshotStore};

use std::fs;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub fn run() -> Result<(), String> {
    load_env_file();

    // Initialize tracing with file + stderr output
    let logs_dir = repo_root().join("logs");
    fs::create_dir_all(&logs_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&logs_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
    info!("Reaction Poll starting");

    let config = load_config_inner()?;
    let api_base = config.api_base.clone();
    let access_token = config.access_token.clone();
    let settings = resolve_settings(config)?;
    let publisher = GraphClient::new(&api_base, &access_token);

    if !settings.source_album_ids.is_empty() {
        collect::collect_album_images(&publisher, &settings.source_album_ids, &settings.images_dir)?;
    }

    let store = SnapshotStore::new(settings.state_file.clone());
    let snapshot = load_or_seed(&store, &settings)?;
    let renderer = GridRenderer::new(settings.layout, &settings.reactions)?;

    let mut poll = PollManager::new(settings, store, snapshot, publisher, renderer);
    let winner = poll.run(&mut SystemControl)?;
    info!("Run complete. Winner: {winner}.");
    Ok(())
}
