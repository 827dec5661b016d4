use anyhow::Context;
use ftconfig::Config;
use fttranscoder::Transcoder;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ========== PHASE 1 : Configuration et journalisation ==========

    let config = Config::load().context("failed to load configuration")?;

    // RUST_LOG prime sur le niveau configuré
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.faketunes.log_level.as_filter())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting faketunes...");
    debug!(log_level = %config.faketunes.log_level, "Set log level");

    // ========== PHASE 2 : Répertoires et câblage des composants ==========

    ftfs::prepare_directories(&config)
        .await
        .context("failed to prepare filesystem directories")?;

    let transcoder = Arc::new(Transcoder::new(
        config.paths.source.clone(),
        config.transcoding.parallel,
    ));

    let cache = Arc::new(
        ftcache::Cache::new(
            config.cache_dir(),
            config.cache_budget_bytes(),
            transcoder.clone(),
        )
        .context("failed to initialize the transcode cache")?,
    );

    let shutdown = CancellationToken::new();
    let fs = ftfs::MusicFs::new(
        &config,
        cache,
        tokio::runtime::Handle::current(),
        shutdown.clone(),
    );

    // ========== PHASE 3 : Montage et attente du signal ==========

    let session = ftfs::mount(fs, &config.music_dir())?;
    info!(mountpoint = %config.music_dir().display(), "Started faketunes");

    // À l'annulation, les transcodages en attente de slot échouent proprement
    // au lieu de bloquer l'arrêt.
    {
        let transcoder = transcoder.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            transcoder.shutdown();
        });
    }

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!(signal = "SIGINT", "Got terminating signal, shutting down...");
        }
        _ = sigterm.recv() => {
            info!(signal = "SIGTERM", "Got terminating signal, shutting down...");
        }
    }

    shutdown.cancel();

    // Relâcher la session démonte le système de fichiers
    drop(session);

    // Courte période de grâce pour les tâches de fond
    info!("Waiting for background tasks to finish...");
    tokio::time::sleep(Duration::from_secs(2)).await;

    info!("faketunes stopped");

    Ok(())
}
