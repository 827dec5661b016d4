//! Préparation des répertoires et cycle de montage
//!
//! Le point de montage est nettoyé à chaud : un montage résiduel d'une
//! exécution précédente est démonté avant de recréer la structure. Le
//! répertoire cache et le canal de métadonnées survivent d'un démarrage à
//! l'autre pour que les artefacts existants soient réadoptés.

use fuser::{BackgroundSession, MountOption};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::facade::MusicFs;
use ftconfig::Config;

/// Erreurs fatales de mise en place du système de fichiers
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("source directory does not exist: {path}")]
    NoSource { path: PathBuf },
    #[error("failed to clean up destination directory {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to mount filesystem at {path}: {source}")]
    Mount {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Vérifie la source et met en place `Music/`, `.cache/` et `.metadata/`
///
/// Seul le point de montage est détruit et recréé ; le cache et les
/// métadonnées sont conservés.
pub async fn prepare_directories(config: &Config) -> Result<(), FsError> {
    let source_dir = &config.paths.source;
    if tokio::fs::metadata(source_dir).await.is_err() {
        return Err(FsError::NoSource {
            path: source_dir.clone(),
        });
    }
    info!(path = %source_dir.display(), "Got source directory");

    let music_dir = config.music_dir();
    if tokio::fs::metadata(&music_dir).await.is_ok() {
        info!(path = %music_dir.display(), "Cleaning up the destination mountpoint");

        // Démonte un éventuel montage résiduel, puis laisse le noyau retomber
        let _ = Command::new("fusermount3")
            .arg("-u")
            .arg(&music_dir)
            .status()
            .await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        tokio::fs::remove_dir_all(&music_dir)
            .await
            .map_err(|source| FsError::Cleanup {
                path: music_dir.clone(),
                source,
            })?;
    }

    for dir in [music_dir, config.cache_dir(), config.metadata_dir()] {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| FsError::CreateDir {
                path: dir.clone(),
                source,
            })?;
    }

    debug!(
        source = %config.paths.source.display(),
        mountpoint = %config.music_dir().display(),
        cache = %config.cache_dir().display(),
        metadata = %config.metadata_dir().display(),
        "Filesystem directories prepared"
    );

    Ok(())
}

/// Monte l'arborescence virtuelle en lecture seule
///
/// La session retournée tourne sur son propre thread ; la relâcher démonte
/// le système de fichiers.
pub fn mount(fs: MusicFs, mountpoint: &Path) -> Result<BackgroundSession, FsError> {
    let options = [
        MountOption::DefaultPermissions,
        MountOption::FSName("flac2alac".to_string()),
        MountOption::Subtype("faketunes".to_string()),
        MountOption::NoSuid,
        MountOption::NoDev,
        MountOption::NoExec,
        MountOption::RO,
    ];

    info!(mountpoint = %mountpoint.display(), "Mounting virtual filesystem");

    fuser::spawn_mount2(fs, mountpoint, &options).map_err(|source| FsError::Mount {
        path: mountpoint.to_path_buf(),
        source,
    })
}
