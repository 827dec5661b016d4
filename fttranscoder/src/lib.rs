//! # fttranscoder - Transcodage FLAC vers ALAC pour FakeTunes
//!
//! Cette crate encapsule l'encodeur externe (`ffmpeg`) et la sonde de flux
//! (`ffprobe`). Le nombre de processus d'encodage simultanés est borné par un
//! sémaphore : les appelants attendent qu'un slot se libère avant de lancer
//! une conversion.
//!
//! ## Vue d'ensemble
//!
//! - [`Converter`] : trait asynchrone exposé au cache (et aux tests)
//! - [`Transcoder`] : implémentation réelle, un processus ffmpeg par appel
//! - [`probe`] : détection du taux d'échantillonnage et de la profondeur de
//!   bits de la source, pour éviter tout suréchantillonnage
//! - [`album_art`] : recherche de la pochette dans le répertoire de l'album
//!
//! La conversion préserve les métadonnées de la source, incruste la pochette
//! si elle existe, et remplit `sort_artist` à partir du premier composant du
//! chemin sous la racine de la collection.

pub mod album_art;
pub mod metadata;
pub mod probe;

mod convert;

pub use album_art::find_album_art;
pub use metadata::{escape_metadata, sort_artist_for};
pub use probe::{probe_source, SourceFormat};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Semaphore;

/// Taille minimale d'un artefact valide ; en dessous, la sortie est traitée
/// comme un échec d'encodage.
pub const MIN_ARTIFACT_BYTES: u64 = 1024;

/// Taux d'échantillonnage cible au-delà duquel la source est rééchantillonnée
pub const TARGET_SAMPLE_RATE: u32 = 48_000;

/// Profondeur de bits cible au-delà de laquelle la source est réduite
pub const TARGET_BIT_DEPTH: u32 = 16;

/// Erreurs d'invocation de l'encodeur externe
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("ffmpeg exited with {status}: {stderr}")]
    Encoder {
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("transcoded file not found at {path}: {source}")]
    OutputMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("transcoded file is too small: {size} bytes, less than 1 kilobyte")]
    OutputTooSmall { size: u64 },
    #[error("transcoder is shut down")]
    Closed,
}

/// Interface de conversion vue par le cache
///
/// Le cache ne connaît que ce trait ; les tests lui injectent une
/// implémentation scriptée à la place du vrai encodeur.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Matérialise `destination` à partir de `source` et retourne la taille
    /// du fichier produit, en octets.
    async fn convert(&self, source: &Path, destination: &Path) -> Result<u64, TranscodeError>;
}

/// Transcodeur FLAC → ALAC délégué à ffmpeg
///
/// # Exemple
///
/// ```no_run
/// use fttranscoder::{Converter, Transcoder};
/// use std::path::Path;
///
/// # async fn example() -> Result<(), fttranscoder::TranscodeError> {
/// let transcoder = Transcoder::new("/srv/music/flac", 2);
/// let size = transcoder
///     .convert(
///         Path::new("/srv/music/flac/Artist/Album/01.flac"),
///         Path::new("/tmp/out.m4a"),
///     )
///     .await?;
/// println!("{} bytes", size);
/// # Ok(())
/// # }
/// ```
pub struct Transcoder {
    source_root: PathBuf,
    slots: Semaphore,
}

impl Transcoder {
    /// Crée un transcodeur avec au plus `parallel` encodages simultanés
    pub fn new(source_root: impl Into<PathBuf>, parallel: usize) -> Self {
        Self {
            source_root: source_root.into(),
            slots: Semaphore::new(parallel),
        }
    }

    /// Racine de la collection, utilisée pour dériver `sort_artist`
    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Nombre de slots d'encodage actuellement libres
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Ferme le sémaphore : les appels en attente échouent avec
    /// [`TranscodeError::Closed`]. Utilisé à l'arrêt du service.
    pub fn shutdown(&self) {
        self.slots.close();
    }
}

#[async_trait]
impl Converter for Transcoder {
    async fn convert(&self, source: &Path, destination: &Path) -> Result<u64, TranscodeError> {
        // Un permit couvre la sonde et l'encodage, relâché sur tous les
        // chemins de sortie.
        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| TranscodeError::Closed)?;

        convert::run(self, source, destination).await
    }
}
