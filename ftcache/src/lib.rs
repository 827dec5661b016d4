//! # ftcache - Cache de transcodage adressé par contenu
//!
//! Cette crate associe `(chemin source, mtime source)` à un artefact ALAC sur
//! disque. Un artefact déjà présent est resservi sans réencodage, y compris
//! après un redémarrage du service (redécouverte par stat). Le cache impose
//! un budget en octets avec éviction LRU et garantit qu'au plus un
//! transcodage est en vol pour une clé donnée.
//!
//! ## Vue d'ensemble
//!
//! ```text
//! ftcache
//!     ├── key.rs    - Empreinte md5 (chemin, mtime) → nom d'artefact
//!     ├── stats.rs  - Indices de taille pour getattr, bornés
//!     └── cache.rs  - Table autoritaire, adoption, éviction, latch par clé
//! ```
//!
//! Le cache ne connaît l'encodeur qu'à travers le trait
//! [`fttranscoder::Converter`], ce qui permet de le tester avec un
//! convertisseur scripté.

pub mod cache;
pub mod key;
pub mod stats;

pub use cache::{Cache, CacheItem};
pub use key::{artifact_name, cache_key, mtime_ns};

use std::path::PathBuf;

/// Erreurs du cache, traduites en `errno` par la façade filesystem
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to prepare cache directory {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to stat source file {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to transcode {path}: {source}")]
    Transcode {
        path: PathBuf,
        #[source]
        source: fttranscoder::TranscodeError,
    },
    #[error("failed to delete cached file {path}: {source}")]
    Evict {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
