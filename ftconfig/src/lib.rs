//! Module de configuration de FakeTunes
//!
//! Ce module charge la configuration YAML du service : chemins source et
//! destination, taille du cache, niveau de log et parallélisme de
//! transcodage. La configuration est immuable après chargement et partagée
//! entre les composants via `Arc<Config>`.
//!
//! ## Utilisation
//!
//! ```no_run
//! use ftconfig::Config;
//!
//! let config = Config::load()?;
//! println!("source: {}", config.paths.source.display());
//! println!("cache budget: {} bytes", config.cache_budget_bytes());
//! # Ok::<(), ftconfig::ConfigError>(())
//! ```
//!
//! ## Format du fichier
//!
//! ```yaml
//! paths:
//!   source: /srv/music/flac
//!   destination: /srv/music/faketunes
//! faketunes:
//!   cache_size: 2048      # MiB
//!   log_level: info
//! transcoding:
//!   parallel: 2
//! ```

use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

/// Variable d'environnement donnant le chemin du fichier de configuration
pub const ENV_CONFIG_PATH: &str = "FAKETUNES_CONFIG";

/// Chemin de configuration par défaut
pub const DEFAULT_CONFIG_PATH: &str = "/etc/faketunes.yaml";

/// Erreurs de chargement et de validation de la configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("can't read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("can't parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("paths.source must be an absolute path, got {0}")]
    SourceNotAbsolute(PathBuf),
    #[error("paths.destination must be an absolute path, got {0}")]
    DestinationNotAbsolute(PathBuf),
    #[error("transcoding.parallel must be at least 1")]
    InvalidParallelism,
}

/// Niveau de log du service, converti vers `tracing` au démarrage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive `EnvFilter` correspondante
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter())
    }
}

/// Chemins source et destination du système de fichiers virtuel
#[derive(Debug, Clone, Deserialize)]
pub struct Paths {
    /// Racine de la collection FLAC existante
    pub source: PathBuf,
    /// Racine sous laquelle sont créés `Music/`, `.cache/` et `.metadata/`
    pub destination: PathBuf,
}

/// Section `faketunes` : comportement général du service
#[derive(Debug, Clone, Deserialize)]
pub struct FakeTunes {
    /// Budget du cache de transcodage, en MiB
    pub cache_size: u64,
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Section `transcoding`
#[derive(Debug, Clone, Deserialize)]
pub struct Transcoding {
    /// Nombre maximal de transcodages simultanés
    pub parallel: usize,
}

/// Configuration complète du service
///
/// # Exemple
///
/// ```
/// use ftconfig::Config;
///
/// let yaml = r#"
/// paths:
///   source: /music/flac
///   destination: /music/fake
/// faketunes:
///   cache_size: 512
///   log_level: debug
/// transcoding:
///   parallel: 4
/// "#;
/// let config = Config::from_yaml(yaml).unwrap();
/// assert_eq!(config.transcoding.parallel, 4);
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub paths: Paths,
    pub faketunes: FakeTunes,
    pub transcoding: Transcoding,
}

impl Config {
    /// Chemin effectif du fichier de configuration
    ///
    /// `FAKETUNES_CONFIG` s'il est défini, sinon `/etc/faketunes.yaml`.
    pub fn config_path() -> PathBuf {
        match env::var(ENV_CONFIG_PATH) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }

    /// Charge la configuration depuis le chemin effectif
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(&Self::config_path())
    }

    /// Charge et valide la configuration depuis un chemin explicite
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        config.validate()?;

        Ok(config)
    }

    /// Désérialise une configuration depuis une chaîne YAML (sans validation
    /// des chemins, pour les tests et les exemples)
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.paths.source.is_absolute() {
            return Err(ConfigError::SourceNotAbsolute(self.paths.source.clone()));
        }
        if !self.paths.destination.is_absolute() {
            return Err(ConfigError::DestinationNotAbsolute(
                self.paths.destination.clone(),
            ));
        }
        if self.transcoding.parallel == 0 {
            return Err(ConfigError::InvalidParallelism);
        }

        Ok(())
    }

    /// Racine visible de l'arborescence virtuelle
    pub fn music_dir(&self) -> PathBuf {
        self.paths.destination.join("Music")
    }

    /// Répertoire des artefacts transcodés
    pub fn cache_dir(&self) -> PathBuf {
        self.paths.destination.join(".cache")
    }

    /// Répertoire accessible en écriture pour les métadonnées du client
    pub fn metadata_dir(&self) -> PathBuf {
        self.paths.destination.join(".metadata")
    }

    /// Budget du cache en octets (`cache_size` est exprimé en MiB)
    pub fn cache_budget_bytes(&self) -> u64 {
        self.faketunes.cache_size * 1024 * 1024
    }
}
