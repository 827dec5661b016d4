//! Indices de taille pour les requêtes stat
//!
//! `getattr` et `readdir` doivent répondre vite et sans jamais déclencher de
//! transcodage. Ce module mémorise la dernière taille d'artefact confirmée
//! par chemin source. La carte est bornée : au-delà de la capacité, l'indice
//! le plus ancien est abandonné, et l'éviction d'un artefact retire l'indice
//! correspondant.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Capacité par défaut de la carte d'indices
pub(crate) const DEFAULT_HINT_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
struct StatHint {
    size: u64,
    created: DateTime<Utc>,
}

/// Carte bornée chemin source → taille d'artefact connue
#[derive(Debug)]
pub(crate) struct StatHints {
    map: HashMap<PathBuf, StatHint>,
    capacity: usize,
}

impl StatHints {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            capacity,
        }
    }

    pub(crate) fn get(&self, source_path: &Path) -> Option<u64> {
        self.map.get(source_path).map(|hint| hint.size)
    }

    /// Enregistre une taille confirmée, en libérant une place si nécessaire
    pub(crate) fn record(&mut self, source_path: &Path, size: u64) {
        if !self.map.contains_key(source_path) && self.map.len() >= self.capacity {
            let oldest = self
                .map
                .iter()
                .min_by_key(|(_, hint)| hint.created)
                .map(|(path, _)| path.clone());
            if let Some(path) = oldest {
                self.map.remove(&path);
            }
        }

        self.map.insert(
            source_path.to_path_buf(),
            StatHint {
                size,
                created: Utc::now(),
            },
        );
    }

    pub(crate) fn forget(&mut self, source_path: &Path) {
        self.map.remove(source_path);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_get() {
        let mut hints = StatHints::new(8);
        hints.record(Path::new("/m/a.flac"), 1000);

        assert_eq!(hints.get(Path::new("/m/a.flac")), Some(1000));
        assert_eq!(hints.get(Path::new("/m/b.flac")), None);
    }

    #[test]
    fn test_record_overwrites() {
        let mut hints = StatHints::new(8);
        hints.record(Path::new("/m/a.flac"), 1000);
        hints.record(Path::new("/m/a.flac"), 2000);

        assert_eq!(hints.get(Path::new("/m/a.flac")), Some(2000));
        assert_eq!(hints.len(), 1);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut hints = StatHints::new(2);
        hints.record(Path::new("/m/a.flac"), 1);
        hints.record(Path::new("/m/b.flac"), 2);
        hints.record(Path::new("/m/c.flac"), 3);

        assert_eq!(hints.len(), 2);
        // a est l'indice le plus ancien
        assert_eq!(hints.get(Path::new("/m/a.flac")), None);
        assert_eq!(hints.get(Path::new("/m/b.flac")), Some(2));
        assert_eq!(hints.get(Path::new("/m/c.flac")), Some(3));
    }

    #[test]
    fn test_forget() {
        let mut hints = StatHints::new(8);
        hints.record(Path::new("/m/a.flac"), 1000);
        hints.forget(Path::new("/m/a.flac"));

        assert_eq!(hints.get(Path::new("/m/a.flac")), None);
    }
}
