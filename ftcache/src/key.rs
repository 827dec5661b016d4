//! Empreinte des artefacts
//!
//! La clé de cache est le md5 hexadécimal de `"<chemin source>:<mtime en
//! nanosecondes>"`. Inclure le mtime dans la clé invalide naturellement les
//! artefacts quand la source est modifiée : aucun mécanisme d'invalidation
//! explicite n'est nécessaire, la prochaine lecture calcule une clé neuve.

use md5::{Digest, Md5};
use std::fs::Metadata;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Calcule la clé de cache d'une source
pub fn cache_key(source_path: &Path, mtime_ns: u128) -> String {
    let key_data = format!("{}:{}", source_path.display(), mtime_ns);

    let mut hasher = Md5::new();
    hasher.update(key_data.as_bytes());

    format!("{:x}", hasher.finalize())
}

/// Nom du fichier d'artefact pour une clé
pub fn artifact_name(key: &str) -> String {
    format!("{key}.m4a")
}

/// Mtime en nanosecondes depuis l'epoch Unix
///
/// Un mtime antérieur à l'epoch (horloge fantaisiste) est ramené à zéro ;
/// la clé reste stable tant que le fichier ne change pas.
pub fn mtime_ns(meta: &Metadata) -> u128 {
    meta.modified()
        .ok()
        .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_key_is_stable() {
        let a = cache_key(Path::new("/m/a.flac"), 123);
        let b = cache_key(Path::new("/m/a.flac"), 123);
        assert_eq!(a, b);
        // md5 hexadécimal
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_mtime_changes_the_key() {
        let a = cache_key(Path::new("/m/a.flac"), 123);
        let b = cache_key(Path::new("/m/a.flac"), 124);
        assert_ne!(a, b);
    }

    #[test]
    fn test_path_changes_the_key() {
        let a = cache_key(Path::new("/m/a.flac"), 123);
        let b = cache_key(Path::new("/m/b.flac"), 123);
        assert_ne!(a, b);
    }

    #[test]
    fn test_artifact_name() {
        assert_eq!(artifact_name("abcd"), "abcd.m4a");
    }
}
