//! Métadonnées dérivées pour l'encodeur
//!
//! Deux petites briques : l'échappement des valeurs passées à `-metadata`, et
//! la dérivation du champ `sort_artist` à partir du chemin de la source sous
//! la racine de la collection (`<racine>/Artiste/Album/piste.flac`).

use std::path::{Component, Path};

/// Échappe une valeur de métadonnée pour la ligne de commande ffmpeg
///
/// Antislash, guillemets simples et doubles, point-virgule et signe égal ont
/// tous un sens pour le parseur de métadonnées de ffmpeg.
pub fn escape_metadata(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' | '"' | '\'' | ';' | '=' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Dérive l'artiste de tri du premier composant du chemin relatif
///
/// Une piste rangée directement à la racine (sans répertoire d'artiste)
/// retombe sur `"Unknown Artist"`.
pub fn sort_artist_for(source_root: &Path, source: &Path) -> String {
    let Ok(relative) = source.strip_prefix(source_root) else {
        return "Unknown Artist".to_string();
    };

    let mut components = relative.components().filter_map(|c| match c {
        Component::Normal(part) => Some(part),
        _ => None,
    });

    match (components.next(), components.next()) {
        // Il faut au moins un répertoire d'artiste au-dessus du fichier
        (Some(artist), Some(_)) => {
            let artist = artist.to_string_lossy();
            let artist = artist.trim();
            if artist.is_empty() {
                "Unknown Artist".to_string()
            } else {
                artist.to_string()
            }
        }
        _ => "Unknown Artist".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_escape_metadata() {
        assert_eq!(escape_metadata("AC/DC"), "AC/DC");
        assert_eq!(escape_metadata(r#"a"b"#), r#"a\"b"#);
        assert_eq!(escape_metadata(r"a\b"), r"a\\b");
        assert_eq!(escape_metadata("key=value;rest"), r"key\=value\;rest");
        assert_eq!(escape_metadata("l'artiste"), r"l\'artiste");
    }

    #[test]
    fn test_sort_artist_from_first_component() {
        let artist = sort_artist_for(
            Path::new("/music"),
            Path::new("/music/Pink Floyd/The Wall/01.flac"),
        );
        assert_eq!(artist, "Pink Floyd");
    }

    #[test]
    fn test_sort_artist_trims_whitespace() {
        let artist = sort_artist_for(
            Path::new("/music"),
            Path::new("/music/ Pink Floyd /Album/01.flac"),
        );
        assert_eq!(artist, "Pink Floyd");
    }

    #[test]
    fn test_track_at_root_is_unknown() {
        let artist = sort_artist_for(Path::new("/music"), Path::new("/music/01.flac"));
        assert_eq!(artist, "Unknown Artist");
    }

    #[test]
    fn test_outside_root_is_unknown() {
        let artist = sort_artist_for(Path::new("/music"), Path::new("/elsewhere/a/b.flac"));
        assert_eq!(artist, "Unknown Artist");
    }
}
