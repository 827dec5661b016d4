//! Recherche de la pochette d'album
//!
//! Les clients musicaux déposent la pochette sous des noms variés à côté des
//! pistes. La liste ci-dessous est parcourue dans l'ordre de préférence et le
//! premier fichier existant est retenu.

use std::path::{Path, PathBuf};

/// Noms de fichiers de pochette reconnus, par ordre de préférence
const ART_CANDIDATES: [&str; 19] = [
    "albumart.jpg",
    "AlbumArt.jpg",
    "cover.jpg",
    "Cover.jpg",
    "folder.jpg",
    "Folder.jpg",
    "albumart.jpeg",
    "cover.jpeg",
    "folder.jpeg",
    "albumart.png",
    "cover.png",
    "folder.png",
    "albumart.gif",
    "cover.gif",
    ".albumart.jpg",
    ".cover.jpg",
    "AlbumArtwork.jpg",
    "album.jpg",
    "Album.jpg",
];

/// Retourne la première pochette trouvée dans `album_dir`, s'il y en a une
pub fn find_album_art(album_dir: &Path) -> Option<PathBuf> {
    ART_CANDIDATES
        .iter()
        .map(|name| album_dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("folder.jpg"), b"jpg").unwrap();
        std::fs::write(dir.path().join("cover.jpg"), b"jpg").unwrap();

        // cover.jpg précède folder.jpg dans la liste
        let art = find_album_art(dir.path()).unwrap();
        assert_eq!(art.file_name().unwrap(), "cover.jpg");
    }

    #[test]
    fn test_dot_prefixed_candidate() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".cover.jpg"), b"jpg").unwrap();

        let art = find_album_art(dir.path()).unwrap();
        assert_eq!(art.file_name().unwrap(), ".cover.jpg");
    }

    #[test]
    fn test_no_art() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        assert!(find_album_art(dir.path()).is_none());
    }
}
