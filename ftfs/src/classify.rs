//! Classement des noms de l'arborescence virtuelle
//!
//! Un nom de « métadonnées » appartient au client musical et est dérouté vers
//! le répertoire latéral `.metadata` : fichiers cachés, pochettes, index
//! iTunes. Tout le reste est servi depuis la collection source, avec les
//! pistes FLAC présentées sous une extension `.m4a`.

/// Vrai si le nom appartient au canal de métadonnées du client musical
///
/// La comparaison est insensible à la casse : préfixe `.`, sous-chaînes
/// `albumart` / `folder` / `itunes`, suffixes `.itl` / `.xml` / `.db`.
pub fn is_metadata_name(name: &str) -> bool {
    let name = name.to_lowercase();

    name.starts_with('.')
        || name.contains("albumart")
        || name.contains("folder")
        || name.contains("itunes")
        || name.ends_with(".itl")
        || name.ends_with(".xml")
        || name.ends_with(".db")
}

/// Réécrit un nom de piste `.flac` en `.m4a` pour les listings
///
/// Retourne `None` pour tout nom qui n'est pas une piste FLAC.
pub fn flac_to_m4a(name: &str) -> Option<String> {
    if name.to_lowercase().ends_with(".flac") {
        Some(format!("{}.m4a", &name[..name.len() - 5]))
    } else {
        None
    }
}

/// Retrouve le nom de la source FLAC derrière un nom virtuel `.m4a`
pub fn m4a_to_flac(name: &str) -> Option<String> {
    if name.to_lowercase().ends_with(".m4a") {
        Some(format!("{}.flac", &name[..name.len() - 4]))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_names() {
        assert!(is_metadata_name(".DS_Store"));
        assert!(is_metadata_name(".itunes.db"));
        assert!(is_metadata_name("iTunes Library.itl"));
        assert!(is_metadata_name("AlbumArt_small.jpg"));
        assert!(is_metadata_name("Folder.jpg"));
        assert!(is_metadata_name("library.xml"));
        assert!(is_metadata_name("Thumbs.db"));
    }

    #[test]
    fn test_regular_names() {
        assert!(!is_metadata_name("01 - Intro.flac"));
        assert!(!is_metadata_name("cover.jpg"));
        assert!(!is_metadata_name("Pink Floyd"));
        assert!(!is_metadata_name("notes.txt"));
    }

    #[test]
    fn test_flac_rename() {
        assert_eq!(flac_to_m4a("01 - Intro.flac").unwrap(), "01 - Intro.m4a");
        assert_eq!(flac_to_m4a("loud.FLAC").unwrap(), "loud.m4a");
        assert!(flac_to_m4a("cover.jpg").is_none());
        assert!(flac_to_m4a("flac").is_none());
    }

    #[test]
    fn test_m4a_to_flac() {
        assert_eq!(m4a_to_flac("01 - Intro.m4a").unwrap(), "01 - Intro.flac");
        assert_eq!(m4a_to_flac("LOUD.M4A").unwrap(), "LOUD.flac");
        assert!(m4a_to_flac("01.flac").is_none());
    }

    #[test]
    fn test_rename_round_trip() {
        let virtual_name = flac_to_m4a("Shine On.flac").unwrap();
        assert_eq!(m4a_to_flac(&virtual_name).unwrap(), "Shine On.flac");
    }

    #[test]
    fn test_multibyte_names() {
        assert_eq!(flac_to_m4a("Ólafur – Ágúst.flac").unwrap(), "Ólafur – Ágúst.m4a");
    }
}
