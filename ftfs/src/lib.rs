//! # ftfs - Façade filesystem de FakeTunes
//!
//! Cette crate expose la collection FLAC comme une arborescence virtuelle de
//! fichiers `.m4a` via FUSE. Les listings réécrivent les extensions à la
//! volée, les attributs des pistes sont synthétisés à partir des estimations
//! du cache, et le contenu n'est matérialisé qu'à l'ouverture. Les fichiers
//! d'index du client musical (bases iTunes, pochettes, etc.) sont déroutés
//! vers un répertoire latéral accessible en écriture.
//!
//! ## Vue d'ensemble
//!
//! ```text
//! ftfs
//!     ├── classify.rs - Classement des noms (métadonnées, pistes, réécritures)
//!     ├── nodes.rs    - Table d'inodes et synthèse des attributs
//!     ├── handles.rs  - Descripteurs ouverts (seek+read sous mutex)
//!     ├── facade.rs   - Implémentation fuser::Filesystem
//!     └── mount.rs    - Préparation des répertoires, montage, démontage
//! ```
//!
//! L'arborescence est en lecture seule pour le contenu audio ; seuls les
//! noms classés « métadonnées » acceptent créations, écritures et
//! suppressions.

pub mod classify;
pub mod facade;
pub mod handles;
pub mod mount;
pub mod nodes;

pub use classify::{flac_to_m4a, is_metadata_name, m4a_to_flac};
pub use facade::{MusicFs, Resolution};
pub use mount::{mount, prepare_directories, FsError};
