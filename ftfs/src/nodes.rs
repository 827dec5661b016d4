//! Table d'inodes et synthèse des attributs
//!
//! Chaque nœud FUSE porte un numéro d'inode unique au processus, tiré d'un
//! compteur monotone démarrant au-dessus de la plage réservée. L'identité des
//! inodes ne survit pas aux redémarrages : les clients re-résolvent par nom.

use fuser::{FileAttr, FileType, FUSE_ROOT_ID};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

/// Premier inode alloué dynamiquement (en dessous : inodes réservés)
pub(crate) const FIRST_DYNAMIC_INODE: u64 = 1000;

/// Taille de bloc rapportée par les attributs
pub(crate) const BLOCK_SIZE: u64 = 512;

/// Nœud de l'arborescence virtuelle
#[derive(Debug, Clone)]
pub(crate) enum Node {
    /// Racine de l'arbre visible, adossée au répertoire source
    Root,
    /// Sous-répertoire réel de la collection
    Dir { path: PathBuf },
    /// Piste virtuelle `.m4a` adossée à une source FLAC
    Track { source_path: PathBuf },
    /// Fichier réel non audio, servi en lecture seule
    Passthrough { path: PathBuf },
    /// Fichier du canal de métadonnées, accessible en écriture
    Metadata { path: PathBuf },
}

/// Table inode → nœud
#[derive(Debug)]
pub(crate) struct NodeTable {
    nodes: Mutex<HashMap<u64, Node>>,
    counter: AtomicU64,
}

impl NodeTable {
    pub(crate) fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(FUSE_ROOT_ID, Node::Root);

        Self {
            nodes: Mutex::new(nodes),
            counter: AtomicU64::new(FIRST_DYNAMIC_INODE),
        }
    }

    /// Alloue un numéro d'inode frais sans l'enregistrer (listings)
    pub(crate) fn next_inode(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Enregistre un nœud sous un inode frais
    pub(crate) fn register(&self, node: Node) -> u64 {
        let ino = self.next_inode();
        self.nodes.lock().unwrap().insert(ino, node);
        ino
    }

    pub(crate) fn get(&self, ino: u64) -> Option<Node> {
        self.nodes.lock().unwrap().get(&ino).cloned()
    }

    /// Oubli d'un inode par le noyau ; la racine reste en place
    pub(crate) fn forget(&self, ino: u64) {
        if ino != FUSE_ROOT_ID {
            self.nodes.lock().unwrap().remove(&ino);
        }
    }
}

pub(crate) fn blocks_for(size: u64) -> u64 {
    (size + BLOCK_SIZE - 1) / BLOCK_SIZE
}

/// Gabarit d'attributs : l'appelant ajuste taille, mode et horodatages
pub(crate) fn file_attr(
    ino: u64,
    size: u64,
    kind: FileType,
    perm: u16,
    nlink: u32,
    mtime: SystemTime,
    uid: u32,
    gid: u32,
) -> FileAttr {
    FileAttr {
        ino,
        size,
        blocks: blocks_for(size).max(1),
        atime: mtime,
        mtime,
        ctime: mtime,
        crtime: mtime,
        kind,
        perm,
        nlink,
        uid,
        gid,
        rdev: 0,
        blksize: BLOCK_SIZE as u32,
        flags: 0,
    }
}
