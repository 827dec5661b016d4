//! Implémentation FUSE de l'arborescence virtuelle
//!
//! Les callbacks FUSE sont synchrones ; la façade détient un handle du
//! runtime tokio et y bascule (`block_on`) pour interroger le cache. La
//! session FUSE tourne sur son propre thread, jamais sur un worker du
//! runtime, ce qui rend ce pont sans danger.
//!
//! Chaque opération consulte le stockage et le cache indépendamment : aucun
//! état n'est porté d'une requête à l'autre en dehors des tables d'inodes et
//! de handles.

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, ReplyXattr, Request, TimeOrNow, FUSE_ROOT_ID,
};
use std::ffi::OsStr;
use std::fs::File;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::classify::{flac_to_m4a, is_metadata_name, m4a_to_flac};
use crate::handles::OpenHandles;
use crate::nodes::{file_attr, Node, NodeTable};
use ftcache::Cache;
use ftconfig::Config;

/// Durée de validité des attributs côté noyau
const TTL: Duration = Duration::from_secs(1);

/// Attributs étendus Apple auxquels une réponse vide est servie
const APPLE_XATTRS: [&str; 3] = [
    "com.apple.FinderInfo",
    "com.apple.ResourceFork",
    "user.org.netatalk.Metadata",
];

/// Résultat du classement d'un nom dans un répertoire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Fichier du canal de métadonnées, adossé au répertoire latéral
    Metadata { backing: PathBuf },
    /// Piste virtuelle `.m4a` adossée à une source FLAC existante
    Track { source: PathBuf },
    /// Sous-répertoire réel de la collection
    Directory { path: PathBuf },
    /// Fichier réel non audio, servi tel quel en lecture seule
    Passthrough { path: PathBuf },
}

/// Entrée produite par un listing de répertoire
#[derive(Debug, Clone)]
pub struct ListedEntry {
    pub name: String,
    pub kind: FileType,
    /// Numéro d'inode consultatif ; `lookup` en attribuera un autre
    pub ino: u64,
}

/// Façade filesystem : collection FLAC présentée comme un arbre ALAC
pub struct MusicFs {
    source_dir: PathBuf,
    metadata_dir: PathBuf,
    cache: Arc<Cache>,
    runtime: Handle,
    shutdown: CancellationToken,
    nodes: NodeTable,
    handles: OpenHandles,
}

impl MusicFs {
    pub fn new(
        config: &Config,
        cache: Arc<Cache>,
        runtime: Handle,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source_dir: config.paths.source.clone(),
            metadata_dir: config.metadata_dir(),
            cache,
            runtime,
            shutdown,
            nodes: NodeTable::new(),
            handles: OpenHandles::new(),
        }
    }

    /// Chemin du fichier latéral pour un nom de métadonnées
    pub fn metadata_backing(&self, name: &str) -> PathBuf {
        self.metadata_dir.join(name)
    }

    /// Classe un nom relatif à un répertoire adossé de l'arborescence
    ///
    /// L'ordre est celui du protocole : canal de métadonnées d'abord, piste
    /// virtuelle ensuite, puis répertoire ou fichier réel.
    pub fn resolve_name(&self, dir_path: &Path, name: &str) -> Option<Resolution> {
        if is_metadata_name(name) {
            return Some(Resolution::Metadata {
                backing: self.metadata_backing(name),
            });
        }

        if let Some(flac_name) = m4a_to_flac(name) {
            let source = dir_path.join(flac_name);
            if source.is_file() {
                return Some(Resolution::Track { source });
            }
        }

        let real = dir_path.join(name);
        match std::fs::metadata(&real) {
            Ok(meta) if meta.is_dir() => Some(Resolution::Directory { path: real }),
            Ok(meta) if meta.is_file() => Some(Resolution::Passthrough { path: real }),
            _ => None,
        }
    }

    /// Liste un répertoire adossé, extensions réécrites
    ///
    /// Les pistes `.flac` apparaissent en `.m4a`, les répertoires sont
    /// préservés, les fichiers cachés hors canal de métadonnées sont omis.
    pub fn list_directory(&self, dir_path: &Path) -> Vec<ListedEntry> {
        let mut listed = Vec::new();

        let entries = match std::fs::read_dir(dir_path) {
            Ok(entries) => entries,
            Err(err) => {
                error!(path = %dir_path.display(), error = %err, "Error reading directory");
                return listed;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();

            if name.starts_with('.') && !is_metadata_name(&name) {
                continue;
            }

            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let (kind, shown) = if is_dir {
                (FileType::Directory, name)
            } else if let Some(virtual_name) = flac_to_m4a(&name) {
                (FileType::RegularFile, virtual_name)
            } else {
                (FileType::RegularFile, name)
            };

            listed.push(ListedEntry {
                name: shown,
                kind,
                ino: self.nodes.next_inode(),
            });
        }

        listed
    }

    /// Liste le canal de métadonnées, fusionné dans le listing de la racine
    ///
    /// Le client musical doit revoir les index qu'il vient d'écrire.
    pub fn list_metadata_entries(&self) -> Vec<ListedEntry> {
        let mut listed = Vec::new();

        let Ok(entries) = std::fs::read_dir(&self.metadata_dir) else {
            return listed;
        };

        for entry in entries.flatten() {
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                listed.push(ListedEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    kind: FileType::RegularFile,
                    ino: self.nodes.next_inode(),
                });
            }
        }

        listed
    }

    /// Crée le fichier latéral d'un nom de métadonnées, ouvert lecture+écriture
    pub fn create_metadata_file(&self, name: &str) -> std::io::Result<(PathBuf, File)> {
        let backing = self.metadata_backing(name);
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&backing)?;

        Ok((backing, file))
    }

    fn backing_dir(&self, node: &Node) -> Option<PathBuf> {
        match node {
            Node::Root => Some(self.source_dir.clone()),
            Node::Dir { path } => Some(path.clone()),
            _ => None,
        }
    }

    /// nlink d'un répertoire : 2 plus un lien par sous-répertoire
    fn dir_nlink(&self, path: &Path) -> u32 {
        let mut nlink = 2;
        if let Ok(entries) = std::fs::read_dir(path) {
            for entry in entries.flatten() {
                if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    nlink += 1;
                }
            }
        }
        nlink
    }

    fn dir_attr(&self, ino: u64, path: &Path, uid: u32, gid: u32) -> FileAttr {
        let mtime = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .unwrap_or_else(|_| SystemTime::now());

        file_attr(
            ino,
            4096,
            FileType::Directory,
            0o755,
            self.dir_nlink(path),
            mtime,
            uid,
            gid,
        )
    }

    fn track_attr(&self, ino: u64, source_path: &Path, uid: u32, gid: u32) -> FileAttr {
        let size = self.runtime.block_on(self.cache.stat_size(source_path));

        file_attr(
            ino,
            size,
            FileType::RegularFile,
            0o444,
            1,
            SystemTime::now(),
            uid,
            gid,
        )
    }

    fn passthrough_attr(&self, ino: u64, path: &Path, uid: u32, gid: u32) -> FileAttr {
        let (size, mtime) = match std::fs::metadata(path) {
            Ok(meta) => (
                meta.len(),
                meta.modified().unwrap_or_else(|_| SystemTime::now()),
            ),
            Err(_) => (0, SystemTime::now()),
        };

        file_attr(ino, size, FileType::RegularFile, 0o444, 1, mtime, uid, gid)
    }

    fn metadata_attr(&self, ino: u64, backing: &Path, uid: u32, gid: u32) -> FileAttr {
        let (size, mtime) = match std::fs::metadata(backing) {
            Ok(meta) => (
                meta.len(),
                meta.modified().unwrap_or_else(|_| SystemTime::now()),
            ),
            Err(_) => (0, SystemTime::now()),
        };

        file_attr(ino, size, FileType::RegularFile, 0o644, 1, mtime, uid, gid)
    }

    fn attr_for(&self, ino: u64, node: &Node, uid: u32, gid: u32) -> FileAttr {
        match node {
            Node::Root => self.dir_attr(ino, &self.source_dir, uid, gid),
            Node::Dir { path } => self.dir_attr(ino, path, uid, gid),
            Node::Track { source_path } => self.track_attr(ino, source_path, uid, gid),
            Node::Passthrough { path } => self.passthrough_attr(ino, path, uid, gid),
            Node::Metadata { path } => self.metadata_attr(ino, path, uid, gid),
        }
    }

    /// Matérialise la piste et ouvre son artefact
    ///
    /// Si l'artefact est évincé entre la réponse du cache et l'ouverture,
    /// une seconde passe de `get_artifact` le reconstruit.
    fn open_track(&self, source_path: &Path) -> Result<File, libc::c_int> {
        let item = self
            .runtime
            .block_on(self.cache.get_artifact(source_path))
            .map_err(|err| {
                error!(
                    source = %source_path.display(),
                    error = %err,
                    "Failed to convert file to cache"
                );
                libc::EIO
            })?;

        debug!(path = %item.path.display(), "Opening cached file");

        match File::open(&item.path) {
            Ok(file) => Ok(file),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    path = %item.path.display(),
                    "Artifact vanished before open, rebuilding it"
                );

                let item = self
                    .runtime
                    .block_on(self.cache.get_artifact(source_path))
                    .map_err(|_| libc::EIO)?;

                File::open(&item.path).map_err(|err| {
                    error!(path = %item.path.display(), error = %err, "Failed to open artifact");
                    libc::EIO
                })
            }
            Err(err) => {
                error!(path = %item.path.display(), error = %err, "Failed to open artifact");
                Err(libc::EIO)
            }
        }
    }

    /// Ouvre un fichier du canal de métadonnées avec les flags du client
    fn open_metadata(&self, backing: &Path, flags: i32) -> std::io::Result<(File, bool)> {
        let access = flags & libc::O_ACCMODE;
        let write = access == libc::O_WRONLY || access == libc::O_RDWR;

        let mut options = std::fs::OpenOptions::new();
        options.read(access == libc::O_RDONLY || access == libc::O_RDWR);

        if write {
            if flags & libc::O_APPEND != 0 {
                options.append(true);
            } else {
                options.write(true);
            }
            if flags & libc::O_TRUNC != 0 {
                options.truncate(true);
            }
            options.create(true);
            options.mode(0o644);
        } else if !backing.exists() {
            // Lecture d'un fichier jamais écrit : le matérialiser vide
            std::fs::write(backing, b"")?;
        }

        let file = options.open(backing)?;

        Ok((file, write))
    }
}

fn wants_write(flags: i32) -> bool {
    (flags & libc::O_ACCMODE) != libc::O_RDONLY
}

impl Filesystem for MusicFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        debug!(source = %self.source_dir.display(), "Filesystem initialized");
        Ok(())
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_node) = self.nodes.get(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(dir_path) = self.backing_dir(&parent_node) else {
            reply.error(libc::ENOTDIR);
            return;
        };

        let name = name.to_string_lossy();

        match self.resolve_name(&dir_path, &name) {
            Some(Resolution::Metadata { backing }) => {
                let ino = self.nodes.register(Node::Metadata {
                    path: backing.clone(),
                });
                let attr = self.metadata_attr(ino, &backing, req.uid(), req.gid());
                reply.entry(&TTL, &attr, 0);
            }
            Some(Resolution::Track { source }) => {
                let ino = self.nodes.register(Node::Track {
                    source_path: source.clone(),
                });
                let attr = self.track_attr(ino, &source, req.uid(), req.gid());
                reply.entry(&TTL, &attr, 0);
            }
            Some(Resolution::Directory { path }) => {
                let ino = self.nodes.register(Node::Dir { path: path.clone() });
                let attr = self.dir_attr(ino, &path, req.uid(), req.gid());
                reply.entry(&TTL, &attr, 0);
            }
            Some(Resolution::Passthrough { path }) => {
                let ino = self.nodes.register(Node::Passthrough { path: path.clone() });
                let attr = self.passthrough_attr(ino, &path, req.uid(), req.gid());
                reply.entry(&TTL, &attr, 0);
            }
            None => reply.error(libc::ENOENT),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, _nlookup: u64) {
        self.nodes.forget(ino);
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let Some(node) = self.nodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        let attr = self.attr_for(ino, &node, req.uid(), req.gid());
        reply.attr(&TTL, &attr);
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(node) = self.nodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        match node {
            // Les écritures du client passent par les flags d'ouverture ;
            // les changements d'attributs eux-mêmes sont sans effet.
            Node::Metadata { path } => {
                let attr = self.metadata_attr(ino, &path, req.uid(), req.gid());
                reply.attr(&TTL, &attr);
            }
            _ => reply.error(libc::EPERM),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(node) = self.nodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(dir_path) = self.backing_dir(&node) else {
            reply.error(libc::ENOTDIR);
            return;
        };

        debug!(path = %dir_path.display(), "Readdir called on directory");

        let mut entries: Vec<ListedEntry> = vec![
            ListedEntry {
                name: ".".to_string(),
                kind: FileType::Directory,
                ino,
            },
            ListedEntry {
                name: "..".to_string(),
                kind: FileType::Directory,
                ino: FUSE_ROOT_ID,
            },
        ];

        entries.extend(self.list_directory(&dir_path));

        // À la racine, le canal de métadonnées est fusionné : le client doit
        // revoir les index qu'il vient d'écrire.
        if matches!(node, Node::Root) {
            for meta_entry in self.list_metadata_entries() {
                if !entries.iter().any(|e| e.name == meta_entry.name) {
                    entries.push(meta_entry);
                }
            }
        }

        debug!(
            path = %dir_path.display(),
            entries = entries.len(),
            "Returning directory entries"
        );

        for (index, entry) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(entry.ino, (index + 1) as i64, entry.kind, &entry.name) {
                break;
            }
        }

        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        if self.shutdown.is_cancelled() {
            reply.error(libc::EIO);
            return;
        }

        let Some(node) = self.nodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        match node {
            Node::Track { source_path } => {
                if wants_write(flags) {
                    reply.error(libc::EACCES);
                    return;
                }

                match self.open_track(&source_path) {
                    Ok(file) => {
                        let fh = self.handles.insert(file, false);
                        reply.opened(fh, fuser::consts::FOPEN_KEEP_CACHE);
                    }
                    Err(errno) => reply.error(errno),
                }
            }
            Node::Passthrough { path } => {
                if wants_write(flags) {
                    reply.error(libc::EACCES);
                    return;
                }

                match File::open(&path) {
                    Ok(file) => {
                        let fh = self.handles.insert(file, false);
                        reply.opened(fh, fuser::consts::FOPEN_KEEP_CACHE);
                    }
                    Err(err) => {
                        error!(path = %path.display(), error = %err, "Failed to open file");
                        reply.error(libc::EIO);
                    }
                }
            }
            Node::Metadata { path } => match self.open_metadata(&path, flags) {
                Ok((file, writable)) => {
                    let fh = self.handles.insert(file, writable);
                    reply.opened(fh, fuser::consts::FOPEN_DIRECT_IO);
                }
                Err(err) => {
                    error!(path = %path.display(), error = %err, "Failed to open metadata file");
                    reply.error(libc::EIO);
                }
            },
            Node::Root | Node::Dir { .. } => reply.error(libc::EISDIR),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(handle) = self.handles.get(fh) else {
            reply.error(libc::EBADF);
            return;
        };

        match handle.read_at(offset.max(0) as u64, size) {
            Ok(data) => reply.data(&data),
            Err(err) => {
                error!(fh, error = %err, "Read failed");
                reply.error(libc::EIO);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(handle) = self.handles.get(fh) else {
            reply.error(libc::EBADF);
            return;
        };
        if !handle.writable() {
            reply.error(libc::EBADF);
            return;
        }

        match handle.write_at(offset.max(0) as u64, data) {
            Ok(written) => reply.written(written),
            Err(err) => {
                error!(fh, error = %err, "Write failed");
                reply.error(libc::EIO);
            }
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let Some(handle) = self.handles.get(fh) else {
            reply.error(libc::EBADF);
            return;
        };

        match handle.sync() {
            Ok(()) => reply.ok(),
            Err(_) => reply.error(libc::EIO),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.handles.remove(fh);
        reply.ok();
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(parent_node) = self.nodes.get(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        if self.backing_dir(&parent_node).is_none() {
            reply.error(libc::ENOTDIR);
            return;
        }

        let name = name.to_string_lossy();
        if !is_metadata_name(&name) {
            // Seul le canal de métadonnées accepte des créations
            reply.error(libc::EPERM);
            return;
        }

        match self.create_metadata_file(&name) {
            Ok((backing, file)) => {
                let fh = self.handles.insert(file, true);
                let ino = self.nodes.register(Node::Metadata { path: backing });
                let attr = file_attr(
                    ino,
                    0,
                    FileType::RegularFile,
                    0o644,
                    1,
                    SystemTime::now(),
                    req.uid(),
                    req.gid(),
                );

                reply.created(&TTL, &attr, 0, fh, fuser::consts::FOPEN_DIRECT_IO);
            }
            Err(err) => {
                error!(name = %name, error = %err, "Failed to create metadata file");
                reply.error(libc::EIO);
            }
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_node) = self.nodes.get(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        if self.backing_dir(&parent_node).is_none() {
            reply.error(libc::ENOTDIR);
            return;
        }

        let name = name.to_string_lossy();
        if !is_metadata_name(&name) {
            reply.error(libc::EPERM);
            return;
        }

        match std::fs::remove_file(self.metadata_backing(&name)) {
            Ok(()) => reply.ok(),
            Err(_) => reply.error(libc::ENOENT),
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        // Accepté silencieusement, jamais stocké
        reply.ok();
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        name: &OsStr,
        size: u32,
        reply: ReplyXattr,
    ) {
        let name = name.to_string_lossy();
        if APPLE_XATTRS.iter().any(|known| *known == name) {
            if size == 0 {
                reply.size(0);
            } else {
                reply.data(&[]);
            }
        } else {
            reply.error(libc::ENODATA);
        }
    }

    fn listxattr(&mut self, _req: &Request<'_>, _ino: u64, size: u32, reply: ReplyXattr) {
        if size == 0 {
            reply.size(0);
        } else {
            reply.data(&[]);
        }
    }

    fn removexattr(&mut self, _req: &Request<'_>, _ino: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.ok();
    }
}
