//! Descripteurs de fichiers ouverts
//!
//! Chaque handle possède son descripteur en propre. Les lectures et écritures
//! utilisent une paire seek+IO sérialisée par un mutex par handle : deux
//! requêtes du noyau sur le même handle ne peuvent pas entrelacer leur
//! position de fichier.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub(crate) struct OpenFile {
    file: Mutex<File>,
    writable: bool,
}

impl OpenFile {
    pub(crate) fn writable(&self) -> bool {
        self.writable
    }

    pub(crate) fn read_at(&self, offset: u64, size: u32) -> std::io::Result<Vec<u8>> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;

        let mut buf = vec![0u8; size as usize];
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        buf.truncate(filled);

        Ok(buf)
    }

    pub(crate) fn write_at(&self, offset: u64, data: &[u8]) -> std::io::Result<u32> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        Ok(data.len() as u32)
    }

    pub(crate) fn sync(&self) -> std::io::Result<()> {
        self.file.lock().unwrap().sync_all()
    }
}

/// Table des handles ouverts, partagée par toutes les requêtes
#[derive(Debug)]
pub(crate) struct OpenHandles {
    next: AtomicU64,
    table: Mutex<HashMap<u64, Arc<OpenFile>>>,
}

impl OpenHandles {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            table: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, file: File, writable: bool) -> u64 {
        let fh = self.next.fetch_add(1, Ordering::Relaxed);
        self.table.lock().unwrap().insert(
            fh,
            Arc::new(OpenFile {
                file: Mutex::new(file),
                writable,
            }),
        );
        fh
    }

    pub(crate) fn get(&self, fh: u64) -> Option<Arc<OpenFile>> {
        self.table.lock().unwrap().get(&fh).cloned()
    }

    pub(crate) fn remove(&self, fh: u64) -> Option<Arc<OpenFile>> {
        self.table.lock().unwrap().remove(&fh)
    }
}
