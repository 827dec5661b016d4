//! Table autoritaire du cache et cycle de vie des artefacts
//!
//! Le chemin chaud (`stat_size`) ne touche jamais l'encodeur. Le chemin froid
//! (`get_artifact`) sérialise les constructions par clé avec un latch : le
//! premier appelant transcode, les suivants attendent le latch puis relisent
//! la table. L'éviction LRU s'exécute après chaque insertion.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::key::{artifact_name, cache_key, mtime_ns};
use crate::stats::{StatHints, DEFAULT_HINT_CAPACITY};
use crate::CacheError;
use fttranscoder::{Converter, MIN_ARTIFACT_BYTES};

/// Artefact servi par le cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem {
    pub path: PathBuf,
    pub size: u64,
    pub updated: DateTime<Utc>,
}

/// Entrée de la table autoritaire
///
/// `source_path` est conservé pour pouvoir invalider l'indice de taille
/// correspondant quand l'artefact est évincé.
#[derive(Debug, Clone)]
struct CacheEntry {
    artifact_path: PathBuf,
    source_path: PathBuf,
    size_bytes: u64,
    last_access: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total_bytes: u64,
}

/// Cache d'artefacts transcodés avec budget en octets
///
/// Conçu pour être partagé derrière un `Arc` entre la façade filesystem et
/// le shell de processus.
pub struct Cache {
    cache_dir: PathBuf,
    budget_bytes: u64,
    converter: Arc<dyn Converter>,
    state: Mutex<CacheState>,
    hints: Mutex<StatHints>,
    /// Latch de construction par clé : au plus un transcodage en vol par clé
    builds: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Cache {
    /// Crée le cache et son répertoire d'artefacts
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        budget_bytes: u64,
        converter: Arc<dyn Converter>,
    ) -> Result<Self, CacheError> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir).map_err(|source| CacheError::Prepare {
            path: cache_dir.clone(),
            source,
        })?;

        Ok(Self {
            cache_dir,
            budget_bytes,
            converter,
            state: Mutex::new(CacheState::default()),
            hints: Mutex::new(StatHints::new(DEFAULT_HINT_CAPACITY)),
            builds: AsyncMutex::new(HashMap::new()),
        })
    }

    /// Répertoire des artefacts
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Chemin d'artefact attendu pour une clé
    pub fn artifact_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(artifact_name(key))
    }

    /// Somme des tailles des entrées de la table
    pub fn total_bytes(&self) -> u64 {
        self.state.lock().unwrap().total_bytes
    }

    /// Nombre d'entrées de la table
    pub fn entry_count(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    /// Taille estimée de l'artefact, sans jamais transcoder
    ///
    /// Ordre de consultation : indice mémorisé, artefact redécouvert sur
    /// disque, taille de la source en guise d'estimation. Ne retourne jamais
    /// d'erreur : toute défaillance d'E/S dégrade vers l'estimation (zéro si
    /// la source elle-même est illisible).
    pub async fn stat_size(&self, source_path: &Path) -> u64 {
        if let Some(size) = self.hints.lock().unwrap().get(source_path) {
            return size;
        }

        let Ok(source_meta) = tokio::fs::metadata(source_path).await else {
            return 0;
        };

        let key = cache_key(source_path, mtime_ns(&source_meta));
        let artifact_path = self.artifact_path(&key);

        if let Ok(artifact_meta) = tokio::fs::metadata(&artifact_path).await {
            if is_adoptable(&artifact_meta, &source_meta) {
                self.adopt(&key, source_path, &artifact_path, artifact_meta.len());

                // L'adoption peut faire déborder le budget ; une requête stat
                // ne doit pas échouer pour autant.
                if let Err(err) = self.evict().await {
                    warn!(error = %err, "Eviction after stat adoption failed");
                }

                return artifact_meta.len();
            }
        }

        source_meta.len()
    }

    /// Retourne l'artefact de la source, en le transcodant au besoin
    ///
    /// Seul point d'entrée qui peut invoquer l'encodeur. Les appels
    /// concurrents sur une même clé partagent un unique transcodage.
    pub async fn get_artifact(&self, source_path: &Path) -> Result<CacheItem, CacheError> {
        let source_meta =
            tokio::fs::metadata(source_path)
                .await
                .map_err(|source| CacheError::Source {
                    path: source_path.to_path_buf(),
                    source,
                })?;

        let key = cache_key(source_path, mtime_ns(&source_meta));
        let artifact_path = self.artifact_path(&key);

        loop {
            if let Some(item) = self
                .lookup_ready(source_path, &source_meta, &key, &artifact_path)
                .await
            {
                debug!(key = %key, path = %item.path.display(), "Retrieved cache item");
                return Ok(item);
            }

            let latch = {
                let mut builds = self.builds.lock().await;
                builds
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                    .clone()
            };

            let guard = match latch.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    // Un transcodage est déjà en vol pour cette clé :
                    // attendre sa fin puis relire la table.
                    let _wait = latch.lock().await;
                    continue;
                }
            };

            // Revérification sous le latch : un gagnant précédent a pu
            // insérer l'entrée entre nos deux lectures.
            if let Some(item) = self
                .lookup_ready(source_path, &source_meta, &key, &artifact_path)
                .await
            {
                self.builds.lock().await.remove(&key);
                return Ok(item);
            }

            let built = self.build(source_path, &key, &artifact_path).await;
            self.builds.lock().await.remove(&key);
            drop(guard);

            return built;
        }
    }

    /// Cherche un artefact déjà utilisable : entrée de table encore présente
    /// sur disque, ou artefact orphelin adoptable (redémarrage).
    async fn lookup_ready(
        &self,
        source_path: &Path,
        source_meta: &Metadata,
        key: &str,
        artifact_path: &Path,
    ) -> Option<CacheItem> {
        let hit = {
            let state = self.state.lock().unwrap();
            state
                .entries
                .get(key)
                .map(|entry| (entry.artifact_path.clone(), entry.size_bytes))
        };

        if let Some((path, size)) = hit {
            if tokio::fs::metadata(&path).await.is_ok() {
                let now = Utc::now();
                {
                    let mut state = self.state.lock().unwrap();
                    if let Some(entry) = state.entries.get_mut(key) {
                        entry.last_access = now;
                    }
                }
                self.hints.lock().unwrap().record(source_path, size);

                return Some(CacheItem {
                    path,
                    size,
                    updated: now,
                });
            }

            // L'artefact a disparu sous nos pieds : l'entrée est périmée.
            let mut state = self.state.lock().unwrap();
            if let Some(stale) = state.entries.remove(key) {
                state.total_bytes = state.total_bytes.saturating_sub(stale.size_bytes);
            }
        }

        // Artefact présent sur disque mais inconnu de la table, typiquement
        // après un redémarrage du service.
        if let Ok(artifact_meta) = tokio::fs::metadata(artifact_path).await {
            if is_adoptable(&artifact_meta, source_meta) {
                let now = self.adopt(key, source_path, artifact_path, artifact_meta.len());

                return Some(CacheItem {
                    path: artifact_path.to_path_buf(),
                    size: artifact_meta.len(),
                    updated: now,
                });
            }
        }

        None
    }

    /// Insère un artefact redécouvert dans la table et les indices
    fn adopt(
        &self,
        key: &str,
        source_path: &Path,
        artifact_path: &Path,
        size: u64,
    ) -> DateTime<Utc> {
        let now = Utc::now();

        {
            let mut state = self.state.lock().unwrap();
            if !state.entries.contains_key(key) {
                state.entries.insert(
                    key.to_string(),
                    CacheEntry {
                        artifact_path: artifact_path.to_path_buf(),
                        source_path: source_path.to_path_buf(),
                        size_bytes: size,
                        last_access: now,
                    },
                );
                state.total_bytes += size;

                info!(
                    key = %key,
                    path = %artifact_path.display(),
                    size,
                    "Adopted existing artifact from disk"
                );
            }
        }
        self.hints.lock().unwrap().record(source_path, size);

        now
    }

    /// Transcode la source puis enregistre l'artefact produit
    async fn build(
        &self,
        source_path: &Path,
        key: &str,
        artifact_path: &Path,
    ) -> Result<CacheItem, CacheError> {
        let size = self
            .converter
            .convert(source_path, artifact_path)
            .await
            .map_err(|source| CacheError::Transcode {
                path: source_path.to_path_buf(),
                source,
            })?;

        let now = Utc::now();
        {
            let mut state = self.state.lock().unwrap();
            state.entries.insert(
                key.to_string(),
                CacheEntry {
                    artifact_path: artifact_path.to_path_buf(),
                    source_path: source_path.to_path_buf(),
                    size_bytes: size,
                    last_access: now,
                },
            );
            state.total_bytes += size;
        }
        self.hints.lock().unwrap().record(source_path, size);

        // L'échec d'éviction remonte à l'appelant, mais l'entrée fraîche
        // reste valide : le prochain accès la resservira.
        self.evict().await?;

        Ok(CacheItem {
            path: artifact_path.to_path_buf(),
            size,
            updated: now,
        })
    }

    /// Éviction LRU jusqu'au retour sous le budget
    ///
    /// Une table réduite à une seule entrée n'est jamais vidée : un artefact
    /// isolé plus grand que le budget reste servable. Un échec de suppression
    /// interrompt la passe ; les entrées déjà évincées restent évincées et la
    /// table reste cohérente avec l'état du disque.
    async fn evict(&self) -> Result<(), CacheError> {
        loop {
            let victim = {
                let state = self.state.lock().unwrap();
                if state.total_bytes <= self.budget_bytes || state.entries.len() <= 1 {
                    return Ok(());
                }

                state
                    .entries
                    .iter()
                    .min_by(|(ka, ea), (kb, eb)| {
                        ea.last_access.cmp(&eb.last_access).then(ka.cmp(kb))
                    })
                    .map(|(key, entry)| {
                        (
                            key.clone(),
                            entry.artifact_path.clone(),
                            entry.source_path.clone(),
                            entry.size_bytes,
                        )
                    })
            };

            let Some((key, artifact_path, source_path, size)) = victim else {
                return Ok(());
            };

            if let Err(source) = tokio::fs::remove_file(&artifact_path).await {
                return Err(CacheError::Evict {
                    path: artifact_path,
                    source,
                });
            }

            {
                let mut state = self.state.lock().unwrap();
                if state.entries.remove(&key).is_some() {
                    state.total_bytes = state.total_bytes.saturating_sub(size);
                }
            }
            self.hints.lock().unwrap().forget(&source_path);

            debug!(
                key = %key,
                path = %artifact_path.display(),
                size,
                "Evicted least recently used artifact"
            );
        }
    }
}

/// Un artefact orphelin n'est adopté que s'il est strictement plus récent que
/// la source et dépasse le kilooctet ; tout le reste est traité comme un
/// résidu de transcodage interrompu.
fn is_adoptable(artifact_meta: &Metadata, source_meta: &Metadata) -> bool {
    let newer = match (artifact_meta.modified(), source_meta.modified()) {
        (Ok(artifact_mtime), Ok(source_mtime)) => artifact_mtime > source_mtime,
        _ => false,
    };

    newer && artifact_meta.len() > MIN_ARTIFACT_BYTES
}
