use async_trait::async_trait;
use ftcache::{cache_key, mtime_ns, Cache, CacheError};
use fttranscoder::{Converter, TranscodeError, MIN_ARTIFACT_BYTES};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Convertisseur scripté : écrit `output_size` octets et compte ses appels
struct ScriptedConverter {
    output_size: u64,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedConverter {
    fn new(output_size: u64) -> Arc<Self> {
        Arc::new(Self {
            output_size,
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn slow(output_size: u64, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            output_size,
            delay: Some(delay),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Converter for ScriptedConverter {
    async fn convert(&self, _source: &Path, destination: &Path) -> Result<u64, TranscodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        tokio::fs::write(destination, vec![0u8; self.output_size as usize])
            .await
            .unwrap();

        if self.output_size < MIN_ARTIFACT_BYTES {
            let _ = tokio::fs::remove_file(destination).await;
            return Err(TranscodeError::OutputTooSmall {
                size: self.output_size,
            });
        }

        Ok(self.output_size)
    }
}

fn write_source(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, b"fLaC fake content").unwrap();
    path
}

fn expected_artifact(cache: &Cache, source: &Path) -> PathBuf {
    let meta = std::fs::metadata(source).unwrap();
    cache.artifact_path(&cache_key(source, mtime_ns(&meta)))
}

#[tokio::test]
async fn test_transcode_once_then_reuse() {
    let source_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let source = write_source(&source_dir, "01.flac");

    let converter = ScriptedConverter::new(4096);
    let cache = Cache::new(cache_dir.path(), 10 * 1024 * 1024, converter.clone()).unwrap();

    let first = cache.get_artifact(&source).await.unwrap();
    let second = cache.get_artifact(&source).await.unwrap();

    assert_eq!(first.path, second.path);
    assert_eq!(first.size, 4096);
    assert_eq!(converter.calls(), 1);
    assert!(second.updated >= first.updated);
    assert!(first.path.exists());
    assert_eq!(cache.entry_count(), 1);
}

#[tokio::test]
async fn test_restart_reattaches_existing_artifact() {
    let source_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let source = write_source(&source_dir, "01.flac");

    let first_converter = ScriptedConverter::new(4096);
    let first_item = {
        let cache = Cache::new(cache_dir.path(), 10 * 1024 * 1024, first_converter.clone())
            .unwrap();
        cache.get_artifact(&source).await.unwrap()
    };

    // Nouveau cache sur le même répertoire : tables en mémoire vides
    let second_converter = ScriptedConverter::new(4096);
    let cache = Cache::new(cache_dir.path(), 10 * 1024 * 1024, second_converter.clone())
        .unwrap();

    let item = cache.get_artifact(&source).await.unwrap();

    assert_eq!(item.path, first_item.path);
    assert_eq!(second_converter.calls(), 0, "reattach must not re-encode");
    assert_eq!(cache.entry_count(), 1);
}

#[tokio::test]
async fn test_source_mtime_change_invalidates_artifact() {
    let source_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let source = write_source(&source_dir, "01.flac");

    let converter = ScriptedConverter::new(4096);
    let cache = Cache::new(cache_dir.path(), 10 * 1024 * 1024, converter.clone()).unwrap();

    let before = cache.get_artifact(&source).await.unwrap();

    // Toucher la source lui donne un mtime plus récent, donc une clé neuve
    tokio::time::sleep(Duration::from_millis(20)).await;
    std::fs::write(&source, b"fLaC edited content").unwrap();

    let after = cache.get_artifact(&source).await.unwrap();

    assert_ne!(before.path, after.path);
    assert_eq!(converter.calls(), 2);
}

#[tokio::test]
async fn test_eviction_enforces_budget() {
    let source_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();

    let converter = ScriptedConverter::new(2048);
    // Budget pour deux artefacts de 2048 octets, plus un peu de marge
    let cache = Cache::new(cache_dir.path(), 5000, converter.clone()).unwrap();

    let mut artifacts = Vec::new();
    for i in 0..5 {
        let source = write_source(&source_dir, &format!("{i:02}.flac"));
        let item = cache.get_artifact(&source).await.unwrap();
        artifacts.push(item.path.clone());
        // Des horodatages d'accès distincts
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(cache.total_bytes() <= 5000);
    assert_eq!(cache.entry_count(), 2);

    // Les accès les plus anciens sont partis, les plus récents restent
    assert!(!artifacts[0].exists());
    assert!(!artifacts[1].exists());
    assert!(!artifacts[2].exists());
    assert!(artifacts[3].exists());
    assert!(artifacts[4].exists());
}

#[tokio::test]
async fn test_single_oversized_artifact_is_kept() {
    let source_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let source = write_source(&source_dir, "01.flac");

    let converter = ScriptedConverter::new(4096);
    let cache = Cache::new(cache_dir.path(), 1024, converter.clone()).unwrap();

    // L'artefact dépasse à lui seul le budget : il doit rester servable
    let item = cache.get_artifact(&source).await.unwrap();

    assert!(item.path.exists());
    assert_eq!(cache.entry_count(), 1);
    assert_eq!(cache.total_bytes(), 4096);
}

#[tokio::test]
async fn test_concurrent_opens_share_one_transcode() {
    let source_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let source = write_source(&source_dir, "01.flac");

    let converter = ScriptedConverter::slow(4096, Duration::from_millis(100));
    let cache = Arc::new(
        Cache::new(cache_dir.path(), 10 * 1024 * 1024, converter.clone()).unwrap(),
    );

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let source = source.clone();
        tasks.push(tokio::spawn(async move {
            cache.get_artifact(&source).await.unwrap()
        }));
    }

    let mut paths = Vec::new();
    for task in tasks {
        paths.push(task.await.unwrap().path);
    }

    assert_eq!(converter.calls(), 1, "racers must share a single transcode");
    assert!(paths.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn test_undersized_output_is_not_cached() {
    let source_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let source = write_source(&source_dir, "01.flac");

    let converter = ScriptedConverter::new(512);
    let cache = Cache::new(cache_dir.path(), 10 * 1024 * 1024, converter.clone()).unwrap();

    let err = cache.get_artifact(&source).await.unwrap_err();

    assert!(matches!(err, CacheError::Transcode { .. }));
    assert_eq!(cache.entry_count(), 0);
    assert_eq!(cache.total_bytes(), 0);
    assert!(!expected_artifact(&cache, &source).exists());

    // L'échec n'est pas mémorisé : l'accès suivant retente
    let _ = cache.get_artifact(&source).await.unwrap_err();
    assert_eq!(converter.calls(), 2);
}

#[tokio::test]
async fn test_missing_source_is_an_error() {
    let cache_dir = tempfile::tempdir().unwrap();
    let converter = ScriptedConverter::new(4096);
    let cache = Cache::new(cache_dir.path(), 1024, converter.clone()).unwrap();

    let err = cache
        .get_artifact(Path::new("/nonexistent/track.flac"))
        .await
        .unwrap_err();

    assert!(matches!(err, CacheError::Source { .. }));
    assert_eq!(converter.calls(), 0);
}

#[tokio::test]
async fn test_stat_size_never_invokes_the_encoder() {
    let source_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let source = write_source(&source_dir, "01.flac");
    let source_size = std::fs::metadata(&source).unwrap().len();

    let converter = ScriptedConverter::new(4096);
    let cache = Cache::new(cache_dir.path(), 10 * 1024 * 1024, converter.clone()).unwrap();

    // Cache froid : la taille de la source sert d'estimation
    assert_eq!(cache.stat_size(&source).await, source_size);
    assert_eq!(converter.calls(), 0);
    assert_eq!(cache.entry_count(), 0);

    // Source illisible : zéro, sans erreur
    assert_eq!(cache.stat_size(Path::new("/nonexistent.flac")).await, 0);
}

#[tokio::test]
async fn test_stat_size_adopts_artifact_left_on_disk() {
    let source_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let source = write_source(&source_dir, "01.flac");

    let converter = ScriptedConverter::new(4096);
    let cache = Cache::new(cache_dir.path(), 10 * 1024 * 1024, converter.clone()).unwrap();

    // Artefact laissé par une exécution précédente, plus récent que la source
    tokio::time::sleep(Duration::from_millis(10)).await;
    let artifact = expected_artifact(&cache, &source);
    std::fs::write(&artifact, vec![0u8; 2048]).unwrap();

    assert_eq!(cache.stat_size(&source).await, 2048);
    assert_eq!(converter.calls(), 0);
    assert_eq!(cache.entry_count(), 1);

    // L'indice répond désormais sans E/S
    assert_eq!(cache.stat_size(&source).await, 2048);
}

#[tokio::test]
async fn test_artifact_of_exactly_1024_bytes_is_stale() {
    let source_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let source = write_source(&source_dir, "01.flac");
    let source_size = std::fs::metadata(&source).unwrap().len();

    let converter = ScriptedConverter::new(4096);
    let cache = Cache::new(cache_dir.path(), 10 * 1024 * 1024, converter.clone()).unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    let artifact = expected_artifact(&cache, &source);

    // 1024 octets exactement : rejeté (la règle exige strictement plus)
    std::fs::write(&artifact, vec![0u8; 1024]).unwrap();
    assert_eq!(cache.stat_size(&source).await, source_size);
    assert_eq!(cache.entry_count(), 0);

    // 1025 octets : adopté
    std::fs::write(&artifact, vec![0u8; 1025]).unwrap();
    assert_eq!(cache.stat_size(&source).await, 1025);
    assert_eq!(cache.entry_count(), 1);
}

#[tokio::test]
async fn test_eviction_drops_the_stat_hint() {
    let source_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();

    let converter = ScriptedConverter::new(2048);
    // Budget pour un seul artefact
    let cache = Cache::new(cache_dir.path(), 3000, converter.clone()).unwrap();

    let first = write_source(&source_dir, "a.flac");
    let second = write_source(&source_dir, "b.flac");
    let first_size = std::fs::metadata(&first).unwrap().len();

    cache.get_artifact(&first).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    // Le second accès évince le premier artefact
    cache.get_artifact(&second).await.unwrap();

    assert_eq!(cache.entry_count(), 1);

    // L'indice du premier est parti avec son artefact : retour à
    // l'estimation par la taille de la source
    assert_eq!(cache.stat_size(&first).await, first_size);
}

#[tokio::test]
async fn test_vanished_artifact_is_rebuilt() {
    let source_dir = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let source = write_source(&source_dir, "01.flac");

    let converter = ScriptedConverter::new(4096);
    let cache = Cache::new(cache_dir.path(), 10 * 1024 * 1024, converter.clone()).unwrap();

    let item = cache.get_artifact(&source).await.unwrap();

    // Suppression sauvage de l'artefact derrière le dos du cache
    std::fs::remove_file(&item.path).unwrap();

    let rebuilt = cache.get_artifact(&source).await.unwrap();

    assert_eq!(rebuilt.path, item.path);
    assert_eq!(converter.calls(), 2);
    assert_eq!(cache.entry_count(), 1);
    assert_eq!(cache.total_bytes(), 4096);
}
