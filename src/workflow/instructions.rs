//! Step instruction loading.
//!
//! Each step's system instruction is a markdown file `<dir>/<step>.md`. Loaded
//! text is kept in an `InstructionCache` owned by whoever builds the store, so
//! there is no process-wide cache and tests stay independent.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::InstructionError;

/// Source of step instruction text.
#[async_trait]
pub trait InstructionSource: Send + Sync {
    async fn load(&self, step: &str) -> Result<Arc<str>, InstructionError>;
}

/// Cache of loaded instructions keyed by normalized file path.
#[derive(Debug, Default)]
pub struct InstructionCache {
    entries: RwLock<HashMap<PathBuf, Arc<str>>>,
}

impl InstructionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, path: &Path) -> Option<Arc<str>> {
        self.entries.read().await.get(&normalize_path(path)).cloned()
    }

    pub async fn insert(&self, path: &Path, text: Arc<str>) {
        self.entries.write().await.insert(normalize_path(path), text);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

/// Loads `<dir>/<step>.md`, caching by normalized path.
pub struct FileInstructionStore {
    dir: PathBuf,
    cache: Arc<InstructionCache>,
}

impl FileInstructionStore {
    pub fn new(dir: impl Into<PathBuf>, cache: Arc<InstructionCache>) -> Self {
        Self {
            dir: dir.into(),
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<InstructionCache> {
        &self.cache
    }

    fn path_for(&self, step: &str) -> PathBuf {
        self.dir.join(format!("{step}.md"))
    }
}

#[async_trait]
impl InstructionSource for FileInstructionStore {
    async fn load(&self, step: &str) -> Result<Arc<str>, InstructionError> {
        let path = self.path_for(step);
        if !is_safe_step_name(step) {
            return Err(InstructionError::NotFound {
                step: step.to_string(),
                path,
            });
        }

        if let Some(text) = self.cache.get(&path).await {
            return Ok(text);
        }

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(InstructionError::NotFound {
                    step: step.to_string(),
                    path,
                });
            }
            Err(e) => {
                return Err(InstructionError::Io {
                    step: step.to_string(),
                    source: e,
                });
            }
        };

        debug!(step, path = %path.display(), bytes = text.len(), "Loaded step instructions");
        let text: Arc<str> = Arc::from(text);
        self.cache.insert(&path, Arc::clone(&text)).await;
        Ok(text)
    }
}

/// In-memory instructions, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticInstructions {
    steps: HashMap<String, Arc<str>>,
}

impl StaticInstructions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step(mut self, step: impl Into<String>, text: impl AsRef<str>) -> Self {
        self.steps.insert(step.into(), Arc::from(text.as_ref()));
        self
    }
}

#[async_trait]
impl InstructionSource for StaticInstructions {
    async fn load(&self, step: &str) -> Result<Arc<str>, InstructionError> {
        self.steps
            .get(step)
            .cloned()
            .ok_or_else(|| InstructionError::NotFound {
                step: step.to_string(),
                path: PathBuf::from(format!("<memory>/{step}")),
            })
    }
}

/// A step name must be a single plain file stem.
fn is_safe_step_name(step: &str) -> bool {
    !step.is_empty()
        && !step.starts_with('.')
        && !step.contains(['/', '\\'])
        && !step.contains("..")
}

/// Lexically normalize a path: drop `.` components and resolve `..` against
/// preceding normal components. Does not touch the filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dots() {
        assert_eq!(
            normalize_path(Path::new("./steps/../steps/./01.md")),
            PathBuf::from("steps/01.md")
        );
        assert_eq!(normalize_path(Path::new("../a/b/..")), PathBuf::from("../a"));
    }

    #[test]
    fn step_name_safety() {
        assert!(is_safe_step_name("03a-valid-warranty"));
        assert!(!is_safe_step_name("../secrets"));
        assert!(!is_safe_step_name("a/b"));
        assert!(!is_safe_step_name(""));
        assert!(!is_safe_step_name(".hidden"));
    }

    #[tokio::test]
    async fn loads_and_caches_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("01-extract-serial.md");
        std::fs::write(&path, "Extract the serial.\nNEXT_STEP: 02-check-warranty").unwrap();

        let cache = Arc::new(InstructionCache::new());
        let store = FileInstructionStore::new(dir.path(), Arc::clone(&cache));

        let text = store.load("01-extract-serial").await.unwrap();
        assert!(text.starts_with("Extract the serial."));
        assert_eq!(cache.len().await, 1);

        // Served from cache even after the file changes on disk.
        std::fs::write(&path, "changed").unwrap();
        let cached = store.load("01-extract-serial").await.unwrap();
        assert!(cached.starts_with("Extract the serial."));

        cache.clear().await;
        assert_eq!(cache.len().await, 0);
        assert_eq!(&*store.load("01-extract-serial").await.unwrap(), "changed");
    }

    #[tokio::test]
    async fn cache_keys_are_normalized() {
        let cache = InstructionCache::new();
        cache
            .insert(Path::new("steps/./01.md"), Arc::from("text"))
            .await;
        assert!(cache.get(Path::new("steps/x/../01.md")).await.is_some());
    }

    #[tokio::test]
    async fn separate_caches_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("s.md"), "one").unwrap();

        let first = FileInstructionStore::new(dir.path(), Arc::new(InstructionCache::new()));
        let second = FileInstructionStore::new(dir.path(), Arc::new(InstructionCache::new()));

        first.load("s").await.unwrap();
        assert_eq!(first.cache().len().await, 1);
        assert_eq!(second.cache().len().await, 0);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileInstructionStore::new(dir.path(), Arc::new(InstructionCache::new()));
        let err = store.load("nope").await.unwrap_err();
        assert!(matches!(err, InstructionError::NotFound { .. }));
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileInstructionStore::new(dir.path(), Arc::new(InstructionCache::new()));
        assert!(matches!(
            store.load("../etc/passwd").await,
            Err(InstructionError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn static_instructions() {
        let source = StaticInstructions::new().with_step("a", "do a");
        assert_eq!(&*source.load("a").await.unwrap(), "do a");
        assert!(source.load("b").await.is_err());
    }
}
