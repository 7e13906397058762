use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

use crate::error::CacheError;
use crate::logger;

const CLEANUP_BATCH_SIZE: usize = 100;

/// Content cache as seen by the router: lets tests substitute an in-memory
/// double for the real two-file disk cache (§9).
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, url: &str, device_type: &str) -> Option<String>;
    async fn set(&self, url: &str, html: &str, device_type: &str, ttl_seconds: u64) -> Result<(), CacheError>;
    async fn invalidate(&self, url: &str, device_type: &str);
    async fn clear(&self) -> Result<(), CacheError>;
    async fn cleanup(&self) -> CleanupReport;
    async fn writable(&self) -> bool;
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheMeta {
    expires_at: i64,
    url: String,
    device_type: String,
}

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: usize,
    pub errors: usize,
}

pub struct CacheStore {
    dir: PathBuf,
    dir_ready: OnceCell<()>,
}

impl CacheStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            dir_ready: OnceCell::new(),
        }
    }

    async fn ensure_dir(&self) -> Result<(), CacheError> {
        self.dir_ready
            .get_or_try_init(|| async {
                tokio::fs::create_dir_all(&self.dir).await?;
                Ok::<(), std::io::Error>(())
            })
            .await?;
        Ok(())
    }

    #[must_use]
    pub fn digest(device_type: &str, url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{device_type}:{url}").as_bytes());
        hex::encode(hasher.finalize())
    }

    fn html_path(&self, digest: &str) -> PathBuf {
        self.dir.join(format!("{digest}.html"))
    }

    fn meta_path(&self, digest: &str) -> PathBuf {
        self.dir.join(format!("{digest}.html.meta"))
    }

    /// Self-healing get: any inconsistency between the html/meta pair
    /// results in both files being removed and a miss returned (§4.3).
    pub async fn get(&self, url: &str, device_type: &str) -> Option<String> {
        self.ensure_dir().await.ok()?;
        let digest = Self::digest(device_type, url);
        let meta_path = self.meta_path(&digest);
        let html_path = self.html_path(&digest);

        let meta_raw = match tokio::fs::read(&meta_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                logger::log_warning(&format!("cache meta read failed for {digest}: {e}"));
                return None;
            }
        };

        let meta: CacheMeta = match serde_json::from_slice(&meta_raw) {
            Ok(m) => m,
            Err(e) => {
                logger::log_warning(&format!("cache meta corrupt for {digest}: {e}"));
                self.remove_pair(&html_path, &meta_path).await;
                return None;
            }
        };

        if now_millis() > meta.expires_at {
            self.remove_pair(&html_path, &meta_path).await;
            return None;
        }

        match tokio::fs::read_to_string(&html_path).await {
            Ok(html) => Some(html),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let _ = tokio::fs::remove_file(&meta_path).await;
                None
            }
            Err(e) => {
                logger::log_warning(&format!("cache html read failed for {digest}: {e}"));
                None
            }
        }
    }

    /// Writes the html and metadata files concurrently; this is not
    /// cross-file atomic (§4.3), a torn write self-heals on the next `get`.
    pub async fn set(
        &self,
        url: &str,
        html: &str,
        device_type: &str,
        ttl_seconds: u64,
    ) -> Result<(), CacheError> {
        self.ensure_dir().await?;
        let digest = Self::digest(device_type, url);
        let meta = CacheMeta {
            expires_at: now_millis() + (ttl_seconds as i64) * 1000,
            url: url.to_string(),
            device_type: device_type.to_string(),
        };
        let meta_json = serde_json::to_vec(&meta)
            .map_err(|e| CacheError::Corrupt(e.to_string()))?;

        let html_path = self.html_path(&digest);
        let meta_path = self.meta_path(&digest);
        let (html_res, meta_res) = futures::join!(
            tokio::fs::write(&html_path, html.as_bytes()),
            tokio::fs::write(&meta_path, &meta_json),
        );
        html_res?;
        meta_res?;
        Ok(())
    }

    pub async fn invalidate(&self, url: &str, device_type: &str) {
        let digest = Self::digest(device_type, url);
        self.remove_pair(&self.html_path(&digest), &self.meta_path(&digest))
            .await;
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        self.ensure_dir().await?;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(".html") || name.ends_with(".html.meta") {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
        Ok(())
    }

    /// Enumerates every `*.html.meta` file and removes expired pairs,
    /// processed in fixed-size concurrent batches to bound open file
    /// descriptors.
    pub async fn cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        if self.ensure_dir().await.is_err() {
            return report;
        }

        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return report;
        };

        let mut meta_files = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.to_string_lossy().ends_with(".html.meta") {
                meta_files.push(path);
            }
        }

        for batch in meta_files.chunks(CLEANUP_BATCH_SIZE) {
            let results = futures::future::join_all(
                batch.iter().map(|path| self.cleanup_one(path)),
            )
            .await;
            for result in results {
                match result {
                    Ok(true) => report.removed += 1,
                    Ok(false) => {}
                    Err(()) => report.errors += 1,
                }
            }
        }

        report
    }

    async fn cleanup_one(&self, meta_path: &Path) -> Result<bool, ()> {
        let raw = tokio::fs::read(meta_path).await.map_err(|_| ())?;
        let meta: CacheMeta = serde_json::from_slice(&raw).map_err(|_| ())?;
        if now_millis() > meta.expires_at {
            let html_path = meta_path.with_extension("");
            self.remove_pair(&html_path, meta_path).await;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn remove_pair(&self, html_path: &Path, meta_path: &Path) {
        let _ = tokio::fs::remove_file(html_path).await;
        let _ = tokio::fs::remove_file(meta_path).await;
    }

    /// Probe consumed by `/health`: can the cache directory be created or
    /// written to right now.
    pub async fn writable(&self) -> bool {
        self.ensure_dir().await.is_ok()
    }
}

#[async_trait]
impl Cache for CacheStore {
    async fn get(&self, url: &str, device_type: &str) -> Option<String> {
        self.get(url, device_type).await
    }

    async fn set(&self, url: &str, html: &str, device_type: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        self.set(url, html, device_type, ttl_seconds).await
    }

    async fn invalidate(&self, url: &str, device_type: &str) {
        self.invalidate(url, device_type).await;
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.clear().await
    }

    async fn cleanup(&self) -> CleanupReport {
        self.cleanup().await
    }

    async fn writable(&self) -> bool {
        self.writable().await
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic_and_sensitive_to_inputs() {
        let a = CacheStore::digest("desktop", "https://example.com/");
        let b = CacheStore::digest("desktop", "https://example.com/");
        let c = CacheStore::digest("mobile", "https://example.com/");
        let d = CacheStore::digest("desktop", "https://example.com/other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = tempdir();
        let store = CacheStore::new(&dir);
        store.set("https://x/", "<html></html>", "desktop", 60).await.unwrap();
        let got = store.get("https://x/", "desktop").await;
        assert_eq!(got.as_deref(), Some("<html></html>"));
        cleanup_dir(&dir);
    }

    #[tokio::test]
    async fn expired_entry_is_miss_and_self_heals() {
        let dir = tempdir();
        let store = CacheStore::new(&dir);
        store.set("https://x/", "<html></html>", "desktop", 0).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(store.get("https://x/", "desktop").await.is_none());
        let digest = CacheStore::digest("desktop", "https://x/");
        assert!(!store.html_path(&digest).exists());
        assert!(!store.meta_path(&digest).exists());
        cleanup_dir(&dir);
    }

    #[tokio::test]
    async fn clear_removes_all_entries() {
        let dir = tempdir();
        let store = CacheStore::new(&dir);
        store.set("https://x/", "<html></html>", "desktop", 60).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.get("https://x/", "desktop").await.is_none());
        cleanup_dir(&dir);
    }

    #[tokio::test]
    async fn invalidate_then_get_is_miss_and_idempotent() {
        let dir = tempdir();
        let store = CacheStore::new(&dir);
        store.set("https://x/", "<html></html>", "desktop", 60).await.unwrap();
        store.invalidate("https://x/", "desktop").await;
        assert!(store.get("https://x/", "desktop").await.is_none());
        store.invalidate("https://x/", "desktop").await;
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("renderx-cache-test-{:?}", std::thread::current().id()));
        dir
    }

    fn cleanup_dir(dir: &Path) {
        let _ = std::fs::remove_dir_all(dir);
    }
}
