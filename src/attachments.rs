// Attachment Text Extraction
// Resolves share:// IRIs to local files, extracts their text through a
// Tika-compatible service, and caches extracted text content-addressed by
// the file's SHA-256 so re-indexing never re-extracts unchanged binaries.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use url::Url;

use crate::observability::component;

/// The text-extraction seam. Returns `None` for empty input and for
/// extraction failures; a missing attachment is never a pipeline error.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, path: &Path, blob: &[u8]) -> Result<Option<String>>;
}

/// HTTP client against an Apache Tika server.
pub struct TikaClient {
    base: Url,
    http: reqwest::Client,
}

impl TikaClient {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TextExtractor for TikaClient {
    async fn extract_text(&self, path: &Path, blob: &[u8]) -> Result<Option<String>> {
        if blob.is_empty() {
            return Ok(None);
        }
        let url = self.base.join("tika").context("invalid tika endpoint")?;
        let response = self
            .http
            .put(url)
            .header("Accept", "text/plain")
            .body(blob.to_vec())
            .send()
            .await;
        match response {
            Ok(response) if response.status().is_success() => {
                let text = response.text().await.unwrap_or_default();
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(trimmed.to_string()))
                }
            }
            Ok(response) => {
                warn!(
                    component = component::TIKA,
                    status = response.status().as_u16(),
                    path = %path.display(),
                    "text extraction rejected"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(
                    component = component::TIKA,
                    path = %path.display(),
                    error = %e,
                    "text extraction failed"
                );
                Ok(None)
            }
        }
    }
}

/// Content-addressed cache of extracted text, keyed by the source file's
/// SHA-256 digest.
pub struct AttachmentCache {
    dir: PathBuf,
}

impl AttachmentCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn entry_path(&self, digest: &str) -> PathBuf {
        self.dir.join(format!("{digest}.txt"))
    }

    pub async fn get(&self, digest: &str) -> Option<String> {
        fs::read_to_string(self.entry_path(digest)).await.ok()
    }

    pub async fn put(&self, digest: &str, text: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create cache directory {}", self.dir.display()))?;
        let path = self.entry_path(digest);
        fs::write(&path, text)
            .await
            .with_context(|| format!("failed to write cache entry {}", path.display()))?;
        Ok(())
    }
}

pub fn sha256_hex(blob: &[u8]) -> String {
    hex::encode(Sha256::digest(blob))
}

/// Attachment resolution pipeline: share:// IRI → local file → cached or
/// freshly extracted text.
pub struct AttachmentPipeline {
    base: PathBuf,
    maximum_file_size: u64,
    cache: AttachmentCache,
    extractor: std::sync::Arc<dyn TextExtractor>,
}

impl AttachmentPipeline {
    pub fn new(
        base: PathBuf,
        maximum_file_size: u64,
        cache_dir: PathBuf,
        extractor: std::sync::Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            base,
            maximum_file_size,
            cache: AttachmentCache::new(cache_dir),
            extractor,
        }
    }

    /// Resolve a `share://relative/path` IRI under the attachment base.
    pub fn resolve(&self, uri: &str) -> Option<PathBuf> {
        let relative = uri.strip_prefix("share://")?;
        if relative.is_empty() || relative.split('/').any(|seg| seg == "..") {
            return None;
        }
        Some(self.base.join(relative))
    }

    /// The indexable text of one attachment IRI, or `None` when the file is
    /// missing, empty, oversized, or extraction fails.
    pub async fn content_for(&self, uri: &str) -> Option<String> {
        let path = self.resolve(uri)?;
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(_) => {
                debug!(
                    component = component::TIKA,
                    uri, "attachment file not present"
                );
                return None;
            }
        };
        if metadata.len() == 0 || metadata.len() > self.maximum_file_size {
            return None;
        }
        let blob = match fs::read(&path).await {
            Ok(blob) => blob,
            Err(e) => {
                warn!(
                    component = component::TIKA,
                    uri,
                    error = %e,
                    "attachment file unreadable"
                );
                return None;
            }
        };
        let digest = sha256_hex(&blob);
        if let Some(cached) = self.cache.get(&digest).await {
            return Some(cached);
        }
        match self.extractor.extract_text(&path, &blob).await {
            Ok(Some(text)) => {
                if let Err(e) = self.cache.put(&digest, &text).await {
                    warn!(component = component::TIKA, error = %e, "cache write failed");
                }
                Some(text)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(component = component::TIKA, uri, error = %e, "text extraction failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingExtractor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextExtractor for CountingExtractor {
        async fn extract_text(&self, _path: &Path, blob: &[u8]) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(String::from_utf8_lossy(blob).to_string()))
        }
    }

    fn pipeline(dir: &Path, extractor: Arc<CountingExtractor>) -> AttachmentPipeline {
        AttachmentPipeline::new(dir.to_path_buf(), 1024, dir.join("cache"), extractor)
    }

    #[test]
    fn resolves_share_uris_under_the_base() {
        let extractor = Arc::new(CountingExtractor {
            calls: AtomicUsize::new(0),
        });
        let p = pipeline(Path::new("/share"), extractor);
        assert_eq!(
            p.resolve("share://docs/report.pdf"),
            Some(PathBuf::from("/share/docs/report.pdf"))
        );
        assert_eq!(p.resolve("http://example.org/report.pdf"), None);
        assert_eq!(p.resolve("share://../etc/passwd"), None);
        assert_eq!(p.resolve("share://"), None);
    }

    #[tokio::test]
    async fn empty_files_skip_extraction() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty.pdf"), b"").unwrap();
        let extractor = Arc::new(CountingExtractor {
            calls: AtomicUsize::new(0),
        });
        let p = pipeline(dir.path(), extractor.clone());
        assert_eq!(p.content_for("share://empty.pdf").await, None);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_files_skip_extraction() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.bin"), vec![0u8; 2048]).unwrap();
        let extractor = Arc::new(CountingExtractor {
            calls: AtomicUsize::new(0),
        });
        let p = pipeline(dir.path(), extractor.clone());
        assert_eq!(p.content_for("share://big.bin").await, None);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn extraction_results_are_cached_by_digest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doc.txt"), b"indexable text").unwrap();
        let extractor = Arc::new(CountingExtractor {
            calls: AtomicUsize::new(0),
        });
        let p = pipeline(dir.path(), extractor.clone());

        assert_eq!(
            p.content_for("share://doc.txt").await.as_deref(),
            Some("indexable text")
        );
        assert_eq!(
            p.content_for("share://doc.txt").await.as_deref(),
            Some("indexable text")
        );
        // Second read is served from the content-addressed cache
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }
}
