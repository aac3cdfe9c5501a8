//! Fetch-and-persist for candidate image URLs.
//!
//! A destination file is written at most once: if it already exists the
//! save is a no-op success, so retrying candidates across runs never
//! re-downloads or overwrites.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

/// Errors from fetching or storing a candidate image.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Cannot derive a filename from {0}")]
    NoFilename(String),

    #[error("Request failed for {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolves a URL to bytes.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// reqwest-backed image source.
#[derive(Clone)]
pub struct HttpImageSource {
    client: Client,
}

impl HttpImageSource {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|source| FetchError::Request {
                url: String::new(),
                source,
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let request_err = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url).send().await.map_err(request_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(request_err)?;
        Ok(bytes.to_vec())
    }
}

/// Filename for a candidate URL: the last path segment with any query
/// string removed.
pub fn derive_filename(url: &str) -> Option<String> {
    let without_query = url.split('?').next().unwrap_or(url);
    let name = without_query.rsplit('/').next().unwrap_or(without_query);
    match name {
        "" | "." | ".." => None,
        name if name.contains('\\') => None,
        name => Some(name.to_string()),
    }
}

/// Save `url` into `folder`, returning the filename.
///
/// Skips the network entirely when the derived file already exists.
pub async fn save<S>(source: &S, url: &str, folder: &Path) -> Result<String, FetchError>
where
    S: ImageSource + ?Sized,
{
    let filename = derive_filename(url).ok_or_else(|| FetchError::NoFilename(url.to_string()))?;
    let destination = folder.join(&filename);

    if destination.exists() {
        debug!("{} already present, skipping fetch", destination.display());
        return Ok(filename);
    }

    let bytes = source.fetch_bytes(url).await?;

    std::fs::create_dir_all(folder)?;
    let mut tmp = image_tempfile(folder)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    // A concurrent writer winning the race still leaves exactly one file.
    tmp.persist_noclobber(&destination).map_err(|e| e.error)?;

    info!(
        "Saved {} ({} bytes) to {}",
        url,
        bytes.len(),
        destination.display()
    );
    Ok(filename)
}

/// Temp file for a new image. Created with the usual umask-filtered mode
/// rather than the owner-only default, since the rename keeps it.
fn image_tempfile(folder: &Path) -> std::io::Result<tempfile::NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(".swpics-");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o644));
    }
    builder.tempfile_in(folder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct CountingSource {
        calls: AtomicUsize,
        status: Option<u16>,
    }

    impl CountingSource {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                status: None,
            }
        }
    }

    #[async_trait]
    impl ImageSource for CountingSource {
        async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.status {
                Some(status) => Err(FetchError::Status {
                    url: url.to_string(),
                    status,
                }),
                None => Ok(b"\xff\xd8jpeg".to_vec()),
            }
        }
    }

    #[test]
    fn test_derive_filename_strips_query() {
        assert_eq!(
            derive_filename("https://i.ebayimg.com/images/g/abc/s-l1600.webp?set_id=8800005007"),
            Some("s-l1600.webp".to_string())
        );
        assert_eq!(
            derive_filename("https://example.com/LSW123-full.jpg"),
            Some("LSW123-full.jpg".to_string())
        );
    }

    #[test]
    fn test_derive_filename_rejects_directories() {
        assert_eq!(derive_filename("https://example.com/images/"), None);
        assert_eq!(derive_filename("https://example.com/images/..?x=1"), None);
    }

    #[tokio::test]
    async fn test_save_fetches_at_most_once() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("LSW123");
        let source = CountingSource::ok();
        let url = "https://example.com/img/LSW123-full.jpg?w=2";

        let first = save(&source, url, &folder).await.unwrap();
        let second = save(&source, url, &folder).await.unwrap();

        assert_eq!(first, "LSW123-full.jpg");
        assert_eq!(second, first);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            std::fs::read(folder.join("LSW123-full.jpg")).unwrap(),
            b"\xff\xd8jpeg"
        );
    }

    #[tokio::test]
    async fn test_existing_file_is_never_overwritten() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("s-l1600.webp"), b"original").unwrap();
        let source = CountingSource::ok();

        let name = save(&source, "https://x.test/s-l1600.webp", dir.path())
            .await
            .unwrap();

        assert_eq!(name, "s-l1600.webp");
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            std::fs::read(dir.path().join("s-l1600.webp")).unwrap(),
            b"original"
        );
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_no_file() {
        let dir = tempdir().unwrap();
        let source = CountingSource {
            calls: AtomicUsize::new(0),
            status: Some(404),
        };

        let err = save(&source, "https://x.test/missing.jpg", dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert!(!dir.path().join("missing.jpg").exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_saved_image_is_world_readable_under_umask() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let source = CountingSource::ok();
        save(&source, "https://x.test/LSW123-full.jpg", dir.path())
            .await
            .unwrap();

        // A plain write shows what the process umask allows.
        let reference = dir.path().join("reference");
        std::fs::write(&reference, b"").unwrap();
        let allowed = std::fs::metadata(&reference).unwrap().permissions().mode() & 0o777;

        let mode = std::fs::metadata(dir.path().join("LSW123-full.jpg"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, allowed & 0o644);
    }
}
