use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::error::FetchError;
use crate::transport::{FileBytes, FileTransport};

/// Fetches files once per name and hands out the same buffer afterwards.
///
/// Concurrent loads of one name share a single in-flight fetch. A failed
/// fetch leaves no entry behind, so the next call tries again. Entries are
/// never evicted.
#[derive(Clone)]
pub struct FileLoader {
    transport: Arc<dyn FileTransport>,
    entries: Arc<Mutex<HashMap<String, Arc<OnceCell<FileBytes>>>>>,
}

impl FileLoader {
    pub fn new(transport: Arc<dyn FileTransport>) -> Self {
        Self {
            transport,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[instrument(skip(self))]
    pub async fn load(&self, file_name: &str) -> Result<FileBytes, FetchError> {
        let cell = {
            let mut entries = self.entries.lock();
            Arc::clone(entries.entry(file_name.to_owned()).or_default())
        };

        if let Some(bytes) = cell.get() {
            debug!("file already in cache");
            return Ok(Arc::clone(bytes));
        }

        let bytes = cell
            .get_or_try_init(|| async {
                info!("downloading file into cache");
                let raw = self.transport.fetch(file_name).await?;
                info!(size = raw.len(), "downloaded file");
                Ok::<_, FetchError>(FileBytes::from(raw))
            })
            .await?;
        Ok(Arc::clone(bytes))
    }

    pub fn is_cached(&self, file_name: &str) -> bool {
        self.entries
            .lock()
            .get(file_name)
            .map_or(false, |cell| cell.initialized())
    }

    /// Number of files whose bytes are held.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Warms the cache. Failures are logged and skipped; returns how many
    /// files ended up cached.
    pub async fn preload<I, S>(&self, file_names: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut loaded = 0;
        for name in file_names {
            let name = name.as_ref();
            match self.load(name).await {
                Ok(_) => loaded += 1,
                Err(err) => warn!(file_name = name, %err, "failed to preload file"),
            }
        }
        loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    struct CountingTransport {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl CountingTransport {
        fn new(fail_first: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FileTransport for CountingTransport {
        async fn fetch(&self, file_name: &str) -> Result<Vec<u8>, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if call < self.fail_first {
                return Err(FetchError::Status {
                    status: 503,
                    message: "unavailable".into(),
                });
            }
            Ok(file_name.as_bytes().to_vec())
        }
    }

    #[tokio::test]
    async fn second_load_returns_same_buffer() {
        let transport = Arc::new(CountingTransport::new(0));
        let loader = FileLoader::new(transport.clone());

        let first = loader.load("report.pdf").await.unwrap();
        let second = loader.load("report.pdf").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(&*first, b"report.pdf");
        assert_eq!(transport.calls(), 1);
        assert!(loader.is_cached("report.pdf"));
        assert_eq!(loader.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_loads_are_coalesced() {
        let transport = Arc::new(CountingTransport::new(0));
        let loader = FileLoader::new(transport.clone());

        let (a, b) = tokio::join!(loader.load("report.pdf"), loader.load("report.pdf"));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_is_not_cached() {
        let transport = Arc::new(CountingTransport::new(1));
        let loader = FileLoader::new(transport.clone());

        let err = loader.load("report.pdf").await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(!loader.is_cached("report.pdf"));
        assert!(loader.is_empty());

        let bytes = loader.load("report.pdf").await.unwrap();
        assert_eq!(&*bytes, b"report.pdf");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn preload_skips_failures() {
        let transport = Arc::new(CountingTransport::new(1));
        let loader = FileLoader::new(transport);

        let loaded = loader.preload(["a.pdf", "b.pdf", "c.pdf"]).await;
        assert_eq!(loaded, 2);
        assert!(!loader.is_cached("a.pdf"));
        assert!(loader.is_cached("b.pdf"));
        assert!(loader.is_cached("c.pdf"));
    }
}
