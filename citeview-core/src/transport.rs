use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{FetchError, ResolutionError};

/// Shared, immutable file contents. Identity (`Arc::ptr_eq`) is meaningful:
/// the rendering engine only re-parses when it sees a different buffer.
pub type FileBytes = Arc<[u8]>;

#[async_trait]
pub trait FileTransport: Send + Sync {
    async fn fetch(&self, file_name: &str) -> Result<Vec<u8>, FetchError>;
}

/// Answers "which page of this file best matches the query". Pages are
/// 1-based; out-of-range answers are clamped by the resolver.
#[async_trait]
pub trait RelevanceTransport: Send + Sync {
    async fn relevant_page(&self, file_name: &str, query: &str) -> Result<i64, ResolutionError>;
}

/// Serves files from a local folder, the way the document volume is laid out
/// on the server side.
pub struct DirectoryTransport {
    root: PathBuf,
}

impl DirectoryTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, file_name: &str) -> Result<PathBuf, FetchError> {
        let relative = Path::new(file_name);
        let plain = !file_name.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !plain {
            return Err(FetchError::NotFound {
                file_name: file_name.to_owned(),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileTransport for DirectoryTransport {
    async fn fetch(&self, file_name: &str) -> Result<Vec<u8>, FetchError> {
        let path = self.path_for(file_name)?;
        debug!(path = %path.display(), "reading file from directory");
        tokio::fs::read(&path).await.map_err(|err| match err.kind() {
            ErrorKind::NotFound => FetchError::NotFound {
                file_name: file_name.to_owned(),
            },
            _ => FetchError::Transport(format!("failed to read {}: {err}", path.display())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn directory_transport_reads_files_by_name() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("report.pdf"), b"%PDF-1.7").unwrap();

        let transport = DirectoryTransport::new(dir.path());
        let bytes = transport.fetch("report.pdf").await.unwrap();
        assert_eq!(bytes, b"%PDF-1.7");
    }

    #[tokio::test]
    async fn directory_transport_reports_missing_files() {
        let dir = tempdir().unwrap();
        let transport = DirectoryTransport::new(dir.path());
        let err = transport.fetch("missing.pdf").await.unwrap_err();
        assert_eq!(
            err,
            FetchError::NotFound {
                file_name: "missing.pdf".into()
            }
        );
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn directory_transport_refuses_to_escape_root() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("docs");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(dir.path().join("secret.pdf"), b"nope").unwrap();

        let transport = DirectoryTransport::new(&nested);
        for name in ["../secret.pdf", "/etc/passwd", "", "."] {
            assert!(
                matches!(transport.fetch(name).await, Err(FetchError::NotFound { .. })),
                "{name}"
            );
        }
    }
}
