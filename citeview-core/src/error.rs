use thiserror::Error;

/// Failure to retrieve a file's bytes. Fatal to an open attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("HTTP error! status: {status} ({message})")]
    Status { status: u16, message: String },
    #[error("file {file_name:?} not found")]
    NotFound { file_name: String },
    #[error("transport failure: {0}")]
    Transport(String),
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::NotFound { .. } => Some(404),
            FetchError::Transport(_) => None,
        }
    }
}

/// Failure of the relevance lookup. Never fatal: callers fall back to page 1.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("HTTP error! status: {status} ({message})")]
    Status { status: u16, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("relevance lookup unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the rendering engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// A single page could not be produced; the document stays usable.
    #[error("failed to render page {page}: {message}")]
    Page { page: u32, message: String },
    /// The engine itself is broken (unreadable document, lost bindings).
    #[error("rendering engine failure: {0}")]
    Engine(String),
}

impl RenderError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RenderError::Engine(_))
    }
}
