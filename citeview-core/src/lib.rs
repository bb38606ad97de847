//! Citation-to-passage navigation: open the file behind a chat citation on
//! the most relevant page and highlight the text that was cited.

pub mod binder;
pub mod citation;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod highlight;
pub mod loader;
pub mod matcher;
pub mod relevance;
pub mod resolver;
pub mod stopwords;
pub mod transport;

#[cfg(test)]
mod testing;

pub use binder::{Activation, ChatNotice, CitationBinder, NoticeSink};
pub use citation::{ChatAnswer, Citation};
pub use config::{RelevanceMode, SourceConfig, ViewerConfig};
pub use controller::{
    ActiveDocument, Command, OpenOutcome, ViewerController, ViewerEvent, ViewerSnapshot,
    ViewerState,
};
pub use engine::{
    NormalizedRect, RenderEngine, RenderImage, RenderRequest, RenderedDocument, RenderedPage,
    TextRun,
};
pub use error::{FetchError, RenderError, ResolutionError};
pub use highlight::{CitationHighlighter, HighlighterMemo};
pub use loader::FileLoader;
pub use matcher::{FuzzyLineMatcher, SIMILARITY_THRESHOLD};
pub use relevance::{LocalRelevance, PageTextIndex};
pub use resolver::PageResolver;
pub use stopwords::is_stopword;
pub use transport::{DirectoryTransport, FileBytes, FileTransport, RelevanceTransport};
