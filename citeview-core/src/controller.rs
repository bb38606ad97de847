use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::citation::Citation;
use crate::engine::{RenderEngine, RenderRequest, RenderedDocument, RenderedPage};
use crate::error::{FetchError, RenderError};
use crate::highlight::{CitationHighlighter, HighlighterMemo};
use crate::loader::FileLoader;
use crate::resolver::PageResolver;
use crate::transport::FileBytes;

/// Page shown when the relevance lookup fails.
pub const FALLBACK_PAGE: u32 = 1;

#[derive(Debug, Clone)]
pub struct ActiveDocument {
    pub file_name: String,
    pub bytes: FileBytes,
    pub page_count: Option<u32>,
    pub current_page: u32,
    pub highlight_source: String,
}

impl ActiveDocument {
    fn upper_bound(&self) -> u32 {
        self.page_count.unwrap_or(self.current_page).max(1)
    }

    fn clamp_page(&self, page: u32) -> u32 {
        page.clamp(1, self.upper_bound())
    }
}

#[derive(Debug, Clone)]
pub enum ViewerState {
    Closed,
    Opening { citation: Citation },
    Open(ActiveDocument),
}

/// What a host needs to paint the viewer chrome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewerSnapshot {
    pub is_open: bool,
    pub is_loading: bool,
    pub file_name: Option<String>,
    pub current_page: Option<u32>,
    pub page_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerEvent {
    OpeningStarted { file_name: String },
    Opened { file_name: String, page: u32 },
    OpenFailed { file_name: String },
    Closed,
    RedrawNeeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    NextPage,
    PreviousPage,
    GotoPage { page: u32 },
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened { page: u32 },
    /// Another open or a close happened while this request was in flight.
    Superseded,
}

struct Mounted {
    bytes: FileBytes,
    document: Arc<dyn RenderedDocument>,
}

struct ViewerInner {
    state: ViewerState,
    generation: u64,
    highlighter: HighlighterMemo,
    mounted: Option<Mounted>,
}

impl ViewerInner {
    fn discard_active(&mut self) {
        self.highlighter.clear();
    }

    fn active_mut(&mut self) -> Option<&mut ActiveDocument> {
        match &mut self.state {
            ViewerState::Open(doc) => Some(doc),
            _ => None,
        }
    }
}

/// Single-document viewer state machine. Every transition goes through one
/// mutex that is never held across an await or an engine call.
#[derive(Clone)]
pub struct ViewerController {
    inner: Arc<Mutex<ViewerInner>>,
    loader: FileLoader,
    resolver: PageResolver,
    engine: Arc<dyn RenderEngine>,
    events: Arc<Mutex<Vec<ViewerEvent>>>,
}

impl ViewerController {
    pub fn new(loader: FileLoader, resolver: PageResolver, engine: Arc<dyn RenderEngine>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ViewerInner {
                state: ViewerState::Closed,
                generation: 0,
                highlighter: HighlighterMemo::new(),
                mounted: None,
            })),
            loader,
            resolver,
            engine,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn drain_events(&self) -> Vec<ViewerEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn loader(&self) -> &FileLoader {
        &self.loader
    }

    pub fn state(&self) -> ViewerState {
        self.inner.lock().state.clone()
    }

    pub fn active(&self) -> Option<ActiveDocument> {
        match &self.inner.lock().state {
            ViewerState::Open(doc) => Some(doc.clone()),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> ViewerSnapshot {
        match &self.inner.lock().state {
            ViewerState::Closed => ViewerSnapshot::default(),
            ViewerState::Opening { citation } => ViewerSnapshot {
                is_loading: true,
                file_name: Some(citation.file_name.clone()),
                ..ViewerSnapshot::default()
            },
            ViewerState::Open(doc) => ViewerSnapshot {
                is_open: true,
                is_loading: false,
                file_name: Some(doc.file_name.clone()),
                current_page: Some(doc.current_page),
                page_count: doc.page_count,
            },
        }
    }

    /// Highlighter for the open document, built once per excerpt.
    pub fn highlighter(&self) -> Option<Arc<CitationHighlighter>> {
        let mut inner = self.inner.lock();
        let source = match &inner.state {
            ViewerState::Open(doc) => doc.highlight_source.clone(),
            _ => return None,
        };
        Some(inner.highlighter.get(&source))
    }

    /// Replaces whatever is open (or opening) with `citation`. Fetch and page
    /// lookup run concurrently; a failed lookup opens on the first page, a
    /// failed fetch leaves the viewer closed.
    #[instrument(skip(self, citation), fields(file_name = %citation.file_name))]
    pub async fn open_citation(&self, citation: Citation) -> Result<OpenOutcome, FetchError> {
        let generation = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.discard_active();
            inner.state = ViewerState::Opening {
                citation: citation.clone(),
            };
            inner.generation
        };
        self.push_event(ViewerEvent::OpeningStarted {
            file_name: citation.file_name.clone(),
        });

        let resolve = async {
            match self
                .resolver
                .resolve_page(&citation.file_name, &citation.excerpt)
                .await
            {
                Ok(page) => Ok::<u32, FetchError>(page),
                Err(err) => {
                    warn!(%err, "page lookup failed, opening on page {FALLBACK_PAGE}");
                    Ok(FALLBACK_PAGE)
                }
            }
        };
        let joined = tokio::try_join!(self.loader.load(&citation.file_name), resolve);

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            debug!("discarding result of superseded open request");
            return Ok(OpenOutcome::Superseded);
        }

        match joined {
            Ok((bytes, page)) => {
                inner.highlighter.get(&citation.excerpt);
                inner.state = ViewerState::Open(ActiveDocument {
                    file_name: citation.file_name.clone(),
                    bytes,
                    page_count: None,
                    current_page: page,
                    highlight_source: citation.excerpt,
                });
                drop(inner);
                info!(page, "document opened");
                self.push_event(ViewerEvent::Opened {
                    file_name: citation.file_name,
                    page,
                });
                self.push_event(ViewerEvent::RedrawNeeded);
                Ok(OpenOutcome::Opened { page })
            }
            Err(err) => {
                inner.state = ViewerState::Closed;
                drop(inner);
                warn!(%err, "failed to open document");
                self.push_event(ViewerEvent::OpenFailed {
                    file_name: citation.file_name,
                });
                Err(err)
            }
        }
    }

    /// Closes the viewer and cancels any open in flight. Cached bytes stay.
    pub fn close(&self) {
        let was_closed = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.discard_active();
            inner.mounted = None;
            let was_closed = matches!(inner.state, ViewerState::Closed);
            inner.state = ViewerState::Closed;
            was_closed
        };
        if !was_closed {
            self.push_event(ViewerEvent::Closed);
        }
    }

    pub fn goto_page(&self, page: u32) -> Option<u32> {
        self.update_page(|doc| doc.clamp_page(page))
    }

    pub fn next_page(&self) -> Option<u32> {
        self.update_page(|doc| {
            if doc.current_page < doc.upper_bound() {
                doc.current_page + 1
            } else {
                doc.current_page
            }
        })
    }

    pub fn previous_page(&self) -> Option<u32> {
        self.update_page(|doc| doc.current_page.saturating_sub(1).max(1))
    }

    /// Records the total reported by the engine and pulls the current page
    /// back into range.
    pub fn on_page_count_known(&self, count: u32) {
        if self.record_page_count(count) {
            self.push_event(ViewerEvent::RedrawNeeded);
        }
    }

    /// Returns whether the count or the clamped page changed.
    fn record_page_count(&self, count: u32) -> bool {
        if count == 0 {
            warn!("ignoring empty page count");
            return false;
        }
        let mut inner = self.inner.lock();
        let Some(doc) = inner.active_mut() else {
            return false;
        };
        let before = (doc.page_count, doc.current_page);
        doc.page_count = Some(count);
        doc.current_page = doc.clamp_page(doc.current_page);
        before != (doc.page_count, doc.current_page)
    }

    pub fn apply(&self, command: Command) {
        match command {
            Command::NextPage => {
                self.next_page();
            }
            Command::PreviousPage => {
                self.previous_page();
            }
            Command::GotoPage { page } => {
                self.goto_page(page);
            }
            Command::Close => self.close(),
        }
    }

    /// Paints the current page of the open document. The engine parses a
    /// buffer once and is only remounted when the buffer identity changes.
    /// Fatal engine failures close the viewer.
    pub fn render(&self, width: u32, height: u32) -> Result<Option<RenderedPage>, RenderError> {
        let (generation, bytes, highlighter, mounted) = {
            let mut inner = self.inner.lock();
            let (bytes, source) = match &inner.state {
                ViewerState::Open(doc) => (Arc::clone(&doc.bytes), doc.highlight_source.clone()),
                _ => return Ok(None),
            };
            let highlighter = inner.highlighter.get(&source);
            let mounted = inner
                .mounted
                .as_ref()
                .filter(|mounted| Arc::ptr_eq(&mounted.bytes, &bytes))
                .map(|mounted| Arc::clone(&mounted.document));
            (inner.generation, bytes, highlighter, mounted)
        };

        let document = match mounted {
            Some(document) => document,
            None => {
                debug!(size = bytes.len(), "mounting rendering engine");
                let document = self
                    .engine
                    .load(Arc::clone(&bytes))
                    .map_err(|err| self.render_failed(generation, err))?;
                let mut inner = self.inner.lock();
                if inner.generation == generation {
                    inner.mounted = Some(Mounted {
                        bytes: Arc::clone(&bytes),
                        document: Arc::clone(&document),
                    });
                }
                document
            }
        };

        self.page_count_known_for(&bytes, document.page_count());

        let page_number = match &self.inner.lock().state {
            ViewerState::Open(doc) if Arc::ptr_eq(&doc.bytes, &bytes) => doc.current_page,
            _ => return Ok(None),
        };
        let request = RenderRequest {
            page_number,
            width,
            height,
        };
        document
            .render_page(request, &|fragment: &str| highlighter.highlight(fragment))
            .map(Some)
            .map_err(|err| self.render_failed(generation, err))
    }

    /// The render in progress already paints the clamped page, so learning
    /// the count here does not ask for another redraw.
    fn page_count_known_for(&self, bytes: &FileBytes, count: u32) {
        let current = matches!(
            &self.inner.lock().state,
            ViewerState::Open(doc) if Arc::ptr_eq(&doc.bytes, bytes) && doc.page_count != Some(count)
        );
        if current {
            self.record_page_count(count);
        }
    }

    fn render_failed(&self, generation: u64, err: RenderError) -> RenderError {
        if err.is_fatal() {
            error!(%err, "rendering engine failed, closing viewer");
            let current = self.inner.lock().generation == generation;
            if current {
                self.close();
            }
        } else {
            warn!(%err, "page render failed");
        }
        err
    }

    fn update_page(&self, next: impl FnOnce(&ActiveDocument) -> u32) -> Option<u32> {
        let (page, changed) = {
            let mut inner = self.inner.lock();
            let doc = inner.active_mut()?;
            let page = next(doc);
            let changed = page != doc.current_page;
            doc.current_page = page;
            (page, changed)
        };
        if changed {
            self.push_event(ViewerEvent::RedrawNeeded);
        }
        Some(page)
    }

    fn push_event(&self, event: ViewerEvent) {
        self.events.lock().push(event);
    }
}
