//! In-process fakes for transports and the rendering engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::engine::{
    RenderEngine, RenderImage, RenderRequest, RenderedDocument, RenderedPage, TextRun,
};
use crate::error::{FetchError, RenderError, ResolutionError};
use crate::transport::{FileBytes, FileTransport, RelevanceTransport};

#[derive(Default)]
pub struct MemoryTransport {
    files: Mutex<HashMap<String, Vec<u8>>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    calls: AtomicUsize,
}

impl MemoryTransport {
    pub fn with_file(name: &str, bytes: &[u8]) -> Self {
        let transport = Self::default();
        transport.insert(name, bytes);
        transport
    }

    pub fn insert(&self, name: &str, bytes: &[u8]) {
        self.files.lock().insert(name.to_owned(), bytes.to_vec());
    }

    /// Holds fetches of `name` until the returned handle is notified.
    pub fn gate(&self, name: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates
            .lock()
            .insert(name.to_owned(), Arc::clone(&notify));
        notify
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileTransport for MemoryTransport {
    async fn fetch(&self, file_name: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().get(file_name).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.files
            .lock()
            .get(file_name)
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                file_name: file_name.to_owned(),
            })
    }
}

pub struct FixedRelevance {
    answer: Result<i64, ResolutionError>,
    delay: Duration,
}

impl FixedRelevance {
    pub fn page(page: i64) -> Self {
        Self {
            answer: Ok(page),
            delay: Duration::ZERO,
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: Err(ResolutionError::Status {
                status: 500,
                message: "relevance service down".into(),
            }),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl RelevanceTransport for FixedRelevance {
    async fn relevant_page(&self, _: &str, _: &str) -> Result<i64, ResolutionError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.answer.clone()
    }
}

pub struct FakeEngine {
    pages: Vec<String>,
    loads: AtomicUsize,
    fatal: bool,
}

impl FakeEngine {
    pub fn with_pages(pages: Vec<&str>) -> Self {
        Self {
            pages: pages.into_iter().map(str::to_owned).collect(),
            loads: AtomicUsize::new(0),
            fatal: false,
        }
    }

    pub fn broken() -> Self {
        Self {
            fatal: true,
            ..Self::with_pages(vec!["unreadable"])
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl RenderEngine for FakeEngine {
    fn load(&self, _bytes: FileBytes) -> Result<Arc<dyn RenderedDocument>, RenderError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fatal {
            return Err(RenderError::Engine("corrupt document".into()));
        }
        Ok(Arc::new(FakeDocument {
            pages: self.pages.clone(),
        }))
    }
}

struct FakeDocument {
    pages: Vec<String>,
}

impl RenderedDocument for FakeDocument {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn render_page(
        &self,
        request: RenderRequest,
        highlight: &dyn Fn(&str) -> String,
    ) -> Result<RenderedPage, RenderError> {
        let text = self.page_text(request.page_number)?;
        let text_runs = text
            .lines()
            .map(|line| TextRun {
                text: line.to_owned(),
                markup: highlight(line),
                bounds: None,
            })
            .collect();
        Ok(RenderedPage {
            page_number: request.page_number,
            image: RenderImage {
                width: request.width,
                height: request.height,
                pixels: vec![255; (request.width * request.height * 4) as usize],
            },
            text_runs,
        })
    }

    fn page_text(&self, page_number: u32) -> Result<String, RenderError> {
        page_number
            .checked_sub(1)
            .and_then(|idx| self.pages.get(idx as usize))
            .cloned()
            .ok_or(RenderError::Page {
                page: page_number,
                message: "out of range".into(),
            })
    }
}
