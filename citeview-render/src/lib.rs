use std::convert::TryFrom;
use std::mem;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use citeview_core::{
    FileBytes, NormalizedRect, RenderEngine, RenderError, RenderImage, RenderRequest,
    RenderedDocument, RenderedPage, TextRun,
};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

pub struct PdfiumEngine {
    pdfium: Arc<Pdfium>,
}

impl PdfiumEngine {
    /// Binds to `library_path` when given, otherwise to a library next to the
    /// working directory or the system one.
    pub fn new(library_path: Option<&Path>) -> Result<Self> {
        let pdfium = match library_path.and_then(bind_pdfium_at) {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

impl RenderEngine for PdfiumEngine {
    #[instrument(skip_all, fields(size = bytes.len()))]
    fn load(&self, bytes: FileBytes) -> Result<Arc<dyn RenderedDocument>, RenderError> {
        let document = self
            .pdfium
            .load_pdf_from_byte_vec(bytes.to_vec(), None)
            .map_err(|err| RenderError::Engine(format!("failed to parse document: {err}")))?;
        // SAFETY: the document borrows the bindings owned by `self.pdfium`. The
        // Arc is cloned into PdfiumDocument, and `document` is declared before
        // `pdfium` there, so it is dropped first and the borrow never outlives
        // the bindings.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        let page_count = u32::from(document.pages().len());
        debug!(page_count, "parsed document");
        Ok(Arc::new(PdfiumDocument {
            document: Mutex::new(document),
            page_count,
            pdfium: Arc::clone(&self.pdfium),
        }))
    }
}

struct PdfiumDocument {
    document: Mutex<PdfDocument<'static>>,
    page_count: u32,
    #[allow(dead_code)]
    pdfium: Arc<Pdfium>,
}

impl PdfiumDocument {
    fn with_page<R>(
        &self,
        page_number: u32,
        f: impl FnOnce(&PdfPage<'_>) -> Result<R, RenderError>,
    ) -> Result<R, RenderError> {
        let index = page_index(page_number, self.page_count)?;
        let document = self.document.lock();
        let page = document.pages().get(index).map_err(|err| RenderError::Page {
            page: page_number,
            message: err.to_string(),
        })?;
        f(&page)
    }
}

impl RenderedDocument for PdfiumDocument {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    #[instrument(skip(self, highlight))]
    fn render_page(
        &self,
        request: RenderRequest,
        highlight: &dyn Fn(&str) -> String,
    ) -> Result<RenderedPage, RenderError> {
        let page_number = request.page_number;
        let page_error = |message: String| RenderError::Page {
            page: page_number,
            message,
        };

        self.with_page(page_number, |page| {
            let config = PdfRenderConfig::new()
                .set_target_width(to_pixels(request.width))
                .set_maximum_height(to_pixels(request.height));
            let bitmap = page
                .render_with_config(&config)
                .map_err(|err| page_error(err.to_string()))?;
            let image = RenderImage {
                width: u32::try_from(bitmap.width()).unwrap_or_default(),
                height: u32::try_from(bitmap.height()).unwrap_or_default(),
                pixels: bitmap.as_image().to_rgba8().into_raw(),
            };

            let text_runs = text_runs(page, highlight).unwrap_or_else(|err| {
                warn!(page = page_number, %err, "failed to read text layer");
                Vec::new()
            });

            Ok(RenderedPage {
                page_number,
                image,
                text_runs,
            })
        })
    }

    fn page_text(&self, page_number: u32) -> Result<String, RenderError> {
        self.with_page(page_number, |page| {
            let text = page.text().map_err(|err| RenderError::Page {
                page: page_number,
                message: format!("failed to extract text: {err}"),
            })?;
            Ok(text.all())
        })
    }
}

/// Emits one run per text segment, each passed through the highlight hook.
fn text_runs(
    page: &PdfPage<'_>,
    highlight: &dyn Fn(&str) -> String,
) -> Result<Vec<TextRun>, PdfiumError> {
    let page_width = page.width().value;
    let page_height = page.height().value;
    let text = page.text()?;

    let mut runs = Vec::new();
    for segment in text.segments().iter() {
        let content = segment.text();
        if content.is_empty() {
            continue;
        }
        let bounds = segment.bounds();
        let rect = if page_width > 0.0 && page_height > 0.0 {
            Some(
                NormalizedRect {
                    left: bounds.left().value / page_width,
                    right: bounds.right().value / page_width,
                    top: 1.0 - bounds.top().value / page_height,
                    bottom: 1.0 - bounds.bottom().value / page_height,
                }
                .clamp(),
            )
            .filter(NormalizedRect::is_valid)
        } else {
            None
        };
        let markup = highlight(&content);
        runs.push(TextRun {
            text: content,
            markup,
            bounds: rect,
        });
    }
    Ok(runs)
}

fn page_index(page_number: u32, page_count: u32) -> Result<PdfPageIndex, RenderError> {
    if page_number == 0 || page_number > page_count {
        return Err(RenderError::Page {
            page: page_number,
            message: format!("out of range (document has {page_count} pages)"),
        });
    }
    PdfPageIndex::try_from(page_number - 1).map_err(|_| RenderError::Page {
        page: page_number,
        message: "out of supported range".to_string(),
    })
}

fn to_pixels(value: u32) -> i32 {
    i32::try_from(value.max(1)).unwrap_or(i32::MAX)
}

fn bind_pdfium_at(path: &Path) -> Option<Pdfium> {
    match Pdfium::bind_to_library(path) {
        Ok(bindings) => Some(Pdfium::new(bindings)),
        Err(err) => {
            warn!(
                "failed to load Pdfium from configured path {}: {}",
                path.display(),
                err
            );
            None
        }
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");

    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; ensure it is installed ({})",
                errors.join(", ")
            ))
        }
    }
}
