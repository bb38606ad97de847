use std::sync::Arc;

use crate::error::RenderError;
use crate::highlight::MARK_OPEN;
use crate::transport::FileBytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderRequest {
    /// 1-based.
    pub page_number: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Rectangle in page space, each coordinate in `0.0..=1.0`, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl NormalizedRect {
    pub fn clamp(self) -> Self {
        Self {
            left: self.left.clamp(0.0, 1.0),
            top: self.top.clamp(0.0, 1.0),
            right: self.right.clamp(0.0, 1.0),
            bottom: self.bottom.clamp(0.0, 1.0),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.right > self.left && self.bottom > self.top
    }
}

/// One text run emitted while painting a page, after the highlight hook ran.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub markup: String,
    pub bounds: Option<NormalizedRect>,
}

impl TextRun {
    pub fn is_highlighted(&self) -> bool {
        self.markup != self.text && self.markup.starts_with(MARK_OPEN)
    }
}

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub page_number: u32,
    pub image: RenderImage,
    pub text_runs: Vec<TextRun>,
}

impl RenderedPage {
    pub fn highlighted_runs(&self) -> impl Iterator<Item = &TextRun> {
        self.text_runs.iter().filter(|run| run.is_highlighted())
    }

    /// The page's text layer as markup, one run per line.
    pub fn markup(&self) -> String {
        self.text_runs
            .iter()
            .map(|run| run.markup.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The external document engine: parses a buffer once, then paints pages.
pub trait RenderEngine: Send + Sync {
    fn load(&self, bytes: FileBytes) -> Result<Arc<dyn RenderedDocument>, RenderError>;
}

pub trait RenderedDocument: Send + Sync {
    fn page_count(&self) -> u32;

    /// Paints one page, passing every text run it emits through `highlight`.
    fn render_page(
        &self,
        request: RenderRequest,
        highlight: &dyn Fn(&str) -> String,
    ) -> Result<RenderedPage, RenderError>;

    fn page_text(&self, page_number: u32) -> Result<String, RenderError>;
}
