use std::io::{self, Write};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use citeview_core::{Command, NormalizedRect, RenderImage, ViewerSnapshot};
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyModifiers},
    terminal::{Clear, ClearType},
};
use png::{BitDepth, ColorType, Encoder};

/// Tint painted over text the citation highlighter marked.
pub const HIGHLIGHT_COLOR: [u8; 3] = [255, 220, 0];
pub const HIGHLIGHT_ALPHA: f32 = 0.35;

pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
    placement_id: u32,
}

pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
            placement_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Transmits `image` as PNG and places it at the cursor, replacing the
    /// previous page.
    pub fn draw(&mut self, image: &RenderImage, params: DrawParams) -> Result<()> {
        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&image.pixels)?;
        writer.finish()?;

        let encoded = BASE64.encode(&buffer);
        let mut chunks = encoded.as_bytes().chunks(4096).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = u8::from(chunks.peek().is_some());
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p={},c={},r={},s={},v={},z=-1,m={}",
                    self.image_id,
                    self.placement_id,
                    params.columns,
                    params.rows,
                    image.width,
                    image.height,
                    more
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", more)?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Drops the page image and frees its data on the terminal side.
    pub fn delete_image(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=I,i={},q=2\u{1b}\\", self.image_id)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// The terminal paints everything buffered since `begin_sync_update` at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Command(Command),
    /// 1-based citation number in the loaded answer.
    OpenCitation { number: usize },
    Retry,
    Quit,
    None,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    char_stack: String,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event
        else {
            return UiEvent::None;
        };

        match (code, modifiers) {
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            (KeyCode::Char('g'), KeyModifiers::NONE) if self.char_stack == "g" => {
                self.reset_char_stack();
                let page = self.take_count();
                UiEvent::Command(Command::GotoPage { page: to_page(page) })
            }
            (KeyCode::Char('g'), KeyModifiers::NONE) => {
                self.push_char('g');
                UiEvent::None
            }
            (KeyCode::Char('G'), _) | (KeyCode::End, _) => {
                self.reset_char_stack();
                let page = self.pending_count.take().map_or(u32::MAX, to_page);
                self.reset_count();
                UiEvent::Command(Command::GotoPage { page })
            }
            (KeyCode::Home, _) => {
                self.reset();
                UiEvent::Command(Command::GotoPage { page: 1 })
            }
            (KeyCode::Char('j'), KeyModifiers::NONE)
            | (KeyCode::Right, _)
            | (KeyCode::Down, _)
            | (KeyCode::PageDown, _) => {
                self.reset();
                UiEvent::Command(Command::NextPage)
            }
            (KeyCode::Char('k'), KeyModifiers::NONE)
            | (KeyCode::Left, _)
            | (KeyCode::Up, _)
            | (KeyCode::PageUp, _) => {
                self.reset();
                UiEvent::Command(Command::PreviousPage)
            }
            (KeyCode::Char('o'), KeyModifiers::NONE) | (KeyCode::Enter, _) => {
                self.reset_char_stack();
                let number = self.take_count();
                UiEvent::OpenCitation { number }
            }
            (KeyCode::Char('x'), _) | (KeyCode::Esc, _) => {
                self.reset();
                UiEvent::Command(Command::Close)
            }
            (KeyCode::Char('r'), KeyModifiers::NONE) => {
                self.reset();
                UiEvent::Retry
            }
            (KeyCode::Char('q'), _) => {
                self.reset();
                UiEvent::Quit
            }
            (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.reset();
                UiEvent::Quit
            }
            _ => {
                self.reset();
                UiEvent::None
            }
        }
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    fn push_char(&mut self, c: char) {
        self.char_stack.push(c);
    }

    fn reset_char_stack(&mut self) {
        self.char_stack.clear();
    }

    fn reset(&mut self) {
        self.reset_count();
        self.reset_char_stack();
    }

    pub fn pending_input(&self) -> Option<String> {
        let pending = format!("{}{}", self.pending_digits, self.char_stack);
        if pending.is_empty() {
            None
        } else {
            Some(pending)
        }
    }
}

fn to_page(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX).max(1)
}

/// Text for the bottom row: the viewer chrome, then any pending key input,
/// then the latest notice.
pub fn format_status(
    snapshot: &ViewerSnapshot,
    pending_input: Option<&str>,
    notice: Option<&str>,
) -> String {
    let mut parts = Vec::new();
    match (&snapshot.file_name, snapshot.is_loading, snapshot.is_open) {
        (Some(file_name), true, _) => parts.push(format!("{file_name} | loading...")),
        (Some(file_name), false, true) => {
            let page = snapshot.current_page.unwrap_or(1);
            let total = snapshot
                .page_count
                .map_or_else(|| "?".to_string(), |count| count.to_string());
            parts.push(format!("{file_name} | page {page}/{total}"));
        }
        _ => parts.push("no document open".to_string()),
    }
    if let Some(pending) = pending_input.filter(|s| !s.is_empty()) {
        parts.push(pending.to_string());
    }
    if let Some(notice) = notice.filter(|s| !s.is_empty()) {
        parts.push(notice.to_string());
    }
    parts.join(" | ")
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelRect {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

/// Tints every rectangle on the page image.
pub fn paint_highlights(image: &mut RenderImage, rects: impl IntoIterator<Item = NormalizedRect>) {
    if image.width == 0 || image.height == 0 {
        return;
    }
    for rect in rects {
        if let Some(rect) = to_pixel_rect(rect, image.width, image.height) {
            fill_rect(image, rect, HIGHLIGHT_COLOR, HIGHLIGHT_ALPHA);
        }
    }
}

fn to_pixel_rect(rect: NormalizedRect, width: u32, height: u32) -> Option<PixelRect> {
    let rect = rect.clamp();
    let width_f = width as f32;
    let height_f = height as f32;

    let x0 = (rect.left * width_f).floor() as u32;
    let x1 = ((rect.right * width_f).ceil() as u32).min(width);
    let y0 = (rect.top * height_f).floor() as u32;
    let y1 = ((rect.bottom * height_f).ceil() as u32).min(height);

    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(PixelRect { x0, y0, x1, y1 })
}

fn fill_rect(image: &mut RenderImage, rect: PixelRect, color: [u8; 3], alpha: f32) {
    let width = image.width as usize;
    let x1 = rect.x1.min(image.width);
    let y1 = rect.y1.min(image.height);
    let x0 = rect.x0.min(x1);
    let y0 = rect.y0.min(y1);

    for y in y0..y1 {
        let row_start = (y as usize) * width * 4;
        for x in x0..x1 {
            let idx = row_start + (x as usize) * 4;
            if let Some(pixel) = image.pixels.get_mut(idx..idx + 4) {
                blend_pixel(pixel, color, alpha);
            }
        }
    }
}

fn blend_pixel(pixel: &mut [u8], color: [u8; 3], alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    let inv = 1.0 - alpha;
    for (channel, target) in pixel.iter_mut().zip(color) {
        *channel = ((*channel as f32 * inv) + (target as f32 * alpha))
            .round()
            .clamp(0.0, 255.0) as u8;
    }
}
