use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use citeview_core::{
    Activation, ChatAnswer, ChatNotice, CitationBinder, DirectoryTransport, FileLoader,
    FileTransport, LocalRelevance, NoticeSink, PageResolver, RelevanceMode, RelevanceTransport,
    RenderEngine, SourceConfig, ViewerConfig, ViewerController, ViewerEvent,
};
use citeview_http::HttpTransport;
use citeview_render::PdfiumEngine;
use citeview_tty::{
    format_status, paint_highlights, write_status_line, DrawParams, EventMapper, KittyRenderer,
    UiEvent,
};
use crossterm::cursor;
use crossterm::event;
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use parking_lot::Mutex;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "citeview",
    version,
    about = "Open chat citations on the cited page, highlighted, in kitty"
)]
struct Args {
    /// Chat answer JSON carrying the citations in `metadata`
    answer: PathBuf,

    /// Citation to open on start (1-based)
    #[arg(short = 'c', long = "citation")]
    citation: Option<usize>,

    /// Configuration file (defaults to config.toml in the platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// API root of the chat backend
    #[arg(long, conflicts_with = "files_dir")]
    base_url: Option<String>,

    /// Read files from this folder instead of the backend
    #[arg(long)]
    files_dir: Option<PathBuf>,

    /// Pick the relevant page in-process instead of asking the backend
    #[arg(long)]
    local_relevance: bool,

    /// List the answer's citations and exit
    #[arg(long)]
    list: bool,

    /// Open the citation and print the highlighted text of its page
    #[arg(long)]
    print: bool,

    /// Render width in pixels when the terminal does not report one
    #[arg(long, default_value_t = 1200)]
    width: u32,

    /// Render height in pixels when the terminal does not report one
    #[arg(long, default_value_t = 1600)]
    height: u32,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let raw = fs::read_to_string(&args.answer)
        .with_context(|| format!("failed to read answer {:?}", args.answer))?;
    let answer = ChatAnswer::from_json(&raw)
        .with_context(|| format!("failed to parse answer {:?}", args.answer))?;

    if args.list {
        let mut stdout = io::stdout().lock();
        for (index, citation) in answer.metadata.iter().enumerate() {
            writeln!(stdout, "{}. {}", index + 1, citation.label())?;
        }
        return Ok(());
    }
    if answer.metadata.is_empty() {
        bail!("answer {:?} carries no citations", args.answer);
    }

    let project_dirs = ProjectDirs::from("net", "citeview", "citeview")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs, args.print)?;

    let config = load_config(&args, &project_dirs)?;
    info!(source = ?config.source, relevance = ?config.relevance, "starting");

    let engine: Arc<dyn RenderEngine> =
        Arc::new(PdfiumEngine::new(config.pdfium_library_path.as_deref())?);
    let (files, remote) = build_transports(&config)?;
    let loader = FileLoader::new(files);
    let relevance: Arc<dyn RelevanceTransport> = match (config.relevance, remote) {
        (RelevanceMode::Remote, Some(remote)) => remote,
        _ => Arc::new(LocalRelevance::new(loader.clone(), Arc::clone(&engine))),
    };
    let controller = ViewerController::new(loader.clone(), PageResolver::new(relevance), engine);

    let notices = Arc::new(Mutex::new(Vec::<ChatNotice>::new()));
    let sink: Arc<dyn NoticeSink> = {
        let notices = Arc::clone(&notices);
        Arc::new(move |notice: ChatNotice| notices.lock().push(notice))
    };
    let binder = CitationBinder::new(controller, sink);

    if !config.preload.is_empty() {
        let cached = loader.preload(&config.preload).await;
        info!(cached, requested = config.preload.len(), "preloaded files");
    }

    if args.print {
        let number = args.citation.unwrap_or(1);
        return print_citation(&binder, &answer, number, &notices, args.width, args.height).await;
    }

    run_viewer(binder, answer, notices, &args).await
}

fn load_config(args: &Args, project_dirs: &ProjectDirs) -> Result<ViewerConfig> {
    let mut config = match &args.config {
        Some(path) => ViewerConfig::load(path)?,
        None => ViewerConfig::load_or_default(&project_dirs.config_dir().join("config.toml"))?,
    };
    config.apply_env();

    if let Some(base_url) = &args.base_url {
        config.source = SourceConfig::Http {
            base_url: base_url.clone(),
        };
    }
    if let Some(root) = &args.files_dir {
        config.source = SourceConfig::Directory { root: root.clone() };
    }
    if args.local_relevance {
        config.relevance = RelevanceMode::Local;
    }
    Ok(config)
}

/// A local folder has no relevance endpoint, so it always pairs with
/// in-process page picking.
fn build_transports(
    config: &ViewerConfig,
) -> Result<(Arc<dyn FileTransport>, Option<Arc<dyn RelevanceTransport>>)> {
    match &config.source {
        SourceConfig::Http { base_url } => {
            let http = Arc::new(HttpTransport::new(base_url.clone(), config.request_timeout)?);
            let files: Arc<dyn FileTransport> = http.clone();
            let relevance: Arc<dyn RelevanceTransport> = http;
            Ok((files, Some(relevance)))
        }
        SourceConfig::Directory { root } => {
            if !root.is_dir() {
                bail!("files directory {:?} does not exist", root);
            }
            let files: Arc<dyn FileTransport> = Arc::new(DirectoryTransport::new(root.clone()));
            Ok((files, None))
        }
    }
}

async fn print_citation(
    binder: &CitationBinder,
    answer: &ChatAnswer,
    number: usize,
    notices: &Mutex<Vec<ChatNotice>>,
    width: u32,
    height: u32,
) -> Result<()> {
    let citation = answer
        .citation(number)
        .cloned()
        .ok_or_else(|| anyhow!("citation {number} out of range (answer has {})", answer.metadata.len()))?;
    let label = citation.label();

    match binder.activate(citation).await {
        Activation::Opened { page } => {
            let rendered = binder
                .controller()
                .render(width, height)?
                .ok_or_else(|| anyhow!("viewer closed before {label} could be rendered"))?;
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "# {label} (page {page})")?;
            writeln!(stdout, "{}", rendered.markup())?;
            Ok(())
        }
        Activation::Reported => {
            let notice = notices
                .lock()
                .last()
                .map(|notice| notice.content.clone())
                .unwrap_or_default();
            Err(anyhow!(notice))
        }
        Activation::Superseded => Err(anyhow!("opening {label} was superseded")),
    }
}

enum LoopAction {
    ContinueRedraw,
    Continue,
    Quit,
}

struct ViewerLoop {
    binder: CitationBinder,
    answer: ChatAnswer,
    notices: Arc<Mutex<Vec<ChatNotice>>>,
    notices_seen: usize,
    status_notice: Option<String>,
    fallback_width: u32,
    fallback_height: u32,
}

async fn run_viewer(
    binder: CitationBinder,
    answer: ChatAnswer,
    notices: Arc<Mutex<Vec<ChatNotice>>>,
    args: &Args,
) -> Result<()> {
    let mut state = ViewerLoop {
        binder,
        answer,
        notices,
        notices_seen: 0,
        status_notice: None,
        fallback_width: args.width,
        fallback_height: args.height,
    };
    if let Some(number) = args.citation {
        state.open(number);
    }

    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide)?;
    let mut renderer = KittyRenderer::new(stdout);
    let mut event_mapper = EventMapper::new();
    let mut dirty = true;

    renderer.clear_all()?;

    loop {
        if state.collect_updates() {
            dirty = true;
        }

        if dirty {
            let pending = event_mapper.pending_input();
            state.redraw(&mut renderer, pending.as_deref())?;
            dirty = false;
        }

        if event::poll(Duration::from_millis(100))? {
            let ev = event::read()?;
            let ui_event = event_mapper.map_event(ev);
            match state.handle_event(ui_event) {
                LoopAction::ContinueRedraw => dirty = true,
                LoopAction::Continue => {
                    let pending = event_mapper.pending_input();
                    state.draw_status(&mut renderer, pending.as_deref())?;
                }
                LoopAction::Quit => break,
            }
        }
    }

    renderer.delete_image()?;
    renderer.clear_all()?;
    Ok(())
}

impl ViewerLoop {
    fn controller(&self) -> &ViewerController {
        self.binder.controller()
    }

    fn open(&mut self, number: usize) {
        let Some(citation) = self.answer.citation(number).cloned() else {
            self.status_notice = Some(format!(
                "no citation {number} (answer has {})",
                self.answer.metadata.len()
            ));
            return;
        };
        self.status_notice = None;
        let binder = self.binder.clone();
        tokio::spawn(async move {
            binder.activate(citation).await;
        });
    }

    fn retry(&mut self) {
        let Some(notice) = self.notices.lock().last().cloned() else {
            return;
        };
        self.status_notice = None;
        let binder = self.binder.clone();
        tokio::spawn(async move {
            binder.retry(&notice).await;
        });
    }

    /// Pulls controller events and new chat notices; true when the screen
    /// is stale.
    fn collect_updates(&mut self) -> bool {
        let mut stale = false;
        for event in self.controller().drain_events() {
            match event {
                ViewerEvent::OpenFailed { file_name } => {
                    warn!(file_name, "open failed");
                    stale = true;
                }
                ViewerEvent::Opened { .. } => {
                    self.status_notice = None;
                    stale = true;
                }
                ViewerEvent::OpeningStarted { .. }
                | ViewerEvent::Closed
                | ViewerEvent::RedrawNeeded => stale = true,
            }
        }

        let notices = self.notices.lock();
        if notices.len() > self.notices_seen {
            self.notices_seen = notices.len();
            if let Some(notice) = notices.last() {
                self.status_notice = Some(format!("{} (r to retry)", notice.content));
            }
            stale = true;
        }
        stale
    }

    fn handle_event(&mut self, event: UiEvent) -> LoopAction {
        match event {
            UiEvent::Command(command) => {
                self.controller().apply(command);
                LoopAction::ContinueRedraw
            }
            UiEvent::OpenCitation { number } => {
                self.open(number);
                LoopAction::ContinueRedraw
            }
            UiEvent::Retry => {
                self.retry();
                LoopAction::ContinueRedraw
            }
            UiEvent::Quit => LoopAction::Quit,
            UiEvent::None => LoopAction::Continue,
        }
    }

    fn redraw(
        &mut self,
        renderer: &mut KittyRenderer<io::Stdout>,
        pending_input: Option<&str>,
    ) -> Result<()> {
        let window = terminal::window_size()?;
        let total_cols = u32::from(window.columns).max(1);
        let total_rows = u32::from(window.rows).max(1);
        let image_rows = total_rows.saturating_sub(1).max(1);
        let (pixel_width, pixel_height) = if window.width > 0 && window.height > 0 {
            let cell_height = u32::from(window.height) / total_rows;
            (u32::from(window.width), cell_height * image_rows)
        } else {
            (self.fallback_width, self.fallback_height)
        };

        renderer.begin_sync_update()?;
        match self.controller().render(pixel_width, pixel_height) {
            Ok(Some(page)) => {
                let rects: Vec<_> = page.highlighted_runs().filter_map(|run| run.bounds).collect();
                let mut image = page.image;
                paint_highlights(&mut image, rects);
                let (draw_cols, draw_rows) = fit_cells(
                    image.width,
                    image.height,
                    (total_cols, image_rows),
                    (u32::from(window.width), u32::from(window.height)),
                    total_rows,
                );
                let start_col = total_cols.saturating_sub(draw_cols) / 2;
                renderer.clear_all()?;
                {
                    let mut writer = renderer.writer();
                    crossterm::execute!(&mut writer, cursor::MoveTo(start_col as u16, 0))?;
                }
                renderer.draw(&image, DrawParams::clamped(draw_cols, draw_rows))?;
            }
            Ok(None) => {
                renderer.delete_image()?;
                renderer.clear_all()?;
            }
            Err(err) => {
                warn!(%err, "failed to render page");
                self.status_notice = Some(err.to_string());
                if err.is_fatal() {
                    renderer.delete_image()?;
                    renderer.clear_all()?;
                }
            }
        }
        self.draw_status(renderer, pending_input)?;
        renderer.end_sync_update()?;
        Ok(())
    }

    fn draw_status(
        &self,
        renderer: &mut KittyRenderer<io::Stdout>,
        pending_input: Option<&str>,
    ) -> Result<()> {
        let window = terminal::window_size()?;
        let status_row = window.rows.saturating_sub(1);
        let status = format_status(
            &self.controller().snapshot(),
            pending_input,
            self.status_notice.as_deref(),
        );
        let mut writer = renderer.writer();
        crossterm::execute!(
            &mut writer,
            cursor::MoveTo(0, status_row),
            Clear(ClearType::CurrentLine)
        )?;
        write_status_line(&mut writer, &status)?;
        Ok(())
    }
}

/// Cells the page should cover: as large as fits the available area while
/// keeping the image's aspect ratio.
fn fit_cells(
    image_width: u32,
    image_height: u32,
    (available_cols, available_rows): (u32, u32),
    (pixel_width, pixel_height): (u32, u32),
    total_rows: u32,
) -> (u32, u32) {
    if image_width == 0 || image_height == 0 {
        return (available_cols.max(1), available_rows.max(1));
    }

    // Cells are rarely square; without a reported pixel size assume 1:2.
    let cell_aspect = if pixel_width > 0 && pixel_height > 0 {
        let cell_width = pixel_width as f32 / available_cols.max(1) as f32;
        let cell_height = pixel_height as f32 / total_rows.max(1) as f32;
        cell_height / cell_width
    } else {
        2.0
    };

    let ratio = image_width as f32 / image_height as f32 * cell_aspect;
    let mut cols = available_cols as f32;
    let mut rows = (cols / ratio).round().max(1.0);
    if rows > available_rows as f32 {
        rows = available_rows as f32;
        cols = (rows * ratio).round().max(1.0);
    }

    (
        (cols as u32).clamp(1, available_cols.max(1)),
        (rows as u32).clamp(1, available_rows.max(1)),
    )
}

fn init_logging(project_dirs: &ProjectDirs, with_stderr: bool) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "citeview.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // The kitty image shares stdout/stderr with the terminal, so console
    // output is only safe in headless mode.
    let console_layer = with_stderr.then(|| tracing_subscriber::fmt::layer().with_writer(io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
