//! Headless viewer: open a document, show one page and its OCR text
//!
//! ```bash
//! folio scan.pdf --text scan.ocr.json --page 3 --output page3.png
//! folio scan.pdf --text scan.ocr.json --text-page 0
//! ```

use std::cell::RefCell;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{error, info};
use simplelog::{Config, LevelFilter, WriteLogger};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::LocalSet;

use folio::panic_handler::initialize_panic_handler;
use folio::pdf::MupdfBackend;
use folio::settings;
use folio::{
    DocumentSource, Navigation, PageTextSequence, PixelSurface, ViewerController, ViewerEvent,
    ViewerHandle,
};

#[derive(Parser, Debug)]
#[command(name = "folio", version, about = "Render a document page next to its OCR text")]
struct Args {
    /// File path, or a data:, blob:, http:// or https:// reference
    source: String,

    /// OCR text as a JSON array with one string per page
    #[arg(long)]
    text: Option<PathBuf>,

    /// 1-based document page to show
    #[arg(long, conflicts_with = "text_page")]
    page: Option<usize>,

    /// 0-based OCR text index to show
    #[arg(long)]
    text_page: Option<usize>,

    /// Render scale, overrides the config file
    #[arg(long)]
    scale: Option<f32>,

    /// Write the rendered page as PNG
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Config file (default: <config dir>/folio/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "folio.log")]
    log_file: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    WriteLogger::init(
        LevelFilter::Debug,
        Config::default(),
        File::create(&args.log_file)
            .with_context(|| format!("Failed to create log file {}", args.log_file.display()))?,
    )?;
    initialize_panic_handler();

    info!("Starting folio");

    match &args.config {
        Some(path) => settings::load_settings_from(path),
        None => settings::load_settings(),
    }
    if let Some(scale) = args.scale {
        settings::set_render_scale(scale);
    }

    let text = args
        .text
        .as_deref()
        .map(PageTextSequence::load)
        .transpose()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;
    let result = LocalSet::new().block_on(&runtime, view(&args, text.as_ref()));

    if let Err(err) = &result {
        error!("Application error: {err:?}");
    }
    info!("Shutting down folio");
    result
}

async fn view(args: &Args, text: Option<&PageTextSequence>) -> Result<()> {
    let surface = Rc::new(RefCell::new(PixelSurface::new()));
    let (controller, handle, mut events) =
        ViewerController::new(MupdfBackend::new(), surface.clone(), settings::viewer_config());
    let viewer = tokio::task::spawn_local(controller.run());

    open_source(&handle, &args.source)?;
    wait_for_page(&mut events).await?;

    let navigation = match (args.page, args.text_page) {
        (Some(page), _) => Some(Navigation::Page(page)),
        (None, Some(index)) => Some(Navigation::External(index)),
        (None, None) => None,
    };
    if let Some(navigation) = navigation {
        go_to(&handle, &mut events, navigation).await?;
    }

    let state = handle.state();
    if let Some(label) = state.page_label() {
        println!("Page {label}");
    }
    if let (Some(text), Some(pages), Some(page)) = (text, state.pagination, state.current_page) {
        if text.len() != pages.page_count() {
            println!(
                "(OCR text has {} pages, document has {})",
                text.len(),
                pages.page_count()
            );
        }
        println!("{}", pages.text_for(text, page));
    }

    if let Some(path) = &args.output {
        let image = surface
            .borrow()
            .to_image()
            .context("Nothing was rendered")?;
        image
            .save(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Saved {}", path.display());
    }

    drop(handle);
    viewer.await.context("Viewer task failed")?;
    Ok(())
}

fn open_source(handle: &ViewerHandle, source: &str) -> Result<()> {
    match DocumentSource::parse(source) {
        Ok(source) => handle.open(source),
        Err(_) if Path::new(source).exists() => {
            let bytes = fs::read(source).with_context(|| format!("Failed to read {source}"))?;
            handle.open_bytes(bytes);
        }
        // Let the viewer report the invalid reference
        Err(_) => handle.open_reference(source),
    }
    Ok(())
}

/// Navigate and wait for the result. Requests that resolve to the page
/// already shown do not render, so they are skipped here.
async fn go_to(
    handle: &ViewerHandle,
    events: &mut UnboundedReceiver<ViewerEvent>,
    navigation: Navigation,
) -> Result<()> {
    let state = handle.state();
    let (Some(pages), Some(current)) = (state.pagination, state.current_page) else {
        bail!("No document is loaded");
    };
    let target = match navigation {
        Navigation::Page(page) => pages.clamp(page),
        Navigation::External(index) => pages.to_internal(index),
        _ => return Ok(()),
    };
    if target == current {
        return Ok(());
    }

    handle.navigate(navigation);
    wait_for_page(events).await?;
    Ok(())
}

async fn wait_for_page(events: &mut UnboundedReceiver<ViewerEvent>) -> Result<usize> {
    match events.recv().await {
        Some(ViewerEvent::PageChanged(index)) => Ok(index),
        Some(ViewerEvent::Error(err)) => Err(err.into()),
        None => bail!("Viewer stopped unexpectedly"),
    }
}
