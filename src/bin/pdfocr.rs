//! CLI binary for pdf-ocr-md.
//!
//! Maps flags onto `ConversionConfig` / `ConvertRequest`, drives a progress
//! bar from the conversion callbacks and prints the result.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf_ocr_md::config::{MAX_DPI, MIN_DPI};
use pdf_ocr_md::{
    convert, page_count, ConversionConfig, ConversionProgressCallback, ConversionReport,
    ConvertRequest, EnhancementProfile, OcrMode, ProgressCallback,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Progress bar plus one log line per finished page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<u32, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_conversion_start` reports the page total.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Counting pages, extracting embedded images…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("OCR");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: u32) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&page_num)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Rendering and recognising {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: u32, _total: usize) {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(page_num, Instant::now());
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: u32, total: usize, markdown_len: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{markdown_len:>5} bytes")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: u32, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['…']).collect()
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let failed = self.errors.load(Ordering::SeqCst);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages recognised",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages recognised  ({} failed, marked in the output)",
                if success_count == 0 { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Whole document, Markdown next to the PDF
  pdfocr paper.pdf

  # Selected pages into a specific file
  pdfocr paper.pdf --pages 1-3,7 -o out/paper.md

  # Formula-heavy pages with an extra instruction
  pdfocr thesis.pdf --mode formula --custom-prompt "Number every equation"

  # Page count only (no API key needed)
  pdfocr --inspect-only paper.pdf

  # Machine-readable result
  pdfocr --json paper.pdf > report.json

MODES:
  document   general documents
  academic   papers: headings, formulae, tables, figures (default)
  table      table-heavy pages
  formula    formula-heavy pages, LaTeX output
  mixed      detect each element type automatically

ENVIRONMENT VARIABLES (also read from .env):
  PDFOCR_API_KEY          API key (fallback: DASHSCOPE_API_KEY)
  PDFOCR_API_BASE_URL     OpenAI-compatible base URL
  PDFOCR_MODEL            Vision model (default: qwen3-vl-flash)
  PDFOCR_DPI              Rendering DPI (default: 200)
  PDFOCR_TIMEOUT          Per-request timeout in seconds (default: 60)
  PDFOCR_MAX_RETRIES      Attempts per page (default: 3)
  PDFOCR_RETRY_DELAY      First retry delay in seconds (default: 1.0)
  PDFOCR_RETRY_BACKOFF    Delay multiplier (default: 2.0)
  PDFOCR_EXTRACT_IMAGES   Save embedded and inline images (default: true)
  PDFOCR_IMAGE_SUBDIR     Images directory name (default: images)
  PDFIUM_LIB_PATH         Path to libpdfium
"#;

/// Convert PDF files to Markdown with a vision OCR model.
#[derive(Parser, Debug)]
#[command(
    name = "pdfocr",
    version,
    about = "Convert PDF files to Markdown with a vision OCR model",
    long_about = "Render each PDF page, send it to a vision language model through an \
OpenAI-compatible endpoint (Qwen-VL by default), and assemble the recognised pages into \
one Markdown file with the document's images saved alongside.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF file to convert.
    input: PathBuf,

    /// Markdown output path. Default: <output dir>/<input stem>.md
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory for the Markdown file and images when -o is not given.
    #[arg(long, env = "PDFOCR_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Page selection: 5, 3-15, or 1,3,5-7. Default: all pages.
    #[arg(short, long)]
    pages: Option<String>,

    /// Rendering DPI (72–600).
    #[arg(long, env = "PDFOCR_DPI",
          value_parser = clap::value_parser!(u32).range(MIN_DPI as i64..=MAX_DPI as i64))]
    dpi: Option<u32>,

    /// Recognition mode: document, academic, table, formula, mixed.
    #[arg(short, long, default_value = "academic")]
    mode: String,

    /// Extra instructions appended to the mode prompt.
    #[arg(long)]
    custom_prompt: Option<String>,

    /// Vision model identifier.
    #[arg(long, env = "PDFOCR_MODEL")]
    model: Option<String>,

    /// Skip image enhancement before OCR.
    #[arg(long)]
    no_enhance: bool,

    /// Contrast factor (1.0 = unchanged).
    #[arg(long, default_value_t = 1.2)]
    contrast: f32,

    /// Sharpness factor (1.0 = unchanged).
    #[arg(long, default_value_t = 1.5)]
    sharpness: f32,

    /// Brightness factor (1.0 = unchanged).
    #[arg(long, default_value_t = 1.0)]
    brightness: f32,

    /// Skip the median denoise pass.
    #[arg(long)]
    no_denoise: bool,

    /// Do not save embedded or inline images.
    #[arg(long)]
    no_extract_images: bool,

    /// Per-request timeout in seconds (1–600).
    #[arg(long, env = "PDFOCR_TIMEOUT")]
    timeout: Option<u64>,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "PDFOCR_TEMPERATURE")]
    temperature: Option<f32>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDFOCR_PASSWORD")]
    password: Option<String>,

    /// Print the conversion report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Print the page count only, no conversion.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if cli.mode.parse::<OcrMode>().is_err() {
        tracing::warn!(
            "Unknown mode '{}'; using it as a free-form instruction",
            cli.mode
        );
    }

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let config = ConversionConfig {
            password: cli.password.clone(),
            pdfium_lib_path: std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from),
            ..ConversionConfig::default()
        };
        let pages = page_count(&cli.input, &config)
            .await
            .with_context(|| format!("Failed to inspect {}", cli.input.display()))?;

        if cli.json {
            let value = serde_json::json!({
                "file": cli.input,
                "page_count": pages,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&value).context("Failed to serialise page count")?
            );
        } else {
            println!("File:   {}", cli.input.display());
            println!("Pages:  {}", pages);
        }
        return Ok(());
    }

    // ── Build config and request ─────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;
    let request = build_request(&cli);

    // ── Run conversion ───────────────────────────────────────────────────
    let report = tokio::select! {
        report = convert(request, &config) => report,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n{} Interrupted; no Markdown file was written", red("✘"));
            std::process::exit(130);
        }
    };

    print_report(&cli, &report)?;

    if !report.success {
        let message = report.error.as_deref().unwrap_or("unknown error");
        anyhow::bail!("Conversion failed: {}", message);
    }
    Ok(())
}

/// Environment first, then explicit flags.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder_from_env().context("Invalid environment")?;

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(dpi) = cli.dpi {
        builder = builder.dpi(dpi);
    }
    if let Some(secs) = cli.timeout {
        builder = builder.timeout_secs(secs);
    }
    if let Some(t) = cli.temperature {
        builder = builder.temperature(t);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(ref dir) = cli.output_dir {
        builder = builder.output_dir(dir.clone());
    }
    if cli.no_extract_images {
        builder = builder.extract_images(false);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn build_request(cli: &Cli) -> ConvertRequest {
    let mut request = ConvertRequest::new(&cli.input);
    request.output_path = cli.output.clone();
    request.page_range = cli.pages.clone();
    request.mode = cli.mode.clone();
    request.custom_instruction = cli.custom_prompt.clone();
    request.enhancement = EnhancementProfile {
        enabled: !cli.no_enhance,
        contrast: cli.contrast,
        sharpness: cli.sharpness,
        brightness: cli.brightness,
        denoise: !cli.no_denoise,
    };
    request
}

fn print_report(cli: &Cli, report: &ConversionReport) -> Result<()> {
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).context("Failed to serialise report")?
        );
        return Ok(());
    }
    if cli.quiet || !report.success {
        return Ok(());
    }

    let path = report
        .output_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    eprintln!(
        "{}  {} pages  {} images  {}ms  →  {}",
        if report.failed_pages.is_empty() { green("✔") } else { cyan("⚠") },
        report.page_count.unwrap_or(0),
        report.images_extracted.unwrap_or(0),
        report.processing_time_ms,
        bold(&path),
    );
    if !report.failed_pages.is_empty() {
        eprintln!(
            "   {} {:?}",
            dim("failed pages (marked in the output):"),
            report.failed_pages
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn enhancement_flags_map_to_profile() {
        let cli = Cli::parse_from([
            "pdfocr",
            "doc.pdf",
            "--no-denoise",
            "--contrast",
            "1.0",
            "--pages",
            "2-3",
            "--mode",
            "table",
        ]);
        let req = build_request(&cli);
        assert!(req.enhancement.enabled);
        assert!(!req.enhancement.denoise);
        assert_eq!(req.enhancement.contrast, 1.0);
        assert_eq!(req.page_range.as_deref(), Some("2-3"));
        assert_eq!(req.mode, "table");
    }

    #[test]
    fn dpi_out_of_range_is_rejected_by_clap() {
        assert!(Cli::try_parse_from(["pdfocr", "doc.pdf", "--dpi", "700"]).is_err());
    }
}
