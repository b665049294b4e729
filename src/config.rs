//! Configuration for a PDF-to-Markdown OCR run.
//!
//! All run-wide behaviour is controlled through [`ConversionConfig`], built
//! once (via [`ConversionConfig::builder`] or [`ConversionConfig::from_env`])
//! and then passed by reference into every stage. Nothing reads the
//! environment after construction, so two differently-configured runs can
//! live side by side in one process.

use crate::error::OcrError;
use crate::progress::ProgressCallback;
use crate::retry::{RetryPolicy, MAX_RETRY_DELAY};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Primary environment variable for the API credential.
pub const API_KEY_VAR: &str = "PDFOCR_API_KEY";

/// Accepted as a fallback when [`API_KEY_VAR`] is unset.
pub const API_KEY_FALLBACK_VAR: &str = "DASHSCOPE_API_KEY";

/// Value shipped in `.env.example`; treated the same as a missing key.
const PLACEHOLDER_API_KEY: &str = "your_api_key_here";

pub const DEFAULT_API_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const DEFAULT_MODEL: &str = "qwen3-vl-flash";

pub const MIN_DPI: u32 = 72;
pub const MAX_DPI: u32 = 600;
pub const MIN_TIMEOUT_SECS: u64 = 1;
pub const MAX_TIMEOUT_SECS: u64 = 600;
pub const MAX_RETRY_ATTEMPTS: u32 = 20;
pub const MAX_RETRY_BACKOFF: f64 = 10.0;

/// Run-wide configuration.
#[derive(Clone)]
pub struct ConversionConfig {
    /// Bearer credential for the vision endpoint. Required.
    pub api_key: String,

    /// Base URL of an OpenAI-compatible API; `/chat/completions` is appended.
    pub api_base_url: String,

    /// Vision model identifier. Default: `qwen3-vl-flash`.
    pub model: String,

    /// Rendering DPI. Range: 72–600. Default: 200.
    pub dpi: u32,

    /// Cap on the longest rendered edge in pixels. Default: 6000.
    ///
    /// A 600-DPI render of an A0 poster would otherwise allocate several
    /// hundred megabytes for a single page.
    pub max_rendered_pixels: u32,

    /// Per-request timeout in seconds. Range: 1–600. Default: 60.
    ///
    /// Each retry gets a fresh window; the sum across retries is unbounded.
    pub timeout_secs: u64,

    /// Attempt budget and backoff schedule for each page.
    pub retry: RetryPolicy,

    /// Ask the endpoint to process images at full resolution. Default: true.
    pub high_resolution: bool,

    /// Sampling temperature forwarded to the endpoint, if set.
    pub temperature: Option<f32>,

    /// Output-length cap forwarded to the endpoint, if set.
    pub max_tokens: Option<u32>,

    /// Extract embedded and inline images into [`Self::image_subdir`]. Default: true.
    pub extract_images: bool,

    /// Name of the images directory next to the Markdown file. Default: `images`.
    pub image_subdir: String,

    /// Directory for the Markdown file when no explicit output path is given.
    /// Defaults to the directory holding the source PDF.
    pub output_dir: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Explicit pdfium shared library to bind instead of the platform search.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            dpi: 200,
            max_rendered_pixels: 6000,
            timeout_secs: 60,
            retry: RetryPolicy::default(),
            high_resolution: true,
            temperature: None,
            max_tokens: None,
            extract_images: true,
            image_subdir: "images".to_string(),
            output_dir: None,
            password: None,
            pdfium_lib_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("api_base_url", &self.api_base_url)
            .field("model", &self.model)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("timeout_secs", &self.timeout_secs)
            .field("retry", &self.retry)
            .field("high_resolution", &self.high_resolution)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("extract_images", &self.extract_images)
            .field("image_subdir", &self.image_subdir)
            .field("output_dir", &self.output_dir)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder seeded with the defaults.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Builder seeded from `PDFOCR_*` environment variables.
    ///
    /// Unset variables keep their defaults; set-but-unparseable ones are a
    /// configuration error. Call `.build()` to validate.
    pub fn builder_from_env() -> Result<ConversionConfigBuilder, OcrError> {
        let mut b = Self::builder();

        if let Some(key) = env_string(API_KEY_VAR).or_else(|| env_string(API_KEY_FALLBACK_VAR)) {
            b = b.api_key(key);
        }
        if let Some(url) = env_string("PDFOCR_API_BASE_URL") {
            b = b.api_base_url(url);
        }
        if let Some(model) = env_string("PDFOCR_MODEL") {
            b = b.model(model);
        }
        if let Some(dpi) = env_parse::<u32>("PDFOCR_DPI")? {
            b = b.dpi(dpi);
        }
        if let Some(secs) = env_parse::<u64>("PDFOCR_TIMEOUT")? {
            b = b.timeout_secs(secs);
        }
        if let Some(n) = env_parse::<u32>("PDFOCR_MAX_RETRIES")? {
            b = b.max_attempts(n);
        }
        if let Some(secs) = env_parse::<f64>("PDFOCR_RETRY_DELAY")? {
            let delay = Duration::try_from_secs_f64(secs).map_err(|_| {
                OcrError::InvalidConfig(format!(
                    "PDFOCR_RETRY_DELAY must be a non-negative number of seconds, got {secs}"
                ))
            })?;
            b = b.retry_delay(delay);
        }
        if let Some(f) = env_parse::<f64>("PDFOCR_RETRY_BACKOFF")? {
            b = b.retry_backoff(f);
        }
        if let Some(v) = env_bool("PDFOCR_HIGH_RESOLUTION")? {
            b = b.high_resolution(v);
        }
        if let Some(v) = env_bool("PDFOCR_EXTRACT_IMAGES")? {
            b = b.extract_images(v);
        }
        if let Some(dir) = env_string("PDFOCR_IMAGE_SUBDIR") {
            b = b.image_subdir(dir);
        }
        if let Some(t) = env_parse::<f32>("PDFOCR_TEMPERATURE")? {
            b = b.temperature(t);
        }
        if let Some(n) = env_parse::<u32>("PDFOCR_MAX_TOKENS")? {
            b = b.max_tokens(n);
        }
        if let Some(dir) = env_string("PDFOCR_OUTPUT_DIR") {
            b = b.output_dir(dir);
        }
        if let Some(path) = env_string("PDFIUM_LIB_PATH") {
            b = b.pdfium_lib_path(path);
        }

        Ok(b)
    }

    /// Load and validate the configuration from the environment.
    pub fn from_env() -> Result<Self, OcrError> {
        Self::builder_from_env()?.build()
    }

    /// Per-request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry.base_delay = delay;
        self
    }

    pub fn retry_backoff(mut self, factor: f64) -> Self {
        self.config.retry.backoff_multiplier = factor;
        self
    }

    pub fn high_resolution(mut self, v: bool) -> Self {
        self.config.high_resolution = v;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = Some(t);
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.max_tokens = Some(n);
        self
    }

    pub fn extract_images(mut self, v: bool) -> Self {
        self.config.extract_images = v;
        self
    }

    pub fn image_subdir(mut self, name: impl Into<String>) -> Self {
        self.config.image_subdir = name.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, OcrError> {
        let c = &self.config;

        let key = c.api_key.trim();
        if key.is_empty() || key == PLACEHOLDER_API_KEY {
            return Err(OcrError::MissingCredential {
                var: API_KEY_VAR.to_string(),
            });
        }
        validate_dpi(c.dpi)?;
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&c.timeout_secs) {
            return Err(OcrError::InvalidConfig(format!(
                "timeout must be {MIN_TIMEOUT_SECS}–{MAX_TIMEOUT_SECS} seconds, got {}",
                c.timeout_secs
            )));
        }
        if !(1..=MAX_RETRY_ATTEMPTS).contains(&c.retry.max_attempts) {
            return Err(OcrError::InvalidConfig(format!(
                "retry count must be 1–{MAX_RETRY_ATTEMPTS}, got {}",
                c.retry.max_attempts
            )));
        }
        if !(1.0..=MAX_RETRY_BACKOFF).contains(&c.retry.backoff_multiplier) {
            return Err(OcrError::InvalidConfig(format!(
                "retry backoff must be 1.0–{MAX_RETRY_BACKOFF}, got {}",
                c.retry.backoff_multiplier
            )));
        }
        if c.retry.base_delay > MAX_RETRY_DELAY {
            return Err(OcrError::InvalidConfig(format!(
                "retry delay must be at most {}s, got {:?}",
                MAX_RETRY_DELAY.as_secs(),
                c.retry.base_delay
            )));
        }
        if let Some(t) = c.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(OcrError::InvalidConfig(format!(
                    "temperature must be 0.0–2.0, got {t}"
                )));
            }
        }
        if c.image_subdir.is_empty() || c.image_subdir.contains(['/', '\\']) {
            return Err(OcrError::InvalidConfig(format!(
                "image subdirectory must be a single path component, got '{}'",
                c.image_subdir
            )));
        }
        if c.api_base_url.trim().is_empty() {
            return Err(OcrError::InvalidConfig("API base URL is empty".into()));
        }

        Ok(self.config)
    }
}

/// Reject a DPI outside 72–600.
pub fn validate_dpi(dpi: u32) -> Result<(), OcrError> {
    if (MIN_DPI..=MAX_DPI).contains(&dpi) {
        Ok(())
    } else {
        Err(OcrError::InvalidConfig(format!(
            "DPI must be {MIN_DPI}–{MAX_DPI}, got {dpi}"
        )))
    }
}

// ── Page range ───────────────────────────────────────────────────────────

/// Expand a page-range expression such as `"1-5"` or `"1,3,5-7"`.
///
/// Returns 1-based page numbers, sorted and de-duplicated. Pages outside
/// `1..=total_pages` are dropped silently; a reversed span (`"5-3"`) selects
/// nothing. `None`, an empty string or `"all"` selects every page.
/// Non-numeric tokens are a configuration error.
pub fn parse_page_range(expr: Option<&str>, total_pages: u32) -> Result<Vec<u32>, OcrError> {
    let expr = match expr.map(str::trim) {
        None | Some("") => return Ok((1..=total_pages).collect()),
        Some(s) if s.eq_ignore_ascii_case("all") => return Ok((1..=total_pages).collect()),
        Some(s) => s,
    };

    let bad = |reason: String| OcrError::InvalidPageRange {
        expr: expr.to_string(),
        reason,
    };
    let number = |tok: &str| -> Result<u32, OcrError> {
        tok.trim()
            .parse::<u32>()
            .map_err(|_| bad(format!("'{}' is not a page number", tok.trim())))
    };

    let mut pages = Vec::new();
    for part in expr.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (number(start)?, number(end)?);
                let (lo, hi) = (start.max(1), end.min(total_pages));
                if lo <= hi {
                    pages.extend(lo..=hi);
                }
            }
            None => {
                let p = number(part)?;
                if (1..=total_pages).contains(&p) {
                    pages.push(p);
                }
            }
        }
    }

    pages.sort_unstable();
    pages.dedup();
    Ok(pages)
}

// ── Environment helpers ──────────────────────────────────────────────────

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, OcrError> {
    match env_string(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            OcrError::InvalidConfig(format!("{name}: cannot parse '{raw}'"))
        }),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>, OcrError> {
    match env_string(name) {
        None => Ok(None),
        Some(raw) => parse_bool(&raw)
            .map(Some)
            .ok_or_else(|| OcrError::InvalidConfig(format!("{name}: expected true/false, got '{raw}'"))),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
