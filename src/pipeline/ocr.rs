//! Vision-OCR client: one page image plus a prompt in, one page of Markdown
//! out.
//!
//! The client speaks the OpenAI-compatible `chat/completions` protocol. A
//! single user message carries the image as a base64 data URL followed by
//! the prompt text; `vl_high_resolution_images` asks Qwen-VL class models
//! to keep full resolution instead of downscaling.
//!
//! ## Failure classification
//!
//! | Response                                      | Error                       |
//! |-----------------------------------------------|-----------------------------|
//! | HTTP 429 or a rate-limit message              | [`OcrError::RateLimited`]   |
//! | HTTP 401 or an authentication message         | [`OcrError::AuthFailed`]    |
//! | success with empty content                    | [`OcrError::EmptyResponse`] |
//! | anything else (timeouts, 5xx, bad JSON, ...)  | [`OcrError::Api`]           |
//!
//! All four are API errors and go through [`crate::retry::retry`]; a rate
//! limit waits for its own `retry_after` (the `Retry-After` header, else
//! 5 s) instead of the exponential delay.
//!
//! The HTTP layer sits behind [`VisionTransport`] so tests can script
//! responses without a network.

use crate::config::ConversionConfig;
use crate::error::OcrError;
use crate::output::{failure_marker, OcrPageResult};
use crate::pipeline::encode::encode_image_file;
use crate::retry::{retry, RetryPolicy};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio_stream::Stream;
use tracing::{debug, error, info, warn};

/// Wait applied to a rate limit that carries no `Retry-After` header.
pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(5);

static RATE_LIMIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(rate[ _-]?limit|too many requests|throttl|\b429\b)").unwrap()
});

static AUTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(auth|unauthori[sz]ed|invalid api[ _-]?key|\b401\b)").unwrap()
});

// ── Wire types ───────────────────────────────────────────────────────────

/// Body of a `chat/completions` request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub vl_high_resolution_images: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    ImageUrl { image_url: ImageUrl },
    Text { text: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ApiErrorBody>,
    message: Option<String>,
}

// ── Transport ────────────────────────────────────────────────────────────

/// What came back from one HTTP exchange, before classification.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    /// Parsed `Retry-After` header, if present.
    pub retry_after: Option<Duration>,
    pub body: String,
}

/// Sends one request to the vision endpoint.
///
/// `Err` means no HTTP response was received (connect failure, timeout);
/// the message is classified like a response body.
pub trait VisionTransport: Send + Sync {
    fn send(
        &self,
        request: &ChatRequest,
        timeout: Duration,
    ) -> impl Future<Output = Result<TransportResponse, String>> + Send;
}

/// `reqwest` transport with bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(api_base_url: &str, api_key: &str) -> Result<Self, OcrError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pdf-ocr-md/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OcrError::Api {
                status: None,
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", api_base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        })
    }
}

impl VisionTransport for HttpTransport {
    async fn send(
        &self,
        request: &ChatRequest,
        timeout: Duration,
    ) -> Result<TransportResponse, String> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    format!("request timed out after {}s", timeout.as_secs())
                } else {
                    format!("request failed: {}", e)
                }
            })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<f64>().ok())
            .and_then(|s| Duration::try_from_secs_f64(s).ok());
        let body = response
            .text()
            .await
            .map_err(|e| format!("failed to read response body: {}", e))?;

        Ok(TransportResponse {
            status,
            retry_after,
            body,
        })
    }
}

// ── Client ───────────────────────────────────────────────────────────────

/// Ordered per-page results produced lazily by [`VisionClient::ocr_stream`].
pub type PageStream<'a> = Pin<Box<dyn Stream<Item = OcrPageResult> + Send + 'a>>;

/// Vision-OCR client. One instance serves every page of a run.
pub struct VisionClient<T: VisionTransport = HttpTransport> {
    transport: Option<T>,
    model: String,
    high_resolution: bool,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl VisionClient<HttpTransport> {
    /// HTTP client for the endpoint and credential in `config`.
    pub fn from_config(config: &ConversionConfig) -> Result<Self, OcrError> {
        let transport = HttpTransport::new(&config.api_base_url, &config.api_key)?;
        info!(
            "OCR client ready: model={}, base_url={}, timeout={}s",
            config.model, config.api_base_url, config.timeout_secs
        );
        Ok(Self::with_transport(transport, config))
    }
}

impl<T: VisionTransport> VisionClient<T> {
    pub fn with_transport(transport: T, config: &ConversionConfig) -> Self {
        Self {
            transport: Some(transport),
            model: config.model.clone(),
            high_resolution: config.high_resolution,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: config.timeout(),
            retry: config.retry,
        }
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Release the connection pool. Safe to call more than once.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            info!("OCR client closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// Recognise one image file, retrying API failures.
    ///
    /// After the last attempt the classified error is returned unchanged.
    pub async fn ocr_image(&self, image_path: &Path, prompt: &str) -> Result<String, OcrError> {
        self.ocr_image_counted(image_path, prompt)
            .await
            .map(|(markdown, _)| markdown)
    }

    /// Like [`Self::ocr_image`] but also reports the attempts spent.
    async fn ocr_image_counted(
        &self,
        image_path: &Path,
        prompt: &str,
    ) -> Result<(String, u32), OcrError> {
        let encoded = encode_image_file(image_path)?;
        let request = self.build_request(encoded.data_url(), prompt);
        let label = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| image_path.display().to_string());

        debug!("OCR start: {}", label);
        let mut attempts = 0;
        let markdown = retry(&self.retry, &label, |attempt| {
            attempts = attempt;
            self.send_once(&request)
        })
        .await?;
        debug!("OCR done: {} ({} chars)", label, markdown.chars().count());
        Ok((markdown, attempts))
    }

    /// Recognise one page, turning a final failure into a marker result.
    pub async fn ocr_page(&self, page_num: u32, image_path: &Path, prompt: &str) -> OcrPageResult {
        let start = Instant::now();
        match self.ocr_image_counted(image_path, prompt).await {
            Ok((markdown, attempts)) => OcrPageResult::success(
                page_num,
                markdown,
                attempts,
                start.elapsed().as_millis() as u64,
            ),
            Err(e) => {
                error!("Page {}: OCR failed: {}", page_num, e);
                let attempts = if e.kind() == crate::error::ErrorKind::Api {
                    self.retry.max_attempts.max(1)
                } else {
                    0
                };
                OcrPageResult::failure(page_num, &e, attempts, start.elapsed().as_millis() as u64)
            }
        }
    }

    /// Recognise images strictly in input order.
    ///
    /// A failed image yields an `<!-- OCR 失败: ... -->` marker in its
    /// position; the output always has one entry per input.
    pub async fn ocr_images_batch(&self, image_paths: &[PathBuf], prompt: &str) -> Vec<String> {
        let total = image_paths.len();
        let mut results = Vec::with_capacity(total);
        for (i, path) in image_paths.iter().enumerate() {
            info!("OCR progress: {}/{}", i + 1, total);
            match self.ocr_image(path, prompt).await {
                Ok(markdown) => results.push(markdown),
                Err(e) => {
                    error!("Image {} OCR failed: {}", i + 1, e);
                    results.push(failure_marker(&e));
                }
            }
        }
        results
    }

    /// Lazily recognise `(page_num, image_path)` pairs, one at a time, in
    /// the order given.
    pub fn ocr_stream<'a>(&'a self, pages: Vec<(u32, PathBuf)>, prompt: &'a str) -> PageStream<'a> {
        let s = stream::iter(pages)
            .then(move |(page_num, path)| async move { self.ocr_page(page_num, &path, prompt).await });
        Box::pin(s)
    }

    fn build_request(&self, data_url: String, prompt: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                    ContentPart::Text {
                        text: prompt.to_string(),
                    },
                ],
            }],
            vl_high_resolution_images: self.high_resolution,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    async fn send_once(&self, request: &ChatRequest) -> Result<String, OcrError> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| OcrError::Internal("OCR client is closed".into()))?;

        match transport.send(request, self.timeout).await {
            Ok(resp) => classify_response(resp),
            Err(message) => Err(classify_failure(None, message, None)),
        }
    }
}

impl<T: VisionTransport> Drop for VisionClient<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Turn a raw response into page Markdown or a classified error.
fn classify_response(resp: TransportResponse) -> Result<String, OcrError> {
    if !(200..300).contains(&resp.status) {
        let message = error_message(&resp.body)
            .unwrap_or_else(|| format!("HTTP {}: {}", resp.status, truncate(&resp.body, 300)));
        return Err(classify_failure(Some(resp.status), message, resp.retry_after));
    }

    let parsed: ChatResponse = serde_json::from_str(&resp.body).map_err(|e| OcrError::Api {
        status: Some(resp.status),
        message: format!("malformed response: {}", e),
    })?;

    if let Some(err) = parsed.error {
        return Err(classify_failure(None, err.message, resp.retry_after));
    }

    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(content_text)
        .unwrap_or_default();

    if content.trim().is_empty() {
        warn!("OCR endpoint returned an empty completion");
        return Err(OcrError::EmptyResponse);
    }
    Ok(content)
}

/// Completion content is either a string or a list of typed parts.
fn content_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn error_message(body: &str) -> Option<String> {
    let env: ErrorEnvelope = serde_json::from_str(body).ok()?;
    env.error.map(|e| e.message).or(env.message)
}

/// Map a status and message to the error taxonomy.
pub fn classify_failure(
    status: Option<u16>,
    message: String,
    retry_after: Option<Duration>,
) -> OcrError {
    if status == Some(429) || RATE_LIMIT_RE.is_match(&message) {
        OcrError::RateLimited {
            retry_after: retry_after.unwrap_or(DEFAULT_RATE_LIMIT_WAIT),
            message,
        }
    } else if status == Some(401) || AUTH_RE.is_match(&message) {
        OcrError::AuthFailed { message }
    } else {
        OcrError::Api { status, message }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::encode::png_bytes;
    use image::{DynamicImage, RgbImage};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Replays scripted outcomes and records every request.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        pub script: Mutex<VecDeque<Result<TransportResponse, String>>>,
        pub seen: Mutex<Vec<serde_json::Value>>,
    }

    impl ScriptedTransport {
        pub fn new(script: Vec<Result<TransportResponse, String>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    impl VisionTransport for &ScriptedTransport {
        async fn send(
            &self,
            request: &ChatRequest,
            _timeout: Duration,
        ) -> Result<TransportResponse, String> {
            self.seen
                .lock()
                .unwrap()
                .push(serde_json::to_value(request).unwrap());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err("script exhausted".into()))
        }
    }

    pub(crate) fn ok(content: &str) -> Result<TransportResponse, String> {
        Ok(TransportResponse {
            status: 200,
            retry_after: None,
            body: serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": content } }]
            })
            .to_string(),
        })
    }

    pub(crate) fn status(code: u16, body: &str) -> Result<TransportResponse, String> {
        Ok(TransportResponse {
            status: code,
            retry_after: None,
            body: body.to_string(),
        })
    }

    fn config() -> ConversionConfig {
        ConversionConfig::builder()
            .api_key("sk-test")
            .temperature(0.1)
            .retry_delay(Duration::from_millis(1))
            .build()
            .unwrap()
    }

    fn staged_png(dir: &TempDir, name: &str) -> PathBuf {
        let p = dir.path().join(name);
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, image::Rgb([9, 9, 9])));
        std::fs::write(&p, png_bytes(&img).unwrap()).unwrap();
        p
    }

    #[tokio::test]
    async fn request_carries_image_prompt_and_flags() {
        let dir = TempDir::new().unwrap();
        let img = staged_png(&dir, "page_1.png");
        let transport = ScriptedTransport::new(vec![ok("# Title")]);
        let client = VisionClient::with_transport(&transport, &config());

        let md = client.ocr_image(&img, "qwenvl markdown").await.unwrap();
        assert_eq!(md, "# Title");

        let seen = transport.seen.lock().unwrap();
        let body = &seen[0];
        assert_eq!(body["model"], "qwen3-vl-flash");
        assert_eq!(body["vl_high_resolution_images"], true);
        assert!((body["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
        assert!(body.get("max_tokens").is_none());

        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["type"], "image_url");
        let url = content[0]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        assert!(!url.contains("page_1.png"));
        assert_eq!(content[1]["type"], "text");
        assert_eq!(content[1]["text"], "qwenvl markdown");
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let dir = TempDir::new().unwrap();
        let img = staged_png(&dir, "p.png");
        let transport = ScriptedTransport::new(vec![
            status(500, "internal error"),
            Err("request timed out after 60s".into()),
            ok("done"),
        ]);
        let client = VisionClient::with_transport(&transport, &config());

        assert_eq!(client.ocr_image(&img, "p").await.unwrap(), "done");
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn final_error_is_propagated_after_budget() {
        let dir = TempDir::new().unwrap();
        let img = staged_png(&dir, "p.png");
        let transport = ScriptedTransport::new(vec![
            status(401, r#"{"error":{"message":"Incorrect API key provided"}}"#),
            status(401, r#"{"error":{"message":"Incorrect API key provided"}}"#),
            status(401, r#"{"error":{"message":"Incorrect API key provided"}}"#),
            ok("never reached"),
        ]);
        let client = VisionClient::with_transport(&transport, &config());

        let err = client.ocr_image(&img, "p").await.unwrap_err();
        assert!(matches!(err, OcrError::AuthFailed { .. }), "got {err:?}");
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_header_sets_the_wait() {
        let dir = TempDir::new().unwrap();
        let img = staged_png(&dir, "p.png");
        let transport = ScriptedTransport::new(vec![
            Ok(TransportResponse {
                status: 429,
                retry_after: Some(Duration::from_secs(7)),
                body: r#"{"error":{"message":"Too many requests"}}"#.into(),
            }),
            ok("after the wait"),
        ]);
        let config = ConversionConfig::builder()
            .api_key("sk-test")
            .retry_delay(Duration::from_secs(1))
            .build()
            .unwrap();
        let client = VisionClient::with_transport(&transport, &config);

        let start = tokio::time::Instant::now();
        let result = client.ocr_page(1, &img, "p").await;
        let waited = start.elapsed();

        assert!(result.is_ok());
        assert_eq!(result.attempts, 2);
        assert_eq!(transport.calls(), 2);
        assert!(waited >= Duration::from_secs(7), "waited {waited:?}");
        assert!(waited < Duration::from_secs(8), "waited {waited:?}");
    }

    #[tokio::test]
    async fn empty_content_is_an_error() {
        let dir = TempDir::new().unwrap();
        let img = staged_png(&dir, "p.png");
        let transport = ScriptedTransport::new(vec![ok("   "), ok(""), ok("")]);
        let client = VisionClient::with_transport(&transport, &config());
        assert!(matches!(
            client.ocr_image(&img, "p").await.unwrap_err(),
            OcrError::EmptyResponse
        ));
    }

    #[tokio::test]
    async fn missing_image_is_not_retried() {
        let transport = ScriptedTransport::new(vec![]);
        let client = VisionClient::with_transport(&transport, &config());
        let err = client
            .ocr_image(Path::new("/nowhere/page.png"), "p")
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::ImageFile { .. }));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn batch_keeps_order_and_marks_failures() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<PathBuf> = (1..=3)
            .map(|i| staged_png(&dir, &format!("p{i}.png")))
            .collect();
        let transport = ScriptedTransport::new(vec![
            ok("one"),
            status(500, "boom"),
            status(500, "boom"),
            status(500, "boom"),
            ok("three"),
        ]);
        let client = VisionClient::with_transport(&transport, &config());

        let out = client.ocr_images_batch(&paths, "p").await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], "one");
        assert!(out[1].starts_with("<!-- OCR 失败: "), "got {}", out[1]);
        assert_eq!(out[2], "three");
    }

    #[tokio::test]
    async fn stream_yields_in_page_order() {
        let dir = TempDir::new().unwrap();
        let pages: Vec<(u32, PathBuf)> = [4u32, 7]
            .iter()
            .map(|&p| (p, staged_png(&dir, &format!("page_{p}.png"))))
            .collect();
        let transport = ScriptedTransport::new(vec![ok("four"), ok("seven")]);
        let client = VisionClient::with_transport(&transport, &config());

        let results: Vec<OcrPageResult> = client.ocr_stream(pages, "p").collect().await;
        assert_eq!(results.iter().map(|r| r.page_num).collect::<Vec<_>>(), vec![4, 7]);
        assert_eq!(results[1].markdown, "seven");
        assert!(results.iter().all(OcrPageResult::is_ok));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_further_calls() {
        let dir = TempDir::new().unwrap();
        let img = staged_png(&dir, "p.png");
        let transport = ScriptedTransport::new(vec![ok("x")]);
        let mut client = VisionClient::with_transport(&transport, &config());
        client.close();
        client.close();
        assert!(client.is_closed());
        assert!(client.ocr_image(&img, "p").await.is_err());
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn classification() {
        assert!(matches!(
            classify_failure(Some(429), "slow down".into(), None),
            OcrError::RateLimited { retry_after, .. } if retry_after == DEFAULT_RATE_LIMIT_WAIT
        ));
        assert!(matches!(
            classify_failure(Some(400), "Rate limit exceeded".into(), Some(Duration::from_secs(2))),
            OcrError::RateLimited { retry_after, .. } if retry_after == Duration::from_secs(2)
        ));
        assert!(matches!(
            classify_failure(None, "Authentication failed".into(), None),
            OcrError::AuthFailed { .. }
        ));
        assert!(matches!(
            classify_failure(Some(500), "failed to generate output".into(), None),
            OcrError::Api { status: Some(500), .. }
        ));
    }

    #[test]
    fn content_parts_are_joined() {
        let v = serde_json::json!([{ "type": "text", "text": "a" }, { "type": "text", "text": "b" }]);
        assert_eq!(content_text(v), "ab");
    }
}
