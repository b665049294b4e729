//! MCP (Model Context Protocol) front end.
//!
//! Exposes one tool, `pdf_to_markdown`, over newline-delimited JSON-RPC 2.0
//! on stdio. The tool forwards to [`crate::convert`] and returns the
//! [`ConversionReport`] as JSON text, so an agent sees the same
//! `{success, output_path, page_count, images_extracted, error}` shape as
//! `pdfocr --json`.
//!
//! Tool failures (missing file, bad page range, API errors) are reported
//! inside the tool result with `isError: true`; JSON-RPC errors are kept
//! for protocol problems such as an unknown method or a missing argument.

use crate::config::ConversionConfig;
use crate::convert::convert;
use crate::output::{ConversionReport, ConvertRequest};
use crate::pipeline::enhance::EnhancementProfile;
use crate::prompts::OcrMode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

pub const TOOL_NAME: &str = "pdf_to_markdown";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;

/// JSON-RPC request. A missing `id` marks a notification.
#[derive(Debug, Deserialize)]
pub struct McpRequest {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct McpResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

#[derive(Debug, Serialize)]
pub struct McpError {
    pub code: i32,
    pub message: String,
}

impl McpResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(McpError { code, message }),
        }
    }
}

/// Arguments of `pdf_to_markdown`. Unset fields fall back to the server's
/// [`ConversionConfig`].
#[derive(Debug, Deserialize)]
pub struct PdfToMarkdownArgs {
    pub pdf_path: PathBuf,
    pub output_path: Option<PathBuf>,
    pub pages: Option<String>,
    pub dpi: Option<u32>,
    pub extract_images: Option<bool>,
    pub timeout: Option<u64>,
    pub ocr_mode: Option<String>,
    pub custom_prompt: Option<String>,
    pub enhance_images: Option<bool>,
}

impl PdfToMarkdownArgs {
    pub fn into_request(self) -> ConvertRequest {
        let mut request = ConvertRequest::new(self.pdf_path);
        request.output_path = self.output_path;
        request.page_range = self.pages.filter(|p| !p.trim().is_empty());
        request.dpi = self.dpi;
        request.extract_images = self.extract_images;
        request.timeout_secs = self.timeout;
        if let Some(mode) = self.ocr_mode {
            request.mode = mode;
        }
        request.custom_instruction = self.custom_prompt.filter(|p| !p.trim().is_empty());
        if self.enhance_images == Some(false) {
            request.enhancement = EnhancementProfile::disabled();
        }
        request
    }
}

/// Tool descriptors returned by `tools/list`.
pub fn list_tools() -> Vec<Value> {
    vec![json!({
        "name": TOOL_NAME,
        "description": "Convert a PDF to Markdown by OCR-ing each page with a vision model. \
                        Returns JSON with success, output_path, page_count, images_extracted \
                        and error.",
        "inputSchema": {
            "type": "object",
            "properties": {
                "pdf_path": { "type": "string", "description": "Absolute path to the PDF" },
                "output_path": { "type": "string", "description": "Markdown destination (default: <pdf stem>.md)" },
                "pages": { "type": "string", "description": "Page range such as \"1-5\" or \"1,3,5-7\"" },
                "dpi": { "type": "integer", "minimum": 72, "maximum": 600 },
                "extract_images": { "type": "boolean", "default": true },
                "timeout": { "type": "integer", "description": "Per-request timeout in seconds" },
                "ocr_mode": {
                    "type": "string",
                    "default": OcrMode::default().to_string(),
                    "description": "academic, table, formula, handwriting or general"
                },
                "custom_prompt": { "type": "string" },
                "enhance_images": { "type": "boolean", "default": true }
            },
            "required": ["pdf_path"]
        }
    })]
}

/// Request dispatcher holding the run-wide configuration.
pub struct McpServer {
    config: ConversionConfig,
}

impl McpServer {
    pub fn new(config: ConversionConfig) -> Self {
        Self { config }
    }

    /// Handle one request. Notifications get no response.
    pub async fn handle(&self, request: McpRequest) -> Option<McpResponse> {
        let Some(id) = request.id else {
            debug!("Notification: {}", request.method);
            return None;
        };

        let response = match request.method.as_str() {
            "initialize" => McpResponse::ok(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "serverInfo": {
                        "name": "pdfocr",
                        "version": env!("CARGO_PKG_VERSION")
                    },
                    "capabilities": { "tools": {} }
                }),
            ),
            "ping" => McpResponse::ok(id, json!({})),
            "tools/list" => McpResponse::ok(id, json!({ "tools": list_tools() })),
            "tools/call" => self.call_tool(id, request.params.unwrap_or(Value::Null)).await,
            other => {
                warn!("Unknown method: {}", other);
                McpResponse::err(id, METHOD_NOT_FOUND, format!("Method not found: {other}"))
            }
        };
        Some(response)
    }

    async fn call_tool(&self, id: Value, params: Value) -> McpResponse {
        let name = params.get("name").and_then(Value::as_str).unwrap_or("");
        if name != TOOL_NAME {
            return McpResponse::err(id, INVALID_PARAMS, format!("Unknown tool: {name}"));
        }

        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
        let args: PdfToMarkdownArgs = match serde_json::from_value(arguments) {
            Ok(a) => a,
            Err(e) => {
                return McpResponse::err(id, INVALID_PARAMS, format!("Invalid arguments: {e}"))
            }
        };

        info!("Tool {}: {}", TOOL_NAME, args.pdf_path.display());
        let report = convert(args.into_request(), &self.config).await;
        if !report.success {
            error!(
                "Tool {} failed: {}",
                TOOL_NAME,
                report.error.as_deref().unwrap_or("unknown error")
            );
        }
        McpResponse::ok(id, tool_result(&report))
    }
}

fn tool_result(report: &ConversionReport) -> Value {
    let text = serde_json::to_string_pretty(report).unwrap_or_else(|e| {
        json!({ "success": false, "error": format!("failed to serialise report: {e}") })
            .to_string()
    });
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": !report.success
    })
}

/// Serve newline-delimited JSON-RPC until `reader` reaches EOF.
///
/// Requests are handled one at a time; conversions are long-running and
/// share the rendering backend.
pub async fn serve<R, W>(server: &McpServer, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: McpRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                error!("Invalid JSON-RPC message: {}", e);
                continue;
            }
        };
        debug!("Received request: method={}", request.method);

        if let Some(response) = server.handle(request).await {
            let mut bytes = serde_json::to_vec(&response).map_err(std::io::Error::other)?;
            bytes.push(b'\n');
            writer.write_all(&bytes).await?;
            writer.flush().await?;
        }
    }
    Ok(())
}
