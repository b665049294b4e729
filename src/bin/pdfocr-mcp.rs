//! `pdfocr-mcp`: MCP server exposing the `pdf_to_markdown` tool on stdio.
//!
//! Configuration comes from the environment (and `.env`), as for `pdfocr`;
//! MCP clients usually pass `PDFOCR_API_KEY` through their `env` block.
//! stdout carries JSON-RPC only, so all logging goes to stderr.

use anyhow::{Context, Result};
use pdf_ocr_md::mcp::{serve, McpServer};
use pdf_ocr_md::ConversionConfig;
use tokio::io::{self, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = ConversionConfig::from_env().context(
        "Invalid configuration; set PDFOCR_API_KEY (or DASHSCOPE_API_KEY) in the MCP client's env",
    )?;

    tracing::info!("pdfocr MCP server starting (model={})", config.model);
    let server = McpServer::new(config);
    serve(&server, BufReader::new(io::stdin()), io::stdout())
        .await
        .context("stdio transport failed")?;
    tracing::info!("pdfocr MCP server shutting down");
    Ok(())
}
