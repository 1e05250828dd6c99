//! MCP over stdin/stdout.
//!
//! One JSON-RPC message (or batch) per line in, one response per line out.
//! stdout carries nothing but protocol frames; logs go to stderr.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::mcp::{McpDispatcher, Principal, SessionState};

/// Serves the dispatcher on the process' stdin and stdout until stdin closes.
pub async fn run_stdio(dispatcher: McpDispatcher) -> Result<()> {
    info!("Serving MCP over stdio");
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve_lines(&dispatcher, stdin, stdout).await?;
    info!("stdin closed, exiting");
    Ok(())
}

pub async fn serve_lines<R, W>(dispatcher: &McpDispatcher, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut session = SessionState::connection(Principal::Stdio);
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await.context("Failed to read from stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        debug!("stdio <<< {}", line);

        if let Some(response) = dispatcher.handle_text(&mut session, line).await {
            let mut frame = response.to_string();
            debug!("stdio >>> {}", frame);
            frame.push('\n');
            writer
                .write_all(frame.as_bytes())
                .await
                .context("Failed to write to stdout")?;
            writer.flush().await.context("Failed to flush stdout")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bigquery::{InMemoryBackend, SchemaField, TableKind};
    use crate::mcp::RateLimitConfig;
    use serde_json::Value;
    use std::sync::Arc;

    fn dispatcher() -> McpDispatcher {
        let backend = InMemoryBackend::new("test-project").with_table(
            "sales",
            "orders",
            TableKind::Table,
            vec![SchemaField::new("id", "INTEGER")],
        );
        McpDispatcher::new(Arc::new(backend), RateLimitConfig::default())
    }

    async fn run(input: &str) -> Vec<Value> {
        let mut output: Vec<u8> = Vec::new();
        serve_lines(&dispatcher(), input.as_bytes(), &mut output)
            .await
            .unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn one_response_per_request_line() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
        );
        let responses = run(input).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[0]["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(responses[1]["id"], 2);
        assert_eq!(responses[1]["result"]["tools"][0]["name"], "query");
    }

    #[tokio::test]
    async fn requires_initialize_first() {
        let input = concat!(r#"{"jsonrpc":"2.0","id":1,"method":"resources/list"}"#, "\n");
        let responses = run(input).await;
        assert_eq!(responses[0]["error"]["code"], -32600);
        assert_eq!(responses[0]["error"]["message"], "Not initialized");
    }

    #[tokio::test]
    async fn garbage_line_gets_parse_error() {
        let responses = run("this is not json\n").await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["error"]["code"], -32700);
        assert!(responses[0]["id"].is_null());
    }
}
