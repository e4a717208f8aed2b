// Crossfire MCP Server - remote JavaScript debugging via Model Context Protocol
//
// Provides LLM-friendly debugging tools for browsers running a Crossfire server

use anyhow::Result;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

mod handlers;
mod protocol;
mod session;
mod tools;

use handlers::RequestHandler;
use protocol::*;

async fn send(stdout: &mut Stdout, response: &JsonRpcResponse) -> Result<()> {
    let response_str = serde_json::to_string(response)?;
    debug!("Sending: {}", response_str);
    stdout.write_all(response_str.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Tracing to stderr only - stdout is reserved for JSON-RPC protocol
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("crossfire_mcp=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Crossfire MCP Server...");

    let handler = RequestHandler::new();

    // Stdio transport - no network beyond the debug connection
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();

    info!("Crossfire MCP server ready, waiting for requests...");

    // Single-threaded message loop
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                info!("Client disconnected");
                break;
            }
            Ok(_) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                debug!("Received: {}", line);

                // Parse as generic Value first
                let value = match serde_json::from_str::<Value>(line) {
                    Ok(value) => value,
                    Err(e) => {
                        error!("Parse error: {}", e);
                        send(&mut stdout, &JsonRpcResponse::error(Value::Null, PARSE_ERROR, "Parse error")).await?;
                        continue;
                    }
                };

                // Discriminate by id field
                if value.get("id").is_some() {
                    match serde_json::from_value::<JsonRpcRequest>(value) {
                        Ok(request) => {
                            let response = handler.handle_request(request).await;
                            send(&mut stdout, &response).await?;
                        }
                        Err(e) => {
                            error!("Invalid request: {}", e);
                            let response = JsonRpcResponse::error(Value::Null, INVALID_REQUEST, "Invalid request");
                            send(&mut stdout, &response).await?;
                        }
                    }
                } else {
                    match serde_json::from_value::<JsonRpcNotification>(value) {
                        Ok(notification) => {
                            handler.handle_notification(notification).await;
                        }
                        Err(e) => {
                            error!("Invalid notification: {}", e);
                        }
                    }
                }
            }
            Err(e) => {
                error!("Read error: {}", e);
                break;
            }
        }
    }

    info!("Crossfire MCP server shutting down");
    Ok(())
}
