// MCP server: JSON-RPC 2.0 over newline-delimited stdio

use crate::dispatcher::Dispatcher;
use crate::protocol::*;
use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

/// Longest accepted request line
const MAX_LINE_LENGTH: usize = 1024 * 1024;

pub struct McpServer {
    dispatcher: Arc<Dispatcher>,
}

impl McpServer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Serve on the process stdin/stdout until stdin closes
    pub async fn serve_stdio(self: Arc<Self>) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve requests read from `reader`, writing one response per line to `writer`
    ///
    /// Requests are handled concurrently; responses are written as they complete.
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let mut sink = FramedWrite::new(writer, LinesCodec::new());
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let writer_task = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                sink.send(line).await.context("Failed to write response")?;
            }
            Ok::<_, anyhow::Error>(())
        });

        tracing::info!("MCP server listening on stdio");

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    tracing::warn!(max = MAX_LINE_LENGTH, "Dropping oversized request line");
                    let response = JsonRpcResponse::error(
                        Value::Null,
                        JsonRpcError::invalid_request("request line too long"),
                    );
                    if let Ok(text) = serde_json::to_string(&response) {
                        let _ = tx.send(text);
                    }
                    continue;
                }
                Err(LinesCodecError::Io(e)) => {
                    return Err(e).context("Failed to read request");
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            let server = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(response) = server.handle_line(&line).await {
                    // The writer only goes away once every sender is dropped
                    let _ = tx.send(response);
                }
            });
        }

        drop(tx);
        writer_task.await.context("Writer task failed")??;

        tracing::info!("MCP server input closed");
        Ok(())
    }

    /// Handle one raw message; `None` for notifications
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let response = match serde_json::from_str::<Value>(line) {
            Err(e) => Some(JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error(e))),
            Ok(value) => {
                let id = value.get("id").cloned().unwrap_or(Value::Null);
                match serde_json::from_value::<JsonRpcRequest>(value) {
                    Ok(request) if request.jsonrpc == "2.0" => self.handle_request(request).await,
                    Ok(_) => Some(JsonRpcResponse::error(
                        id,
                        JsonRpcError::invalid_request("jsonrpc must be \"2.0\""),
                    )),
                    Err(e) => Some(JsonRpcResponse::error(
                        id,
                        JsonRpcError::invalid_request(format!("Invalid request: {}", e)),
                    )),
                }
            }
        }?;

        match serde_json::to_string(&response) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize response");
                None
            }
        }
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let Some(id) = request.id.clone() else {
            self.handle_notification(&request);
            return None;
        };

        tracing::debug!(method = %request.method, "Handling request");

        let response = match request.method.as_str() {
            "initialize" => self.initialize(id, request.params),
            "ping" => JsonRpcResponse::success(id, serde_json::json!({})),
            "tools/list" => {
                let result = ListToolsResult {
                    tools: self.dispatcher.registry().list_schemas(),
                };
                JsonRpcResponse::from_result(id, &result)
            }
            "tools/call" => self.call_tool(id, request.params).await,
            other => JsonRpcResponse::error(id, JsonRpcError::method_not_found(other)),
        };
        Some(response)
    }

    fn handle_notification(&self, request: &JsonRpcRequest) {
        match request.method.as_str() {
            "notifications/initialized" => tracing::info!("Client initialized"),
            other => tracing::debug!(method = other, "Ignoring notification"),
        }
    }

    fn initialize(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        if let Some(params) = params {
            match serde_json::from_value::<InitializeParams>(params) {
                Ok(params) => tracing::info!(
                    client = params.client_info.as_ref().map(|c| c.name.as_str()).unwrap_or("unknown"),
                    protocol_version = %params.protocol_version,
                    "Client connected"
                ),
                Err(e) => {
                    return JsonRpcResponse::error(
                        id,
                        JsonRpcError::invalid_params(format!("Invalid initialize params: {}", e)),
                    )
                }
            }
        }

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: ServerInfo {
                name: "coinlens".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        JsonRpcResponse::from_result(id, &result)
    }

    async fn call_tool(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params: CallToolParams = match params.map(serde_json::from_value).transpose() {
            Ok(Some(params)) => params,
            Ok(None) => {
                return JsonRpcResponse::error(id, JsonRpcError::invalid_params("Missing params"))
            }
            Err(e) => {
                return JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_params(format!("Invalid tools/call params: {}", e)),
                )
            }
        };

        let envelope = self.dispatcher.invoke(&params.name, &params.arguments).await;
        let result = CallToolResult {
            content: vec![ToolContent::text(envelope.to_pretty_json())],
            is_error: Some(!envelope.ok),
        };
        JsonRpcResponse::from_result(id, &result)
    }
}
