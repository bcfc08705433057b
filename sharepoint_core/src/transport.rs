use serde_json::Value;
use std::collections::HashMap;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info};

use crate::mcp_server::JsonRpcHandler;

/// Line-delimited JSON-RPC over stdio.
///
/// Each request is handled on its own task so a slow tool call does not hold up
/// the others. Responses funnel through one writer task, which keeps every
/// response on its own line. A `notifications/cancelled` message aborts the task
/// serving the named request, which drops its pending Graph calls and retries;
/// the cancelled request gets no response.
pub struct StdioTransport {
    handler: JsonRpcHandler,
}

impl StdioTransport {
    pub fn new(handler: JsonRpcHandler) -> Self {
        Self { handler }
    }

    /// Run the stdio transport, reading from stdin and writing to stdout
    pub async fn run(&self) -> io::Result<()> {
        info!("Starting stdio transport");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serves until the input reaches EOF and every in-flight request has answered.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<Value>();
        let writer_task = tokio::spawn(write_responses(rx, writer));

        let mut lines = reader.lines();
        let mut in_flight = JoinSet::new();
        let mut running: HashMap<String, AbortHandle> = HashMap::new();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("EOF reached on stdin");
                    break;
                }
                Err(e) => {
                    error!("Error reading from stdin: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            debug!("Processing line: {}", line);

            match serde_json::from_str::<Value>(&line) {
                Ok(request) if is_cancellation(&request) => {
                    let key = request
                        .pointer("/params/requestId")
                        .map(request_key)
                        .unwrap_or_default();
                    match running.remove(&key) {
                        Some(handle) => {
                            info!(request_id = %key, "cancelling request");
                            handle.abort();
                        }
                        None => debug!(request_id = %key, "cancellation for a request that is not running"),
                    }
                }
                Ok(request) => {
                    let key = request.get("id").map(request_key);
                    let handler = self.handler.clone();
                    let tx = tx.clone();
                    let task_key = key.clone();
                    let handle = in_flight.spawn(async move {
                        if let Some(response) = handler.handle_request(request).await {
                            if tx.send(response).is_err() {
                                error!("Response writer has stopped");
                            }
                        }
                        task_key
                    });
                    if let Some(key) = key {
                        running.insert(key, handle);
                    }
                }
                Err(e) => {
                    error!("Failed to parse JSON-RPC request: {}", e);
                    let error_response = serde_json::json!({
                        "jsonrpc": "2.0",
                        "error": {
                            "code": -32700,
                            "message": "Parse error",
                            "data": e.to_string()
                        },
                        "id": null
                    });
                    if tx.send(error_response).is_err() {
                        break;
                    }
                }
            }

            // Reap finished handlers so the set does not grow for the whole session.
            while let Some(joined) = in_flight.try_join_next() {
                reap(joined, &mut running);
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            reap(joined, &mut running);
        }
        drop(tx);
        writer_task
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }
}

fn is_cancellation(message: &Value) -> bool {
    message.get("id").is_none()
        && message.get("method").and_then(|m| m.as_str()) == Some("notifications/cancelled")
}

/// Ids may be numbers or strings; the JSON text keeps `1` and `"1"` apart.
fn request_key(id: &Value) -> String {
    id.to_string()
}

fn reap(
    joined: Result<Option<String>, tokio::task::JoinError>,
    running: &mut HashMap<String, AbortHandle>,
) {
    match joined {
        Ok(Some(key)) => {
            running.remove(&key);
        }
        Ok(None) => {}
        Err(e) if e.is_cancelled() => debug!("request task aborted"),
        Err(e) => error!("Request handler panicked: {}", e),
    }
}

async fn write_responses<W>(mut rx: mpsc::UnboundedReceiver<Value>, mut writer: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let response_str = serde_json::to_string(&response)?;
        writer.write_all(response_str.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        debug!("Sent response: {}", response_str);
    }
    Ok(())
}
