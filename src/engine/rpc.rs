//! Line-delimited JSON-RPC 2.0 client for the chat engine subprocess.
//!
//! The engine runs as a child process and speaks JSON-RPC over its stdio:
//! one request or response object per line. Responses are matched back to
//! callers by numeric id; `event` notifications are decoded and forwarded
//! on a channel that the main event loop consumes.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, trace, warn};

use super::types::EventEnvelope;

/// Environment variable telling the engine where to keep account data.
const ACCOUNTS_DIR_ENV: &str = "DC_ACCOUNTS_PATH";

/// Capacity of the pushed-event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Errors that can occur on the engine transport.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Failed to spawn chat engine process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Chat engine transport closed")]
    TransportClosed,

    #[error("Chat engine returned error {code}: {message}")]
    Engine { code: i64, message: String },

    #[error("I/O error talking to chat engine: {0}")]
    Io(#[from] std::io::Error),
}

/// Error object of a JSON-RPC response.
#[derive(Debug, Deserialize)]
struct ErrorObject {
    code: i64,
    message: String,
}

/// Anything the engine writes on stdout: a response to one of our calls,
/// or a pushed notification.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Incoming {
    Response {
        id: u64,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<ErrorObject>,
    },
    Notification {
        method: String,
        #[serde(default)]
        params: Value,
    },
}

fn parse_incoming(line: &str) -> Result<Incoming, serde_json::Error> {
    serde_json::from_str(line)
}

fn request_line(id: u64, method: &str, params: &Value) -> String {
    let mut line = json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": id,
    })
    .to_string();
    line.push('\n');
    line
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>>>;

/// JSON-RPC client bound to a running engine subprocess.
///
/// Dropping the client kills the subprocess.
pub struct RpcClient {
    stdin: Mutex<ChildStdin>,
    pending: PendingMap,
    next_id: AtomicU64,
    _child: Child,
}

impl RpcClient {
    /// Spawns the engine binary and connects to its stdio.
    ///
    /// Returns the client plus the receiving end of the pushed-event
    /// channel. The engine keeps its account database under `accounts_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started or its stdio
    /// pipes cannot be captured.
    pub async fn spawn(
        program: impl AsRef<Path>,
        accounts_dir: impl AsRef<Path>,
    ) -> Result<(Self, mpsc::Receiver<EventEnvelope>), RpcError> {
        let program = program.as_ref();
        debug!("Spawning chat engine: {}", program.display());

        let mut child = Command::new(program)
            .env(ACCOUNTS_DIR_ENV, accounts_dir.as_ref())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(RpcError::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RpcError::Spawn(std::io::Error::other("stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RpcError::Spawn(std::io::Error::other("stdout not captured")))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(read_loop(stdout, Arc::clone(&pending), event_tx));

        Ok((
            Self {
                stdin: Mutex::new(stdin),
                pending,
                next_id: AtomicU64::new(1),
                _child: child,
            },
            event_rx,
        ))
    }

    /// Issues a single request and waits for the matching response.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is closed, the request cannot be
    /// written, or the engine reports an error for this call.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        trace!("-> {} (id {})", method, id);
        let line = request_line(id, method, &params);

        let write_result = {
            let mut stdin = self.stdin.lock().await;
            stdin.write_all(line.as_bytes()).await
        };
        if let Err(e) = write_result {
            self.pending.lock().await.remove(&id);
            return Err(e.into());
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(RpcError::TransportClosed),
        }
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient").finish_non_exhaustive()
    }
}

/// Reads engine stdout until EOF, routing responses and events.
async fn read_loop(
    stdout: tokio::process::ChildStdout,
    pending: PendingMap,
    event_tx: mpsc::Sender<EventEnvelope>,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                warn!("Chat engine closed its stdout");
                break;
            }
            Err(e) => {
                error!("Failed to read from chat engine: {}", e);
                break;
            }
        };

        match parse_incoming(&line) {
            Ok(Incoming::Response { id, result, error }) => {
                let Some(tx) = pending.lock().await.remove(&id) else {
                    warn!("Response for unknown request id {}", id);
                    continue;
                };
                let outcome = match error {
                    Some(ErrorObject { code, message }) => Err(RpcError::Engine { code, message }),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                // Caller may have given up; nothing to do then.
                let _ = tx.send(outcome);
            }
            Ok(Incoming::Notification { method, params }) => {
                if method != "event" {
                    trace!("Ignoring notification: {}", method);
                    continue;
                }
                match serde_json::from_value::<EventEnvelope>(params) {
                    Ok(envelope) => {
                        if event_tx.send(envelope).await.is_err() {
                            debug!("Event receiver dropped, discarding engine events");
                        }
                    }
                    Err(e) => warn!("Undecodable engine event: {}", e),
                }
            }
            Err(e) => warn!("Unparsable line from chat engine: {}", e),
        }
    }

    // Fail every in-flight call so callers do not hang forever.
    let mut pending = pending.lock().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(RpcError::TransportClosed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{AccountId, ChatId, EngineEvent, MsgId};

    #[test]
    fn test_parse_response_with_result() {
        let incoming = parse_incoming(r#"{"jsonrpc": "2.0", "id": 3, "result": [1, 2]}"#).unwrap();
        match incoming {
            Incoming::Response { id, result, error } => {
                assert_eq!(id, 3);
                assert_eq!(result, Some(json!([1, 2])));
                assert!(error.is_none());
            }
            Incoming::Notification { .. } => panic!("parsed as notification"),
        }
    }

    #[test]
    fn test_parse_response_with_error() {
        let incoming = parse_incoming(
            r#"{"jsonrpc": "2.0", "id": 4, "error": {"code": -32602, "message": "bad params"}}"#,
        )
        .unwrap();
        match incoming {
            Incoming::Response { id, error, .. } => {
                assert_eq!(id, 4);
                let error = error.unwrap();
                assert_eq!(error.code, -32602);
                assert_eq!(error.message, "bad params");
            }
            Incoming::Notification { .. } => panic!("parsed as notification"),
        }
    }

    #[test]
    fn test_parse_event_notification() {
        let incoming = parse_incoming(
            r#"{"jsonrpc": "2.0", "method": "event", "params": {"contextId": 1, "event": {"kind": "IncomingMsg", "chatId": 42, "msgId": 7}}}"#,
        )
        .unwrap();
        let Incoming::Notification { method, params } = incoming else {
            panic!("parsed as response");
        };
        assert_eq!(method, "event");

        let envelope: EventEnvelope = serde_json::from_value(params).unwrap();
        assert_eq!(envelope.context_id, AccountId(1));
        assert!(matches!(
            envelope.event,
            EngineEvent::IncomingMsg {
                chat_id: ChatId(42),
                msg_id: MsgId(7),
            }
        ));
    }

    #[test]
    fn test_request_line_shape() {
        let line = request_line(5, "get_config", &json!([1, "addr"]));
        assert!(line.ends_with('\n'));

        let parsed: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed["jsonrpc"], "2.0");
        assert_eq!(parsed["method"], "get_config");
        assert_eq!(parsed["id"], 5);
        assert_eq!(parsed["params"], json!([1, "addr"]));
    }
}
