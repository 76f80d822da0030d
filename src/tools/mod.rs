//! Tool Surface (C9): the four tool operations, bound to the orchestrator,
//! plus a minimal line-delimited JSON-RPC stdio loop as the default host.
//! The loop is deliberately thin — swapping in a real MCP server only
//! touches `main.rs`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::OrchestratorError;
use crate::orchestrator::Orchestrator;

/// Formats any orchestrator failure as the single-line `Error: <kind>:
/// <detail>` string surfaced to the tool caller.
pub fn format_error(err: &OrchestratorError) -> String {
    let detail = err.detail();
    if detail.is_empty() {
        format!("Error: {}", err.kind())
    } else {
        format!("Error: {}: {}", err.kind(), detail)
    }
}

pub struct ToolHandler {
    orchestrator: Arc<Orchestrator>,
}

impl ToolHandler {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub async fn initiate_call(&self, message: &str) -> String {
        match self.orchestrator.initiate(message).await {
            Ok((call_id, transcript)) => format!(
                "Call initiated successfully.\n\nCall ID: {call_id}\n\nUser's response:\n{transcript}\n\nUse continue_call to ask follow-ups or end_call to hang up."
            ),
            Err(e) => format_error(&e),
        }
    }

    pub async fn continue_call(&self, call_id: &str, message: &str) -> String {
        match self.orchestrator.continue_call(call_id, message).await {
            Ok(transcript) => format!("User's response:\n{transcript}"),
            Err(e) => format_error(&e),
        }
    }

    pub async fn speak_to_user(&self, call_id: &str, message: &str) -> String {
        match self.orchestrator.speak(call_id, message).await {
            Ok(()) => format!("Message spoken: \"{message}\""),
            Err(e) => format_error(&e),
        }
    }

    pub async fn end_call(&self, call_id: &str, message: &str) -> String {
        match self.orchestrator.end(call_id, message).await {
            Ok(seconds) => format!("Call ended. Duration: {seconds}s"),
            Err(e) => format_error(&e),
        }
    }
}

/// A single JSON-RPC 2.0 request, one per line on stdin.
#[derive(Deserialize)]
struct Request {
    id: serde_json::Value,
    method: String,
    #[serde(default)]
    params: serde_json::Value,
}

#[derive(Serialize)]
struct Response {
    id: serde_json::Value,
    result: Option<ToolResult>,
    error: Option<RpcError>,
}

#[derive(Serialize)]
struct ToolResult {
    content: Vec<ToolContent>,
}

#[derive(Serialize)]
struct ToolContent {
    #[serde(rename = "type")]
    content_type: &'static str,
    text: String,
}

#[derive(Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

#[derive(Deserialize)]
struct InitiateCallParams {
    message: String,
}

#[derive(Deserialize)]
struct CallIdMessageParams {
    call_id: String,
    message: String,
}

/// Run the stdio loop: read one JSON-RPC request per line, dispatch to the
/// matching tool operation, write one JSON-RPC response per line.
pub async fn run_stdio_loop(handler: ToolHandler) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(&handler, request).await,
            Err(e) => Response {
                id: serde_json::Value::Null,
                result: None,
                error: Some(RpcError {
                    code: -32700,
                    message: format!("parse error: {e}"),
                }),
            },
        };
        let Ok(mut text) = serde_json::to_string(&response) else {
            continue;
        };
        text.push('\n');
        if stdout.write_all(text.as_bytes()).await.is_err() {
            break;
        }
        let _ = stdout.flush().await;
    }
}

async fn dispatch(handler: &ToolHandler, request: Request) -> Response {
    if request.method == "tools/list" {
        return Response {
            id: request.id,
            result: Some(ToolResult {
                content: vec![ToolContent {
                    content_type: "text",
                    text: tool_schemas().to_string(),
                }],
            }),
            error: None,
        };
    }

    let text = match request.method.as_str() {
        "initiate_call" => match serde_json::from_value::<InitiateCallParams>(request.params) {
            Ok(p) => Some(handler.initiate_call(&p.message).await),
            Err(e) => {
                return Response {
                    id: request.id,
                    result: None,
                    error: Some(RpcError {
                        code: -32602,
                        message: format!("invalid params: {e}"),
                    }),
                }
            }
        },
        "continue_call" => match serde_json::from_value::<CallIdMessageParams>(request.params) {
            Ok(p) => Some(handler.continue_call(&p.call_id, &p.message).await),
            Err(e) => {
                return Response {
                    id: request.id,
                    result: None,
                    error: Some(RpcError {
                        code: -32602,
                        message: format!("invalid params: {e}"),
                    }),
                }
            }
        },
        "speak_to_user" => match serde_json::from_value::<CallIdMessageParams>(request.params) {
            Ok(p) => Some(handler.speak_to_user(&p.call_id, &p.message).await),
            Err(e) => {
                return Response {
                    id: request.id,
                    result: None,
                    error: Some(RpcError {
                        code: -32602,
                        message: format!("invalid params: {e}"),
                    }),
                }
            }
        },
        "end_call" => match serde_json::from_value::<CallIdMessageParams>(request.params) {
            Ok(p) => Some(handler.end_call(&p.call_id, &p.message).await),
            Err(e) => {
                return Response {
                    id: request.id,
                    result: None,
                    error: Some(RpcError {
                        code: -32602,
                        message: format!("invalid params: {e}"),
                    }),
                }
            }
        },
        other => {
            return Response {
                id: request.id,
                result: None,
                error: Some(RpcError {
                    code: -32601,
                    message: format!("unknown method: {other}"),
                }),
            }
        }
    };

    Response {
        id: request.id,
        result: text.map(|t| ToolResult {
            content: vec![ToolContent {
                content_type: "text",
                text: t,
            }],
        }),
        error: None,
    }
}

/// JSON schemas for the four tools, as a caller (an MCP/JSON-RPC host)
/// would advertise them via `tools/list`.
pub fn tool_schemas() -> serde_json::Value {
    serde_json::json!([
        {
            "name": "initiate_call",
            "description": "Place an outbound call and speak an initial message.",
            "inputSchema": {
                "type": "object",
                "properties": {"message": {"type": "string"}},
                "required": ["message"]
            }
        },
        {
            "name": "continue_call",
            "description": "Speak a follow-up message on an active call and wait for the reply.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "call_id": {"type": "string"},
                    "message": {"type": "string"}
                },
                "required": ["call_id", "message"]
            }
        },
        {
            "name": "speak_to_user",
            "description": "Speak a message on an active call without waiting for a reply.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "call_id": {"type": "string"},
                    "message": {"type": "string"}
                },
                "required": ["call_id", "message"]
            }
        },
        {
            "name": "end_call",
            "description": "Speak a closing message and hang up.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "call_id": {"type": "string"},
                    "message": {"type": "string"}
                },
                "required": ["call_id", "message"]
            }
        }
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_error_includes_detail_when_present() {
        let e = OrchestratorError::ProviderError("one active call at a time".into());
        assert_eq!(format_error(&e), "Error: ProviderError: one active call at a time");
    }

    #[test]
    fn format_error_omits_colon_for_unit_variants() {
        let e = OrchestratorError::CallTimeout;
        assert_eq!(format_error(&e), "Error: CallTimeout");
    }

    #[test]
    fn tool_schemas_lists_all_four_tools() {
        let schemas = tool_schemas();
        let names: Vec<&str> = schemas
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["initiate_call", "continue_call", "speak_to_user", "end_call"]
        );
    }
}
