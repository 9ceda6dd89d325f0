//! JSON-RPC method dispatch for the stdio transport.

use std::path::PathBuf;
use std::sync::Arc;

use nts_core::Engine;
use nts_protocol::CallToolParams;
use nts_protocol::Implementation;
use nts_protocol::InitializeParams;
use nts_protocol::InitializeResult;
use nts_protocol::JsonRpcError;
use nts_protocol::JsonRpcNotification;
use nts_protocol::JsonRpcRequest;
use nts_protocol::JsonRpcResponse;
use nts_protocol::ListRootsResult;
use nts_protocol::ListToolsResult;
use nts_protocol::METHOD_NOT_FOUND;
use nts_protocol::INVALID_PARAMS;
use nts_protocol::PROTOCOL_VERSION;
use nts_protocol::RequestId;
use nts_protocol::ServerCapabilities;
use nts_protocol::ToolsCapability;
use serde_json::json;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::outgoing_message::OutgoingMessageSender;
use crate::tools;

pub(crate) struct MessageProcessor {
    engine: Arc<Engine>,
    outgoing: Arc<OutgoingMessageSender>,
    initialized: bool,
}

impl MessageProcessor {
    pub(crate) fn new(engine: Arc<Engine>, outgoing: Arc<OutgoingMessageSender>) -> Self {
        Self {
            engine,
            outgoing,
            initialized: false,
        }
    }

    pub(crate) async fn process_request(&mut self, request: JsonRpcRequest) {
        let request_id = request.id.clone();
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request_id, request.params).await,
            "ping" => self.outgoing.send_response(request_id, json!({})).await,
            "tools/list" => {
                let result = ListToolsResult {
                    tools: tools::tool_definitions(),
                    next_cursor: None,
                };
                match serde_json::to_value(result) {
                    Ok(value) => self.outgoing.send_response(request_id, value).await,
                    Err(e) => {
                        self.outgoing
                            .send_error(request_id, INVALID_PARAMS, e.to_string())
                            .await
                    }
                }
            }
            "tools/call" => self.handle_call_tool(request_id, request.params).await,
            "resources/list" => {
                self.outgoing
                    .send_response(request_id, json!({ "resources": [] }))
                    .await
            }
            "prompts/list" => {
                self.outgoing
                    .send_response(request_id, json!({ "prompts": [] }))
                    .await
            }
            "logging/setLevel" => self.outgoing.send_response(request_id, json!({})).await,
            other => {
                debug!("unsupported method '{other}'");
                self.outgoing
                    .send_error(
                        request_id,
                        METHOD_NOT_FOUND,
                        format!("method not found: {other}"),
                    )
                    .await
            }
        }
    }

    pub(crate) async fn process_notification(&mut self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                info!("client finished initialization");
            }
            "notifications/roots/list_changed" => {
                self.discover_roots().await;
            }
            "notifications/cancelled" => {
                // Open transactions roll back when the operation body errors
                // out; there is nothing extra to discard here.
                debug!("request cancelled by client");
            }
            other => debug!("ignoring notification '{other}'"),
        }
    }

    /// A standalone response means the client answered one of our own
    /// requests (roots discovery).
    pub(crate) async fn process_response(&mut self, response: JsonRpcResponse) {
        self.outgoing
            .notify_client_response(response.id, response.result)
            .await;
    }

    pub(crate) async fn process_error(&mut self, error: JsonRpcError) {
        warn!("client sent error for {:?}: {}", error.id, error.error.message);
    }

    async fn handle_initialize(&mut self, id: RequestId, params: Option<serde_json::Value>) {
        if self.initialized {
            self.outgoing
                .send_error(
                    id,
                    -32600,
                    "initialize called more than once".to_string(),
                )
                .await;
            return;
        }
        self.initialized = true;

        let client_version = params
            .and_then(|p| serde_json::from_value::<InitializeParams>(p).ok())
            .map(|p| p.protocol_version)
            .unwrap_or_else(|| PROTOCOL_VERSION.to_string());
        debug!("initialize, client protocol {client_version}");

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
                resources: Some(json!({})),
                prompts: Some(json!({})),
                logging: Some(json!({})),
            },
            server_info: Implementation {
                name: "nts-mcp-server".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        match serde_json::to_value(result) {
            Ok(value) => self.outgoing.send_response(id, value).await,
            Err(e) => {
                self.outgoing
                    .send_error(id, INVALID_PARAMS, e.to_string())
                    .await
            }
        }
    }

    async fn handle_call_tool(&mut self, id: RequestId, params: Option<serde_json::Value>) {
        let params: CallToolParams = match params.map(serde_json::from_value).transpose() {
            Ok(Some(params)) => params,
            Ok(None) => {
                self.outgoing
                    .send_error(id, INVALID_PARAMS, "tools/call requires params".to_string())
                    .await;
                return;
            }
            Err(e) => {
                self.outgoing
                    .send_error(id, INVALID_PARAMS, format!("bad tools/call params: {e}"))
                    .await;
                return;
            }
        };

        // Requests are handled sequentially, which also serialises requests
        // per task: a task context is never driven by two calls at once.
        let result = tools::handle_tool_call(&self.engine, &params.name, params.arguments).await;
        match serde_json::to_value(result) {
            Ok(value) => self.outgoing.send_response(id, value).await,
            Err(e) => {
                self.outgoing
                    .send_error(id, INVALID_PARAMS, e.to_string())
                    .await
            }
        }
    }

    /// Ask the client for its roots and swap the registry's set wholesale.
    async fn discover_roots(&self) {
        let receiver = self.outgoing.send_request("roots/list", None).await;
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let Ok(value) = receiver.await else {
                warn!("roots/list request was dropped");
                return;
            };
            let Ok(result) = serde_json::from_value::<ListRootsResult>(value) else {
                warn!("client returned malformed roots/list result");
                return;
            };
            let mut paths: Vec<PathBuf> = result
                .roots
                .iter()
                .map(|root| PathBuf::from(root.uri.trim_start_matches("file://")))
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
            if paths.is_empty() {
                return;
            }
            let primary = paths.remove(0);
            info!(primary = %primary.display(), extra = paths.len(), "roots replaced");
            engine.replace_roots(primary, &paths);
        });
    }
}
