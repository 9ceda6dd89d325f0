//! Serialised outgoing traffic plus server-initiated requests.
//!
//! All writes funnel through one mpsc channel so JSON messages never
//! interleave on the byte stream. Server-to-client requests (roots
//! discovery) use numeric ids starting at 1000 and are matched back to a
//! oneshot callback by id.

use std::collections::HashMap;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use nts_protocol::ErrorObject;
use nts_protocol::JsonRpcMessage;
use nts_protocol::JsonRpcNotification;
use nts_protocol::JsonRpcRequest;
use nts_protocol::JSONRPC_VERSION;
use nts_protocol::RequestId;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::warn;

/// First id used for server-initiated requests; client ids live below.
const FIRST_SERVER_REQUEST_ID: i64 = 1000;

pub(crate) struct OutgoingMessageSender {
    next_request_id: AtomicI64,
    sender: mpsc::Sender<JsonRpcMessage>,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<Value>>>,
}

impl OutgoingMessageSender {
    pub(crate) fn new(sender: mpsc::Sender<JsonRpcMessage>) -> Self {
        Self {
            next_request_id: AtomicI64::new(FIRST_SERVER_REQUEST_ID),
            sender,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> oneshot::Receiver<Value> {
        let id = RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id.clone(), tx);
        }
        let message = JsonRpcMessage::Request(JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            method: method.to_string(),
            params,
        });
        let _ = self.sender.send(message).await;
        rx
    }

    /// Route a client response back to whoever sent the request.
    pub(crate) async fn notify_client_response(&self, id: RequestId, result: Value) {
        let entry = {
            let mut pending = self.pending.lock().await;
            pending.remove_entry(&id)
        };
        match entry {
            Some((id, tx)) => {
                if tx.send(result).is_err() {
                    warn!("callback for {id:?} dropped before the response arrived");
                }
            }
            None => warn!("no callback registered for response {id:?}"),
        }
    }

    pub(crate) async fn send_response(&self, id: RequestId, result: Value) {
        let _ = self.sender.send(JsonRpcMessage::response(id, result)).await;
    }

    pub(crate) async fn send_error(&self, id: RequestId, code: i64, message: String) {
        let _ = self
            .sender
            .send(JsonRpcMessage::Error(nts_protocol::JsonRpcError {
                jsonrpc: JSONRPC_VERSION.into(),
                id,
                error: ErrorObject {
                    code,
                    message,
                    data: None,
                },
            }))
            .await;
    }

    #[allow(dead_code)]
    pub(crate) async fn send_notification(&self, method: &str, params: Option<Value>) {
        let message = JsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.to_string(),
            params,
        });
        let _ = self.sender.send(message).await;
    }
}
