//! JSON-RPC 2.0 frame types.
//!
//! Outbound frames are always requests. Inbound frames are either responses
//! (carry an `id`) or subscription notifications (no `id`, `params` holds the
//! server subscription id and the pushed result).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::error::BobError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Outbound request frame.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
}

impl<'a> RpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

/// Server-reported error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

impl From<RpcErrorObject> for BobError {
    fn from(e: RpcErrorObject) -> Self {
        BobError::Rpc {
            code: e.code,
            message: e.message,
        }
    }
}

/// Result of `qubic_syncing`; `current_tick` is the node's cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    #[serde(default)]
    pub epoch: u32,
    pub current_tick: u64,
    #[serde(default)]
    pub initial_tick: u64,
    #[serde(default)]
    pub syncing: bool,
}

/// Response body of a plain HTTP JSON-RPC call.
#[derive(Debug, Deserialize)]
pub struct HttpResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

/// Payload of a subscription push.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationParams {
    pub subscription: String,
    #[serde(default)]
    pub result: Value,
}

/// Any inbound frame before classification.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
    #[serde(default)]
    params: Option<Value>,
}

/// A classified inbound frame.
#[derive(Debug)]
pub enum Incoming {
    Response {
        id: u64,
        outcome: Result<Value, RpcErrorObject>,
    },
    Notification(NotificationParams),
    /// Well-formed JSON that is neither of the above.
    Other,
}

/// Decode one text frame.
pub fn parse_frame(text: &str) -> Result<Incoming, serde_json::Error> {
    let raw: RawFrame = serde_json::from_str(text)?;

    if let Some(id) = raw.id.filter(|id| !id.is_null()) {
        let Some(id) = id.as_u64() else {
            return Ok(Incoming::Other);
        };
        let outcome = match raw.error {
            Some(error) => Err(error),
            None => Ok(raw.result.unwrap_or(Value::Null)),
        };
        return Ok(Incoming::Response { id, outcome });
    }

    match raw.params {
        Some(params) if params.get("subscription").is_some() => {
            let params: NotificationParams = serde_json::from_value(params)?;
            Ok(Incoming::Notification(params))
        }
        _ => {
            tracing::trace!(method = ?raw.method, "Frame without id or subscription");
            Ok(Incoming::Other)
        }
    }
}
