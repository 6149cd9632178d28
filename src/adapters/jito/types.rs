//! Block engine JSON-RPC payloads

use serde::{Deserialize, Serialize};

/// `sendBundle` request
#[derive(Debug, Clone, Serialize)]
pub struct BundleRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    /// One entry: the bundle's transactions, base64 encoded
    pub params: Vec<serde_json::Value>,
}

impl BundleRequest {
    pub fn new(transactions: Vec<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: 1,
            method: "sendBundle".to_string(),
            params: vec![
                serde_json::Value::from(transactions),
                serde_json::json!({ "encoding": "base64" }),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}
