use crate::error::{CoreError, RpcError};

/// JSON-RPC version string understood by the daemon's 1.0-style server.
pub(super) const JSONRPC_VERSION: &str = "1.0";

#[derive(serde::Serialize)]
pub(super) struct JsonRpcRequest<'a> {
    pub(super) jsonrpc: &'static str,
    pub(super) id: u64,
    pub(super) method: &'a str,
    pub(super) params: Vec<serde_json::Value>,
}

#[derive(serde::Deserialize)]
pub(super) struct JsonRpcResponse {
    pub(super) result: Option<serde_json::Value>,
    pub(super) error: Option<serde_json::Value>,
}

impl JsonRpcResponse {
    /// Split into the result, or the daemon's error. A `null` error member
    /// counts as success.
    pub(super) fn into_result(self) -> Result<serde_json::Value, CoreError> {
        match self.error {
            Some(err) if !err.is_null() => Err(parse_jsonrpc_error(err)),
            _ => Ok(self.result.unwrap_or(serde_json::Value::Null)),
        }
    }
}

/// Turn a JSON-RPC error member into a typed error.
///
/// `{"code": <int>, "message": <string>}` becomes a `ServerError`; anything
/// else is kept verbatim as an `InvalidResponse`.
pub(super) fn parse_jsonrpc_error(err: serde_json::Value) -> CoreError {
    #[derive(serde::Deserialize)]
    struct JsonRpcError {
        code: i64,
        message: String,
    }

    match serde_json::from_value::<JsonRpcError>(err.clone()) {
        Ok(parsed) => CoreError::Rpc(RpcError::ServerError {
            code: parsed.code,
            message: parsed.message,
        }),
        Err(_) => CoreError::Rpc(RpcError::InvalidResponse(format!(
            "non-standard JSON-RPC error: {err}"
        ))),
    }
}
