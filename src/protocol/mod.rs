//! JSON-RPC 2.0 envelope handling.
//!
//! [`Router`] turns one parsed message plus a resolved [`CallContext`](crate::tools::CallContext)
//! into a response, or into nothing for notifications.

pub mod router;

use serde::Serialize;
use serde_json::{json, Value};

pub use router::{Handled, Router};

/// Oldest protocol version the server accepts in `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";
pub const SERVER_NAME: &str = "tessera";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::new(METHOD_NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }
}

pub fn success_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

pub fn error_response(id: Value, error: &RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": error.code, "message": error.message },
    })
}

/// Response for a body that is not JSON at all. Transports send this before routing.
pub fn parse_error_response(detail: impl std::fmt::Display) -> Value {
    error_response(
        Value::Null,
        &RpcError::new(PARSE_ERROR, format!("Parse error: {detail}")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_shape() {
        let resp = error_response(json!(7), &RpcError::method_not_found("nope"));
        assert_eq!(
            resp,
            json!({"jsonrpc": "2.0", "id": 7, "error": {"code": -32601, "message": "nope"}})
        );
    }

    #[test]
    fn success_envelope_echoes_null_id() {
        let resp = success_response(Value::Null, json!({}));
        assert_eq!(resp["id"], Value::Null);
        assert!(resp.as_object().unwrap().contains_key("id"));
    }

    #[test]
    fn parse_error_has_null_id() {
        let resp = parse_error_response("expected value");
        assert_eq!(resp["error"]["code"], PARSE_ERROR);
        assert_eq!(resp["id"], Value::Null);
    }
}
