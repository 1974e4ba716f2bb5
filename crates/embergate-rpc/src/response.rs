//! JSON-RPC 2.0 response construction.
//!
//! Script-facing responses are built as JSON values (scripts read fields
//! by name); the wire-exact [`raw`] forms are serde structs whose field
//! declaration order fixes the canonical `jsonrpc, id, result` layout.

use embergate_types::GatewayError;
use serde::Serialize;
use serde_json::Value;

/// Protocol version tag on every response.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC internal error, used for every failure without a more
/// specific upstream code.
pub const INTERNAL_ERROR_CODE: i64 = -32603;

/// Builds a success response; `Null` results are carried explicitly.
pub fn success(id: &Value, result: Value) -> Value {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

/// Builds an error response with an explicit code.
pub fn error(id: &Value, code: i64, message: &str) -> Value {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": {
            "code": code,
            "message": message,
        },
    })
}

/// Builds an error response, preserving a typed upstream code when the
/// error carries one and falling back to [`INTERNAL_ERROR_CODE`].
pub fn error_from(id: &Value, err: &GatewayError) -> Value {
    match err {
        GatewayError::Rpc { code, message } => error(id, *code, message),
        other => error(id, INTERNAL_ERROR_CODE, &other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Wire-exact raw responses
// ---------------------------------------------------------------------------

/// Response envelopes with fixed field order, for `call_raw`.
pub mod raw {
    use super::*;

    #[derive(Serialize)]
    struct RawResult<'a> {
        jsonrpc: &'static str,
        id: &'a Value,
        result: &'a Value,
    }

    #[derive(Serialize)]
    struct RawError<'a> {
        jsonrpc: &'static str,
        id: &'a Value,
        error: ErrorObject<'a>,
    }

    #[derive(Serialize)]
    struct ErrorObject<'a> {
        code: i64,
        message: &'a str,
    }

    /// `{"jsonrpc":"2.0","id":…,"result":…}` — `result` is always present,
    /// `null` included.
    pub fn result_string(id: &Value, result: &Value) -> String {
        serde_json::to_string(&RawResult {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        })
        .unwrap_or_else(|_| r#"{"jsonrpc":"2.0","id":null,"result":null}"#.into())
    }

    /// `{"jsonrpc":"2.0","id":…,"error":{"code":…,"message":…}}`.
    pub fn error_string(id: &Value, code: i64, message: &str) -> String {
        serde_json::to_string(&RawError {
            jsonrpc: JSONRPC_VERSION,
            id,
            error: ErrorObject { code, message },
        })
        .unwrap_or_else(|_| r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"encoding failure"}}"#.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_result_preserves_null_and_field_order() {
        let out = raw::result_string(&serde_json::json!(7), &Value::Null);
        assert_eq!(out, r#"{"jsonrpc":"2.0","id":7,"result":null}"#);
    }

    #[test]
    fn raw_error_shape() {
        let out = raw::error_string(&serde_json::json!("abc"), -32601, "no such method");
        assert_eq!(
            out,
            r#"{"jsonrpc":"2.0","id":"abc","error":{"code":-32601,"message":"no such method"}}"#,
        );
    }

    #[test]
    fn typed_rpc_error_keeps_code() {
        let err = GatewayError::Rpc {
            code: -32000,
            message: "nonce too low".into(),
        };
        let value = error_from(&serde_json::json!(1), &err);
        assert_eq!(value["error"]["code"], -32000);
        assert_eq!(value["error"]["message"], "nonce too low");
    }

    #[test]
    fn untyped_error_becomes_internal() {
        let err = GatewayError::QueueFull;
        let value = error_from(&Value::Null, &err);
        assert_eq!(value["error"]["code"], INTERNAL_ERROR_CODE);
    }
}
