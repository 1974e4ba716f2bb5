//! The RPC client.
//!
//! A client is built once per node start, wired either to the upstream
//! HTTP endpoint or to the local light-client handler, and shared behind
//! an `Arc`. Every external call carries an absolute 60 s deadline; the
//! gateway never retries on its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use embergate_types::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::response;

/// Absolute deadline applied to every outbound RPC call.
pub const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// LocalRpcHandler
// ---------------------------------------------------------------------------

/// Interface to the local light client's in-process RPC surface.
///
/// Typed JSON-RPC failures are returned as [`GatewayError::Rpc`] so the
/// router can preserve their codes.
#[async_trait]
pub trait LocalRpcHandler: Send + Sync {
    /// Executes `method` with `params`, returning the JSON result.
    /// A `null` result is `Value::Null`, never an absent value.
    async fn handle(&self, method: &str, params: &[Value]) -> Result<Value>;
}

// ---------------------------------------------------------------------------
// Wire envelopes
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RequestEnvelope<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a [Value],
}

#[derive(Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: i64,
    message: String,
}

// ---------------------------------------------------------------------------
// RpcClient
// ---------------------------------------------------------------------------

enum Route {
    Upstream { http: reqwest::Client, url: String },
    Local(Arc<dyn LocalRpcHandler>),
}

/// JSON-RPC client bound to the node that constructed it.
pub struct RpcClient {
    route: Route,
    next_id: AtomicU64,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient").finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Builds a client for an upstream HTTP endpoint.
    pub fn upstream(url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(RPC_CALL_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::RpcClient {
                reason: format!("cannot build HTTP client: {e}"),
            })?;
        Ok(Self {
            route: Route::Upstream {
                http,
                url: url.to_owned(),
            },
            next_id: AtomicU64::new(1),
        })
    }

    /// Builds a client over the local light-client handler.
    pub fn local(handler: Arc<dyn LocalRpcHandler>) -> Self {
        Self {
            route: Route::Local(handler),
            next_id: AtomicU64::new(1),
        }
    }

    /// Whether this client talks to an upstream endpoint.
    pub fn is_upstream(&self) -> bool {
        matches!(self.route, Route::Upstream { .. })
    }

    /// Executes a call with the 60 s deadline.
    ///
    /// `Ok(Value::Null)` is a successful null result; typed endpoint
    /// errors surface as [`GatewayError::Rpc`] with their code preserved.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        match tokio::time::timeout(RPC_CALL_TIMEOUT, self.dispatch(method, &params)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                reason: format!("{method} exceeded {}s", RPC_CALL_TIMEOUT.as_secs()),
            }),
        }
    }

    /// Executes a raw JSON-RPC payload and returns the wire-exact
    /// response string. `null` results stay literal:
    /// `{"jsonrpc":"2.0","id":7,"result":null}`.
    pub async fn call_raw(&self, payload: &str) -> String {
        let decoded: Value = match serde_json::from_str(payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                return response::raw::error_string(
                    &Value::Null,
                    -32700,
                    &format!("invalid request: {e}"),
                );
            }
        };

        let call = match crate::RpcCall::from_payload(&decoded) {
            Ok(call) => call,
            Err(e) => {
                return response::raw::error_string(
                    decoded.get("id").unwrap_or(&Value::Null),
                    response::INTERNAL_ERROR_CODE,
                    &e.to_string(),
                );
            }
        };

        match self.call(&call.method, call.params.clone()).await {
            Ok(result) => response::raw::result_string(&call.id, &result),
            Err(GatewayError::Rpc { code, message }) => {
                response::raw::error_string(&call.id, code, &message)
            }
            Err(other) => response::raw::error_string(
                &call.id,
                response::INTERNAL_ERROR_CODE,
                &other.to_string(),
            ),
        }
    }

    async fn dispatch(&self, method: &str, params: &[Value]) -> Result<Value> {
        match &self.route {
            Route::Local(handler) => handler.handle(method, params).await,
            Route::Upstream { http, url } => {
                let request = RequestEnvelope {
                    jsonrpc: response::JSONRPC_VERSION,
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    method,
                    params,
                };

                let http_response = http
                    .post(url)
                    .json(&request)
                    .send()
                    .await
                    .map_err(classify_transport_error)?;

                let envelope: ResponseEnvelope = http_response
                    .json()
                    .await
                    .map_err(classify_transport_error)?;

                if let Some(error) = envelope.error {
                    return Err(GatewayError::Rpc {
                        code: error.code,
                        message: error.message,
                    });
                }

                // Null and absent results both mean JSON null.
                Ok(envelope.result.unwrap_or(Value::Null))
            }
        }
    }
}

fn classify_transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout {
            reason: err.to_string(),
        }
    } else {
        GatewayError::RpcClient {
            reason: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
