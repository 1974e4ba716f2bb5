//! Decoded JSON-RPC request model.
//!
//! Scripts hand the bridge arbitrary JSON payloads; [`RpcCall`] is the
//! decoded form the router classifies. Quantity fields accept both
//! `0x`-hex and decimal strings because dApp libraries emit both.

use embergate_types::{Address, Bytes, GatewayError, Result, TxArgs, U256};
use serde_json::Value;

use crate::METHOD_SEND_TRANSACTION;

// ---------------------------------------------------------------------------
// RpcCall
// ---------------------------------------------------------------------------

/// A decoded JSON-RPC request.
#[derive(Clone, Debug)]
pub struct RpcCall {
    /// Request id — number, string, or `Null` when the script omitted it.
    pub id: Value,
    /// Method name.
    pub method: String,
    /// Positional parameters, opaque to the router except for
    /// `eth_sendTransaction`.
    pub params: Vec<Value>,
}

impl RpcCall {
    /// Decodes a payload object into a call.
    ///
    /// # Errors
    ///
    /// [`GatewayError::MethodNotSupported`] when `method` is missing or
    /// not a string.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let method = payload
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::MethodNotSupported {
                method: "<missing>".into(),
            })?
            .to_owned();

        let params = match payload.get("params") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            // A bare object/scalar is treated as a single positional param.
            Some(other) => vec![other.clone()],
        };

        Ok(Self {
            id: payload.get("id").cloned().unwrap_or(Value::Null),
            method,
            params,
        })
    }

    /// Whether this request takes the transaction path.
    pub fn is_send_transaction(&self) -> bool {
        self.method == METHOD_SEND_TRANSACTION
    }

    /// Extracts transaction arguments from the first parameter.
    ///
    /// # Errors
    ///
    /// [`GatewayError::MethodNotSupported`] when the first parameter is
    /// not an object or `from` is absent/invalid.
    pub fn tx_args(&self) -> Result<TxArgs> {
        let object = self
            .params
            .first()
            .and_then(Value::as_object)
            .ok_or_else(|| GatewayError::MethodNotSupported {
                method: format!("{} without transaction object", self.method),
            })?;

        let from = object
            .get("from")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::MethodNotSupported {
                method: format!("{} without 'from'", self.method),
            })?
            .parse::<Address>()
            .map_err(|e| GatewayError::MethodNotSupported {
                method: format!("{} with invalid 'from': {e}", self.method),
            })?;

        let to = match object.get("to").and_then(Value::as_str) {
            Some(s) => Some(s.parse::<Address>().map_err(|e| {
                GatewayError::MethodNotSupported {
                    method: format!("{} with invalid 'to': {e}", self.method),
                }
            })?),
            None => None,
        };

        Ok(TxArgs {
            from,
            to,
            value: parse_quantity(object.get("value"))?,
            gas: parse_quantity(object.get("gas"))?,
            gas_price: parse_quantity(object.get("gasPrice"))?,
            data: parse_data(object.get("data"))?,
        })
    }
}

// ---------------------------------------------------------------------------
// Field parsing
// ---------------------------------------------------------------------------

/// Parses a JSON quantity: `0x`-hex string, decimal string, or integer.
pub fn parse_quantity(value: Option<&Value>) -> Result<Option<U256>> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value {
        Value::Null => Ok(None),
        Value::String(s) => {
            let parsed = if let Some(hex_digits) = s.strip_prefix("0x") {
                U256::from_str_radix(hex_digits, 16)
            } else {
                U256::from_str_radix(s, 10)
            };
            parsed.map(Some).map_err(|e| GatewayError::MethodNotSupported {
                method: format!("invalid quantity '{s}': {e}"),
            })
        }
        Value::Number(n) => n
            .as_u64()
            .map(|v| Some(U256::from(v)))
            .ok_or_else(|| GatewayError::MethodNotSupported {
                method: format!("invalid quantity '{n}'"),
            }),
        other => Err(GatewayError::MethodNotSupported {
            method: format!("invalid quantity '{other}'"),
        }),
    }
}

/// Parses a `0x`-hex data field.
fn parse_data(value: Option<&Value>) -> Result<Option<Bytes>> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value {
        Value::Null => Ok(None),
        Value::String(s) => {
            let digits = s.strip_prefix("0x").unwrap_or(s);
            hex::decode(digits)
                .map(|bytes| Some(Bytes::from(bytes)))
                .map_err(|e| GatewayError::MethodNotSupported {
                    method: format!("invalid data '{s}': {e}"),
                })
        }
        other => Err(GatewayError::MethodNotSupported {
            method: format!("invalid data '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_basic_call() {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 42,
            "method": "eth_blockNumber",
            "params": [],
        });
        let call = RpcCall::from_payload(&payload).expect("decode");
        assert_eq!(call.method, "eth_blockNumber");
        assert_eq!(call.id, serde_json::json!(42));
        assert!(call.params.is_empty());
        assert!(!call.is_send_transaction());
    }

    #[test]
    fn missing_method_rejected() {
        let payload = serde_json::json!({"id": 1, "params": []});
        assert!(RpcCall::from_payload(&payload).is_err());
    }

    #[test]
    fn missing_id_becomes_null() {
        let payload = serde_json::json!({"method": "net_listening"});
        let call = RpcCall::from_payload(&payload).expect("decode");
        assert_eq!(call.id, Value::Null);
    }

    #[test]
    fn tx_args_extraction() {
        let payload = serde_json::json!({
            "method": "eth_sendTransaction",
            "params": [{
                "from": "0x9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f",
                "to": "0x3535353535353535353535353535353535353535",
                "value": "0xde0b6b3a7640000",
                "gas": "21000",
                "gasPrice": 20_000_000_000u64,
                "data": "0xdeadbeef",
            }],
            "id": 1,
        });
        let call = RpcCall::from_payload(&payload).expect("decode");
        assert!(call.is_send_transaction());

        let args = call.tx_args().expect("args");
        assert_eq!(args.value, Some(U256::from(1_000_000_000_000_000_000u64)));
        assert_eq!(args.gas, Some(U256::from(21_000u64)));
        assert_eq!(args.gas_price, Some(U256::from(20_000_000_000u64)));
        assert_eq!(args.data, Some(Bytes::from(vec![0xde, 0xad, 0xbe, 0xef])));
        assert!(args.to.is_some());
    }

    #[test]
    fn tx_args_without_to_is_contract_creation() {
        let payload = serde_json::json!({
            "method": "eth_sendTransaction",
            "params": [{
                "from": "0x9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f",
                "data": "0x60606040",
            }],
        });
        let args = RpcCall::from_payload(&payload)
            .expect("decode")
            .tx_args()
            .expect("args");
        assert!(args.to.is_none());
        assert!(args.value.is_none());
    }

    #[test]
    fn tx_args_requires_from() {
        let payload = serde_json::json!({
            "method": "eth_sendTransaction",
            "params": [{"to": "0x3535353535353535353535353535353535353535"}],
        });
        let call = RpcCall::from_payload(&payload).expect("decode");
        assert!(call.tx_args().is_err());
    }

    #[test]
    fn quantity_accepts_hex_and_decimal() {
        let hex = parse_quantity(Some(&serde_json::json!("0x5208"))).expect("hex");
        assert_eq!(hex, Some(U256::from(21_000u64)));

        let dec = parse_quantity(Some(&serde_json::json!("21000"))).expect("dec");
        assert_eq!(dec, Some(U256::from(21_000u64)));

        let num = parse_quantity(Some(&serde_json::json!(21000))).expect("num");
        assert_eq!(num, Some(U256::from(21_000u64)));

        assert!(parse_quantity(Some(&serde_json::json!("wat"))).is_err());
        assert!(parse_quantity(Some(&serde_json::json!(0.5))).is_err());
    }
}
