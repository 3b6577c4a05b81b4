//! rTorrent `system.multicall` over the `xmlrpc` crate
//!
//! The request body is encoded here but sent by the backend's own HTTP client, so
//! basic auth and timeouts stay in one place. The fetched response body is then
//! decoded by replaying it through an [`xmlrpc::Transport`] that never touches the
//! network.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::io::Cursor;
use xmlrpc::{Request, Value};

/// Hands an already fetched response body to the `xmlrpc` decoder
struct Replay(Vec<u8>);

impl xmlrpc::Transport for Replay {
    type Stream = Cursor<Vec<u8>>;

    fn transmit(
        self,
        _request: &Request<'_>,
    ) -> std::result::Result<Self::Stream, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Cursor::new(self.0))
    }
}

/// A batch of string-parameter calls sent as one `system.multicall`
pub(crate) struct Multicall {
    request: Request<'static>,
    methods: Vec<&'static str>,
}

impl Multicall {
    pub(crate) fn new(calls: &[(&'static str, Vec<&str>)]) -> Self {
        let entries = calls
            .iter()
            .map(|(method, params)| {
                let mut entry = BTreeMap::new();
                entry.insert(
                    "methodName".to_string(),
                    Value::String((*method).to_string()),
                );
                entry.insert(
                    "params".to_string(),
                    Value::Array(
                        params
                            .iter()
                            .map(|p| Value::String((*p).to_string()))
                            .collect(),
                    ),
                );
                Value::Struct(entry)
            })
            .collect();

        Self {
            request: Request::new("system.multicall").arg(Value::Array(entries)),
            methods: calls.iter().map(|(method, _)| *method).collect(),
        }
    }

    /// Encoded `methodCall` document
    pub(crate) fn body(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        self.request.write_as_xml(&mut body)?;
        Ok(body)
    }

    /// Decode a response body into one value per call, in call order
    ///
    /// A fault for the whole request or for any single call is a temporary
    /// malfunction; anything that is not a multicall result violates the protocol.
    pub(crate) fn results(&self, body: Vec<u8>) -> Result<Vec<Value>> {
        let response = self.request.call(Replay(body)).map_err(|e| match e.fault() {
            Some(fault) => {
                tracing::debug!(
                    code = fault.fault_code,
                    fault = %fault.fault_string,
                    "xml-rpc fault"
                );
                Error::TemporaryMalfunction("Server returned a fault.".to_string())
            }
            None => Error::InvariantViolation(format!("unreadable XML-RPC response: {e}")),
        })?;

        let items = match response {
            Value::Array(items) => items,
            other => {
                return Err(Error::InvariantViolation(format!(
                    "multicall response is not an array: {other:?}"
                )));
            }
        };
        if items.len() != self.methods.len() {
            return Err(Error::InvariantViolation(format!(
                "multicall returned {} results instead of {}",
                items.len(),
                self.methods.len()
            )));
        }

        items
            .into_iter()
            .zip(&self.methods)
            .map(|(item, method)| match item {
                Value::Array(mut wrapped) if wrapped.len() == 1 => Ok(wrapped.remove(0)),
                Value::Struct(fault) if fault.contains_key("faultCode") => {
                    tracing::debug!(method, fault = ?fault, "xml-rpc fault in multicall");
                    Err(Error::TemporaryMalfunction(
                        "Server returned a fault.".to_string(),
                    ))
                }
                other => Err(Error::InvariantViolation(format!(
                    "{method} returned {other:?}"
                ))),
            })
            .collect()
    }
}

/// Integer view of a call result, accepting rTorrent's `i4`, `i8` and stringly ints
pub(crate) fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(i64::from(*i)),
        Value::Int64(i) => Some(*i),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
