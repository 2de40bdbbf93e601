//! # Fault Documents
//!
//! A non-OK gRPC status is not an engine error: the call reached the server and the server
//! answered. It is rendered as a JSON document in place of the response so the user sees it
//! like any other reply:
//!
//! ```json
//! {
//!     "error": {
//!         "code": "NotFound",
//!         "message": "no such user",
//!         "details": [{ "reason": "..." }]
//!     }
//! }
//! ```
//!
//! Rich error details travel in the `grpc-status-details-bin` trailer as a `google.rpc.Status`.
//! Each detail is an `Any`; it is decoded with the current schema and rendered without its
//! `@type` key. Details whose type the schema does not know are dropped, and `details` is
//! omitted when nothing is left.
use super::codec::{message_to_json, to_text};
use crate::schema::TypeResolver;
use prost::Message;
use prost_reflect::DynamicMessage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tonic::{Code, Status};

const TYPE_KEY: &str = "@type";

/// Wire form of `google.rpc.Status`.
#[derive(Clone, PartialEq, Message)]
pub struct RpcStatus {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(message, repeated, tag = "3")]
    pub details: Vec<prost_types::Any>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FaultDocument {
    pub error: Fault,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Fault {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<Map<String, Value>>,
}

impl FaultDocument {
    /// Builds a fault that did not come from the server (cancellation, local deadline).
    pub fn local(code: Code, message: impl Into<String>) -> Self {
        Self {
            error: Fault {
                code: code_name(code),
                message: message.into(),
                details: Vec::new(),
            },
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn to_text(&self) -> String {
        to_text(&self.to_value())
    }
}

/// Turns `status` into a fault document, resolving detail types through `resolver`.
pub fn decode_fault(status: &Status, resolver: Option<&dyn TypeResolver>) -> FaultDocument {
    let details = match resolver {
        Some(resolver) if !status.details().is_empty() => decode_details(status, resolver),
        _ => Vec::new(),
    };

    FaultDocument {
        error: Fault {
            code: code_name(status.code()),
            message: status.message().to_string(),
            details,
        },
    }
}

fn decode_details(status: &Status, resolver: &dyn TypeResolver) -> Vec<Map<String, Value>> {
    let rpc_status = match RpcStatus::decode(status.details()) {
        Ok(rpc_status) => rpc_status,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring undecodable status details");
            return Vec::new();
        }
    };

    rpc_status
        .details
        .iter()
        .filter_map(|any| decode_detail(any, resolver))
        .collect()
}

fn decode_detail(
    any: &prost_types::Any,
    resolver: &dyn TypeResolver,
) -> Option<Map<String, Value>> {
    let type_name = any.type_url.rsplit('/').next().unwrap_or_default();

    let Some(desc) = resolver.resolve_message(type_name) else {
        tracing::warn!(type_url = %any.type_url, "dropping status detail of unknown type");
        return None;
    };

    let message = match DynamicMessage::decode(desc, any.value.as_slice()) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(
                type_url = %any.type_url,
                error = %e,
                "dropping undecodable status detail"
            );
            return None;
        }
    };

    match message_to_json(&message) {
        Ok(Value::Object(mut object)) => {
            object.remove(TYPE_KEY);
            Some(object)
        }
        // Well-known types render as bare JSON values.
        Ok(other) => Some(Map::from_iter([("value".to_string(), other)])),
        Err(e) => {
            tracing::warn!(
                type_url = %any.type_url,
                error = %e,
                "dropping unrenderable status detail"
            );
            None
        }
    }
}

fn code_name(code: Code) -> String {
    format!("{code:?}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn details_key_is_omitted_when_empty() {
        let fault = decode_fault(&Status::not_found("missing"), None);

        assert_eq!(
            fault.to_value(),
            json!({ "error": { "code": "NotFound", "message": "missing" } })
        );
    }

    #[test]
    fn local_faults_use_the_code_name() {
        let fault = FaultDocument::local(Code::Cancelled, "call cancelled");
        assert_eq!(fault.error.code, "Cancelled");
    }
}
