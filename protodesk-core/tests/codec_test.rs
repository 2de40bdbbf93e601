use echo_service::FILE_DESCRIPTOR_SET;
use echo_service::pb::{EchoRequest, ErrorDetail};
use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, MethodDescriptor};
use protodesk_core::grpc::codec::{self, CodecError};
use protodesk_core::grpc::fault::{RpcStatus, decode_fault};
use protodesk_core::schema::{CompiledFiles, Generation, SchemaTree, TypeResolver};
use serde_json::{Value, json};
use std::path::PathBuf;
use tonic::{Code, Status};

fn pool() -> DescriptorPool {
    DescriptorPool::decode(FILE_DESCRIPTOR_SET).expect("Failed to decode descriptor set")
}

fn method(name: &str) -> MethodDescriptor {
    pool()
        .get_service_by_name("echo.EchoService")
        .unwrap()
        .methods()
        .find(|m| m.name() == name)
        .unwrap()
}

#[test]
fn test_encode_produces_wire_bytes_of_the_input_type() {
    let bytes = codec::encode(&method("UnaryEcho"), r#"{ "message": "hello", "delay_ms": 7 }"#)
        .unwrap();

    let decoded = EchoRequest::decode(bytes.as_slice()).unwrap();
    assert_eq!(decoded.message, "hello");
    assert_eq!(decoded.delay_ms, 7);
}

#[test]
fn test_encode_ignores_unknown_keys_and_defaults_missing_ones() {
    let bytes =
        codec::encode(&method("UnaryEcho"), r#"{ "ghost": true, "message": "hi" }"#).unwrap();

    let decoded = EchoRequest::decode(bytes.as_slice()).unwrap();
    assert_eq!(decoded.message, "hi");
    assert_eq!(decoded.delay_ms, 0);
}

#[test]
fn test_encode_rejects_malformed_text() {
    let result = codec::encode(&method("UnaryEcho"), r#"{ "message": "#);
    assert!(matches!(result, Err(CodecError::InvalidJson(_))));
}

#[test]
fn test_encode_rejects_mistyped_values() {
    let result = codec::encode(&method("UnaryEcho"), r#"{ "delay_ms": "soon" }"#);

    assert!(matches!(
        result,
        Err(CodecError::PayloadParseFailed { message, .. }) if message == "echo.EchoRequest"
    ));
}

#[test]
fn test_decode_emits_defaults_under_proto_names() {
    let method = method("UnaryEcho");
    let response = echo_service::pb::EchoResponse {
        message: String::new(),
        count: 9_007_199_254_740_993,
    };

    let text = codec::decode(&method, &response.encode_to_vec()).unwrap();
    let value: Value = serde_json::from_str(&text).unwrap();

    // 64-bit integers stay numbers.
    assert_eq!(value, json!({ "message": "", "count": 9_007_199_254_740_993i64 }));
    assert!(text.starts_with("{\n    \""));
}

#[test]
fn test_client_streaming_accepts_arrays_and_single_objects() {
    let method = method("ClientStreamingEcho");

    let many = codec::request_messages(&method, r#"[{ "message": "a" }, { "message": "b" }]"#)
        .unwrap();
    assert_eq!(many.len(), 2);

    let one = codec::request_messages(&method, r#"{ "message": "a" }"#).unwrap();
    assert_eq!(one.len(), 1);
}

#[test]
fn test_unary_rejects_arrays() {
    let result = codec::request_messages(&method("UnaryEcho"), r#"[{ "message": "a" }]"#);
    assert!(matches!(result, Err(CodecError::UnexpectedArray(_))));
}

fn status_with_details() -> Status {
    let detail = ErrorDetail {
        reason: "EMPTY".to_string(),
        field: "message".to_string(),
    };

    let rpc_status = RpcStatus {
        code: Code::InvalidArgument as i32,
        message: "message must not be empty".to_string(),
        details: vec![
            prost_types::Any {
                type_url: "type.googleapis.com/echo.ErrorDetail".to_string(),
                value: detail.encode_to_vec(),
            },
            prost_types::Any {
                type_url: "type.googleapis.com/unknown.Mystery".to_string(),
                value: vec![8, 1],
            },
        ],
    };

    Status::with_details(
        Code::InvalidArgument,
        "message must not be empty",
        rpc_status.encode_to_vec().into(),
    )
}

#[test]
fn test_fault_details_are_resolved_and_stripped() {
    let resolver = CompiledFiles::from_pool(pool());

    let fault = decode_fault(&status_with_details(), Some(&resolver as &dyn TypeResolver));

    assert_eq!(fault.error.code, "InvalidArgument");
    assert_eq!(fault.error.message, "message must not be empty");

    // The unknown detail is dropped, the known one loses its type tag.
    assert_eq!(fault.error.details.len(), 1);
    let detail = &fault.error.details[0];
    assert!(!detail.contains_key("@type"));
    assert_eq!(detail["reason"], "EMPTY");
    assert_eq!(detail["field"], "message");
}

#[test]
fn test_fault_without_resolver_has_no_details() {
    let fault = decode_fault(&status_with_details(), None);

    let value = fault.to_value();
    assert_eq!(
        value,
        json!({ "error": { "code": "InvalidArgument", "message": "message must not be empty" } })
    );
}

#[test]
fn test_fault_with_garbage_details_keeps_code_and_message() {
    let resolver = CompiledFiles::from_pool(pool());
    let status = Status::with_details(Code::Internal, "boom", vec![0xff, 0xff, 0xff].into());

    let fault = decode_fault(&status, Some(&resolver as &dyn TypeResolver));

    assert_eq!(fault.error.code, "Internal");
    assert!(fault.error.details.is_empty());
}

fn fixture_tree(file: &str) -> SchemaTree {
    let fixtures = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    SchemaTree::from_files(&[fixtures.clone()], &[fixtures.join(file)], Generation::next())
        .unwrap()
}

/// Values a template or a decoded default may hold for "nothing set".
fn is_zero_like(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        // Enums decode by name, timestamps as RFC 3339.
        Value::String(s) => {
            s.is_empty() || s.ends_with("_UNSPECIFIED") || s == "1970-01-01T00:00:00Z"
        }
        Value::Array(items) => items.iter().all(is_zero_like),
        Value::Object(map) => map.values().all(is_zero_like),
    }
}

/// Every key of `template` is in `decoded` with an equivalent value; extra keys are zero-like.
fn assert_equivalent(template: &Value, decoded: &Value, path: &str) {
    match (template, decoded) {
        (Value::Object(expected), Value::Object(actual)) => {
            for (key, value) in expected {
                let Some(other) = actual.get(key) else {
                    panic!("{path}.{key} is missing from {decoded}");
                };
                assert_equivalent(value, other, &format!("{path}.{key}"));
            }
            for (key, value) in actual {
                if !expected.contains_key(key) {
                    assert!(is_zero_like(value), "{path}.{key} = {value}");
                }
            }
        }
        (Value::Array(expected), Value::Array(actual)) => {
            assert_eq!(expected.len(), actual.len(), "{path}");
            for (i, (e, a)) in expected.iter().zip(actual).enumerate() {
                assert_equivalent(e, a, &format!("{path}[{i}]"));
            }
        }
        (expected, actual) => assert!(
            expected == actual || (is_zero_like(expected) && is_zero_like(actual)),
            "{path}: {expected} vs {actual}"
        ),
    }
}

#[test]
fn test_decode_emits_null_for_unset_fields() {
    let tree = fixture_tree("catalog.proto");
    let put = tree.method("shop.Catalog.Put").unwrap();

    let empty: Value = serde_json::from_str(&codec::decode(put, &[]).unwrap()).unwrap();
    assert_eq!(empty, json!({ "item": null }));

    let reply = codec::json_to_message(&put.output(), json!({ "item": { "sku": "x" } })).unwrap();
    let text = codec::decode(put, &reply.encode_to_vec()).unwrap();
    let mut reply: Value = serde_json::from_str(&text).unwrap();
    let item = reply["item"].take();

    for key in ["created_at", "percent", "amount", "note", "parent"] {
        assert_eq!(item[key], Value::Null, "{key}");
    }
    assert_eq!(item["sku"], "x");
    assert_eq!(item["tags"], json!([]));

    let keys: Vec<_> = item.as_object().unwrap().keys().cloned().collect();
    assert_eq!(
        keys,
        vec![
            "sku",
            "tags",
            "prices",
            "color",
            "available",
            "thumbnail",
            "created_at",
            "percent",
            "amount",
            "note",
            "parent",
            "labels",
            "weight"
        ]
    );
}

#[test]
fn test_nested_messages_in_lists_and_maps_are_filled() {
    let tree = fixture_tree("catalog.proto");
    let put = tree.method("shop.Catalog.Put").unwrap();

    let item = json!({ "parent": { "sku": "p" }, "prices": { "eur": { "currency": "EUR" } } });
    let message = codec::json_to_message(&put.input(), item).unwrap();
    let decoded = codec::message_to_json(&message).unwrap();

    assert_eq!(decoded["parent"]["sku"], "p");
    assert_eq!(decoded["parent"]["parent"], Value::Null);
    assert_eq!(decoded["prices"]["eur"], json!({ "currency": "EUR", "units": 0, "rate": 0.0 }));
}

#[test]
fn test_template_survives_encode_then_decode() {
    let tree = fixture_tree("catalog.proto");
    let put = tree.method("shop.Catalog.Put").unwrap();
    let template = tree.template("shop.Catalog.Put").unwrap();

    let bytes = codec::encode(put, &codec::to_text(&template)).unwrap();
    let message = DynamicMessage::decode(put.input(), bytes.as_slice()).unwrap();
    let decoded = codec::message_to_json(&message).unwrap();

    assert_equivalent(&template, &decoded, "Item");
}

#[test]
fn test_template_with_declared_defaults_survives_encode_then_decode() {
    let tree = fixture_tree("legacy.proto");
    let apply = tree.method("legacy.Config.Apply").unwrap();
    let template = tree.template("legacy.Config.Apply").unwrap();

    let bytes = codec::encode(apply, &codec::to_text(&template)).unwrap();
    let decoded: Value = serde_json::from_str(&codec::decode(apply, &bytes).unwrap()).unwrap();

    assert_eq!(decoded, template);
}

#[test]
fn test_decoded_output_encodes_again() {
    let tree = fixture_tree("catalog.proto");
    let put = tree.method("shop.Catalog.Put").unwrap();

    let original = json!({
        "sku": "a-1",
        "tags": ["new"],
        "amount": { "currency": "EUR", "units": 5, "rate": 0.5 },
        "parent": { "sku": "root" },
        "labels": { "7": "seven" }
    });
    let message = codec::json_to_message(&put.input(), original).unwrap();
    let decoded = codec::message_to_json(&message).unwrap();

    // Nulls, including the unset members of the oneof, are read back as "not set".
    let bytes = codec::encode(put, &codec::to_text(&decoded)).unwrap();
    let again = DynamicMessage::decode(put.input(), bytes.as_slice()).unwrap();

    assert_eq!(again.encode_to_vec(), message.encode_to_vec());
    assert_eq!(codec::message_to_json(&again).unwrap(), decoded);

    // Proto2 messages with unset fields round-trip too.
    let legacy = fixture_tree("legacy.proto");
    let apply = legacy.method("legacy.Config.Apply").unwrap();
    let text = codec::decode(apply, &[]).unwrap();
    assert_eq!(
        serde_json::from_str::<Value>(&text).unwrap(),
        json!({ "retries": null, "mode": null, "verbose": null })
    );
    assert!(codec::encode(apply, &text).unwrap().is_empty());
}
