//! # Request Templates
//!
//! Synthesizes a zero-value JSON payload for a message type so the user starts from a
//! complete, correctly shaped request instead of an empty object.
//!
//! * Scalars become their zero value (`0`, `0.0`, `false`, `""`), bytes become an empty
//!   (base64) string and enums become `0`.
//! * Lists hold **one** synthesized element and maps hold **one** synthesized entry, so the
//!   expected element shape is visible.
//! * Fields keep their declaration order.
use super::shape::{ScalarKind, Shape, ShapeVisitor, message_fields};
use prost_reflect::{EnumDescriptor, MessageDescriptor};
use serde_json::{Map, Value};

/// Builds the template for `message`.
pub fn synthesize(message: &MessageDescriptor) -> Value {
    let mut synthesizer = TemplateSynthesizer::default();
    synthesizer.visit_message(message)
}

#[derive(Default)]
struct TemplateSynthesizer {
    // Messages currently being expanded, to cut self-referencing types short.
    expanding: Vec<String>,
}

impl ShapeVisitor for TemplateSynthesizer {
    type Output = Value;

    fn visit_scalar(&mut self, kind: ScalarKind) -> Value {
        match kind {
            ScalarKind::Int => Value::from(0),
            ScalarKind::Float => Value::from(0.0),
            ScalarKind::Bool => Value::Bool(false),
            ScalarKind::String | ScalarKind::Bytes => Value::String(String::new()),
        }
    }

    fn visit_enum(&mut self, _desc: &EnumDescriptor) -> Value {
        Value::from(0)
    }

    fn visit_message(&mut self, desc: &MessageDescriptor) -> Value {
        if let Some(value) = well_known_template(desc.full_name()) {
            return value;
        }

        if self.expanding.iter().any(|name| name == desc.full_name()) {
            return Value::Object(Map::new());
        }

        self.expanding.push(desc.full_name().to_string());

        let mut object = Map::new();
        for field in message_fields(desc) {
            let value = match field.default {
                Some(default) => default,
                None => field.shape.accept(self),
            };
            object.insert(field.name, value);
        }

        self.expanding.pop();

        Value::Object(object)
    }

    fn visit_list(&mut self, element: &Shape) -> Value {
        Value::Array(vec![element.accept(self)])
    }

    fn visit_map(&mut self, key: &Shape, value: &Shape) -> Value {
        let key = match key.accept(self) {
            Value::String(s) => s,
            other => other.to_string(),
        };

        let mut object = Map::new();
        object.insert(key, value.accept(self));
        Value::Object(object)
    }
}

// Well-known types have a canonical JSON form that differs from their structure.
fn well_known_template(full_name: &str) -> Option<Value> {
    let value = match full_name {
        "google.protobuf.Timestamp" => Value::from("1970-01-01T00:00:00Z"),
        "google.protobuf.Duration" => Value::from("0s"),
        "google.protobuf.FieldMask" => Value::from(""),
        "google.protobuf.Struct" | "google.protobuf.Empty" => Value::Object(Map::new()),
        "google.protobuf.ListValue" => Value::Array(vec![]),
        "google.protobuf.Value" | "google.protobuf.Any" => Value::Null,
        "google.protobuf.DoubleValue" | "google.protobuf.FloatValue" => Value::from(0.0),
        "google.protobuf.Int64Value"
        | "google.protobuf.UInt64Value"
        | "google.protobuf.Int32Value"
        | "google.protobuf.UInt32Value" => Value::from(0),
        "google.protobuf.BoolValue" => Value::Bool(false),
        "google.protobuf.StringValue" | "google.protobuf.BytesValue" => Value::from(""),
        _ => return None,
    };

    Some(value)
}
