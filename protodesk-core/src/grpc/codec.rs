//! # JSON <-> Protobuf Codec
//!
//! Two layers live here:
//!
//! 1. **Text transcoding**: [`encode`] turns free-form JSON text into the Protobuf bytes of a
//!    method's input type, and [`decode`] turns bytes of its output type back into JSON text.
//!    Unknown keys are ignored, missing keys take their default, and decoding emits every field
//!    (defaults included) under its original proto name, so a decoded response can be fed back
//!    as a request without loss.
//! 2. **[`DynamicCodec`]**: an implementation of `tonic::codec::Codec` moving
//!    `DynamicMessage` values on and off the wire, bypassing generated Rust structs.
use prost::Message;
use prost_reflect::{
    DeserializeOptions, DynamicMessage, FieldDescriptor, Kind, MessageDescriptor,
    MethodDescriptor, ReflectMessage, SerializeOptions,
};
use serde::Serialize;
use serde_json::{Map, Value};
use serde_json::ser::PrettyFormatter;
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

const INDENT: &[u8] = b"    ";

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Request payload is not valid JSON: '{0}'")]
    InvalidJson(#[source] serde_json::Error),

    #[error("Request payload does not match '{message}': '{source}'")]
    PayloadParseFailed {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("'{0}' takes a single JSON object, not an array")]
    UnexpectedArray(String),

    #[error("Failed to decode '{message}' from Protobuf bytes: '{source}'")]
    Decode {
        message: String,
        #[source]
        source: prost::DecodeError,
    },

    #[error("Failed to render '{message}' as JSON: '{source}'")]
    Render {
        message: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Parses `text` and maps it onto the input type of `method`, returning the wire bytes.
pub fn encode(method: &MethodDescriptor, text: &str) -> Result<Vec<u8>, CodecError> {
    let value = parse_text(text)?;
    let message = json_to_message(&method.input(), value)?;
    Ok(message.encode_to_vec())
}

/// Decodes wire bytes of the output type of `method` into pretty JSON text.
pub fn decode(method: &MethodDescriptor, bytes: &[u8]) -> Result<String, CodecError> {
    let output = method.output();
    let message =
        DynamicMessage::decode(output.clone(), bytes).map_err(|source| CodecError::Decode {
            message: output.full_name().to_string(),
            source,
        })?;

    Ok(to_text(&message_to_json(&message)?))
}

/// Builds the messages to send for `method` out of request text.
///
/// Client and bidirectional streaming methods accept an array of objects (one message each)
/// or a single object (sent as a one-message stream). Other methods take exactly one object.
pub fn request_messages(
    method: &MethodDescriptor,
    text: &str,
) -> Result<Vec<DynamicMessage>, CodecError> {
    let input = method.input();

    match parse_text(text)? {
        Value::Array(items) if method.is_client_streaming() => items
            .into_iter()
            .map(|item| json_to_message(&input, item))
            .collect(),
        Value::Array(_) => Err(CodecError::UnexpectedArray(method.full_name().to_string())),
        value => Ok(vec![json_to_message(&input, value)?]),
    }
}

pub fn parse_text(text: &str) -> Result<Value, CodecError> {
    serde_json::from_str(text).map_err(CodecError::InvalidJson)
}

pub fn json_to_message(
    desc: &MessageDescriptor,
    value: Value,
) -> Result<DynamicMessage, CodecError> {
    let options = DeserializeOptions::new().deny_unknown_fields(false);

    DynamicMessage::deserialize_with_options(desc.clone(), value, &options).map_err(|source| {
        CodecError::PayloadParseFailed {
            message: desc.full_name().to_string(),
            source,
        }
    })
}

/// Renders `message` as JSON. Fields without a value (unset messages, unset oneof members,
/// unset fields with explicit presence) are emitted as `null`.
pub fn message_to_json(message: &DynamicMessage) -> Result<Value, CodecError> {
    let options = SerializeOptions::new()
        .skip_default_fields(false)
        .use_proto_field_name(true)
        .stringify_64_bit_integers(false);

    let desc = message.descriptor();
    let mut value = message
        .serialize_with_options(serde_json::value::Serializer, &options)
        .map_err(|source| CodecError::Render {
            message: desc.full_name().to_string(),
            source,
        })?;

    fill_unset_fields(&desc, &mut value);
    Ok(value)
}

fn fill_unset_fields(desc: &MessageDescriptor, value: &mut Value) {
    // Well-known types have their own JSON form.
    if desc.package_name() == "google.protobuf" {
        return;
    }
    let Value::Object(object) = value else {
        return;
    };

    let mut rendered = std::mem::take(object);
    let mut filled = Map::new();

    for field in desc.fields() {
        let mut entry = rendered.remove(field.name()).unwrap_or(Value::Null);
        fill_nested(&field, &mut entry);
        filled.insert(field.name().to_string(), entry);
    }
    filled.extend(rendered);

    *object = filled;
}

fn fill_nested(field: &FieldDescriptor, value: &mut Value) {
    let Kind::Message(inner) = field.kind() else {
        return;
    };

    if field.is_map() {
        let Kind::Message(entry) = inner.map_entry_value_field().kind() else {
            return;
        };
        if let Value::Object(map) = value {
            map.values_mut().for_each(|item| fill_unset_fields(&entry, item));
        }
        return;
    }

    match value {
        Value::Array(items) => items.iter_mut().for_each(|item| fill_unset_fields(&inner, item)),
        other => fill_unset_fields(&inner, other),
    }
}

/// Renders JSON with a four-space indentation.
pub fn to_text(value: &Value) -> String {
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(INDENT));

    match value.serialize(&mut serializer) {
        Ok(()) => String::from_utf8(buf).unwrap_or_else(|_| value.to_string()),
        Err(_) => value.to_string(),
    }
}

/// A Codec moving `DynamicMessage` values on and off the wire.
///
/// It holds the descriptors (schemas) for both the request and the response messages.
pub struct DynamicCodec {
    /// Schema for the input message.
    req_desc: MessageDescriptor,
    /// Schema for the output message.
    res_desc: MessageDescriptor,
}

impl DynamicCodec {
    pub fn new(req_desc: MessageDescriptor, res_desc: MessageDescriptor) -> Self {
        Self { req_desc, res_desc }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;

    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder(self.req_desc.clone())
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder(self.res_desc.clone())
    }
}

pub struct DynamicEncoder(MessageDescriptor);

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        if item.descriptor() != self.0 {
            return Err(Status::internal(format!(
                "Expected a '{}' message, got '{}'",
                self.0.full_name(),
                item.descriptor().full_name()
            )));
        }

        item.encode_raw(dst);
        Ok(())
    }
}

pub struct DynamicDecoder(MessageDescriptor);

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let mut msg = DynamicMessage::new(self.0.clone());
        msg.merge(src)
            .map_err(|e| Status::internal(format!("Failed to decode Protobuf bytes: {e}")))?;

        Ok(Some(msg))
    }
}
