//! # Field Shapes
//!
//! A small structural view over protobuf field descriptors: every field is a scalar, an enum,
//! a nested message, a list of one of those, or a map between two of those.
//!
//! Walking a schema is done with a [`ShapeVisitor`] instead of matching on the dozen
//! protobuf wire types everywhere.
use prost_reflect::{EnumDescriptor, FieldDescriptor, Kind, MessageDescriptor, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Int,
    Float,
    Bool,
    String,
    Bytes,
}

#[derive(Debug, Clone)]
pub enum Shape {
    Scalar(ScalarKind),
    Enum(EnumDescriptor),
    Message(MessageDescriptor),
    List(Box<Shape>),
    Map(Box<Shape>, Box<Shape>),
}

impl Shape {
    /// The shape of a field, taking its cardinality (list / map) into account.
    pub fn of(field: &FieldDescriptor) -> Self {
        if field.is_map()
            && let Kind::Message(entry) = field.kind()
        {
            let key = Shape::element(entry.map_entry_key_field().kind());
            let value = Shape::element(entry.map_entry_value_field().kind());
            return Shape::Map(Box::new(key), Box::new(value));
        }

        let element = Shape::element(field.kind());

        if field.is_list() {
            Shape::List(Box::new(element))
        } else {
            element
        }
    }

    fn element(kind: Kind) -> Self {
        match kind {
            Kind::Double | Kind::Float => Shape::Scalar(ScalarKind::Float),
            Kind::Int32
            | Kind::Int64
            | Kind::Uint32
            | Kind::Uint64
            | Kind::Sint32
            | Kind::Sint64
            | Kind::Fixed32
            | Kind::Fixed64
            | Kind::Sfixed32
            | Kind::Sfixed64 => Shape::Scalar(ScalarKind::Int),
            Kind::Bool => Shape::Scalar(ScalarKind::Bool),
            Kind::String => Shape::Scalar(ScalarKind::String),
            Kind::Bytes => Shape::Scalar(ScalarKind::Bytes),
            Kind::Enum(desc) => Shape::Enum(desc),
            Kind::Message(desc) => Shape::Message(desc),
        }
    }

    pub fn accept<V: ShapeVisitor>(&self, visitor: &mut V) -> V::Output {
        match self {
            Shape::Scalar(kind) => visitor.visit_scalar(*kind),
            Shape::Enum(desc) => visitor.visit_enum(desc),
            Shape::Message(desc) => visitor.visit_message(desc),
            Shape::List(element) => visitor.visit_list(element),
            Shape::Map(key, value) => visitor.visit_map(key, value),
        }
    }
}

pub trait ShapeVisitor {
    type Output;

    fn visit_scalar(&mut self, kind: ScalarKind) -> Self::Output;
    fn visit_enum(&mut self, desc: &EnumDescriptor) -> Self::Output;
    fn visit_message(&mut self, desc: &MessageDescriptor) -> Self::Output;
    fn visit_list(&mut self, element: &Shape) -> Self::Output;
    fn visit_map(&mut self, key: &Shape, value: &Shape) -> Self::Output;
}

/// A message field as seen by the template synthesizer.
#[derive(Debug, Clone)]
pub struct FieldShape {
    pub name: String,
    pub shape: Shape,
    /// Explicitly declared default (proto2 `[default = ...]`), rendered as JSON.
    pub default: Option<serde_json::Value>,
}

impl FieldShape {
    pub fn of(field: &FieldDescriptor) -> Self {
        Self {
            name: field.name().to_string(),
            shape: Shape::of(field),
            default: declared_default(field),
        }
    }
}

/// The fields of `message` in declaration order.
///
/// Only the first member of each oneof is kept, since setting several members of the
/// same oneof is rejected when the payload is encoded. Proto3 `optional` fields live in
/// synthetic oneofs and are always kept.
pub fn message_fields(message: &MessageDescriptor) -> Vec<FieldShape> {
    message
        .fields()
        .filter(|field| match field.containing_oneof() {
            Some(oneof) if !oneof.is_synthetic() => {
                oneof.fields().next().map(|first| first.number()) == Some(field.number())
            }
            _ => true,
        })
        .map(|field| FieldShape::of(&field))
        .collect()
}

fn declared_default(field: &FieldDescriptor) -> Option<serde_json::Value> {
    if field.is_list() || field.is_map() {
        return None;
    }

    field.field_descriptor_proto().default_value.as_ref()?;

    match Value::default_value_for_field(field) {
        Value::Bool(v) => Some(v.into()),
        Value::I32(v) => Some(v.into()),
        Value::I64(v) => Some(v.into()),
        Value::U32(v) => Some(v.into()),
        Value::U64(v) => Some(v.into()),
        Value::F32(v) => serde_json::Number::from_f64(v.into()).map(serde_json::Value::Number),
        Value::F64(v) => serde_json::Number::from_f64(v).map(serde_json::Value::Number),
        Value::String(v) => Some(v.into()),
        Value::EnumNumber(v) => Some(v.into()),
        _ => None,
    }
}
