//! # Schema
//!
//! Everything needed to go from "some `.proto` files" or "a server address" to a navigable
//! catalog of callable methods:
//!
//! * [`source`]: the immutable description of where a schema comes from, plus its [`Generation`].
//! * [`resolver`]: the [`TypeResolver`] capability and its two implementations
//!   (compiled files and server reflection). Nothing else in the engine cares which one is active.
//! * [`tree`]: the [`SchemaTree`] built from a resolver.
//! * [`shape`] and [`template`]: a structural view of field types and the zero-value request
//!   templates derived from it.
pub mod resolver;
pub mod shape;
pub mod source;
pub mod template;
pub mod tree;

pub use resolver::{CompiledFiles, ReflectedSchema, TypeResolver};
pub use source::{Generation, SchemaOrigin, SchemaSource};
pub use tree::{SchemaNode, SchemaTree};

use crate::reflection::client::ReflectionResolveError;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Failed to compile proto files: '{0}'")]
    CompileFailed(#[source] protox::Error),

    #[error("Server reflection is unavailable at '{address}': '{source}'")]
    ReflectionUnavailable {
        address: String,
        #[source]
        source: ReflectionResolveError,
    },

    #[error("Failed to build descriptor pool: '{0}'")]
    Descriptor(#[from] prost_reflect::DescriptorError),

    #[error("Method '{0}' is not part of the current schema")]
    UnknownMethodId(String),
}
