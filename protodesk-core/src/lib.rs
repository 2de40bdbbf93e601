//! # Protodesk Core
//!
//! `protodesk-core` is the engine behind Protodesk. It invokes arbitrary gRPC methods on
//! remote services whose schema is discovered at runtime, either by compiling `.proto`
//! files or by asking a running server through the gRPC Server Reflection Protocol.
//! No compile-time knowledge of the service types is ever needed.
//!
//! ## Key Components
//!
//! * **[`schema::SchemaSource`]:** Where a schema comes from (static files or a live address),
//!   tagged with a [`schema::Generation`] used to detect stale connections.
//! * **[`schema::SchemaTree`]:** A navigable `Namespace -> Service -> Method` tree plus a flat
//!   method index. It also synthesizes request templates for any method.
//! * **[`grpc::codec`]:** Transcodes JSON text to Protobuf bytes (and back) on the fly, and turns
//!   non-OK statuses into displayable fault documents.
//! * **[`connection::Connection`]:** A lazily dialed channel, reused while the address and
//!   schema generation stay the same.
//! * **[`form::Form`]:** One call slot: address, headers, request/response text, its own
//!   connection and the handle of the call in flight.
//! * **[`project::Project`]:** Owns one schema and a set of forms, and persists itself through
//!   a [`store::StateStore`] after every mutation.
//!
//! ## Feature Flags (Internal use only)
//!
//! * `gen-proto`: Enables support for generating reflection service bindings (internal use).
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod config;
pub mod connection;
pub mod form;
pub mod grpc;
pub mod project;
pub mod reflection;
pub mod schema;
pub mod store;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
