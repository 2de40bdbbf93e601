//! # Dynamic gRPC Transport
//!
//! This module contains the building blocks for performing gRPC calls using message types
//! that are only known at runtime.
//!
//! Unlike standard `tonic` clients which are strongly typed (e.g., `HelloRequest`),
//! the components here work with `prost_reflect::DynamicMessage` values built from JSON text,
//! and render whatever comes back (messages or error statuses) as JSON text again.
pub mod client;
pub mod codec;
pub mod fault;
