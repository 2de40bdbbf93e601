//! # Server Reflection
//!
//! This module contains the logic necessary to interact with the gRPC Server Reflection Protocol.
//!
//! It lets a project obtain its schema from a running server instead of local `.proto` files.
pub mod client;
mod generated;
