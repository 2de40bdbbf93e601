// Bindings produced by `cargo run --bin generate-reflection-service --features gen-proto`.
#[allow(dead_code, clippy::all)]
pub mod reflection_v1 {
    include!("generated/grpc.reflection.v1.rs");
}
