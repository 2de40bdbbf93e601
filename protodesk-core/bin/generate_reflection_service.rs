//! Regenerates the checked-in `grpc.reflection.v1` client from `proto/reflection.proto`.
//!
//! Run with `cargo run -p protodesk_core --bin generate-reflection-service --features gen-proto`.
use std::path::Path;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let target = root.join("src").join("reflection").join("generated");

    std::fs::create_dir_all(&target)?;

    let descriptors = protox::compile(["reflection.proto"], [root.join("proto")])?;

    tonic_prost_build::configure()
        .build_client(true)
        .build_server(false)
        .out_dir(&target)
        .compile_fds(descriptors)?;

    eprintln!("reflection client written to {}", target.display());

    Ok(())
}
