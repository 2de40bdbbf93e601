use prost::Message;
use std::env::var;
use std::io::{Error, Result};
use std::path::PathBuf;

fn main() -> Result<()> {
    // List of proto files containing a message definition
    let proto_files = &[
        // Services
        "echo.proto",
    ];

    // Name of the folder containing the proto definitions
    let proto_folder = "proto";
    let out_dir = PathBuf::from(var("OUT_DIR").map_err(Error::other)?);

    println!("cargo:rerun-if-changed={proto_folder}");

    // Compiled in-process, no `protoc` needed.
    let fds = protox::Compiler::new([proto_folder])
        .map_err(Error::other)?
        .include_imports(true)
        .open_files(proto_files)
        .map_err(Error::other)?
        .file_descriptor_set();

    std::fs::write(out_dir.join("descriptors.bin"), fds.encode_to_vec())?;

    tonic_prost_build::configure()
        .build_client(false)
        .compile_fds(fds)
}
