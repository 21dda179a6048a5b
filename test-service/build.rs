use prost::Message;
use std::env::var;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // List of proto files containing a service definition
    let proto_files = &[
        "proto/test.proto",
        "proto/any_test.proto",
        "proto/echo.proto",
    ];

    // Name of the folder containing the proto definitions
    let proto_folder = "proto";
    let out_dir = PathBuf::from(var("OUT_DIR")?);

    println!("cargo:rerun-if-changed={proto_folder}");

    // protox is a pure-Rust compiler, no system `protoc` is needed
    let fds = protox::compile(proto_files, [proto_folder])?;

    std::fs::write(out_dir.join("descriptors.bin"), fds.encode_to_vec())?;

    tonic_prost_build::configure()
        .build_client(false)
        .compile_fds(fds)?;

    Ok(())
}
