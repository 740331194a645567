//! Compiles the vendored discovery protos with tonic-build.

use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    let protos: Vec<PathBuf> = ["mesh/discovery/v1/discovery.proto"]
        .iter()
        .map(|p| PathBuf::from("proto").join(p))
        .collect();

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&protos, &[PathBuf::from("proto")])?;

    for proto in &protos {
        println!("cargo:rerun-if-changed={}", proto.display());
    }
    println!("cargo:rerun-if-changed=proto/google/protobuf/any.proto");
    Ok(())
}
