//! Compiles `proto/qntx_plugin.proto` into `OUT_DIR`, included by `src/proto.rs` via
//! `tonic::include_proto!`.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/qntx_plugin.proto");
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/qntx_plugin.proto"], &["proto"])?;
    Ok(())
}
