use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_root = PathBuf::from("../proto");

    println!("cargo:rerun-if-changed=../proto/sso/v1/");

    // Fall back to the bundled protoc when none is configured.
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_build::configure()
        .build_server(true)
        // The HTTP gateway talks to the gRPC server through the generated client.
        .build_client(true)
        .type_attribute(
            ".sso.v1",
            "#[derive(serde::Serialize, serde::Deserialize)] #[serde(default)]",
        )
        .file_descriptor_set_path(
            PathBuf::from(std::env::var("OUT_DIR")?).join("sso_service_descriptor.bin"),
        )
        .compile_protos(&["../proto/sso/v1/sso.proto"], &[proto_root])?;

    Ok(())
}
