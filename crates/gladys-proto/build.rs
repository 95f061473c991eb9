use std::io::Result;

fn main() -> Result<()> {
    std::env::set_var(
        "PROTOC",
        protoc_bin_vendored::protoc_bin_path().expect("failed to locate vendored protoc binary"),
    );

    // Generate gRPC client and server code for all four services.
    tonic_build::configure()
        .type_attribute(".", "#[allow(clippy::large_enum_variant)]")
        .type_attribute(".", "#[derive(serde::Serialize, serde::Deserialize)]")
        .compile_protos(
            &[
                "../../proto/common.proto",
                "../../proto/memory.proto",
                "../../proto/salience.proto",
                "../../proto/executive.proto",
                "../../proto/orchestrator.proto",
            ],
            &["../../proto/"],
        )?;

    println!("cargo:rerun-if-changed=../../proto");

    Ok(())
}
