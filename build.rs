fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 🛡️ SLA: Protocol Buffer Compilation
    // This script tells Cargo to re-run if the .proto file changes.
    // It maps the shared Slipway protobuf definition into the 'slipway_pipeline' module.

    println!("cargo:rerun-if-changed=proto/slipway/pipeline/v1/pipeline.proto");

    // The build environment has no system `protoc`, so we compile the
    // descriptor set with the pure-Rust `protox` compiler and hand the
    // encoded FileDescriptorSet to tonic-build instead of invoking protoc.
    let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR")?);
    let fds_path = out_dir.join("slipway_pipeline_fds.bin");

    let mut compiler = protox::Compiler::new(["proto"])?;
    compiler.include_source_info(true);
    compiler.open_files(["slipway/pipeline/v1/pipeline.proto"])?;
    std::fs::write(&fds_path, compiler.encode_file_descriptor_set())?;

    tonic_build::configure()
        // 🛡️ Zero-Trust: We don't generate client code here because the Agent
        // is strictly a SERVER. This reduces the final binary attack surface.
        .build_client(false)
        .build_server(true)
        .file_descriptor_set_path(&fds_path)
        .skip_protoc_run()
        // Ensure we support the BuildOutcome streaming requirements
        .compile(
            &["proto/slipway/pipeline/v1/pipeline.proto"], // Path to the shared definition
            &["proto"],                                    // Include paths for imports
        )?;

    Ok(())
}
