fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Both services are needed on both sides: the plugin serves DevicePlugin
    // and calls Registration, the tests do the opposite.
    tonic_build::configure().compile_protos(&["proto/api.proto"], &["proto"])?;
    Ok(())
}
