use candle_core::Device;

/// Pick the accelerator this build was compiled for, falling back to CPU.
///
/// NOTE: cuda and metal are opt-in, enable them with `--features cuda` or `--features metal`.
pub fn device() -> Device {
    #[cfg(feature = "cuda")]
    {
        match Device::new_cuda(0) {
            Ok(device) => return device,
            Err(e) => tracing::warn!("CUDA not available, defaulting to CPU: {e}"),
        }
    }

    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(device) => return device,
            Err(e) => tracing::warn!("Metal not available, defaulting to CPU: {e}"),
        }
    }

    Device::Cpu
}
