//! Candle device selection.

use candle_core::Device;

use crate::core::DetError;

#[cfg(not(feature = "cuda"))]
fn cuda_not_enabled() -> DetError {
    DetError::config_error("CUDA support not enabled. Compile with --features cuda")
}

/// Parses a device string and creates a candle [`Device`].
///
/// # Supported formats
///
/// - `"cpu"` → CPU device
/// - `"cuda"` or `"gpu"` → CUDA device 0
/// - `"cuda:N"` → CUDA device N (e.g., `"cuda:1"`)
///
/// # Errors
///
/// Returns [`DetError::ConfigError`] if the string is not recognized, if CUDA
/// is requested without the `cuda` feature, or if the device cannot be created.
///
/// ```
/// use fpn_det::utils::parse_device;
///
/// let cpu = parse_device("cpu").unwrap();
/// assert!(cpu.is_cpu());
/// assert!(parse_device("tpu").is_err());
/// ```
pub fn parse_device(device_str: &str) -> Result<Device, DetError> {
    let device_str = device_str.to_lowercase();
    match device_str.as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" | "gpu" => {
            #[cfg(feature = "cuda")]
            {
                Device::new_cuda(0).map_err(|e| DetError::ConfigError {
                    message: format!("Failed to create CUDA device: {}", e),
                })
            }
            #[cfg(not(feature = "cuda"))]
            {
                Err(cuda_not_enabled())
            }
        }
        s if s.starts_with("cuda:") => {
            let ordinal: usize = s["cuda:".len()..]
                .parse()
                .map_err(|_| DetError::ConfigError {
                    message: format!("Invalid CUDA device ordinal in '{}'", s),
                })?;
            #[cfg(feature = "cuda")]
            {
                Device::new_cuda(ordinal).map_err(|e| DetError::ConfigError {
                    message: format!("Failed to create CUDA device {}: {}", ordinal, e),
                })
            }
            #[cfg(not(feature = "cuda"))]
            {
                let _ = ordinal;
                Err(cuda_not_enabled())
            }
        }
        _ => Err(DetError::ConfigError {
            message: format!(
                "Unknown device: '{}'. Use 'cpu', 'cuda', or 'cuda:N'",
                device_str
            ),
        }),
    }
}
