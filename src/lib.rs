pub mod buffer;
pub mod camera;
pub mod capture;
pub mod convert;
pub mod error;
pub mod hal;
pub mod pipeline;
pub mod utils;

use std::path::Path;

use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

pub use camera::{Camera, CameraDevice, CameraInfo, RequestTemplate, VirtualCamera};
pub use error::{Error, Result};
pub use hal::CameraHal;

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub jpeg: JpegConfig,
    pub source: SourceConfig,
    /// Number of virtual cameras the registry exposes
    pub cameras: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on waiting for a buffer's acquire fence
    pub fence_timeout_ms: u64,
    /// Buffers each stream may have in flight
    pub max_buffers: u32,
    /// CPU to pin fulfillment workers to
    pub worker_cpu: Option<usize>,
    pub source_ring_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JpegConfig {
    /// Used when a request carries no `jpeg.quality`
    pub default_quality: u8,
}

/// Raw frame feed used by the demo binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            jpeg: JpegConfig::default(),
            source: SourceConfig::default(),
            cameras: 2,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fence_timeout_ms: 5000,
            max_buffers: 1,
            worker_cpu: None,
            source_ring_capacity: 4,
        }
    }
}

impl Default for JpegConfig {
    fn default() -> Self {
        Self {
            default_quality: 90,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            format: PixelFormat::Yuv420,
        }
    }
}

impl Config {
    /// Defaults, overlaid with `path` (TOML) if given, then with
    /// `VCAM__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("VCAM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.pipeline.fence_timeout_ms, 5000);
        assert_eq!(config.pipeline.max_buffers, 1);
        assert_eq!(config.jpeg.default_quality, 90);
        assert_eq!(config.cameras, 2);
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "cameras = 3\n[pipeline]\nfence_timeout_ms = 250").unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.cameras, 3);
        assert_eq!(config.pipeline.fence_timeout_ms, 250);
        assert_eq!(config.pipeline.max_buffers, 1);
        assert_eq!(config.source.format, PixelFormat::Yuv420);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(matches!(
            Config::load(Some(Path::new("/nonexistent/vcam.toml"))),
            Err(Error::Config(_))
        ));
    }
}
