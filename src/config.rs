//! Capture configuration.
//!
//! Everything the initialization sequence needs is carried in [`CaptureConfig`],
//! loaded from a TOML file and overridden from the command line.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::traits::{DeviceFilter, FrameFormat};

/// Vendor id of the PureThermal UVC board.
pub const DEFAULT_VENDOR_ID: u16 = 0x1e4e;
/// Product id of the PureThermal UVC board.
pub const DEFAULT_PRODUCT_ID: u16 = 0x0100;
/// Lepton sensor width.
pub const DEFAULT_WIDTH: u32 = 160;
/// Lepton sensor height.
pub const DEFAULT_HEIGHT: u32 = 120;
/// Lepton frame rate.
pub const DEFAULT_FPS: u32 = 9;
/// Sequence interval between progress lines.
pub const DEFAULT_PROGRESS_INTERVAL: u32 = 30;

/// Top-level capture configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// Which device to open.
    pub device: DeviceConfig,
    /// What to stream.
    pub stream: StreamConfig,
    /// Emit a progress line every this many sequence numbers (0 disables).
    pub progress_interval: u32,
    /// Where compressed payloads go.
    pub recording: RecordingConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            stream: StreamConfig::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            recording: RecordingConfig::default(),
        }
    }
}

/// Device selection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// USB vendor id, 0 for any.
    pub vendor_id: u16,
    /// USB product id, 0 for any.
    pub product_id: u16,
    /// USB serial number.
    pub serial: Option<String>,
    /// Explicit device node, e.g. `/dev/video0`.
    pub path: Option<PathBuf>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            serial: None,
            path: None,
        }
    }
}

impl DeviceConfig {
    /// Filter handed to device lookup.
    #[must_use]
    pub fn filter(&self) -> DeviceFilter {
        DeviceFilter {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            serial: self.serial.clone(),
            path: self.path.clone(),
        }
    }
}

/// Desired stream parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    /// Desired width in pixels.
    pub width: u32,
    /// Desired height in pixels.
    pub height: u32,
    /// Desired frame rate.
    pub fps: u32,
    /// Use the desired values even when the device reports a default frame.
    pub force: bool,
    /// Request this frame format instead of deriving it from the descriptor.
    pub format: Option<FrameFormat>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            force: false,
            format: None,
        }
    }
}

/// Destinations for compressed payloads. Unset means they are discarded.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecordingConfig {
    /// File H.264 payloads are appended to (playable with `ffplay`).
    pub h264_path: Option<PathBuf>,
    /// Directory receiving one file per MJPEG frame.
    pub mjpeg_dir: Option<PathBuf>,
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file '{}': {source}", .path.display())]
    Io {
        /// Offending file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid configuration.
    #[error("failed to parse config file '{}': {source}", .path.display())]
    Parse {
        /// Offending file.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
}

impl CaptureConfig {
    /// Load configuration from `path`.
    ///
    /// Returns defaults when no path is given or the file doesn't exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            log::debug!("config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
