//! Core traits and types for the UVC capture abstraction.

use std::borrow::Cow;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Frame intervals in UVC descriptors are expressed in 100 ns units.
pub const INTERVAL_UNITS_PER_SECOND: u32 = 10_000_000;

/// Pixel format code (e.g., YUYV, MJPG, H264).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// UYVY pixel format (4:2:2 packed, chroma first).
    pub const UYVY: Self = Self::new(b"UYVY");
    /// NV12 pixel format (4:2:0 planar, interleaved chroma).
    pub const NV12: Self = Self::new(b"NV12");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
    /// BGR3 pixel format (24-bit BGR).
    pub const BGR3: Self = Self::new(b"BGR3");
    /// 8-bit greyscale.
    pub const GREY: Self = Self::new(b"GREY");
    /// 16-bit little-endian greyscale (raw thermal sensors).
    pub const Y16: Self = Self::new(b"Y16 ");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// H.264 elementary stream.
    pub const H264: Self = Self::new(b"H264");
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Pixel format tag carried by every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    /// Raw uncompressed payload, handed on as-is.
    Uncompressed,
    /// YUYV 4:2:2 packed.
    Yuyv,
    /// UYVY 4:2:2 packed.
    Uyvy,
    /// NV12 4:2:0 planar.
    Nv12,
    /// 24-bit RGB.
    Rgb,
    /// 24-bit BGR.
    Bgr,
    /// 8-bit greyscale.
    Gray8,
    /// 16-bit little-endian greyscale.
    Gray16,
    /// Motion JPEG.
    Mjpeg,
    /// H.264.
    H264,
    /// Anything else.
    Unknown,
}

impl FrameFormat {
    /// Map a `FourCC` to the frame format it carries.
    #[must_use]
    pub fn from_fourcc(fourcc: FourCC) -> Self {
        match fourcc {
            FourCC::YUYV => Self::Yuyv,
            FourCC::UYVY => Self::Uyvy,
            FourCC::NV12 => Self::Nv12,
            FourCC::RGB3 => Self::Rgb,
            FourCC::BGR3 => Self::Bgr,
            FourCC::GREY => Self::Gray8,
            FourCC::Y16 => Self::Gray16,
            FourCC::MJPG => Self::Mjpeg,
            FourCC::H264 => Self::H264,
            _ => Self::Unknown,
        }
    }

    /// Whether the payload is a compressed bitstream.
    #[must_use]
    pub const fn is_compressed(self) -> bool {
        matches!(self, Self::Mjpeg | Self::H264)
    }

    /// Whether a format descriptor can deliver frames in this format.
    #[must_use]
    pub fn matches_descriptor(self, desc: &FormatDescriptor) -> bool {
        match self {
            Self::Uncompressed => desc.subtype == DescriptorSubtype::Uncompressed,
            Self::Mjpeg => desc.subtype == DescriptorSubtype::Mjpeg,
            Self::H264 => {
                desc.subtype == DescriptorSubtype::FrameBased || desc.fourcc == FourCC::H264
            }
            other => Self::from_fourcc(desc.fourcc) == other,
        }
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uncompressed => "uncompressed",
            Self::Yuyv => "yuyv",
            Self::Uyvy => "uyvy",
            Self::Nv12 => "nv12",
            Self::Rgb => "rgb",
            Self::Bgr => "bgr",
            Self::Gray8 => "gray8",
            Self::Gray16 => "gray16",
            Self::Mjpeg => "mjpeg",
            Self::H264 => "h264",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for FrameFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uncompressed" => Ok(Self::Uncompressed),
            "yuyv" => Ok(Self::Yuyv),
            "uyvy" => Ok(Self::Uyvy),
            "nv12" => Ok(Self::Nv12),
            "rgb" => Ok(Self::Rgb),
            "bgr" => Ok(Self::Bgr),
            "gray8" => Ok(Self::Gray8),
            "gray16" => Ok(Self::Gray16),
            "mjpeg" => Ok(Self::Mjpeg),
            "h264" => Ok(Self::H264),
            _ => Err(format!("unknown frame format '{s}'")),
        }
    }
}

/// `bDescriptorSubtype` of a VideoStreaming format descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorSubtype {
    /// `VS_FORMAT_UNCOMPRESSED`
    Uncompressed,
    /// `VS_FORMAT_MJPEG`
    Mjpeg,
    /// `VS_FORMAT_FRAME_BASED` (H.264 and friends)
    FrameBased,
    /// `VS_FORMAT_STREAM_BASED`
    StreamBased,
    /// Any other subtype code.
    Other(u8),
}

impl DescriptorSubtype {
    /// Decode a raw subtype code.
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            0x04 => Self::Uncompressed,
            0x06 => Self::Mjpeg,
            0x10 => Self::FrameBased,
            0x12 => Self::StreamBased,
            other => Self::Other(other),
        }
    }

    /// Raw subtype code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Uncompressed => 0x04,
            Self::Mjpeg => 0x06,
            Self::FrameBased => 0x10,
            Self::StreamBased => 0x12,
            Self::Other(code) => code,
        }
    }

    /// Subtype a kernel driver would have parsed a format with this `FourCC` from.
    #[must_use]
    pub fn from_fourcc(fourcc: FourCC) -> Self {
        match fourcc {
            FourCC::MJPG => Self::Mjpeg,
            FourCC::H264 => Self::FrameBased,
            _ => Self::Uncompressed,
        }
    }

    /// Frame format to request when streaming a descriptor of this subtype.
    #[must_use]
    pub const fn frame_format(self) -> FrameFormat {
        match self {
            Self::Mjpeg => FrameFormat::Mjpeg,
            Self::FrameBased => FrameFormat::H264,
            _ => FrameFormat::Uncompressed,
        }
    }
}

/// One frame size offered by a format descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDescriptor {
    /// `bFrameIndex`, 1-based.
    pub index: u8,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// `dwDefaultFrameInterval` in 100 ns units.
    pub default_frame_interval: u32,
    /// Supported frame intervals in 100 ns units.
    pub intervals: Vec<u32>,
}

impl FrameDescriptor {
    /// Frame rate of the default interval, if the interval is non-zero.
    #[must_use]
    pub fn default_fps(&self) -> Option<u32> {
        INTERVAL_UNITS_PER_SECOND.checked_div(self.default_frame_interval)
    }

    /// Whether the frame can be streamed at `fps`.
    ///
    /// A descriptor without an interval list accepts any rate.
    #[must_use]
    pub fn supports_fps(&self, fps: u32) -> bool {
        self.intervals.is_empty()
            || self
                .intervals
                .iter()
                .any(|&interval| INTERVAL_UNITS_PER_SECOND.checked_div(interval) == Some(fps))
    }
}

/// A VideoStreaming format descriptor and its frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptor {
    /// `bFormatIndex`, 1-based.
    pub index: u8,
    /// Descriptor subtype.
    pub subtype: DescriptorSubtype,
    /// Pixel format code.
    pub fourcc: FourCC,
    /// `bDefaultFrameIndex`.
    pub default_frame_index: u8,
    /// Frame descriptors belonging to this format.
    pub frames: Vec<FrameDescriptor>,
}

impl FormatDescriptor {
    /// The default frame descriptor, falling back to the first one.
    #[must_use]
    pub fn default_frame(&self) -> Option<&FrameDescriptor> {
        self.frames
            .iter()
            .find(|frame| frame.index == self.default_frame_index)
            .or_else(|| self.frames.first())
    }
}

/// Locate the format and frame descriptors that can satisfy `request`.
#[must_use]
pub fn find_mode<'a>(
    formats: &'a [FormatDescriptor],
    request: &StreamRequest,
) -> Option<(&'a FormatDescriptor, &'a FrameDescriptor)> {
    formats
        .iter()
        .filter(|format| request.format.matches_descriptor(format))
        .find_map(|format| {
            format
                .frames
                .iter()
                .find(|frame| {
                    frame.width == request.width
                        && frame.height == request.height
                        && frame.supports_fps(request.fps)
                })
                .map(|frame| (format, frame))
        })
}

/// Parameters handed to stream negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    /// Requested frame format.
    pub format: FrameFormat,
    /// Requested width in pixels.
    pub width: u32,
    /// Requested height in pixels.
    pub height: u32,
    /// Requested frame rate.
    pub fps: u32,
}

/// Negotiated stream parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamControl {
    /// Format frames will be tagged with.
    pub format: FrameFormat,
    /// Pixel format code selected on the device.
    pub fourcc: FourCC,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frame interval in 100 ns units.
    pub frame_interval: u32,
    /// `bFormatIndex` of the negotiated format.
    pub format_index: u8,
    /// `bFrameIndex` of the negotiated frame.
    pub frame_index: u8,
    /// Largest frame payload in bytes.
    pub max_frame_size: u32,
}

impl fmt::Display for StreamControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "bmHint: 0001")?;
        writeln!(f, "bFormatIndex: {}", self.format_index)?;
        writeln!(f, "bFrameIndex: {}", self.frame_index)?;
        writeln!(f, "dwFrameInterval: {}", self.frame_interval)?;
        writeln!(f, "dwMaxVideoFrameSize: {}", self.max_frame_size)?;
        write!(
            f,
            "format: {} ({}) {}x{}",
            self.fourcc, self.format, self.width, self.height
        )
    }
}

/// Identity of an attached UVC device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    /// USB vendor id.
    pub vendor_id: u16,
    /// USB product id.
    pub product_id: u16,
    /// USB serial number, if reported.
    pub serial: Option<String>,
    /// Product name.
    pub name: String,
    /// Where the device lives (device node or bus address).
    pub location: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} {} ({})",
            self.vendor_id, self.product_id, self.name, self.location
        )?;
        if let Some(serial) = &self.serial {
            write!(f, " serial {serial}")?;
        }
        Ok(())
    }
}

/// Criteria used to pick a device. Zero ids match any device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceFilter {
    /// USB vendor id, 0 for any.
    pub vendor_id: u16,
    /// USB product id, 0 for any.
    pub product_id: u16,
    /// Serial number to match, if any.
    pub serial: Option<String>,
    /// Explicit device location to match, if any.
    pub path: Option<PathBuf>,
}

impl DeviceFilter {
    /// Whether `info` satisfies this filter.
    #[must_use]
    pub fn matches(&self, info: &DeviceInfo) -> bool {
        (self.vendor_id == 0 || self.vendor_id == info.vendor_id)
            && (self.product_id == 0 || self.product_id == info.product_id)
            && self
                .serial
                .as_ref()
                .is_none_or(|serial| info.serial.as_ref() == Some(serial))
            && self
                .path
                .as_ref()
                .is_none_or(|path| path.as_os_str() == info.location.as_str())
    }
}

/// Metadata for a captured frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
}

/// A captured or converted video frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Pixel data.
    pub data: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format of `data`.
    pub format: FrameFormat,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

/// Bytes needed for an RGB frame of the given size.
#[must_use]
pub const fn rgb_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

impl Frame {
    /// Allocate a zeroed RGB frame carrying `metadata`.
    #[must_use]
    pub fn rgb(width: u32, height: u32, metadata: FrameMetadata) -> Self {
        Self {
            data: vec![0; rgb_len(width, height)],
            width,
            height,
            format: FrameFormat::Rgb,
            metadata,
        }
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn data_bytes(&self) -> usize {
        self.data.len()
    }

    /// RGB values of a pixel, for frames in `FrameFormat::Rgb`.
    ///
    /// Returns `None` for other formats or out-of-range coordinates.
    #[must_use]
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if self.format != FrameFormat::Rgb || x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        match self.data.get(offset..offset + 3)? {
            &[r, g, b] => Some((r, g, b)),
            _ => None,
        }
    }
}

/// Error type for UVC operations.
///
/// Variants follow the libuvc status set so callers can still report a
/// numeric status with [`UvcError::code`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UvcError {
    /// Input/output error.
    #[error("input/output error: {0}")]
    Io(String),
    /// Invalid parameter.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
    /// Access denied.
    #[error("access denied")]
    Access,
    /// No such device.
    #[error("no such device")]
    NoDevice,
    /// Entity not found.
    #[error("entity not found")]
    NotFound,
    /// Resource busy.
    #[error("resource busy")]
    Busy,
    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,
    /// Overflow.
    #[error("overflow")]
    Overflow,
    /// Pipe error.
    #[error("pipe error")]
    Pipe,
    /// System call interrupted.
    #[error("system call interrupted")]
    Interrupted,
    /// Insufficient memory.
    #[error("insufficient memory")]
    NoMem,
    /// Operation not supported.
    #[error("operation not supported: {0}")]
    NotSupported(String),
    /// Device is not UVC-compliant.
    #[error("device is not UVC-compliant")]
    InvalidDevice,
    /// Mode not supported.
    #[error("mode not supported")]
    InvalidMode,
    /// Resource already has a callback.
    #[error("resource already has a callback")]
    CallbackExists,
    /// Undefined error.
    #[error("{0}")]
    Other(String),
}

impl UvcError {
    /// Negative status code matching libuvc's `uvc_error_t`.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Io(_) => -1,
            Self::InvalidParam(_) => -2,
            Self::Access => -3,
            Self::NoDevice => -4,
            Self::NotFound => -5,
            Self::Busy => -6,
            Self::Timeout => -7,
            Self::Overflow => -8,
            Self::Pipe => -9,
            Self::Interrupted => -10,
            Self::NoMem => -11,
            Self::NotSupported(_) => -12,
            Self::InvalidDevice => -50,
            Self::InvalidMode => -51,
            Self::CallbackExists => -52,
            Self::Other(_) => -99,
        }
    }
}

const EBUSY: i32 = 16;

impl From<io::Error> for UvcError {
    fn from(err: io::Error) -> Self {
        if err.raw_os_error() == Some(EBUSY) {
            return Self::Busy;
        }
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::Access,
            io::ErrorKind::NotFound => Self::NoDevice,
            io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::Interrupted => Self::Interrupted,
            io::ErrorKind::OutOfMemory => Self::NoMem,
            _ => Self::Io(err.to_string()),
        }
    }
}

/// Result type for UVC operations.
pub type Result<T> = std::result::Result<T, UvcError>;

/// Callback registered with a backend; runs on the backend's capture thread.
pub type FrameCallback = Box<dyn FnMut(&Frame) + Send + 'static>;

/// Consumer of frames delivered by the capture callback.
///
/// A borrowed frame is only valid for the duration of the call. An owned
/// frame belongs to the handler from then on.
pub trait FrameHandler: Send {
    /// Receive one frame.
    fn handle_frame(&mut self, frame: Cow<'_, Frame>);
}

/// Abstraction over a UVC capture library.
///
/// Teardown operations accept absent resources and treat them as no-ops, so
/// a partially initialized context can always be released in order.
pub trait UvcBackend {
    /// Library session.
    type Session;
    /// Reference to a located device.
    type Device;
    /// Open device handle.
    type Handle;

    /// Start a library session.
    fn init(&mut self) -> Result<Self::Session>;

    /// List attached devices.
    fn devices(&mut self, session: &Self::Session) -> Result<Vec<DeviceInfo>>;

    /// Locate the first device matching `filter`.
    fn find_device(&mut self, session: &Self::Session, filter: &DeviceFilter)
        -> Result<Self::Device>;

    /// Open a device for exclusive use.
    fn open(&mut self, device: &Self::Device) -> Result<Self::Handle>;

    /// Human-readable dump of everything known about the device.
    fn diagnostics(&self, handle: &Self::Handle) -> String;

    /// Format descriptors offered by the device, in descriptor order.
    fn format_descriptors(&self, handle: &Self::Handle) -> Result<Vec<FormatDescriptor>>;

    /// Negotiate a stream control for `request`.
    fn negotiate(
        &mut self,
        handle: &mut Self::Handle,
        request: &StreamRequest,
    ) -> Result<StreamControl>;

    /// Start streaming; `callback` runs once per frame on a backend thread.
    fn start_streaming(
        &mut self,
        handle: &mut Self::Handle,
        control: &StreamControl,
        callback: FrameCallback,
    ) -> Result<()>;

    /// Stop streaming and wait for the capture thread to finish.
    fn stop_streaming(&mut self, handle: Option<&mut Self::Handle>);

    /// Close a device handle.
    fn close(&mut self, handle: Option<Self::Handle>);

    /// Release a device reference.
    fn unref_device(&mut self, device: Option<Self::Device>);

    /// End the library session.
    fn exit(&mut self, session: Option<Self::Session>);
}
