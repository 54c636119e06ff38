//! V4L2 backend for UVC cameras bound to the Linux `uvcvideo` driver.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as _;
use v4l::video::capture::Parameters;
use v4l::video::Capture as _;
use v4l::{Device, Fraction};

use crate::traits::{
    find_mode, DescriptorSubtype, DeviceFilter, DeviceInfo, FormatDescriptor, FourCC, Frame,
    FrameCallback, FrameDescriptor, FrameMetadata, Result, StreamControl,
    StreamRequest, UvcBackend, UvcError, INTERVAL_UNITS_PER_SECOND,
};

/// Where the kernel publishes video device nodes.
pub const SYSFS_VIDEO4LINUX: &str = "/sys/class/video4linux";

const DEFAULT_BUFFER_COUNT: u32 = 4;
const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// UVC backend driving cameras through V4L2.
#[derive(Debug, Clone)]
pub struct V4l2Backend {
    sysfs_root: PathBuf,
    buffer_count: u32,
}

impl Default for V4l2Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl V4l2Backend {
    /// Backend reading the system's video4linux class.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sysfs_root: PathBuf::from(SYSFS_VIDEO4LINUX),
            buffer_count: DEFAULT_BUFFER_COUNT,
        }
    }

    /// Use a different number of mmap buffers.
    #[must_use]
    pub const fn with_buffer_count(mut self, buffer_count: u32) -> Self {
        self.buffer_count = buffer_count;
        self
    }
}

/// Session state: the sysfs tree devices are enumerated from.
#[derive(Debug)]
pub struct V4l2Session {
    root: PathBuf,
}

/// A located device node.
#[derive(Debug, Clone)]
pub struct V4l2DeviceRef {
    path: PathBuf,
    info: DeviceInfo,
}

impl V4l2DeviceRef {
    /// Identity of the device.
    #[must_use]
    pub const fn info(&self) -> &DeviceInfo {
        &self.info
    }
}

/// An open device node.
///
/// While streaming, the capture thread owns the underlying `v4l::Device`
/// and hands it back when stopped.
pub struct V4l2Handle {
    device: Option<Device>,
    info: DeviceInfo,
    worker: Option<Worker>,
}

struct Worker {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<Device>,
}

impl V4l2Handle {
    fn device(&self) -> Result<&Device> {
        if self.worker.is_some() {
            return Err(UvcError::Busy);
        }
        self.device.as_ref().ok_or(UvcError::InvalidDevice)
    }

    fn stop_worker(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.stop.store(true, Ordering::Release);
        match worker.thread.join() {
            Ok(device) => self.device = Some(device),
            Err(_) => log::error!("capture thread for {} panicked", self.info.location),
        }
    }
}

impl Drop for V4l2Handle {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

impl UvcBackend for V4l2Backend {
    type Session = V4l2Session;
    type Device = V4l2DeviceRef;
    type Handle = V4l2Handle;

    fn init(&mut self) -> Result<V4l2Session> {
        if !self.sysfs_root.is_dir() {
            return Err(UvcError::NotSupported(format!(
                "{} not found",
                self.sysfs_root.display()
            )));
        }
        Ok(V4l2Session {
            root: self.sysfs_root.clone(),
        })
    }

    fn devices(&mut self, session: &V4l2Session) -> Result<Vec<DeviceInfo>> {
        Ok(enumerate(&session.root)?
            .into_iter()
            .map(|device| device.info)
            .collect())
    }

    fn find_device(
        &mut self,
        session: &V4l2Session,
        filter: &DeviceFilter,
    ) -> Result<V4l2DeviceRef> {
        let found = enumerate(&session.root)?
            .into_iter()
            .find(|device| filter.matches(&device.info));
        if let Some(device) = found {
            return Ok(device);
        }

        // A node outside sysfs (or without USB ids) can still be named directly.
        match &filter.path {
            Some(path) if path.exists() && filter.vendor_id == 0 && filter.product_id == 0 => {
                Ok(V4l2DeviceRef {
                    path: path.clone(),
                    info: DeviceInfo {
                        location: path.display().to_string(),
                        ..DeviceInfo::default()
                    },
                })
            }
            _ => Err(UvcError::NoDevice),
        }
    }

    fn open(&mut self, device: &V4l2DeviceRef) -> Result<V4l2Handle> {
        let handle = Device::with_path(&device.path)?;
        let caps = handle.query_caps()?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE)
            || !caps.capabilities.contains(Flags::STREAMING)
        {
            return Err(UvcError::NotSupported(format!(
                "{} cannot stream video capture",
                device.path.display()
            )));
        }

        let mut info = device.info.clone();
        if info.name.is_empty() {
            info.name = caps.card;
        }

        Ok(V4l2Handle {
            device: Some(handle),
            info,
            worker: None,
        })
    }

    fn diagnostics(&self, handle: &V4l2Handle) -> String {
        let mut report = format!("DEVICE CONFIGURATION\n{}\n", handle.info);
        let Ok(device) = handle.device() else {
            report.push_str("(streaming)");
            return report;
        };

        if let Ok(caps) = device.query_caps() {
            let _ = writeln!(
                report,
                "driver: {} card: {} bus: {}",
                caps.driver, caps.card, caps.bus
            );
        }
        match describe_formats(device) {
            Ok(formats) => {
                for format in formats {
                    let _ = writeln!(
                        report,
                        "  format {} ({}) subtype {:#04x}",
                        format.index,
                        format.fourcc,
                        format.subtype.code()
                    );
                    for frame in &format.frames {
                        let _ = writeln!(
                            report,
                            "    frame {}: {}x{} default interval {}",
                            frame.index, frame.width, frame.height, frame.default_frame_interval
                        );
                    }
                }
            }
            Err(err) => {
                let _ = writeln!(report, "formats unavailable: {err}");
            }
        }
        report
    }

    fn format_descriptors(&self, handle: &V4l2Handle) -> Result<Vec<FormatDescriptor>> {
        describe_formats(handle.device()?)
    }

    fn negotiate(
        &mut self,
        handle: &mut V4l2Handle,
        request: &StreamRequest,
    ) -> Result<StreamControl> {
        let device = handle.device()?;
        let formats = describe_formats(device)?;
        let (format_desc, frame_desc) =
            find_mode(&formats, request).ok_or(UvcError::InvalidMode)?;

        let mut fmt = device.format()?;
        fmt.width = request.width;
        fmt.height = request.height;
        fmt.fourcc = format_desc.fourcc.into();
        let fmt = device.set_format(&fmt)?;
        check_applied(&fmt, format_desc.fourcc, request)?;

        if request.fps > 0 {
            device.set_params(&Parameters::with_fps(request.fps))?;
        }
        let params = device.params()?;

        Ok(StreamControl {
            format: request.format,
            fourcc: FourCC::from(fmt.fourcc),
            width: fmt.width,
            height: fmt.height,
            frame_interval: fraction_to_interval(params.interval),
            format_index: format_desc.index,
            frame_index: frame_desc.index,
            max_frame_size: fmt.size,
        })
    }

    fn start_streaming(
        &mut self,
        handle: &mut V4l2Handle,
        control: &StreamControl,
        callback: FrameCallback,
    ) -> Result<()> {
        if handle.worker.is_some() {
            return Err(UvcError::CallbackExists);
        }
        let device = handle.device.take().ok_or(UvcError::InvalidDevice)?;

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();
        let capture = CaptureLoop {
            control: control.clone(),
            buffer_count: self.buffer_count,
            stop: Arc::clone(&stop),
            callback,
        };

        let thread = thread::Builder::new()
            .name("uvc-capture".to_owned())
            .spawn(move || {
                capture.run(&device, &ready_tx);
                device
            })
            .map_err(|err| UvcError::Io(err.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                handle.worker = Some(Worker { stop, thread });
                Ok(())
            }
            Ok(Err(err)) => {
                handle.device = thread.join().ok();
                Err(err)
            }
            Err(_) => {
                handle.device = thread.join().ok();
                Err(UvcError::Other(
                    "capture thread exited before streaming".to_owned(),
                ))
            }
        }
    }

    fn stop_streaming(&mut self, handle: Option<&mut V4l2Handle>) {
        if let Some(handle) = handle {
            handle.stop_worker();
        }
    }

    fn close(&mut self, handle: Option<V4l2Handle>) {
        drop(handle);
    }

    fn unref_device(&mut self, device: Option<V4l2DeviceRef>) {
        drop(device);
    }

    fn exit(&mut self, session: Option<V4l2Session>) {
        drop(session);
    }
}

/// State moved onto the capture thread.
struct CaptureLoop {
    control: StreamControl,
    buffer_count: u32,
    stop: Arc<AtomicBool>,
    callback: FrameCallback,
}

impl CaptureLoop {
    fn run(mut self, device: &Device, ready: &mpsc::Sender<Result<()>>) {
        let mut stream = match Stream::with_buffers(device, Type::VideoCapture, self.buffer_count)
        {
            Ok(stream) => stream,
            Err(err) => {
                let _ = ready.send(Err(err.into()));
                return;
            }
        };
        stream.set_timeout(POLL_TIMEOUT);
        let _ = ready.send(Ok(()));

        while !self.stop.load(Ordering::Acquire) {
            match stream.next() {
                Ok((buf, meta)) => {
                    let used = (meta.bytesused as usize).min(buf.len());

                    // V4L2 timestamps are always non-negative in practice
                    #[allow(clippy::cast_sign_loss)]
                    let secs = meta.timestamp.sec.max(0) as u64;
                    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                    let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

                    let frame = Frame {
                        data: buf.get(..used).unwrap_or(buf).to_vec(),
                        width: self.control.width,
                        height: self.control.height,
                        format: self.control.format,
                        metadata: FrameMetadata {
                            sequence: meta.sequence,
                            timestamp: Duration::new(secs, nanos),
                        },
                    };
                    (self.callback)(&frame);
                }
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {}
                Err(err) => {
                    log::error!("capture stream failed: {err}");
                    break;
                }
            }
        }
    }
}

/// Fail with `InvalidMode` unless the driver kept the requested pixel format and size.
fn check_applied(applied: &v4l::Format, fourcc: FourCC, request: &StreamRequest) -> Result<()> {
    let applied_fourcc = FourCC::from(applied.fourcc);
    if applied_fourcc != fourcc
        || applied.width != request.width
        || applied.height != request.height
    {
        log::warn!(
            "driver applied {applied_fourcc} {}x{} instead of {fourcc} {}x{}",
            applied.width,
            applied.height,
            request.width,
            request.height
        );
        return Err(UvcError::InvalidMode);
    }
    Ok(())
}

/// Read format, frame size and interval descriptors from a device.
fn describe_formats(device: &Device) -> Result<Vec<FormatDescriptor>> {
    let mut formats = Vec::new();

    for (position, desc) in device.enum_formats()?.into_iter().enumerate() {
        let fourcc = FourCC::from(desc.fourcc);
        let mut frames = Vec::new();

        for size in device.enum_framesizes(desc.fourcc)? {
            let (width, height) = match size.size {
                FrameSizeEnum::Discrete(discrete) => (discrete.width, discrete.height),
                FrameSizeEnum::Stepwise(stepwise) => (stepwise.max_width, stepwise.max_height),
            };
            let intervals: Vec<u32> = device
                .enum_frameintervals(desc.fourcc, width, height)
                .unwrap_or_default()
                .into_iter()
                .map(|interval| match interval.interval {
                    FrameIntervalEnum::Discrete(fraction) => fraction_to_interval(fraction),
                    FrameIntervalEnum::Stepwise(stepwise) => fraction_to_interval(stepwise.min),
                })
                .filter(|&interval| interval > 0)
                .collect();

            frames.push(FrameDescriptor {
                index: descriptor_index(frames.len()),
                width,
                height,
                default_frame_interval: intervals.first().copied().unwrap_or(0),
                intervals,
            });
        }

        formats.push(FormatDescriptor {
            index: descriptor_index(position),
            subtype: DescriptorSubtype::from_fourcc(fourcc),
            fourcc,
            default_frame_index: 1,
            frames,
        });
    }

    Ok(formats)
}

/// 1-based descriptor index for the entry at `position`.
fn descriptor_index(position: usize) -> u8 {
    u8::try_from(position + 1).unwrap_or(u8::MAX)
}

/// Convert a frame period in seconds to 100 ns units.
fn fraction_to_interval(fraction: Fraction) -> u32 {
    u64::from(fraction.numerator)
        .saturating_mul(u64::from(INTERVAL_UNITS_PER_SECOND))
        .checked_div(u64::from(fraction.denominator))
        .and_then(|interval| u32::try_from(interval).ok())
        .unwrap_or(0)
}

/// List primary capture nodes under `root`, ordered by node number.
fn enumerate(root: &Path) -> Result<Vec<V4l2DeviceRef>> {
    let mut nodes: Vec<(u32, V4l2DeviceRef)> = fs::read_dir(root)?
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let number = name.strip_prefix("video")?.parse::<u32>().ok()?;
            let node = entry.path();

            // uvcvideo registers a metadata node next to each capture node.
            if read_attr(&node.join("index")).is_some_and(|index| index != "0") {
                return None;
            }

            let usb = node.join("device").join("..");
            let info = DeviceInfo {
                vendor_id: read_hex(&usb.join("idVendor")).unwrap_or(0),
                product_id: read_hex(&usb.join("idProduct")).unwrap_or(0),
                serial: read_attr(&usb.join("serial")),
                name: read_attr(&usb.join("product"))
                    .or_else(|| read_attr(&node.join("name")))
                    .unwrap_or_default(),
                location: format!("/dev/{name}"),
            };
            Some((
                number,
                V4l2DeviceRef {
                    path: PathBuf::from(&info.location),
                    info,
                },
            ))
        })
        .collect();

    nodes.sort_by_key(|(number, _)| *number);
    Ok(nodes.into_iter().map(|(_, device)| device).collect())
}

fn read_attr(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn read_hex(path: &Path) -> Option<u16> {
    u16::from_str_radix(&read_attr(path)?, 16).ok()
}
