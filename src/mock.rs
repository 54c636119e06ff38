//! Mock backend implementation for testing without hardware.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::traits::{
    find_mode, DescriptorSubtype, DeviceFilter, DeviceInfo, FormatDescriptor, FourCC, Frame,
    FrameCallback, FrameDescriptor, FrameFormat, FrameMetadata, Result, StreamControl,
    StreamRequest, UvcBackend, UvcError,
};

/// Backend call, as recorded by [`MockProbe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `init`
    Init,
    /// `devices`
    Devices,
    /// `find_device` with the vendor/product pair searched for.
    FindDevice(u16, u16),
    /// `open`
    Open,
    /// `diagnostics`
    Diagnostics,
    /// `format_descriptors`
    FormatDescriptors,
    /// `negotiate` with the request received.
    Negotiate(StreamRequest),
    /// `start_streaming`
    StartStreaming,
    /// `stop_streaming`; whether a handle was present.
    StopStreaming(bool),
    /// `close`; whether a handle was present.
    Close(bool),
    /// `unref_device`; whether a device was present.
    Unref(bool),
    /// `exit`; whether a session was present.
    Exit(bool),
}

/// Backend step that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// `init`
    Init,
    /// `open`
    Open,
    /// `format_descriptors`
    FormatDescriptors,
    /// `negotiate`
    Negotiate,
    /// `start_streaming`
    StartStreaming,
}

/// Shared view into a [`MockBackend`] that stays with the test after the
/// backend has been moved into a context.
#[derive(Clone, Default)]
pub struct MockProbe {
    calls: Arc<Mutex<Vec<Call>>>,
    callback: Arc<Mutex<Option<FrameCallback>>>,
}

impl MockProbe {
    /// Calls recorded so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Deliver `frame` through the registered callback, as the capture thread
    /// would. Returns `false` when nothing is streaming.
    pub fn emit(&self, frame: &Frame) -> bool {
        let mut callback = self.callback.lock().expect("callback lock");
        callback.as_mut().is_some_and(|callback| {
            callback(frame);
            true
        })
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

/// A simulated attached camera.
#[derive(Debug, Clone)]
pub struct MockDevice {
    /// Identity reported during enumeration.
    pub info: DeviceInfo,
    /// Format descriptors reported once opened.
    pub formats: Vec<FormatDescriptor>,
}

impl MockDevice {
    /// A 640x480 YUYV webcam with 30 and 15 fps modes.
    #[must_use]
    pub fn webcam(vendor_id: u16, product_id: u16) -> Self {
        Self {
            info: DeviceInfo {
                vendor_id,
                product_id,
                serial: Some("mock-0001".to_owned()),
                name: "Mock Camera".to_owned(),
                location: "mock:0".to_owned(),
            },
            formats: vec![FormatDescriptor {
                index: 1,
                subtype: DescriptorSubtype::Uncompressed,
                fourcc: FourCC::YUYV,
                default_frame_index: 1,
                frames: vec![FrameDescriptor {
                    index: 1,
                    width: 640,
                    height: 480,
                    default_frame_interval: 333_333,
                    intervals: vec![333_333, 666_666],
                }],
            }],
        }
    }

    /// Replace the format descriptors.
    #[must_use]
    pub fn with_formats(mut self, formats: Vec<FormatDescriptor>) -> Self {
        self.formats = formats;
        self
    }
}

/// Open handle to a [`MockDevice`].
#[derive(Debug)]
pub struct MockHandle {
    device: MockDevice,
    streaming: bool,
}

/// Mock backend with failure injection and call recording.
#[derive(Default)]
pub struct MockBackend {
    devices: Vec<MockDevice>,
    failure: Option<(Step, UvcError)>,
    probe: MockProbe,
}

impl MockBackend {
    /// Create a backend with no attached devices.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device.
    #[must_use]
    pub fn with_device(mut self, device: MockDevice) -> Self {
        self.devices.push(device);
        self
    }

    /// Make `step` fail with `error`.
    #[must_use]
    pub fn failing_at(mut self, step: Step, error: UvcError) -> Self {
        self.failure = Some((step, error));
        self
    }

    /// Handle for inspecting calls and emitting frames.
    #[must_use]
    pub fn probe(&self) -> MockProbe {
        self.probe.clone()
    }

    fn check(&self, step: Step) -> Result<()> {
        match &self.failure {
            Some((failing, error)) if *failing == step => Err(error.clone()),
            _ => Ok(()),
        }
    }
}

impl UvcBackend for MockBackend {
    type Session = ();
    type Device = MockDevice;
    type Handle = MockHandle;

    fn init(&mut self) -> Result<()> {
        self.probe.record(Call::Init);
        self.check(Step::Init)
    }

    fn devices(&mut self, _session: &()) -> Result<Vec<DeviceInfo>> {
        self.probe.record(Call::Devices);
        Ok(self.devices.iter().map(|device| device.info.clone()).collect())
    }

    fn find_device(&mut self, _session: &(), filter: &DeviceFilter) -> Result<MockDevice> {
        self.probe
            .record(Call::FindDevice(filter.vendor_id, filter.product_id));
        self.devices
            .iter()
            .find(|device| filter.matches(&device.info))
            .cloned()
            .ok_or(UvcError::NoDevice)
    }

    fn open(&mut self, device: &MockDevice) -> Result<MockHandle> {
        self.probe.record(Call::Open);
        self.check(Step::Open)?;
        Ok(MockHandle {
            device: device.clone(),
            streaming: false,
        })
    }

    fn diagnostics(&self, handle: &MockHandle) -> String {
        self.probe.record(Call::Diagnostics);
        format!(
            "DEVICE CONFIGURATION\n{}\n{} format(s)",
            handle.device.info,
            handle.device.formats.len()
        )
    }

    fn format_descriptors(&self, handle: &MockHandle) -> Result<Vec<FormatDescriptor>> {
        self.probe.record(Call::FormatDescriptors);
        self.check(Step::FormatDescriptors)?;
        Ok(handle.device.formats.clone())
    }

    fn negotiate(
        &mut self,
        handle: &mut MockHandle,
        request: &StreamRequest,
    ) -> Result<StreamControl> {
        self.probe.record(Call::Negotiate(*request));
        self.check(Step::Negotiate)?;

        let (format, frame) =
            find_mode(&handle.device.formats, request).ok_or(UvcError::InvalidMode)?;
        Ok(StreamControl {
            format: request.format,
            fourcc: format.fourcc,
            width: frame.width,
            height: frame.height,
            frame_interval: frame.default_frame_interval,
            format_index: format.index,
            frame_index: frame.index,
            max_frame_size: frame.width * frame.height * 2,
        })
    }

    fn start_streaming(
        &mut self,
        handle: &mut MockHandle,
        _control: &StreamControl,
        callback: FrameCallback,
    ) -> Result<()> {
        self.probe.record(Call::StartStreaming);
        self.check(Step::StartStreaming)?;
        if handle.streaming {
            return Err(UvcError::Busy);
        }
        handle.streaming = true;
        *self.probe.callback.lock().expect("callback lock") = Some(callback);
        Ok(())
    }

    fn stop_streaming(&mut self, handle: Option<&mut MockHandle>) {
        self.probe.record(Call::StopStreaming(handle.is_some()));
        if let Some(handle) = handle {
            handle.streaming = false;
            self.probe.callback.lock().expect("callback lock").take();
        }
    }

    fn close(&mut self, handle: Option<MockHandle>) {
        self.probe.record(Call::Close(handle.is_some()));
    }

    fn unref_device(&mut self, device: Option<MockDevice>) {
        self.probe.record(Call::Unref(device.is_some()));
    }

    fn exit(&mut self, session: Option<()>) {
        self.probe.record(Call::Exit(session.is_some()));
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Build a YUYV frame showing `pattern`.
#[must_use]
pub fn yuyv_frame(width: u32, height: u32, sequence: u32, pattern: TestPattern) -> Frame {
    let mut data = vec![0u8; width as usize * height as usize * 2];

    for (index, pair) in data.chunks_exact_mut(4).enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let x = ((index * 2) % width as usize) as u32;
        let (y_val, u_val, v_val) = match pattern {
            TestPattern::ColorBars => color_bar(x, width),
            TestPattern::Gradient => {
                #[allow(clippy::cast_possible_truncation)]
                let luma = ((x * 255) / width) as u8;
                (luma, 128, 128)
            }
            TestPattern::Solid(y, u, v) => (y, u, v),
        };
        pair.copy_from_slice(&[y_val, u_val, y_val, v_val]);
    }

    Frame {
        data,
        width,
        height,
        format: FrameFormat::Yuyv,
        metadata: FrameMetadata {
            sequence,
            timestamp: Duration::from_millis(u64::from(sequence) * 33),
        },
    }
}

/// YUV values of the SMPTE bar covering column `x`.
fn color_bar(x: u32, width: u32) -> (u8, u8, u8) {
    // White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    const BARS: [(u8, u8, u8); 8] = [
        (235, 128, 128),
        (210, 16, 146),
        (170, 166, 16),
        (145, 54, 34),
        (106, 202, 222),
        (81, 90, 240),
        (41, 240, 110),
        (16, 128, 128),
    ];
    let bar = (x / (width / 8).max(1)).min(7) as usize;
    BARS.get(bar).copied().unwrap_or(BARS[7])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_device_honours_filter() {
        let mut backend = MockBackend::new().with_device(MockDevice::webcam(0x046d, 0x0825));
        let filter = DeviceFilter {
            vendor_id: 0x046d,
            product_id: 0x0825,
            ..DeviceFilter::default()
        };
        assert!(backend.find_device(&(), &filter).is_ok());

        let filter = DeviceFilter {
            product_id: 0x0001,
            ..filter
        };
        assert_eq!(
            backend.find_device(&(), &filter).map(|_| ()),
            Err(UvcError::NoDevice)
        );
    }

    #[test]
    fn test_injected_failure() {
        let mut backend = MockBackend::new().failing_at(Step::Init, UvcError::Access);
        assert_eq!(backend.init(), Err(UvcError::Access));
        assert_eq!(backend.probe().calls(), vec![Call::Init]);
    }

    #[test]
    fn test_emit_without_stream() {
        let backend = MockBackend::new();
        assert!(!backend.probe().emit(&yuyv_frame(8, 2, 0, TestPattern::ColorBars)));
    }

    #[test]
    fn test_color_bars_pattern() {
        let frame = yuyv_frame(640, 480, 0, TestPattern::ColorBars);
        assert_eq!(frame.data.len(), 640 * 480 * 2);
        // First bar should be white (Y=235)
        assert_eq!(frame.data[0], 235);
        // Last bar is black
        assert_eq!(frame.data[639 * 2], 16);
    }

    #[test]
    fn test_gradient_pattern() {
        let frame = yuyv_frame(640, 480, 0, TestPattern::Gradient);
        assert!(frame.data[0] < 10);
        let last_row_start = 479 * 640 * 2;
        assert!(frame.data[last_row_start + 638 * 2] > 200);
    }

    #[test]
    fn test_solid_pattern() {
        let frame = yuyv_frame(64, 64, 5, TestPattern::Solid(128, 64, 192));
        assert_eq!(&frame.data[..4], &[128, 64, 128, 192]);
        assert_eq!(frame.metadata.sequence, 5);
    }
}
