//! Device lifecycle: initialization sequence and teardown.

use crate::config::CaptureConfig;
use crate::dispatch::FrameDispatcher;
use crate::traits::{
    FormatDescriptor, Frame, FrameCallback, FrameFormat, FrameHandler, Result, StreamControl,
    StreamRequest, UvcBackend, UvcError,
};

/// Everything acquired while bringing a camera up.
///
/// Resources acquired by a failed [`init`](Self::init) stay in the context
/// until [`teardown`](Self::teardown) runs, either explicitly or on drop.
pub struct DeviceContext<B: UvcBackend> {
    backend: B,
    config: CaptureConfig,
    session: Option<B::Session>,
    device: Option<B::Device>,
    handle: Option<B::Handle>,
    control: Option<StreamControl>,
}

impl<B: UvcBackend> DeviceContext<B> {
    /// Create an idle context.
    pub const fn new(backend: B, config: CaptureConfig) -> Self {
        Self {
            backend,
            config,
            session: None,
            device: None,
            handle: None,
            control: None,
        }
    }

    /// Configuration this context was created with.
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Negotiated stream parameters, once negotiation succeeded.
    pub const fn control(&self) -> Option<&StreamControl> {
        self.control.as_ref()
    }

    /// Bring the camera up and start streaming frames into `handler`.
    ///
    /// Each step runs only if the previous one succeeded. On failure the
    /// error is logged and returned, and whatever was acquired is kept for
    /// teardown.
    pub fn init<H>(&mut self, handler: H) -> Result<()>
    where
        H: FrameHandler + 'static,
    {
        if self.session.is_some() {
            return Err(failed("uvc_init", UvcError::Busy));
        }

        let session = self
            .session
            .insert(self.backend.init().map_err(|err| failed("uvc_init", err))?);
        log::info!("UVC initialized");

        let filter = self.config.device.filter();
        let device = self.device.insert(
            self.backend
                .find_device(session, &filter)
                .map_err(|err| failed("uvc_find_device", err))?,
        );
        log::info!("Device found");

        let handle = self.handle.insert(
            self.backend
                .open(device)
                .map_err(|err| failed("uvc_open", err))?,
        );
        log::info!("Device opened");

        if log::log_enabled!(log::Level::Debug) {
            log::debug!("{}", self.backend.diagnostics(handle));
        }

        let formats = self
            .backend
            .format_descriptors(handle)
            .map_err(|err| failed("uvc_get_format_descs", err))?;
        let request = select_stream(&formats, &self.config);

        let control = self
            .backend
            .negotiate(handle, &request)
            .map_err(|err| failed("get_mode", err))?;
        log::debug!("{control}");
        let control = self.control.insert(control);

        let mut dispatcher = FrameDispatcher::new(handler, &self.config);
        let callback: FrameCallback = Box::new(move |frame: &Frame| {
            dispatcher.dispatch(frame);
        });
        self.backend
            .start_streaming(handle, control, callback)
            .map_err(|err| failed("start_streaming", err))?;
        log::info!("Streaming...");

        Ok(())
    }

    /// Stop streaming and release the handle, the device and the session,
    /// in that order. Steps whose resource was never acquired are no-ops
    /// for the backend.
    pub fn teardown(&mut self) {
        self.backend.stop_streaming(self.handle.as_mut());
        log::info!("Done streaming.");

        self.backend.close(self.handle.take());
        log::info!("Device closed");

        self.backend.unref_device(self.device.take());
        log::info!("Device unreferenced");

        self.backend.exit(self.session.take());
        log::info!("UVC exited");

        self.control = None;
    }
}

impl<B: UvcBackend> Drop for DeviceContext<B> {
    fn drop(&mut self) {
        if self.session.is_some() || self.device.is_some() || self.handle.is_some() {
            self.teardown();
        }
    }
}

fn failed(step: &str, err: UvcError) -> UvcError {
    log::error!("{step}: {err} ({})", err.code());
    err
}

/// Pick the format, size and rate to negotiate.
///
/// The format comes from the configured override or the first format
/// descriptor's subtype. Size and rate come from the default frame of the
/// first descriptor offering that format, unless `force` is set or there is
/// no such frame.
pub fn select_stream(formats: &[FormatDescriptor], config: &CaptureConfig) -> StreamRequest {
    let stream = &config.stream;

    if let Some(first) = formats.first() {
        log::info!("bDescriptorSubtype: {}", first.subtype.code());
    }

    let (format, selected) = match stream.format {
        Some(format) => (format, formats.iter().find(|desc| format.matches_descriptor(desc))),
        None => {
            let first = formats.first();
            let format =
                first.map_or(FrameFormat::Uncompressed, |desc| desc.subtype.frame_format());
            (format, first)
        }
    };

    let mut request = StreamRequest {
        format,
        width: stream.width,
        height: stream.height,
        fps: stream.fps,
    };

    if !stream.force {
        if let Some(frame) = selected.and_then(FormatDescriptor::default_frame) {
            request.width = frame.width;
            request.height = frame.height;
            request.fps = frame.default_fps().unwrap_or(stream.fps);
        }
    }

    let fourcc = selected.map_or_else(|| "????".to_owned(), |desc| desc.fourcc.to_string());
    log::info!(
        "First format: ({fourcc}) {}x{} {}fps",
        request.width,
        request.height,
        request.fps
    );

    request
}
