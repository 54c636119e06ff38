//! Per-frame callback logic.
//!
//! [`FrameDispatcher`] is the typed context the backend's capture thread runs
//! for every frame: it decides between pass-through, RGB conversion and
//! compressed-payload handling, and hands the result to a [`FrameHandler`].

use std::borrow::Cow;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::config::{CaptureConfig, RecordingConfig};
use crate::convert;
use crate::traits::{Frame, FrameFormat, FrameHandler};

/// What happened to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAction {
    /// Handed to the handler unchanged.
    Forwarded,
    /// Converted to RGB and the copy handed to the handler.
    Converted,
    /// Conversion failed; nothing was handed on.
    Dropped,
    /// Compressed payload written to the recording sink.
    Stored,
    /// Compressed payload discarded.
    Skipped,
}

/// Result of dispatching one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// What happened to the frame.
    pub action: FrameAction,
    /// Whether a progress line was logged for it.
    pub progress: bool,
}

/// Callback context owning the frame handler.
pub struct FrameDispatcher<H> {
    handler: H,
    progress_interval: u32,
    sink: CompressedSink,
}

impl<H: FrameHandler> FrameDispatcher<H> {
    /// Create a dispatcher for `handler` using the callback settings in `config`.
    pub fn new(handler: H, config: &CaptureConfig) -> Self {
        Self {
            handler,
            progress_interval: config.progress_interval,
            sink: CompressedSink::new(&config.recording),
        }
    }

    /// Process one frame delivered by the backend.
    pub fn dispatch(&mut self, frame: &Frame) -> DispatchOutcome {
        let action = match frame.format {
            FrameFormat::Uncompressed => {
                self.handler.handle_frame(Cow::Borrowed(frame));
                return DispatchOutcome {
                    action: FrameAction::Forwarded,
                    progress: false,
                };
            }
            format if format.is_compressed() => self.sink.store(frame),
            _ => {
                let mut rgb = Frame::rgb(frame.width, frame.height, frame.metadata.clone());
                if let Err(err) = convert::any_to_rgb(frame, &mut rgb) {
                    log::error!("any2rgb: {err} ({})", err.code());
                    return DispatchOutcome {
                        action: FrameAction::Dropped,
                        progress: false,
                    };
                }
                self.handler.handle_frame(Cow::Owned(rgb));
                FrameAction::Converted
            }
        };

        let progress = self.report_progress(frame.metadata.sequence);
        DispatchOutcome { action, progress }
    }

    /// Give the handler back.
    pub fn into_handler(self) -> H {
        self.handler
    }

    fn report_progress(&self, sequence: u32) -> bool {
        let due = sequence.checked_rem(self.progress_interval) == Some(0);
        if due {
            log::info!(" * got image {sequence}");
        }
        due
    }
}

/// Writes compressed payloads to disk when recording is configured.
#[derive(Debug, Default)]
struct CompressedSink {
    h264_path: Option<PathBuf>,
    mjpeg_dir: Option<PathBuf>,
    jpeg_count: u64,
}

impl CompressedSink {
    fn new(config: &RecordingConfig) -> Self {
        Self {
            h264_path: config.h264_path.clone(),
            mjpeg_dir: config.mjpeg_dir.clone(),
            jpeg_count: 0,
        }
    }

    fn store(&mut self, frame: &Frame) -> FrameAction {
        let written = match frame.format {
            FrameFormat::H264 => self
                .h264_path
                .as_ref()
                .map(|path| append(path, &frame.data).map(|()| path.clone())),
            FrameFormat::Mjpeg => self.mjpeg_dir.clone().map(|dir| {
                let path = dir.join(format!("{}.mjpeg", self.jpeg_count));
                self.jpeg_count += 1;
                fs::write(&path, &frame.data).map(|()| path)
            }),
            _ => None,
        };

        match written {
            Some(Ok(path)) => {
                log::trace!(
                    "stored {} bytes of {} to {}",
                    frame.data_bytes(),
                    frame.format,
                    path.display()
                );
                FrameAction::Stored
            }
            Some(Err(err)) => {
                log::warn!("failed to store {} frame: {err}", frame.format);
                FrameAction::Skipped
            }
            None => FrameAction::Skipped,
        }
    }
}

fn append(path: &Path, data: &[u8]) -> io::Result<()> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?
        .write_all(data)
}
