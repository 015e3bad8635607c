//! Capture requests, results and the callback sink

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::{debug, warn};

use super::metadata::Settings;
use super::stream::{Stream, StreamId};
use crate::buffer::{BufferHandle, Fence};
use crate::utils::boot_time_ns;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    Ok,
    Error,
}

/// One buffer bound to a stream, as exchanged with the caller
#[derive(Debug, Clone)]
pub struct StreamBuffer {
    pub stream: StreamId,
    pub buffer: BufferHandle,
    pub status: BufferStatus,
    /// Signalled by the producer once the buffer may be written
    pub acquire_fence: Fence,
    /// Set by the device if the caller must wait before reading
    pub release_fence: Fence,
}

impl StreamBuffer {
    pub fn new(stream: StreamId, buffer: BufferHandle) -> Self {
        Self {
            stream,
            buffer,
            status: BufferStatus::Ok,
            acquire_fence: Fence::none(),
            release_fence: Fence::none(),
        }
    }

    pub fn with_acquire_fence(mut self, fence: Fence) -> Self {
        self.acquire_fence = fence;
        self
    }
}

/// Request as submitted by the caller. Nothing here is retained past
/// submission: the device takes its own copy.
#[derive(Debug, Clone)]
pub struct CaptureRequestDesc {
    pub frame_number: u32,
    /// `None` reuses the most recently submitted settings
    pub settings: Option<Settings>,
    pub input_buffer: Option<StreamBuffer>,
    pub output_buffers: Vec<StreamBuffer>,
}

impl CaptureRequestDesc {
    pub fn new(frame_number: u32, output_buffers: Vec<StreamBuffer>) -> Self {
        Self {
            frame_number,
            settings: None,
            input_buffer: None,
            output_buffers,
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }
}

/// Output buffer together with a snapshot of the stream it targets
#[derive(Debug, Clone)]
pub struct BoundBuffer {
    pub stream: Arc<Stream>,
    pub buffer: StreamBuffer,
}

/// Accepted request, owned by the device from submission to result
#[derive(Debug)]
pub struct CaptureRequest {
    pub frame_number: u32,
    pub settings: Settings,
    pub output_buffers: Vec<BoundBuffer>,
}

#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub frame_number: u32,
    pub settings: Settings,
    pub output_buffers: Vec<StreamBuffer>,
    pub input_buffer: Option<StreamBuffer>,
    /// Index of this partial result; always the single, final one
    pub partial_result: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyMessage {
    /// Start of exposure, CLOCK_BOOTTIME nanoseconds
    Shutter { frame_number: u32, timestamp: u64 },
}

/// Sink for asynchronous capture events. Both methods are called from the
/// fulfillment worker thread.
pub trait CaptureCallbacks: Send + Sync {
    fn notify(&self, msg: NotifyMessage);
    fn process_capture_result(&self, result: CaptureResult);
}

/// Delivers shutter and result events to whatever callbacks are installed
pub struct Notifier {
    camera_id: u32,
    callbacks: ArcSwapOption<Box<dyn CaptureCallbacks>>,
}

impl Notifier {
    pub fn new(camera_id: u32) -> Self {
        Self {
            camera_id,
            callbacks: ArcSwapOption::empty(),
        }
    }

    pub fn install(&self, callbacks: Box<dyn CaptureCallbacks>) {
        self.callbacks.store(Some(Arc::new(callbacks)));
    }

    pub fn clear(&self) {
        self.callbacks.store(None);
    }

    pub fn is_installed(&self) -> bool {
        self.callbacks.load().is_some()
    }

    /// A zero timestamp is replaced by the current boot time
    pub fn notify_shutter(&self, frame_number: u32, timestamp: u64) {
        let timestamp = if timestamp == 0 {
            let now = boot_time_ns();
            debug!(camera = self.camera_id, timestamp = now, "No timestamp provided, using CLOCK_BOOTTIME");
            now
        } else {
            timestamp
        };

        match self.callbacks.load_full() {
            Some(cb) => cb.notify(NotifyMessage::Shutter {
                frame_number,
                timestamp,
            }),
            None => warn!(camera = self.camera_id, frame = frame_number, "Shutter dropped, no callbacks"),
        }
    }

    pub fn send_result(&self, request: CaptureRequest) {
        let result = CaptureResult {
            frame_number: request.frame_number,
            settings: request.settings,
            output_buffers: request.output_buffers.into_iter().map(|b| b.buffer).collect(),
            input_buffer: None,
            partial_result: 1,
        };

        match self.callbacks.load_full() {
            Some(cb) => cb.process_capture_result(result),
            None => warn!(
                camera = self.camera_id,
                frame = result.frame_number,
                "Result dropped, no callbacks"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Arc<Mutex<Vec<NotifyMessage>>>);

    impl CaptureCallbacks for Recorder {
        fn notify(&self, msg: NotifyMessage) {
            self.0.lock().unwrap().push(msg);
        }

        fn process_capture_result(&self, _result: CaptureResult) {}
    }

    #[test]
    fn test_zero_timestamp_falls_back_to_boot_time() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let notifier = Notifier::new(0);
        notifier.install(Box::new(Recorder(seen.clone())));

        notifier.notify_shutter(3, 0);
        notifier.notify_shutter(4, 77);

        let seen = seen.lock().unwrap();
        assert!(matches!(seen[0], NotifyMessage::Shutter { frame_number: 3, timestamp } if timestamp > 0));
        assert_eq!(
            seen[1],
            NotifyMessage::Shutter {
                frame_number: 4,
                timestamp: 77
            }
        );
    }

    #[test]
    fn test_without_callbacks_events_are_dropped() {
        let notifier = Notifier::new(1);
        assert!(!notifier.is_installed());
        notifier.notify_shutter(0, 1);
        notifier.send_result(CaptureRequest {
            frame_number: 0,
            settings: Settings::new(),
            output_buffers: Vec::new(),
        });
    }
}
