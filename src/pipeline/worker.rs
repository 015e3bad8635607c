//! Fulfillment worker: one thread per camera turning queued requests into
//! filled buffers, shutter notifications and results.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use flume::{Receiver, Sender};
use tracing::{debug, error, info, trace, warn};

use crate::buffer::{CopiedFrameBuffer, FrameBuffer, ImportedFrameBuffer};
use crate::camera::{BoundBuffer, BufferStatus, CaptureRequest, Notifier, Settings, Tag};
use crate::capture::{Frame, RawFrameSource};
use crate::convert::{self, CachedFrame};
use crate::error::{Error, Result};
use crate::Config;

enum Message {
    Capture(CaptureRequest),
    /// Acknowledged once everything queued before it has been resolved
    Drain(Sender<()>),
}

/// Handle to a running fulfillment worker.
///
/// Dropping the handle closes the queue and joins the thread; requests still
/// queued at that point are resolved first.
pub struct FulfillmentWorker {
    camera_id: u32,
    tx: Option<Sender<Message>>,
    handle: Option<JoinHandle<()>>,
}

struct Context {
    camera_id: u32,
    source: Arc<dyn RawFrameSource>,
    notifier: Arc<Notifier>,
    default_quality: u8,
}

impl FulfillmentWorker {
    pub fn spawn(
        camera_id: u32,
        source: Arc<dyn RawFrameSource>,
        notifier: Arc<Notifier>,
        config: &Config,
    ) -> Result<Self> {
        let (tx, rx) = flume::unbounded();
        let ctx = Context {
            camera_id,
            source,
            notifier,
            default_quality: config.jpeg.default_quality,
        };
        let worker_cpu = config.pipeline.worker_cpu;

        let handle = thread::Builder::new()
            .name(format!("vcam-worker-{}", camera_id))
            .spawn(move || {
                if let Some(cpu) = worker_cpu {
                    pin_to_cpu(camera_id, cpu);
                }
                ctx.run(rx);
            })?;

        info!(camera = camera_id, "Fulfillment worker started");
        Ok(Self {
            camera_id,
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Queue a request; never blocks
    pub fn submit(&self, request: CaptureRequest) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::invalid_state("fulfillment worker stopped"))?;
        tx.send(Message::Capture(request))
            .map_err(|_| Error::invalid_state("fulfillment worker stopped"))
    }

    /// Block until every request queued so far has produced its result
    pub fn drain(&self) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::invalid_state("fulfillment worker stopped"))?;
        let (ack_tx, ack_rx) = flume::bounded(1);
        tx.send(Message::Drain(ack_tx))
            .map_err(|_| Error::invalid_state("fulfillment worker stopped"))?;
        ack_rx
            .recv()
            .map_err(|_| Error::invalid_state("fulfillment worker exited while draining"))
    }

    pub fn pending(&self) -> usize {
        self.tx.as_ref().map_or(0, |tx| tx.len())
    }
}

impl Drop for FulfillmentWorker {
    fn drop(&mut self) {
        // Disconnecting the channel is the exit signal
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(camera = self.camera_id, "Fulfillment worker panicked");
            }
        }
        debug!(camera = self.camera_id, "Fulfillment worker joined");
    }
}

fn pin_to_cpu(camera_id: u32, cpu: usize) {
    let core = core_affinity::get_core_ids()
        .and_then(|ids| ids.into_iter().find(|core| core.id == cpu));
    match core {
        Some(core) if core_affinity::set_for_current(core) => {
            debug!(camera = camera_id, cpu, "Pinned fulfillment worker")
        }
        _ => warn!(camera = camera_id, cpu, "Could not pin fulfillment worker"),
    }
}

impl Context {
    fn run(self, rx: Receiver<Message>) {
        while let Ok(message) = rx.recv() {
            match message {
                Message::Capture(request) => self.fulfill(request),
                Message::Drain(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        debug!(camera = self.camera_id, "Request queue closed, worker exiting");
    }

    fn fulfill(&self, mut request: CaptureRequest) {
        let frame_number = request.frame_number;
        trace!(camera = self.camera_id, frame = frame_number, "Fulfilling request");

        for bound in &mut request.output_buffers {
            let started = Instant::now();
            match self.fill_buffer(bound, &request.settings) {
                Ok(()) => {
                    bound.buffer.status = BufferStatus::Ok;
                    metrics::histogram!("vcam_buffer_fill_us")
                        .record(started.elapsed().as_micros() as f64);
                }
                Err(e) => {
                    warn!(
                        camera = self.camera_id,
                        frame = frame_number,
                        stream = %bound.stream.id,
                        error = %e,
                        "Output buffer skipped"
                    );
                    bound.buffer.status = BufferStatus::Error;
                    metrics::counter!("vcam_buffers_skipped").increment(1);
                }
            }
        }

        let timestamp = request
            .settings
            .single_value::<i64>(Tag::SensorTimestamp)
            .ok()
            .and_then(|t| u64::try_from(t).ok())
            .unwrap_or(0);
        self.notifier.notify_shutter(frame_number, timestamp);
        self.notifier.send_result(request);
        metrics::counter!("vcam_requests_completed").increment(1);
    }

    fn fill_buffer(&self, bound: &BoundBuffer, settings: &Settings) -> Result<()> {
        // Acquired outside any lock; the source may be slow
        let frame = self
            .source
            .acquire_frame()
            .ok_or_else(|| Error::not_found("no raw frame available"))?;

        let fourcc = bound.stream.fourcc()?;
        let handle = bound.buffer.buffer.clone();
        let capacity = handle.size();
        let mut output = ImportedFrameBuffer::new(
            handle,
            bound.stream.width,
            bound.stream.height,
            fourcc,
            capacity,
        );

        output.map()?;
        let written = self.write_frame(&frame, &mut output, settings);
        let unmapped = output.unmap();
        written?;
        unmapped
    }

    fn write_frame(
        &self,
        frame: &Frame,
        output: &mut dyn FrameBuffer,
        settings: &Settings,
    ) -> Result<()> {
        let source = CopiedFrameBuffer::from_frame(frame);

        if source.fourcc() == output.fourcc() {
            if (source.width(), source.height()) == (output.width(), output.height()) {
                return convert::copy(&source, output);
            }
            match convert::scale(&source, output) {
                Ok(()) => return Ok(()),
                Err(e) => trace!(error = %e, "Scale unavailable, converting"),
            }
        }

        let mut cached = CachedFrame::new(self.default_quality);
        cached.set_source(&source)?;
        cached.convert(settings, output)
    }
}
