//! vcam demo: one virtual camera fed by a synthetic frame source

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use flume::Sender;
use tracing::{debug, error, info, warn};

use vcam::buffer::{BufferHandle, GraphicBuffer};
use vcam::camera::{
    CaptureCallbacks, CaptureRequestDesc, CaptureResult, GrallocUsage, HalPixelFormat,
    NotifyMessage, StreamBuffer, StreamDescriptor,
};
use vcam::capture::{RawFrameSource, SyntheticSource};
use vcam::convert::get_converted_size;
use vcam::pipeline::FrameRing;
use vcam::{CameraHal, Config, RequestTemplate};

const REQUEST_COUNT: u32 = 90;

enum Event {
    Shutter(NotifyMessage),
    Result(CaptureResult),
}

struct ChannelCallbacks(Sender<Event>);

impl CaptureCallbacks for ChannelCallbacks {
    fn notify(&self, msg: NotifyMessage) {
        let _ = self.0.send(Event::Shutter(msg));
    }

    fn process_capture_result(&self, result: CaptureResult) {
        let _ = self.0.send(Event::Result(result));
    }
}

fn graphic_buffer(name: &str, size: usize) -> Result<BufferHandle> {
    let path = std::env::temp_dir().join(format!("vcam-{}-{}.buf", std::process::id(), name));
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)?;
    // The mapping keeps working after the name is gone
    std::fs::remove_file(&path)?;
    Ok(GraphicBuffer::with_size(file, size)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("vcam=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("vcam launching...");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    debug!(?config, "Loaded configuration");

    // Synthetic producer -> frame ring -> fulfillment workers
    let ring = Arc::new(FrameRing::new(config.pipeline.source_ring_capacity));
    let synthetic = SyntheticSource::from_config(&config.source);
    let period = Duration::from_millis(1000 / u64::from(config.source.fps.max(1)));
    let feeder_ring = ring.clone();
    let feeder = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Some(frame) = synthetic.acquire_frame() {
                feeder_ring.push(frame);
            }
        }
    });

    let hal = CameraHal::new(ring.clone(), &config)?;
    info!(cameras = hal.number_of_cameras(), "Registry up");

    let camera = hal.open("0")?;
    let (events_tx, events_rx) = flume::unbounded();
    camera.initialize(Box::new(ChannelCallbacks(events_tx)))?;

    let (width, height) = (config.source.width, config.source.height);
    let mut streams = [
        StreamDescriptor::output(HalPixelFormat::ImplementationDefined, width, height)
            .with_usage(GrallocUsage::HW_TEXTURE),
        StreamDescriptor::output(HalPixelFormat::Blob, width, height),
    ];
    camera.configure_streams(&mut streams)?;
    for stream in &streams {
        info!(handle = ?stream.handle, format = ?stream.format, usage = ?stream.usage, "Stream configured");
    }

    let preview_size = get_converted_size(streams[0].format.to_fourcc()?, width, height)?;
    let preview = graphic_buffer("preview", preview_size)?;
    let still = graphic_buffer("still", (width * height * 3 / 2) as usize)?;
    let (preview_id, still_id) = match (streams[0].handle, streams[1].handle) {
        (Some(p), Some(s)) => (p, s),
        _ => return Err(color_eyre::eyre::eyre!("configured streams have no handles")),
    };

    let settings = camera.construct_default_request_settings(RequestTemplate::Preview)?;

    let stop = Arc::new(AtomicBool::new(false));
    let submit_stop = stop.clone();
    let submit_camera = camera.clone();
    let submitter = tokio::task::spawn_blocking(move || -> vcam::Result<()> {
        for frame_number in 0..REQUEST_COUNT {
            if submit_stop.load(Ordering::Relaxed) {
                break;
            }
            let mut buffers = vec![StreamBuffer::new(preview_id, preview.clone())];
            if frame_number % 30 == 0 {
                buffers.push(StreamBuffer::new(still_id, still.clone()));
            }
            let mut request = CaptureRequestDesc::new(frame_number, buffers);
            // Later requests reuse the cached settings
            if frame_number == 0 {
                request = request.with_settings(settings.clone());
            }
            submit_camera.process_capture_request(&request)?;
            std::thread::sleep(period);
        }
        Ok(())
    });

    let consumer = tokio::spawn(async move {
        while let Ok(event) = events_rx.recv_async().await {
            match event {
                Event::Shutter(NotifyMessage::Shutter {
                    frame_number,
                    timestamp,
                }) => debug!(frame = frame_number, timestamp, "Shutter"),
                Event::Result(result) => {
                    let statuses: Vec<_> = result.output_buffers.iter().map(|b| b.status).collect();
                    info!(frame = result.frame_number, ?statuses, "Result");
                }
            }
        }
    });

    tokio::select! {
        res = submitter => {
            if let Err(e) = res? {
                error!("Submission failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted");
            stop.store(true, Ordering::Relaxed);
        }
    }

    camera.flush()?;
    camera.dump(&mut std::io::stdout())?;
    camera.close()?;
    feeder.abort();
    drop(hal);
    let _ = consumer.await;

    let stats = ring.stats();
    info!(
        written = stats.written,
        read = stats.read,
        dropped = stats.dropped,
        "vcam shutting down"
    );
    Ok(())
}
