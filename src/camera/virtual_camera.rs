use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use super::metadata::{values, Rational, Settings, Tag};
use super::request::{BufferStatus, CaptureRequest, Notifier, StreamBuffer};
use super::stream::HalPixelFormat;
use super::{CameraDevice, RequestTemplate, TemplateSet};
use crate::buffer::Fence;
use crate::capture::RawFrameSource;
use crate::error::{Error, Result};
use crate::pipeline::FulfillmentWorker;
use crate::utils::boot_time_ns;
use crate::Config;

const PIXEL_ARRAY: [i32; 2] = [1856, 1392];
const FRAME_DURATION_NS: i64 = 33_331_760;
const STREAM_SIZES: [(i32, i32); 4] = [(320, 240), (640, 480), (1280, 720), (1856, 1392)];

/// Camera backed by a raw-frame source instead of a sensor
pub struct VirtualCamera {
    id: u32,
    fence_timeout: Duration,
    notifier: Arc<Notifier>,
    worker: FulfillmentWorker,
}

impl VirtualCamera {
    /// Create the device and start its fulfillment worker
    pub fn new(id: u32, source: Arc<dyn RawFrameSource>, config: &Config) -> Result<Self> {
        let notifier = Arc::new(Notifier::new(id));
        let worker = FulfillmentWorker::spawn(id, source, notifier.clone(), config)?;
        Ok(Self {
            id,
            fence_timeout: Duration::from_millis(config.pipeline.fence_timeout_ms),
            notifier,
            worker,
        })
    }
}

fn stream_configurations() -> (Vec<i32>, Vec<i64>) {
    let formats = [
        HalPixelFormat::ImplementationDefined,
        HalPixelFormat::YCbCr420_888,
        HalPixelFormat::Blob,
    ];
    let mut configs = Vec::new();
    let mut durations = Vec::new();
    for (w, h) in STREAM_SIZES {
        for format in formats {
            configs.extend([format as i32, w, h, values::STREAM_CONFIGURATION_OUTPUT]);
            durations.extend([format as i64, w as i64, h as i64, FRAME_DURATION_NS]);
        }
    }
    // Full-size YUV input for reprocessing capable clients
    configs.extend([
        HalPixelFormat::YCbCr420_888 as i32,
        PIXEL_ARRAY[0],
        PIXEL_ARRAY[1],
        values::STREAM_CONFIGURATION_INPUT,
    ]);
    (configs, durations)
}

impl CameraDevice for VirtualCamera {
    fn init_static_info(&self, id: u32) -> Settings {
        let mut info = Settings::new();

        let facing = match id {
            0 => values::LENS_FACING_BACK,
            1 => values::LENS_FACING_FRONT,
            _ => values::LENS_FACING_EXTERNAL,
        };
        info.update(Tag::LensFacing, &[facing]);
        info.update(Tag::SensorOrientation, &[0i32]);

        info.update(Tag::ControlAeAvailableTargetFpsRanges, &[15i32, 15, 5, 30, 15, 30, 30, 30]);
        info.update(Tag::ControlAeCompensationRange, &[-9i32, 9]);
        info.update(Tag::ControlAeCompensationStep, &[Rational::new(1, 3)]);
        info.update(Tag::ControlAvailableModes, &[0u8, 1, 2, 4]);
        info.update(Tag::FlashInfoAvailable, &[values::FLASH_INFO_AVAILABLE_FALSE]);
        info.update(Tag::InfoSupportedHardwareLevel, &[values::HARDWARE_LEVEL_3]);
        info.update(Tag::JpegMaxSize, &[13 * 1024 * 1024i32]);
        info.update(Tag::LensInfoAvailableFocalLengths, &[3.3f32]);
        info.update(
            Tag::RequestAvailableCapabilities,
            &[values::CAPABILITY_BACKWARD_COMPATIBLE],
        );
        info.update(Tag::RequestMaxNumOutputStreams, &[1i32, 3, 1]);
        info.update(Tag::RequestMaxNumInputStreams, &[1i32]);
        info.update(Tag::RequestPartialResultCount, &[1i32]);
        info.update(Tag::RequestPipelineMaxDepth, &[4u8]);

        let (configs, durations) = stream_configurations();
        info.update(Tag::ScalerAvailableStreamConfigurations, &configs);
        info.update(Tag::ScalerAvailableMinFrameDurations, &durations);
        info.update(Tag::ScalerAvailableMaxDigitalZoom, &[10.0f32]);

        info.update(Tag::SensorInfoPixelArraySize, &PIXEL_ARRAY);
        info.update(Tag::SensorInfoActiveArraySize, &[0, 0, PIXEL_ARRAY[0], PIXEL_ARRAY[1]]);
        info.update(Tag::SensorInfoTimestampSource, &[values::TIMESTAMP_SOURCE_REALTIME]);
        info.update(Tag::SensorInfoExposureTimeRange, &[1000i64, 300_000_000]);

        info.update(Tag::SyncMaxLatency, &[values::SYNC_MAX_LATENCY_PER_FRAME_CONTROL]);
        info.update(Tag::TonemapAvailableModes, &[0u8, 1, 2]);
        info.update(Tag::TonemapMaxCurvePoints, &[128i32]);
        info.update(Tag::FlashFiringPower, &[10u8]);
        info.update(Tag::FlashFiringTime, &[0i64]);

        self.update_request_metadata(&mut info);
        info
    }

    fn open_device(&self) -> Result<()> {
        debug!(camera = self.id, "Virtual device opened");
        Ok(())
    }

    fn init_device(&self, templates: &TemplateSet) -> Result<()> {
        let mut base = Settings::new();
        base.update(Tag::ControlMode, &[values::CONTROL_MODE_OFF]);

        for template in RequestTemplate::ALL {
            let mut settings = base.clone();
            settings.update(Tag::ControlCaptureIntent, &[template.capture_intent()]);
            templates.set(template, settings);
        }
        Ok(())
    }

    fn flush_device(&self) -> Result<()> {
        self.worker.drain()
    }

    fn close_device(&self) -> Result<()> {
        let pending = self.worker.pending();
        if pending > 0 {
            info!(camera = self.id, pending, "Draining queued requests before close");
        }
        self.worker.drain()
    }

    fn preprocess_capture_buffer(&self, buffer: &mut StreamBuffer) -> Result<()> {
        if buffer.acquire_fence.is_set() {
            if let Err(e) = buffer.acquire_fence.wait(self.fence_timeout) {
                match &e {
                    Error::Timeout(_) => {
                        error!(camera = self.id, "Timeout waiting on buffer acquire fence")
                    }
                    other => error!(
                        camera = self.id,
                        error = %other,
                        "Error waiting on buffer acquire fence"
                    ),
                }
                return Err(e);
            }
        }

        buffer.acquire_fence = Fence::none();
        buffer.release_fence = Fence::none();
        buffer.status = BufferStatus::Ok;
        Ok(())
    }

    fn enqueue_request(&self, request: CaptureRequest) -> Result<()> {
        self.worker.submit(request)
    }

    fn update_request_metadata(&self, settings: &mut Settings) {
        let timestamp = boot_time_ns();
        if timestamp > 0 {
            settings.update(Tag::SensorTimestamp, &[timestamp as i64]);
        }
        settings.update(Tag::LensFocalLength, &[5.0f32]);
        settings.update(Tag::StatisticsSceneFlicker, &[values::SCENE_FLICKER_NONE]);
        settings.update(Tag::FlashState, &[values::FLASH_STATE_UNAVAILABLE]);
        settings.update(Tag::SensorRollingShutterSkew, &[0i64]);
        settings.update(Tag::LensFocusRange, &[1.0f32 / 5.0, 0.0]);
    }

    fn notifier(&self) -> &Notifier {
        &self.notifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::EmptySource;

    fn camera(id: u32) -> VirtualCamera {
        VirtualCamera::new(id, Arc::new(EmptySource), &Config::default()).unwrap()
    }

    #[test]
    fn test_templates_carry_intent() {
        let device = camera(0);
        let templates = TemplateSet::default();
        device.init_device(&templates).unwrap();

        for template in RequestTemplate::ALL {
            let settings = templates.get(template).unwrap();
            assert_eq!(
                settings.single_value::<u8>(Tag::ControlMode).unwrap(),
                values::CONTROL_MODE_OFF
            );
            assert_eq!(
                settings.single_value::<u8>(Tag::ControlCaptureIntent).unwrap(),
                template.capture_intent()
            );
        }
    }

    #[test]
    fn test_request_metadata_stamp() {
        let device = camera(0);
        let mut settings = Settings::new();
        device.update_request_metadata(&mut settings);

        assert!(settings.single_value::<i64>(Tag::SensorTimestamp).unwrap() > 0);
        assert_eq!(settings.single_value::<f32>(Tag::LensFocalLength).unwrap(), 5.0);
        assert_eq!(settings.values::<f32>(Tag::LensFocusRange).unwrap(), &[0.2, 0.0]);
        assert_eq!(
            settings.single_value::<u8>(Tag::FlashState).unwrap(),
            values::FLASH_STATE_UNAVAILABLE
        );
    }

    #[test]
    fn test_static_info_facing() {
        assert_eq!(
            camera(1).init_static_info(1).single_value::<u8>(Tag::LensFacing).unwrap(),
            values::LENS_FACING_FRONT
        );
        assert_eq!(
            camera(3).init_static_info(3).single_value::<u8>(Tag::LensFacing).unwrap(),
            values::LENS_FACING_EXTERNAL
        );
    }

    #[test]
    fn test_preprocess_clears_fences() {
        let device = camera(0);
        let handle = crate::buffer::GraphicBuffer::with_size(tempfile::tempfile().unwrap(), 16)
            .unwrap();
        let (rx, tx) = nix::unistd::pipe().unwrap();
        drop(tx);

        let desc = crate::camera::StreamDescriptor::output(HalPixelFormat::Rgba8888, 2, 2);
        let stream = crate::camera::stream::Stream::new(0, &desc, desc.format);
        let mut buffer = StreamBuffer::new(stream.id, handle).with_acquire_fence(Fence::from_fd(rx));
        buffer.status = BufferStatus::Error;

        device.preprocess_capture_buffer(&mut buffer).unwrap();
        assert!(!buffer.acquire_fence.is_set());
        assert!(!buffer.release_fence.is_set());
        assert_eq!(buffer.status, BufferStatus::Ok);
    }
}
