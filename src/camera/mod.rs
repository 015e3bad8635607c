//! Device controller
//!
//! [`Camera`] holds the logic shared by every camera device: open/close
//! bookkeeping, stream configuration, request validation and the settings
//! cache. Device specifics (static characteristics, templates, buffer
//! readiness and actual fulfillment) live behind [`CameraDevice`].

pub mod metadata;
pub mod request;
pub mod stream;
mod virtual_camera;

pub use metadata::{Entry, EntryValue, Rational, Settings, Tag};
pub use request::{
    BoundBuffer, BufferStatus, CaptureCallbacks, CaptureRequest, CaptureRequestDesc,
    CaptureResult, Notifier, NotifyMessage, StreamBuffer,
};
pub use stream::{
    validate_stream_set, GrallocUsage, HalPixelFormat, Stream, StreamDescriptor, StreamId,
    StreamType,
};
pub use virtual_camera::VirtualCamera;

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwapOption;
use once_cell::sync::OnceCell;
use tracing::{debug, error, info, instrument};

use crate::error::{Error, Result};
use crate::PipelineConfig;
use metadata::values;
use stream::{direction_usage, resolve_format, setup_streams};

/// Device API version reported in [`CameraInfo`]
pub const DEVICE_VERSION: u32 = 0x0305;

/// Default-settings categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum RequestTemplate {
    Preview = 1,
    StillCapture = 2,
    VideoRecord = 3,
    VideoSnapshot = 4,
    ZeroShutterLag = 5,
    Manual = 6,
}

impl RequestTemplate {
    pub const ALL: [RequestTemplate; 6] = [
        RequestTemplate::Preview,
        RequestTemplate::StillCapture,
        RequestTemplate::VideoRecord,
        RequestTemplate::VideoSnapshot,
        RequestTemplate::ZeroShutterLag,
        RequestTemplate::Manual,
    ];

    /// `control.captureIntent` value matching this template
    pub fn capture_intent(self) -> u8 {
        match self {
            RequestTemplate::Preview => values::CAPTURE_INTENT_PREVIEW,
            RequestTemplate::StillCapture => values::CAPTURE_INTENT_STILL_CAPTURE,
            RequestTemplate::VideoRecord => values::CAPTURE_INTENT_VIDEO_RECORD,
            RequestTemplate::VideoSnapshot => values::CAPTURE_INTENT_VIDEO_SNAPSHOT,
            RequestTemplate::ZeroShutterLag => values::CAPTURE_INTENT_ZERO_SHUTTER_LAG,
            RequestTemplate::Manual => values::CAPTURE_INTENT_MANUAL,
        }
    }

    fn index(self) -> usize {
        self as usize - 1
    }
}

impl TryFrom<i32> for RequestTemplate {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        RequestTemplate::ALL
            .into_iter()
            .find(|t| *t as i32 == value)
            .ok_or_else(|| Error::invalid_argument(format!("invalid template request type: {}", value)))
    }
}

/// Default request settings, each set at most once per camera
#[derive(Debug, Default)]
pub struct TemplateSet {
    templates: [OnceCell<Settings>; 6],
}

impl TemplateSet {
    /// Store `settings` for `template`. Returns false if it was already set.
    pub fn set(&self, template: RequestTemplate, settings: Settings) -> bool {
        let stored = self.templates[template.index()].set(settings).is_ok();
        if !stored {
            debug!(?template, "Template already set");
        }
        stored
    }

    pub fn get(&self, template: RequestTemplate) -> Option<&Settings> {
        self.templates[template.index()].get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    Back,
    Front,
    External,
}

impl Facing {
    fn for_camera(id: u32) -> Self {
        match id {
            0 => Facing::Back,
            1 => Facing::Front,
            _ => Facing::External,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub facing: Facing,
    pub orientation: i32,
    pub device_version: u32,
    pub static_characteristics: Settings,
}

/// Device-specific hooks driven by [`Camera`]
pub trait CameraDevice: Send + Sync {
    /// Static characteristics for camera `id`
    fn init_static_info(&self, id: u32) -> Settings;

    fn is_valid_capture_settings(&self, _settings: &Settings) -> bool {
        true
    }

    fn open_device(&self) -> Result<()>;

    /// Per-device setup at initialize; fills the default templates
    fn init_device(&self, templates: &TemplateSet) -> Result<()>;

    fn flush_device(&self) -> Result<()>;

    fn close_device(&self) -> Result<()>;

    /// Make an output buffer ready for writing before its request is queued
    fn preprocess_capture_buffer(&self, buffer: &mut StreamBuffer) -> Result<()>;

    /// Hand an accepted request to the fulfillment side
    fn enqueue_request(&self, request: CaptureRequest) -> Result<()>;

    /// Stamp per-request dynamic metadata
    fn update_request_metadata(&self, settings: &mut Settings);

    /// Where shutter and result events are delivered
    fn notifier(&self) -> &Notifier;
}

#[derive(Default)]
struct DeviceState {
    busy: bool,
    initialized: bool,
    streams: Vec<Arc<Stream>>,
    /// Most recently submitted settings
    settings: Option<Settings>,
}

pub struct Camera<D: CameraDevice> {
    id: u32,
    device: D,
    max_buffers: u32,
    state: Mutex<DeviceState>,
    static_info: ArcSwapOption<Settings>,
    static_info_lock: Mutex<()>,
    templates: TemplateSet,
}

impl<D: CameraDevice> Camera<D> {
    pub fn new(id: u32, device: D, config: &PipelineConfig) -> Self {
        Self {
            id,
            device,
            max_buffers: config.max_buffers,
            state: Mutex::new(DeviceState::default()),
            static_info: ArcSwapOption::empty(),
            static_info_lock: Mutex::new(()),
            templates: TemplateSet::default(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_open(&self) -> bool {
        self.lock().busy
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Snapshot of the committed stream set
    pub fn streams(&self) -> Vec<Arc<Stream>> {
        self.lock().streams.clone()
    }

    pub fn has_cached_settings(&self) -> bool {
        self.lock().settings.is_some()
    }

    #[instrument(skip(self), fields(camera = self.id))]
    pub fn open(&self) -> Result<()> {
        info!("Opening camera device");
        let mut state = self.lock();
        if state.busy {
            error!("Camera device already opened");
            return Err(Error::Busy(self.id));
        }

        state.busy = true;
        if let Err(e) = self.device.open_device() {
            state.busy = false;
            return Err(e);
        }
        Ok(())
    }

    pub fn camera_info(&self) -> CameraInfo {
        CameraInfo {
            facing: Facing::for_camera(self.id),
            orientation: 0,
            device_version: DEVICE_VERSION,
            static_characteristics: self.static_info().as_ref().clone(),
        }
    }

    fn static_info(&self) -> Arc<Settings> {
        if let Some(info) = self.static_info.load_full() {
            return info;
        }
        let _guard = self
            .static_info_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(info) = self.static_info.load_full() {
            return info;
        }
        let info = Arc::new(self.device.init_static_info(self.id));
        self.static_info.store(Some(info.clone()));
        info
    }

    /// Rebuild the static characteristics (hot-plug)
    pub fn update_info(&self) {
        let _guard = self
            .static_info_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.static_info
            .store(Some(Arc::new(self.device.init_static_info(self.id))));
    }

    #[instrument(skip(self), fields(camera = self.id))]
    pub fn close(&self) -> Result<()> {
        info!("Closing camera device");
        {
            let mut state = self.lock();
            if !state.busy {
                error!("Camera device not open");
                return Err(Error::invalid_state("camera device not open"));
            }

            state.busy = false;
            state.initialized = false;
            state.streams.clear();
            state.settings = None;
        }

        // Draining runs capture callbacks, which may call back into the camera
        let res = self.device.close_device();
        self.device.notifier().clear();
        res
    }

    #[instrument(skip(self, callbacks), fields(camera = self.id))]
    pub fn initialize(&self, callbacks: Box<dyn CaptureCallbacks>) -> Result<()> {
        let mut state = self.lock();
        if !state.busy {
            return Err(Error::invalid_state("camera device not open"));
        }

        if let Err(e) = self.device.init_device(&self.templates) {
            error!(error = %e, "Failed to initialize device");
            return Err(e);
        }
        self.device.notifier().install(callbacks);
        state.initialized = true;
        Ok(())
    }

    /// Validate and commit a new stream set.
    ///
    /// On success each descriptor gets its handle, resolved format and
    /// negotiated usage/max-buffers written back. On failure nothing changes.
    #[instrument(skip(self, descriptors), fields(camera = self.id, streams = descriptors.len()))]
    pub fn configure_streams(&self, descriptors: &mut [StreamDescriptor]) -> Result<()> {
        let mut state = self.lock();
        if !state.initialized {
            error!("Device is not initialized yet");
            return Err(Error::invalid_state("device is not initialized"));
        }
        if descriptors.is_empty() {
            error!("Empty stream configuration array");
            return Err(Error::invalid_argument("empty stream configuration"));
        }

        let mut candidates: Vec<Stream> = Vec::with_capacity(descriptors.len());
        let mut usages = Vec::with_capacity(descriptors.len());
        for (i, desc) in descriptors.iter().enumerate() {
            let usage = desc.usage | direction_usage(desc.stream_type);
            let stream = if desc.max_buffers > 0 {
                debug!(index = i, handle = ?desc.handle, "Reusing stream");
                self.reuse_stream(&state.streams, desc)?
            } else {
                debug!(index = i, "Creating new stream");
                Stream::new(self.id, desc, resolve_format(desc.format, usage))
            };

            if candidates.iter().any(|c| c.id == stream.id) {
                return Err(Error::invalid_argument(format!(
                    "{} listed twice in one configuration",
                    stream.id
                )));
            }
            candidates.push(stream);
            usages.push(usage);
        }

        if let Err(e) = validate_stream_set(&candidates) {
            error!(error = %e, "Invalid stream set");
            return Err(e);
        }
        setup_streams(&mut candidates, self.max_buffers);

        for ((desc, stream), usage) in descriptors.iter_mut().zip(&candidates).zip(usages) {
            desc.handle = Some(stream.id);
            desc.format = stream.format;
            desc.usage = usage | stream.usage;
            desc.max_buffers = stream.max_buffers;
        }

        let outputs = candidates.iter().filter(|s| s.is_output()).count();
        let inputs = candidates.iter().filter(|s| s.is_input()).count();
        info!(outputs, inputs, "Committed stream configuration");

        state.streams = candidates.into_iter().map(Arc::new).collect();
        state.settings = None;
        Ok(())
    }

    fn reuse_stream(&self, committed: &[Arc<Stream>], desc: &StreamDescriptor) -> Result<Stream> {
        let handle = desc
            .handle
            .ok_or_else(|| Error::invalid_argument("reused stream has no handle"))?;
        let existing = committed
            .iter()
            .find(|s| s.id == handle)
            .ok_or_else(|| Error::invalid_argument(format!("{} is not configured", handle)))?;

        if !existing.is_valid_reuse(self.id, desc) {
            error!(%handle, "Mismatched parameter in reused stream");
            return Err(Error::invalid_argument(format!(
                "{} reused with different parameters",
                handle
            )));
        }

        let mut stream = Stream::clone(existing);
        stream.reuse = true;
        Ok(stream)
    }

    #[instrument(skip(self), fields(camera = self.id))]
    pub fn construct_default_request_settings(&self, template: RequestTemplate) -> Result<Settings> {
        let state = self.lock();
        if !state.initialized {
            error!("Device is not initialized yet");
            return Err(Error::invalid_state("device is not initialized"));
        }
        self.templates
            .get(template)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no {:?} template", template)))
    }

    /// Validate a request and queue it for fulfillment. Returns as soon as
    /// the request is queued; shutter and result follow on the callbacks.
    #[instrument(skip(self, request), fields(camera = self.id, frame = request.frame_number))]
    pub fn process_capture_request(&self, request: &CaptureRequestDesc) -> Result<()> {
        let mut state = self.lock();
        if !state.initialized {
            return Err(Error::invalid_state("device is not initialized"));
        }

        let settings = match (&request.settings, &state.settings) {
            (Some(settings), _) => settings.clone(),
            (None, Some(cached)) => cached.clone(),
            (None, None) => {
                error!("No settings without previous set");
                return Err(Error::invalid_argument(
                    "request has no settings and none were submitted before",
                ));
            }
        };

        if request.input_buffer.is_some() {
            error!("Reprocessing input buffer is not supported");
            return Err(Error::unsupported("reprocessing input buffers"));
        }

        if !self.device.is_valid_capture_settings(&settings) {
            error!("Invalid settings for capture request");
            return Err(Error::invalid_argument("settings cannot be captured"));
        }

        if request.output_buffers.is_empty() {
            error!("No output buffers");
            return Err(Error::invalid_argument("request has no output buffers"));
        }

        let mut output_buffers = Vec::with_capacity(request.output_buffers.len());
        for buffer in &request.output_buffers {
            let stream = state
                .streams
                .iter()
                .find(|s| s.id == buffer.stream)
                .filter(|s| s.is_output())
                .ok_or_else(|| {
                    Error::invalid_argument(format!("{} is not a configured output", buffer.stream))
                })?;
            output_buffers.push(BoundBuffer {
                stream: Arc::clone(stream),
                buffer: buffer.clone(),
            });
        }

        for bound in &mut output_buffers {
            self.device.preprocess_capture_buffer(&mut bound.buffer)?;
        }

        let mut settings = settings;
        self.device.update_request_metadata(&mut settings);
        self.device.enqueue_request(CaptureRequest {
            frame_number: request.frame_number,
            settings,
            output_buffers,
        })?;

        if let Some(settings) = &request.settings {
            state.settings = Some(settings.clone());
        }
        Ok(())
    }

    /// Advisory: delegates to the device flush hook
    #[instrument(skip(self), fields(camera = self.id))]
    pub fn flush(&self) -> Result<()> {
        info!("Flush device");
        if let Err(e) = self.device.flush_device() {
            error!(error = %e, "Failed to flush device");
            return Err(e);
        }
        Ok(())
    }

    pub fn dump(&self, out: &mut dyn io::Write) -> io::Result<()> {
        let state = self.lock();
        writeln!(out, "Camera ID: {} (Busy: {})", self.id, state.busy)?;
        match &state.settings {
            Some(settings) => writeln!(out, "Most Recent Settings: {} entries", settings.len())?,
            None => writeln!(out, "Most Recent Settings: none")?,
        }
        writeln!(out, "Number of streams: {}", state.streams.len())?;
        for (i, stream) in state.streams.iter().enumerate() {
            writeln!(out, "Stream {}/{}:", i, state.streams.len())?;
            stream.dump(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_from_i32() {
        assert_eq!(RequestTemplate::try_from(1).unwrap(), RequestTemplate::Preview);
        assert_eq!(RequestTemplate::try_from(6).unwrap(), RequestTemplate::Manual);
        assert!(RequestTemplate::try_from(0).is_err());
        assert!(RequestTemplate::try_from(7).is_err());
    }

    #[test]
    fn test_templates_are_set_once() {
        let templates = TemplateSet::default();
        let mut first = Settings::new();
        first.update(Tag::ControlMode, &[values::CONTROL_MODE_OFF]);

        assert!(templates.set(RequestTemplate::Preview, first.clone()));
        assert!(!templates.set(RequestTemplate::Preview, Settings::new()));
        assert_eq!(templates.get(RequestTemplate::Preview), Some(&first));
        assert!(templates.get(RequestTemplate::Manual).is_none());
    }

    struct StubDevice {
        notifier: Notifier,
        fail_init: bool,
    }

    impl CameraDevice for StubDevice {
        fn init_static_info(&self, _id: u32) -> Settings {
            Settings::new()
        }

        fn open_device(&self) -> Result<()> {
            Ok(())
        }

        fn init_device(&self, _templates: &TemplateSet) -> Result<()> {
            if self.fail_init {
                return Err(Error::invalid_state("sensor did not come up"));
            }
            Ok(())
        }

        fn flush_device(&self) -> Result<()> {
            Ok(())
        }

        fn close_device(&self) -> Result<()> {
            Ok(())
        }

        fn preprocess_capture_buffer(&self, _buffer: &mut StreamBuffer) -> Result<()> {
            Ok(())
        }

        fn enqueue_request(&self, _request: CaptureRequest) -> Result<()> {
            Ok(())
        }

        fn update_request_metadata(&self, _settings: &mut Settings) {}

        fn notifier(&self) -> &Notifier {
            &self.notifier
        }
    }

    struct Discard;

    impl CaptureCallbacks for Discard {
        fn notify(&self, _msg: NotifyMessage) {}
        fn process_capture_result(&self, _result: CaptureResult) {}
    }

    fn stub_camera(fail_init: bool) -> Camera<StubDevice> {
        let device = StubDevice {
            notifier: Notifier::new(0),
            fail_init,
        };
        Camera::new(0, device, &PipelineConfig::default())
    }

    #[test]
    fn test_failed_initialize_leaves_no_callbacks() {
        let camera = stub_camera(true);
        camera.open().unwrap();

        assert!(camera.initialize(Box::new(Discard)).is_err());
        assert!(!camera.is_initialized());
        assert!(!camera.device().notifier().is_installed());
    }

    #[test]
    fn test_initialize_requires_open_and_installs_callbacks() {
        let camera = stub_camera(false);
        assert!(matches!(
            camera.initialize(Box::new(Discard)),
            Err(Error::InvalidState(_))
        ));

        camera.open().unwrap();
        camera.initialize(Box::new(Discard)).unwrap();
        assert!(camera.device().notifier().is_installed());

        camera.close().unwrap();
        assert!(!camera.device().notifier().is_installed());
    }

    #[test]
    fn test_facing_by_id() {
        assert_eq!(Facing::for_camera(0), Facing::Back);
        assert_eq!(Facing::for_camera(1), Facing::Front);
        assert_eq!(Facing::for_camera(5), Facing::External);
    }
}
