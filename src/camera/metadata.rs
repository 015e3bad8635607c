//! Camera metadata: typed tag/value entries shared by value.
//!
//! [`Settings`] clones are cheap (reference counted) and copy on first write,
//! so a cached settings blob, a request's private copy and a result snapshot
//! can never observe each other's mutations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Metadata keys understood by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tag {
    // Per-request controls
    ControlMode,
    ControlCaptureIntent,
    JpegQuality,
    JpegOrientation,

    // Per-result dynamic values
    SensorTimestamp,
    SensorRollingShutterSkew,
    LensFocalLength,
    LensFocusRange,
    StatisticsSceneFlicker,
    FlashState,
    FlashFiringPower,
    FlashFiringTime,

    // Static characteristics
    LensFacing,
    SensorOrientation,
    SensorInfoPixelArraySize,
    SensorInfoActiveArraySize,
    SensorInfoTimestampSource,
    SensorInfoExposureTimeRange,
    ControlAeAvailableTargetFpsRanges,
    ControlAeCompensationRange,
    ControlAeCompensationStep,
    ControlAvailableModes,
    FlashInfoAvailable,
    InfoSupportedHardwareLevel,
    JpegMaxSize,
    LensInfoAvailableFocalLengths,
    RequestAvailableCapabilities,
    RequestMaxNumOutputStreams,
    RequestMaxNumInputStreams,
    RequestPartialResultCount,
    RequestPipelineMaxDepth,
    ScalerAvailableStreamConfigurations,
    ScalerAvailableMinFrameDurations,
    ScalerAvailableMaxDigitalZoom,
    SyncMaxLatency,
    TonemapAvailableModes,
    TonemapMaxCurvePoints,
}

impl Tag {
    /// Dotted section.name form
    pub fn name(self) -> &'static str {
        match self {
            Tag::ControlMode => "android.control.mode",
            Tag::ControlCaptureIntent => "android.control.captureIntent",
            Tag::JpegQuality => "android.jpeg.quality",
            Tag::JpegOrientation => "android.jpeg.orientation",
            Tag::SensorTimestamp => "android.sensor.timestamp",
            Tag::SensorRollingShutterSkew => "android.sensor.rollingShutterSkew",
            Tag::LensFocalLength => "android.lens.focalLength",
            Tag::LensFocusRange => "android.lens.focusRange",
            Tag::StatisticsSceneFlicker => "android.statistics.sceneFlicker",
            Tag::FlashState => "android.flash.state",
            Tag::FlashFiringPower => "android.flash.firingPower",
            Tag::FlashFiringTime => "android.flash.firingTime",
            Tag::LensFacing => "android.lens.facing",
            Tag::SensorOrientation => "android.sensor.orientation",
            Tag::SensorInfoPixelArraySize => "android.sensor.info.pixelArraySize",
            Tag::SensorInfoActiveArraySize => "android.sensor.info.activeArraySize",
            Tag::SensorInfoTimestampSource => "android.sensor.info.timestampSource",
            Tag::SensorInfoExposureTimeRange => "android.sensor.info.exposureTimeRange",
            Tag::ControlAeAvailableTargetFpsRanges => {
                "android.control.aeAvailableTargetFpsRanges"
            }
            Tag::ControlAeCompensationRange => "android.control.aeCompensationRange",
            Tag::ControlAeCompensationStep => "android.control.aeCompensationStep",
            Tag::ControlAvailableModes => "android.control.availableModes",
            Tag::FlashInfoAvailable => "android.flash.info.available",
            Tag::InfoSupportedHardwareLevel => "android.info.supportedHardwareLevel",
            Tag::JpegMaxSize => "android.jpeg.maxSize",
            Tag::LensInfoAvailableFocalLengths => "android.lens.info.availableFocalLengths",
            Tag::RequestAvailableCapabilities => "android.request.availableCapabilities",
            Tag::RequestMaxNumOutputStreams => "android.request.maxNumOutputStreams",
            Tag::RequestMaxNumInputStreams => "android.request.maxNumInputStreams",
            Tag::RequestPartialResultCount => "android.request.partialResultCount",
            Tag::RequestPipelineMaxDepth => "android.request.pipelineMaxDepth",
            Tag::ScalerAvailableStreamConfigurations => {
                "android.scaler.availableStreamConfigurations"
            }
            Tag::ScalerAvailableMinFrameDurations => "android.scaler.availableMinFrameDurations",
            Tag::ScalerAvailableMaxDigitalZoom => "android.scaler.availableMaxDigitalZoom",
            Tag::SyncMaxLatency => "android.sync.maxLatency",
            Tag::TonemapAvailableModes => "android.tonemap.availableToneMapModes",
            Tag::TonemapMaxCurvePoints => "android.tonemap.maxCurvePoints",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Enumerated values carried in u8/i32 entries
pub mod values {
    pub const CONTROL_MODE_OFF: u8 = 0;
    pub const CONTROL_MODE_AUTO: u8 = 1;

    pub const CAPTURE_INTENT_PREVIEW: u8 = 1;
    pub const CAPTURE_INTENT_STILL_CAPTURE: u8 = 2;
    pub const CAPTURE_INTENT_VIDEO_RECORD: u8 = 3;
    pub const CAPTURE_INTENT_VIDEO_SNAPSHOT: u8 = 4;
    pub const CAPTURE_INTENT_ZERO_SHUTTER_LAG: u8 = 5;
    pub const CAPTURE_INTENT_MANUAL: u8 = 6;

    pub const SCENE_FLICKER_NONE: u8 = 0;
    pub const FLASH_STATE_UNAVAILABLE: u8 = 0;
    pub const FLASH_INFO_AVAILABLE_FALSE: u8 = 0;

    pub const LENS_FACING_FRONT: u8 = 0;
    pub const LENS_FACING_BACK: u8 = 1;
    pub const LENS_FACING_EXTERNAL: u8 = 2;

    pub const TIMESTAMP_SOURCE_REALTIME: u8 = 1;
    pub const HARDWARE_LEVEL_3: u8 = 3;
    pub const CAPABILITY_BACKWARD_COMPATIBLE: u8 = 0;

    pub const SYNC_MAX_LATENCY_PER_FRAME_CONTROL: i32 = 0;

    pub const STREAM_CONFIGURATION_OUTPUT: i32 = 0;
    pub const STREAM_CONFIGURATION_INPUT: i32 = 1;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub numerator: i32,
    pub denominator: i32,
}

impl Rational {
    pub const fn new(numerator: i32, denominator: i32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }
}

/// One metadata entry: a typed array of values
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    U8(Vec<u8>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Rational(Vec<Rational>),
}

impl Entry {
    pub fn len(&self) -> usize {
        match self {
            Entry::U8(v) => v.len(),
            Entry::I32(v) => v.len(),
            Entry::F32(v) => v.len(),
            Entry::I64(v) => v.len(),
            Entry::F64(v) => v.len(),
            Entry::Rational(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Entry::U8(_) => "byte",
            Entry::I32(_) => "int32",
            Entry::F32(_) => "float",
            Entry::I64(_) => "int64",
            Entry::F64(_) => "double",
            Entry::Rational(_) => "rational",
        }
    }
}

/// Scalar types an [`Entry`] can hold
pub trait EntryValue: Copy + Sized {
    fn slice(entry: &Entry) -> Option<&[Self]>;
    fn entry(values: Vec<Self>) -> Entry;
}

macro_rules! entry_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl EntryValue for $ty {
                fn slice(entry: &Entry) -> Option<&[Self]> {
                    match entry {
                        Entry::$variant(v) => Some(v.as_slice()),
                        _ => None,
                    }
                }

                fn entry(values: Vec<Self>) -> Entry {
                    Entry::$variant(values)
                }
            }
        )*
    };
}

entry_value! {
    u8 => U8,
    i32 => I32,
    f32 => F32,
    i64 => I64,
    f64 => F64,
    Rational => Rational,
}

/// Settings/characteristics blob with value semantics
#[derive(Clone, Default, PartialEq)]
pub struct Settings {
    entries: Arc<BTreeMap<Tag, Entry>>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `tag`
    pub fn update<T: EntryValue>(&mut self, tag: Tag, values: &[T]) {
        Arc::make_mut(&mut self.entries).insert(tag, T::entry(values.to_vec()));
    }

    /// Remove `tag`, returning whether it was present
    pub fn erase(&mut self, tag: Tag) -> bool {
        if !self.entries.contains_key(&tag) {
            return false;
        }
        Arc::make_mut(&mut self.entries).remove(&tag).is_some()
    }

    /// Copy every entry of `other` over this blob
    pub fn merge(&mut self, other: &Settings) {
        if other.is_empty() {
            return;
        }
        let entries = Arc::make_mut(&mut self.entries);
        for (tag, entry) in other.entries.iter() {
            entries.insert(*tag, entry.clone());
        }
    }

    pub fn find(&self, tag: Tag) -> Option<&Entry> {
        self.entries.get(&tag)
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.entries.contains_key(&tag)
    }

    /// All values of `tag` as `T`
    pub fn values<T: EntryValue>(&self, tag: Tag) -> Result<&[T]> {
        let entry = self
            .find(tag)
            .ok_or_else(|| Error::not_found(format!("metadata tag {} is empty", tag)))?;
        T::slice(entry).ok_or_else(|| {
            Error::invalid_argument(format!("metadata tag {} holds {}", tag, entry.type_name()))
        })
    }

    /// The single value of `tag`. An absent tag is `NotFound`; a tag holding
    /// a different type or not exactly one value is `InvalidArgument`.
    pub fn single_value<T: EntryValue>(&self, tag: Tag) -> Result<T> {
        match self.values::<T>(tag)? {
            [value] => Ok(*value),
            other => Err(Error::invalid_argument(format!(
                "expected metadata tag {} to contain exactly 1 value (had {})",
                tag,
                other.len()
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = (Tag, &Entry)> {
        self.entries.iter().map(|(tag, entry)| (*tag, entry))
    }

    /// Whether both handles share storage
    pub fn ptr_eq(&self, other: &Settings) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(tag, entry)| (tag.name(), entry)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_value() {
        let mut settings = Settings::new();
        settings.update(Tag::SensorTimestamp, &[42i64]);
        settings.update(Tag::LensFocusRange, &[0.2f32, 0.0]);

        assert_eq!(settings.single_value::<i64>(Tag::SensorTimestamp).unwrap(), 42);
        assert!(matches!(
            settings.single_value::<i32>(Tag::SensorTimestamp),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            settings.single_value::<f32>(Tag::LensFocusRange),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            settings.single_value::<u8>(Tag::FlashState),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_clone_is_copy_on_write() {
        let mut original = Settings::new();
        original.update(Tag::ControlMode, &[values::CONTROL_MODE_OFF]);

        let mut copy = original.clone();
        assert!(copy.ptr_eq(&original));

        copy.update(Tag::ControlMode, &[values::CONTROL_MODE_AUTO]);
        assert!(!copy.ptr_eq(&original));
        assert_eq!(
            original.single_value::<u8>(Tag::ControlMode).unwrap(),
            values::CONTROL_MODE_OFF
        );
    }

    #[test]
    fn test_merge_and_erase() {
        let mut base = Settings::new();
        base.update(Tag::ControlMode, &[0u8]);
        let mut extra = Settings::new();
        extra.update(Tag::JpegQuality, &[70u8]);
        extra.update(Tag::ControlMode, &[1u8]);

        base.merge(&extra);
        assert_eq!(base.len(), 2);
        assert_eq!(base.single_value::<u8>(Tag::ControlMode).unwrap(), 1);

        assert!(base.erase(Tag::JpegQuality));
        assert!(!base.erase(Tag::JpegQuality));
    }
}
