//! Streams: caller-declared output/input channels and the stream-set rules

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use crate::capture::FourCc;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Output,
    Input,
    Bidirectional,
}

impl StreamType {
    pub fn is_input(self) -> bool {
        matches!(self, StreamType::Input | StreamType::Bidirectional)
    }

    pub fn is_output(self) -> bool {
        matches!(self, StreamType::Output | StreamType::Bidirectional)
    }
}

/// Platform buffer formats a stream can be declared with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum HalPixelFormat {
    Rgba8888 = 0x1,
    Rgb888 = 0x3,
    YCrCb420Sp = 0x11,
    YCbCr422I = 0x14,
    Raw16 = 0x20,
    Blob = 0x21,
    ImplementationDefined = 0x22,
    YCbCr420_888 = 0x23,
    Yv12 = 0x3231_5659,
}

impl HalPixelFormat {
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            0x1 => Self::Rgba8888,
            0x3 => Self::Rgb888,
            0x11 => Self::YCrCb420Sp,
            0x14 => Self::YCbCr422I,
            0x20 => Self::Raw16,
            0x21 => Self::Blob,
            0x22 => Self::ImplementationDefined,
            0x23 => Self::YCbCr420_888,
            0x3231_5659 => Self::Yv12,
            _ => return None,
        })
    }

    /// Pixel layout the pipeline writes for buffers of this format
    pub fn to_fourcc(self) -> Result<FourCc> {
        match self {
            Self::Blob => Ok(FourCc::JPEG),
            Self::ImplementationDefined | Self::Rgba8888 => Ok(FourCc::BGR32),
            Self::Rgb888 => Ok(FourCc::RGB24),
            Self::YCbCr420_888 => Ok(FourCc::YUV420),
            Self::YCbCr422I => Ok(FourCc::YUYV),
            Self::YCrCb420Sp => Ok(FourCc::NV21),
            Self::Yv12 => Ok(FourCc::YVU420),
            Self::Raw16 => Err(Error::unsupported(format!(
                "pixel format {:?} is unsupported",
                self
            ))),
        }
    }
}

bitflags! {
    /// Graphic buffer usage bits negotiated per stream
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GrallocUsage: u32 {
        const SW_READ_OFTEN = 0x0000_0003;
        const SW_WRITE_OFTEN = 0x0000_0030;
        const HW_TEXTURE = 0x0000_0100;
        const HW_VIDEO_ENCODER = 0x0001_0000;
        const HW_CAMERA_WRITE = 0x0002_0000;
        const HW_CAMERA_READ = 0x0004_0000;
    }
}

/// Opaque handle the caller keeps for a configured stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

impl StreamId {
    fn next() -> Self {
        StreamId(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// Caller side of a stream configuration entry.
///
/// `max_buffers > 0` together with `handle` asks to carry an existing stream
/// forward; on success `handle`, `format`, `usage` and `max_buffers` are
/// written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub handle: Option<StreamId>,
    pub stream_type: StreamType,
    pub format: HalPixelFormat,
    pub width: u32,
    pub height: u32,
    pub usage: GrallocUsage,
    pub max_buffers: u32,
}

impl StreamDescriptor {
    pub fn new(stream_type: StreamType, format: HalPixelFormat, width: u32, height: u32) -> Self {
        Self {
            handle: None,
            stream_type,
            format,
            width,
            height,
            usage: GrallocUsage::empty(),
            max_buffers: 0,
        }
    }

    pub fn output(format: HalPixelFormat, width: u32, height: u32) -> Self {
        Self::new(StreamType::Output, format, width, height)
    }

    pub fn input(format: HalPixelFormat, width: u32, height: u32) -> Self {
        Self::new(StreamType::Input, format, width, height)
    }

    pub fn with_usage(mut self, usage: GrallocUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// Committed stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub id: StreamId,
    pub camera_id: u32,
    pub stream_type: StreamType,
    /// Format as declared by the caller
    pub requested_format: HalPixelFormat,
    /// Concrete format after resolving `ImplementationDefined`
    pub format: HalPixelFormat,
    pub width: u32,
    pub height: u32,
    pub usage: GrallocUsage,
    pub max_buffers: u32,
    pub(crate) reuse: bool,
}

impl Stream {
    pub(crate) fn new(camera_id: u32, desc: &StreamDescriptor, format: HalPixelFormat) -> Self {
        Self {
            id: StreamId::next(),
            camera_id,
            stream_type: desc.stream_type,
            requested_format: desc.format,
            format,
            width: desc.width,
            height: desc.height,
            usage: GrallocUsage::empty(),
            max_buffers: 0,
            reuse: false,
        }
    }

    pub fn is_input(&self) -> bool {
        self.stream_type.is_input()
    }

    pub fn is_output(&self) -> bool {
        self.stream_type.is_output()
    }

    pub fn is_reused(&self) -> bool {
        self.reuse
    }

    /// Direction, format and size must be unchanged for a stream to be reused
    pub fn is_valid_reuse(&self, camera_id: u32, desc: &StreamDescriptor) -> bool {
        camera_id == self.camera_id
            && desc.stream_type == self.stream_type
            && (desc.format == self.requested_format || desc.format == self.format)
            && desc.width == self.width
            && desc.height == self.height
    }

    pub fn fourcc(&self) -> Result<FourCc> {
        self.format.to_fourcc()
    }

    pub(crate) fn dump(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
        writeln!(
            out,
            "  {} type={:?} format={:?} ({:?}) {}x{} usage={:?} max_buffers={} reuse={}",
            self.id,
            self.stream_type,
            self.format,
            self.requested_format,
            self.width,
            self.height,
            self.usage,
            self.max_buffers,
            self.reuse
        )
    }
}

/// Usage bits a stream's direction requires
pub(crate) fn direction_usage(stream_type: StreamType) -> GrallocUsage {
    let mut usage = GrallocUsage::empty();
    if stream_type.is_output() {
        usage |= GrallocUsage::HW_CAMERA_WRITE;
    }
    if stream_type.is_input() {
        usage |= GrallocUsage::HW_CAMERA_READ;
    }
    usage
}

/// Pick a concrete format for `ImplementationDefined` output streams:
/// texture and encoder consumers get planar YUV, anything else RGB.
pub(crate) fn resolve_format(format: HalPixelFormat, usage: GrallocUsage) -> HalPixelFormat {
    if format != HalPixelFormat::ImplementationDefined
        || !usage.contains(GrallocUsage::HW_CAMERA_WRITE)
    {
        return format;
    }
    if usage.intersects(GrallocUsage::HW_TEXTURE | GrallocUsage::HW_VIDEO_ENCODER) {
        HalPixelFormat::YCbCr420_888
    } else {
        HalPixelFormat::Rgb888
    }
}

/// A stream set needs at least one output and at most one input
pub fn validate_stream_set<'a>(streams: impl IntoIterator<Item = &'a Stream>) -> Result<()> {
    let (mut count, mut inputs, mut outputs) = (0usize, 0usize, 0usize);
    for stream in streams {
        count += 1;
        if stream.is_input() {
            inputs += 1;
        }
        if stream.is_output() {
            outputs += 1;
        }
    }

    if count == 0 {
        return Err(Error::invalid_argument("zero count stream configuration"));
    }
    if outputs < 1 {
        return Err(Error::invalid_argument("stream config must have >= 1 output"));
    }
    if inputs > 1 {
        return Err(Error::invalid_argument(format!(
            "stream config must have <= 1 input (had {})",
            inputs
        )));
    }
    Ok(())
}

/// Final usage and buffer count for every stream in a validated set
pub(crate) fn setup_streams(streams: &mut [Stream], max_buffers: u32) {
    for stream in streams {
        let mut usage = GrallocUsage::empty();
        if stream.is_output() {
            usage |= GrallocUsage::SW_WRITE_OFTEN | GrallocUsage::HW_CAMERA_WRITE;
        }
        if stream.is_input() {
            usage |= GrallocUsage::SW_READ_OFTEN | GrallocUsage::HW_CAMERA_READ;
        }
        stream.usage = usage;
        stream.max_buffers = max_buffers.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stream(stream_type: StreamType) -> Stream {
        let desc = StreamDescriptor::new(stream_type, HalPixelFormat::YCbCr420_888, 64, 48);
        Stream::new(0, &desc, desc.format)
    }

    #[test]
    fn test_implementation_defined_resolution() {
        let write = GrallocUsage::HW_CAMERA_WRITE;
        assert_eq!(
            resolve_format(HalPixelFormat::ImplementationDefined, write | GrallocUsage::HW_TEXTURE),
            HalPixelFormat::YCbCr420_888
        );
        assert_eq!(
            resolve_format(
                HalPixelFormat::ImplementationDefined,
                write | GrallocUsage::HW_VIDEO_ENCODER
            ),
            HalPixelFormat::YCbCr420_888
        );
        assert_eq!(
            resolve_format(HalPixelFormat::ImplementationDefined, write),
            HalPixelFormat::Rgb888
        );
        // Input-only streams keep the opaque format
        assert_eq!(
            resolve_format(HalPixelFormat::ImplementationDefined, GrallocUsage::HW_CAMERA_READ),
            HalPixelFormat::ImplementationDefined
        );
    }

    #[test]
    fn test_fourcc_mapping() {
        assert_eq!(HalPixelFormat::Blob.to_fourcc().unwrap(), FourCc::JPEG);
        assert_eq!(HalPixelFormat::Rgba8888.to_fourcc().unwrap(), FourCc::BGR32);
        assert_eq!(HalPixelFormat::YCrCb420Sp.to_fourcc().unwrap(), FourCc::NV21);
        assert_eq!(HalPixelFormat::Yv12.to_fourcc().unwrap(), FourCc::YVU420);
        assert!(matches!(
            HalPixelFormat::Raw16.to_fourcc(),
            Err(Error::Unsupported(_))
        ));
        assert_eq!(HalPixelFormat::from_raw(0x23), Some(HalPixelFormat::YCbCr420_888));
        assert_eq!(HalPixelFormat::from_raw(7), None);
    }

    #[test]
    fn test_reuse_requires_identical_parameters() {
        let s = stream(StreamType::Output);
        let mut desc = StreamDescriptor::output(HalPixelFormat::YCbCr420_888, 64, 48);
        assert!(s.is_valid_reuse(0, &desc));
        assert!(!s.is_valid_reuse(1, &desc));
        desc.width = 32;
        assert!(!s.is_valid_reuse(0, &desc));
    }

    #[test]
    fn test_setup_assigns_usage() {
        let mut streams = vec![stream(StreamType::Bidirectional)];
        setup_streams(&mut streams, 1);
        assert!(streams[0]
            .usage
            .contains(GrallocUsage::SW_READ_OFTEN | GrallocUsage::SW_WRITE_OFTEN));
        assert_eq!(streams[0].max_buffers, 1);
    }

    fn stream_type() -> impl Strategy<Value = StreamType> {
        prop_oneof![
            Just(StreamType::Output),
            Just(StreamType::Input),
            Just(StreamType::Bidirectional),
        ]
    }

    proptest! {
        #[test]
        fn stream_set_accepts_exactly_valid_sets(types in prop::collection::vec(stream_type(), 0..6)) {
            let streams: Vec<_> = types.iter().map(|t| stream(*t)).collect();
            let outputs = types.iter().filter(|t| t.is_output()).count();
            let inputs = types.iter().filter(|t| t.is_input()).count();
            let expected = outputs >= 1 && inputs <= 1;
            prop_assert_eq!(validate_stream_set(&streams).is_ok(), expected);
        }
    }
}
