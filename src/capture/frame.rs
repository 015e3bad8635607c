use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Raw frame handed out by a frame source, shared without copying
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,
}

impl Frame {
    pub fn new(sequence: u64, width: u32, height: u32, format: PixelFormat, data: Bytes) -> Self {
        Self {
            data,
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                format,
            }),
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("meta", &self.meta)
            .finish()
    }
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Pixel formats the pipeline understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// I420, planar Y then U then V
    Yuv420,
    /// YV12, planar Y then V then U
    Yvu420,
    Nv12,
    Nv21,
    Yuyv,
    Rgb24,
    /// Packed 32-bit, bytes in memory B G R A
    Rgb32,
    /// Packed 32-bit, bytes in memory R G B A
    Bgr32,
    Jpeg,
    Mjpeg,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 10] = [
        PixelFormat::Yuv420,
        PixelFormat::Yvu420,
        PixelFormat::Nv12,
        PixelFormat::Nv21,
        PixelFormat::Yuyv,
        PixelFormat::Rgb24,
        PixelFormat::Rgb32,
        PixelFormat::Bgr32,
        PixelFormat::Jpeg,
        PixelFormat::Mjpeg,
    ];

    pub fn fourcc(self) -> FourCc {
        match self {
            PixelFormat::Yuv420 => FourCc::YUV420,
            PixelFormat::Yvu420 => FourCc::YVU420,
            PixelFormat::Nv12 => FourCc::NV12,
            PixelFormat::Nv21 => FourCc::NV21,
            PixelFormat::Yuyv => FourCc::YUYV,
            PixelFormat::Rgb24 => FourCc::RGB24,
            PixelFormat::Rgb32 => FourCc::RGB32,
            PixelFormat::Bgr32 => FourCc::BGR32,
            PixelFormat::Jpeg => FourCc::JPEG,
            PixelFormat::Mjpeg => FourCc::MJPEG,
        }
    }

    pub fn from_fourcc(fourcc: FourCc) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.fourcc() == fourcc)
    }
}

/// V4L2-style four character code, little-endian packed
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FourCc(pub u32);

impl FourCc {
    pub const YUV420: FourCc = FourCc::new(b"YU12");
    pub const YVU420: FourCc = FourCc::new(b"YV12");
    pub const NV12: FourCc = FourCc::new(b"NV12");
    pub const NV21: FourCc = FourCc::new(b"NV21");
    pub const YUYV: FourCc = FourCc::new(b"YUYV");
    pub const RGB24: FourCc = FourCc::new(b"RGB3");
    pub const RGB32: FourCc = FourCc::new(b"RGB4");
    pub const BGR32: FourCc = FourCc::new(b"BGR4");
    pub const JPEG: FourCc = FourCc::new(b"JPEG");
    pub const MJPEG: FourCc = FourCc::new(b"MJPG");

    pub const fn new(code: &[u8; 4]) -> Self {
        FourCc(u32::from_le_bytes(*code))
    }

    pub fn format(self) -> Option<PixelFormat> {
        PixelFormat::from_fourcc(self)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_le_bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            bytes.iter().try_for_each(|b| write!(f, "{}", *b as char))
        } else {
            write!(f, "{:#010x}", self.0)
        }
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_roundtrip_through_format() {
        for format in PixelFormat::ALL {
            assert_eq!(format.fourcc().format(), Some(format));
        }
        assert_eq!(FourCc(0).format(), None);
    }

    #[test]
    fn test_fourcc_display() {
        assert_eq!(FourCc::YUV420.to_string(), "YU12");
        assert_eq!(FourCc(1).to_string(), "0x00000001");
    }
}
