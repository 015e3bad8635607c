//! Raw frame sources the fulfillment worker pulls from

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use crate::capture::frame::{Frame, PixelFormat};
use crate::convert::get_converted_size;
use crate::SourceConfig;

/// Origin of raw frame data.
///
/// Implementations may block briefly but must never be called while a
/// request-queue lock is held.
pub trait RawFrameSource: Send + Sync {
    /// Next raw frame, or `None` if nothing is available right now
    fn acquire_frame(&self) -> Option<Frame>;
}

/// Emits a moving gradient test pattern in the configured format
pub struct SyntheticSource {
    width: u32,
    height: u32,
    format: PixelFormat,
    counter: AtomicU64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            counter: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(config.width, config.height, config.format)
    }

    /// Build the pattern for one frame number
    pub fn pattern(&self, sequence: u64) -> Frame {
        let (w, h) = (self.width as usize, self.height as usize);
        let base = (sequence % 256) as u8;
        let data = match self.format {
            PixelFormat::Yuv420 => {
                let size = get_converted_size(self.format.fourcc(), self.width, self.height)
                    .unwrap_or(w * h * 3 / 2);
                let mut buf = vec![128u8; size];
                for y in 0..h {
                    for x in 0..w {
                        buf[y * w + x] = base.wrapping_add((x ^ y) as u8);
                    }
                }
                buf
            }
            PixelFormat::Rgb24 => {
                let mut buf = vec![0u8; w * h * 3];
                for y in 0..h {
                    for x in 0..w {
                        let idx = (y * w + x) * 3;
                        buf[idx] = base.wrapping_add((x % 256) as u8);
                        buf[idx + 1] = base.wrapping_add((y % 256) as u8);
                        buf[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
                    }
                }
                buf
            }
            other => {
                // Flat mid-grey for the remaining layouts
                let size = get_converted_size(other.fourcc(), self.width, self.height).unwrap_or(0);
                vec![128u8; size]
            }
        };
        Frame::new(sequence, self.width, self.height, self.format, Bytes::from(data))
    }
}

impl RawFrameSource for SyntheticSource {
    fn acquire_frame(&self) -> Option<Frame> {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        Some(self.pattern(sequence))
    }
}

/// A source that never has a frame
pub struct EmptySource;

impl RawFrameSource for EmptySource {
    fn acquire_frame(&self) -> Option<Frame> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_frame_sizes() {
        let source = SyntheticSource::new(8, 4, PixelFormat::Yuv420);
        let frame = source.acquire_frame().unwrap();
        assert_eq!(frame.data.len(), 8 * 4 * 3 / 2);
        assert_eq!(frame.meta.sequence, 0);
        assert_eq!(source.acquire_frame().unwrap().meta.sequence, 1);

        let rgb = SyntheticSource::new(8, 4, PixelFormat::Rgb24).pattern(3);
        assert_eq!(rgb.data.len(), 8 * 4 * 3);
    }

    #[test]
    fn test_empty_source() {
        assert!(EmptySource.acquire_frame().is_none());
    }
}
