use std::io::Read;

use super::{FrameBuffer, Geometry};
use crate::capture::{FourCc, Frame};
use crate::error::{Error, Result};

/// Private copy of frame data that arrived from outside the pipeline.
/// Capacity is fixed to what was copied at construction.
#[derive(Debug, Clone)]
pub struct CopiedFrameBuffer {
    buffer: Vec<u8>,
    data_size: usize,
    geometry: Geometry,
}

impl CopiedFrameBuffer {
    /// Copy a raw frame out of its source
    pub fn from_frame(frame: &Frame) -> Self {
        let buffer = frame.data.to_vec();
        Self {
            data_size: buffer.len(),
            buffer,
            geometry: Geometry {
                width: frame.meta.width,
                height: frame.meta.height,
                fourcc: frame.meta.format.fourcc(),
            },
        }
    }

    /// Drain `reader` (a shared-memory fd, a socket) into a private buffer
    pub fn from_reader(
        mut reader: impl Read,
        width: u32,
        height: u32,
        fourcc: FourCc,
    ) -> Result<Self> {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        Ok(Self {
            data_size: buffer.len(),
            buffer,
            geometry: Geometry {
                width,
                height,
                fourcc,
            },
        })
    }
}

impl FrameBuffer for CopiedFrameBuffer {
    fn map(&mut self) -> Result<()> {
        Ok(())
    }

    fn unmap(&mut self) -> Result<()> {
        Ok(())
    }

    fn data(&self) -> &[u8] {
        &self.buffer[..self.data_size]
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    fn data_size(&self) -> usize {
        self.data_size
    }

    fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    fn width(&self) -> u32 {
        self.geometry.width
    }

    fn height(&self) -> u32 {
        self.geometry.height
    }

    fn fourcc(&self) -> FourCc {
        self.geometry.fourcc
    }

    fn set_fourcc(&mut self, fourcc: FourCc) {
        self.geometry.fourcc = fourcc;
    }

    fn set_data_size(&mut self, data_size: usize) -> Result<()> {
        if data_size > self.buffer.len() {
            return Err(Error::BufferOverflow {
                requested: data_size,
                capacity: self.buffer.len(),
            });
        }
        self.data_size = data_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;
    use bytes::Bytes;

    #[test]
    fn test_copy_is_independent_of_source() {
        let frame = Frame::new(0, 2, 1, PixelFormat::Rgb24, Bytes::from(vec![1u8; 6]));
        let mut copy = CopiedFrameBuffer::from_frame(&frame);
        copy.data_mut()[0] = 42;

        assert_eq!(frame.data[0], 1);
        assert_eq!(copy.fourcc(), FourCc::RGB24);
        assert_eq!(copy.data_size(), 6);
        assert!(copy.set_data_size(7).is_err());
    }

    #[test]
    fn test_from_reader() {
        let copy =
            CopiedFrameBuffer::from_reader(&[5u8; 12][..], 2, 2, FourCc::YUYV).unwrap();
        assert_eq!(copy.data(), &[5u8; 12]);
        assert_eq!((copy.width(), copy.height()), (2, 2));
    }
}
