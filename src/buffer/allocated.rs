use super::{FrameBuffer, Geometry};
use crate::capture::FourCc;
use crate::error::Result;

/// Heap buffer owned by the pipeline. Mapping is a no-op and
/// `set_data_size` grows the allocation instead of failing.
#[derive(Debug, Clone, Default)]
pub struct AllocatedFrameBuffer {
    buffer: Vec<u8>,
    data_size: usize,
    geometry: Geometry,
}

impl AllocatedFrameBuffer {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer: vec![0u8; buffer_size],
            data_size: 0,
            geometry: Geometry::default(),
        }
    }

    /// Take ownership of existing storage; all of it counts as data
    pub fn from_vec(buffer: Vec<u8>) -> Self {
        Self {
            data_size: buffer.len(),
            buffer,
            geometry: Geometry::default(),
        }
    }

    pub fn with_geometry(mut self, width: u32, height: u32, fourcc: FourCc) -> Self {
        self.geometry = Geometry {
            width,
            height,
            fourcc,
        };
        self
    }

    /// Zero the whole allocation
    pub fn reset(&mut self) {
        self.buffer.fill(0);
    }
}

impl FrameBuffer for AllocatedFrameBuffer {
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
            // Old contents are not preserved across growth
            self.buffer = vec![0u8; data_size];
        }
        self.data_size = data_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grows_on_demand() {
        let mut buf = AllocatedFrameBuffer::new(4);
        buf.set_data_size(2).unwrap();
        assert_eq!(buf.buffer_size(), 4);

        buf.set_data_size(16).unwrap();
        assert_eq!(buf.buffer_size(), 16);
        assert_eq!(buf.data().len(), 16);
    }

    #[test]
    fn test_reset_zeroes() {
        let mut buf = AllocatedFrameBuffer::from_vec(vec![7u8; 8]);
        buf.reset();
        assert!(buf.data().iter().all(|&b| b == 0));
    }
}
