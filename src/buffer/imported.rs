use std::fmt;
use std::fs::File;
use std::io;
use std::sync::Arc;

use memmap2::{MmapMut, MmapOptions};
use tracing::{error, warn};

use super::{FrameBuffer, Geometry};
use crate::capture::{FourCc, PixelFormat};
use crate::convert::get_converted_size;
use crate::error::{Error, Result};

/// Shareable memory object allocated by the caller (a memfd, dma-buf or
/// plain file). The pipeline only ever references it.
pub struct GraphicBuffer {
    file: File,
    size: usize,
}

/// Reference to a caller-owned graphic buffer
pub type BufferHandle = Arc<GraphicBuffer>;

impl GraphicBuffer {
    /// Wrap an existing file; its current length is the buffer size
    pub fn from_file(file: File) -> io::Result<BufferHandle> {
        let size = file.metadata()?.len() as usize;
        Ok(Arc::new(Self { file, size }))
    }

    /// Resize `file` to `size` bytes and wrap it
    pub fn with_size(file: File, size: usize) -> io::Result<BufferHandle> {
        file.set_len(size as u64)?;
        Ok(Arc::new(Self { file, size }))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}

impl fmt::Debug for GraphicBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicBuffer")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Frame buffer over a caller-supplied [`GraphicBuffer`].
///
/// Memory is only reachable between `map` and `unmap`; outside that window
/// `data` is empty.
pub struct ImportedFrameBuffer {
    handle: BufferHandle,
    mapping: Option<MmapMut>,
    data_size: usize,
    buffer_size: usize,
    geometry: Geometry,
    /// Capacity used for compressed formats
    device_buffer_length: usize,
}

impl ImportedFrameBuffer {
    pub fn new(
        handle: BufferHandle,
        width: u32,
        height: u32,
        fourcc: FourCc,
        device_buffer_length: usize,
    ) -> Self {
        Self {
            handle,
            mapping: None,
            data_size: 0,
            buffer_size: 0,
            geometry: Geometry {
                width,
                height,
                fourcc,
            },
            device_buffer_length,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    fn mapped_len(&self) -> Result<usize> {
        let format = self
            .geometry
            .fourcc
            .format()
            .ok_or(Error::InvalidFormat(self.geometry.fourcc))?;

        if format == PixelFormat::Jpeg {
            return Ok(self.device_buffer_length.min(self.handle.size()));
        }
        get_converted_size(self.geometry.fourcc, self.geometry.width, self.geometry.height)
    }
}

impl FrameBuffer for ImportedFrameBuffer {
    fn map(&mut self) -> Result<()> {
        if self.mapping.is_some() {
            error!("The buffer is already mapped");
            return Err(Error::invalid_state("buffer is already mapped"));
        }

        let len = self.mapped_len()?;
        if len == 0 || len > self.handle.size() {
            return Err(Error::invalid_argument(format!(
                "{}x{} {} needs {} bytes, graphic buffer has {}",
                self.geometry.width,
                self.geometry.height,
                self.geometry.fourcc,
                len,
                self.handle.size()
            )));
        }

        // SAFETY: the graphic buffer stays alive through `handle`, and the
        // request that owns this frame buffer is the only writer until unmap.
        let mapping = unsafe { MmapOptions::new().len(len).map_mut(self.handle.file())? };

        self.mapping = Some(mapping);
        self.buffer_size = len;
        self.data_size = 0;
        Ok(())
    }

    fn unmap(&mut self) -> Result<()> {
        // Dropping the mapping unmaps it
        self.mapping = None;
        Ok(())
    }

    fn data(&self) -> &[u8] {
        match &self.mapping {
            Some(m) => &m[..self.data_size],
            None => &[],
        }
    }

    fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.mapping {
            Some(m) => &mut m[..],
            None => &mut [],
        }
    }

    fn data_size(&self) -> usize {
        self.data_size
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
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
        if data_size > self.buffer_size {
            error!(
                capacity = self.buffer_size,
                requested = data_size,
                "Buffer overflow"
            );
            return Err(Error::BufferOverflow {
                requested: data_size,
                capacity: self.buffer_size,
            });
        }
        self.data_size = data_size;
        Ok(())
    }
}

impl Drop for ImportedFrameBuffer {
    fn drop(&mut self) {
        if self.mapping.is_some() {
            warn!("graphic buffer dropped while still mapped");
            let _ = self.unmap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(size: usize) -> BufferHandle {
        GraphicBuffer::with_size(tempfile::tempfile().unwrap(), size).unwrap()
    }

    #[test]
    fn test_map_is_not_reentrant() {
        let mut buf = ImportedFrameBuffer::new(handle(64), 4, 4, FourCc::YUV420, 0);
        buf.map().unwrap();
        assert_eq!(buf.buffer_size(), 24);
        assert!(matches!(buf.map(), Err(Error::InvalidState(_))));
        buf.unmap().unwrap();
        assert!(buf.data().is_empty());
        buf.map().unwrap();
    }

    #[test]
    fn test_unknown_format_fails_to_map() {
        let mut buf = ImportedFrameBuffer::new(handle(64), 4, 4, FourCc::new(b"XXXX"), 0);
        assert!(matches!(buf.map(), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_fixed_capacity_overflow() {
        let mut buf = ImportedFrameBuffer::new(handle(64), 2, 2, FourCc::RGB32, 0);
        buf.map().unwrap();
        buf.set_data_size(16).unwrap();
        assert!(matches!(
            buf.set_data_size(17),
            Err(Error::BufferOverflow {
                requested: 17,
                capacity: 16
            })
        ));
    }

    #[test]
    fn test_writes_reach_the_graphic_buffer() {
        use std::io::{Read, Seek, SeekFrom};

        let handle = handle(16);
        let mut buf = ImportedFrameBuffer::new(handle.clone(), 2, 2, FourCc::BGR32, 0);
        buf.map().unwrap();
        buf.data_mut().copy_from_slice(&[9u8; 16]);
        buf.unmap().unwrap();

        let mut file = handle.file().try_clone().unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, vec![9u8; 16]);
    }

    #[test]
    fn test_jpeg_uses_device_buffer_length() {
        let mut buf = ImportedFrameBuffer::new(handle(1000), 64, 64, FourCc::JPEG, 512);
        buf.map().unwrap();
        assert_eq!(buf.buffer_size(), 512);
    }
}
