//! Frame buffers: one mapped memory region plus its geometry
//!
//! Three variants share the [`FrameBuffer`] contract:
//! - [`AllocatedFrameBuffer`]: heap storage owned by the pipeline, grows on demand
//! - [`ImportedFrameBuffer`]: a caller-owned [`GraphicBuffer`] mapped between
//!   `map` and `unmap`
//! - [`CopiedFrameBuffer`]: a private copy of externally sourced frame data

mod allocated;
mod copied;
mod fence;
mod imported;

pub use allocated::AllocatedFrameBuffer;
pub use copied::CopiedFrameBuffer;
pub use fence::Fence;
pub use imported::{BufferHandle, GraphicBuffer, ImportedFrameBuffer};

use crate::capture::FourCc;
use crate::error::Result;

pub trait FrameBuffer {
    /// Make the memory accessible. Mapping an already mapped buffer is an error.
    fn map(&mut self) -> Result<()>;

    /// Release the mapping taken by [`FrameBuffer::map`]
    fn unmap(&mut self) -> Result<()>;

    /// The bytes in use (`data_size` long)
    fn data(&self) -> &[u8];

    /// The whole allocated region (`buffer_size` long)
    fn data_mut(&mut self) -> &mut [u8];

    /// Number of bytes in use
    fn data_size(&self) -> usize;

    /// Number of bytes allocated
    fn buffer_size(&self) -> usize;

    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn fourcc(&self) -> FourCc;
    fn set_fourcc(&mut self, fourcc: FourCc);

    /// Record how many bytes are in use; `data_size <= buffer_size` always holds
    fn set_data_size(&mut self, data_size: usize) -> Result<()>;
}

/// Width, height and format tag common to every variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Geometry {
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCc,
}
