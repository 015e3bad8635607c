pub mod decoder;
pub mod frame;
pub mod source;

pub use frame::{FourCc, Frame, FrameMetadata, PixelFormat};
pub use source::{EmptySource, RawFrameSource, SyntheticSource};
