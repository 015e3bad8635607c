use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use tracing::debug;

use super::yuv::{rotate_rgb24, I420Image};
use crate::buffer::FrameBuffer;
use crate::camera::metadata::{Settings, Tag};
use crate::capture::decoder::decode_mjpeg;
use crate::capture::PixelFormat;
use crate::error::{Error, Result};

/// Decoded copy of one source frame, kept in I420 so that several
/// destinations of different formats and sizes can be filled from it.
#[derive(Debug)]
pub struct CachedFrame {
    image: Option<I420Image>,
    default_quality: u8,
}

impl CachedFrame {
    pub fn new(default_quality: u8) -> Self {
        Self {
            image: None,
            default_quality,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.as_ref().map_or(0, |i| i.width as u32)
    }

    pub fn height(&self) -> u32 {
        self.image.as_ref().map_or(0, |i| i.height as u32)
    }

    /// Decode `src` into the cache, replacing the previous frame
    pub fn set_source(&mut self, src: &dyn FrameBuffer) -> Result<()> {
        let format = src.fourcc().format().ok_or(Error::InvalidFormat(src.fourcc()))?;
        let image = match format {
            PixelFormat::Mjpeg | PixelFormat::Jpeg => {
                let decoded = decode_mjpeg(src.data())?;
                I420Image::from_rgb24(
                    &decoded.rgb,
                    decoded.width as usize,
                    decoded.height as usize,
                )?
            }
            other => I420Image::from_raw(
                other,
                src.data(),
                src.width() as usize,
                src.height() as usize,
            )?,
        };
        self.image = Some(image);
        Ok(())
    }

    /// Fill `dst` from the cached frame at the destination's size and format
    pub fn convert(&self, settings: &Settings, dst: &mut dyn FrameBuffer) -> Result<()> {
        let image = self
            .image
            .as_ref()
            .ok_or_else(|| Error::invalid_state("no source frame cached"))?;
        let format = dst.fourcc().format().ok_or(Error::InvalidFormat(dst.fourcc()))?;

        let scaled;
        let image = if (image.width, image.height) == (dst.width() as usize, dst.height() as usize)
        {
            image
        } else {
            scaled = image.scaled(dst.width() as usize, dst.height() as usize);
            &scaled
        };

        let written = match format {
            PixelFormat::Jpeg => self.encode_jpeg(image, settings, dst)?,
            PixelFormat::Mjpeg => {
                return Err(Error::unsupported("MJPEG is a source-only format"));
            }
            other => image.write_raw(other, dst.data_mut())?,
        };
        dst.set_data_size(written)
    }

    fn encode_jpeg(
        &self,
        image: &I420Image,
        settings: &Settings,
        dst: &mut dyn FrameBuffer,
    ) -> Result<usize> {
        let quality = settings
            .single_value::<u8>(Tag::JpegQuality)
            .unwrap_or(self.default_quality)
            .clamp(1, 100);
        let orientation = settings.single_value::<i32>(Tag::JpegOrientation).unwrap_or(0);
        if orientation.rem_euclid(90) != 0 {
            return Err(Error::invalid_argument(format!(
                "jpeg orientation {} is not a multiple of 90",
                orientation
            )));
        }

        let rgb = image.to_rgb24();
        let (rgb, width, height) = rotate_rgb24(&rgb, image.width, image.height, orientation);

        let mut out = Vec::with_capacity(rgb.len() / 4);
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
        encoder.encode(&rgb, width as u32, height as u32, ExtendedColorType::Rgb8)?;
        debug!(quality, orientation, bytes = out.len(), "Encoded JPEG");

        let capacity = dst.buffer_size();
        if out.len() > capacity {
            return Err(Error::BufferOverflow {
                requested: out.len(),
                capacity,
            });
        }
        dst.data_mut()[..out.len()].copy_from_slice(&out);
        Ok(out.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AllocatedFrameBuffer;
    use crate::capture::FourCc;

    fn source() -> AllocatedFrameBuffer {
        let rgb: Vec<u8> = (0..8 * 8 * 3).map(|i| (i % 251) as u8).collect();
        AllocatedFrameBuffer::from_vec(rgb).with_geometry(8, 8, FourCc::RGB24)
    }

    #[test]
    fn test_convert_without_source_fails() {
        let cache = CachedFrame::new(90);
        let mut dst = AllocatedFrameBuffer::new(96).with_geometry(8, 8, FourCc::YUV420);
        assert!(matches!(
            cache.convert(&Settings::new(), &mut dst),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_rgb_to_scaled_nv12() {
        let mut cache = CachedFrame::new(90);
        cache.set_source(&source()).unwrap();
        let mut dst = AllocatedFrameBuffer::new(6).with_geometry(2, 2, FourCc::NV12);
        cache.convert(&Settings::new(), &mut dst).unwrap();
        assert_eq!(dst.data_size(), 6);
    }

    #[test]
    fn test_jpeg_roundtrips_through_decoder() {
        let mut cache = CachedFrame::new(80);
        cache.set_source(&source()).unwrap();

        let mut settings = Settings::new();
        settings.update(Tag::JpegOrientation, &[90i32]);
        let mut dst = AllocatedFrameBuffer::new(64 * 1024).with_geometry(8, 4, FourCc::JPEG);
        cache.convert(&settings, &mut dst).unwrap();

        let decoded = decode_mjpeg(dst.data()).unwrap();
        assert_eq!((decoded.width, decoded.height), (4, 8));
    }

    #[test]
    fn test_jpeg_overflow_is_reported() {
        let mut cache = CachedFrame::new(90);
        cache.set_source(&source()).unwrap();
        let mut dst = crate::buffer::CopiedFrameBuffer::from_reader(&[0u8; 16][..], 8, 8, FourCc::JPEG)
            .unwrap();
        assert!(matches!(
            cache.convert(&Settings::new(), &mut dst),
            Err(Error::BufferOverflow { .. })
        ));
    }
}
