//! Format converter: copy, scale and colorspace conversion between frame buffers.
//!
//! Every function here is pure with respect to its inputs: nothing is retained
//! past the call.

mod cached_frame;
pub mod yuv;

pub use cached_frame::CachedFrame;
pub use yuv::I420Image;

use crate::buffer::FrameBuffer;
use crate::capture::{FourCc, PixelFormat};
use crate::error::{Error, Result};

/// Bytes needed for a `width`x`height` frame in `fourcc`.
///
/// Compressed and unknown formats have no fixed size and fail with
/// [`Error::InvalidFormat`].
pub fn get_converted_size(fourcc: FourCc, width: u32, height: u32) -> Result<usize> {
    let format = fourcc.format().ok_or(Error::InvalidFormat(fourcc))?;
    converted_size(format, width, height)
}

pub(crate) fn converted_size(format: PixelFormat, width: u32, height: u32) -> Result<usize> {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = yuv::chroma_dims(w, h);
    match format {
        PixelFormat::Yuv420 | PixelFormat::Yvu420 | PixelFormat::Nv12 | PixelFormat::Nv21 => {
            Ok(w * h + 2 * cw * ch)
        }
        PixelFormat::Yuyv => Ok(cw * 4 * h),
        PixelFormat::Rgb24 => Ok(w * h * 3),
        PixelFormat::Rgb32 | PixelFormat::Bgr32 => Ok(w * h * 4),
        PixelFormat::Jpeg | PixelFormat::Mjpeg => Err(Error::InvalidFormat(format.fourcc())),
    }
}

/// Identical format and size: straight byte copy
pub fn copy(src: &dyn FrameBuffer, dst: &mut dyn FrameBuffer) -> Result<()> {
    if src.fourcc() != dst.fourcc() || src.width() != dst.width() || src.height() != dst.height()
    {
        return Err(Error::invalid_argument(format!(
            "copy needs identical layouts: {} {}x{} vs {} {}x{}",
            src.fourcc(),
            src.width(),
            src.height(),
            dst.fourcc(),
            dst.width(),
            dst.height()
        )));
    }

    let len = src.data_size();
    if len > dst.buffer_size() {
        return Err(Error::BufferOverflow {
            requested: len,
            capacity: dst.buffer_size(),
        });
    }
    dst.data_mut()[..len].copy_from_slice(src.data());
    dst.set_data_size(len)
}

/// Same-format resize. Planar and packed uncompressed formats other than
/// YUYV are supported; anything else is [`Error::Unsupported`].
pub fn scale(src: &dyn FrameBuffer, dst: &mut dyn FrameBuffer) -> Result<()> {
    if src.fourcc() != dst.fourcc() {
        return Err(Error::unsupported(format!(
            "scale cannot change format {} -> {}",
            src.fourcc(),
            dst.fourcc()
        )));
    }
    let format = src
        .fourcc()
        .format()
        .ok_or(Error::InvalidFormat(src.fourcc()))?;

    let (sw, sh) = (src.width() as usize, src.height() as usize);
    let (dw, dh) = (dst.width() as usize, dst.height() as usize);
    let need_src = converted_size(format, src.width(), src.height())?;
    let need_dst = converted_size(format, dst.width(), dst.height())?;
    if src.data_size() < need_src {
        return Err(Error::invalid_argument(format!(
            "source holds {} bytes, {} needs {}",
            src.data_size(),
            src.fourcc(),
            need_src
        )));
    }
    if dst.buffer_size() < need_dst {
        return Err(Error::BufferOverflow {
            requested: need_dst,
            capacity: dst.buffer_size(),
        });
    }

    let (scw, sch) = yuv::chroma_dims(sw, sh);
    let (dcw, dch) = yuv::chroma_dims(dw, dh);
    let input = src.data();
    let output = &mut dst.data_mut()[..need_dst];

    match format {
        PixelFormat::Yuv420 | PixelFormat::Yvu420 => {
            let (s_luma, d_luma) = (sw * sh, dw * dh);
            let (s_chroma, d_chroma) = (scw * sch, dcw * dch);
            let (d_y, d_rest) = output.split_at_mut(d_luma);
            let (d_c0, d_c1) = d_rest.split_at_mut(d_chroma);
            scale_plane(&input[..s_luma], sw, sh, d_y, dw, dh, 1);
            scale_plane(&input[s_luma..s_luma + s_chroma], scw, sch, d_c0, dcw, dch, 1);
            scale_plane(&input[s_luma + s_chroma..need_src], scw, sch, d_c1, dcw, dch, 1);
        }
        PixelFormat::Nv12 | PixelFormat::Nv21 => {
            let (s_luma, d_luma) = (sw * sh, dw * dh);
            let (d_y, d_uv) = output.split_at_mut(d_luma);
            scale_plane(&input[..s_luma], sw, sh, d_y, dw, dh, 1);
            // Interleaved chroma scales as 2-byte pixels
            scale_plane(&input[s_luma..need_src], scw, sch, d_uv, dcw, dch, 2);
        }
        PixelFormat::Rgb24 => scale_plane(&input[..need_src], sw, sh, output, dw, dh, 3),
        PixelFormat::Rgb32 | PixelFormat::Bgr32 => {
            scale_plane(&input[..need_src], sw, sh, output, dw, dh, 4)
        }
        other => return Err(Error::unsupported(format!("cannot scale {:?}", other))),
    }

    dst.set_data_size(need_dst)
}

/// Bilinear resample of one plane of `bpp`-byte pixels.
/// Equal sizes reproduce the input exactly.
pub(crate) fn scale_plane(
    src: &[u8],
    sw: usize,
    sh: usize,
    dst: &mut [u8],
    dw: usize,
    dh: usize,
    bpp: usize,
) {
    if sw == 0 || sh == 0 || dw == 0 || dh == 0 {
        return;
    }

    // Source coordinate of each destination column, 8-bit fraction
    let map = |d: usize, s_len: usize, d_len: usize| -> (usize, usize, u32) {
        let pos = ((2 * d + 1) * s_len * 256 / (2 * d_len)) as i64 - 128;
        let pos = pos.clamp(0, ((s_len - 1) * 256) as i64) as usize;
        let i0 = pos >> 8;
        let i1 = (i0 + 1).min(s_len - 1);
        (i0, i1, (pos & 0xff) as u32)
    };
    let xs: Vec<_> = (0..dw).map(|x| map(x, sw, dw)).collect();

    for y in 0..dh {
        let (y0, y1, fy) = map(y, sh, dh);
        let row0 = &src[y0 * sw * bpp..(y0 + 1) * sw * bpp];
        let row1 = &src[y1 * sw * bpp..(y1 + 1) * sw * bpp];
        let out = &mut dst[y * dw * bpp..(y + 1) * dw * bpp];
        for (x, &(x0, x1, fx)) in xs.iter().enumerate() {
            for c in 0..bpp {
                let p00 = row0[x0 * bpp + c] as u32;
                let p01 = row0[x1 * bpp + c] as u32;
                let p10 = row1[x0 * bpp + c] as u32;
                let p11 = row1[x1 * bpp + c] as u32;
                let top = p00 * (256 - fx) + p01 * fx;
                let bottom = p10 * (256 - fx) + p11 * fx;
                out[x * bpp + c] = ((top * (256 - fy) + bottom * fy + 32768) >> 16) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AllocatedFrameBuffer;
    use proptest::prelude::*;

    fn buffer(data: Vec<u8>, w: u32, h: u32, fourcc: FourCc) -> AllocatedFrameBuffer {
        AllocatedFrameBuffer::from_vec(data).with_geometry(w, h, fourcc)
    }

    #[test]
    fn test_converted_sizes() {
        assert_eq!(get_converted_size(FourCc::YUV420, 640, 480).unwrap(), 460_800);
        assert_eq!(get_converted_size(FourCc::NV21, 3, 3).unwrap(), 9 + 8);
        assert_eq!(get_converted_size(FourCc::YUYV, 4, 2).unwrap(), 16);
        assert_eq!(get_converted_size(FourCc::BGR32, 2, 2).unwrap(), 16);
        assert!(matches!(
            get_converted_size(FourCc::JPEG, 2, 2),
            Err(Error::InvalidFormat(_))
        ));
        assert!(get_converted_size(FourCc(0), 2, 2).is_err());
    }

    #[test]
    fn test_copy_rejects_mismatched_layout() {
        let src = buffer(vec![0u8; 24], 4, 4, FourCc::YUV420);
        let mut dst = buffer(vec![0u8; 24], 4, 4, FourCc::NV12);
        assert!(copy(&src, &mut dst).is_err());
    }

    #[test]
    fn test_scale_halves_rgb() {
        let src = buffer(vec![200u8; 4 * 4 * 3], 4, 4, FourCc::RGB24);
        let mut dst = AllocatedFrameBuffer::new(2 * 2 * 3).with_geometry(2, 2, FourCc::RGB24);
        scale(&src, &mut dst).unwrap();
        assert_eq!(dst.data(), &[200u8; 12]);
    }

    #[test]
    fn test_scale_requires_same_format() {
        let src = buffer(vec![0u8; 24], 4, 4, FourCc::YUV420);
        let mut dst = AllocatedFrameBuffer::new(64).with_geometry(2, 2, FourCc::RGB32);
        assert!(matches!(scale(&src, &mut dst), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_scale_upsamples_i420() {
        let src = buffer(vec![50u8; 6], 2, 2, FourCc::YUV420);
        let mut dst = AllocatedFrameBuffer::new(24).with_geometry(4, 4, FourCc::YUV420);
        scale(&src, &mut dst).unwrap();
        assert_eq!(dst.data_size(), 24);
        assert!(dst.data().iter().all(|&b| b == 50));
    }

    proptest! {
        #[test]
        fn identical_layout_copy_is_byte_identical(
            w in 1u32..16,
            h in 1u32..16,
            seed in any::<u8>(),
        ) {
            let size = get_converted_size(FourCc::YUV420, w, h).unwrap();
            let data: Vec<u8> = (0..size).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect();
            let src = buffer(data.clone(), w, h, FourCc::YUV420);
            let mut dst = AllocatedFrameBuffer::new(size).with_geometry(w, h, FourCc::YUV420);
            copy(&src, &mut dst).unwrap();
            prop_assert_eq!(dst.data(), &data[..]);
        }

        #[test]
        fn same_size_scale_is_identity(w in 1usize..12, h in 1usize..12) {
            let src: Vec<u8> = (0..w * h * 3).map(|i| (i * 7) as u8).collect();
            let mut dst = vec![0u8; src.len()];
            scale_plane(&src, w, h, &mut dst, w, h, 3);
            prop_assert_eq!(dst, src);
        }
    }
}
