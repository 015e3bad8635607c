use jpeg_decoder::{Decoder, PixelFormat as JpegPixelFormat};

use crate::error::{Error, Result};

/// Decoded MJPEG frame, packed RGB24
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// Decode one MJPEG/JPEG frame to packed RGB24
pub fn decode_mjpeg(data: &[u8]) -> Result<DecodedFrame> {
    let mut decoder = Decoder::new(data);
    let pixels = decoder.decode()?;
    let info = decoder
        .info()
        .ok_or_else(|| Error::Jpeg("missing frame header".into()))?;

    let rgb = match info.pixel_format {
        JpegPixelFormat::RGB24 => pixels,
        JpegPixelFormat::L8 => pixels.iter().flat_map(|&l| [l, l, l]).collect(),
        JpegPixelFormat::L16 => pixels
            .chunks_exact(2)
            .flat_map(|c| {
                let l = c[0];
                [l, l, l]
            })
            .collect(),
        JpegPixelFormat::CMYK32 => pixels
            .chunks_exact(4)
            .flat_map(|c| {
                let k = 255 - c[3] as u32;
                let f = |v: u8| ((255 - v as u32) * k / 255) as u8;
                [f(c[0]), f(c[1]), f(c[2])]
            })
            .collect(),
    };

    Ok(DecodedFrame {
        width: info.width as u32,
        height: info.height as u32,
        rgb,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(decode_mjpeg(&[0u8; 16]), Err(Error::Jpeg(_))));
    }
}
