//! I420 intermediate image and the colorspace/layout transforms around it.
//!
//! Colorspace math is BT.601 limited range with 8-bit fixed point.

use crate::capture::PixelFormat;
use crate::error::{Error, Result};

/// Planar 4:2:0 image, chroma planes rounded up for odd sizes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I420Image {
    pub width: usize,
    pub height: usize,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
}

pub(crate) fn chroma_dims(width: usize, height: usize) -> (usize, usize) {
    (width.div_ceil(2), height.div_ceil(2))
}

#[inline]
fn clamp(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[inline]
pub(crate) fn rgb_to_y(r: i32, g: i32, b: i32) -> u8 {
    clamp(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16)
}

#[inline]
pub(crate) fn rgb_to_u(r: i32, g: i32, b: i32) -> u8 {
    clamp(((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128)
}

#[inline]
pub(crate) fn rgb_to_v(r: i32, g: i32, b: i32) -> u8 {
    clamp(((112 * r - 94 * g - 18 * b + 128) >> 8) + 128)
}

#[inline]
pub(crate) fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}

/// Byte offsets of R, G, B inside one packed pixel
fn rgb_layout(format: PixelFormat) -> Option<(usize, [usize; 3])> {
    match format {
        PixelFormat::Rgb24 => Some((3, [0, 1, 2])),
        PixelFormat::Rgb32 => Some((4, [2, 1, 0])),
        PixelFormat::Bgr32 => Some((4, [0, 1, 2])),
        _ => None,
    }
}

fn short_input(format: PixelFormat, need: usize, have: usize) -> Error {
    Error::invalid_argument(format!(
        "{:?} source needs {} bytes, got {}",
        format, need, have
    ))
}

impl I420Image {
    pub fn new(width: usize, height: usize) -> Self {
        let (cw, ch) = chroma_dims(width, height);
        Self {
            width,
            height,
            y: vec![16; width * height],
            u: vec![128; cw * ch],
            v: vec![128; cw * ch],
        }
    }

    /// Decode an uncompressed frame of `format` into I420
    pub fn from_raw(format: PixelFormat, data: &[u8], width: usize, height: usize) -> Result<Self> {
        let (cw, ch) = chroma_dims(width, height);
        let luma = width * height;
        let chroma = cw * ch;
        let mut img = Self::new(width, height);

        match format {
            PixelFormat::Yuv420 | PixelFormat::Yvu420 => {
                let need = luma + 2 * chroma;
                if data.len() < need {
                    return Err(short_input(format, need, data.len()));
                }
                let (first, second) = (&data[luma..luma + chroma], &data[luma + chroma..need]);
                img.y.copy_from_slice(&data[..luma]);
                if format == PixelFormat::Yuv420 {
                    img.u.copy_from_slice(first);
                    img.v.copy_from_slice(second);
                } else {
                    img.v.copy_from_slice(first);
                    img.u.copy_from_slice(second);
                }
            }
            PixelFormat::Nv12 | PixelFormat::Nv21 => {
                let need = luma + 2 * chroma;
                if data.len() < need {
                    return Err(short_input(format, need, data.len()));
                }
                img.y.copy_from_slice(&data[..luma]);
                let (u_off, v_off) = if format == PixelFormat::Nv12 { (0, 1) } else { (1, 0) };
                for (i, pair) in data[luma..need].chunks_exact(2).enumerate() {
                    img.u[i] = pair[u_off];
                    img.v[i] = pair[v_off];
                }
            }
            PixelFormat::Yuyv => {
                let row = width.div_ceil(2) * 4;
                let need = row * height;
                if data.len() < need {
                    return Err(short_input(format, need, data.len()));
                }
                for y in 0..height {
                    let line = &data[y * row..(y + 1) * row];
                    for x in 0..width {
                        img.y[y * width + x] = line[(x / 2) * 4 + (x % 2) * 2];
                    }
                }
                // Average chroma of each row pair
                for cy in 0..ch {
                    let r0 = &data[(cy * 2) * row..(cy * 2 + 1) * row];
                    let r1_idx = (cy * 2 + 1).min(height - 1);
                    let r1 = &data[r1_idx * row..(r1_idx + 1) * row];
                    for cx in 0..cw {
                        img.u[cy * cw + cx] = ((r0[cx * 4 + 1] as u16 + r1[cx * 4 + 1] as u16 + 1) / 2) as u8;
                        img.v[cy * cw + cx] = ((r0[cx * 4 + 3] as u16 + r1[cx * 4 + 3] as u16 + 1) / 2) as u8;
                    }
                }
            }
            other => {
                let (bpp, [ri, gi, bi]) = rgb_layout(other)
                    .ok_or_else(|| Error::unsupported(format!("cannot decode {:?}", other)))?;
                let need = luma * bpp;
                if data.len() < need {
                    return Err(short_input(format, need, data.len()));
                }
                let px = |x: usize, y: usize| {
                    let p = &data[(y * width + x) * bpp..];
                    (p[ri] as i32, p[gi] as i32, p[bi] as i32)
                };
                for y in 0..height {
                    for x in 0..width {
                        let (r, g, b) = px(x, y);
                        img.y[y * width + x] = rgb_to_y(r, g, b);
                    }
                }
                for cy in 0..ch {
                    for cx in 0..cw {
                        let (mut r, mut g, mut b, mut n) = (0, 0, 0, 0);
                        for y in (cy * 2)..(cy * 2 + 2).min(height) {
                            for x in (cx * 2)..(cx * 2 + 2).min(width) {
                                let (pr, pg, pb) = px(x, y);
                                r += pr;
                                g += pg;
                                b += pb;
                                n += 1;
                            }
                        }
                        let (r, g, b) = (r / n, g / n, b / n);
                        img.u[cy * cw + cx] = rgb_to_u(r, g, b);
                        img.v[cy * cw + cx] = rgb_to_v(r, g, b);
                    }
                }
            }
        }
        Ok(img)
    }

    /// Build from packed RGB24 (decoded JPEG)
    pub fn from_rgb24(rgb: &[u8], width: usize, height: usize) -> Result<Self> {
        Self::from_raw(PixelFormat::Rgb24, rgb, width, height)
    }

    /// Resample to a new size
    pub fn scaled(&self, width: usize, height: usize) -> Self {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let (scw, sch) = chroma_dims(self.width, self.height);
        let (dcw, dch) = chroma_dims(width, height);
        let mut out = Self::new(width, height);
        super::scale_plane(&self.y, self.width, self.height, &mut out.y, width, height, 1);
        super::scale_plane(&self.u, scw, sch, &mut out.u, dcw, dch, 1);
        super::scale_plane(&self.v, scw, sch, &mut out.v, dcw, dch, 1);
        out
    }

    /// Packed RGB24 rendition
    pub fn to_rgb24(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.width * self.height * 3];
        self.write_rgb(&mut out, 3, [0, 1, 2], None);
        out
    }

    fn write_rgb(&self, out: &mut [u8], bpp: usize, idx: [usize; 3], alpha: Option<usize>) {
        let (cw, _) = chroma_dims(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                let c = (y / 2) * cw + x / 2;
                let rgb = yuv_to_rgb(self.y[y * self.width + x], self.u[c], self.v[c]);
                let p = &mut out[(y * self.width + x) * bpp..];
                p[idx[0]] = rgb[0];
                p[idx[1]] = rgb[1];
                p[idx[2]] = rgb[2];
                if let Some(a) = alpha {
                    p[a] = 255;
                }
            }
        }
    }

    /// Encode into an uncompressed layout; `out` must hold the converted size.
    /// Returns the number of bytes written.
    pub fn write_raw(&self, format: PixelFormat, out: &mut [u8]) -> Result<usize> {
        let (cw, ch) = chroma_dims(self.width, self.height);
        let luma = self.width * self.height;
        let chroma = cw * ch;
        let need = super::converted_size(format, self.width as u32, self.height as u32)?;
        if out.len() < need {
            return Err(Error::BufferOverflow {
                requested: need,
                capacity: out.len(),
            });
        }

        match format {
            PixelFormat::Yuv420 | PixelFormat::Yvu420 => {
                out[..luma].copy_from_slice(&self.y);
                let (first, second) = if format == PixelFormat::Yuv420 {
                    (&self.u, &self.v)
                } else {
                    (&self.v, &self.u)
                };
                out[luma..luma + chroma].copy_from_slice(first);
                out[luma + chroma..need].copy_from_slice(second);
            }
            PixelFormat::Nv12 | PixelFormat::Nv21 => {
                out[..luma].copy_from_slice(&self.y);
                let (u_off, v_off) = if format == PixelFormat::Nv12 { (0, 1) } else { (1, 0) };
                for (i, pair) in out[luma..need].chunks_exact_mut(2).enumerate() {
                    pair[u_off] = self.u[i];
                    pair[v_off] = self.v[i];
                }
            }
            PixelFormat::Yuyv => {
                let row = cw * 4;
                for y in 0..self.height {
                    for cx in 0..cw {
                        let x0 = cx * 2;
                        let x1 = (x0 + 1).min(self.width - 1);
                        let c = (y / 2) * cw + cx;
                        let p = &mut out[y * row + cx * 4..];
                        p[0] = self.y[y * self.width + x0];
                        p[1] = self.u[c];
                        p[2] = self.y[y * self.width + x1];
                        p[3] = self.v[c];
                    }
                }
            }
            other => {
                let (bpp, idx) = rgb_layout(other)
                    .ok_or_else(|| Error::unsupported(format!("cannot encode {:?}", other)))?;
                let alpha = (bpp == 4).then_some(3);
                self.write_rgb(out, bpp, idx, alpha);
            }
        }
        Ok(need)
    }
}

/// Rotate packed RGB24 clockwise by 0, 90, 180 or 270 degrees
pub fn rotate_rgb24(rgb: &[u8], width: usize, height: usize, degrees: i32) -> (Vec<u8>, usize, usize) {
    let degrees = degrees.rem_euclid(360);
    if degrees == 0 {
        return (rgb.to_vec(), width, height);
    }
    let (ow, oh) = if degrees == 180 { (width, height) } else { (height, width) };
    let mut out = vec![0u8; rgb.len()];
    for y in 0..height {
        for x in 0..width {
            let (nx, ny) = match degrees {
                90 => (height - 1 - y, x),
                180 => (width - 1 - x, height - 1 - y),
                _ => (y, width - 1 - x),
            };
            let s = (y * width + x) * 3;
            let d = (ny * ow + nx) * 3;
            out[d..d + 3].copy_from_slice(&rgb[s..s + 3]);
        }
    }
    (out, ow, oh)
}
