//! Pixel conversion from negotiated V4L2 formats to packed BGR.

use v4l::FourCC;

/// Negotiated pixel format for a capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// Packed 24-bit BGR, passed through.
    Bgr3,
    /// Packed 24-bit RGB.
    Rgb3,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"GREY" => Some(PixelFormat::Grey),
            b"BGR3" => Some(PixelFormat::Bgr3),
            b"RGB3" => Some(PixelFormat::Rgb3),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Grey => 1,
            PixelFormat::Yuyv => 2,
            PixelFormat::Bgr3 | PixelFormat::Rgb3 => 3,
        }
    }

    /// Convert one raw frame to BGR, appending to `out`.
    pub fn to_bgr(
        self,
        raw: &[u8],
        width: u32,
        height: u32,
        out: &mut Vec<u8>,
    ) -> Result<(), FrameError> {
        let pixels = (width * height) as usize;
        let expected = pixels * self.bytes_per_pixel();
        if raw.len() < expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: raw.len(),
            });
        }
        let raw = &raw[..expected];
        out.reserve(pixels * 3);

        match self {
            PixelFormat::Bgr3 => out.extend_from_slice(raw),
            PixelFormat::Rgb3 => {
                for px in raw.chunks_exact(3) {
                    out.extend_from_slice(&[px[2], px[1], px[0]]);
                }
            }
            PixelFormat::Grey => {
                for &y in raw {
                    out.extend_from_slice(&[y, y, y]);
                }
            }
            PixelFormat::Yuyv => yuyv_to_bgr(raw, out),
        }
        Ok(())
    }
}

/// Convert packed YUYV (4:2:2) to BGR using integer BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
fn yuyv_to_bgr(yuyv: &[u8], out: &mut Vec<u8>) {
    for quad in yuyv.chunks_exact(4) {
        let u = quad[1] as i32 - 128;
        let v = quad[3] as i32 - 128;
        for y in [quad[0], quad[2]] {
            let c = (y as i32 - 16).max(0) * 298;
            let b = (c + 516 * u + 128) >> 8;
            let g = (c - 100 * u - 208 * v + 128) >> 8;
            let r = (c + 409 * v + 128) >> 8;
            out.extend_from_slice(&[clamp(b), clamp(g), clamp(r)]);
        }
    }
}

fn clamp(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_mapping() {
        assert_eq!(
            PixelFormat::from_fourcc(FourCC::new(b"YUYV")),
            Some(PixelFormat::Yuyv)
        );
        assert_eq!(
            PixelFormat::from_fourcc(FourCC::new(b"GREY")),
            Some(PixelFormat::Grey)
        );
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_yuyv_white_and_black() {
        // 2x1 image: Y0 = white, Y1 = black, neutral chroma
        let yuyv = vec![235, 128, 16, 128];
        let mut out = Vec::new();
        PixelFormat::Yuyv.to_bgr(&yuyv, 2, 1, &mut out).unwrap();
        assert_eq!(out, vec![255, 255, 255, 0, 0, 0]);
    }

    #[test]
    fn test_yuyv_red_dominant() {
        // High V pushes red up and blue down.
        let yuyv = vec![128, 128, 128, 240];
        let mut out = Vec::new();
        PixelFormat::Yuyv.to_bgr(&yuyv, 2, 1, &mut out).unwrap();
        let (b, r) = (out[0], out[2]);
        assert!(r > b, "expected red > blue, got r={r} b={b}");
    }

    #[test]
    fn test_rgb_swapped() {
        let rgb = vec![1, 2, 3, 4, 5, 6];
        let mut out = Vec::new();
        PixelFormat::Rgb3.to_bgr(&rgb, 2, 1, &mut out).unwrap();
        assert_eq!(out, vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn test_grey_expanded() {
        let mut out = Vec::new();
        PixelFormat::Grey.to_bgr(&[10, 20], 2, 1, &mut out).unwrap();
        assert_eq!(out, vec![10, 10, 10, 20, 20, 20]);
    }

    #[test]
    fn test_padding_ignored() {
        // Drivers may hand back a buffer larger than one frame.
        let mut raw = vec![9u8; 6];
        raw.extend_from_slice(&[0xFF; 10]);
        let mut out = Vec::new();
        PixelFormat::Bgr3.to_bgr(&raw, 2, 1, &mut out).unwrap();
        assert_eq!(out, vec![9; 6]);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let mut out = Vec::new();
        let err = PixelFormat::Yuyv.to_bgr(&[100, 128], 2, 1, &mut out).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength { expected: 4, actual: 2 }));
        assert!(out.is_empty());
    }
}
