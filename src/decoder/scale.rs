use super::VideoFrame;
use crate::pipeline::picture_queue::DecodedVideoFrame;

/// Conversion of a decoded frame into a displayable picture
///
/// The destination is a recycled picture-queue slot: implementations should
/// reuse its buffers and only reallocate when the geometry changed.
pub trait FrameRescaler: Send {
    fn rescale(&mut self, src: &VideoFrame, dst: &mut DecodedVideoFrame);
}

/// Copies every plane into a tightly packed buffer, stripping stride padding
///
/// # Performance
/// - Destination buffers are resized, never replaced
/// - Unpadded planes are copied with a single memcpy
#[derive(Debug, Default)]
pub struct PlanePacker {
    reallocations: u64,
}

impl PlanePacker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times a slot had to change geometry
    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }
}

impl FrameRescaler for PlanePacker {
    fn rescale(&mut self, src: &VideoFrame, dst: &mut DecodedVideoFrame) {
        let same_geometry = dst.width == src.width
            && dst.height == src.height
            && dst.planes.len() == src.planes.len()
            && dst
                .planes
                .iter()
                .zip(&src.planes)
                .all(|(d, s)| d.len() == s.row_bytes * s.rows);

        if !same_geometry {
            self.reallocations += 1;
            dst.planes.resize_with(src.planes.len(), Vec::new);
            for (d, s) in dst.planes.iter_mut().zip(&src.planes) {
                d.resize(s.row_bytes * s.rows, 0);
            }
            dst.width = src.width;
            dst.height = src.height;
        }

        dst.strides.clear();
        for (d, s) in dst.planes.iter_mut().zip(&src.planes) {
            extract_plane(d, &s.data, s.stride, s.row_bytes, s.rows);
            dst.strides.push(s.row_bytes);
        }
    }
}

/// Visible `(row_bytes, rows)` of the Y, U and V planes of a yuv420p picture
///
/// Chroma is subsampled by two, rounding up so odd sizes keep their last
/// column and row.
pub fn yuv420p_plane_dims(width: usize, height: usize) -> [(usize, usize); 3] {
    let chroma = (width.div_ceil(2), height.div_ceil(2));
    [(width, height), chroma, chroma]
}

/// Extract a plane from padded source to contiguous destination.
#[inline]
fn extract_plane(dst: &mut [u8], src: &[u8], stride: usize, width: usize, height: usize) {
    let total_src = height * stride;

    // Fast path: No stride padding
    if stride == width && src.len() >= total_src {
        dst.copy_from_slice(&src[..width * height]);
        return;
    }

    for r in 0..height {
        let src_start = r * stride;
        let dst_start = r * width;
        if src_start + width > src.len() || dst_start + width > dst.len() {
            break;
        }
        dst[dst_start..dst_start + width].copy_from_slice(&src[src_start..src_start + width]);
    }
}
