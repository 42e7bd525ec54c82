use crate::{KernelElem, KernelError, Result};
use rayon::prelude::*;

/// Placement of a crop window inside a planar `[channels, height, width]` image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub crop_h: usize,
    pub crop_w: usize,
    pub h_off: usize,
    pub w_off: usize,
    /// Read each output row right-to-left.
    pub mirror: bool,
}

impl CropWindow {
    /// A window that covers the whole image.
    pub fn full(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
            crop_h: height,
            crop_w: width,
            h_off: 0,
            w_off: 0,
            mirror: false,
        }
    }

    /// Number of elements written to the output.
    pub fn output_len(&self) -> usize {
        self.channels * self.crop_h * self.crop_w
    }
}

/// Crops, optionally mirrors, mean-subtracts and scales an 8-bit planar image.
///
/// Each output element is `(src - mean[c]) * scale` where `mean` is empty (no subtraction),
/// holds a single value for all channels, or one value per channel.
///
/// # Arguments
///
/// * `src` - Planar image data, `[channels, height, width]`.
/// * `window` - Crop placement. Must lie inside the image.
/// * `mean` - Mean values.
/// * `scale` - Multiplier applied after mean subtraction.
/// * `out` - Destination of length `window.output_len()`.
pub fn cpu_crop_normalize<T: KernelElem>(
    src: &[u8],
    window: &CropWindow,
    mean: &[f32],
    scale: f32,
    out: &mut [T],
) -> Result<()> {
    let w = window;
    let src_len = w.channels * w.height * w.width;
    if src.len() != src_len {
        return Err(KernelError::ShapeMismatch {
            expected: vec![w.channels, w.height, w.width],
            got: vec![src.len()],
        });
    }
    if out.len() != w.output_len() {
        return Err(KernelError::ShapeMismatch {
            expected: vec![w.channels, w.crop_h, w.crop_w],
            got: vec![out.len()],
        });
    }
    if w.h_off + w.crop_h > w.height || w.w_off + w.crop_w > w.width {
        return Err(KernelError::InvalidArgument(format!(
            "crop {}x{} at ({}, {}) exceeds image {}x{}",
            w.crop_h, w.crop_w, w.h_off, w.w_off, w.height, w.width
        )));
    }
    if !(mean.is_empty() || mean.len() == 1 || mean.len() == w.channels) {
        return Err(KernelError::InvalidArgument(format!(
            "expected 0, 1 or {} mean values, got {}",
            w.channels,
            mean.len()
        )));
    }
    if w.output_len() == 0 {
        return Ok(());
    }

    let plane = w.crop_h * w.crop_w;
    out.par_chunks_mut(plane)
        .enumerate()
        .try_for_each(|(c, out_plane)| {
            let mean_c = match mean.len() {
                0 => 0.0,
                1 => mean[0],
                _ => mean[c],
            };
            let src_plane = &src[c * w.height * w.width..(c + 1) * w.height * w.width];
            for (r, out_row) in out_plane.chunks_mut(w.crop_w).enumerate() {
                let row_start = (w.h_off + r) * w.width + w.w_off;
                let src_row = &src_plane[row_start..row_start + w.crop_w];
                for (col, out_elem) in out_row.iter_mut().enumerate() {
                    let pixel = if w.mirror {
                        src_row[w.crop_w - 1 - col]
                    } else {
                        src_row[col]
                    };
                    let value = (f32::from(pixel) - mean_c) * scale;
                    *out_elem = T::from_f32(value).ok_or_else(|| {
                        KernelError::InvalidArgument(format!("{value} is not representable"))
                    })?;
                }
            }
            Ok(())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2 channels, 3x3, channel 1 offset by 100.
    fn planar() -> Vec<u8> {
        let mut data: Vec<u8> = (0..9).collect();
        data.extend((100..109).map(|v| v as u8));
        data
    }

    #[test]
    fn test_full_window_identity() {
        let src = planar();
        let window = CropWindow::full(2, 3, 3);
        let mut out = vec![0.0f32; 18];
        cpu_crop_normalize(&src, &window, &[], 1.0, &mut out).unwrap();
        let expected: Vec<f32> = src.iter().map(|&v| f32::from(v)).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_crop_offset() {
        let src = planar();
        let window = CropWindow {
            crop_h: 2,
            crop_w: 2,
            h_off: 1,
            w_off: 1,
            ..CropWindow::full(2, 3, 3)
        };
        let mut out = vec![0.0f32; 8];
        cpu_crop_normalize(&src, &window, &[], 1.0, &mut out).unwrap();
        // [0 1 2; 3 4 5; 6 7 8] -> [4 5; 7 8]
        assert_eq!(out, vec![4.0, 5.0, 7.0, 8.0, 104.0, 105.0, 107.0, 108.0]);
    }

    #[test]
    fn test_mirror_mean_scale() {
        let src = planar();
        let window = CropWindow {
            crop_h: 1,
            crop_w: 3,
            mirror: true,
            ..CropWindow::full(2, 3, 3)
        };
        let mut out = vec![0.0f64; 6];
        cpu_crop_normalize(&src, &window, &[1.0, 100.0], 0.5, &mut out).unwrap();
        // Row 0 reversed: [2 1 0] - 1 and [102 101 100] - 100, halved.
        assert_eq!(out, vec![0.5, 0.0, -0.5, 1.0, 0.5, 0.0]);
    }

    #[test]
    fn test_window_out_of_bounds() {
        let src = planar();
        let window = CropWindow {
            crop_h: 2,
            crop_w: 2,
            h_off: 2,
            w_off: 0,
            ..CropWindow::full(2, 3, 3)
        };
        let mut out = vec![0.0f32; 8];
        let err = cpu_crop_normalize(&src, &window, &[], 1.0, &mut out);
        assert!(matches!(err, Err(KernelError::InvalidArgument(_))));
    }

    #[test]
    fn test_bad_mean_count() {
        let src = planar();
        let window = CropWindow::full(2, 3, 3);
        let mut out = vec![0.0f32; 18];
        let err = cpu_crop_normalize(&src, &window, &[1.0, 2.0, 3.0], 1.0, &mut out);
        assert!(matches!(err, Err(KernelError::InvalidArgument(_))));
    }

    #[test]
    fn test_source_length_mismatch() {
        let window = CropWindow::full(2, 3, 3);
        let mut out = vec![0.0f32; 18];
        let err = cpu_crop_normalize(&[0u8; 4], &window, &[], 1.0, &mut out);
        assert!(matches!(err, Err(KernelError::ShapeMismatch { .. })));
    }
}
