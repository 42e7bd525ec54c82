//! Turning decoded `u8` clips into network input.
//!
//! The transformer crops every channel plane with the same window, optionally mirrors it,
//! subtracts the per-channel mean and scales. In [`Phase::Train`] the crop offset and the
//! mirror flag are random; in [`Phase::Test`] the crop is centered and never mirrored, even with
//! `mirror` set.

use super::decode::Datum;
use super::{DataError, Result};
use crate::tensor::TensorElem;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use seqgather_kernels::{CropWindow, cpu_crop_normalize};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Train,
    Test,
}

fn default_scale() -> f32 {
    1.0
}

/// Transformation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Side of the square crop; 0 keeps the full frame.
    pub crop_size: usize,
    pub mirror: bool,
    #[serde(default = "default_scale")]
    pub scale: f32,
    /// Empty, a single value for every channel, or one value per channel.
    pub mean_values: Vec<f32>,
    pub phase: Phase,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            crop_size: 0,
            mirror: false,
            scale: default_scale(),
            mean_values: Vec::new(),
            phase: Phase::Train,
        }
    }
}

/// Applies a [`TransformConfig`] with its own random stream.
#[derive(Debug, Clone)]
pub struct DataTransformer {
    config: TransformConfig,
    rng: StdRng,
}

impl DataTransformer {
    pub fn new(config: TransformConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Self { config, rng }
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    /// Output `[C, H, W]` for an input of `[channels, height, width]`.
    ///
    /// # Errors
    ///
    /// `CropTooLarge` if the crop does not fit the frame.
    pub fn infer_shape(&self, [channels, height, width]: [usize; 3]) -> Result<[usize; 3]> {
        let crop = self.config.crop_size;
        if crop == 0 {
            return Ok([channels, height, width]);
        }
        if crop > height || crop > width {
            return Err(DataError::CropTooLarge {
                crop,
                height,
                width,
            });
        }
        Ok([channels, crop, crop])
    }

    /// Transforms `datum` into `out`, which must hold exactly one output item.
    pub fn transform<T: TensorElem>(&mut self, datum: &Datum, out: &mut [T]) -> Result<()> {
        let [channels, height, width] = *datum.data.shape();
        let [_, crop_h, crop_w] = self.infer_shape([channels, height, width])?;

        let train = self.config.phase == Phase::Train;
        let (h_off, w_off) = if crop_h == height && crop_w == width {
            (0, 0)
        } else if train {
            (
                self.rng.random_range(0..=height - crop_h),
                self.rng.random_range(0..=width - crop_w),
            )
        } else {
            ((height - crop_h) / 2, (width - crop_w) / 2)
        };
        let mirror = self.config.mirror && train && self.rng.random_bool(0.5);

        let window = CropWindow {
            channels,
            height,
            width,
            crop_h,
            crop_w,
            h_off,
            w_off,
            mirror,
        };
        cpu_crop_normalize(
            datum.data.data(),
            &window,
            &self.config.mean_values,
            self.config.scale,
            out,
        )?;
        Ok(())
    }
}
