//! Temporal segment sampling (TSN-style).
//!
//! For one video the sampler picks `num_shots` shots and splits each of them into
//! `num_segments` equal parts. Inside every part it draws the first frame of a clip of
//! `num_frames` consecutive frames.
//!
//! ```text
//! shot:      |---------------------- len ----------------------|
//! segments:  |---- avg ----|---- avg ----|---- avg ----|
//! clip k:      [start .. start + num_frames)  jitter in [0, avg - num_frames]
//! ```
//!
//! When a segment is shorter than a clip (`avg < num_frames`) every clip starts at the shot's
//! first frame.

use super::shots::Shot;
use super::{DataError, Result};
use rand::Rng;
use rand::seq::SliceRandom;
use std::path::Path;

/// Per-item segment layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSampler {
    pub num_shots: usize,
    pub num_segments: usize,
    pub num_frames: usize,
}

impl SegmentSampler {
    pub fn new(num_shots: usize, num_segments: usize, num_frames: usize) -> Self {
        Self {
            num_shots,
            num_segments,
            num_frames,
        }
    }

    /// Number of offsets [`sample`](Self::sample) returns.
    pub fn offsets_per_item(&self) -> usize {
        self.num_shots * self.num_segments
    }

    /// Draws `num_shots * num_segments` 1-based clip start frames from `shots`.
    ///
    /// Slot `i` uses shot `i` while there are enough shots and a uniformly random shot
    /// otherwise. With `shuffle_shots`, the shot order is shuffled first.
    ///
    /// # Errors
    ///
    /// `NoShots` if `shots` is empty; `video` only names the video in that error.
    pub fn sample<R: Rng>(
        &self,
        video: &Path,
        shots: &[Shot],
        rng: &mut R,
        shuffle_shots: bool,
    ) -> Result<Vec<usize>> {
        if shots.is_empty() {
            return Err(DataError::NoShots {
                path: video.to_path_buf(),
                num_frames: self.num_frames,
            });
        }

        let mut order: Vec<usize> = (0..shots.len()).collect();
        if shuffle_shots {
            order.shuffle(rng);
        }

        let mut offsets = Vec::with_capacity(self.offsets_per_item());
        for slot in 0..self.num_shots {
            let shot = if slot < order.len() {
                shots[order[slot]]
            } else {
                shots[order[rng.random_range(0..order.len())]]
            };
            self.sample_shot(shot, rng, &mut offsets);
        }
        Ok(offsets)
    }

    fn sample_shot<R: Rng>(&self, shot: Shot, rng: &mut R, offsets: &mut Vec<usize>) {
        let avg = shot.len() / self.num_segments.max(1);
        for seg in 0..self.num_segments {
            if avg < self.num_frames {
                offsets.push(shot.start);
            } else {
                let jitter = rng.random_range(0..=avg - self.num_frames);
                offsets.push(shot.start + seg * avg + jitter);
            }
        }
    }
}
