//! Shot intervals.
//!
//! A shot file lists the frames at which the camera cuts. Consecutive cuts bound one shot.
//! Frames are numbered from 1, and the last frame of a shot depends on the modality: an RGB shot
//! ends on the frame before the next cut, while optical flow is computed from frame pairs, so a
//! flow shot must stop one frame earlier to avoid a field that straddles the cut.

use super::decode::Modality;

/// An inclusive, 1-based frame interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shot {
    pub start: usize,
    pub end: usize,
}

impl Shot {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Number of frames in the interval, 0 if `end < start`.
    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The usable shots of one video, in temporal order.
pub type ShotList = Vec<Shot>;

/// Converts cut positions into shots of at least `num_frames` frames.
///
/// Leading zero cuts are ignored. Without any cut the whole video forms one candidate shot.
/// Shots shorter than `num_frames` are dropped.
///
/// # Examples
///
/// ```rust
/// use seqgather::data::{Modality, Shot};
/// use seqgather::data::shots::shots_from_cuts;
///
/// let shots = shots_from_cuts(&[5, 12, 20, 30], 40, Modality::Rgb, 5);
/// assert_eq!(shots, vec![Shot::new(5, 11), Shot::new(12, 19), Shot::new(20, 29), Shot::new(30, 40)]);
/// ```
pub fn shots_from_cuts(
    cuts: &[usize],
    video_length: usize,
    modality: Modality,
    num_frames: usize,
) -> ShotList {
    let mut shots = ShotList::new();
    let mut keep = |shot: Shot| {
        if shot.len() >= num_frames {
            shots.push(shot);
        }
    };

    let mut cuts = cuts.iter().copied().skip_while(|&c| c == 0);
    let mut start = cuts.next().unwrap_or(1);
    for cut in cuts {
        keep(Shot::new(start, cut.saturating_sub(modality.cut_gap())));
        start = cut;
    }
    keep(Shot::new(start, modality.last_frame(video_length)));
    shots
}
