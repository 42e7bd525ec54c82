//! Video segment loading.
//!
//! The pipeline turns a list of labelled frame directories into fixed-shape training batches:
//!
//! 1. [`source`] reads the video list and the per-video shot-boundary files.
//! 2. [`shots`] turns cut positions into usable shot intervals.
//! 3. [`segment`] picks, for one video, which frames each temporal segment starts at.
//! 4. [`decode`] reads those frames from disk into a [`Datum`](decode::Datum).
//! 5. [`transform`] crops, mirrors and normalizes the datum into a batch slot.
//! 6. [`prefetch`] runs steps 3-5 on a background worker and hands finished batches over.
//!
//! [`sampler`] supplies the index permutation used to shuffle the dataset between epochs.

pub mod decode;
pub mod prefetch;
pub mod sampler;
pub mod segment;
pub mod shots;
pub mod source;
pub mod transform;

pub use decode::{Datum, ImageSequenceDecoder, Modality, NamePattern, SegmentDecoder};
pub use prefetch::{Batch, PrefetchTask, ProducerState};
pub use sampler::{Sampler, SequentialSampler, ShuffleSampler};
pub use segment::SegmentSampler;
pub use shots::{Shot, ShotList};
pub use source::VideoRecord;
pub use transform::{DataTransformer, Phase, TransformConfig};

use crate::tensor::TensorError;
use seqgather_kernels::KernelError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading, decoding or batching video data.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("Failed to decode frame {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Frame {path} is {got:?}, expected {expected:?} like the rest of the segment")]
    FrameSize {
        path: PathBuf,
        expected: (u32, u32),
        got: (u32, u32),
    },
    #[error("Video list has {videos} entries but shot list has {shot_lists}")]
    SourceMismatch { videos: usize, shot_lists: usize },
    #[error("Video list is empty")]
    EmptyDataset,
    #[error("No shot of {path} is at least {num_frames} frames long")]
    NoShots { path: PathBuf, num_frames: usize },
    #[error("Segment request for {path} selects no frames")]
    EmptySegment { path: PathBuf },
    #[error("Invalid name pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("Crop size {crop} exceeds frame size {height}x{width}")]
    CropTooLarge {
        crop: usize,
        height: usize,
        width: usize,
    },
    #[error("Failed to spawn prefetch worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Prefetch worker is gone")]
    WorkerDisconnected,
    #[error("Prefetch worker panicked")]
    WorkerPanicked,
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

pub type Result<T> = std::result::Result<T, DataError>;
