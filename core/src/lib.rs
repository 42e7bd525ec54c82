//! # seqgather
//!
//! `seqgather` provides two building blocks for data-parallel training on video:
//!
//! - a **gather layer** that concatenates every worker's activations along the batch dimension
//!   and scatters the gradient back, rescaled so that a later gradient average stays correct;
//! - a **sequence-data layer** that samples temporal segments from shot-segmented frame
//!   directories and prefetches transformed batches on a background thread.
//!
//! ## Modules
//!
//! - [`mod@tensor`]: Row-major tensors and shareable value/gradient blobs.
//! - [`distributed`]: Collective backends (in-process `crossbeam` ring).
//! - [`data`]: Dataset files, shot intervals, segment sampling, decoding, transforms, prefetching.
//! - [`layers`]: The [`Layer`](layers::Layer) interface, both layers and the config-driven factory.
//! - [`config`]: TOML network descriptions.
//!
//! ## Example
//!
//! ```rust
//! use seqgather::distributed::{CpuBackend, ParallelMode};
//! use seqgather::layers::{GatherLayer, Layer};
//! use seqgather::tensor::Blob;
//!
//! // A single worker: the gather layer is a zero-copy identity.
//! let mut layer = GatherLayer::<CpuBackend>::new(ParallelMode::Serial);
//! let bottom = vec![Blob::<f32>::from_vec(vec![1.0, 2.0], &[2, 1]).unwrap()];
//! let mut top = vec![Blob::default()];
//! layer.setup(&bottom, &mut top).unwrap();
//! layer.forward(&bottom, &mut top).unwrap();
//! assert!(top[0].shares_data_with(&bottom[0]));
//! ```

pub mod config;
pub mod data;
pub mod distributed;
pub mod layers;
pub mod tensor;

pub use config::{ConfigError, LayerConfig, NetConfig, SequenceDataConfig};
pub use distributed::{CollectiveBackend, CommError, CpuBackend, ParallelMode};
pub use layers::{GatherLayer, Layer, LayerError, LayerKind, SequenceDataLayer, build_layer};
pub use tensor::{Blob, Tensor, TensorElem, TensorError};
