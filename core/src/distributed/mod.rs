//! # Collective Communication
//!
//! Data-parallel training runs one copy of the network per worker. Most layers never notice, but
//! a few need to see *every* worker's activations, for example a loss that compares each sample
//! with the whole global batch. Those layers are built on **collective operations**: calls that
//! every worker in the group makes at the same time and that only complete once all of them have.
//!
//! ## Operations
//!
//! | Operation | Before (per rank) | After (per rank) |
//! |---|---|---|
//! | `all_gather` | local slice `x_r` | `[x_0, x_1, ..., x_{W-1}]` |
//! | `scatter` (root `k`) | root holds `[y_0, ..., y_{W-1}]` | `y_r` |
//! | `all_reduce_sum` | local `z_r` | `sum_r z_r` |
//!
//! ## Module Contents
//!
//! *   [`CollectiveBackend`](backend::CollectiveBackend): the interface layers program against.
//! *   [`CpuBackend`](cpu_backend::CpuBackend): an in-process ring built from `crossbeam`
//!     channels, used for single-machine runs and tests.
//!
//! > [!WARNING]
//! > Collectives are blocking and have no timeout. If one rank skips a call the others wait
//! > forever.

pub mod backend;
pub mod cpu_backend;

pub use backend::{CollectiveBackend, CommElem, CommError, WireDtype};
pub use cpu_backend::{CpuBackend, Packet};

use std::sync::Arc;

/// How the current process participates in data-parallel training.
#[derive(Debug)]
pub enum ParallelMode<B> {
    /// One worker; collectives are skipped.
    Serial,
    /// One rank of a group reachable through `B`.
    Distributed(Arc<B>),
}

impl<B> Clone for ParallelMode<B> {
    fn clone(&self) -> Self {
        match self {
            Self::Serial => Self::Serial,
            Self::Distributed(backend) => Self::Distributed(Arc::clone(backend)),
        }
    }
}

impl<B: CollectiveBackend> ParallelMode<B> {
    /// Number of workers taking part, 1 in serial mode.
    pub fn world_size(&self) -> usize {
        match self {
            Self::Serial => 1,
            Self::Distributed(backend) => backend.world_size(),
        }
    }

    /// The backend, if more than one worker is running.
    ///
    /// A distributed group of size 1 behaves exactly like serial mode.
    pub fn group(&self) -> Option<&B> {
        match self {
            Self::Distributed(backend) if backend.world_size() > 1 => Some(backend),
            _ => None,
        }
    }
}
