use crate::tensor::TensorElem;
use bytemuck::Pod;
use num_traits::Float;
use thiserror::Error;

/// Errors raised by collective operations.
///
/// None of these are retried; a failed collective leaves the group out of step.
#[derive(Error, Debug)]
pub enum CommError {
    #[error("Rank {rank} lost its connection to the ring")]
    Disconnected { rank: usize },
    #[error("Wire dtype mismatch: expected {expected:?}, got {got:?}")]
    DtypeMismatch { expected: WireDtype, got: WireDtype },
    #[error("Unsupported element width: {0} bytes")]
    UnsupportedWidth(usize),
    #[error("Buffer length mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },
    #[error("Root rank {root} is out of range for world size {world_size}")]
    InvalidRoot { root: usize, world_size: usize },
    #[error("Unexpected packet: expected index {expected}, got {got}")]
    UnexpectedPacket { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, CommError>;

/// Floating-point formats that can travel between ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireDtype {
    F32,
    F64,
}

impl WireDtype {
    /// Picks the wire format for an element of `bytes` bytes.
    pub fn from_byte_width(bytes: usize) -> Option<Self> {
        match bytes {
            4 => Some(Self::F32),
            8 => Some(Self::F64),
            _ => None,
        }
    }

    pub fn byte_width(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// The wire format for `T`.
    pub fn of<T: CommElem>() -> Result<Self> {
        let width = std::mem::size_of::<T>();
        Self::from_byte_width(width).ok_or(CommError::UnsupportedWidth(width))
    }
}

/// Elements that collectives can move: `f32` and `f64`.
pub trait CommElem: TensorElem + Float + Pod {}

impl<T> CommElem for T where T: TensorElem + Float + Pod {}

/// Abstraction for a distributed communication backend.
///
/// Every method is a collective: all ranks must call it, in the same order, with buffers of
/// matching length.
pub trait CollectiveBackend: Send + Sync {
    /// Returns the rank of the current process/thread.
    fn rank(&self) -> usize;

    /// Returns the total number of processes/threads.
    fn world_size(&self) -> usize;

    /// Sums `data` element-wise across all ranks, leaving the result on every rank.
    fn all_reduce_sum<T: CommElem>(&self, data: &mut [T]) -> Result<()>;

    /// Concatenates every rank's `send` into `recv`, in rank order.
    ///
    /// `recv.len()` must be `send.len() * world_size()`.
    fn all_gather<T: CommElem>(&self, send: &[T], recv: &mut [T]) -> Result<()>;

    /// Splits `root`'s `send` into `world_size()` equal slices and delivers slice `r` to rank `r`.
    ///
    /// `send` is only read on the root, where its length must be `recv.len() * world_size()`.
    fn scatter<T: CommElem>(&self, send: &[T], recv: &mut [T], root: usize) -> Result<()>;
}
