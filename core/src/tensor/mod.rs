//! Dense tensors and shareable blobs.
//!
//! # Two containers, two jobs
//!
//! - [`Tensor`] is a fixed-rank, row-major array backed by a `Vec<T>`. The data pipeline uses it
//!   for decoded clips (`Tensor<u8, 3>`, `[C, H, W]`) and for batch buffers (`Tensor<T, 4>`,
//!   `[N, C, H, W]`). Batch buffers are handed between threads by value, so a plain owned `Vec`
//!   is the right storage.
//! - [`Blob`] is the dynamically shaped value/gradient pair that layers read and write. Its
//!   buffers are reference counted so that one blob can *alias* another (the gather layer's
//!   single-process fast path).
//!
//! ## Example
//!
//! ```rust
//! use seqgather::tensor::Tensor;
//!
//! let batch = Tensor::<f32, 4>::zeros([2, 3, 4, 4]);
//! assert_eq!(batch.shape(), &[2, 3, 4, 4]);
//! assert_eq!(batch.item(1).unwrap().len(), 3 * 4 * 4);
//! ```
//!
//! > [!TIP]
//! > **Expert Note: Strides and Memory Layout**
//! > Tensors are **Row-Major** (C-style): the last dimension changes the fastest. A batch item
//! > `n` of an `[N, C, H, W]` tensor is therefore the contiguous range
//! > `n * strides[0] .. (n + 1) * strides[0]`, which is what [`Tensor::item_mut`] hands out.

use num_traits::{FromPrimitive, Num, NumAssign, ToPrimitive};
use std::fmt::Debug;
use thiserror::Error;

pub mod blob;
pub mod ops;

pub use blob::Blob;

/// Error type for Tensor operations.
#[derive(Error, Debug)]
pub enum TensorError {
    /// The shape of the data does not match the expected shape.
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// An index is out of bounds for the given shape.
    #[error("Index out of bounds: index {index:?} for shape {shape:?}")]
    IndexOutOfBounds {
        index: Vec<usize>,
        shape: Vec<usize>,
    },
    /// The requested operation is not supported (e.g., for a specific rank or type).
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;

/// Trait bound for elements that can be stored in a Tensor.
///
/// # Requirements
/// - `Copy + Clone`: Essential for efficient storage in contiguous memory (e.g., `Vec<T>`) and fast element access.
/// - `Num + ...`: Provides necessary numeric operations for tensor math.
/// - `Send + Sync`: Tensors cross the prefetch worker boundary and are processed with `rayon`.
pub trait TensorElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> TensorElem for T where
    T: Num
        + NumAssign
        + Copy
        + Clone
        + Debug
        + Send
        + Sync
        + FromPrimitive
        + ToPrimitive
        + PartialOrd
{
}

/// An N-dimensional array stored contiguously in row-major order.
///
/// # Generics
///
/// - `T`: The element type (must implement `TensorElem`).
/// - `RANK`: The number of dimensions (const generic).
#[derive(Clone)]
pub struct Tensor<T, const RANK: usize>
where
    T: TensorElem,
{
    shape: [usize; RANK],
    strides: [usize; RANK],
    data: Vec<T>,
}

impl<T, const RANK: usize> Tensor<T, RANK>
where
    T: TensorElem,
{
    /// Creates a new Tensor from a vector of data and a shape.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the length of `data` does not match the product of `shape`.
    pub fn new(data: Vec<T>, shape: [usize; RANK]) -> Result<Self> {
        let size: usize = shape.iter().product();
        if data.len() != size {
            return Err(TensorError::ShapeMismatch {
                expected: vec![size],
                got: vec![data.len()],
            });
        }

        let strides = compute_strides(&shape);
        Ok(Self {
            shape,
            strides,
            data,
        })
    }

    /// Creates a new Tensor filled with zeros.
    pub fn zeros(shape: [usize; RANK]) -> Self {
        let size: usize = shape.iter().product();
        let strides = compute_strides(&shape);
        Self {
            shape,
            strides,
            data: vec![T::zero(); size],
        }
    }

    /// Returns the shape of the tensor.
    pub const fn shape(&self) -> &[usize; RANK] {
        &self.shape
    }

    /// Returns the strides of the tensor.
    pub const fn strides(&self) -> &[usize; RANK] {
        &self.strides
    }

    /// Returns a reference to the underlying data as a slice.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Returns a mutable reference to the underlying data as a slice.
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// The backing vector, for storage swaps that keep the element count intact.
    pub(crate) fn storage_mut(&mut self) -> &mut Vec<T> {
        &mut self.data
    }
}

/// Computes the strides for a given shape.
///
/// Strides represent the number of elements to skip in memory to move to the next element
/// along a specific dimension. This implementation assumes a row-major (C-style) memory layout.
pub(crate) const fn compute_strides<const RANK: usize>(shape: &[usize; RANK]) -> [usize; RANK] {
    let mut strides = [0; RANK];
    let mut stride = 1;
    let mut i = RANK;
    while i > 0 {
        i -= 1;
        strides[i] = stride;
        stride *= shape[i];
    }
    strides
}

impl<T, const RANK: usize> Debug for Tensor<T, RANK>
where
    T: TensorElem,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("data_len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_creation() {
        // Positive case
        let data = vec![1.0, 2.0, 3.0, 4.0];
        let tensor = Tensor::<f32, 2>::new(data.clone(), [2, 2]).unwrap();
        assert_eq!(tensor.shape(), &[2, 2]);
        assert_eq!(tensor.data(), &data[..]);

        // Negative case: Size mismatch
        let err = Tensor::<f32, 2>::new(vec![1.0, 2.0, 3.0], [2, 2]);
        assert!(matches!(err, Err(TensorError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_zeros_u8() {
        let clip = Tensor::<u8, 3>::zeros([6, 2, 2]);
        assert_eq!(clip.data().len(), 24);
        assert!(clip.data().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_compute_strides() {
        let shape = [2, 3, 4];
        let strides = compute_strides(&shape);
        // Stride for dim 2 (last) is 1
        // Stride for dim 1 is 4
        // Stride for dim 0 is 3 * 4 = 12
        assert_eq!(strides, [12, 4, 1]);
    }

    #[test]
    fn test_tensor_error_display() {
        let err = TensorError::ShapeMismatch {
            expected: vec![2, 2],
            got: vec![4],
        };
        assert_eq!(
            format!("{}", err),
            "Shape mismatch: expected [2, 2], got [4]"
        );

        let err = TensorError::IndexOutOfBounds {
            index: vec![3],
            shape: vec![2],
        };
        assert_eq!(
            format!("{}", err),
            "Index out of bounds: index [3] for shape [2]"
        );
    }

    #[test]
    fn test_tensor_debug() {
        let t = Tensor::<f32, 1>::new(vec![1.0], [1]).unwrap();
        let debug_str = format!("{:?}", t);
        assert!(debug_str.contains("Tensor"));
        assert!(debug_str.contains("shape"));
    }
}
