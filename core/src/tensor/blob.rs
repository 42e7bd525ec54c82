//! Shape-carrying value/gradient buffers that layers exchange.
//!
//! A [`Blob`] owns two buffers of equal length: `data` (forward values) and `diff` (gradients).
//! Both are reference counted, so [`Blob::share_data`] and [`Blob::share_diff`] make one blob
//! read and write another blob's storage without copying. The gather layer relies on this to be
//! a true identity when only one worker is running.

use super::{Result, Tensor, TensorElem, TensorError};
use std::fmt::Debug;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Buffer<T> = Arc<RwLock<Vec<T>>>;

fn buffer<T>(data: Vec<T>) -> Buffer<T> {
    Arc::new(RwLock::new(data))
}

/// A dynamically shaped value/gradient pair.
pub struct Blob<T: TensorElem> {
    shape: Vec<usize>,
    data: Buffer<T>,
    diff: Buffer<T>,
}

impl<T: TensorElem> Blob<T> {
    /// Creates a zero-filled blob.
    pub fn new(shape: &[usize]) -> Self {
        let count = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: buffer(vec![T::zero(); count]),
            diff: buffer(vec![T::zero(); count]),
        }
    }

    /// Creates a blob holding `data`, with a zeroed gradient.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if `data.len()` is not the product of `shape`.
    pub fn from_vec(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        let count: usize = shape.iter().product();
        if data.len() != count {
            return Err(TensorError::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            data: buffer(data),
            diff: buffer(vec![T::zero(); count]),
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements.
    pub fn count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Size of the leading dimension, or 0 for a rank-0 blob.
    pub fn num(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Changes the shape, growing or shrinking both buffers when the element count changes.
    ///
    /// Buffers shared with another blob are resized for both.
    pub fn reshape(&mut self, shape: &[usize]) {
        self.shape = shape.to_vec();
        let count = self.count();
        for buf in [&self.data, &self.diff] {
            let mut guard = buf.write().unwrap_or_else(PoisonError::into_inner);
            if guard.len() != count {
                guard.resize(count, T::zero());
            }
        }
    }

    /// Makes this blob's values alias `other`'s value buffer.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if the element counts differ.
    pub fn share_data(&mut self, other: &Blob<T>) -> Result<()> {
        self.check_count(other)?;
        self.data = Arc::clone(&other.data);
        Ok(())
    }

    /// Makes this blob's gradients alias `other`'s gradient buffer.
    pub fn share_diff(&mut self, other: &Blob<T>) -> Result<()> {
        self.check_count(other)?;
        self.diff = Arc::clone(&other.diff);
        Ok(())
    }

    pub fn shares_data_with(&self, other: &Blob<T>) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    pub fn shares_diff_with(&self, other: &Blob<T>) -> bool {
        Arc::ptr_eq(&self.diff, &other.diff)
    }

    pub fn data(&self) -> RwLockReadGuard<'_, Vec<T>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Vec<T>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn diff(&self) -> RwLockReadGuard<'_, Vec<T>> {
        self.diff.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn diff_mut(&self) -> RwLockWriteGuard<'_, Vec<T>> {
        self.diff.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copies `values` into the value buffer.
    pub fn set_data(&self, values: &[T]) -> Result<()> {
        Self::copy_into(&mut self.data_mut(), values)
    }

    /// Copies `values` into the gradient buffer.
    pub fn set_diff(&self, values: &[T]) -> Result<()> {
        Self::copy_into(&mut self.diff_mut(), values)
    }

    /// Exchanges this blob's value storage with `tensor`'s, without copying elements.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if the tensor's shape differs from the blob's.
    pub fn swap_data_with<const RANK: usize>(&self, tensor: &mut Tensor<T, RANK>) -> Result<()> {
        if tensor.shape()[..] != self.shape[..] {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.clone(),
                got: tensor.shape().to_vec(),
            });
        }
        std::mem::swap(&mut *self.data_mut(), tensor.storage_mut());
        Ok(())
    }

    fn copy_into(dst: &mut [T], values: &[T]) -> Result<()> {
        if dst.len() != values.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![dst.len()],
                got: vec![values.len()],
            });
        }
        dst.copy_from_slice(values);
        Ok(())
    }

    fn check_count(&self, other: &Blob<T>) -> Result<()> {
        if self.count() != other.count() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }
        Ok(())
    }
}

impl<T: TensorElem> Default for Blob<T> {
    fn default() -> Self {
        Self::new(&[0])
    }
}

impl<T: TensorElem> Debug for Blob<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob")
            .field("shape", &self.shape)
            .field("data_refs", &Arc::strong_count(&self.data))
            .field("diff_refs", &Arc::strong_count(&self.diff))
            .finish()
    }
}
