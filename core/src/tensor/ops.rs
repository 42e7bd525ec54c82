//! Tensor operations used by the data pipeline.
//!
//! Batch buffers are written one item at a time, so most of what lives here is about slicing
//! along the leading dimension.

use super::{Result, Tensor, TensorElem, TensorError};

impl<T, const RANK: usize> Tensor<T, RANK>
where
    T: TensorElem,
{
    /// Returns the contiguous slice of item `n` along the leading dimension.
    ///
    /// # Errors
    ///
    /// `Unsupported` for rank-0 tensors, `IndexOutOfBounds` if `n >= shape[0]`.
    pub fn item(&self, n: usize) -> Result<&[T]> {
        let range = self.item_range(n)?;
        Ok(&self.data()[range])
    }

    /// Mutable counterpart of [`Tensor::item`].
    pub fn item_mut(&mut self, n: usize) -> Result<&mut [T]> {
        let range = self.item_range(n)?;
        Ok(&mut self.data_mut()[range])
    }

    fn item_range(&self, n: usize) -> Result<std::ops::Range<usize>> {
        let (Some(&leading), Some(&stride)) = (self.shape().first(), self.strides().first()) else {
            return Err(TensorError::Unsupported(
                "item access requires rank >= 1".into(),
            ));
        };
        if n >= leading {
            return Err(TensorError::IndexOutOfBounds {
                index: vec![n],
                shape: self.shape().to_vec(),
            });
        }
        Ok(n * stride..(n + 1) * stride)
    }

    /// Sets every element to `value`.
    pub fn fill(&mut self, value: T) {
        self.data_mut().iter_mut().for_each(|x| *x = value);
    }
}
