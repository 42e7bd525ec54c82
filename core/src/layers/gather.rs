//! All-gather across data-parallel workers.
//!
//! ```text
//! forward:   bottom_r [N, ...]            --all_gather-->   top [W*N, ...]  (rank order)
//! backward:  top.diff [W*N, ...] on rank 0  --scatter-->    bottom_r.diff [N, ...] * W
//! ```
//!
//! The received gradient slice is multiplied by `W` because the parameter-gradient reduction
//! that follows the backward pass averages over the `W` workers. Without the factor every
//! gathered sample would contribute `1/W` of its true gradient.
//!
//! With a single worker the layer is an identity: each top aliases its bottom's storage, and
//! forward and backward do nothing.

use super::{Layer, LayerError, LayerKind, Result};
use crate::distributed::{CollectiveBackend, CommElem, ParallelMode};
use crate::tensor::{Blob, TensorError};
use seqgather_kernels::cpu_scale;
use tracing::debug;

#[derive(Debug)]
pub struct GatherLayer<B> {
    mode: ParallelMode<B>,
}

impl<B: CollectiveBackend> GatherLayer<B> {
    pub fn new(mode: ParallelMode<B>) -> Self {
        Self { mode }
    }

    pub fn world_size(&self) -> usize {
        self.mode.world_size()
    }
}

impl<T: CommElem, B: CollectiveBackend> Layer<T> for GatherLayer<B> {
    fn kind(&self) -> LayerKind {
        LayerKind::Gather
    }

    fn setup(&mut self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<()> {
        if bottom.len() != top.len() {
            return Err(LayerError::BlobCount {
                kind: LayerKind::Gather,
                bottom: bottom.len(),
                top: top.len(),
                expected: "as many tops as bottoms",
            });
        }
        debug!(
            "Gather layer over {} blob(s), world size {}",
            bottom.len(),
            self.mode.world_size()
        );
        self.reshape(bottom, top)
    }

    fn reshape(&mut self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<()> {
        for (b, t) in bottom.iter().zip(top.iter_mut()) {
            let mut shape = b.shape().to_vec();
            match self.mode.group() {
                Some(group) => {
                    if let Some(leading) = shape.first_mut() {
                        *leading *= group.world_size();
                    }
                    t.reshape(&shape);
                }
                None => {
                    t.reshape(&shape);
                    t.share_data(b)?;
                    t.share_diff(b)?;
                }
            }
        }
        Ok(())
    }

    fn forward(&mut self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<()> {
        let Some(group) = self.mode.group() else {
            return Ok(());
        };
        for (b, t) in bottom.iter().zip(top.iter()) {
            let send = b.data();
            let mut recv = t.data_mut();
            group.all_gather(&send[..], &mut recv[..])?;
        }
        Ok(())
    }

    fn backward(
        &mut self,
        top: &[Blob<T>],
        propagate_down: &[bool],
        bottom: &mut [Blob<T>],
    ) -> Result<()> {
        let Some(group) = self.mode.group() else {
            return Ok(());
        };
        let world = T::from_usize(group.world_size()).ok_or_else(|| {
            TensorError::Unsupported(format!("world size {}", group.world_size()))
        })?;
        for ((t, b), &down) in top.iter().zip(bottom.iter()).zip(propagate_down) {
            if !down {
                continue;
            }
            let send = t.diff();
            let mut recv = b.diff_mut();
            group.scatter(&send[..], &mut recv[..], 0)?;
            cpu_scale(world, &mut recv[..]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::CpuBackend;
    use std::sync::Arc;

    fn serial() -> GatherLayer<CpuBackend> {
        GatherLayer::new(ParallelMode::Serial)
    }

    #[test]
    fn test_setup_requires_matching_counts() {
        let bottom = vec![Blob::<f32>::new(&[2, 3])];
        let mut top = vec![Blob::<f32>::default(), Blob::default()];
        let err = serial().setup(&bottom, &mut top);
        assert!(matches!(err, Err(LayerError::BlobCount { bottom: 1, top: 2, .. })));
    }

    #[test]
    fn test_serial_is_zero_copy_identity() {
        let mut layer = serial();
        let bottom = vec![Blob::<f32>::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap()];
        let mut top = vec![Blob::<f32>::default()];
        layer.setup(&bottom, &mut top).unwrap();

        assert_eq!(top[0].shape(), &[2, 2]);
        assert!(top[0].shares_data_with(&bottom[0]));
        assert!(top[0].shares_diff_with(&bottom[0]));

        layer.forward(&bottom, &mut top).unwrap();
        assert_eq!(&top[0].data()[..], &[1.0, 2.0, 3.0, 4.0]);

        top[0].set_diff(&[0.5; 4]).unwrap();
        let mut bottom = bottom;
        layer.backward(&top, &[true], &mut bottom).unwrap();
        assert_eq!(&bottom[0].diff()[..], &[0.5; 4]);
    }

    #[test]
    fn test_group_of_one_behaves_serially() {
        let backend = CpuBackend::ring(1).pop().unwrap();
        let mut layer = GatherLayer::new(ParallelMode::Distributed(Arc::new(backend)));
        let bottom = vec![Blob::<f64>::new(&[3, 1])];
        let mut top = vec![Blob::<f64>::default()];
        Layer::<f64>::setup(&mut layer, &bottom, &mut top).unwrap();
        assert_eq!(top[0].shape(), &[3, 1]);
        assert!(top[0].shares_data_with(&bottom[0]));
    }

    #[test]
    fn test_reshape_follows_bottom() {
        let mut layer = serial();
        let mut bottom = vec![Blob::<f32>::new(&[2, 4])];
        let mut top = vec![Blob::<f32>::default()];
        layer.setup(&bottom, &mut top).unwrap();
        bottom[0].reshape(&[5, 4]);
        layer.reshape(&bottom, &mut top).unwrap();
        assert_eq!(top[0].shape(), &[5, 4]);
        assert_eq!(top[0].data().len(), 20);
    }
}
