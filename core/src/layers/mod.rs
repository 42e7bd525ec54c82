//! # Layers
//!
//! A layer reads a list of *bottom* blobs and writes a list of *top* blobs. Its lifecycle is:
//!
//! 1. [`Layer::setup`] once, to validate the wiring and size the tops.
//! 2. [`Layer::forward`] on every step, followed by [`Layer::backward`] during training.
//!
//! [`Layer::reshape`] re-derives top shapes when a bottom changes shape between steps.
//!
//! Layers are usually built from a [`LayerConfig`] with [`build_layer`], which picks the
//! implementation from the config's [`LayerKind`].

pub mod gather;
pub mod sequence;

pub use gather::GatherLayer;
pub use sequence::SequenceDataLayer;

use crate::config::{ConfigError, LayerConfig};
use crate::data::{DataError, ImageSequenceDecoder};
use crate::distributed::{CollectiveBackend, CommElem, CommError, ParallelMode};
use crate::tensor::{Blob, TensorElem, TensorError};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Gather,
    SequenceData,
}

impl LayerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gather => "gather",
            Self::SequenceData => "sequence_data",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum LayerError {
    #[error("{kind} layer got {bottom} bottom and {top} top blobs, expected {expected}")]
    BlobCount {
        kind: LayerKind,
        bottom: usize,
        top: usize,
        expected: &'static str,
    },
    #[error("{0} layer used before setup")]
    NotSetUp(LayerKind),
    #[error("{0} layer was already set up")]
    AlreadySetUp(LayerKind),
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Comm(#[from] CommError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, LayerError>;

/// A network layer over blobs of `T`.
pub trait Layer<T: TensorElem>: Send {
    fn kind(&self) -> LayerKind;

    /// Validates bottom/top counts and sizes the tops.
    fn setup(&mut self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<()>;

    /// Adjusts top shapes to the current bottom shapes.
    fn reshape(&mut self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<()>;

    fn forward(&mut self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<()>;

    /// Writes bottom gradients from top gradients, for every bottom `i` with
    /// `propagate_down[i]` set.
    fn backward(
        &mut self,
        top: &[Blob<T>],
        propagate_down: &[bool],
        bottom: &mut [Blob<T>],
    ) -> Result<()>;
}

/// Builds the layer described by `config`.
///
/// Gather layers communicate through `mode`; sequence-data layers decode frames from image
/// files.
pub fn build_layer<T, B>(config: &LayerConfig, mode: &ParallelMode<B>) -> Result<Box<dyn Layer<T>>>
where
    T: CommElem + 'static,
    B: CollectiveBackend + 'static,
{
    match config {
        LayerConfig::Gather { .. } => Ok(Box::new(GatherLayer::new(mode.clone()))),
        LayerConfig::SequenceData {
            data, transform, ..
        } => {
            let layer: SequenceDataLayer<T, ImageSequenceDecoder> =
                SequenceDataLayer::new(data.clone(), transform.clone())?;
            Ok(Box::new(layer))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetConfig;
    use crate::distributed::CpuBackend;

    #[test]
    fn test_build_from_config() {
        let net = NetConfig::from_toml_str(
            r#"
            [[layer]]
            type = "sequence_data"
            name = "data"
            [layer.data]
            video_source = "videos.txt"
            shot_source = "shots.txt"

            [[layer]]
            type = "gather"
            name = "gather"
            "#,
        )
        .unwrap();
        let mode = ParallelMode::<CpuBackend>::Serial;
        let kinds: Vec<LayerKind> = net
            .layers
            .iter()
            .map(|config| build_layer::<f32, _>(config, &mode).unwrap().kind())
            .collect();
        assert_eq!(kinds, vec![LayerKind::SequenceData, LayerKind::Gather]);
    }

    #[test]
    fn test_build_rejects_bad_pattern() {
        let mut data = crate::config::SequenceDataConfig::new("v.txt", "s.txt");
        data.name_pattern = Some("frame.jpg".into());
        let config = LayerConfig::SequenceData {
            name: "data".into(),
            data,
            transform: Default::default(),
        };
        let err = build_layer::<f64, CpuBackend>(&config, &ParallelMode::Serial);
        assert!(matches!(
            err,
            Err(LayerError::Data(DataError::InvalidPattern { .. }))
        ));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(LayerKind::SequenceData.to_string(), "sequence_data");
    }
}
