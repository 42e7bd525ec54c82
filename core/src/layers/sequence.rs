//! The sequence-data input layer.
//!
//! Produces two tops: `data` shaped `[batch, C, H, W]` and `label` shaped `[batch, 1, 1, 1]`.
//! Batches are filled by a [`PrefetchTask`] and moved into the tops by swapping storage.

use super::{Layer, LayerError, LayerKind, Result};
use crate::config::SequenceDataConfig;
use crate::data::shots::shots_from_cuts;
use crate::data::source::{read_cut_points, read_shot_sources, read_video_list};
use crate::data::{
    Batch, DataTransformer, ImageSequenceDecoder, PrefetchTask, ProducerState, SegmentDecoder,
    SegmentSampler, ShotList, TransformConfig,
};
use crate::tensor::{Blob, TensorElem, TensorError};
use std::path::Path;
use tracing::{debug, info};

/// Reads the shot list file and turns every referenced cut file into usable shots.
fn load_shot_lists(config: &SequenceDataConfig) -> crate::data::Result<Vec<ShotList>> {
    info!("Opening shot list {}", config.shot_source.display());
    let sources = read_shot_sources(&config.shot_source)?;
    let mut shot_lists = Vec::with_capacity(sources.len());
    for source in &sources {
        let cuts = read_cut_points(&source.path)?;
        let shots = shots_from_cuts(&cuts, source.length, config.modality, config.num_frames);
        debug!("{}: {} usable shot(s)", source.path.display(), shots.len());
        shot_lists.push(shots);
    }
    Ok(shot_lists)
}

/// Swaps both tops with the batch, or neither if a top's shape no longer matches.
fn swap_into_tops<T: TensorElem>(
    data_top: &Blob<T>,
    label_top: &Blob<T>,
    batch: &mut Batch<T>,
) -> Result<()> {
    for (top, shape) in [(data_top, batch.data.shape()), (label_top, batch.label.shape())] {
        if top.shape() != &shape[..] {
            return Err(TensorError::ShapeMismatch {
                expected: shape.to_vec(),
                got: top.shape().to_vec(),
            }
            .into());
        }
    }
    data_top.swap_data_with(&mut batch.data)?;
    label_top.swap_data_with(&mut batch.label)?;
    Ok(())
}

pub struct SequenceDataLayer<T: TensorElem, D: SegmentDecoder = ImageSequenceDecoder> {
    config: SequenceDataConfig,
    transform: TransformConfig,
    decoder: Option<D>,
    task: Option<PrefetchTask<T>>,
}

impl<T: TensorElem> SequenceDataLayer<T, ImageSequenceDecoder> {
    /// A layer reading frames from image files.
    ///
    /// # Errors
    ///
    /// `Config` if a parameter is out of range, `Data` if the frame name pattern is invalid.
    pub fn new(config: SequenceDataConfig, transform: TransformConfig) -> Result<Self> {
        config.validate()?;
        let decoder = ImageSequenceDecoder::new(
            config.modality,
            config.name_pattern.as_deref(),
            config.new_height,
            config.new_width,
        )?;
        Ok(Self::with_decoder(config, transform, decoder))
    }
}

impl<T: TensorElem, D: SegmentDecoder> SequenceDataLayer<T, D> {
    /// A layer decoding segments with `decoder`.
    pub fn with_decoder(config: SequenceDataConfig, transform: TransformConfig, decoder: D) -> Self {
        Self {
            config,
            transform,
            decoder: Some(decoder),
            task: None,
        }
    }

    pub fn config(&self) -> &SequenceDataConfig {
        &self.config
    }

    fn video_source(&self) -> &Path {
        &self.config.video_source
    }
}

impl<T, D> Layer<T> for SequenceDataLayer<T, D>
where
    T: TensorElem + 'static,
    D: SegmentDecoder + 'static,
{
    fn kind(&self) -> LayerKind {
        LayerKind::SequenceData
    }

    fn setup(&mut self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<()> {
        if !bottom.is_empty() || top.len() != 2 {
            return Err(LayerError::BlobCount {
                kind: LayerKind::SequenceData,
                bottom: bottom.len(),
                top: top.len(),
                expected: "no bottoms and two tops (data, label)",
            });
        }
        if self.task.is_some() {
            return Err(LayerError::AlreadySetUp(LayerKind::SequenceData));
        }
        self.config.validate()?;

        info!("Opening video list {}", self.video_source().display());
        let records = read_video_list(self.video_source())?;
        let shot_lists = load_shot_lists(&self.config)?;
        let total_shots: usize = shot_lists.iter().map(Vec::len).sum();
        info!(
            "A total of {} videos with {} usable shots",
            records.len(),
            total_shots
        );

        let decoder = self
            .decoder
            .take()
            .ok_or(LayerError::AlreadySetUp(LayerKind::SequenceData))?;
        let cfg = &self.config;
        let transformer = DataTransformer::new(
            self.transform.clone(),
            cfg.seed.map(|seed| seed.wrapping_add(2)),
        );
        let mut state = ProducerState::new(
            records,
            shot_lists,
            SegmentSampler::new(cfg.num_shots, cfg.num_segments, cfg.num_frames),
            decoder,
            transformer,
            cfg.shuffle,
            cfg.seed,
        )?;

        let probe = state.probe()?;
        let [channels, height, width] = state.transformer().infer_shape(*probe.data.shape())?;
        let batch_size = cfg.batch_size;
        top[0].reshape(&[batch_size, channels, height, width]);
        top[1].reshape(&[batch_size, 1, 1, 1]);
        info!("Output data size: {batch_size},{channels},{height},{width}");

        let batch = Batch::new(batch_size, [channels, height, width]);
        self.task = Some(PrefetchTask::spawn(state, batch)?);
        Ok(())
    }

    /// Output shapes are fixed at setup.
    fn reshape(&mut self, _bottom: &[Blob<T>], _top: &mut [Blob<T>]) -> Result<()> {
        Ok(())
    }

    /// Moves the next filled batch into the tops.
    ///
    /// The batch goes back to the worker even when the tops cannot take it, so a failed step
    /// never stalls the prefetcher.
    fn forward(&mut self, bottom: &[Blob<T>], top: &mut [Blob<T>]) -> Result<()> {
        let top_count = top.len();
        let [data_top, label_top] = top else {
            return Err(LayerError::BlobCount {
                kind: LayerKind::SequenceData,
                bottom: bottom.len(),
                top: top_count,
                expected: "no bottoms and two tops (data, label)",
            });
        };
        let task = self
            .task
            .as_ref()
            .ok_or(LayerError::NotSetUp(LayerKind::SequenceData))?;
        let mut batch = task.next_filled()?;
        let swapped = swap_into_tops(data_top, label_top, &mut batch);
        task.recycle(batch)?;
        swapped
    }

    fn backward(
        &mut self,
        _top: &[Blob<T>],
        _propagate_down: &[bool],
        _bottom: &mut [Blob<T>],
    ) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataError, Datum, VideoRecord};
    use crate::tensor::Tensor;
    use std::fs;

    struct ConstDecoder;

    impl SegmentDecoder for ConstDecoder {
        fn decode(
            &self,
            record: &VideoRecord,
            offsets: &[usize],
            num_frames: usize,
        ) -> crate::data::Result<Datum> {
            let channels = offsets.len() * num_frames;
            Ok(Datum {
                data: Tensor::new(vec![7; channels * 4 * 4], [channels, 4, 4])?,
                label: record.label,
            })
        }
    }

    fn write_dataset(dir: &Path) -> SequenceDataConfig {
        let cuts = dir.join("cuts.txt");
        fs::write(&cuts, "1 20\n").unwrap();
        fs::write(dir.join("videos.txt"), "a 30 4\nb 30 5\n").unwrap();
        fs::write(
            dir.join("shots.txt"),
            format!("{} 30\n{} 30\n", cuts.display(), cuts.display()),
        )
        .unwrap();
        let mut config =
            SequenceDataConfig::new(dir.join("videos.txt"), dir.join("shots.txt"));
        config.num_frames = 2;
        config.num_segments = 3;
        config.batch_size = 2;
        config
    }

    #[test]
    fn test_setup_sizes_tops() {
        let dir = tempfile::tempdir().unwrap();
        let transform = TransformConfig {
            crop_size: 3,
            ..Default::default()
        };
        let mut layer =
            SequenceDataLayer::<f32, _>::with_decoder(write_dataset(dir.path()), transform, ConstDecoder);
        let mut top = vec![Blob::default(), Blob::default()];
        layer.setup(&[], &mut top).unwrap();
        assert_eq!(top[0].shape(), &[2, 6, 3, 3]);
        assert_eq!(top[1].shape(), &[2, 1, 1, 1]);

        layer.forward(&[], &mut top).unwrap();
        assert_eq!(&top[1].data()[..], &[4.0, 5.0]);
        assert!(top[0].data().iter().all(|&v| v == 7.0));

        let err = layer.setup(&[], &mut top);
        assert!(matches!(err, Err(LayerError::AlreadySetUp(_))));
    }

    #[test]
    fn test_failed_forward_returns_batch_to_worker() {
        let dir = tempfile::tempdir().unwrap();
        let mut layer = SequenceDataLayer::<f32, _>::with_decoder(
            write_dataset(dir.path()),
            TransformConfig::default(),
            ConstDecoder,
        );
        let mut top = vec![Blob::default(), Blob::default()];
        layer.setup(&[], &mut top).unwrap();

        top[1].reshape(&[3, 1, 1, 1]);
        assert!(matches!(
            layer.forward(&[], &mut top),
            Err(LayerError::Tensor(TensorError::ShapeMismatch { .. }))
        ));
        // Neither top took the batch.
        assert!(top[0].data().iter().all(|&v| v == 0.0));

        top[1].reshape(&[2, 1, 1, 1]);
        layer.forward(&[], &mut top).unwrap();
        assert_eq!(&top[1].data()[..], &[4.0, 5.0]);
        assert!(top[0].data().iter().all(|&v| v == 7.0));
    }

    #[test]
    fn test_forward_requires_two_tops() {
        let dir = tempfile::tempdir().unwrap();
        let mut layer = SequenceDataLayer::<f32, _>::with_decoder(
            write_dataset(dir.path()),
            TransformConfig::default(),
            ConstDecoder,
        );
        let mut top = vec![Blob::default(), Blob::default()];
        layer.setup(&[], &mut top).unwrap();

        let mut data_only = vec![Blob::default()];
        assert!(matches!(
            layer.forward(&[], &mut data_only),
            Err(LayerError::BlobCount { top: 1, .. })
        ));
        layer.forward(&[], &mut top).unwrap();
        assert_eq!(&top[1].data()[..], &[4.0, 5.0]);
    }

    #[test]
    fn test_forward_before_setup() {
        let dir = tempfile::tempdir().unwrap();
        let mut layer = SequenceDataLayer::<f32, _>::with_decoder(
            write_dataset(dir.path()),
            TransformConfig::default(),
            ConstDecoder,
        );
        let mut top = vec![Blob::default(), Blob::default()];
        assert!(matches!(
            layer.forward(&[], &mut top),
            Err(LayerError::NotSetUp(LayerKind::SequenceData))
        ));
    }

    #[test]
    fn test_setup_requires_two_tops() {
        let dir = tempfile::tempdir().unwrap();
        let mut layer = SequenceDataLayer::<f32, _>::with_decoder(
            write_dataset(dir.path()),
            TransformConfig::default(),
            ConstDecoder,
        );
        let mut top = vec![Blob::default()];
        assert!(matches!(
            layer.setup(&[], &mut top),
            Err(LayerError::BlobCount { top: 1, .. })
        ));
    }

    #[test]
    fn test_setup_reports_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let config = SequenceDataConfig::new(dir.path().join("nope.txt"), dir.path().join("s.txt"));
        let mut layer =
            SequenceDataLayer::<f32, _>::with_decoder(config, TransformConfig::default(), ConstDecoder);
        let mut top = vec![Blob::default(), Blob::default()];
        assert!(matches!(
            layer.setup(&[], &mut top),
            Err(LayerError::Data(DataError::Io { .. }))
        ));
    }
}
