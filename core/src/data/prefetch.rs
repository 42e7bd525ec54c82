//! Background batch filling.
//!
//! A [`PrefetchTask`] owns a [`ProducerState`] on a dedicated worker thread. Two `crossbeam`
//! channels of capacity one carry the single [`Batch`] back and forth:
//!
//! ```text
//!   consumer                          worker
//!   next_filled()  <--- filled ---    fill_batch() -> send
//!   swap into tops
//!   recycle()      ---- empty  --->   recv -> fill_batch()
//! ```
//!
//! While the consumer works on the contents it swapped out of the batch, the worker already fills
//! the batch again, so the two sides never touch the same buffer. Dropping the task cancels the
//! worker, closes both channels and joins the thread.

use super::decode::{Datum, SegmentDecoder};
use super::sampler::{Sampler, SequentialSampler, ShuffleSampler, apply_permutation};
use super::segment::SegmentSampler;
use super::shots::ShotList;
use super::source::VideoRecord;
use super::transform::DataTransformer;
use super::{DataError, Result};
use crate::tensor::{Tensor, TensorElem, TensorError};
use crossbeam::channel::{Receiver, Sender, bounded};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// One batch of transformed items and their labels.
#[derive(Debug, Clone)]
pub struct Batch<T: TensorElem> {
    /// `[batch, C, H, W]`
    pub data: Tensor<T, 4>,
    /// `[batch, 1, 1, 1]`
    pub label: Tensor<T, 4>,
}

impl<T: TensorElem> Batch<T> {
    pub fn new(batch_size: usize, [channels, height, width]: [usize; 3]) -> Self {
        Self {
            data: Tensor::zeros([batch_size, channels, height, width]),
            label: Tensor::zeros([batch_size, 1, 1, 1]),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.data.shape()[0]
    }
}

/// Everything the worker needs to produce items: the dataset, the cursor and the random streams.
pub struct ProducerState<D: SegmentDecoder> {
    records: Vec<VideoRecord>,
    shot_lists: Vec<ShotList>,
    cursor: usize,
    list_sampler: Box<dyn Sampler>,
    frame_rng: StdRng,
    segments: SegmentSampler,
    decoder: D,
    transformer: DataTransformer,
}

impl<D: SegmentDecoder> ProducerState<D> {
    /// Validates the dataset and, with `shuffle`, applies a first permutation.
    ///
    /// # Errors
    ///
    /// `EmptyDataset` without records, `SourceMismatch` if the two lists differ in length and
    /// `NoShots` for a video without usable shots.
    pub fn new(
        records: Vec<VideoRecord>,
        shot_lists: Vec<ShotList>,
        segments: SegmentSampler,
        decoder: D,
        transformer: DataTransformer,
        shuffle: bool,
        seed: Option<u64>,
    ) -> Result<Self> {
        if records.is_empty() {
            return Err(DataError::EmptyDataset);
        }
        if records.len() != shot_lists.len() {
            return Err(DataError::SourceMismatch {
                videos: records.len(),
                shot_lists: shot_lists.len(),
            });
        }
        if let Some(idx) = shot_lists.iter().position(|shots| shots.is_empty()) {
            return Err(DataError::NoShots {
                path: records[idx].path.clone(),
                num_frames: segments.num_frames,
            });
        }

        let frame_rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let mut state = Self {
            records,
            shot_lists,
            cursor: 0,
            list_sampler: if shuffle {
                Box::new(ShuffleSampler::new(seed))
            } else {
                Box::new(SequentialSampler)
            },
            frame_rng,
            segments,
            decoder,
            transformer,
        };
        state.shuffle_lists();
        Ok(state)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn records(&self) -> &[VideoRecord] {
        &self.records
    }

    pub fn shot_lists(&self) -> &[ShotList] {
        &self.shot_lists
    }

    pub fn transformer(&self) -> &DataTransformer {
        &self.transformer
    }

    /// Reorders records and shot lists by one permutation drawn from the list sampler.
    pub fn shuffle_lists(&mut self) {
        let order = self.list_sampler.sample(self.records.len());
        apply_permutation(&mut self.records, &order);
        apply_permutation(&mut self.shot_lists, &order);
    }

    /// Samples and decodes the item at the cursor without moving it.
    ///
    /// The shots keep their temporal order, which makes the result usable to size the outputs.
    pub fn probe(&mut self) -> Result<Datum> {
        self.decode_current(false)
    }

    fn decode_current(&mut self, shuffle_shots: bool) -> Result<Datum> {
        let record = &self.records[self.cursor];
        let offsets = self.segments.sample(
            &record.path,
            &self.shot_lists[self.cursor],
            &mut self.frame_rng,
            shuffle_shots,
        )?;
        self.decoder
            .decode(record, &offsets, self.segments.num_frames)
    }

    /// Fills every slot of `batch`, returning `false` if `cancel` was raised midway.
    ///
    /// A slot whose item fails to load keeps its previous contents and the cursor stays on the
    /// failing record, so the next slot tries it again.
    pub fn fill_batch<T: TensorElem>(&mut self, batch: &mut Batch<T>, cancel: &AtomicBool) -> bool {
        for slot in 0..batch.batch_size() {
            if cancel.load(Ordering::Acquire) {
                return false;
            }
            match self.load_item(batch, slot) {
                Ok(()) => self.advance(),
                Err(err) => warn!(
                    "Skipping slot {slot}: failed to load {}: {err}",
                    self.records[self.cursor].path.display()
                ),
            }
        }
        true
    }

    fn load_item<T: TensorElem>(&mut self, batch: &mut Batch<T>, slot: usize) -> Result<()> {
        let datum = self.decode_current(true)?;
        self.transformer
            .transform(&datum, batch.data.item_mut(slot)?)?;
        let label = T::from_i32(datum.label).ok_or_else(|| {
            TensorError::Unsupported(format!("label {} is not representable", datum.label))
        })?;
        batch.label.item_mut(slot)?[0] = label;
        Ok(())
    }

    /// Moves to the next record, wrapping (and reshuffling) at the end.
    pub fn advance(&mut self) {
        self.cursor += 1;
        if self.cursor >= self.records.len() {
            debug!("Restarting data prefetching from start.");
            self.cursor = 0;
            self.shuffle_lists();
        }
    }
}

/// Handle to the worker thread filling batches.
pub struct PrefetchTask<T: TensorElem> {
    filled_rx: Option<Receiver<Batch<T>>>,
    empty_tx: Option<Sender<Batch<T>>>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl<T: TensorElem + 'static> PrefetchTask<T> {
    /// Moves `state` onto a new worker thread, which starts filling `batch` immediately.
    pub fn spawn<D: SegmentDecoder + 'static>(
        mut state: ProducerState<D>,
        batch: Batch<T>,
    ) -> Result<Self> {
        let (filled_tx, filled_rx) = bounded::<Batch<T>>(1);
        let (empty_tx, empty_rx) = bounded::<Batch<T>>(1);
        empty_tx
            .send(batch)
            .map_err(|_| DataError::WorkerDisconnected)?;

        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name("sequence-prefetch".into())
            .spawn(move || {
                debug!("Prefetch worker started");
                while let Ok(mut batch) = empty_rx.recv() {
                    if !state.fill_batch(&mut batch, &worker_cancel) {
                        break;
                    }
                    if filled_tx.send(batch).is_err() {
                        break;
                    }
                }
                debug!("Prefetch worker stopped at cursor {}", state.cursor());
            })
            .map_err(DataError::Spawn)?;

        Ok(Self {
            filled_rx: Some(filled_rx),
            empty_tx: Some(empty_tx),
            cancel,
            handle: Some(handle),
        })
    }

    /// Blocks until the worker hands over a full batch.
    pub fn next_filled(&self) -> Result<Batch<T>> {
        self.filled_rx
            .as_ref()
            .ok_or(DataError::WorkerDisconnected)?
            .recv()
            .map_err(|_| DataError::WorkerDisconnected)
    }

    /// Returns a consumed batch to the worker for refilling.
    pub fn recycle(&self, batch: Batch<T>) -> Result<()> {
        self.empty_tx
            .as_ref()
            .ok_or(DataError::WorkerDisconnected)?
            .send(batch)
            .map_err(|_| DataError::WorkerDisconnected)
    }

    /// Stops the worker and waits for it.
    ///
    /// # Errors
    ///
    /// `WorkerPanicked` if the worker thread panicked.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }
}

impl<T: TensorElem> PrefetchTask<T> {
    fn stop(&mut self) -> Result<()> {
        self.cancel.store(true, Ordering::Release);
        self.empty_tx.take();
        self.filled_rx.take();
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| DataError::WorkerPanicked),
            None => Ok(()),
        }
    }
}

impl<T: TensorElem> Drop for PrefetchTask<T> {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!("{err}");
        }
    }
}
