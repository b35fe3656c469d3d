use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError};
use itertools::Itertools;
use ndarray::{stack, Array2, Array4, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::DataError;
use crate::mean::MeanImage;
use crate::normalize::{Normalizer, DEFAULT_SCALE};
use crate::one_hot::one_hot_batch;
use crate::record::{RecordReader, RecordShape, Sample};
use crate::shuffle_buffer::ShuffleBuffer;

/// How often blocked threads look at the stop signal
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A group of normalized samples, consumed by exactly one training step
#[derive(Debug, Clone)]
pub struct Batch {
    /// [batch_size, height, width, frames * channels]
    pub state: Array4<f32>,
    /// one-hot, [batch_size, num_act]
    pub action: Array2<f32>,
    /// [batch_size, height, width, channels]
    pub next_frame: Array4<f32>,
    pub action_ids: Vec<usize>,
}

impl Batch {
    /// Stacks samples along a new leading batch axis; values stay as decoded
    pub fn from_samples(
        samples: &[Sample],
        num_act: usize,
    ) -> Result<Self> {
        if samples.is_empty() {
            Err(DataError::InvalidConfig("batch of zero samples".to_string()))?;
        }
        let states = samples.iter().map(|s| s.state.view()).collect_vec();
        let next_frames = samples.iter().map(|s| s.next_frame.view()).collect_vec();
        let action_ids = samples.iter().map(|s| s.action_id).collect_vec();
        Ok(Batch {
            state: stack(Axis(0), &states)?,
            action: one_hot_batch(&action_ids, num_act)?,
            next_frame: stack(Axis(0), &next_frames)?,
            action_ids,
        })
    }

    pub fn len(&self) -> usize {
        self.action_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.action_ids.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    pub batch_size: usize,
    /// Shuffle buffer capacity
    pub capacity: usize,
    /// Samples that must stay buffered after each draw; a quarter of the capacity by default
    pub min_after_dequeue: usize,
    /// Parallel record reading workers
    pub num_threads: usize,
    /// Passes over the record files; `None` repeats forever
    pub num_epochs: Option<usize>,
    /// Reshuffle the file order on every pass
    pub shuffle_files: bool,
    pub seed: Option<u64>,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self::with_capacity(32, 100_000)
    }
}

impl BatcherConfig {
    pub fn with_capacity(
        batch_size: usize,
        capacity: usize,
    ) -> Self {
        Self {
            batch_size,
            capacity,
            min_after_dequeue: capacity / 4,
            num_threads: 1,
            num_epochs: None,
            shuffle_files: true,
            seed: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            Err(DataError::InvalidConfig("batch_size must be positive".to_string()))?;
        }
        if self.num_threads == 0 {
            Err(DataError::InvalidConfig("num_threads must be positive".to_string()))?;
        }
        if self.min_after_dequeue + self.batch_size > self.capacity {
            Err(DataError::InvalidConfig(format!(
                "capacity {} cannot hold min_after_dequeue {} plus a batch of {}",
                self.capacity, self.min_after_dequeue, self.batch_size
            )))?;
        }
        if self.num_epochs == Some(0) {
            Err(DataError::InvalidConfig("num_epochs must be positive".to_string()))?;
        }
        Ok(())
    }
}

/// Record files handed out to the workers, one pass after another.
///
/// Every file is handed out together with the number of its pass (starting at 1).
struct FilenameQueue {
    files: Vec<PathBuf>,
    state: Mutex<FilenameQueueState>,
}

struct FilenameQueueState {
    pending: VecDeque<(PathBuf, usize)>,
    epochs_started: usize,
    max_epochs: Option<usize>,
    shuffle: bool,
    rng: StdRng,
    /// files of the first pass read to the end, and the records they held
    first_pass_files_done: usize,
    first_pass_records: usize,
    empty: bool,
}

impl FilenameQueue {
    fn new(
        files: &[PathBuf],
        max_epochs: Option<usize>,
        shuffle: bool,
        rng: StdRng,
    ) -> Self {
        Self {
            files: files.to_vec(),
            state: Mutex::new(FilenameQueueState {
                pending: VecDeque::new(),
                epochs_started: 0,
                max_epochs,
                shuffle,
                rng,
                first_pass_files_done: 0,
                first_pass_records: 0,
                empty: false,
            }),
        }
    }

    /// `None` once the configured number of passes has been handed out or the files turned out empty
    fn next(&self) -> Option<(PathBuf, usize)> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.empty {
            return None;
        }
        if state.pending.is_empty() {
            if state.max_epochs.is_some_and(|max| state.epochs_started >= max) {
                return None;
            }
            let mut files = self.files.clone();
            if state.shuffle {
                files.shuffle(&mut state.rng);
            }
            state.epochs_started += 1;
            let pass = state.epochs_started;
            log::trace!("starting pass #{} over {} record files", pass, files.len());
            state.pending.extend(files.into_iter().map(|f| (f, pass)));
        }
        state.pending.pop_front()
    }

    /// Reports a file read to its end. `true` when this completes a first pass without a single
    /// record; from then on [Self::next] hands out nothing.
    fn file_done(
        &self,
        pass: usize,
        records: usize,
    ) -> bool {
        if pass != 1 {
            return false;
        }
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.first_pass_files_done += 1;
        state.first_pass_records += records;
        if state.first_pass_files_done == self.files.len() && state.first_pass_records == 0 {
            state.empty = true;
            state.pending.clear();
        }
        state.empty
    }
}

/// Shuffling batch producer.
///
/// `num_threads` workers decode records into a bounded channel, one assembler thread keeps a
/// [ShuffleBuffer] topped up and emits normalized batches into a second bounded channel.
/// Full channels block their producers.
pub struct Batcher {
    batch_rx: Receiver<Result<Batch>>,
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    batch_size: usize,
}

impl Batcher {
    pub fn start(
        reader: RecordReader,
        normalizer: Arc<Normalizer>,
        config: BatcherConfig,
    ) -> Result<Self> {
        config.validate()?;
        let mut seeds = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let stop = Arc::new(AtomicBool::new(false));
        let reader = Arc::new(reader);
        let queue = Arc::new(FilenameQueue::new(
            reader.files(),
            config.num_epochs,
            config.shuffle_files,
            StdRng::from_rng(&mut seeds)?,
        ));

        let (sample_tx, sample_rx) = bounded::<Result<Sample>>(config.batch_size.max(config.num_threads));
        let (batch_tx, batch_rx) = bounded::<Result<Batch>>(1);

        let mut handles = vec![];
        for worker in 0..config.num_threads {
            let reader = Arc::clone(&reader);
            let queue = Arc::clone(&queue);
            let stop = Arc::clone(&stop);
            let sample_tx = sample_tx.clone();
            handles.push(
                thread::Builder::new()
                    .name(format!("record-reader-{worker}"))
                    .spawn(move || read_records(&reader, &queue, &sample_tx, &stop))?,
            );
        }
        // the assembler must see a disconnect once all workers are done
        drop(sample_tx);

        let assembler = Assembler {
            sample_rx,
            batch_tx,
            stop: Arc::clone(&stop),
            buffer: ShuffleBuffer::new(config.capacity, config.min_after_dequeue, StdRng::from_rng(&mut seeds)?),
            batch_size: config.batch_size,
            num_act: reader.num_act(),
            normalizer,
        };
        handles.push(
            thread::Builder::new()
                .name("batch-assembler".to_string())
                .spawn(move || assembler.run())?,
        );

        log::info!(
            "batcher started on '{}': batch_size={}, capacity={}, min_after_dequeue={}, threads={}",
            reader.directory().display(),
            config.batch_size,
            config.capacity,
            config.min_after_dequeue,
            config.num_threads
        );

        Ok(Self {
            batch_rx,
            stop,
            handles,
            batch_size: config.batch_size,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Blocks until the next batch is assembled.
    ///
    /// Decode errors of any worker come out here. [DataError::Closed] signals a stopped batcher
    /// or, with a limited number of epochs, exhausted input.
    pub fn next_batch(&self) -> Result<Batch> {
        match self.batch_rx.recv() {
            Ok(batch) => batch,
            Err(_) => Err(DataError::Closed.into()),
        }
    }

    /// Signals all threads to finish; pending [Self::next_batch] calls return shortly after.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stops and waits for every thread
    pub fn join(mut self) -> Result<()> {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> Result<()> {
        self.stop();
        let mut panicked = vec![];
        for handle in self.handles.drain(..) {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                panicked.push(name);
            }
        }
        if !panicked.is_empty() {
            return Err(anyhow!("batcher threads panicked: {}", panicked.join(", ")));
        }
        log::debug!("batcher threads joined");
        Ok(())
    }
}

impl Drop for Batcher {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            if let Err(e) = self.stop_and_join() {
                log::warn!("{e}");
            }
        }
    }
}

fn read_records(
    reader: &RecordReader,
    queue: &FilenameQueue,
    sample_tx: &Sender<Result<Sample>>,
    stop: &AtomicBool,
) {
    while !stop.load(Ordering::Acquire) {
        let Some((path, pass)) = queue.next() else {
            log::debug!("{} finished: no more record files", thread::current().name().unwrap_or("reader"));
            return;
        };
        let samples = match reader.read_file(&path) {
            Ok(samples) => samples,
            Err(e) => {
                send_until_stopped(sample_tx, Err(e), stop);
                return;
            }
        };
        let mut delivered = 0;
        for sample in samples {
            let failed = sample.is_err();
            if !send_until_stopped(sample_tx, sample, stop) || failed {
                return;
            }
            delivered += 1;
        }
        if queue.file_done(pass, delivered) {
            let empty = DataError::EmptyRecordFiles(reader.directory().to_path_buf());
            send_until_stopped(sample_tx, Err(empty.into()), stop);
            return;
        }
    }
}

/// Blocking send that gives up on stop or disconnect; `true` when delivered
fn send_until_stopped<T>(
    tx: &Sender<T>,
    value: T,
    stop: &AtomicBool,
) -> bool {
    let mut value = value;
    loop {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        match tx.send_timeout(value, POLL_INTERVAL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(v)) => value = v,
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

struct Assembler {
    sample_rx: Receiver<Result<Sample>>,
    batch_tx: Sender<Result<Batch>>,
    stop: Arc<AtomicBool>,
    buffer: ShuffleBuffer<Sample>,
    batch_size: usize,
    num_act: usize,
    normalizer: Arc<Normalizer>,
}

impl Assembler {
    fn run(mut self) {
        let mut upstream_done = false;
        loop {
            if self.stop.load(Ordering::Acquire) {
                return;
            }

            if !upstream_done && !self.buffer.is_full() {
                // keep filling without blocking once a batch can be drawn
                let received = if self.buffer.can_draw(self.batch_size) {
                    match self.sample_rx.try_recv() {
                        Ok(sample) => Some(sample),
                        Err(TryRecvError::Empty) => None,
                        Err(TryRecvError::Disconnected) => {
                            upstream_done = true;
                            None
                        }
                    }
                } else {
                    match self.sample_rx.recv_timeout(POLL_INTERVAL) {
                        Ok(sample) => Some(sample),
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => {
                            upstream_done = true;
                            None
                        }
                    }
                };
                match received {
                    Some(Ok(sample)) => {
                        // cannot fail: the buffer is not full
                        let _ = self.buffer.push(sample);
                        continue;
                    }
                    Some(Err(e)) => {
                        send_until_stopped(&self.batch_tx, Err(e), &self.stop);
                        return;
                    }
                    None => {}
                }
            }

            let draining = upstream_done && self.buffer.len() >= self.batch_size;
            if self.buffer.can_draw(self.batch_size) || draining {
                let batch = self.assemble();
                if !send_until_stopped(&self.batch_tx, batch, &self.stop) {
                    return;
                }
            } else if upstream_done {
                log::debug!("input exhausted, dropping {} buffered samples", self.buffer.len());
                return;
            }
        }
    }

    fn assemble(&mut self) -> Result<Batch> {
        let samples = self.buffer.draw(self.batch_size);
        let mut batch = Batch::from_samples(&samples, self.num_act)?;
        self.normalizer.normalize_batch(&mut batch);
        Ok(batch)
    }
}

#[derive(Debug, Clone)]
pub struct DatasetConfig {
    pub shape: RecordShape,
    pub scale: f32,
    pub batcher: BatcherConfig,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            shape: RecordShape::default(),
            scale: DEFAULT_SCALE,
            batcher: BatcherConfig::default(),
        }
    }
}

/// Batched, shuffled and mean-normalized records of one data directory
pub struct Dataset {
    batcher: Batcher,
    normalizer: Arc<Normalizer>,
}

impl Dataset {
    pub fn open(
        directory: &Path,
        num_act: usize,
        mean_path: &Path,
        config: DatasetConfig,
    ) -> Result<Self> {
        let mean = MeanImage::load(mean_path)?;
        Self::with_mean(directory, num_act, mean, config)
    }

    pub fn with_mean(
        directory: &Path,
        num_act: usize,
        mean: impl Into<Arc<MeanImage>>,
        config: DatasetConfig,
    ) -> Result<Self> {
        let reader = RecordReader::open(directory, config.shape, num_act)?;
        let normalizer = Arc::new(Normalizer::new(mean, &config.shape, config.scale)?);
        let batcher = Batcher::start(reader, Arc::clone(&normalizer), config.batcher)?;
        Ok(Self { batcher, normalizer })
    }

    pub fn next_batch(&self) -> Result<Batch> {
        self.batcher.next_batch()
    }

    pub fn mean(&self) -> &Arc<MeanImage> {
        self.normalizer.mean()
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn batch_size(&self) -> usize {
        self.batcher.batch_size()
    }

    pub fn stop(&self) {
        self.batcher.stop()
    }

    pub fn join(self) -> Result<()> {
        self.batcher.join()
    }
}
