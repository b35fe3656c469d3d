use std::path::PathBuf;

use anyhow::{anyhow, Result};
use num_format::{CustomFormat, ToFormattedString};

use acvp_data::{BatcherConfig, Dataset, DatasetConfig};

use crate::format::number_format;
use crate::model::VideoPredictionModel;
use crate::supervisor::{on_cadence, Supervisor, TrainSummary};

/// Shuffle buffer of the test data, in test batches
const TEST_BUFFERED_BATCHES: usize = 4;

pub struct Parameter {
    /// Directory of the training `*.tfrecords`
    pub train: PathBuf,
    /// Directory of the test `*.tfrecords`
    pub test: PathBuf,
    /// Mean image (`.npy` or `.binaryproto`)
    pub mean: PathBuf,
    /// Size of the action space
    pub num_act: usize,
    pub lr: f32,
    /// Number of training iterations
    pub epoch: u64,
    pub batch_size: usize,
    pub test_batch_size: usize,
    /// Log the training loss and write summaries every n iterations
    pub show_per_epoch: u64,
    /// Evaluate one test batch every n iterations
    pub test_per_epoch: u64,
    /// Summary and checkpoint directory (`<log>/train`)
    pub log: PathBuf,
    pub num_threads: usize,
    /// Shuffle buffer size of the training data
    pub capacity: usize,
    pub save_model_steps: u64,
}

impl Default for Parameter {
    fn default() -> Self {
        Self {
            train: PathBuf::new(),
            test: PathBuf::new(),
            mean: PathBuf::new(),
            num_act: 0,
            lr: 1e-4,
            epoch: 15_000_000,
            batch_size: 32,
            test_batch_size: 64,
            show_per_epoch: 1_000,
            test_per_epoch: 2_000,
            log: PathBuf::from("example/log"),
            num_threads: 4,
            capacity: 10_000,
            save_model_steps: 10_000,
        }
    }
}

impl Parameter {
    fn train_config(&self) -> DatasetConfig {
        DatasetConfig {
            batcher: BatcherConfig {
                num_threads: self.num_threads,
                ..BatcherConfig::with_capacity(self.batch_size, self.capacity)
            },
            ..DatasetConfig::default()
        }
    }

    /// One test batch per evaluation; the buffer only needs a few of them
    fn test_config(&self) -> DatasetConfig {
        DatasetConfig {
            batcher: BatcherConfig::with_capacity(self.test_batch_size, TEST_BUFFERED_BATCHES * self.test_batch_size),
            ..DatasetConfig::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Initializing,
    Running,
    Terminating,
}

/// Drives the model through `epoch` training iterations on batches of the train dataset.
///
/// Owns both datasets (and with them all batcher threads), the model and the supervisor.
pub struct Trainer<M: VideoPredictionModel> {
    param: Parameter,
    model: M,
    train_data: Dataset,
    test_data: Dataset,
    supervisor: Supervisor,
    state: TrainerState,
    number_format: CustomFormat,
}

impl<M: VideoPredictionModel> Trainer<M> {
    pub fn new(
        param: Parameter,
        mut model: M,
    ) -> Result<Self> {
        log::info!("Create data flow from '{}'", param.train.display());
        let train_data = Dataset::open(&param.train, param.num_act, &param.mean, param.train_config())?;
        log::info!("Create test data flow from '{}'", param.test.display());
        let test_data = Dataset::open(&param.test, param.num_act, &param.mean, param.test_config())?;

        let mut supervisor = Supervisor::new(&param.log, param.save_model_steps)?;
        supervisor.restore(&mut model)?;

        let number_format = number_format()?;
        log::info!(
            "Create model for training [lr = {}, epochs = {}, batch_size = {}]",
            param.lr,
            param.epoch.to_formatted_string(&number_format),
            param.batch_size
        );

        Ok(Self {
            param,
            model,
            train_data,
            test_data,
            supervisor,
            state: TrainerState::Initializing,
            number_format,
        })
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Runs all `epoch` iterations. Any error ends the run.
    pub fn run(&mut self) -> Result<()> {
        if self.state != TrainerState::Initializing {
            return Err(anyhow!("trainer cannot run in state {:?}", self.state));
        }
        self.state = TrainerState::Running;
        let test_per_epoch = self.param.test_per_epoch;

        for epoch in 0..self.param.epoch {
            let batch = self.train_data.next_batch()?;
            if self.param.show_per_epoch > 0 && epoch % self.param.show_per_epoch == 0 {
                let out = self.model.train_with_outputs(&batch, self.param.lr)?;
                log::info!(
                    "Epoch {}: Training L2 loss = {}",
                    out.global_step.to_formatted_string(&self.number_format),
                    out.loss
                );
                let summary = TrainSummary {
                    loss: out.loss,
                    ground: &batch.next_frame,
                    prediction: &out.prediction,
                    normalizer: self.train_data.normalizer(),
                };
                self.supervisor.summary_computed(out.global_step, &summary)?;
            } else {
                self.model.train(&batch, self.param.lr)?;
            }

            on_cadence(epoch + 1, test_per_epoch, || self.test_step())?;
            self.supervisor.maybe_save(&self.model)?;
        }
        Ok(())
    }

    fn test_step(&mut self) -> Result<()> {
        let batch = self.test_data.next_batch()?;
        let out = self.model.evaluate(&batch)?;
        log::info!(
            "Epoch {}: Test L2 loss = {}",
            out.global_step.to_formatted_string(&self.number_format),
            out.loss
        );
        self.supervisor.add_scalar("test_loss", out.loss, out.global_step);
        Ok(())
    }

    /// Final checkpoint, then stops and joins every pipeline thread. Hands the model back.
    pub fn shutdown(mut self) -> Result<M> {
        self.state = TrainerState::Terminating;
        log::info!("trainer {:?} at global step {}", self.state, self.model.global_step());
        let Self {
            model,
            train_data,
            test_data,
            mut supervisor,
            ..
        } = self;

        let saved = supervisor.save(&model);
        let joined = train_data.join().and(test_data.join());
        supervisor.flush();
        saved?;
        joined?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_data_buffer_follows_test_batch_size() {
        let param = Parameter::default();
        let test = param.test_config().batcher;
        assert_eq!(test.batch_size, 64);
        assert_eq!(test.capacity, 256);
        assert!(test.validate().is_ok());

        let train = param.train_config().batcher;
        assert_eq!(train.capacity, 10_000);
        assert_eq!(train.num_threads, 4);
        assert!(train.validate().is_ok());
    }
}
