use std::fs;

use anyhow::{Context, Result};

use acvp_data::test::synthetic::SyntheticDataset;
use acvp_data::{Batch, RecordShape};
use acvp_train::model::baseline::LastFrameModel;
use acvp_train::model::{StepOutput, VideoPredictionModel};
use acvp_train::trainer::Parameter;

pub mod consts {
    pub const NUM_ACT: usize = 3;
}

/// Last-frame model that counts how the trainer drives it
#[derive(Default)]
pub struct RecordingModel {
    inner: LastFrameModel,
    pub plain_train_calls: usize,
    pub train_with_outputs_calls: usize,
    pub evaluate_calls: usize,
    pub learning_rates: Vec<f32>,
    pub batch_sizes: Vec<usize>,
}

impl VideoPredictionModel for RecordingModel {
    fn train(
        &mut self,
        batch: &Batch,
        learning_rate: f32,
    ) -> Result<u64> {
        self.plain_train_calls += 1;
        self.learning_rates.push(learning_rate);
        self.batch_sizes.push(batch.len());
        self.inner.train(batch, learning_rate)
    }

    fn train_with_outputs(
        &mut self,
        batch: &Batch,
        learning_rate: f32,
    ) -> Result<StepOutput> {
        self.train_with_outputs_calls += 1;
        self.learning_rates.push(learning_rate);
        self.batch_sizes.push(batch.len());
        self.inner.train_with_outputs(batch, learning_rate)
    }

    fn evaluate(
        &mut self,
        batch: &Batch,
    ) -> Result<StepOutput> {
        self.evaluate_calls += 1;
        self.inner.evaluate(batch)
    }

    fn global_step(&self) -> u64 {
        self.inner.global_step()
    }

    fn write_checkpoint(
        &self,
        file: &str,
    ) -> Result<String> {
        self.inner.write_checkpoint(file)
    }

    fn read_checkpoint(
        &mut self,
        file: &str,
    ) -> Result<()> {
        self.inner.read_checkpoint(file)
    }
}

/// Train and test record directories plus a scratch log directory
pub struct TrainingFixture {
    pub train: SyntheticDataset,
    pub test: SyntheticDataset,
    pub log: tempfile::TempDir,
}

impl TrainingFixture {
    pub fn create() -> Result<Self> {
        Ok(Self {
            train: SyntheticDataset::create(64, 4, consts::NUM_ACT, RecordShape::default())?,
            test: SyntheticDataset::create(16, 1, consts::NUM_ACT, RecordShape::default())?,
            log: tempfile::tempdir().context("log directory")?,
        })
    }

    pub fn parameter(&self) -> Parameter {
        Parameter {
            train: self.train.train_dir(),
            test: self.test.train_dir(),
            mean: self.train.mean_path(),
            num_act: consts::NUM_ACT,
            lr: 1e-3,
            epoch: 20,
            batch_size: 4,
            test_batch_size: 4,
            show_per_epoch: 5,
            test_per_epoch: 10,
            log: self.log.path().to_path_buf(),
            num_threads: 2,
            capacity: 40,
            save_model_steps: 8,
        }
    }

    pub fn checkpoint_index(&self) -> Result<String> {
        Ok(fs::read_to_string(self.log.path().join("train/checkpoint"))?)
    }
}
