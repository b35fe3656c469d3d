use std::fs;

use anyhow::{anyhow, Context, Result};
use ndarray::{s, Array4};

use acvp_data::{Batch, FRAME_CHANNELS};

use crate::model::{l2_loss, StepOutput, VideoPredictionModel};

const CHECKPOINT_KEY: &str = "global_step";

/// Framework-free stand-in for the network: predicts that the newest state frame repeats.
///
/// Nothing is learned; the learning rate is ignored. It keeps the training loop, summaries and
/// checkpoint cadence runnable without a tensor engine.
#[derive(Debug, Default)]
pub struct LastFrameModel {
    global_step: u64,
}

impl LastFrameModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn predict(batch: &Batch) -> Result<Array4<f32>> {
        let channels = batch.state.dim().3;
        if channels < FRAME_CHANNELS {
            return Err(anyhow!("state has {} channels, less than one frame", channels));
        }
        Ok(batch.state.slice(s![.., .., .., channels - FRAME_CHANNELS..]).to_owned())
    }

    fn outputs(
        &self,
        batch: &Batch,
    ) -> Result<StepOutput> {
        let prediction = Self::predict(batch)?;
        Ok(StepOutput {
            loss: l2_loss(&prediction, &batch.next_frame),
            prediction,
            global_step: self.global_step,
        })
    }
}

impl VideoPredictionModel for LastFrameModel {
    fn train(
        &mut self,
        _batch: &Batch,
        _learning_rate: f32,
    ) -> Result<u64> {
        self.global_step += 1;
        Ok(self.global_step)
    }

    fn train_with_outputs(
        &mut self,
        batch: &Batch,
        learning_rate: f32,
    ) -> Result<StepOutput> {
        self.train(batch, learning_rate)?;
        self.outputs(batch)
    }

    fn evaluate(
        &mut self,
        batch: &Batch,
    ) -> Result<StepOutput> {
        self.outputs(batch)
    }

    fn global_step(&self) -> u64 {
        self.global_step
    }

    fn write_checkpoint(
        &self,
        file: &str,
    ) -> Result<String> {
        fs::write(file, format!("{CHECKPOINT_KEY}: {}\n", self.global_step))
            .with_context(|| format!("writing checkpoint '{file}'"))?;
        Ok(file.to_string())
    }

    fn read_checkpoint(
        &mut self,
        file: &str,
    ) -> Result<()> {
        let content = fs::read_to_string(file).with_context(|| format!("reading checkpoint '{file}'"))?;
        let step = content
            .lines()
            .find_map(|l| l.strip_prefix(CHECKPOINT_KEY)?.strip_prefix(':'))
            .ok_or_else(|| anyhow!("checkpoint '{file}' has no {CHECKPOINT_KEY}"))?;
        self.global_step = step.trim().parse().with_context(|| format!("checkpoint '{file}'"))?;
        Ok(())
    }
}
