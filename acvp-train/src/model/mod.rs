use anyhow::Result;
use ndarray::Array4;

use acvp_data::Batch;

pub mod baseline;
#[cfg(feature = "tensorflow")]
pub mod tensorflow;

/// Result of a step that also computes the loss and the predicted frames
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// L2 loss of the batch
    pub loss: f32,
    /// Predicted next frames, normalized like the batch: `[batch_size, height, width, channels]`
    pub prediction: Array4<f32>,
    pub global_step: u64,
}

/// 'Physical' video prediction model abstraction.
///
/// The network itself lives behind this interface. Batches arrive normalized with one-hot actions.
pub trait VideoPredictionModel {
    /// One optimizer update; returns the new global step
    fn train(
        &mut self,
        batch: &Batch,
        learning_rate: f32,
    ) -> Result<u64>;

    /// One optimizer update which additionally reports loss and prediction
    fn train_with_outputs(
        &mut self,
        batch: &Batch,
        learning_rate: f32,
    ) -> Result<StepOutput>;

    /// Loss and prediction without updating the model
    fn evaluate(
        &mut self,
        batch: &Batch,
    ) -> Result<StepOutput>;

    fn global_step(&self) -> u64;

    /// Persists the model state; returns the written checkpoint path
    fn write_checkpoint(
        &self,
        file: &str,
    ) -> Result<String>;

    fn read_checkpoint(
        &mut self,
        file: &str,
    ) -> Result<()>;
}

/// `0.5 * sum((prediction - target)^2) / batch_size`
pub fn l2_loss(
    prediction: &Array4<f32>,
    target: &Array4<f32>,
) -> f32 {
    let batch_size = prediction.dim().0.max(1) as f32;
    let sum: f32 = prediction
        .iter()
        .zip(target.iter())
        .map(|(p, t)| (p - t) * (p - t))
        .sum();
    0.5 * sum / batch_size
}
