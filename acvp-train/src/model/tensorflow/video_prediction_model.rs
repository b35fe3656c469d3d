use std::path::Path;

use anyhow::{anyhow, Result};
use itertools::Itertools;
use ndarray::{Array, Array4, Dimension};
use tensorflow::{Graph, SavedModelBundle, SessionOptions, Tensor, TensorType};

use acvp_data::Batch;

use crate::model::tensorflow::model_function::ModelFunction;
use crate::model::{StepOutput, VideoPredictionModel};

const BATCH_INPUTS: [&str; 3] = ["s_t", "a_t", "x_t_1"];
const TRAIN_INPUTS: [&str; 4] = ["s_t", "a_t", "x_t_1", "learning_rate"];
const STEP_OUTPUTS: [&str; 2] = ["loss", "prediction"];

pub struct TensorflowVideoPredictionModel {
    graph: Graph,
    bundle: SavedModelBundle,
    fn_train_model: ModelFunction<'static>,
    fn_evaluate: ModelFunction<'static>,
    fn_global_step: ModelFunction<'static>,
    fn_write_checkpoint: ModelFunction<'static>,
    fn_read_checkpoint: ModelFunction<'static>,
    /// mirrors the graph's step counter; read from the graph on load and restore
    global_step: u64,
}

impl TensorflowVideoPredictionModel {
    /// Loads a saved model (tag `serve`).
    ///
    /// # Arguments
    /// * `model_dir` directory of the saved model, exporting the signatures `train_model`,
    ///   `evaluate`, `global_step`, `write_checkpoint` and `read_checkpoint`
    pub fn load_model(model_dir: &Path) -> Result<Self> {
        let mut graph = Graph::new();
        let model_dir_str = model_dir
            .to_str()
            .ok_or_else(|| anyhow!("model path '{}' is not valid UTF-8", model_dir.display()))?;
        let bundle = SavedModelBundle::load(&SessionOptions::new(), ["serve"], &mut graph, model_dir_str)?;

        log::debug!(
            "available operations: {}",
            graph.operation_iter().filter_map(|o| o.name().ok()).join(",")
        );

        let mut model = TensorflowVideoPredictionModel {
            graph,
            bundle,
            fn_train_model: ModelFunction::new("train_model", &TRAIN_INPUTS, &STEP_OUTPUTS)?,
            fn_evaluate: ModelFunction::new("evaluate", &BATCH_INPUTS, &STEP_OUTPUTS)?,
            fn_global_step: ModelFunction::new("global_step", &[], &["step"])?,
            fn_write_checkpoint: ModelFunction::new("write_checkpoint", &["file"], &["file"])?,
            fn_read_checkpoint: ModelFunction::new("read_checkpoint", &["file"], &["status"])?,
            global_step: 0,
        };
        model.global_step = model.fetch_global_step()?;
        log::info!("loaded model '{}' at global step {}", model_dir.display(), model.global_step);
        Ok(model)
    }

    fn fetch_global_step(&self) -> Result<u64> {
        let r = self.fn_global_step.apply::<f32, i64>(
            &self.graph,
            self.bundle.meta_graph_def(),
            &self.bundle.session,
            &[],
        )?;
        let step = r.first().and_then(|t| t.first().copied()).ok_or_else(|| anyhow!("empty global_step result"))?;
        Ok(step.max(0) as u64)
    }

    fn run_step(
        &self,
        batch: &Batch,
        learning_rate: Option<f32>,
    ) -> Result<(f32, Array4<f32>)> {
        let s_t = to_tensor(&batch.state)?;
        let a_t = to_tensor(&batch.action)?;
        let x_t_1 = to_tensor(&batch.next_frame)?;

        let r: Vec<Tensor<f32>> = match learning_rate {
            Some(lr) => self.fn_train_model.apply(
                &self.graph,
                self.bundle.meta_graph_def(),
                &self.bundle.session,
                &[&s_t, &a_t, &x_t_1, &Tensor::from(lr)],
            )?,
            None => self.fn_evaluate.apply(
                &self.graph,
                self.bundle.meta_graph_def(),
                &self.bundle.session,
                &[&s_t, &a_t, &x_t_1],
            )?,
        };
        let [loss, prediction] = <[Tensor<f32>; 2]>::try_from(r)
            .map_err(|r| anyhow!("expected loss and prediction, got {} outputs", r.len()))?;
        log::trace!("loss: {:?}", loss);

        let loss = loss.first().copied().ok_or_else(|| anyhow!("empty loss tensor"))?;
        Ok((loss, to_array4(&prediction)?))
    }
}

fn to_tensor<D: Dimension>(a: &Array<f32, D>) -> Result<Tensor<f32>> {
    let dims = a.shape().iter().map(|&d| d as u64).collect_vec();
    let standard = a.as_standard_layout();
    let values = standard.as_slice().ok_or_else(|| anyhow!("array is not contiguous"))?;
    Ok(Tensor::new(&dims).with_values(values)?)
}

fn to_array4<T: TensorType + Copy>(t: &Tensor<T>) -> Result<Array4<T>> {
    let dims = t.dims().iter().map(|&d| d as usize).collect_vec();
    let [b, h, w, c] = <[usize; 4]>::try_from(dims.as_slice())
        .map_err(|_| anyhow!("expected a 4-dimensional prediction, got dims {:?}", t.dims()))?;
    Ok(Array4::from_shape_vec((b, h, w, c), t.to_vec())?)
}

impl VideoPredictionModel for TensorflowVideoPredictionModel {
    fn train(
        &mut self,
        batch: &Batch,
        learning_rate: f32,
    ) -> Result<u64> {
        self.run_step(batch, Some(learning_rate))?;
        self.global_step += 1;
        Ok(self.global_step)
    }

    fn train_with_outputs(
        &mut self,
        batch: &Batch,
        learning_rate: f32,
    ) -> Result<StepOutput> {
        let (loss, prediction) = self.run_step(batch, Some(learning_rate))?;
        self.global_step += 1;
        Ok(StepOutput {
            loss,
            prediction,
            global_step: self.global_step,
        })
    }

    fn evaluate(
        &mut self,
        batch: &Batch,
    ) -> Result<StepOutput> {
        let (loss, prediction) = self.run_step(batch, None)?;
        Ok(StepOutput {
            loss,
            prediction,
            global_step: self.global_step,
        })
    }

    fn global_step(&self) -> u64 {
        self.global_step
    }

    fn write_checkpoint(
        &self,
        file: &str,
    ) -> Result<String> {
        let r = self.fn_write_checkpoint.apply::<String, String>(
            &self.graph,
            self.bundle.meta_graph_def(),
            &self.bundle.session,
            &[&Tensor::from(file.to_string())],
        )?;
        r.first()
            .and_then(|t| t.first().cloned())
            .ok_or_else(|| anyhow!("write_checkpoint returned nothing"))
    }

    fn read_checkpoint(
        &mut self,
        file: &str,
    ) -> Result<()> {
        self.fn_read_checkpoint.apply::<String, String>(
            &self.graph,
            self.bundle.meta_graph_def(),
            &self.bundle.session,
            &[&Tensor::from(file.to_string())],
        )?;
        self.global_step = self.fetch_global_step()?;
        Ok(())
    }
}
