use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use itertools::Itertools;
use ndarray::{s, Array4, Axis};
use tensorboard_rs::summary_writer::SummaryWriter;

use acvp_data::Normalizer;

use crate::model::VideoPredictionModel;

pub const TRAIN_SUBDIR: &str = "train";
pub const CHECKPOINT_INDEX_FILE: &str = "checkpoint";
pub const CHECKPOINT_BASENAME: &str = "model.ckpt";
pub const KEEP_CHECKPOINTS: usize = 5;
pub const MAX_SUMMARY_IMAGES: usize = 3;

const INDEX_LATEST_KEY: &str = "model_checkpoint_path";
const INDEX_ALL_KEY: &str = "all_model_checkpoint_paths";

/// `true` on every `every`-th step (never on step 0)
pub fn on_cadence<F>(
    step: u64,
    every: u64,
    callback: F,
) -> Result<bool>
where
    F: FnOnce() -> Result<()>,
{
    if every == 0 || step == 0 || step % every != 0 {
        return Ok(false);
    }
    callback()?;
    Ok(true)
}

/// What a summary step reports: the loss plus ground truth and predicted frames (normalized)
pub struct TrainSummary<'a> {
    pub loss: f32,
    pub ground: &'a Array4<f32>,
    pub prediction: &'a Array4<f32>,
    pub normalizer: &'a Normalizer,
}

/// Checkpoint and summary harness around a training run.
///
/// Owns `<logdir>/train/`: checkpoints `model.ckpt-<step>`, the `checkpoint` index file and the
/// tensorboard event files.
pub struct Supervisor {
    train_dir: PathBuf,
    save_model_steps: u64,
    last_saved_step: u64,
    /// checkpoint names relative to `train_dir`, oldest first
    checkpoints: VecDeque<String>,
    writer: SummaryWriter,
}

impl Supervisor {
    pub fn new(
        logdir: &Path,
        save_model_steps: u64,
    ) -> Result<Self> {
        let train_dir = logdir.join(TRAIN_SUBDIR);
        fs::create_dir_all(&train_dir).with_context(|| format!("creating '{}'", train_dir.display()))?;
        let checkpoints = read_index(&train_dir)?.map(|(_, all)| all).unwrap_or_default();
        let writer = SummaryWriter::new(&train_dir);
        Ok(Self {
            train_dir,
            save_model_steps,
            last_saved_step: 0,
            checkpoints: checkpoints.into(),
            writer,
        })
    }

    pub fn train_dir(&self) -> &Path {
        &self.train_dir
    }

    /// Path of the newest checkpoint, if any was recorded
    pub fn latest_checkpoint(&self) -> Option<PathBuf> {
        self.checkpoints.back().map(|c| self.train_dir.join(c))
    }

    /// Loads the newest checkpoint into `model`; `None` when training starts from scratch
    pub fn restore<M: VideoPredictionModel>(
        &mut self,
        model: &mut M,
    ) -> Result<Option<String>> {
        let Some(latest) = self.latest_checkpoint() else {
            log::info!("no checkpoint in '{}', starting from scratch", self.train_dir.display());
            return Ok(None);
        };
        let token = path_str(&latest)?;
        model.read_checkpoint(&token)?;
        self.last_saved_step = model.global_step();
        log::info!("restored '{}' at global step {}", token, model.global_step());
        Ok(Some(token))
    }

    /// Writes a checkpoint of the current global step and rotates out the oldest ones
    pub fn save<M: VideoPredictionModel>(
        &mut self,
        model: &M,
    ) -> Result<String> {
        let step = model.global_step();
        let name = format!("{CHECKPOINT_BASENAME}-{step}");
        let token = model.write_checkpoint(&path_str(&self.train_dir.join(&name))?)?;

        self.checkpoints.retain(|c| c != &name);
        self.checkpoints.push_back(name);
        while self.checkpoints.len() > KEEP_CHECKPOINTS {
            if let Some(old) = self.checkpoints.pop_front() {
                self.remove_checkpoint_files(&old)?;
            }
        }
        self.write_index()?;
        self.last_saved_step = step;
        log::info!("saved checkpoint '{}'", token);
        Ok(token)
    }

    /// Saves when `save_model_steps` steps have passed since the last save
    pub fn maybe_save<M: VideoPredictionModel>(
        &mut self,
        model: &M,
    ) -> Result<Option<String>> {
        if self.save_model_steps > 0 && model.global_step() >= self.last_saved_step + self.save_model_steps {
            return self.save(model).map(Some);
        }
        Ok(None)
    }

    /// Scalar `loss` plus up to [MAX_SUMMARY_IMAGES] `ground`/`pred` images
    pub fn summary_computed(
        &mut self,
        step: u64,
        summary: &TrainSummary,
    ) -> Result<()> {
        let step = step as usize;
        self.writer.add_scalar("loss", summary.loss, step);
        for (tag, frames) in [("ground", summary.ground), ("pred", summary.prediction)] {
            for (i, frame) in frames.axis_iter(Axis(0)).take(MAX_SUMMARY_IMAGES).enumerate() {
                let (h, w, c) = frame.dim();
                if c != 3 {
                    return Err(anyhow!("summary image '{tag}' has {c} channels, expected 3"));
                }
                let pixels = summary.normalizer.denormalize_frame(frame);
                // stored as BGR, tensorboard wants RGB
                let rgb: Vec<u8> = pixels
                    .slice(s![.., .., ..;-1])
                    .iter()
                    .map(|v| v.round().clamp(0.0, 255.0) as u8)
                    .collect();
                self.writer.add_image(&format!("{tag}/{i}"), &rgb, &[3, h, w], step);
            }
        }
        Ok(())
    }

    pub fn add_scalar(
        &mut self,
        tag: &str,
        value: f32,
        step: u64,
    ) {
        self.writer.add_scalar(tag, value, step as usize);
    }

    pub fn flush(&mut self) {
        self.writer.flush();
    }

    fn remove_checkpoint_files(
        &self,
        name: &str,
    ) -> Result<()> {
        // `model.ckpt-20` itself plus `model.ckpt-20.index`, `model.ckpt-20.data-*`, but never `model.ckpt-200`
        let base = glob::Pattern::escape(&path_str(&self.train_dir.join(name))?);
        let exact = glob::glob(&base)?;
        let suffixed = glob::glob(&format!("{base}.*"))?;
        for file in exact.chain(suffixed) {
            let file = file?;
            log::debug!("removing old checkpoint file '{}'", file.display());
            if file.is_dir() {
                fs::remove_dir_all(&file)?;
            } else {
                fs::remove_file(&file)?;
            }
        }
        Ok(())
    }

    fn write_index(&self) -> Result<()> {
        let latest = self.checkpoints.back().map(|c| (INDEX_LATEST_KEY, c));
        let all = self.checkpoints.iter().map(|c| (INDEX_ALL_KEY, c));
        let content = latest
            .into_iter()
            .chain(all)
            .map(|(key, c)| format!("{key}: \"{c}\"\n"))
            .join("");
        let path = self.train_dir.join(CHECKPOINT_INDEX_FILE);
        fs::write(&path, content).with_context(|| format!("writing '{}'", path.display()))?;
        Ok(())
    }
}

/// `(latest, all)` from the checkpoint index file, `None` if there is none
fn read_index(train_dir: &Path) -> Result<Option<(String, Vec<String>)>> {
    let path = train_dir.join(CHECKPOINT_INDEX_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path).with_context(|| format!("reading '{}'", path.display()))?;
    let mut latest = None;
    let mut all = vec![];
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim() {
            INDEX_LATEST_KEY => latest = Some(value),
            INDEX_ALL_KEY => all.push(value),
            _ => {}
        }
    }
    let Some(latest) = latest else {
        return Ok(None);
    };
    // the newest one goes last
    all.retain(|c| c != &latest);
    all.push(latest.clone());
    Ok(Some((latest, all)))
}

fn path_str(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("path '{}' is not valid UTF-8", path.display()))
}

#[cfg(test)]
mod tests {
    use acvp_data::{Batch, MeanImage, RecordShape};
    use ndarray::Array2;

    use crate::model::baseline::LastFrameModel;

    use super::*;

    fn batch() -> Batch {
        Batch {
            state: Array4::zeros((4, 84, 84, 12)),
            action: Array2::zeros((4, 3)),
            next_frame: Array4::zeros((4, 84, 84, 3)),
            action_ids: vec![0; 4],
        }
    }

    fn step_to(
        model: &mut LastFrameModel,
        step: u64,
    ) {
        while model.global_step() < step {
            model.train(&batch(), 1e-4).unwrap();
        }
    }

    #[test]
    fn test_cadence() {
        let mut calls = 0;
        for step in 0..=10 {
            on_cadence(step, 5, || {
                calls += 1;
                Ok(())
            })
            .unwrap();
        }
        assert_eq!(calls, 2);
        assert!(!on_cadence(3, 0, || Ok(())).unwrap());
    }

    #[test]
    fn test_save_then_restore() {
        let logdir = tempfile::tempdir().unwrap();
        let mut model = LastFrameModel::new();
        step_to(&mut model, 7);
        let mut supervisor = Supervisor::new(logdir.path(), 100).unwrap();
        let token = supervisor.save(&model).unwrap();
        assert!(token.ends_with("model.ckpt-7"));

        let index = fs::read_to_string(logdir.path().join("train/checkpoint")).unwrap();
        assert!(index.contains("model_checkpoint_path: \"model.ckpt-7\""));

        let mut supervisor = Supervisor::new(logdir.path(), 100).unwrap();
        let mut restored = LastFrameModel::new();
        assert_eq!(supervisor.restore(&mut restored).unwrap(), Some(token));
        assert_eq!(restored.global_step(), 7);
    }

    #[test]
    fn test_restore_without_checkpoint() {
        let logdir = tempfile::tempdir().unwrap();
        let mut supervisor = Supervisor::new(logdir.path(), 100).unwrap();
        let mut model = LastFrameModel::new();
        assert_eq!(supervisor.restore(&mut model).unwrap(), None);
        assert_eq!(model.global_step(), 0);
    }

    #[test]
    fn test_keeps_the_newest_checkpoints() {
        let logdir = tempfile::tempdir().unwrap();
        let mut supervisor = Supervisor::new(logdir.path(), 2).unwrap();
        let mut model = LastFrameModel::new();
        let mut saved = vec![];
        for step in 1..=20 {
            step_to(&mut model, step);
            if let Some(token) = supervisor.maybe_save(&model).unwrap() {
                saved.push(token);
            }
        }
        assert_eq!(saved.len(), 10);
        let train_dir = logdir.path().join(TRAIN_SUBDIR);
        for step in [2, 4, 6, 8, 10] {
            assert!(!train_dir.join(format!("model.ckpt-{step}")).exists());
        }
        for step in [12, 14, 16, 18, 20] {
            assert!(train_dir.join(format!("model.ckpt-{step}")).exists());
        }
        let (latest, all) = read_index(&train_dir).unwrap().unwrap();
        assert_eq!(latest, "model.ckpt-20");
        assert_eq!(all.len(), KEEP_CHECKPOINTS);
    }

    #[test]
    fn test_summary_is_written() {
        let logdir = tempfile::tempdir().unwrap();
        let mut supervisor = Supervisor::new(logdir.path(), 100).unwrap();
        let normalizer = Normalizer::new(MeanImage::zeros(), &RecordShape::default(), 1.0 / 255.0).unwrap();
        let frames = Array4::from_elem((5, 84, 84, 3), 0.5);
        let summary = TrainSummary {
            loss: 0.25,
            ground: &frames,
            prediction: &frames,
            normalizer: &normalizer,
        };
        supervisor.summary_computed(1, &summary).unwrap();
        supervisor.flush();

        let events = fs::read_dir(supervisor.train_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("tfevents"))
            .count();
        assert!(events >= 1);
    }
}
