use std::path::PathBuf;

use clap::Parser;

use acvp_data::convert::DEFAULT_RECORDS_PER_FILE;

use crate::trainer::Parameter;

/// Train an action-conditional video prediction model
#[derive(Parser, Debug)]
#[command(name = "acvp-train")]
#[command(version)]
#[command(about = "Train an action-conditional video prediction model", long_about = None)]
pub struct TrainArgs {
    /// Summary and checkpoint directory
    #[arg(long, default_value = "example/log")]
    pub log: PathBuf,

    /// Training data directory
    #[arg(long, required = true)]
    pub train: PathBuf,

    /// Testing data directory
    #[arg(long, required = true)]
    pub test: PathBuf,

    /// Image mean path (.npy or .binaryproto)
    #[arg(long, required = true)]
    pub mean: PathBuf,

    /// Number of actions
    #[arg(long = "num_act", required = true)]
    pub num_act: usize,

    /// Learning rate
    #[arg(long, default_value = "1e-4")]
    pub lr: f32,

    /// Number of training iterations
    #[arg(long, default_value = "15000000")]
    pub epoch: u64,

    #[arg(long = "show_per_epoch", default_value = "1000")]
    pub show_per_epoch: u64,

    #[arg(long = "test_per_epoch", default_value = "2000")]
    pub test_per_epoch: u64,

    #[arg(long = "batch_size", default_value = "32")]
    pub batch_size: usize,

    #[arg(long = "test_batch_size", default_value = "64")]
    pub test_batch_size: usize,

    /// Saved model directory; without the `tensorflow` feature the last-frame baseline is trained
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Record reader threads of the training data
    #[arg(long = "num_threads", default_value = "4")]
    pub num_threads: usize,

    /// Shuffle buffer capacity of the training data
    #[arg(long, default_value = "10000")]
    pub capacity: usize,

    /// Write a checkpoint every n global steps
    #[arg(long = "save_model_steps", default_value = "10000")]
    pub save_model_steps: u64,
}

impl TrainArgs {
    pub fn parameter(&self) -> Parameter {
        Parameter {
            train: self.train.clone(),
            test: self.test.clone(),
            mean: self.mean.clone(),
            num_act: self.num_act,
            lr: self.lr,
            epoch: self.epoch,
            batch_size: self.batch_size,
            test_batch_size: self.test_batch_size,
            show_per_epoch: self.show_per_epoch,
            test_per_epoch: self.test_per_epoch,
            log: self.log.clone(),
            num_threads: self.num_threads,
            capacity: self.capacity,
            save_model_steps: self.save_model_steps,
        }
    }
}

/// Convert a frame-sequence directory (numbered PNG frames + act.log) into tfrecord shards
#[derive(Parser, Debug)]
#[command(name = "acvp-convert")]
#[command(version)]
pub struct ConvertArgs {
    /// Directory with the frames and act.log
    #[arg(long, required = true)]
    pub input: PathBuf,

    /// Target directory of the data-NNNNN.tfrecords files
    #[arg(long, required = true)]
    pub output: PathBuf,

    #[arg(long = "records_per_file", default_value_t = DEFAULT_RECORDS_PER_FILE)]
    pub records_per_file: usize,
}
