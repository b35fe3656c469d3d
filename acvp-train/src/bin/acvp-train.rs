use anyhow::Result;
use clap::Parser;

use acvp_train::cli::TrainArgs;
use acvp_train::log::init_logging;
use acvp_train::model::VideoPredictionModel;
use acvp_train::trainer::{Parameter, Trainer};

fn train<M: VideoPredictionModel>(
    param: Parameter,
    model: M,
) -> Result<()> {
    let mut trainer = Trainer::new(param, model)?;
    let result = trainer.run();
    // shut down in either case
    let model = trainer.shutdown()?;
    result?;
    log::info!("finished at global step {}", model.global_step());
    Ok(())
}

#[cfg(feature = "tensorflow")]
fn main() -> Result<()> {
    use acvp_train::model::baseline::LastFrameModel;
    use acvp_train::model::tensorflow::TensorflowVideoPredictionModel;

    init_logging();
    let args = TrainArgs::parse();
    match &args.model {
        Some(dir) => train(args.parameter(), TensorflowVideoPredictionModel::load_model(dir)?),
        None => train(args.parameter(), LastFrameModel::new()),
    }
}

#[cfg(not(feature = "tensorflow"))]
fn main() -> Result<()> {
    use acvp_train::model::baseline::LastFrameModel;

    init_logging();
    let args = TrainArgs::parse();
    if args.model.is_some() {
        anyhow::bail!("--model needs a build with the 'tensorflow' feature");
    }
    log::warn!("training the last-frame baseline; no tensor engine in this build");
    train(args.parameter(), LastFrameModel::new())
}
