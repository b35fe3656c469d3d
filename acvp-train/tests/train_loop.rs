use anyhow::Result;

use acvp_train::model::baseline::LastFrameModel;
use acvp_train::model::VideoPredictionModel;
use acvp_train::trainer::{Trainer, TrainerState};

use crate::common::{RecordingModel, TrainingFixture};

mod common;

#[test]
fn test_cadences() -> Result<()> {
    let fixture = TrainingFixture::create()?;
    let mut trainer = Trainer::new(fixture.parameter(), RecordingModel::default())?;
    assert_eq!(trainer.state(), TrainerState::Initializing);
    trainer.run()?;
    assert_eq!(trainer.state(), TrainerState::Running);
    let model = trainer.shutdown()?;

    // summaries on iterations 0, 5, 10, 15; test batches after iterations 10 and 20
    assert_eq!(model.train_with_outputs_calls, 4);
    assert_eq!(model.plain_train_calls, 16);
    assert_eq!(model.evaluate_calls, 2);
    assert_eq!(model.global_step(), 20);
    assert!(model.learning_rates.iter().all(|&lr| lr == 1e-3));
    assert!(model.batch_sizes.iter().all(|&b| b == 4));

    // cadence saves at 8 and 16, the final one at 20
    let index = fixture.checkpoint_index()?;
    assert!(index.contains("model_checkpoint_path: \"model.ckpt-20\""));
    for step in [8, 16, 20] {
        assert!(index.contains(&format!("all_model_checkpoint_paths: \"model.ckpt-{step}\"")));
    }
    Ok(())
}

#[test]
fn test_resume_from_latest_checkpoint() -> Result<()> {
    let fixture = TrainingFixture::create()?;
    let mut trainer = Trainer::new(fixture.parameter(), LastFrameModel::new())?;
    trainer.run()?;
    trainer.shutdown()?;

    let mut param = fixture.parameter();
    param.epoch = 5;
    let mut trainer = Trainer::new(param, LastFrameModel::new())?;
    assert_eq!(trainer.model().global_step(), 20);
    trainer.run()?;
    let model = trainer.shutdown()?;
    assert_eq!(model.global_step(), 25);
    Ok(())
}

#[test]
fn test_run_only_once() -> Result<()> {
    let fixture = TrainingFixture::create()?;
    let mut param = fixture.parameter();
    param.epoch = 1;
    let mut trainer = Trainer::new(param, LastFrameModel::new())?;
    trainer.run()?;
    assert!(trainer.run().is_err());
    trainer.shutdown()?;
    Ok(())
}

#[test]
fn test_missing_data_fails_at_startup() -> Result<()> {
    let fixture = TrainingFixture::create()?;
    let mut param = fixture.parameter();
    param.train = fixture.log.path().join("nowhere");
    assert!(Trainer::new(param, LastFrameModel::new()).is_err());
    Ok(())
}
