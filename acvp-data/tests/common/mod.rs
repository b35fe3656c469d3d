use acvp_data::{BatcherConfig, DatasetConfig, RecordShape};

pub mod consts {
    pub const NUM_ACT: usize = 3;
    pub const BATCH_SIZE: usize = 32;
}

/// Full-size records, no normalization (zero mean, unit scale)
pub fn identity_config(
    batcher: BatcherConfig,
) -> DatasetConfig {
    DatasetConfig {
        shape: RecordShape::default(),
        scale: 1.0,
        batcher,
    }
}
