pub mod batcher;
pub mod convert;
pub mod error;
pub mod frame_ring_buffer;
pub mod mean;
pub mod normalize;
pub mod one_hot;
pub mod proto;
pub mod record;
pub mod sequence;
pub mod shuffle_buffer;

pub mod test;

pub use batcher::{Batch, Batcher, BatcherConfig, Dataset, DatasetConfig};
pub use error::DataError;
pub use mean::MeanImage;
pub use normalize::{Normalizer, DEFAULT_SCALE};
pub use record::{Record, RecordReader, RecordShape, RecordWriter, Sample};
pub use sequence::{Layout, SequenceLoader, SequenceStep};

/// Frame height in pixels, fixed end-to-end
pub const FRAME_HEIGHT: usize = 84;
/// Frame width in pixels, fixed end-to-end
pub const FRAME_WIDTH: usize = 84;
/// Color channels per frame (BGR)
pub const FRAME_CHANNELS: usize = 3;
/// Series of frames representing one state
pub const STATE_NUM_FRAMES: usize = 4;

#[cfg(test)]
#[ctor::ctor]
fn init() {
    use log::LevelFilter;
    let _ = env_logger::builder()
        .format_timestamp_secs()
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .is_test(true)
        .try_init();
}
