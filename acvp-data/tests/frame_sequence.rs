use anyhow::Result;

use acvp_data::convert::convert_sequence;
use acvp_data::test::synthetic::write_frame_sequence;
use acvp_data::{BatcherConfig, Dataset, Layout, MeanImage, SequenceLoader};

use crate::common::consts::NUM_ACT;
use crate::common::identity_config;

mod common;

/// Both paths over the same frames agree on the newest state frame
#[test]
fn test_converted_records_match_the_sliding_window() -> Result<()> {
    let frames = tempfile::tempdir()?;
    let records = tempfile::tempdir()?;
    write_frame_sequence(frames.path(), 12, NUM_ACT)?;
    let count = convert_sequence(frames.path(), records.path(), 4)?;
    assert_eq!(count, 8);

    let steps = SequenceLoader::new(frames.path(), NUM_ACT, MeanImage::zeros(), Layout::ChannelsLast)
        .steps(None)?
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(steps.len(), 9);

    let batcher = BatcherConfig {
        num_epochs: Some(1),
        shuffle_files: false,
        num_threads: 1,
        seed: Some(0),
        min_after_dequeue: 0,
        ..BatcherConfig::with_capacity(count, count + 1)
    };
    let dataset = Dataset::with_mean(records.path(), NUM_ACT, MeanImage::zeros(), identity_config(batcher))?;
    let batch = dataset.next_batch()?;
    assert_eq!(batch.len(), count);

    for row in 0..batch.len() {
        // identify the record by its full state, then find the window ending at the same frame
        let step = steps
            .iter()
            .find(|s| (0..12).all(|c| (s.state[[40, 40, c]] * 255.0 - batch.state[[row, 40, 40, c]]).abs() < 1e-3))
            .expect("a sliding window with the same frames");
        assert_eq!(step.action_ids.last().copied(), Some(batch.action_ids[row]));
    }
    dataset.join()
}
