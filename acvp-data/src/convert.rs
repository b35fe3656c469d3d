//! Frame sequence to record shards.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::{concatenate, Array3, Axis};

use crate::frame_ring_buffer::FrameRingBuffer;
use crate::record::{Record, RecordWriter, RECORD_FILE_EXTENSION};
use crate::sequence::{frame_files, read_frame, ActionLog};
use crate::{FRAME_CHANNELS, FRAME_HEIGHT, FRAME_WIDTH, STATE_NUM_FRAMES};

pub const DEFAULT_RECORDS_PER_FILE: usize = 1000;

/// Writes one record per frame `t` that has `STATE_NUM_FRAMES` frames up to `t` and a successor:
/// `s_t` = frames `t-3..=t`, `a_t` = action `t`, `x_t_1` = frame `t+1`.
///
/// Records land in `output_dir/data-00000.tfrecords`, `data-00001.tfrecords`, ..., each holding at
/// most `records_per_file` records. Returns the total number of records written.
pub fn convert_sequence(
    input_dir: &Path,
    output_dir: &Path,
    records_per_file: usize,
) -> Result<usize> {
    if records_per_file == 0 {
        Err(crate::DataError::InvalidConfig("records_per_file must be positive".to_string()))?;
    }
    fs::create_dir_all(output_dir).with_context(|| format!("creating '{}'", output_dir.display()))?;

    let files = frame_files(input_dir)?;
    let mut actions = ActionLog::open(input_dir)?;
    let blank = Array3::<u8>::zeros((FRAME_HEIGHT, FRAME_WIDTH, FRAME_CHANNELS));
    // one frame beyond the state window, for the prediction target
    let mut frames = FrameRingBuffer::new(STATE_NUM_FRAMES + 1, blank);
    let mut action_history = FrameRingBuffer::new(STATE_NUM_FRAMES + 1, 0_i64);

    let mut writer: Option<RecordWriter> = None;
    let mut shard = 0;
    let mut in_shard = 0;
    let mut total = 0;

    for path in files {
        frames.add(read_frame(&path)?);
        action_history.add(actions.next_action()?);
        if !frames.is_full() {
            continue;
        }

        let state_views: Vec<_> = frames.iter().take(STATE_NUM_FRAMES).map(|f| f.view()).collect();
        let record = Record {
            state: concatenate(Axis(2), &state_views)?,
            action: *action_history.get(1),
            next_frame: frames.newest().clone(),
        };

        if writer.is_none() {
            let file = output_dir.join(format!("data-{shard:05}.{RECORD_FILE_EXTENSION}"));
            log::debug!("writing '{}'", file.display());
            writer = Some(RecordWriter::create(&file)?);
        }
        if let Some(w) = writer.as_mut() {
            w.write(&record)?;
        }
        in_shard += 1;
        total += 1;

        if in_shard == records_per_file {
            if let Some(w) = writer.take() {
                w.finish()?;
            }
            shard += 1;
            in_shard = 0;
        }
    }
    if let Some(w) = writer.take() {
        w.finish()?;
    }

    log::info!(
        "converted '{}' into {} records in '{}'",
        input_dir.display(),
        total,
        output_dir.display()
    );
    Ok(total)
}
