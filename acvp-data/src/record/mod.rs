use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::{Array1, Array3};
use prost::Message;
use tensorboard_rs::record_writer::RecordWriter as FrameWriter;

use crate::error::DataError;
use crate::one_hot::{checked_index, one_hot};
use crate::proto::tensorflow::Example;
use crate::{FRAME_CHANNELS, FRAME_HEIGHT, FRAME_WIDTH, STATE_NUM_FRAMES};

pub mod example;
pub mod tfrecord;

use example::{bytes_feature, int64_feature, single_bytes, single_int64};
use tfrecord::TfRecordReader;

pub const RECORD_FILE_EXTENSION: &str = "tfrecords";

pub const FEATURE_ACTION: &str = "a_t";
pub const FEATURE_STATE: &str = "s_t";
pub const FEATURE_NEXT_FRAME: &str = "x_t_1";

/// Declared tensor shapes (height, width, channels) of the two image features
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordShape {
    pub state: [usize; 3],
    pub next_frame: [usize; 3],
}

impl Default for RecordShape {
    fn default() -> Self {
        Self {
            state: [FRAME_HEIGHT, FRAME_WIDTH, STATE_NUM_FRAMES * FRAME_CHANNELS],
            next_frame: [FRAME_HEIGHT, FRAME_WIDTH, FRAME_CHANNELS],
        }
    }
}

impl RecordShape {
    pub fn state_len(&self) -> usize {
        self.state.iter().product()
    }

    pub fn next_frame_len(&self) -> usize {
        self.next_frame.iter().product()
    }
}

/// One persisted training example, pixels as stored (u8, row-major H,W,C)
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub state: Array3<u8>,
    pub action: i64,
    pub next_frame: Array3<u8>,
}

/// A decoded record, ready for batching
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub state: Array3<f32>,
    pub action_id: usize,
    /// one-hot encoded `action_id`
    pub action: Array1<f32>,
    pub next_frame: Array3<f32>,
}

impl Record {
    pub fn to_example(&self) -> Example {
        example::example([
            (FEATURE_ACTION, int64_feature(self.action)),
            (FEATURE_STATE, bytes_feature(standard_bytes(&self.state))),
            (FEATURE_NEXT_FRAME, bytes_feature(standard_bytes(&self.next_frame))),
        ])
    }

    pub fn from_example(
        example: &Example,
        shape: &RecordShape,
    ) -> Result<Self> {
        let action = single_int64(example, FEATURE_ACTION)?;
        let state = to_array(single_bytes(example, FEATURE_STATE)?, shape.state, FEATURE_STATE)?;
        let next_frame = to_array(single_bytes(example, FEATURE_NEXT_FRAME)?, shape.next_frame, FEATURE_NEXT_FRAME)?;
        Ok(Record { state, action, next_frame })
    }

    pub fn decode(
        payload: &[u8],
        shape: &RecordShape,
    ) -> Result<Self> {
        Self::from_example(&example::decode(payload)?, shape)
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_example().encode_to_vec()
    }

    /// Casts the pixels to f32 and one-hot encodes the action
    pub fn to_sample(
        &self,
        num_act: usize,
    ) -> Result<Sample> {
        Ok(Sample {
            state: self.state.mapv(f32::from),
            action_id: checked_index(self.action, num_act)?,
            action: one_hot(self.action, num_act)?,
            next_frame: self.next_frame.mapv(f32::from),
        })
    }
}

fn standard_bytes(a: &Array3<u8>) -> Vec<u8> {
    a.iter().copied().collect()
}

fn to_array(
    bytes: &[u8],
    shape: [usize; 3],
    what: &str,
) -> Result<Array3<u8>> {
    let expected: usize = shape.iter().product();
    if bytes.len() != expected {
        Err(DataError::shape_mismatch(what, &shape, &[bytes.len()]))?;
    }
    Ok(Array3::from_shape_vec((shape[0], shape[1], shape[2]), bytes.to_vec())?)
}

/// Reads the `*.tfrecords` files of one directory.
///
/// The file list is fixed at construction; every pass reads the same files.
#[derive(Debug, Clone)]
pub struct RecordReader {
    directory: PathBuf,
    files: Vec<PathBuf>,
    shape: RecordShape,
    num_act: usize,
}

impl RecordReader {
    pub fn open(
        directory: &Path,
        shape: RecordShape,
        num_act: usize,
    ) -> Result<Self> {
        let pattern = format!(
            "{}/*.{}",
            glob::Pattern::escape(&directory.to_string_lossy()),
            RECORD_FILE_EXTENSION
        );
        let mut files = glob::glob(&pattern)?
            .collect::<Result<Vec<_>, _>>()?;
        files.retain(|f| f.is_file());
        files.sort();
        if files.is_empty() {
            Err(DataError::NoRecordFiles(directory.to_path_buf()))?;
        }
        log::debug!("found {} record files in '{}'", files.len(), directory.display());

        Ok(Self {
            directory: directory.to_path_buf(),
            files,
            shape,
            num_act,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn shape(&self) -> &RecordShape {
        &self.shape
    }

    pub fn num_act(&self) -> usize {
        self.num_act
    }

    /// Decoded samples of a single file; the file handle stays open while the iterator lives.
    pub fn read_file(
        &self,
        path: &Path,
    ) -> Result<impl Iterator<Item = Result<Sample>>> {
        let file = File::open(path).with_context(|| format!("opening record file '{}'", path.display()))?;
        let shape = self.shape;
        let num_act = self.num_act;
        let path = path.to_path_buf();
        Ok(TfRecordReader::new(BufReader::new(file)).map(move |payload| {
            payload
                .and_then(|p| Record::decode(&p, &shape))
                .and_then(|r| r.to_sample(num_act))
                .with_context(|| format!("reading '{}'", path.display()))
        }))
    }

    /// One full pass over all files in sorted order
    pub fn pass(&self) -> impl Iterator<Item = Result<Sample>> + '_ {
        self.files.iter().flat_map(move |f| match self.read_file(f) {
            Ok(samples) => Box::new(samples) as Box<dyn Iterator<Item = Result<Sample>>>,
            Err(e) => Box::new(std::iter::once(Err(e))),
        })
    }

    /// Endless sequence of passes
    pub fn samples(&self) -> impl Iterator<Item = Result<Sample>> + '_ {
        std::iter::repeat(()).flat_map(move |_| self.pass())
    }
}

/// Writes records into one `.tfrecords` file
pub struct RecordWriter {
    path: PathBuf,
    writer: FrameWriter<BufWriter<File>>,
    count: usize,
}

impl RecordWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("creating record file '{}'", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: FrameWriter::new(BufWriter::new(file)),
            count: 0,
        })
    }

    pub fn write(
        &mut self,
        record: &Record,
    ) -> Result<()> {
        self.writer
            .write(&record.encode())
            .with_context(|| format!("writing record to '{}'", self.path.display()))?;
        self.count += 1;
        Ok(())
    }

    /// Flushes the file and returns the number of records written
    pub fn finish(mut self) -> Result<usize> {
        self.writer
            .flush()
            .with_context(|| format!("flushing '{}'", self.path.display()))?;
        Ok(self.count)
    }
}
