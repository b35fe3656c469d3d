use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Failures of the data pipeline.
///
/// None of them is recovered locally: configuration errors abort at startup, data errors abort the
/// running pipeline and surface at the consumer.
#[derive(Debug)]
pub enum DataError {
    /// No `*.tfrecords` file matched inside the data directory
    NoRecordFiles(PathBuf),
    /// A full pass over the record files yielded no record at all
    EmptyRecordFiles(PathBuf),
    InvalidConfig(String),
    /// Mean image missing, unreadable or of unexpected shape
    MeanImage(String),
    MalformedRecord(String),
    ShapeMismatch { what: String, expected: Vec<usize>, actual: Vec<usize> },
    ActionOutOfRange { action: i64, num_act: usize },
    Checksum(String),
    ImageDecode { path: PathBuf, reason: String },
    /// `act.log` ran out of lines before the frame images did
    ActionLogUnderrun { path: PathBuf, frame: usize },
    MalformedActionLog { path: PathBuf, line: usize, content: String },
    /// The pipeline was stopped or its input is exhausted
    Closed,
}

impl DataError {
    pub fn shape_mismatch(
        what: &str,
        expected: &[usize],
        actual: &[usize],
    ) -> Self {
        DataError::ShapeMismatch {
            what: what.to_string(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

impl Display for DataError {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            DataError::NoRecordFiles(dir) => write!(f, "no *.tfrecords files found in '{}'", dir.display()),
            DataError::EmptyRecordFiles(dir) => {
                write!(f, "the *.tfrecords files in '{}' hold no records", dir.display())
            }
            DataError::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            DataError::MeanImage(msg) => write!(f, "mean image: {msg}"),
            DataError::MalformedRecord(msg) => write!(f, "malformed record: {msg}"),
            DataError::ShapeMismatch { what, expected, actual } => {
                write!(f, "shape mismatch for {what}: expected {expected:?}, got {actual:?}")
            }
            DataError::ActionOutOfRange { action, num_act } => {
                write!(f, "action {action} outside of action space [0, {num_act})")
            }
            DataError::Checksum(msg) => write!(f, "checksum mismatch: {msg}"),
            DataError::ImageDecode { path, reason } => write!(f, "failed to decode '{}': {reason}", path.display()),
            DataError::ActionLogUnderrun { path, frame } => {
                write!(f, "'{}' has no action for frame #{frame}", path.display())
            }
            DataError::MalformedActionLog { path, line, content } => {
                write!(f, "'{}' line {line}: '{content}' is not an action id", path.display())
            }
            DataError::Closed => f.write_str("pipeline closed"),
        }
    }
}

impl std::error::Error for DataError {}
