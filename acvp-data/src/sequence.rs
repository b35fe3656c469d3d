//! Frame-sequence directories: numbered frame images plus an `act.log` with one action per line.

use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use ndarray::{concatenate, Array2, Array3, ArrayD, Axis};

use crate::error::DataError;
use crate::frame_ring_buffer::FrameRingBuffer;
use crate::mean::MeanImage;
use crate::one_hot::{checked_index, one_hot_batch};
use crate::{FRAME_CHANNELS, FRAME_HEIGHT, FRAME_WIDTH, STATE_NUM_FRAMES};

pub const ACTION_LOG_FILE: &str = "act.log";
pub const FRAME_FILE_EXTENSION: &str = "png";

/// Axis order of the produced state window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `[height, width, frames * channels]`, newest frame in the last channels ("tf")
    ChannelsLast,
    /// `[frames, channels, height, width]`, newest frame last ("caffe")
    ChannelsFirst,
}

impl FromStr for Layout {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tf" => Ok(Layout::ChannelsLast),
            "caffe" => Ok(Layout::ChannelsFirst),
            other => Err(DataError::InvalidConfig(format!("unknown layout '{other}', expected 'tf' or 'caffe'"))),
        }
    }
}

impl Display for Layout {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Layout::ChannelsLast => f.write_str("tf"),
            Layout::ChannelsFirst => f.write_str("caffe"),
        }
    }
}

/// Frame image files of a sequence directory in processing (sorted filename) order
pub fn frame_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/*.{}", glob::Pattern::escape(&dir.to_string_lossy()), FRAME_FILE_EXTENSION);
    let mut files = glob::glob(&pattern)?.collect::<Result<Vec<_>, _>>()?;
    files.sort();
    Ok(files)
}

/// Decodes one frame as `[84, 84, 3]` u8 in BGR channel order
pub fn read_frame(path: &Path) -> Result<Array3<u8>> {
    let img = image::open(path)
        .map_err(|e| DataError::ImageDecode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .to_rgb8();
    let (width, height) = img.dimensions();
    if (height as usize, width as usize) != (FRAME_HEIGHT, FRAME_WIDTH) {
        Err(DataError::shape_mismatch(
            &format!("frame '{}'", path.display()),
            &[FRAME_HEIGHT, FRAME_WIDTH, FRAME_CHANNELS],
            &[height as usize, width as usize, FRAME_CHANNELS],
        ))?;
    }
    let rgb = Array3::from_shape_vec((FRAME_HEIGHT, FRAME_WIDTH, FRAME_CHANNELS), img.into_raw())?;
    Ok(rgb.slice_move(ndarray::s![.., .., ..;-1]).as_standard_layout().to_owned())
}

/// Sequential reader of `act.log`
pub struct ActionLog {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl ActionLog {
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(ACTION_LOG_FILE);
        let file = File::open(&path).with_context(|| format!("opening action log '{}'", path.display()))?;
        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }

    /// Action of the next frame; running out of lines is an error
    pub fn next_action(&mut self) -> Result<i64> {
        let frame = self.line_no;
        let line = self
            .lines
            .next()
            .ok_or_else(|| DataError::ActionLogUnderrun {
                path: self.path.clone(),
                frame,
            })??;
        self.line_no += 1;
        line.trim().parse::<i64>().map_err(|_| {
            DataError::MalformedActionLog {
                path: self.path.clone(),
                line: self.line_no,
                content: line.clone(),
            }
            .into()
        })
    }
}

/// One emitted element of a frame sequence
#[derive(Debug, Clone)]
pub struct SequenceStep {
    /// Normalized state window, shape according to the [Layout]
    pub state: ArrayD<f32>,
    /// one-hot of the newest action, `[1, num_act]`
    pub action: Array2<f32>,
    /// Action window, oldest first
    pub action_ids: Vec<usize>,
    /// Image file of the newest frame
    pub frame: PathBuf,
}

/// Sliding-window loader over a frame-sequence directory
#[derive(Debug, Clone)]
pub struct SequenceLoader {
    dir: PathBuf,
    num_act: usize,
    mean: MeanImage,
    layout: Layout,
    num_frame: usize,
    num_channel: usize,
}

impl SequenceLoader {
    pub fn new(
        dir: &Path,
        num_act: usize,
        mean: MeanImage,
        layout: Layout,
    ) -> Self {
        Self {
            dir: dir.to_path_buf(),
            num_act,
            mean,
            layout,
            num_frame: STATE_NUM_FRAMES,
            num_channel: FRAME_CHANNELS,
        }
    }

    pub fn with_num_frame(
        mut self,
        num_frame: usize,
    ) -> Self {
        self.num_frame = num_frame;
        self
    }

    /// Frames always decode to [FRAME_CHANNELS] (BGR) channels; [Self::steps] rejects any other count.
    pub fn with_num_channel(
        mut self,
        num_channel: usize,
    ) -> Self {
        self.num_channel = num_channel;
        self
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Lazily walks the first `max_iter` frames (all when `None`).
    ///
    /// Nothing is yielded until `num_frame` frames have been read.
    pub fn steps(
        &self,
        max_iter: Option<usize>,
    ) -> Result<SequenceIter> {
        if self.num_frame == 0 {
            Err(DataError::InvalidConfig("num_frame must be positive".to_string()))?;
        }
        if self.num_channel != FRAME_CHANNELS {
            Err(DataError::InvalidConfig(format!(
                "frames decode to {FRAME_CHANNELS} channels, {} requested",
                self.num_channel
            )))?;
        }
        let expected = [FRAME_HEIGHT, FRAME_WIDTH, self.num_channel];
        let (h, w, c) = self.mean.dim();
        if [h, w, c] != expected {
            Err(DataError::shape_mismatch("mean image", &expected, &[h, w, c]))?;
        }

        let mut files = frame_files(&self.dir)?;
        if let Some(max) = max_iter {
            files.truncate(max);
        }
        log::info!(
            "frame sequence '{}': {} frames, layout {}, window of {}",
            self.dir.display(),
            files.len(),
            self.layout,
            self.num_frame
        );

        let mean = match self.layout {
            Layout::ChannelsLast => self.mean.view().to_owned(),
            Layout::ChannelsFirst => self.mean.channels_first(),
        };
        let blank = Array3::zeros(mean.dim());
        Ok(SequenceIter {
            files: files.into_iter(),
            actions: ActionLog::open(&self.dir)?,
            frames: FrameRingBuffer::new(self.num_frame, blank),
            action_window: FrameRingBuffer::new(self.num_frame, 0),
            mean,
            layout: self.layout,
            num_act: self.num_act,
            failed: false,
        })
    }
}

pub struct SequenceIter {
    files: std::vec::IntoIter<PathBuf>,
    actions: ActionLog,
    /// processed frames, in the layout's own per-frame axis order
    frames: FrameRingBuffer<Array3<f32>>,
    action_window: FrameRingBuffer<usize>,
    mean: Array3<f32>,
    layout: Layout,
    num_act: usize,
    failed: bool,
}

impl SequenceIter {
    fn process_frame(
        &self,
        img: Array3<u8>,
    ) -> Array3<f32> {
        let img = img.mapv(f32::from);
        let img = match self.layout {
            Layout::ChannelsLast => img,
            Layout::ChannelsFirst => img.permuted_axes([2, 0, 1]).as_standard_layout().to_owned(),
        };
        (img - &self.mean) / 255.0
    }

    fn state(&self) -> Result<ArrayD<f32>> {
        let views: Vec<_> = self.frames.iter().map(|f| f.view()).collect();
        let state = match self.layout {
            Layout::ChannelsLast => concatenate(Axis(2), &views)?.into_dyn(),
            Layout::ChannelsFirst => ndarray::stack(Axis(0), &views)?.into_dyn(),
        };
        Ok(state)
    }

    fn step(
        &mut self,
        path: PathBuf,
    ) -> Result<Option<SequenceStep>> {
        log::debug!("{}", path.display());
        let img = read_frame(&path)?;
        let action = self.actions.next_action()?;
        let action = checked_index(action, self.num_act)?;

        let frame = self.process_frame(img);
        self.frames.add(frame);
        self.action_window.add(action);

        if !self.frames.is_full() {
            return Ok(None);
        }
        Ok(Some(SequenceStep {
            state: self.state()?,
            action: one_hot_batch(&[*self.action_window.newest()], self.num_act)?,
            action_ids: self.action_window.iter().copied().collect(),
            frame: path,
        }))
    }
}

impl Iterator for SequenceIter {
    type Item = Result<SequenceStep>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while let Some(path) = self.files.next() {
            match self.step(path) {
                Ok(Some(step)) => return Some(Ok(step)),
                Ok(None) => continue,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{s, Array};
    use rstest::rstest;

    use crate::test::synthetic::{frame_pixel, write_frame_sequence};

    use super::*;

    fn loader(
        dir: &Path,
        layout: Layout,
    ) -> SequenceLoader {
        SequenceLoader::new(dir, 4, MeanImage::zeros(), layout)
    }

    #[test]
    fn test_layout_from_str() {
        assert_eq!("tf".parse::<Layout>().unwrap(), Layout::ChannelsLast);
        assert_eq!("caffe".parse::<Layout>().unwrap(), Layout::ChannelsFirst);
        assert!("torch".parse::<Layout>().is_err());
    }

    #[test]
    fn test_read_frame_is_bgr() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00000.png");
        let img = image::RgbImage::from_fn(84, 84, |x, y| image::Rgb([x as u8, y as u8, 200]));
        img.save(&path).unwrap();

        let frame = read_frame(&path).unwrap();
        assert_eq!(frame.dim(), (84, 84, 3));
        // pixel (x=5, y=9) is stored at [row 9, column 5]; blue first
        assert_eq!(frame.slice(s![9, 5, ..]).to_vec(), vec![200, 9, 5]);
    }

    #[test]
    fn test_wrong_frame_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00000.png");
        image::RgbImage::new(10, 10).save(&path).unwrap();
        let err = read_frame(&path).unwrap_err();
        assert!(matches!(err.downcast_ref::<DataError>(), Some(DataError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_nothing_before_window_is_full() {
        let dir = tempfile::tempdir().unwrap();
        write_frame_sequence(dir.path(), 3, 4).unwrap();
        let steps: Vec<_> = loader(dir.path(), Layout::ChannelsLast).steps(None).unwrap().collect();
        assert!(steps.is_empty());
    }

    #[test]
    fn test_channels_last_window_slides() {
        let dir = tempfile::tempdir().unwrap();
        let actions = write_frame_sequence(dir.path(), 6, 4).unwrap();
        let steps = loader(dir.path(), Layout::ChannelsLast)
            .steps(None)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        // frames 0..=3 fill the window, then one step per frame
        assert_eq!(steps.len(), 3);

        let last = &steps[2];
        assert_eq!(last.state.shape(), &[84, 84, 12]);
        // window holds frames 2, 3, 4, 5 (oldest first)
        for (slot, frame) in (2..6).enumerate() {
            for c in 0..3 {
                let expected = frame_pixel(frame, 1, 2, c) as f32 / 255.0;
                assert!((last.state[[1, 2, slot * 3 + c]] - expected).abs() < 1e-6);
            }
        }
        assert_eq!(last.action_ids, actions[2..6].to_vec());
        assert_eq!(last.action.dim(), (1, 4));
        assert_eq!(last.action[[0, actions[5]]], 1.0);
        assert!(last.frame.ends_with("00005.png"));
    }

    #[test]
    fn test_channels_first_window_slides() {
        let dir = tempfile::tempdir().unwrap();
        write_frame_sequence(dir.path(), 5, 4).unwrap();
        let steps = loader(dir.path(), Layout::ChannelsFirst)
            .steps(None)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(steps.len(), 2);
        let last = &steps[1];
        assert_eq!(last.state.shape(), &[4, 3, 84, 84]);
        for (slot, frame) in (1..5).enumerate() {
            let expected = frame_pixel(frame, 7, 3, 2) as f32 / 255.0;
            assert!((last.state[[slot, 2, 7, 3]] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_mean_is_subtracted() {
        let dir = tempfile::tempdir().unwrap();
        write_frame_sequence(dir.path(), 4, 4).unwrap();
        let mean = MeanImage::new(Array::from_elem((84, 84, 3), 10.0));
        let step = SequenceLoader::new(dir.path(), 4, mean, Layout::ChannelsLast)
            .steps(None)
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        let expected = (frame_pixel(3, 0, 0, 1) as f32 - 10.0) / 255.0;
        assert!((step.state[[0, 0, 10]] - expected).abs() < 1e-6);
    }

    #[rstest]
    #[case(1)]
    #[case(4)]
    fn test_unsupported_channel_count(#[case] num_channel: usize) {
        let dir = tempfile::tempdir().unwrap();
        write_frame_sequence(dir.path(), 4, 4).unwrap();
        let mean = MeanImage::new(Array3::zeros((84, 84, num_channel)));
        let err = SequenceLoader::new(dir.path(), 4, mean, Layout::ChannelsLast)
            .with_num_channel(num_channel)
            .steps(None)
            .err()
            .unwrap();
        assert!(matches!(err.downcast_ref::<DataError>(), Some(DataError::InvalidConfig(_))));
    }

    #[test]
    fn test_max_iter_limits_frames() {
        let dir = tempfile::tempdir().unwrap();
        write_frame_sequence(dir.path(), 10, 4).unwrap();
        let count = loader(dir.path(), Layout::ChannelsLast).steps(Some(6)).unwrap().count();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_action_log_underrun() {
        let dir = tempfile::tempdir().unwrap();
        write_frame_sequence(dir.path(), 6, 4).unwrap();
        std::fs::write(dir.path().join(ACTION_LOG_FILE), "1\n2\n3\n0\n").unwrap();
        let results: Vec<_> = loader(dir.path(), Layout::ChannelsLast).steps(None).unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        let err = results[1].as_ref().unwrap_err();
        assert!(matches!(err.downcast_ref::<DataError>(), Some(DataError::ActionLogUnderrun { frame: 4, .. })));
    }

    #[test]
    fn test_malformed_action_log() {
        let dir = tempfile::tempdir().unwrap();
        write_frame_sequence(dir.path(), 4, 4).unwrap();
        std::fs::write(dir.path().join(ACTION_LOG_FILE), "1\nleft\n3\n0\n").unwrap();
        let result = loader(dir.path(), Layout::ChannelsLast).steps(None).unwrap().next().unwrap();
        assert!(matches!(
            result.unwrap_err().downcast_ref::<DataError>(),
            Some(DataError::MalformedActionLog { line: 2, .. })
        ));
    }

    #[test]
    fn test_undecodable_image() {
        let dir = tempfile::tempdir().unwrap();
        write_frame_sequence(dir.path(), 4, 4).unwrap();
        std::fs::write(dir.path().join("00002.png"), b"garbage").unwrap();
        let results: Vec<_> = loader(dir.path(), Layout::ChannelsLast).steps(None).unwrap().collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0].as_ref().unwrap_err().downcast_ref::<DataError>(),
            Some(DataError::ImageDecode { .. })
        ));
    }
}
