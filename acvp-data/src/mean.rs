use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::{concatenate, Array3, ArrayD, ArrayView3, Axis, Ix3, IxDyn};
use ndarray_npy::{read_npy, write_npy};
use prost::Message;

use crate::error::DataError;
use crate::proto::caffe::BlobProto;
use crate::{FRAME_CHANNELS, FRAME_HEIGHT, FRAME_WIDTH};

/// Per-pixel mean of the training frames, held as (height, width, channels).
///
/// Loaded once at startup and shared read-only by every batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MeanImage {
    data: Array3<f32>,
}

impl MeanImage {
    pub fn new(data: Array3<f32>) -> Self {
        Self { data }
    }

    pub fn zeros() -> Self {
        Self::new(Array3::zeros((FRAME_HEIGHT, FRAME_WIDTH, FRAME_CHANNELS)))
    }

    /// Loads a `.npy` array or a Caffe `.binaryproto` blob.
    ///
    /// Leading unit axes are dropped. Channel-first data (C,H,W) is transposed to (H,W,C).
    pub fn load(path: &Path) -> Result<Self> {
        let is_binaryproto = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("binaryproto"))
            .unwrap_or(false);
        let data = if is_binaryproto {
            log::info!("Load mean with caffe blob '{}'", path.display());
            load_blob_proto(path)?
        } else {
            log::info!("Load mean with npy '{}'", path.display());
            load_npy(path)?
        };
        let data = to_channels_last(data)
            .with_context(|| format!("mean image '{}'", path.display()))?;
        Ok(Self::new(data))
    }

    pub fn save_npy(
        &self,
        path: &Path,
    ) -> Result<()> {
        write_npy(path, &self.data).with_context(|| format!("writing mean image '{}'", path.display()))?;
        Ok(())
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// (height, width, channels)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn channels(&self) -> usize {
        self.data.dim().2
    }

    /// Mean replicated `reps` times along the channel axis, matching a stack of `reps` frames
    pub fn tiled(
        &self,
        reps: usize,
    ) -> Result<Array3<f32>> {
        if reps == 0 {
            Err(DataError::InvalidConfig("mean must be tiled at least once".to_string()))?;
        }
        let views = vec![self.data.view(); reps];
        Ok(concatenate(Axis(2), &views)?)
    }

    /// (channels, height, width) copy
    pub fn channels_first(&self) -> Array3<f32> {
        self.data.view().permuted_axes([2, 0, 1]).as_standard_layout().to_owned()
    }
}

fn load_npy(path: &Path) -> Result<ArrayD<f32>> {
    let data: ArrayD<f32> = match read_npy::<_, ArrayD<f32>>(path) {
        Ok(a) => a,
        Err(f32_err) => {
            let a: ArrayD<f64> = read_npy(path)
                .map_err(|_| DataError::MeanImage(format!("cannot read '{}': {f32_err}", path.display())))?;
            a.mapv(|v| v as f32)
        }
    };
    Ok(data)
}

/// Caffe `BlobProto`, dimensions from `shape` or else the legacy num/channels/height/width
fn load_blob_proto(path: &Path) -> Result<ArrayD<f32>> {
    let bytes = fs::read(path).with_context(|| format!("reading '{}'", path.display()))?;
    let blob = BlobProto::decode(bytes.as_slice())
        .map_err(|e| DataError::MeanImage(format!("'{}' is not a caffe blob: {e}", path.display())))?;

    let dims: Vec<i64> = match &blob.shape {
        Some(shape) => shape.dim.clone(),
        None => [blob.num, blob.channels, blob.height, blob.width]
            .iter()
            .map(|d| i64::from(d.unwrap_or(0)))
            .collect(),
    };
    if dims.iter().any(|&d| d < 0) {
        Err(DataError::MeanImage(format!("negative blob dimension in {dims:?}")))?;
    }
    let dims: Vec<usize> = dims.into_iter().map(|d| d as usize).collect();
    let data = if blob.data.is_empty() {
        blob.double_data.iter().map(|&v| v as f32).collect()
    } else {
        blob.data
    };
    ArrayD::from_shape_vec(IxDyn(&dims), data)
        .map_err(|e| DataError::MeanImage(format!("blob of shape {dims:?}: {e}")).into())
}

fn to_channels_last(data: ArrayD<f32>) -> Result<Array3<f32>> {
    let mut data = data;
    while data.ndim() > 3 && data.shape()[0] == 1 {
        data = data.index_axis_move(Axis(0), 0);
    }
    let actual = data.shape().to_vec();
    let data = data
        .into_dimensionality::<Ix3>()
        .map_err(|_| DataError::MeanImage(format!("expected a 3 dimensional array, got shape {actual:?}")))?;

    let (d0, _, d2) = data.dim();
    if d2 == FRAME_CHANNELS || d2 == 1 {
        Ok(data)
    } else if d0 == FRAME_CHANNELS || d0 == 1 {
        Ok(data.permuted_axes([1, 2, 0]).as_standard_layout().to_owned())
    } else {
        Err(DataError::MeanImage(format!("no channel axis of size {FRAME_CHANNELS} in shape {actual:?}")).into())
    }
}
