use std::sync::Arc;

use anyhow::Result;
use ndarray::{Array3, ArrayView3, ArrayViewMut3};

use crate::batcher::Batch;
use crate::error::DataError;
use crate::mean::MeanImage;
use crate::record::RecordShape;

/// Default pixel scale, mapping `[0, 255]` to unit range
pub const DEFAULT_SCALE: f32 = 1.0 / 255.0;

/// `(x - mean) * scale`, with the mean tiled across the stacked frames of a state.
///
/// The mean image itself is shared, never copied.
#[derive(Debug, Clone)]
pub struct Normalizer {
    mean: Arc<MeanImage>,
    state_mean: Array3<f32>,
    scale: f32,
}

impl Normalizer {
    /// Fails when the mean does not match the record's spatial size or its channel count does
    /// not divide the state's channel count.
    pub fn new(
        mean: impl Into<Arc<MeanImage>>,
        shape: &RecordShape,
        scale: f32,
    ) -> Result<Self> {
        let mean = mean.into();
        let (h, w, c) = mean.dim();
        let [sh, sw, sc] = shape.state;
        if [sh, sw] != [h, w] || sc % c != 0 {
            Err(DataError::shape_mismatch("state vs. mean image", &[h, w, c], &shape.state))?;
        }
        if shape.next_frame != [h, w, c] {
            Err(DataError::shape_mismatch("next frame vs. mean image", &[h, w, c], &shape.next_frame))?;
        }
        if !(scale.is_finite() && scale != 0.0) {
            Err(DataError::InvalidConfig(format!("scale must be finite and non-zero, got {scale}")))?;
        }
        let state_mean = mean.tiled(sc / c)?;
        Ok(Self { mean, state_mean, scale })
    }

    pub fn mean(&self) -> &Arc<MeanImage> {
        &self.mean
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn normalize_state(
        &self,
        mut state: ArrayViewMut3<f32>,
    ) {
        state -= &self.state_mean;
        state *= self.scale;
    }

    pub fn normalize_frame(
        &self,
        mut frame: ArrayViewMut3<f32>,
    ) {
        frame -= &self.mean.view();
        frame *= self.scale;
    }

    /// `x / scale + mean`
    pub fn denormalize_frame(
        &self,
        frame: ArrayView3<f32>,
    ) -> Array3<f32> {
        &frame / self.scale + &self.mean.view()
    }

    /// Normalizes the whole batch in place, broadcasting the means over the batch axis
    pub fn normalize_batch(
        &self,
        batch: &mut Batch,
    ) {
        batch.state -= &self.state_mean;
        batch.state *= self.scale;
        batch.next_frame -= &self.mean.view();
        batch.next_frame *= self.scale;
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array;
    use rand::prelude::*;

    use super::*;

    fn random_mean() -> MeanImage {
        let mut rng = StdRng::seed_from_u64(3);
        MeanImage::new(Array::from_shape_fn((84, 84, 3), |_| rng.gen_range(0.0..255.0)))
    }

    #[test]
    fn test_normalize_then_denormalize_frame() {
        let normalizer = Normalizer::new(random_mean(), &RecordShape::default(), DEFAULT_SCALE).unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        let original: Array3<f32> = Array::from_shape_fn((84, 84, 3), |_| rng.gen_range(0_u8..=255) as f32);

        let mut frame = original.clone();
        normalizer.normalize_frame(frame.view_mut());
        let restored = normalizer.denormalize_frame(frame.view());
        for (a, b) in original.iter().zip(restored.iter()) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn test_state_uses_tiled_mean() {
        let mean = random_mean();
        let normalizer = Normalizer::new(mean.clone(), &RecordShape::default(), 0.5).unwrap();
        let mut state = Array3::from_elem((84, 84, 12), 200.0_f32);
        normalizer.normalize_state(state.view_mut());
        for frame in 0..4 {
            for c in 0..3 {
                let expected = (200.0 - mean.view()[[10, 20, c]]) * 0.5;
                assert!((state[[10, 20, frame * 3 + c]] - expected).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_zero_mean_unit_scale_is_identity() {
        let normalizer = Normalizer::new(MeanImage::zeros(), &RecordShape::default(), 1.0).unwrap();
        let original = Array::from_shape_fn((84, 84, 12), |(y, x, c)| ((y + x + c) % 256) as f32);
        let mut state = original.clone();
        normalizer.normalize_state(state.view_mut());
        assert_eq!(state, original);
    }

    #[test]
    fn test_clones_share_the_mean() {
        let mean = Arc::new(random_mean());
        let normalizer = Normalizer::new(Arc::clone(&mean), &RecordShape::default(), DEFAULT_SCALE).unwrap();
        let copy = normalizer.clone();
        assert!(Arc::ptr_eq(normalizer.mean(), &mean));
        assert!(Arc::ptr_eq(copy.mean(), &mean));
    }

    #[test]
    fn test_incompatible_shapes() {
        let shape = RecordShape {
            state: [84, 84, 10],
            next_frame: [84, 84, 3],
        };
        assert!(Normalizer::new(MeanImage::zeros(), &shape, 1.0).is_err());
        let shape = RecordShape {
            state: [64, 64, 12],
            next_frame: [64, 64, 3],
        };
        assert!(Normalizer::new(MeanImage::zeros(), &shape, 1.0).is_err());
        assert!(Normalizer::new(MeanImage::zeros(), &RecordShape::default(), 0.0).is_err());
    }
}
