use anyhow::Result;
use ndarray::{Array1, Array2};

use crate::error::DataError;

/// Encodes a discrete action id as a vector of length `num_act` with a single `1.0` at `action`.
pub fn one_hot(
    action: i64,
    num_act: usize,
) -> Result<Array1<f32>> {
    let index = checked_index(action, num_act)?;
    let mut v = Array1::zeros(num_act);
    v[index] = 1.0;
    Ok(v)
}

/// One row per action id, shape `[actions.len(), num_act]`
pub fn one_hot_batch(
    actions: &[usize],
    num_act: usize,
) -> Result<Array2<f32>> {
    let mut m = Array2::zeros((actions.len(), num_act));
    for (row, &action) in actions.iter().enumerate() {
        let index = checked_index(action as i64, num_act)?;
        m[[row, index]] = 1.0;
    }
    Ok(m)
}

pub(crate) fn checked_index(
    action: i64,
    num_act: usize,
) -> Result<usize> {
    if action < 0 || action as u64 >= num_act as u64 {
        Err(DataError::ActionOutOfRange { action, num_act })?;
    }
    Ok(action as usize)
}
