//! SavedModel execution through the TensorFlow C API.

pub mod model_function;
pub mod video_prediction_model;

pub use video_prediction_model::TensorflowVideoPredictionModel;
