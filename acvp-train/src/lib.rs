pub mod cli;
pub mod format;
pub mod log;
pub mod model;
pub mod supervisor;
pub mod trainer;
