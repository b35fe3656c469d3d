use anyhow::Result;
use num_format::{CustomFormat, Grouping};

/// `15_000_000` style grouping for step counts in log lines
pub fn number_format() -> Result<CustomFormat> {
    Ok(CustomFormat::builder()
        .grouping(Grouping::Standard)
        .minus_sign("-")
        .separator("_")
        .build()?)
}
