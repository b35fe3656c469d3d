use anyhow::Result;
use clap::Parser;

use acvp_data::convert::convert_sequence;
use acvp_train::cli::ConvertArgs;
use acvp_train::log::init_logging;

fn main() -> Result<()> {
    init_logging();
    let args = ConvertArgs::parse();
    convert_sequence(&args.input, &args.output, args.records_per_file)?;
    Ok(())
}
