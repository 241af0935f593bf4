use anyhow::Result;
use repohub::{cli, config, download, logging};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = cli::parse_args(&args)?;

    let data_dir = config::base_data_dir()?;
    let _log_guard = logging::init(&data_dir, invocation.verbose)?;

    let result = cli::run(invocation, &data_dir);
    download::clear_scratch_dir(&config::scratch_dir(&data_dir));
    result
}
