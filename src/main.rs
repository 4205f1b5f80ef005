//! bytecmp CLI: byte-equality checks for files, directories, archives, URLs.

use std::process::ExitCode;
use std::time::Instant;

use bytecmp::cli::{Cli, run};
use bytecmp::utils::setup_logging;
use clap::Parser;

fn main() -> ExitCode {
    let start_time = Instant::now();
    let cli = Cli::parse();
    setup_logging(cli.common().verbose);

    let code = match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(2)
        }
    };
    log::debug!("Total time: {:?}", start_time.elapsed());
    code
}
