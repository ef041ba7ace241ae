// Acceptance run for `snapd-seed-glue`: provisions a seed three times with
// a changing snap list, then checks that an unknown snap is refused.

use clap::Parser;
use snapd_installation_monitor::logging;
use snapd_installation_monitor::seed_glue::{DEFAULT_PROGRAM, SeedGlue};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "seed-glue-check")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the tool under test
    #[arg(long, default_value = DEFAULT_PROGRAM)]
    program: PathBuf,

    /// Seed reused across the provisioning runs
    #[arg(long, default_value = "hello_test")]
    seed: String,

    /// Do not echo the tool's output
    #[arg(short, long)]
    quiet: bool,

    /// Log filter directives
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init(&cli.log_level, None) {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }

    let glue = SeedGlue::new(cli.program).echo(!cli.quiet);
    match glue.acceptance(&cli.seed) {
        Ok(()) => {
            info!("snapd-seed-glue behaves as expected");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
