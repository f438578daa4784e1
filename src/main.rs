use anyhow::Result;
use clap::Parser;
use std::fs::{self, OpenOptions};
use tirex_tracker::cli::{self, Args};
use tirex_tracker::util;
use tracing::Level;

fn main() -> Result<()> {
    let args = Args::parse();
    util::init_data_dir(None);

    let level = if args.quiet {
        Level::ERROR
    } else {
        match args.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    if args.log_file {
        // Append to ~/.tirex-tracker/logs/tirex-tracker.log
        fs::create_dir_all(util::logs_dir())?;
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(util::log_file_path())?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(log_file)
            .with_ansi(false) // Disable ANSI colors in log file
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let code = cli::execute(args)?;
    std::process::exit(code);
}
