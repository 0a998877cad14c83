//! Process entry point: parses flags, wires signal handling, builds the
//! pipeline and runs it to completion.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info};
use signal_hook::consts::TERM_SIGNALS;

use webfuzz::cli::Cli;
use webfuzz::pipeline::Fuzzer;

fn init_logging(verbose: bool, no_color: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .write_style(if no_color {
            env_logger::WriteStyle::Never
        } else {
            env_logger::WriteStyle::Auto
        })
        .format_timestamp_millis()
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.no_color);

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let fuzzer = match Fuzzer::build(&config) {
        Ok(fuzzer) => fuzzer,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let cancel_handle = fuzzer.cancel_handle();
    let quitting = Arc::new(AtomicBool::new(false));
    for sig in TERM_SIGNALS {
        if let Err(e) = signal_hook::flag::register(*sig, Arc::clone(&quitting)) {
            error!("failed to register signal handler: {e}");
        }
    }
    std::thread::Builder::new()
        .name("signal-watch".to_string())
        .spawn(move || loop {
            if quitting.load(Ordering::SeqCst) {
                info!("termination signal received, cancelling run");
                cancel_handle.cancel();
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        })
        .expect("failed to spawn signal watcher");

    match fuzzer.run() {
        Ok(summary) => {
            info!(
                "done: {} processed, {} filtered, {} backfeed requests, {:.2}s elapsed",
                summary.processed,
                summary.filtered,
                summary.backfeed,
                summary.elapsed.as_secs_f64()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
