//! `fairshare` simulates a cluster of peers that throttle shared resources
//! with fair-share limits.
//!
//! The binary is a wrapper around fairshare-lib. It starts a number of
//! throttlers on one in-process coordinator, runs worker tasks that fetch
//! from the configured bins, and prints what every peer was granted.
//!
//! Run the simulation described in `fairshare.toml` in the current directory:
//! ```sh
//! fairshare
//! ```
//!
//! Run a different configuration with five peers for ten seconds:
//! ```sh
//! fairshare --config crawl.toml --peers 5 --duration 10s
//! ```
//!
//! Print the statistics as JSON and watch the pools rebalance:
//! ```sh
//! fairshare --format json -vv
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, crate_version};
use formatters::log::init_logging;
use log::{error, warn};

mod formatters;
mod options;
mod simulate;
mod verbosity;

use crate::formatters::{get_stats_formatter, supports_color};
use crate::options::{Config, FAIRSHARE_CONFIG_FILE, FairshareOptions};
use crate::simulate::Simulation;

/// A C-like enum that can be cast to `i32` and used as process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitCode {
    Success = 0,
    // NOTE: exit code 1 is used for any `Result::Err` bubbled up to `main()`
    // using the `?` operator.
    #[allow(unused)]
    UnexpectedFailure = 1,
    ThrottleFailure = 2,
    ConfigFile = 3,
}

fn main() -> Result<()> {
    // std::process::exit doesn't guarantee that all destructors will be run,
    // therefore we wrap the main code in another function to ensure that.
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

/// Merge all provided config options into one.
/// This includes a potential config file, command-line- and environment variables
fn load_config() -> Result<FairshareOptions> {
    let mut opts = FairshareOptions::parse();

    let explicit = opts.config_file.is_some();
    let config_file = opts
        .config_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(FAIRSHARE_CONFIG_FILE));

    // A missing default config file is fine; groups may still be missing,
    // which validation reports below.
    if explicit || config_file.is_file() {
        match Config::load_from_file(&config_file) {
            Ok(c) => opts.config.merge(c),
            Err(e) => {
                init_logging(&opts.config.verbose, supports_color());
                bail!(
                    "Cannot load configuration file `{}`: {e:#}",
                    config_file.display()
                );
            }
        }
    }

    init_logging(&opts.config.verbose, supports_color());
    opts.config.validate()?;
    Ok(opts)
}

/// Set up runtime and call the simulation entrypoint
fn run_main() -> Result<i32> {
    let opts = match load_config() {
        Ok(opts) => opts,
        Err(e) => {
            error!(
                "Error while loading config (fairshare v{}): {e:#}",
                crate_version!()
            );
            return Ok(ExitCode::ConfigFile as i32);
        }
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(&opts))
}

/// Run the simulation and print its report
async fn run(opts: &FairshareOptions) -> Result<i32> {
    let report = simulate::run(Simulation::from(&opts.config)).await?;

    let formatter = get_stats_formatter(opts.config.format());
    println!("{}", formatter.format(&report)?);

    let failures = report.failures();
    if failures > 0 {
        warn!("{failures} workers stopped early");
        return Ok(ExitCode::ThrottleFailure as i32);
    }
    Ok(ExitCode::Success as i32)
}
