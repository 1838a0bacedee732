// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! CLI entry point for the process launcher.

use anyhow::Result;
use clap::Parser;
use litebox_runner_process_launcher::{CliArgs, logger, run};

fn main() -> Result<()> {
    let args = CliArgs::parse();
    logger::init(logger::level_for_verbosity(args.verbose))?;

    let code = run(&args)?;
    // Host exit statuses are 8 bits wide
    std::process::exit(i32::from((code & 0xFF) as u8));
}
