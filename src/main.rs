//! # Recipe Sources CLI
//!
//! This is the binary entry point for the `recipe-sources` command-line tool.
//!
//! Its primary responsibilities are:
//! - Parsing command-line arguments using `clap`.
//! - Executing the appropriate command based on the parsed arguments.
//! - Turning errors into a message on stderr and a process exit status:
//!   configuration errors and refused freezes get their own statuses.
//!
//! The core application logic is defined in the `lib.rs` library crate, ensuring
//! that the binary is a thin wrapper around the reusable library functionality.

mod cli;
mod commands;

use std::process;

use clap::Parser;

use recipe_sources::error::Error;
use recipe_sources::exit_codes;

fn exit_status(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<Error>()
        .map(Error::exit_code)
        .unwrap_or(exit_codes::ERROR)
}

fn main() {
    let cli = cli::Cli::parse();
    if let Err(err) = cli.execute() {
        eprintln!("Error: {:#}", err);
        process::exit(exit_status(&err));
    }
}
