/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # CLI Module
//!
//! Command-line interface for the Courier agent.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Courier agent command-line interface.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional configuration file layered over the built-in defaults
    #[arg(long, global = true, env = "COURIER_CONFIG")]
    pub config: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the Courier agent
    Start,
    /// Print this machine's key
    Identity,
    /// Pack a directory into a package bundle
    Bundle {
        /// Directory whose files become the package
        source: PathBuf,
        /// Bundle file to write
        output: PathBuf,
    },
}

/// Parses command-line arguments into the Cli structure.
pub fn parse_cli() -> Cli {
    Cli::parse()
}
