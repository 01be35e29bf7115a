//! CLI module for the split-testing engine
//!
//! Provides subcommands for running the engine:
//! - `serve`: HTTP admin API with health and metrics endpoints

pub mod serve;

use clap::{Parser, Subcommand};

/// PMP Split Engine - content split testing with automatic winner selection
#[derive(Parser)]
#[command(name = "pmp-split-engine")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP server
    Serve(serve::ServeArgs),
}
