//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// In-process mTLS certificate rotation from a Vault / `OpenBao` PKI backend
#[derive(Parser, Debug)]
#[command(name = "spiffe-rotate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "SPIFFE_ROTATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "SPIFFE_ROTATE_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log format (text, json); overrides the config file
    #[arg(long, env = "SPIFFE_ROTATE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to `run`)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Keep a certificate rotating until interrupted (default)
    Run,

    /// Issue one certificate and print its summary as JSON
    Issue,

    /// Evaluate the configured authorizer rules against SPIFFE IDs
    Check {
        /// SPIFFE IDs to evaluate
        #[arg(required = true)]
        ids: Vec<String>,
    },
}
