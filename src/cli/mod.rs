//! Command line interface

pub mod download;
pub mod error;

pub use download::{
    clamp_workers, print_summary, run_workflow, summary_exit_code, Cli, OutputFormat,
};
pub use error::CliError;
