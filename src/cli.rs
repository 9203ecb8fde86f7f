//! Command-line arguments.

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    Pretty,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "parcel", about = "Upload gateway with provenance recording")]
pub struct Args {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = TracingFormat::Pretty)]
    pub tracing: TracingFormat,
}
