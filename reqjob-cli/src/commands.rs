use std::path::PathBuf;

use clap::Subcommand;

use crate::args::*;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every job of a profile and verify the responses.
    Run {
        path: PathBuf,
        #[command(flatten)]
        source: SourceArgs,
        /// Only run jobs carrying one of these tags.
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Also publish run progress events.
        #[arg(long, value_enum, default_value_t = EventsTarget::None)]
        events: EventsTarget,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Check a profile without sending any request.
    Validate {
        path: PathBuf,
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
}
