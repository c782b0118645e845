use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::RequestKind;

#[derive(Parser)]
#[command(name = "kinobot")]
#[command(about = "Resolve film-frame requests and publish them to the page feed", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "kinobot.json")]
    pub(crate) config: PathBuf,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Find a valid request in the backlog and post it.
    Post {
        /// Which backlog to drain.
        #[arg(short, long, value_enum, default_value = "movies")]
        kind: RequestKind,
        /// Don't publish or notify; resolve, assemble and gate only.
        #[arg(short, long)]
        test: bool,
    },
}
