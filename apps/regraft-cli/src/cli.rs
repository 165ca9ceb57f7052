//! CLI argument parsing.
//!
//! Defines the command-line interface for regraft using clap. One
//! subcommand per rebase entry point: `start`, `continue`, `skip`,
//! `abort`, `edit-todo`, plus the read-only `status`.

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::app::App;

/// regraft - interactive history resequencer
#[derive(Parser)]
#[command(name = "regraft")]
#[command(author, version, about = "regraft - interactive history resequencer")]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Available regraft commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive rebase of upstream..HEAD onto a new base.
    Start {
        /// Upstream revision bounding the rebased range.
        upstream: String,

        /// Rebase onto this revision instead of upstream.
        #[arg(long)]
        onto: Option<String>,

        /// Check out this branch before rebasing.
        #[arg(long)]
        branch: Option<String>,

        /// Move squash!/fixup! commits after their targets.
        #[arg(long)]
        autosquash: bool,

        /// Keep commits that leave the tree unchanged.
        #[arg(long)]
        keep_empty: bool,

        /// Replay every pick even when fast-forwarding would do.
        #[arg(long, short = 'f')]
        force_rebase: bool,

        /// Recreate merge commits instead of flattening them.
        #[arg(long, short = 'p')]
        preserve_merges: bool,

        /// Append an exec line running CMD after every pick.
        #[arg(long, short = 'x', value_name = "CMD")]
        exec: Option<String>,

        /// Extra progress reporting.
        #[arg(long, short = 'v')]
        verbose: bool,
    },

    /// Resume the rebase after resolving a pause.
    Continue,

    /// Drop the instruction the rebase stopped on and resume.
    Skip,

    /// Abandon the rebase, dropping its state.
    Abort,

    /// Reopen the remaining todo in the editor.
    EditTodo,

    /// Show the progress of the rebase in flight.
    Status,
}

impl Cli {
    /// Executes the parsed CLI command.
    pub fn run(self) -> Result<ExitCode> {
        let app = App::new()?;

        match self.command {
            Commands::Start {
                upstream,
                onto,
                branch,
                autosquash,
                keep_empty,
                force_rebase,
                preserve_merges,
                exec,
                verbose,
            } => app.start(
                &upstream,
                onto.as_deref(),
                branch.as_deref(),
                autosquash,
                keep_empty,
                force_rebase,
                preserve_merges,
                exec,
                verbose,
            ),
            Commands::Continue => app.continue_rebase(),
            Commands::Skip => app.skip(),
            Commands::Abort => app.abort(),
            Commands::EditTodo => app.edit_todo(),
            Commands::Status => app.status(),
        }
    }
}
