//! Application wiring.
//!
//! Builds the core [`Engine`] with the CLI collaborators (git-backed
//! oracle and worktree, environment-resolved editor) and maps engine
//! outcomes to process exit codes.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use regraft_core::{
    CliObjectOracle, CliWorktree, Engine, GitEditor, Outcome, RebaseOptions, StateDir,
    find_git_dir,
};

/// Top-level application state.
pub struct App {
    engine: Engine,
}

impl App {
    /// Locates the enclosing repository and wires up the engine.
    pub fn new() -> Result<Self> {
        let git_dir = find_git_dir()?;
        let repo_root = git_dir
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| git_dir.clone());

        let oracle = Arc::new(CliObjectOracle::new(repo_root.clone()));
        let worktree = Arc::new(CliWorktree::new(repo_root, git_dir.clone()));
        let editor = Arc::new(GitEditor);
        let state = StateDir::new(git_dir.join("regraft"));

        Ok(Self {
            engine: Engine::new(oracle, worktree, editor, state),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn start(
        &self,
        upstream: &str,
        onto: Option<&str>,
        branch: Option<&str>,
        autosquash: bool,
        keep_empty: bool,
        force_rebase: bool,
        preserve_merges: bool,
        exec: Option<String>,
        verbose: bool,
    ) -> Result<ExitCode> {
        let opts = RebaseOptions {
            autosquash,
            keep_empty,
            force_rebase,
            preserve_merges,
            verbose,
            exec_cmd: exec,
            ..Default::default()
        };
        let outcome = self.engine.start(upstream, onto, branch, opts)?;
        Ok(exit_code_for(outcome))
    }

    pub fn continue_rebase(&self) -> Result<ExitCode> {
        let outcome = self.engine.continue_rebase()?;
        Ok(exit_code_for(outcome))
    }

    pub fn skip(&self) -> Result<ExitCode> {
        let outcome = self.engine.skip()?;
        Ok(exit_code_for(outcome))
    }

    pub fn abort(&self) -> Result<ExitCode> {
        self.engine.abort()?;
        Ok(ExitCode::SUCCESS)
    }

    pub fn edit_todo(&self) -> Result<ExitCode> {
        self.engine.edit_todo()?;
        Ok(ExitCode::SUCCESS)
    }

    pub fn status(&self) -> Result<ExitCode> {
        let status = self.engine.status()?;
        println!("Rebasing {} onto {}", status.head_name, status.onto);
        println!("  done:      {}", status.done_count);
        println!("  remaining: {}", status.remaining_count);
        if let Some(stopped) = status.stopped {
            println!("  stopped at {stopped}");
        }
        Ok(ExitCode::SUCCESS)
    }
}

/// Maps an engine outcome to the process exit code: success, or the
/// pause's own code after printing its message.
fn exit_code_for(outcome: Outcome) -> ExitCode {
    match outcome {
        Outcome::Completed => ExitCode::SUCCESS,
        Outcome::Stopped { message, exit_code } => {
            eprintln!("{message}");
            ExitCode::from(u8::try_from(exit_code).unwrap_or(1))
        }
    }
}
