//! Worktree, index, and ref mutation operations.
//!
//! Defines the [`WorktreeOps`] trait for all state-changing repository
//! interactions and provides [`CliWorktree`], the production implementation
//! that shells out to `git`. The executor only ever mutates the repository
//! through this trait, which keeps the instruction interpreter testable
//! against an in-memory implementation.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::RebaseError;
use crate::oracle::{AuthorInfo, CommitId};

/// Parameters for a commit operation.
#[derive(Debug, Default, Clone)]
pub struct CommitRequest {
    /// Amend the current `HEAD` instead of creating a new commit.
    pub amend: bool,
    /// Suppress pre-commit and commit-msg hooks.
    pub no_verify: bool,
    /// Open the editor on the prepared message.
    pub edit: bool,
    /// File to take the commit message from.
    pub message_file: Option<PathBuf>,
    /// Author identity to record instead of the configured one.
    pub author: Option<AuthorInfo>,
    /// Permit a commit whose tree equals its parent's.
    pub allow_empty: bool,
}

/// Abstraction over worktree-mutating repository operations.
///
/// Implementations must be `Send + Sync` so they can be shared behind an
/// `Arc` between the engine and the executor.
pub trait WorktreeOps: Send + Sync {
    /// Replays a commit onto `HEAD`.
    ///
    /// With `no_commit` the result is left staged in the index. With
    /// `allow_ff` the replay may fast-forward when `HEAD` is the commit's
    /// parent.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::GitError` on conflicts or any other failure.
    fn cherry_pick(
        &self,
        id: &CommitId,
        no_commit: bool,
        allow_empty: bool,
        allow_ff: bool,
    ) -> Result<(), RebaseError>;

    /// Creates or amends a commit.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::GitError` if the commit fails (including an
    /// editor invocation aborted by the user).
    fn commit(&self, req: &CommitRequest) -> Result<(), RebaseError>;

    /// Checks out a revision, optionally detaching `HEAD`.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::GitError` if the checkout fails.
    fn checkout(&self, rev: &str, detach: bool) -> Result<(), RebaseError>;

    /// Creates a non-fast-forward merge of `parents` into `HEAD` with the
    /// given message.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::GitError` on conflicts or any other failure.
    fn merge(&self, message: &str, parents: &[CommitId]) -> Result<(), RebaseError>;

    /// Returns whether the index differs from `HEAD`.
    fn has_staged_changes(&self) -> bool;

    /// Returns whether the worktree and index are clean relative to `HEAD`.
    fn is_clean(&self) -> bool;

    /// Discards all local changes, resetting to `HEAD`.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::GitError` if the reset fails.
    fn reset_hard(&self) -> Result<(), RebaseError>;

    /// Records resolved conflicts for reuse. Best effort.
    fn rerere(&self);

    /// Forgets recorded conflict resolutions for the current conflict.
    /// Best effort.
    fn rerere_clear(&self);

    /// Points `name` at `id`, recording `reflog_msg`.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::GitError` if the update fails.
    fn update_ref(&self, name: &str, id: &CommitId, reflog_msg: &str) -> Result<(), RebaseError>;

    /// Re-attaches `HEAD` to the given branch ref without touching the
    /// worktree.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::GitError` if the update fails.
    fn point_head_at(&self, branch_ref: &str) -> Result<(), RebaseError>;

    /// Returns the patch text of a commit relative to its first parent,
    /// for the `patch` pause artifact.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::GitError` if the command fails.
    fn commit_patch(&self, id: &CommitId) -> Result<String, RebaseError>;

    /// Runs a shell command in the worktree with inherited stdio and
    /// returns its raw exit status.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` if the shell cannot be spawned.
    fn run_exec(&self, cmd: &str) -> Result<i32, RebaseError>;

    /// Exposes a message as the standard merge-message file so the user's
    /// next manual commit starts from it. Best effort.
    fn prime_merge_message(&self, text: &str);

    /// Feeds the rewritten list to the `post-rewrite` hook, if one exists.
    /// Failures are logged and ignored.
    fn post_rewrite_hook(&self, payload: &str);

    /// Copies notes for rewritten commits. Failures are logged and ignored.
    fn copy_notes(&self, payload: &str);

    /// Triggers the opportunistic garbage collection of the enclosing
    /// system. Failures are logged and ignored.
    fn gc_auto(&self);
}

/// Production [`WorktreeOps`] implementation that shells out to `git`.
#[derive(Debug)]
pub struct CliWorktree {
    repo_root: PathBuf,
    git_dir: PathBuf,
}

impl CliWorktree {
    /// Creates a new instance for the given working tree and `.git` dir.
    pub fn new(repo_root: PathBuf, git_dir: PathBuf) -> Self {
        Self { repo_root, git_dir }
    }
}

impl WorktreeOps for CliWorktree {
    fn cherry_pick(
        &self,
        id: &CommitId,
        no_commit: bool,
        allow_empty: bool,
        allow_ff: bool,
    ) -> Result<(), RebaseError> {
        let mut args = vec!["cherry-pick"];
        if no_commit {
            args.push("-n");
        }
        if allow_empty {
            args.push("--allow-empty");
        }
        if allow_ff {
            args.push("--ff");
        }
        args.push(id.as_str());
        run_git(&self.repo_root, &args)?;
        Ok(())
    }

    fn commit(&self, req: &CommitRequest) -> Result<(), RebaseError> {
        let mut args: Vec<String> = vec!["commit".to_string()];
        if req.amend {
            args.push("--amend".to_string());
        }
        if req.no_verify {
            args.push("--no-verify".to_string());
        }
        if req.allow_empty {
            args.push("--allow-empty".to_string());
        }
        if let Some(file) = &req.message_file {
            args.push("-F".to_string());
            args.push(file.display().to_string());
        }
        if req.edit {
            args.push("-e".to_string());
        } else if req.message_file.is_none() && req.amend {
            args.push("--no-edit".to_string());
        }

        debug!(args = ?args, "git commit");
        let mut command = Command::new("git");
        command.args(&args).current_dir(&self.repo_root);
        if let Some(author) = &req.author {
            command
                .env("GIT_AUTHOR_NAME", &author.name)
                .env("GIT_AUTHOR_EMAIL", &author.email)
                .env("GIT_AUTHOR_DATE", &author.date);
        }
        // The editor needs the terminal, so run with inherited stdio.
        let status = command.status().map_err(RebaseError::IoError)?;
        if !status.success() {
            return Err(RebaseError::GitError(format!(
                "git {} failed with status {status}",
                args.join(" "),
            )));
        }
        Ok(())
    }

    fn checkout(&self, rev: &str, detach: bool) -> Result<(), RebaseError> {
        let mut args = vec!["checkout"];
        if detach {
            args.push("--detach");
        }
        args.push(rev);
        run_git(&self.repo_root, &args)?;
        Ok(())
    }

    fn merge(&self, message: &str, parents: &[CommitId]) -> Result<(), RebaseError> {
        let mut args = vec!["merge", "--no-ff", "-m", message];
        for parent in parents {
            args.push(parent.as_str());
        }
        run_git(&self.repo_root, &args)?;
        Ok(())
    }

    fn has_staged_changes(&self) -> bool {
        run_git(&self.repo_root, &["diff", "--cached", "--quiet"]).is_err()
    }

    fn is_clean(&self) -> bool {
        run_git(&self.repo_root, &["update-index", "--refresh"]).is_ok()
            && run_git(&self.repo_root, &["diff-index", "--quiet", "HEAD", "--"]).is_ok()
    }

    fn reset_hard(&self) -> Result<(), RebaseError> {
        run_git(&self.repo_root, &["reset", "--hard", "HEAD"])?;
        Ok(())
    }

    fn rerere(&self) {
        if let Err(e) = run_git(&self.repo_root, &["rerere"]) {
            debug!(error = %e, "rerere failed");
        }
    }

    fn rerere_clear(&self) {
        if let Err(e) = run_git(&self.repo_root, &["rerere", "clear"]) {
            debug!(error = %e, "rerere clear failed");
        }
    }

    fn update_ref(&self, name: &str, id: &CommitId, reflog_msg: &str) -> Result<(), RebaseError> {
        run_git(
            &self.repo_root,
            &["update-ref", "-m", reflog_msg, name, id.as_str()],
        )?;
        Ok(())
    }

    fn point_head_at(&self, branch_ref: &str) -> Result<(), RebaseError> {
        run_git(&self.repo_root, &["symbolic-ref", "HEAD", branch_ref])?;
        Ok(())
    }

    fn commit_patch(&self, id: &CommitId) -> Result<String, RebaseError> {
        let spec = format!("{id}^!");
        run_git(&self.repo_root, &["diff-tree", "-p", &spec])
    }

    fn run_exec(&self, cmd: &str) -> Result<i32, RebaseError> {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
        debug!(shell = %shell, cmd = %cmd, "exec");
        let status = Command::new(shell)
            .arg("-c")
            .arg(cmd)
            .current_dir(&self.repo_root)
            .status()
            .map_err(RebaseError::IoError)?;
        Ok(status.code().unwrap_or(1))
    }

    fn prime_merge_message(&self, text: &str) {
        if let Err(e) = std::fs::write(self.git_dir.join("MERGE_MSG"), text) {
            debug!(error = %e, "could not prime MERGE_MSG");
        }
    }

    fn post_rewrite_hook(&self, payload: &str) {
        let hook = self.git_dir.join("hooks").join("post-rewrite");
        if !hook.is_file() {
            return;
        }
        let spawned = Command::new(&hook)
            .arg("rebase")
            .current_dir(&self.repo_root)
            .stdin(Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, "post-rewrite hook could not be started");
                return;
            }
        };
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(payload.as_bytes()) {
                warn!(error = %e, "failed to feed post-rewrite hook");
            }
        }
        match child.wait() {
            Ok(status) if !status.success() => {
                warn!(%status, "post-rewrite hook failed");
            }
            Err(e) => warn!(error = %e, "post-rewrite hook did not finish"),
            _ => {}
        }
    }

    fn copy_notes(&self, payload: &str) {
        let spawned = Command::new("git")
            .args(["notes", "copy", "--for-rewrite=rebase"])
            .current_dir(&self.repo_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                debug!(error = %e, "notes copy could not be started");
                return;
            }
        };
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(payload.as_bytes());
        }
        if let Err(e) = child.wait() {
            debug!(error = %e, "notes copy did not finish");
        }
    }

    fn gc_auto(&self) {
        if let Err(e) = run_git(&self.repo_root, &["gc", "--auto"]) {
            debug!(error = %e, "auto gc failed");
        }
    }
}

/// Runs a git command and returns its stdout.
fn run_git(cwd: &Path, args: &[&str]) -> Result<String, RebaseError> {
    debug!(cwd = %cwd.display(), args = ?args, "git");
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(RebaseError::IoError)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RebaseError::GitError(format!(
            "git {} failed: {stderr}",
            args.join(" "),
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
