//! Top-level entry-point dispatch.
//!
//! [`Engine`] owns the resumable-rebase protocol: `start` plans and kicks
//! off a run, `continue`/`skip` resume one after a pause, `abort` drops
//! the state, and `edit-todo` reopens the remaining instructions in the
//! editor. All repository access goes through the collaborator traits so
//! the whole protocol is testable against in-memory doubles.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::RebaseError;
use crate::config::RebaseOptions;
use crate::editor::Editor;
use crate::oracle::{CommitId, ObjectOracle};
use crate::parser::{Instruction, TodoLine, TodoProgram};
use crate::planner;
use crate::runner::{Outcome, Runner, record_in_rewritten};
use crate::state::StateDir;
use crate::worktree::{CommitRequest, WorktreeOps};

/// Read-only progress report for an in-flight rebase.
#[derive(Debug, Clone)]
pub struct RebaseStatus {
    /// The ref the rebase started on, or `detached HEAD`.
    pub head_name: String,
    /// The base commits are being replayed onto.
    pub onto: CommitId,
    /// Instructions already consumed.
    pub done_count: usize,
    /// Instructions still to run.
    pub remaining_count: usize,
    /// The commit being processed when the engine paused, if any.
    pub stopped: Option<CommitId>,
}

/// Orchestrates the rebase entry points over a state directory.
pub struct Engine {
    oracle: Arc<dyn ObjectOracle>,
    worktree: Arc<dyn WorktreeOps>,
    editor: Arc<dyn Editor>,
    state: StateDir,
}

impl Engine {
    /// Creates an engine wiring the collaborators to a state directory.
    pub fn new(
        oracle: Arc<dyn ObjectOracle>,
        worktree: Arc<dyn WorktreeOps>,
        editor: Arc<dyn Editor>,
        state: StateDir,
    ) -> Self {
        Self {
            oracle,
            worktree,
            editor,
            state,
        }
    }

    fn runner(&self, opts: RebaseOptions) -> Runner {
        Runner::new(
            self.oracle.clone(),
            self.worktree.clone(),
            self.state.clone(),
            opts,
        )
    }

    fn require_in_progress(&self) -> Result<(), RebaseError> {
        if self.state.exists() {
            Ok(())
        } else {
            Err(RebaseError::PreconditionError(
                "No rebase in progress.".into(),
            ))
        }
    }

    /// Starts a new interactive rebase of `upstream..HEAD` onto `onto`
    /// (defaulting to `upstream`), optionally checking out `branch`
    /// first.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::PreconditionError` when the committer
    /// identity is unset, a rebase is already in progress, or `HEAD` does
    /// not resolve; `RebaseError::EditorError` when the editor fails; and
    /// any planner, oracle, or worktree error.
    pub fn start(
        &self,
        upstream: &str,
        onto: Option<&str>,
        branch: Option<&str>,
        opts: RebaseOptions,
    ) -> Result<Outcome, RebaseError> {
        self.oracle.committer_ident().map_err(|_| {
            RebaseError::PreconditionError(
                "Committer identity is not configured; set your name and email first.".into(),
            )
        })?;
        if self.state.exists() {
            return Err(RebaseError::PreconditionError(format!(
                "A rebase is already in progress ({} exists). \
                 Run 'regraft continue', 'regraft skip', or 'regraft abort'.",
                self.state.dir().display(),
            )));
        }

        if let Some(branch) = branch {
            self.worktree.checkout(branch, false)?;
        }
        let orig_head = self.oracle.head().map_err(|_| {
            RebaseError::PreconditionError("No HEAD commit to rebase from.".into())
        })?;
        let head_name = self
            .oracle
            .symbolic_head()
            .unwrap_or_else(|| "detached HEAD".to_string());
        let mut onto_id = self.oracle.rev_parse(onto.unwrap_or(upstream))?;

        self.state.create()?;
        self.state.write_orig_head(&orig_head)?;
        self.state.write_upstream(upstream)?;
        self.state.write_onto(&onto_id)?;
        self.state.write_head_name(&head_name)?;
        self.state.write_options(&opts)?;
        self.state.mark_interactive()?;
        if opts.verbose {
            self.state.mark_verbose()?;
        }
        info!(
            upstream,
            onto = %onto_id,
            head = %head_name,
            "starting interactive rebase",
        );

        let mut todo = if opts.preserve_merges {
            planner::build_preserve_merges_todo(self.oracle.as_ref(), upstream, &orig_head)?
        } else {
            planner::build_todo(self.oracle.as_ref(), upstream, &orig_head, opts.keep_empty)?
        };
        if opts.autosquash {
            todo = planner::rearrange_autosquash(todo, self.oracle.as_ref())?;
        }
        if let Some(cmd) = &opts.exec_cmd {
            todo = planner::insert_exec(todo, cmd)?;
        }
        if todo.instruction_count() == 0 {
            // An empty range still rebases: give the user something to
            // keep (or delete, to abort).
            todo.push(TodoLine::parse("noop")?);
        }

        let upstream_short = self
            .oracle
            .rev_parse(upstream)
            .and_then(|id| self.oracle.short_id(&id))
            .unwrap_or_else(|_| upstream.to_string());
        let range = format!("{upstream_short}..{}", self.oracle.short_id(&orig_head)?);
        todo.append_comment_text(&planner::todo_help(&range, &self.oracle.short_id(&onto_id)?))?;

        self.state.write_todo(&todo.serialize())?;
        self.state.backup_todo()?;
        self.editor.edit(&self.state.todo_path())?;

        let edited = TodoProgram::parse(&self.state.read_todo()?)?;
        if edited.instruction_count() == 0 {
            self.state.remove()?;
            return Ok(Outcome::Stopped {
                message: "Nothing to do.".to_string(),
                exit_code: 1,
            });
        }
        self.record_dropped_picks(&edited)?;

        if !opts.force_rebase {
            onto_id =
                planner::skip_unnecessary_picks(&self.state, self.oracle.as_ref(), onto_id)?;
            self.state.write_onto(&onto_id)?;
        }

        self.worktree.checkout(onto_id.as_str(), true)?;
        self.worktree.update_ref("ORIG_HEAD", &orig_head, "rebase: start")?;

        self.runner(opts).run()
    }

    /// Commits pick lines the user deleted in the editor to the `dropped`
    /// artifact, so the loss is traceable.
    fn record_dropped_picks(&self, edited: &TodoProgram) -> Result<(), RebaseError> {
        let Some(backup) = self.state.read_todo_backup()? else {
            return Ok(());
        };
        let backup = TodoProgram::parse(&backup)?;
        let kept: HashSet<&str> = edited
            .lines()
            .iter()
            .filter_map(|line| line.instruction().and_then(Instruction::commit))
            .map(CommitId::as_str)
            .collect();
        for line in backup.lines() {
            let Some(token) = line.instruction().and_then(Instruction::commit) else {
                continue;
            };
            if !kept.contains(token.as_str())
                && let Ok(id) = self.oracle.rev_parse(token.as_str())
            {
                debug!(commit = %id, "pick dropped in editor");
                self.state.append_dropped(&id)?;
            }
        }
        Ok(())
    }

    /// Resumes a paused rebase.
    ///
    /// Staged changes are committed first (amending when the amend marker
    /// still matches `HEAD`), sourcing the persisted author identity; the
    /// stopped commit enters the rewritten bookkeeping; then the executor
    /// loop takes over.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::PreconditionError` when no rebase is in
    /// progress or when staged changes exist without a persisted author
    /// (the user must commit themselves), and `RebaseError::StateError`
    /// when `HEAD` moved away from the amend marker.
    pub fn continue_rebase(&self) -> Result<Outcome, RebaseError> {
        self.require_in_progress()?;
        let opts = self.state.read_options()?;

        if self.worktree.has_staged_changes() {
            let author = self.state.read_author_script()?.ok_or_else(|| {
                RebaseError::PreconditionError(
                    "You have staged changes in your working tree.\n\
                     If these changes are meant to be squashed into the previous commit,\n\
                     run 'git commit --amend' yourself, then 'regraft continue' again."
                        .into(),
                )
            })?;
            let mut request = CommitRequest {
                no_verify: true,
                message_file: self
                    .state
                    .read_message()?
                    .map(|_| self.state.message_path()),
                author: Some(author),
                ..Default::default()
            };
            if let Some(expected) = self.state.read_amend()? {
                if self.oracle.head()? != expected {
                    return Err(RebaseError::StateError(
                        "Cannot amend: HEAD moved since the rebase stopped.".into(),
                    ));
                }
                request.amend = true;
            }
            self.worktree.commit(&request)?;
            info!("committed staged changes");
        }
        self.state.clear_transients()?;

        if let Some(stopped) = self.state.read_stopped_sha()? {
            // An exec stop marks where the command ran; every other
            // pause stopped on a commit that has been rewritten by now
            // (possibly fast-forwarded, so ids may still match).
            if !self.state.stopped_for_exec() {
                let todo = TodoProgram::parse(&self.state.read_todo()?)?;
                let next_is_squash = todo
                    .peek_next_command()
                    .is_some_and(Instruction::is_squash_or_fixup);
                record_in_rewritten(&self.state, self.oracle.as_ref(), &stopped, next_is_squash)?;
            }
            self.state.clear_stopped_sha()?;
        }

        if !self.worktree.is_clean() {
            return Ok(Outcome::Stopped {
                message: "You must edit all merge conflicts and mark them as resolved\n\
                          before running 'regraft continue'."
                    .to_string(),
                exit_code: 1,
            });
        }

        self.runner(opts).run()
    }

    /// Drops the instruction the rebase stopped on and resumes.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::PreconditionError` when no rebase is in
    /// progress, and any worktree error.
    pub fn skip(&self) -> Result<Outcome, RebaseError> {
        self.require_in_progress()?;
        let opts = self.state.read_options()?;

        self.worktree.reset_hard()?;
        self.worktree.rerere_clear();
        if let Some(stopped) = self.state.read_stopped_sha()? {
            // An exec stop drops no commit; only commit pauses do.
            if !self.state.stopped_for_exec() {
                info!(commit = %stopped, "skipping commit");
                self.state.append_dropped(&stopped)?;
            }
            self.state.clear_stopped_sha()?;
        }
        self.state.clear_transients()?;

        self.runner(opts).run()
    }

    /// Aborts the rebase, dropping all state. Restoring the pre-rebase
    /// checkout is the caller's business.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::PreconditionError` when no rebase is in
    /// progress.
    pub fn abort(&self) -> Result<(), RebaseError> {
        self.require_in_progress()?;
        self.state.remove()?;
        info!("rebase aborted");
        Ok(())
    }

    /// Reopens the remaining todo in the editor.
    ///
    /// Comments are stripped first and the continuation footer appended;
    /// the edit takes effect on the next `continue`.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::PreconditionError` when no rebase is in
    /// progress, and `RebaseError::EditorError` when the editor fails.
    pub fn edit_todo(&self) -> Result<(), RebaseError> {
        self.require_in_progress()?;
        let todo = TodoProgram::parse(&self.state.read_todo()?)?;
        let mut stripped = todo.without_comments();
        stripped.append_comment_text(&planner::edit_todo_help())?;
        self.state.write_todo(&stripped.serialize())?;
        self.editor.edit(&self.state.todo_path())?;
        Ok(())
    }

    /// Reports the progress of the in-flight rebase.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::PreconditionError` when no rebase is in
    /// progress.
    pub fn status(&self) -> Result<RebaseStatus, RebaseError> {
        self.require_in_progress()?;
        let done = TodoProgram::parse(&self.state.read_done()?)?;
        let todo = TodoProgram::parse(&self.state.read_todo()?)?;
        Ok(RebaseStatus {
            head_name: self.state.read_head_name()?,
            onto: self.state.read_onto()?,
            done_count: done.instruction_count(),
            remaining_count: todo.instruction_count(),
            stopped: self.state.read_stopped_sha()?,
        })
    }
}
