//! The instruction interpreter.
//!
//! [`Runner`] consumes the todo one instruction per step: transient state
//! is cleared, the line moves to the done log, and the opcode dispatches
//! against the worktree. A step either completes, pauses the whole run
//! (conflict, `edit`, failed `exec`), or finds the todo empty and
//! finalises the rebase.
//!
//! The in-flight line is moved to `done` before dispatch, so a pause
//! leaves it consumed and `continue` proceeds with the remainder.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::RebaseError;
use crate::config::RebaseOptions;
use crate::oracle::{CommitId, ObjectOracle};
use crate::parser::{Instruction, LineKind, TodoProgram};
use crate::squash::{self, SquashFinish, SquashStyle};
use crate::state::StateDir;
use crate::worktree::{CommitRequest, WorktreeOps};

/// How a rebase invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every instruction ran; the branch has been updated and the state
    /// directory removed.
    Completed,
    /// The run paused for the user; state is on disk and the process
    /// should exit with `exit_code`.
    Stopped {
        /// User-facing explanation of the pause.
        message: String,
        /// Process exit code per the pause kind.
        exit_code: i32,
    },
}

enum StepResult {
    Executed,
    Finished,
    Stopped { message: String, exit_code: i32 },
}

/// Appends `old` to the pending rewrites and, unless the next instruction
/// continues a squash run, flushes every pending entry against the
/// current `HEAD`. This is what maps N coalesced commits to the single
/// commit that survives them.
pub(crate) fn record_in_rewritten(
    state: &StateDir,
    oracle: &dyn ObjectOracle,
    old: &CommitId,
    next_is_squash: bool,
) -> Result<(), RebaseError> {
    state.append_pending(old)?;
    if !next_is_squash {
        let new = oracle.head()?;
        for pending in state.take_pending()? {
            state.append_rewritten(&pending, &new)?;
        }
    }
    Ok(())
}

/// Executes the todo program until it is exhausted or pauses.
pub struct Runner {
    oracle: Arc<dyn ObjectOracle>,
    worktree: Arc<dyn WorktreeOps>,
    state: StateDir,
    opts: RebaseOptions,
}

impl Runner {
    /// Creates a runner over an existing state directory.
    pub fn new(
        oracle: Arc<dyn ObjectOracle>,
        worktree: Arc<dyn WorktreeOps>,
        state: StateDir,
        opts: RebaseOptions,
    ) -> Self {
        Self {
            oracle,
            worktree,
            state,
            opts,
        }
    }

    /// Runs instructions until the todo is empty (finalising the rebase)
    /// or a pause is required.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError` for non-recoverable failures: malformed todo
    /// lines, label collisions, missing labels, unreadable state.
    pub fn run(&self) -> Result<Outcome, RebaseError> {
        loop {
            match self.step()? {
                StepResult::Executed => {}
                StepResult::Finished => {
                    self.finalize()?;
                    return Ok(Outcome::Completed);
                }
                StepResult::Stopped { message, exit_code } => {
                    return Ok(Outcome::Stopped { message, exit_code });
                }
            }
        }
    }

    fn step(&self) -> Result<StepResult, RebaseError> {
        self.state.clear_transients()?;
        let mut todo = TodoProgram::parse(&self.state.read_todo()?)?;

        let instruction = loop {
            let Some(line) = todo.take_first_line() else {
                return Ok(StepResult::Finished);
            };
            self.state.append_done(line.raw())?;
            self.state.write_todo(&todo.serialize())?;
            match line.kind() {
                LineKind::Comment | LineKind::Blank => continue,
                LineKind::Instruction(Instruction::Noop) => continue,
                LineKind::Instruction(inst) => break inst.clone(),
            }
        };

        debug!(?instruction, "executing");
        self.dispatch(instruction, &todo)
    }

    fn dispatch(
        &self,
        instruction: Instruction,
        remaining: &TodoProgram,
    ) -> Result<StepResult, RebaseError> {
        match instruction {
            Instruction::Pick(token) => self.do_pick(&token, remaining),
            Instruction::Reword(token) => self.do_reword(&token, remaining),
            Instruction::Edit(token) => self.do_edit(&token),
            Instruction::Squash(token) => self.do_squash(&token, SquashStyle::Squash, remaining),
            Instruction::Fixup(token) => self.do_squash(&token, SquashStyle::Fixup, remaining),
            Instruction::Exec(cmd) => self.do_exec(&cmd),
            Instruction::Label(name) => self.do_label(&name),
            Instruction::Goto(name) => self.do_goto(&name),
            Instruction::Merge {
                message_from,
                parents,
            } => self.do_merge(message_from.as_deref(), &parents),
            Instruction::Noop => Ok(StepResult::Executed),
            Instruction::Unknown { opcode, argument } => {
                self.do_unknown(&opcode, argument.as_deref())
            }
        }
    }

    fn resolve(&self, rev: &str) -> Result<CommitId, RebaseError> {
        self.oracle
            .rev_parse(rev)
            .map_err(|_| RebaseError::TodoError(format!("invalid commit name '{rev}'")))
    }

    fn next_is_squash(remaining: &TodoProgram) -> bool {
        remaining
            .peek_next_command()
            .is_some_and(Instruction::is_squash_or_fixup)
    }

    fn pick_one(&self, id: &CommitId) -> Result<(), RebaseError> {
        self.worktree
            .cherry_pick(id, false, self.opts.keep_empty, self.opts.allow_ff())
    }

    /// Persists the standard conflict pause: stopped commit, its patch,
    /// message, and author, so `continue` can finish the step.
    fn pause_with_patch(
        &self,
        id: &CommitId,
        message: String,
        exit_code: i32,
    ) -> Result<StepResult, RebaseError> {
        self.state.write_stopped_sha(id)?;
        self.state.write_patch(&self.worktree.commit_patch(id)?)?;
        self.state.write_message(&self.oracle.message(id)?)?;
        self.state.write_author_script(&self.oracle.author(id)?)?;
        self.worktree.rerere();
        Ok(StepResult::Stopped { message, exit_code })
    }

    fn conflict_stop(&self, id: &CommitId, cause: &RebaseError) -> Result<StepResult, RebaseError> {
        let short = self.oracle.short_id(id).unwrap_or_else(|_| id.to_string());
        warn!(commit = %short, error = %cause, "could not apply commit");
        self.pause_with_patch(
            id,
            format!(
                "Could not apply {short}.\n\
                 Resolve the conflicts and run 'regraft continue',\n\
                 or run 'regraft skip' to drop this commit.",
            ),
            1,
        )
    }

    fn do_pick(&self, token: &CommitId, remaining: &TodoProgram) -> Result<StepResult, RebaseError> {
        let id = self.resolve(token.as_str())?;
        if let Err(cause) = self.pick_one(&id) {
            return self.conflict_stop(&id, &cause);
        }
        record_in_rewritten(
            &self.state,
            self.oracle.as_ref(),
            &id,
            Self::next_is_squash(remaining),
        )?;
        Ok(StepResult::Executed)
    }

    fn do_reword(
        &self,
        token: &CommitId,
        remaining: &TodoProgram,
    ) -> Result<StepResult, RebaseError> {
        let id = self.resolve(token.as_str())?;
        if let Err(cause) = self.pick_one(&id) {
            return self.conflict_stop(&id, &cause);
        }
        let request = CommitRequest {
            amend: true,
            edit: true,
            ..Default::default()
        };
        if let Err(cause) = self.worktree.commit(&request) {
            warn!(error = %cause, "could not amend for reword");
            self.state.write_stopped_sha(&id)?;
            self.state.write_amend(&self.oracle.head()?)?;
            return Ok(StepResult::Stopped {
                message: "Could not amend the commit to reword it.\n\
                          Fix the problem and run 'regraft continue'."
                    .to_string(),
                exit_code: 1,
            });
        }
        record_in_rewritten(
            &self.state,
            self.oracle.as_ref(),
            &id,
            Self::next_is_squash(remaining),
        )?;
        Ok(StepResult::Executed)
    }

    fn do_edit(&self, token: &CommitId) -> Result<StepResult, RebaseError> {
        let id = self.resolve(token.as_str())?;
        if let Err(cause) = self.pick_one(&id) {
            return self.conflict_stop(&id, &cause);
        }
        self.state.write_amend(&self.oracle.head()?)?;
        let short = self.oracle.short_id(&id)?;
        self.pause_with_patch(
            &id,
            format!(
                "Stopped at {short}. You can amend the commit now, with\n\
                 \n    git commit --amend\n\n\
                 Once you are satisfied with your changes, run\n\
                 \n    regraft continue\n",
            ),
            0,
        )
    }

    fn do_squash(
        &self,
        token: &CommitId,
        style: SquashStyle,
        remaining: &TodoProgram,
    ) -> Result<StepResult, RebaseError> {
        let id = self.resolve(token.as_str())?;
        squash::update_squash_messages(&self.state, self.oracle.as_ref(), &id, style)?;

        // The accumulated commit keeps the run's original authorship.
        let head = self.oracle.head()?;
        let author = self.oracle.author(&head)?;
        self.state.write_author_script(&author)?;

        if let Err(cause) = self
            .worktree
            .cherry_pick(&id, true, self.opts.keep_empty, false)
        {
            return self.fail_squash(&id, &cause);
        }

        let run_continues = Self::next_is_squash(remaining);
        let result = if run_continues {
            self.worktree.commit(&CommitRequest {
                amend: true,
                no_verify: true,
                message_file: Some(self.state.squash_msg_path()),
                author: Some(author),
                ..Default::default()
            })
        } else {
            match squash::plan_finish(&self.state)? {
                SquashFinish::PureFixup { message_file } => self.worktree.commit(&CommitRequest {
                    amend: true,
                    no_verify: true,
                    message_file: Some(message_file),
                    author: Some(author),
                    ..Default::default()
                }),
                SquashFinish::WithEditor { message_file } => self.worktree.commit(&CommitRequest {
                    amend: true,
                    edit: true,
                    message_file: Some(message_file),
                    author: Some(author),
                    ..Default::default()
                }),
            }
        };
        if let Err(cause) = result {
            return self.fail_squash(&id, &cause);
        }
        if !run_continues {
            squash::cleanup_messages(&self.state)?;
        }
        record_in_rewritten(&self.state, self.oracle.as_ref(), &id, run_continues)?;
        Ok(StepResult::Executed)
    }

    fn fail_squash(&self, id: &CommitId, cause: &RebaseError) -> Result<StepResult, RebaseError> {
        let short = self.oracle.short_id(id).unwrap_or_else(|_| id.to_string());
        warn!(commit = %short, error = %cause, "could not squash commit");
        squash::abandon_run(&self.state, &self.oracle.head()?)?;
        if let Some(message) = self.state.read_message()? {
            self.worktree.prime_merge_message(&message);
        }
        self.state.write_stopped_sha(id)?;
        self.state.write_patch(&self.worktree.commit_patch(id)?)?;
        self.worktree.rerere();
        Ok(StepResult::Stopped {
            message: format!(
                "Could not apply {short}.\n\
                 Resolve the conflicts and run 'regraft continue',\n\
                 or run 'regraft skip' to drop this commit.",
            ),
            exit_code: 1,
        })
    }

    fn do_exec(&self, cmd: &str) -> Result<StepResult, RebaseError> {
        // The stop marker shows where the command ran; it is never a
        // pending rewrite, so flag it as an exec stop.
        self.state.write_stopped_sha(&self.oracle.head()?)?;
        self.state.mark_stopped_for_exec()?;
        info!(cmd = %cmd, "executing");
        let status = self.worktree.run_exec(cmd)?;
        if status != 0 {
            let exit_code = if status == 127 { 1 } else { status };
            return Ok(StepResult::Stopped {
                message: format!(
                    "Execution failed: {cmd}\n\
                     You can fix the problem, and then run 'regraft continue'.",
                ),
                exit_code,
            });
        }
        if !self.worktree.is_clean() {
            return Ok(StepResult::Stopped {
                message: format!(
                    "Execution succeeded: {cmd}\n\
                     but left changes in the index and/or the worktree.\n\
                     Commit or stash them, and then run 'regraft continue'.",
                ),
                exit_code: 1,
            });
        }
        self.state.clear_stopped_sha()?;
        Ok(StepResult::Executed)
    }

    fn do_label(&self, name: &str) -> Result<StepResult, RebaseError> {
        self.state.write_label(name, &self.oracle.head()?)?;
        Ok(StepResult::Executed)
    }

    fn do_goto(&self, name: &str) -> Result<StepResult, RebaseError> {
        let id = self.state.read_label(name)?.ok_or_else(|| {
            RebaseError::TodoError(format!("goto references undefined label '{name}'"))
        })?;
        self.worktree.checkout(id.as_str(), true)?;
        Ok(StepResult::Executed)
    }

    fn do_merge(
        &self,
        message_from: Option<&str>,
        parents: &[String],
    ) -> Result<StepResult, RebaseError> {
        let mut parent_ids = Vec::with_capacity(parents.len());
        for parent in parents {
            let id = match self.state.read_label(parent)? {
                Some(id) => id,
                None => self.resolve(parent)?,
            };
            parent_ids.push(id);
        }
        let message = match message_from {
            Some(rev) => {
                // The body is taken literally from the referenced commit;
                // parent references inside it are not rewritten.
                let source = self.resolve(rev)?;
                self.oracle.message(&source)?
            }
            None => format!("Merge {}\n", parents.join(" ")),
        };
        if let Err(cause) = self.worktree.merge(&message, &parent_ids) {
            warn!(error = %cause, "could not replay merge");
            self.state.write_stopped_sha(&self.oracle.head()?)?;
            self.state.write_message(&message)?;
            self.worktree.rerere();
            return Ok(StepResult::Stopped {
                message: format!(
                    "Could not merge {}.\n\
                     Resolve the conflicts and run 'regraft continue'.",
                    parents.join(" "),
                ),
                exit_code: 1,
            });
        }
        Ok(StepResult::Executed)
    }

    fn do_unknown(
        &self,
        opcode: &str,
        argument: Option<&str>,
    ) -> Result<StepResult, RebaseError> {
        // The "opcode" may itself be a commit id (the user deleted the
        // instruction word); the token after it is the usual place.
        let commit_token = [Some(opcode), argument]
            .into_iter()
            .flatten()
            .find(|token| self.oracle.verify(token));
        if let Some(token) = commit_token {
            let id = self.resolve(token)?;
            return self.pause_with_patch(
                &id,
                format!(
                    "Unknown instruction '{opcode}'.\n\
                     Fix the todo with 'regraft edit-todo', then run 'regraft continue'.",
                ),
                1,
            );
        }
        Err(RebaseError::TodoError(format!(
            "unknown instruction '{opcode}'",
        )))
    }

    /// Updates the starting branch, notifies the post-rewrite hook and
    /// notes copy, removes the state directory, and triggers the
    /// opportunistic GC.
    fn finalize(&self) -> Result<(), RebaseError> {
        let head_name = self.state.read_head_name()?;
        let onto = self.state.read_onto()?;
        let new_head = self.oracle.head()?;

        if head_name.starts_with("refs/heads/") {
            self.worktree.update_ref(
                &head_name,
                &new_head,
                &format!("rebase finished: {head_name} onto {onto}"),
            )?;
            self.worktree.point_head_at(&head_name)?;
        }

        let payload = self.state.rewritten_payload()?;
        if !payload.is_empty() {
            self.worktree.post_rewrite_hook(&payload);
            self.worktree.copy_notes(&payload);
        }

        let verbose = self.opts.verbose || self.state.is_verbose();
        self.state.remove()?;
        self.worktree.gc_auto();

        if verbose {
            info!(head = %head_name, onto = %onto, "rebase finished");
        } else {
            debug!(head = %head_name, onto = %onto, "rebase finished");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::MemoryRepo;

    struct Fixture {
        _tmp: tempfile::TempDir,
        repo: Arc<MemoryRepo>,
        state: StateDir,
    }

    impl Fixture {
        fn runner(&self, opts: RebaseOptions) -> Runner {
            Runner::new(
                self.repo.clone(),
                self.repo.clone(),
                self.state.clone(),
                opts,
            )
        }

        fn run(&self) -> Outcome {
            self.runner(RebaseOptions::default()).run().expect("run")
        }
    }

    /// Base repo: onto0000 checked out detached, branch refs/heads/topic,
    /// commits aaaaaaaa..dddddddd stacked on base0000.
    fn make_fixture(todo: &str) -> Fixture {
        let tmp = tempfile::tempdir().expect("tempdir");
        let state = StateDir::new(tmp.path().join("regraft"));
        state.create().expect("create");

        let repo = Arc::new(MemoryRepo::new());
        repo.add_commit("base0000", &[], "tree-base", "base\n");
        repo.add_commit("onto0000", &["base0000"], "tree-onto", "onto\n");
        repo.add_commit("aaaaaaaa", &["base0000"], "tree-a", "subject a\n\nbody a\n");
        repo.add_commit("bbbbbbbb", &["aaaaaaaa"], "tree-b", "fix foo\n");
        repo.add_commit("cccccccc", &["bbbbbbbb"], "tree-c", "fixup! fix foo\n");
        repo.add_commit("dddddddd", &["cccccccc"], "tree-d", "subject d\n");
        repo.set_head("onto0000");

        state.write_todo(todo).expect("todo");
        state.write_onto(&CommitId::new("onto0000")).expect("onto");
        state
            .write_orig_head(&CommitId::new("dddddddd"))
            .expect("orig");
        state.write_head_name("refs/heads/topic").expect("head-name");
        state
            .write_options(&RebaseOptions::default())
            .expect("options");

        Fixture {
            _tmp: tmp,
            repo,
            state,
        }
    }

    // ── straight picks ──────────────────────────────────────────────

    #[test]
    fn test_should_replay_reordered_picks_and_map_rewrites() {
        let fixture = make_fixture(
            "pick dddddddd subject d\npick aaaaaaaa subject a\npick bbbbbbbb fix foo\n",
        );

        let outcome = fixture.run();

        assert_eq!(outcome, Outcome::Completed);
        // Finalisation removed the state directory
        assert!(!fixture.state.exists());
        // Three rewrites reported to the hook, oldest first
        let payloads = fixture.repo.hook_payloads();
        assert_eq!(payloads.len(), 1);
        let lines: Vec<&str> = payloads[0].lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("dddddddd "));
        assert!(lines[1].starts_with("aaaaaaaa "));
        assert!(lines[2].starts_with("bbbbbbbb "));
        assert_eq!(fixture.repo.notes_payloads().len(), 1);
        // Branch ref moved to the new head and HEAD re-attached
        let new_head = fixture.repo.head_id();
        assert_eq!(
            fixture.repo.ref_target("refs/heads/topic").as_deref(),
            Some(new_head.as_str()),
        );
        assert_eq!(
            fixture.repo.branch_name().as_deref(),
            Some("refs/heads/topic"),
        );
        assert_eq!(fixture.repo.gc_count(), 1);
        // First-parent chain runs d' ← a' ← b' from onto
        assert_eq!(fixture.repo.parents_of(&new_head), vec!["aaaaaaaa'"]);
        assert_eq!(fixture.repo.parents_of("aaaaaaaa'"), vec!["dddddddd'"]);
        assert_eq!(fixture.repo.parents_of("dddddddd'"), vec!["onto0000"]);
    }

    #[test]
    fn test_should_fast_forward_unreordered_picks_to_a_no_op() {
        let fixture = make_fixture("pick aaaaaaaa subject a\npick bbbbbbbb fix foo\n");
        fixture.repo.set_head("base0000");

        let outcome = fixture.run();

        assert_eq!(outcome, Outcome::Completed);
        // Each pick sat on the previous one, so the whole run was a
        // fast-forward back to the original tip of the range.
        assert_eq!(fixture.repo.head_id(), "bbbbbbbb");
    }

    #[test]
    fn test_should_consume_comments_and_noop_into_done() {
        let fixture = make_fixture("# kept comment\n\nnoop\npick aaaaaaaa subject a\n");

        let outcome = fixture.run();

        assert_eq!(outcome, Outcome::Completed);
        // done migrated with the state dir removal, so assert via hook
        assert_eq!(fixture.repo.hook_payloads().len(), 1);
    }

    // ── squash / fixup runs ─────────────────────────────────────────

    #[test]
    fn test_should_coalesce_fixup_run_into_single_commit() {
        let fixture =
            make_fixture("pick bbbbbbbb fix foo\nfixup cccccccc fixup! fix foo\n");

        let outcome = fixture.run();

        assert_eq!(outcome, Outcome::Completed);
        let head = fixture.repo.head_id();
        // Both old commits map to the single surviving commit
        let payload = &fixture.repo.hook_payloads()[0];
        assert_eq!(
            payload,
            &format!("bbbbbbbb {head}\ncccccccc {head}\n"),
        );
        // A pure-fixup run keeps the original pick's message
        assert_eq!(fixture.repo.message_of(&head), "fix foo\n");
    }

    #[test]
    fn test_should_open_editor_message_for_squash_run() {
        // The trailing edit keeps the state dir alive for inspection.
        let fixture = make_fixture(
            "pick bbbbbbbb fix foo\nsquash cccccccc fixup! fix foo\nedit dddddddd subject d\n",
        );

        let outcome = fixture.run();

        let Outcome::Stopped { exit_code, .. } = outcome else {
            panic!("expected edit pause");
        };
        assert_eq!(exit_code, 0);
        // The editor-backed finish copied the combined message to SQUASH_MSG
        let scratch =
            std::fs::read_to_string(fixture.state.dir().join("SQUASH_MSG")).expect("scratch");
        assert!(scratch.starts_with("# This is a combination of 2 commits.\n"));
        assert!(scratch.contains("# The first commit's message is:\n\nfix foo\n"));
        assert!(scratch.contains("# This is the 2nd commit message:\n\nfixup! fix foo\n"));
        // Run finished: accumulating files removed
        assert!(fixture.state.read_squash_msg().unwrap().is_none());
        assert!(fixture.state.read_fixup_msg().unwrap().is_none());
    }

    #[test]
    fn test_should_pause_squash_on_conflict_with_restored_message() {
        let fixture =
            make_fixture("pick bbbbbbbb fix foo\nfixup cccccccc fixup! fix foo\n");
        fixture.repo.add_conflict("cccccccc");

        let outcome = fixture.run();

        let Outcome::Stopped { exit_code, .. } = outcome else {
            panic!("expected conflict pause");
        };
        assert_eq!(exit_code, 1);
        assert_eq!(
            fixture.state.read_stopped_sha().unwrap().unwrap().as_str(),
            "cccccccc",
        );
        // The combined message became the pending commit message
        let message = fixture.state.read_message().unwrap().unwrap();
        assert!(message.starts_with("# This is a combination of 2 commits."));
        assert!(fixture.state.read_squash_msg().unwrap().is_none());
        assert!(fixture.state.read_fixup_msg().unwrap().is_none());
        // Amend marker points at the pick's commit, and MERGE_MSG is primed
        assert_eq!(
            fixture.state.read_amend().unwrap().unwrap().as_str(),
            fixture.repo.head_id(),
        );
        assert_eq!(fixture.repo.merge_msgs().len(), 1);
        // The pick stays pending until the run resolves
        let pending = fixture.state.read_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].as_str(), "bbbbbbbb");
    }

    // ── conflict pause on pick ──────────────────────────────────────

    #[test]
    fn test_should_pause_on_pick_conflict_with_full_artifacts() {
        let fixture = make_fixture("pick aaaaaaaa subject a\npick bbbbbbbb fix foo\n");
        fixture.repo.add_conflict("aaaaaaaa");

        let outcome = fixture.run();

        let Outcome::Stopped { message, exit_code } = outcome else {
            panic!("expected conflict pause");
        };
        assert_eq!(exit_code, 1);
        assert!(message.contains("Could not apply"));
        assert_eq!(
            fixture.state.read_stopped_sha().unwrap().unwrap().as_str(),
            "aaaaaaaa",
        );
        // Patch, message, and author script are materialised for continue
        let patch =
            std::fs::read_to_string(fixture.state.dir().join("patch")).expect("patch file");
        assert_eq!(patch, "patch of aaaaaaaa\n");
        assert_eq!(
            fixture.state.read_message().unwrap().unwrap(),
            "subject a\n\nbody a\n",
        );
        assert!(fixture.state.read_author_script().unwrap().is_some());
        // The conflicting pick is consumed; only the next pick remains,
        // and done + todo still reproduce the original program
        assert_eq!(
            fixture.state.read_todo().unwrap(),
            "pick bbbbbbbb fix foo\n",
        );
        let done = fixture.state.read_done().unwrap();
        let todo = fixture.state.read_todo().unwrap();
        assert_eq!(
            format!("{done}{todo}"),
            "pick aaaaaaaa subject a\npick bbbbbbbb fix foo\n",
        );
        // Nothing was recorded as rewritten
        assert!(fixture.state.read_pending().unwrap().is_empty());
        assert!(fixture.state.read_rewritten().unwrap().is_empty());
    }

    // ── reword ──────────────────────────────────────────────────────

    #[test]
    fn test_should_pause_when_reword_amend_fails() {
        let fixture = make_fixture("reword aaaaaaaa subject a\n");
        fixture.repo.fail_next_commit();

        let Outcome::Stopped { message, exit_code } = fixture.run() else {
            panic!("expected amend pause");
        };
        assert_eq!(exit_code, 1);
        assert!(message.contains("Could not amend"));
        assert_eq!(
            fixture.state.read_stopped_sha().unwrap().unwrap().as_str(),
            "aaaaaaaa",
        );
        // The pick itself landed; the marker allows amending on continue
        assert_eq!(
            fixture.state.read_amend().unwrap().unwrap().as_str(),
            fixture.repo.head_id(),
        );
    }

    // ── edit pause ──────────────────────────────────────────────────

    #[test]
    fn test_should_pause_after_edit_with_amend_marker() {
        let fixture = make_fixture("pick aaaaaaaa subject a\nedit bbbbbbbb fix foo\n");

        let outcome = fixture.run();

        let Outcome::Stopped { message, exit_code } = outcome else {
            panic!("expected edit pause");
        };
        assert_eq!(exit_code, 0);
        assert!(message.contains("Stopped at"));
        assert_eq!(
            fixture.state.read_stopped_sha().unwrap().unwrap().as_str(),
            "bbbbbbbb",
        );
        // The edit's pick committed, and the amend marker holds that HEAD
        assert_eq!(
            fixture.state.read_amend().unwrap().unwrap().as_str(),
            fixture.repo.head_id(),
        );
        // The earlier pick was already finalised in the rewritten list
        let rewritten = fixture.state.read_rewritten().unwrap();
        assert_eq!(rewritten.len(), 1);
        assert_eq!(rewritten[0].0.as_str(), "aaaaaaaa");
    }

    // ── exec ────────────────────────────────────────────────────────

    #[test]
    fn test_should_map_command_not_found_to_exit_one() {
        let fixture = make_fixture("exec nosuchcmd\n");
        fixture.repo.set_exec_code("nosuchcmd", 127);

        let outcome = fixture.run();

        let Outcome::Stopped { message, exit_code } = outcome else {
            panic!("expected exec pause");
        };
        assert_eq!(exit_code, 1);
        assert!(message.contains("Execution failed: nosuchcmd"));
        // Worktree untouched: stopped-sha records the HEAD it ran at,
        // flagged as an exec stop so resume does not treat it as a rewrite
        assert_eq!(
            fixture.state.read_stopped_sha().unwrap().unwrap().as_str(),
            "onto0000",
        );
        assert!(fixture.state.stopped_for_exec());
    }

    #[test]
    fn test_should_propagate_nonzero_exec_status() {
        let fixture = make_fixture("exec make check\n");
        fixture.repo.set_exec_code("make check", 2);

        let Outcome::Stopped { exit_code, .. } = fixture.run() else {
            panic!("expected exec pause");
        };
        assert_eq!(exit_code, 2);
    }

    #[test]
    fn test_should_pause_when_exec_leaves_worktree_dirty() {
        let fixture = make_fixture("exec touch file\n");
        fixture.repo.set_dirty_after_exec("touch file");

        let Outcome::Stopped { message, exit_code } = fixture.run() else {
            panic!("expected dirty pause");
        };
        assert_eq!(exit_code, 1);
        assert!(message.contains("left changes"));
    }

    #[test]
    fn test_should_continue_past_successful_exec() {
        let fixture = make_fixture("pick aaaaaaaa subject a\nexec true\n");

        assert_eq!(fixture.run(), Outcome::Completed);
    }

    #[test]
    fn test_should_clear_exec_stop_marker_after_success() {
        // The trailing edit keeps the state dir alive for inspection.
        let fixture = make_fixture("exec true\nedit aaaaaaaa subject a\n");

        let Outcome::Stopped { exit_code, .. } = fixture.run() else {
            panic!("expected edit pause");
        };
        assert_eq!(exit_code, 0);
        // The successful exec left no marker; the stop belongs to the edit
        assert_eq!(
            fixture.state.read_stopped_sha().unwrap().unwrap().as_str(),
            "aaaaaaaa",
        );
        assert!(!fixture.state.stopped_for_exec());
    }

    // ── labels, goto, merge ─────────────────────────────────────────

    #[test]
    fn test_should_replay_merge_program() {
        let fixture = make_fixture(
            "label start\n\
             pick aaaaaaaa subject a\n\
             label rewritten-aaaaaaa\n\
             goto start\n\
             pick bbbbbbbb fix foo\n\
             label rewritten-bbbbbbb\n\
             goto rewritten-aaaaaaa\n\
             merge -c mmmmmmmm rewritten-bbbbbbb\n",
        );
        fixture.repo.add_commit(
            "mmmmmmmm",
            &["aaaaaaaa", "bbbbbbbb"],
            "tree-m",
            "Merge branch 'side'\n",
        );

        let outcome = fixture.run();

        assert_eq!(outcome, Outcome::Completed);
        let head = fixture.repo.head_id();
        let parents = fixture.repo.parents_of(&head);
        assert_eq!(parents.len(), 2);
        assert_eq!(parents[0], "aaaaaaaa'");
        assert_eq!(parents[1], "bbbbbbbb'");
        // The message body came from the -c commit
        assert_eq!(fixture.repo.message_of(&head), "Merge branch 'side'\n");
    }

    #[test]
    fn test_should_fail_on_duplicate_label() {
        let fixture = make_fixture("label here\nlabel here\n");

        let err = fixture.runner(RebaseOptions::default()).run().unwrap_err();
        assert!(err.to_string().contains("already defined"));
    }

    #[test]
    fn test_should_fail_on_goto_to_missing_label() {
        let fixture = make_fixture("goto nowhere\n");

        let err = fixture.runner(RebaseOptions::default()).run().unwrap_err();
        assert!(err.to_string().contains("undefined label"));
    }

    #[test]
    fn test_should_build_default_merge_message_from_parents() {
        let fixture = make_fixture("label side\nmerge side\n");

        let outcome = fixture.run();

        assert_eq!(outcome, Outcome::Completed);
        let head = fixture.repo.head_id();
        assert_eq!(fixture.repo.message_of(&head), "Merge side\n");
    }

    // ── unknown instructions ────────────────────────────────────────

    #[test]
    fn test_should_pause_on_unknown_opcode_with_valid_commit() {
        let fixture = make_fixture("frobnicate aaaaaaaa subject a\n");

        let Outcome::Stopped { message, exit_code } = fixture.run() else {
            panic!("expected pause");
        };
        assert_eq!(exit_code, 1);
        assert!(message.contains("Unknown instruction 'frobnicate'"));
        assert!(message.contains("edit-todo"));
        assert_eq!(
            fixture.state.read_stopped_sha().unwrap().unwrap().as_str(),
            "aaaaaaaa",
        );
    }

    #[test]
    fn test_should_pause_when_instruction_word_was_deleted() {
        // The line starts directly with a commit id.
        let fixture = make_fixture("aaaaaaaa subject a\n");

        let Outcome::Stopped { message, exit_code } = fixture.run() else {
            panic!("expected pause");
        };
        assert_eq!(exit_code, 1);
        assert!(message.contains("Unknown instruction 'aaaaaaaa'"));
        assert_eq!(
            fixture.state.read_stopped_sha().unwrap().unwrap().as_str(),
            "aaaaaaaa",
        );
    }

    #[test]
    fn test_should_die_on_unknown_opcode_without_commit() {
        let fixture = make_fixture("frobnicate widget hard\n");

        let err = fixture.runner(RebaseOptions::default()).run().unwrap_err();
        assert!(err.to_string().contains("unknown instruction 'frobnicate'"));
    }

    // ── rewritten accounting invariants ─────────────────────────────

    #[test]
    fn test_should_account_every_replayed_commit_exactly_once() {
        // Pause before the end so the rewritten list is still on disk.
        let fixture = make_fixture(
            "pick aaaaaaaa subject a\n\
             pick bbbbbbbb fix foo\n\
             fixup cccccccc fixup! fix foo\n\
             edit dddddddd subject d\n",
        );

        let Outcome::Stopped { exit_code, .. } = fixture.run() else {
            panic!("expected edit pause");
        };
        assert_eq!(exit_code, 0);

        let rewritten = fixture.state.read_rewritten().unwrap();
        let pending = fixture.state.read_pending().unwrap();
        // a, b, c finalised; d is recorded when continue resumes
        assert_eq!(rewritten.len(), 3);
        assert!(pending.is_empty());
        let olds: Vec<&str> = rewritten.iter().map(|(old, _)| old.as_str()).collect();
        assert_eq!(olds, vec!["aaaaaaaa", "bbbbbbbb", "cccccccc"]);
        // The coalesced pair maps to one new commit
        assert_eq!(rewritten[1].1, rewritten[2].1);
    }
}
