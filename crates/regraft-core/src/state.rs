//! The on-disk resumable rebase state.
//!
//! [`StateDir`] owns the directory of small files that makes a rebase
//! restartable across process invocations: the todo and done logs, the
//! message arena, the author script, pause markers, the rewritten logs,
//! and the label namespace. All state mutations flow through this type.
//!
//! The presence of the directory is the lock: only one rebase may be
//! active per repository, and `create` fails when the directory exists.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::RebaseError;
use crate::config::RebaseOptions;
use crate::oracle::{AuthorInfo, CommitId};

const TODO_FILE: &str = "git-rebase-todo";
const TODO_BACKUP_FILE: &str = "git-rebase-todo.backup";
const DONE_FILE: &str = "done";
const MESSAGE_FILE: &str = "message";
const SQUASH_MSG_FILE: &str = "message-squash";
const FIXUP_MSG_FILE: &str = "message-fixup";
const SQUASH_SCRATCH_FILE: &str = "SQUASH_MSG";
const AUTHOR_SCRIPT_FILE: &str = "author-script";
const AMEND_FILE: &str = "amend";
const STOPPED_SHA_FILE: &str = "stopped-sha";
const STOPPED_EXEC_FILE: &str = "stopped-exec";
const REWRITTEN_LIST_FILE: &str = "rewritten-list";
const REWRITTEN_PENDING_FILE: &str = "rewritten-pending";
const LABELS_DIR: &str = "labels";
const INTERACTIVE_FILE: &str = "interactive";
const VERBOSE_FILE: &str = "verbose";
const PATCH_FILE: &str = "patch";
const DROPPED_FILE: &str = "dropped";
const ORIG_HEAD_FILE: &str = "orig-head";
const UPSTREAM_FILE: &str = "upstream";
const ONTO_FILE: &str = "onto";
const HEAD_NAME_FILE: &str = "head-name";
const OPTIONS_FILE: &str = "options.yml";

/// Handle to the rebase state directory.
#[derive(Debug, Clone)]
pub struct StateDir {
    dir: PathBuf,
}

impl StateDir {
    /// Creates a handle for the given directory path. The directory itself
    /// is only created by [`create`](Self::create).
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Returns the state directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns whether a rebase is in progress.
    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    /// Creates the state directory.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::PreconditionError` when the directory already
    /// exists (another rebase is in progress), or `RebaseError::IoError`
    /// on any other failure.
    pub fn create(&self) -> Result<(), RebaseError> {
        fs::create_dir(&self.dir).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                RebaseError::PreconditionError(format!(
                    "A rebase is already in progress ({} exists). \
                     Run 'regraft continue', 'regraft skip', or 'regraft abort'.",
                    self.dir.display(),
                ))
            } else {
                RebaseError::IoError(e)
            }
        })?;
        fs::create_dir(self.dir.join(LABELS_DIR))?;
        debug!(dir = %self.dir.display(), "state directory created");
        Ok(())
    }

    /// Removes the state directory and everything in it.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn remove(&self) -> Result<(), RebaseError> {
        fs::remove_dir_all(&self.dir)?;
        debug!(dir = %self.dir.display(), "state directory removed");
        Ok(())
    }

    // ── todo / done ─────────────────────────────────────────────────

    /// Returns the path of the todo file, for editor invocations.
    pub fn todo_path(&self) -> PathBuf {
        self.dir.join(TODO_FILE)
    }

    /// Reads the current todo file.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::StateError` when the file is missing.
    pub fn read_todo(&self) -> Result<String, RebaseError> {
        self.read_opt(TODO_FILE)?
            .ok_or_else(|| RebaseError::StateError("todo file is missing".into()))
    }

    /// Rewrites the todo file atomically (sibling temp file + rename), so
    /// a crash mid-write never leaves a truncated instruction stream.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn write_todo(&self, text: &str) -> Result<(), RebaseError> {
        let tmp = self.dir.join(format!("{TODO_FILE}.new"));
        fs::write(&tmp, text)?;
        fs::rename(&tmp, self.todo_path())?;
        Ok(())
    }

    /// Snapshots the current todo to `git-rebase-todo.backup`, taken
    /// immediately before the first editor invocation.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn backup_todo(&self) -> Result<(), RebaseError> {
        fs::copy(self.todo_path(), self.dir.join(TODO_BACKUP_FILE))?;
        Ok(())
    }

    /// Reads the todo backup, if present.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure other than absence.
    pub fn read_todo_backup(&self) -> Result<Option<String>, RebaseError> {
        self.read_opt(TODO_BACKUP_FILE)
    }

    /// Appends one consumed line, verbatim, to the done log.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn append_done(&self, line: &str) -> Result<(), RebaseError> {
        self.append(DONE_FILE, &format!("{line}\n"))
    }

    /// Reads the done log; empty when nothing has been consumed yet.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure other than absence.
    pub fn read_done(&self) -> Result<String, RebaseError> {
        Ok(self.read_opt(DONE_FILE)?.unwrap_or_default())
    }

    // ── message arena ───────────────────────────────────────────────

    /// Returns the path of the `message` file, for `commit -F`.
    pub fn message_path(&self) -> PathBuf {
        self.dir.join(MESSAGE_FILE)
    }

    /// Returns the path of the accumulating squash message.
    pub fn squash_msg_path(&self) -> PathBuf {
        self.dir.join(SQUASH_MSG_FILE)
    }

    /// Returns the path of the pure-fixup message.
    pub fn fixup_msg_path(&self) -> PathBuf {
        self.dir.join(FIXUP_MSG_FILE)
    }

    /// Writes the commit message to use on the next commit action.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn write_message(&self, text: &str) -> Result<(), RebaseError> {
        self.write(MESSAGE_FILE, text)
    }

    /// Reads the pending commit message, if present.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure other than absence.
    pub fn read_message(&self) -> Result<Option<String>, RebaseError> {
        self.read_opt(MESSAGE_FILE)
    }

    /// Writes the accumulating squash message.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn write_squash_msg(&self, text: &str) -> Result<(), RebaseError> {
        self.write(SQUASH_MSG_FILE, text)
    }

    /// Reads the accumulating squash message, if a run is in progress.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure other than absence.
    pub fn read_squash_msg(&self) -> Result<Option<String>, RebaseError> {
        self.read_opt(SQUASH_MSG_FILE)
    }

    /// Removes the squash message.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn clear_squash_msg(&self) -> Result<(), RebaseError> {
        self.remove_if_present(SQUASH_MSG_FILE)
    }

    /// Writes the original pick's message for a pure-fixup run.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn write_fixup_msg(&self, text: &str) -> Result<(), RebaseError> {
        self.write(FIXUP_MSG_FILE, text)
    }

    /// Reads the pure-fixup message, if the current run has seen no
    /// `squash`.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure other than absence.
    pub fn read_fixup_msg(&self) -> Result<Option<String>, RebaseError> {
        self.read_opt(FIXUP_MSG_FILE)
    }

    /// Removes the pure-fixup message.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn clear_fixup_msg(&self) -> Result<(), RebaseError> {
        self.remove_if_present(FIXUP_MSG_FILE)
    }

    /// Copies the squash message to the sibling `SQUASH_MSG` scratch file
    /// consumed by the final editor-backed commit of a run.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn copy_squash_to_scratch(&self) -> Result<(), RebaseError> {
        fs::copy(self.squash_msg_path(), self.dir.join(SQUASH_SCRATCH_FILE))?;
        Ok(())
    }

    // ── author script ───────────────────────────────────────────────

    /// Persists the author identity to restore on the next commit.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn write_author_script(&self, author: &AuthorInfo) -> Result<(), RebaseError> {
        self.write(AUTHOR_SCRIPT_FILE, &author.to_script())
    }

    /// Reads the persisted author identity, if any.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::StateError` when the script is present but
    /// malformed.
    pub fn read_author_script(&self) -> Result<Option<AuthorInfo>, RebaseError> {
        match self.read_opt(AUTHOR_SCRIPT_FILE)? {
            Some(text) => Ok(Some(AuthorInfo::parse_script(&text)?)),
            None => Ok(None),
        }
    }

    // ── pause markers ───────────────────────────────────────────────

    /// Records the `HEAD` at the moment the user was asked to amend.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn write_amend(&self, id: &CommitId) -> Result<(), RebaseError> {
        self.write(AMEND_FILE, &format!("{id}\n"))
    }

    /// Reads the amend marker, if present.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure other than absence.
    pub fn read_amend(&self) -> Result<Option<CommitId>, RebaseError> {
        Ok(self.read_opt(AMEND_FILE)?.map(|s| CommitId::new(s.trim())))
    }

    /// Records the commit being processed when the engine paused. Any
    /// lingering exec marker is dropped, so the stop reads as a
    /// commit-producing pause unless
    /// [`mark_stopped_for_exec`](Self::mark_stopped_for_exec) follows.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn write_stopped_sha(&self, id: &CommitId) -> Result<(), RebaseError> {
        self.remove_if_present(STOPPED_EXEC_FILE)?;
        self.write(STOPPED_SHA_FILE, &format!("{id}\n"))
    }

    /// Marks the current stop as coming from an `exec` instruction,
    /// whose stopped commit is a position marker rather than a pending
    /// rewrite.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn mark_stopped_for_exec(&self) -> Result<(), RebaseError> {
        self.write(STOPPED_EXEC_FILE, "")
    }

    /// Returns whether the current stop came from an `exec` instruction.
    pub fn stopped_for_exec(&self) -> bool {
        self.dir.join(STOPPED_EXEC_FILE).is_file()
    }

    /// Reads the stopped commit, if present.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure other than absence.
    pub fn read_stopped_sha(&self) -> Result<Option<CommitId>, RebaseError> {
        Ok(self
            .read_opt(STOPPED_SHA_FILE)?
            .map(|s| CommitId::new(s.trim())))
    }

    /// Forgets the stopped commit, along with its exec marker.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn clear_stopped_sha(&self) -> Result<(), RebaseError> {
        self.remove_if_present(STOPPED_EXEC_FILE)?;
        self.remove_if_present(STOPPED_SHA_FILE)
    }

    /// Clears the per-instruction transient files (`message`,
    /// `author-script`, `amend`) at the top of each executor step.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn clear_transients(&self) -> Result<(), RebaseError> {
        self.remove_if_present(MESSAGE_FILE)?;
        self.remove_if_present(AUTHOR_SCRIPT_FILE)?;
        self.remove_if_present(AMEND_FILE)
    }

    // ── rewritten bookkeeping ───────────────────────────────────────

    /// Appends a commit whose rewrite is not yet finalised.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn append_pending(&self, old: &CommitId) -> Result<(), RebaseError> {
        self.append(REWRITTEN_PENDING_FILE, &format!("{old}\n"))
    }

    /// Reads the pending rewrites, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure other than absence.
    pub fn read_pending(&self) -> Result<Vec<CommitId>, RebaseError> {
        Ok(self
            .read_opt(REWRITTEN_PENDING_FILE)?
            .unwrap_or_default()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| CommitId::new(l.trim()))
            .collect())
    }

    /// Reads and clears the pending rewrites in one motion.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn take_pending(&self) -> Result<Vec<CommitId>, RebaseError> {
        let pending = self.read_pending()?;
        self.remove_if_present(REWRITTEN_PENDING_FILE)?;
        Ok(pending)
    }

    /// Appends a finalised `old → new` rewrite pair.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn append_rewritten(&self, old: &CommitId, new: &CommitId) -> Result<(), RebaseError> {
        self.append(REWRITTEN_LIST_FILE, &format!("{old} {new}\n"))
    }

    /// Reads the finalised rewrite pairs, in append order.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure other than absence.
    pub fn read_rewritten(&self) -> Result<Vec<(CommitId, CommitId)>, RebaseError> {
        let mut pairs = Vec::new();
        for line in self
            .read_opt(REWRITTEN_LIST_FILE)?
            .unwrap_or_default()
            .lines()
        {
            if let Some((old, new)) = line.trim().split_once(' ') {
                pairs.push((CommitId::new(old), CommitId::new(new)));
            }
        }
        Ok(pairs)
    }

    /// Returns the raw rewritten-list content fed to the post-rewrite
    /// hook; empty when no commit was rewritten.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure other than absence.
    pub fn rewritten_payload(&self) -> Result<String, RebaseError> {
        Ok(self.read_opt(REWRITTEN_LIST_FILE)?.unwrap_or_default())
    }

    // ── labels ──────────────────────────────────────────────────────

    /// Binds a label name to a commit.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::PreconditionError` when the label is already
    /// bound, or `RebaseError::StateError` for an invalid name.
    pub fn write_label(&self, name: &str, id: &CommitId) -> Result<(), RebaseError> {
        let path = self.label_path(name)?;
        if path.exists() {
            return Err(RebaseError::PreconditionError(format!(
                "label '{name}' is already defined",
            )));
        }
        fs::write(path, format!("{id}\n"))?;
        Ok(())
    }

    /// Looks up a label, returning `None` when unbound.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::StateError` for an invalid name.
    pub fn read_label(&self, name: &str) -> Result<Option<CommitId>, RebaseError> {
        let path = self.label_path(name)?;
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(CommitId::new(text.trim()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RebaseError::IoError(e)),
        }
    }

    fn label_path(&self, name: &str) -> Result<PathBuf, RebaseError> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(RebaseError::StateError(format!(
                "invalid label name '{name}'",
            )));
        }
        Ok(self.dir.join(LABELS_DIR).join(name))
    }

    // ── flags & artifacts ───────────────────────────────────────────

    /// Marks this state as belonging to an interactive rebase.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn mark_interactive(&self) -> Result<(), RebaseError> {
        self.write(INTERACTIVE_FILE, "")
    }

    /// Sets the verbose flag file.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn mark_verbose(&self) -> Result<(), RebaseError> {
        self.write(VERBOSE_FILE, "")
    }

    /// Returns whether the verbose flag file is present.
    pub fn is_verbose(&self) -> bool {
        self.dir.join(VERBOSE_FILE).is_file()
    }

    /// Materialises the patch of the commit the engine stopped on.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn write_patch(&self, text: &str) -> Result<(), RebaseError> {
        self.write(PATCH_FILE, text)
    }

    /// Records a commit the user chose to drop (skipped instruction or a
    /// pick line removed in the editor).
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn append_dropped(&self, id: &CommitId) -> Result<(), RebaseError> {
        self.append(DROPPED_FILE, &format!("{id}\n"))
    }

    // ── basic persistent values ─────────────────────────────────────

    /// Records the `HEAD` at the moment the rebase started.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn write_orig_head(&self, id: &CommitId) -> Result<(), RebaseError> {
        self.write(ORIG_HEAD_FILE, &format!("{id}\n"))
    }

    /// Reads the original `HEAD`.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::StateError` when the file is missing.
    pub fn read_orig_head(&self) -> Result<CommitId, RebaseError> {
        self.read_required(ORIG_HEAD_FILE)
            .map(|s| CommitId::new(s.trim()))
    }

    /// Records the upstream revision bounding the rebased range.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn write_upstream(&self, rev: &str) -> Result<(), RebaseError> {
        self.write(UPSTREAM_FILE, &format!("{rev}\n"))
    }

    /// Reads the upstream revision.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::StateError` when the file is missing.
    pub fn read_upstream(&self) -> Result<String, RebaseError> {
        self.read_required(UPSTREAM_FILE)
            .map(|s| s.trim().to_string())
    }

    /// Records the new base of the rebased range.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn write_onto(&self, id: &CommitId) -> Result<(), RebaseError> {
        self.write(ONTO_FILE, &format!("{id}\n"))
    }

    /// Reads the rebase base.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::StateError` when the file is missing.
    pub fn read_onto(&self) -> Result<CommitId, RebaseError> {
        self.read_required(ONTO_FILE).map(|s| CommitId::new(s.trim()))
    }

    /// Records the ref the rebase started on (`refs/heads/...`), or
    /// `detached HEAD`.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::IoError` on failure.
    pub fn write_head_name(&self, name: &str) -> Result<(), RebaseError> {
        self.write(HEAD_NAME_FILE, &format!("{name}\n"))
    }

    /// Reads the starting ref name.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::StateError` when the file is missing.
    pub fn read_head_name(&self) -> Result<String, RebaseError> {
        self.read_required(HEAD_NAME_FILE)
            .map(|s| s.trim().to_string())
    }

    /// Persists the run options.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::YamlError` or `RebaseError::IoError` on
    /// failure.
    pub fn write_options(&self, opts: &RebaseOptions) -> Result<(), RebaseError> {
        let yaml = serde_yaml::to_string(opts)?;
        self.write(OPTIONS_FILE, &yaml)
    }

    /// Loads the run options persisted at `start`.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::StateError` when the file is missing, or
    /// `RebaseError::YamlError` when it cannot be parsed.
    pub fn read_options(&self) -> Result<RebaseOptions, RebaseError> {
        let yaml = self.read_required(OPTIONS_FILE)?;
        Ok(serde_yaml::from_str(&yaml)?)
    }

    // ── low-level helpers ───────────────────────────────────────────

    fn write(&self, name: &str, contents: &str) -> Result<(), RebaseError> {
        fs::write(self.dir.join(name), contents)?;
        Ok(())
    }

    fn append(&self, name: &str, contents: &str) -> Result<(), RebaseError> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(name))?;
        file.write_all(contents.as_bytes())?;
        Ok(())
    }

    fn read_opt(&self, name: &str) -> Result<Option<String>, RebaseError> {
        match fs::read_to_string(self.dir.join(name)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RebaseError::IoError(e)),
        }
    }

    fn read_required(&self, name: &str) -> Result<String, RebaseError> {
        self.read_opt(name)?.ok_or_else(|| {
            RebaseError::StateError(format!("state file '{name}' is missing"))
        })
    }

    fn remove_if_present(&self, name: &str) -> Result<(), RebaseError> {
        match fs::remove_file(self.dir.join(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RebaseError::IoError(e)),
        }
    }
}
