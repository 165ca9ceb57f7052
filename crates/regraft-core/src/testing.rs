//! In-memory repository double shared by the executor and engine tests.
//!
//! [`MemoryRepo`] implements both [`ObjectOracle`] and [`WorktreeOps`]
//! against a mutexed commit graph, so a single instance can be handed to
//! the engine twice behind `Arc`s. Rewritten commits get a `'` appended to
//! their id, which keeps test assertions readable.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use crate::RebaseError;
use crate::editor::Editor;
use crate::oracle::{AuthorInfo, CommitId, ObjectOracle};
use crate::worktree::{CommitRequest, WorktreeOps};

#[derive(Debug, Clone)]
pub(crate) struct StubCommit {
    pub parents: Vec<String>,
    pub tree: String,
    pub message: String,
    pub author: AuthorInfo,
}

#[derive(Debug, Default)]
struct RepoState {
    commits: HashMap<String, StubCommit>,
    head: String,
    branch: Option<String>,
    refs: HashMap<String, String>,
    range: Vec<String>,
    conflicts: HashSet<String>,
    fail_next_commit: bool,
    staged_pick: Option<String>,
    user_staged: bool,
    dirty: bool,
    exec_codes: HashMap<String, i32>,
    dirty_after_exec: HashSet<String>,
    hook_payloads: Vec<String>,
    notes_payloads: Vec<String>,
    merge_msgs: Vec<String>,
    reset_count: u32,
    rerere_clear_count: u32,
    gc_count: u32,
    has_ident: bool,
}

/// An in-memory repository implementing both collaborator traits.
#[derive(Debug, Default)]
pub(crate) struct MemoryRepo {
    inner: Mutex<RepoState>,
}

fn default_author() -> AuthorInfo {
    AuthorInfo {
        name: "Test Author".into(),
        email: "author@example.com".into(),
        date: "@1700000000 +0000".into(),
    }
}

impl MemoryRepo {
    pub fn new() -> Self {
        let repo = Self::default();
        repo.inner.lock().unwrap().has_ident = true;
        repo
    }

    pub fn add_commit(&self, id: &str, parents: &[&str], tree: &str, message: &str) {
        self.inner.lock().unwrap().commits.insert(
            id.to_string(),
            StubCommit {
                parents: parents.iter().map(|p| p.to_string()).collect(),
                tree: tree.to_string(),
                message: message.to_string(),
                author: default_author(),
            },
        );
    }

    pub fn set_head(&self, id: &str) {
        self.inner.lock().unwrap().head = id.to_string();
    }

    pub fn set_branch(&self, name: Option<&str>) {
        self.inner.lock().unwrap().branch = name.map(str::to_string);
    }

    pub fn set_range(&self, ids: &[&str]) {
        self.inner.lock().unwrap().range = ids.iter().map(|i| i.to_string()).collect();
    }

    pub fn add_conflict(&self, id: &str) {
        self.inner.lock().unwrap().conflicts.insert(id.to_string());
    }

    pub fn fail_next_commit(&self) {
        self.inner.lock().unwrap().fail_next_commit = true;
    }

    pub fn set_exec_code(&self, cmd: &str, code: i32) {
        self.inner
            .lock()
            .unwrap()
            .exec_codes
            .insert(cmd.to_string(), code);
    }

    pub fn set_dirty_after_exec(&self, cmd: &str) {
        self.inner
            .lock()
            .unwrap()
            .dirty_after_exec
            .insert(cmd.to_string());
    }

    pub fn set_user_staged(&self, staged: bool) {
        self.inner.lock().unwrap().user_staged = staged;
    }

    pub fn drop_ident(&self) {
        self.inner.lock().unwrap().has_ident = false;
    }

    pub fn head_id(&self) -> String {
        self.inner.lock().unwrap().head.clone()
    }

    pub fn branch_name(&self) -> Option<String> {
        self.inner.lock().unwrap().branch.clone()
    }

    pub fn ref_target(&self, name: &str) -> Option<String> {
        self.inner.lock().unwrap().refs.get(name).cloned()
    }

    pub fn hook_payloads(&self) -> Vec<String> {
        self.inner.lock().unwrap().hook_payloads.clone()
    }

    pub fn notes_payloads(&self) -> Vec<String> {
        self.inner.lock().unwrap().notes_payloads.clone()
    }

    pub fn merge_msgs(&self) -> Vec<String> {
        self.inner.lock().unwrap().merge_msgs.clone()
    }

    pub fn reset_count(&self) -> u32 {
        self.inner.lock().unwrap().reset_count
    }

    pub fn rerere_clear_count(&self) -> u32 {
        self.inner.lock().unwrap().rerere_clear_count
    }

    pub fn gc_count(&self) -> u32 {
        self.inner.lock().unwrap().gc_count
    }

    pub fn message_of(&self, id: &str) -> String {
        self.inner.lock().unwrap().commits[id].message.clone()
    }

    pub fn parents_of(&self, id: &str) -> Vec<String> {
        self.inner.lock().unwrap().commits[id].parents.clone()
    }

    fn resolve_locked(state: &RepoState, rev: &str) -> Option<String> {
        if rev == "HEAD" {
            return Some(state.head.clone());
        }
        if let Some(target) = state.refs.get(rev) {
            return Some(target.clone());
        }
        if state.commits.contains_key(rev) {
            return Some(rev.to_string());
        }
        let mut matches = state.commits.keys().filter(|id| id.starts_with(rev));
        match (matches.next(), matches.next()) {
            (Some(id), None) => Some(id.clone()),
            _ => None,
        }
    }

    fn new_commit(state: &mut RepoState, base: &str, commit: StubCommit) -> String {
        let id = format!("{base}'");
        state.commits.insert(id.clone(), commit);
        id
    }
}

impl ObjectOracle for MemoryRepo {
    fn rev_parse(&self, rev: &str) -> Result<CommitId, RebaseError> {
        let state = self.inner.lock().unwrap();
        Self::resolve_locked(&state, rev)
            .map(CommitId::new)
            .ok_or_else(|| RebaseError::GitError(format!("bad revision '{rev}'")))
    }

    fn verify(&self, rev: &str) -> bool {
        self.rev_parse(rev).is_ok()
    }

    fn short_id(&self, id: &CommitId) -> Result<String, RebaseError> {
        Ok(id.as_str().chars().take(7).collect())
    }

    fn parents(&self, id: &CommitId) -> Result<Vec<CommitId>, RebaseError> {
        let state = self.inner.lock().unwrap();
        state
            .commits
            .get(id.as_str())
            .map(|c| c.parents.iter().map(CommitId::new).collect())
            .ok_or_else(|| RebaseError::GitError(format!("unknown commit {id}")))
    }

    fn tree(&self, id: &CommitId) -> Result<String, RebaseError> {
        let state = self.inner.lock().unwrap();
        state
            .commits
            .get(id.as_str())
            .map(|c| c.tree.clone())
            .ok_or_else(|| RebaseError::GitError(format!("unknown commit {id}")))
    }

    fn message(&self, id: &CommitId) -> Result<String, RebaseError> {
        let state = self.inner.lock().unwrap();
        state
            .commits
            .get(id.as_str())
            .map(|c| c.message.clone())
            .ok_or_else(|| RebaseError::GitError(format!("unknown commit {id}")))
    }

    fn subject(&self, id: &CommitId) -> Result<String, RebaseError> {
        Ok(self
            .message(id)?
            .lines()
            .next()
            .unwrap_or_default()
            .to_string())
    }

    fn author(&self, id: &CommitId) -> Result<AuthorInfo, RebaseError> {
        let state = self.inner.lock().unwrap();
        state
            .commits
            .get(id.as_str())
            .map(|c| c.author.clone())
            .ok_or_else(|| RebaseError::GitError(format!("unknown commit {id}")))
    }

    fn rev_list(
        &self,
        _upstream: &str,
        _tip: &str,
        include_merges: bool,
    ) -> Result<Vec<CommitId>, RebaseError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .range
            .iter()
            .filter(|id| include_merges || state.commits[*id].parents.len() <= 1)
            .map(CommitId::new)
            .collect())
    }

    fn head(&self) -> Result<CommitId, RebaseError> {
        Ok(CommitId::new(self.inner.lock().unwrap().head.clone()))
    }

    fn symbolic_head(&self) -> Option<String> {
        self.inner.lock().unwrap().branch.clone()
    }

    fn committer_ident(&self) -> Result<String, RebaseError> {
        if self.inner.lock().unwrap().has_ident {
            Ok("Test Committer <committer@example.com>".into())
        } else {
            Err(RebaseError::GitError("no identity configured".into()))
        }
    }
}

impl WorktreeOps for MemoryRepo {
    fn cherry_pick(
        &self,
        id: &CommitId,
        no_commit: bool,
        _allow_empty: bool,
        allow_ff: bool,
    ) -> Result<(), RebaseError> {
        let mut state = self.inner.lock().unwrap();
        if state.conflicts.contains(id.as_str()) {
            state.dirty = true;
            return Err(RebaseError::GitError(format!("conflict replaying {id}")));
        }
        let picked = state
            .commits
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| RebaseError::GitError(format!("unknown commit {id}")))?;
        if no_commit {
            state.staged_pick = Some(id.as_str().to_string());
            return Ok(());
        }
        if allow_ff && picked.parents.first() == Some(&state.head) {
            state.head = id.as_str().to_string();
            return Ok(());
        }
        let head = state.head.clone();
        let new_id = Self::new_commit(
            &mut state,
            id.as_str(),
            StubCommit {
                parents: vec![head],
                tree: picked.tree,
                message: picked.message,
                author: picked.author,
            },
        );
        state.head = new_id;
        Ok(())
    }

    fn commit(&self, req: &CommitRequest) -> Result<(), RebaseError> {
        let mut state = self.inner.lock().unwrap();
        if state.fail_next_commit {
            state.fail_next_commit = false;
            return Err(RebaseError::GitError("commit failed".into()));
        }
        let message = match &req.message_file {
            Some(file) => std::fs::read_to_string(file).map_err(RebaseError::IoError)?,
            None => state
                .commits
                .get(&state.head)
                .map(|c| c.message.clone())
                .unwrap_or_default(),
        };
        let author = req.author.clone().unwrap_or_else(default_author);
        let head = state.head.clone();
        if req.amend {
            let amended = state
                .commits
                .get(&head)
                .cloned()
                .ok_or_else(|| RebaseError::GitError(format!("unknown HEAD {head}")))?;
            let new_id = Self::new_commit(
                &mut state,
                &head,
                StubCommit {
                    parents: amended.parents,
                    tree: amended.tree,
                    message,
                    author,
                },
            );
            state.head = new_id;
        } else {
            let new_id = Self::new_commit(
                &mut state,
                &format!("wip-{head}"),
                StubCommit {
                    parents: vec![head],
                    tree: "staged-tree".into(),
                    message,
                    author,
                },
            );
            state.head = new_id;
        }
        state.staged_pick = None;
        state.user_staged = false;
        Ok(())
    }

    fn checkout(&self, rev: &str, detach: bool) -> Result<(), RebaseError> {
        let mut state = self.inner.lock().unwrap();
        let id = Self::resolve_locked(&state, rev)
            .ok_or_else(|| RebaseError::GitError(format!("bad revision '{rev}'")))?;
        state.head = id;
        if detach {
            state.branch = None;
        } else {
            state.branch = Some(rev.to_string());
        }
        Ok(())
    }

    fn merge(&self, message: &str, parents: &[CommitId]) -> Result<(), RebaseError> {
        let mut state = self.inner.lock().unwrap();
        let head = state.head.clone();
        let mut all_parents = vec![head.clone()];
        all_parents.extend(parents.iter().map(|p| p.as_str().to_string()));
        let new_id = Self::new_commit(
            &mut state,
            &format!("merge-{head}"),
            StubCommit {
                parents: all_parents,
                tree: "merged-tree".into(),
                message: message.to_string(),
                author: default_author(),
            },
        );
        state.head = new_id;
        Ok(())
    }

    fn has_staged_changes(&self) -> bool {
        let state = self.inner.lock().unwrap();
        state.user_staged || state.staged_pick.is_some()
    }

    fn is_clean(&self) -> bool {
        let state = self.inner.lock().unwrap();
        !state.dirty && !state.user_staged && state.staged_pick.is_none()
    }

    fn reset_hard(&self) -> Result<(), RebaseError> {
        let mut state = self.inner.lock().unwrap();
        state.dirty = false;
        state.user_staged = false;
        state.staged_pick = None;
        state.reset_count += 1;
        Ok(())
    }

    fn rerere(&self) {}

    fn rerere_clear(&self) {
        self.inner.lock().unwrap().rerere_clear_count += 1;
    }

    fn update_ref(&self, name: &str, id: &CommitId, _reflog_msg: &str) -> Result<(), RebaseError> {
        self.inner
            .lock()
            .unwrap()
            .refs
            .insert(name.to_string(), id.as_str().to_string());
        Ok(())
    }

    fn point_head_at(&self, branch_ref: &str) -> Result<(), RebaseError> {
        self.inner.lock().unwrap().branch = Some(branch_ref.to_string());
        Ok(())
    }

    fn commit_patch(&self, id: &CommitId) -> Result<String, RebaseError> {
        Ok(format!("patch of {id}\n"))
    }

    fn run_exec(&self, cmd: &str) -> Result<i32, RebaseError> {
        let mut state = self.inner.lock().unwrap();
        if state.dirty_after_exec.contains(cmd) {
            state.dirty = true;
        }
        Ok(state.exec_codes.get(cmd).copied().unwrap_or(0))
    }

    fn prime_merge_message(&self, text: &str) {
        self.inner.lock().unwrap().merge_msgs.push(text.to_string());
    }

    fn post_rewrite_hook(&self, payload: &str) {
        self.inner
            .lock()
            .unwrap()
            .hook_payloads
            .push(payload.to_string());
    }

    fn copy_notes(&self, payload: &str) {
        self.inner
            .lock()
            .unwrap()
            .notes_payloads
            .push(payload.to_string());
    }

    fn gc_auto(&self) {
        self.inner.lock().unwrap().gc_count += 1;
    }
}

/// An editor that approves the file untouched.
#[derive(Debug, Default)]
pub(crate) struct NoopEditor;

impl Editor for NoopEditor {
    fn edit(&self, _path: &Path) -> Result<(), RebaseError> {
        Ok(())
    }
}

/// An editor that replaces the file content, simulating user edits.
#[derive(Debug)]
pub(crate) struct ScriptedEditor {
    content: String,
}

impl ScriptedEditor {
    pub fn new(content: &str) -> Self {
        Self {
            content: content.to_string(),
        }
    }
}

impl Editor for ScriptedEditor {
    fn edit(&self, path: &Path) -> Result<(), RebaseError> {
        std::fs::write(path, &self.content)?;
        Ok(())
    }
}
