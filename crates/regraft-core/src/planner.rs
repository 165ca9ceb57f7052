//! Todo program planning.
//!
//! Generates the initial instruction stream from a revision range and
//! applies the optional transformations: autosquash rearrangement, exec
//! insertion, unnecessary-pick skipping, and the preserve-merges
//! label/goto/merge expansion.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::RebaseError;
use crate::oracle::{CommitId, ObjectOracle};
use crate::parser::{Instruction, TodoLine, TodoProgram};
use crate::squash::SquashStyle;
use crate::state::StateDir;

/// Generates the initial todo for `upstream..tip`: one `pick` per commit,
/// oldest first, merges flattened away.
///
/// Commits whose tree equals their first parent's tree are emitted
/// commented out unless `keep_empty` is set.
///
/// # Errors
///
/// Returns any oracle error.
pub fn build_todo(
    oracle: &dyn ObjectOracle,
    upstream: &str,
    tip: &CommitId,
    keep_empty: bool,
) -> Result<TodoProgram, RebaseError> {
    let mut program = TodoProgram::new();
    for id in oracle.rev_list(upstream, tip.as_str(), false)? {
        let short = oracle.short_id(&id)?;
        let subject = oracle.subject(&id)?;
        let empty = match oracle.parents(&id)?.first() {
            Some(parent) => oracle.tree(&id)? == oracle.tree(parent)?,
            None => false,
        };
        let raw = if empty && !keep_empty {
            format!("# pick {short} {subject}")
        } else {
            format!("pick {short} {subject}")
        };
        program.push(TodoLine::parse(&raw)?);
    }
    debug!(instructions = program.instruction_count(), "todo generated");
    Ok(program)
}

/// Splits a `squash! X` / `fixup! X` subject into its style and target
/// needle.
fn split_autosquash_subject(subject: &str) -> Option<(SquashStyle, &str)> {
    if let Some(rest) = subject.strip_prefix("squash! ") {
        Some((SquashStyle::Squash, rest))
    } else if let Some(rest) = subject.strip_prefix("fixup! ") {
        Some((SquashStyle::Fixup, rest))
    } else {
        None
    }
}

/// Rewrites a line's opcode to `squash`/`fixup`, keeping the rest intact.
fn reword_opcode(line: &TodoLine, style: SquashStyle) -> Result<TodoLine, RebaseError> {
    let rest = line
        .raw()
        .trim_start()
        .split_once(char::is_whitespace)
        .map(|(_, rest)| rest)
        .unwrap_or("");
    let opcode = match style {
        SquashStyle::Squash => "squash",
        SquashStyle::Fixup => "fixup",
    };
    TodoLine::parse(&format!("{opcode} {rest}"))
}

/// Moves `squash! X` / `fixup! X` lines to immediately after their
/// targets, switching their opcodes accordingly.
///
/// A target is the first line, top to bottom, whose commit subject has
/// `X` as a prefix, or whose commit `X` resolves to. Each squash/fixup
/// line moves at most once; several may pile onto the same target, in
/// their original order, which makes the transformation idempotent.
///
/// # Errors
///
/// Returns any oracle error.
pub fn rearrange_autosquash(
    program: TodoProgram,
    oracle: &dyn ObjectOracle,
) -> Result<TodoProgram, RebaseError> {
    struct Entry {
        index: usize,
        id: CommitId,
        subject: String,
    }

    let mut entries = Vec::new();
    for (index, line) in program.lines().iter().enumerate() {
        if let Some(token) = line.instruction().and_then(Instruction::commit) {
            let id = oracle.rev_parse(token.as_str())?;
            let subject = oracle.subject(&id)?;
            entries.push(Entry { index, id, subject });
        }
    }

    let mut attached: BTreeMap<usize, Vec<(usize, SquashStyle)>> = BTreeMap::new();
    let mut moved: HashSet<usize> = HashSet::new();

    for entry in &entries {
        let Some((style, needle)) = split_autosquash_subject(&entry.subject) else {
            continue;
        };
        let by_id = oracle.rev_parse(needle).ok();
        let target = entries.iter().find(|t| {
            t.index != entry.index
                && split_autosquash_subject(&t.subject).is_none()
                && (t.subject.starts_with(needle) || by_id.as_ref() == Some(&t.id))
        });
        if let Some(target) = target {
            attached
                .entry(target.index)
                .or_default()
                .push((entry.index, style));
            moved.insert(entry.index);
        }
    }

    if moved.is_empty() {
        return Ok(program);
    }

    let lines = program.lines();
    let mut out = TodoProgram::new();
    for (index, line) in lines.iter().enumerate() {
        if moved.contains(&index) {
            continue;
        }
        out.push(line.clone());
        if let Some(squashers) = attached.get(&index) {
            for &(mover, style) in squashers {
                out.push(reword_opcode(&lines[mover], style)?);
            }
        }
    }
    Ok(out)
}

/// Inserts `exec <cmd>` after every pick, deferred past each pick's
/// trailing squash/fixup run: one exec line before every pick except the
/// first, and one at the very end.
///
/// # Errors
///
/// Returns `RebaseError::TodoError` only for an unparseable command line.
pub fn insert_exec(program: TodoProgram, cmd: &str) -> Result<TodoProgram, RebaseError> {
    let exec_raw = format!("exec {cmd}");
    let mut out = TodoProgram::new();
    let mut seen_pick = false;
    for line in program.lines() {
        if matches!(line.instruction(), Some(Instruction::Pick(_))) {
            if seen_pick {
                out.push(TodoLine::parse(&exec_raw)?);
            }
            seen_pick = true;
        }
        out.push(line.clone());
    }
    if seen_pick {
        out.push(TodoLine::parse(&exec_raw)?);
    }
    Ok(out)
}

/// Migrates the leading run of picks that merely fast-forward `onto` into
/// the done log, returning the advanced `onto`.
///
/// A pick qualifies while its commit's first parent equals the current
/// `onto`. Comments between qualifying picks migrate along with them. If
/// the remaining todo then begins with a squash/fixup, the final `onto`
/// is seeded into `rewritten-pending` so the run coalesces into the
/// correct predecessor.
///
/// # Errors
///
/// Returns any oracle, parse, or IO error.
pub fn skip_unnecessary_picks(
    state: &StateDir,
    oracle: &dyn ObjectOracle,
    onto: CommitId,
) -> Result<CommitId, RebaseError> {
    let todo = TodoProgram::parse(&state.read_todo()?)?;
    let lines = todo.lines();

    let mut onto = onto;
    let mut cut = 0;
    let mut index = 0;
    let mut skipped_any = false;
    while index < lines.len() {
        let line = &lines[index];
        if line.is_comment_or_blank() {
            index += 1;
            continue;
        }
        let Some(Instruction::Pick(token)) = line.instruction() else {
            break;
        };
        let id = oracle.rev_parse(token.as_str())?;
        if oracle.parents(&id)?.first() != Some(&onto) {
            break;
        }
        onto = id;
        skipped_any = true;
        index += 1;
        cut = index;
    }

    if cut > 0 {
        for line in &lines[..cut] {
            state.append_done(line.raw())?;
        }
        let mut rest = TodoProgram::new();
        for line in &lines[cut..] {
            rest.push(line.clone());
        }
        state.write_todo(&rest.serialize())?;
        debug!(skipped = cut, onto = %onto, "unnecessary picks migrated to done");

        if skipped_any
            && rest
                .peek_next_command()
                .is_some_and(Instruction::is_squash_or_fixup)
        {
            state.append_pending(&onto)?;
        }
    }

    Ok(onto)
}

/// Generates the preserve-merges program for `upstream..tip`: a
/// label/goto/merge expansion that recreates merge commits instead of
/// flattening them.
///
/// # Errors
///
/// Returns any oracle error.
pub fn build_preserve_merges_todo(
    oracle: &dyn ObjectOracle,
    upstream: &str,
    tip: &CommitId,
) -> Result<TodoProgram, RebaseError> {
    struct Info {
        id: CommitId,
        short: String,
        subject: String,
        parents: Vec<CommitId>,
    }

    enum Emit {
        Goto(String),
        Pick(usize),
        Merge(usize, Vec<String>),
    }

    let ids = oracle.rev_list(upstream, tip.as_str(), true)?;
    let rebased: HashSet<CommitId> = ids.iter().cloned().collect();

    let mut infos = Vec::with_capacity(ids.len());
    for id in ids {
        infos.push(Info {
            short: oracle.short_id(&id)?,
            subject: oracle.subject(&id)?,
            parents: oracle.parents(&id)?,
            id,
        });
    }
    let shorts: HashMap<&CommitId, &str> = infos
        .iter()
        .map(|info| (&info.id, info.short.as_str()))
        .collect();
    let label_of = |id: &CommitId| format!("rewritten-{}", shorts[id]);

    let mut emits = Vec::new();
    let mut need_label: HashSet<CommitId> = HashSet::new();
    let mut prev: Option<CommitId> = None;
    for (index, info) in infos.iter().enumerate() {
        let first_parent = info.parents.first();
        if first_parent != prev.as_ref() {
            match first_parent {
                Some(parent) if rebased.contains(parent) => {
                    need_label.insert(parent.clone());
                    emits.push(Emit::Goto(label_of(parent)));
                }
                _ => emits.push(Emit::Goto("onto".to_string())),
            }
        }
        if info.parents.len() > 1 {
            let mut refs = Vec::with_capacity(info.parents.len() - 1);
            for parent in &info.parents[1..] {
                if rebased.contains(parent) {
                    need_label.insert(parent.clone());
                    refs.push(label_of(parent));
                } else {
                    refs.push(parent.as_str().to_string());
                }
            }
            emits.push(Emit::Merge(index, refs));
        } else {
            emits.push(Emit::Pick(index));
        }
        prev = Some(info.id.clone());
    }

    let mut raw_lines = vec!["label onto".to_string()];
    for emit in emits {
        match emit {
            Emit::Goto(name) => raw_lines.push(format!("goto {name}")),
            Emit::Pick(index) => {
                let info = &infos[index];
                raw_lines.push(format!("pick {} {}", info.short, info.subject));
                if need_label.contains(&info.id) {
                    raw_lines.push(format!("label rewritten-{}", info.short));
                }
            }
            Emit::Merge(index, refs) => {
                let info = &infos[index];
                raw_lines.push(format!("merge -c {} {}", info.short, refs.join(" ")));
                if need_label.contains(&info.id) {
                    raw_lines.push(format!("label rewritten-{}", info.short));
                }
            }
        }
    }

    // Collapse duplicate adjacent lines and a goto that directly follows
    // its own label.
    let mut program = TodoProgram::new();
    let mut previous: Option<String> = None;
    for raw in raw_lines {
        let redundant = match &previous {
            Some(prev_raw) => {
                *prev_raw == raw
                    || prev_raw
                        .strip_prefix("label ")
                        .is_some_and(|name| raw.strip_prefix("goto ") == Some(name))
            }
            None => false,
        };
        if redundant {
            continue;
        }
        program.push(TodoLine::parse(&raw)?);
        previous = Some(raw);
    }
    Ok(program)
}

/// The comment block appended to a freshly generated todo before the
/// first editor invocation.
pub fn todo_help(range: &str, onto_short: &str) -> String {
    format!(
        "#\n\
         # Rebase {range} onto {onto_short}\n\
         #\n\
         # Commands:\n\
         #  p, pick = use commit\n\
         #  r, reword = use commit, but edit the commit message\n\
         #  e, edit = use commit, but stop for amending\n\
         #  s, squash = use commit, but meld into previous commit\n\
         #  f, fixup = like \"squash\", but discard this commit's log message\n\
         #  x, exec = run command (the rest of the line) using shell\n\
         #  l, label = record current HEAD under the given name\n\
         #  g, goto = reset HEAD to the given label\n\
         #  m, merge = recreate a merge commit with the listed parents\n\
         #\n\
         # These lines can be re-ordered; they are executed from top to bottom.\n\
         #\n\
         # If you remove a line here THAT COMMIT WILL BE LOST.\n\
         # However, if you remove everything, the rebase will be aborted.\n\
         #\n",
    )
}

/// The comment block appended by `edit-todo`.
pub fn edit_todo_help() -> String {
    "#\n\
     # You are editing the todo file of an ongoing interactive rebase.\n\
     # To continue the rebase after editing, run:\n\
     #     regraft continue\n\
     #\n"
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::oracle::AuthorInfo;

    #[derive(Clone)]
    struct StubCommit {
        parents: Vec<String>,
        tree: String,
        subject: String,
    }

    /// In-memory commit graph with a fixed range enumeration order.
    struct GraphOracle {
        commits: HashMap<String, StubCommit>,
        range: Vec<String>,
    }

    impl GraphOracle {
        fn new() -> Self {
            Self {
                commits: HashMap::new(),
                range: Vec::new(),
            }
        }

        fn commit(mut self, id: &str, parents: &[&str], tree: &str, subject: &str) -> Self {
            self.commits.insert(
                id.to_string(),
                StubCommit {
                    parents: parents.iter().map(|p| p.to_string()).collect(),
                    tree: tree.to_string(),
                    subject: subject.to_string(),
                },
            );
            self
        }

        fn range(mut self, ids: &[&str]) -> Self {
            self.range = ids.iter().map(|i| i.to_string()).collect();
            self
        }

        fn resolve(&self, rev: &str) -> Option<String> {
            if self.commits.contains_key(rev) {
                return Some(rev.to_string());
            }
            // Abbreviated ids resolve by unique prefix.
            let mut matches = self.commits.keys().filter(|id| id.starts_with(rev));
            match (matches.next(), matches.next()) {
                (Some(id), None) => Some(id.clone()),
                _ => None,
            }
        }

        fn get(&self, id: &CommitId) -> Result<&StubCommit, RebaseError> {
            self.commits
                .get(id.as_str())
                .ok_or_else(|| RebaseError::GitError(format!("unknown commit {id}")))
        }
    }

    impl ObjectOracle for GraphOracle {
        fn rev_parse(&self, rev: &str) -> Result<CommitId, RebaseError> {
            self.resolve(rev)
                .map(CommitId::new)
                .ok_or_else(|| RebaseError::GitError(format!("bad revision '{rev}'")))
        }
        fn verify(&self, rev: &str) -> bool {
            self.resolve(rev).is_some()
        }
        fn short_id(&self, id: &CommitId) -> Result<String, RebaseError> {
            Ok(id.as_str().chars().take(7).collect())
        }
        fn parents(&self, id: &CommitId) -> Result<Vec<CommitId>, RebaseError> {
            Ok(self.get(id)?.parents.iter().map(CommitId::new).collect())
        }
        fn tree(&self, id: &CommitId) -> Result<String, RebaseError> {
            Ok(self.get(id)?.tree.clone())
        }
        fn message(&self, id: &CommitId) -> Result<String, RebaseError> {
            Ok(format!("{}\n", self.get(id)?.subject))
        }
        fn subject(&self, id: &CommitId) -> Result<String, RebaseError> {
            Ok(self.get(id)?.subject.clone())
        }
        fn author(&self, _id: &CommitId) -> Result<AuthorInfo, RebaseError> {
            Ok(AuthorInfo {
                name: "Stub".into(),
                email: "stub@example.com".into(),
                date: "@1 +0000".into(),
            })
        }
        fn rev_list(
            &self,
            _upstream: &str,
            _tip: &str,
            include_merges: bool,
        ) -> Result<Vec<CommitId>, RebaseError> {
            Ok(self
                .range
                .iter()
                .filter(|id| include_merges || self.commits[*id].parents.len() <= 1)
                .map(CommitId::new)
                .collect())
        }
        fn head(&self) -> Result<CommitId, RebaseError> {
            Err(RebaseError::GitError("no head in stub".into()))
        }
        fn symbolic_head(&self) -> Option<String> {
            None
        }
        fn committer_ident(&self) -> Result<String, RebaseError> {
            Ok("Stub <stub@example.com>".into())
        }
    }

    fn make_state() -> (tempfile::TempDir, StateDir) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let state = StateDir::new(tmp.path().join("regraft"));
        state.create().expect("create");
        (tmp, state)
    }

    // ── initial generation ──────────────────────────────────────────

    #[test]
    fn test_should_generate_pick_per_commit_oldest_first() {
        let oracle = GraphOracle::new()
            .commit("aaaaaaa1", &["base0000"], "t1", "first change")
            .commit("bbbbbbb2", &["aaaaaaa1"], "t2", "second change")
            .range(&["aaaaaaa1", "bbbbbbb2"]);

        let todo = build_todo(&oracle, "base0000", &CommitId::new("bbbbbbb2"), false).unwrap();
        assert_eq!(
            todo.serialize(),
            "pick aaaaaaa first change\npick bbbbbbb second change\n",
        );
    }

    #[test]
    fn test_should_comment_out_empty_commit_without_keep_empty() {
        let oracle = GraphOracle::new()
            .commit("base0000", &[], "t0", "base")
            .commit("aaaaaaa1", &["base0000"], "t0", "no-op change")
            .range(&["aaaaaaa1"]);

        let todo = build_todo(&oracle, "base0000", &CommitId::new("aaaaaaa1"), false).unwrap();
        assert_eq!(todo.serialize(), "# pick aaaaaaa no-op change\n");
        assert_eq!(todo.instruction_count(), 0);

        let kept = build_todo(&oracle, "base0000", &CommitId::new("aaaaaaa1"), true).unwrap();
        assert_eq!(kept.serialize(), "pick aaaaaaa no-op change\n");
    }

    // ── autosquash ──────────────────────────────────────────────────

    #[test]
    fn test_should_move_fixup_after_its_target() {
        let oracle = GraphOracle::new()
            .commit("aaaaaaa1", &["base0000"], "t1", "fix foo")
            .commit("bbbbbbb2", &["aaaaaaa1"], "t2", "unrelated")
            .commit("ccccccc3", &["bbbbbbb2"], "t3", "fixup! fix foo")
            .range(&["aaaaaaa1", "bbbbbbb2", "ccccccc3"]);

        let todo = build_todo(&oracle, "base0000", &CommitId::new("ccccccc3"), false).unwrap();
        let rearranged = rearrange_autosquash(todo, &oracle).unwrap();

        assert_eq!(
            rearranged.serialize(),
            "pick aaaaaaa fix foo\n\
             fixup ccccccc fixup! fix foo\n\
             pick bbbbbbb unrelated\n",
        );
    }

    #[test]
    fn test_should_match_squash_target_by_commit_id() {
        let oracle = GraphOracle::new()
            .commit("aaaaaaa1", &["base0000"], "t1", "fix foo")
            .commit("ccccccc3", &["aaaaaaa1"], "t3", "squash! aaaaaaa1")
            .range(&["aaaaaaa1", "ccccccc3"]);

        let todo = build_todo(&oracle, "base0000", &CommitId::new("ccccccc3"), false).unwrap();
        let rearranged = rearrange_autosquash(todo, &oracle).unwrap();

        assert_eq!(
            rearranged.serialize(),
            "pick aaaaaaa fix foo\nsquash ccccccc squash! aaaaaaa1\n",
        );
    }

    #[test]
    fn test_should_pile_multiple_fixups_onto_one_target_in_order() {
        let oracle = GraphOracle::new()
            .commit("aaaaaaa1", &["base0000"], "t1", "fix foo")
            .commit("bbbbbbb2", &["aaaaaaa1"], "t2", "fixup! fix foo")
            .commit("ccccccc3", &["bbbbbbb2"], "t3", "fixup! fix foo")
            .range(&["aaaaaaa1", "bbbbbbb2", "ccccccc3"]);

        let todo = build_todo(&oracle, "base0000", &CommitId::new("ccccccc3"), false).unwrap();
        let rearranged = rearrange_autosquash(todo, &oracle).unwrap();

        assert_eq!(
            rearranged.serialize(),
            "pick aaaaaaa fix foo\n\
             fixup bbbbbbb fixup! fix foo\n\
             fixup ccccccc fixup! fix foo\n",
        );
    }

    #[test]
    fn test_should_be_idempotent() {
        let oracle = GraphOracle::new()
            .commit("aaaaaaa1", &["base0000"], "t1", "fix foo")
            .commit("bbbbbbb2", &["aaaaaaa1"], "t2", "unrelated")
            .commit("ccccccc3", &["bbbbbbb2"], "t3", "fixup! fix foo")
            .range(&["aaaaaaa1", "bbbbbbb2", "ccccccc3"]);

        let todo = build_todo(&oracle, "base0000", &CommitId::new("ccccccc3"), false).unwrap();
        let once = rearrange_autosquash(todo, &oracle).unwrap();
        let twice = rearrange_autosquash(once.clone(), &oracle).unwrap();
        assert_eq!(once.serialize(), twice.serialize());
    }

    #[test]
    fn test_should_leave_unmatched_fixup_in_place() {
        let oracle = GraphOracle::new()
            .commit("aaaaaaa1", &["base0000"], "t1", "something else")
            .commit("ccccccc3", &["aaaaaaa1"], "t3", "fixup! no such subject")
            .range(&["aaaaaaa1", "ccccccc3"]);

        let todo = build_todo(&oracle, "base0000", &CommitId::new("ccccccc3"), false).unwrap();
        let rearranged = rearrange_autosquash(todo.clone(), &oracle).unwrap();
        assert_eq!(rearranged.serialize(), todo.serialize());
    }

    // ── exec insertion ──────────────────────────────────────────────

    #[test]
    fn test_should_insert_exec_after_each_pick_run() {
        let todo = TodoProgram::parse(
            "pick aaaaaaa one\npick bbbbbbb two\nsquash ccccccc squash! two\n",
        )
        .unwrap();

        let with_exec = insert_exec(todo, "make check").unwrap();
        assert_eq!(
            with_exec.serialize(),
            "pick aaaaaaa one\n\
             exec make check\n\
             pick bbbbbbb two\n\
             squash ccccccc squash! two\n\
             exec make check\n",
        );
    }

    #[test]
    fn test_should_not_insert_exec_without_picks() {
        let todo = TodoProgram::parse("noop\n").unwrap();
        let with_exec = insert_exec(todo, "make check").unwrap();
        assert_eq!(with_exec.serialize(), "noop\n");
    }

    // ── unnecessary-pick skipping ───────────────────────────────────

    #[test]
    fn test_should_migrate_leading_fast_forward_picks() {
        let oracle = GraphOracle::new()
            .commit("aaaaaaa1", &["onto0000"], "t1", "one")
            .commit("bbbbbbb2", &["aaaaaaa1"], "t2", "two")
            .commit("ccccccc3", &["onto0000"], "t3", "three")
            .range(&["aaaaaaa1", "bbbbbbb2", "ccccccc3"]);
        let (_tmp, state) = make_state();
        state
            .write_todo("pick aaaaaaa one\npick bbbbbbb two\npick ccccccc three\n")
            .unwrap();

        let onto =
            skip_unnecessary_picks(&state, &oracle, CommitId::new("onto0000")).unwrap();

        // aaaaaaa and bbbbbbb fast-forward; ccccccc does not sit on bbbbbbb
        assert_eq!(onto.as_str(), "bbbbbbb2");
        assert_eq!(
            state.read_done().unwrap(),
            "pick aaaaaaa one\npick bbbbbbb two\n",
        );
        assert_eq!(state.read_todo().unwrap(), "pick ccccccc three\n");
        assert!(state.read_pending().unwrap().is_empty());
    }

    #[test]
    fn test_should_seed_pending_when_squash_run_follows_skip() {
        let oracle = GraphOracle::new()
            .commit("aaaaaaa1", &["onto0000"], "t1", "one")
            .commit("bbbbbbb2", &["aaaaaaa1"], "t2", "fixup! one")
            .range(&["aaaaaaa1", "bbbbbbb2"]);
        let (_tmp, state) = make_state();
        state
            .write_todo("pick aaaaaaa one\nfixup bbbbbbb fixup! one\n")
            .unwrap();

        let onto =
            skip_unnecessary_picks(&state, &oracle, CommitId::new("onto0000")).unwrap();

        assert_eq!(onto.as_str(), "aaaaaaa1");
        let pending = state.read_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].as_str(), "aaaaaaa1");
    }

    #[test]
    fn test_should_not_skip_when_first_pick_is_not_on_onto() {
        let oracle = GraphOracle::new()
            .commit("aaaaaaa1", &["elsewhere"], "t1", "one")
            .range(&["aaaaaaa1"]);
        let (_tmp, state) = make_state();
        state.write_todo("pick aaaaaaa one\n").unwrap();

        let onto =
            skip_unnecessary_picks(&state, &oracle, CommitId::new("onto0000")).unwrap();

        assert_eq!(onto.as_str(), "onto0000");
        assert_eq!(state.read_todo().unwrap(), "pick aaaaaaa one\n");
        assert!(state.read_done().unwrap().is_empty());
    }

    // ── preserve-merges expansion ───────────────────────────────────

    #[test]
    fn test_should_expand_merge_topology_into_labels_and_gotos() {
        // base ── B ──────── D (merge of C)
        //    \── C ─────────/
        let oracle = GraphOracle::new()
            .commit("bbbbbbb1", &["base0000"], "tb", "trunk work")
            .commit("ccccccc2", &["base0000"], "tc", "branch work")
            .commit("ddddddd3", &["bbbbbbb1", "ccccccc2"], "td", "merge branch")
            .range(&["bbbbbbb1", "ccccccc2", "ddddddd3"]);

        let todo =
            build_preserve_merges_todo(&oracle, "base0000", &CommitId::new("ddddddd3")).unwrap();

        assert_eq!(
            todo.serialize(),
            "label onto\n\
             pick bbbbbbb trunk work\n\
             label rewritten-bbbbbbb\n\
             goto onto\n\
             pick ccccccc branch work\n\
             label rewritten-ccccccc\n\
             goto rewritten-bbbbbbb\n\
             merge -c ddddddd rewritten-ccccccc\n",
        );
    }

    #[test]
    fn test_should_reference_unrebased_merge_parent_by_raw_id() {
        let oracle = GraphOracle::new()
            .commit("ddddddd3", &["base0000", "outside9"], "td", "merge external")
            .commit("outside9", &["ancient0"], "to", "external")
            .range(&["ddddddd3"]);

        let todo =
            build_preserve_merges_todo(&oracle, "base0000", &CommitId::new("ddddddd3")).unwrap();

        assert_eq!(
            todo.serialize(),
            "label onto\nmerge -c ddddddd outside9\n",
        );
    }

    #[test]
    fn test_should_emit_plain_pick_chain_without_merges() {
        let oracle = GraphOracle::new()
            .commit("aaaaaaa1", &["base0000"], "t1", "one")
            .commit("bbbbbbb2", &["aaaaaaa1"], "t2", "two")
            .range(&["aaaaaaa1", "bbbbbbb2"]);

        let todo =
            build_preserve_merges_todo(&oracle, "base0000", &CommitId::new("bbbbbbb2")).unwrap();

        assert_eq!(
            todo.serialize(),
            "label onto\npick aaaaaaa one\npick bbbbbbb two\n",
        );
    }

    // ── help footers ────────────────────────────────────────────────

    #[test]
    fn test_should_render_parseable_help_comments() {
        let mut program = TodoProgram::parse("pick aaaaaaa one\n").unwrap();
        program
            .append_comment_text(&todo_help("base0000..cafef00", "base000"))
            .unwrap();
        program.append_comment_text(&edit_todo_help()).unwrap();
        assert_eq!(program.instruction_count(), 1);
        assert!(program.serialize().contains("THAT COMMIT WILL BE LOST"));
    }
}
