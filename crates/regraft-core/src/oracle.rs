//! Read-only commit-graph access.
//!
//! Defines the [`ObjectOracle`] trait for all read-only object-store
//! queries and provides [`CliObjectOracle`], the production implementation
//! that shells out to `git`. This abstraction enables unit-testing the
//! planner and executor without requiring an actual repository.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::RebaseError;

/// Content-addressed identifier of a commit.
///
/// Opaque to the engine; only the oracle assigns meaning. Both full and
/// abbreviated forms are carried verbatim and re-resolved where needed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitId(String);

impl CommitId {
    /// Wraps a textual commit identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Author identity restored on commits created after a pause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorInfo {
    /// Author name.
    pub name: String,
    /// Author email.
    pub email: String,
    /// Author date, in whatever format the oracle reported it.
    pub date: String,
}

impl AuthorInfo {
    /// Serialises the identity as shell-evaluable assignments, the format
    /// of the `author-script` state file.
    pub fn to_script(&self) -> String {
        format!(
            "GIT_AUTHOR_NAME={}\nGIT_AUTHOR_EMAIL={}\nGIT_AUTHOR_DATE={}\n",
            sq_quote(&self.name),
            sq_quote(&self.email),
            sq_quote(&self.date),
        )
    }

    /// Parses the `author-script` format back into a structured identity.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::StateError` when an assignment is missing or
    /// a value is not a well-formed single-quoted string.
    pub fn parse_script(text: &str) -> Result<Self, RebaseError> {
        let mut name = None;
        let mut email = None;
        let mut date = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                RebaseError::StateError(format!("Malformed author-script line: {line}"))
            })?;
            let value = sq_dequote(value).ok_or_else(|| {
                RebaseError::StateError(format!("Malformed author-script value: {value}"))
            })?;
            match key {
                "GIT_AUTHOR_NAME" => name = Some(value),
                "GIT_AUTHOR_EMAIL" => email = Some(value),
                "GIT_AUTHOR_DATE" => date = Some(value),
                _ => {}
            }
        }

        match (name, email, date) {
            (Some(name), Some(email), Some(date)) => Ok(Self { name, email, date }),
            _ => Err(RebaseError::StateError(
                "author-script is missing an assignment".into(),
            )),
        }
    }
}

/// Quotes a value for shell evaluation using single quotes.
fn sq_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Reverses [`sq_quote`]; returns `None` for anything not produced by it.
fn sq_dequote(s: &str) -> Option<String> {
    let inner = s.strip_prefix('\'')?.strip_suffix('\'')?;
    Some(inner.replace("'\\''", "'"))
}

/// Abstraction over read-only commit queries.
///
/// Implementations must be `Send + Sync` so they can be shared behind an
/// `Arc` between the engine and the executor.
pub trait ObjectOracle: Send + Sync {
    /// Resolves a revision expression to a commit id.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::GitError` when the revision does not resolve.
    fn rev_parse(&self, rev: &str) -> Result<CommitId, RebaseError>;

    /// Returns whether a revision resolves to a commit.
    fn verify(&self, rev: &str) -> bool;

    /// Returns the abbreviated form of a commit id.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::GitError` if the command fails.
    fn short_id(&self, id: &CommitId) -> Result<String, RebaseError>;

    /// Returns a commit's parents, first parent first.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::GitError` if the command fails.
    fn parents(&self, id: &CommitId) -> Result<Vec<CommitId>, RebaseError>;

    /// Returns the identity of a commit's tree.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::GitError` if the command fails.
    fn tree(&self, id: &CommitId) -> Result<String, RebaseError>;

    /// Returns the full commit message, headers stripped.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::GitError` if the command fails.
    fn message(&self, id: &CommitId) -> Result<String, RebaseError>;

    /// Returns the commit subject (first message line).
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::GitError` if the command fails.
    fn subject(&self, id: &CommitId) -> Result<String, RebaseError>;

    /// Returns the author identity of a commit.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::GitError` if the command fails.
    fn author(&self, id: &CommitId) -> Result<AuthorInfo, RebaseError>;

    /// Enumerates `upstream..tip` in topological order, oldest first,
    /// de-duplicated against the upstream side by cherry-pick equivalence.
    /// Merge commits are excluded unless `include_merges` is set.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::GitError` if the command fails.
    fn rev_list(
        &self,
        upstream: &str,
        tip: &str,
        include_merges: bool,
    ) -> Result<Vec<CommitId>, RebaseError>;

    /// Resolves `HEAD` to a commit id.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::GitError` when `HEAD` does not resolve.
    fn head(&self) -> Result<CommitId, RebaseError>;

    /// Returns the full ref name `HEAD` points at, or `None` when detached.
    fn symbolic_head(&self) -> Option<String>;

    /// Returns the configured committer identity.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::GitError` when no identity is configured.
    fn committer_ident(&self) -> Result<String, RebaseError>;
}

/// Production [`ObjectOracle`] implementation that shells out to `git`.
#[derive(Debug)]
pub struct CliObjectOracle {
    repo_root: PathBuf,
}

impl CliObjectOracle {
    /// Creates a new instance rooted at `repo_root`.
    pub fn new(repo_root: PathBuf) -> Self {
        Self { repo_root }
    }
}

impl ObjectOracle for CliObjectOracle {
    fn rev_parse(&self, rev: &str) -> Result<CommitId, RebaseError> {
        let spec = format!("{rev}^{{commit}}");
        let out = run_git(&self.repo_root, &["rev-parse", "--verify", "--quiet", &spec])?;
        Ok(CommitId::new(out.trim()))
    }

    fn verify(&self, rev: &str) -> bool {
        self.rev_parse(rev).is_ok()
    }

    fn short_id(&self, id: &CommitId) -> Result<String, RebaseError> {
        let out = run_git(&self.repo_root, &["rev-parse", "--short", id.as_str()])?;
        Ok(out.trim().to_string())
    }

    fn parents(&self, id: &CommitId) -> Result<Vec<CommitId>, RebaseError> {
        let out = run_git(
            &self.repo_root,
            &["rev-list", "--parents", "-n", "1", id.as_str()],
        )?;
        Ok(out
            .split_whitespace()
            .skip(1)
            .map(CommitId::new)
            .collect())
    }

    fn tree(&self, id: &CommitId) -> Result<String, RebaseError> {
        let spec = format!("{id}^{{tree}}");
        let out = run_git(&self.repo_root, &["rev-parse", &spec])?;
        Ok(out.trim().to_string())
    }

    fn message(&self, id: &CommitId) -> Result<String, RebaseError> {
        run_git(
            &self.repo_root,
            &["log", "-1", "--format=%B", id.as_str()],
        )
    }

    fn subject(&self, id: &CommitId) -> Result<String, RebaseError> {
        let out = run_git(
            &self.repo_root,
            &["log", "-1", "--format=%s", id.as_str()],
        )?;
        Ok(out.trim_end().to_string())
    }

    fn author(&self, id: &CommitId) -> Result<AuthorInfo, RebaseError> {
        let out = run_git(
            &self.repo_root,
            &["log", "-1", "--format=%an%n%ae%n%ad", id.as_str()],
        )?;
        let mut lines = out.lines();
        let name = lines.next().unwrap_or_default().to_string();
        let email = lines.next().unwrap_or_default().to_string();
        let date = lines.next().unwrap_or_default().to_string();
        Ok(AuthorInfo { name, email, date })
    }

    fn rev_list(
        &self,
        upstream: &str,
        tip: &str,
        include_merges: bool,
    ) -> Result<Vec<CommitId>, RebaseError> {
        let range = format!("{upstream}...{tip}");
        let mut args = vec![
            "rev-list",
            "--cherry-pick",
            "--right-only",
            "--topo-order",
            "--reverse",
        ];
        if !include_merges {
            args.push("--no-merges");
        }
        args.push(&range);
        let out = run_git(&self.repo_root, &args)?;
        Ok(out.lines().map(|l| CommitId::new(l.trim())).collect())
    }

    fn head(&self) -> Result<CommitId, RebaseError> {
        self.rev_parse("HEAD")
    }

    fn symbolic_head(&self) -> Option<String> {
        let out = run_git(&self.repo_root, &["symbolic-ref", "--quiet", "HEAD"]).ok()?;
        let name = out.trim();
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }

    fn committer_ident(&self) -> Result<String, RebaseError> {
        let out = run_git(&self.repo_root, &["var", "GIT_COMMITTER_IDENT"])?;
        Ok(out.trim().to_string())
    }
}

/// Runs a git command and returns its stdout.
fn run_git(cwd: &Path, args: &[&str]) -> Result<String, RebaseError> {
    debug!(cwd = %cwd.display(), args = ?args, "git");
    let output = std::process::Command::new("git")
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
