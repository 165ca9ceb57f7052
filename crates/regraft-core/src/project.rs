//! Repository discovery utilities.
//!
//! Locates the enclosing repository by walking up the directory tree
//! looking for a `.git` directory.

use std::path::PathBuf;

use crate::RebaseError;

/// Finds the repository's `.git` directory by walking up from the current
/// directory.
///
/// # Errors
///
/// Returns `RebaseError::IoError` if the current directory cannot be
/// determined, or `RebaseError::PreconditionError` if no repository is
/// found (reached filesystem root).
pub fn find_git_dir() -> Result<PathBuf, RebaseError> {
    let cwd = std::env::current_dir()?;
    let mut current = cwd.as_path();
    loop {
        let candidate = current.join(".git");
        if candidate.is_dir() {
            return Ok(candidate);
        }
        current = current.parent().ok_or_else(|| {
            RebaseError::PreconditionError("Not inside a repository".into())
        })?;
    }
}

/// Finds the repository working-tree root (the parent of `.git`).
///
/// # Errors
///
/// Same conditions as [`find_git_dir`].
pub fn find_repo_root() -> Result<PathBuf, RebaseError> {
    let git_dir = find_git_dir()?;
    git_dir
        .parent()
        .map(|p| p.to_path_buf())
        .ok_or_else(|| RebaseError::PreconditionError("Repository has no working tree".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_find_git_dir_from_cwd() {
        // The workspace this test runs in is itself a git repository.
        let dir = find_git_dir();
        if let Ok(dir) = dir {
            assert!(dir.ends_with(".git"));
        }
    }
}
