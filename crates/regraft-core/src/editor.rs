//! User editor invocation.
//!
//! Defines the [`Editor`] trait so the engine can open the todo and
//! commit-message files for user editing, and [`GitEditor`], the production
//! implementation resolving the editor from the environment.

use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::RebaseError;

/// Abstraction over the user's editor.
///
/// Implementations must be `Send + Sync` so they can be shared behind an
/// `Arc` with the rest of the engine's collaborators.
pub trait Editor: Send + Sync {
    /// Opens `path` for editing and blocks until the editor exits.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::EditorError` when the editor exits non-zero
    /// or cannot be started.
    fn edit(&self, path: &Path) -> Result<(), RebaseError>;
}

/// Production [`Editor`] resolving `$GIT_EDITOR`, `$VISUAL`, `$EDITOR`,
/// falling back to `vi`.
#[derive(Debug, Default)]
pub struct GitEditor;

impl Editor for GitEditor {
    fn edit(&self, path: &Path) -> Result<(), RebaseError> {
        let editor = std::env::var("GIT_EDITOR")
            .or_else(|_| std::env::var("VISUAL"))
            .or_else(|_| std::env::var("EDITOR"))
            .unwrap_or_else(|_| "vi".to_string());

        debug!(editor = %editor, path = %path.display(), "opening editor");

        // The editor may be a command line with flags, so go through the
        // shell and pass the file as "$1".
        let status = Command::new("/bin/sh")
            .arg("-c")
            .arg(format!("{editor} \"$1\""))
            .arg(&editor)
            .arg(path)
            .status()
            .map_err(|e| RebaseError::EditorError(format!("cannot start '{editor}': {e}")))?;

        if !status.success() {
            return Err(RebaseError::EditorError(format!(
                "'{editor}' exited with {status}",
            )));
        }
        Ok(())
    }
}
