//! Rebase run options.
//!
//! [`RebaseOptions`] captures the flags chosen at `start` and is persisted
//! to `options.yml` inside the state directory, so that `continue` and
//! `skip` invocations behave exactly like the run they resume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Options governing a single rebase run.
///
/// # Examples
///
/// ```
/// use regraft_core::config::RebaseOptions;
///
/// let yaml = r#"
/// autosquash: true
/// keep_empty: false
/// force_rebase: false
/// preserve_merges: false
/// verbose: false
/// started_at: "2026-03-01T09:00:00Z"
/// "#;
///
/// let opts: RebaseOptions = serde_yaml::from_str(yaml).unwrap();
/// assert!(opts.autosquash);
/// assert!(opts.exec_cmd.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebaseOptions {
    /// Rearrange `squash!`/`fixup!` commits after their targets.
    pub autosquash: bool,

    /// Keep commits whose tree equals their parent's tree.
    pub keep_empty: bool,

    /// Replay every pick even when fast-forwarding would suffice.
    pub force_rebase: bool,

    /// Expand the todo into a label/goto/merge program instead of
    /// flattening merge commits.
    pub preserve_merges: bool,

    /// Extra progress reporting at finalisation.
    pub verbose: bool,

    /// Shell command inserted after every pick via `exec` lines.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_cmd: Option<String>,

    /// When this rebase was started.
    pub started_at: DateTime<Utc>,
}

impl Default for RebaseOptions {
    fn default() -> Self {
        Self {
            autosquash: false,
            keep_empty: false,
            force_rebase: false,
            preserve_merges: false,
            verbose: false,
            exec_cmd: None,
            started_at: Utc::now(),
        }
    }
}

impl RebaseOptions {
    /// Whether a pick may be satisfied by fast-forwarding.
    pub fn allow_ff(&self) -> bool {
        !self.force_rebase
    }
}
