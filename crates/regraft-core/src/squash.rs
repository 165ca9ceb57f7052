//! Combined-message accumulation across squash/fixup runs.
//!
//! The combined message lives on disk (`message-squash`) specifically so a
//! process crash does not lose it: every count change writes through. The
//! sibling `message-fixup` exists exactly while the run has seen only
//! `fixup` instructions, which lets a pure-fixup run finalise without
//! opening the editor.

use std::path::PathBuf;

use crate::RebaseError;
use crate::oracle::{CommitId, ObjectOracle};
use crate::state::StateDir;

/// Whether a run step keeps or discards the incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SquashStyle {
    /// Keep the commit's message in the combined result.
    Squash,
    /// Embed the commit's message commented out.
    Fixup,
}

/// How the final commit of a squash run is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SquashFinish {
    /// The run saw only fixups: commit from `message-fixup` without the
    /// editor and with hooks suppressed.
    PureFixup {
        /// File holding the original pick's message.
        message_file: PathBuf,
    },
    /// The run contains a squash: commit from `message-squash` with the
    /// editor open.
    WithEditor {
        /// File holding the accumulated combined message.
        message_file: PathBuf,
    },
}

fn header_line(count: usize) -> String {
    format!("# This is a combination of {count} commits.")
}

fn parse_header_count(header: &str) -> Option<usize> {
    header
        .strip_prefix("# This is a combination of ")?
        .strip_suffix(" commits.")?
        .parse()
        .ok()
}

fn with_trailing_newline(mut text: String) -> String {
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

/// Comments a message out line by line.
fn comment_out(text: &str) -> String {
    let mut out = String::new();
    for line in text.lines() {
        if line.is_empty() {
            out.push_str("#\n");
        } else {
            out.push_str("# ");
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Formats an English ordinal: 1st, 2nd, 3rd, 4th, ... with the 11th-13th
/// exception.
pub fn ordinal(n: usize) -> String {
    let suffix = match n % 100 {
        11..=13 => "th",
        _ => match n % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        },
    };
    format!("{n}{suffix}")
}

/// Folds one squash/fixup step for `commit` into the message arena.
///
/// Creates `message-squash` (seeding `message-fixup` with the current
/// `HEAD`'s message) when no run is in progress, otherwise bumps the count
/// in the header and preserves the rest verbatim. Returns the new count.
///
/// # Errors
///
/// Returns `RebaseError::StateError` when an existing `message-squash`
/// has a corrupt header, or any oracle/IO error.
pub fn update_squash_messages(
    state: &StateDir,
    oracle: &dyn ObjectOracle,
    commit: &CommitId,
    style: SquashStyle,
) -> Result<usize, RebaseError> {
    let (mut combined, count) = match state.read_squash_msg()? {
        Some(existing) => {
            let (header, rest) = existing.split_once('\n').ok_or_else(|| {
                RebaseError::StateError("message-squash has no header line".into())
            })?;
            let previous = parse_header_count(header).ok_or_else(|| {
                RebaseError::StateError(format!("corrupt message-squash header: {header}"))
            })?;
            let count = previous + 1;
            (format!("{}\n{rest}", header_line(count)), count)
        }
        None => {
            let head = oracle.head()?;
            let first_message = oracle.message(&head)?;
            state.write_fixup_msg(&first_message)?;

            let mut combined = header_line(2);
            combined.push('\n');
            combined.push_str("# The first commit's message is:\n\n");
            combined.push_str(&with_trailing_newline(first_message));
            (combined, 2)
        }
    };

    let message = oracle.message(commit)?;
    match style {
        SquashStyle::Squash => {
            state.clear_fixup_msg()?;
            combined.push_str(&format!(
                "\n# This is the {} commit message:\n\n",
                ordinal(count),
            ));
            combined.push_str(&with_trailing_newline(message));
        }
        SquashStyle::Fixup => {
            combined.push_str(&format!(
                "\n# The {} commit message will be skipped:\n\n",
                ordinal(count),
            ));
            combined.push_str(&comment_out(&message));
        }
    }

    state.write_squash_msg(&combined)?;
    Ok(count)
}

/// Decides how the final commit of the current run is created.
///
/// For an editor-backed finish the combined message is also copied to the
/// sibling `SQUASH_MSG` scratch file.
///
/// # Errors
///
/// Returns `RebaseError::StateError` when no run is in progress.
pub fn plan_finish(state: &StateDir) -> Result<SquashFinish, RebaseError> {
    if state.read_squash_msg()?.is_none() {
        return Err(RebaseError::StateError(
            "no squash run in progress".into(),
        ));
    }
    if state.read_fixup_msg()?.is_some() {
        Ok(SquashFinish::PureFixup {
            message_file: state.fixup_msg_path(),
        })
    } else {
        state.copy_squash_to_scratch()?;
        Ok(SquashFinish::WithEditor {
            message_file: state.squash_msg_path(),
        })
    }
}

/// Removes the run's message files after a successful final commit.
///
/// # Errors
///
/// Returns `RebaseError::IoError` on failure.
pub fn cleanup_messages(state: &StateDir) -> Result<(), RebaseError> {
    state.clear_squash_msg()?;
    state.clear_fixup_msg()
}

/// Abandons the run on a cherry-pick or commit failure: the combined
/// message becomes the pending commit message, the pure-fixup message is
/// dropped, and the amend marker is set to `head` so `continue` amends.
///
/// # Errors
///
/// Returns `RebaseError::IoError` on failure.
pub fn abandon_run(state: &StateDir, head: &CommitId) -> Result<(), RebaseError> {
    if let Some(combined) = state.read_squash_msg()? {
        state.write_message(&combined)?;
    }
    state.clear_squash_msg()?;
    state.clear_fixup_msg()?;
    state.write_amend(head)
}
