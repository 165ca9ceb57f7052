//! Todo instruction stream parsing and re-serialisation.
//!
//! The todo file is a first-class value: every line keeps its original
//! textual form so the stream round-trips through the user's editor, and
//! comments survive in place. Parsing is pure and independently testable;
//! the executor decides what unknown opcodes mean.

use crate::RebaseError;
use crate::oracle::CommitId;

/// One rebase instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Replay the commit onto `HEAD`.
    Pick(CommitId),
    /// Replay, then reopen the commit message in the editor.
    Reword(CommitId),
    /// Replay, then stop so the user may amend.
    Edit(CommitId),
    /// Meld into the previous commit, keeping both messages.
    Squash(CommitId),
    /// Meld into the previous commit, discarding this message.
    Fixup(CommitId),
    /// Run a shell command.
    Exec(String),
    /// Record the current `HEAD` under a name.
    Label(String),
    /// Reset `HEAD` to a previously recorded label.
    Goto(String),
    /// Recreate a merge commit with the listed parents. Each parent is a
    /// raw commit id or a label name, resolved at execution time.
    Merge {
        /// Commit whose message body is reused, from `-c <id>`.
        message_from: Option<String>,
        /// Parent refs beyond the current `HEAD`.
        parents: Vec<String>,
    },
    /// Do nothing.
    Noop,
    /// An unrecognised opcode, kept so the executor can apply the
    /// malformed-todo policy.
    Unknown {
        /// The unrecognised first token.
        opcode: String,
        /// The second token, if any; possibly a commit id.
        argument: Option<String>,
    },
}

impl Instruction {
    /// Returns the commit this instruction replays, if it replays one.
    pub fn commit(&self) -> Option<&CommitId> {
        match self {
            Self::Pick(id)
            | Self::Reword(id)
            | Self::Edit(id)
            | Self::Squash(id)
            | Self::Fixup(id) => Some(id),
            _ => None,
        }
    }

    /// Returns whether this instruction continues a squash run.
    pub fn is_squash_or_fixup(&self) -> bool {
        matches!(self, Self::Squash(_) | Self::Fixup(_))
    }
}

/// Classification of one todo line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// An instruction line.
    Instruction(Instruction),
    /// A `#` comment line, preserved verbatim.
    Comment,
    /// An empty or whitespace-only line.
    Blank,
}

/// One line of the todo program, with its original text retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoLine {
    raw: String,
    kind: LineKind,
}

impl TodoLine {
    /// Parses a single todo line.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::TodoError` when a recognised opcode is
    /// missing its argument. Unrecognised opcodes parse into
    /// [`Instruction::Unknown`] rather than erroring.
    pub fn parse(raw: &str) -> Result<Self, RebaseError> {
        let raw = raw.trim_end_matches(['\n', '\r']).to_string();
        let kind = parse_kind(&raw)?;
        Ok(Self { raw, kind })
    }

    /// Returns the original line text.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Returns the parsed classification.
    pub fn kind(&self) -> &LineKind {
        &self.kind
    }

    /// Returns the instruction, if this line carries one.
    pub fn instruction(&self) -> Option<&Instruction> {
        match &self.kind {
            LineKind::Instruction(inst) => Some(inst),
            _ => None,
        }
    }

    /// Returns whether the line is a comment or blank.
    pub fn is_comment_or_blank(&self) -> bool {
        matches!(self.kind, LineKind::Comment | LineKind::Blank)
    }
}

fn parse_kind(raw: &str) -> Result<LineKind, RebaseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(LineKind::Blank);
    }
    if trimmed.starts_with('#') {
        return Ok(LineKind::Comment);
    }

    let (opcode, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((op, rest)) => (op, rest.trim_start()),
        None => (trimmed, ""),
    };

    let require_commit = |what: &str| -> Result<CommitId, RebaseError> {
        let token = rest.split_whitespace().next().ok_or_else(|| {
            RebaseError::TodoError(format!("'{what}' is missing its commit: {raw}"))
        })?;
        Ok(CommitId::new(token))
    };
    let require_name = |what: &str| -> Result<String, RebaseError> {
        rest.split_whitespace()
            .next()
            .map(str::to_string)
            .ok_or_else(|| {
                RebaseError::TodoError(format!("'{what}' is missing its name: {raw}"))
            })
    };

    let inst = match opcode {
        "pick" | "p" => Instruction::Pick(require_commit("pick")?),
        "reword" | "r" => Instruction::Reword(require_commit("reword")?),
        "edit" | "e" => Instruction::Edit(require_commit("edit")?),
        "squash" | "s" => Instruction::Squash(require_commit("squash")?),
        "fixup" | "f" => Instruction::Fixup(require_commit("fixup")?),
        "exec" | "x" => {
            if rest.is_empty() {
                return Err(RebaseError::TodoError(format!(
                    "'exec' is missing its command: {raw}",
                )));
            }
            Instruction::Exec(rest.to_string())
        }
        "label" | "l" => Instruction::Label(require_name("label")?),
        "goto" | "g" => Instruction::Goto(require_name("goto")?),
        "merge" | "m" => parse_merge(raw, rest)?,
        "noop" => Instruction::Noop,
        _ => Instruction::Unknown {
            opcode: opcode.to_string(),
            argument: rest.split_whitespace().next().map(str::to_string),
        },
    };
    Ok(LineKind::Instruction(inst))
}

fn parse_merge(raw: &str, rest: &str) -> Result<Instruction, RebaseError> {
    let mut tokens = rest.split_whitespace().peekable();
    let message_from = if tokens.peek() == Some(&"-c") {
        tokens.next();
        Some(tokens.next().map(str::to_string).ok_or_else(|| {
            RebaseError::TodoError(format!("'merge -c' is missing its commit: {raw}"))
        })?)
    } else {
        None
    };
    let parents: Vec<String> = tokens.map(str::to_string).collect();
    if parents.is_empty() {
        return Err(RebaseError::TodoError(format!(
            "'merge' has no parents: {raw}",
        )));
    }
    Ok(Instruction::Merge {
        message_from,
        parents,
    })
}

/// The ordered todo instruction stream, comments included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoProgram {
    lines: Vec<TodoLine>,
}

impl TodoProgram {
    /// Creates an empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a whole todo file.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::TodoError` for a line with a recognised
    /// opcode but a missing argument.
    pub fn parse(text: &str) -> Result<Self, RebaseError> {
        let mut lines = Vec::new();
        for line in text.lines() {
            lines.push(TodoLine::parse(line)?);
        }
        Ok(Self { lines })
    }

    /// Re-serialises the program, reproducing every line verbatim.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.raw);
            out.push('\n');
        }
        out
    }

    /// Returns all lines in order.
    pub fn lines(&self) -> &[TodoLine] {
        &self.lines
    }

    /// Returns whether the program has no lines at all.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Appends a line.
    pub fn push(&mut self, line: TodoLine) {
        self.lines.push(line);
    }

    /// Removes and returns the first line.
    pub fn take_first_line(&mut self) -> Option<TodoLine> {
        if self.lines.is_empty() {
            None
        } else {
            Some(self.lines.remove(0))
        }
    }

    /// Returns the next instruction without consuming it, skipping
    /// comments and blank lines.
    pub fn peek_next_command(&self) -> Option<&Instruction> {
        self.lines.iter().find_map(TodoLine::instruction)
    }

    /// Counts instruction lines (comments and blanks excluded).
    pub fn instruction_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| l.instruction().is_some())
            .count()
    }

    /// Returns a copy with all comment and blank lines removed.
    pub fn without_comments(&self) -> Self {
        Self {
            lines: self
                .lines
                .iter()
                .filter(|l| !l.is_comment_or_blank())
                .cloned()
                .collect(),
        }
    }

    /// Appends a block of comment text, line by line.
    ///
    /// # Errors
    ///
    /// Returns `RebaseError::TodoError` if a line of the block is not a
    /// comment or blank line.
    pub fn append_comment_text(&mut self, text: &str) -> Result<(), RebaseError> {
        for line in text.lines() {
            let parsed = TodoLine::parse(line)?;
            if !parsed.is_comment_or_blank() {
                return Err(RebaseError::TodoError(format!(
                    "not a comment line: {line}",
                )));
            }
            self.lines.push(parsed);
        }
        Ok(())
    }
}
