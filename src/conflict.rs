//! Destination conflict handling.
//!
//! Deciding what to do about an existing destination is split in two:
//!
//! - [`ConflictPrompt`] obtains a [`ConflictDecision`], interactively or from
//!   a preset. [`AnswerPrompt`] implements the question/re-prompt loop on top
//!   of any line reader.
//! - [`resolve_destination`] is a pure function from
//!   `(destination, exists, decision)` to the [`Resolution`] the orchestrator
//!   acts on.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// What to do when the destination already exists.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConflictDecision {
    /// Leave the existing destination alone and skip the job
    Skip,
    /// Remove the existing tree, then copy
    Overwrite,
    /// Copy to a sibling directory with this name instead
    RenameTo(String),
    /// No conflict; copy to the original destination
    Proceed,
}

/// One parsed answer to the skip/overwrite/rename question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAnswer {
    /// `s` or `skip`
    Skip,
    /// `o` or `overwrite`
    Overwrite,
    /// `r` or `rename`; a name is asked for separately
    Rename,
}

/// Parse an answer, case-insensitively.
///
/// # Errors
///
/// [`Error::InvalidConflictAnswer`] for anything but `s`/`skip`,
/// `o`/`overwrite` or `r`/`rename`.
pub fn parse_conflict_answer(input: &str) -> Result<ConflictAnswer> {
    match input.trim().to_ascii_lowercase().as_str() {
        "s" | "skip" => Ok(ConflictAnswer::Skip),
        "o" | "overwrite" => Ok(ConflictAnswer::Overwrite),
        "r" | "rename" => Ok(ConflictAnswer::Rename),
        _ => Err(Error::InvalidConflictAnswer(input.trim().to_owned())),
    }
}

/// Trimmed rename target, or `None` if it is not a usable directory name.
pub fn validate_rename(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return None;
    }
    Some(name.to_owned())
}

/// Source of conflict decisions.
pub trait ConflictPrompt {
    /// Decide what to do about `destination`, which exists.
    fn choose(&mut self, destination: &Path) -> Result<ConflictDecision>;
}

/// Always answers with the same decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetConflict(pub ConflictDecision);

impl ConflictPrompt for PresetConflict {
    fn choose(&mut self, _destination: &Path) -> Result<ConflictDecision> {
        Ok(self.0.clone())
    }
}

/// Question/re-prompt loop over a line reader.
///
/// `ask` shows a question and returns the user's line; `notify` shows a
/// message. Invalid answers and unusable rename names are reported through
/// `notify` and asked again.
pub struct AnswerPrompt<A, N> {
    ask: A,
    notify: N,
}

impl<A, N> AnswerPrompt<A, N>
where
    A: FnMut(&str) -> Result<String>,
    N: FnMut(&str),
{
    /// Build a prompt from an `ask` and a `notify` callback.
    pub fn new(ask: A, notify: N) -> Self {
        Self { ask, notify }
    }
}

impl<A, N> ConflictPrompt for AnswerPrompt<A, N>
where
    A: FnMut(&str) -> Result<String>,
    N: FnMut(&str),
{
    fn choose(&mut self, destination: &Path) -> Result<ConflictDecision> {
        let name = destination
            .file_name()
            .map_or_else(|| destination.display().to_string(), |n| n.to_string_lossy().into_owned());
        (self.notify)(&format!(
            "Destination '{}' already exists at {}",
            name,
            destination.display()
        ));
        loop {
            let answer = (self.ask)("Choose action (S)kip/(O)verwrite/(R)ename")?;
            match parse_conflict_answer(&answer) {
                Ok(ConflictAnswer::Skip) => return Ok(ConflictDecision::Skip),
                Ok(ConflictAnswer::Overwrite) => return Ok(ConflictDecision::Overwrite),
                Ok(ConflictAnswer::Rename) => {
                    let new_name = (self.ask)(&format!("Enter new name for '{name}'"))?;
                    match validate_rename(&new_name) {
                        Some(valid) => return Ok(ConflictDecision::RenameTo(valid)),
                        None => (self.notify)("Invalid name, please try again"),
                    }
                }
                Err(_) => (self.notify)(
                    "Invalid choice. Please enter 'S', 'O', 'R' or 'skip', 'overwrite', 'rename'",
                ),
            }
        }
    }
}

/// Ask `prompt` only if `destination` exists; otherwise [`ConflictDecision::Proceed`].
pub fn decide(destination: &Path, prompt: &mut dyn ConflictPrompt) -> Result<ConflictDecision> {
    if destination.exists() {
        prompt.choose(destination)
    } else {
        Ok(ConflictDecision::Proceed)
    }
}

/// What the orchestrator does with a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Do not copy
    Skip,
    /// Copy into `destination`, removing an existing tree first if asked
    Copy {
        /// Final destination path
        destination: PathBuf,
        /// Remove the existing tree at `destination` before copying
        remove_existing: bool,
    },
}

/// Map a destination and a decision to the action to take.
///
/// Pure: touches no filesystem. `exists` is the caller's observation of the
/// original destination; without a conflict every decision copies to the
/// original path.
pub fn resolve_destination(destination: &Path, exists: bool, decision: &ConflictDecision) -> Resolution {
    if !exists {
        return Resolution::Copy {
            destination: destination.to_path_buf(),
            remove_existing: false,
        };
    }
    match decision {
        ConflictDecision::Skip => Resolution::Skip,
        ConflictDecision::Overwrite => Resolution::Copy {
            destination: destination.to_path_buf(),
            remove_existing: true,
        },
        ConflictDecision::RenameTo(name) => Resolution::Copy {
            destination: destination
                .parent()
                .map_or_else(|| PathBuf::from(name), |parent| parent.join(name)),
            remove_existing: false,
        },
        ConflictDecision::Proceed => Resolution::Copy {
            destination: destination.to_path_buf(),
            remove_existing: false,
        },
    }
}
