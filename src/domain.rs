use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PackError;

/// Stable catalog code of one installable content unit, e.g. `EP05`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn category(&self) -> Category {
        Category::Code(self.0[..2].to_string())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Identity {
    type Err = PackError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let is_valid = normalized.len() >= 3
            && normalized.chars().take(2).all(|ch| ch.is_ascii_alphabetic())
            && normalized.chars().all(|ch| ch.is_ascii_alphanumeric());
        if !is_valid {
            return Err(PackError::InvalidIdentity(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Code(String),
    Other,
}

impl Category {
    pub const OTHER_CODE: &'static str = "OTHER";

    pub fn as_str(&self) -> &str {
        match self {
            Category::Code(code) => code,
            Category::Other => Self::OTHER_CODE,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-file transfer weight. Binary on purpose: selected files all download
/// with equal weight, everything else is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Skip,
    Download,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub session_index: usize,
    pub file_index: usize,
    pub global_index: usize,
    pub identity: Option<Identity>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    members: BTreeSet<usize>,
    frozen: bool,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_indices<I: IntoIterator<Item = usize>>(indices: I) -> Self {
        Self {
            members: indices.into_iter().collect(),
            frozen: false,
        }
    }

    /// Returns false when the set is frozen for an active round.
    pub fn insert(&mut self, global_index: usize) -> bool {
        if self.frozen {
            return false;
        }
        self.members.insert(global_index);
        true
    }

    pub fn remove(&mut self, global_index: usize) -> bool {
        if self.frozen {
            return false;
        }
        self.members.remove(&global_index);
        true
    }

    pub fn clear(&mut self) -> bool {
        if self.frozen {
            return false;
        }
        self.members.clear();
        true
    }

    pub fn contains(&self, global_index: usize) -> bool {
        self.members.contains(&global_index)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.members.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn thaw(&mut self) {
        self.frozen = false;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSample {
    pub global_index: usize,
    pub bytes_done: u64,
    pub ratio: f64,
    pub speed_bytes_per_sec: f64,
    /// `None` while the speed is zero.
    pub eta_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallOutcome {
    pub source_file: PathBuf,
    pub success: bool,
    pub installed_identities: Vec<Identity>,
    pub message: String,
    pub source_removed: bool,
}

impl InstallOutcome {
    pub fn failed(source_file: PathBuf, message: impl Into<String>) -> Self {
        Self {
            source_file,
            success: false,
            installed_identities: Vec::new(),
            message: message.into(),
            source_removed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    #[default]
    Pending,
    Downloading,
    Completed,
    Installing,
    Installed,
    InstallFailed,
    Cancelled,
}

impl InstallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, InstallState::Installed | InstallState::InstallFailed)
    }

    pub fn can_advance_to(self, next: InstallState) -> bool {
        use InstallState::*;
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Cancelled, Downloading)
                | (Downloading, Completed)
                | (Downloading, Cancelled)
                | (Completed, Installing)
                | (Installing, Installed)
                | (Installing, InstallFailed)
        )
    }

    pub fn advance(self, next: InstallState) -> Option<InstallState> {
        self.can_advance_to(next).then_some(next)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_identity_uppercases() {
        let id: Identity = " ep05 ".parse().unwrap();
        assert_eq!(id.as_str(), "EP05");
        assert_eq!(id.category(), Category::Code("EP".to_string()));
    }

    #[test]
    fn parse_identity_invalid() {
        assert_matches!("5E".parse::<Identity>(), Err(PackError::InvalidIdentity(_)));
        assert_matches!("EP-5".parse::<Identity>(), Err(PackError::InvalidIdentity(_)));
        assert_matches!("E".parse::<Identity>(), Err(PackError::InvalidIdentity(_)));
    }

    #[test]
    fn frozen_selection_rejects_changes() {
        let mut selection = SelectionSet::from_indices([1, 3]);
        selection.freeze();
        assert!(!selection.insert(2));
        assert!(!selection.remove(1));
        assert_eq!(selection.iter().collect::<Vec<_>>(), vec![1, 3]);
        selection.thaw();
        assert!(selection.insert(2));
        assert_eq!(selection.len(), 3);
    }

    #[test]
    fn install_state_transitions() {
        use InstallState::*;
        assert_eq!(Pending.advance(Downloading), Some(Downloading));
        assert_eq!(Downloading.advance(Cancelled), Some(Cancelled));
        assert_eq!(Completed.advance(Cancelled), None);
        assert_eq!(Installed.advance(Installing), None);
        assert_eq!(InstallFailed.advance(Installing), None);
        assert!(Installed.is_terminal());
        assert!(!Completed.is_terminal());
    }
}
