use std::path::{Path, PathBuf};

use crate::domain::Priority;
use crate::error::PackError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFile {
    /// Path relative to the session's save directory.
    pub path: PathBuf,
    pub size: u64,
}

/// One transfer job owned by the engine (one descriptor, many files).
pub trait TransferSession: Send {
    fn name(&self) -> String;
    fn files(&self) -> Vec<SessionFile>;
    fn set_priorities(&mut self, priorities: &[Priority]) -> Result<(), PackError>;
    /// Bytes completed per file, in `files()` order.
    fn file_progress(&self) -> Vec<u64>;
    fn pause(&mut self);
    fn resume(&mut self);
    fn force_reannounce(&mut self) -> Result<(), PackError>;
    fn num_peers(&self) -> usize;
}

pub trait TransferEngine: Send + Sync {
    type Session: TransferSession;

    /// Opens a paused session saving into `destination`.
    fn open_session(
        &self,
        descriptor: &Path,
        destination: &Path,
    ) -> Result<Self::Session, PackError>;

    fn remove_session(&self, session: Self::Session);
}
