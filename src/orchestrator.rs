use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::{Priority, SelectionSet, TransferFile};
use crate::engine::{TransferEngine, TransferSession};
use crate::error::PackError;
use crate::matcher::CatalogMatcher;
use crate::retry::Sleeper;

pub const DESCRIPTOR_EXTENSION: &str = "torrent";
pub const DEFAULT_WARMUP: Duration = Duration::from_secs(2);
const WARMUP_POLL: Duration = Duration::from_millis(100);

/// Bytes done per global index, taken in one pass over every session.
pub type ProgressSnapshot = BTreeMap<usize, u64>;

/// Descriptor files in `source_dir`, sorted by name. A missing directory is
/// treated as empty.
pub fn discover_sources(source_dir: &Path) -> Result<Vec<PathBuf>, PackError> {
    if !source_dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(source_dir).map_err(|err| PackError::Filesystem(err.to_string()))?;
    let mut descriptors = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|err| PackError::Filesystem(err.to_string()))?
            .path();
        let is_descriptor = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case(DESCRIPTOR_EXTENSION))
            .unwrap_or(false);
        if path.is_file() && is_descriptor {
            descriptors.push(path);
        }
    }
    descriptors.sort();
    Ok(descriptors)
}

/// Presents several engine sessions as one flat, globally indexed file list.
pub struct TransferOrchestrator<E: TransferEngine> {
    engine: E,
    download_dir: PathBuf,
    warmup: Duration,
    sessions: Vec<E::Session>,
    file_counts: Vec<usize>,
    files: Vec<TransferFile>,
    batch_name: Option<String>,
}

impl<E: TransferEngine> TransferOrchestrator<E> {
    pub fn new(engine: E, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            download_dir: download_dir.into(),
            warmup: DEFAULT_WARMUP,
            sessions: Vec::new(),
            file_counts: Vec::new(),
            files: Vec::new(),
            batch_name: None,
        }
    }

    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn files(&self) -> &[TransferFile] {
        &self.files
    }

    pub fn file(&self, global_index: usize) -> Option<&TransferFile> {
        self.files.get(global_index)
    }

    pub fn sessions(&self) -> &[E::Session] {
        &self.sessions
    }

    pub fn batch_name(&self) -> Option<&str> {
        self.batch_name.as_deref()
    }

    /// Where the engine writes `file` on disk.
    pub fn local_path(&self, file: &TransferFile) -> PathBuf {
        self.download_dir.join(&file.path)
    }

    /// Replaces the current batch. Returns `Ok(false)` when there is nothing
    /// to load; a session that fails to open discards the whole batch.
    pub fn load_sessions(
        &mut self,
        descriptors: &[PathBuf],
        matcher: &CatalogMatcher,
    ) -> Result<bool, PackError> {
        self.remove();
        if descriptors.is_empty() {
            debug!("{}", PackError::NoSourcesFound);
            return Ok(false);
        }

        fs::create_dir_all(&self.download_dir)
            .map_err(|err| PackError::Filesystem(err.to_string()))?;

        for descriptor in descriptors {
            if let Err(err) = self.open_one(descriptor, matcher) {
                self.remove();
                return Err(PackError::SessionOpenFailed {
                    descriptor: descriptor.display().to_string(),
                    message: err.to_string(),
                });
            }
        }

        self.batch_name = match self.sessions.as_slice() {
            [single] => Some(single.name()),
            many => Some(format!("{} sessions", many.len())),
        };
        info!(
            sessions = self.sessions.len(),
            files = self.files.len(),
            "loaded transfer batch"
        );
        Ok(true)
    }

    fn open_one(&mut self, descriptor: &Path, matcher: &CatalogMatcher) -> Result<(), PackError> {
        let mut session = self.engine.open_session(descriptor, &self.download_dir)?;
        session.pause();
        let session_files = session.files();
        let file_count = session_files.len();
        if let Err(err) = session.set_priorities(&vec![Priority::Skip; file_count]) {
            self.engine.remove_session(session);
            return Err(err);
        }

        let session_index = self.sessions.len();
        for (file_index, entry) in session_files.into_iter().enumerate() {
            let name = entry
                .path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| entry.path.display().to_string());
            let identity = matcher.identify(&name);
            self.files.push(TransferFile {
                global_index: self.files.len(),
                name,
                path: entry.path,
                size: entry.size,
                session_index,
                file_index,
                identity,
            });
        }
        debug!(descriptor = %descriptor.display(), session_index, "opened session");
        self.file_counts.push(file_count);
        self.sessions.push(session);
        Ok(())
    }

    pub fn set_priorities(&mut self, selection: &SelectionSet) -> Result<(), PackError> {
        if let Some(unknown) = selection.iter().find(|index| *index >= self.files.len()) {
            return Err(PackError::UnknownFile(unknown));
        }
        let vectors = self.priority_vectors(|file| selection.contains(file.global_index));
        self.apply(vectors)?;
        debug!(selected = selection.len(), "applied file priorities");
        Ok(())
    }

    pub fn reset_priorities(&mut self) -> Result<(), PackError> {
        let vectors = self.priority_vectors(|_| false);
        self.apply(vectors)
    }

    fn priority_vectors(&self, selected: impl Fn(&TransferFile) -> bool) -> Vec<Vec<Priority>> {
        let mut vectors: Vec<Vec<Priority>> = self
            .file_counts
            .iter()
            .map(|count| vec![Priority::Skip; *count])
            .collect();
        for file in &self.files {
            if selected(file) {
                vectors[file.session_index][file.file_index] = Priority::Download;
            }
        }
        vectors
    }

    fn apply(&mut self, vectors: Vec<Vec<Priority>>) -> Result<(), PackError> {
        for (session, priorities) in self.sessions.iter_mut().zip(vectors) {
            session.set_priorities(&priorities)?;
        }
        Ok(())
    }

    /// Re-announces and resumes every session, then waits up to the warm-up
    /// window for a first peer. Returns whether any peer showed up.
    pub fn start(&mut self, sleeper: &dyn Sleeper) -> bool {
        for session in &mut self.sessions {
            if let Err(err) = session.force_reannounce() {
                warn!(error = %err, "re-announce failed");
            }
            session.resume();
        }

        let polls = (self.warmup.as_millis() / WARMUP_POLL.as_millis()).max(1);
        for _ in 0..polls {
            sleeper.sleep(WARMUP_POLL);
            if self.total_peers() > 0 {
                debug!(peers = self.total_peers(), "first peers connected");
                return true;
            }
        }
        debug!("no peers after warm-up, continuing");
        false
    }

    pub fn refresh_peers(&mut self) {
        for session in &mut self.sessions {
            if let Err(err) = session.force_reannounce() {
                debug!(error = %err, "peer refresh failed");
            }
        }
    }

    pub fn pause(&mut self) {
        for session in &mut self.sessions {
            session.pause();
        }
    }

    pub fn stop(&mut self) {
        self.pause();
    }

    pub fn total_peers(&self) -> usize {
        self.sessions.iter().map(|session| session.num_peers()).sum()
    }

    pub fn get_progress(&self) -> ProgressSnapshot {
        let mut snapshot = ProgressSnapshot::new();
        let mut offset = 0;
        for (session, file_count) in self.sessions.iter().zip(&self.file_counts) {
            let progress = session.file_progress();
            for (file_index, done) in progress.into_iter().take(*file_count).enumerate() {
                snapshot.insert(offset + file_index, done);
            }
            offset += file_count;
        }
        snapshot
    }

    pub fn remove(&mut self) {
        for session in self.sessions.drain(..) {
            self.engine.remove_session(session);
        }
        self.file_counts.clear();
        self.files.clear();
        self.batch_name = None;
    }
}

impl<E: TransferEngine> Drop for TransferOrchestrator<E> {
    fn drop(&mut self) {
        self.remove();
    }
}
