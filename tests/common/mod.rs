#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use packfetch::catalog::{Catalog, CatalogStore};
use packfetch::domain::Priority;
use packfetch::engine::{SessionFile, TransferEngine, TransferSession};
use packfetch::error::PackError;
use packfetch::progress::StopSignal;
use packfetch::retry::Sleeper;
use zip::write::SimpleFileOptions;

pub const CATALOG: &str = r#"{
    "mods": {
        "EP05": {"en": "Seasons", "de": "Jahreszeiten"},
        "GP03": {"en": "Dine_Out"},
        "SP18": {"en": "Spooky Stuff"}
    },
    "categories": {
        "EP": {"en": "Expansion Packs", "de": "Erweiterungspacks"},
        "GP": {"en": "Game Packs"}
    },
    "labels": {"unknown_mod": {"en": "Unknown", "de": "Unbekannt"}}
}"#;

pub fn catalog_store(locale: &str) -> Arc<CatalogStore> {
    Arc::new(CatalogStore::new(
        Catalog::from_json_str(CATALOG).unwrap(),
        locale,
    ))
}

#[derive(Debug, Default)]
pub struct SessionState {
    pub sizes: Vec<u64>,
    pub priorities: Vec<Priority>,
    pub progress: Vec<u64>,
    pub paused: bool,
    pub reannounces: usize,
    pub peers: usize,
    pub reject_priorities: bool,
}

pub type SharedState = Arc<Mutex<SessionState>>;

pub struct MockSession {
    name: String,
    files: Vec<SessionFile>,
    state: SharedState,
}

impl TransferSession for MockSession {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn files(&self) -> Vec<SessionFile> {
        self.files.clone()
    }

    fn set_priorities(&mut self, priorities: &[Priority]) -> Result<(), PackError> {
        if priorities.len() != self.files.len() {
            return Err(PackError::TransferFault("priority vector length".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        if state.reject_priorities {
            return Err(PackError::TransferFault("session closed".to_string()));
        }
        state.priorities = priorities.to_vec();
        Ok(())
    }

    fn file_progress(&self) -> Vec<u64> {
        self.state.lock().unwrap().progress.clone()
    }

    fn pause(&mut self) {
        self.state.lock().unwrap().paused = true;
    }

    fn resume(&mut self) {
        self.state.lock().unwrap().paused = false;
    }

    fn force_reannounce(&mut self) -> Result<(), PackError> {
        self.state.lock().unwrap().reannounces += 1;
        Ok(())
    }

    fn num_peers(&self) -> usize {
        self.state.lock().unwrap().peers
    }
}

/// Serves sessions by descriptor file name. Unknown descriptors fail to open.
#[derive(Default)]
pub struct MockEngine {
    layouts: HashMap<String, (String, Vec<SessionFile>)>,
    pub opened: Arc<Mutex<Vec<SharedState>>>,
    pub removed: Arc<AtomicUsize>,
    pub peers: usize,
}

impl MockEngine {
    pub fn with_session(mut self, descriptor: &str, name: &str, files: &[(&str, u64)]) -> Self {
        let files = files
            .iter()
            .map(|(path, size)| SessionFile {
                path: PathBuf::from(path),
                size: *size,
            })
            .collect();
        self.layouts
            .insert(descriptor.to_string(), (name.to_string(), files));
        self
    }

    pub fn with_peers(mut self, peers: usize) -> Self {
        self.peers = peers;
        self
    }

    pub fn state(&self, session: usize) -> SharedState {
        Arc::clone(&self.opened.lock().unwrap()[session])
    }
}

impl TransferEngine for MockEngine {
    type Session = MockSession;

    fn open_session(&self, descriptor: &Path, _destination: &Path) -> Result<MockSession, PackError> {
        let key = descriptor
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let (name, files) = self
            .layouts
            .get(&key)
            .cloned()
            .ok_or_else(|| PackError::TransferFault(format!("bad descriptor {key}")))?;
        let state = Arc::new(Mutex::new(SessionState {
            sizes: files.iter().map(|file| file.size).collect(),
            priorities: vec![Priority::Download; files.len()],
            progress: vec![0; files.len()],
            paused: false,
            reannounces: 0,
            peers: self.peers,
            reject_priorities: false,
        }));
        self.opened.lock().unwrap().push(Arc::clone(&state));
        Ok(MockSession { name, files, state })
    }

    fn remove_session(&self, _session: MockSession) {
        self.removed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Stands in for wall-clock waits: every sleep moves each downloading,
/// unpaused file forward by `step` bytes.
pub struct TransferSleeper {
    opened: Arc<Mutex<Vec<SharedState>>>,
    step: u64,
    pub slept: Mutex<Vec<Duration>>,
}

impl TransferSleeper {
    pub fn new(engine: &MockEngine, step: u64) -> Self {
        Self {
            opened: Arc::clone(&engine.opened),
            step,
            slept: Mutex::new(Vec::new()),
        }
    }
}

impl Sleeper for TransferSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
        for state in self.opened.lock().unwrap().iter() {
            let mut state = state.lock().unwrap();
            if state.paused {
                continue;
            }
            for index in 0..state.progress.len() {
                if state.priorities[index] == Priority::Download {
                    state.progress[index] = (state.progress[index] + self.step).min(state.sizes[index]);
                }
            }
        }
    }
}

/// Raises `stop` once `after` sleeps have passed.
pub struct StoppingSleeper {
    pub stop: StopSignal,
    pub after: usize,
    pub count: AtomicUsize,
}

impl Sleeper for StoppingSleeper {
    fn sleep(&self, _duration: Duration) {
        if self.count.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.stop.stop();
        }
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    pub slept: Mutex<Vec<Duration>>,
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let file = fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, content) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap();
}

pub fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, b"d8:announce0:e").unwrap();
}
