use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tempfile::Builder;
use tracing::{debug, info, warn};

use crate::archive::{self, ArchiveKind};
use crate::domain::{Identity, InstallOutcome};
use crate::error::PackError;
use crate::retry::{RetryPolicy, Sleeper, ThreadSleeper};
use crate::store;

pub const CONTENT_FOLDER_PATTERN: &str = r"(?i)^(EP|GP|SP|FP)\d{2}$";
pub const PACKAGE_EXTENSIONS: &[&str] = &["package"];
pub const DISCOVERY_DEPTH: usize = 4;

static CONTENT_FOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(CONTENT_FOLDER_PATTERN).expect("valid content folder pattern"));

pub fn is_content_folder_name(name: &str) -> bool {
    CONTENT_FOLDER.is_match(name)
}

fn has_package_file(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let path = entry.path();
        path.is_file()
            && path
                .extension()
                .map(|ext| {
                    let ext = ext.to_string_lossy();
                    PACKAGE_EXTENSIONS
                        .iter()
                        .any(|known| ext.eq_ignore_ascii_case(known))
                })
                .unwrap_or(false)
    })
}

fn folder_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Content folders under `root`, at most `DISCOVERY_DEPTH` levels down. A
/// folder qualifies by name and by directly holding a package file; the walk
/// does not descend into qualifying folders.
pub fn discover_content_folders(root: &Path) -> Result<Vec<PathBuf>, PackError> {
    let mut found = Vec::new();
    let mut stack = vec![(root.to_path_buf(), 0usize)];
    while let Some((dir, depth)) = stack.pop() {
        let entries = fs::read_dir(&dir).map_err(|err| PackError::Filesystem(err.to_string()))?;
        for entry in entries {
            let path = entry
                .map_err(|err| PackError::Filesystem(err.to_string()))?
                .path();
            if !path.is_dir() {
                continue;
            }
            let child_depth = depth + 1;
            if is_content_folder_name(&folder_name(&path)) {
                if has_package_file(&path) {
                    found.push(path);
                    continue;
                }
                debug!(folder = %path.display(), "named like content but holds no package");
            }
            if child_depth < DISCOVERY_DEPTH {
                stack.push((path, child_depth));
            }
        }
    }
    found.sort_by_key(|path| folder_name(path).to_uppercase());
    Ok(found)
}

/// Archives waiting in `download_dir`, sorted by lowercase file name.
pub fn pending_items(download_dir: &Path) -> Result<Vec<PathBuf>, PackError> {
    if !download_dir.exists() {
        return Ok(Vec::new());
    }
    let mut items: Vec<PathBuf> = store::files_under(download_dir)?
        .into_iter()
        .filter(|path| archive::is_archive(path))
        .collect();
    items.sort_by_key(|path| folder_name(path).to_lowercase());
    Ok(items)
}

pub fn installed_identities(destination: &Path) -> Result<Vec<Identity>, PackError> {
    if !destination.exists() {
        return Ok(Vec::new());
    }
    let entries =
        fs::read_dir(destination).map_err(|err| PackError::Filesystem(err.to_string()))?;
    let mut identities: BTreeSet<Identity> = BTreeSet::new();
    for entry in entries {
        let path = entry
            .map_err(|err| PackError::Filesystem(err.to_string()))?
            .path();
        let name = folder_name(&path);
        if path.is_dir() && is_content_folder_name(&name) {
            identities.insert(name.parse()?);
        }
    }
    Ok(identities.into_iter().collect())
}

/// Drops folders in `destination` that spell `name` with different casing.
fn remove_case_variants(destination: &Path, name: &str) -> Result<(), PackError> {
    let entries =
        fs::read_dir(destination).map_err(|err| PackError::Filesystem(err.to_string()))?;
    for entry in entries {
        let path = entry
            .map_err(|err| PackError::Filesystem(err.to_string()))?
            .path();
        let existing = folder_name(&path);
        if path.is_dir() && existing != name && existing.eq_ignore_ascii_case(name) {
            debug!(folder = %path.display(), "replacing differently cased content folder");
            fs::remove_dir_all(&path).map_err(|err| {
                PackError::Filesystem(format!("remove {}: {err}", path.display()))
            })?;
        }
    }
    Ok(())
}

pub trait SourceRemover: Send + Sync {
    fn remove(&self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsRemover;

impl SourceRemover for FsRemover {
    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub success: bool,
    pub installed: usize,
    pub message: String,
    pub outcomes: Vec<InstallOutcome>,
}

struct Installed {
    identities: Vec<Identity>,
    message: String,
}

pub struct InstallationPipeline {
    scratch_root: PathBuf,
    delete_policy: RetryPolicy,
    remover: Box<dyn SourceRemover>,
    sleeper: Box<dyn Sleeper>,
}

impl InstallationPipeline {
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            delete_policy: RetryPolicy::delete_on_lock(),
            remover: Box::new(FsRemover),
            sleeper: Box::new(ThreadSleeper),
        }
    }

    pub fn with_delete_policy(mut self, policy: RetryPolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    pub fn with_remover(mut self, remover: impl SourceRemover + 'static) -> Self {
        self.remover = Box::new(remover);
        self
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Never fails outright: every error lands in the outcome's message.
    pub fn install(&self, source: &Path, destination: &Path) -> InstallOutcome {
        info!(source = %source.display(), destination = %destination.display(), "installing");
        match self.try_install(source, destination) {
            Ok(installed) => {
                let source_removed = self.remove_source(source);
                info!(source = %source.display(), message = %installed.message, "installed");
                InstallOutcome {
                    source_file: source.to_path_buf(),
                    success: true,
                    installed_identities: installed.identities,
                    message: installed.message,
                    source_removed,
                }
            }
            Err(err) => {
                warn!(source = %source.display(), error = %err, "install failed");
                InstallOutcome::failed(source.to_path_buf(), err.to_string())
            }
        }
    }

    /// Installs each file in turn. One failure does not stop the rest, and
    /// nothing already installed is rolled back.
    pub fn install_batch(&self, sources: &[PathBuf], destination: &Path) -> BatchOutcome {
        if sources.is_empty() {
            return BatchOutcome {
                success: false,
                installed: 0,
                message: "no files to install".to_string(),
                outcomes: Vec::new(),
            };
        }

        let outcomes: Vec<InstallOutcome> = sources
            .iter()
            .map(|source| self.install(source, destination))
            .collect();
        let installed = outcomes.iter().filter(|outcome| outcome.success).count();
        let failures: Vec<String> = outcomes
            .iter()
            .filter(|outcome| !outcome.success)
            .map(|outcome| format!("{}: {}", folder_name(&outcome.source_file), outcome.message))
            .collect();

        let mut message = format!("OK: {installed}/{}", outcomes.len());
        for failure in &failures {
            message.push('\n');
            message.push_str(failure);
        }
        BatchOutcome {
            success: failures.is_empty(),
            installed,
            message,
            outcomes,
        }
    }

    fn try_install(&self, source: &Path, destination: &Path) -> Result<Installed, PackError> {
        fs::create_dir_all(destination).map_err(|err| {
            PackError::DestinationUnavailable(format!("{}: {err}", destination.display()))
        })?;
        if !source.is_file() {
            return Err(PackError::Filesystem(format!(
                "source file missing: {}",
                source.display()
            )));
        }

        match ArchiveKind::from_path(source) {
            Some(_) => self.install_archive(source, destination),
            None => {
                let name = folder_name(source);
                store::replace_file(source, &destination.join(&name))?;
                Ok(Installed {
                    identities: Vec::new(),
                    message: format!("copied {name}"),
                })
            }
        }
    }

    fn install_archive(&self, source: &Path, destination: &Path) -> Result<Installed, PackError> {
        store::reset_dir(&self.scratch_root)?;
        let scratch = Builder::new()
            .prefix("extract")
            .tempdir_in(&self.scratch_root)
            .map_err(|err| PackError::Filesystem(err.to_string()))?;

        let result = self.merge_extracted(source, scratch.path(), destination);

        drop(scratch);
        if let Err(err) = store::reset_dir(&self.scratch_root) {
            warn!(error = %err, "failed to clear scratch directory");
        }
        result
    }

    fn merge_extracted(
        &self,
        source: &Path,
        scratch: &Path,
        destination: &Path,
    ) -> Result<Installed, PackError> {
        archive::extract_to_directory(source, scratch)?;
        let folders = discover_content_folders(scratch)?;
        if folders.is_empty() {
            return Err(PackError::NoContentFoundInArchive);
        }

        let mut identities: Vec<Identity> = Vec::new();
        for folder in folders {
            let name = folder_name(&folder);
            let identity: Identity = name.parse()?;
            if identities.contains(&identity) {
                warn!(folder = %folder.display(), "duplicate content folder in archive, skipping");
                continue;
            }
            remove_case_variants(destination, &name)?;
            store::replace_dir(&folder, &destination.join(&name))?;
            debug!(identity = %identity, "merged content folder");
            identities.push(identity);
        }

        let names: Vec<&str> = identities.iter().map(Identity::as_str).collect();
        Ok(Installed {
            message: format!("installed {}", names.join(", ")),
            identities,
        })
    }

    /// Best effort: the engine may still hold the file open.
    fn remove_source(&self, source: &Path) -> bool {
        let result = self.delete_policy.run(self.sleeper.as_ref(), |attempt| {
            match self.remover.remove(source) {
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                other => {
                    if let Err(err) = &other {
                        debug!(attempt, error = %err, "source delete attempt failed");
                    }
                    other
                }
            }
        });
        match result {
            Ok(()) => true,
            Err(err) => {
                let error = PackError::DeleteRetryExhausted(source.display().to_string());
                warn!(error = %error, cause = %err, "leaving source in place");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_folder_names() {
        assert!(is_content_folder_name("EP05"));
        assert!(is_content_folder_name("gp03"));
        assert!(is_content_folder_name("Sp18"));
        assert!(!is_content_folder_name("EP5"));
        assert!(!is_content_folder_name("XX01"));
        assert!(!is_content_folder_name("EP05b"));
        assert!(!is_content_folder_name("Extras"));
    }

    #[test]
    fn discovery_stops_at_depth_limit() {
        let temp = tempfile::tempdir().unwrap();
        let shallow = temp.path().join("a").join("b").join("EP01");
        let deep = temp.path().join("a").join("b").join("c").join("d").join("EP02");
        for dir in [&shallow, &deep] {
            fs::create_dir_all(dir).unwrap();
            fs::write(dir.join("x.package"), b"p").unwrap();
        }

        let found = discover_content_folders(temp.path()).unwrap();
        assert_eq!(found, vec![shallow]);
    }
}
