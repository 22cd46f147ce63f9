use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::config::ResolvedConfig;
use crate::error::PackError;

/// Working directories of one run: descriptors in, downloads, scratch space
/// for extraction, and the content destination.
#[derive(Debug, Clone)]
pub struct Layout {
    source_dir: Utf8PathBuf,
    download_dir: Utf8PathBuf,
    scratch_dir: Utf8PathBuf,
    destination: Option<Utf8PathBuf>,
}

impl Layout {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            source_dir: config.source_dir.clone(),
            download_dir: config.download_dir.clone(),
            scratch_dir: config.scratch_dir.clone(),
            destination: config.destination.clone(),
        }
    }

    pub fn new_with_paths(
        source_dir: Utf8PathBuf,
        download_dir: Utf8PathBuf,
        scratch_dir: Utf8PathBuf,
        destination: Option<Utf8PathBuf>,
    ) -> Self {
        Self {
            source_dir,
            download_dir,
            scratch_dir,
            destination,
        }
    }

    pub fn source_dir(&self) -> &Utf8Path {
        &self.source_dir
    }

    pub fn download_dir(&self) -> &Utf8Path {
        &self.download_dir
    }

    pub fn scratch_dir(&self) -> &Utf8Path {
        &self.scratch_dir
    }

    pub fn destination(&self) -> Result<&Utf8Path, PackError> {
        self.destination.as_deref().ok_or_else(|| {
            PackError::DestinationUnavailable("no destination configured".to_string())
        })
    }

    pub fn ensure_working_dirs(&self) -> Result<(), PackError> {
        for dir in [&self.source_dir, &self.download_dir, &self.scratch_dir] {
            let dir = dir.as_std_path();
            fs::create_dir_all(dir).map_err(fs_error("create", dir))?;
        }
        Ok(())
    }
}

fn fs_error<'a>(
    action: &'static str,
    path: &'a Path,
) -> impl FnOnce(io::Error) -> PackError + 'a {
    move |err| PackError::Filesystem(format!("{action} {}: {err}", path.display()))
}

fn prepared_parent(path: &Path) -> Result<&Path, PackError> {
    let parent = path.parent().ok_or_else(|| {
        PackError::Filesystem(format!("no parent directory for {}", path.display()))
    })?;
    fs::create_dir_all(parent).map_err(fs_error("create", parent))?;
    Ok(parent)
}

fn copy_tree(source: &Path, dest: &Path) -> Result<(), PackError> {
    fs::create_dir_all(dest).map_err(fs_error("create", dest))?;
    for entry in fs::read_dir(source).map_err(fs_error("read", source))? {
        let from = entry.map_err(fs_error("read", source))?.path();
        let Some(name) = from.file_name() else {
            continue;
        };
        let to = dest.join(name);
        if from.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(fs_error("copy", &from))?;
        }
    }
    Ok(())
}

/// Stages a copy of `source` beside `dest` and moves it into place. An
/// existing `dest` is removed first, never merged into.
pub fn replace_dir(source: &Path, dest: &Path) -> Result<(), PackError> {
    let parent = prepared_parent(dest)?;
    let staging = Builder::new()
        .prefix(".packfetch-stage")
        .tempdir_in(parent)
        .map_err(fs_error("stage in", parent))?;
    let staged = staging.path().join("payload");
    copy_tree(source, &staged)?;
    if dest.exists() {
        fs::remove_dir_all(dest).map_err(fs_error("remove", dest))?;
    }
    fs::rename(&staged, dest).map_err(fs_error("move into", dest))
}

pub fn replace_file(source: &Path, dest: &Path) -> Result<(), PackError> {
    let parent = prepared_parent(dest)?;
    let staged = Builder::new()
        .prefix(".packfetch-stage")
        .tempfile_in(parent)
        .map_err(fs_error("stage in", parent))?;
    fs::copy(source, staged.path()).map_err(fs_error("copy", source))?;
    if dest.exists() {
        fs::remove_file(dest).map_err(fs_error("remove", dest))?;
    }
    staged
        .persist(dest)
        .map_err(|err| fs_error("move into", dest)(err.error))?;
    Ok(())
}

/// Empties `dir`, creating it if needed.
pub fn reset_dir(dir: &Path) -> Result<(), PackError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(fs_error("clear", dir)(err)),
    }
    fs::create_dir_all(dir).map_err(fs_error("create", dir))
}

/// Regular files anywhere below `root`.
pub fn files_under(root: &Path) -> Result<Vec<PathBuf>, PackError> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).map_err(fs_error("read", &dir))? {
            let path = entry.map_err(fs_error("read", &dir))?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
    }
    Ok(files)
}
