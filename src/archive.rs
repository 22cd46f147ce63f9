use std::fmt;
use std::fs;
use std::path::Path;

use tracing::debug;
use zip::ZipArchive;

use crate::error::PackError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Rar,
    SevenZ,
}

impl ArchiveKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        match ext.as_str() {
            "zip" => Some(ArchiveKind::Zip),
            "rar" => Some(ArchiveKind::Rar),
            "7z" => Some(ArchiveKind::SevenZ),
            _ => None,
        }
    }
}

pub fn is_archive(path: &Path) -> bool {
    ArchiveKind::from_path(path).is_some()
}

pub fn extract_to_directory(archive_path: &Path, target_dir: &Path) -> Result<(), PackError> {
    let kind = ArchiveKind::from_path(archive_path).ok_or_else(|| {
        PackError::UnsupportedArchive(
            archive_path
                .extension()
                .map(|ext| ext.to_string_lossy().to_string())
                .unwrap_or_default(),
        )
    })?;
    debug!(archive = %archive_path.display(), ?kind, "extracting");
    fs::create_dir_all(target_dir).map_err(|err| failed(archive_path, err))?;
    match kind {
        ArchiveKind::Zip => extract_zip(archive_path, target_dir),
        ArchiveKind::Rar => extract_rar(archive_path, target_dir),
        ArchiveKind::SevenZ => extract_7z(archive_path, target_dir),
    }
}

fn failed(archive_path: &Path, err: impl fmt::Display) -> PackError {
    let name = archive_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    PackError::ExtractionFailed(format!("{name}: {err}"))
}

/// Entries whose names would land outside `target_dir` abort the extraction.
fn extract_zip(archive_path: &Path, target_dir: &Path) -> Result<(), PackError> {
    let file = fs::File::open(archive_path).map_err(|err| failed(archive_path, err))?;
    let mut archive = ZipArchive::new(file).map_err(|err| failed(archive_path, err))?;
    debug!(entries = archive.len(), "zip opened");
    archive
        .extract(target_dir)
        .map_err(|err| failed(archive_path, err))
}

fn extract_7z(archive_path: &Path, target_dir: &Path) -> Result<(), PackError> {
    sevenz_rust::decompress_file(archive_path, target_dir).map_err(|err| failed(archive_path, err))
}

fn extract_rar(archive_path: &Path, target_dir: &Path) -> Result<(), PackError> {
    let mut archive = unrar::Archive::new(archive_path)
        .open_for_processing()
        .map_err(|err| failed(archive_path, err))?;
    while let Some(header) = archive
        .read_header()
        .map_err(|err| failed(archive_path, err))?
    {
        let next = if header.entry().is_file() {
            header.extract_with_base(target_dir)
        } else {
            header.skip()
        };
        archive = next.map_err(|err| failed(archive_path, err))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn kind_from_extension() {
        assert_eq!(ArchiveKind::from_path(Path::new("a/EP05.ZIP")), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_path(Path::new("x.rar")), Some(ArchiveKind::Rar));
        assert_eq!(ArchiveKind::from_path(Path::new("x.7z")), Some(ArchiveKind::SevenZ));
        assert_eq!(ArchiveKind::from_path(Path::new("x.package")), None);
        assert!(!is_archive(Path::new("noext")));
    }

    #[test]
    fn unsupported_is_distinct_from_failure() {
        let temp = tempfile::tempdir().unwrap();
        let plain = temp.path().join("readme.txt");
        fs::write(&plain, b"hi").unwrap();
        assert_matches!(
            extract_to_directory(&plain, temp.path()),
            Err(PackError::UnsupportedArchive(_))
        );

        let broken = temp.path().join("broken.zip");
        fs::write(&broken, b"not a zip").unwrap();
        assert_matches!(
            extract_to_directory(&broken, &temp.path().join("out")),
            Err(PackError::ExtractionFailed(message)) if message.starts_with("broken.zip: ")
        );
    }
}
