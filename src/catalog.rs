//! Recording catalog
//!
//! The recordings directory is the database: every refresh rebuilds the
//! list from file metadata, and rename/delete act on the files directly.

use crate::error::CatalogError;
use crate::models::Recording;
use crate::recorder::RECORDING_EXTENSION;
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

/// Characters stripped from user-supplied file names
const UNSAFE_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Query and file operations over the recordings directory
#[derive(Debug, Clone)]
pub struct RecordingCatalog {
    dir: PathBuf,
}

impl RecordingCatalog {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ensure the recordings directory exists
    pub fn ensure_dir(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    /// List all recordings, newest first
    pub fn refresh(&self) -> Result<Vec<Recording>, CatalogError> {
        self.ensure_dir()?;

        let mut recordings: Vec<Recording> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_recording_file(path))
            .filter_map(|path| match describe(&path) {
                Ok(recording) => Some(recording),
                Err(e) => {
                    debug!("Skipping {:?}: {}", path, e);
                    None
                }
            })
            .collect();

        recordings.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.name.cmp(&a.name))
        });

        Ok(recordings)
    }

    /// Look up a recording by file name
    ///
    /// Only bare file names inside the recordings directory resolve.
    pub fn find(&self, name: &str) -> Result<Recording, CatalogError> {
        if Path::new(name).file_name() != Some(OsStr::new(name)) {
            return Err(CatalogError::NotFound(name.to_string()));
        }
        let path = self.dir.join(name);
        if !is_recording_file(&path) {
            return Err(CatalogError::NotFound(name.to_string()));
        }
        describe(&path).map_err(|_| CatalogError::NotFound(name.to_string()))
    }

    /// Rename a recording, keeping its extension
    ///
    /// Unsafe characters are stripped from `new_name`. Renaming to the
    /// current name succeeds without touching the file.
    pub fn rename(&self, recording: &Recording, new_name: &str) -> Result<Recording, CatalogError> {
        let sanitized = sanitize_name(new_name);
        if sanitized.trim().is_empty() {
            return Err(CatalogError::BlankName);
        }

        if !self.contains(&recording.path) {
            return Err(CatalogError::NotFound(recording.name.clone()));
        }

        let file_name = match recording.path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}.{}", sanitized, ext),
            None => sanitized,
        };
        let target = self.dir.join(&file_name);

        if target == recording.path {
            return Ok(recording.clone());
        }
        if target.exists() {
            return Err(CatalogError::AlreadyExists(file_name));
        }

        fs::rename(&recording.path, &target)?;
        info!("Renamed {:?} to {:?}", recording.path, target);

        Ok(describe(&target)?)
    }

    /// Delete a recording's file
    pub fn delete(&self, recording: &Recording) -> Result<(), CatalogError> {
        if !self.contains(&recording.path) {
            return Err(CatalogError::NotFound(recording.name.clone()));
        }

        fs::remove_file(&recording.path)?;
        info!("Deleted {:?}", recording.path);
        Ok(())
    }

    /// Whether `path` is a file directly inside the recordings directory
    fn contains(&self, path: &Path) -> bool {
        path.parent() == Some(self.dir.as_path()) && path.is_file()
    }
}

/// Strip characters that are not allowed in file names
pub fn sanitize_name(name: &str) -> String {
    name.trim().chars().filter(|c| !UNSAFE_CHARS.contains(c)).collect()
}

fn is_recording_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(RECORDING_EXTENSION))
            .unwrap_or(false)
}

/// Build a descriptor from file metadata
fn describe(path: &Path) -> std::io::Result<Recording> {
    let metadata = fs::metadata(path)?;
    let modified: DateTime<Utc> = metadata.modified()?.into();

    Ok(Recording {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: path.to_path_buf(),
        size_bytes: metadata.len(),
        modified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::{Duration, SystemTime};

    fn touch(dir: &Path, name: &str, modified: SystemTime) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"RIFF....WAVE").unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
        path
    }

    fn names(recordings: &[Recording]) -> Vec<&str> {
        recordings.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_refresh_sorts_newest_first_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let base = SystemTime::now() - Duration::from_secs(3600);
        touch(dir.path(), "REC_1.wav", base);
        touch(dir.path(), "REC_3.wav", base + Duration::from_secs(20));
        touch(dir.path(), "REC_2.wav", base + Duration::from_secs(10));
        touch(dir.path(), "notes.txt", base + Duration::from_secs(30));
        fs::create_dir(dir.path().join("folder.wav")).unwrap();

        let catalog = RecordingCatalog::new(dir.path());
        let recordings = catalog.refresh().unwrap();

        assert_eq!(names(&recordings), vec!["REC_3.wav", "REC_2.wav", "REC_1.wav"]);
        assert_eq!(recordings[0].size_bytes, 12);
    }

    #[test]
    fn test_refresh_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = RecordingCatalog::new(dir.path().join("nested").join("memos"));
        assert!(catalog.refresh().unwrap().is_empty());
        assert!(catalog.dir().is_dir());
    }

    #[test]
    fn test_rename_lists_new_name_only() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "REC_1.wav", SystemTime::now());
        let catalog = RecordingCatalog::new(dir.path());
        let recording = catalog.find("REC_1.wav").unwrap();

        let renamed = catalog.rename(&recording, "Team: sync?").unwrap();
        assert_eq!(renamed.name, "Team sync.wav");

        let listed = catalog.refresh().unwrap();
        assert_eq!(names(&listed), vec!["Team sync.wav"]);
    }

    #[test]
    fn test_rename_blank_leaves_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "REC_1.wav", SystemTime::now());
        let catalog = RecordingCatalog::new(dir.path());
        let recording = catalog.find("REC_1.wav").unwrap();

        assert!(matches!(catalog.rename(&recording, "   "), Err(CatalogError::BlankName)));
        assert!(matches!(catalog.rename(&recording, "//??"), Err(CatalogError::BlankName)));
        assert_eq!(names(&catalog.refresh().unwrap()), vec!["REC_1.wav"]);
    }

    #[test]
    fn test_rename_refuses_collision() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        touch(dir.path(), "REC_1.wav", now);
        touch(dir.path(), "taken.wav", now);
        let catalog = RecordingCatalog::new(dir.path());
        let recording = catalog.find("REC_1.wav").unwrap();

        let result = catalog.rename(&recording, "taken");
        assert!(matches!(result, Err(CatalogError::AlreadyExists(name)) if name == "taken.wav"));
        assert!(recording.path.exists());
    }

    #[test]
    fn test_rename_to_same_name_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "memo.wav", SystemTime::now());
        let catalog = RecordingCatalog::new(dir.path());
        let recording = catalog.find("memo.wav").unwrap();

        assert_eq!(catalog.rename(&recording, "memo").unwrap(), recording);
    }

    #[test]
    fn test_delete_removes_from_listing() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        touch(dir.path(), "REC_1.wav", now);
        touch(dir.path(), "REC_2.wav", now - Duration::from_secs(5));
        let catalog = RecordingCatalog::new(dir.path());
        let recording = catalog.find("REC_1.wav").unwrap();

        catalog.delete(&recording).unwrap();
        assert_eq!(names(&catalog.refresh().unwrap()), vec!["REC_2.wav"]);
        assert!(matches!(catalog.delete(&recording), Err(CatalogError::NotFound(_))));
    }

    #[test]
    fn test_find_missing() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = RecordingCatalog::new(dir.path());
        assert!(matches!(catalog.find("nope.wav"), Err(CatalogError::NotFound(_))));
    }

    #[test]
    fn test_find_stays_inside_dir() {
        let root = tempfile::tempdir().unwrap();
        let memos = root.path().join("memos");
        fs::create_dir(&memos).unwrap();
        let outside = touch(root.path(), "outside.wav", SystemTime::now());
        let catalog = RecordingCatalog::new(&memos);

        for name in ["../outside.wav", outside.to_str().unwrap(), "..", "."] {
            assert!(
                matches!(catalog.find(name), Err(CatalogError::NotFound(_))),
                "{name} resolved"
            );
        }
    }

    #[test]
    fn test_delete_refuses_foreign_path() {
        let root = tempfile::tempdir().unwrap();
        let memos = root.path().join("memos");
        fs::create_dir(&memos).unwrap();
        let outside = touch(root.path(), "outside.wav", SystemTime::now());
        let catalog = RecordingCatalog::new(&memos);
        let foreign = describe(&outside).unwrap();

        assert!(matches!(catalog.delete(&foreign), Err(CatalogError::NotFound(_))));
        assert!(matches!(
            catalog.rename(&foreign, "moved"),
            Err(CatalogError::NotFound(_))
        ));
        assert!(outside.exists());
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name(" a/b\\c:d*e?f\"g<h>i|j "), "abcdefghij");
        assert_eq!(sanitize_name("Lecture 3"), "Lecture 3");
    }
}
