//! Storage root holding one text file per manifest record.

use crate::error::StorageError;
use crate::manifest::{Manifest, DOCUMENT_EXTENSION, MANIFEST_FILE};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

const TMP_SUFFIX: &str = ".partial";

/// Replaces `path` with `bytes` by writing a sibling temp file and renaming it.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let tmp = tmp_path(path);
    if let Err(source) = fs::write(&tmp, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(StorageError::io("failed to write", tmp, source));
    }
    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        StorageError::io("failed to replace", path, source)
    })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(TMP_SUFFIX);
    path.with_file_name(name)
}

/// Directory of documents plus the manifest that owns them.
#[derive(Debug, Clone)]
pub struct Library {
    root: PathBuf,
}

impl Library {
    /// Uses `root` as the storage directory, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|source| StorageError::io("failed to create", &root, source))?;
        Ok(Self { root })
    }

    /// Storage directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of `manifest.json`.
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Loads the manifest, permissively.
    pub fn load_manifest(&self) -> Manifest {
        Manifest::load(&self.manifest_path())
    }

    /// Persists the manifest atomically.
    pub fn save_manifest(&self, manifest: &Manifest) -> Result<(), StorageError> {
        manifest.save(&self.manifest_path())
    }

    /// Path for a document filename.
    ///
    /// Only plain file names are accepted; anything that could resolve
    /// outside the root is refused.
    pub fn document_path(&self, filename: &str) -> Result<PathBuf, StorageError> {
        if !is_plain_filename(filename) {
            return Err(StorageError::UnsafeFilename {
                filename: filename.to_string(),
            });
        }
        Ok(self.root.join(filename))
    }

    /// Whether a document file exists.
    pub fn contains(&self, filename: &str) -> bool {
        self.document_path(filename)
            .is_ok_and(|path| path.is_file())
    }

    /// Reads a document's raw bytes.
    pub fn read(&self, filename: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.document_path(filename)?;
        fs::read(&path).map_err(|source| StorageError::io("failed to read", path, source))
    }

    /// Stores a document's bytes verbatim.
    pub fn write(&self, filename: &str, bytes: &[u8]) -> Result<(), StorageError> {
        write_atomic(&self.document_path(filename)?, bytes)
    }

    /// Removes leftovers of a failed acquisition of `filename`.
    ///
    /// The temp file is always removed. The document itself is only removed
    /// when no manifest record owns it, so another document's file is never
    /// touched.
    pub fn discard(&self, filename: &str, manifest: &Manifest) -> Result<(), StorageError> {
        let path = self.document_path(filename)?;
        remove_if_present(&tmp_path(&path))?;
        if manifest.filename_owner(filename).is_none() {
            remove_if_present(&path)?;
        }
        Ok(())
    }

    /// Document filenames (with the text extension) present on disk, sorted.
    pub fn list_documents(&self) -> Result<Vec<String>, StorageError> {
        let entries = fs::read_dir(&self.root)
            .map_err(|source| StorageError::io("failed to list", &self.root, source))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|source| StorageError::io("failed to list", &self.root, source))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some(DOCUMENT_EXTENSION) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Cross-checks the manifest against the files on disk.
    pub fn audit(&self, manifest: &Manifest) -> Result<LibraryAudit, StorageError> {
        let on_disk = self.list_documents()?;
        let owned: HashSet<&str> = manifest.records().map(|r| r.filename.as_str()).collect();
        let present: HashSet<&str> = on_disk.iter().map(String::as_str).collect();

        let missing = manifest
            .records()
            .filter(|record| !present.contains(record.filename.as_str()))
            .map(|record| record.id)
            .collect();
        let orphaned = on_disk
            .iter()
            .filter(|name| !owned.contains(name.as_str()))
            .cloned()
            .collect();
        Ok(LibraryAudit { missing, orphaned })
    }
}

/// True for a single normal path component without separators.
pub fn is_plain_filename(name: &str) -> bool {
    if name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn remove_if_present(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StorageError::io("failed to remove", path, source)),
    }
}

/// Disagreements between the manifest and the storage root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryAudit {
    /// Ids whose recorded file is absent.
    pub missing: Vec<u64>,
    /// Files no record owns; not trusted as complete.
    pub orphaned: Vec<String>,
}

impl LibraryAudit {
    /// True when manifest and disk agree.
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.orphaned.is_empty()
    }
}
