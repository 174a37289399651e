//! Persistent record of every acquired document.
//!
//! The manifest is a plain value: load it, mutate it, persist it. Persisting
//! always goes through a write-then-rename so an interrupted process leaves
//! either the previous or the next committed state on disk.

use crate::error::StorageError;
use crate::library::{is_plain_filename, write_atomic};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::warn;

/// Manifest filename inside the storage root.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Extension appended to every document filename.
pub const DOCUMENT_EXTENSION: &str = "txt";

/// One successfully acquired document.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestRecord {
    /// Catalog id.
    pub id: u64,
    /// Catalog title.
    pub title: String,
    /// Filename relative to the storage root.
    pub filename: String,
    /// Size on disk in KiB, rounded to one decimal.
    pub size_kb: f64,
}

impl ManifestRecord {
    /// Creates a record, deriving `size_kb` from `size_bytes`.
    pub fn new(id: u64, title: String, filename: String, size_bytes: usize) -> Self {
        Self {
            id,
            title,
            filename,
            size_kb: size_kb(size_bytes),
        }
    }
}

/// Rounds a byte count to KiB with one decimal place.
pub fn size_kb(bytes: usize) -> f64 {
    (bytes as f64 / 1024.0 * 10.0).round() / 10.0
}

/// Mapping from document id to record. `total` is always the record count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    records: BTreeMap<u64, ManifestRecord>,
}

#[derive(Serialize, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    books: BTreeMap<u64, StoredRecord>,
    #[serde(default)]
    total: usize,
}

#[derive(Serialize, Deserialize)]
struct StoredRecord {
    title: String,
    filename: String,
    size_kb: f64,
}

impl Manifest {
    /// An empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the manifest at `path`.
    ///
    /// A missing file yields an empty manifest. An unreadable or malformed
    /// file is logged and also treated as empty: documents can always be
    /// re-acquired, so a corrupt manifest never stops a run.
    pub fn load(path: &Path) -> Self {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Self::new(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "manifest unreadable; starting empty");
                return Self::new();
            }
        };
        match serde_json::from_slice::<ManifestFile>(&bytes) {
            Ok(file) => Self::from_file(file),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "manifest malformed; starting empty");
                Self::new()
            }
        }
    }

    fn from_file(file: ManifestFile) -> Self {
        let records: BTreeMap<u64, ManifestRecord> = file
            .books
            .into_iter()
            .filter(|(id, stored)| {
                let keep = stored.filename.is_empty() || is_plain_filename(&stored.filename);
                if !keep {
                    warn!(id, filename = %stored.filename, "dropping record whose filename leaves the storage root");
                }
                keep
            })
            .map(|(id, stored)| {
                (
                    id,
                    ManifestRecord {
                        id,
                        title: stored.title,
                        filename: stored.filename,
                        size_kb: stored.size_kb,
                    },
                )
            })
            .collect();
        if file.total != records.len() {
            warn!(
                recorded = file.total,
                actual = records.len(),
                "manifest total disagrees with record count; using record count"
            );
        }
        Self { records }
    }

    /// Writes the manifest as pretty-printed JSON via an atomic replace.
    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        let file = ManifestFile {
            books: self
                .records
                .iter()
                .map(|(id, record)| {
                    (
                        *id,
                        StoredRecord {
                            title: record.title.clone(),
                            filename: record.filename.clone(),
                            size_kb: record.size_kb,
                        },
                    )
                })
                .collect(),
            total: self.total(),
        };
        let mut encoded = serde_json::to_vec_pretty(&file)?;
        encoded.push(b'\n');
        write_atomic(path, &encoded)
    }

    /// Number of records.
    pub fn total(&self) -> usize {
        self.records.len()
    }

    /// True when no document has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether `id` has been acquired.
    pub fn contains(&self, id: u64) -> bool {
        self.records.contains_key(&id)
    }

    /// Record for `id`.
    pub fn get(&self, id: u64) -> Option<&ManifestRecord> {
        self.records.get(&id)
    }

    /// Records in id order.
    pub fn records(&self) -> impl Iterator<Item = &ManifestRecord> {
        self.records.values()
    }

    /// Inserts or replaces the record for its id.
    pub fn insert(&mut self, record: ManifestRecord) -> Option<ManifestRecord> {
        self.records.insert(record.id, record)
    }

    /// Updates the recorded size of `id`. Returns false when `id` is unknown.
    pub fn set_size(&mut self, id: u64, size_bytes: usize) -> bool {
        match self.records.get_mut(&id) {
            Some(record) => {
                record.size_kb = size_kb(size_bytes);
                true
            }
            None => false,
        }
    }

    /// Id of the record that owns `filename`, if any.
    pub fn filename_owner(&self, filename: &str) -> Option<u64> {
        self.records
            .values()
            .find(|record| record.filename == filename)
            .map(|record| record.id)
    }

    /// Chooses the filename for a new document.
    ///
    /// Candidates are tried in order: `<slug>.txt`, `<slug>-<id>.txt`, then
    /// `<slug>-<id>-2.txt`, `<slug>-<id>-3.txt` and so on. An empty slug
    /// starts at `<id>.txt`. A candidate is free when `reserved` does not hold
    /// it and no other id owns it in the manifest.
    pub fn assign_filename(&self, id: u64, title: &str, reserved: &HashSet<String>) -> String {
        let slug = filename_for_title(title);
        let is_free = |name: &str| {
            !reserved.contains(name)
                && self
                    .filename_owner(name)
                    .map_or(true, |owner| owner == id)
        };

        if !slug.is_empty() {
            let plain = format!("{slug}.{DOCUMENT_EXTENSION}");
            if is_free(&plain) {
                return plain;
            }
        }
        let stem = if slug.is_empty() {
            id.to_string()
        } else {
            format!("{slug}-{id}")
        };
        let suffixed = format!("{stem}.{DOCUMENT_EXTENSION}");
        if is_free(&suffixed) {
            return suffixed;
        }
        (2u64..)
            .map(|n| format!("{stem}-{n}.{DOCUMENT_EXTENSION}"))
            .find(|name| is_free(name))
            .unwrap_or(suffixed)
    }
}

/// Derives a filesystem-friendly slug from a title.
///
/// Lower-cases, drops apostrophes and any subtitle after the first colon,
/// removes characters that are neither alphanumeric nor separators, then
/// collapses runs of whitespace, `-` and `_` into single dashes.
pub fn filename_for_title(title: &str) -> String {
    let head = title.split(':').next().unwrap_or_default();
    let mut slug = String::with_capacity(head.len());
    let mut pending_dash = false;
    for ch in head.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_dash = true;
        }
    }
    slug
}
