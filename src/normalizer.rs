//! Boilerplate stripping for plain-text documents.
//!
//! Stripping is a tolerant line scan rather than a grammar. Each stage has a
//! full-content fallback, so a document without markers passes through with
//! only illustration and blank-line cleanup applied:
//!
//! 1. start marker: drop everything up to and including the first start line
//! 2. end marker: drop everything from the first end line onwards
//! 3. title narrowing: drop front matter above the first line naming the title
//!
//! Running the transform on its own output is a no-op.

use crate::controls::NormalizeControls;
use crate::error::{NormalizeError, StorageError};
use crate::library::Library;
use crate::manifest::{Manifest, ManifestRecord};
use std::borrow::Cow;
use tracing::{info, warn};

/// Header sentinel line prefix.
pub const START_MARKER: &str = "*** START OF THE PROJECT GUTENBERG EBOOK";
/// Footer sentinel line prefix.
pub const END_MARKER: &str = "*** END OF THE PROJECT GUTENBERG EBOOK";
/// Placeholder lines left where images were.
pub const ILLUSTRATION_TOKEN: &str = "[Illustration]";

const SHORT_TITLE_CHARS: usize = 50;
const SHORT_TITLE_MIN_CHARS: usize = 10;
/// Cleaned documents below this size are flagged in reports.
pub const SUSPICIOUS_BYTES: usize = 1024;

/// Result of stripping one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrippedText {
    /// Cleaned text.
    pub text: String,
    /// A start marker line was found.
    pub start_marker: bool,
    /// An end marker line was found.
    pub end_marker: bool,
    /// Lines removed by title narrowing, when it matched.
    pub title_skipped_lines: Option<usize>,
    /// Malformed UTF-8 sequences were dropped while decoding.
    pub lossy_decoding: bool,
}

/// Strips publisher boilerplate from raw document bytes.
pub fn strip_boilerplate(bytes: &[u8], title: Option<&str>) -> StrippedText {
    let (decoded, lossy_decoding) = decode_body(bytes);
    let text = decoded.strip_prefix('\u{feff}').unwrap_or(&decoded);
    let lines: Vec<&str> = text.split('\n').collect();

    let start = lines.iter().position(|line| line.contains(START_MARKER));
    let end = lines.iter().position(|line| line.contains(END_MARKER));
    let from = start.map_or(0, |idx| idx + 1);
    let to = end.unwrap_or(lines.len());
    let mut body: &[&str] = if to >= from { &lines[from..to] } else { &[] };

    let title_skipped_lines = title.and_then(|title| find_title_line(body, title));
    if let Some(skip) = title_skipped_lines {
        body = &body[skip..];
    }

    let text = collapse_blank_lines(
        body.iter()
            .copied()
            .filter(|line| line.trim() != ILLUSTRATION_TOKEN),
    );

    StrippedText {
        text: text.trim().to_string(),
        start_marker: start.is_some(),
        end_marker: end.is_some(),
        title_skipped_lines,
        lossy_decoding,
    }
}

/// Decodes UTF-8, dropping malformed sequences instead of failing.
fn decode_body(bytes: &[u8]) -> (Cow<'_, str>, bool) {
    match std::str::from_utf8(bytes) {
        Ok(text) => (Cow::Borrowed(text), false),
        Err(_) => {
            let mut text = String::with_capacity(bytes.len());
            for chunk in bytes.utf8_chunks() {
                text.push_str(chunk.valid());
            }
            (Cow::Owned(text), true)
        }
    }
}

/// Index of the first line mentioning the title, case-insensitively.
///
/// Falls back to the colon-truncated title capped at 50 characters, but only
/// when that prefix is long enough to be distinctive.
fn find_title_line(lines: &[&str], title: &str) -> Option<usize> {
    let full = title.trim().to_lowercase();
    if full.is_empty() {
        return None;
    }
    if let Some(idx) = position_containing(lines, &full) {
        return Some(idx);
    }

    let short: String = title
        .split(':')
        .next()
        .unwrap_or_default()
        .trim()
        .chars()
        .take(SHORT_TITLE_CHARS)
        .collect::<String>()
        .to_lowercase();
    if short.chars().count() > SHORT_TITLE_MIN_CHARS && short != full {
        position_containing(lines, &short)
    } else {
        None
    }
}

fn position_containing(lines: &[&str], needle: &str) -> Option<usize> {
    lines
        .iter()
        .position(|line| line.to_lowercase().contains(needle))
}

fn collapse_blank_lines<'a>(lines: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::new();
    let mut first = true;
    let mut prev_blank = false;
    for line in lines {
        let blank = line.trim().is_empty();
        if blank && prev_blank {
            continue;
        }
        prev_blank = blank;
        if !first {
            out.push('\n');
        }
        first = false;
        out.push_str(line);
    }
    out
}

/// Per-document outcome of a normalization pass.
#[derive(Debug, Clone, PartialEq)]
pub struct FileOutcome {
    /// Document id.
    pub id: u64,
    /// Document filename.
    pub filename: String,
    /// Size before stripping.
    pub original_bytes: usize,
    /// Size after stripping.
    pub cleaned_bytes: usize,
    /// Whether the file content changed.
    pub changed: bool,
}

impl FileOutcome {
    /// Percentage of the original size removed.
    pub fn reduction_pct(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        (self.original_bytes.saturating_sub(self.cleaned_bytes)) as f64
            / self.original_bytes as f64
            * 100.0
    }

    /// Cleaned output is small enough to suggest the markers misfired.
    pub fn is_suspicious(&self) -> bool {
        self.cleaned_bytes < SUSPICIOUS_BYTES
    }
}

/// A document the pass could not process.
#[derive(Debug)]
pub struct NormalizeFailure {
    /// Document id.
    pub id: u64,
    /// Why it was skipped.
    pub error: NormalizeError,
}

/// Summary of a normalization pass.
#[derive(Debug, Default)]
pub struct NormalizeReport {
    /// Records visited.
    pub processed: usize,
    /// Per-file results for documents that were read.
    pub outcomes: Vec<FileOutcome>,
    /// Records skipped with their reason.
    pub failures: Vec<NormalizeFailure>,
    /// Whether files and manifest were left untouched.
    pub dry_run: bool,
}

impl NormalizeReport {
    /// Documents whose content changed (or would change in a dry run).
    pub fn changed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.changed).count()
    }

    /// Documents whose output is suspiciously small.
    pub fn suspicious(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| o.is_suspicious())
    }

    /// Prints the end-of-run summary.
    pub fn report(&self) {
        let original: usize = self.outcomes.iter().map(|o| o.original_bytes).sum();
        let cleaned: usize = self.outcomes.iter().map(|o| o.cleaned_bytes).sum();
        let label = if self.dry_run { " (dry run)" } else { "" };
        println!("--- strip summary{label} ---");
        println!("records processed: {}", self.processed);
        println!("documents changed: {}", self.changed());
        println!("documents skipped: {}", self.failures.len());
        println!(
            "bytes: {original} -> {cleaned} ({:.1} KB removed)",
            original.saturating_sub(cleaned) as f64 / 1024.0
        );
        for failure in self.failures.iter().take(10) {
            println!("  skipped {}: {}", failure.id, failure.error);
        }
        if self.failures.len() > 10 {
            println!("  ... and {} more", self.failures.len() - 10);
        }
        for outcome in self.suspicious() {
            println!(
                "  suspicious: {} shrank to {} bytes",
                outcome.filename, outcome.cleaned_bytes
            );
        }
    }
}

/// Rewrites every manifest document with its boilerplate removed.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    controls: NormalizeControls,
}

impl Normalizer {
    /// Builds a normalizer with the provided controls.
    pub fn new(controls: NormalizeControls) -> Self {
        Self { controls }
    }

    /// Processes every record and returns the updated manifest.
    ///
    /// Per-file failures are collected in the report; only a failure to
    /// persist the manifest aborts the pass.
    pub fn run(
        &self,
        library: &Library,
        mut manifest: Manifest,
    ) -> Result<(Manifest, NormalizeReport), StorageError> {
        let records: Vec<ManifestRecord> = manifest.records().cloned().collect();
        let total = records.len();
        let mut report = NormalizeReport {
            dry_run: self.controls.dry_run,
            ..NormalizeReport::default()
        };

        for (idx, record) in records.into_iter().enumerate() {
            report.processed += 1;
            match self.normalize_one(library, &record) {
                Ok(outcome) => {
                    info!(
                        "({}/{total}) [{:.1}% reduction] {}",
                        idx + 1,
                        outcome.reduction_pct(),
                        outcome.filename
                    );
                    if outcome.is_suspicious() {
                        warn!(id = record.id, filename = %outcome.filename, bytes = outcome.cleaned_bytes, "cleaned document is nearly empty");
                    }
                    if !self.controls.dry_run {
                        manifest.set_size(record.id, outcome.cleaned_bytes);
                    }
                    report.outcomes.push(outcome);
                }
                Err(error) => {
                    warn!("({}/{total}) skipping {}: {error}", idx + 1, record.id);
                    report.failures.push(NormalizeFailure {
                        id: record.id,
                        error,
                    });
                }
            }
        }

        if !self.controls.dry_run {
            library.save_manifest(&manifest)?;
        }
        Ok((manifest, report))
    }

    fn normalize_one(
        &self,
        library: &Library,
        record: &ManifestRecord,
    ) -> Result<FileOutcome, NormalizeError> {
        if record.filename.is_empty() {
            return Err(NormalizeError::MissingFilename { id: record.id });
        }
        if !library.contains(&record.filename) {
            return Err(NormalizeError::FileNotFound {
                filename: record.filename.clone(),
            });
        }

        let original = library.read(&record.filename)?;
        let title = self
            .controls
            .title_narrowing
            .then_some(record.title.as_str());
        let stripped = strip_boilerplate(&original, title);
        let cleaned = stripped.text.into_bytes();
        let changed = cleaned != original;

        if changed && !self.controls.dry_run {
            library.write(&record.filename, &cleaned)?;
        }

        Ok(FileOutcome {
            id: record.id,
            filename: record.filename.clone(),
            original_bytes: original.len(),
            cleaned_bytes: cleaned.len(),
            changed,
        })
    }
}
