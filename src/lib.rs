#![warn(missing_docs)]
//! Core library entry points for the bookcrawl acquisition and stripping passes.

pub mod acquirer;
pub mod catalog;
pub mod controls;
pub mod error;
pub mod library;
pub mod manifest;
pub mod normalizer;
pub mod source;

pub use acquirer::{AcquireFailure, AcquireReport, Acquirer};
pub use catalog::{Catalog, CatalogEntry, HttpCatalog};
pub use controls::{AcquireCli, AcquireControls, NormalizeControls, StripCli};
pub use error::{CatalogError, FetchError, FetchErrorKind, NormalizeError, StorageError};
pub use library::{Library, LibraryAudit};
pub use manifest::{filename_for_title, Manifest, ManifestRecord, MANIFEST_FILE};
pub use normalizer::{
    strip_boilerplate, FileOutcome, NormalizeFailure, NormalizeReport, Normalizer, StrippedText,
};
pub use source::{Fetcher, HttpFetcher, SourceTemplate};

/// Exit status used when a run is interrupted by a signal.
pub const EXIT_INTERRUPTED: i32 = 130;
