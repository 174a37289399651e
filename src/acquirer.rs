//! Acquisition loop: walk the catalog, fetch missing documents, record them.

use crate::catalog::{Catalog, CatalogEntry};
use crate::controls::AcquireControls;
use crate::error::{CatalogError, FetchError, FetchErrorKind, StorageError};
use crate::library::Library;
use crate::manifest::{Manifest, ManifestRecord};
use crate::source::{guard_size, Fetcher};
use futures_util::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

const FAILURE_SAMPLE: usize = 10;
const LIBRARY_SAMPLE: usize = 10;

/// Shared spacing between document fetches, regardless of worker count.
struct Politeness {
    delay: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Politeness {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: Mutex::new(None),
        }
    }

    async fn wait(&self) {
        if self.delay.is_zero() {
            return;
        }
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next.map_or(now, |reserved| reserved.max(now));
            *next = Some(slot + self.delay);
            slot
        };
        sleep_until(slot).await;
    }
}

/// Fetches catalog documents into a [`Library`] and records them in the manifest.
pub struct Acquirer<C, F> {
    catalog: C,
    fetcher: F,
    library: Library,
    controls: AcquireControls,
}

impl<C: Catalog, F: Fetcher> Acquirer<C, F> {
    /// Builds an acquirer over the given collaborators.
    pub fn new(catalog: C, fetcher: F, library: Library, controls: AcquireControls) -> Self {
        Self {
            catalog,
            fetcher,
            library,
            controls,
        }
    }

    /// Storage root used by this acquirer.
    pub fn library(&self) -> &Library {
        &self.library
    }

    /// Catalog being walked.
    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Fetcher used for document sources.
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Walks the catalog and returns the updated manifest with a run report.
    ///
    /// The manifest is persisted after every acquired document and once more
    /// at the end; only that final write can fail the run.
    pub async fn run(&self, manifest: Manifest) -> Result<(Manifest, AcquireReport), StorageError> {
        let state = Mutex::new(manifest);
        let politeness = Politeness::new(self.controls.politeness_delay());
        let max_documents = self.controls.max_documents();
        let workers = self.controls.workers();
        let mut report = AcquireReport::default();
        let mut satisfied = 0usize;

        for page in 1..=self.controls.max_pages() {
            if satisfied >= max_documents {
                break;
            }
            info!(page, "fetching catalog page");
            let entries = match self.catalog.page(page).await {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(page, error = %err, "catalog paging stopped");
                    report.catalog_error = Some(err);
                    break;
                }
            };
            if entries.is_empty() {
                info!(page, "catalog exhausted");
                break;
            }
            report.pages += 1;

            let mut queue = entries.into_iter();
            loop {
                let mut batch = Vec::new();
                while satisfied + batch.len() < max_documents && batch.len() < workers {
                    let Some(entry) = queue.next() else {
                        break;
                    };
                    report.processed += 1;
                    if state.lock().await.contains(entry.id) {
                        debug!(id = entry.id, title = %entry.title, "already acquired");
                        report.skipped += 1;
                        satisfied += 1;
                        continue;
                    }
                    batch.push(entry);
                }
                if batch.is_empty() {
                    break;
                }

                for outcome in self.acquire_batch(batch, &state, &politeness).await {
                    match outcome {
                        EntryOutcome::Acquired { fallback } => {
                            report.acquired += 1;
                            if fallback {
                                report.via_fallback += 1;
                            }
                            satisfied += 1;
                        }
                        EntryOutcome::Failed(failure) => report.failures.push(failure),
                    }
                }
            }
        }

        let manifest = state.into_inner();
        self.library.save_manifest(&manifest)?;
        report.total = manifest.total();
        Ok((manifest, report))
    }

    async fn acquire_batch(
        &self,
        batch: Vec<CatalogEntry>,
        state: &Mutex<Manifest>,
        politeness: &Politeness,
    ) -> Vec<EntryOutcome> {
        let jobs: Vec<(CatalogEntry, String)> = {
            let manifest = state.lock().await;
            let mut reserved = HashSet::new();
            batch
                .into_iter()
                .map(|entry| {
                    let filename = manifest.assign_filename(entry.id, &entry.title, &reserved);
                    reserved.insert(filename.clone());
                    (entry, filename)
                })
                .collect()
        };

        stream::iter(jobs)
            .map(|(entry, filename)| self.acquire_one(entry, filename, state, politeness))
            .buffer_unordered(self.controls.workers())
            .collect()
            .await
    }

    async fn acquire_one(
        &self,
        entry: CatalogEntry,
        filename: String,
        state: &Mutex<Manifest>,
        politeness: &Politeness,
    ) -> EntryOutcome {
        politeness.wait().await;
        info!(id = entry.id, title = %entry.title, "downloading");

        let mut attempts = Vec::new();
        for (idx, template) in self.controls.sources().iter().enumerate() {
            let url = template.render(entry.id);
            let body = match self.fetch_bounded(&url).await {
                Ok(body) => body,
                Err(err) => {
                    debug!(id = entry.id, error = %err, "source rejected");
                    attempts.push(err);
                    continue;
                }
            };

            match self.commit(&entry, &filename, &body, state).await {
                Ok(record) => {
                    let fallback = idx > 0;
                    info!(
                        id = record.id,
                        filename = %record.filename,
                        size_kb = record.size_kb,
                        "acquired{}",
                        if fallback { " (alt source)" } else { "" }
                    );
                    return EntryOutcome::Acquired { fallback };
                }
                Err(err) => {
                    warn!(id = entry.id, error = %err, "failed to store document");
                    self.discard(&filename, state).await;
                    return EntryOutcome::Failed(AcquireFailure {
                        entry,
                        attempts,
                        storage: Some(err),
                    });
                }
            }
        }

        warn!(id = entry.id, title = %entry.title, "all sources failed");
        self.discard(&filename, state).await;
        EntryOutcome::Failed(AcquireFailure {
            entry,
            attempts,
            storage: None,
        })
    }

    async fn fetch_bounded(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let body = match timeout(self.controls.fetch_timeout(), self.fetcher.fetch(url)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FetchError::Timeout {
                    url: url.to_string(),
                })
            }
        };
        guard_size(url, body, self.controls.min_content_bytes())
    }

    async fn commit(
        &self,
        entry: &CatalogEntry,
        filename: &str,
        body: &[u8],
        state: &Mutex<Manifest>,
    ) -> Result<ManifestRecord, StorageError> {
        self.library.write(filename, body)?;
        let record = ManifestRecord::new(
            entry.id,
            entry.title.clone(),
            filename.to_string(),
            body.len(),
        );
        let mut manifest = state.lock().await;
        manifest.insert(record.clone());
        if let Err(err) = self.library.save_manifest(&manifest) {
            // The record stays in memory and is retried by the final save.
            warn!(error = %err, "incremental manifest save failed");
        }
        Ok(record)
    }

    async fn discard(&self, filename: &str, state: &Mutex<Manifest>) {
        let manifest = state.lock().await;
        if let Err(err) = self.library.discard(filename, &manifest) {
            warn!(filename, error = %err, "failed to clean up partial document");
        }
    }
}

enum EntryOutcome {
    Acquired { fallback: bool },
    Failed(AcquireFailure),
}

/// A catalog entry that could not be acquired from any source.
#[derive(Debug)]
pub struct AcquireFailure {
    /// The entry that failed.
    pub entry: CatalogEntry,
    /// One error per source template tried, in order.
    pub attempts: Vec<FetchError>,
    /// Set when a body was accepted but could not be stored.
    pub storage: Option<StorageError>,
}

impl fmt::Display for AcquireFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.entry.id, self.entry.title)?;
        if let Some(err) = &self.storage {
            write!(f, " ({err})")
        } else if let Some(err) = self.attempts.last() {
            write!(f, " ({err})")
        } else {
            write!(f, " (no sources configured)")
        }
    }
}

/// Summary of an acquisition run.
#[derive(Debug, Default)]
pub struct AcquireReport {
    /// Catalog pages that returned entries.
    pub pages: u32,
    /// Catalog entries examined.
    pub processed: usize,
    /// Documents fetched and recorded during this run.
    pub acquired: usize,
    /// Acquired documents served by a fallback template.
    pub via_fallback: usize,
    /// Entries already present in the manifest.
    pub skipped: usize,
    /// Entries that could not be acquired.
    pub failures: Vec<AcquireFailure>,
    /// Error that stopped paging early, if any.
    pub catalog_error: Option<CatalogError>,
    /// Manifest record count after the run.
    pub total: usize,
}

impl AcquireReport {
    /// Failure counts keyed by the cause of the last attempt.
    pub fn failure_causes(&self) -> BTreeMap<FetchErrorKind, usize> {
        let mut causes = BTreeMap::new();
        for failure in &self.failures {
            if let Some(kind) = failure.attempts.last().map(FetchError::kind) {
                *causes.entry(kind).or_insert(0) += 1;
            }
        }
        causes
    }

    /// Prints the end-of-run summary.
    pub fn report(&self, library: &Library) {
        println!("--- acquisition summary ---");
        println!("catalog pages read: {}", self.pages);
        println!("entries processed: {}", self.processed);
        println!(
            "acquired: {} ({} via fallback source)",
            self.acquired, self.via_fallback
        );
        println!("already present: {}", self.skipped);
        println!("failed: {}", self.failures.len());
        for (kind, count) in self.failure_causes() {
            println!("  {kind:?}: {count}");
        }
        println!("manifest total: {}", self.total);
        println!("manifest: {}", library.manifest_path().display());
        if let Some(err) = &self.catalog_error {
            println!("paging stopped early: {err}");
        }

        if !self.failures.is_empty() {
            println!("failed downloads:");
            for failure in self.failures.iter().take(FAILURE_SAMPLE) {
                println!("  - {failure}");
            }
            if self.failures.len() > FAILURE_SAMPLE {
                println!("  ... and {} more", self.failures.len() - FAILURE_SAMPLE);
            }
        }

        match library.list_documents() {
            Ok(names) => {
                println!("library sample:");
                for name in names.iter().take(LIBRARY_SAMPLE) {
                    println!("  {name}");
                }
                if names.len() > LIBRARY_SAMPLE {
                    println!("  ... and {} more", names.len() - LIBRARY_SAMPLE);
                }
            }
            Err(err) => println!("library listing failed: {err}"),
        }
    }
}
