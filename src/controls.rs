//! Acquisition and normalization knobs shared by the binaries.

use crate::source::SourceTemplate;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Default catalog endpoint (Gutendex, sorted by popularity).
pub const DEFAULT_CATALOG_URL: &str = "https://gutendex.com/books";
/// Default storage root for documents and the manifest.
pub const DEFAULT_ROOT: &str = "assets/books";
/// Bodies at or below this many bytes are treated as mirror error pages.
pub const DEFAULT_MIN_CONTENT_BYTES: usize = 5000;
/// Upper bound on concurrent fetches.
pub const MAX_WORKERS: usize = 8;

/// Tunable knobs that bound an acquisition run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcquireControls {
    max_documents: usize,
    max_pages: u32,
    politeness_delay: Duration,
    fetch_timeout: Duration,
    min_content_bytes: usize,
    workers: usize,
    sources: Vec<SourceTemplate>,
}

impl AcquireControls {
    /// Constructs a new set of acquisition controls.
    pub fn new(
        max_documents: usize,
        max_pages: u32,
        politeness_delay: Duration,
        fetch_timeout: Duration,
        min_content_bytes: usize,
        workers: usize,
        sources: Vec<SourceTemplate>,
    ) -> Self {
        Self {
            max_documents,
            max_pages,
            politeness_delay,
            fetch_timeout,
            min_content_bytes,
            workers: workers.clamp(1, MAX_WORKERS),
            sources,
        }
    }

    /// Documents (acquired or already present) after which paging stops.
    pub fn max_documents(&self) -> usize {
        self.max_documents
    }

    /// Last catalog page to request.
    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    /// Minimum spacing between document fetches across all workers.
    pub fn politeness_delay(&self) -> Duration {
        self.politeness_delay
    }

    /// Per-request timeout.
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Bodies must be strictly larger than this to be accepted.
    pub fn min_content_bytes(&self) -> usize {
        self.min_content_bytes
    }

    /// Concurrent document fetches.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Ordered source templates, primary first.
    pub fn sources(&self) -> &[SourceTemplate] {
        &self.sources
    }

    /// Replaces the source template list.
    pub fn with_sources(mut self, sources: Vec<SourceTemplate>) -> Self {
        self.sources = sources;
        self
    }

    /// Overrides the politeness delay.
    pub fn with_politeness_delay(mut self, delay: Duration) -> Self {
        self.politeness_delay = delay;
        self
    }

    /// Overrides the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.clamp(1, MAX_WORKERS);
        self
    }
}

impl Default for AcquireControls {
    fn default() -> Self {
        Self {
            max_documents: 100,
            max_pages: 5,
            politeness_delay: Duration::from_millis(300),
            fetch_timeout: Duration::from_secs(10),
            min_content_bytes: DEFAULT_MIN_CONTENT_BYTES,
            workers: 1,
            sources: SourceTemplate::defaults(),
        }
    }
}

/// Command-line interface for the acquisition binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "bookcrawl-acquire",
    about = "Fetch catalog documents into the local library"
)]
pub struct AcquireCli {
    /// Storage root holding documents and manifest.json
    #[arg(long, env = "BOOKCRAWL_ROOT", default_value = DEFAULT_ROOT)]
    pub root: PathBuf,

    /// Paginated catalog endpoint (queried as <url>?page=N)
    #[arg(long, env = "BOOKCRAWL_CATALOG_URL", default_value = DEFAULT_CATALOG_URL)]
    pub catalog_url: String,

    /// Stop after this many documents are present
    #[arg(long, env = "BOOKCRAWL_MAX_DOCUMENTS", default_value_t = 100)]
    pub max_documents: usize,

    /// Maximum catalog pages to walk
    #[arg(long, env = "BOOKCRAWL_MAX_PAGES", default_value_t = 5)]
    pub max_pages: u32,

    /// Milliseconds between document fetches
    #[arg(long, env = "BOOKCRAWL_POLITENESS_MS", default_value_t = 300)]
    pub politeness_ms: u64,

    /// Seconds before a single fetch is abandoned
    #[arg(long, env = "BOOKCRAWL_TIMEOUT_SECS", default_value_t = 10)]
    pub timeout_secs: u64,

    /// Responses must exceed this many bytes
    #[arg(long, env = "BOOKCRAWL_MIN_CONTENT_BYTES", default_value_t = DEFAULT_MIN_CONTENT_BYTES)]
    pub min_content_bytes: usize,

    /// Concurrent document fetches (1-8)
    #[arg(long, env = "BOOKCRAWL_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Source URL template with `{id}` placeholders; repeat for fallbacks
    #[arg(long = "source", env = "BOOKCRAWL_SOURCES", value_delimiter = ',')]
    pub sources: Vec<String>,
}

impl AcquireCli {
    /// Converts the parsed CLI into `AcquireControls`.
    pub fn build_controls(&self) -> AcquireControls {
        let sources = if self.sources.is_empty() {
            SourceTemplate::defaults()
        } else {
            self.sources
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(SourceTemplate::new)
                .collect()
        };
        AcquireControls::new(
            self.max_documents,
            self.max_pages,
            Duration::from_millis(self.politeness_ms),
            Duration::from_secs(self.timeout_secs.max(1)),
            self.min_content_bytes,
            self.workers,
            sources,
        )
    }
}

/// Knobs for the normalization pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NormalizeControls {
    /// Compute reductions without writing files or the manifest.
    pub dry_run: bool,
    /// Narrow the text to the first line mentioning the title.
    pub title_narrowing: bool,
}

impl Default for NormalizeControls {
    fn default() -> Self {
        Self {
            dry_run: false,
            title_narrowing: true,
        }
    }
}

/// Command-line interface for the boilerplate stripper.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "bookcrawl-strip",
    about = "Strip publisher boilerplate from every document in the manifest"
)]
pub struct StripCli {
    /// Storage root holding documents and manifest.json
    #[arg(long, env = "BOOKCRAWL_ROOT", default_value = DEFAULT_ROOT)]
    pub root: PathBuf,

    /// Report would-be reductions without writing anything
    #[arg(short = 'n', long, default_value_t = false)]
    pub dry_run: bool,

    /// Skip the title-based front-matter narrowing
    #[arg(long, default_value_t = false)]
    pub no_title_narrowing: bool,
}

impl StripCli {
    /// Converts the parsed CLI into `NormalizeControls`.
    pub fn build_controls(&self) -> NormalizeControls {
        NormalizeControls {
            dry_run: self.dry_run,
            title_narrowing: !self.no_title_narrowing,
        }
    }
}
