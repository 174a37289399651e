use std::process;

use anyhow::{Context, Result};
use bookcrawl::{AcquireCli, Acquirer, HttpCatalog, HttpFetcher, Library, EXIT_INTERRUPTED};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = AcquireCli::parse();
    let controls = cli.build_controls();
    let library = Library::open(&cli.root)
        .with_context(|| format!("failed to open storage root {:?}", cli.root))?;
    let catalog = HttpCatalog::new(&cli.catalog_url, controls.fetch_timeout())
        .context("failed to build catalog client")?;
    let fetcher =
        HttpFetcher::new(controls.fetch_timeout()).context("failed to build HTTP client")?;
    let manifest = library.load_manifest();

    println!(
        "fetching up to {} documents from {} into {} ({} already recorded)",
        controls.max_documents(),
        cli.catalog_url,
        library.root().display(),
        manifest.total()
    );
    for template in controls.sources() {
        println!("  source: {template}");
    }

    let acquirer = Acquirer::new(catalog, fetcher, library, controls);
    let outcome = tokio::select! {
        result = acquirer.run(manifest) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupted; the manifest holds every document committed so far");
            process::exit(EXIT_INTERRUPTED);
        }
    };
    let (_, report) = outcome.context("failed to persist manifest")?;
    report.report(acquirer.library());
    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bookcrawl=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
