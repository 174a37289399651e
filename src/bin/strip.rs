use anyhow::{Context, Result};
use bookcrawl::{Library, Normalizer, StripCli};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();
    let cli = StripCli::parse();
    let controls = cli.build_controls();
    let library = Library::open(&cli.root)
        .with_context(|| format!("failed to open storage root {:?}", cli.root))?;
    let manifest = library.load_manifest();
    if manifest.is_empty() {
        println!(
            "no documents recorded in {}; nothing to strip",
            library.manifest_path().display()
        );
        return Ok(());
    }
    if controls.dry_run {
        println!("dry run: no files or manifest will be written");
    }
    println!("stripping boilerplate from {} documents...", manifest.total());

    let (manifest, report) = Normalizer::new(controls)
        .run(&library, manifest)
        .context("failed to persist manifest")?;
    report.report();

    let audit = library
        .audit(&manifest)
        .context("failed to audit storage root")?;
    for id in &audit.missing {
        warn!(id, "manifest record has no file on disk");
    }
    for name in &audit.orphaned {
        warn!(filename = %name, "file has no manifest record; not trusted as complete");
    }
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
