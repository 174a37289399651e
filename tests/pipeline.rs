use std::time::Duration;

use bookcrawl::{
    AcquireControls, Acquirer, HttpCatalog, HttpFetcher, Library, Manifest, NormalizeControls,
    Normalizer, SourceTemplate,
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gutenberg_text(title: &str, paragraphs: usize) -> String {
    let mut text = format!(
        "\u{feff}The Project Gutenberg eBook of {title}\r\n\r\nThis ebook is for the use of anyone anywhere.\r\n\r\n*** START OF THE PROJECT GUTENBERG EBOOK {upper} ***\r\n\r\nProduced by volunteers.\r\n\r\n\r\nCONTENTS\r\n\r\n{upper}\r\n\r\n[Illustration]\r\n\r\n",
        upper = title.to_uppercase()
    );
    for idx in 0..paragraphs {
        text.push_str(&format!(
            "Paragraph {idx} of the story, long enough to pad the document.\r\n\r\n\r\n"
        ));
    }
    text.push_str(&format!(
        "*** END OF THE PROJECT GUTENBERG EBOOK {} ***\r\n\r\nSection 1. General Terms of Use.\r\n",
        title.to_uppercase()
    ));
    text
}

async fn mount_catalog(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/books"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"count": 3, "next": null, "results": [
                {"id": 84, "title": "Frankenstein; Or, The Modern Prometheus", "download_count": 100},
                {"id": 1342, "title": "Pride and Prejudice", "download_count": 90},
                {"id": 99999, "title": "Missing Everywhere", "download_count": 1}
            ]}"#,
        ))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/books"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"results": []}"#))
        .mount(server)
        .await;
}

async fn mount_mirrors(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/cache/epub/84/pg84.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(gutenberg_text("Frankenstein; Or, The Modern Prometheus", 120)),
        )
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cache/epub/1342/pg1342.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>mirror busy</html>"))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/1342/1342-0.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(gutenberg_text("Pride and Prejudice", 120)),
        )
        .expect(1)
        .mount(server)
        .await;
}

fn controls(server: &MockServer) -> AcquireControls {
    AcquireControls::default()
        .with_politeness_delay(Duration::ZERO)
        .with_sources(vec![
            SourceTemplate::new(format!("{}/cache/epub/{{id}}/pg{{id}}.txt", server.uri())),
            SourceTemplate::new(format!("{}/files/{{id}}/{{id}}-0.txt", server.uri())),
        ])
}

#[tokio::test]
async fn acquire_then_strip_converges() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    mount_mirrors(&server).await;

    let dir = tempdir().expect("tempdir");
    let library = Library::open(dir.path()).expect("library");
    let catalog = HttpCatalog::new(&format!("{}/books", server.uri()), Duration::from_secs(5))
        .expect("catalog");
    let fetcher = HttpFetcher::new(Duration::from_secs(5)).expect("fetcher");
    let acquirer = Acquirer::new(catalog, fetcher, library.clone(), controls(&server));

    let (manifest, report) = acquirer.run(library.load_manifest()).await.expect("acquire");
    assert_eq!(report.acquired, 2);
    assert_eq!(report.via_fallback, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].entry.id, 99999);
    assert_eq!(manifest.total(), 2);

    // Rerun: every id is already present, so no mirror is contacted again
    // (the `.expect(1)` mocks verify this when the server drops).
    let (manifest, report) = acquirer.run(library.load_manifest()).await.expect("reacquire");
    assert_eq!(report.skipped, 2);
    assert_eq!(report.acquired, 0);

    let raw = library
        .read("pride-and-prejudice.txt")
        .expect("raw document");
    assert!(raw.starts_with("\u{feff}The Project Gutenberg eBook".as_bytes()));

    let normalizer = Normalizer::new(NormalizeControls::default());
    let (manifest, report) = normalizer.run(&library, manifest).expect("strip");
    assert_eq!(report.changed(), 2);
    assert!(report.failures.is_empty());

    let cleaned = String::from_utf8(library.read("pride-and-prejudice.txt").expect("cleaned"))
        .expect("utf8");
    assert!(cleaned.starts_with("PRIDE AND PREJUDICE\r\n\r\nParagraph 0 of the story"));
    assert!(cleaned.ends_with("Paragraph 119 of the story, long enough to pad the document."));
    assert!(!cleaned.contains("[Illustration]"));
    assert!(!cleaned.contains("\r\n\r\n\r\n"));
    assert!(!cleaned.contains("Terms of Use"));

    let record = manifest.get(1342).expect("record");
    assert_eq!(
        record.size_kb,
        bookcrawl::manifest::size_kb(cleaned.len())
    );
    assert_eq!(library.load_manifest(), manifest);

    let (again, report) = normalizer.run(&library, manifest.clone()).expect("restrip");
    assert_eq!(report.changed(), 0);
    assert_eq!(again, manifest);
    let second_pass = library.read("pride-and-prejudice.txt").expect("cleaned twice");
    assert_eq!(second_pass, cleaned.into_bytes());
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let dir = tempdir().expect("tempdir");
    let library = Library::open(dir.path()).expect("library");
    let raw = gutenberg_text("Moby Dick; Or, The Whale", 10);
    library.write("moby-dick-or-the-whale.txt", raw.as_bytes()).expect("seed");
    let mut manifest = Manifest::new();
    manifest.insert(bookcrawl::ManifestRecord::new(
        2701,
        "Moby Dick; Or, The Whale".into(),
        "moby-dick-or-the-whale.txt".into(),
        raw.len(),
    ));
    manifest.insert(bookcrawl::ManifestRecord::new(
        1,
        "Gone".into(),
        "gone.txt".into(),
        10,
    ));
    library.save_manifest(&manifest).expect("save");

    let normalizer = Normalizer::new(NormalizeControls {
        dry_run: true,
        title_narrowing: true,
    });
    let (after, report) = normalizer
        .run(&library, library.load_manifest())
        .expect("dry run");

    assert_eq!(report.processed, 2);
    assert_eq!(report.changed(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].id, 1);
    assert!(report.outcomes[0].reduction_pct() > 0.0);
    assert_eq!(after, manifest);
    assert_eq!(
        library.read("moby-dick-or-the-whale.txt").expect("untouched"),
        raw.into_bytes()
    );
    assert_eq!(library.load_manifest(), manifest);
}

#[test]
fn stripping_never_touches_files_outside_the_root() {
    let dir = tempdir().expect("tempdir");
    let library = Library::open(dir.path().join("books")).expect("library");
    let victim = dir.path().join("victim.txt");
    let original = b"keep me\n\n\n\n[Illustration]\nsecret".to_vec();
    std::fs::write(&victim, &original).expect("victim");

    let mut manifest = Manifest::new();
    manifest.insert(bookcrawl::ManifestRecord::new(
        7,
        "Escape".into(),
        "../victim.txt".into(),
        original.len(),
    ));
    std::fs::write(
        library.manifest_path(),
        br#"{"books": {"7": {"title": "Escape", "filename": "../victim.txt", "size_kb": 0.0}}, "total": 1}"#,
    )
    .expect("manifest");

    let normalizer = Normalizer::new(NormalizeControls::default());
    let (_, report) = normalizer.run(&library, manifest).expect("in-memory record");
    assert_eq!(report.outcomes.len(), 0);
    assert_eq!(report.failures.len(), 1);

    let loaded = library.load_manifest();
    assert!(loaded.is_empty());
    let (_, report) = normalizer.run(&library, loaded).expect("loaded record");
    assert_eq!(report.processed, 0);

    assert_eq!(std::fs::read(&victim).expect("victim"), original);
}
