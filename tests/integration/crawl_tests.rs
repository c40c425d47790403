//! Integration tests for the crawler
//!
//! These tests drive the whole orchestrator: wiremock servers behind the
//! bundled HTTP engine for the happy paths, and a scripted in-memory engine
//! for worker crashes and session failures.

use async_trait::async_trait;
use listing_crawler::config::{load_config, Config};
use listing_crawler::orchestrator::{merge_partials, Batch, PartialWriter, UnitOutcome};
use listing_crawler::session::{HttpEngine, NavigationError, RenderEngine, RenderSession};
use listing_crawler::storage::{open_storage, RunStatus, Storage};
use listing_crawler::{Orchestrator, Record, RunOutcome};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Writes a config file into `dir` and loads it
fn create_test_config(dir: &Path, workers: usize, flush: usize, crawls: &str) -> Config {
    let toml = format!(
        r#"
[orchestrator]
worker-count = {workers}
flush-interval = {flush}
request-delay-range = [0.0, 0.0]
session-open-attempts = 2
session-retry-delay = 0

[session]
page-timeout = 5
settle-delay-range = [0.0, 0.0]

[output]
database-path = '{db}'
partials-dir = '{partials}'

{crawls}
"#,
        db = dir.join("crawl.db").display(),
        partials = dir.join("partials").display(),
    );
    let config_path = dir.join("crawler.toml");
    std::fs::write(&config_path, toml).expect("Failed to write config");
    load_config(&config_path).expect("Config should be valid")
}

fn write_targets(dir: &Path, targets: &[String]) -> PathBuf {
    let path = dir.join("targets.txt");
    std::fs::write(&path, targets.join("\n")).expect("Failed to write targets");
    path
}

fn listing_page(ids: &[u32], pages: u32) -> String {
    let mut html = String::from("<html><body><table>");
    for id in ids {
        html.push_str(&format!(
            r#"<tr class="listing-list-item" id="{id}"><td class="listing-modelname"><a href="/ilan/brandx-{id}">BrandX {id}</a></td></tr>"#
        ));
    }
    html.push_str("</table><ul class=\"pagination\">");
    for page in 1..=pages {
        html.push_str(&format!(r#"<li><a href="?page={page}">{page}</a></li>"#));
    }
    html.push_str(&format!(
        r#"<li><a title="Son Sayfa" href="/otomobil/brandx?page={pages}">Son</a></li></ul></body></html>"#
    ));
    html
}

fn detail_page(title: &str, price: &str) -> String {
    format!(
        r#"<html><body><div class="product-title">{title}</div><span class="product-price-new">{price}</span></body></html>"#
    )
}

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body)
        .insert_header("content-type", "text/html")
}

#[tokio::test]
async fn test_end_to_end_brandx_two_pages() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/otomobil/brandx"))
        .and(query_param("page", "2"))
        .respond_with(html(listing_page(&[4, 5, 6], 2)))
        .with_priority(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/otomobil/brandx"))
        .respond_with(html(listing_page(&[1, 2, 3], 2)))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(
        dir.path(),
        2,
        2,
        &format!(
            r#"
[[crawl]]
name = "links"
kind = "links"
seeds = ["{base_url}/otomobil/brandx"]
site-base = "{base_url}"
"#
        ),
    );

    let engine = Arc::new(HttpEngine::new(&config.session));
    let mut orchestrator = Orchestrator::new(config, "links", engine).unwrap();
    let summary = orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.frontier_size, 2);
    assert_eq!(summary.succeeded, 2);

    let storage = orchestrator.storage();
    let records = storage.get_records("links").unwrap();
    assert_eq!(records.len(), 6);

    let ids: HashSet<&str> = records.iter().filter_map(|r| r.get("listing_id")).collect();
    assert_eq!(ids.len(), 6, "merged store must not hold duplicates");
    assert!(records
        .iter()
        .all(|r| r.get("url").is_some_and(|u| u.starts_with(&base_url))));

    let checkpoint = storage.load_checkpoint("links").unwrap();
    assert_eq!(checkpoint.len(), 2);
    assert!(checkpoint.contains(&format!("{}/otomobil/brandx?page=1", base_url)));
    assert!(checkpoint.contains(&format!("{}/otomobil/brandx?page=2", base_url)));

    // Idempotent resume: nothing left to fetch
    let summary = orchestrator.run(CancellationToken::new()).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::NothingToDo);
    assert_eq!(summary.attempted, 0);
    assert_eq!(orchestrator.storage().count_records("links").unwrap(), 6);

    // Partial files are gone once merged
    let leftovers = std::fs::read_dir(dir.path().join("partials")).unwrap().count();
    assert_eq!(leftovers, 0);
}

fn category_page(hrefs: &[&str]) -> String {
    let mut html = String::from(r#"<html><body><div class="category-list-wrapper">"#);
    for href in hrefs {
        html.push_str(&format!(r#"<a class="list-item" href="{href}">{href}</a>"#));
    }
    html.push_str("</div></body></html>");
    html
}

#[tokio::test]
async fn test_brand_discovery_seeds_the_links_crawl() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/ikinci-el/otomobil"))
        .respond_with(html(category_page(&[
            "/otomobil/brandx",
            "/otomobil/brandy",
            "https://ads.example.com/promo",
        ])))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ikinci-el/arazi-suv-pick-up"))
        .respond_with(html(category_page(&["/otomobil/brandx"])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/otomobil/brandx"))
        .and(query_param("page", "2"))
        .respond_with(html(listing_page(&[4, 5, 6], 2)))
        .with_priority(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/otomobil/brandx"))
        .respond_with(html(listing_page(&[1, 2, 3], 2)))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/otomobil/brandy"))
        .respond_with(html(listing_page(&[7, 8], 1)))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(
        dir.path(),
        2,
        2,
        &format!(
            r#"
[[crawl]]
name = "brands"
kind = "brands"
seeds = ["{base_url}/ikinci-el/otomobil", "{base_url}/ikinci-el/arazi-suv-pick-up"]
site-base = "{base_url}"

[[crawl]]
name = "links"
kind = "links"
source = "brands"
site-base = "{base_url}"
"#
        ),
    );

    let engine = Arc::new(HttpEngine::new(&config.session));

    let mut brands = Orchestrator::new(config.clone(), "brands", engine.clone()).unwrap();
    let summary = brands.run(CancellationToken::new()).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.succeeded, 2);

    let mut discovered = brands.storage().field_values("brands", "url").unwrap();
    discovered.sort();
    discovered.dedup();
    assert_eq!(
        discovered,
        vec![
            format!("{}/otomobil/brandx", base_url),
            format!("{}/otomobil/brandy", base_url),
        ]
    );

    let mut links = Orchestrator::new(config, "links", engine).unwrap();
    let summary = links.run(CancellationToken::new()).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Completed);
    // brandx has two pages, brandy one; brandx is probed once despite two categories
    assert_eq!(summary.frontier_size, 3);
    assert_eq!(links.storage().count_records("links").unwrap(), 8);
}

#[tokio::test]
async fn test_failed_unit_is_retried_by_next_run() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    for id in 1..=4 {
        Mock::given(method("GET"))
            .and(path(format!("/ilan/{}", id)))
            .respond_with(html(detail_page(&format!("Car {}", id), "1.000 TL")))
            .mount(&mock_server)
            .await;
    }
    // The first request for listing 3 fails, later ones succeed
    Mock::given(method("GET"))
        .and(path("/ilan/3"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let targets: Vec<String> = (1..=4).map(|i| format!("{}/ilan/{}", base_url, i)).collect();
    let targets_file = write_targets(dir.path(), &targets);
    let config = create_test_config(
        dir.path(),
        2,
        1,
        &format!(
            r#"
[[crawl]]
name = "details"
kind = "details"
targets-file = '{}'
"#,
            targets_file.display()
        ),
    );

    let engine = Arc::new(HttpEngine::new(&config.session));
    let mut orchestrator = Orchestrator::new(config, "details", engine).unwrap();

    let first = orchestrator.run(CancellationToken::new()).await.unwrap();
    assert_eq!(first.outcome, RunOutcome::PartialSuccess);
    assert_eq!(first.outcome.exit_code(), 0);
    assert_eq!(first.succeeded, 3);
    assert_eq!(first.failed, 1);
    assert_eq!(
        orchestrator.storage().failed_units("details").unwrap(),
        vec![targets[2].clone()]
    );

    let second = orchestrator.run(CancellationToken::new()).await.unwrap();
    assert_eq!(second.remaining, 1);
    assert_eq!(second.attempted, 1);
    assert_eq!(second.outcome, RunOutcome::Completed);

    let storage = orchestrator.storage();
    assert_eq!(storage.count_records("details").unwrap(), 4);
    assert_eq!(storage.count_checkpoint("details").unwrap(), 4);
    assert_eq!(storage.count_failures("details").unwrap(), 0);

    let run = storage.get_run(second.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
}

/// In-memory engine serving detail pages; panics on one target, fails every launch when told to
struct ScriptedEngine {
    pages: HashMap<String, String>,
    panic_on: Option<String>,
    refuse_launch: bool,
}

struct ScriptedSession {
    pages: HashMap<String, String>,
    panic_on: Option<String>,
    loaded: Option<String>,
}

#[async_trait]
impl RenderEngine for ScriptedEngine {
    async fn launch(&self, _worker_id: usize) -> Result<Box<dyn RenderSession>, NavigationError> {
        if self.refuse_launch {
            return Err(NavigationError::Launch("browser refused to start".to_string()));
        }
        Ok(Box::new(ScriptedSession {
            pages: self.pages.clone(),
            panic_on: self.panic_on.clone(),
            loaded: None,
        }))
    }
}

#[async_trait]
impl RenderSession for ScriptedSession {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), NavigationError> {
        if self.panic_on.as_deref() == Some(url) {
            panic!("browser driver crashed on {}", url);
        }
        self.loaded = self.pages.get(url).cloned();
        self.loaded
            .as_ref()
            .map(|_| ())
            .ok_or_else(|| NavigationError::Failed("HTTP 404".to_string()))
    }

    async fn page_source(&mut self) -> Result<String, NavigationError> {
        self.loaded
            .clone()
            .ok_or_else(|| NavigationError::InvalidSession("nothing loaded".to_string()))
    }

    async fn shutdown(&mut self) {}
}

fn scripted_details(dir: &Path, count: usize, flush: usize) -> (Config, Vec<String>) {
    let targets: Vec<String> = (1..=count)
        .map(|i| format!("https://www.example.com/ilan/{}", i))
        .collect();
    let targets_file = write_targets(dir, &targets);
    let config = create_test_config(
        dir,
        1,
        flush,
        &format!(
            "[[crawl]]\nname = \"details\"\nkind = \"details\"\ntargets-file = '{}'\n",
            targets_file.display()
        ),
    );
    (config, targets)
}

fn engine_for(targets: &[String], panic_on: Option<&str>, refuse_launch: bool) -> ScriptedEngine {
    ScriptedEngine {
        pages: targets
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), detail_page(&format!("Car {}", i + 1), "500 TL")))
            .collect(),
        panic_on: panic_on.map(str::to_string),
        refuse_launch,
    }
}

#[tokio::test]
async fn test_crashed_worker_loses_at_most_one_flush() {
    let dir = tempfile::tempdir().unwrap();
    let (config, targets) = scripted_details(dir.path(), 6, 2);

    // Units 1-2 are flushed, unit 3 sits in the batch when unit 4 kills the worker
    let engine = Arc::new(engine_for(&targets, Some(&targets[3]), false));
    let mut orchestrator = Orchestrator::new(config.clone(), "details", engine).unwrap();
    let summary = orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Fatal);
    assert_eq!(summary.crashed_workers, vec![0]);

    let storage = orchestrator.storage();
    let merged: Vec<String> = storage
        .get_records("details")
        .unwrap()
        .into_iter()
        .map(|r| r.unit_id)
        .collect();
    assert_eq!(merged, targets[..2].to_vec());
    assert_eq!(storage.count_checkpoint("details").unwrap(), 2);

    // A healthy rerun picks up exactly the units after the last flush
    let engine = Arc::new(engine_for(&targets, None, false));
    let mut orchestrator = Orchestrator::new(config, "details", engine).unwrap();
    let summary = orchestrator.run(CancellationToken::new()).await.unwrap();
    assert_eq!(summary.remaining, 4);
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(orchestrator.storage().count_records("details").unwrap(), 6);
}

#[tokio::test]
async fn test_no_session_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let (config, targets) = scripted_details(dir.path(), 3, 2);

    let engine = Arc::new(engine_for(&targets, None, true));
    let mut orchestrator = Orchestrator::new(config, "details", engine).unwrap();
    let summary = orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Fatal);
    assert_eq!(summary.outcome.exit_code(), 2);
    assert_eq!(summary.abandoned, 3);
    assert_eq!(summary.attempted, 0);

    let run = orchestrator.storage().get_run(summary.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Fatal);
    assert_eq!(run.counts.abandoned, 3);
}

#[tokio::test]
async fn test_stop_before_start_preserves_store() {
    let dir = tempfile::tempdir().unwrap();
    let (config, targets) = scripted_details(dir.path(), 3, 1);

    let engine = Arc::new(engine_for(&targets, None, false));
    let mut orchestrator = Orchestrator::new(config, "details", engine).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = orchestrator.run(cancel).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::Interrupted);
    assert_eq!(summary.unvisited, 3);
    assert_eq!(orchestrator.storage().count_checkpoint("details").unwrap(), 0);
}

#[tokio::test]
async fn test_unmerged_partials_are_recovered_before_planning() {
    let dir = tempfile::tempdir().unwrap();
    let (config, targets) = scripted_details(dir.path(), 4, 2);

    // A previous run flushed two units, then died before merging
    let mut writer =
        PartialWriter::create(&dir.path().join("partials"), "details", 41, 0).unwrap();
    let mut batch = Batch::new();
    for target in &targets[..2] {
        batch.push(UnitOutcome::Completed {
            unit_id: target.clone(),
            records: vec![Record::new(target.as_str(), Default::default())],
        });
    }
    writer.flush(&mut batch).unwrap();

    let engine = Arc::new(engine_for(&targets, None, false));
    let mut orchestrator = Orchestrator::new(config, "details", engine).unwrap();
    let summary = orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.remaining, 2);
    assert_eq!(summary.attempted, 2);
    assert_eq!(orchestrator.storage().count_records("details").unwrap(), 4);
    assert!(!writer.path().exists());
}

#[test]
fn test_merge_is_independent_of_file_order() {
    let dir = tempfile::tempdir().unwrap();
    let partials = dir.path().join("partials");

    let outcome = |unit: &str, title: &str| {
        let mut fields = listing_crawler::extract::Fields::new();
        fields.insert("title".to_string(), Some(title.to_string()));
        UnitOutcome::Completed {
            unit_id: unit.to_string(),
            records: vec![Record::new(unit, fields)],
        }
    };
    let flush = |writer: &mut PartialWriter, outcomes: Vec<UnitOutcome>| {
        let mut batch = Batch::new();
        for o in outcomes {
            batch.push(o);
        }
        writer.flush(&mut batch).unwrap();
    };

    let mut w0 = PartialWriter::create(&partials, "links", 1, 0).unwrap();
    let mut w1 = PartialWriter::create(&partials, "links", 1, 1).unwrap();
    flush(&mut w0, vec![outcome("a", "a-old"), outcome("b", "b")]);
    std::thread::sleep(Duration::from_millis(5));
    flush(&mut w1, vec![outcome("a", "a-new"), outcome("c", "c")]);

    let forward = vec![w0.path().to_path_buf(), w1.path().to_path_buf()];
    let backward: Vec<PathBuf> = forward.iter().rev().cloned().collect();

    // Each merge deletes the files it read, so work on copies
    let mut results = Vec::new();
    for (i, order) in [forward, backward].iter().enumerate() {
        let copies: Vec<PathBuf> = order
            .iter()
            .map(|p| {
                let copy = dir.path().join(format!("copy{}-{}", i, p.file_name().unwrap().to_string_lossy()));
                std::fs::copy(p, &copy).unwrap();
                copy
            })
            .collect();

        let mut storage = open_storage(&dir.path().join(format!("store{}.db", i))).unwrap();
        merge_partials(&mut storage, "links", None, &copies).unwrap();
        let mut records = storage.get_records("links").unwrap();
        records.sort_by(|x, y| x.unit_id.cmp(&y.unit_id));
        results.push(records);
    }

    assert_eq!(results[0], results[1]);
    let a = results[0].iter().find(|r| r.unit_id == "a").unwrap();
    assert_eq!(a.get("title"), Some("a-new"));
}
