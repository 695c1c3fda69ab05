use engine::store::IndexStore;
use engine::{EngineError, SearchEngine, SiteStatus, TextAnalyzer};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::tempdir;

struct Fixture {
    _dir: tempfile::TempDir,
    store: Arc<IndexStore>,
    engine: SearchEngine,
}

fn fixture() -> Fixture {
    let dir = tempdir().unwrap();
    let store = Arc::new(IndexStore::open(dir.path()).unwrap());
    let engine = SearchEngine::new(Arc::clone(&store), Arc::new(TextAnalyzer::new()));
    Fixture {
        _dir: dir,
        store,
        engine,
    }
}

fn counts(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
    pairs
        .iter()
        .map(|(lemma, count)| (lemma.to_string(), *count))
        .collect()
}

fn seed_page(store: &IndexStore, site_id: u64, path: &str, body: &str, pairs: &[(&str, u32)]) {
    let html = format!("<html><head><title>{path}</title></head><body>{body}</body></html>");
    let page = store.upsert_page(site_id, path, 200, &html).unwrap();
    store.index_page(site_id, page.id, &counts(pairs)).unwrap();
}

fn indexed_site(store: &IndexStore, url: &str, name: &str) -> engine::Site {
    let site = store.create_site(url, name).unwrap();
    store
        .set_site_status(site.id, SiteStatus::Indexed, None)
        .unwrap();
    site
}

#[test]
fn relevance_is_normalized_by_the_global_maximum() {
    let f = fixture();
    let site = indexed_site(&f.store, "http://example.com", "Example");
    seed_page(&f.store, site.id, "/a", "ferret ferret", &[("ferret", 10)]);
    seed_page(&f.store, site.id, "/b", "one ferret", &[("ferret", 5)]);
    // Filler pages keep the lemma below the common-word cutoff.
    for path in ["/c", "/d", "/e"] {
        seed_page(&f.store, site.id, path, "nothing here", &[("nothing", 1)]);
    }

    let outcome = f.engine.search("ferret", None, 0, 10).unwrap();
    assert_eq!(outcome.count, 2);
    assert_eq!(outcome.data[0].uri, "/a");
    assert_eq!(outcome.data[0].relevance, 1.0);
    assert_eq!(outcome.data[1].uri, "/b");
    assert_eq!(outcome.data[1].relevance, 0.5);
}

#[test]
fn overly_common_lemmas_never_participate() {
    let f = fixture();
    let site = indexed_site(&f.store, "http://example.com", "Example");
    // "ferret" sits on 9 of 10 pages: above the 0.8 threshold.
    for n in 0..9 {
        seed_page(
            &f.store,
            site.id,
            &format!("/common-{n}"),
            "ferret everywhere",
            &[("ferret", 1)],
        );
    }
    seed_page(&f.store, site.id, "/other", "plain page", &[("plain", 1)]);

    let outcome = f.engine.search("ferret", None, 0, 10).unwrap();
    assert_eq!(outcome.count, 0);
    assert!(outcome.data.is_empty());
}

#[test]
fn intersection_requires_every_query_lemma() {
    let f = fixture();
    let site = indexed_site(&f.store, "http://example.com", "Example");
    seed_page(
        &f.store,
        site.id,
        "/both",
        "ferret near the river",
        &[("ferret", 2), ("river", 1)],
    );
    seed_page(&f.store, site.id, "/one", "a lone ferret", &[("ferret", 1)]);
    for path in ["/f1", "/f2", "/f3", "/f4"] {
        seed_page(&f.store, site.id, path, "filler", &[("filler", 1)]);
    }

    let outcome = f.engine.search("ferret river", None, 0, 10).unwrap();
    assert_eq!(outcome.count, 1);
    assert_eq!(outcome.data[0].uri, "/both");
}

#[test]
fn multi_site_search_unions_results_before_pagination() {
    let f = fixture();
    for (url, body_lemma) in [
        ("http://one.example", "ferret"),
        ("http://two.example", "ferret"),
        ("http://three.example", "stoat"),
    ] {
        let site = indexed_site(&f.store, url, url);
        seed_page(
            &f.store,
            site.id,
            "/",
            &format!("{body_lemma} content"),
            &[(body_lemma, 3), ("content", 1)],
        );
        for path in ["/x", "/y", "/z", "/w"] {
            seed_page(&f.store, site.id, path, "filler", &[("filler", 1)]);
        }
    }

    let outcome = f.engine.search("ferret", None, 0, 10).unwrap();
    assert_eq!(outcome.count, 2);
    let sites: Vec<&str> = outcome.data.iter().map(|hit| hit.site.as_str()).collect();
    assert!(sites.contains(&"http://one.example"));
    assert!(sites.contains(&"http://two.example"));
    assert!(!sites.contains(&"http://three.example"));
    assert!(outcome.data[0].relevance >= outcome.data[1].relevance);

    let paged = f.engine.search("ferret", None, 1, 10).unwrap();
    assert_eq!(paged.count, 2);
    assert_eq!(paged.data.len(), 1);
}

#[test]
fn site_scope_restricts_results() {
    let f = fixture();
    for url in ["http://one.example", "http://two.example"] {
        let site = indexed_site(&f.store, url, url);
        seed_page(&f.store, site.id, "/", "ferret page", &[("ferret", 1)]);
        for path in ["/x", "/y", "/z", "/w"] {
            seed_page(&f.store, site.id, path, "filler", &[("filler", 1)]);
        }
    }

    let outcome = f
        .engine
        .search("ferret", Some("http://one.example"), 0, 10)
        .unwrap();
    assert_eq!(outcome.count, 1);
    assert_eq!(outcome.data[0].site, "http://one.example");
}

#[test]
fn oversized_limits_do_not_overflow_pagination() {
    let f = fixture();
    let site = indexed_site(&f.store, "http://example.com", "Example");
    seed_page(&f.store, site.id, "/a", "ferret one", &[("ferret", 2)]);
    seed_page(&f.store, site.id, "/b", "ferret two", &[("ferret", 1)]);
    for path in ["/c", "/d", "/e"] {
        seed_page(&f.store, site.id, path, "filler", &[("filler", 1)]);
    }

    let outcome = f.engine.search("ferret", None, 1, usize::MAX).unwrap();
    assert_eq!(outcome.count, 2);
    assert_eq!(outcome.data.len(), 1);
    assert_eq!(outcome.data[0].uri, "/b");

    let past_end = f.engine.search("ferret", None, usize::MAX, 10).unwrap();
    assert_eq!(past_end.count, 2);
    assert!(past_end.data.is_empty());
}

#[test]
fn snippets_highlight_query_words() {
    let f = fixture();
    let site = indexed_site(&f.store, "http://example.com", "Example");
    seed_page(
        &f.store,
        site.id,
        "/",
        "The ferret slept by the river.",
        &[("ferret", 1), ("river", 1), ("slept", 1)],
    );
    for path in ["/x", "/y", "/z", "/w"] {
        seed_page(&f.store, site.id, path, "filler", &[("filler", 1)]);
    }

    let outcome = f.engine.search("ferret", None, 0, 10).unwrap();
    assert_eq!(outcome.count, 1);
    assert_eq!(outcome.data[0].title, "/");
    assert!(outcome.data[0].snippet.contains("<b>ferret</b>"));
}

#[test]
fn validation_and_state_errors() {
    let f = fixture();
    assert!(matches!(
        f.engine.search("  ", None, 0, 10),
        Err(EngineError::EmptyQuery)
    ));
    assert!(matches!(
        f.engine.search("ferret", None, 0, 10),
        Err(EngineError::NoIndexedSites)
    ));

    let site = f.store.create_site("http://example.com", "Example").unwrap();
    f.store
        .set_site_status(site.id, SiteStatus::Indexing, None)
        .unwrap();
    assert!(matches!(
        f.engine.search("ferret", Some("http://example.com"), 0, 10),
        Err(EngineError::SiteNotIndexed)
    ));
}
