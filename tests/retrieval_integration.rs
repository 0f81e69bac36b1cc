//! Retrieval strategy integration tests

mod common;

use common::{open_core, write_source, RuleGenerator};
use quarry::retrieval::{SearchMode, SearchOptions};
use tempfile::TempDir;

fn options(mode: SearchMode) -> SearchOptions {
    SearchOptions {
        mode,
        ..Default::default()
    }
}

#[tokio::test]
async fn embedding_mode_finds_semantically_identical_chunk() {
    let temp = TempDir::new().unwrap();
    let core = open_core(&temp, RuleGenerator::empty());

    let a = write_source(&temp, "a.txt", "stellar parallax measurement techniques");
    let b = write_source(&temp, "b.txt", "sourdough bread fermentation timing");
    core.ingest(&a).await.unwrap();
    core.ingest(&b).await.unwrap();

    let results = core
        .search(
            "stellar parallax measurement techniques",
            1,
            &options(SearchMode::Embedding),
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].content.contains("parallax"));
    assert!(results[0].source.ends_with("a.txt"));
}

#[tokio::test]
async fn fulltext_mode_scores_by_occurrences() {
    let temp = TempDir::new().unwrap();
    let core = open_core(&temp, RuleGenerator::empty());

    let a = write_source(&temp, "a.txt", "tides and more tides and yet more tides");
    let b = write_source(&temp, "b.txt", "tides mentioned once");
    core.ingest(&a).await.unwrap();
    core.ingest(&b).await.unwrap();

    let results = core
        .search("tides", 2, &options(SearchMode::Fulltext))
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results[0].source.ends_with("a.txt"));
    assert!(results[0].score > results[1].score);
}

#[tokio::test]
async fn hybrid_returns_best_of_both_strategies() {
    let temp = TempDir::new().unwrap();
    let core = open_core(&temp, RuleGenerator::empty());

    // C1 is the embedding favorite: its content is exactly the query.
    // C2 is the keyword favorite: it repeats one query token four times.
    let c1 = write_source(&temp, "c1.txt", "alpha beta");
    let c2 = write_source(&temp, "c2.txt", "beta beta beta beta");
    core.ingest(&c1).await.unwrap();
    core.ingest(&c2).await.unwrap();

    let results = core
        .search("alpha beta", 2, &options(SearchMode::Hybrid))
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results[0].source.ends_with("c1.txt"));
    assert!(results[1].source.ends_with("c2.txt"));

    let top_only = core
        .search("alpha beta", 1, &options(SearchMode::Hybrid))
        .await
        .unwrap();
    assert_eq!(top_only.len(), 1);
    assert!(top_only[0].source.ends_with("c1.txt"));
}

#[tokio::test]
async fn hybrid_deduplicates_chunks_found_by_both_legs() {
    let temp = TempDir::new().unwrap();
    let core = open_core(&temp, RuleGenerator::empty());

    let path = write_source(&temp, "only.txt", "unique phrase about migrating swallows");
    core.ingest(&path).await.unwrap();

    let results = core
        .search(
            "unique phrase about migrating swallows",
            4,
            &options(SearchMode::Hybrid),
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn search_on_empty_store_returns_nothing() {
    let temp = TempDir::new().unwrap();
    let core = open_core(&temp, RuleGenerator::empty());

    for mode in [SearchMode::Embedding, SearchMode::Fulltext, SearchMode::Hybrid] {
        let results = core.search("anything", 5, &options(mode)).await.unwrap();
        assert!(results.is_empty());
    }
}

#[tokio::test]
async fn graph_flag_without_graph_data_is_harmless() {
    let temp = TempDir::new().unwrap();
    let core = open_core(&temp, RuleGenerator::empty());

    let path = write_source(&temp, "doc.txt", "plain content with no entities built");
    core.ingest(&path).await.unwrap();

    let opts = SearchOptions {
        mode: SearchMode::Hybrid,
        use_graph: true,
        ..Default::default()
    };
    let results = core.search("plain content", 3, &opts).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(!results[0].from_graph);
}

#[tokio::test]
async fn keyword_results_monotonic_under_added_tokens() {
    let temp = TempDir::new().unwrap();
    let core = open_core(&temp, RuleGenerator::empty());

    let a = write_source(&temp, "a.txt", "volcanoes erupt with lava");
    let b = write_source(&temp, "b.txt", "glaciers carve with ice");
    core.ingest(&a).await.unwrap();
    core.ingest(&b).await.unwrap();

    let narrow = core
        .search("volcanoes", 10, &options(SearchMode::Fulltext))
        .await
        .unwrap();
    let wide = core
        .search("volcanoes glaciers", 10, &options(SearchMode::Fulltext))
        .await
        .unwrap();

    for hit in &narrow {
        assert!(wide.iter().any(|w| w.chunk_id == hit.chunk_id));
    }
    assert!(wide.len() >= narrow.len());
}
