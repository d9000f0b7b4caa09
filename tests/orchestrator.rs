use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use verse_align::config::{OrchestratorConfig, ProviderConfig};
use verse_align::error::{AnalysisErrorKind, ProviderError, StoreError};
use verse_align::parsing::{tokenize, RawEdge, RawProviderResult};
use verse_align::pipeline::{
    AlignmentProvider, AnalysisCacheStore, AnalysisSource, CacheStats, InMemoryCacheStore, LanguageAnalysis,
    OpenAiGateway, Orchestrator, SqliteCacheStore,
};
use verse_align::types::alignment::{AlignmentMethod, AnalysisCacheEntry, VerseReference};
use verse_align::types::language::language_name;

const GENESIS: &str = "In principio creavit Deus caelum et terram.";

/// Fake provider driven by a script. Successful replies translate each source
/// word to its upper-cased self, one target word per source word, so target
/// indices always line up with the translation.
#[derive(Default)]
struct ScriptedProvider {
    calls: Mutex<HashMap<(String, AlignmentMethod), usize>>,
    // Errors returned, in order, before any success for that key
    failures: Mutex<HashMap<(String, AlignmentMethod), VecDeque<ProviderError>>>,
    // Languages whose calls never finish in practice
    stalled: Vec<String>,
    // Languages where only even source indices get an edge
    sparse: Vec<String>,
    call_latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    fn fail_with(self, language: &str, mode: AlignmentMethod, errors: Vec<ProviderError>) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert((language.to_string(), mode), errors.into_iter().collect());
        self
    }

    fn calls_for(&self, language: &str, mode: AlignmentMethod) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&(language.to_string(), mode))
            .copied()
            .unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl AlignmentProvider for ScriptedProvider {
    async fn request_alignment(
        &self,
        verse_text: &str,
        _reference: &VerseReference,
        target_language: &str,
        mode: AlignmentMethod,
    ) -> Result<RawProviderResult, ProviderError> {
        let key = (target_language.to_string(), mode);
        *self.calls.lock().unwrap().entry(key.clone()).or_insert(0) += 1;

        if let Some(err) = self.failures.lock().unwrap().get_mut(&key).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if language_name(target_language).is_none() {
            return Err(ProviderError::malformed(format!("no answer for '{}'", target_language)));
        }
        if self.stalled.iter().any(|l| l == target_language) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if let Some(latency) = self.call_latency {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        let sparse = self.sparse.iter().any(|l| l == target_language);
        let tokens = tokenize(verse_text);
        let translation = tokens.iter().map(|t| t.surface.to_uppercase()).collect::<Vec<_>>().join(" ");
        let alignments = tokens
            .iter()
            .filter(|t| !sparse || t.index % 2 == 0)
            .map(|t| RawEdge {
                source_index: t.index as i64,
                source_word: Some(t.surface.clone()),
                target_words: vec![t.surface.to_uppercase()],
                target_indices: Some(vec![t.index as i64]),
                confidence: match mode {
                    AlignmentMethod::Literal => 0.9,
                    AlignmentMethod::Dynamic => 0.7,
                },
            })
            .collect();
        Ok(RawProviderResult { translation, alignments, average_confidence: Some(0.1) })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn settings() -> OrchestratorConfig {
    OrchestratorConfig { fan_out_limit: 4, retry_backoff_ms: 1500, deadline_secs: 120 }
}

fn languages(codes: &[&str]) -> BTreeSet<String> {
    codes.iter().map(|c| c.to_string()).collect()
}

fn genesis() -> VerseReference {
    VerseReference::new("Gn 1:1")
}

fn analysis<'a>(report: &'a verse_align::pipeline::AnalysisReport, code: &str) -> &'a LanguageAnalysis {
    report
        .get(code)
        .and_then(|o| o.analysis())
        .unwrap_or_else(|| panic!("{} was not analyzed: {:?}", code, report.get(code)))
}

fn error_kind(report: &verse_align::pipeline::AnalysisReport, code: &str) -> AnalysisErrorKind {
    report
        .get(code)
        .and_then(|o| o.error())
        .unwrap_or_else(|| panic!("{} did not fail", code))
        .kind()
}

#[tokio::test]
async fn both_sequences_cover_every_source_word() {
    let provider = Arc::new(ScriptedProvider { sparse: vec!["fr".to_string()], ..Default::default() });
    let orchestrator = Orchestrator::new(provider.clone(), Arc::new(InMemoryCacheStore::new()), settings());

    let report = orchestrator.analyze(GENESIS, &genesis(), &languages(&["es", "fr"])).await;
    let n = tokenize(GENESIS).len();
    assert_eq!(n, 7);

    for code in ["es", "fr"] {
        let result = analysis(&report, code);
        assert_eq!(result.alignment.literal.len(), n);
        assert_eq!(result.alignment.dynamic.len(), n);
        for (i, segment) in result.alignment.literal.iter().enumerate() {
            assert_eq!(segment.source_index, i);
        }
    }

    let fr = analysis(&report, "fr");
    assert_eq!(fr.alignment.literal[1].source_word, "principio");
    assert_eq!(fr.alignment.literal[1].target_phrase, "");
    assert_eq!(fr.alignment.literal[1].confidence, 0.0);
    assert_eq!(fr.alignment.literal[2].target_phrase, "CREAVIT");

    // provider-volunteered average (0.1) is ignored
    let es = analysis(&report, "es");
    assert!((es.alignment.literal_confidence - 0.9).abs() < 1e-9);
    assert!((es.alignment.dynamic_confidence - 0.7).abs() < 1e-9);
    assert_eq!(es.translations.literal_text, "IN PRINCIPIO CREAVIT DEUS CAELUM ET TERRAM");
}

#[tokio::test]
async fn second_run_is_served_from_cache() {
    let provider = Arc::new(ScriptedProvider::default());
    let orchestrator = Orchestrator::new(provider.clone(), Arc::new(InMemoryCacheStore::new()), settings());
    let langs = languages(&["es", "de"]);

    let first = orchestrator.analyze(GENESIS, &genesis(), &langs).await;
    assert_eq!(provider.total_calls(), 4);
    assert_eq!(analysis(&first, "es").source, AnalysisSource::Provider);

    let second = orchestrator.analyze(GENESIS, &genesis(), &langs).await;
    assert_eq!(provider.total_calls(), 4);
    for code in ["es", "de"] {
        let (a, b) = (analysis(&first, code), analysis(&second, code));
        assert_eq!(b.source, AnalysisSource::Cache);
        assert_eq!(a.alignment, b.alignment);
        assert_eq!(a.translations, b.translations);
    }
}

#[tokio::test]
async fn one_failing_language_does_not_affect_the_others() {
    let provider = Arc::new(ScriptedProvider::default());
    let store = Arc::new(InMemoryCacheStore::new());
    let orchestrator = Orchestrator::new(provider.clone(), store.clone(), settings());

    let report = orchestrator.analyze(GENESIS, &genesis(), &languages(&["es", "xx-invalid"])).await;
    assert_eq!(report.results.len(), 2);
    assert_eq!(analysis(&report, "es").alignment.literal.len(), 7);
    assert_eq!(error_kind(&report, "xx-invalid"), AnalysisErrorKind::MalformedResponse);

    // the failure is not cached, the success is
    assert!(store.get(&genesis(), "xx-invalid").await.unwrap().is_none());
    assert!(store.get(&genesis(), "es").await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn unrecognized_language_through_the_http_gateway_is_malformed_and_not_retried() {
    // No API key: recognized languages fail fast as UNAVAILABLE without touching the network.
    let gateway = OpenAiGateway::new(&ProviderConfig::default(), None).unwrap();
    let store = Arc::new(InMemoryCacheStore::new());
    let orchestrator = Orchestrator::new(Arc::new(gateway), store.clone(), settings());

    let started = tokio::time::Instant::now();
    let report = orchestrator.analyze(GENESIS, &genesis(), &languages(&["es", "xx-invalid"])).await;

    assert_eq!(error_kind(&report, "xx-invalid"), AnalysisErrorKind::MalformedResponse);
    assert_eq!(error_kind(&report, "es"), AnalysisErrorKind::Unavailable);
    // neither kind waits out the retry backoff
    assert!(started.elapsed() < settings().retry_backoff());
    assert_eq!(store.stats().await.unwrap(), CacheStats::default());
}

#[tokio::test]
async fn invalidated_language_costs_exactly_two_provider_calls() {
    let provider = Arc::new(ScriptedProvider::default());
    let store = Arc::new(InMemoryCacheStore::new());
    let orchestrator = Orchestrator::new(provider.clone(), store.clone(), settings());
    let langs = languages(&["es", "fr"]);

    orchestrator.analyze(GENESIS, &genesis(), &langs).await;
    assert_eq!(provider.total_calls(), 4);

    assert_eq!(store.invalidate(&genesis(), Some("es")).await.unwrap(), 1);
    let report = orchestrator.analyze(GENESIS, &genesis(), &langs).await;
    assert_eq!(provider.total_calls(), 6);
    assert_eq!(provider.calls_for("es", AlignmentMethod::Literal), 2);
    assert_eq!(provider.calls_for("es", AlignmentMethod::Dynamic), 2);
    assert_eq!(analysis(&report, "es").source, AnalysisSource::Provider);
    assert_eq!(analysis(&report, "fr").source, AnalysisSource::Cache);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_once() {
    let provider = Arc::new(
        ScriptedProvider::default()
            .fail_with("es", AlignmentMethod::Literal, vec![ProviderError::timeout("slow")])
            .fail_with(
                "fr",
                AlignmentMethod::Dynamic,
                vec![ProviderError::rate_limited("429"), ProviderError::rate_limited("429 again")],
            ),
    );
    let orchestrator = Orchestrator::new(provider.clone(), Arc::new(InMemoryCacheStore::new()), settings());

    let report = orchestrator.analyze(GENESIS, &genesis(), &languages(&["es", "fr"])).await;

    assert_eq!(analysis(&report, "es").source, AnalysisSource::Provider);
    assert_eq!(provider.calls_for("es", AlignmentMethod::Literal), 2);

    assert_eq!(error_kind(&report, "fr"), AnalysisErrorKind::RateLimited);
    assert_eq!(provider.calls_for("fr", AlignmentMethod::Dynamic), 2);
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let provider = Arc::new(
        ScriptedProvider::default()
            .fail_with("es", AlignmentMethod::Literal, vec![ProviderError::malformed("prose")])
            .fail_with("fr", AlignmentMethod::Literal, vec![ProviderError::unavailable("down")]),
    );
    let orchestrator = Orchestrator::new(provider.clone(), Arc::new(InMemoryCacheStore::new()), settings());

    let report = orchestrator.analyze(GENESIS, &genesis(), &languages(&["es", "fr"])).await;

    assert_eq!(error_kind(&report, "es"), AnalysisErrorKind::MalformedResponse);
    assert_eq!(error_kind(&report, "fr"), AnalysisErrorKind::Unavailable);
    assert_eq!(provider.calls_for("es", AlignmentMethod::Literal), 1);
    assert_eq!(provider.calls_for("fr", AlignmentMethod::Literal), 1);
    // literal failed, so dynamic was never asked
    assert_eq!(provider.calls_for("es", AlignmentMethod::Dynamic), 0);
}

#[tokio::test(start_paused = true)]
async fn deadline_times_out_only_unfinished_languages() {
    let provider = Arc::new(ScriptedProvider { stalled: vec!["de".to_string()], ..Default::default() });
    let store = Arc::new(InMemoryCacheStore::new());
    let orchestrator = Orchestrator::new(provider.clone(), store.clone(), settings());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let report = orchestrator
        .analyze_with_deadline(GENESIS, &genesis(), &languages(&["es", "de"]), deadline)
        .await;

    assert_eq!(analysis(&report, "es").source, AnalysisSource::Provider);
    assert_eq!(error_kind(&report, "de"), AnalysisErrorKind::Timeout);
    assert!(store.get(&genesis(), "de").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn fan_out_is_bounded() {
    let provider = Arc::new(ScriptedProvider { call_latency: Some(Duration::from_secs(1)), ..Default::default() });
    let limited = OrchestratorConfig { fan_out_limit: 2, ..settings() };
    let orchestrator = Orchestrator::new(provider.clone(), Arc::new(InMemoryCacheStore::new()), limited);

    let report = orchestrator
        .analyze(GENESIS, &genesis(), &languages(&["es", "fr", "de", "it"]))
        .await;

    assert_eq!(report.failed_languages().count(), 0);
    assert_eq!(provider.max_in_flight.load(Ordering::SeqCst), 2);
    assert_eq!(provider.total_calls(), 8);
}

#[tokio::test]
async fn changed_verse_text_is_re_derived() {
    let provider = Arc::new(ScriptedProvider::default());
    let store = Arc::new(InMemoryCacheStore::new());
    let orchestrator = Orchestrator::new(provider.clone(), store.clone(), settings());
    let langs = languages(&["es"]);

    orchestrator.analyze("In principio", &genesis(), &langs).await;
    let report = orchestrator.analyze(GENESIS, &genesis(), &langs).await;

    assert_eq!(provider.total_calls(), 4);
    assert_eq!(analysis(&report, "es").source, AnalysisSource::Provider);
    assert_eq!(analysis(&report, "es").alignment.literal.len(), 7);
    assert_eq!(store.get(&genesis(), "es").await.unwrap().unwrap().verse_text, GENESIS);
}

#[tokio::test]
async fn corrupt_sqlite_row_is_a_miss_and_gets_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("cache.db");
    let store = Arc::new(SqliteCacheStore::open(&db_path).unwrap());

    // average_confidence disagrees with the single edge's 0.9
    let conn = rusqlite::Connection::open(&db_path).unwrap();
    conn.execute(
        "INSERT INTO verse_alignment_cache VALUES (?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            "Gn 1:1",
            "es",
            GENESIS,
            r#"{"alignments":[{"source_index":0,"target_words":["En"],"target_indices":[0],"confidence":0.9}],"method":"literal","average_confidence":0.5}"#,
            r#"{"alignments":[{"source_index":0,"target_words":["Al"],"target_indices":[0],"confidence":0.9}],"method":"dynamic","average_confidence":0.9}"#,
            r#"{"literal_text":"En","dynamic_text":"Al"}"#,
            "2024-01-01T00:00:00+00:00",
        ],
    )
    .unwrap();
    drop(conn);

    assert!(store.get(&genesis(), "es").await.is_err());

    let provider = Arc::new(ScriptedProvider::default());
    let orchestrator = Orchestrator::new(provider.clone(), store.clone(), settings());
    let report = orchestrator.analyze(GENESIS, &genesis(), &languages(&["es"])).await;

    assert_eq!(analysis(&report, "es").source, AnalysisSource::Provider);
    assert_eq!(provider.total_calls(), 2);
    let repaired = store.get(&genesis(), "es").await.unwrap().unwrap();
    assert!((repaired.literal_alignment.average_confidence() - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn sqlite_cache_survives_reopening() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("cache.db");
    let langs = languages(&["es", "la"]);

    let first_provider = Arc::new(ScriptedProvider::default());
    {
        let store = Arc::new(SqliteCacheStore::open(&db_path).unwrap());
        let orchestrator = Orchestrator::new(first_provider.clone(), store, settings());
        orchestrator.analyze(GENESIS, &genesis(), &langs).await;
    }
    assert_eq!(first_provider.total_calls(), 4);

    let second_provider = Arc::new(ScriptedProvider::default());
    let store = Arc::new(SqliteCacheStore::open(&db_path).unwrap());
    assert_eq!(store.stats().await.unwrap(), CacheStats { entries: 2, verses: 1, languages: 2 });
    let orchestrator = Orchestrator::new(second_provider.clone(), store, settings());
    let report = orchestrator.analyze(GENESIS, &genesis(), &langs).await;

    assert_eq!(second_provider.total_calls(), 0);
    assert_eq!(analysis(&report, "la").source, AnalysisSource::Cache);
    assert_eq!(analysis(&report, "la").alignment.dynamic[3].target_phrase, "DEUS");
}

/// Store that is always down.
struct BrokenStore;

#[async_trait]
impl AnalysisCacheStore for BrokenStore {
    async fn get(&self, _: &VerseReference, _: &str) -> Result<Option<AnalysisCacheEntry>, StoreError> {
        Err(StoreError::unavailable("disk on fire"))
    }

    async fn put(&self, _: AnalysisCacheEntry) -> Result<(), StoreError> {
        Err(StoreError::unavailable("disk on fire"))
    }

    async fn invalidate(&self, _: &VerseReference, _: Option<&str>) -> Result<usize, StoreError> {
        Err(StoreError::unavailable("disk on fire"))
    }

    async fn stats(&self) -> Result<CacheStats, StoreError> {
        Err(StoreError::unavailable("disk on fire"))
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        Err(StoreError::unavailable("disk on fire"))
    }
}

#[tokio::test]
async fn unreachable_store_still_returns_provider_results() {
    let provider = Arc::new(ScriptedProvider::default());
    let orchestrator = Orchestrator::new(provider.clone(), Arc::new(BrokenStore), settings());

    let report = orchestrator.analyze(GENESIS, &genesis(), &languages(&["es"])).await;
    assert_eq!(analysis(&report, "es").source, AnalysisSource::Provider);

    orchestrator.analyze(GENESIS, &genesis(), &languages(&["es"])).await;
    assert_eq!(provider.total_calls(), 4);
}
