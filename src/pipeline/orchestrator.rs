//*** START FILE: src/pipeline/orchestrator.rs ***//
//! Multilingual orchestrator: fans one verse out across the requested languages.
//!
//! Per language the pipeline is strictly sequential:
//! cache read -> provider (literal, dynamic) -> normalize -> format -> cache write.
//! Languages run concurrently up to `fan_out_limit` and fail independently; the
//! caller always gets one slot per requested language.

use crate::config::OrchestratorConfig;
use crate::error::{AnalysisError, AnalysisErrorKind, ProviderError, StoreErrorKind};
use crate::parsing::llm_parser::RawProviderResult;
use crate::parsing::tokenizer::tokenize;
use crate::pipeline::formatter::format;
use crate::pipeline::gateway::AlignmentProvider;
use crate::pipeline::normalizer::normalize;
use crate::pipeline::store::AnalysisCacheStore;
use crate::types::alignment::{
    AlignmentMap, AlignmentMethod, AnalysisCacheEntry, FormattedAlignment, TranslationPair, VerseReference,
    WordToken,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSource {
    Cache,
    Provider,
}

/// Successful result for one language.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LanguageAnalysis {
    #[serde(flatten)]
    pub alignment: FormattedAlignment,
    pub translations: TranslationPair,
    pub source: AnalysisSource,
}

/// One slot of the aggregate: either the analysis or `{error_kind, message}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum LanguageOutcome {
    Analyzed(LanguageAnalysis),
    Failed(AnalysisError),
}

impl LanguageOutcome {
    pub fn analysis(&self) -> Option<&LanguageAnalysis> {
        match self {
            LanguageOutcome::Analyzed(a) => Some(a),
            LanguageOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&AnalysisError> {
        match self {
            LanguageOutcome::Analyzed(_) => None,
            LanguageOutcome::Failed(e) => Some(e),
        }
    }
}

impl From<Result<LanguageAnalysis, AnalysisError>> for LanguageOutcome {
    fn from(result: Result<LanguageAnalysis, AnalysisError>) -> Self {
        match result {
            Ok(analysis) => LanguageOutcome::Analyzed(analysis),
            Err(e) => LanguageOutcome::Failed(e),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    pub reference: VerseReference,
    pub results: BTreeMap<String, LanguageOutcome>,
}

impl AnalysisReport {
    pub fn get(&self, language_code: &str) -> Option<&LanguageOutcome> {
        self.results.get(language_code)
    }

    pub fn failed_languages(&self) -> impl Iterator<Item = &str> {
        self.results
            .iter()
            .filter(|(_, outcome)| outcome.error().is_some())
            .map(|(code, _)| code.as_str())
    }
}

// One mode's worth of provider output after normalization.
struct ModeResult {
    map: AlignmentMap,
    translation: String,
}

pub struct Orchestrator {
    provider: Arc<dyn AlignmentProvider>,
    store: Arc<dyn AnalysisCacheStore>,
    settings: OrchestratorConfig,
    permits: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn AlignmentProvider>,
        store: Arc<dyn AnalysisCacheStore>,
        settings: OrchestratorConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.fan_out_limit.max(1)));
        Self { provider, store, settings, permits }
    }

    /// Analyze with the configured default deadline.
    ///
    /// Results are keyed by the codes exactly as the caller passed them. Codes are
    /// trimmed and lowercased for the provider and the cache, so " ES " and "es"
    /// share one analysis and both get a slot.
    pub async fn analyze(
        &self,
        verse_text: &str,
        reference: &VerseReference,
        requested_languages: &BTreeSet<String>,
    ) -> AnalysisReport {
        let deadline = Instant::now() + self.settings.deadline();
        self.analyze_with_deadline(verse_text, reference, requested_languages, deadline)
            .await
    }

    /// Languages still unresolved at `deadline` are cancelled and reported as TIMEOUT;
    /// languages that finished keep their results.
    pub async fn analyze_with_deadline(
        &self,
        verse_text: &str,
        reference: &VerseReference,
        requested_languages: &BTreeSet<String>,
        deadline: Instant,
    ) -> AnalysisReport {
        // normalized code -> every requested spelling of it
        let mut languages: BTreeMap<String, Vec<&String>> = BTreeMap::new();
        for requested in requested_languages {
            languages.entry(requested.trim().to_lowercase()).or_default().push(requested);
        }

        let tokens = tokenize(verse_text);
        if tokens.is_empty() {
            warn!(reference = %reference, "refusing to analyze an empty verse");
            let results = requested_languages
                .iter()
                .map(|code| {
                    let err = AnalysisError::new(
                        AnalysisErrorKind::MalformedResponse,
                        "verse text is empty, nothing to align",
                    );
                    (code.clone(), LanguageOutcome::Failed(err))
                })
                .collect();
            return AnalysisReport { reference: reference.clone(), results };
        }

        info!(reference = %reference, languages = languages.len(), words = tokens.len(), "analyzing verse");

        let tasks = languages.keys().map(|code| {
            let tokens = &tokens;
            async move {
                let outcome = match timeout_at(deadline, self.analyze_language(verse_text, reference, code, tokens)).await {
                    Ok(result) => result.into(),
                    Err(_) => {
                        warn!(reference = %reference, language = %code, "deadline expired, cancelling");
                        LanguageOutcome::Failed(AnalysisError::deadline_expired(code))
                    }
                };
                (code, outcome)
            }
        });

        let mut results = BTreeMap::new();
        for (code, outcome) in join_all(tasks).await {
            for requested in &languages[code] {
                results.insert((*requested).clone(), outcome.clone());
            }
        }
        AnalysisReport { reference: reference.clone(), results }
    }

    async fn analyze_language(
        &self,
        verse_text: &str,
        reference: &VerseReference,
        language_code: &str,
        tokens: &[WordToken],
    ) -> Result<LanguageAnalysis, AnalysisError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AnalysisError::new(AnalysisErrorKind::Unavailable, "orchestrator is shutting down"))?;

        if let Some(hit) = self.cached_analysis(verse_text, reference, language_code, tokens).await {
            return Ok(hit);
        }

        let literal = self.request_mode(verse_text, reference, language_code, AlignmentMethod::Literal, tokens.len()).await?;
        let dynamic = self.request_mode(verse_text, reference, language_code, AlignmentMethod::Dynamic, tokens.len()).await?;

        let alignment = format(tokens, &literal.map, &dynamic.map)?;
        let translations = TranslationPair { literal_text: literal.translation, dynamic_text: dynamic.translation };

        let entry = AnalysisCacheEntry::new(
            reference.clone(),
            language_code,
            verse_text,
            literal.map,
            dynamic.map,
            translations.clone(),
        );
        // The analysis itself succeeded; a failed write only costs a provider call next time.
        if let Err(e) = self.store.put(entry).await {
            warn!(reference = %reference, language = language_code, error = %e, "failed to cache analysis");
        }

        Ok(LanguageAnalysis { alignment, translations, source: AnalysisSource::Provider })
    }

    // Cache lookup. Anything that is not a usable hit (miss, corrupt row, stale
    // text, unreachable store) sends the language down the provider path.
    async fn cached_analysis(
        &self,
        verse_text: &str,
        reference: &VerseReference,
        language_code: &str,
        tokens: &[WordToken],
    ) -> Option<LanguageAnalysis> {
        let entry = match self.store.get(reference, language_code).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!(reference = %reference, language = language_code, "cache miss");
                return None;
            }
            Err(e) if e.kind() == StoreErrorKind::Corrupt => {
                warn!(reference = %reference, language = language_code, error = %e, "corrupt cache row, re-deriving");
                return None;
            }
            Err(e) => {
                warn!(reference = %reference, language = language_code, error = %e, "cache unavailable, re-deriving");
                return None;
            }
        };

        if entry.verse_text != verse_text {
            info!(reference = %reference, language = language_code, "verse text changed since caching, re-deriving");
            return None;
        }

        match format(tokens, &entry.literal_alignment, &entry.dynamic_alignment) {
            Ok(alignment) => {
                debug!(reference = %reference, language = language_code, "cache hit");
                Some(LanguageAnalysis { alignment, translations: entry.translations, source: AnalysisSource::Cache })
            }
            Err(e) => {
                warn!(reference = %reference, language = language_code, error = %e, "cached alignment no longer fits verse");
                None
            }
        }
    }

    async fn request_mode(
        &self,
        verse_text: &str,
        reference: &VerseReference,
        language_code: &str,
        mode: AlignmentMethod,
        verse_token_count: usize,
    ) -> Result<ModeResult, AnalysisError> {
        let raw = self.call_provider_with_retry(verse_text, reference, language_code, mode).await?;
        let target_tokens = tokenize(&raw.translation);
        let normalized = normalize(&raw, mode, verse_token_count, &target_tokens)?;
        if !normalized.dropped.is_empty() {
            info!(
                reference = %reference,
                language = language_code,
                mode = %mode,
                dropped = normalized.dropped.len(),
                kept = normalized.map.edges().len(),
                "normalizer dropped invalid edges"
            );
        }
        Ok(ModeResult { map: normalized.map, translation: raw.translation })
    }

    // At most one retry, and only for TIMEOUT / RATE_LIMITED.
    async fn call_provider_with_retry(
        &self,
        verse_text: &str,
        reference: &VerseReference,
        language_code: &str,
        mode: AlignmentMethod,
    ) -> Result<RawProviderResult, ProviderError> {
        match self.provider.request_alignment(verse_text, reference, language_code, mode).await {
            Ok(raw) => Ok(raw),
            Err(e) if e.kind().is_retryable() => {
                warn!(
                    provider = self.provider.name(),
                    reference = %reference,
                    language = language_code,
                    mode = %mode,
                    error = %e,
                    backoff_ms = self.settings.retry_backoff_ms,
                    "provider call failed, retrying once"
                );
                tokio::time::sleep(self.settings.retry_backoff()).await;
                self.provider.request_alignment(verse_text, reference, language_code, mode).await
            }
            Err(e) => Err(e),
        }
    }
}

//*** END FILE: src/pipeline/orchestrator.rs ***//
