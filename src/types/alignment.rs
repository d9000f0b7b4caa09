//*** START FILE: src/types/alignment.rs ***//
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Tolerance used when checking a stored average against its edges.
pub const CONFIDENCE_TOLERANCE: f64 = 1e-9;

/// Opaque, stable identifier for a verse or section, e.g. "Gn 1:1".
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct VerseReference(String);

impl VerseReference {
    pub fn new(reference: impl Into<String>) -> Self {
        VerseReference(reference.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VerseReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One source-language word. Indices in a verse run 0..N-1 in source order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WordToken {
    pub index: usize,
    pub surface: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlignmentMethod {
    /// Word order and closest dictionary sense preserved.
    Literal,
    /// Natural target-language phrasing.
    Dynamic,
}

impl AlignmentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AlignmentMethod::Literal => "literal",
            AlignmentMethod::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for AlignmentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AlignmentEdge {
    pub source_index: usize,
    pub target_words: Vec<String>,
    /// Parallel to `target_words`, or empty when the positions in the
    /// translation are unknown.
    pub target_indices: Vec<usize>,
    pub confidence: f64,
}

impl AlignmentEdge {
    /// Target words in list order joined with single spaces. Order matters: it is
    /// the target-language order of the words aligned to this source word.
    pub fn target_phrase(&self) -> String {
        self.target_words.join(" ")
    }
}

/// Word-index correspondence for one verse, one language and one mode.
///
/// Edges are kept sorted by `source_index` with at most one edge per index, and
/// `average_confidence` is always recomputed from the edges.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "StoredAlignmentMap")]
pub struct AlignmentMap {
    #[serde(rename = "alignments")]
    edges: Vec<AlignmentEdge>,
    method: AlignmentMethod,
    average_confidence: f64,
}

impl AlignmentMap {
    /// Builds a map from edges that must not repeat a source index.
    pub fn new(method: AlignmentMethod, edges: Vec<AlignmentEdge>) -> Result<Self, String> {
        let mut seen = HashSet::with_capacity(edges.len());
        for edge in &edges {
            if !seen.insert(edge.source_index) {
                return Err(format!(
                    "duplicate edge for source index {} in {} alignment",
                    edge.source_index, method
                ));
            }
        }
        Ok(Self::from_unique_edges(method, edges))
    }

    // Callers guarantee source indices are unique (the normalizer merges duplicates first).
    pub(crate) fn from_unique_edges(method: AlignmentMethod, mut edges: Vec<AlignmentEdge>) -> Self {
        edges.sort_by_key(|e| e.source_index);
        let average_confidence = mean_confidence(&edges);
        AlignmentMap { edges, method, average_confidence }
    }

    pub fn edges(&self) -> &[AlignmentEdge] {
        &self.edges
    }

    pub fn method(&self) -> AlignmentMethod {
        self.method
    }

    pub fn average_confidence(&self) -> f64 {
        self.average_confidence
    }

    pub fn edge_for(&self, source_index: usize) -> Option<&AlignmentEdge> {
        self.edges
            .binary_search_by_key(&source_index, |e| e.source_index)
            .ok()
            .map(|pos| &self.edges[pos])
    }

    /// Smallest source length this map is consistent with (highest index + 1).
    pub fn implied_source_len(&self) -> usize {
        self.edges.last().map_or(0, |e| e.source_index + 1)
    }
}

fn mean_confidence(edges: &[AlignmentEdge]) -> f64 {
    if edges.is_empty() {
        return 0.0;
    }
    edges.iter().map(|e| e.confidence).sum::<f64>() / edges.len() as f64
}

// Wire shape of an alignment map as stored and sent to the frontend. Every read
// goes through this so a stored aggregate is checked, never trusted.
#[derive(Deserialize)]
struct StoredAlignmentMap {
    alignments: Vec<AlignmentEdge>,
    method: AlignmentMethod,
    average_confidence: f64,
}

impl TryFrom<StoredAlignmentMap> for AlignmentMap {
    type Error = String;

    fn try_from(stored: StoredAlignmentMap) -> Result<Self, Self::Error> {
        for edge in &stored.alignments {
            if !(0.0..=1.0).contains(&edge.confidence) {
                return Err(format!(
                    "confidence {} for source index {} is outside [0, 1]",
                    edge.confidence, edge.source_index
                ));
            }
            if !edge.target_indices.is_empty() && edge.target_words.len() != edge.target_indices.len() {
                return Err(format!(
                    "source index {} has {} target words but {} target indices",
                    edge.source_index,
                    edge.target_words.len(),
                    edge.target_indices.len()
                ));
            }
        }
        let map = AlignmentMap::new(stored.method, stored.alignments)?;
        if (map.average_confidence - stored.average_confidence).abs() > CONFIDENCE_TOLERANCE {
            return Err(format!(
                "stored average_confidence {} does not match edges (expected {})",
                stored.average_confidence, map.average_confidence
            ));
        }
        Ok(map)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct TranslationPair {
    pub literal_text: String,
    pub dynamic_text: String,
}

/// The persisted unit, one per (verse_reference, language_code).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AnalysisCacheEntry {
    pub verse_reference: VerseReference,
    pub language_code: String,
    pub verse_text: String,
    pub literal_alignment: AlignmentMap,
    pub dynamic_alignment: AlignmentMap,
    pub translations: TranslationPair,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisCacheEntry {
    pub fn new(
        verse_reference: VerseReference,
        language_code: impl Into<String>,
        verse_text: impl Into<String>,
        literal_alignment: AlignmentMap,
        dynamic_alignment: AlignmentMap,
        translations: TranslationPair,
    ) -> Self {
        AnalysisCacheEntry {
            verse_reference,
            language_code: language_code.into(),
            verse_text: verse_text.into(),
            literal_alignment,
            dynamic_alignment,
            translations,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AlignedSegment {
    pub source_word: String,
    pub source_index: usize,
    pub target_phrase: String,
    pub confidence: f64,
}

/// Frontend-facing view of both alignments. Derived on every request, never stored.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FormattedAlignment {
    pub literal: Vec<AlignedSegment>,
    pub dynamic: Vec<AlignedSegment>,
    pub literal_confidence: f64,
    pub dynamic_confidence: f64,
    pub average_confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(source_index: usize, words: &[&str], confidence: f64) -> AlignmentEdge {
        AlignmentEdge {
            source_index,
            target_words: words.iter().map(|w| w.to_string()).collect(),
            target_indices: (0..words.len()).collect(),
            confidence,
        }
    }

    #[test]
    fn reference_is_trimmed() {
        assert_eq!(VerseReference::new("  Jn 3:16 "), VerseReference::new("Jn 3:16"));
    }

    #[test]
    fn map_sorts_edges_and_recomputes_average() {
        let map = AlignmentMap::new(
            AlignmentMethod::Literal,
            vec![edge(2, &["b"], 0.5), edge(0, &["a"], 1.0)],
        )
        .unwrap();
        assert_eq!(map.edges()[0].source_index, 0);
        assert!((map.average_confidence() - 0.75).abs() < CONFIDENCE_TOLERANCE);
        assert_eq!(map.implied_source_len(), 3);
        assert!(map.edge_for(1).is_none());
        assert_eq!(map.edge_for(2).unwrap().target_phrase(), "b");
    }

    #[test]
    fn map_rejects_duplicate_source_index() {
        let result = AlignmentMap::new(
            AlignmentMethod::Dynamic,
            vec![edge(1, &["a"], 0.5), edge(1, &["b"], 0.5)],
        );
        assert!(result.is_err());
    }

    #[test]
    fn serialized_map_round_trips() {
        let map = AlignmentMap::new(
            AlignmentMethod::Dynamic,
            vec![edge(0, &["En", "el"], 0.9), edge(1, &["principio"], 0.7)],
        )
        .unwrap();
        let json = serde_json::to_string(&map).unwrap();
        assert!(json.contains("\"alignments\""));
        assert!(json.contains("\"method\":\"dynamic\""));
        let back: AlignmentMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn stored_average_that_disagrees_with_edges_is_rejected() {
        let json = r#"{"alignments":[{"source_index":0,"target_words":["a"],"target_indices":[0],"confidence":0.4}],
                       "method":"literal","average_confidence":0.9}"#;
        assert!(serde_json::from_str::<AlignmentMap>(json).is_err());
    }

    #[test]
    fn stored_edge_may_lack_target_positions() {
        let json = r#"{"alignments":[{"source_index":0,"target_words":["a","b"],"target_indices":[],"confidence":0.4}],
                       "method":"literal","average_confidence":0.4}"#;
        let map: AlignmentMap = serde_json::from_str(json).unwrap();
        assert_eq!(map.edges()[0].target_phrase(), "a b");

        let partial = json.replace(r#""target_indices":[]"#, r#""target_indices":[0]"#);
        assert!(serde_json::from_str::<AlignmentMap>(&partial).is_err());
    }
}
//*** END FILE: src/types/alignment.rs ***//
