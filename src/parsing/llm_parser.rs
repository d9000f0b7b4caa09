//*** START FILE: src/parsing/llm_parser.rs ***//
use crate::error::ProviderError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One alignment edge exactly as the provider sent it. Indices are signed so that
/// nonsense like -1 survives parsing and gets dropped (with a diagnostic) by the
/// normalizer instead of failing the whole response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RawEdge {
    pub source_index: i64,
    #[serde(default)]
    pub source_word: Option<String>,
    #[serde(default)]
    pub target_words: Vec<String>,
    // Absent is not the same as empty: absent positions are resolved against
    // the translation by the normalizer.
    #[serde(default)]
    pub target_indices: Option<Vec<i64>>,
    pub confidence: f64,
}

/// Structured provider reply for one (verse, language, mode).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RawProviderResult {
    pub translation: String,
    pub alignments: Vec<RawEdge>,
    // Providers sometimes volunteer an aggregate. Kept for logging only; the
    // normalizer always recomputes it.
    #[serde(default)]
    pub average_confidence: Option<f64>,
}

/// Pulls the JSON object out of a chat reply. Handles ```json fences and
/// replies that wrap the object in prose.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if text.starts_with("```") {
        if let Some(start) = text.find('\n') {
            let after_first_line = &text[start + 1..];
            if let Some(end) = after_first_line.rfind("```") {
                return after_first_line[..end].trim();
            }
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            return &text[start..=end];
        }
    }

    text
}

/// Parses and shape-checks a provider reply. Anything that is not an object with a
/// `translation` string and an `alignments` list of edges is MALFORMED_RESPONSE.
pub fn parse_provider_payload(content: &str) -> Result<RawProviderResult, ProviderError> {
    let json = extract_json(content);
    let parsed: RawProviderResult = serde_json::from_str(json).map_err(|e| {
        ProviderError::malformed(format!("reply is not a valid alignment payload: {}", e))
    })?;

    if parsed.translation.trim().is_empty() {
        return Err(ProviderError::malformed("reply has an empty translation"));
    }
    // An empty `alignments` list is well-formed; the normalizer reports it as EMPTY_ALIGNMENT.
    if let Some(bad) = parsed.alignments.iter().find(|e| !e.confidence.is_finite()) {
        return Err(ProviderError::malformed(format!(
            "edge for source index {} has a non-numeric confidence",
            bad.source_index
        )));
    }

    debug!(
        edges = parsed.alignments.len(),
        provider_average = ?parsed.average_confidence,
        "parsed provider payload"
    );
    Ok(parsed)
}

//*** END FILE: src/parsing/llm_parser.rs ***//
