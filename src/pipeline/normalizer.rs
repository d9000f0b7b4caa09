//*** START FILE: src/pipeline/normalizer.rs ***//
use crate::error::NormalizationError;
use crate::parsing::llm_parser::{RawEdge, RawProviderResult};
use crate::parsing::tokenizer::tokenize;
use crate::types::alignment::{AlignmentEdge, AlignmentMap, AlignmentMethod, WordToken};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    SourceIndexOutOfRange,
    TargetIndexOutOfRange,
    /// target_words and target_indices have different lengths.
    MismatchedTargets,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DropReason::SourceIndexOutOfRange => "source index outside the verse",
            DropReason::TargetIndexOutOfRange => "target index outside the translation",
            DropReason::MismatchedTargets => "target words and indices differ in length",
        };
        f.write_str(s)
    }
}

/// Diagnostic for an edge the normalizer refused to keep.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedEdge {
    pub source_index: i64,
    pub reason: DropReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAlignment {
    pub map: AlignmentMap,
    pub dropped: Vec<DroppedEdge>,
}

// Accumulates every provider edge that names the same source word.
struct MergedEdge {
    target_words: Vec<String>,
    target_indices: Vec<usize>,
    // False once any contributing edge had words without known positions.
    positions_known: bool,
    confidence_sum: f64,
    count: usize,
}

impl Default for MergedEdge {
    fn default() -> Self {
        MergedEdge {
            target_words: Vec::new(),
            target_indices: Vec::new(),
            positions_known: true,
            confidence_sum: 0.0,
            count: 0,
        }
    }
}

/// Validates a raw provider reply against the verse and translation token bounds
/// and reshapes it into an `AlignmentMap`.
///
/// `target_tokens` is the tokenized translation. Edges that omit
/// `target_indices` get them resolved by matching their words against it; if
/// some word cannot be found the edge is kept without positions.
///
/// Invalid edges are dropped and reported in `dropped`. Edges repeating a source
/// index are merged: targets concatenated in the order received, confidence
/// averaged. Fails with EMPTY_ALIGNMENT only when nothing survives.
pub fn normalize(
    raw: &RawProviderResult,
    method: AlignmentMethod,
    verse_token_count: usize,
    target_tokens: &[WordToken],
) -> Result<NormalizedAlignment, NormalizationError> {
    let mut merged: BTreeMap<usize, MergedEdge> = BTreeMap::new();
    let mut dropped = Vec::new();

    for raw_edge in &raw.alignments {
        let (source_index, positions) = match check_edge(raw_edge, verse_token_count, target_tokens) {
            Ok(checked) => checked,
            Err(reason) => {
                warn!(
                    method = %method,
                    source_index = raw_edge.source_index,
                    %reason,
                    "dropping alignment edge"
                );
                dropped.push(DroppedEdge { source_index: raw_edge.source_index, reason });
                continue;
            }
        };

        let slot = merged.entry(source_index).or_default();
        slot.target_words.extend(raw_edge.target_words.iter().cloned());
        match positions {
            Some(indices) => slot.target_indices.extend(indices),
            None => slot.positions_known = false,
        }
        slot.confidence_sum += raw_edge.confidence.clamp(0.0, 1.0);
        slot.count += 1;
    }

    if merged.is_empty() {
        return Err(NormalizationError::empty_alignment(format!(
            "all {} {} edges were invalid for a verse of {} tokens",
            raw.alignments.len(),
            method,
            verse_token_count
        )));
    }

    let edges = merged
        .into_iter()
        .map(|(source_index, m)| AlignmentEdge {
            source_index,
            target_indices: if m.positions_known { m.target_indices } else { Vec::new() },
            target_words: m.target_words,
            confidence: m.confidence_sum / m.count as f64,
        })
        .collect();

    Ok(NormalizedAlignment { map: AlignmentMap::from_unique_edges(method, edges), dropped })
}

// Returns the source index and the edge's target positions (None when unknown).
fn check_edge(
    edge: &RawEdge,
    verse_token_count: usize,
    target_tokens: &[WordToken],
) -> Result<(usize, Option<Vec<usize>>), DropReason> {
    let source_index = usize::try_from(edge.source_index)
        .ok()
        .filter(|&i| i < verse_token_count)
        .ok_or(DropReason::SourceIndexOutOfRange)?;

    let indices = match &edge.target_indices {
        Some(indices) => indices,
        None => return Ok((source_index, resolve_positions(&edge.target_words, target_tokens))),
    };
    if edge.target_words.len() != indices.len() {
        return Err(DropReason::MismatchedTargets);
    }
    indices
        .iter()
        .map(|&t| usize::try_from(t).ok().filter(|&t| t < target_tokens.len()))
        .collect::<Option<Vec<usize>>>()
        .map(|positions| (source_index, Some(positions)))
        .ok_or(DropReason::TargetIndexOutOfRange)
}

// First translation token equal to each word (case-insensitive, punctuation ignored).
fn resolve_positions(words: &[String], target_tokens: &[WordToken]) -> Option<Vec<usize>> {
    words
        .iter()
        .map(|word| {
            let wanted: Vec<String> = tokenize(word).into_iter().map(|t| t.surface.to_lowercase()).collect();
            match wanted.as_slice() {
                [single] => target_tokens
                    .iter()
                    .find(|t| t.surface.to_lowercase() == *single)
                    .map(|t| t.index),
                _ => None,
            }
        })
        .collect()
}

//*** END FILE: src/pipeline/normalizer.rs ***//
