//*** START FILE: src/pipeline/formatter.rs ***//
// Merge/format engine: turns the literal and dynamic alignment maps for one verse
// into two position-indexed sequences for the reader view. Pure, no I/O.

use crate::error::FormatError;
use crate::types::alignment::{AlignedSegment, AlignmentMap, FormattedAlignment, WordToken};

/// Builds the frontend structure from both maps.
///
/// Each mode is laid out on its own (literal and dynamic are shown side by side,
/// never fused). Every source index 0..N-1 gets exactly one segment; indices the
/// provider skipped get an empty phrase with confidence 0.0, so both sequences
/// always have `tokens.len()` entries.
///
/// Fails with LENGTH_MISMATCH when either map references a source index the
/// verse tokenization does not have, i.e. the maps and the verse disagree on length.
pub fn format(
    tokens: &[WordToken],
    literal: &AlignmentMap,
    dynamic: &AlignmentMap,
) -> Result<FormattedAlignment, FormatError> {
    let source_len = tokens.len();
    for map in [literal, dynamic] {
        if map.implied_source_len() > source_len {
            return Err(FormatError::length_mismatch(format!(
                "{} alignment implies at least {} source words but the verse has {} \
                 (literal implies {}, dynamic implies {})",
                map.method(),
                map.implied_source_len(),
                source_len,
                literal.implied_source_len(),
                dynamic.implied_source_len()
            )));
        }
    }

    let literal_confidence = literal.average_confidence();
    let dynamic_confidence = dynamic.average_confidence();

    Ok(FormattedAlignment {
        literal: segments(tokens, literal),
        dynamic: segments(tokens, dynamic),
        literal_confidence,
        dynamic_confidence,
        average_confidence: (literal_confidence + dynamic_confidence) / 2.0,
    })
}

fn segments(tokens: &[WordToken], map: &AlignmentMap) -> Vec<AlignedSegment> {
    tokens
        .iter()
        .map(|token| match map.edge_for(token.index) {
            Some(edge) => AlignedSegment {
                source_word: token.surface.clone(),
                source_index: token.index,
                target_phrase: edge.target_phrase(),
                confidence: edge.confidence,
            },
            // Provider omitted this word (usually a function word with no counterpart)
            None => AlignedSegment {
                source_word: token.surface.clone(),
                source_index: token.index,
                target_phrase: String::new(),
                confidence: 0.0,
            },
        })
        .collect()
}

//*** END FILE: src/pipeline/formatter.rs ***//
