//*** START FILE: src/parsing/tokenizer.rs ***//
use crate::types::alignment::WordToken;
use regex::Regex;
use std::sync::OnceLock;

// Anything that is not a word character or whitespace is punctuation for our purposes.
// `\w` is Unicode-aware, so macrons and ligatures (princīpio, cælum) survive.
fn punctuation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s]").expect("punctuation pattern is valid"))
}

/// Splits a verse (or a translation) into indexed word tokens.
///
/// Punctuation is removed and whitespace collapsed, so "cælum, et terram." yields
/// three tokens. The same rule is used for the source verse and for target
/// translations so that indices on both sides agree with what the provider saw.
pub fn tokenize(text: &str) -> Vec<WordToken> {
    let cleaned = punctuation_re().replace_all(text, "");
    cleaned
        .split_whitespace()
        .enumerate()
        .map(|(index, surface)| WordToken { index, surface: surface.to_string() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_and_keeps_diacritics() {
        let tokens = tokenize("In princīpio creāvit Deus cælum, et terram.");
        let surfaces: Vec<&str> = tokens.iter().map(|t| t.surface.as_str()).collect();
        assert_eq!(surfaces, vec!["In", "princīpio", "creāvit", "Deus", "cælum", "et", "terram"]);
        assert!(tokens.iter().enumerate().all(|(i, t)| t.index == i));
    }

    #[test]
    fn punctuation_only_text_has_no_tokens() {
        assert_eq!(tokenize("Al principio, Dios creó el cielo y la tierra.").len(), 9);
        assert!(tokenize("  ...  ").is_empty());
    }
}
//*** END FILE: src/parsing/tokenizer.rs ***//
