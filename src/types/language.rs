//*** START FILE: src/types/language.rs ***//
// Target languages the analysis prompts know how to ask for.
// Codes are matched case-insensitively; everything else is rejected by the gateway.

const LANGUAGES: &[(&str, &str)] = &[
    ("en", "English"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("it", "Italian"),
    ("pt", "Portuguese"),
    ("de", "German"),
    ("la", "Latin"),
    ("sa", "Sanskrit"),
    ("hi", "Hindi"),
];

pub const DEFAULT_LANGUAGE: &str = "en";

/// Display name for a language code, or None if the code is not recognized.
pub fn language_name(code: &str) -> Option<&'static str> {
    let code = code.trim();
    LANGUAGES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|(_, name)| *name)
}

/// All (code, name) pairs in display order.
pub fn supported_languages() -> impl Iterator<Item = (&'static str, &'static str)> {
    LANGUAGES.iter().copied()
}

//*** END FILE: src/types/language.rs ***//
