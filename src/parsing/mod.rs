//*** START FILE: src/parsing/mod.rs ***//
pub mod llm_parser;
pub mod tokenizer;

// Re-export the main parsing functions for convenience
pub use llm_parser::{parse_provider_payload, RawEdge, RawProviderResult};
pub use tokenizer::tokenize;
//*** END FILE: src/parsing/mod.rs ***//
