//*** START FILE: src/pipeline/mod.rs ***//
pub mod normalizer;
pub mod formatter;
pub mod gateway;
pub mod store;
pub mod orchestrator;

// Re-export the pieces main.rs and the integration tests wire together
pub use gateway::{AlignmentProvider, OpenAiGateway};
pub use store::{AnalysisCacheStore, CacheStats, InMemoryCacheStore, SqliteCacheStore};
pub use orchestrator::{AnalysisReport, AnalysisSource, LanguageAnalysis, LanguageOutcome, Orchestrator};
pub use normalizer::{normalize, NormalizedAlignment};
pub use formatter::format;
//*** END FILE: src/pipeline/mod.rs ***//
