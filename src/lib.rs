//*** START FILE: src/lib.rs ***//

// Declare all modules that are part of this library
pub mod config;
pub mod error;
pub mod types {
    pub mod alignment;
    pub mod language;
}
pub mod parsing;
pub mod pipeline;

pub use config::Config;
pub use error::{AnalysisError, AnalysisErrorKind};
pub use pipeline::Orchestrator;

//*** END FILE: src/lib.rs ***//
