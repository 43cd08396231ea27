pub mod analyzer;
pub mod cues;
pub mod phases;
pub mod store;
pub mod types;

pub use analyzer::ContextAnalyzer;
pub use store::ContextStore;
