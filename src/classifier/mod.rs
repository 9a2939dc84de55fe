//! Classifier Port
//!
//! Narrow semantic-judgment capability used where deterministic patterns
//! are not conclusive. The production implementation calls an external
//! language-model provider; tests use a table-driven stub.

pub mod llm;
pub mod stub;

pub use llm::LlmClassifier;
pub use stub::StubClassifier;
