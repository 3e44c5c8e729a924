//! Mocks and fixtures shared by flowrun's test suites.

pub mod fixtures;
pub mod llm;
pub mod sql;

pub use fixtures::*;
pub use llm::{MockLlmClient, RecordedChat};
pub use sql::MockSqlConnector;
