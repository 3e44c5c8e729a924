pub mod context;
pub mod credentials;
pub mod executor;
pub mod interpolate;
pub mod nodes;

#[cfg(test)]
mod testing;

pub use context::ExecutionContext;
pub use credentials::CredentialResolver;
pub use executor::{ExecutionResult, FlowEngine, NodeFailure, RunOptions, StepRecord};
pub use nodes::NodeServices;
