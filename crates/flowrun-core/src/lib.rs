pub mod config;
pub mod credential;
pub mod error;
pub mod event;
pub mod flow;
pub mod node_config;
pub mod traits;
pub mod types;
pub mod validate;

pub use config::AppConfig;
pub use error::{ErrorKind, FlowError, Result};
pub use event::EventBus;
pub use flow::{Edge, Flow, Node, Position, Variable};
pub use types::*;
pub use node_config::NodeConfig;
pub use validate::{validate_flow, ValidationReport};
