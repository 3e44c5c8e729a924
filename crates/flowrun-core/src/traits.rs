use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::credential::{Credential, DatabaseCredential};
use crate::error::Result;
use crate::types::*;

/// LLM client with streaming chat completion.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// Read side of the credential store, as used by the engine.
pub trait CredentialStore: Send + Sync + 'static {
    /// Fetch a credential by id. Unknown ids yield `FlowError::CredentialNotFound`.
    fn get_credential(&self, id: &str) -> BoxFuture<'_, Result<Credential>>;
}

/// Relational database connector.
///
/// Implementations open a connection for the given credential, run one
/// statement, and close the connection before returning.
pub trait SqlConnector: Send + Sync + 'static {
    fn run(
        &self,
        target: &DatabaseCredential,
        statement: SqlStatement,
    ) -> BoxFuture<'_, Result<SqlOutcome>>;
}
