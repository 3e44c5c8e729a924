use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};

use flowrun_core::config::ModelConfig;
use flowrun_core::error::{FlowError, Result};
use flowrun_core::traits::LlmClient;
use flowrun_core::types::{ChatMessage, StopReason, StreamDelta};

enum Reply {
    Chunks(Vec<String>),
    Fail(String),
    Stall,
}

/// One recorded `chat_stream` call.
#[derive(Debug, Clone)]
pub struct RecordedChat {
    pub config: ModelConfig,
    pub messages: Vec<ChatMessage>,
}

/// Scripted LLM client. Replies are consumed in order; once exhausted every
/// call answers `"ok"`.
#[derive(Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<RecordedChat>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.push(Reply::Chunks(vec![text.into()]))
    }

    /// Reply streamed in several text deltas.
    pub fn with_chunks(self, chunks: &[&str]) -> Self {
        self.push(Reply::Chunks(chunks.iter().map(|c| c.to_string()).collect()))
    }

    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.push(Reply::Fail(message.into()))
    }

    /// A call that never answers, for exercising cancellation.
    pub fn with_stall(self) -> Self {
        self.push(Reply::Stall)
    }

    fn push(self, reply: Reply) -> Self {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(reply);
        }
        self
    }

    pub fn requests(&self) -> Vec<RecordedChat> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl LlmClient for MockLlmClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(RecordedChat {
                config: config.clone(),
                messages,
            });
        }
        let reply = self
            .replies
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_else(|| Reply::Chunks(vec!["ok".to_string()]));

        Box::pin(async move {
            match reply {
                Reply::Fail(msg) => Err(FlowError::LlmRequest(msg)),
                Reply::Stall => futures::future::pending().await,
                Reply::Chunks(chunks) => {
                    let mut deltas: Vec<Result<StreamDelta>> =
                        chunks.into_iter().map(|c| Ok(StreamDelta::TextDelta(c))).collect();
                    deltas.push(Ok(StreamDelta::Stop(StopReason::EndTurn)));
                    Ok(Box::pin(stream::iter(deltas)) as BoxStream<'_, Result<StreamDelta>>)
                }
            }
        })
    }
}
