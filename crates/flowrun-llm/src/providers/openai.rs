use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use flowrun_core::config::ModelConfig;
use flowrun_core::error::{FlowError, Result};
use flowrun_core::traits::LlmClient;
use flowrun_core::types::*;

use crate::streaming::{SseEvent, SseStream};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI-compatible client. Works with OpenAI and proxies that speak its
/// chat-completions protocol.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    /// Share an existing connection pool.
    pub fn with_http(http: Client) -> Self {
        Self { http }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Accept either an API base (`.../v1`) or a full completions URL.
pub(crate) fn completions_url(base_url: Option<&str>) -> String {
    let base = base_url.unwrap_or(OPENAI_API_BASE).trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{}/chat/completions", base)
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct OaiMessage {
    role: &'static str,
    content: String,
}

// Response types
#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDeltaContent,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct StreamDeltaContent {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn convert_messages(messages: Vec<ChatMessage>) -> Vec<OaiMessage> {
    messages
        .into_iter()
        .map(|msg| OaiMessage {
            role: match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: msg.content,
        })
        .collect()
}

pub(crate) fn parse_chunk(event: SseEvent) -> Vec<Result<StreamDelta>> {
    if event.data.trim() == "[DONE]" {
        return vec![];
    }

    let chunk: StreamChunk = match serde_json::from_str(&event.data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse OpenAI SSE chunk");
            return vec![];
        }
    };

    let mut deltas = Vec::new();
    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            deltas.push(Ok(StreamDelta::TextDelta(text)));
        }
        if let Some(reason) = choice.finish_reason {
            let stop = match reason.as_str() {
                "length" => StopReason::MaxTokens,
                "stop_sequence" => StopReason::StopSequence,
                _ => StopReason::EndTurn,
            };
            deltas.push(Ok(StreamDelta::Stop(stop)));
        }
    }
    if let Some(usage) = chunk.usage {
        deltas.push(Ok(StreamDelta::Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }));
    }
    deltas
}

impl LlmClient for OpenAiClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();

        Box::pin(async move {
            let url = completions_url(config.base_url.as_deref());

            let body = ChatRequest {
                model: config.model_id.clone(),
                messages: convert_messages(messages),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                stream: true,
                stream_options: StreamOptions {
                    include_usage: true,
                },
            };

            debug!(model = %config.model_id, url = %url, "Sending chat completion request");
            let mut req = self.http.post(&url).json(&body);

            if let Some(api_key) = &config.api_key {
                req = req.bearer_auth(api_key);
            }

            // e.g. OpenAI-Organization from the credential
            for (k, v) in &config.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }

            let response = req
                .send()
                .await
                .map_err(|e| FlowError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(FlowError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let delta_stream = SseStream::new(response.bytes_stream())
                .map(|event| match event {
                    Ok(event) => futures::stream::iter(parse_chunk(event)),
                    Err(e) => futures::stream::iter(vec![Err(e)]),
                })
                .flatten();

            Ok(Box::pin(delta_stream) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};

    fn event(data: &str) -> SseEvent {
        SseEvent {
            event_type: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn test_completions_url() {
        assert_eq!(
            completions_url(None),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            completions_url(Some("http://proxy.local/v1/")),
            "http://proxy.local/v1/chat/completions"
        );
        assert_eq!(
            completions_url(Some("http://proxy.local/v1/chat/completions")),
            "http://proxy.local/v1/chat/completions"
        );
    }

    #[test]
    fn test_convert_messages_keeps_roles() {
        let converted = convert_messages(vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
            ChatMessage::user("again"),
        ]);
        let roles: Vec<&str> = converted.iter().map(|m| m.role).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
        assert_eq!(converted[2].content, "hello");
    }

    #[test]
    fn test_parse_text_and_stop() {
        let deltas = parse_chunk(event(
            r#"{"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#,
        ));
        assert!(matches!(deltas.as_slice(), [Ok(StreamDelta::TextDelta(t))] if t == "Hi"));

        let deltas = parse_chunk(event(
            r#"{"choices":[{"delta":{},"finish_reason":"length"}]}"#,
        ));
        assert!(matches!(
            deltas.as_slice(),
            [Ok(StreamDelta::Stop(StopReason::MaxTokens))]
        ));
    }

    #[test]
    fn test_parse_usage_and_done() {
        let deltas = parse_chunk(event(
            r#"{"choices":[],"usage":{"prompt_tokens":7,"completion_tokens":3}}"#,
        ));
        assert!(matches!(
            deltas.as_slice(),
            [Ok(StreamDelta::Usage {
                input_tokens: 7,
                output_tokens: 3
            })]
        ));
        assert!(parse_chunk(event("[DONE]")).is_empty());
        assert!(parse_chunk(event("not json")).is_empty());
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    #[tokio::test]
    async fn test_chat_stream_against_loopback() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["model"], "gpt-4o-mini");
                assert_eq!(body["max_tokens"], 500);
                assert_eq!(body["messages"][0]["role"], "system");
                concat!(
                    "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
                    "data: [DONE]\n\n"
                )
            }),
        );
        let base = serve(router).await;

        let mut config = ModelConfig::new("gpt-4o-mini");
        config.base_url = Some(base);
        config.api_key = Some("sk-test".into());

        let client = OpenAiClient::new();
        let mut stream = client
            .chat_stream(
                &config,
                vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
            )
            .await
            .unwrap();

        let mut text = String::new();
        let mut stopped = false;
        while let Some(delta) = stream.next().await {
            match delta.unwrap() {
                StreamDelta::TextDelta(t) => text.push_str(&t),
                StreamDelta::Stop(_) => stopped = true,
                StreamDelta::Usage { .. } => {}
            }
        }
        assert_eq!(text, "Hello");
        assert!(stopped);
    }

    #[tokio::test]
    async fn test_http_error_is_llm_request_error() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (axum::http::StatusCode::UNAUTHORIZED, "bad key") }),
        );
        let base = serve(router).await;

        let mut config = ModelConfig::new("gpt-4o-mini");
        config.base_url = Some(base);

        let client = OpenAiClient::new();
        let err = client
            .chat_stream(&config, vec![ChatMessage::user("hi")])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FlowError::LlmRequest(msg) if msg.contains("401")));
    }
}
