//! Text generation boundary.
//!
//! A [`Generator`] turns one [`GenerationRequest`] into a lazy stream of
//! cumulative text snapshots: every item is the full reply so far, never a
//! delta. Providers that speak in deltas accumulate them before yielding.
//!
//! # Providers
//!
//! | Provider   | Implementation              |
//! |------------|-----------------------------|
//! | `disabled` | [`DisabledGenerator`]       |
//! | `openai`   | [`ChatCompletionsGenerator`] |
//! | `ollama`   | [`ChatCompletionsGenerator`] at `{host}/v1` |

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use pagewise_core::prompt::GenerationRequest;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::GeneratorConfig;
use crate::error::GenerationError;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// Cumulative text snapshots of one reply.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

pub trait Generator: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Start one generation call. Nothing is sent until the stream is polled.
    fn generate(&self, request: GenerationRequest) -> SnapshotStream;
}

/// Stand-in used when no provider is configured.
pub struct DisabledGenerator;

impl Generator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }

    fn generate(&self, _request: GenerationRequest) -> SnapshotStream {
        Box::pin(stream::once(async { Err(GenerationError::Disabled) }))
    }
}

/// Build the generator named by `config.provider`.
pub fn create_generator(config: &GeneratorConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" | "ollama" => Ok(Arc::new(ChatCompletionsGenerator::from_config(config)?)),
        other => bail!("Unknown generator provider: {}", other),
    }
}

// ============ OpenAI-compatible chat completions ============

#[derive(Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct StreamPayload {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamErrorBody>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamErrorBody {
    #[serde(default)]
    message: String,
}

/// Streams replies from an OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatCompletionsGenerator {
    provider: String,
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    idle_timeout: Duration,
}

impl ChatCompletionsGenerator {
    pub fn from_config(config: &GeneratorConfig) -> Result<Self> {
        let model = match &config.model {
            Some(model) => model.clone(),
            None => bail!("generator.model is required for provider '{}'", config.provider),
        };
        let default_base = match config.provider.as_str() {
            "ollama" => OLLAMA_BASE_URL,
            _ => OPENAI_BASE_URL,
        };
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base.to_string());

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        if api_key.is_none() && config.provider == "openai" {
            bail!(
                "Environment variable {} is not set (required by the openai provider)",
                config.api_key_env
            );
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self {
            provider: config.provider.clone(),
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
            api_key,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        })
    }

    fn send(&self, request: &GenerationRequest) -> BoxFuture<'static, Result<reqwest::Response, GenerationError>> {
        let body = ChatCompletionsRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_instruction,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            stream: true,
        };

        let mut req = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        Box::pin(async move {
            let resp = req.send().await?;
            if !resp.status().is_success() {
                let status = resp.status().as_u16();
                let message = resp.text().await.unwrap_or_default();
                return Err(GenerationError::Api { status, message });
            }
            Ok(resp)
        })
    }
}

impl Generator for ChatCompletionsGenerator {
    fn name(&self) -> &str {
        &self.provider
    }

    fn generate(&self, request: GenerationRequest) -> SnapshotStream {
        info!(
            provider = %self.provider,
            model = %self.model,
            prompt_chars = request.prompt.len(),
            context_chars = request.system_instruction.len(),
            "starting generation"
        );
        let idle = self.idle_timeout;
        let state = StreamState::Connecting(self.send(&request));
        Box::pin(stream::unfold(state, move |state| next_snapshot(state, idle)))
    }
}

enum StreamState {
    Connecting(BoxFuture<'static, Result<reqwest::Response, GenerationError>>),
    Streaming {
        body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
        decoder: SseDecoder,
        snapshot: String,
    },
    Done,
}

impl StreamState {
    fn streaming(body: BoxStream<'static, reqwest::Result<Vec<u8>>>) -> Self {
        StreamState::Streaming {
            body,
            decoder: SseDecoder::default(),
            snapshot: String::new(),
        }
    }
}

async fn next_snapshot(
    mut state: StreamState,
    idle: Duration,
) -> Option<(Result<String, GenerationError>, StreamState)> {
    loop {
        state = match state {
            StreamState::Done => return None,
            StreamState::Connecting(send) => match tokio::time::timeout(idle, send).await {
                Err(_) => return Some((Err(GenerationError::Timeout(idle.as_secs())), StreamState::Done)),
                Ok(Err(e)) => return Some((Err(e), StreamState::Done)),
                Ok(Ok(resp)) => {
                    let body = resp.bytes_stream().map(|r| r.map(|b| b.to_vec()));
                    StreamState::streaming(body.boxed())
                }
            },
            StreamState::Streaming {
                mut body,
                mut decoder,
                mut snapshot,
            } => {
                while let Some(event) = decoder.next_event() {
                    match event {
                        SseEvent::Delta(text) => {
                            snapshot.push_str(&text);
                            let item = Ok(snapshot.clone());
                            return Some((
                                item,
                                StreamState::Streaming {
                                    body,
                                    decoder,
                                    snapshot,
                                },
                            ));
                        }
                        SseEvent::Done => {
                            debug!(chars = snapshot.len(), "generation finished");
                            return None;
                        }
                        SseEvent::Error(message) => {
                            return Some((Err(GenerationError::Stream(message)), StreamState::Done));
                        }
                    }
                }
                match tokio::time::timeout(idle, body.next()).await {
                    Err(_) => {
                        return Some((Err(GenerationError::Timeout(idle.as_secs())), StreamState::Done))
                    }
                    Ok(None) => return None,
                    Ok(Some(Err(e))) => return Some((Err(e.into()), StreamState::Done)),
                    Ok(Some(Ok(bytes))) => {
                        decoder.push(&bytes);
                        StreamState::Streaming {
                            body,
                            decoder,
                            snapshot,
                        }
                    }
                }
            }
        };
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
    Delta(String),
    Done,
    Error(String),
}

/// Incremental decoder for `data:` lines of a chat-completions event stream.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    events: VecDeque<SseEvent>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.decode_line(line.trim());
        }
    }

    fn next_event(&mut self) -> Option<SseEvent> {
        self.events.pop_front()
    }

    fn decode_line(&mut self, line: &str) {
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim_start();
        if data == "[DONE]" {
            self.events.push_back(SseEvent::Done);
            return;
        }

        let payload: StreamPayload = match serde_json::from_str(data) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(error = %e, "skipping unparsable stream line");
                return;
            }
        };
        if let Some(error) = payload.error {
            self.events.push_back(SseEvent::Error(error.message));
            return;
        }
        if let Some(choice) = payload.choices.into_iter().next() {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                self.events.push_back(SseEvent::Delta(content));
            }
            if choice.finish_reason.is_some() {
                self.events.push_back(SseEvent::Done);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(decoder: &mut SseDecoder) -> Vec<SseEvent> {
        std::iter::from_fn(|| decoder.next_event()).collect()
    }

    #[test]
    fn decodes_deltas_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        decoder.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n\ndata: {\"choi");
        assert_eq!(drain(&mut decoder), vec![SseEvent::Delta("He".into())]);

        decoder.push(b"ces\":[{\"delta\":{\"content\":\"llo\"}}]}\n");
        decoder.push(b"data: [DONE]\n");
        assert_eq!(
            drain(&mut decoder),
            vec![SseEvent::Delta("llo".into()), SseEvent::Done]
        );
    }

    #[test]
    fn finish_reason_ends_the_stream() {
        let mut decoder = SseDecoder::default();
        decoder.push(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"!\"},\"finish_reason\":\"stop\"}]}\n",
        );
        assert_eq!(
            drain(&mut decoder),
            vec![SseEvent::Delta("!".into()), SseEvent::Done]
        );
    }

    #[test]
    fn error_payload_and_noise() {
        let mut decoder = SseDecoder::default();
        decoder.push(b": keep-alive\n");
        decoder.push(b"data: not json\n");
        decoder.push(b"data: {\"error\":{\"message\":\"overloaded\"}}\n");
        assert_eq!(
            drain(&mut decoder),
            vec![SseEvent::Error("overloaded".into())]
        );
    }

    fn body(chunks: &[&str]) -> BoxStream<'static, reqwest::Result<Vec<u8>>> {
        let chunks: Vec<reqwest::Result<Vec<u8>>> =
            chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
        stream::iter(chunks).boxed()
    }

    fn snapshots(
        body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
        idle: Duration,
    ) -> SnapshotStream {
        let state = StreamState::streaming(body);
        Box::pin(stream::unfold(state, move |state| next_snapshot(state, idle)))
    }

    #[tokio::test]
    async fn deltas_accumulate_into_snapshots() {
        let chunks = body(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n\ndata: {\"choices\":[{\"delta\":",
            "{\"content\":\"llo\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\ndata: [DONE]\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n",
        ]);
        let items: Vec<_> = snapshots(chunks, Duration::from_secs(5)).collect().await;
        let items: Vec<String> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items, vec!["He", "Hello", "Hello there"]);
    }

    #[tokio::test]
    async fn body_ending_without_done_finishes_cleanly() {
        let chunks = body(&["data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n"]);
        let items: Vec<_> = snapshots(chunks, Duration::from_secs(5)).collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_deref().unwrap(), "Hi");
    }

    #[tokio::test]
    async fn stalled_body_times_out_after_idle_gap() {
        let chunks = body(&["data: {\"choices\":[{\"delta\":{\"content\":\"Par\"}}]}\n"])
            .chain(stream::pending())
            .boxed();
        let mut stream = snapshots(chunks, Duration::from_millis(50));

        assert_eq!(stream.next().await.unwrap().unwrap(), "Par");
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, GenerationError::Timeout(_)));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn stream_error_payload_ends_with_error() {
        let chunks = body(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
            "data: {\"error\":{\"message\":\"overloaded\"}}\n",
        ]);
        let items: Vec<_> = snapshots(chunks, Duration::from_secs(5)).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[1], Err(GenerationError::Stream(m)) if m == "overloaded"));
    }

    #[tokio::test]
    async fn disabled_generator_fails() {
        let generator = DisabledGenerator;
        let mut stream = generator.generate(GenerationRequest {
            system_instruction: String::new(),
            prompt: "User: hi".into(),
        });
        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(GenerationError::Disabled)));
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn provider_selection() {
        let config = GeneratorConfig::default();
        assert_eq!(create_generator(&config).unwrap().name(), "disabled");

        let config = GeneratorConfig {
            provider: "ollama".into(),
            model: Some("llama3".into()),
            api_key_env: "PAGEWISE_TEST_UNSET_KEY".into(),
            ..GeneratorConfig::default()
        };
        assert_eq!(create_generator(&config).unwrap().name(), "ollama");

        let config = GeneratorConfig {
            provider: "mystery".into(),
            ..GeneratorConfig::default()
        };
        assert!(create_generator(&config).is_err());
    }
}
