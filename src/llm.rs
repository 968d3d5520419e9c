//! Language model clients.
//!
//! [`OpenAIChatModel`] talks to any OpenAI-compatible
//! `POST /chat/completions` endpoint, either in one shot or as a
//! server-sent event stream (`data: {json}` lines ending with
//! `data: [DONE]`). A stream that ends without `[DONE]` is reported as a
//! generation failure so a truncated answer is never mistaken for a
//! complete one.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use ragline_core::assemble::PromptMessage;
use ragline_core::generate::{FragmentStream, LanguageModel};
use ragline_core::{Error, Result};

use crate::config::LlmConfig;
use crate::http;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";

/// Model used when `llm.provider = "disabled"`.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[PromptMessage]) -> Result<String> {
        Err(disabled())
    }

    async fn stream(&self, _messages: &[PromptMessage]) -> Result<FragmentStream> {
        Err(disabled())
    }
}

fn disabled() -> Error {
    Error::generation("LLM provider is disabled; set [llm] provider in the config")
}

/// Chat completions client for OpenAI and compatible servers.
pub struct OpenAIChatModel {
    client: reqwest::Client,
    api_key: Option<String>,
    url: String,
    model: String,
    temperature: f32,
    max_context_tokens: Option<usize>,
}

impl OpenAIChatModel {
    /// `OPENAI_API_KEY` is required for the default endpoint; a custom
    /// `llm.url` may run without one.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok();
        if api_key.is_none() && config.url.is_none() {
            return Err(Error::config("OPENAI_API_KEY environment variable not set"));
        }
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string());

        Ok(Self {
            client: http::client(config.timeout_secs)?,
            api_key,
            url: url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_context_tokens: config.max_context_tokens,
        })
    }

    fn request_body(&self, messages: &[PromptMessage], stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": stream,
        })
    }

    async fn send(&self, messages: &[PromptMessage], stream: bool) -> Result<reqwest::Response> {
        let endpoint = format!("{}/chat/completions", self.url);
        let mut request = self
            .client
            .post(&endpoint)
            .json(&self.request_body(messages, stream));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::generation(http::describe_transport("LLM", &endpoint, &e)))?;

        if !response.status().is_success() {
            let (message, _) = http::describe_failure("LLM", response).await;
            return Err(Error::generation(message));
        }
        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn max_context_tokens(&self) -> Option<usize> {
        self.max_context_tokens
    }

    async fn complete(&self, messages: &[PromptMessage]) -> Result<String> {
        let response = self.send(messages, false).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::generation(format!("Invalid LLM response: {}", e)))?;
        parse_completion(&json)
    }

    async fn stream(&self, messages: &[PromptMessage]) -> Result<FragmentStream> {
        let response = self.send(messages, true).await?;
        let state = StreamState {
            bytes: response
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()))
                .boxed(),
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            finished: false,
        };

        let fragments = futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, state));
                }
                if state.finished {
                    return None;
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => state.absorb(&chunk),
                    Some(Err(e)) => {
                        let message = format!("stream interrupted: {}", e);
                        state.pending.push_back(Err(Error::generation(message)));
                        state.finished = true;
                    }
                    None => {
                        state.pending.push_back(Err(Error::generation(
                            "stream ended before the completion marker",
                        )));
                        state.finished = true;
                    }
                }
            }
        });

        Ok(fragments.boxed())
    }
}

struct StreamState {
    bytes: futures::stream::BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String>>,
    finished: bool,
}

impl StreamState {
    fn absorb(&mut self, chunk: &[u8]) {
        for event in self.decoder.push(chunk) {
            match event {
                SseEvent::Done => {
                    self.finished = true;
                    return;
                }
                SseEvent::Data(data) => match parse_delta(&data) {
                    Ok(Some(fragment)) => self.pending.push_back(Ok(fragment)),
                    Ok(None) => {}
                    Err(e) => {
                        self.pending.push_back(Err(e));
                        self.finished = true;
                        return;
                    }
                },
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    Done,
}

/// Incremental server-sent events decoder.
///
/// Bytes may arrive split anywhere, including inside a UTF-8 sequence;
/// only complete lines are decoded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                events.push(SseEvent::Done);
            } else {
                events.push(SseEvent::Data(data.to_string()));
            }
        }

        events
    }
}

/// Text carried by one streamed chunk, if any.
fn parse_delta(data: &str) -> Result<Option<String>> {
    let json: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| Error::generation(format!("malformed stream event: {}", e)))?;
    if let Some(err) = json.get("error") {
        return Err(Error::generation(format!("LLM stream error: {}", err)));
    }
    Ok(json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_string))
}

fn parse_completion(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::generation("Invalid LLM response: missing choices[0].message.content")
        })
}

/// Create the [`LanguageModel`] named by `config.provider`.
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" => Ok(Arc::new(OpenAIChatModel::new(config)?)),
        other => Err(Error::config(format!("Unknown llm provider: {}", other))),
    }
}
