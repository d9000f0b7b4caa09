//*** START FILE: src/pipeline/gateway.rs ***//
//! Alignment provider gateway.
//!
//! A single-attempt boundary around the LLM: one call in, one typed result out.
//! Retries, deadlines and fan-out belong to the orchestrator.

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::parsing::llm_parser::{parse_provider_payload, RawProviderResult};
use crate::parsing::tokenizer::tokenize;
use crate::types::alignment::{AlignmentMethod, VerseReference, WordToken};
use crate::types::language::language_name;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

#[async_trait]
pub trait AlignmentProvider: Send + Sync {
    /// Asks the provider for a translation plus alignment edges for one mode.
    async fn request_alignment(
        &self,
        verse_text: &str,
        reference: &VerseReference,
        target_language: &str,
        mode: AlignmentMethod,
    ) -> Result<RawProviderResult, ProviderError>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Gateway for any OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiGateway {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    max_tokens: u32,
    max_response_bytes: usize,
}

impl OpenAiGateway {
    /// The API key is optional so the gateway can still be built (and report
    /// UNAVAILABLE per call) when no key is configured.
    pub fn new(settings: &ProviderConfig, api_key: Option<String>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, settings, api_key))
    }

    pub(crate) fn with_client(client: Client, settings: &ProviderConfig, api_key: Option<String>) -> Self {
        Self {
            client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            max_response_bytes: settings.max_response_bytes,
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    async fn send(&self, request: &ChatRequest, api_key: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = self.read_body(response).await.unwrap_or_default();
            return Err(classify_status(status, &String::from_utf8_lossy(&body)));
        }
        self.read_body(response).await
    }

    // Chunked replies carry no length, so the ceiling is enforced while reading
    // rather than after buffering the whole body.
    async fn read_body(&self, mut response: reqwest::Response) -> Result<Vec<u8>, ProviderError> {
        if let Some(len) = response.content_length() {
            if len > self.max_response_bytes as u64 {
                return Err(ProviderError::malformed(format!(
                    "response of {} bytes exceeds the {} byte ceiling",
                    len, self.max_response_bytes
                )));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(classify_transport_error)? {
            if body.len() + chunk.len() > self.max_response_bytes {
                return Err(ProviderError::malformed(format!(
                    "response exceeds the {} byte ceiling",
                    self.max_response_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl AlignmentProvider for OpenAiGateway {
    async fn request_alignment(
        &self,
        verse_text: &str,
        reference: &VerseReference,
        target_language: &str,
        mode: AlignmentMethod,
    ) -> Result<RawProviderResult, ProviderError> {
        // No provider can answer well-formed for these, so they fail as MALFORMED_RESPONSE
        // before any network call and are never retried.
        let language = language_name(target_language).ok_or_else(|| {
            ProviderError::malformed(format!("unrecognized language code '{}'", target_language))
        })?;
        let tokens = tokenize(verse_text);
        if tokens.is_empty() {
            return Err(ProviderError::malformed("verse text is empty, nothing to align"));
        }
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::unavailable("no provider API key configured"))?;

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: format!(
                        "You are a multilingual scholar of classical texts. Always answer in {} \
                         and reply with a single JSON object only.",
                        language
                    ),
                },
                ChatMessage { role: "user", content: build_prompt(&tokens, verse_text, reference, language, mode) },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat { r#type: "json_object" },
        };

        let started = Instant::now();
        let body = self.send(&request, api_key).await?;
        debug!(
            reference = %reference,
            language = target_language,
            mode = %mode,
            bytes = body.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "provider replied"
        );

        let chat: ChatResponse = serde_json::from_slice(&body)
            .map_err(|e| ProviderError::malformed(format!("unexpected chat completion shape: {}", e)))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::malformed("chat completion has no message content"))?;

        parse_provider_payload(&content)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

fn classify_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::timeout(format!("provider did not answer in time: {}", e))
    } else if e.is_decode() {
        ProviderError::malformed(format!("could not read provider response: {}", e))
    } else {
        ProviderError::unavailable(format!("provider request failed: {}", e))
    }
}

fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let message = format!("provider returned {}: {}", status, body.chars().take(300).collect::<String>());
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::rate_limited(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::timeout(message),
        _ => ProviderError::unavailable(message),
    }
}

/// Prompt listing the numbered source words so the indices in the reply line up
/// with our own tokenization.
pub fn build_prompt(
    tokens: &[WordToken],
    verse_text: &str,
    reference: &VerseReference,
    language: &str,
    mode: AlignmentMethod,
) -> String {
    let numbered = tokens
        .iter()
        .map(|t| format!("{}:{}", t.index, t.surface))
        .collect::<Vec<_>>()
        .join(" ");

    let style = match mode {
        AlignmentMethod::Literal => format!(
            "Translate the verse LITERALLY into {}: keep the source word order wherever the \
             grammar allows and use the closest dictionary sense of each word.",
            language
        ),
        AlignmentMethod::Dynamic => format!(
            "Translate the verse DYNAMICALLY into {}: natural, idiomatic phrasing is more \
             important than preserving the source word order.",
            language
        ),
    };

    format!(
        "Verse {reference}: \"{verse_text}\"\n\
         Source words (index:word): {numbered}\n\n\
         {style}\n\n\
         Then align every source word to the words of YOUR translation. Number the \
         translation words from 0 after removing punctuation and splitting on spaces.\n\
         Respond with JSON:\n\
         {{\"translation\": \"...\", \"alignments\": [{{\"source_index\": 0, \"source_word\": \"...\", \
         \"target_words\": [\"...\"], \"target_indices\": [0], \"confidence\": 0.0}}]}}\n\
         confidence is between 0.0 and 1.0. Omit source words that have no counterpart."
    )
}

//*** END FILE: src/pipeline/gateway.rs ***//
