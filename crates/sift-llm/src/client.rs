// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::cancel::CancelToken;
use crate::decoder::{ChatStream, DecodeOutcome, DecodeSink, DecoderOptions};
use anyhow::{Context, Result, anyhow, bail};
use reqwest::StatusCode;
use reqwest::blocking::{Client as HttpClient, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Chat-completions transport. One `POST` per exchange; the response body
/// is handed to the decoder as a byte stream.
#[derive(Debug, Clone)]
pub struct Client {
    endpoint: String,
    api_key: String,
    model: String,
    decoder: DecoderOptions,
    http: HttpClient,
}

impl Client {
    /// Only the connect phase is bounded by `connect_timeout`; a streaming
    /// body may stay open as long as the server keeps it open.
    pub fn new(
        endpoint: &str,
        api_key: &str,
        model: &str,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            bail!("api.endpoint must not be empty -- set [api].endpoint in config.toml");
        }
        let parsed = Url::parse(endpoint)
            .with_context(|| format!("api.endpoint {endpoint:?} is not a valid URL"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!(
                "api.endpoint must use http or https, got {:?}",
                parsed.scheme()
            );
        }
        if model.trim().is_empty() {
            bail!("api.model must not be empty -- set [api].model in config.toml");
        }

        let http = HttpClient::builder()
            .connect_timeout(connect_timeout)
            .timeout(None::<Duration>)
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            endpoint: endpoint.to_owned(),
            api_key: api_key.trim().to_owned(),
            model: model.trim().to_owned(),
            decoder: DecoderOptions::default(),
            http,
        })
    }

    pub fn with_decoder_options(mut self, options: DecoderOptions) -> Self {
        self.decoder = options;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: &str) {
        self.model = model.to_owned();
    }

    pub fn decoder_options(&self) -> DecoderOptions {
        self.decoder
    }

    /// Sends `messages` with `stream: true` and returns the raw response
    /// once the status is known to be successful.
    pub fn send(&self, messages: &[Message]) -> Result<Response> {
        let request = ChatRequest::new(&self.model, messages);
        let mut builder = self.http.post(&self.endpoint).json(&request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        debug!(
            endpoint = %self.endpoint,
            model = %self.model,
            messages = messages.len(),
            "sending chat request"
        );

        let response = builder.send().map_err(|error| {
            error!(endpoint = %self.endpoint, %error, "chat request failed");
            connection_error(&self.endpoint, error)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            error!(endpoint = %self.endpoint, status = status.as_u16(), "chat request rejected");
            return Err(clean_error_response(status, &body));
        }
        Ok(response)
    }

    pub fn chat_stream(
        &self,
        messages: &[Message],
        cancel: &CancelToken,
    ) -> Result<ChatStream<Response>> {
        let response = self.send(messages)?;
        Ok(ChatStream::new(response, self.decoder, cancel.clone()))
    }

    /// Transport failures before the body starts are returned as errors;
    /// anything after that is reported through `sink`.
    pub fn stream_chat<S: DecodeSink + ?Sized>(
        &self,
        messages: &[Message],
        sink: &mut S,
        cancel: &CancelToken,
    ) -> Result<DecodeOutcome> {
        Ok(self.chat_stream(messages, cancel)?.decode_into(sink))
    }
}

fn connection_error(endpoint: &str, error: reqwest::Error) -> anyhow::Error {
    anyhow!(
        "cannot reach {} -- check [api].endpoint and your network ({})",
        endpoint,
        error
    )
}

fn clean_error_response(status: StatusCode, body: &str) -> anyhow::Error {
    let reason = status.canonical_reason().unwrap_or("unknown status");
    if let Ok(parsed) = serde_json::from_str::<OpenAIErrorEnvelope>(body)
        && let Some(error) = parsed.error
        && !error.message.is_empty()
    {
        return anyhow!(
            "API request failed: {} {}: {}",
            status.as_u16(),
            reason,
            error.message
        );
    }

    if !body.is_empty() && body.len() < 100 && !body.contains('{') {
        return anyhow!(
            "API request failed: {} {}: {}",
            status.as_u16(),
            reason,
            body.trim()
        );
    }

    anyhow!("API request failed: {} {}", status.as_u16(), reason)
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

impl<'a> ChatRequest<'a> {
    fn new(model: &'a str, messages: &'a [Message]) -> Self {
        Self {
            model,
            messages: messages
                .iter()
                .map(|message| ChatMessage {
                    role: message.role.as_str(),
                    content: &message.content,
                })
                .collect(),
            stream: true,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorEnvelope {
    error: Option<OpenAIErrorBody>,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorBody {
    message: String,
}
