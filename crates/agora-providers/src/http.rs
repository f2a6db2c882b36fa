//! HTTP-backed providers.
//!
//! [`HttpReplyGenerator`] speaks the chat-completions request shape;
//! [`HttpFactVerifier`] posts `{statement}` and expects
//! `{confidence, sources}` back.

use std::time::Duration;

use agora_core::collaborators::{FactVerifier, ReplyContext, ReplyGenerator, VerificationReport};
use agora_core::errors::{ReplyError, VerificationError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

const ERROR_BODY_LIMIT: usize = 512;

/// Timeouts shared by both HTTP providers.
#[derive(Clone, Copy, Debug)]
pub struct HttpTimeouts {
    /// TCP connect timeout.
    pub connect: Duration,
    /// Whole-request timeout.
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            request: Duration::from_secs(30),
        }
    }
}

fn build_client(timeouts: HttpTimeouts) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.request)
        .build()
}

fn truncate(mut body: String) -> String {
    if body.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

// ─────────────────────────────────────────────────────────────────────────────
// Reply generation
// ─────────────────────────────────────────────────────────────────────────────

/// Reply generator calling a chat-completions style endpoint.
pub struct HttpReplyGenerator {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl HttpReplyGenerator {
    /// Create a generator for `endpoint` using `model`.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeouts: HttpTimeouts,
    ) -> Result<Self, ReplyError> {
        let client = build_client(timeouts).map_err(|e| ReplyError::Request(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
        })
    }

    fn system_prompt(context: &ReplyContext) -> String {
        let expertise = if context.expert.expertise.is_empty() {
            "general knowledge".to_string()
        } else {
            context.expert.expertise.join(", ")
        };
        format!(
            "You are {}, an expert in {expertise}, taking part in a debate about \"{}\". \
             Answer concisely and stay in character.",
            context.expert.name, context.topic
        )
    }
}

#[async_trait]
impl ReplyGenerator for HttpReplyGenerator {
    #[instrument(skip_all, fields(expert = %context.expert.id, model = %self.model))]
    async fn generate_reply(
        &self,
        prompt: &str,
        context: &ReplyContext,
    ) -> Result<String, ReplyError> {
        let system = Self::system_prompt(context);
        let mut messages = vec![ChatMessage { role: "system", content: &system }];
        for message in &context.history {
            let role = if message.sender_id == context.expert.id { "assistant" } else { "user" };
            messages.push(ChatMessage { role, content: &message.content });
        }
        messages.push(ChatMessage { role: "user", content: prompt });

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "model": self.model, "messages": messages }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ReplyError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReplyError::Status {
                status: status.as_u16(),
                body: truncate(body),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ReplyError::Malformed(e.to_string()))?;
        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ReplyError::Malformed("response has no content".into()))?;
        debug!(chars = reply.len(), "reply generated");
        Ok(reply)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Verification
// ─────────────────────────────────────────────────────────────────────────────

/// Fact verifier calling a JSON endpoint.
pub struct HttpFactVerifier {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl HttpFactVerifier {
    /// Create a verifier for `endpoint`.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeouts: HttpTimeouts,
    ) -> Result<Self, VerificationError> {
        let client =
            build_client(timeouts).map_err(|e| VerificationError::Provider(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            request_timeout: timeouts.request,
        })
    }
}

#[async_trait]
impl FactVerifier for HttpFactVerifier {
    #[instrument(skip_all, fields(chars = statement.len()))]
    async fn verify(&self, statement: &str) -> Result<VerificationReport, VerificationError> {
        let mut request = self.client.post(&self.endpoint).json(&json!({ "statement": statement }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                let millis = u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX);
                VerificationError::Timeout(millis)
            } else {
                VerificationError::Provider(e.to_string())
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VerificationError::Provider(format!(
                "status {}: {}",
                status.as_u16(),
                truncate(body)
            )));
        }
        let report: VerificationReport = response
            .json()
            .await
            .map_err(|e| VerificationError::Malformed(e.to_string()))?;
        if !(0.0..=1.0).contains(&report.confidence) {
            return Err(VerificationError::Malformed(format!(
                "confidence {} outside [0, 1]",
                report.confidence
            )));
        }
        Ok(report)
    }
}
