use std::sync::Arc;

use agora_core::collaborators::{ReplyContext, ReplyGenerator};
use agora_core::errors::ReplyError;
use async_trait::async_trait;
use tracing::warn;

use crate::canned::FALLBACK_REPLY;

/// Wraps a generator so that failures turn into a canned reply.
///
/// `generate_reply` on this type never returns an error.
pub struct FallbackReplyGenerator {
    inner: Arc<dyn ReplyGenerator>,
    fallback: String,
}

impl FallbackReplyGenerator {
    /// Wrap `inner` with the default fallback text.
    pub fn new(inner: Arc<dyn ReplyGenerator>) -> Self {
        Self {
            inner,
            fallback: FALLBACK_REPLY.to_string(),
        }
    }

    /// Use a custom fallback text.
    #[must_use]
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }
}

#[async_trait]
impl ReplyGenerator for FallbackReplyGenerator {
    async fn generate_reply(
        &self,
        prompt: &str,
        context: &ReplyContext,
    ) -> Result<String, ReplyError> {
        match self.inner.generate_reply(prompt, context).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                warn!(
                    expert = %context.expert.id,
                    error = %e,
                    "reply generation failed, using fallback"
                );
                Ok(self.fallback.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::model::Participant;

    struct Broken;

    #[async_trait]
    impl ReplyGenerator for Broken {
        async fn generate_reply(&self, _: &str, _: &ReplyContext) -> Result<String, ReplyError> {
            Err(ReplyError::Request("connection refused".into()))
        }
    }

    struct Echo;

    #[async_trait]
    impl ReplyGenerator for Echo {
        async fn generate_reply(
            &self,
            prompt: &str,
            _: &ReplyContext,
        ) -> Result<String, ReplyError> {
            Ok(prompt.to_uppercase())
        }
    }

    fn context() -> ReplyContext {
        ReplyContext {
            topic: "t".into(),
            expert: Participant::expert("e1", "Critic", ["film"]),
            history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn failure_yields_fallback() {
        let generator = FallbackReplyGenerator::new(Arc::new(Broken));
        assert_eq!(generator.generate_reply("hi", &context()).await.unwrap(), FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn custom_fallback_text() {
        let generator = FallbackReplyGenerator::new(Arc::new(Broken)).with_fallback("…");
        assert_eq!(generator.generate_reply("hi", &context()).await.unwrap(), "…");
    }

    #[tokio::test]
    async fn success_passes_through() {
        let generator = FallbackReplyGenerator::new(Arc::new(Echo));
        assert_eq!(generator.generate_reply("hi", &context()).await.unwrap(), "HI");
    }
}
