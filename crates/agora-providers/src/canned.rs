use agora_core::collaborators::{ReplyContext, ReplyGenerator};
use agora_core::errors::ReplyError;
use async_trait::async_trait;

const OPENERS: [&str; 4] = [
    "From the perspective of {field}, ",
    "Speaking as someone who works in {field}, ",
    "Looking at this through {field}, ",
    "In {field} we would frame it like this: ",
];

const BODIES: [&str; 4] = [
    "the question \"{prompt}\" deserves a careful look at the evidence before we answer it.",
    "I would separate what is established from what is still debated about \"{prompt}\".",
    "the short answer to \"{prompt}\" depends on which definitions we agree on first.",
    "\"{prompt}\" is a good prompt; the most reliable sources point in a fairly clear direction.",
];

/// Reply shown when every other generator failed.
pub const FALLBACK_REPLY: &str =
    "I need a moment to gather my thoughts on that. Could you rephrase or add a detail?";

/// Deterministic placeholder replies, used when no reply endpoint is configured.
///
/// The same (expert, prompt) pair always yields the same text.
#[derive(Clone, Copy, Debug, Default)]
pub struct CannedReplyGenerator;

impl CannedReplyGenerator {
    /// Build the reply text without going through the async trait.
    pub fn compose(prompt: &str, context: &ReplyContext) -> String {
        let field = context
            .expert
            .expertise
            .first()
            .map_or("my field", String::as_str);
        let seed = context
            .expert
            .id
            .bytes()
            .chain(prompt.bytes())
            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(usize::from(b)));
        let opener = OPENERS[seed % OPENERS.len()].replace("{field}", field);
        let body = BODIES[(seed / OPENERS.len()) % BODIES.len()].replace("{prompt}", prompt.trim());
        format!("{opener}{body}")
    }
}

#[async_trait]
impl ReplyGenerator for CannedReplyGenerator {
    async fn generate_reply(
        &self,
        prompt: &str,
        context: &ReplyContext,
    ) -> Result<String, ReplyError> {
        Ok(Self::compose(prompt, context))
    }
}
