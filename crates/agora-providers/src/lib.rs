//! # agora-providers
//!
//! Implementations of the reply generation and fact verification
//! collaborators:
//!
//! - [`HttpReplyGenerator`] / [`HttpFactVerifier`]: `reqwest` clients
//! - [`CannedReplyGenerator`]: deterministic offline replies
//! - [`FallbackReplyGenerator`]: turns generator failures into a canned string
//! - [`HeuristicVerifier`]: offline wording-based confidence

#![deny(unsafe_code)]

mod canned;
mod fallback;
mod heuristic;
mod http;

use std::sync::Arc;
use std::time::Duration;

use agora_core::collaborators::{FactVerifier, ReplyGenerator};
use agora_settings::ProviderSettings;
use tracing::{info, warn};

pub use canned::{CannedReplyGenerator, FALLBACK_REPLY};
pub use fallback::FallbackReplyGenerator;
pub use heuristic::HeuristicVerifier;
pub use http::{HttpFactVerifier, HttpReplyGenerator, HttpTimeouts};

fn timeouts(settings: &ProviderSettings) -> HttpTimeouts {
    HttpTimeouts {
        connect: Duration::from_millis(settings.connect_timeout_ms),
        request: Duration::from_millis(settings.request_timeout_ms),
    }
}

fn api_key(settings: &ProviderSettings) -> Option<String> {
    std::env::var(&settings.api_key_env).ok().filter(|k| !k.is_empty())
}

/// Reply generator described by `settings`, always wrapped in a fallback.
pub fn reply_generator_from_settings(settings: &ProviderSettings) -> Arc<dyn ReplyGenerator> {
    let inner: Arc<dyn ReplyGenerator> = match &settings.reply_endpoint {
        Some(endpoint) => match HttpReplyGenerator::new(
            endpoint.clone(),
            settings.reply_model.clone(),
            api_key(settings),
            timeouts(settings),
        ) {
            Ok(generator) => {
                info!(%endpoint, model = %settings.reply_model, "using HTTP reply generator");
                Arc::new(generator)
            }
            Err(e) => {
                warn!(error = %e, "cannot build HTTP reply generator, using canned replies");
                Arc::new(CannedReplyGenerator)
            }
        },
        None => Arc::new(CannedReplyGenerator),
    };
    Arc::new(FallbackReplyGenerator::new(inner))
}

/// Fact verifier described by `settings`.
pub fn verifier_from_settings(settings: &ProviderSettings) -> Arc<dyn FactVerifier> {
    match &settings.verify_endpoint {
        Some(endpoint) => match HttpFactVerifier::new(
            endpoint.clone(),
            api_key(settings),
            timeouts(settings),
        ) {
            Ok(verifier) => {
                info!(%endpoint, "using HTTP fact verifier");
                Arc::new(verifier)
            }
            Err(e) => {
                warn!(error = %e, "cannot build HTTP verifier, using heuristic verifier");
                Arc::new(HeuristicVerifier::default())
            }
        },
        None => Arc::new(HeuristicVerifier::default()),
    }
}
