use agora_core::collaborators::{FactVerifier, VerificationReport};
use agora_core::errors::VerificationError;
use async_trait::async_trait;

const HEDGES: [&str; 6] = ["maybe", "perhaps", "i think", "probably", "might", "possibly"];
const ABSOLUTES: [&str; 4] = ["always", "never", "everyone", "nobody"];

/// Offline verifier that scores a statement by its wording.
///
/// Hedged or sweeping statements lose confidence; plain declarative ones keep
/// the base score. It never cites sources.
#[derive(Clone, Copy, Debug)]
pub struct HeuristicVerifier {
    base: f64,
    penalty: f64,
}

impl Default for HeuristicVerifier {
    fn default() -> Self {
        Self {
            base: 0.85,
            penalty: 0.15,
        }
    }
}

impl HeuristicVerifier {
    /// Confidence for `statement` in `[0, 1]`.
    pub fn score(&self, statement: &str) -> f64 {
        let lower = statement.to_lowercase();
        let hits = HEDGES
            .iter()
            .chain(ABSOLUTES.iter())
            .filter(|w| lower.contains(*w))
            .count();
        let question = usize::from(lower.trim_end().ends_with('?'));
        let penalties = f64::from(u32::try_from(hits + question).unwrap_or(u32::MAX));
        (self.base - self.penalty * penalties).clamp(0.0, 1.0)
    }
}

#[async_trait]
impl FactVerifier for HeuristicVerifier {
    async fn verify(&self, statement: &str) -> Result<VerificationReport, VerificationError> {
        if statement.trim().is_empty() {
            return Err(VerificationError::Malformed("empty statement".into()));
        }
        Ok(VerificationReport {
            confidence: self.score(statement),
            sources: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_statement_keeps_base() {
        let v = HeuristicVerifier::default();
        assert!((v.score("Berlin is the capital of Germany.") - 0.85).abs() < 1e-9);
    }

    #[test]
    fn hedges_lower_confidence_below_threshold() {
        let v = HeuristicVerifier::default();
        assert!(v.score("Maybe it is probably Bonn.") < 0.7);
    }

    #[test]
    fn score_is_clamped() {
        let v = HeuristicVerifier::default();
        let s = "maybe perhaps i think probably might possibly always never everyone nobody?";
        assert!(v.score(s).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn empty_statement_is_malformed() {
        assert!(HeuristicVerifier::default().verify("  ").await.is_err());
    }
}
