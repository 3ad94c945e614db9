//! Verification Service Adapter
//!
//! Stateless: every call builds its own prompt and parses its own reply.

use super::{
    build_prompt, parse_response, MappingJudgment, VerificationService, VerifyError, VerifyResult,
};
use crate::candidate::MappingCandidate;
use crate::retry::RetryPolicy;
use std::sync::Arc;
use tracing::{debug, warn};

/// Schema-validation attempts per candidate: the normal prompt, then the strict one
const PARSE_ATTEMPTS: usize = 2;

pub struct VerificationAdapter {
    service: Arc<dyn VerificationService>,
    retry: RetryPolicy,
}

impl VerificationAdapter {
    pub fn new(service: Arc<dyn VerificationService>) -> Self {
        Self {
            service,
            retry: RetryPolicy::default(),
        }
    }

    /// Retry policy for transport failures
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Judge one candidate pair
    pub async fn judge(&self, candidate: &MappingCandidate) -> VerifyResult<MappingJudgment> {
        self.judge_counted(candidate).await.0
    }

    /// Judge one candidate pair, also returning every retry spent on it
    /// (transport and parse) whether or not a judgment came out.
    pub async fn judge_counted(
        &self,
        candidate: &MappingCandidate,
    ) -> (VerifyResult<MappingJudgment>, usize) {
        let mut transport_retries = 0;
        let mut last_reason = String::new();

        for attempt in 0..PARSE_ATTEMPTS {
            let prompt = build_prompt(candidate, attempt > 0);
            let (reply, attempts) = self
                .retry
                .run(|| self.service.complete(&prompt), VerifyError::is_transient)
                .await;
            transport_retries += attempts - 1;
            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => return (Err(e), transport_retries + attempt),
            };

            match parse_response(&reply) {
                Ok(parsed) => {
                    if parsed.clamped {
                        warn!(
                            source = %candidate.source.id,
                            target = %candidate.target.id,
                            "verifier confidence out of range, clamped"
                        );
                    }
                    debug!(
                        source = %candidate.source.id,
                        target = %candidate.target.id,
                        kind = %parsed.kind,
                        confidence = parsed.confidence,
                        "candidate judged"
                    );
                    let judgment = MappingJudgment {
                        source: candidate.source.id.clone(),
                        target: candidate.target.id.clone(),
                        kind: parsed.kind,
                        confidence: parsed.confidence,
                        rationale: parsed.rationale,
                        low_trust: parsed.clamped,
                        verifier: self.service.identity(),
                        similarity: candidate.similarity,
                        similarity_category: candidate.category,
                        parse_retries: attempt,
                        transport_retries,
                    };
                    let retries = judgment.retries();
                    return (Ok(judgment), retries);
                }
                Err(reason) => {
                    warn!(
                        source = %candidate.source.id,
                        target = %candidate.target.id,
                        attempt = attempt + 1,
                        reason = %reason,
                        "verifier reply rejected"
                    );
                    last_reason = reason;
                }
            }
        }

        let error = VerifyError::Parse {
            attempts: PARSE_ATTEMPTS,
            reason: last_reason,
        };
        (Err(error), transport_retries + PARSE_ATTEMPTS - 1)
    }
}
