use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::proof::ProofOfWork;
use super::types::{RejectReason, ShareValidation, Submission};
use crate::database::{Round, ShareLedger};
use crate::error::Result;

/// Orchestrates input sanitation, duplicate detection and the pluggable proof check.
pub struct SubmissionValidator {
    ledger: Arc<dyn ShareLedger>,
    proof: Arc<dyn ProofOfWork>,
}

impl SubmissionValidator {
    pub fn new(ledger: Arc<dyn ShareLedger>, proof: Arc<dyn ProofOfWork>) -> Self {
        Self { ledger, proof }
    }

    pub fn proof_name(&self) -> &'static str {
        self.proof.name()
    }

    /// Fails with `MalformedSubmission`; nothing here touches the ledger.
    pub fn sanitize(&self, body: &Value) -> Result<Submission> {
        Submission::from_json(body)
    }

    /// Classifies a sanitized submission made against `round_number`, using the
    /// parameters of the current round.
    ///
    /// Callers must hold the ledger write gate across this call and the
    /// following append, or two copies of one submission can both pass as new.
    pub async fn validate(
        &self,
        submission: &Submission,
        round_number: u64,
        current: &Round,
    ) -> Result<ShareValidation> {
        if self.is_duplicate(submission, round_number).await? {
            debug!(
                "Duplicate submission {} from {} in round {}",
                submission.submission_id, submission.worker_id, round_number
            );
            return Ok(ShareValidation::rejected(RejectReason::Duplicate));
        }

        if !self.proof.verify(submission, current.target_difficulty) {
            debug!(
                "Proof check '{}' rejected submission {} from {}",
                self.proof.name(),
                submission.submission_id,
                submission.worker_id
            );
            return Ok(ShareValidation::rejected(RejectReason::ProofRejected));
        }

        Ok(ShareValidation::accepted())
    }

    async fn is_duplicate(&self, submission: &Submission, round_number: u64) -> Result<bool> {
        self.ledger
            .contains_submission(round_number, &submission.worker_id, &submission.submission_id)
            .await
    }
}
