use std::sync::Arc;

use tracing::debug;

use super::types::Submission;
use crate::config::ProofBackend;

/// Proof-of-work check supplied by the hashing backend.
pub trait ProofOfWork: Send + Sync {
    fn name(&self) -> &'static str;

    fn verify(&self, submission: &Submission, target_difficulty: f64) -> bool;
}

/// Accepts whatever the worker claims; a missing `valid` flag counts as valid.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClaimedValidity;

impl ProofOfWork for ClaimedValidity {
    fn name(&self) -> &'static str {
        "claimed"
    }

    fn verify(&self, submission: &Submission, _target_difficulty: f64) -> bool {
        submission.claimed_valid.unwrap_or(true)
    }
}

/// Treats the hash as hex and requires `ceil(log2(target))` leading zero bits.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeadingZeroTarget;

impl LeadingZeroTarget {
    pub fn required_bits(target_difficulty: f64) -> u32 {
        if target_difficulty <= 1.0 {
            0
        } else {
            target_difficulty.log2().ceil() as u32
        }
    }

    pub fn leading_zero_bits(bytes: &[u8]) -> u32 {
        let mut bits = 0u32;
        for byte in bytes {
            if *byte == 0 {
                bits += 8;
            } else {
                bits += byte.leading_zeros();
                break;
            }
        }
        bits
    }
}

impl ProofOfWork for LeadingZeroTarget {
    fn name(&self) -> &'static str {
        "leading-zeros"
    }

    fn verify(&self, submission: &Submission, target_difficulty: f64) -> bool {
        let digits = submission.hash.trim_start_matches("0x");
        let bytes = match hex::decode(digits) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Hash from {} is not hex: {}", submission.worker_id, e);
                return false;
            }
        };
        Self::leading_zero_bits(&bytes) >= Self::required_bits(target_difficulty)
    }
}

pub fn proof_backend(kind: ProofBackend) -> Arc<dyn ProofOfWork> {
    match kind {
        ProofBackend::Claimed => Arc::new(ClaimedValidity),
        ProofBackend::LeadingZeros => Arc::new(LeadingZeroTarget),
    }
}
