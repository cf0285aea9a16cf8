pub mod proof;
pub mod types;
pub mod validator;

pub use proof::{proof_backend, ClaimedValidity, LeadingZeroTarget, ProofOfWork};
pub use types::{RejectReason, ShareValidation, Submission};
pub use validator::SubmissionValidator;
