use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoordinatorError, Result};

pub const REQUIRED_FIELDS: [&str; 5] = [
    "hash",
    "difficulty",
    "block_height",
    "worker_id",
    "submission_id",
];

/// A sanitized worker submission. Only produced by [`Submission::from_json`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub hash: String,
    pub difficulty: f64,
    pub block_height: u64,
    pub worker_id: String,
    pub submission_id: String,
    /// The worker's own opinion of validity, if it sent one.
    pub claimed_valid: Option<bool>,
}

impl Submission {
    /// Checks presence and shape of every field of a raw request body.
    ///
    /// Fields that are absent or `null` count as missing and are reported
    /// together; present fields with the wrong type or range are reported
    /// individually.
    pub fn from_json(body: &Value) -> Result<Self> {
        let fields = body
            .as_object()
            .ok_or_else(|| CoordinatorError::malformed("body", "must be a JSON object"))?;

        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|name| fields.get(*name).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(CoordinatorError::missing(&missing));
        }

        let hash = string_field(fields, "hash")?;
        if hash.is_empty() {
            return Err(CoordinatorError::malformed("hash", "must not be empty"));
        }

        let difficulty = fields["difficulty"]
            .as_f64()
            .ok_or_else(|| CoordinatorError::malformed("difficulty", "must be a number"))?;
        if !difficulty.is_finite() || difficulty < 0.0 {
            return Err(CoordinatorError::malformed(
                "difficulty",
                "must be a finite number >= 0",
            ));
        }

        let block_height = fields["block_height"].as_u64().ok_or_else(|| {
            CoordinatorError::malformed("block_height", "must be a non-negative integer")
        })?;

        let worker_id = string_field(fields, "worker_id")?;
        if worker_id.is_empty() {
            return Err(CoordinatorError::malformed("worker_id", "must not be empty"));
        }
        let submission_id = string_field(fields, "submission_id")?;
        if submission_id.is_empty() {
            return Err(CoordinatorError::malformed("submission_id", "must not be empty"));
        }

        let claimed_valid = match fields.get("valid") {
            None | Some(Value::Null) => None,
            Some(Value::Bool(valid)) => Some(*valid),
            Some(_) => return Err(CoordinatorError::malformed("valid", "must be a boolean")),
        };

        Ok(Self {
            hash,
            difficulty,
            block_height,
            worker_id,
            submission_id,
            claimed_valid,
        })
    }
}

fn string_field(fields: &Map<String, Value>, name: &str) -> Result<String> {
    fields[name]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| CoordinatorError::malformed(name, "must be a string"))
}

/// Why a recorded share was classified invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Duplicate,
    ProofRejected,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Duplicate => "duplicate",
            RejectReason::ProofRejected => "proof_rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareValidation {
    pub is_valid: bool,
    pub reason: Option<RejectReason>,
}

impl ShareValidation {
    pub fn accepted() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    pub fn rejected(reason: RejectReason) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason),
        }
    }
}
