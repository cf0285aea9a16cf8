use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::database::Round;
use crate::error::{CoordinatorError, Result};

/// Parameters installed by a round advance.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RoundParameters {
    pub target_difficulty: f64,
}

/// Holds the active round. Process-lifetime state; the coordinator decides
/// whether to mirror it into the ledger.
pub struct RoundManager {
    current: RwLock<Round>,
}

impl RoundManager {
    pub fn new(initial: Round) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    pub async fn current(&self) -> Round {
        self.current.read().await.clone()
    }

    /// Moves to the next round number with new parameters. The round is
    /// unchanged when the parameters are rejected.
    pub async fn advance(&self, params: RoundParameters) -> Result<Round> {
        if !params.target_difficulty.is_finite() || params.target_difficulty <= 0.0 {
            return Err(CoordinatorError::InvalidParameters(format!(
                "target difficulty must be positive, got {}",
                params.target_difficulty
            )));
        }

        let mut current = self.current.write().await;
        let next = Round::new(current.round_number + 1, params.target_difficulty);
        *current = next.clone();

        info!(
            "Advanced to round {} (target difficulty {})",
            next.round_number, next.target_difficulty
        );
        Ok(next)
    }
}
