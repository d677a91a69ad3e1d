use crate::oracle::{Oracle, OracleReply, OracleRequest};
use braid_core::{BraidError, BraidResult};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Retry behaviour for oracle consultations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt before the agent fails.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Cap for the exponential backoff.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    250
}

fn default_backoff_max_ms() -> u64 {
    10_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryPolicy {
    /// No retries and no delay.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }
}

/// Configuration and validation errors will not go away on retry.
pub fn is_retryable(err: &BraidError) -> bool {
    !matches!(
        err,
        BraidError::Validation(_) | BraidError::Config(_) | BraidError::AccessDenied { .. }
    )
}

pub(crate) fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> u64 {
    let delay = policy
        .backoff_base_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    delay.min(policy.backoff_max_ms)
}

/// Consults the oracle, retrying transient failures with exponential backoff.
///
/// The final error is always reported as [`BraidError::OracleCallFailed`].
pub async fn consult_with_retry(
    oracle: &dyn Oracle,
    request: &OracleRequest,
    policy: &RetryPolicy,
) -> BraidResult<OracleReply> {
    let mut last_err: Option<BraidError> = None;

    for attempt in 0..=policy.max_retries {
        match oracle.consult(request).await {
            Ok(reply) => return Ok(reply),
            Err(e) => {
                if !is_retryable(&e) {
                    warn!(agent = %request.agent_id, error = %e, "Non-retryable oracle error");
                    last_err = Some(e);
                    break;
                }
                if attempt < policy.max_retries {
                    let delay = compute_backoff(policy, attempt);
                    info!(
                        agent = %request.agent_id,
                        attempt,
                        delay_ms = delay,
                        error = %e,
                        "Oracle call failed, backing off"
                    );
                    if delay > 0 {
                        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    }
                }
                last_err = Some(e);
            }
        }
    }

    Err(match last_err {
        Some(BraidError::OracleCallFailed(msg)) => BraidError::OracleCallFailed(msg),
        Some(other) => BraidError::OracleCallFailed(other.to_string()),
        None => BraidError::OracleCallFailed("oracle retries exhausted".into()),
    })
}
