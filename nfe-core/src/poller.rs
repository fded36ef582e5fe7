//! Bounded, cancellable polling of a batch receipt.
use crate::api::{ReceiptStatus, SefazClient, SefazError, SubmissionResult, Transport};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Api(#[from] SefazError),
    #[error("receipt still processing after {attempts} attempts")]
    Timeout { attempts: u32 },
    #[error("polling cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Terminal outcome of a poll. A rejection is a business answer, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Accepted(SubmissionResult),
    Rejected(SubmissionResult),
}

impl PollOutcome {
    pub fn result(&self) -> &SubmissionResult {
        match self {
            PollOutcome::Accepted(result) | PollOutcome::Rejected(result) => result,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, PollOutcome::Accepted(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    max_attempts: u32,
    interval: Duration,
}

impl PollPolicy {
    /// `max_attempts` below 1 is raised to 1.
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL)
    }
}

/// Re-queries a receipt until it reaches a terminal status.
///
/// # Examples
/// ```rust,no_run
/// use nfe_core::api::SefazClient;
/// use nfe_core::config::Config;
/// use nfe_core::poller::StatusPoller;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let client = SefazClient::new(Config::default())?;
/// let outcome = StatusPoller::new(&client)
///     .poll("411000012345678", &CancellationToken::new())
///     .await?;
/// println!("{}", outcome.result().status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StatusPoller<'a, T> {
    client: &'a SefazClient<T>,
    policy: PollPolicy,
}

impl<'a, T: Transport> StatusPoller<'a, T> {
    /// Poller using the client's configured policy.
    pub fn new(client: &'a SefazClient<T>) -> Self {
        Self {
            client,
            policy: client.config().poll_policy(),
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Poll `receipt` until it is authorized or rejected.
    ///
    /// `attempts` in the errors counts queries issued, so a token cancelled
    /// up front reports 0. There is no wait after the last attempt.
    ///
    /// # Errors
    /// [`PollError::Api`] aborts on the first failing query;
    /// [`PollError::Timeout`] when every attempt answered "processing";
    /// [`PollError::Cancelled`] when `cancel` fires during a query or a wait.
    pub async fn poll(
        &self,
        receipt: &str,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome, PollError> {
        let max_attempts = self.policy.max_attempts();
        if cancel.is_cancelled() {
            tracing::warn!(receipt, "polling cancelled before the first query");
            return Err(PollError::Cancelled { attempts: 0 });
        }
        for attempt in 1..=max_attempts {
            tracing::info!(receipt, attempt, max_attempts, "querying receipt");
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!(receipt, attempt, "polling cancelled");
                    return Err(PollError::Cancelled { attempts: attempt });
                }
                result = self.client.query_receipt(receipt) => result?,
            };

            match result.status() {
                ReceiptStatus::Authorized => {
                    tracing::info!(receipt, attempt, "receipt authorized");
                    return Ok(PollOutcome::Accepted(result));
                }
                ReceiptStatus::Rejected => {
                    tracing::info!(
                        receipt,
                        attempt,
                        status_code = result.status_code(),
                        reason = result.reason(),
                        "receipt rejected"
                    );
                    return Ok(PollOutcome::Rejected(result));
                }
                ReceiptStatus::Processing => {}
            }

            if attempt < max_attempts {
                tracing::debug!(receipt, interval = ?self.policy.interval(), "waiting before next query");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::warn!(receipt, attempt, "polling cancelled");
                        return Err(PollError::Cancelled { attempts: attempt });
                    }
                    _ = tokio::time::sleep(self.policy.interval()) => {}
                }
            }
        }

        tracing::warn!(receipt, attempts = max_attempts, "receipt still processing");
        Err(PollError::Timeout {
            attempts: max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_defaults_and_floor() {
        let policy = PollPolicy::default();
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.interval(), Duration::from_secs(5));
        assert_eq!(PollPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }

    #[test]
    fn timeout_and_rejection_read_differently() {
        assert_eq!(
            PollError::Timeout { attempts: 5 }.to_string(),
            "receipt still processing after 5 attempts"
        );
        assert_eq!(
            PollError::Cancelled { attempts: 2 }.to_string(),
            "polling cancelled after 2 attempts"
        );
    }
}
