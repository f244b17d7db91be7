use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::{Payment, PaymentIndex};
use crate::config::PollConfig;
use crate::error::{WalletError, WalletResult};
use crate::node::NodeApi;

/// Exponential backoff: `initial`, then multiplied each step, capped at `max`.
#[derive(Clone, Debug)]
pub struct Backoff {
    next: Duration,
    multiplier: u32,
    max: Duration,
}

impl Backoff {
    pub fn new(config: &PollConfig) -> Self {
        Self {
            next: config.initial_backoff.min(config.max_backoff),
            multiplier: config.backoff_multiplier.max(1),
            max: config.max_backoff,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = current
            .checked_mul(self.multiplier)
            .unwrap_or(self.max)
            .min(self.max);
        Some(current)
    }
}

enum PollState {
    Waiting(Duration),
    Checking,
    Terminal(Payment),
    TimedOut,
}

/// Polls the node for one payment until it completes, fails, or the deadline
/// passes. Talks to the node directly and never writes the local store.
#[derive(Clone)]
pub struct CompletionPoller {
    node: Arc<dyn NodeApi>,
    config: PollConfig,
}

impl CompletionPoller {
    pub fn new(node: Arc<dyn NodeApi>, config: PollConfig) -> Self {
        Self { node, config }
    }

    pub fn check_timeout(&self, timeout: Duration) -> WalletResult<()> {
        if timeout.is_zero() {
            return Err(WalletError::invalid_argument("timeout must be > 0"));
        }
        if timeout > self.config.max_timeout {
            return Err(WalletError::invalid_argument(format!(
                "timeout {}s exceeds the maximum of {}s",
                timeout.as_secs_f64(),
                self.config.max_timeout.as_secs()
            )));
        }
        Ok(())
    }

    /// Uses the tokio clock, so a paused runtime drives it deterministically.
    /// A check still in flight at the deadline is abandoned. Dropping the
    /// future stops polling.
    pub async fn wait_for_completion(
        &self,
        index: &PaymentIndex,
        timeout: Duration,
    ) -> WalletResult<Payment> {
        self.config
            .validate()
            .map_err(|e| WalletError::invalid_argument(format!("{e:#}")))?;
        self.check_timeout(timeout)?;

        let start = Instant::now();
        let deadline = start + timeout;
        let mut backoff = Backoff::new(&self.config);
        // Transport errors only surface if the node never answered at all.
        let mut answered = false;
        let mut last_err: Option<WalletError> = None;
        let mut state = PollState::Checking;

        loop {
            state = match state {
                PollState::Waiting(delay) => {
                    tokio::time::sleep(delay).await;
                    PollState::Checking
                }
                PollState::Checking => {
                    match tokio::time::timeout_at(deadline, self.check_once(index)).await {
                        Err(_elapsed) => {
                            tracing::warn!(%index, "payment status check still pending at deadline");
                            PollState::TimedOut
                        }
                        Ok(Ok(Some(payment))) => PollState::Terminal(payment),
                        Ok(Ok(None)) => {
                            answered = true;
                            next_wait(deadline, &mut backoff)
                        }
                        Ok(Err(e @ WalletError::RemoteUnavailable(_))) => {
                            tracing::warn!(%index, error = %e, "payment status check failed; retrying");
                            last_err = Some(e);
                            next_wait(deadline, &mut backoff)
                        }
                        Ok(Err(e)) => return Err(e),
                    }
                }
                PollState::Terminal(payment) => {
                    tracing::info!(%index, status = %payment.status, "payment finalized");
                    return Ok(payment);
                }
                PollState::TimedOut => {
                    if !answered && let Some(err) = last_err {
                        return Err(err);
                    }
                    return Err(WalletError::Timeout {
                        payment_index: index.to_string(),
                        elapsed: start.elapsed(),
                    });
                }
            };
        }
    }

    /// `Some` once the payment is terminal.
    async fn check_once(&self, index: &PaymentIndex) -> WalletResult<Option<Payment>> {
        let Some(payment) = self.node.get_payment(index).await? else {
            tracing::debug!(%index, "payment not yet known to node");
            return Ok(None);
        };
        if payment.index != *index {
            return Err(WalletError::InvalidResponse(format!(
                "asked for payment {index}, got {}",
                payment.index
            )));
        }
        payment
            .validate()
            .map_err(|e| WalletError::InvalidResponse(format!("{e:#}")))?;

        Ok(payment.status.is_terminal().then_some(payment))
    }
}

fn next_wait(deadline: Instant, backoff: &mut Backoff) -> PollState {
    let now = Instant::now();
    if now >= deadline {
        return PollState::TimedOut;
    }
    let delay = backoff.next().unwrap_or_default();
    PollState::Waiting(delay.min(deadline - now))
}
