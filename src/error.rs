use std::time::Duration;

/// Errors surfaced by the [`Wallet`](crate::wallet::Wallet) and its components.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    /// Rejected locally before any I/O was attempted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Transport-level failure talking to the node.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// The node answered, but refused the request.
    #[error("remote rejected request (status {status}): {message}")]
    RemoteRejected { status: u16, message: String },

    /// The node answered with something that violates its contract.
    #[error("invalid remote response: {0}")]
    InvalidResponse(String),

    #[error("timed out after {elapsed:?} waiting for payment {payment_index} to finalize")]
    Timeout {
        payment_index: String,
        elapsed: Duration,
    },

    #[error("local storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl WalletError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type WalletResult<T> = std::result::Result<T, WalletError>;
