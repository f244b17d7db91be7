pub mod index;
pub mod poll;
pub mod store;
pub mod sync;

use std::fmt;
use std::str::FromStr as _;

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

pub use index::{MAX_TIMESTAMP_MS, PaymentId, PaymentIndex, PaymentUpdatedIndex};

/// The technical mechanism used to fulfill a payment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PaymentRail {
    Onchain,
    Invoice,
    Offer,
    Spontaneous,
    WaivedFee,
    /// A rail introduced by a newer node version.
    Unknown(String),
}

impl PaymentRail {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Onchain => "onchain",
            Self::Invoice => "invoice",
            Self::Offer => "offer",
            Self::Spontaneous => "spontaneous",
            Self::WaivedFee => "waived_fee",
            Self::Unknown(s) => s,
        }
    }
}

impl From<String> for PaymentRail {
    fn from(s: String) -> Self {
        match s.as_str() {
            "onchain" => Self::Onchain,
            "invoice" => Self::Invoice,
            "offer" => Self::Offer,
            "spontaneous" => Self::Spontaneous,
            "waived_fee" => Self::WaivedFee,
            _ => Self::Unknown(s),
        }
    }
}

impl From<PaymentRail> for String {
    fn from(rail: PaymentRail) -> Self {
        match rail {
            PaymentRail::Unknown(s) => s,
            known => known.as_str().to_owned(),
        }
    }
}

/// Application-level classification of a payment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PaymentKind {
    Onchain,
    Invoice,
    Offer,
    Spontaneous,
    WaivedChannelFee,
    WaivedLiquidityFee,
    Unknown(String),
}

impl PaymentKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Onchain => "onchain",
            Self::Invoice => "invoice",
            Self::Offer => "offer",
            Self::Spontaneous => "spontaneous",
            Self::WaivedChannelFee => "waived_channel_fee",
            Self::WaivedLiquidityFee => "waived_liquidity_fee",
            Self::Unknown(s) => s,
        }
    }

    /// The rail this kind always travels on, if the kind is known.
    pub fn rail(&self) -> Option<PaymentRail> {
        match self {
            Self::Onchain => Some(PaymentRail::Onchain),
            Self::Invoice => Some(PaymentRail::Invoice),
            Self::Offer => Some(PaymentRail::Offer),
            Self::Spontaneous => Some(PaymentRail::Spontaneous),
            Self::WaivedChannelFee | Self::WaivedLiquidityFee => Some(PaymentRail::WaivedFee),
            Self::Unknown(_) => None,
        }
    }
}

impl From<String> for PaymentKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "onchain" => Self::Onchain,
            "invoice" => Self::Invoice,
            "offer" => Self::Offer,
            "spontaneous" => Self::Spontaneous,
            "waived_channel_fee" => Self::WaivedChannelFee,
            "waived_liquidity_fee" => Self::WaivedLiquidityFee,
            _ => Self::Unknown(s),
        }
    }
}

impl From<PaymentKind> for String {
    fn from(kind: PaymentKind) -> Self {
        match kind {
            PaymentKind::Unknown(s) => s,
            known => known.as_str().to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentDirection {
    Inbound,
    Outbound,
    /// A journal entry that moved no funds, e.g. a waived fee.
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationPriority {
    High,
    Normal,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PaymentFilter {
    #[default]
    All,
    Pending,
    /// Completed or failed.
    Finalized,
}

impl PaymentFilter {
    pub fn matches(self, payment: &Payment) -> bool {
        match self {
            Self::All => true,
            Self::Pending => payment.is_pending(),
            Self::Finalized => !payment.is_pending(),
        }
    }
}

/// A payment as recorded by the node, plus the local-only `note`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub index: PaymentIndex,
    pub rail: PaymentRail,
    pub kind: PaymentKind,
    pub direction: PaymentDirection,
    pub status: PaymentStatus,
    pub status_msg: String,
    pub amount_sats: Option<u64>,
    pub fees_sats: u64,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub invoice: Option<String>,
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub payer_name: Option<String>,
    #[serde(default)]
    pub payer_note: Option<String>,
    #[serde(default)]
    pub priority: Option<ConfirmationPriority>,
    #[serde(default)]
    pub expires_at_ms: Option<u64>,
    pub updated_at_ms: u64,
    #[serde(default)]
    pub finalized_at_ms: Option<u64>,
}

impl Payment {
    pub fn created_at_ms(&self) -> u64 {
        self.index.created_at_ms()
    }

    pub fn is_pending(&self) -> bool {
        self.status == PaymentStatus::Pending
    }

    pub fn updated_index(&self) -> PaymentUpdatedIndex {
        PaymentUpdatedIndex {
            updated_at_ms: self.updated_at_ms.min(MAX_TIMESTAMP_MS),
            id: self.index.id,
        }
    }

    /// Equal in every node-owned field; the local note is ignored.
    pub fn same_remote_state(&self, other: &Payment) -> bool {
        let mut a = self.clone();
        a.note = other.note.clone();
        &a == other
    }

    /// Checks the record invariants. Records from the node that fail this are
    /// never stored.
    pub fn validate(&self) -> Result<()> {
        let idx = &self.index;
        ensure!(
            self.updated_at_ms <= MAX_TIMESTAMP_MS,
            "{idx}: updated_at_ms out of range"
        );
        ensure!(
            self.updated_at_ms >= self.created_at_ms(),
            "{idx}: updated_at_ms {} precedes created_at_ms {}",
            self.updated_at_ms,
            self.created_at_ms()
        );
        match (self.status.is_terminal(), self.finalized_at_ms) {
            (true, None) => anyhow::bail!("{idx}: {} payment has no finalized_at_ms", self.status),
            (false, Some(_)) => anyhow::bail!("{idx}: pending payment has finalized_at_ms"),
            (true, Some(finalized)) => ensure!(
                finalized >= self.created_at_ms() && finalized <= MAX_TIMESTAMP_MS,
                "{idx}: finalized_at_ms {finalized} out of range"
            ),
            (false, None) => {}
        }
        if let Some(rail) = self.kind.rail()
            && !matches!(self.rail, PaymentRail::Unknown(_))
        {
            ensure!(
                rail == self.rail,
                "{idx}: kind {} does not travel on rail {}",
                self.kind.as_str(),
                self.rail.as_str()
            );
        }
        if self.rail == PaymentRail::Onchain {
            ensure!(
                matches!(idx.id(), PaymentId::OnchainRecv(_) | PaymentId::OnchainSend(_)),
                "{idx}: on-chain payment with non on-chain id"
            );
        }
        if self.priority.is_some() {
            ensure!(
                self.rail == PaymentRail::Onchain && self.direction == PaymentDirection::Outbound,
                "{idx}: confirmation priority is only valid for on-chain sends"
            );
        }
        if let Some(txid) = &self.txid {
            bitcoin::Txid::from_str(txid)
                .map_err(|e| anyhow::anyhow!("{idx}: invalid txid {txid:?}: {e}"))?;
        }
        Ok(())
    }
}

/// One page of locally stored payments.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentPage {
    pub payments: Vec<Payment>,
    /// Number of payments matching the filter, across all pages.
    pub total_count: u64,
}
