use std::fmt;
use std::str::FromStr;

use anyhow::{Context as _, Result, bail, ensure};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Largest timestamp we accept, so every value fits an SQLite `INTEGER`.
pub const MAX_TIMESTAMP_MS: u64 = i64::MAX as u64;

/// A globally unique payment id: a rail tag plus 32 bytes.
///
/// Variant order matters: it matches the lexicographic order of the tags, so
/// the derived `Ord` agrees with the ordering of the string form.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PaymentId {
    /// `fr`: inbound payment to a reusable offer, keyed by claim id.
    OfferRecvReusable([u8; 32]),
    /// `fs`: outbound offer payment, keyed by a client-generated id.
    OfferSend([u8; 32]),
    /// `ln`: invoice and spontaneous payments, keyed by payment hash.
    Lightning([u8; 32]),
    /// `or`: on-chain receive, keyed by txid.
    OnchainRecv([u8; 32]),
    /// `os`: on-chain send, keyed by a client-generated id.
    OnchainSend([u8; 32]),
}

impl PaymentId {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::OfferRecvReusable(_) => "fr",
            Self::OfferSend(_) => "fs",
            Self::Lightning(_) => "ln",
            Self::OnchainRecv(_) => "or",
            Self::OnchainSend(_) => "os",
        }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        match self {
            Self::OfferRecvReusable(b)
            | Self::OfferSend(b)
            | Self::Lightning(b)
            | Self::OnchainRecv(b)
            | Self::OnchainSend(b) => b,
        }
    }
}

impl FromStr for PaymentId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (tag, hex_str) = s
            .split_once('_')
            .context("payment id must look like <tag>_<hex>")?;
        ensure!(
            hex_str.len() == 64,
            "payment id hex must be 64 chars, got {}",
            hex_str.len()
        );
        // Lowercase only, so each id has exactly one string form.
        ensure!(
            hex_str
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)),
            "payment id hex must be lowercase hex"
        );
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_str, &mut bytes).context("decode payment id hex")?;

        match tag {
            "fr" => Ok(Self::OfferRecvReusable(bytes)),
            "fs" => Ok(Self::OfferSend(bytes)),
            "ln" => Ok(Self::Lightning(bytes)),
            "or" => Ok(Self::OnchainRecv(bytes)),
            "os" => Ok(Self::OnchainSend(bytes)),
            other => bail!("unknown payment id tag {other:?}; expected fr|fs|ln|or|os"),
        }
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.prefix(), hex::encode(self.as_bytes()))
    }
}

/// Canonical identity of a payment: `<created_at_ms>-<payment_id>`.
///
/// Only constructed by parsing or from already-validated parts. Ordered by
/// creation time, then id.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PaymentIndex {
    pub(crate) created_at_ms: u64,
    pub(crate) id: PaymentId,
}

impl PaymentIndex {
    pub fn new(created_at_ms: u64, id: PaymentId) -> Result<Self> {
        ensure!(
            created_at_ms <= MAX_TIMESTAMP_MS,
            "created_at_ms out of range: {created_at_ms}"
        );
        Ok(Self { created_at_ms, id })
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn id(&self) -> &PaymentId {
        &self.id
    }
}

fn parse_timestamp(s: &str, what: &str) -> Result<u64> {
    ensure!(
        !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()),
        "{what} must be a non-negative integer, got {s:?}"
    );
    let ts = s
        .parse::<u64>()
        .with_context(|| format!("{what} out of range: {s}"))?;
    ensure!(ts <= MAX_TIMESTAMP_MS, "{what} out of range: {s}");
    Ok(ts)
}

impl FromStr for PaymentIndex {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (created_at, id) = s
            .split_once('-')
            .context("expected <created_at_ms>-<payment_id>")?;
        let created_at_ms = parse_timestamp(created_at, "created_at_ms")?;
        let id = PaymentId::from_str(id).context("invalid payment id")?;
        Ok(Self { created_at_ms, id })
    }
}

// Zero-padded to the 19 digits of i64::MAX so string order == value order.
impl fmt::Display for PaymentIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:019}-{}", self.created_at_ms, self.id)
    }
}

/// The sync watermark: `u<updated_at_ms>-<payment_id>`.
///
/// Ordered by update time, then id; the id breaks ties between payments
/// updated in the same millisecond. The `u` prefix keeps it from being
/// mistaken for a [`PaymentIndex`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PaymentUpdatedIndex {
    pub(crate) updated_at_ms: u64,
    pub(crate) id: PaymentId,
}

impl PaymentUpdatedIndex {
    pub fn new(updated_at_ms: u64, id: PaymentId) -> Result<Self> {
        ensure!(
            updated_at_ms <= MAX_TIMESTAMP_MS,
            "updated_at_ms out of range: {updated_at_ms}"
        );
        Ok(Self { updated_at_ms, id })
    }

    pub fn updated_at_ms(&self) -> u64 {
        self.updated_at_ms
    }

    pub fn id(&self) -> &PaymentId {
        &self.id
    }
}

impl FromStr for PaymentUpdatedIndex {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix('u')
            .context("updated index must start with 'u'; is this a created index?")?;
        let (updated_at, id) = rest
            .split_once('-')
            .context("expected u<updated_at_ms>-<payment_id>")?;
        let updated_at_ms = parse_timestamp(updated_at, "updated_at_ms")?;
        let id = PaymentId::from_str(id).context("invalid payment id")?;
        Ok(Self { updated_at_ms, id })
    }
}

impl fmt::Display for PaymentUpdatedIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{:019}-{}", self.updated_at_ms, self.id)
    }
}

macro_rules! serde_via_str {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                <$ty>::from_str(&s).map_err(|e| serde::de::Error::custom(format!("{e:#}")))
            }
        }
    };
}

serde_via_str!(PaymentId);
serde_via_str!(PaymentIndex);
serde_via_str!(PaymentUpdatedIndex);
