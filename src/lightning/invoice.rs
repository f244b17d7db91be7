use std::str::FromStr as _;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bitcoin::Network;
use bitcoin::hashes::Hash as _;
use lightning_invoice::{Bolt11Invoice, Currency};
use serde::Serialize;

use crate::error::{WalletError, WalletResult};

/// The parts of a BOLT11 invoice the wallet reports back to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InvoiceDetails {
    pub payment_hash: String,
    pub amount_sats: Option<u64>,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}

pub fn parse_bolt11(invoice: &str) -> WalletResult<Bolt11Invoice> {
    Bolt11Invoice::from_str(invoice.trim())
        .map_err(|e| WalletError::invalid_argument(format!("invalid invoice: {e}")))
}

pub fn payment_hash(invoice: &Bolt11Invoice) -> [u8; 32] {
    invoice.payment_hash().to_byte_array()
}

pub fn amount_sats(invoice: &Bolt11Invoice) -> Option<u64> {
    invoice.amount_milli_satoshis().map(|msat| msat.div_ceil(1000))
}

pub fn details(invoice: &Bolt11Invoice) -> InvoiceDetails {
    let created = invoice.duration_since_epoch();
    let expires = created.saturating_add(invoice.expiry_time());
    InvoiceDetails {
        payment_hash: hex::encode(payment_hash(invoice)),
        amount_sats: amount_sats(invoice),
        created_at_ms: u64::try_from(created.as_millis()).unwrap_or(u64::MAX),
        expires_at_ms: u64::try_from(expires.as_millis()).unwrap_or(u64::MAX),
    }
}

/// Local checks before handing an invoice to the node for payment.
pub fn check_payable(
    invoice: &Bolt11Invoice,
    network: Network,
    fallback_amount_sats: Option<u64>,
) -> WalletResult<()> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    check_payable_at(invoice, network, fallback_amount_sats, now)
}

/// [`check_payable`] with `now` given as time since the unix epoch.
pub fn check_payable_at(
    invoice: &Bolt11Invoice,
    network: Network,
    fallback_amount_sats: Option<u64>,
    now: Duration,
) -> WalletResult<()> {
    let expected = Currency::from(network);
    if invoice.currency() != expected {
        return Err(WalletError::invalid_argument(format!(
            "invalid invoice: for {:?}, wallet is on {network}",
            invoice.currency()
        )));
    }
    if invoice.would_expire(now) {
        return Err(WalletError::invalid_argument("invalid invoice: expired"));
    }
    match (amount_sats(invoice), fallback_amount_sats) {
        (None, None) => Err(WalletError::invalid_argument(
            "invoice has no amount; a fallback amount is required",
        )),
        (Some(_), Some(_)) => Err(WalletError::invalid_argument(
            "invoice already has an amount; do not pass a fallback amount",
        )),
        (None, Some(0)) => Err(WalletError::invalid_argument("fallback amount must be > 0")),
        _ => Ok(()),
    }
}
