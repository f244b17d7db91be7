use ln_wallet_sync::payments::{
    Payment, PaymentDirection, PaymentId, PaymentIndex, PaymentKind, PaymentRail, PaymentStatus,
};

pub const SEED_HEX: &str = "0101010101010101010101010101010101010101010101010101010101010101";

/// A payment hash that differs per `n`.
pub fn hash(n: u32) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[..4].copy_from_slice(&n.to_be_bytes());
    out[31] = 0xaa;
    out
}

pub fn ln_id(n: u32) -> PaymentId {
    PaymentId::Lightning(hash(n))
}

/// A pending inbound invoice payment, last updated when it was created.
pub fn pending_ln(created_at_ms: u64, n: u32) -> Payment {
    Payment {
        index: PaymentIndex::new(created_at_ms, ln_id(n)).expect("valid index"),
        rail: PaymentRail::Invoice,
        kind: PaymentKind::Invoice,
        direction: PaymentDirection::Inbound,
        status: PaymentStatus::Pending,
        status_msg: "waiting for payer".to_owned(),
        amount_sats: Some(1_000 + u64::from(n)),
        fees_sats: 0,
        note: None,
        invoice: None,
        txid: None,
        address: None,
        payer_name: None,
        payer_note: None,
        priority: None,
        expires_at_ms: Some(created_at_ms + 3_600_000),
        updated_at_ms: created_at_ms,
        finalized_at_ms: None,
    }
}

pub fn finalized(mut payment: Payment, status: PaymentStatus, at_ms: u64) -> Payment {
    payment.status = status;
    payment.status_msg = status.to_string();
    payment.updated_at_ms = at_ms;
    payment.finalized_at_ms = Some(at_ms);
    payment
}
