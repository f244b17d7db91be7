use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context as _;
use bitcoin::hashes::{Hash as _, sha256};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use lightning_invoice::{Currency, InvoiceBuilder, PaymentSecret};

pub struct InvoiceSpec {
    pub currency: Currency,
    pub payment_hash: [u8; 32],
    pub amount_msat: Option<u64>,
    /// `None` means "now".
    pub created_at: Option<Duration>,
    pub expiry: Duration,
}

impl InvoiceSpec {
    pub fn regtest(payment_hash: [u8; 32], amount_msat: Option<u64>) -> Self {
        Self {
            currency: Currency::Regtest,
            payment_hash,
            amount_msat,
            created_at: None,
            expiry: Duration::from_secs(3600),
        }
    }

    pub fn build(&self) -> anyhow::Result<String> {
        let secp = Secp256k1::new();
        let key = SecretKey::from_slice(&[42; 32]).context("node secret key")?;

        let builder = InvoiceBuilder::new(self.currency.clone())
            .description("test invoice".to_owned())
            .payment_hash(sha256::Hash::from_byte_array(self.payment_hash))
            .payment_secret(PaymentSecret([7; 32]))
            .min_final_cltv_expiry_delta(144)
            .expiry_time(self.expiry);
        let builder = match self.amount_msat {
            Some(amount) => builder.amount_milli_satoshis(amount),
            None => builder,
        };
        let builder = match self.created_at {
            Some(created_at) => builder.duration_since_epoch(created_at),
            None => builder.duration_since_epoch(
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .context("system clock before unix epoch")?,
            ),
        };

        let invoice = builder
            .build_signed(|hash| secp.sign_ecdsa_recoverable(hash, &key))
            .map_err(|e| anyhow::anyhow!("build invoice: {e:?}"))?;
        Ok(invoice.to_string())
    }
}

pub fn regtest_invoice(payment_hash: [u8; 32], amount_msat: Option<u64>) -> anyhow::Result<String> {
    InvoiceSpec::regtest(payment_hash, amount_msat).build()
}
