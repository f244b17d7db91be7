use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::store::SqlitePaymentStore;
use super::{Payment, PaymentUpdatedIndex};
use crate::error::{WalletError, WalletResult};
use crate::node::NodeApi;

/// What one call to [`PaymentSyncer::sync`] changed locally.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSyncSummary {
    pub num_new: usize,
    pub num_updated: usize,
}

impl PaymentSyncSummary {
    pub fn any_changes(&self) -> bool {
        self.num_new > 0 || self.num_updated > 0
    }
}

/// Owns watermark advancement for one wallet.
///
/// Syncs (and local deletes, which reset the watermark) queue on `writer`, so
/// at most one runs at a time. The store mutex is only held while applying a
/// batch, never across a node request, so reads proceed during a sync.
pub struct PaymentSyncer {
    store: Arc<Mutex<SqlitePaymentStore>>,
    node: Arc<dyn NodeApi>,
    batch_size: u16,
    writer: tokio::sync::Mutex<()>,
}

impl PaymentSyncer {
    pub fn new(
        store: Arc<Mutex<SqlitePaymentStore>>,
        node: Arc<dyn NodeApi>,
        batch_size: u16,
    ) -> Self {
        Self {
            store,
            node,
            batch_size: batch_size.max(1),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    /// Pull every payment updated since the watermark, one batch at a time.
    ///
    /// Each batch is applied together with its watermark advance. If a later
    /// batch fails, earlier batches stay applied and the error is returned.
    pub async fn sync(&self) -> WalletResult<PaymentSyncSummary> {
        let _writer = self.writer.lock().await;

        let mut watermark = self.lock_store().latest_watermark()?;
        let mut summary = PaymentSyncSummary::default();

        loop {
            let batch = self
                .node
                .get_updated_payments(watermark, self.batch_size)
                .await?;
            check_batch(watermark, self.batch_size, &batch)?;

            let batch_len = batch.len();
            if batch_len > 0 {
                let outcome = self.lock_store().apply_sync_batch(&batch)?;
                summary.num_new += outcome.num_new;
                summary.num_updated += outcome.num_updated;
                watermark = batch.last().map(Payment::updated_index);
                tracing::debug!(
                    batch_len,
                    num_new = outcome.num_new,
                    num_updated = outcome.num_updated,
                    "applied payment batch"
                );
            }

            if batch_len < usize::from(self.batch_size) {
                break;
            }
        }

        tracing::info!(
            num_new = summary.num_new,
            num_updated = summary.num_updated,
            watermark = ?watermark.map(|w| w.to_string()),
            "synced payments"
        );
        Ok(summary)
    }

    /// Clear local payments and the watermark. Waits for an in-flight sync.
    pub async fn delete_local(&self) -> WalletResult<()> {
        let _writer = self.writer.lock().await;
        self.lock_store().delete_all()?;
        tracing::info!("deleted local payments");
        Ok(())
    }

    fn lock_store(&self) -> std::sync::MutexGuard<'_, SqlitePaymentStore> {
        self.store.lock().expect("payment store mutex poisoned")
    }
}

/// A batch must fit `limit`, be strictly ascending, start after `start`, and
/// hold only valid records.
fn check_batch(
    start: Option<PaymentUpdatedIndex>,
    limit: u16,
    batch: &[Payment],
) -> WalletResult<()> {
    if batch.len() > usize::from(limit) {
        return Err(WalletError::InvalidResponse(format!(
            "asked for at most {limit} payments, got {}",
            batch.len()
        )));
    }

    let mut prev = start;
    for payment in batch {
        payment
            .validate()
            .map_err(|e| WalletError::InvalidResponse(format!("invalid payment: {e:#}")))?;
        let idx = payment.updated_index();
        if let Some(prev) = prev
            && idx <= prev
        {
            return Err(WalletError::InvalidResponse(format!(
                "payments out of order: {idx} does not follow {prev}"
            )));
        }
        prev = Some(idx);
    }
    Ok(())
}
