use std::path::{Path, PathBuf};
use std::str::FromStr as _;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context as _;
use serde::Serialize;

use crate::config::{DB_FILE_NAME, WalletEnvConfig};
use crate::error::{WalletError, WalletResult};
use crate::lightning::invoice;
use crate::node::{CreateInvoiceRequest, NodeApi, NodeInfo, PayInvoiceRequest, SignupRequest};
use crate::payments::poll::CompletionPoller;
use crate::payments::store::SqlitePaymentStore;
use crate::payments::sync::{PaymentSyncSummary, PaymentSyncer};
use crate::payments::{
    Payment, PaymentFilter, PaymentId, PaymentIndex, PaymentPage, PaymentUpdatedIndex,
};
use crate::provision::{self, ProvisionSummary};
use crate::seed::{RootSeed, UserPk};

/// An invoice created by the node, with the fields decoded from it.
#[derive(Clone, Debug, Serialize)]
pub struct CreatedInvoice {
    pub index: PaymentIndex,
    pub invoice: String,
    pub description: Option<String>,
    #[serde(flatten)]
    pub details: invoice::InvoiceDetails,
}

#[derive(Clone, Debug, Serialize)]
pub struct PaidInvoice {
    pub index: PaymentIndex,
    pub created_at_ms: u64,
}

/// One user's wallet in one environment.
///
/// Reads go to the local store only. Anything that talks to the node is
/// async; syncs are serialized by the [`PaymentSyncer`].
pub struct Wallet {
    config: WalletEnvConfig,
    user_pk: UserPk,
    db_dir: PathBuf,
    node: Arc<dyn NodeApi>,
    store: Arc<Mutex<SqlitePaymentStore>>,
    syncer: PaymentSyncer,
    poller: CompletionPoller,
}

impl Wallet {
    /// Start over: wipe this user's local state for this environment, then
    /// open an empty wallet. Other users and environments are untouched.
    pub fn fresh(
        config: WalletEnvConfig,
        seed: &RootSeed,
        data_dir: &Path,
        node: Arc<dyn NodeApi>,
    ) -> WalletResult<Self> {
        check_config(&config)?;
        let user_pk = seed.user_pk()?;
        let db_dir = config.user_db_dir(data_dir, &user_pk);
        if db_dir.exists() {
            std::fs::remove_dir_all(&db_dir)
                .with_context(|| format!("remove wallet dir {}", db_dir.display()))?;
        }
        Self::open(config, user_pk, db_dir, node)
    }

    /// `None` if this user has no local state in this environment yet.
    pub fn load(
        config: WalletEnvConfig,
        seed: &RootSeed,
        data_dir: &Path,
        node: Arc<dyn NodeApi>,
    ) -> WalletResult<Option<Self>> {
        check_config(&config)?;
        let user_pk = seed.user_pk()?;
        let db_dir = config.user_db_dir(data_dir, &user_pk);
        if !db_dir.join(DB_FILE_NAME).exists() {
            return Ok(None);
        }
        Self::open(config, user_pk, db_dir, node).map(Some)
    }

    pub fn load_or_fresh(
        config: WalletEnvConfig,
        seed: &RootSeed,
        data_dir: &Path,
        node: Arc<dyn NodeApi>,
    ) -> WalletResult<Self> {
        match Self::load(config.clone(), seed, data_dir, node.clone())? {
            Some(wallet) => Ok(wallet),
            None => Self::fresh(config, seed, data_dir, node),
        }
    }

    fn open(
        config: WalletEnvConfig,
        user_pk: UserPk,
        db_dir: PathBuf,
        node: Arc<dyn NodeApi>,
    ) -> WalletResult<Self> {
        let store = SqlitePaymentStore::open(db_dir.join(DB_FILE_NAME))?;
        let store = Arc::new(Mutex::new(store));
        let syncer = PaymentSyncer::new(store.clone(), node.clone(), config.sync_batch_size);
        let poller = CompletionPoller::new(node.clone(), config.poll.clone());
        tracing::debug!(env = %config.wallet_env, %user_pk, "opened wallet");
        Ok(Self {
            config,
            user_pk,
            db_dir,
            node,
            store,
            syncer,
            poller,
        })
    }

    pub fn user_pk(&self) -> &UserPk {
        &self.user_pk
    }

    pub fn db_dir(&self) -> &Path {
        &self.db_dir
    }

    /// Register the user, then provision. Safe to call again after a partial
    /// failure.
    pub async fn signup(
        &self,
        seed: &RootSeed,
        partner_pk: Option<&str>,
    ) -> WalletResult<ProvisionSummary> {
        self.check_seed(seed)?;
        let partner_pk = partner_pk
            .map(|pk| {
                UserPk::from_str(pk.trim()).map_err(|e| {
                    WalletError::invalid_argument(format!("invalid partner_pk: {e:#}"))
                })
            })
            .transpose()?;
        if partner_pk == Some(self.user_pk) {
            return Err(WalletError::invalid_argument(
                "partner_pk cannot be the user's own key",
            ));
        }

        let req = SignupRequest {
            user_pk: self.user_pk.to_string(),
            partner_pk: partner_pk.map(|pk| pk.to_string()),
        };
        match self.node.signup(&req).await {
            Ok(()) => tracing::info!(user_pk = %self.user_pk, "signed up"),
            Err(WalletError::RemoteRejected { status: 409, .. }) => {
                tracing::info!(user_pk = %self.user_pk, "already signed up")
            }
            Err(e) => return Err(e),
        }

        self.provision(seed).await
    }

    pub async fn provision(&self, seed: &RootSeed) -> WalletResult<ProvisionSummary> {
        self.check_seed(seed)?;
        provision::provision_missing(self.node.as_ref(), &self.store, seed, &self.user_pk).await
    }

    pub async fn node_info(&self) -> WalletResult<NodeInfo> {
        self.node.node_info().await
    }

    pub async fn create_invoice(
        &self,
        expiry_secs: u32,
        amount_sats: Option<u64>,
        description: Option<String>,
    ) -> WalletResult<CreatedInvoice> {
        if expiry_secs == 0 {
            return Err(WalletError::invalid_argument("expiry_secs must be > 0"));
        }
        if amount_sats == Some(0) {
            return Err(WalletError::invalid_argument("amount_sats must be > 0"));
        }

        let resp = self
            .node
            .create_invoice(&CreateInvoiceRequest {
                expiry_secs,
                amount_sats,
                description: description.clone(),
            })
            .await?;

        let parsed = invoice::parse_bolt11(&resp.invoice)
            .map_err(|e| WalletError::InvalidResponse(format!("node returned {e}")))?;
        check_index_matches_invoice(&resp.index, &parsed)?;

        Ok(CreatedInvoice {
            index: resp.index,
            details: invoice::details(&parsed),
            invoice: resp.invoice,
            description,
        })
    }

    /// `note` is kept locally and attached once the payment syncs in.
    pub async fn pay_invoice(
        &self,
        invoice_str: &str,
        fallback_amount_sats: Option<u64>,
        note: Option<String>,
    ) -> WalletResult<PaidInvoice> {
        let parsed = invoice::parse_bolt11(invoice_str)?;
        invoice::check_payable(&parsed, self.config.wallet_env.network, fallback_amount_sats)?;
        let note = normalize_note(note);

        let resp = self
            .node
            .pay_invoice(&PayInvoiceRequest {
                invoice: invoice_str.trim().to_owned(),
                fallback_amount_sats,
                note: note.clone(),
            })
            .await?;
        check_index_matches_invoice(&resp.index, &parsed)?;

        if let Some(note) = &note {
            self.lock_store().stash_pending_note(&resp.index, note)?;
        }
        tracing::info!(index = %resp.index, "paying invoice");

        Ok(PaidInvoice {
            created_at_ms: resp.index.created_at_ms(),
            index: resp.index,
        })
    }

    /// Local lookup only.
    pub fn get_payment(&self, index: &str) -> WalletResult<Option<Payment>> {
        let index = parse_payment_index(index)?;
        Ok(self.lock_store().get(&index)?)
    }

    pub fn update_payment_note(&self, index: &str, note: Option<String>) -> WalletResult<()> {
        let index = parse_payment_index(index)?;
        let note = normalize_note(note);
        let found = self.lock_store().set_note(&index, note.as_deref())?;
        if !found {
            return Err(WalletError::NotFound(format!(
                "payment {index} is not synced locally"
            )));
        }
        Ok(())
    }

    pub async fn sync_payments(&self) -> WalletResult<PaymentSyncSummary> {
        self.syncer.sync().await
    }

    pub fn list_payments(
        &self,
        filter: PaymentFilter,
        offset: u64,
        limit: u64,
    ) -> WalletResult<PaymentPage> {
        Ok(self.lock_store().list(filter, offset, limit)?)
    }

    pub fn latest_payment_sync_index(&self) -> WalletResult<Option<PaymentUpdatedIndex>> {
        Ok(self.lock_store().latest_watermark()?)
    }

    /// Clears local payments and resets the sync watermark; the next sync
    /// refetches everything.
    pub async fn delete_local_payments(&self) -> WalletResult<()> {
        self.syncer.delete_local().await
    }

    /// Polls the node until the payment completes or fails. Does not update
    /// the local store.
    pub async fn wait_for_payment_completion(
        &self,
        index: &str,
        timeout: Duration,
    ) -> WalletResult<Payment> {
        let index = parse_payment_index(index)?;
        self.poller.wait_for_completion(&index, timeout).await
    }

    fn check_seed(&self, seed: &RootSeed) -> WalletResult<()> {
        if seed.user_pk()? != self.user_pk {
            return Err(WalletError::invalid_argument(
                "root seed does not belong to this wallet",
            ));
        }
        Ok(())
    }

    fn lock_store(&self) -> MutexGuard<'_, SqlitePaymentStore> {
        self.store.lock().expect("payment store mutex poisoned")
    }
}

fn check_config(config: &WalletEnvConfig) -> WalletResult<()> {
    config
        .wallet_env
        .validate()
        .map_err(|e| WalletError::invalid_argument(format!("invalid wallet env: {e:#}")))?;
    config
        .poll
        .validate()
        .map_err(|e| WalletError::invalid_argument(format!("invalid poll config: {e:#}")))
}

pub fn parse_payment_index(s: &str) -> WalletResult<PaymentIndex> {
    PaymentIndex::from_str(s)
        .map_err(|e| WalletError::invalid_argument(format!("invalid payment_index '{s}': {e:#}")))
}

fn normalize_note(note: Option<String>) -> Option<String> {
    note.filter(|n| !n.trim().is_empty())
}

fn check_index_matches_invoice(
    index: &PaymentIndex,
    parsed: &lightning_invoice::Bolt11Invoice,
) -> WalletResult<()> {
    let hash = invoice::payment_hash(parsed);
    if *index.id() != PaymentId::Lightning(hash) {
        return Err(WalletError::InvalidResponse(format!(
            "node returned index {index} for invoice with payment hash {}",
            hex::encode(hash)
        )));
    }
    Ok(())
}
