pub mod rest;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::WalletResult;
use crate::payments::{Payment, PaymentIndex, PaymentUpdatedIndex};

/// Snapshot of the remote node. Always fetched fresh, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub version: String,
    pub measurement: String,
    pub user_pk: String,
    pub node_pk: String,
    pub balance_sats: u64,
    pub lightning_balance_sats: u64,
    pub onchain_balance_sats: u64,
    pub num_channels: u32,
    pub num_usable_channels: u32,
}

/// A node enclave build the backend currently runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEnclave {
    pub version: String,
    /// Hex enclave measurement; unique per build.
    pub measurement: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupRequest {
    pub user_pk: String,
    #[serde(default)]
    pub partner_pk: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub user_pk: String,
    pub enclave: NodeEnclave,
    /// Hex root seed, sealed inside the enclave on the node side.
    pub root_seed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInvoiceRequest {
    pub expiry_secs: u32,
    #[serde(default)]
    pub amount_sats: Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInvoiceResponse {
    pub index: PaymentIndex,
    pub invoice: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayInvoiceRequest {
    pub invoice: String,
    #[serde(default)]
    pub fallback_amount_sats: Option<u64>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayInvoiceResponse {
    pub index: PaymentIndex,
}

/// The remote node's app API, as used by the wallet.
///
/// Implementations report transport failures as
/// [`WalletError::RemoteUnavailable`](crate::error::WalletError::RemoteUnavailable)
/// and never retry internally.
#[async_trait]
pub trait NodeApi: Send + Sync {
    async fn signup(&self, req: &SignupRequest) -> WalletResult<()>;

    async fn current_enclaves(&self) -> WalletResult<Vec<NodeEnclave>>;

    async fn provision(&self, req: &ProvisionRequest) -> WalletResult<()>;

    async fn node_info(&self) -> WalletResult<NodeInfo>;

    async fn create_invoice(
        &self,
        req: &CreateInvoiceRequest,
    ) -> WalletResult<CreateInvoiceResponse>;

    async fn pay_invoice(&self, req: &PayInvoiceRequest) -> WalletResult<PayInvoiceResponse>;

    /// Up to `limit` payments updated strictly after `start_index`, in
    /// ascending updated-index order.
    async fn get_updated_payments(
        &self,
        start_index: Option<PaymentUpdatedIndex>,
        limit: u16,
    ) -> WalletResult<Vec<Payment>>;

    async fn get_payment(&self, index: &PaymentIndex) -> WalletResult<Option<Payment>>;
}
