use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use ln_wallet_sync::error::{WalletError, WalletResult};
use ln_wallet_sync::lightning::invoice::{parse_bolt11, payment_hash};
use ln_wallet_sync::node::{
    CreateInvoiceRequest, CreateInvoiceResponse, NodeApi, NodeEnclave, NodeInfo,
    PayInvoiceRequest, PayInvoiceResponse, ProvisionRequest, SignupRequest,
};
use ln_wallet_sync::payments::{
    Payment, PaymentDirection, PaymentId, PaymentIndex, PaymentKind, PaymentRail, PaymentStatus,
    PaymentUpdatedIndex,
};

use super::fixtures;
use super::invoice::regtest_invoice;

/// In-memory node ledger with switches for injecting failures.
#[derive(Default)]
pub struct FakeNodeState {
    pub payments: BTreeMap<PaymentId, Payment>,
    pub clock_ms: u64,

    pub enclaves: Vec<NodeEnclave>,
    pub provisioned: Vec<String>,
    pub fail_provision: BTreeSet<String>,
    pub signups: Vec<SignupRequest>,
    pub reject_signup_status: Option<u16>,

    pub pay_requests: Vec<PayInvoiceRequest>,
    pub next_invoice: u32,

    pub updated_calls: usize,
    /// 1-based call numbers of `get_updated_payments` that fail.
    pub fail_updated_calls: BTreeSet<usize>,
    /// Return the next batch in descending order.
    pub scramble_next_batch: bool,

    pub get_payment_calls: usize,
    /// 1-based call numbers of `get_payment` that fail with a transport error.
    pub fail_get_payment_calls: BTreeSet<usize>,
    pub reject_get_payment: bool,
    /// `get_payment` never returns.
    pub hang_get_payment: bool,
    /// On this `get_payment` call, finalize the payment with this status.
    pub finalize_on_check: Option<(usize, PaymentStatus)>,
}

#[derive(Default)]
pub struct FakeNode {
    state: Mutex<FakeNodeState>,
}

impl FakeNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, FakeNodeState> {
        self.state.lock().expect("fake node mutex poisoned")
    }

    pub fn upsert(&self, payment: Payment) {
        let mut state = self.state();
        state.clock_ms = state.clock_ms.max(payment.updated_at_ms);
        state.payments.insert(*payment.index.id(), payment);
    }

    /// Insert `n` pending payments created (and updated) at 1000, 1001, ...
    pub fn seed_pending(&self, n: u32) {
        for i in 0..n {
            self.upsert(fixtures::pending_ln(1_000 + u64::from(i), i));
        }
    }

    pub fn payment(&self, id: &PaymentId) -> Option<Payment> {
        self.state().payments.get(id).cloned()
    }
}

fn unavailable(what: &str) -> WalletError {
    WalletError::RemoteUnavailable(format!("{what}: connection refused"))
}

#[async_trait]
impl NodeApi for FakeNode {
    async fn signup(&self, req: &SignupRequest) -> WalletResult<()> {
        let mut state = self.state();
        if let Some(status) = state.reject_signup_status {
            return Err(WalletError::RemoteRejected {
                status,
                message: "signup rejected".to_owned(),
            });
        }
        state.signups.push(req.clone());
        Ok(())
    }

    async fn current_enclaves(&self) -> WalletResult<Vec<NodeEnclave>> {
        Ok(self.state().enclaves.clone())
    }

    async fn provision(&self, req: &ProvisionRequest) -> WalletResult<()> {
        let mut state = self.state();
        if state.fail_provision.contains(&req.enclave.measurement) {
            return Err(unavailable("provision"));
        }
        state.provisioned.push(req.enclave.measurement.clone());
        Ok(())
    }

    async fn node_info(&self) -> WalletResult<NodeInfo> {
        let state = self.state();
        let balance_sats = state
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Completed)
            .map(|p| match p.direction {
                PaymentDirection::Inbound => p.amount_sats.unwrap_or(0) as i64,
                PaymentDirection::Outbound => -((p.amount_sats.unwrap_or(0) + p.fees_sats) as i64),
                PaymentDirection::Info => 0,
            })
            .sum::<i64>()
            .max(0) as u64;
        Ok(NodeInfo {
            version: "0.1.0".to_owned(),
            measurement: "00".repeat(32),
            user_pk: "11".repeat(32),
            node_pk: format!("02{}", "22".repeat(32)),
            balance_sats,
            lightning_balance_sats: balance_sats,
            onchain_balance_sats: 0,
            num_channels: 1,
            num_usable_channels: 1,
        })
    }

    async fn create_invoice(
        &self,
        req: &CreateInvoiceRequest,
    ) -> WalletResult<CreateInvoiceResponse> {
        let mut state = self.state();
        state.next_invoice += 1;
        state.clock_ms += 1;
        let hash = fixtures::hash(100_000 + state.next_invoice);
        let invoice = regtest_invoice(hash, req.amount_sats.map(|sats| sats * 1000))
            .map_err(|e| WalletError::InvalidResponse(format!("{e:#}")))?;
        let index = PaymentIndex::new(state.clock_ms, PaymentId::Lightning(hash))
            .map_err(|e| WalletError::InvalidResponse(format!("{e:#}")))?;
        Ok(CreateInvoiceResponse { index, invoice })
    }

    async fn pay_invoice(&self, req: &PayInvoiceRequest) -> WalletResult<PayInvoiceResponse> {
        let parsed = parse_bolt11(&req.invoice)?;
        let mut state = self.state();
        state.clock_ms += 1;
        let index = PaymentIndex::new(state.clock_ms, PaymentId::Lightning(payment_hash(&parsed)))
            .map_err(|e| WalletError::InvalidResponse(format!("{e:#}")))?;

        let amount_sats = parsed
            .amount_milli_satoshis()
            .map(|msat| msat / 1000)
            .or(req.fallback_amount_sats);
        let payment = Payment {
            index,
            rail: PaymentRail::Invoice,
            kind: PaymentKind::Invoice,
            direction: PaymentDirection::Outbound,
            status: PaymentStatus::Pending,
            status_msg: "in flight".to_owned(),
            amount_sats,
            fees_sats: 1,
            note: None,
            invoice: Some(req.invoice.clone()),
            txid: None,
            address: None,
            payer_name: None,
            payer_note: None,
            priority: None,
            expires_at_ms: None,
            updated_at_ms: state.clock_ms,
            finalized_at_ms: None,
        };
        state.payments.insert(*index.id(), payment);
        state.pay_requests.push(req.clone());
        Ok(PayInvoiceResponse { index })
    }

    async fn get_updated_payments(
        &self,
        start_index: Option<PaymentUpdatedIndex>,
        limit: u16,
    ) -> WalletResult<Vec<Payment>> {
        let mut state = self.state();
        state.updated_calls += 1;
        if state.fail_updated_calls.contains(&state.updated_calls) {
            return Err(unavailable("get_updated_payments"));
        }

        let mut payments = state
            .payments
            .values()
            .filter(|p| start_index.is_none_or(|start| p.updated_index() > start))
            .cloned()
            .collect::<Vec<_>>();
        payments.sort_by_key(Payment::updated_index);
        payments.truncate(usize::from(limit));

        if state.scramble_next_batch {
            state.scramble_next_batch = false;
            payments.reverse();
        }
        Ok(payments)
    }

    async fn get_payment(&self, index: &PaymentIndex) -> WalletResult<Option<Payment>> {
        let hang = {
            let mut state = self.state();
            state.get_payment_calls += 1;
            state.hang_get_payment
        };
        if hang {
            return std::future::pending().await;
        }

        let mut state = self.state();
        let call = state.get_payment_calls;

        if state.reject_get_payment {
            return Err(WalletError::RemoteRejected {
                status: 403,
                message: "not authorized".to_owned(),
            });
        }
        if state.fail_get_payment_calls.contains(&call) {
            return Err(unavailable("get_payment"));
        }

        if let Some((on_call, status)) = state.finalize_on_check
            && on_call == call
        {
            state.clock_ms += 1;
            let now = state.clock_ms;
            if let Some(payment) = state.payments.get_mut(index.id()) {
                let at_ms = now.max(payment.updated_at_ms);
                *payment = fixtures::finalized(payment.clone(), status, at_ms);
            }
        }

        Ok(state
            .payments
            .get(index.id())
            .filter(|p| p.index == *index)
            .cloned())
    }
}
