use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{
    CreateInvoiceRequest, CreateInvoiceResponse, NodeApi, NodeEnclave, NodeInfo,
    PayInvoiceRequest, PayInvoiceResponse, ProvisionRequest, SignupRequest,
};
use crate::error::{WalletError, WalletResult};
use crate::payments::{Payment, PaymentIndex, PaymentUpdatedIndex};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct PaymentsResponse {
    payments: Vec<Payment>,
}

#[derive(Deserialize)]
struct MaybePayment {
    payment: Option<Payment>,
}

#[derive(Deserialize)]
struct EnclavesResponse {
    enclaves: Vec<NodeEnclave>,
}

#[derive(Deserialize)]
struct ErrorBody {
    msg: String,
}

/// JSON-over-HTTP client for the node app API.
///
/// Signup, enclave listing and provisioning go to the gateway; everything else
/// goes to the user's running node.
#[derive(Clone)]
pub struct RestNodeClient {
    http: Client,
    gateway_url: String,
    node_url: String,
}

impl RestNodeClient {
    pub fn new(gateway_url: String, node_url: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            gateway_url: gateway_url.trim_end_matches('/').to_owned(),
            node_url: node_url.trim_end_matches('/').to_owned(),
        })
    }

    async fn send<T: DeserializeOwned>(&self, what: &str, req: RequestBuilder) -> WalletResult<T> {
        let body = self.send_raw(what, req).await?;
        serde_json::from_slice(&body)
            .map_err(|e| WalletError::InvalidResponse(format!("{what}: decode body: {e}")))
    }

    /// Sends `req` and checks the status; the body is returned undecoded.
    async fn send_raw(&self, what: &str, req: RequestBuilder) -> WalletResult<Vec<u8>> {
        let resp = req
            .send()
            .await
            .map_err(|e| WalletError::RemoteUnavailable(format!("{what}: {e}")))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| WalletError::RemoteUnavailable(format!("{what}: read body: {e}")))?;

        if status.is_server_error() {
            return Err(WalletError::RemoteUnavailable(format!(
                "{what}: {status}: {}",
                error_message(&body)
            )));
        }
        if !status.is_success() {
            return Err(WalletError::RemoteRejected {
                status: status.as_u16(),
                message: format!("{what}: {}", error_message(&body)),
            });
        }

        Ok(body.to_vec())
    }
}

fn error_message(body: &[u8]) -> String {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(err) => err.msg,
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    }
}

#[async_trait]
impl NodeApi for RestNodeClient {
    async fn signup(&self, req: &SignupRequest) -> WalletResult<()> {
        let url = format!("{}/app/v2/signup", self.gateway_url);
        self.send_raw("signup", self.http.post(url).json(req)).await?;
        Ok(())
    }

    async fn current_enclaves(&self) -> WalletResult<Vec<NodeEnclave>> {
        let url = format!("{}/app/v1/current_enclaves", self.gateway_url);
        let resp: EnclavesResponse = self.send("current_enclaves", self.http.get(url)).await?;
        Ok(resp.enclaves)
    }

    async fn provision(&self, req: &ProvisionRequest) -> WalletResult<()> {
        let url = format!("{}/app/provision", self.gateway_url);
        let req = self
            .http
            .post(url)
            .query(&[("measurement", req.enclave.measurement.as_str())])
            .json(req);
        self.send_raw("provision", req).await?;
        Ok(())
    }

    async fn node_info(&self) -> WalletResult<NodeInfo> {
        let url = format!("{}/app/node_info", self.node_url);
        self.send("node_info", self.http.get(url)).await
    }

    async fn create_invoice(
        &self,
        req: &CreateInvoiceRequest,
    ) -> WalletResult<CreateInvoiceResponse> {
        let url = format!("{}/app/create_invoice", self.node_url);
        self.send("create_invoice", self.http.post(url).json(req)).await
    }

    async fn pay_invoice(&self, req: &PayInvoiceRequest) -> WalletResult<PayInvoiceResponse> {
        let url = format!("{}/app/pay_invoice", self.node_url);
        self.send("pay_invoice", self.http.post(url).json(req)).await
    }

    async fn get_updated_payments(
        &self,
        start_index: Option<PaymentUpdatedIndex>,
        limit: u16,
    ) -> WalletResult<Vec<Payment>> {
        let url = format!("{}/app/payments/updated", self.node_url);
        let mut query = vec![("limit", limit.to_string())];
        if let Some(start) = start_index {
            query.push(("start_index", start.to_string()));
        }
        let resp: PaymentsResponse = self
            .send("get_updated_payments", self.http.get(url).query(&query))
            .await?;
        Ok(resp.payments)
    }

    async fn get_payment(&self, index: &PaymentIndex) -> WalletResult<Option<Payment>> {
        let url = format!("{}/app/v1/payments/id", self.node_url);
        let req = self.http.get(url).query(&[("index", index.to_string())]);
        let resp: MaybePayment = self.send("get_payment", req).await?;
        Ok(resp.payment)
    }
}
