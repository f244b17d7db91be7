use std::collections::BTreeSet;
use std::sync::Mutex;

use serde::Serialize;

use crate::error::WalletResult;
use crate::node::{NodeApi, NodeEnclave, ProvisionRequest};
use crate::payments::store::SqlitePaymentStore;
use crate::seed::{RootSeed, UserPk};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProvisionSummary {
    pub num_provisioned: usize,
    /// Current enclaves that were already in the local provision history.
    pub num_already_provisioned: usize,
}

/// Current enclaves not yet in `provisioned`, one per measurement.
pub fn enclaves_to_provision(
    current: Vec<NodeEnclave>,
    provisioned: &BTreeSet<String>,
) -> Vec<NodeEnclave> {
    let mut seen = BTreeSet::new();
    current
        .into_iter()
        .filter(|enclave| !provisioned.contains(&enclave.measurement))
        .filter(|enclave| seen.insert(enclave.measurement.clone()))
        .collect()
}

/// Provision every current enclave missing from the local history, recording
/// each one as soon as it succeeds. Rerunning after a failure only does the
/// remaining work.
pub async fn provision_missing(
    node: &dyn NodeApi,
    store: &Mutex<SqlitePaymentStore>,
    seed: &RootSeed,
    user_pk: &UserPk,
) -> WalletResult<ProvisionSummary> {
    let current = node.current_enclaves().await?;
    let provisioned = store
        .lock()
        .expect("payment store mutex poisoned")
        .provisioned_measurements()?;

    let num_already_provisioned = current
        .iter()
        .filter(|enclave| provisioned.contains(&enclave.measurement))
        .map(|enclave| enclave.measurement.as_str())
        .collect::<BTreeSet<_>>()
        .len();
    let todo = enclaves_to_provision(current, &provisioned);
    let mut summary = ProvisionSummary {
        num_provisioned: 0,
        num_already_provisioned,
    };

    for enclave in todo {
        let req = ProvisionRequest {
            user_pk: user_pk.to_string(),
            enclave: enclave.clone(),
            root_seed: seed.to_hex(),
        };
        node.provision(&req).await?;
        store
            .lock()
            .expect("payment store mutex poisoned")
            .record_provisioned(&enclave.measurement, &enclave.version)?;
        tracing::info!(
            version = %enclave.version,
            measurement = %enclave.measurement,
            "provisioned enclave"
        );
        summary.num_provisioned += 1;
    }

    Ok(summary)
}
