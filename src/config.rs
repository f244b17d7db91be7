use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result, ensure};
use bitcoin::Network;
use serde::{Deserialize, Serialize};

use crate::seed::UserPk;

pub const DEFAULT_DATA_DIR_NAME: &str = ".lnwallet";
pub const DB_FILE_NAME: &str = "wallet.sqlite3";
pub const DEFAULT_SYNC_BATCH_SIZE: u16 = 50;

const PROD_GATEWAY_URL: &str = "https://gateway.lnwallet.app";
const STAGING_GATEWAY_URL: &str = "https://gateway.staging.lnwallet.app";
const DEV_GATEWAY_URL: &str = "http://127.0.0.1:4040";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DeployEnv {
    Dev,
    Staging,
    Prod,
}

impl DeployEnv {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Staging => "staging",
            Self::Prod => "prod",
        }
    }
}

impl fmt::Display for DeployEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which deployment a wallet talks to. Persisted state is namespaced by it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct WalletEnv {
    pub deploy_env: DeployEnv,
    pub network: Network,
    pub use_sgx: bool,
}

impl WalletEnv {
    pub fn prod() -> Self {
        Self {
            deploy_env: DeployEnv::Prod,
            network: Network::Bitcoin,
            use_sgx: true,
        }
    }

    pub fn staging() -> Self {
        Self {
            deploy_env: DeployEnv::Staging,
            network: Network::Testnet,
            use_sgx: true,
        }
    }

    pub fn dev(use_sgx: bool) -> Self {
        Self {
            deploy_env: DeployEnv::Dev,
            network: Network::Regtest,
            use_sgx,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.deploy_env {
            DeployEnv::Prod => ensure!(
                self.network == Network::Bitcoin && self.use_sgx,
                "prod requires mainnet and sgx"
            ),
            DeployEnv::Staging => ensure!(
                self.network == Network::Testnet && self.use_sgx,
                "staging requires testnet and sgx"
            ),
            DeployEnv::Dev => ensure!(
                self.network != Network::Bitcoin,
                "dev cannot run on mainnet"
            ),
        }
        Ok(())
    }
}

// e.g. "prod-bitcoin-sgx", "dev-regtest-dbg"
impl fmt::Display for WalletEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sgx = if self.use_sgx { "sgx" } else { "dbg" };
        write!(f, "{}-{}-{sgx}", self.deploy_env, self.network)
    }
}

/// Backoff and deadline settings for the completion poller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollConfig {
    pub initial_backoff: Duration,
    pub backoff_multiplier: u32,
    pub max_backoff: Duration,
    pub recommended_timeout: Duration,
    /// Larger timeouts are rejected, not clamped.
    pub max_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(250),
            backoff_multiplier: 2,
            max_backoff: Duration::from_secs(32),
            recommended_timeout: Duration::from_secs(120),
            max_timeout: Duration::from_secs(10_800),
        }
    }
}

impl PollConfig {
    /// Zero backoffs would poll the node in a tight loop.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.initial_backoff.is_zero(), "initial_backoff must be > 0");
        ensure!(
            self.max_backoff >= self.initial_backoff,
            "max_backoff must be >= initial_backoff"
        );
        ensure!(self.backoff_multiplier >= 1, "backoff_multiplier must be >= 1");
        ensure!(
            !self.recommended_timeout.is_zero() && self.recommended_timeout <= self.max_timeout,
            "recommended_timeout must be in (0, max_timeout]"
        );
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct WalletEnvConfig {
    pub wallet_env: WalletEnv,
    pub gateway_url: String,
    /// Where the user's node is reached; defaults to the gateway, which
    /// proxies to it.
    pub node_url: String,
    pub poll: PollConfig,
    pub sync_batch_size: u16,
}

impl WalletEnvConfig {
    pub fn prod() -> Self {
        Self::new(WalletEnv::prod(), PROD_GATEWAY_URL.to_owned())
    }

    pub fn staging() -> Self {
        Self::new(WalletEnv::staging(), STAGING_GATEWAY_URL.to_owned())
    }

    pub fn dev(use_sgx: bool, gateway_url: Option<String>) -> Self {
        let gateway_url = gateway_url.unwrap_or_else(|| DEV_GATEWAY_URL.to_owned());
        Self::new(WalletEnv::dev(use_sgx), gateway_url)
    }

    fn new(wallet_env: WalletEnv, gateway_url: String) -> Self {
        Self {
            wallet_env,
            node_url: gateway_url.clone(),
            gateway_url,
            poll: PollConfig::default(),
            sync_batch_size: DEFAULT_SYNC_BATCH_SIZE,
        }
    }

    /// `<data_dir>/<wallet_env>`
    pub fn env_db_dir(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(self.wallet_env.to_string())
    }

    /// `<data_dir>/<wallet_env>/<user_pk>`
    pub fn user_db_dir(&self, data_dir: &Path, user_pk: &UserPk) -> PathBuf {
        self.env_db_dir(data_dir).join(user_pk.to_string())
    }
}

/// `$HOME/.lnwallet`
pub fn default_data_dir() -> Result<PathBuf> {
    let home = std::env::var_os("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(DEFAULT_DATA_DIR_NAME))
}
