use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser as _, Subcommand};
use ln_wallet_sync::Wallet;
use ln_wallet_sync::config::{self, DeployEnv, WalletEnvConfig};
use ln_wallet_sync::node::rest::RestNodeClient;
use ln_wallet_sync::payments::PaymentFilter;
use ln_wallet_sync::seed::RootSeed;
use serde_json::json;

#[derive(Debug, clap::Parser)]
struct Args {
    /// Defaults to ~/.lnwallet
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = DeployEnv::Dev)]
    env: DeployEnv,

    /// Dev only: talk to an SGX node instead of a debug build.
    #[arg(long)]
    use_sgx: bool,

    #[arg(long)]
    gateway_url: Option<String>,

    #[arg(long)]
    node_url: Option<String>,

    /// Hex-encoded 32-byte root seed.
    #[arg(long)]
    seed: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    NodeInfo,
    Signup {
        #[arg(long)]
        partner_pk: Option<String>,
    },
    Provision,
    CreateInvoice {
        #[arg(long, default_value_t = 3600)]
        expiry_secs: u32,

        #[arg(long)]
        amount_sats: Option<u64>,

        #[arg(long)]
        description: Option<String>,
    },
    PayInvoice {
        #[arg(long)]
        invoice: String,

        #[arg(long)]
        fallback_amount_sats: Option<u64>,

        #[arg(long)]
        note: Option<String>,
    },
    GetPayment {
        #[arg(long)]
        index: String,
    },
    UpdateNote {
        #[arg(long)]
        index: String,

        /// Omit to clear the note.
        #[arg(long)]
        note: Option<String>,
    },
    Sync,
    List {
        #[arg(long, value_enum, default_value_t = PaymentFilter::All)]
        filter: PaymentFilter,

        #[arg(long, default_value_t = 0)]
        offset: u64,

        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
    LatestSyncIndex,
    DeleteLocal,
    Wait {
        #[arg(long)]
        index: String,

        /// Defaults to the recommended timeout for the environment.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    ln_wallet_sync::logging::init_with_default_level("warn").ok();
    let args = Args::parse();

    let mut cfg = match args.env {
        DeployEnv::Prod => WalletEnvConfig::prod(),
        DeployEnv::Staging => WalletEnvConfig::staging(),
        DeployEnv::Dev => WalletEnvConfig::dev(args.use_sgx, args.gateway_url.clone()),
    };
    if let Some(gateway_url) = args.gateway_url {
        cfg.gateway_url = gateway_url;
    }
    cfg.node_url = args.node_url.unwrap_or_else(|| cfg.gateway_url.clone());

    let data_dir = match args.data_dir {
        Some(dir) => dir,
        None => config::default_data_dir()?,
    };
    let seed = RootSeed::from_hex(&args.seed)?;
    let node = RestNodeClient::new(cfg.gateway_url.clone(), cfg.node_url.clone())?;
    let recommended_timeout = cfg.poll.recommended_timeout;
    let wallet = Wallet::load_or_fresh(cfg, &seed, &data_dir, Arc::new(node))
        .context("open wallet")?;

    let out = match args.command {
        Command::NodeInfo => serde_json::to_value(wallet.node_info().await?)?,
        Command::Signup { partner_pk } => {
            serde_json::to_value(wallet.signup(&seed, partner_pk.as_deref()).await?)?
        }
        Command::Provision => serde_json::to_value(wallet.provision(&seed).await?)?,
        Command::CreateInvoice {
            expiry_secs,
            amount_sats,
            description,
        } => serde_json::to_value(
            wallet
                .create_invoice(expiry_secs, amount_sats, description)
                .await?,
        )?,
        Command::PayInvoice {
            invoice,
            fallback_amount_sats,
            note,
        } => serde_json::to_value(
            wallet
                .pay_invoice(&invoice, fallback_amount_sats, note)
                .await?,
        )?,
        Command::GetPayment { index } => json!({
            "payment": wallet.get_payment(&index)?,
        }),
        Command::UpdateNote { index, note } => {
            wallet.update_payment_note(&index, note)?;
            json!({ "index": index })
        }
        Command::Sync => serde_json::to_value(wallet.sync_payments().await?)?,
        Command::List {
            filter,
            offset,
            limit,
        } => serde_json::to_value(wallet.list_payments(filter, offset, limit)?)?,
        Command::LatestSyncIndex => json!({
            "latest_sync_index": wallet.latest_payment_sync_index()?,
        }),
        Command::DeleteLocal => {
            wallet.delete_local_payments().await?;
            json!({ "deleted": true })
        }
        Command::Wait {
            index,
            timeout_secs,
        } => serde_json::to_value(
            wallet
                .wait_for_payment_completion(
                    &index,
                    timeout_secs.map_or(recommended_timeout, Duration::from_secs),
                )
                .await?,
        )?,
    };

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
