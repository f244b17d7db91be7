pub mod config;
pub mod error;
pub mod logging;
pub mod node;
pub mod payments;
pub mod provision;
pub mod seed;
pub mod wallet;

pub mod lightning {
    pub mod invoice;
}

pub use error::{WalletError, WalletResult};
pub use wallet::Wallet;
