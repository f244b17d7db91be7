use std::fmt;
use std::str::FromStr;

use anyhow::{Context as _, Result, ensure};
use bitcoin::hashes::{Hash as _, HashEngine as _, Hmac, HmacEngine, sha256};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};

const USER_KEY_LABEL: &[u8] = b"ln-wallet-sync/user-key";

/// The wallet's 32-byte root secret. Everything else is derived from it.
#[derive(Clone, PartialEq, Eq)]
pub struct RootSeed([u8; 32]);

impl RootSeed {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        Ok(Self(decode_hex32(s.trim()).context("invalid root seed")?))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn user_pk(&self) -> Result<UserPk> {
        let mut engine = HmacEngine::<sha256::Hash>::new(&self.0);
        engine.input(USER_KEY_LABEL);
        let derived = Hmac::<sha256::Hash>::from_engine(engine).to_byte_array();

        let secp = Secp256k1::signing_only();
        let secret = SecretKey::from_slice(&derived).context("derive user secret key")?;
        let (xonly, _parity) = PublicKey::from_secret_key(&secp, &secret).x_only_public_key();
        Ok(UserPk(xonly.serialize()))
    }
}

impl fmt::Debug for RootSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootSeed(..)")
    }
}

/// A user's public identity: a 32-byte x-only secp256k1 key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct UserPk([u8; 32]);

impl FromStr for UserPk {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Self(decode_hex32(s)?))
    }
}

impl fmt::Display for UserPk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

fn decode_hex32(s: &str) -> Result<[u8; 32]> {
    ensure!(s.len() == 64, "expected 64 hex chars, got {}", s.len());
    let mut out = [0u8; 32];
    hex::decode_to_slice(s, &mut out).context("decode hex")?;
    Ok(out)
}
