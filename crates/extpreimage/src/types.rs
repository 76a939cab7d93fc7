//! Payment hash and preimage domain types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::ConfigError;
use crate::wire::Symbol;

/// Length in bytes of both payment hashes and preimages.
pub const HASH_LEN: usize = 32;

/// Failure to interpret bytes or hex as a 32-byte value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseBytesError {
    #[error("expected 32 bytes, got {0}")]
    InvalidLength(usize),
    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

macro_rules! fixed_bytes {
    ($name:ident) => {
        impl $name {
            pub const fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
                Self(bytes)
            }

            pub const fn zero() -> Self {
                Self([0u8; HASH_LEN])
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; HASH_LEN]
            }

            pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
                &self.0
            }

            pub fn to_vec(&self) -> Vec<u8> {
                self.0.to_vec()
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = ParseBytesError;

            fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
                let array: [u8; HASH_LEN] = bytes
                    .try_into()
                    .map_err(|_| ParseBytesError::InvalidLength(bytes.len()))?;
                Ok(Self(array))
            }
        }

        impl From<[u8; HASH_LEN]> for $name {
            fn from(bytes: [u8; HASH_LEN]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = ParseBytesError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let bytes = hex::decode(value.trim())
                    .map_err(|error| ParseBytesError::InvalidHex(error.to_string()))?;
                Self::try_from(bytes.as_slice())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = String::deserialize(deserializer)?;
                value.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

/// SHA-256 digest identifying an HTLC.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PaymentHash([u8; HASH_LEN]);

/// 32-byte secret whose SHA-256 digest is a [`PaymentHash`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Preimage([u8; HASH_LEN]);

fixed_bytes!(PaymentHash);
fixed_bytes!(Preimage);

impl Preimage {
    /// SHA-256 of the preimage.
    pub fn payment_hash(&self) -> PaymentHash {
        PaymentHash(Sha256::digest(self.0).into())
    }

    /// Whether this preimage unlocks `hash`.
    pub fn matches(&self, hash: &PaymentHash) -> bool {
        self.payment_hash() == *hash
    }
}

/// Chains the external preimage service can price payments for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Bitcoin,
    Litecoin,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bitcoin => "bitcoin",
            Self::Litecoin => "litecoin",
        }
    }

    /// Currency symbol the service expects for this chain.
    pub fn symbol(&self) -> Symbol {
        match self {
            Self::Bitcoin => Symbol::Btc,
            Self::Litecoin => Symbol::Ltc,
        }
    }
}

impl FromStr for Chain {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "bitcoin" => Ok(Self::Bitcoin),
            "litecoin" => Ok(Self::Litecoin),
            other => Err(ConfigError::UnsupportedChain(other.to_string())),
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a single external preimage lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreimageRequest {
    pub payment_hash: PaymentHash,
    /// Payment amount in whole currency units (satoshis or litoshis).
    pub amount_sats: i64,
    pub time_lock: u32,
    pub best_height: u32,
}

impl PreimageRequest {
    pub fn new(payment_hash: PaymentHash, amount_sats: i64) -> Self {
        Self {
            payment_hash,
            amount_sats,
            time_lock: 0,
            best_height: 0,
        }
    }

    pub fn with_contract(mut self, time_lock: u32, best_height: u32) -> Self {
        self.time_lock = time_lock;
        self.best_height = best_height;
        self
    }
}
