use std::fmt;

use blake2::Blake2s256;
use hmac::{Hmac, SimpleHmac};
use pbkdf2::pbkdf2;
use ripemd::Ripemd160;
use sha2::{Sha256, Sha512};
use streebog::Streebog512;
use thiserror::Error;
use whirlpool::Whirlpool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KdfError {
    #[error("PIM must not be negative")]
    NegativePim,
    #[error("Key derivation rejected its input")]
    InvalidInput,
}

/// Pseudo-random functions available to PBKDF2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prf {
    Sha512,
    Sha256,
    Blake2s,
    Whirlpool,
    Streebog,
    Ripemd160,
}

impl Prf {
    pub fn name(self) -> &'static str {
        match self {
            Prf::Sha512 => "HMAC-SHA-512",
            Prf::Sha256 => "HMAC-SHA-256",
            Prf::Blake2s => "HMAC-BLAKE2s-256",
            Prf::Whirlpool => "HMAC-Whirlpool",
            Prf::Streebog => "HMAC-Streebog",
            Prf::Ripemd160 => "HMAC-RIPEMD-160",
        }
    }
}

/// How many PBKDF2 rounds a KDF runs for a given PIM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IterationPolicy {
    /// Current format: 500 000 rounds (RIPEMD-160: 655 331), or
    /// 15 000 + 1 000 × PIM when a PIM is given.
    VeraCrypt,
    /// Legacy format: fixed per-PRF counts, PIM ignored.
    TrueCrypt,
    /// Always this many rounds.
    Fixed(u32),
}

/// PBKDF2-HMAC key derivation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pkcs5Kdf {
    prf: Prf,
    policy: IterationPolicy,
}

impl Pkcs5Kdf {
    pub fn new(prf: Prf) -> Self {
        Pkcs5Kdf {
            prf,
            policy: IterationPolicy::VeraCrypt,
        }
    }

    pub fn truecrypt(prf: Prf) -> Self {
        Pkcs5Kdf {
            prf,
            policy: IterationPolicy::TrueCrypt,
        }
    }

    pub fn with_iterations(prf: Prf, iterations: u32) -> Self {
        Pkcs5Kdf {
            prf,
            policy: IterationPolicy::Fixed(iterations),
        }
    }

    /// Current-format KDFs in trial order.
    pub fn available() -> Vec<Pkcs5Kdf> {
        [Prf::Sha512, Prf::Sha256, Prf::Blake2s, Prf::Whirlpool, Prf::Streebog]
            .into_iter()
            .map(Pkcs5Kdf::new)
            .collect()
    }

    /// Legacy-format KDFs in trial order.
    pub fn available_truecrypt() -> Vec<Pkcs5Kdf> {
        [Prf::Ripemd160, Prf::Sha512, Prf::Whirlpool]
            .into_iter()
            .map(Pkcs5Kdf::truecrypt)
            .collect()
    }

    pub fn prf(&self) -> Prf {
        self.prf
    }

    pub fn policy(&self) -> IterationPolicy {
        self.policy
    }

    pub fn name(&self) -> &'static str {
        self.prf.name()
    }

    pub fn iteration_count(&self, pim: i32) -> Result<u32, KdfError> {
        if pim < 0 {
            return Err(KdfError::NegativePim);
        }
        Ok(match self.policy {
            IterationPolicy::Fixed(n) => n,
            IterationPolicy::TrueCrypt => match self.prf {
                Prf::Ripemd160 => 2000,
                _ => 1000,
            },
            IterationPolicy::VeraCrypt if pim == 0 => match self.prf {
                Prf::Ripemd160 => 655_331,
                _ => 500_000,
            },
            IterationPolicy::VeraCrypt => 15_000u32.saturating_add((pim as u32).saturating_mul(1000)),
        })
    }

    /// Fill `key` with key material derived from `password` and `salt`.
    pub fn derive_key(&self, key: &mut [u8], password: &[u8], pim: i32, salt: &[u8]) -> Result<(), KdfError> {
        let rounds = self.iteration_count(pim)?;
        let res = match self.prf {
            Prf::Sha512 => pbkdf2::<Hmac<Sha512>>(password, salt, rounds, key),
            Prf::Sha256 => pbkdf2::<Hmac<Sha256>>(password, salt, rounds, key),
            Prf::Blake2s => pbkdf2::<SimpleHmac<Blake2s256>>(password, salt, rounds, key),
            Prf::Whirlpool => pbkdf2::<Hmac<Whirlpool>>(password, salt, rounds, key),
            Prf::Streebog => pbkdf2::<SimpleHmac<Streebog512>>(password, salt, rounds, key),
            Prf::Ripemd160 => pbkdf2::<Hmac<Ripemd160>>(password, salt, rounds, key),
        };
        res.map_err(|_| KdfError::InvalidInput)
    }
}

impl fmt::Debug for Pkcs5Kdf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Pkcs5Kdf")
            .field("name", &self.name())
            .field("policy", &self.policy)
            .finish()
    }
}
