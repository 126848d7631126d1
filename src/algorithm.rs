use std::fmt;

use zeroize::Zeroizing;

use crate::crypto::{CipherKind, CryptoError, Layer, CIPHER_BLOCK_SIZE, LRW_KEY_SIZE, PRIMITIVE_KEY_SIZE};

/// Cipher modes a header can be encrypted with.
///
/// XTS consumes two keys of the cipher's size (data key + tweak key). Every
/// other mode is a legacy single-key mode whose key lives in its own area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionMode {
    Xts,
    Lrw,
}

impl EncryptionMode {
    pub fn name(self) -> &'static str {
        match self {
            EncryptionMode::Xts => "XTS",
            EncryptionMode::Lrw => "LRW",
        }
    }

    /// True for the tweak-based mode whose key size follows the cipher.
    pub fn is_dual_key(self) -> bool {
        matches!(self, EncryptionMode::Xts)
    }

    /// Mode key size when used together with `algorithm`.
    pub fn key_size(self, algorithm: EncryptionAlgorithm) -> usize {
        match self {
            EncryptionMode::Xts => algorithm.key_size(),
            EncryptionMode::Lrw => LRW_KEY_SIZE,
        }
    }

    /// Key size of a legacy mode, independent of any cipher. `None` for XTS.
    pub fn legacy_key_size(self) -> Option<usize> {
        match self {
            EncryptionMode::Xts => None,
            EncryptionMode::Lrw => Some(LRW_KEY_SIZE),
        }
    }
}

impl fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encryption algorithms: single ciphers and cascades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionAlgorithm {
    Aes,
    Serpent,
    Twofish,
    Camellia,
    Kuznyechik,
    AesTwofish,
    AesTwofishSerpent,
    CamelliaKuznyechik,
    CamelliaSerpent,
    KuznyechikAes,
    KuznyechikSerpentCamellia,
    KuznyechikTwofish,
    SerpentAes,
    SerpentTwofishAes,
    TwofishSerpent,
}

impl EncryptionAlgorithm {
    pub const ALL: [EncryptionAlgorithm; 15] = [
        EncryptionAlgorithm::Aes,
        EncryptionAlgorithm::Serpent,
        EncryptionAlgorithm::Twofish,
        EncryptionAlgorithm::Camellia,
        EncryptionAlgorithm::Kuznyechik,
        EncryptionAlgorithm::AesTwofish,
        EncryptionAlgorithm::AesTwofishSerpent,
        EncryptionAlgorithm::CamelliaKuznyechik,
        EncryptionAlgorithm::CamelliaSerpent,
        EncryptionAlgorithm::KuznyechikAes,
        EncryptionAlgorithm::KuznyechikSerpentCamellia,
        EncryptionAlgorithm::KuznyechikTwofish,
        EncryptionAlgorithm::SerpentAes,
        EncryptionAlgorithm::SerpentTwofishAes,
        EncryptionAlgorithm::TwofishSerpent,
    ];

    /// Algorithms that existed in the legacy format.
    pub const LEGACY: [EncryptionAlgorithm; 8] = [
        EncryptionAlgorithm::Aes,
        EncryptionAlgorithm::Serpent,
        EncryptionAlgorithm::Twofish,
        EncryptionAlgorithm::AesTwofish,
        EncryptionAlgorithm::AesTwofishSerpent,
        EncryptionAlgorithm::SerpentAes,
        EncryptionAlgorithm::SerpentTwofishAes,
        EncryptionAlgorithm::TwofishSerpent,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EncryptionAlgorithm::Aes => "AES",
            EncryptionAlgorithm::Serpent => "Serpent",
            EncryptionAlgorithm::Twofish => "Twofish",
            EncryptionAlgorithm::Camellia => "Camellia",
            EncryptionAlgorithm::Kuznyechik => "Kuznyechik",
            EncryptionAlgorithm::AesTwofish => "AES-Twofish",
            EncryptionAlgorithm::AesTwofishSerpent => "AES-Twofish-Serpent",
            EncryptionAlgorithm::CamelliaKuznyechik => "Camellia-Kuznyechik",
            EncryptionAlgorithm::CamelliaSerpent => "Camellia-Serpent",
            EncryptionAlgorithm::KuznyechikAes => "Kuznyechik-AES",
            EncryptionAlgorithm::KuznyechikSerpentCamellia => "Kuznyechik-Serpent-Camellia",
            EncryptionAlgorithm::KuznyechikTwofish => "Kuznyechik-Twofish",
            EncryptionAlgorithm::SerpentAes => "Serpent-AES",
            EncryptionAlgorithm::SerpentTwofishAes => "Serpent-Twofish-AES",
            EncryptionAlgorithm::TwofishSerpent => "Twofish-Serpent",
        }
    }

    /// Component ciphers in application order for encryption. The cascade
    /// name lists the outermost cipher first, so the order here is reversed.
    pub fn ciphers(self) -> &'static [CipherKind] {
        use CipherKind::*;
        match self {
            EncryptionAlgorithm::Aes => &[Aes],
            EncryptionAlgorithm::Serpent => &[Serpent],
            EncryptionAlgorithm::Twofish => &[Twofish],
            EncryptionAlgorithm::Camellia => &[Camellia],
            EncryptionAlgorithm::Kuznyechik => &[Kuznyechik],
            EncryptionAlgorithm::AesTwofish => &[Twofish, Aes],
            EncryptionAlgorithm::AesTwofishSerpent => &[Serpent, Twofish, Aes],
            EncryptionAlgorithm::CamelliaKuznyechik => &[Kuznyechik, Camellia],
            EncryptionAlgorithm::CamelliaSerpent => &[Serpent, Camellia],
            EncryptionAlgorithm::KuznyechikAes => &[Aes, Kuznyechik],
            EncryptionAlgorithm::KuznyechikSerpentCamellia => &[Camellia, Serpent, Kuznyechik],
            EncryptionAlgorithm::KuznyechikTwofish => &[Twofish, Kuznyechik],
            EncryptionAlgorithm::SerpentAes => &[Aes, Serpent],
            EncryptionAlgorithm::SerpentTwofishAes => &[Aes, Twofish, Serpent],
            EncryptionAlgorithm::TwofishSerpent => &[Serpent, Twofish],
        }
    }

    pub fn key_size(self) -> usize {
        self.ciphers().len() * PRIMITIVE_KEY_SIZE
    }

    pub fn is_mode_supported(self, mode: EncryptionMode) -> bool {
        match mode {
            EncryptionMode::Xts => true,
            EncryptionMode::Lrw => Self::LEGACY.contains(&self),
        }
    }

    /// Look up an algorithm by its display name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.name().eq_ignore_ascii_case(name))
    }

    pub fn largest_key_size(algorithms: &[EncryptionAlgorithm]) -> usize {
        algorithms.iter().map(|a| a.key_size()).max().unwrap_or(0)
    }

    /// A fresh, unkeyed suite of this algorithm.
    pub fn new_suite(self) -> CipherSuite {
        CipherSuite {
            algorithm: self,
            key: None,
            mode: None,
        }
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A cipher mode together with its key bytes.
#[derive(Clone)]
pub struct ModeTransform {
    mode: EncryptionMode,
    key: Option<Zeroizing<Vec<u8>>>,
}

impl ModeTransform {
    pub fn new(mode: EncryptionMode) -> Self {
        ModeTransform { mode, key: None }
    }

    pub fn mode(&self) -> EncryptionMode {
        self.mode
    }

    pub fn is_dual_key(&self) -> bool {
        self.mode.is_dual_key()
    }

    /// Set the key. XTS accepts any length here; it is checked once the mode
    /// is attached to a cipher.
    pub fn set_key(&mut self, key: &[u8]) -> Result<(), CryptoError> {
        if let Some(expected) = self.mode.legacy_key_size() {
            if key.len() != expected {
                return Err(CryptoError::InvalidKeyLength {
                    expected,
                    actual: key.len(),
                });
            }
        }
        self.key = Some(Zeroizing::new(key.to_vec()));
        Ok(())
    }

    pub fn is_key_set(&self) -> bool {
        self.key.is_some()
    }

    /// A fresh, unkeyed instance of the same mode.
    pub fn get_new(&self) -> Self {
        ModeTransform::new(self.mode)
    }
}

impl fmt::Debug for ModeTransform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ModeTransform")
            .field("mode", &self.mode)
            .field("key_set", &self.is_key_set())
            .finish()
    }
}

/// An encryption algorithm with its key and the mode it is bound to.
///
/// A suite is owned by whoever created it; `get_new` hands out an unkeyed
/// instance of the same kind instead of sharing state.
#[derive(Clone)]
pub struct CipherSuite {
    algorithm: EncryptionAlgorithm,
    key: Option<Zeroizing<Vec<u8>>>,
    mode: Option<ModeTransform>,
}

impl CipherSuite {
    pub fn algorithm(&self) -> EncryptionAlgorithm {
        self.algorithm
    }

    pub fn key_size(&self) -> usize {
        self.algorithm.key_size()
    }

    pub fn is_mode_supported(&self, mode: EncryptionMode) -> bool {
        self.algorithm.is_mode_supported(mode)
    }

    pub fn set_key(&mut self, key: &[u8]) -> Result<(), CryptoError> {
        if key.len() != self.key_size() {
            return Err(CryptoError::InvalidKeyLength {
                expected: self.key_size(),
                actual: key.len(),
            });
        }
        self.key = Some(Zeroizing::new(key.to_vec()));
        Ok(())
    }

    /// Attach a keyed mode. The mode key length is checked against what the
    /// mode needs with this algorithm.
    pub fn set_mode(&mut self, mode: ModeTransform) -> Result<(), CryptoError> {
        if !self.is_mode_supported(mode.mode()) {
            return Err(CryptoError::UnsupportedMode {
                algorithm: self.algorithm.name(),
                mode: mode.mode().name(),
            });
        }
        let expected = mode.mode().key_size(self.algorithm);
        match &mode.key {
            Some(k) if k.len() != expected => {
                return Err(CryptoError::InvalidKeyLength {
                    expected,
                    actual: k.len(),
                })
            }
            Some(_) => {}
            None => return Err(CryptoError::KeyNotSet),
        }
        self.mode = Some(mode);
        Ok(())
    }

    pub fn mode(&self) -> Option<&ModeTransform> {
        self.mode.as_ref()
    }

    /// A fresh, unkeyed suite of the same algorithm.
    pub fn get_new(&self) -> Self {
        self.algorithm.new_suite()
    }

    pub fn encrypt(&self, data: &mut [u8]) -> Result<(), CryptoError> {
        let layers = self.layers(data.len())?;
        for layer in layers.iter() {
            layer.encrypt(data);
        }
        Ok(())
    }

    pub fn decrypt(&self, data: &mut [u8]) -> Result<(), CryptoError> {
        let layers = self.layers(data.len())?;
        for layer in layers.iter().rev() {
            layer.decrypt(data);
        }
        Ok(())
    }

    // Builds one keyed layer per component cipher. Component keys are taken
    // from the suite key and, for XTS, the mode key in cascade order.
    fn layers(&self, data_len: usize) -> Result<Vec<Layer>, CryptoError> {
        if data_len == 0 || data_len % CIPHER_BLOCK_SIZE != 0 {
            return Err(CryptoError::InvalidDataLength(data_len));
        }
        let key = self.key.as_ref().ok_or(CryptoError::KeyNotSet)?;
        let mode = self.mode.as_ref().ok_or(CryptoError::ModeNotSet)?;
        let mode_key = mode.key.as_ref().ok_or(CryptoError::KeyNotSet)?;

        self.algorithm
            .ciphers()
            .iter()
            .enumerate()
            .map(|(i, &kind)| {
                let range = i * PRIMITIVE_KEY_SIZE..(i + 1) * PRIMITIVE_KEY_SIZE;
                match mode.mode() {
                    EncryptionMode::Xts => Layer::xts(kind, &key[range.clone()], &mode_key[range]),
                    EncryptionMode::Lrw => Layer::lrw(kind, &key[range], mode_key),
                }
            })
            .collect()
    }
}

impl fmt::Debug for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CipherSuite")
            .field("algorithm", &self.algorithm)
            .field("key_set", &self.key.is_some())
            .field("mode", &self.mode)
            .finish()
    }
}
