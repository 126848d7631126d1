use crate::algorithm::{EncryptionAlgorithm, EncryptionMode};
use crate::header::LEGACY_ENCRYPTION_MODE_KEY_AREA_SIZE;
use crate::kdf::Pkcs5Kdf;

/// The KDFs, encryption algorithms and cipher modes key recovery is allowed
/// to try. Trial order is the order of each list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderAlgorithms {
    pub kdfs: Vec<Pkcs5Kdf>,
    pub algorithms: Vec<EncryptionAlgorithm>,
    pub modes: Vec<EncryptionMode>,
}

impl Default for HeaderAlgorithms {
    fn default() -> Self {
        HeaderAlgorithms {
            kdfs: Pkcs5Kdf::available(),
            algorithms: EncryptionAlgorithm::ALL.to_vec(),
            modes: vec![EncryptionMode::Xts],
        }
    }
}

impl HeaderAlgorithms {
    /// Sets matching headers written in the legacy format.
    pub fn truecrypt() -> Self {
        HeaderAlgorithms {
            kdfs: Pkcs5Kdf::available_truecrypt(),
            algorithms: EncryptionAlgorithm::LEGACY.to_vec(),
            modes: vec![EncryptionMode::Xts, EncryptionMode::Lrw],
        }
    }

    pub fn with_kdfs(mut self, kdfs: Vec<Pkcs5Kdf>) -> Self {
        self.kdfs = kdfs;
        self
    }

    pub fn with_algorithms(mut self, algorithms: Vec<EncryptionAlgorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    pub fn with_modes(mut self, modes: Vec<EncryptionMode>) -> Self {
        self.modes = modes;
        self
    }

    /// Size of a derived header key large enough for every algorithm/mode
    /// pair in this set: legacy modes keep their key in a separate area in
    /// front of the cipher key, XTS needs two cipher-sized keys.
    pub fn largest_serialized_key_size(&self) -> usize {
        largest_serialized_key_size(&self.algorithms)
    }
}

pub fn largest_serialized_key_size(algorithms: &[EncryptionAlgorithm]) -> usize {
    let largest = EncryptionAlgorithm::largest_key_size(algorithms);
    (LEGACY_ENCRYPTION_MODE_KEY_AREA_SIZE + largest).max(largest * 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn largest_key_size_covers_both_slicings() {
        let single = HeaderAlgorithms::default().with_algorithms(vec![EncryptionAlgorithm::Aes]);
        assert_eq!(single.largest_serialized_key_size(), 64);
        assert_eq!(HeaderAlgorithms::default().largest_serialized_key_size(), 192);
        assert_eq!(largest_serialized_key_size(&[]), 32);
    }

    #[test]
    fn truecrypt_sets_use_legacy_modes() {
        let tc = HeaderAlgorithms::truecrypt();
        assert!(tc.modes.contains(&EncryptionMode::Lrw));
        assert!(!tc.algorithms.contains(&EncryptionAlgorithm::Camellia));
        assert_eq!(tc.kdfs[0].name(), "HMAC-RIPEMD-160");
    }
}
