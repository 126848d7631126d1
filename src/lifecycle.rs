use zeroize::Zeroize;

use crate::algorithm::{EncryptionAlgorithm, EncryptionMode};
use crate::header::{
    key_cipher_suite, validate_sector_size, HeaderError, VolumeHeader, VolumeType,
    CURRENT_HEADER_VERSION, CURRENT_REQUIRED_MIN_PROGRAM_VERSION, ENCRYPTED_HEADER_DATA_OFFSET,
    SALT_OFFSET, SALT_SIZE,
};
use crate::kdf::Pkcs5Kdf;

/// Everything needed to write the header of a new volume.
pub struct HeaderCreationOptions<'a> {
    pub algorithm: EncryptionAlgorithm,
    /// KDF the header key was derived with; remembered for later re-keying.
    pub kdf: Option<Pkcs5Kdf>,
    /// Master key for the data area, twice the algorithm key size.
    pub data_key: &'a [u8],
    /// Key the header is encrypted with.
    pub header_key: &'a [u8],
    pub salt: &'a [u8],
    pub sector_size: u32,
    pub volume_type: VolumeType,
    pub volume_data_start: u64,
    pub volume_data_size: u64,
}

impl VolumeHeader {
    /// Populate this header for a new volume and write its encrypted form,
    /// salt first, into `header_buffer`. New volumes always use XTS.
    pub fn create(&mut self, header_buffer: &mut [u8], options: &HeaderCreationOptions) -> Result<(), HeaderError> {
        self.check_size()?;
        if options.data_key.len() != options.algorithm.key_size() * 2 || options.salt.len() != SALT_SIZE {
            return Err(HeaderError::ParameterIncorrect("data key or salt size"));
        }
        validate_sector_size(options.sector_size)?;

        header_buffer.fill(0);

        self.header_version = CURRENT_HEADER_VERSION;
        self.required_min_program_version = CURRENT_REQUIRED_MIN_PROGRAM_VERSION;

        self.data_area_key.zeroize();
        self.data_area_key[..options.data_key.len()].copy_from_slice(options.data_key);

        self.volume_creation_time = 0;
        self.header_creation_time = 0;
        self.hidden_volume_data_size = match options.volume_type {
            VolumeType::Hidden => options.volume_data_size,
            _ => 0,
        };
        self.volume_data_size = options.volume_data_size;
        self.encrypted_area_start = options.volume_data_start;
        self.encrypted_area_length = options.volume_data_size;
        self.sector_size = options.sector_size;

        let result = key_cipher_suite(options.algorithm, EncryptionMode::Xts, options.data_key)
            .and_then(|ea| {
                self.ea = Some(ea);
                self.encrypt_new(header_buffer, options.salt, options.header_key, options.kdf)
            });

        if result.is_err() {
            self.reset();
        }
        result
    }

    /// Encrypt this header under a new salt and header key into
    /// `new_header_buffer` (exactly `size()` bytes). The salt and key become
    /// the ones [`VolumeHeader::encrypt`] reuses.
    pub fn encrypt_new(
        &mut self,
        new_header_buffer: &mut [u8],
        new_salt: &[u8],
        new_header_key: &[u8],
        new_kdf: Option<Pkcs5Kdf>,
    ) -> Result<(), HeaderError> {
        self.check_size()?;
        if new_header_buffer.len() != self.size() || new_salt.len() != SALT_SIZE {
            return Err(HeaderError::ParameterIncorrect("header buffer or salt size"));
        }

        self.seal(new_header_buffer, new_salt, new_header_key)?;

        self.salt.copy_from_slice(new_salt);
        self.header_key.zeroize();
        self.header_key = new_header_key.to_vec();
        if let Some(kdf) = new_kdf {
            self.kdf = Some(kdf);
        }
        Ok(())
    }

    /// Re-encrypt this header with its current salt and header key, e.g.
    /// after changing a field in memory.
    pub fn encrypt(&self, new_header_buffer: &mut [u8]) -> Result<(), HeaderError> {
        self.check_size()?;
        if new_header_buffer.len() != self.size() {
            return Err(HeaderError::ParameterIncorrect("header buffer size"));
        }
        if self.header_key.is_empty() {
            return Err(HeaderError::ParameterIncorrect("header key not established"));
        }
        self.seal(new_header_buffer, &self.salt, &self.header_key)
    }

    // Salt goes in front, the serialized header behind it, then the header
    // part is encrypted in place. Nothing plaintext is left behind on failure.
    fn seal(&self, buffer: &mut [u8], salt: &[u8], header_key: &[u8]) -> Result<(), HeaderError> {
        self.check_size()?;
        let ea = self
            .ea
            .as_ref()
            .ok_or(HeaderError::ParameterIncorrect("header has no encryption algorithm"))?;
        let mode = ea
            .mode()
            .map(|m| m.mode())
            .ok_or(HeaderError::ParameterIncorrect("header has no encryption mode"))?;
        let suite = key_cipher_suite(ea.algorithm(), mode, header_key)?;

        buffer[SALT_OFFSET..SALT_OFFSET + SALT_SIZE].copy_from_slice(salt);

        let header_data = &mut buffer[ENCRYPTED_HEADER_DATA_OFFSET..];
        let result = self
            .serialize(header_data)
            .and_then(|()| suite.encrypt(header_data).map_err(HeaderError::from));
        if result.is_err() {
            buffer.zeroize();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::VOLUME_HEADER_EFFECTIVE_SIZE;

    const DATA_KEY: [u8; 64] = [0x42; 64];
    const HEADER_KEY: [u8; 64] = [0x17; 64];
    const SALT: [u8; 64] = [0x09; 64];

    fn options<'a>() -> HeaderCreationOptions<'a> {
        HeaderCreationOptions {
            algorithm: EncryptionAlgorithm::Aes,
            kdf: None,
            data_key: &DATA_KEY,
            header_key: &HEADER_KEY,
            salt: &SALT,
            sector_size: 512,
            volume_type: VolumeType::Normal,
            volume_data_start: 131_072,
            volume_data_size: 1_048_576,
        }
    }

    #[test]
    fn create_writes_salt_and_encrypted_payload() {
        let mut header = VolumeHeader::new(VOLUME_HEADER_EFFECTIVE_SIZE);
        let mut buf = [0xffu8; VOLUME_HEADER_EFFECTIVE_SIZE];
        header.create(&mut buf, &options()).unwrap();
        assert_eq!(&buf[..64], &SALT);
        assert_ne!(&buf[64..68], b"VERA");
        assert_eq!(header.volume_type(), VolumeType::Normal);
        assert_eq!(header.encryption_mode(), Some(EncryptionMode::Xts));
        assert_eq!(header.salt(), &SALT);
        assert_eq!(header.header_key(), &HEADER_KEY);
        assert_eq!(&header.data_area_key()[..64], &DATA_KEY);
        assert!(header.data_area_key()[64..].iter().all(|&b| b == 0));
    }

    #[test]
    fn create_validates_parameters() {
        let mut buf = [0u8; VOLUME_HEADER_EFFECTIVE_SIZE];

        let mut opts = options();
        opts.data_key = &DATA_KEY[..32];
        assert!(matches!(
            VolumeHeader::new(512).create(&mut buf, &opts),
            Err(HeaderError::ParameterIncorrect(_))
        ));

        let mut opts = options();
        opts.salt = &SALT[..32];
        assert!(matches!(
            VolumeHeader::new(512).create(&mut buf, &opts),
            Err(HeaderError::ParameterIncorrect(_))
        ));

        let mut opts = options();
        opts.sector_size = 520;
        assert_eq!(
            VolumeHeader::new(512).create(&mut buf, &opts),
            Err(HeaderError::InvalidSectorSize(520))
        );
    }

    #[test]
    fn failed_create_leaves_header_empty() {
        let mut header = VolumeHeader::new(VOLUME_HEADER_EFFECTIVE_SIZE);
        let mut wrong_size = [0u8; 256];
        assert!(header.create(&mut wrong_size, &options()).is_err());
        assert!(!header.is_populated());
        assert!(header.data_area_key().iter().all(|&b| b == 0));
    }

    #[test]
    fn undersized_header_is_a_parameter_error() {
        let mut header = VolumeHeader::new(32);
        let mut buf = [0u8; 32];
        assert_eq!(
            header.create(&mut buf, &options()),
            Err(HeaderError::ParameterIncorrect("header size"))
        );
        assert!(!header.is_populated());

        let mut header = VolumeHeader::new(VOLUME_HEADER_EFFECTIVE_SIZE);
        let mut created = [0u8; VOLUME_HEADER_EFFECTIVE_SIZE];
        header.create(&mut created, &options()).unwrap();
        header.set_size(100);
        let mut small = [0u8; 100];
        assert_eq!(header.encrypt(&mut small), Err(HeaderError::ParameterIncorrect("header size")));
        assert_eq!(
            header.encrypt_new(&mut small, &SALT, &HEADER_KEY, None),
            Err(HeaderError::ParameterIncorrect("header size"))
        );
        assert!(small.iter().all(|&b| b == 0));
    }

    #[test]
    fn hidden_volume_records_hidden_size() {
        let mut opts = options();
        opts.volume_type = VolumeType::Hidden;
        let mut header = VolumeHeader::new(VOLUME_HEADER_EFFECTIVE_SIZE);
        let mut buf = [0u8; VOLUME_HEADER_EFFECTIVE_SIZE];
        header.create(&mut buf, &opts).unwrap();
        assert_eq!(header.hidden_volume_data_size, 1_048_576);
        assert_eq!(header.volume_type(), VolumeType::Hidden);
    }

    #[test]
    fn encrypt_is_idempotent_and_matches_create() {
        let mut header = VolumeHeader::new(VOLUME_HEADER_EFFECTIVE_SIZE);
        let mut created = [0u8; VOLUME_HEADER_EFFECTIVE_SIZE];
        header.create(&mut created, &options()).unwrap();

        let mut first = [0u8; VOLUME_HEADER_EFFECTIVE_SIZE];
        let mut second = [0u8; VOLUME_HEADER_EFFECTIVE_SIZE];
        header.encrypt(&mut first).unwrap();
        header.encrypt(&mut second).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, created);
    }

    #[test]
    fn encrypt_new_rekeys_header() {
        let mut header = VolumeHeader::new(VOLUME_HEADER_EFFECTIVE_SIZE);
        let mut created = [0u8; VOLUME_HEADER_EFFECTIVE_SIZE];
        header.create(&mut created, &options()).unwrap();

        let new_salt = [0x77u8; 64];
        let new_key = [0x99u8; 64];
        let mut rekeyed = [0u8; VOLUME_HEADER_EFFECTIVE_SIZE];
        header.encrypt_new(&mut rekeyed, &new_salt, &new_key, None).unwrap();
        assert_eq!(&rekeyed[..64], &new_salt);
        assert_ne!(&rekeyed[64..], &created[64..]);
        assert_eq!(header.header_key(), &new_key);

        let mut wrong_salt = [0u8; VOLUME_HEADER_EFFECTIVE_SIZE];
        assert!(header.encrypt_new(&mut wrong_salt, &new_salt[..10], &new_key, None).is_err());
    }

    #[test]
    fn encrypt_requires_populated_header() {
        let header = VolumeHeader::new(VOLUME_HEADER_EFFECTIVE_SIZE);
        let mut buf = [0u8; VOLUME_HEADER_EFFECTIVE_SIZE];
        assert!(matches!(header.encrypt(&mut buf), Err(HeaderError::ParameterIncorrect(_))));
    }

    #[test]
    fn short_header_key_is_rejected_without_leaking_plaintext() {
        let mut header = VolumeHeader::new(VOLUME_HEADER_EFFECTIVE_SIZE);
        let mut buf = [0u8; VOLUME_HEADER_EFFECTIVE_SIZE];
        header.create(&mut buf, &options()).unwrap();
        let mut out = [0u8; VOLUME_HEADER_EFFECTIVE_SIZE];
        assert!(header.encrypt_new(&mut out, &SALT, &[1u8; 40], None).is_err());
        assert!(out.iter().all(|&b| b == 0));
    }
}
