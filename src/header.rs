// Import the ByteOrder trait and BigEndian struct from the byteorder crate.
// Every multi-byte header field is stored big-endian on disk.
use byteorder::{BigEndian, ByteOrder};
use std::fmt;
use std::ops::RangeInclusive;
use thiserror::Error;
// Sensitive buffers (keys, salt) are wiped when the header is dropped.
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::algorithm::{CipherSuite, EncryptionAlgorithm, EncryptionMode, ModeTransform};
use crate::crypto::{CryptoError, ENCRYPTION_DATA_UNIT_SIZE};
use crate::kdf::{KdfError, Pkcs5Kdf};

/// Size of the part of a header slot that is actually used.
pub const VOLUME_HEADER_EFFECTIVE_SIZE: usize = 512;

pub const SALT_OFFSET: usize = 0;
pub const SALT_SIZE: usize = 64;
/// The encrypted header payload follows the plaintext salt.
pub const ENCRYPTED_HEADER_DATA_OFFSET: usize = SALT_OFFSET + SALT_SIZE;

// Offsets below are relative to the start of the decrypted payload.
pub const HEADER_OFFSET_MAGIC: usize = 0;
pub const HEADER_OFFSET_VERSION: usize = 4;
pub const HEADER_OFFSET_REQUIRED_VERSION: usize = 6;
pub const HEADER_OFFSET_KEY_AREA_CRC: usize = 8;
pub const HEADER_OFFSET_SECTOR_SIZE: usize = 64;
pub const HEADER_OFFSET_HEADER_CRC: usize = 188;
pub const DATA_AREA_KEY_OFFSET: usize = 192;
pub const DATA_KEY_AREA_MAX_SIZE: usize = 256;
/// Smallest header that holds the salt and a complete payload.
pub const MIN_HEADER_SIZE: usize = ENCRYPTED_HEADER_DATA_OFFSET + DATA_AREA_KEY_OFFSET + DATA_KEY_AREA_MAX_SIZE;

pub const MAGIC: &[u8; 4] = b"VERA";
pub const LEGACY_MAGIC: &[u8; 4] = b"TRUE";

pub const CURRENT_HEADER_VERSION: u16 = 5;
pub const MIN_ALLOWED_HEADER_VERSION: u16 = 1;
pub const CURRENT_REQUIRED_MIN_PROGRAM_VERSION: u16 = 0x010b;
/// Version of this implementation, compared against the required version
/// stored in current-format headers.
pub const PROGRAM_VERSION: u16 = 0x011a;
/// Required program versions that legacy-format headers may carry.
pub const LEGACY_REQUIRED_PROGRAM_VERSIONS: RangeInclusive<u16> = 0x0600..=0x071a;

pub const MIN_VOLUME_SECTOR_SIZE: u32 = 512;
pub const MAX_VOLUME_SECTOR_SIZE: u32 = 4096;
pub const SECTOR_SIZE_LEGACY: u32 = 512;

/// Legacy modes keep their key in an area of this size in front of the
/// cipher key.
pub const LEGACY_ENCRYPTION_MODE_KEY_AREA_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("Parameter incorrect: {0}")]
    ParameterIncorrect(&'static str),
    #[error("Password is empty")]
    PasswordEmpty,
    #[error("Invalid sector size {0}")]
    InvalidSectorSize(u32),
    #[error("Volume header requires a newer program version")]
    HigherVersionRequired,
    #[error("Unsupported TrueCrypt volume format")]
    UnsupportedLegacyFormat,
    #[error("Cipher error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Key derivation error: {0}")]
    Kdf(#[from] KdfError),
}

impl HeaderError {
    /// True when the header is readable in principle but this implementation
    /// cannot handle it, as opposed to a malformed call.
    pub fn is_version_incompatibility(&self) -> bool {
        matches!(
            self,
            HeaderError::HigherVersionRequired | HeaderError::UnsupportedLegacyFormat
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeType {
    Unknown,
    Normal,
    Hidden,
}

/// A fixed-width big-endian header field.
pub(crate) trait HeaderEntry: Sized + Copy {
    const SIZE: usize;
    fn read(buf: &[u8]) -> Self;
    fn write(self, buf: &mut [u8]);
}

impl HeaderEntry for u16 {
    const SIZE: usize = 2;
    fn read(buf: &[u8]) -> Self {
        BigEndian::read_u16(buf)
    }
    fn write(self, buf: &mut [u8]) {
        BigEndian::write_u16(buf, self)
    }
}

impl HeaderEntry for u32 {
    const SIZE: usize = 4;
    fn read(buf: &[u8]) -> Self {
        BigEndian::read_u32(buf)
    }
    fn write(self, buf: &mut [u8]) {
        BigEndian::write_u32(buf, self)
    }
}

impl HeaderEntry for u64 {
    const SIZE: usize = 8;
    fn read(buf: &[u8]) -> Self {
        BigEndian::read_u64(buf)
    }
    fn write(self, buf: &mut [u8]) {
        BigEndian::write_u64(buf, self)
    }
}

// Read the entry at `offset` and advance past it.
fn deserialize_entry<T: HeaderEntry>(header: &[u8], offset: &mut usize) -> Result<T, HeaderError> {
    let value = deserialize_entry_at(header, *offset)?;
    *offset += T::SIZE;
    Ok(value)
}

fn deserialize_entry_at<T: HeaderEntry>(header: &[u8], offset: usize) -> Result<T, HeaderError> {
    header
        .get(offset..offset + T::SIZE)
        .map(T::read)
        .ok_or(HeaderError::ParameterIncorrect("header entry out of bounds"))
}

fn serialize_entry<T: HeaderEntry>(entry: T, header: &mut [u8], offset: &mut usize) -> Result<(), HeaderError> {
    let end = *offset + T::SIZE;
    let slot = header
        .get_mut(*offset..end)
        .ok_or(HeaderError::ParameterIncorrect("header entry out of bounds"))?;
    entry.write(slot);
    *offset = end;
    Ok(())
}

pub(crate) fn validate_sector_size(sector_size: u32) -> Result<(), HeaderError> {
    if sector_size < MIN_VOLUME_SECTOR_SIZE
        || sector_size > MAX_VOLUME_SECTOR_SIZE
        || sector_size % ENCRYPTION_DATA_UNIT_SIZE as u32 != 0
    {
        return Err(HeaderError::InvalidSectorSize(sector_size));
    }
    Ok(())
}

pub(crate) fn key_slice(key: &[u8], start: usize, len: usize) -> Result<&[u8], HeaderError> {
    key.get(start..start + len)
        .ok_or(HeaderError::ParameterIncorrect("key material too short"))
}

/// Key `algorithm` + `mode` from a key area. XTS takes the cipher key first
/// and the tweak key right after it; legacy modes take their own key first
/// and the cipher key from behind the legacy mode key area.
pub(crate) fn key_cipher_suite(
    algorithm: EncryptionAlgorithm,
    mode: EncryptionMode,
    key: &[u8],
) -> Result<CipherSuite, HeaderError> {
    let key_size = algorithm.key_size();
    let mut suite = algorithm.new_suite();
    let mut transform = ModeTransform::new(mode);

    if mode.is_dual_key() {
        suite.set_key(key_slice(key, 0, key_size)?)?;
        transform.set_key(key_slice(key, key_size, key_size)?)?;
    } else {
        transform.set_key(key_slice(key, 0, mode.key_size(algorithm))?)?;
        suite.set_key(key_slice(key, LEGACY_ENCRYPTION_MODE_KEY_AREA_SIZE, key_size)?)?;
    }

    suite.set_mode(transform)?;
    Ok(suite)
}

pub(crate) fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// The decrypted volume header.
///
/// Starts out empty, becomes populated through [`VolumeHeader::create`] or a
/// successful [`VolumeHeader::decrypt`], and wipes its key material on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct VolumeHeader {
    // Total header size including the salt.
    #[zeroize(skip)]
    header_size: usize,
    // Size of the encrypted payload that follows the salt.
    #[zeroize(skip)]
    encrypted_header_data_size: usize,
    // Format revision of the header.
    pub header_version: u16,
    // Minimum program version required to read this header.
    pub required_min_program_version: u16,
    // CRC32 of the data-area key area.
    pub volume_key_area_crc32: u32,
    // Reserved timestamps, carried but never validated.
    pub volume_creation_time: u64,
    pub header_creation_time: u64,
    // Non-zero only for hidden volumes.
    pub hidden_volume_data_size: u64,
    pub volume_data_size: u64,
    pub encrypted_area_start: u64,
    pub encrypted_area_length: u64,
    pub flags: u32,
    pub sector_size: u32,
    // Master key material for the volume data area.
    pub(crate) data_area_key: [u8; DATA_KEY_AREA_MAX_SIZE],
    pub(crate) salt: [u8; SALT_SIZE],
    // Key the header itself is encrypted with, as derived from the password.
    pub(crate) header_key: Vec<u8>,
    // Data-area cipher and mode, keyed from `data_area_key`.
    #[zeroize(skip)]
    pub(crate) ea: Option<CipherSuite>,
    #[zeroize(skip)]
    pub(crate) kdf: Option<Pkcs5Kdf>,
}

impl VolumeHeader {
    /// An empty header for a slot of `size` bytes (salt included).
    pub fn new(size: usize) -> Self {
        VolumeHeader {
            header_size: size,
            encrypted_header_data_size: size.saturating_sub(ENCRYPTED_HEADER_DATA_OFFSET),
            header_version: 0,
            required_min_program_version: 0,
            volume_key_area_crc32: 0,
            volume_creation_time: 0,
            header_creation_time: 0,
            hidden_volume_data_size: 0,
            volume_data_size: 0,
            encrypted_area_start: 0,
            encrypted_area_length: 0,
            flags: 0,
            sector_size: 0,
            data_area_key: [0u8; DATA_KEY_AREA_MAX_SIZE],
            salt: [0u8; SALT_SIZE],
            header_key: Vec::new(),
            ea: None,
            kdf: None,
        }
    }

    /// Drop back to the empty state, wiping all key material.
    pub fn reset(&mut self) {
        let size = self.header_size;
        *self = VolumeHeader::new(size);
    }

    pub fn size(&self) -> usize {
        self.header_size
    }

    pub fn set_size(&mut self, header_size: usize) {
        self.header_size = header_size;
        self.encrypted_header_data_size = header_size.saturating_sub(ENCRYPTED_HEADER_DATA_OFFSET);
    }

    pub fn encrypted_header_data_size(&self) -> usize {
        self.encrypted_header_data_size
    }

    pub fn salt_size() -> usize {
        SALT_SIZE
    }

    pub(crate) fn check_size(&self) -> Result<(), HeaderError> {
        if self.header_size < MIN_HEADER_SIZE {
            return Err(HeaderError::ParameterIncorrect("header size"));
        }
        Ok(())
    }

    pub fn is_populated(&self) -> bool {
        self.ea.is_some()
    }

    /// Derived from the hidden volume size; `Unknown` until populated.
    pub fn volume_type(&self) -> VolumeType {
        if !self.is_populated() {
            VolumeType::Unknown
        } else if self.hidden_volume_data_size != 0 {
            VolumeType::Hidden
        } else {
            VolumeType::Normal
        }
    }

    pub fn data_area_key(&self) -> &[u8] {
        &self.data_area_key
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn header_key(&self) -> &[u8] {
        &self.header_key
    }

    /// Cipher and mode for the volume data area.
    pub fn data_cipher(&self) -> Option<&CipherSuite> {
        self.ea.as_ref()
    }

    pub fn encryption_algorithm(&self) -> Option<EncryptionAlgorithm> {
        self.ea.as_ref().map(|ea| ea.algorithm())
    }

    pub fn encryption_mode(&self) -> Option<EncryptionMode> {
        self.ea.as_ref().and_then(|ea| ea.mode()).map(|m| m.mode())
    }

    pub fn kdf(&self) -> Option<&Pkcs5Kdf> {
        self.kdf.as_ref()
    }

    /// XTS keys are weak when the primary and secondary halves are equal.
    pub fn is_xts_key_vulnerable(&self) -> bool {
        let key_size = match &self.ea {
            Some(ea) if ea.mode().map_or(false, |m| m.is_dual_key()) => ea.key_size(),
            _ => return false,
        };
        let key1 = &self.data_area_key[0..key_size];
        let key2 = &self.data_area_key[key_size..key_size * 2];
        key1 == key2
    }

    /// Encode the header into `header`, which must be exactly
    /// `encrypted_header_data_size` bytes. Always stamps the current header
    /// and required program versions.
    pub fn serialize(&self, header: &mut [u8]) -> Result<(), HeaderError> {
        // The target must match the payload size exactly and hold the key area.
        if header.len() != self.encrypted_header_data_size
            || header.len() < DATA_AREA_KEY_OFFSET + DATA_KEY_AREA_MAX_SIZE
        {
            return Err(HeaderError::ParameterIncorrect("header buffer size"));
        }

        // Start from an all-zero payload so reserved gaps stay zero.
        header.fill(0);

        // Magic signature at offset 0.
        header[HEADER_OFFSET_MAGIC..HEADER_OFFSET_MAGIC + 4].copy_from_slice(MAGIC);
        let mut offset = HEADER_OFFSET_VERSION;

        // Key material goes first so its CRC can be computed below.
        let key_area = DATA_AREA_KEY_OFFSET..DATA_AREA_KEY_OFFSET + DATA_KEY_AREA_MAX_SIZE;
        header[key_area.clone()].copy_from_slice(&self.data_area_key);

        serialize_entry(CURRENT_HEADER_VERSION, header, &mut offset)?;
        serialize_entry(CURRENT_REQUIRED_MIN_PROGRAM_VERSION, header, &mut offset)?;
        let key_area_crc = crc32(&header[key_area]);
        serialize_entry(key_area_crc, header, &mut offset)?;

        // Two reserved timestamp slots.
        serialize_entry(0u64, header, &mut offset)?;
        serialize_entry(0u64, header, &mut offset)?;

        serialize_entry(self.hidden_volume_data_size, header, &mut offset)?;
        serialize_entry(self.volume_data_size, header, &mut offset)?;
        serialize_entry(self.encrypted_area_start, header, &mut offset)?;
        serialize_entry(self.encrypted_area_length, header, &mut offset)?;
        serialize_entry(self.flags, header, &mut offset)?;

        validate_sector_size(self.sector_size)?;
        serialize_entry(self.sector_size, header, &mut offset)?;

        // Header CRC covers everything in front of its own field.
        let mut offset = HEADER_OFFSET_HEADER_CRC;
        let header_crc = crc32(&header[..HEADER_OFFSET_HEADER_CRC]);
        serialize_entry(header_crc, header, &mut offset)
    }

    /// Decode a decrypted payload produced with `algorithm` in `mode`.
    ///
    /// `Ok(false)` means the candidate does not fit (wrong magic, CRC or too
    /// old a version) and the next candidate should be tried. `Err` is a
    /// malformed buffer or a header this implementation cannot handle. The
    /// header is only modified when `Ok(true)` is returned.
    pub fn deserialize(
        &mut self,
        header: &[u8],
        algorithm: EncryptionAlgorithm,
        mode: EncryptionMode,
        truecrypt_mode: bool,
    ) -> Result<bool, HeaderError> {
        // The payload must have exactly the expected size.
        if header.len() != self.encrypted_header_data_size {
            return Err(HeaderError::ParameterIncorrect("header buffer size"));
        }

        // Check the magic matching the requested format.
        let expected_magic = if truecrypt_mode { LEGACY_MAGIC } else { MAGIC };
        if header.get(HEADER_OFFSET_MAGIC..HEADER_OFFSET_MAGIC + 4) != Some(&expected_magic[..]) {
            return Ok(false);
        }

        let mut offset = HEADER_OFFSET_VERSION;
        let header_version: u16 = deserialize_entry(header, &mut offset)?;

        // Versions we no longer read are treated as a non-matching candidate.
        if header_version < MIN_ALLOWED_HEADER_VERSION {
            return Ok(false);
        }

        if header_version > CURRENT_HEADER_VERSION {
            return Err(HeaderError::HigherVersionRequired);
        }

        // Version 4 introduced the header CRC at offset 188.
        if header_version >= 4 {
            let stored: u32 = deserialize_entry_at(header, HEADER_OFFSET_HEADER_CRC)?;
            if crc32(&header[..HEADER_OFFSET_HEADER_CRC]) != stored {
                return Ok(false);
            }
        }

        let mut required_min_program_version: u16 = deserialize_entry(header, &mut offset)?;

        if !truecrypt_mode && required_min_program_version > PROGRAM_VERSION {
            return Err(HeaderError::HigherVersionRequired);
        }

        // Legacy headers must come from a known release; afterwards they
        // report the current requirement.
        if truecrypt_mode {
            if !LEGACY_REQUIRED_PROGRAM_VERSIONS.contains(&required_min_program_version) {
                return Err(HeaderError::UnsupportedLegacyFormat);
            }
            required_min_program_version = CURRENT_REQUIRED_MIN_PROGRAM_VERSION;
        }

        let volume_key_area_crc32: u32 = deserialize_entry(header, &mut offset)?;
        let volume_creation_time: u64 = deserialize_entry(header, &mut offset)?;
        let header_creation_time: u64 = deserialize_entry(header, &mut offset)?;
        let hidden_volume_data_size: u64 = deserialize_entry(header, &mut offset)?;
        let volume_data_size: u64 = deserialize_entry(header, &mut offset)?;
        let encrypted_area_start: u64 = deserialize_entry(header, &mut offset)?;
        let encrypted_area_length: u64 = deserialize_entry(header, &mut offset)?;
        let flags: u32 = deserialize_entry(header, &mut offset)?;

        let mut sector_size: u32 = deserialize_entry(header, &mut offset)?;
        // Before version 5 the sector size was always 512.
        if header_version < 5 {
            sector_size = SECTOR_SIZE_LEGACY;
        }
        validate_sector_size(sector_size)?;

        // The key area carries its own CRC.
        let key_area = header
            .get(DATA_AREA_KEY_OFFSET..DATA_AREA_KEY_OFFSET + DATA_KEY_AREA_MAX_SIZE)
            .ok_or(HeaderError::ParameterIncorrect("header buffer size"))?;
        if volume_key_area_crc32 != crc32(key_area) {
            return Ok(false);
        }

        // Fresh cipher and mode for the data area, keyed from the key area.
        let ea = key_cipher_suite(algorithm, mode, key_area)?;

        self.header_version = header_version;
        self.required_min_program_version = required_min_program_version;
        self.volume_key_area_crc32 = volume_key_area_crc32;
        self.volume_creation_time = volume_creation_time;
        self.header_creation_time = header_creation_time;
        self.hidden_volume_data_size = hidden_volume_data_size;
        self.volume_data_size = volume_data_size;
        self.encrypted_area_start = encrypted_area_start;
        self.encrypted_area_length = encrypted_area_length;
        self.flags = flags;
        self.sector_size = sector_size;
        self.data_area_key.copy_from_slice(key_area);
        self.ea = Some(ea);

        Ok(true)
    }
}

impl fmt::Debug for VolumeHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VolumeHeader")
            .field("header_size", &self.header_size)
            .field("header_version", &self.header_version)
            .field("required_min_program_version", &self.required_min_program_version)
            .field("volume_type", &self.volume_type())
            .field("hidden_volume_data_size", &self.hidden_volume_data_size)
            .field("volume_data_size", &self.volume_data_size)
            .field("encrypted_area_start", &self.encrypted_area_start)
            .field("encrypted_area_length", &self.encrypted_area_length)
            .field("flags", &self.flags)
            .field("sector_size", &self.sector_size)
            .field("ea", &self.ea)
            .field("kdf", &self.kdf)
            .finish_non_exhaustive()
    }
}
