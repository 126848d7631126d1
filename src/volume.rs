use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use thiserror::Error;
use zeroize::Zeroizing;

use crate::algorithm::EncryptionAlgorithm;
use crate::config::{largest_serialized_key_size, HeaderAlgorithms};
use crate::header::{HeaderError, VolumeHeader, VolumeType, MIN_VOLUME_SECTOR_SIZE, VOLUME_HEADER_EFFECTIVE_SIZE};
use crate::kdf::Pkcs5Kdf;
use crate::lifecycle::HeaderCreationOptions;

/// Space reserved for one header copy.
pub const VOLUME_HEADER_SIZE: u64 = 64 * 1024;
/// Normal plus hidden header slot.
pub const VOLUME_HEADER_GROUP_SIZE: u64 = 2 * VOLUME_HEADER_SIZE;
pub const VOLUME_DATA_OFFSET: u64 = VOLUME_HEADER_GROUP_SIZE;
pub const HIDDEN_VOLUME_HEADER_OFFSET: u64 = VOLUME_HEADER_SIZE;
/// Header groups at both ends plus at least one sector of data.
pub const MIN_VOLUME_SIZE: u64 = 2 * VOLUME_HEADER_GROUP_SIZE + MIN_VOLUME_SECTOR_SIZE as u64;

// New volumes use the smallest sector size.
const NEW_VOLUME_SECTOR_SIZE: u32 = MIN_VOLUME_SECTOR_SIZE;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("Incorrect password or not a valid volume")]
    InvalidPassword,
    #[error("Invalid volume size: {0}")]
    InvalidVolumeSize(u64),
    #[error("Header error: {0}")]
    Header(#[from] HeaderError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Where a header copy lives inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderSlot {
    Primary,
    Hidden,
    Backup,
    HiddenBackup,
}

impl HeaderSlot {
    /// Order in which `open_volume` looks for a header.
    pub const SEARCH_ORDER: [HeaderSlot; 4] = [
        HeaderSlot::Primary,
        HeaderSlot::Hidden,
        HeaderSlot::Backup,
        HeaderSlot::HiddenBackup,
    ];

    /// Byte offset of this slot in a container of `volume_size` bytes.
    /// Fails when the container is too small to hold the slot.
    pub fn offset(self, volume_size: u64) -> io::Result<u64> {
        let offset = match self {
            HeaderSlot::Primary => Some(0),
            HeaderSlot::Hidden => Some(HIDDEN_VOLUME_HEADER_OFFSET),
            HeaderSlot::Backup => volume_size.checked_sub(VOLUME_HEADER_GROUP_SIZE),
            HeaderSlot::HiddenBackup => volume_size.checked_sub(VOLUME_HEADER_SIZE),
        };
        offset
            .filter(|&start| {
                start
                    .checked_add(VOLUME_HEADER_EFFECTIVE_SIZE as u64)
                    .map_or(false, |end| end <= volume_size)
            })
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("volume of {} bytes has no {} header slot", volume_size, self),
                )
            })
    }

    /// The other copy of the same header.
    pub fn companion(self) -> HeaderSlot {
        match self {
            HeaderSlot::Primary => HeaderSlot::Backup,
            HeaderSlot::Backup => HeaderSlot::Primary,
            HeaderSlot::Hidden => HeaderSlot::HiddenBackup,
            HeaderSlot::HiddenBackup => HeaderSlot::Hidden,
        }
    }

    pub fn is_backup(self) -> bool {
        matches!(self, HeaderSlot::Backup | HeaderSlot::HiddenBackup)
    }

    pub fn name(self) -> &'static str {
        match self {
            HeaderSlot::Primary => "primary",
            HeaderSlot::Hidden => "hidden",
            HeaderSlot::Backup => "backup",
            HeaderSlot::HiddenBackup => "hidden backup",
        }
    }
}

impl fmt::Display for HeaderSlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A header recovered from a container, with the slot it was found in.
#[derive(Debug)]
pub struct OpenedVolume {
    pub header: VolumeHeader,
    pub slot: HeaderSlot,
}

fn check_volume_size(volume_size: u64) -> Result<(), VolumeError> {
    if volume_size < MIN_VOLUME_SIZE || volume_size % MIN_VOLUME_SECTOR_SIZE as u64 != 0 {
        return Err(VolumeError::InvalidVolumeSize(volume_size));
    }
    Ok(())
}

/// Read the encrypted header stored in `slot`.
pub fn read_header<R: Read + Seek>(
    reader: &mut R,
    slot: HeaderSlot,
    volume_size: u64,
) -> io::Result<[u8; VOLUME_HEADER_EFFECTIVE_SIZE]> {
    let mut buf = [0u8; VOLUME_HEADER_EFFECTIVE_SIZE];
    reader.seek(SeekFrom::Start(slot.offset(volume_size)?))?;
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write_header<W: Write + Seek>(
    writer: &mut W,
    slot: HeaderSlot,
    volume_size: u64,
    encrypted_header: &[u8],
) -> io::Result<()> {
    writer.seek(SeekFrom::Start(slot.offset(volume_size)?))?;
    writer.write_all(encrypted_header)
}

fn derive_header_key(
    kdf: &Pkcs5Kdf,
    password: &[u8],
    pim: i32,
    salt: &[u8],
    algorithm: EncryptionAlgorithm,
) -> Result<Zeroizing<Vec<u8>>, VolumeError> {
    let mut header_key = Zeroizing::new(vec![0u8; largest_serialized_key_size(&[algorithm])]);
    kdf.derive_key(&mut header_key, password, pim, salt)
        .map_err(HeaderError::from)?;
    Ok(header_key)
}

#[allow(clippy::too_many_arguments)]
fn build_header(
    password: &[u8],
    pim: i32,
    salt: &[u8],
    master_key: &[u8],
    algorithm: EncryptionAlgorithm,
    kdf: &Pkcs5Kdf,
    volume_type: VolumeType,
    data_start: u64,
    data_size: u64,
) -> Result<(VolumeHeader, [u8; VOLUME_HEADER_EFFECTIVE_SIZE]), VolumeError> {
    if password.is_empty() {
        return Err(HeaderError::PasswordEmpty.into());
    }
    let header_key = derive_header_key(kdf, password, pim, salt, algorithm)?;

    let mut header = VolumeHeader::new(VOLUME_HEADER_EFFECTIVE_SIZE);
    let mut buf = [0u8; VOLUME_HEADER_EFFECTIVE_SIZE];
    header.create(
        &mut buf,
        &HeaderCreationOptions {
            algorithm,
            kdf: Some(*kdf),
            data_key: master_key,
            header_key: &header_key,
            salt,
            sector_size: NEW_VOLUME_SECTOR_SIZE,
            volume_type,
            volume_data_start: data_start,
            volume_data_size: data_size,
        },
    )?;

    if header.is_xts_key_vulnerable() {
        log::warn!("Master key has identical XTS key halves");
    }
    Ok((header, buf))
}

/// Create a container file of `size` bytes and write its primary and backup
/// headers. `master_key` is twice the algorithm key size.
#[allow(clippy::too_many_arguments)]
pub fn create_volume<P: AsRef<Path>>(
    path: P,
    password: &[u8],
    pim: i32,
    size: u64,
    salt: &[u8],
    master_key: &[u8],
    algorithm: EncryptionAlgorithm,
    kdf: &Pkcs5Kdf,
) -> Result<VolumeHeader, VolumeError> {
    check_volume_size(size)?;

    let data_size = size - 2 * VOLUME_HEADER_GROUP_SIZE;
    let (header, buf) = build_header(
        password,
        pim,
        salt,
        master_key,
        algorithm,
        kdf,
        VolumeType::Normal,
        VOLUME_DATA_OFFSET,
        data_size,
    )?;

    let mut file = File::create(path)?;
    file.set_len(size)?;
    write_header(&mut file, HeaderSlot::Primary, size, &buf)?;
    write_header(&mut file, HeaderSlot::Backup, size, &buf)?;
    file.sync_all()?;

    log::debug!("Created {} byte volume using {} and {}", size, algorithm.name(), kdf.name());
    Ok(header)
}

/// Add a hidden volume of `hidden_size` bytes at the end of the data area
/// of an existing container and write its hidden and hidden backup headers.
#[allow(clippy::too_many_arguments)]
pub fn create_hidden_volume<P: AsRef<Path>>(
    path: P,
    password: &[u8],
    pim: i32,
    hidden_size: u64,
    salt: &[u8],
    master_key: &[u8],
    algorithm: EncryptionAlgorithm,
    kdf: &Pkcs5Kdf,
) -> Result<VolumeHeader, VolumeError> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let size = file.metadata()?.len();
    check_volume_size(size)?;

    let host_data_size = size - 2 * VOLUME_HEADER_GROUP_SIZE;
    if hidden_size == 0 || hidden_size > host_data_size || hidden_size % NEW_VOLUME_SECTOR_SIZE as u64 != 0 {
        return Err(VolumeError::InvalidVolumeSize(hidden_size));
    }
    let data_start = size - VOLUME_HEADER_GROUP_SIZE - hidden_size;

    let (header, buf) = build_header(
        password,
        pim,
        salt,
        master_key,
        algorithm,
        kdf,
        VolumeType::Hidden,
        data_start,
        hidden_size,
    )?;

    write_header(&mut file, HeaderSlot::Hidden, size, &buf)?;
    write_header(&mut file, HeaderSlot::HiddenBackup, size, &buf)?;
    file.sync_all()?;

    log::debug!("Created {} byte hidden volume using {}", hidden_size, algorithm.name());
    Ok(header)
}

/// Recover the header of the container at `path`, trying the primary,
/// hidden, backup and hidden backup slots in turn.
pub fn open_volume<P: AsRef<Path>>(
    path: P,
    password: &[u8],
    pim: i32,
    kdf: Option<&Pkcs5Kdf>,
    truecrypt_mode: bool,
    algorithms: &HeaderAlgorithms,
) -> Result<OpenedVolume, VolumeError> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    check_volume_size(size)?;
    open_slots(&mut file, size, password, pim, kdf, truecrypt_mode, algorithms)
}

#[allow(clippy::too_many_arguments)]
fn open_slots<R: Read + Seek>(
    reader: &mut R,
    size: u64,
    password: &[u8],
    pim: i32,
    kdf: Option<&Pkcs5Kdf>,
    truecrypt_mode: bool,
    algorithms: &HeaderAlgorithms,
) -> Result<OpenedVolume, VolumeError> {
    for slot in HeaderSlot::SEARCH_ORDER {
        let encrypted = Zeroizing::new(read_header(reader, slot, size)?);
        let mut header = VolumeHeader::new(VOLUME_HEADER_EFFECTIVE_SIZE);

        if header.decrypt(encrypted.as_slice(), password, pim, kdf, truecrypt_mode, algorithms)? {
            if slot.is_backup() {
                log::warn!("Using {} header; the {} header is damaged or does not match", slot, slot.companion());
            } else {
                log::debug!("Volume header found in {} slot", slot);
            }
            if header.is_xts_key_vulnerable() {
                log::warn!("Volume master key has identical XTS key halves");
            }
            return Ok(OpenedVolume { header, slot });
        }
    }
    Err(VolumeError::InvalidPassword)
}

/// Re-encrypt the header matching `old_password` under a new password, PIM
/// and salt. Both copies of that header are rewritten, so a volume opened
/// through its backup gets its primary header restored. `new_kdf` defaults to
/// the KDF the header was recovered with.
#[allow(clippy::too_many_arguments)]
pub fn change_password<P: AsRef<Path>>(
    path: P,
    old_password: &[u8],
    old_pim: i32,
    new_password: &[u8],
    new_pim: i32,
    new_salt: &[u8],
    new_kdf: Option<&Pkcs5Kdf>,
    algorithms: &HeaderAlgorithms,
) -> Result<VolumeHeader, VolumeError> {
    if new_password.is_empty() {
        return Err(HeaderError::PasswordEmpty.into());
    }

    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let size = file.metadata()?.len();
    check_volume_size(size)?;

    let OpenedVolume { mut header, slot } =
        open_slots(&mut file, size, old_password, old_pim, None, false, algorithms)?;

    let kdf = match new_kdf.or(header.kdf()) {
        Some(kdf) => *kdf,
        None => return Err(HeaderError::ParameterIncorrect("no KDF for the new header key").into()),
    };
    let algorithm = header
        .encryption_algorithm()
        .ok_or(HeaderError::ParameterIncorrect("header has no encryption algorithm"))?;

    let header_key = derive_header_key(&kdf, new_password, new_pim, new_salt, algorithm)?;
    let mut buf = Zeroizing::new([0u8; VOLUME_HEADER_EFFECTIVE_SIZE]);
    header.encrypt_new(buf.as_mut_slice(), new_salt, &header_key, Some(kdf))?;

    write_header(&mut file, slot, size, buf.as_slice())?;
    write_header(&mut file, slot.companion(), size, buf.as_slice())?;
    file.sync_all()?;

    log::debug!("Re-encrypted {} and {} headers using {}", slot, slot.companion(), kdf.name());
    Ok(header)
}
