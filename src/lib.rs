//! Volume header codec and key recovery for VeraCrypt and TrueCrypt volumes.
//!
//! A [`VolumeHeader`] is created for a new volume, recovered from an
//! encrypted blob with a password by trying every configured KDF, cipher mode
//! and encryption algorithm, and re-encrypted when the password changes.
//! The [`volume`] module places headers inside container files.
//!
//! The library logs through the `log` facade and never installs a logger.

pub mod algorithm;
pub mod config;
pub mod crypto;
pub mod header;
pub mod kdf;
mod lifecycle;
mod recovery;
pub mod volume;

pub use algorithm::{CipherSuite, EncryptionAlgorithm, EncryptionMode, ModeTransform};
pub use config::HeaderAlgorithms;
pub use crypto::{CipherKind, CryptoError};
pub use header::{HeaderError, VolumeHeader, VolumeType};
pub use kdf::{IterationPolicy, KdfError, Pkcs5Kdf, Prf};
pub use lifecycle::HeaderCreationOptions;
pub use volume::{
    change_password, create_hidden_volume, create_volume, open_volume, HeaderSlot, OpenedVolume, VolumeError,
};
