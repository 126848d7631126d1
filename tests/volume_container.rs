use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};

use tempfile::TempDir;
use veraheader::volume::{MIN_VOLUME_SIZE, VOLUME_DATA_OFFSET, VOLUME_HEADER_GROUP_SIZE};
use veraheader::{
    change_password, create_hidden_volume, create_volume, open_volume, EncryptionAlgorithm, HeaderAlgorithms,
    HeaderError, HeaderSlot, Pkcs5Kdf, Prf, VolumeError, VolumeType,
};

const PASS_OLD: &[u8] = b"password123";
const PASS_NEW: &[u8] = b"newsecret456";
const PASS_HIDDEN: &[u8] = b"hidden-volume-password";
const SALT_OLD: [u8; 64] = [1u8; 64];
const SALT_NEW: [u8; 64] = [2u8; 64];
const MASTER_KEY: [u8; 64] = [3u8; 64];
const SIZE: u64 = 1024 * 1024;

fn kdf() -> Pkcs5Kdf {
    Pkcs5Kdf::with_iterations(Prf::Sha512, 2)
}

fn algorithms() -> HeaderAlgorithms {
    HeaderAlgorithms::default()
        .with_kdfs(vec![kdf(), Pkcs5Kdf::with_iterations(Prf::Sha256, 2)])
        .with_algorithms(vec![EncryptionAlgorithm::Aes, EncryptionAlgorithm::SerpentAes])
}

fn master_key(algorithm: EncryptionAlgorithm) -> Vec<u8> {
    (0..algorithm.key_size() * 2).map(|i| (i as u8).wrapping_mul(31).wrapping_add(5)).collect()
}

fn zero_slot(path: &std::path::Path, slot: HeaderSlot, size: u64) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(slot.offset(size).unwrap())).unwrap();
    file.write_all(&[0u8; 512]).unwrap();
}

#[test]
fn create_and_open_volume() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vol.hc");

    let created = create_volume(&path, PASS_OLD, 0, SIZE, &SALT_OLD, &MASTER_KEY, EncryptionAlgorithm::Aes, &kdf())
        .expect("Failed to create volume");
    assert_eq!(fs::metadata(&path).unwrap().len(), SIZE);
    assert_eq!(created.encrypted_area_start, VOLUME_DATA_OFFSET);
    assert_eq!(created.volume_data_size, SIZE - 2 * VOLUME_HEADER_GROUP_SIZE);

    let opened = open_volume(&path, PASS_OLD, 0, None, false, &algorithms()).expect("Failed to open volume");
    assert_eq!(opened.slot, HeaderSlot::Primary);
    assert_eq!(opened.header.volume_type(), VolumeType::Normal);
    assert_eq!(opened.header.encryption_algorithm(), Some(EncryptionAlgorithm::Aes));
    assert_eq!(&opened.header.data_area_key()[..64], &MASTER_KEY);
    // Equal key halves are accepted, only reported.
    assert!(opened.header.is_xts_key_vulnerable());

    // Primary and backup copies are identical.
    let bytes = fs::read(&path).unwrap();
    let backup = (SIZE - VOLUME_HEADER_GROUP_SIZE) as usize;
    assert_eq!(&bytes[..512], &bytes[backup..backup + 512]);
    assert_eq!(&bytes[..64], &SALT_OLD);
}

#[test]
fn wrong_password_is_reported_uniformly() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vol.hc");
    create_volume(&path, PASS_OLD, 0, SIZE, &SALT_OLD, &MASTER_KEY, EncryptionAlgorithm::Aes, &kdf()).unwrap();

    let err = open_volume(&path, PASS_NEW, 0, None, false, &algorithms()).unwrap_err();
    assert!(matches!(err, VolumeError::InvalidPassword));
    assert_eq!(err.to_string(), "Incorrect password or not a valid volume");

    assert!(matches!(
        open_volume(&path, b"", 0, None, false, &algorithms()),
        Err(VolumeError::Header(HeaderError::PasswordEmpty))
    ));
}

#[test]
fn create_rejects_bad_sizes_and_keys() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vol.hc");

    assert!(matches!(
        create_volume(&path, PASS_OLD, 0, MIN_VOLUME_SIZE - 512, &SALT_OLD, &MASTER_KEY, EncryptionAlgorithm::Aes, &kdf()),
        Err(VolumeError::InvalidVolumeSize(_))
    ));
    assert!(matches!(
        create_volume(&path, PASS_OLD, 0, SIZE, &SALT_OLD, &MASTER_KEY, EncryptionAlgorithm::SerpentAes, &kdf()),
        Err(VolumeError::Header(HeaderError::ParameterIncorrect(_)))
    ));
    assert!(!path.exists());
}

#[test]
fn change_password_flow() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vol.hc");
    let key = master_key(EncryptionAlgorithm::SerpentAes);
    create_volume(&path, PASS_OLD, 0, SIZE, &SALT_OLD, &key, EncryptionAlgorithm::SerpentAes, &kdf()).unwrap();

    let new_kdf = Pkcs5Kdf::with_iterations(Prf::Sha256, 2);
    let changed = change_password(&path, PASS_OLD, 0, PASS_NEW, 0, &SALT_NEW, Some(&new_kdf), &algorithms())
        .expect("Failed to change password");
    assert_eq!(changed.kdf().map(|k| k.prf()), Some(Prf::Sha256));
    assert_eq!(changed.salt(), &SALT_NEW);

    let opened = open_volume(&path, PASS_NEW, 0, None, false, &algorithms()).expect("Failed to open with new password");
    assert_eq!(opened.slot, HeaderSlot::Primary);
    assert_eq!(opened.header.kdf().map(|k| k.prf()), Some(Prf::Sha256));
    assert_eq!(&opened.header.data_area_key()[..key.len()], &key[..]);

    assert!(matches!(
        open_volume(&path, PASS_OLD, 0, None, false, &algorithms()),
        Err(VolumeError::InvalidPassword)
    ));

    // The backup header carries the new password too.
    zero_slot(&path, HeaderSlot::Primary, SIZE);
    let opened = open_volume(&path, PASS_NEW, 0, None, false, &algorithms()).expect("Failed to open with backup header");
    assert_eq!(opened.slot, HeaderSlot::Backup);
}

#[test]
fn change_password_keeps_kdf_by_default_and_restores_primary() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vol.hc");
    create_volume(&path, PASS_OLD, 0, SIZE, &SALT_OLD, &MASTER_KEY, EncryptionAlgorithm::Aes, &kdf()).unwrap();
    zero_slot(&path, HeaderSlot::Primary, SIZE);

    let changed = change_password(&path, PASS_OLD, 0, PASS_NEW, 0, &SALT_NEW, None, &algorithms()).unwrap();
    assert_eq!(changed.kdf().map(|k| k.prf()), Some(Prf::Sha512));

    let opened = open_volume(&path, PASS_NEW, 0, None, false, &algorithms()).unwrap();
    assert_eq!(opened.slot, HeaderSlot::Primary);
}

#[test]
fn change_password_rejects_wrong_old_password() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vol.hc");
    create_volume(&path, PASS_OLD, 0, SIZE, &SALT_OLD, &MASTER_KEY, EncryptionAlgorithm::Aes, &kdf()).unwrap();
    let before = fs::read(&path).unwrap();

    assert!(matches!(
        change_password(&path, PASS_NEW, 0, b"other", 0, &SALT_NEW, None, &algorithms()),
        Err(VolumeError::InvalidPassword)
    ));
    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn hidden_volume_is_opened_by_its_own_password() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vol.hc");
    create_volume(&path, PASS_OLD, 0, SIZE, &SALT_OLD, &MASTER_KEY, EncryptionAlgorithm::Aes, &kdf()).unwrap();

    let hidden_key = master_key(EncryptionAlgorithm::SerpentAes);
    let hidden_size = 256 * 1024;
    let hidden = create_hidden_volume(
        &path,
        PASS_HIDDEN,
        0,
        hidden_size,
        &SALT_NEW,
        &hidden_key,
        EncryptionAlgorithm::SerpentAes,
        &kdf(),
    )
    .unwrap();
    assert_eq!(hidden.encrypted_area_start, SIZE - VOLUME_HEADER_GROUP_SIZE - hidden_size);

    let outer = open_volume(&path, PASS_OLD, 0, None, false, &algorithms()).unwrap();
    assert_eq!(outer.slot, HeaderSlot::Primary);
    assert_eq!(outer.header.volume_type(), VolumeType::Normal);

    let inner = open_volume(&path, PASS_HIDDEN, 0, None, false, &algorithms()).unwrap();
    assert_eq!(inner.slot, HeaderSlot::Hidden);
    assert_eq!(inner.header.volume_type(), VolumeType::Hidden);
    assert_eq!(inner.header.hidden_volume_data_size, hidden_size);
    assert!(!inner.header.is_xts_key_vulnerable());

    zero_slot(&path, HeaderSlot::Hidden, SIZE);
    let inner = open_volume(&path, PASS_HIDDEN, 0, None, false, &algorithms()).unwrap();
    assert_eq!(inner.slot, HeaderSlot::HiddenBackup);
}

#[test]
fn hidden_volume_must_fit() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vol.hc");
    create_volume(&path, PASS_OLD, 0, SIZE, &SALT_OLD, &MASTER_KEY, EncryptionAlgorithm::Aes, &kdf()).unwrap();

    for hidden_size in [0, SIZE, 1000] {
        assert!(matches!(
            create_hidden_volume(&path, PASS_HIDDEN, 0, hidden_size, &SALT_NEW, &MASTER_KEY, EncryptionAlgorithm::Aes, &kdf()),
            Err(VolumeError::InvalidVolumeSize(_))
        ));
    }
}
