use zeroize::Zeroizing;

use crate::algorithm::ModeTransform;
use crate::config::HeaderAlgorithms;
use crate::header::{
    key_slice, HeaderError, VolumeHeader, ENCRYPTED_HEADER_DATA_OFFSET, LEGACY_ENCRYPTION_MODE_KEY_AREA_SIZE,
    SALT_OFFSET, SALT_SIZE,
};
use crate::kdf::Pkcs5Kdf;

// Inputs shared by every KDF trial. The encrypted blob is only ever read.
struct TrialInput<'a> {
    header_size: usize,
    salt: &'a [u8],
    encrypted_header: &'a [u8],
    password: &'a [u8],
    pim: i32,
    truecrypt_mode: bool,
    algorithms: &'a HeaderAlgorithms,
    key_size: usize,
}

impl VolumeHeader {
    /// Recover this header from `encrypted_data` (salt followed by the
    /// encrypted payload) by trying every KDF, mode and algorithm in
    /// `algorithms`, KDF-major and algorithm-innermost.
    ///
    /// Returns `Ok(false)` when no combination matches, which callers should
    /// report as a wrong password. `kdf` restricts the trials to the KDF with
    /// the same name. On failure the header is left untouched.
    pub fn decrypt(
        &mut self,
        encrypted_data: &[u8],
        password: &[u8],
        pim: i32,
        kdf: Option<&Pkcs5Kdf>,
        truecrypt_mode: bool,
        algorithms: &HeaderAlgorithms,
    ) -> Result<bool, HeaderError> {
        if password.is_empty() {
            return Err(HeaderError::PasswordEmpty);
        }
        self.check_size()?;
        if encrypted_data.len() < self.size() {
            return Err(HeaderError::ParameterIncorrect("encrypted header size"));
        }

        let input = TrialInput {
            header_size: self.size(),
            salt: &encrypted_data[SALT_OFFSET..SALT_OFFSET + SALT_SIZE],
            encrypted_header: &encrypted_data
                [ENCRYPTED_HEADER_DATA_OFFSET..ENCRYPTED_HEADER_DATA_OFFSET + self.encrypted_header_data_size()],
            password,
            pim,
            truecrypt_mode,
            algorithms,
            key_size: algorithms.largest_serialized_key_size(),
        };

        let kdfs: Vec<&Pkcs5Kdf> = algorithms
            .kdfs
            .iter()
            .filter(|candidate| kdf.map_or(true, |pinned| pinned.name() == candidate.name()))
            .collect();

        match run_trials(&input, &kdfs)? {
            Some(recovered) => {
                *self = recovered;
                Ok(true)
            }
            None => {
                log::debug!("No KDF/cipher combination decrypted the volume header");
                Ok(false)
            }
        }
    }
}

#[cfg(not(feature = "parallel"))]
fn run_trials(input: &TrialInput, kdfs: &[&Pkcs5Kdf]) -> Result<Option<VolumeHeader>, HeaderError> {
    for kdf in kdfs {
        if let Some(header) = try_kdf(input, kdf, &|| false)? {
            return Ok(Some(header));
        }
    }
    Ok(None)
}

// KDF derivations run concurrently. A trial gives up once a KDF earlier in
// trial order has matched, and the earliest match wins.
#[cfg(feature = "parallel")]
fn run_trials(input: &TrialInput, kdfs: &[&Pkcs5Kdf]) -> Result<Option<VolumeHeader>, HeaderError> {
    use rayon::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    let winner = AtomicUsize::new(usize::MAX);

    kdfs.par_iter()
        .enumerate()
        .map(|(index, kdf)| {
            let outcome = try_kdf(input, kdf, &|| winner.load(Ordering::Relaxed) < index);
            if matches!(outcome, Ok(Some(_))) {
                winner.fetch_min(index, Ordering::Relaxed);
            }
            outcome
        })
        .find_map_first(|outcome| match outcome {
            Ok(None) => None,
            other => Some(other),
        })
        .transpose()
        .map(Option::flatten)
}

fn try_kdf(
    input: &TrialInput,
    kdf: &Pkcs5Kdf,
    cancelled: &(dyn Fn() -> bool + Sync),
) -> Result<Option<VolumeHeader>, HeaderError> {
    if cancelled() {
        return Ok(None);
    }

    let mut header_key = Zeroizing::new(vec![0u8; input.key_size]);
    kdf.derive_key(&mut header_key, input.password, input.pim, input.salt)?;

    let mut scratch = Zeroizing::new(vec![0u8; input.encrypted_header.len()]);
    let mut candidate = VolumeHeader::new(input.header_size);
    let mut trials = 0usize;

    for &mode in &input.algorithms.modes {
        // Legacy modes are keyed once, independent of the cipher.
        let mut outer = ModeTransform::new(mode);
        if let Some(mode_key_size) = mode.legacy_key_size() {
            outer.set_key(key_slice(&header_key, 0, mode_key_size)?)?;
        }

        for &algorithm in &input.algorithms.algorithms {
            if !algorithm.is_mode_supported(mode) {
                continue;
            }
            if cancelled() {
                return Ok(None);
            }

            let key_size = algorithm.key_size();
            let mut ea = algorithm.new_suite();

            // XTS takes its tweak key right behind the cipher key, so it gets
            // a fresh mode instance per cipher.
            let transform = if mode.is_dual_key() {
                ea.set_key(key_slice(&header_key, 0, key_size)?)?;
                let mut transform = outer.get_new();
                transform.set_key(key_slice(&header_key, key_size, key_size)?)?;
                transform
            } else {
                ea.set_key(key_slice(&header_key, LEGACY_ENCRYPTION_MODE_KEY_AREA_SIZE, key_size)?)?;
                outer.clone()
            };
            ea.set_mode(transform)?;

            scratch.copy_from_slice(input.encrypted_header);
            ea.decrypt(&mut scratch)?;
            trials += 1;

            if candidate.deserialize(&scratch, algorithm, mode, input.truecrypt_mode)? {
                candidate.salt.copy_from_slice(input.salt);
                candidate.header_key = header_key.to_vec();
                candidate.kdf = Some(*kdf);

                log::debug!(
                    "Volume header decrypted using {} with {} in {} mode",
                    kdf.name(),
                    algorithm.name(),
                    mode.name()
                );
                log::trace!("{} cipher trials for {}", trials, kdf.name());
                return Ok(Some(candidate));
            }
        }
    }

    log::trace!("{} cipher trials for {}, no match", trials, kdf.name());
    Ok(None)
}
