use aes::Aes256;
use camellia::Camellia256;
use cipher::consts::{U1, U16};
use cipher::generic_array::GenericArray;
use cipher::inout::InOut;
use cipher::{
    Block, BlockBackend, BlockCipher, BlockClosure, BlockDecrypt, BlockEncrypt, BlockSizeUser,
    KeyInit, ParBlocksSizeUser,
};
use kuznyechik::Kuznyechik;
use serpent::Serpent;
use thiserror::Error;
use twofish::Twofish;
use xts_mode::{get_tweak_default, Xts128};
use zeroize::{Zeroize, Zeroizing};

/// Block size shared by every primitive we support.
pub const CIPHER_BLOCK_SIZE: usize = 16;

/// Key size of every primitive we support (256-bit keys only).
pub const PRIMITIVE_KEY_SIZE: usize = 32;

/// XTS processes the header and volume data in units of this many bytes.
pub const ENCRYPTION_DATA_UNIT_SIZE: usize = 512;

/// Key size of the LRW tweak multiplier (one cipher block).
pub const LRW_KEY_SIZE: usize = CIPHER_BLOCK_SIZE;

/// First LRW block index used when a buffer is encrypted as a whole.
pub const LRW_START_BLOCK_INDEX: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("Data length {0} is not a multiple of the cipher block size")]
    InvalidDataLength(usize),
    #[error("Cipher mode {mode} is not supported by {algorithm}")]
    UnsupportedMode {
        algorithm: &'static str,
        mode: &'static str,
    },
    #[error("Cipher key has not been set")]
    KeyNotSet,
    #[error("Cipher mode has not been set")]
    ModeNotSet,
}

/// The block ciphers that algorithms and cascades are built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherKind {
    Aes,
    Serpent,
    Twofish,
    Camellia,
    Kuznyechik,
}

impl CipherKind {
    pub fn name(self) -> &'static str {
        match self {
            CipherKind::Aes => "AES",
            CipherKind::Serpent => "Serpent",
            CipherKind::Twofish => "Twofish",
            CipherKind::Camellia => "Camellia",
            CipherKind::Kuznyechik => "Kuznyechik",
        }
    }
}

// A keyed primitive. The RustCrypto trait impls below let it sit inside
// `Xts128` regardless of which cipher it wraps.
pub(crate) enum BlockPrimitive {
    Aes(Aes256),
    Serpent(Serpent),
    Twofish(Twofish),
    Camellia(Camellia256),
    Kuznyechik(Kuznyechik),
}

impl BlockPrimitive {
    pub(crate) fn new(kind: CipherKind, key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != PRIMITIVE_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: PRIMITIVE_KEY_SIZE,
                actual: key.len(),
            });
        }
        // Serpent takes 256-bit keys only through `new_from_slice`.
        let invalid = |_| CryptoError::InvalidKeyLength {
            expected: PRIMITIVE_KEY_SIZE,
            actual: key.len(),
        };
        Ok(match kind {
            CipherKind::Aes => BlockPrimitive::Aes(Aes256::new_from_slice(key).map_err(invalid)?),
            CipherKind::Serpent => BlockPrimitive::Serpent(Serpent::new_from_slice(key).map_err(invalid)?),
            CipherKind::Twofish => BlockPrimitive::Twofish(Twofish::new_from_slice(key).map_err(invalid)?),
            CipherKind::Camellia => BlockPrimitive::Camellia(Camellia256::new_from_slice(key).map_err(invalid)?),
            CipherKind::Kuznyechik => BlockPrimitive::Kuznyechik(Kuznyechik::new_from_slice(key).map_err(invalid)?),
        })
    }

    fn encrypt_one(&self, block: &mut Block<Self>) {
        match self {
            BlockPrimitive::Aes(c) => c.encrypt_block(block),
            BlockPrimitive::Serpent(c) => c.encrypt_block(block),
            BlockPrimitive::Twofish(c) => c.encrypt_block(block),
            BlockPrimitive::Camellia(c) => c.encrypt_block(block),
            BlockPrimitive::Kuznyechik(c) => c.encrypt_block(block),
        }
    }

    fn decrypt_one(&self, block: &mut Block<Self>) {
        match self {
            BlockPrimitive::Aes(c) => c.decrypt_block(block),
            BlockPrimitive::Serpent(c) => c.decrypt_block(block),
            BlockPrimitive::Twofish(c) => c.decrypt_block(block),
            BlockPrimitive::Camellia(c) => c.decrypt_block(block),
            BlockPrimitive::Kuznyechik(c) => c.decrypt_block(block),
        }
    }
}

impl BlockSizeUser for BlockPrimitive {
    type BlockSize = U16;
}

impl BlockCipher for BlockPrimitive {}

struct PrimitiveEncryptBackend<'a>(&'a BlockPrimitive);

impl<'a> BlockSizeUser for PrimitiveEncryptBackend<'a> {
    type BlockSize = U16;
}
impl<'a> ParBlocksSizeUser for PrimitiveEncryptBackend<'a> {
    type ParBlocksSize = U1;
}
impl<'a> BlockBackend for PrimitiveEncryptBackend<'a> {
    fn proc_block(&mut self, mut block: InOut<'_, '_, Block<Self>>) {
        let mut b = block.clone_in();
        self.0.encrypt_one(&mut b);
        *block.get_out() = b;
    }
}

impl BlockEncrypt for BlockPrimitive {
    fn encrypt_with_backend(&self, f: impl BlockClosure<BlockSize = Self::BlockSize>) {
        let mut backend = PrimitiveEncryptBackend(self);
        f.call(&mut backend);
    }
}

struct PrimitiveDecryptBackend<'a>(&'a BlockPrimitive);

impl<'a> BlockSizeUser for PrimitiveDecryptBackend<'a> {
    type BlockSize = U16;
}
impl<'a> ParBlocksSizeUser for PrimitiveDecryptBackend<'a> {
    type ParBlocksSize = U1;
}
impl<'a> BlockBackend for PrimitiveDecryptBackend<'a> {
    fn proc_block(&mut self, mut block: InOut<'_, '_, Block<Self>>) {
        let mut b = block.clone_in();
        self.0.decrypt_one(&mut b);
        *block.get_out() = b;
    }
}

impl BlockDecrypt for BlockPrimitive {
    fn decrypt_with_backend(&self, f: impl BlockClosure<BlockSize = Self::BlockSize>) {
        let mut backend = PrimitiveDecryptBackend(self);
        f.call(&mut backend);
    }
}

/// One cipher of a cascade, bound to the mode it runs under.
pub(crate) enum Layer {
    Xts(Xts128<BlockPrimitive>),
    Lrw {
        cipher: BlockPrimitive,
        tweak_key: Zeroizing<u128>,
    },
}

impl Layer {
    pub(crate) fn xts(kind: CipherKind, key: &[u8], tweak_key: &[u8]) -> Result<Self, CryptoError> {
        let cipher_1 = BlockPrimitive::new(kind, key)?;
        let cipher_2 = BlockPrimitive::new(kind, tweak_key)?;
        Ok(Layer::Xts(Xts128::new(cipher_1, cipher_2)))
    }

    pub(crate) fn lrw(kind: CipherKind, key: &[u8], tweak_key: &[u8]) -> Result<Self, CryptoError> {
        let bytes: Zeroizing<[u8; LRW_KEY_SIZE]> = Zeroizing::new(tweak_key.try_into().map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: LRW_KEY_SIZE,
                actual: tweak_key.len(),
            }
        })?);
        Ok(Layer::Lrw {
            cipher: BlockPrimitive::new(kind, key)?,
            tweak_key: Zeroizing::new(u128::from_be_bytes(*bytes)),
        })
    }

    // Callers guarantee `data.len()` is a non-zero multiple of the block size.
    pub(crate) fn encrypt(&self, data: &mut [u8]) {
        match self {
            Layer::Xts(xts) => xts.encrypt_area(data, ENCRYPTION_DATA_UNIT_SIZE, 0, get_tweak_default),
            Layer::Lrw { cipher, tweak_key } => {
                lrw_process(cipher, tweak_key, data, LRW_START_BLOCK_INDEX, true)
            }
        }
    }

    pub(crate) fn decrypt(&self, data: &mut [u8]) {
        match self {
            Layer::Xts(xts) => xts.decrypt_area(data, ENCRYPTION_DATA_UNIT_SIZE, 0, get_tweak_default),
            Layer::Lrw { cipher, tweak_key } => {
                lrw_process(cipher, tweak_key, data, LRW_START_BLOCK_INDEX, false)
            }
        }
    }
}

fn lrw_process(cipher: &BlockPrimitive, tweak_key: &u128, data: &mut [u8], start: u64, encrypt: bool) {
    for (i, chunk) in data.chunks_exact_mut(CIPHER_BLOCK_SIZE).enumerate() {
        let index = u128::from(start) + i as u128;
        let mut whitening = gf128_mul(*tweak_key, index).to_be_bytes();

        xor_in_place(chunk, &whitening);
        let block = GenericArray::from_mut_slice(chunk);
        if encrypt {
            cipher.encrypt_block(block);
        } else {
            cipher.decrypt_block(block);
        }
        xor_in_place(chunk, &whitening);
        whitening.zeroize();
    }
}

fn xor_in_place(dst: &mut [u8], src: &[u8; CIPHER_BLOCK_SIZE]) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d ^= s;
    }
}

/// Multiplication in GF(2^128) modulo x^128 + x^7 + x^2 + x + 1, with the
/// field element held as a big-endian integer (bit i = coefficient of x^i).
pub(crate) fn gf128_mul(a: u128, b: u128) -> u128 {
    let mut acc = 0u128;
    let mut a = a;
    let mut b = b;
    while b != 0 {
        if b & 1 == 1 {
            acc ^= a;
        }
        let carry = a >> 127;
        a <<= 1;
        if carry == 1 {
            a ^= 0x87;
        }
        b >>= 1;
    }
    acc
}
