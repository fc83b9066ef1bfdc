//! Key streams used to XOR strings, scripts and List.wz canvases.
//!
//! Every region of the game ships archives encrypted with the same AES key but a different
//! initialization vector. The stream is the AES-256-ECB chain seeded with the vector repeated four
//! times: block `0` is the encryption of the seed, block `n` the encryption of block `n - 1`.
//! An all-zero vector produces an all-zero stream.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes256;
use tracing::warn;

/// AES key trimmed from the 128 byte user key (every 16th byte, stored as little-endian u32s)
const AES_KEY: [u8; 32] = [
    0x13, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0xB4, 0x00, 0x00, 0x00,
    0x1B, 0x00, 0x00, 0x00, 0x0F, 0x00, 0x00, 0x00, 0x33, 0x00, 0x00, 0x00, 0x52, 0x00, 0x00, 0x00,
];

/// Initialization vector of the global client
pub const GMS_IV: [u8; 4] = [0x4D, 0x23, 0xC7, 0x2B];

/// Initialization vector of the european and south-east asian clients
pub const EMS_IV: [u8; 4] = [0xB9, 0x7D, 0x63, 0xE9];

/// The stream grows in batches of this many bytes
const BATCH: usize = 4096;

/// Region specific parameters feeding the key stream
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum KeyProfile {
    /// Global client
    Gms,

    /// European and south-east asian clients
    Ems,

    /// Unencrypted archives (BMS and classic clients)
    #[default]
    None,

    /// Any other initialization vector
    Custom([u8; 4]),
}

impl KeyProfile {
    /// Profiles tried when detecting the key of an archive
    pub const KNOWN: [KeyProfile; 3] = [KeyProfile::Gms, KeyProfile::Ems, KeyProfile::None];

    /// Initialization vector of this profile
    pub fn iv(&self) -> [u8; 4] {
        match self {
            KeyProfile::Gms => GMS_IV,
            KeyProfile::Ems => EMS_IV,
            KeyProfile::None => [0; 4],
            KeyProfile::Custom(iv) => *iv,
        }
    }

    /// Look up a profile by region name.
    ///
    /// Unrecognized names select [`KeyProfile::None`] so that unencrypted archives can still be read.
    pub fn from_name(name: &str) -> KeyProfile {
        match name.trim().to_ascii_lowercase().as_str() {
            "gms" | "global" => KeyProfile::Gms,
            "ems" | "msea" | "sea" | "europe" => KeyProfile::Ems,
            "bms" | "classic" | "none" => KeyProfile::None,
            other => {
                warn!("unknown key profile {other}, falling back to none");
                KeyProfile::None
            }
        }
    }
}

impl fmt::Display for KeyProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyProfile::Gms => write!(f, "gms"),
            KeyProfile::Ems => write!(f, "ems"),
            KeyProfile::None => write!(f, "none"),
            KeyProfile::Custom(iv) => write!(f, "custom({:02X?})", iv),
        }
    }
}

/// Byte `index` of the stream for `profile`.
///
/// Builds a fresh stream on every call; keep a [`KeyStream`] around for repeated lookups.
pub fn keystream(profile: KeyProfile, index: usize) -> u8 {
    KeyStream::new(profile).at(index)
}

/// Lazily expanded XOR pad for a [`KeyProfile`]
///
/// ```
/// use wz_archive::keys::{KeyProfile, KeyStream};
///
/// let key = KeyStream::new(KeyProfile::Gms);
/// assert_eq!(key.at(0), 0x96);
/// assert_eq!(KeyStream::new(KeyProfile::None).at(10_000), 0);
/// ```
pub struct KeyStream {
    profile: KeyProfile,
    cipher: Option<Aes256>,
    bytes: RwLock<Vec<u8>>,
}

impl fmt::Debug for KeyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyStream({})", self.profile)
    }
}

impl KeyStream {
    /// Create the stream for a profile. Nothing is generated until a byte is requested.
    pub fn new(profile: KeyProfile) -> Self {
        let iv = profile.iv();
        let cipher = (u32::from_le_bytes(iv) != 0)
            .then(|| Aes256::new(GenericArray::from_slice(&AES_KEY)));

        Self {
            profile,
            cipher,
            bytes: RwLock::new(Vec::new()),
        }
    }

    /// The stream scripts are always encrypted with, regardless of the archive's profile
    pub fn lua() -> Self {
        Self::new(KeyProfile::Ems)
    }

    /// The profile this stream was derived from
    pub fn profile(&self) -> KeyProfile {
        self.profile
    }

    /// Byte `index` of the stream
    pub fn at(&self, index: usize) -> u8 {
        self.with_bytes(index + 1, |k| k[index])
    }

    /// First `len` bytes of the stream
    pub fn prefix(&self, len: usize) -> Vec<u8> {
        self.with_bytes(len, |k| k[..len].to_vec())
    }

    /// XOR `data` with the stream starting at byte 0
    pub fn xor(&self, data: &mut [u8]) {
        self.with_bytes(data.len(), |k| {
            data.iter_mut().zip(k).for_each(|(b, k)| *b ^= k);
        })
    }

    /// Run `f` over at least `len` bytes of generated stream
    pub(crate) fn with_bytes<T>(&self, len: usize, f: impl FnOnce(&[u8]) -> T) -> T {
        self.ensure(len);
        let bytes = self.bytes.read().unwrap_or_else(PoisonError::into_inner);
        f(&bytes)
    }

    fn ensure(&self, len: usize) {
        if self.bytes.read().unwrap_or_else(PoisonError::into_inner).len() >= len {
            return;
        }

        let mut bytes = self.bytes.write().unwrap_or_else(PoisonError::into_inner);
        let target = len.div_ceil(BATCH) * BATCH;
        let Some(cipher) = &self.cipher else {
            if bytes.len() < target {
                bytes.resize(target, 0);
            }
            return;
        };

        let seed = match bytes.len() {
            0 => {
                let iv = self.profile.iv();
                let mut seed = [0u8; 16];
                seed.iter_mut()
                    .enumerate()
                    .for_each(|(i, b)| *b = iv[i % 4]);
                seed
            }
            n => {
                let mut seed = [0u8; 16];
                seed.copy_from_slice(&bytes[n - 16..]);
                seed
            }
        };

        let mut block = GenericArray::from(seed);
        while bytes.len() < target {
            cipher.encrypt_block(&mut block);
            bytes.extend_from_slice(&block);
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use super::{keystream, KeyProfile, KeyStream};

    #[test]
    fn gms_stream_prefix() {
        #[rustfmt::skip]
        let expected = vec![
            0x96, 0xAE, 0x3F, 0xA4, 0x48, 0xFA, 0xDD, 0x90,
            0x46, 0x76, 0x05, 0x61, 0x97, 0xCE, 0x78, 0x68,
            0x2B, 0xA0, 0x44, 0x8F,
        ];

        assert_eq!(KeyStream::new(KeyProfile::Gms).prefix(20), expected);
    }

    #[test]
    fn ems_stream_prefix() {
        #[rustfmt::skip]
        let expected = vec![
            0xAB, 0x65, 0x49, 0x05, 0x67, 0xCD, 0x57, 0x0A,
            0x98, 0x7B, 0x87, 0x0A, 0xEC, 0x65, 0x07, 0x8B,
        ];

        assert_eq!(KeyStream::new(KeyProfile::Ems).prefix(16), expected);
        assert_eq!(KeyStream::lua().prefix(16), expected);
    }

    #[test]
    fn unencrypted_stream_is_zero() {
        let key = KeyStream::new(KeyProfile::None);
        assert!(key.prefix(9000).iter().all(|b| *b == 0));

        let custom = KeyStream::new(KeyProfile::Custom([0; 4]));
        assert_eq!(custom.at(123), 0);
    }

    #[test]
    fn growth_is_deterministic() {
        let stepped = KeyStream::new(KeyProfile::Gms);
        let _ = stepped.at(10);
        let _ = stepped.at(5000);
        let direct = KeyStream::new(KeyProfile::Gms);

        assert_eq!(stepped.prefix(9000), direct.prefix(9000));
        assert_eq!(stepped.at(4096), direct.at(4096));
        assert_eq!(keystream(KeyProfile::Gms, 4100), direct.at(4100));
    }

    #[traced_test]
    #[test]
    fn unknown_profile_name_falls_back_to_none() {
        assert_eq!(KeyProfile::from_name("GMS"), KeyProfile::Gms);
        assert_eq!(KeyProfile::from_name("msea"), KeyProfile::Ems);
        assert_eq!(KeyProfile::from_name("atlantis"), KeyProfile::None);
        assert!(logs_contain("falling back to none"));
    }

    #[test]
    fn xor_is_symmetric() {
        let key = KeyStream::new(KeyProfile::Ems);
        let mut data = b"Property".to_vec();
        key.xor(&mut data);
        assert_ne!(data, b"Property".to_vec());
        key.xor(&mut data);
        assert_eq!(data, b"Property".to_vec());
    }
}
