//! Crypto collaborator: digests, AES-256-CBC, Base64 and entropy.
//!
//! Thin wrappers over pure-Rust primitives so the protocol layers see
//! plain byte arrays and `Option` results instead of cipher traits.
//!
//! | Operation            | Backend                      |
//! |----------------------|------------------------------|
//! | SHA-256              | `hmac-sha256`                |
//! | SHA-1                | `sha1`                       |
//! | AES-256-CBC / PKCS#7 | `aes` + `cbc`                |
//! | Base64               | `base64` standard alphabet   |
//! | Entropy              | `esp_fill_random` / host RNG |

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha1::Digest as _;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const SHA1_LEN: usize = 20;
pub const SHA256_LEN: usize = 32;

/// Hash family used for one-time authorization digests.
/// Fixed per deployment; the digest length follows from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum HashAlgo {
    Sha1,
    #[default]
    Sha256,
}

impl HashAlgo {
    pub const fn digest_len(self) -> usize {
        match self {
            Self::Sha1 => SHA1_LEN,
            Self::Sha256 => SHA256_LEN,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => sha1(data).to_vec(),
            Self::Sha256 => sha256(data).to_vec(),
        }
    }
}

pub fn sha1(data: &[u8]) -> [u8; SHA1_LEN] {
    sha1::Sha1::digest(data).into()
}

pub fn sha256(data: &[u8]) -> [u8; SHA256_LEN] {
    hmac_sha256::Hash::hash(data)
}

// ── AES-256-CBC ──────────────────────────────────────────────

pub fn aes256_cbc_encrypt(key: &[u8; 32], iv: &[u8; 16], plain: &[u8]) -> Option<Vec<u8>> {
    let enc = Aes256CbcEnc::new_from_slices(key, iv).ok()?;
    Some(enc.encrypt_padded_vec_mut::<Pkcs7>(plain))
}

/// Returns `None` on a ragged ciphertext or bad padding.
pub fn aes256_cbc_decrypt(key: &[u8; 32], iv: &[u8; 16], cipher: &[u8]) -> Option<Vec<u8>> {
    let dec = Aes256CbcDec::new_from_slices(key, iv).ok()?;
    dec.decrypt_padded_vec_mut::<Pkcs7>(cipher).ok()
}

// ── Encodings ────────────────────────────────────────────────

pub fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn base64_decode(text: &str) -> Option<Vec<u8>> {
    STANDARD.decode(text).ok()
}

/// Lowercase hex, two characters per byte.
pub fn to_hex(bytes: &[u8]) -> String {
    use core::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

pub fn from_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    text.as_bytes()
        .chunks(2)
        .map(|pair| {
            let s = core::str::from_utf8(pair).ok()?;
            u8::from_str_radix(s, 16).ok()
        })
        .collect()
}

/// Constant-time equality for digests of equal length.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ── Entropy ──────────────────────────────────────────────────

/// Fill `buf` from the hardware RNG.
#[cfg(target_os = "espidf")]
pub fn fill_random(buf: &mut [u8]) {
    // SAFETY: esp_fill_random writes exactly `len` bytes into the
    // provided buffer, which is valid and exclusively borrowed.
    unsafe {
        esp_idf_sys::esp_fill_random(buf.as_mut_ptr().cast(), buf.len());
    }
}

/// Simulation: `RandomState` seeds give per-call entropy. Not for key material.
#[cfg(not(target_os = "espidf"))]
pub fn fill_random(buf: &mut [u8]) {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    for chunk in buf.chunks_mut(8) {
        let mut h = RandomState::new().build_hasher();
        h.write_usize(chunk.as_ptr() as usize);
        let val = h.finish().to_le_bytes();
        chunk.copy_from_slice(&val[..chunk.len()]);
    }
}
