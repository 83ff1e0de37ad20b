//! Symmetric confidentiality for blobs.
//!
//! Every blob (data block or index document) is encrypted independently with
//! AES-128-CFB. Each encryption draws a fresh random IV and stores it as the
//! first 16 bytes of the ciphertext, so the ciphertext is always exactly
//! `IV_LEN` bytes longer than the plaintext and two encryptions of the same
//! payload never match. CFB carries no authentication tag: tampering is not
//! detected at this layer, and a wrong key surfaces as garbage plaintext
//! rather than a decryption failure. This is a property of the on-disk
//! format, which is kept compatible with existing stores.

use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use aes::Aes128;
use md5::Md5;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::config::Kdf;
use crate::error::{Error, Result};

/// Length of the random IV prefixed to every ciphertext.
pub const IV_LEN: usize = 16;

/// AES-128 key length.
pub const KEY_LEN: usize = 16;

type Aes128CfbEnc = cfb_mode::Encryptor<Aes128>;
type Aes128CfbDec = cfb_mode::Decryptor<Aes128>;

/// Derives the 16-byte AES key from user-supplied key material.
///
/// `Kdf::Md5` matches the digest existing stores were written with;
/// `Kdf::Sha256` is the stronger option for new stores (truncated to the
/// key length the cipher interface requires).
pub fn derive_key(material: &[u8], kdf: Kdf) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    match kdf {
        Kdf::Md5 => key.copy_from_slice(&Md5::digest(material)),
        Kdf::Sha256 => key.copy_from_slice(&Sha256::digest(material)[..KEY_LEN]),
    }
    key
}

pub struct Cipher {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

impl Cipher {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Builds a cipher from a raw key slice, rejecting anything that is not
    /// exactly [`KEY_LEN`] bytes.
    pub fn from_key_bytes(key: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = key.try_into().map_err(|_| Error::InvalidKey {
            expected: KEY_LEN,
            actual: key.len(),
        })?;
        Ok(Self::new(key))
    }

    /// Encrypts `plaintext` under a fresh random IV.
    ///
    /// The result is `IV_LEN + plaintext.len()` bytes: the IV, then the
    /// CFB-encrypted payload.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut out = vec![0u8; IV_LEN + plaintext.len()];
        OsRng.fill_bytes(&mut out[..IV_LEN]);
        out[IV_LEN..].copy_from_slice(plaintext);
        let (iv, body) = out.split_at_mut(IV_LEN);
        Aes128CfbEnc::new_from_slices(&self.key, iv)
            .map_err(|_| Error::InvalidKey {
                expected: KEY_LEN,
                actual: self.key.len(),
            })?
            .encrypt(body);
        Ok(out)
    }

    /// Decrypts a ciphertext produced by [`Cipher::encrypt`].
    ///
    /// Fails with [`Error::CiphertextTooShort`] when the input cannot even
    /// hold the IV. A wrong key does not fail here; it yields garbage.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < IV_LEN {
            return Err(Error::CiphertextTooShort {
                len: ciphertext.len(),
                min: IV_LEN,
            });
        }
        let (iv, body) = ciphertext.split_at(IV_LEN);
        let mut out = body.to_vec();
        Aes128CfbDec::new_from_slices(&self.key, iv)
            .map_err(|_| Error::InvalidKey {
                expected: KEY_LEN,
                actual: self.key.len(),
            })?
            .decrypt(&mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> Cipher {
        Cipher::new(derive_key(b"a test passphrase", Kdf::Md5))
    }

    #[test]
    fn roundtrip() {
        let cipher = cipher();
        for payload in [&b""[..], &b"x"[..], &b"hello world"[..], &[0xabu8; 5000][..]] {
            let sealed = cipher.encrypt(payload).unwrap();
            assert_eq!(sealed.len(), payload.len() + IV_LEN);
            let opened = cipher.decrypt(&sealed).unwrap();
            assert_eq!(opened, payload);
        }
    }

    #[test]
    fn fresh_iv_every_time() {
        let cipher = cipher();
        let a = cipher.encrypt(b"same payload").unwrap();
        let b = cipher.encrypt(b"same payload").unwrap();
        assert_ne!(a, b);
        assert_ne!(a[..IV_LEN], b[..IV_LEN]);
    }

    #[test]
    fn rejects_short_ciphertext() {
        let err = cipher().decrypt(&[0u8; 15]).unwrap_err();
        assert!(matches!(
            err,
            Error::CiphertextTooShort { len: 15, min: 16 }
        ));
    }

    #[test]
    fn wrong_key_yields_garbage() {
        let sealed = cipher().encrypt(b"secret contents").unwrap();
        let other = Cipher::new(derive_key(b"another passphrase", Kdf::Md5));
        let opened = other.decrypt(&sealed).unwrap();
        assert_eq!(opened.len(), b"secret contents".len());
        assert_ne!(opened, b"secret contents");
    }

    #[test]
    fn rejects_bad_key_length() {
        let err = Cipher::from_key_bytes(&[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidKey {
                expected: 16,
                actual: 3
            }
        ));
    }

    #[test]
    fn md5_derivation_matches_reference_digest() {
        assert_eq!(
            hex::encode(derive_key(b"abc", Kdf::Md5)),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[test]
    fn sha256_derivation_is_truncated_digest() {
        assert_eq!(
            hex::encode(derive_key(b"abc", Kdf::Sha256)),
            "ba7816bf8f01cfea414140de5dae2223"
        );
    }
}
