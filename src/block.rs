//! Fixed-size encrypted blocks.
//!
//! A block in the store is an opaque blob of `size + IV_LEN` bytes under a
//! random name. In memory it is a plaintext buffer of exactly `size` bytes;
//! a read-modify-write cycle decrypts the whole block, patches byte ranges
//! in place and encrypts the whole block again, so the backend never sees a
//! partial plaintext.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::crypto::Cipher;
use crate::error::{Error, Result};
use crate::store::BlobStore;

/// Entry in the index's block registry: the block's blob name, its fixed
/// capacity, and the name of its successor in the chain (empty at the tail).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BlockMeta {
    pub filename: String,
    pub size: u64,
    pub next: String,
}

impl BlockMeta {
    /// A freshly created tail block.
    pub fn fresh(filename: String, size: u64) -> Self {
        Self {
            filename,
            size,
            next: String::new(),
        }
    }
}

/// Generates a block name: 32 bytes of OS randomness as lowercase hex.
pub fn random_block_name() -> String {
    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    hex::encode(raw)
}

/// A materialised plaintext block buffer.
#[derive(Debug)]
pub struct Block {
    name: String,
    bytes: Vec<u8>,
}

impl Block {
    /// A zero-filled buffer for a block that does not exist in the store yet.
    pub fn zeroed(name: &str, size: u64) -> Self {
        Self {
            name: name.to_string(),
            bytes: vec![0u8; size as usize],
        }
    }

    /// Fetches and decrypts a block. The decrypted length must match the
    /// size the index records for it.
    pub fn load(
        name: &str,
        expected_len: u64,
        cipher: &Cipher,
        store: &dyn BlobStore,
    ) -> Result<Self> {
        let raw = store.read(name)?;
        let bytes = cipher.decrypt(&raw)?;
        if bytes.len() as u64 != expected_len {
            return Err(Error::Corrupt(format!(
                "block `{name}` decrypted to {} bytes, index records {expected_len}",
                bytes.len()
            )));
        }
        Ok(Self {
            name: name.to_string(),
            bytes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Overwrites `bytes[start..start + data.len()]` in place, truncating a
    /// write that runs past the end of the buffer. Returns the number of
    /// bytes actually written. The buffer never grows.
    pub fn overwrite(&mut self, start: u64, data: &[u8]) -> Result<usize> {
        let size = self.bytes.len() as u64;
        if start >= size {
            return Err(Error::OutOfRange { start, size });
        }
        let start = start as usize;
        let end = (start + data.len()).min(self.bytes.len());
        let written = end - start;
        self.bytes[start..end].copy_from_slice(&data[..written]);
        Ok(written)
    }

    /// Borrows the half-open byte range `[start, end)`.
    pub fn range(&self, start: u64, end: u64) -> Result<&[u8]> {
        if start > end || end > self.bytes.len() as u64 {
            return Err(Error::Corrupt(format!(
                "range [{start}, {end}) is outside block `{}` of {} bytes",
                self.name,
                self.bytes.len()
            )));
        }
        Ok(&self.bytes[start as usize..end as usize])
    }

    /// Encrypts the whole buffer and writes it under the block's name.
    pub fn store(&self, cipher: &Cipher, store: &dyn BlobStore) -> Result<()> {
        let sealed = cipher.encrypt(&self.bytes)?;
        store.write(&self.name, &sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Kdf;
    use crate::crypto::{derive_key, IV_LEN};
    use crate::store::MemStore;

    fn block_with(bytes: &[u8]) -> Block {
        let mut block = Block::zeroed("b10ck", bytes.len() as u64);
        block.overwrite(0, bytes).unwrap();
        block
    }

    fn cipher() -> Cipher {
        Cipher::new(derive_key(b"block tests", Kdf::Md5))
    }

    #[test]
    fn overwrite_start_past_end() {
        let mut block = block_with(&[1, 2, 3]);
        let err = block.overwrite(3, &[5]).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { start: 3, size: 3 }));
        assert_eq!(block.range(0, 3).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn overwrite_truncates_at_end() {
        let mut block = block_with(&[1, 2, 3]);
        assert_eq!(block.overwrite(2, &[5, 6]).unwrap(), 1);
        assert_eq!(block.range(0, 3).unwrap(), &[1, 2, 5]);
    }

    #[test]
    fn overwrite_in_bounds() {
        let mut block = block_with(&[1, 2, 3]);
        assert_eq!(block.overwrite(0, &[5, 6]).unwrap(), 2);
        assert_eq!(block.range(0, 3).unwrap(), &[5, 6, 3]);
    }

    #[test]
    fn overwrite_whole_buffer_truncates_excess() {
        let mut block = block_with(&[1, 2, 3]);
        assert_eq!(block.overwrite(0, &[5, 6, 7, 8]).unwrap(), 3);
        assert_eq!(block.range(0, 3).unwrap(), &[5, 6, 7]);
    }

    #[test]
    fn store_and_load_roundtrip() {
        let store = MemStore::new();
        let cipher = cipher();
        let mut block = Block::zeroed("blk", 64);
        block.overwrite(10, b"payload").unwrap();
        block.store(&cipher, &store).unwrap();

        assert_eq!(store.raw("blk").unwrap().len(), 64 + IV_LEN);

        let loaded = Block::load("blk", 64, &cipher, &store).unwrap();
        assert_eq!(loaded.range(10, 17).unwrap(), b"payload");
        assert_eq!(loaded.range(0, 10).unwrap(), &[0u8; 10]);
    }

    #[test]
    fn load_rejects_size_mismatch() {
        let store = MemStore::new();
        let cipher = cipher();
        Block::zeroed("blk", 64).store(&cipher, &store).unwrap();
        let err = Block::load("blk", 128, &cipher, &store).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn load_missing_blob() {
        let store = MemStore::new();
        let err = Block::load("absent", 64, &cipher(), &store).unwrap_err();
        assert!(matches!(err, Error::BlobNotFound(name) if name == "absent"));
    }

    #[test]
    fn block_names_are_64_hex_chars() {
        let a = random_block_name();
        let b = random_block_name();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
    }
}
