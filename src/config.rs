use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Default config file location, relative to the working directory.
pub const CONFIG_FILE_PATH: &str = "config.json";
/// Default size of every newly created block (5 MiB).
pub const DEFAULT_BLOCK_SIZE: u64 = 5_242_880;
/// Default minimum free-gap size the allocator will consider usable.
pub const DEFAULT_CHUNK_SIZE: u64 = 512;
/// Default name of the index blob in the store.
pub const DEFAULT_INDEX_FILE: &str = "index";

/// Key derivation function applied to the user's key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kdf {
    /// Bit-compatible with existing stores.
    #[default]
    Md5,
    /// Stronger digest for new stores; changing this on an existing store
    /// makes it unreadable.
    Sha256,
}

/// Remote HTTP object store. When present, blobs go to
/// `{Endpoint}/{name}` instead of the local filesystem.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteConfig {
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    pub block_size: u64,
    pub chunk_size: u64,
    pub index_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,
    pub kdf: Kdf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            index_file: DEFAULT_INDEX_FILE.to_string(),
            key_file: None,
            store_dir: None,
            kdf: Kdf::default(),
            remote: None,
        }
    }
}

impl Config {
    /// Loads a JSON config file. Missing fields fall back to defaults,
    /// unknown fields are ignored.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs_err::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            bail!("BlockSize must be at least 1 byte");
        }
        if self.chunk_size == 0 {
            bail!("ChunkSize must be at least 1 byte");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.block_size, 5_242_880);
        assert_eq!(config.chunk_size, 512);
        assert_eq!(config.index_file, "index");
        assert_eq!(config.kdf, Kdf::Md5);
        assert!(config.key_file.is_none());
        assert!(config.remote.is_none());
    }

    #[test]
    fn parses_pascal_case_fields() {
        let file = write_config(
            r#"{
                "BlockSize": 1024,
                "ChunkSize": 16,
                "IndexFile": "idx",
                "KeyFile": "/tmp/key",
                "StoreDir": "/tmp/store",
                "Kdf": "sha256",
                "Remote": { "Endpoint": "http://localhost:9000/bucket", "AccessToken": "t" }
            }"#,
        );
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.block_size, 1024);
        assert_eq!(config.chunk_size, 16);
        assert_eq!(config.index_file, "idx");
        assert_eq!(config.key_file.as_deref(), Some(Path::new("/tmp/key")));
        assert_eq!(config.store_dir.as_deref(), Some(Path::new("/tmp/store")));
        assert_eq!(config.kdf, Kdf::Sha256);
        assert_eq!(
            config.remote.unwrap().endpoint,
            "http://localhost:9000/bucket"
        );
    }

    #[test]
    fn ignores_unknown_fields() {
        let file = write_config(r#"{ "BlockSize": 2048, "SomethingElse": true }"#);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.block_size, 2048);
        assert_eq!(config.chunk_size, 512);
    }

    #[test]
    fn rejects_zero_block_size() {
        let file = write_config(r#"{ "BlockSize": 0 }"#);
        assert!(Config::load(file.path()).is_err());
    }
}
