pub mod block;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod index;
pub mod store;

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tempfile::NamedTempFile;
use tracing::debug;

pub use crate::config::Config;
pub use crate::crypto::Cipher;
pub use crate::error::Error;
pub use crate::index::Index;
pub use crate::store::BlobStore;

use crate::cli::Cli;
use crate::store::{HttpStore, LocalStore};

/// Runs one CLI invocation: wire up config, key, backend and index, perform
/// the requested operation, and persist the index for mutating flows.
pub fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let material = key_material(&cli, &config)?;
    let cipher = Cipher::new(crypto::derive_key(&material, config.kdf));
    let store = open_store(&config)?;
    let mut index = Index::load(store.as_ref(), &cipher, &config)?;

    if let Some(name) = &cli.get_file {
        return get_to_output(&index, name, cli.output.as_deref(), store.as_ref(), &cipher);
    }

    if let Some(path) = &cli.add_file {
        let file = fs_err::File::open(path)?;
        let size = file.metadata()?.len();
        let filename = path.display().to_string();
        index
            .add_file(
                &filename,
                size,
                io::BufReader::new(file),
                store.as_ref(),
                &cipher,
            )
            .with_context(|| format!("failed to add `{filename}`"))?;
    }

    if let Some(name) = &cli.delete_file {
        index
            .delete_file(name, store.as_ref(), &cipher, true)
            .with_context(|| format!("failed to delete `{name}`"))?;
    }

    println!("Files:");
    let mut files = index.list_files();
    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    for file in &files {
        println!("\t{}", file.filename);
    }

    index.save(store.as_ref(), &cipher)?;
    Ok(())
}

/// Streams a retrieval either to stdout or, via a temp file persisted on
/// success, to `--output` — a failed retrieval must not leave a partial
/// output file behind.
fn get_to_output(
    index: &Index,
    name: &str,
    output: Option<&Path>,
    store: &dyn BlobStore,
    cipher: &Cipher,
) -> Result<()> {
    match output {
        Some(path) => {
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let mut tmp = NamedTempFile::new_in(dir)?;
            index.get_file(name, &mut tmp, store, cipher)?;
            tmp.flush()?;
            tmp.persist(path)
                .map_err(|error| error.error)
                .with_context(|| format!("cannot write output file {}", path.display()))?;
        }
        None => {
            let mut stdout = io::stdout().lock();
            index.get_file(name, &mut stdout, store, cipher)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => {
            let default = Path::new(config::CONFIG_FILE_PATH);
            if default.exists() {
                Config::load(default)
            } else {
                debug!("no config file, using defaults");
                Ok(Config::default())
            }
        }
    }
}

/// Key material precedence: `--key`, then `--key-file`, then the config's
/// `KeyFile`.
fn key_material(cli: &Cli, config: &Config) -> Result<Vec<u8>> {
    if let Some(key) = &cli.key {
        return Ok(key.clone().into_bytes());
    }
    if let Some(path) = &cli.key_file {
        return Ok(fs_err::read(path)?);
    }
    if let Some(path) = &config.key_file {
        return Ok(fs_err::read(path)?);
    }
    bail!("no key material: pass --key or --key-file, or set KeyFile in the config")
}

fn open_store(config: &Config) -> Result<Box<dyn BlobStore>> {
    if let Some(remote) = &config.remote {
        let store = HttpStore::new(&remote.endpoint, remote.access_token.clone())?;
        return Ok(Box::new(store));
    }
    let base = config
        .store_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(Box::new(LocalStore::new(base)?))
}
