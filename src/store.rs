//! Blob store backends.
//!
//! The index and blocks only ever need three capabilities over opaque blob
//! names: read, create-or-replace write, and an existence probe. Everything
//! else (directory layout, bucket naming, listing) is out of reach by
//! design — the store never learns anything about what the blobs contain.

use std::io::ErrorKind;
use std::path::PathBuf;

use reqwest::blocking::RequestBuilder;
use reqwest::{StatusCode, Url};

use crate::error::{Error, Result};

pub trait BlobStore {
    /// Fetches a blob. Fails with [`Error::BlobNotFound`] when the name is
    /// absent from the store.
    fn read(&self, name: &str) -> Result<Vec<u8>>;

    /// Creates or replaces a blob.
    fn write(&self, name: &str, data: &[u8]) -> Result<()>;

    fn exists(&self, name: &str) -> Result<bool>;
}

/// Filesystem-backed store: one file per blob under a base directory.
pub struct LocalStore {
    base: PathBuf,
}

impl LocalStore {
    /// Opens a store rooted at `base`, creating the directory if needed.
    pub fn new(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        fs_err::create_dir_all(&base)?;
        Ok(Self { base })
    }
}

impl BlobStore for LocalStore {
    fn read(&self, name: &str) -> Result<Vec<u8>> {
        match fs_err::read(self.base.join(name)) {
            Ok(data) => Ok(data),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                Err(Error::BlobNotFound(name.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        fs_err::write(self.base.join(name), data)?;
        Ok(())
    }

    fn exists(&self, name: &str) -> Result<bool> {
        match fs_err::metadata(self.base.join(name)) {
            Ok(_) => Ok(true),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }
}

/// HTTP object store: GET/PUT/HEAD of `{endpoint}/{name}`, with an optional
/// bearer token. Any S3-compatible gateway that serves objects by key works.
pub struct HttpStore {
    endpoint: Url,
    access_token: Option<String>,
    http: reqwest::blocking::Client,
}

impl HttpStore {
    pub fn new(endpoint: &str, access_token: Option<String>) -> Result<Self> {
        // Url::join would otherwise replace the last path segment.
        let mut endpoint = endpoint.to_string();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        let endpoint = Url::parse(&endpoint)
            .map_err(|error| Error::Remote(format!("invalid endpoint `{endpoint}`: {error}")))?;
        Ok(Self {
            endpoint,
            access_token,
            http: reqwest::blocking::Client::new(),
        })
    }

    fn url(&self, name: &str) -> Result<Url> {
        self.endpoint
            .join(name)
            .map_err(|error| Error::Remote(format!("invalid blob name `{name}`: {error}")))
    }

    fn with_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl BlobStore for HttpStore {
    fn read(&self, name: &str) -> Result<Vec<u8>> {
        let response = self.with_auth(self.http.get(self.url(name)?)).send()?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::BlobNotFound(name.to_string()));
        }
        Ok(response.error_for_status()?.bytes()?.to_vec())
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        self.with_auth(self.http.put(self.url(name)?))
            .body(data.to_vec())
            .send()?
            .error_for_status()?;
        Ok(())
    }

    fn exists(&self, name: &str) -> Result<bool> {
        let response = self.with_auth(self.http.head(self.url(name)?)).send()?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response.error_for_status()?;
        Ok(true)
    }
}

/// In-memory store for unit tests.
#[cfg(test)]
pub(crate) struct MemStore {
    blobs: std::cell::RefCell<std::collections::HashMap<String, Vec<u8>>>,
}

#[cfg(test)]
impl MemStore {
    pub fn new() -> Self {
        Self {
            blobs: std::cell::RefCell::new(std::collections::HashMap::new()),
        }
    }

    /// Raw ciphertext as the backend sees it.
    pub fn raw(&self, name: &str) -> Option<Vec<u8>> {
        self.blobs.borrow().get(name).cloned()
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.borrow().len()
    }
}

#[cfg(test)]
impl BlobStore for MemStore {
    fn read(&self, name: &str) -> Result<Vec<u8>> {
        self.blobs
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::BlobNotFound(name.to_string()))
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        self.blobs
            .borrow_mut()
            .insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.blobs.borrow().contains_key(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("blobs")).unwrap();

        assert!(!store.exists("blob0").unwrap());
        store.write("blob0", b"payload").unwrap();
        assert!(store.exists("blob0").unwrap());
        assert_eq!(store.read("blob0").unwrap(), b"payload");

        store.write("blob0", b"replaced").unwrap();
        assert_eq!(store.read("blob0").unwrap(), b"replaced");
    }

    #[test]
    fn local_store_missing_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.read("nope").unwrap_err(),
            Error::BlobNotFound(name) if name == "nope"
        ));
    }

    #[test]
    fn http_store_joins_names_onto_endpoint() {
        let store = HttpStore::new("http://localhost:9000/bucket", None).unwrap();
        assert_eq!(
            store.url("abc123").unwrap().as_str(),
            "http://localhost:9000/bucket/abc123"
        );
    }
}
