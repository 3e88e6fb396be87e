use std::fs::{self, File};
use std::io::{Read, Write};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use md5::Md5;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use tracing::debug;

use crate::config::Settings;
use crate::domain::{Checksum, ChecksumAlgorithm};
use crate::error::ArchiveError;

pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Local file cache laid out as `<root>/<dataset>/<version>/<filename>`.
#[derive(Debug, Clone)]
pub struct Cache {
    root: Utf8PathBuf,
    client: Client,
}

impl Cache {
    pub fn new(root: Utf8PathBuf, timeout: Duration) -> Result<Self, ArchiveError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("labarchive/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ArchiveError::TransferHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| ArchiveError::TransferHttp(err.to_string()))?;
        Ok(Self { root, client })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ArchiveError> {
        Self::new(settings.cache_dir.clone(), settings.download_timeout)
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Resolves the cache path for a file and makes sure its directory exists.
    pub fn path_for(
        &self,
        dataset_id: &str,
        filename: &str,
        version: &str,
    ) -> Result<Utf8PathBuf, ArchiveError> {
        let dir = self.root.join(sanitize_dataset_id(dataset_id)).join(version);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| ArchiveError::Filesystem(format!("create {dir}: {err}")))?;
        Ok(dir.join(filename))
    }

    pub fn download(&self, url: &str, dest: &Utf8Path) -> Result<(), ArchiveError> {
        debug!(url, dest = %dest, "downloading");
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| ArchiveError::TransferHttp(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ArchiveError::Transfer {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let mut file = File::create(dest.as_std_path())
            .map_err(|err| ArchiveError::Filesystem(format!("create {dest}: {err}")))?;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            let read = response
                .read(&mut buffer)
                .map_err(|err| ArchiveError::TransferHttp(err.to_string()))?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read])
                .map_err(|err| ArchiveError::Filesystem(err.to_string()))?;
        }
        file.flush()
            .map_err(|err| ArchiveError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn verify_checksum(&self, file_path: &Utf8Path, checksum: &str) -> Result<(), ArchiveError> {
        verify_checksum(file_path, checksum)
    }
}

pub fn sanitize_dataset_id(dataset_id: &str) -> String {
    dataset_id.replace([':', '/'], "_")
}

/// Streams `file_path` through the named digest and compares it with the
/// expected `<algorithm>:<hex>` value.
pub fn verify_checksum(file_path: &Utf8Path, checksum: &str) -> Result<(), ArchiveError> {
    let expected: Checksum = checksum.parse()?;
    let actual = file_digest(file_path, expected.algorithm())?;
    if actual != expected.digest() {
        return Err(ArchiveError::ChecksumMismatch {
            file: file_path
                .file_name()
                .unwrap_or(file_path.as_str())
                .to_string(),
            expected: checksum.trim().to_string(),
            actual: format!("{}:{actual}", expected.algorithm()),
        });
    }
    Ok(())
}

pub fn file_digest(
    file_path: &Utf8Path,
    algorithm: ChecksumAlgorithm,
) -> Result<String, ArchiveError> {
    let mut file = File::open(file_path.as_std_path())
        .map_err(|err| ArchiveError::Filesystem(format!("open {file_path}: {err}")))?;
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|err| ArchiveError::Filesystem(err.to_string()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize_hex())
}

enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Hasher::Md5(Md5::new()),
            ChecksumAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            Hasher::Md5(hasher) => hasher.update(bytes),
            Hasher::Sha1(hasher) => hasher.update(bytes),
            Hasher::Sha256(hasher) => hasher.update(bytes),
            Hasher::Sha512(hasher) => hasher.update(bytes),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Md5(hasher) => hex::encode(hasher.finalize()),
            Hasher::Sha1(hasher) => hex::encode(hasher.finalize()),
            Hasher::Sha256(hasher) => hex::encode(hasher.finalize()),
            Hasher::Sha512(hasher) => hex::encode(hasher.finalize()),
        }
    }
}
