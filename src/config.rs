use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;

pub const DEFAULT_BASE_URL: &str = "https://zenodo.org/api";
pub const DEFAULT_REGISTRY_PATH: &str = "data-registry.yaml";
pub const DEFAULT_CONFIG_FILE: &str = "labarchive.json";

const API_TIMEOUT: Duration = Duration::from_secs(60);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Optional on-disk configuration; every field may be overridden by the
/// environment.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub registry_path: Option<PathBuf>,
    #[serde(default)]
    pub cache_dir: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub access_token: Option<String>,
    pub base_url: String,
    pub registry_path: PathBuf,
    pub cache_dir: Utf8PathBuf,
    pub api_timeout: Duration,
    pub download_timeout: Duration,
}

impl Settings {
    pub fn new(access_token: Option<String>, cache_dir: Utf8PathBuf) -> Self {
        Self {
            access_token,
            base_url: DEFAULT_BASE_URL.to_string(),
            registry_path: PathBuf::from(DEFAULT_REGISTRY_PATH),
            cache_dir,
            api_timeout: API_TIMEOUT,
            download_timeout: DOWNLOAD_TIMEOUT,
        }
    }

    pub fn token(&self) -> Result<&str, ArchiveError> {
        self.access_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                ArchiveError::Configuration("ZENODO_ACCESS_TOKEN is not set".to_string())
            })
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<Settings, ArchiveError> {
        let file = Self::read_file(path)?;
        Self::resolve_with(file, |key| std::env::var(key).ok())
    }

    pub fn read_file(path: Option<&str>) -> Result<Option<ConfigFile>, ArchiveError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ArchiveError::ConfigRead(config_path.clone()))?;
        let config: ConfigFile = serde_json::from_str(&content)
            .map_err(|err| ArchiveError::ConfigParse(err.to_string()))?;
        Ok(Some(config))
    }

    pub fn resolve_with<F>(file: Option<ConfigFile>, lookup: F) -> Result<Settings, ArchiveError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = file.unwrap_or_default();
        let env = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let access_token = env("ZENODO_ACCESS_TOKEN")
            .or_else(|| env("ZENODO_SANDBOX_TOKEN"))
            .or(file.access_token.filter(|token| !token.trim().is_empty()));
        let base_url = env("ZENODO_BASE_URL")
            .or(file.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let registry_path = env("LABARCHIVE_REGISTRY_PATH")
            .map(PathBuf::from)
            .or(file.registry_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REGISTRY_PATH));
        let cache_dir = match env("LABARCHIVE_CACHE_DIR")
            .map(Utf8PathBuf::from)
            .or(file.cache_dir)
        {
            Some(dir) => dir,
            None => default_cache_dir()?,
        };

        Ok(Settings {
            access_token,
            base_url: base_url.trim_end_matches('/').to_string(),
            registry_path,
            cache_dir,
            api_timeout: API_TIMEOUT,
            download_timeout: DOWNLOAD_TIMEOUT,
        })
    }
}

pub fn default_cache_dir() -> Result<Utf8PathBuf, ArchiveError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("labarchive")).ok()
        })
        .ok_or_else(|| ArchiveError::Filesystem("unable to resolve cache directory".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_token_is_missing() {
        let settings = ConfigLoader::resolve_with(None, |key| match key {
            "ZENODO_ACCESS_TOKEN" => Some("   ".to_string()),
            "LABARCHIVE_CACHE_DIR" => Some("/tmp/labarchive".to_string()),
            _ => None,
        })
        .unwrap();
        assert!(settings.access_token.is_none());
        assert!(settings.token().is_err());
    }
}
