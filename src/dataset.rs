use camino::Utf8PathBuf;
use tracing::debug;

use crate::cache::Cache;
use crate::domain::CitationStyle;
use crate::error::ArchiveError;
use crate::registry::{DatasetEntry, VersionRecord};

pub const ARCHIVE_NAME: &str = "Zenodo";

/// Read-only projection over one registry entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetView {
    dataset_id: String,
    entry: DatasetEntry,
}

impl DatasetView {
    pub fn new(dataset_id: impl Into<String>, entry: DatasetEntry) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            entry,
        }
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn entry(&self) -> &DatasetEntry {
        &self.entry
    }

    pub fn versions(&self) -> &[VersionRecord] {
        self.entry
            .zenodo
            .as_ref()
            .and_then(|zenodo| zenodo.versions.as_deref())
            .unwrap_or_default()
    }

    /// The last appended version, which is not necessarily the largest
    /// version string.
    pub fn latest(&self) -> Result<&VersionRecord, ArchiveError> {
        self.versions().last().ok_or_else(|| {
            ArchiveError::RegistryNotFound(format!(
                "no versions registered for {}",
                self.dataset_id
            ))
        })
    }

    pub fn version(&self, version: &str) -> Result<&VersionRecord, ArchiveError> {
        self.latest()?;
        self.versions()
            .iter()
            .find(|record| record.version == version)
            .ok_or_else(|| {
                ArchiveError::RegistryNotFound(format!(
                    "version {version} not found for {}",
                    self.dataset_id
                ))
            })
    }

    pub fn doi(&self) -> String {
        self.latest()
            .ok()
            .and_then(|record| record.doi.clone())
            .unwrap_or_default()
    }

    pub fn conceptdoi(&self) -> String {
        self.entry
            .zenodo
            .as_ref()
            .and_then(|zenodo| zenodo.conceptdoi.clone())
            .unwrap_or_default()
    }

    pub fn citation(&self, style: CitationStyle) -> Result<String, ArchiveError> {
        let latest = self.latest()?;
        let title = self.entry.title.as_deref().unwrap_or(&self.dataset_id);
        let creators = self.entry.creators.as_deref().unwrap_or_default();
        let version = latest.version.as_str();
        let doi = latest.doi.as_deref().unwrap_or_default();

        match style {
            CitationStyle::Text => {
                let author = creators
                    .first()
                    .map(|creator| creator.name.as_str())
                    .unwrap_or("Unknown");
                Ok(format!(
                    "{author} et al. ({version}). {title}. {ARCHIVE_NAME}. DOI:{doi}"
                ))
            }
            CitationStyle::Bibtex => {
                let key = self.dataset_id.replace('-', "_");
                let authors = creators
                    .iter()
                    .map(|creator| creator.name.as_str())
                    .collect::<Vec<_>>()
                    .join(" and ");
                let year = latest
                    .published
                    .as_deref()
                    .map(|published| published.chars().take(4).collect::<String>())
                    .unwrap_or_default();
                Ok(format!(
                    "@dataset{{{key},\n  title = {{{title}}},\n  author = {{{authors}}},\n  year = {{{year}}},\n  version = {{{version}}},\n  doi = {{{doi}}}\n}}"
                ))
            }
        }
    }

    /// Materializes the files of `version` (latest when `None`) in the cache.
    /// Files already on disk are neither re-downloaded nor re-verified.
    pub fn fetch(
        &self,
        version: Option<&str>,
        cache: &Cache,
    ) -> Result<Vec<Utf8PathBuf>, ArchiveError> {
        let record = match version {
            Some(version) => self.version(version)?,
            None => self.latest()?,
        };

        let mut paths = Vec::with_capacity(record.files.len());
        for file in &record.files {
            let url = file.resolved_url().ok_or_else(|| {
                ArchiveError::RegistryNotFound(format!(
                    "missing download URL for file {} in {}",
                    file.name, self.dataset_id
                ))
            })?;

            let dest = cache.path_for(&self.dataset_id, &file.name, &record.version)?;
            if dest.as_std_path().exists() {
                debug!(path = %dest, "cache hit");
                paths.push(dest);
                continue;
            }
            cache.download(url, &dest)?;
            if let Some(checksum) = file.checksum.as_deref().filter(|value| !value.is_empty()) {
                cache.verify_checksum(&dest, checksum)?;
            }
            paths.push(dest);
        }
        Ok(paths)
    }
}
