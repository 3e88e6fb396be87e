use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::dataset::DatasetView;
use crate::domain::RecordId;
use crate::error::ArchiveError;
use crate::zenodo::FileLinks;

const DATASETS_KEY: &str = "datasets";
const ZENODO_KEY: &str = "zenodo";
const VERSIONS_KEY: &str = "versions";

/// Whole registry file kept as authored YAML. Entries are only projected into
/// typed views on read, so unknown keys, explicit nulls and key order all
/// survive a load/save round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryDocument {
    /// Top-level keys in authored order. The `datasets` slot holds a
    /// placeholder that is filled from `datasets` on save.
    root: Mapping,
    datasets: Mapping,
}

impl Default for RegistryDocument {
    fn default() -> Self {
        let mut root = Mapping::new();
        root.insert(Value::from(DATASETS_KEY), Value::Null);
        Self {
            root,
            datasets: Mapping::new(),
        }
    }
}

impl Serialize for RegistryDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut root = self.root.clone();
        root.insert(
            Value::from(DATASETS_KEY),
            Value::Mapping(self.datasets.clone()),
        );
        root.serialize(serializer)
    }
}

/// Typed projection of one dataset entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zenodo: Option<ZenodoInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creators: Option<Vec<Creator>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<Value>,
}

impl DatasetEntry {
    pub fn from_mapping(raw: &Mapping) -> Result<Self, ArchiveError> {
        serde_yaml::from_value(Value::Mapping(raw.clone()))
            .map_err(|err| ArchiveError::RegistryParse(err.to_string()))
    }

    /// Registry update carrying only the fields that are set.
    pub fn to_mapping(&self) -> Result<Mapping, ArchiveError> {
        match to_yaml(self)? {
            Value::Mapping(mapping) => Ok(mapping),
            _ => Err(ArchiveError::RegistryParse(
                "dataset entry is not a mapping".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Creator {
    #[serde(default)]
    pub name: String,
}

impl Creator {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZenodoInfo {
    #[serde(default)]
    pub conceptrecid: Option<RecordId>,
    #[serde(default)]
    pub conceptdoi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<Vec<VersionRecord>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: String,
    #[serde(default)]
    pub recid: Option<RecordId>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub published: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub files: Vec<FileRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<FileLinks>,
}

impl FileRecord {
    /// Recorded download URL, falling back to a legacy `links.self`.
    pub fn resolved_url(&self) -> Option<&str> {
        self.download_url
            .as_deref()
            .or_else(|| self.links.as_ref().and_then(|links| links.self_link.as_deref()))
            .filter(|url| !url.is_empty())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub fn to_yaml<T: Serialize + ?Sized>(value: &T) -> Result<Value, ArchiveError> {
    serde_yaml::to_value(value).map_err(|err| ArchiveError::RegistryParse(err.to_string()))
}

/// Which of the two merge rules `merge_entry` applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// Both sides carried `zenodo.versions`: versions appended, other
    /// `zenodo` keys overwritten, descriptive fields untouched.
    AppendVersions,
    /// Either side lacked a versions list: every top-level key of the update
    /// replaces the existing one, nulls included.
    Overwrite,
}

/// Folds `update` into `existing`. Version history only ever grows; every
/// other key is latest-wins. Existing keys keep their position and new keys
/// are appended.
pub fn merge_entry(existing: &mut Mapping, update: Mapping) -> MergeKind {
    if !(has_versions(existing) && has_versions(&update)) {
        for (key, value) in update {
            existing.insert(key, value);
        }
        return MergeKind::Overwrite;
    }

    let incoming = update
        .into_iter()
        .find_map(|(key, value)| match value {
            Value::Mapping(zenodo) if key.as_str() == Some(ZENODO_KEY) => Some(zenodo),
            _ => None,
        })
        .unwrap_or_default();
    if let Some(Value::Mapping(current)) = existing.get_mut(ZENODO_KEY) {
        for (key, value) in incoming {
            if key.as_str() != Some(VERSIONS_KEY) {
                current.insert(key, value);
                continue;
            }
            let added = match value {
                Value::Sequence(versions) => versions,
                _ => Vec::new(),
            };
            match current.get_mut(VERSIONS_KEY) {
                Some(Value::Sequence(versions)) => versions.extend(added),
                _ => {
                    current.insert(Value::from(VERSIONS_KEY), Value::Sequence(added));
                }
            }
        }
    }
    MergeKind::AppendVersions
}

fn has_versions(entry: &Mapping) -> bool {
    entry
        .get(ZENODO_KEY)
        .and_then(Value::as_mapping)
        .is_some_and(|zenodo| zenodo.contains_key(VERSIONS_KEY))
}

impl RegistryDocument {
    /// Wraps a parsed top-level mapping. A missing or null `datasets` key
    /// becomes an empty mapping.
    pub fn from_mapping(mut root: Mapping) -> Result<Self, ArchiveError> {
        let datasets = match root
            .get_mut(DATASETS_KEY)
            .map(|slot| std::mem::replace(slot, Value::Null))
        {
            None => {
                root.insert(Value::from(DATASETS_KEY), Value::Null);
                Mapping::new()
            }
            Some(Value::Null) => Mapping::new(),
            Some(Value::Mapping(datasets)) => datasets,
            Some(_) => {
                return Err(ArchiveError::RegistryParse(
                    "`datasets` must be a mapping".to_string(),
                ));
            }
        };
        Ok(Self { root, datasets })
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Dataset ids in authored order.
    pub fn dataset_ids(&self) -> Vec<String> {
        self.datasets
            .keys()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    }

    pub fn list_ids(&self) -> Vec<String> {
        let mut ids = self.dataset_ids();
        ids.sort();
        ids
    }

    /// The entry exactly as stored.
    pub fn raw_entry(&self, dataset_id: &str) -> Option<&Mapping> {
        self.datasets.get(dataset_id).and_then(Value::as_mapping)
    }

    pub fn get(&self, dataset_id: &str) -> Result<DatasetEntry, ArchiveError> {
        let raw = self
            .raw_entry(dataset_id)
            .filter(|entry| !entry.is_empty())
            .ok_or_else(|| {
                ArchiveError::RegistryNotFound(format!(
                    "dataset not found in registry: {dataset_id}"
                ))
            })?;
        DatasetEntry::from_mapping(raw).map_err(|err| {
            ArchiveError::RegistryParse(format!("dataset {dataset_id}: {err}"))
        })
    }

    pub fn upsert_version(&mut self, dataset_id: &str, update: Mapping) -> MergeKind {
        let mut existing = match self
            .datasets
            .get_mut(dataset_id)
            .map(|slot| std::mem::replace(slot, Value::Null))
        {
            Some(Value::Mapping(entry)) => entry,
            _ => Mapping::new(),
        };
        let kind = merge_entry(&mut existing, update);
        self.datasets
            .insert(Value::from(dataset_id), Value::Mapping(existing));
        kind
    }
}

/// Where a save landed, plus the warning when the configured location was
/// unusable and the temp directory was used instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub path: PathBuf,
    pub warning: Option<String>,
}

impl SaveReport {
    pub fn is_fallback(&self) -> bool {
        self.warning.is_some()
    }
}

/// File-backed registry. Every operation is a fresh load/modify/save round
/// trip with no locking; concurrent writers race and the last one wins.
#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
}

impl Registry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.registry_path.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<RegistryDocument, ArchiveError> {
        if !self.path.exists() {
            return Ok(RegistryDocument::default());
        }
        let content = fs::read_to_string(&self.path).map_err(|err| {
            ArchiveError::Filesystem(format!("read {}: {err}", self.path.display()))
        })?;
        parse_document(&content)
    }

    /// Writes the document to the configured path. Any failure there, from
    /// creating the parent directory to the final rename, redirects the write
    /// to `<temp dir>/<file name>` and is reported in the returned
    /// `SaveReport` instead of as an error.
    pub fn save(&self, document: &RegistryDocument) -> Result<SaveReport, ArchiveError> {
        let content = serde_yaml::to_string(document)
            .map_err(|err| ArchiveError::RegistryParse(err.to_string()))?;

        let primary = ensure_parent(&self.path)
            .and_then(|()| write_atomic(&self.path, content.as_bytes()));
        let err = match primary {
            Ok(()) => {
                debug!(path = %self.path.display(), "registry saved");
                return Ok(SaveReport {
                    path: self.path.clone(),
                    warning: None,
                });
            }
            Err(err) => err,
        };

        let file_name = self.path.file_name().ok_or_else(|| {
            ArchiveError::Filesystem(format!(
                "registry path has no file name: {}",
                self.path.display()
            ))
        })?;
        let fallback = std::env::temp_dir().join(file_name);
        let message = format!(
            "cannot write registry to {} ({err}); falling back to {}",
            self.path.display(),
            fallback.display()
        );
        warn!("{message}");

        write_atomic(&fallback, content.as_bytes())?;
        Ok(SaveReport {
            path: fallback,
            warning: Some(message),
        })
    }

    pub fn list_ids(&self) -> Result<Vec<String>, ArchiveError> {
        Ok(self.load()?.list_ids())
    }

    pub fn get(&self, dataset_id: &str) -> Result<DatasetView, ArchiveError> {
        let entry = self.load()?.get(dataset_id)?;
        Ok(DatasetView::new(dataset_id, entry))
    }

    pub fn upsert_version(
        &self,
        dataset_id: &str,
        update: Mapping,
    ) -> Result<SaveReport, ArchiveError> {
        let mut document = self.load()?;
        let kind = document.upsert_version(dataset_id, update);
        debug!(dataset_id, ?kind, "registry entry merged");
        self.save(&document)
    }
}

pub fn parse_document(content: &str) -> Result<RegistryDocument, ArchiveError> {
    if content.trim().is_empty() {
        return Ok(RegistryDocument::default());
    }
    let value: Value = serde_yaml::from_str(content)
        .map_err(|err| ArchiveError::RegistryParse(err.to_string()))?;
    match value {
        Value::Null => Ok(RegistryDocument::default()),
        Value::Mapping(root) => RegistryDocument::from_mapping(root),
        _ => Err(ArchiveError::RegistryParse(
            "registry root must be a mapping".to_string(),
        )),
    }
}

fn ensure_parent(path: &Path) -> Result<(), ArchiveError> {
    match path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        Some(parent) => fs::create_dir_all(parent).map_err(|err| {
            ArchiveError::Filesystem(format!("create directory {}: {err}", parent.display()))
        }),
        None => Ok(()),
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<(), ArchiveError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut temp = tempfile::Builder::new()
        .prefix(".labarchive-registry")
        .tempfile_in(&dir)
        .map_err(|err| ArchiveError::Filesystem(format!("create temp in {}: {err}", dir.display())))?;
    temp.write_all(content)
        .map_err(|err| ArchiveError::Filesystem(err.to_string()))?;
    temp.persist(path)
        .map_err(|err| ArchiveError::Filesystem(format!("write {}: {err}", path.display())))?;
    Ok(())
}
