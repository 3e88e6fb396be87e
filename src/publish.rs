use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value, json};
use serde_yaml::Mapping;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::domain::{Checksum, RecordId};
use crate::error::ArchiveError;
use crate::registry::{Creator, FileRecord, Registry, VersionRecord, ZenodoInfo, to_yaml};
use crate::zenodo::{ArchiveClient, PublishedFile, PublishedRecord, ZenodoClient};

/// The only community releases may be published to.
pub const COMMUNITY_ID: &str = "cogs";

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub dataset_id: String,
    pub files: Vec<PathBuf>,
    pub metadata: Map<String, Value>,
    pub version: String,
    pub registry_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishResult {
    pub dataset_id: String,
    pub doi: Option<String>,
    pub conceptdoi: Option<String>,
    pub recid: Option<RecordId>,
}

/// Publishes a release with a Zenodo client built from `settings`. Fails
/// before any network call when no access token is configured.
pub fn publish(settings: &Settings, request: PublishRequest) -> Result<PublishResult, ArchiveError> {
    let client = ZenodoClient::from_settings(settings)?;
    Publisher::new(client, settings.registry_path.clone()).publish(request)
}

pub struct Publisher<A: ArchiveClient> {
    client: A,
    registry_path: PathBuf,
}

impl<A: ArchiveClient> Publisher<A> {
    pub fn new(client: A, registry_path: PathBuf) -> Self {
        Self {
            client,
            registry_path,
        }
    }

    pub fn client(&self) -> &A {
        &self.client
    }

    /// validate → create → metadata → uploads → publish → registry. Remote
    /// state is not rolled back when a later step fails.
    pub fn publish(&self, request: PublishRequest) -> Result<PublishResult, ArchiveError> {
        let PublishRequest {
            dataset_id,
            files,
            metadata,
            version,
            registry_path,
        } = request;
        let registry = Registry::new(registry_path.unwrap_or_else(|| self.registry_path.clone()));

        let metadata = build_metadata(metadata)?;
        validate_descriptive(&metadata)?;

        let deposition = self.client.create_deposition()?;
        let deposition_id = deposition.id;
        info!(dataset_id = %dataset_id, deposition_id, "created draft deposition");

        self.client.update_metadata(deposition_id, &metadata)?;

        for file in &files {
            let uploaded = self.client.upload_file(deposition_id, file)?;
            debug!(file = %file.display(), key = ?uploaded.key, "uploaded");
        }

        let published = self.client.publish(deposition_id)?;
        info!(dataset_id = %dataset_id, doi = ?published.doi, "published deposition");

        let pairing = pair_files(&files, &published.files);
        if pairing.unmatched_local > 0 || pairing.unmatched_remote > 0 {
            warn!(
                dataset_id = %dataset_id,
                local = files.len(),
                remote = published.files.len(),
                "uploaded and published file counts differ; {} file record(s) dropped",
                pairing.unmatched_local + pairing.unmatched_remote
            );
        }

        let result = PublishResult {
            dataset_id: dataset_id.clone(),
            doi: published.doi.clone(),
            conceptdoi: published.conceptdoi.clone(),
            recid: published.recid(),
        };
        let update = registry_update(&metadata, &published, version, pairing.records)?;
        let report = registry.upsert_version(&dataset_id, update)?;
        debug!(path = %report.path.display(), "registry updated");

        Ok(result)
    }
}

/// Applies the deposition defaults and enforces the community restriction.
pub fn build_metadata(metadata: Map<String, Value>) -> Result<Map<String, Value>, ArchiveError> {
    let mut metadata = metadata;
    let required = json!([{ "identifier": COMMUNITY_ID }]);
    metadata
        .entry("upload_type")
        .or_insert_with(|| json!("dataset"));
    metadata
        .entry("communities")
        .or_insert_with(|| required.clone());

    if metadata.get("communities") != Some(&required) {
        return Err(ArchiveError::InvalidArgument(format!(
            "all datasets must be published to the Zenodo community '{COMMUNITY_ID}'"
        )));
    }
    Ok(metadata)
}

/// Metadata keys copied into the registry entry, in the order they are written.
pub const DESCRIPTIVE_KEYS: [&str; 5] =
    ["title", "description", "creators", "keywords", "license"];

/// Rejects descriptive fields the registry could not read back: `title` and
/// `description` must be strings and `creators` a list of `{name: ...}`.
fn validate_descriptive(metadata: &Map<String, Value>) -> Result<(), ArchiveError> {
    for key in ["title", "description"] {
        match metadata.get(key) {
            None | Some(Value::Null) | Some(Value::String(_)) => {}
            Some(_) => {
                return Err(ArchiveError::InvalidArgument(format!(
                    "{key} must be a string"
                )));
            }
        }
    }
    if let Some(creators) = metadata.get("creators").filter(|value| !value.is_null()) {
        serde_json::from_value::<Vec<Creator>>(creators.clone())
            .map_err(|err| ArchiveError::InvalidArgument(format!("creators: {err}")))?;
    }
    Ok(())
}

/// The registry update for one release. Descriptive keys are always present
/// and carry null when the metadata lacks them, so a first release writes
/// `zenodo` ahead of the descriptive fields.
fn registry_update(
    metadata: &Map<String, Value>,
    published: &PublishedRecord,
    version: String,
    files: Vec<FileRecord>,
) -> Result<Mapping, ArchiveError> {
    let zenodo = ZenodoInfo {
        conceptrecid: published.conceptrecid.clone(),
        conceptdoi: published.conceptdoi.clone(),
        versions: Some(vec![VersionRecord {
            version,
            recid: published.recid(),
            doi: published.doi.clone(),
            published: published.created.clone(),
            files,
        }]),
    };

    let mut update = Mapping::new();
    update.insert("zenodo".into(), to_yaml(&zenodo)?);
    for key in DESCRIPTIVE_KEYS {
        update.insert(
            key.into(),
            to_yaml(metadata.get(key).unwrap_or(&Value::Null))?,
        );
    }
    Ok(update)
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilePairing {
    pub records: Vec<FileRecord>,
    pub unmatched_local: usize,
    pub unmatched_remote: usize,
}

/// Pairs uploaded files with the publish response by position, truncating to
/// the shorter list. The local file name is authoritative; checksum, size and
/// links come from the response.
pub fn pair_files(local: &[PathBuf], remote: &[PublishedFile]) -> FilePairing {
    let records = local
        .iter()
        .zip(remote)
        .map(|(path, file)| {
            let links = file.links.clone().unwrap_or_default();
            FileRecord {
                name: local_name(path),
                checksum: file
                    .checksum
                    .as_deref()
                    .filter(|value| !value.is_empty())
                    .map(Checksum::normalize),
                size: file.filesize.or(file.size),
                download_url: links.download.or(links.self_link),
                links: None,
            }
        })
        .collect::<Vec<_>>();

    FilePairing {
        unmatched_local: local.len().saturating_sub(records.len()),
        unmatched_remote: remote.len().saturating_sub(records.len()),
        records,
    }
}

fn local_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
