use std::fs::File;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::Settings;
use crate::domain::RecordId;
use crate::error::ArchiveError;

pub type DepositionId = u64;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepositionLinks {
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub publish: Option<String>,
}

/// Draft or published deposition as returned by the deposit API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposition {
    pub id: DepositionId,
    #[serde(default)]
    pub links: DepositionLinks,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileLinks {
    #[serde(default, rename = "self", skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<String>,
}

/// Bucket upload response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub links: FileLinks,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishedFile {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub links: Option<FileLinks>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishedRecord {
    #[serde(default)]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub record_id: Option<RecordId>,
    #[serde(default)]
    pub conceptrecid: Option<RecordId>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub conceptdoi: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub files: Vec<PublishedFile>,
}

impl PublishedRecord {
    /// `record_id` when the response carries one, otherwise `id`.
    pub fn recid(&self) -> Option<RecordId> {
        self.record_id.clone().or_else(|| self.id.clone())
    }
}

pub trait ArchiveClient: Send + Sync {
    fn create_deposition(&self) -> Result<Deposition, ArchiveError>;
    fn update_metadata(
        &self,
        id: DepositionId,
        metadata: &Map<String, Value>,
    ) -> Result<Deposition, ArchiveError>;
    fn upload_file(&self, id: DepositionId, local_path: &Path) -> Result<FileInfo, ArchiveError>;
    fn publish(&self, id: DepositionId) -> Result<PublishedRecord, ArchiveError>;
    fn get_deposition(&self, id: DepositionId) -> Result<Deposition, ArchiveError>;
    fn get_record(&self, recid: &RecordId) -> Result<PublishedRecord, ArchiveError>;
}

#[derive(Clone)]
pub struct ZenodoClient {
    client: Client,
    base_url: String,
    access_token: String,
}

impl ZenodoClient {
    pub fn new(
        access_token: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, ArchiveError> {
        if access_token.trim().is_empty() {
            return Err(ArchiveError::Configuration(
                "Zenodo access token is empty".to_string(),
            ));
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("labarchive/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ArchiveError::ArchiveHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| ArchiveError::ArchiveHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.trim().to_string(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ArchiveError> {
        Self::new(settings.token()?, &settings.base_url, settings.api_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn deposition_url(&self, id: DepositionId) -> String {
        format!("{}/deposit/depositions/{id}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.query(&[("access_token", self.access_token.as_str())])
    }

    fn send(&self, action: &str, request: RequestBuilder) -> Result<Response, ArchiveError> {
        debug!(action, "zenodo request");
        let response = self
            .authorized(request)
            .send()
            .map_err(|err| ArchiveError::ArchiveHttp(format!("{action}: {err}")))?;
        handle_status(response)
    }

    fn send_json<T: DeserializeOwned>(
        &self,
        action: &str,
        request: RequestBuilder,
    ) -> Result<T, ArchiveError> {
        self.send(action, request)?
            .json()
            .map_err(|err| ArchiveError::ArchiveHttp(format!("{action}: {err}")))
    }
}

fn handle_status(response: Response) -> Result<Response, ArchiveError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response
        .text()
        .unwrap_or_else(|_| "Zenodo request failed".to_string());
    Err(ArchiveError::ArchiveService { status, body })
}

impl ArchiveClient for ZenodoClient {
    fn create_deposition(&self) -> Result<Deposition, ArchiveError> {
        let url = format!("{}/deposit/depositions", self.base_url);
        self.send_json("create deposition", self.client.post(&url).json(&json!({})))
    }

    fn update_metadata(
        &self,
        id: DepositionId,
        metadata: &Map<String, Value>,
    ) -> Result<Deposition, ArchiveError> {
        let url = self.deposition_url(id);
        let payload = json!({ "metadata": metadata });
        self.send_json("update metadata", self.client.put(&url).json(&payload))
    }

    fn upload_file(&self, id: DepositionId, local_path: &Path) -> Result<FileInfo, ArchiveError> {
        let deposition = self.get_deposition(id)?;
        let bucket = deposition.links.bucket.ok_or_else(|| {
            ArchiveError::ArchiveHttp(format!("deposition {id} has no bucket link"))
        })?;
        let filename = local_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                ArchiveError::InvalidArgument(format!(
                    "upload path has no file name: {}",
                    local_path.display()
                ))
            })?;

        let file = File::open(local_path).map_err(|err| {
            ArchiveError::Filesystem(format!("open {}: {err}", local_path.display()))
        })?;
        let length = file
            .metadata()
            .map_err(|err| ArchiveError::Filesystem(err.to_string()))?
            .len();
        let url = format!("{}/{filename}", bucket.trim_end_matches('/'));
        self.send_json(
            "upload file",
            self.client.put(&url).body(Body::sized(file, length)),
        )
    }

    fn publish(&self, id: DepositionId) -> Result<PublishedRecord, ArchiveError> {
        let url = format!("{}/actions/publish", self.deposition_url(id));
        self.send_json("publish", self.client.post(&url))
    }

    fn get_deposition(&self, id: DepositionId) -> Result<Deposition, ArchiveError> {
        let url = self.deposition_url(id);
        self.send_json("get deposition", self.client.get(&url))
    }

    fn get_record(&self, recid: &RecordId) -> Result<PublishedRecord, ArchiveError> {
        let url = format!("{}/records/{recid}", self.base_url);
        self.send_json("get record", self.client.get(&url))
    }
}
