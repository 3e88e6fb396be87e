use std::io::{self, Write};

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::dataset::DatasetView;
use crate::publish::PublishResult;
use crate::registry::VersionRecord;

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub datasets: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoResult {
    pub dataset_id: String,
    pub title: Option<String>,
    pub doi: String,
    pub conceptdoi: String,
    pub versions: Vec<VersionRecord>,
}

impl From<&DatasetView> for InfoResult {
    fn from(view: &DatasetView) -> Self {
        Self {
            dataset_id: view.dataset_id().to_string(),
            title: view.entry().title.clone(),
            doi: view.doi(),
            conceptdoi: view.conceptdoi(),
            versions: view.versions().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub dataset_id: String,
    pub version: String,
    pub files: Vec<Utf8PathBuf>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_publish(result: &PublishResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_info(result: &InfoResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_fetch(result: &FetchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_result_lists_paths_as_strings() {
        let result = FetchResult {
            dataset_id: "soil".to_string(),
            version: "1.0.0".to_string(),
            files: vec![Utf8PathBuf::from("/cache/soil/1.0.0/a.csv")],
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value["files"],
            serde_json::json!(["/cache/soil/1.0.0/a.csv"])
        );
    }
}
