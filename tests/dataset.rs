use std::fs;
use std::io::Read;
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use tiny_http::{Response, Server};

use labarchive::cache::Cache;
use labarchive::dataset::DatasetView;
use labarchive::domain::{CitationStyle, RecordId};
use labarchive::error::ArchiveError;
use labarchive::registry::{Creator, DatasetEntry, FileRecord, VersionRecord, ZenodoInfo};

fn file(name: &str, checksum: Option<&str>, url: Option<String>) -> FileRecord {
    FileRecord {
        name: name.to_string(),
        checksum: checksum.map(str::to_string),
        size: None,
        download_url: url,
        links: None,
    }
}

fn version(label: &str, recid: u64, files: Vec<FileRecord>) -> VersionRecord {
    VersionRecord {
        version: label.to_string(),
        recid: Some(RecordId::Number(recid)),
        doi: Some(format!("10.5281/zenodo.{recid}")),
        published: Some("2025-11-03T10:00:00Z".to_string()),
        files,
    }
}

fn view(versions: Vec<VersionRecord>) -> DatasetView {
    DatasetView::new(
        "soil-moisture",
        DatasetEntry {
            title: Some("Soil moisture".to_string()),
            creators: Some(vec![Creator::new("Doe, Jane"), Creator::new("Roe, Rick")]),
            zenodo: Some(ZenodoInfo {
                conceptdoi: Some("10.5281/zenodo.100".to_string()),
                versions: Some(versions),
                ..ZenodoInfo::default()
            }),
            ..DatasetEntry::default()
        },
    )
}

fn cache() -> (tempfile::TempDir, Cache) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let cache = Cache::new(root, Duration::from_secs(10)).unwrap();
    (temp, cache)
}

#[test]
fn latest_is_last_appended_not_largest() {
    let view = view(vec![
        version("2.0.0", 2, Vec::new()),
        version("1.5.0", 3, Vec::new()),
    ]);
    assert_eq!(view.latest().unwrap().version, "1.5.0");
    assert_eq!(view.doi(), "10.5281/zenodo.3");
    assert_eq!(view.conceptdoi(), "10.5281/zenodo.100");
}

#[test]
fn empty_history_has_no_latest() {
    let view = view(Vec::new());
    assert_matches!(view.latest(), Err(ArchiveError::RegistryNotFound(_)));
    assert_eq!(view.doi(), "");

    let bare = DatasetView::new("bare", DatasetEntry::default());
    assert_eq!(bare.conceptdoi(), "");
    assert_matches!(
        bare.citation(CitationStyle::Text),
        Err(ArchiveError::RegistryNotFound(_))
    );
}

#[test]
fn text_citation() {
    let view = view(vec![version("1.0.0", 1, Vec::new())]);
    assert_eq!(
        view.citation(CitationStyle::Text).unwrap(),
        "Doe, Jane et al. (1.0.0). Soil moisture. Zenodo. DOI:10.5281/zenodo.1"
    );
}

#[test]
fn bibtex_citation() {
    let view = view(vec![version("1.0.0", 1, Vec::new())]);
    let expected = "@dataset{soil_moisture,\n  title = {Soil moisture},\n  author = {Doe, Jane and Roe, Rick},\n  year = {2025},\n  version = {1.0.0},\n  doi = {10.5281/zenodo.1}\n}";
    assert_eq!(view.citation(CitationStyle::Bibtex).unwrap(), expected);
}

#[test]
fn unknown_citation_style_is_invalid() {
    assert_matches!(
        "apa".parse::<CitationStyle>(),
        Err(ArchiveError::InvalidArgument(_))
    );
    assert_eq!("bibtex".parse::<CitationStyle>().unwrap(), CitationStyle::Bibtex);
}

#[test]
fn fetch_uses_cached_files_without_downloading() {
    let (_temp, cache) = cache();
    let view = view(vec![
        version(
            "2.0.0",
            2,
            vec![file("old.csv", None, Some("http://127.0.0.1:9/old.csv".to_string()))],
        ),
        version(
            "1.5.0",
            3,
            vec![
                file("b.csv", None, Some("http://127.0.0.1:9/b.csv".to_string())),
                file(
                    "a.csv",
                    Some("md5:00000000000000000000000000000000"),
                    Some("http://127.0.0.1:9/a.csv".to_string()),
                ),
            ],
        ),
    ]);

    for name in ["a.csv", "b.csv"] {
        let path = cache.path_for("soil-moisture", name, "1.5.0").unwrap();
        fs::write(&path, b"cached").unwrap();
    }

    let paths = view.fetch(None, &cache).unwrap();
    let names = paths
        .iter()
        .map(|path| path.file_name().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["b.csv", "a.csv"]);
    assert!(paths.iter().all(|path| path.as_str().contains("1.5.0")));
}

#[test]
fn fetch_unknown_version_is_not_found() {
    let (_temp, cache) = cache();
    let view = view(vec![version("1.0.0", 1, Vec::new())]);
    assert_matches!(
        view.fetch(Some("9.9.9"), &cache),
        Err(ArchiveError::RegistryNotFound(_))
    );
}

#[test]
fn fetch_without_url_is_not_found() {
    let (_temp, cache) = cache();
    let view = view(vec![version("1.0.0", 1, vec![file("a.csv", None, None)])]);
    assert_matches!(
        view.fetch(None, &cache),
        Err(ArchiveError::RegistryNotFound(_))
    );
}

#[test]
fn fetch_downloads_and_verifies() {
    let server = Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();
    let handle = thread::spawn(move || {
        for _ in 0..2 {
            let mut request = server.recv().unwrap();
            let mut body = String::new();
            request.as_reader().read_to_string(&mut body).unwrap();
            request.respond(Response::from_string("hello")).unwrap();
        }
    });

    let (_temp, cache) = cache();
    let good = file(
        "good.txt",
        Some("md5:5d41402abc4b2a76b9719d911017c592"),
        Some(format!("http://127.0.0.1:{port}/good.txt")),
    );
    let bad = file(
        "bad.txt",
        Some("md5:d41d8cd98f00b204e9800998ecf8427e"),
        Some(format!("http://127.0.0.1:{port}/bad.txt")),
    );

    let paths = view(vec![version("1.0.0", 1, vec![good])])
        .fetch(Some("1.0.0"), &cache)
        .unwrap();
    assert_eq!(fs::read_to_string(&paths[0]).unwrap(), "hello");

    let err = view(vec![version("1.1.0", 2, vec![bad])])
        .fetch(None, &cache)
        .unwrap_err();
    assert_matches!(err, ArchiveError::ChecksumMismatch { .. });
    let left_behind = cache.path_for("soil-moisture", "bad.txt", "1.1.0").unwrap();
    assert!(left_behind.as_std_path().exists());

    handle.join().unwrap();
}
