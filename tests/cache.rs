use std::fs;
use std::io::Read;
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use tiny_http::{Response, Server};

use labarchive::cache::{Cache, file_digest, verify_checksum};
use labarchive::domain::ChecksumAlgorithm;
use labarchive::error::ArchiveError;

const HELLO_MD5: &str = "md5:5d41402abc4b2a76b9719d911017c592";
const HELLO_SHA256: &str =
    "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

fn scratch() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

#[test]
fn md5_checksum_matches() {
    let (_temp, root) = scratch();
    let path = root.join("hello.txt");
    fs::write(&path, b"hello").unwrap();

    verify_checksum(&path, HELLO_MD5).unwrap();
    verify_checksum(&path, HELLO_SHA256).unwrap();
    assert_eq!(
        file_digest(&path, ChecksumAlgorithm::Md5).unwrap(),
        "5d41402abc4b2a76b9719d911017c592"
    );
}

#[test]
fn any_single_byte_change_is_a_mismatch() {
    let (_temp, root) = scratch();
    let path = root.join("hello.txt");

    for position in 0..5 {
        let mut content = b"hello".to_vec();
        content[position] ^= 0x01;
        fs::write(&path, &content).unwrap();

        let err = verify_checksum(&path, HELLO_MD5).unwrap_err();
        assert_matches!(err, ArchiveError::ChecksumMismatch { .. });
        let message = err.to_string();
        assert!(message.contains("5d41402abc4b2a76b9719d911017c592"));
        assert!(message.contains("got md5:"));
    }
}

#[test]
fn unknown_algorithm_is_unsupported() {
    let (_temp, root) = scratch();
    let path = root.join("hello.txt");
    fs::write(&path, b"hello").unwrap();

    assert_matches!(
        verify_checksum(&path, "crc32:3610a686"),
        Err(ArchiveError::UnsupportedAlgorithm(_))
    );
    assert_matches!(
        verify_checksum(&path, "5d41402abc4b2a76b9719d911017c592"),
        Err(ArchiveError::InvalidChecksum(_))
    );
}

#[test]
fn download_streams_body_and_overwrites() {
    let server = Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();
    let handle = thread::spawn(move || {
        for _ in 0..2 {
            let mut request = server.recv().unwrap();
            let mut body = String::new();
            request.as_reader().read_to_string(&mut body).unwrap();
            let response = if request.url() == "/files/data.csv" {
                Response::from_string("a,b\n1,2\n")
            } else {
                Response::from_string("gone").with_status_code(404)
            };
            request.respond(response).unwrap();
        }
    });

    let (_temp, root) = scratch();
    let cache = Cache::new(root.clone(), Duration::from_secs(10)).unwrap();
    let dest = cache.path_for("lab/ds", "data.csv", "1.0.0").unwrap();
    fs::write(&dest, b"stale content that is longer").unwrap();

    cache
        .download(&format!("http://127.0.0.1:{port}/files/data.csv"), &dest)
        .unwrap();
    assert_eq!(fs::read_to_string(&dest).unwrap(), "a,b\n1,2\n");

    let missing = root.join("missing.csv");
    let err = cache
        .download(&format!("http://127.0.0.1:{port}/files/missing.csv"), &missing)
        .unwrap_err();
    assert_matches!(err, ArchiveError::Transfer { status: 404, .. });

    handle.join().unwrap();
}
