use std::fs::File;
use std::io::Read;
use std::time::Duration;

use tempfile::tempdir;

use site_connectors::contract::{Connector, ConnectorFile, FileContent, HostingConnector};
use site_connectors::job::{JobManager, JobStatus};
use site_connectors::session::{ConnectorSession, ConnectorType};
use site_connectors::zip_download::{DownloadConnector, DownloadOptions};

fn connector_in(dir: &std::path::Path) -> DownloadConnector {
    DownloadConnector::new(DownloadOptions {
        tmp_dir: Some(dir.to_path_buf()),
        ..Default::default()
    })
}

#[tokio::test]
async fn download_connector_needs_no_login() {
    let connector = DownloadConnector::new(DownloadOptions::default());
    let mut session = ConnectorSession::new();
    assert!(connector.is_logged_in(&session).await);
    assert!(connector
        .get_oauth_url(&mut session)
        .await
        .unwrap()
        .is_none());
    assert!(connector
        .get_login_form(&session, "/")
        .await
        .unwrap()
        .is_none());
    assert_eq!(connector.connector_type(), ConnectorType::Hosting);
    assert_eq!(connector.get_url(&session, "w1").await.unwrap(), "/download");
}

#[tokio::test]
async fn publish_builds_an_archive_and_links_it_in_the_job_message() {
    let dir = tempdir().unwrap();
    let connector = connector_in(dir.path());
    let jm = JobManager::new();

    let job = connector
        .publish(
            &ConnectorSession::new(),
            "w1",
            vec![
                ConnectorFile::new("index.html", "<html>home</html>"),
                ConnectorFile::new("assets/logo.png", vec![0x89u8, 0x50, 0x4e, 0x47]),
            ],
            &jm,
        )
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::InProgress);

    let mut poll = jm.poll(job.job_id).unwrap();
    for _ in 0..200 {
        if poll.stop {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        poll = jm.poll(job.job_id).unwrap();
    }
    assert_eq!(poll.status, JobStatus::Success);
    assert!(poll.message.contains("/download/"));
    assert!(poll.message.contains(".zip"));

    // One archive on disk, holding both files with their content.
    let entries: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap())
        .collect();
    assert_eq!(entries.len(), 1);
    let archive_path = entries[0].path();
    assert!(archive_path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("w1-"));

    let mut archive = zip::ZipArchive::new(File::open(&archive_path).unwrap()).unwrap();
    assert_eq!(archive.len(), 2);
    let mut html = String::new();
    archive
        .by_name("index.html")
        .unwrap()
        .read_to_string(&mut html)
        .unwrap();
    assert_eq!(html, "<html>home</html>");
    let mut png = Vec::new();
    archive
        .by_name("assets/logo.png")
        .unwrap()
        .read_to_end(&mut png)
        .unwrap();
    assert_eq!(png, vec![0x89u8, 0x50, 0x4e, 0x47]);

    // The link's file name resolves back to the archive on disk.
    let file_name = archive_path.file_name().unwrap().to_string_lossy();
    let resolved = connector.resolve(&file_name).unwrap();
    assert_eq!(resolved, archive_path);
}

#[tokio::test]
async fn stream_content_is_archived_byte_for_byte() {
    let dir = tempdir().unwrap();
    let connector = connector_in(dir.path());
    let jm = JobManager::new();

    let stream = FileContent::Stream(Box::new(std::io::Cursor::new(b"<feed/>".to_vec())));
    let job = connector
        .publish(
            &ConnectorSession::new(),
            "w2",
            vec![ConnectorFile {
                path: "data/feed.xml".into(),
                content: stream,
            }],
            &jm,
        )
        .await
        .unwrap();

    let mut poll = jm.poll(job.job_id).unwrap();
    for _ in 0..200 {
        if poll.stop {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        poll = jm.poll(job.job_id).unwrap();
    }
    assert_eq!(poll.status, JobStatus::Success);

    let archive_path = std::fs::read_dir(dir.path())
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    let mut archive = zip::ZipArchive::new(File::open(&archive_path).unwrap()).unwrap();
    let mut xml = String::new();
    archive
        .by_name("data/feed.xml")
        .unwrap()
        .read_to_string(&mut xml)
        .unwrap();
    assert_eq!(xml, "<feed/>");
}

#[tokio::test]
async fn resolve_rejects_path_traversal() {
    let dir = tempdir().unwrap();
    let connector = connector_in(dir.path());
    assert!(connector.resolve("../etc/passwd").is_err());
    assert!(connector.resolve("a/b.zip").is_err());
    assert!(connector.resolve("").is_err());
    assert!(connector.resolve("no-such-archive.zip").is_err());
}
