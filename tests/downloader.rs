use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::sync::Mutex;

use assert_matches::assert_matches;

use dlsite_manager::config::Endpoints;
use dlsite_manager::domain::ItemId;
use dlsite_manager::downloader::{
    DownloadSource, Downloader, ItemDownloader, RemoteResponse, TEMP_SUFFIX,
};
use dlsite_manager::error::ManagerError;
use dlsite_manager::session::Session;

#[derive(Clone)]
struct Page {
    final_url: String,
    content_type: &'static str,
    disposition: Option<String>,
    body: Vec<u8>,
}

#[derive(Default)]
struct FakeSource {
    pages: HashMap<String, Page>,
    unauthorized: bool,
    expired_urls: Vec<String>,
    requests: Mutex<Vec<String>>,
}

impl FakeSource {
    fn page(mut self, url: &str, page: Page) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }
}

impl DownloadSource for FakeSource {
    fn get(&self, _session: &Session, url: &str) -> Result<RemoteResponse, ManagerError> {
        self.requests.lock().unwrap().push(url.to_string());
        if self.unauthorized || self.expired_urls.iter().any(|expired| expired == url) {
            return Err(ManagerError::Unauthorized(url.to_string()));
        }
        let page = self
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| ManagerError::HttpStatus {
                status: 404,
                message: url.to_string(),
            })?;
        Ok(RemoteResponse {
            url: page.final_url,
            content_type: Some(page.content_type.to_string()),
            content_disposition: page.disposition,
            content_length: Some(page.body.len() as u64),
            body: Box::new(Cursor::new(page.body)),
        })
    }
}

fn entry_url(id: &str) -> String {
    Endpoints::default().download_url(&id.parse().unwrap())
}

fn file(final_url: &str, name: Option<&str>, body: &[u8]) -> Page {
    Page {
        final_url: final_url.to_string(),
        content_type: "application/octet-stream",
        disposition: name.map(|name| format!("attachment; filename=\"{name}\"")),
        body: body.to_vec(),
    }
}

const SPLIT_PAGE: &str = r#"<html><body>
<div id="download_division_file">
  <table>
    <tr><td class="work_download"><a href="https://dl.example.com/RJ1.part1.exe">1</a></td></tr>
    <tr><td class="work_download"><a href="https://dl.example.com/RJ1.part2.rar">2</a></td></tr>
    <tr><td class="work_download"><a href="/files/RJ1.part3.rar">3</a></td></tr>
  </table>
</div>
</body></html>"#;

#[test]
fn split_page_links_are_returned_in_order() {
    let source = FakeSource::default().page(
        &entry_url("RJ1"),
        Page {
            final_url: "https://play.example.com/split/RJ1".to_string(),
            content_type: "text/html; charset=UTF-8",
            disposition: None,
            body: SPLIT_PAGE.as_bytes().to_vec(),
        },
    );
    let downloader = Downloader::new(source, Endpoints::default());
    let session = Session::new().unwrap();
    let id: ItemId = "RJ1".parse().unwrap();

    let urls = downloader.resolve_download_urls(&session, &id).unwrap();
    assert_eq!(
        urls,
        vec![
            "https://dl.example.com/RJ1.part1.exe".to_string(),
            "https://dl.example.com/RJ1.part2.rar".to_string(),
            "https://play.example.com/files/RJ1.part3.rar".to_string(),
        ]
    );
}

#[test]
fn direct_download_resolves_to_redirected_url() {
    let source = FakeSource::default().page(
        &entry_url("RJ2"),
        file("https://dl.example.com/RJ2.zip", Some("RJ2.zip"), b"zip"),
    );
    let downloader = Downloader::new(source, Endpoints::default());
    let session = Session::new().unwrap();
    let id: ItemId = "RJ2".parse().unwrap();

    let urls = downloader.resolve_download_urls(&session, &id).unwrap();
    assert_eq!(urls, vec!["https://dl.example.com/RJ2.zip".to_string()]);
}

#[test]
fn split_page_without_links_is_an_error() {
    let source = FakeSource::default().page(
        &entry_url("RJ3"),
        Page {
            final_url: "https://play.example.com/split/RJ3".to_string(),
            content_type: "text/html",
            disposition: None,
            body: b"<html><body><p>maintenance</p></body></html>".to_vec(),
        },
    );
    let downloader = Downloader::new(source, Endpoints::default());
    let session = Session::new().unwrap();
    let id: ItemId = "RJ3".parse().unwrap();

    assert_matches!(
        downloader.resolve_download_urls(&session, &id),
        Err(ManagerError::SplitPage(_))
    );
}

#[test]
fn download_writes_files_named_by_disposition() {
    let temp = tempfile::tempdir().unwrap();
    let final_url = "https://dl.example.com/RJ4.zip";
    let source = FakeSource::default()
        .page(&entry_url("RJ4"), file(final_url, Some("RJ4.zip"), b"ignored"))
        .page(final_url, file(final_url, Some("../evil/RJ4.zip"), b"archive bytes"));
    let downloader = Downloader::new(source, Endpoints::default()).with_chunk_size(4);
    let session = Session::new().unwrap();

    let files = downloader
        .download_to(
            &session,
            "https://www.dlsite.com/maniax/work/=/product_id/RJ4.html",
            temp.path(),
        )
        .unwrap();

    assert_eq!(files, vec![temp.path().join("RJ4.zip")]);
    assert_eq!(fs::read(&files[0]).unwrap(), b"archive bytes");
    let names: Vec<String> = fs::read_dir(temp.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["RJ4.zip".to_string()]);
}

#[test]
fn missing_disposition_falls_back_to_part_name() {
    let temp = tempfile::tempdir().unwrap();
    let final_url = "https://dl.example.com/blob";
    let source = FakeSource::default()
        .page(&entry_url("RJ5"), file(final_url, None, b""))
        .page(final_url, file(final_url, None, b"data"));
    let downloader = Downloader::new(source, Endpoints::default());
    let session = Session::new().unwrap();
    let id: ItemId = "RJ5".parse().unwrap();

    let files = downloader.download_item(&session, &id, temp.path()).unwrap();
    assert_eq!(files, vec![temp.path().join("RJ5.part1")]);
}

#[test]
fn unauthorized_propagates() {
    let temp = tempfile::tempdir().unwrap();
    let source = FakeSource {
        unauthorized: true,
        ..FakeSource::default()
    };
    let downloader = Downloader::new(source, Endpoints::default());
    let session = Session::new().unwrap();
    let id: ItemId = "RJ6".parse().unwrap();

    assert_matches!(
        downloader.download_item(&session, &id, temp.path()),
        Err(ManagerError::Unauthorized(_))
    );
    assert!(fs::read_dir(temp.path()).unwrap().next().is_none());
}

#[test]
fn unauthorized_mid_split_keeps_finished_parts() {
    let temp = tempfile::tempdir().unwrap();
    let part1 = "https://dl.example.com/RJ7.part1.exe";
    let part2 = "https://dl.example.com/RJ7.part2.rar";
    let page = format!(
        r#"<div id="download_division_file"><table>
        <tr><td class="work_download"><a href="{part1}">1</a></td></tr>
        <tr><td class="work_download"><a href="{part2}">2</a></td></tr>
        </table></div>"#
    );
    let source = FakeSource {
        expired_urls: vec![part2.to_string()],
        ..FakeSource::default()
    }
    .page(
        &entry_url("RJ7"),
        Page {
            final_url: "https://play.example.com/split/RJ7".to_string(),
            content_type: "text/html",
            disposition: None,
            body: page.into_bytes(),
        },
    )
    .page(part1, file(part1, Some("RJ7.part1.exe"), b"first volume"));
    let downloader = Downloader::new(source, Endpoints::default());
    let session = Session::new().unwrap();
    let id: ItemId = "RJ7".parse().unwrap();

    assert_matches!(
        downloader.download_item(&session, &id, temp.path()),
        Err(ManagerError::Unauthorized(url)) if url == part2
    );
    let names: Vec<String> = fs::read_dir(temp.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["RJ7.part1.exe".to_string()]);
    assert!(!names.iter().any(|name| name.ends_with(TEMP_SUFFIX)));
    assert_eq!(
        fs::read(temp.path().join("RJ7.part1.exe")).unwrap(),
        b"first volume"
    );
}
