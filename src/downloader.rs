use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use reqwest::Url;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, HeaderName};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

use crate::config::Endpoints;
use crate::domain::{ItemId, parse_item_reference};
use crate::error::ManagerError;
use crate::http::{handle_status, send_with_retries};
use crate::session::Session;

/// Bytes read from the network between writes.
pub const DOWNLOAD_CHUNK_SIZE: usize = 25 * 1024 * 1024;
/// Suffix of files still being written.
pub const TEMP_SUFFIX: &str = ".downloading";

static DIVISION_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#download_division_file").expect("valid selector"));
static PART_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".work_download").expect("valid selector"));
static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

/// A response after redirects, with its body still unread.
pub struct RemoteResponse {
    pub url: String,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

impl RemoteResponse {
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|value| value.contains("text/html"))
    }
}

pub trait DownloadSource: Send + Sync {
    /// GET with redirects followed. A 401 must surface as `Unauthorized`.
    fn get(&self, session: &Session, url: &str) -> Result<RemoteResponse, ManagerError>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpDownloadSource;

impl DownloadSource for HttpDownloadSource {
    fn get(&self, session: &Session, url: &str) -> Result<RemoteResponse, ManagerError> {
        let response = send_with_retries(|| session.client().get(url))?;
        let response = handle_status(response)?;
        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header(CONTENT_TYPE);
        let content_disposition = header(CONTENT_DISPOSITION);
        let content_length = header(CONTENT_LENGTH).and_then(|value| value.parse().ok());
        Ok(RemoteResponse {
            url: response.url().to_string(),
            content_type,
            content_disposition,
            content_length,
            body: Box::new(response),
        })
    }
}

/// Downloads every file of one item.
pub trait ItemDownloader {
    fn download_item(
        &self,
        session: &Session,
        id: &ItemId,
        dir: &Path,
    ) -> Result<Vec<PathBuf>, ManagerError>;
}

pub struct Downloader<S: DownloadSource> {
    source: S,
    endpoints: Endpoints,
    chunk_size: usize,
}

impl<S: DownloadSource> Downloader<S> {
    pub fn new(source: S, endpoints: Endpoints) -> Self {
        Self {
            source,
            endpoints,
            chunk_size: DOWNLOAD_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Direct file urls for `id`: the links of the split download page, or
    /// the single url the download endpoint redirected to.
    pub fn resolve_download_urls(
        &self,
        session: &Session,
        id: &ItemId,
    ) -> Result<Vec<String>, ManagerError> {
        let url = self.endpoints.download_url(id);
        let mut response = self.source.get(session, &url)?;
        debug!(
            item = %id,
            url = %response.url,
            content_type = ?response.content_type,
            content_length = ?response.content_length,
            "resolved download"
        );
        if !response.is_html() {
            return Ok(vec![response.url]);
        }
        let mut html = String::new();
        response
            .body
            .read_to_string(&mut html)
            .map_err(|err| ManagerError::Http(err.to_string()))?;
        split_download_urls(&html, &response.url)
    }

    /// Accepts an item id or a product page url.
    pub fn download_to(
        &self,
        session: &Session,
        reference: &str,
        dir: &Path,
    ) -> Result<Vec<PathBuf>, ManagerError> {
        let id = parse_item_reference(reference)?;
        self.download_item(session, &id, dir)
    }

    fn write_stream(
        &self,
        body: &mut dyn Read,
        dir: &Path,
        file_name: &str,
    ) -> Result<(PathBuf, u64), ManagerError> {
        let final_path = dir.join(file_name);
        let temp_path = dir.join(format!("{file_name}{TEMP_SUFFIX}"));
        let result = self.copy_chunks(body, &temp_path);
        let written = match result {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&temp_path);
                return Err(err);
            }
        };
        fs::rename(&temp_path, &final_path)
            .map_err(|err| ManagerError::Filesystem(err.to_string()))?;
        Ok((final_path, written))
    }

    fn copy_chunks(&self, body: &mut dyn Read, temp_path: &Path) -> Result<u64, ManagerError> {
        let file =
            File::create(temp_path).map_err(|err| ManagerError::Filesystem(err.to_string()))?;
        let mut writer = BufWriter::new(file);
        let mut buffer = vec![0u8; self.chunk_size];
        let mut written = 0u64;
        loop {
            let read = body
                .read(&mut buffer)
                .map_err(|err| ManagerError::Http(err.to_string()))?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..read])
                .map_err(|err| ManagerError::Filesystem(err.to_string()))?;
            written += read as u64;
        }
        writer
            .flush()
            .map_err(|err| ManagerError::Filesystem(err.to_string()))?;
        Ok(written)
    }
}

impl<S: DownloadSource> ItemDownloader for Downloader<S> {
    fn download_item(
        &self,
        session: &Session,
        id: &ItemId,
        dir: &Path,
    ) -> Result<Vec<PathBuf>, ManagerError> {
        let urls = self.resolve_download_urls(session, id)?;
        let mut written = Vec::with_capacity(urls.len());
        for (index, url) in urls.iter().enumerate() {
            let mut response = self.source.get(session, url)?;
            let file_name = response
                .content_disposition
                .as_deref()
                .and_then(content_disposition_filename)
                .unwrap_or_else(|| format!("{id}.part{}", index + 1));
            info!(
                item = %id,
                file = %file_name,
                bytes = ?response.content_length,
                "downloading"
            );
            let (path, bytes) = self.write_stream(response.body.as_mut(), dir, &file_name)?;
            debug!(path = %path.display(), bytes, "download complete");
            written.push(path);
        }
        Ok(written)
    }
}

/// The `filename=` parameter, unquoted and reduced to its last path
/// component.
pub fn content_disposition_filename(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|field| field.strip_prefix("filename="))
        .map(|value| value.trim().trim_matches('"'))
        .and_then(|value| value.rsplit(['/', '\\']).next())
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_string)
}

/// Links of the split download page, in document order. Relative links are
/// resolved against `page_url`.
pub fn split_download_urls(html: &str, page_url: &str) -> Result<Vec<String>, ManagerError> {
    let document = Html::parse_document(html);
    let container = document
        .select(&DIVISION_SELECTOR)
        .next()
        .ok_or_else(|| ManagerError::SplitPage("no download_division_file element".to_string()))?;
    let base = Url::parse(page_url).ok();
    let urls = container
        .select(&PART_SELECTOR)
        .filter_map(part_href)
        .map(|href| match base.as_ref().and_then(|base| base.join(href).ok()) {
            Some(url) => url.to_string(),
            None => href.to_string(),
        })
        .collect::<Vec<_>>();
    if urls.is_empty() {
        return Err(ManagerError::SplitPage(format!(
            "no download links on {page_url}"
        )));
    }
    Ok(urls)
}

fn part_href(part: ElementRef<'_>) -> Option<&str> {
    if part.value().name() == "a" {
        return part.value().attr("href");
    }
    part.select(&LINK_SELECTOR)
        .next()
        .and_then(|link| link.value().attr("href"))
}
