use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::archive::ArchiveSet;
use crate::catalog::CatalogClient;
use crate::config::Settings;
use crate::domain::ItemId;
use crate::downloader::ItemDownloader;
use crate::error::ManagerError;
use crate::extract::{ExtractOutcome, Extractor, Unarchiver};
use crate::fs_util::{file_name, list_dirs};
use crate::library::{Library, LibraryItem, clear_dir_contents, parse_dir_name};
use crate::login::Authenticator;
use crate::session::Session;
use crate::store::{Store, atomic_rename_dir, ensure_dir, staging_dir};

/// Re-logins allowed in one download batch before a 401 becomes fatal.
pub const MAX_RELOGINS: usize = 5;

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub force: bool,
    pub extract: bool,
    pub keep_archives: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedItem {
    pub item_id: String,
    pub directory: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadedItem {
    pub item_id: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedItem {
    pub item_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadResult {
    pub skipped: Vec<SkippedItem>,
    pub downloaded: Vec<DownloadedItem>,
    pub failed: Vec<FailedItem>,
    pub relogins: usize,
    pub extract: Option<ExtractResult>,
}

impl DownloadResult {
    pub fn failures(&self) -> usize {
        self.failed.len() + self.extract.as_ref().map_or(0, |extract| extract.failed.len())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedItem {
    pub name: String,
    pub directory: String,
    pub extracted: bool,
    pub replaced: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractResult {
    pub placed: Vec<PlacedItem>,
    pub failed: Vec<FailedItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FindResult {
    pub items: Vec<LibraryItem>,
}

/// Watched item directories split into those `clean` empties and those it
/// leaves alone because of a `#`/`!` marker.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanPlan {
    pub delete: Vec<LibraryItem>,
    pub skip: Vec<LibraryItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanResult {
    pub cleaned: Vec<String>,
    pub skipped: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn emit(sink: &dyn ProgressSink, message: String, started: Option<Instant>) {
    sink.event(ProgressEvent {
        message,
        elapsed: started.map(|start| start.elapsed()),
    });
}

/// Drives download, extraction and placement into the management tree.
pub struct Manager<D, A, C, U>
where
    D: ItemDownloader,
    A: Authenticator,
    C: CatalogClient,
    U: Unarchiver,
{
    store: Store,
    settings: Settings,
    downloader: D,
    authenticator: A,
    catalog: C,
    extractor: Extractor<U>,
}

impl<D, A, C, U> Manager<D, A, C, U>
where
    D: ItemDownloader,
    A: Authenticator,
    C: CatalogClient,
    U: Unarchiver,
{
    pub fn new(
        store: Store,
        settings: Settings,
        downloader: D,
        authenticator: A,
        catalog: C,
        unarchiver: U,
    ) -> Self {
        Self {
            store,
            settings,
            downloader,
            authenticator,
            catalog,
            extractor: Extractor::new(unarchiver),
        }
    }

    pub fn management_root(&self) -> Result<PathBuf, ManagerError> {
        Ok(self.settings.management_dir()?.as_std_path().to_path_buf())
    }

    fn library(&self) -> Result<Library, ManagerError> {
        Library::scan(&self.management_root()?, &self.settings.watched_dir)
    }

    /// Ids still to download; with `force` every id is pending.
    pub fn pending_items(
        &self,
        ids: &BTreeSet<ItemId>,
        force: bool,
    ) -> Result<(BTreeSet<ItemId>, Vec<SkippedItem>), ManagerError> {
        if force {
            return Ok((ids.clone(), Vec::new()));
        }
        let library = self.library()?;
        let skipped = library
            .find_all(ids)
            .into_iter()
            .map(|item| {
                info!(item = %item.item_id, dir = %item.directory.display(), "already downloaded");
                SkippedItem {
                    item_id: item.item_id.to_string(),
                    directory: item.directory.display().to_string(),
                }
            })
            .collect();
        Ok((library.missing(ids), skipped))
    }

    /// Downloads every pending item into the staging directory, logging in
    /// again when the session expires. Returns the session in use at the end,
    /// which has already been persisted.
    pub fn download(
        &self,
        session: Session,
        ids: &BTreeSet<ItemId>,
        options: &DownloadOptions,
        sink: &dyn ProgressSink,
    ) -> Result<(Session, DownloadResult), ManagerError> {
        let started = Instant::now();
        let root = self.management_root()?;
        emit(sink, format!("phase=Resolve; items={}", ids.len()), None);
        let (mut pending, skipped) = self.pending_items(ids, options.force)?;
        let staging = staging_dir(&root);
        ensure_dir(&staging)?;

        let mut result = DownloadResult {
            skipped,
            ..DownloadResult::default()
        };
        let mut session = session;
        let mut relogins = 0usize;

        while !pending.is_empty() {
            let mut retry = BTreeSet::new();
            for id in &pending {
                emit(sink, format!("phase=Download; item={id}"), Some(started));
                match self.downloader.download_item(&session, id, &staging) {
                    Ok(files) => {
                        emit(
                            sink,
                            format!("phase=Download; item={id} files={}", files.len()),
                            Some(started),
                        );
                        result.downloaded.push(DownloadedItem {
                            item_id: id.to_string(),
                            files: files.iter().map(|path| file_name(path)).collect(),
                        });
                    }
                    Err(ManagerError::Unauthorized(url)) => {
                        if relogins > MAX_RELOGINS {
                            error!(item = %id, relogins, "giving up after repeated re-logins");
                            return Err(ManagerError::Unauthorized(url));
                        }
                        let Some(credential) = self.store.load_credential()? else {
                            return Err(ManagerError::Unauthorized(url));
                        };
                        relogins += 1;
                        warn!(item = %id, attempt = relogins, "session expired, logging in again");
                        emit(sink, format!("phase=Login; attempt={relogins}"), Some(started));
                        session = self.authenticator.login(&credential)?;
                        retry.insert(id.clone());
                    }
                    Err(err) => {
                        error!(item = %id, error = %err, "download failed");
                        result.failed.push(FailedItem {
                            item_id: id.to_string(),
                            error: err.to_string(),
                        });
                    }
                }
            }
            pending = retry;
        }
        result.relogins = relogins;
        self.store.save_session(&session)?;

        if options.extract {
            result.extract = Some(self.extract_into(&root, options.keep_archives, sink)?);
        }
        emit(sink, "phase=Place; done".to_string(), Some(started));
        Ok((session, result))
    }

    /// Groups, extracts and places whatever is in the staging directory.
    pub fn extract(
        &self,
        keep_archives: bool,
        sink: &dyn ProgressSink,
    ) -> Result<ExtractResult, ManagerError> {
        let root = self.management_root()?;
        self.extract_into(&root, keep_archives, sink)
    }

    fn extract_into(
        &self,
        root: &Path,
        keep_archives: bool,
        sink: &dyn ProgressSink,
    ) -> Result<ExtractResult, ManagerError> {
        let staging = staging_dir(root);
        let mut result = ExtractResult::default();
        if !staging.is_dir() {
            return Ok(result);
        }

        let mut work_dirs = Vec::new();
        for set in ArchiveSet::from_directory(&staging)? {
            let name = set.output_dir_name(&self.catalog);
            match set.move_into(&name) {
                Ok(dir) if !work_dirs.contains(&dir) => work_dirs.push(dir),
                Ok(_) => {}
                Err(err) => {
                    error!(archive = set.code(), error = %err, "could not stage archive");
                    result.failed.push(FailedItem {
                        item_id: set.code().to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }
        // Sets whose earlier extraction failed are retried.
        for dir in list_dirs(&staging)? {
            if parse_dir_name(&file_name(&dir)).is_some() && !work_dirs.contains(&dir) {
                work_dirs.push(dir);
            }
        }

        for work_dir in work_dirs {
            let name = file_name(&work_dir);
            match self.place(&work_dir, root, keep_archives, sink) {
                Ok(placed) => result.placed.push(placed),
                Err(err) => {
                    error!(
                        dir = %work_dir.display(),
                        error = %err,
                        "extraction failed, left in staging"
                    );
                    result.failed.push(FailedItem {
                        item_id: name,
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(result)
    }

    fn place(
        &self,
        work_dir: &Path,
        root: &Path,
        keep_archives: bool,
        sink: &dyn ProgressSink,
    ) -> Result<PlacedItem, ManagerError> {
        let name = file_name(work_dir);
        emit(sink, format!("phase=Extract; dir={name}"), None);
        let outcome = self.extractor.unarchive(work_dir, keep_archives)?;

        let destination = root.join(&name);
        let replaced = destination.exists();
        if replaced {
            warn!(dir = %destination.display(), "replacing existing directory");
        }
        emit(sink, format!("phase=Place; dir={name}"), None);
        atomic_rename_dir(work_dir, &destination)
            .map_err(|err| ManagerError::Filesystem(format!("{}: {err}", destination.display())))?;
        info!(dir = %destination.display(), "placed");
        Ok(PlacedItem {
            name,
            directory: destination.display().to_string(),
            extracted: matches!(outcome, ExtractOutcome::Extracted { .. }),
            replaced,
        })
    }

    pub fn find(&self, ids: &BTreeSet<ItemId>) -> Result<FindResult, ManagerError> {
        let library = self.library()?;
        Ok(FindResult {
            items: library.find_all(ids).into_iter().cloned().collect(),
        })
    }

    pub fn plan_clean(&self) -> Result<CleanPlan, ManagerError> {
        let library = Library::scan_watched(&self.management_root()?, &self.settings.watched_dir)?;
        let (skip, delete): (Vec<LibraryItem>, Vec<LibraryItem>) = library
            .items()
            .cloned()
            .partition(|item| !item.prefix.is_empty());
        Ok(CleanPlan { delete, skip })
    }

    /// Empties the directories in `plan.delete`, keeping the directories.
    pub fn clean(&self, plan: &CleanPlan) -> Result<CleanResult, ManagerError> {
        let mut cleaned = Vec::new();
        for item in &plan.delete {
            let removed = clear_dir_contents(&item.directory)?;
            info!(dir = %item.directory.display(), removed, "cleaned");
            cleaned.push(item.directory.display().to_string());
        }
        Ok(CleanResult {
            cleaned,
            skipped: plan
                .skip
                .iter()
                .map(|item| item.directory.display().to_string())
                .collect(),
            dry_run: false,
        })
    }
}

impl CleanPlan {
    pub fn dry_run(&self) -> CleanResult {
        CleanResult {
            cleaned: self
                .delete
                .iter()
                .map(|item| item.directory.display().to_string())
                .collect(),
            skipped: self
                .skip
                .iter()
                .map(|item| item.directory.display().to_string())
                .collect(),
            dry_run: true,
        }
    }
}
