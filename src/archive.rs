use std::cell::OnceCell;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::catalog::CatalogClient;
use crate::domain::ItemId;
use crate::downloader::TEMP_SUFFIX;
use crate::error::ManagerError;
use crate::fs_util::{file_name, is_hidden, list_files};
use crate::grouping::group_all;
use crate::store::{ensure_dir, move_file};

/// One or more downloaded files that make up a single work's package.
#[derive(Debug)]
pub struct ArchiveSet {
    code: String,
    paths: Vec<PathBuf>,
    title: OnceCell<String>,
}

impl ArchiveSet {
    /// `paths` must be non-empty; the work code is the first file name up to
    /// its first dot.
    pub fn new(paths: Vec<PathBuf>) -> Result<Self, ManagerError> {
        let first = paths
            .first()
            .ok_or_else(|| ManagerError::Filesystem("empty archive set".to_string()))?;
        let name = file_name(first);
        let code = name.split('.').next().unwrap_or_default().to_string();
        Ok(Self {
            code,
            paths,
            title: OnceCell::new(),
        })
    }

    /// Groups the regular, non-hidden files directly inside `dir`. Unfinished
    /// downloads are left out.
    pub fn from_directory(dir: &Path) -> Result<Vec<Self>, ManagerError> {
        let names = list_files(dir)?
            .into_iter()
            .filter(|path| !is_hidden(path))
            .map(|path| file_name(&path))
            .filter(|name| !name.ends_with(TEMP_SUFFIX))
            .collect::<Vec<_>>();
        group_all(names)
            .into_iter()
            .map(|group| Self::new(group.into_iter().map(|name| dir.join(name)).collect()))
            .collect()
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn item_id(&self) -> Option<ItemId> {
        self.code.parse().ok()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Title from the catalog, looked up once. Lookup failures yield an empty
    /// title.
    pub fn resolve_title(&self, catalog: &dyn CatalogClient) -> &str {
        self.title.get_or_init(|| {
            let Some(id) = self.item_id() else {
                return String::new();
            };
            match catalog.work_name(&id) {
                Ok(title) => sanitize_title(&title),
                Err(err) => {
                    warn!(item = %id, error = %err, "title lookup failed");
                    String::new()
                }
            }
        })
    }

    pub fn output_dir_name(&self, catalog: &dyn CatalogClient) -> String {
        output_dir_name(&self.code, self.resolve_title(catalog))
    }

    /// Moves every file of the set into `<parent>/<dir_name>` and returns
    /// that directory. Same-named files there are overwritten.
    pub fn move_into(&self, dir_name: &str) -> Result<PathBuf, ManagerError> {
        let parent = self.paths[0]
            .parent()
            .ok_or_else(|| ManagerError::Filesystem("archive has no parent".to_string()))?;
        let out_dir = parent.join(dir_name);
        ensure_dir(&out_dir)?;
        for path in &self.paths {
            let target = out_dir.join(file_name(path));
            debug!(from = %path.display(), to = %target.display(), "moving archive file");
            move_file(path, &target)?;
        }
        Ok(out_dir)
    }
}

/// Replaces characters that cannot appear in a directory name.
pub fn sanitize_title(title: &str) -> String {
    title.replace(['/', ':'], "_")
}

pub fn output_dir_name(code: &str, title: &str) -> String {
    if title.is_empty() {
        code.to_string()
    } else {
        format!("{code} {title}")
    }
}
