use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::domain::{ITEM_PREFIXES, ItemId};
use crate::error::ManagerError;
use crate::fs_util::list_dirs;

/// A directory in the management tree that holds one work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryItem {
    pub directory: PathBuf,
    pub item_id: ItemId,
    /// Leading `#`/`!` markers the user put on the directory name.
    pub prefix: String,
}

/// Splits `##RJ123 Title` into (`##`, `RJ123`). Names without a work id are
/// `None`.
pub fn parse_dir_name(name: &str) -> Option<(String, ItemId)> {
    let rest = name.trim_start_matches(['#', '!']);
    let prefix = name[..name.len() - rest.len()].to_string();
    let category = ITEM_PREFIXES
        .iter()
        .find(|category| rest.starts_with(**category))?;
    let digits: String = rest[category.len()..]
        .chars()
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    let id = format!("{category}{digits}").parse().ok()?;
    Some((prefix, id))
}

#[derive(Debug, Default)]
pub struct Library {
    items: BTreeMap<ItemId, LibraryItem>,
}

impl Library {
    /// Scans `root/watched_dir` and then `root`; entries directly under the
    /// root win for the same id.
    pub fn scan(root: &Path, watched_dir: &str) -> Result<Self, ManagerError> {
        let mut library = Self::default();
        let watched = root.join(watched_dir);
        if watched.is_dir() {
            library.add_dir(&watched)?;
        }
        if root.is_dir() {
            library.add_dir(root)?;
        }
        Ok(library)
    }

    /// Only the items under the watched sub-directory.
    pub fn scan_watched(root: &Path, watched_dir: &str) -> Result<Self, ManagerError> {
        let mut library = Self::default();
        let watched = root.join(watched_dir);
        if watched.is_dir() {
            library.add_dir(&watched)?;
        }
        Ok(library)
    }

    fn add_dir(&mut self, dir: &Path) -> Result<(), ManagerError> {
        for directory in list_dirs(dir)? {
            let Some(name) = directory.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if let Some((prefix, item_id)) = parse_dir_name(name) {
                self.items.insert(
                    item_id.clone(),
                    LibraryItem {
                        directory,
                        item_id,
                        prefix,
                    },
                );
            }
        }
        Ok(())
    }

    pub fn find(&self, id: &ItemId) -> Option<&LibraryItem> {
        self.items.get(id)
    }

    pub fn find_all<'a>(&'a self, ids: &BTreeSet<ItemId>) -> Vec<&'a LibraryItem> {
        ids.iter().filter_map(|id| self.find(id)).collect()
    }

    /// The ids from `ids` that are not in the library yet.
    pub fn missing(&self, ids: &BTreeSet<ItemId>) -> BTreeSet<ItemId> {
        ids.iter()
            .filter(|id| !self.items.contains_key(*id))
            .cloned()
            .collect()
    }

    pub fn items(&self) -> impl Iterator<Item = &LibraryItem> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Deletes everything inside `dir` but keeps `dir`.
pub fn clear_dir_contents(dir: &Path) -> Result<usize, ManagerError> {
    let entries = fs::read_dir(dir).map_err(|err| ManagerError::Filesystem(err.to_string()))?;
    let mut removed = 0;
    for entry in entries {
        let path = entry
            .map_err(|err| ManagerError::Filesystem(err.to_string()))?
            .path();
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|err| ManagerError::Filesystem(format!("{}: {err}", path.display())))?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_name_prefixes() {
        let (prefix, id) = parse_dir_name("#!RJ123456 Some Title").unwrap();
        assert_eq!(prefix, "#!");
        assert_eq!(id.as_str(), "RJ123456");

        let (prefix, id) = parse_dir_name("VJ1").unwrap();
        assert!(prefix.is_empty());
        assert_eq!(id.as_str(), "VJ1");
    }

    #[test]
    fn dir_name_without_id() {
        assert!(parse_dir_name("downloading").is_none());
        assert!(parse_dir_name("RJ Title").is_none());
        assert!(parse_dir_name("##").is_none());
    }
}
