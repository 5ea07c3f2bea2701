use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::error::ManagerError;

/// Unpacks a zip archive into `target_dir`. Used when no external extraction
/// tool is installed.
pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), ManagerError> {
    let failed = |message: String| ManagerError::ExtractionTool {
        target: zip_path.to_path_buf(),
        message,
    };
    let file = fs::File::open(zip_path).map_err(|err| failed(err.to_string()))?;
    let mut archive = ZipArchive::new(file).map_err(|err| failed(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|err| failed(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => return Err(failed("zip entry path traversal detected".to_string())),
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| ManagerError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| ManagerError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| ManagerError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| failed(err.to_string()))?;
    }
    Ok(())
}

/// Names starting with a dot are hidden and never treated as archives.
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Regular files directly inside `dir`, in directory listing order.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, ManagerError> {
    let entries = fs::read_dir(dir).map_err(|err| {
        ManagerError::Filesystem(format!("read dir {}: {err}", dir.display()))
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| ManagerError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

/// Sub-directories directly inside `dir`.
pub fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>, ManagerError> {
    let entries = fs::read_dir(dir).map_err(|err| {
        ManagerError::Filesystem(format!("read dir {}: {err}", dir.display()))
    })?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| ManagerError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    #[test]
    fn extract_zip_writes_entries() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("RJ1.zip");
        let file = fs::File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("work/readme.txt", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"hello").unwrap();
        writer.finish().unwrap();

        let out = temp.path().join("out");
        extract_zip(&zip_path, &out).unwrap();
        let content = fs::read_to_string(out.join("work/readme.txt")).unwrap();
        assert_eq!(content, "hello");
    }

    #[test]
    fn hidden_names() {
        assert!(is_hidden(Path::new("/a/.DS_Store")));
        assert!(!is_hidden(Path::new("/a/RJ1.zip")));
    }
}
