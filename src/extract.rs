use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::error::ManagerError;
use crate::fs_util::{extract_zip, file_name, is_hidden, list_files};

pub trait Unarchiver: Send + Sync {
    /// Extracts `target` into `dir`.
    fn unarchive(&self, dir: &Path, target: &Path) -> Result<(), ManagerError>;
}

/// Runs `unar`, which follows split rar volumes and decodes Japanese file
/// names. Zip archives can still be extracted when it is not installed.
#[derive(Debug, Clone)]
pub struct SystemUnarchiver {
    unar: Option<PathBuf>,
}

impl SystemUnarchiver {
    pub fn new() -> Self {
        Self {
            unar: find_in_path("unar"),
        }
    }

    pub fn with_program(unar: Option<PathBuf>) -> Self {
        Self { unar }
    }

    pub fn program(&self) -> Option<&Path> {
        self.unar.as_deref()
    }

    fn run_cmd(&self, program: &Path, args: &[&Path], cwd: &Path) -> Result<(), ManagerError> {
        let target = args.last().map(|path| path.to_path_buf()).unwrap_or_default();
        let mut cmd = Command::new(program);
        cmd.arg("-f").arg("-o").args(args).current_dir(cwd);
        debug!(?cmd, "running unarchiver");
        let output = cmd.output().map_err(|err| ManagerError::ExtractionTool {
            target: target.clone(),
            message: err.to_string(),
        })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("{} exited with {}", program.display(), output.status)
        } else {
            stderr
        };
        Err(ManagerError::ExtractionTool { target, message })
    }
}

impl Default for SystemUnarchiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Unarchiver for SystemUnarchiver {
    fn unarchive(&self, dir: &Path, target: &Path) -> Result<(), ManagerError> {
        match &self.unar {
            Some(program) => self.run_cmd(program, &[dir, target], dir),
            None if target.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("zip")) => {
                debug!(target = %target.display(), "unar not found, extracting zip in-process");
                extract_zip(target, dir)
            }
            None => Err(ManagerError::MissingTool("unar".to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// The directory held no files.
    Empty,
    Extracted { target: PathBuf, removed: usize },
}

/// The file handed to the unarchiver: the only file, else the first visible
/// `part1.` volume, else the first listed file.
pub fn select_target(files: &[PathBuf]) -> Option<&PathBuf> {
    if files.len() <= 1 {
        return files.first();
    }
    files
        .iter()
        .find(|path| !is_hidden(path) && file_name(path).contains("part1."))
        .or_else(|| files.first())
}

pub struct Extractor<U: Unarchiver> {
    unarchiver: U,
}

impl<U: Unarchiver> Extractor<U> {
    pub fn new(unarchiver: U) -> Self {
        Self { unarchiver }
    }

    /// Extracts the archive set in `dir` into `dir` itself. On failure nothing
    /// is deleted.
    pub fn unarchive(
        &self,
        dir: &Path,
        keep_archives: bool,
    ) -> Result<ExtractOutcome, ManagerError> {
        let files = list_files(dir)?;
        let Some(target) = select_target(&files) else {
            debug!(dir = %dir.display(), "nothing to extract");
            return Ok(ExtractOutcome::Empty);
        };
        let target = target.clone();

        self.unarchiver.unarchive(dir, &target)?;
        info!(target = %target.display(), "extracted");

        let mut removed = 0;
        if !keep_archives {
            for file in &files {
                fs::remove_file(file).map_err(|err| ManagerError::Filesystem(err.to_string()))?;
                removed += 1;
            }
        }
        Ok(ExtractOutcome::Extracted { target, removed })
    }
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.is_file() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|name| PathBuf::from("/dl").join(name)).collect()
    }

    #[test]
    fn single_file_is_target_even_if_hidden() {
        let files = paths(&[".RJ1.zip"]);
        assert_eq!(select_target(&files), Some(&files[0]));
    }

    #[test]
    fn falls_back_to_first_listed() {
        let files = paths(&["RJ1.a.rar", "RJ1.b.rar"]);
        assert_eq!(select_target(&files), Some(&files[0]));
        assert_eq!(select_target(&[]), None);
    }

    #[test]
    fn missing_tool_for_non_zip() {
        let unarchiver = SystemUnarchiver::with_program(None);
        let err = unarchiver
            .unarchive(Path::new("/dl"), Path::new("/dl/RJ1.part1.exe"))
            .unwrap_err();
        assert!(matches!(err, ManagerError::MissingTool(_)));
    }
}
