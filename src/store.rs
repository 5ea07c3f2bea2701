use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use tempfile::Builder;

use crate::error::ManagerError;
use crate::session::{Credential, Session};

pub const CONFIG_DIR_NAME: &str = ".dlsite-manager";
pub const CONFIG_FILE: &str = "config.json";
pub const SESSION_FILE: &str = "main.session";
pub const CREDENTIAL_FILE: &str = "credential.json";
/// Staging directory for downloads and extraction, inside the management root.
pub const STAGING_DIR: &str = "downloading";

/// On-disk layout of the tool's own state: config, session and credential.
#[derive(Debug, Clone)]
pub struct Store {
    config_dir: Utf8PathBuf,
}

impl Store {
    pub fn new(config_dir: Option<&Utf8Path>) -> Result<Self, ManagerError> {
        if let Some(dir) = config_dir {
            return Ok(Self::new_with_paths(dir.to_path_buf()));
        }
        let config_dir = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(CONFIG_DIR_NAME)).ok()
            })
            .ok_or_else(|| {
                ManagerError::Filesystem("unable to resolve config directory".to_string())
            })?;
        Ok(Self { config_dir })
    }

    pub fn new_with_paths(config_dir: Utf8PathBuf) -> Self {
        Self { config_dir }
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> Utf8PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn session_path(&self) -> Utf8PathBuf {
        self.config_dir.join(SESSION_FILE)
    }

    pub fn credential_path(&self) -> Utf8PathBuf {
        self.config_dir.join(CREDENTIAL_FILE)
    }

    pub fn ensure_config_dir(&self) -> Result<(), ManagerError> {
        fs::create_dir_all(self.config_dir.as_std_path())
            .map_err(|err| ManagerError::Filesystem(err.to_string()))
    }

    /// Returns `None` when no session was ever saved.
    pub fn load_session(&self) -> Result<Option<Session>, ManagerError> {
        let path = self.session_path();
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content =
            fs::read(path.as_std_path()).map_err(|err| ManagerError::Filesystem(err.to_string()))?;
        Session::from_json(&content).map(Some)
    }

    pub fn save_session(&self, session: &Session) -> Result<(), ManagerError> {
        let content = session.to_json()?;
        Self::write_bytes_atomic(self.session_path().as_std_path(), &content)
    }

    pub fn load_credential(&self) -> Result<Option<Credential>, ManagerError> {
        let path = self.credential_path();
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| ManagerError::Filesystem(err.to_string()))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|err| ManagerError::ConfigParse(err.to_string()))
    }

    /// Writes the credential readable by the owner only.
    pub fn save_credential(&self, credential: &Credential) -> Result<(), ManagerError> {
        self.ensure_config_dir()?;
        let content = serde_json::to_vec_pretty(credential)
            .map_err(|err| ManagerError::ConfigParse(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("credential")
            .tempfile_in(self.config_dir.as_std_path())
            .map_err(|err| ManagerError::Filesystem(err.to_string()))?;
        temp.write_all(&content)
            .map_err(|err| ManagerError::Filesystem(err.to_string()))?;
        restrict_permissions(temp.path())?;
        temp.persist(self.credential_path().as_std_path())
            .map_err(|err| ManagerError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn clear_credential(&self) -> Result<bool, ManagerError> {
        let path = self.credential_path();
        if !path.as_std_path().exists() {
            return Ok(false);
        }
        fs::remove_file(path.as_std_path())
            .map_err(|err| ManagerError::Filesystem(err.to_string()))?;
        Ok(true)
    }

    pub fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), ManagerError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| ManagerError::Filesystem(err.to_string()))?;
        }
        let mut tmp_path = path.as_os_str().to_owned();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);
        fs::write(&tmp_path, content).map_err(|err| ManagerError::Filesystem(err.to_string()))?;
        fs::rename(&tmp_path, path).map_err(|err| ManagerError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

pub fn staging_dir(root: &Path) -> PathBuf {
    root.join(STAGING_DIR)
}

pub fn ensure_dir(path: &Path) -> Result<(), ManagerError> {
    fs::create_dir_all(path).map_err(|err| ManagerError::Filesystem(err.to_string()))
}

/// Moves a file, falling back to copy and delete across filesystems.
pub fn move_file(from: &Path, to: &Path) -> Result<(), ManagerError> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to).map_err(|err| ManagerError::Filesystem(err.to_string()))?;
            fs::remove_file(from).map_err(|err| ManagerError::Filesystem(err.to_string()))
        }
    }
}

/// Replaces `to` with `from`. An existing destination is deleted first.
pub fn atomic_rename_dir(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    fs::rename(from, to)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), ManagerError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|err| ManagerError::Filesystem(err.to_string()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), ManagerError> {
    Ok(())
}
