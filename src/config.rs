use std::fs;
use std::path::Path;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::ItemId;
use crate::error::ManagerError;
use crate::store::Store;

/// Name of the sub-directory holding already watched items.
pub const DEFAULT_WATCHED_DIR: &str = "視聴済み";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub management_dir: Option<String>,
    #[serde(default)]
    pub watched_dir: Option<String>,
    #[serde(default)]
    pub endpoints: Option<Endpoints>,
}

/// Every remote url the tool talks to. Templates use `{workno}`, `{product_id}`
/// and `{page}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Endpoints {
    pub login: String,
    pub mypage: String,
    pub play: String,
    pub download: String,
    pub work_info: String,
    pub product_count: String,
    pub purchases: String,
    pub mylists: String,
    pub mylist_update: String,
    pub mylist_work_update: String,
    pub dlfarm: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "https://login.dlsite.com/login".to_string(),
            mypage: "https://ssl.dlsite.com/home/mypage".to_string(),
            play: "https://play.dlsite.com/".to_string(),
            download: "https://play.dlsite.com/api/download?workno={workno}".to_string(),
            work_info: "https://www.dlsite.com/maniax/product/info/ajax?product_id={product_id}"
                .to_string(),
            product_count: "https://play.dlsite.com/api/product_count".to_string(),
            purchases: "https://play.dlsite.com/api/purchases?page={page}".to_string(),
            mylists: "https://play.dlsite.com/api/mylist/mylists?sync=true".to_string(),
            mylist_update: "https://play.dlsite.com/api/mylist/update_mylist".to_string(),
            mylist_work_update: "https://play.dlsite.com/api/mylist/update_mylist_work"
                .to_string(),
            dlfarm: "https://www.dlsite.com/maniax/event/dlfarm/ajax?act=draw".to_string(),
        }
    }
}

impl Endpoints {
    pub fn download_url(&self, item: &ItemId) -> String {
        self.download.replace("{workno}", item.as_str())
    }

    pub fn work_info_url(&self, item: &ItemId) -> String {
        self.work_info.replace("{product_id}", item.as_str())
    }

    pub fn purchases_url(&self, page: u64) -> String {
        self.purchases.replace("{page}", &page.to_string())
    }
}

/// Configuration after defaults are applied. Passed explicitly into the
/// components instead of living in globals.
#[derive(Debug, Clone)]
pub struct Settings {
    pub schema_version: u32,
    pub management_dir: Option<Utf8PathBuf>,
    pub watched_dir: String,
    pub endpoints: Endpoints,
}

impl Settings {
    pub fn management_dir(&self) -> Result<&Utf8PathBuf, ManagerError> {
        self.management_dir
            .as_ref()
            .ok_or(ManagerError::MissingManagementDir)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the config file; a missing file is an empty config.
    pub fn load(path: &Path) -> Result<Config, ManagerError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content =
            fs::read_to_string(path).map_err(|_| ManagerError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| ManagerError::ConfigParse(err.to_string()))
    }

    pub fn save(path: &Path, config: &Config) -> Result<(), ManagerError> {
        let content = serde_json::to_vec_pretty(config)
            .map_err(|err| ManagerError::ConfigParse(err.to_string()))?;
        Store::write_bytes_atomic(path, &content)
    }

    pub fn resolve(path: &Path) -> Result<Settings, ManagerError> {
        Ok(Self::resolve_config(Self::load(path)?))
    }

    pub fn resolve_config(config: Config) -> Settings {
        Settings {
            schema_version: config.schema_version.unwrap_or(1),
            management_dir: config
                .management_dir
                .filter(|dir| !dir.trim().is_empty())
                .map(Utf8PathBuf::from),
            watched_dir: config
                .watched_dir
                .filter(|dir| !dir.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_WATCHED_DIR.to_string()),
            endpoints: config.endpoints.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_empty_config() {
        let settings = ConfigLoader::resolve_config(Config::default());
        assert_eq!(settings.schema_version, 1);
        assert!(settings.management_dir.is_none());
        assert_eq!(settings.watched_dir, DEFAULT_WATCHED_DIR);
        assert_eq!(settings.endpoints, Endpoints::default());
    }

    #[test]
    fn endpoint_templates() {
        let endpoints = Endpoints::default();
        let id: ItemId = "RJ123".parse().unwrap();
        assert_eq!(
            endpoints.download_url(&id),
            "https://play.dlsite.com/api/download?workno=RJ123"
        );
        assert_eq!(
            endpoints.work_info_url(&id),
            "https://www.dlsite.com/maniax/product/info/ajax?product_id=RJ123"
        );
        assert_eq!(
            endpoints.purchases_url(3),
            "https://play.dlsite.com/api/purchases?page=3"
        );
    }
}
