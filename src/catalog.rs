use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use crate::config::Endpoints;
use crate::domain::ItemId;
use crate::error::ManagerError;
use crate::http::{handle_status, send_with_retries};

/// Looks up human readable titles of works.
pub trait CatalogClient: Send + Sync {
    fn work_name(&self, id: &ItemId) -> Result<String, ManagerError>;
}

#[derive(Clone)]
pub struct HttpCatalogClient {
    client: Client,
    endpoints: Endpoints,
}

impl HttpCatalogClient {
    pub fn new(endpoints: Endpoints) -> Result<Self, ManagerError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("dlsm/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ManagerError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| ManagerError::Http(err.to_string()))?;
        Ok(Self { client, endpoints })
    }
}

impl CatalogClient for HttpCatalogClient {
    fn work_name(&self, id: &ItemId) -> Result<String, ManagerError> {
        let url = self.endpoints.work_info_url(id);
        debug!(%url, "looking up title");
        let response = send_with_retries(|| self.client.get(&url))
            .and_then(handle_status)
            .map_err(|err| ManagerError::Catalog(err.to_string()))?;
        let body: Value = response
            .json()
            .map_err(|err| ManagerError::Catalog(err.to_string()))?;
        parse_work_name(&body, id)
    }
}

/// The info endpoint answers `{"RJ123": {"work_name": "..."}}`.
pub fn parse_work_name(body: &Value, id: &ItemId) -> Result<String, ManagerError> {
    body.get(id.as_str())
        .and_then(|work| work.get("work_name"))
        .and_then(Value::as_str)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ManagerError::Catalog(format!("no work_name for {id}")))
}
