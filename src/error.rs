use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ManagerError {
    #[error("invalid item id: {0}")]
    InvalidItemId(String),

    #[error("no item id found in url: {0}")]
    MalformedUrl(String),

    #[error("login failed: {0}")]
    AuthenticationFailure(String),

    #[error("unauthorized (session expired?) while requesting {0}")]
    Unauthorized(String),

    #[error("no stored session or credential; run `dlsm config -u <user> -p <password>` first")]
    MissingCredential,

    #[error("management directory is not configured; run `dlsm config -m <dir>` first")]
    MissingManagementDir,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to parse session file: {0}")]
    SessionParse(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("server returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("unexpected split download page: {0}")]
    SplitPage(String),

    #[error("title lookup failed: {0}")]
    Catalog(String),

    #[error("failed to extract {}: {message}", target.display())]
    ExtractionTool { target: PathBuf, message: String },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("mylist request failed: {0}")]
    Mylist(String),

    #[error("mylist not found: {0}")]
    ListNotFound(String),

    #[error("{item} is not in mylist {list}")]
    ItemNotInList { item: String, list: String },

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("purchase listing failed: {0}")]
    Purchases(String),

    #[error("{failed} item(s) failed")]
    PartialFailure { failed: usize },
}
