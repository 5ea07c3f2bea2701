use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::cookie::CookieStore;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::error::ManagerError;

/// The download endpoint inspects the user agent and refuses obvious bots.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default)]
    pub host_only: bool,
    #[serde(default)]
    pub secure: bool,
    /// Session cookies have no expiry and live until they are replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

impl StoredCookie {
    /// A cookie valid for `domain` and its subdomains.
    pub fn new(name: &str, value: &str, domain: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.trim_start_matches('.').to_ascii_lowercase(),
            path: default_cookie_path(),
            host_only: false,
            secure: false,
            expires: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }

    fn matches(&self, url: &Url, now: DateTime<Utc>) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            host == self.domain || host.ends_with(&format!(".{}", self.domain))
        };
        let secure_ok = !self.secure || url.scheme() == "https";
        domain_ok && secure_ok && path_matches(url.path(), &self.path) && !self.is_expired(now)
    }

    fn same_slot(&self, other: &StoredCookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }
}

/// RFC 6265 default-path: the request path up to, not including, its last `/`.
fn default_path_for(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => default_cookie_path(),
        Some(end) => path[..end].to_string(),
    }
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    match request_path.strip_prefix(cookie_path) {
        Some(rest) => rest.is_empty() || cookie_path.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

const EXPIRES_FORMATS: [&str; 3] = [
    "%a, %d-%b-%Y %H:%M:%S GMT",
    "%A, %d-%b-%y %H:%M:%S GMT",
    "%a %b %e %H:%M:%S %Y",
];

/// `Expires` values as servers actually send them: RFC 1123 plus the older
/// Netscape and asctime forms.
fn parse_expires(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc2822(value) {
        return Some(at.with_timezone(&Utc));
    }
    EXPIRES_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(value, format)
            .ok()
            .map(|at| at.and_utc())
    })
}

enum CookieUpdate {
    Set(StoredCookie),
    Remove(StoredCookie),
}

fn parse_set_cookie(raw: &str, url: &Url) -> Option<CookieUpdate> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let mut cookie = StoredCookie {
        name: name.to_string(),
        value: value.trim().trim_matches('"').to_string(),
        domain: url.host_str()?.to_ascii_lowercase(),
        path: default_path_for(url),
        host_only: true,
        secure: false,
        expires: None,
    };
    let now = Utc::now();
    let mut max_age = None;
    let mut expires = None;
    for attribute in parts {
        let (key, val) = match attribute.split_once('=') {
            Some((key, val)) => (key.trim(), val.trim()),
            None => (attribute.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "domain" if !val.is_empty() => {
                cookie.domain = val.trim_start_matches('.').to_ascii_lowercase();
                cookie.host_only = false;
            }
            "path" if val.starts_with('/') => cookie.path = val.to_string(),
            "secure" => cookie.secure = true,
            "max-age" => {
                if let Ok(age) = val.parse::<i64>() {
                    max_age = Some(if age <= 0 {
                        DateTime::<Utc>::MIN_UTC
                    } else {
                        TimeDelta::try_seconds(age)
                            .and_then(|age| now.checked_add_signed(age))
                            .unwrap_or(DateTime::<Utc>::MAX_UTC)
                    });
                }
            }
            "expires" => expires = parse_expires(val),
            _ => {}
        }
    }
    // Max-Age wins over Expires when both are present.
    cookie.expires = max_age.or(expires);
    if cookie.is_expired(now) {
        Some(CookieUpdate::Remove(cookie))
    } else {
        Some(CookieUpdate::Set(cookie))
    }
}

/// Cookie storage shared with the HTTP client. Unlike reqwest's own jar it can
/// be enumerated, which is what makes the session persistable.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: RwLock<Vec<StoredCookie>>,
}

impl CookieJar {
    pub fn from_cookies(cookies: Vec<StoredCookie>) -> Self {
        Self {
            cookies: RwLock::new(cookies),
        }
    }

    pub fn insert(&self, cookie: StoredCookie) {
        if let Ok(mut cookies) = self.cookies.write() {
            cookies.retain(|existing| !existing.same_slot(&cookie));
            cookies.push(cookie);
        }
    }

    fn remove(&self, cookie: &StoredCookie) {
        if let Ok(mut cookies) = self.cookies.write() {
            cookies.retain(|existing| !existing.same_slot(cookie));
        }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.cookies.read().ok().and_then(|cookies| {
            cookies
                .iter()
                .rev()
                .find(|cookie| cookie.name == name)
                .map(|cookie| cookie.value.clone())
        })
    }

    /// Live cookies only; expired ones are never persisted.
    pub fn snapshot(&self) -> Vec<StoredCookie> {
        let now = Utc::now();
        self.cookies
            .read()
            .map(|cookies| {
                cookies
                    .iter()
                    .filter(|cookie| !cookie.is_expired(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn header_for(&self, url: &Url) -> Option<String> {
        let now = Utc::now();
        let cookies = self.cookies.read().ok()?;
        let pairs = cookies
            .iter()
            .filter(|cookie| cookie.matches(url, now))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}

impl CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        for header in cookie_headers {
            let Ok(raw) = header.to_str() else {
                continue;
            };
            match parse_set_cookie(raw, url) {
                Some(CookieUpdate::Set(cookie)) => self.insert(cookie),
                Some(CookieUpdate::Remove(cookie)) => self.remove(&cookie),
                None => {}
            }
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.header_for(url)
            .and_then(|header| HeaderValue::from_str(&header).ok())
    }
}

#[derive(Serialize, Deserialize)]
struct SessionFile {
    cookies: Vec<StoredCookie>,
}

/// Authenticated handle to the service: an HTTP client bound to a cookie jar.
///
/// Re-login produces a new `Session`; callers replace their handle instead of
/// mutating the old one.
#[derive(Clone)]
pub struct Session {
    jar: Arc<CookieJar>,
    client: Client,
}

impl Session {
    pub fn new() -> Result<Self, ManagerError> {
        Self::with_cookies(Vec::new())
    }

    pub fn with_cookies(cookies: Vec<StoredCookie>) -> Result<Self, ManagerError> {
        let jar = Arc::new(CookieJar::from_cookies(cookies));
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        // Archives take minutes to stream; only the connect phase is bounded.
        let client = Client::builder()
            .default_headers(headers)
            .cookie_provider(jar.clone())
            .connect_timeout(Duration::from_secs(30))
            .timeout(None::<Duration>)
            .build()
            .map_err(|err| ManagerError::Http(err.to_string()))?;
        Ok(Self { jar, client })
    }

    pub fn from_json(content: &[u8]) -> Result<Self, ManagerError> {
        let file: SessionFile = serde_json::from_slice(content)
            .map_err(|err| ManagerError::SessionParse(err.to_string()))?;
        Self::with_cookies(file.cookies)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ManagerError> {
        let file = SessionFile {
            cookies: self.jar.snapshot(),
        };
        serde_json::to_vec_pretty(&file).map_err(|err| ManagerError::SessionParse(err.to_string()))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.jar.get(name)
    }

    pub fn set_cookie(&self, cookie: StoredCookie) {
        self.jar.insert(cookie);
    }

    pub fn cookies(&self) -> Vec<StoredCookie> {
        self.jar.snapshot()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("cookies", &self.jar.snapshot().len())
            .finish()
    }
}

/// Raw login credential, only persisted when the user opts in.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}
