use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{LazyLock, Mutex};
use std::thread;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::Endpoints;
use crate::error::ManagerError;
use crate::http::{handle_status, send_with_retries};
use crate::session::Session;

/// More simultaneous page requests than this get throttled by the service.
pub const MAX_PARALLEL_PAGES: usize = 10;

static DURATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*([A-Za-z]+)(?:\s+ago)?\s*$").expect("valid duration regex")
});

#[derive(Debug, Clone, Deserialize)]
pub struct ProductCount {
    pub user: u64,
    pub page_limit: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    1
}

/// One purchased work. Fields other than the id and date are kept verbatim
/// so `purchased -o` writes what the service returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    pub workno: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sales_date: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct PurchasePage {
    #[serde(default)]
    works: Option<Vec<Purchase>>,
}

pub trait PurchaseClient: Send + Sync {
    fn product_count(&self) -> Result<ProductCount, ManagerError>;
    fn purchase_page(&self, page: u64) -> Result<Vec<Purchase>, ManagerError>;
}

#[derive(Debug, Clone)]
pub struct HttpPurchaseClient {
    session: Session,
    endpoints: Endpoints,
}

impl HttpPurchaseClient {
    pub fn new(session: Session, endpoints: Endpoints) -> Self {
        Self { session, endpoints }
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, ManagerError> {
        let response = send_with_retries(|| self.session.client().get(url))?;
        let response = handle_status(response)?;
        response
            .json()
            .map_err(|err| ManagerError::Purchases(format!("{url}: {err}")))
    }
}

impl PurchaseClient for HttpPurchaseClient {
    fn product_count(&self) -> Result<ProductCount, ManagerError> {
        self.get_json(&self.endpoints.product_count)
    }

    fn purchase_page(&self, page: u64) -> Result<Vec<Purchase>, ManagerError> {
        let url = self.endpoints.purchases_url(page);
        let page: PurchasePage = self.get_json(&url)?;
        Ok(page.works.unwrap_or_default())
    }
}

pub fn page_count(count: &ProductCount) -> u64 {
    if count.user == 0 || count.page_limit == 0 {
        return 0;
    }
    count.user.div_ceil(count.page_limit)
}

/// Every purchase, in page order. A single failed page fails the listing.
pub fn fetch_all_purchases(client: &dyn PurchaseClient) -> Result<Vec<Purchase>, ManagerError> {
    let count = client.product_count()?;
    let pages = page_count(&count);
    info!(items = count.user, pages, "listing purchases");
    if pages == 0 {
        return Ok(Vec::new());
    }
    let workers = count
        .concurrency
        .clamp(1, MAX_PARALLEL_PAGES)
        .min(pages as usize);
    let pages = fetch_pages_parallel(client, pages, workers)?;
    Ok(pages.into_iter().flatten().collect())
}

/// Fetches pages `1..=pages` with `workers` threads; results are ordered by
/// page number.
pub fn fetch_pages_parallel(
    client: &dyn PurchaseClient,
    pages: u64,
    workers: usize,
) -> Result<Vec<Vec<Purchase>>, ManagerError> {
    let next_page = AtomicU64::new(1);
    let failed = AtomicBool::new(false);
    let results: Mutex<Vec<(u64, Vec<Purchase>)>> = Mutex::new(Vec::new());
    let first_error: Mutex<Option<ManagerError>> = Mutex::new(None);

    thread::scope(|scope| {
        for _ in 0..workers.max(1) {
            scope.spawn(|| {
                while !failed.load(Ordering::SeqCst) {
                    let page = next_page.fetch_add(1, Ordering::SeqCst);
                    if page > pages {
                        break;
                    }
                    match client.purchase_page(page) {
                        Ok(works) => {
                            debug!(page, works = works.len(), "fetched purchase page");
                            if let Ok(mut results) = results.lock() {
                                results.push((page, works));
                            }
                        }
                        Err(err) => {
                            failed.store(true, Ordering::SeqCst);
                            if let Ok(mut slot) = first_error.lock() {
                                slot.get_or_insert(err);
                            }
                            break;
                        }
                    }
                }
            });
        }
    });

    if let Some(err) = first_error.into_inner().ok().flatten() {
        return Err(err);
    }
    let mut results = results
        .into_inner()
        .map_err(|_| ManagerError::Purchases("page worker panicked".to_string()))?;
    if results.len() as u64 != pages {
        return Err(ManagerError::Purchases(format!(
            "expected {pages} pages, got {}",
            results.len()
        )));
    }
    results.sort_by_key(|(page, _)| *page);
    Ok(results.into_iter().map(|(_, works)| works).collect())
}

/// Parses `30 min`, `2 days`, `1 week ago` and the like.
pub fn parse_relative_duration(value: &str) -> Result<TimeDelta, ManagerError> {
    let invalid = || ManagerError::InvalidDuration(value.to_string());
    let captures = DURATION_REGEX.captures(value).ok_or_else(invalid)?;
    let amount: i64 = captures[1].parse().map_err(|_| invalid())?;
    let unit = captures[2].to_ascii_lowercase();
    let minutes_per_unit = match unit.as_str() {
        "m" | "min" | "mins" | "minute" | "minutes" => 1,
        "h" | "hour" | "hours" => 60,
        "d" | "day" | "days" => 60 * 24,
        "w" | "week" | "weeks" => 60 * 24 * 7,
        "month" | "months" => 60 * 24 * 30,
        _ => return Err(invalid()),
    };
    amount
        .checked_mul(minutes_per_unit)
        .and_then(TimeDelta::try_minutes)
        .ok_or_else(invalid)
}

/// Sales dates are UTC, either RFC 3339 or `YYYY-MM-DD HH:MM:SS`.
pub fn parse_sales_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Some(date.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|date| date.and_utc())
}

/// Work ids bought at or after `now - within`, in listing order.
pub fn purchased_within(
    purchases: &[Purchase],
    within: TimeDelta,
    now: DateTime<Utc>,
) -> Vec<String> {
    let cutoff = now - within;
    purchases
        .iter()
        .filter(|purchase| {
            purchase
                .sales_date
                .as_deref()
                .and_then(parse_sales_date)
                .is_some_and(|date| date >= cutoff)
        })
        .map(|purchase| purchase.workno.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_rounds_up() {
        let count = |user, page_limit| ProductCount {
            user,
            page_limit,
            concurrency: 4,
        };
        assert_eq!(page_count(&count(0, 50)), 0);
        assert_eq!(page_count(&count(50, 50)), 1);
        assert_eq!(page_count(&count(51, 50)), 2);
    }

    #[test]
    fn durations() {
        assert_eq!(parse_relative_duration("2 days").unwrap(), TimeDelta::days(2));
        assert_eq!(parse_relative_duration("30 min ago").unwrap(), TimeDelta::minutes(30));
        assert_eq!(parse_relative_duration("1week").unwrap(), TimeDelta::weeks(1));
        assert!(parse_relative_duration("soon").is_err());
        assert!(parse_relative_duration("3 fortnights").is_err());
    }

    #[test]
    fn sales_date_formats() {
        assert!(parse_sales_date("2021-01-31T06:42:26.000000Z").is_some());
        assert!(parse_sales_date("2021-01-31 06:42:26").is_some());
        assert!(parse_sales_date("yesterday").is_none());
    }
}
