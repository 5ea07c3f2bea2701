use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ManagerError;

/// Category prefixes a work id can start with.
pub const ITEM_PREFIXES: [&str; 3] = ["RJ", "VJ", "BJ"];

static URL_ITEM_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/([^/?#]+)\.html").expect("valid url regex"));

/// A work id such as `RJ123456`: category prefix followed by digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct ItemId(String);

impl ItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn prefix(&self) -> &str {
        &self.0[..2]
    }

    pub fn number(&self) -> &str {
        &self.0[2..]
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = ManagerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let has_prefix = ITEM_PREFIXES
            .iter()
            .any(|prefix| normalized.starts_with(prefix));
        let digits = normalized.get(2..).unwrap_or("");
        let is_valid =
            has_prefix && !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit());
        if !is_valid {
            return Err(ManagerError::InvalidItemId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for ItemId {
    type Error = ManagerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Extracts the work id from a product page url (`.../RJ123456.html`).
pub fn item_id_from_url(url: &str) -> Result<ItemId, ManagerError> {
    let segment = URL_ITEM_REGEX
        .captures_iter(url)
        .last()
        .and_then(|captures| captures.get(1))
        .map(|segment| segment.as_str())
        .ok_or_else(|| ManagerError::MalformedUrl(url.to_string()))?;
    segment
        .parse()
        .map_err(|_| ManagerError::MalformedUrl(url.to_string()))
}

/// Accepts either a bare id or a product url.
pub fn parse_item_reference(value: &str) -> Result<ItemId, ManagerError> {
    let trimmed = value.trim();
    if trimmed.starts_with("http") {
        item_id_from_url(trimmed)
    } else {
        trimmed.parse()
    }
}

/// Turns command line values (each possibly comma separated) into distinct ids.
pub fn collect_item_ids<S: AsRef<str>>(values: &[S]) -> Result<BTreeSet<ItemId>, ManagerError> {
    let mut ids = BTreeSet::new();
    for value in values {
        for part in value.as_ref().split(',') {
            if part.trim().is_empty() {
                continue;
            }
            ids.insert(parse_item_reference(part)?);
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn deserialized_ids_are_validated() {
        let id: ItemId = serde_json::from_str("\"rj01\"").unwrap();
        assert_eq!(id.as_str(), "RJ01");
        assert!(serde_json::from_str::<ItemId>("\"\"").is_err());
        assert!(serde_json::from_str::<ItemId>("\"R\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"RJ01\"");
    }

    #[test]
    fn parse_item_id_normalizes_case() {
        let id: ItemId = "rj123456".parse().unwrap();
        assert_eq!(id.as_str(), "RJ123456");
        assert_eq!(id.prefix(), "RJ");
        assert_eq!(id.number(), "123456");
    }

    #[test]
    fn parse_item_id_rejects_unknown_prefix() {
        let err = "XX123".parse::<ItemId>().unwrap_err();
        assert_matches!(err, ManagerError::InvalidItemId(_));
        assert!("RJ".parse::<ItemId>().is_err());
        assert!("RJ12a".parse::<ItemId>().is_err());
    }

    #[test]
    fn url_without_item_is_malformed() {
        let err = item_id_from_url("http://anydomain.any/example").unwrap_err();
        assert_matches!(err, ManagerError::MalformedUrl(_));
    }
}
