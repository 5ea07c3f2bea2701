use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::Endpoints;
use crate::error::ManagerError;
use crate::http::{handle_status, send_with_retries};
use crate::session::Session;

const JST_OFFSET_SECS: i32 = 9 * 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PointsOutcome {
    Rewarded { name: String, japan_time: String },
    AlreadyClaimed,
}

/// The daily draw resets on Japan time, so that is what gets reported.
pub fn japan_time(now: DateTime<Utc>) -> String {
    match FixedOffset::east_opt(JST_OFFSET_SECS) {
        Some(offset) => now.with_timezone(&offset).to_rfc3339(),
        None => now.to_rfc3339(),
    }
}

pub fn parse_draw_response(
    body: &Value,
    now: DateTime<Utc>,
) -> Result<PointsOutcome, ManagerError> {
    if body.get("class").is_none() {
        return Err(ManagerError::HttpStatus {
            status: 200,
            message: format!("unknown draw response {body}"),
        });
    }
    match body.get("name").and_then(Value::as_str) {
        Some(name) => Ok(PointsOutcome::Rewarded {
            name: name.to_string(),
            japan_time: japan_time(now),
        }),
        None => Ok(PointsOutcome::AlreadyClaimed),
    }
}

pub fn click_for_points(
    session: &Session,
    endpoints: &Endpoints,
) -> Result<PointsOutcome, ManagerError> {
    let response = send_with_retries(|| session.client().get(&endpoints.dlfarm))?;
    let body: Value = handle_status(response)?
        .json()
        .map_err(|err| ManagerError::Http(err.to_string()))?;
    debug!(%body, "draw response");
    parse_draw_response(&body, Utc::now())
}
