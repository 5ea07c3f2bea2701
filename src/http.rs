use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{RequestBuilder, Response};
use tracing::debug;

use crate::error::ManagerError;

const MAX_RETRIES: usize = 3;
const BASE_DELAY_MS: u64 = 200;

/// Sends the request built by `make_req`, retrying throttling, server errors
/// and connection failures with a linear backoff.
pub fn send_with_retries<F>(mut make_req: F) -> Result<Response, ManagerError>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 0usize;
    loop {
        match make_req().send() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if attempt < MAX_RETRIES && is_retryable_status(status) {
                    debug!(status, attempt, url = %resp.url(), "retrying request");
                    backoff(attempt);
                    attempt += 1;
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if attempt < MAX_RETRIES && is_retryable_error(&err) {
                    debug!(error = %err, attempt, "retrying request");
                    backoff(attempt);
                    attempt += 1;
                    continue;
                }
                return Err(ManagerError::Http(err.to_string()));
            }
        }
    }
}

/// Maps 401 to `Unauthorized` and any other failure status to `HttpStatus`.
pub fn handle_status(response: Response) -> Result<Response, ManagerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ManagerError::Unauthorized(url));
    }
    let message = response
        .text()
        .ok()
        .filter(|text| !text.trim().is_empty())
        .map(|text| truncate(&text, 200))
        .unwrap_or(url);
    Err(ManagerError::HttpStatus {
        status: status.as_u16(),
        message,
    })
}

fn backoff(attempt: usize) {
    let delay = BASE_DELAY_MS * (attempt as u64 + 1);
    thread::sleep(Duration::from_millis(delay));
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}
