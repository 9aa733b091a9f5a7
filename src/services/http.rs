use reqwest::header::{HeaderMap, LINK};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_ATTEMPTS: u32 = 3;

pub fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(250 * 2u64.pow(attempt))
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Sends `request`, retrying connection failures, timeouts, 429 and 5xx up
/// to `MAX_ATTEMPTS` in total. The last response is returned whatever its
/// status.
pub async fn send_with_retry(
    request: RequestBuilder,
    service: &'static str,
) -> Result<Response, reqwest::Error> {
    let mut attempt = 0;
    loop {
        let Some(req) = request.try_clone() else {
            return request.send().await;
        };
        let last = attempt + 1 >= MAX_ATTEMPTS;
        match req.send().await {
            Ok(resp) if !last && is_retryable_status(resp.status()) => {
                tracing::warn!(service, attempt, status = %resp.status(), "request failed, retrying");
            }
            Ok(resp) => return Ok(resp),
            Err(err) if !last && (err.is_timeout() || err.is_connect()) => {
                tracing::warn!(service, attempt, error = %err, "request failed, retrying");
            }
            Err(err) => return Err(err),
        }
        tokio::time::sleep(backoff(attempt)).await;
        attempt += 1;
    }
}

/// Target of the `rel="next"` entry in a `Link` header, if any.
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .find_map(|entry| {
            let mut parts = entry.split(';');
            let target = parts.next()?.trim();
            let is_next = parts.any(|p| {
                let p = p.trim().replace(' ', "");
                p == "rel=\"next\"" || p == "rel=next"
            });
            if !is_next {
                return None;
            }
            target
                .strip_prefix('<')
                .and_then(|t| t.strip_suffix('>'))
                .map(str::to_string)
        })
}
