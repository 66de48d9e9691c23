use std::env;
use std::thread::sleep;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::StatusCode;

pub(crate) fn env_value(key: &str, default: &str) -> String {
    env_override(key).unwrap_or_else(|| default.to_string())
}

/// A trimmed, non-empty environment variable.
pub(crate) fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

pub(crate) fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

/// Exponential backoff from `base_ms`, scaled by `multiplier`, plus up to 99ms of jitter.
pub(crate) fn backoff_delay(attempt: usize, base_ms: u64, multiplier: u64) -> Duration {
    let exponent = u32::try_from(attempt).unwrap_or(16);
    let base = base_ms.saturating_mul(2u64.saturating_pow(exponent));
    let jitter = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| u64::from(duration.subsec_millis() % 100))
        .unwrap_or(0);
    Duration::from_millis(base.saturating_mul(multiplier).saturating_add(jitter))
}

pub(crate) fn wait_before_retry(attempt: usize, base_ms: u64, multiplier: u64) {
    sleep(backoff_delay(attempt, base_ms, multiplier));
}
