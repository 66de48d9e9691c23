use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;

use crate::config::SyncConfig;
use crate::error::UpdateError;
use crate::http::{
    env_value_u64, env_value_usize, is_retryable_error, is_retryable_status, wait_before_retry,
};
use crate::parser::ParameterMap;
use crate::turrets::{TurretFeed, parse_turret_payload};

/// Upstream records keyed by entity name (the feed's page title).
pub type FeedPayload = BTreeMap<String, ParameterMap>;

pub trait FeedApi: Sync {
    fn fetch_ships(&self) -> Result<FeedPayload>;
    fn fetch_turrets(&self) -> Result<TurretFeed>;
}

#[derive(Debug, Clone)]
pub struct FeedClientConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub ships_path: String,
    pub turrets_path: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl FeedClientConfig {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            base_url: config.feed_api_url(),
            token: config.feed_token(),
            ships_path: config.ships_path().to_string(),
            turrets_path: config.turrets_path().to_string(),
            user_agent: config.user_agent(),
            timeout_ms: env_value_u64("FEED_HTTP_TIMEOUT_MS", 30_000),
            max_retries: env_value_usize("FEED_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("FEED_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

pub struct FeedClient {
    client: Client,
    config: FeedClientConfig,
}

impl FeedClient {
    pub fn new(config: FeedClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build feed HTTP client")?;
        Ok(Self { client, config })
    }

    fn request_json(&self, path: &str, with_token: bool) -> Result<Value> {
        let Some(base_url) = self.config.base_url.as_deref() else {
            bail!("FEED_API_URL is not configured");
        };
        let joined = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let url = Url::parse(&joined).with_context(|| format!("invalid feed URL: {joined}"))?;

        let mut pairs = Vec::new();
        if with_token && let Some(token) = &self.config.token {
            pairs.push(("token".to_string(), token.clone()));
        }

        for attempt in 0..=self.config.max_retries {
            let response = self
                .client
                .get(url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .query(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            wait_before_retry(attempt, self.config.retry_delay_ms, 1);
                            continue;
                        }
                        bail!("feed request to {path} failed with HTTP {status}");
                    }
                    return response
                        .json()
                        .with_context(|| format!("failed to decode feed JSON from {path}"));
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        wait_before_retry(attempt, self.config.retry_delay_ms, 1);
                        continue;
                    }
                    return Err(error).with_context(|| format!("failed to call feed endpoint {path}"));
                }
            }
        }

        bail!("feed request exhausted retry budget")
    }
}

impl FeedApi for FeedClient {
    fn fetch_ships(&self) -> Result<FeedPayload> {
        let payload = self.request_json(&self.config.ships_path, true)?;
        parse_ship_payload(payload)
    }

    fn fetch_turrets(&self) -> Result<TurretFeed> {
        let payload = self.request_json(&self.config.turrets_path, false)?;
        parse_turret_payload(payload)
    }
}

/// Decode a ship feed document into flat string maps.
///
/// Strings pass through, numbers keep their JSON text, booleans become
/// `yes`/`no`, and nulls are dropped so they never overwrite page values.
pub fn parse_ship_payload(payload: Value) -> Result<FeedPayload> {
    let Value::Object(records) = payload else {
        bail!("ship feed must be a JSON object keyed by ship name");
    };

    let mut output = FeedPayload::new();
    for (name, attributes) in records {
        let Value::Object(attributes) = attributes else {
            bail!("ship feed record {name} is not a JSON object");
        };
        let flattened: ParameterMap = attributes
            .iter()
            .filter_map(|(key, value)| flatten_scalar(value).map(|value| (key.clone(), value)))
            .collect();
        output.insert(name, flattened);
    }
    Ok(output)
}

fn flatten_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(true) => Some("yes".to_string()),
        Value::Bool(false) => Some("no".to_string()),
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedSource {
    Fresh,
    Cached,
    Supplied,
}

impl FeedSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Cached => "cached",
            Self::Supplied => "supplied",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CachedFeed {
    pub payload: Arc<FeedPayload>,
    pub fetched_at: SystemTime,
}

/// Last good ship feed, used only when a fresh fetch fails.
#[derive(Debug, Default)]
pub struct FeedCache {
    slot: RwLock<Option<CachedFeed>>,
}

impl FeedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, payload: FeedPayload) -> Arc<FeedPayload> {
        let payload = Arc::new(payload);
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(CachedFeed {
            payload: Arc::clone(&payload),
            fetched_at: SystemTime::now(),
        });
        payload
    }

    pub fn latest(&self) -> Option<CachedFeed> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_populated(&self) -> bool {
        self.latest().is_some()
    }

    /// Fetch fresh data, falling back to the cached copy when the feed is down.
    pub fn fetch_with_fallback(&self, api: &dyn FeedApi) -> Result<(Arc<FeedPayload>, FeedSource)> {
        match api.fetch_ships() {
            Ok(payload) => {
                debug!("fetched ship feed with {} records", payload.len());
                Ok((self.store(payload), FeedSource::Fresh))
            }
            Err(error) => match self.latest() {
                Some(cached) => {
                    let age = cached.fetched_at.elapsed().unwrap_or_default();
                    warn!(
                        "ship feed unavailable ({error:#}); using cached copy from {}s ago",
                        age.as_secs()
                    );
                    Ok((cached.payload, FeedSource::Cached))
                }
                None => Err(UpdateError::UpstreamUnavailable(format!("{error:#}")).into()),
            },
        }
    }
}
