use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use log::warn;
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::SyncConfig;
use crate::error::UpdateError;
use crate::http::{
    env_value, env_value_u64, env_value_usize, is_retryable_error, is_retryable_status,
    wait_before_retry,
};

/// Titles per `action=query` request; the API limit for non-bot accounts.
pub const PAGE_BATCH_SIZE: usize = 50;

/// Wiki operations the updaters need. Implementations take `&self` so one
/// client can serve every worker thread.
pub trait WikiApi: Sync {
    fn login(&self, username: &str, password: &str) -> Result<()>;
    fn is_authenticated(&self) -> Result<bool>;
    /// Current wikitext of each existing page, keyed by the requested title.
    /// Missing pages are absent from the map.
    fn get_pages(&self, titles: &[String]) -> Result<BTreeMap<String, String>>;
    fn edit_page(&self, title: &str, content: &str, summary: &str) -> Result<()>;
    fn request_count(&self) -> usize;

    fn get_page(&self, title: &str) -> Result<String> {
        self.get_pages(&[title.to_string()])?
            .remove(title)
            .ok_or_else(|| UpdateError::PageNotFound(title.to_string()).into())
    }
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &SyncConfig) -> Self {
        let api_default = config.wiki.api_url.as_deref().unwrap_or("");
        Self {
            api_url: env_value("WIKI_API_URL", api_default),
            user_agent: config.user_agent(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value_u64("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            max_write_retries: env_value_usize("WIKI_HTTP_WRITE_RETRIES", 1),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

#[derive(Debug, Error)]
#[error("MediaWiki API error [{code}]: {info}")]
struct ApiError {
    code: String,
    info: String,
}

#[derive(Debug, Default)]
struct SessionState {
    last_request_at: Option<Instant>,
    csrf_token: Option<String>,
    credentials: Option<(String, String)>,
}

/// What an edit failure says about the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionRecovery {
    RefreshToken,
    Relogin,
    None,
}

fn session_recovery(error: &anyhow::Error) -> SessionRecovery {
    match error.downcast_ref::<ApiError>().map(|api_error| api_error.code.as_str()) {
        Some("badtoken") => SessionRecovery::RefreshToken,
        Some("assertuserfailed" | "assertbotfailed" | "notloggedin") => SessionRecovery::Relogin,
        _ => SessionRecovery::None,
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    session: Mutex<SessionState>,
    request_count: AtomicUsize,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            bail!("WIKI_API_URL is not configured");
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            session: Mutex::new(SessionState::default()),
            request_count: AtomicUsize::new(0),
        })
    }

    fn base_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }
        pairs
    }

    fn request_json_get(&self, params: &[(&str, String)]) -> Result<Value> {
        let base_url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", self.config.api_url))?;
        let pairs = Self::base_pairs(params);

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit(false);
            let response = self
                .client
                .get(base_url.clone())
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
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }
                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    return check_api_error(payload);
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        wait_before_retry(attempt, self.config.retry_delay_ms, 1);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn request_json_post(&self, params: &[(&str, String)], is_write: bool) -> Result<Value> {
        let max_retries = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };
        let multiplier = if is_write { 2 } else { 1 };
        let pairs = Self::base_pairs(params);

        for attempt in 0..=max_retries {
            self.apply_rate_limit(is_write);
            let response = self
                .client
                .post(&self.config.api_url)
                .header("User-Agent", self.config.user_agent.clone())
                .form(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            wait_before_retry(attempt, self.config.retry_delay_ms, multiplier);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }
                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    return check_api_error(payload);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        wait_before_retry(attempt, self.config.retry_delay_ms, multiplier);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    /// Space request starts across all threads sharing this client.
    fn apply_rate_limit(&self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(last) = session.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        session.last_request_at = Some(Instant::now());
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    fn cached_csrf_token(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .csrf_token
            .clone()
    }

    fn set_csrf_token(&self, token: Option<String>) {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .csrf_token = token;
    }

    fn stored_credentials(&self) -> Option<(String, String)> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .credentials
            .clone()
    }

    /// Run `submit`; if the wiki rejected it for a stale token or an expired
    /// session, repair the session and run it once more.
    fn with_session_recovery<T>(&self, mut submit: impl FnMut() -> Result<T>) -> Result<T> {
        let error = match submit() {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        match session_recovery(&error) {
            SessionRecovery::None => Err(error),
            SessionRecovery::RefreshToken => {
                warn!("csrf token rejected; fetching a fresh one");
                self.set_csrf_token(None);
                submit()
            }
            SessionRecovery::Relogin => {
                let Some((username, password)) = self.stored_credentials() else {
                    return Err(error.context("wiki session expired and no credentials are stored"));
                };
                warn!("wiki session expired; logging in again as {username}");
                self.login(&username, &password)
                    .context("failed to log in again after the wiki session expired")?;
                submit()
            }
        }
    }

    fn submit_edit(&self, title: &str, content: &str, summary: &str) -> Result<Value> {
        let token = self.ensure_csrf_token()?;
        self.request_json_post(
            &[
                ("action", "edit".to_string()),
                ("title", title.to_string()),
                ("text", content.to_string()),
                ("summary", summary.to_string()),
                ("bot", "1".to_string()),
                ("nocreate", "1".to_string()),
                ("assert", "user".to_string()),
                ("token", token),
            ],
            true,
        )
    }

    fn ensure_csrf_token(&self) -> Result<String> {
        if let Some(token) = self.cached_csrf_token() {
            return Ok(token);
        }
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.set_csrf_token(Some(token.clone()));
        Ok(token)
    }
}

impl WikiApi for MediaWikiClient {
    fn login(&self, username: &str, password: &str) -> Result<()> {
        let token_response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json_post(
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
            true,
        )?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
                session.csrf_token = None;
                session.credentials = Some((username.to_string(), password.to_string()));
                Ok(())
            }
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn is_authenticated(&self) -> Result<bool> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("assert", "user".to_string()),
        ]);
        match response {
            Ok(_) => Ok(true),
            Err(error) => match error.downcast_ref::<ApiError>() {
                Some(api_error) if api_error.code == "assertuserfailed" => Ok(false),
                _ => Err(error),
            },
        }
    }

    fn get_pages(&self, titles: &[String]) -> Result<BTreeMap<String, String>> {
        let mut results = BTreeMap::new();
        for batch in titles.chunks(PAGE_BATCH_SIZE) {
            let response = self.request_json_get(&[
                ("action", "query".to_string()),
                ("titles", batch.join("|")),
                ("prop", "revisions".to_string()),
                ("rvprop", "content".to_string()),
                ("rvslots", "main".to_string()),
            ])?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode page content API response")?;

            let mut contents = BTreeMap::new();
            for page in parsed.query.pages {
                if page.missing.unwrap_or(false) {
                    continue;
                }
                let content = page
                    .revisions
                    .into_iter()
                    .next()
                    .and_then(|revision| revision.slots)
                    .and_then(|slots| slots.main)
                    .map(|slot| slot.content);
                if let Some(content) = content {
                    contents.insert(page.title, content);
                }
            }

            let normalized: BTreeMap<String, String> = parsed
                .query
                .normalized
                .into_iter()
                .map(|item| (item.from, item.to))
                .collect();
            for title in batch {
                let resolved = normalized.get(title).unwrap_or(title);
                if let Some(content) = contents.get(resolved) {
                    results.insert(title.clone(), content.clone());
                }
            }
        }
        Ok(results)
    }

    fn edit_page(&self, title: &str, content: &str, summary: &str) -> Result<()> {
        let response = self
            .with_session_recovery(|| self.submit_edit(title, content, summary))
            .map_err(|error| {
                if error.downcast_ref::<ApiError>().is_some() {
                    UpdateError::EditRejected(format!("{error:#}")).into()
                } else {
                    error
                }
            })?;
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let edit = edit_payload
            .edit
            .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
        if edit.result.as_deref() != Some("Success") {
            return Err(UpdateError::EditRejected(format!(
                "{title}: {}",
                edit.result.unwrap_or_else(|| "unknown".to_string())
            ))
            .into());
        }
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }
}

fn check_api_error(payload: Value) -> Result<Value> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        return Err(ApiError {
            code: code.to_string(),
            info: info.to_string(),
        }
        .into());
    }
    Ok(payload)
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    normalized: Vec<NormalizedTitle>,
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct NormalizedTitle {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    missing: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
}
