use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::http::env_override;
use crate::parser::DEFAULT_TEMPLATE_NAME;
use crate::policy::ExclusionPolicy;
use crate::reconcile::DEFAULT_IGNORE_MARKER;

pub const DEFAULT_USER_AGENT: &str = "shipsync/0.1";
pub const DEFAULT_CONFIG_FILENAME: &str = "shipsync.toml";
pub const DEFAULT_SHIPS_PATH: &str = "ships";
pub const DEFAULT_TURRETS_PATH: &str = "ships-turrets/raw";
pub const DEFAULT_TURRET_PAGE: &str = "Turrets";
pub const DEFAULT_TURRET_DATA_PAGE: &str = "Template:TurretData";
pub const DEFAULT_THREADS: usize = 4;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SyncConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub feed: FeedSection,
    #[serde(default)]
    pub policy: ExclusionPolicy,
    #[serde(default)]
    pub pages: PagesSection,
    #[serde(default)]
    pub runner: RunnerSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FeedSection {
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub ships_path: Option<String>,
    pub turrets_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PagesSection {
    pub template: Option<String>,
    pub ignore_marker: Option<String>,
    pub turret_page: Option<String>,
    pub turret_data_page: Option<String>,
    /// Feed names whose wiki page has a different title.
    #[serde(default = "default_title_overrides")]
    pub title_overrides: BTreeMap<String, String>,
}

impl Default for PagesSection {
    fn default() -> Self {
        Self {
            template: None,
            ignore_marker: None,
            turret_page: None,
            turret_data_page: None,
            title_overrides: default_title_overrides(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RunnerSection {
    pub threads: Option<usize>,
    pub dry_run: Option<bool>,
}

fn default_title_overrides() -> BTreeMap<String, String> {
    [("2018", "2018 Ship"), ("yname", "Yname (ship)")]
        .into_iter()
        .map(|(name, title)| (name.to_string(), title.to_string()))
        .collect()
}

impl SyncConfig {
    /// Resolve the wiki API URL: env WIKI_API_URL > config > None.
    pub fn wiki_api_url(&self) -> Option<String> {
        env_override("WIKI_API_URL").or_else(|| self.wiki.api_url.clone())
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn feed_api_url(&self) -> Option<String> {
        env_override("FEED_API_URL").or_else(|| self.feed.api_url.clone())
    }

    pub fn feed_token(&self) -> Option<String> {
        env_override("FEED_API_TOKEN").or_else(|| self.feed.token.clone())
    }

    pub fn ships_path(&self) -> &str {
        self.feed.ships_path.as_deref().unwrap_or(DEFAULT_SHIPS_PATH)
    }

    pub fn turrets_path(&self) -> &str {
        self.feed
            .turrets_path
            .as_deref()
            .unwrap_or(DEFAULT_TURRETS_PATH)
    }

    /// Bot credentials come from the environment only.
    pub fn credentials(&self) -> Option<(String, String)> {
        Some((env_override("WIKI_BOT_USER")?, env_override("WIKI_BOT_PASS")?))
    }

    pub fn template_name(&self) -> &str {
        self.pages.template.as_deref().unwrap_or(DEFAULT_TEMPLATE_NAME)
    }

    pub fn ignore_marker(&self) -> &str {
        self.pages
            .ignore_marker
            .as_deref()
            .unwrap_or(DEFAULT_IGNORE_MARKER)
    }

    pub fn turret_page(&self) -> &str {
        self.pages.turret_page.as_deref().unwrap_or(DEFAULT_TURRET_PAGE)
    }

    pub fn turret_data_page(&self) -> &str {
        self.pages
            .turret_data_page
            .as_deref()
            .unwrap_or(DEFAULT_TURRET_DATA_PAGE)
    }

    /// Resolve worker count: env SHIPSYNC_THREADS > config > DEFAULT_THREADS.
    pub fn threads(&self) -> usize {
        env_override("SHIPSYNC_THREADS")
            .and_then(|value| value.parse::<usize>().ok())
            .or(self.runner.threads)
            .unwrap_or(DEFAULT_THREADS)
    }

    pub fn dry_run(&self) -> bool {
        env_override("SHIPSYNC_DRY_RUN")
            .map(|value| parse_flag(&value))
            .or(self.runner.dry_run)
            .unwrap_or(false)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Load and parse a SyncConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<SyncConfig> {
    if !config_path.exists() {
        return Ok(SyncConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: SyncConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}
