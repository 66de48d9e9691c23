use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::CancellationToken;
use crate::feed::FeedApi;
use crate::mediawiki::WikiApi;
use crate::updater::RecordStatus;

/// Turret records keyed by feed id.
pub type TurretFeed = BTreeMap<String, TurretData>;

pub const TURRET_PAGE_SUMMARY: &str = "Updating turrets";
pub const TURRET_DATA_SUMMARY: &str = "Updating turretdata";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurretType {
    Mining,
    Laser,
    Railgun,
    Flak,
    Cannon,
    Pdl,
    Beam,
}

impl TurretType {
    /// Table order on the turret page.
    pub const TABLE_ORDER: [TurretType; 7] = [
        Self::Mining,
        Self::Laser,
        Self::Railgun,
        Self::Flak,
        Self::Cannon,
        Self::Pdl,
        Self::Beam,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        Self::TABLE_ORDER
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(value.trim()))
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Mining => "Mining",
            Self::Laser => "Laser",
            Self::Railgun => "Railgun",
            Self::Flak => "Flak",
            Self::Cannon => "Cannon",
            Self::Pdl => "PDL",
            Self::Beam => "Beam",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TurretData {
    #[serde(alias = "DPS")]
    pub dps: Option<f64>,
    pub mass: Option<f64>,
    pub name: Option<String>,
    pub size: Option<String>,
    pub class: Option<String>,
    pub group: Option<String>,
    pub range: Option<f64>,
    pub damage: Option<f64>,
    pub reload: Option<f64>,
    pub beam_size: Option<f64>,
    #[serde(rename = "Override")]
    pub overrides: Option<bool>,
    #[serde(alias = "MaxCycles")]
    pub max_cycle: Option<i64>,
    pub num_barrels: Option<i64>,
    pub turret_size: Option<String>,
    pub turret_type: Option<String>,
    pub base_accuracy: Option<f64>,
    pub accuracy_index: Option<f64>,
    pub ramping_strength: Option<f64>,
    pub speed_denominator: Option<f64>,
}

impl TurretData {
    pub fn kind(&self) -> Option<TurretType> {
        self.turret_type.as_deref().and_then(TurretType::parse)
    }
}

#[derive(Debug, Deserialize)]
struct TurretFeedDocument {
    #[serde(rename = "serializedTurrets")]
    serialized_turrets: SerializedTurrets,
}

/// The feed has shipped this field both as an object and as a JSON string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SerializedTurrets {
    Keyed(TurretFeed),
    Encoded(String),
}

pub fn parse_turret_payload(payload: Value) -> Result<TurretFeed> {
    let document: TurretFeedDocument =
        serde_json::from_value(payload).context("failed to decode turret feed")?;
    match document.serialized_turrets {
        SerializedTurrets::Keyed(turrets) => Ok(turrets),
        SerializedTurrets::Encoded(text) => {
            serde_json::from_str(&text).context("failed to decode serializedTurrets string")
        }
    }
}

/// Every `{| class="wikitable sortable" ... |}` block, in page order.
///
/// The turret page holds one such table per turret type, in
/// [`TurretType::TABLE_ORDER`]. Each table keeps its header (everything
/// before the first row separator) and gets its rows rebuilt from the feed.
#[derive(Debug, Clone)]
pub struct TurretTables {
    table: Regex,
}

impl TurretTables {
    pub fn new() -> Result<Self> {
        let table = Regex::new(r#"(?is)\{\|\s*class="wikitable sortable".*?\|\}"#)
            .context("failed to compile turret table pattern")?;
        Ok(Self { table })
    }

    pub fn extract<'a>(&self, page: &'a str) -> Result<Vec<regex::Match<'a>>> {
        let tables: Vec<_> = self.table.find_iter(page).collect();
        if tables.is_empty() {
            bail!("no turret tables found");
        }
        if tables.len() > TurretType::TABLE_ORDER.len() {
            bail!(
                "found {} turret tables, expected at most {}",
                tables.len(),
                TurretType::TABLE_ORDER.len()
            );
        }
        Ok(tables)
    }

    /// Rebuild every turret table in `page` from `turrets`.
    pub fn rebuild(&self, page: &str, turrets: &TurretFeed) -> Result<String> {
        let mut output = String::with_capacity(page.len());
        let mut cursor = 0;
        for (table, kind) in self.extract(page)?.into_iter().zip(TurretType::TABLE_ORDER) {
            output.push_str(&page[cursor..table.start()]);
            output.push_str(&render_table(table.as_str(), kind, turrets));
            cursor = table.end();
        }
        output.push_str(&page[cursor..]);
        Ok(output)
    }
}

fn render_table(table: &str, kind: TurretType, turrets: &TurretFeed) -> String {
    let body = table.strip_suffix("|}").unwrap_or(table);
    let header = body.split("|-").next().unwrap_or(body).trim();
    let rows: Vec<String> = turrets
        .values()
        .filter(|turret| turret.kind() == Some(kind))
        .map(render_row)
        .collect();
    format!("{header}\n|-\n{}\n|}}", rows.join("\n|-").trim())
}

fn render_row(turret: &TurretData) -> String {
    format!(
        "\n| {}\n| {}\n| {}\n| {}\n| {}\n| {}\n| {}\n| {}",
        turret.name.as_deref().unwrap_or(""),
        turret.size.as_deref().unwrap_or(""),
        fixed(turret.base_accuracy, 4),
        plain(turret.damage),
        plain(turret.range),
        fixed(turret.reload, 2),
        plain(turret.speed_denominator),
        fixed(turret.dps, 2),
    )
}

fn fixed(value: Option<f64>, decimals: usize) -> String {
    value
        .map(|value| format!("{value:.decimals$}"))
        .unwrap_or_default()
}

fn plain(value: Option<f64>) -> String {
    value.map(|value| value.to_string()).unwrap_or_default()
}

/// One `{{#cargo_store}}` call per turret, concatenated.
pub fn render_cargo_store(turrets: &TurretFeed) -> String {
    let mut output = String::new();
    for turret in turrets.values() {
        output.push_str(&format!(
            "{{{{#cargo_store:_table=TurretData|name={}|size={}|class={}|turretsize={}|dps={}|mass={}|distance={}|damage={}|reload={}|beamsize={}|override={}|maxcycle={}|numbarrels={}|baseaccuracy={}|accuracyindex={}|rampingstrength={}|speeddenominator={}}}}}",
            turret.name.as_deref().unwrap_or("Unknown"),
            turret.size.as_deref().unwrap_or("Unknown"),
            turret.class.as_deref().unwrap_or("Unknown"),
            turret.turret_size.as_deref().unwrap_or("Unknown"),
            general(turret.dps.unwrap_or(0.0)),
            general(turret.mass.unwrap_or(0.0)),
            general(turret.range.unwrap_or(0.0)),
            general(turret.damage.unwrap_or(0.0)),
            general(turret.reload.unwrap_or(0.0)),
            general(turret.beam_size.unwrap_or(0.0)),
            if turret.overrides.unwrap_or(false) { "True" } else { "False" },
            turret.max_cycle.unwrap_or(0),
            turret.num_barrels.unwrap_or(0),
            general(turret.base_accuracy.unwrap_or(0.0)),
            general(turret.accuracy_index.unwrap_or(0.0)),
            general(turret.ramping_strength.unwrap_or(0.0)),
            general(turret.speed_denominator.unwrap_or(0.0)),
        ));
    }
    output
}

const GENERAL_PRECISION: usize = 5;

/// Five significant digits, trailing zeros dropped, scientific notation for
/// very large or very small magnitudes (`1.2346E+05`).
fn general(value: f64) -> String {
    if value == 0.0 || !value.is_finite() {
        return if value.is_finite() { "0".to_string() } else { value.to_string() };
    }

    let scientific = format!("{:.*e}", GENERAL_PRECISION - 1, value);
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if exponent < -5 || exponent >= GENERAL_PRECISION as i32 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}E{sign}{:02}", trim_fraction(mantissa), exponent.abs())
    } else {
        let decimals = usize::try_from(GENERAL_PRECISION as i32 - 1 - exponent).unwrap_or(0);
        trim_fraction(&format!("{value:.decimals$}"))
    }
}

fn trim_fraction(value: &str) -> String {
    if value.contains('.') {
        value.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct TurretOptions {
    pub turret_page: String,
    pub data_page: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurretPageReport {
    pub title: String,
    pub status: RecordStatus,
    pub detail: Option<String>,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurretReport {
    pub dry_run: bool,
    pub turret_count: usize,
    pub pages: Vec<TurretPageReport>,
}

impl TurretReport {
    pub fn failed(&self) -> usize {
        self.pages
            .iter()
            .filter(|page| page.status == RecordStatus::Failed)
            .count()
    }
}

pub struct TurretUpdater<'a> {
    wiki: &'a dyn WikiApi,
    feed: &'a dyn FeedApi,
    tables: TurretTables,
    options: TurretOptions,
}

impl<'a> TurretUpdater<'a> {
    pub fn new(wiki: &'a dyn WikiApi, feed: &'a dyn FeedApi, options: TurretOptions) -> Result<Self> {
        Ok(Self {
            wiki,
            feed,
            tables: TurretTables::new()?,
            options,
        })
    }

    /// Sync the turret page and the Cargo data page. The two pages succeed
    /// or fail independently.
    pub fn update(&self, supplied: Option<TurretFeed>, cancel: &CancellationToken) -> Result<TurretReport> {
        let turrets = match supplied {
            Some(turrets) => turrets,
            None => self
                .feed
                .fetch_turrets()
                .context("failed to fetch turret data")?,
        };
        info!("updating turrets from {} feed records", turrets.len());

        let pages = vec![
            self.sync_page(&self.options.turret_page, TURRET_PAGE_SUMMARY, cancel, |current| {
                self.tables.rebuild(current, &turrets)
            }),
            self.sync_page(&self.options.data_page, TURRET_DATA_SUMMARY, cancel, |_| {
                Ok(render_cargo_store(&turrets))
            }),
        ];

        Ok(TurretReport {
            dry_run: self.options.dry_run,
            turret_count: turrets.len(),
            pages,
        })
    }

    fn sync_page<F>(&self, title: &str, summary: &str, cancel: &CancellationToken, build: F) -> TurretPageReport
    where
        F: FnOnce(&str) -> Result<String>,
    {
        let started = Instant::now();
        let outcome = (|| -> Result<RecordStatus> {
            cancel.checkpoint()?;
            let current = self.wiki.get_page(title)?;
            let next = build(&current)?;
            if next == current {
                return Ok(RecordStatus::UpToDate);
            }
            if !self.options.dry_run {
                cancel.checkpoint()?;
                self.wiki.edit_page(title, &next, summary)?;
            }
            Ok(RecordStatus::Updated)
        })();

        let (status, detail) = match outcome {
            Ok(status) => {
                info!("{title}: {}", status.describe(self.options.dry_run));
                (status, None)
            }
            Err(error) => {
                warn!("{title}: failed to update: {error:#}");
                (RecordStatus::Failed, Some(format!("{error:#}")))
            }
        };
        TurretPageReport {
            title: title.to_string(),
            status,
            detail,
            elapsed_ms: started.elapsed().as_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use serde_json::json;

    use super::{
        TurretData, TurretFeed, TurretOptions, TurretTables, TurretType, TurretUpdater, general,
        parse_turret_payload, render_cargo_store,
    };
    use crate::cancel::CancellationToken;
    use crate::error::UpdateError;
    use crate::feed::{FeedApi, FeedPayload};
    use crate::mediawiki::WikiApi;
    use crate::updater::RecordStatus;

    #[derive(Default)]
    struct MockWiki {
        pages: Mutex<BTreeMap<String, String>>,
        edits: Mutex<Vec<(String, String)>>,
    }

    impl WikiApi for MockWiki {
        fn login(&self, _username: &str, _password: &str) -> anyhow::Result<()> {
            Ok(())
        }

        fn is_authenticated(&self) -> anyhow::Result<bool> {
            Ok(true)
        }

        fn get_pages(&self, titles: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
            let pages = self.pages.lock().expect("lock");
            Ok(titles
                .iter()
                .filter_map(|title| pages.get(title).map(|text| (title.clone(), text.clone())))
                .collect())
        }

        fn edit_page(&self, title: &str, content: &str, _summary: &str) -> anyhow::Result<()> {
            self.edits
                .lock()
                .expect("lock")
                .push((title.to_string(), content.to_string()));
            self.pages
                .lock()
                .expect("lock")
                .insert(title.to_string(), content.to_string());
            Ok(())
        }

        fn request_count(&self) -> usize {
            0
        }
    }

    struct NoFeed;

    impl FeedApi for NoFeed {
        fn fetch_ships(&self) -> anyhow::Result<FeedPayload> {
            anyhow::bail!("unused")
        }

        fn fetch_turrets(&self) -> anyhow::Result<TurretFeed> {
            anyhow::bail!("feed down")
        }
    }

    fn turret(name: &str, kind: &str, dps: f64) -> TurretData {
        TurretData {
            name: Some(name.to_string()),
            size: Some("Small".to_string()),
            turret_type: Some(kind.to_string()),
            base_accuracy: Some(0.5),
            damage: Some(12.0),
            range: Some(2500.0),
            reload: Some(1.5),
            speed_denominator: Some(8.0),
            dps: Some(dps),
            ..TurretData::default()
        }
    }

    fn feed() -> TurretFeed {
        let mut turrets = TurretFeed::new();
        turrets.insert("1".to_string(), turret("Small Mining Laser", "Mining", 4.0));
        turrets.insert("2".to_string(), turret("Small Phaser", "Laser", 8.126));
        turrets
    }

    const PAGE: &str = "Intro\n{| class=\"wikitable sortable\"\n! Name !! Size\n|-\n| Old\n| Old\n|}\nMiddle\n{| class=\"wikitable sortable\"\n! Name !! Size\n|}\nEnd";

    #[test]
    fn parse_turret_payload_accepts_object_and_encoded_forms() {
        let keyed = parse_turret_payload(json!({
            "serializedTurrets": {"7": {"Name": "Flak Cannon", "TurretType": "Flak", "DPS": 12.5, "MaxCycles": 3}}
        }))
        .expect("keyed");
        assert_eq!(keyed["7"].name.as_deref(), Some("Flak Cannon"));
        assert_eq!(keyed["7"].kind(), Some(TurretType::Flak));
        assert_eq!(keyed["7"].dps, Some(12.5));
        assert_eq!(keyed["7"].max_cycle, Some(3));

        let encoded = parse_turret_payload(json!({
            "serializedTurrets": "{\"1\": {\"Name\": \"PD\", \"TurretType\": \"Pdl\"}}"
        }))
        .expect("encoded");
        assert_eq!(encoded["1"].kind(), Some(TurretType::Pdl));
    }

    #[test]
    fn rebuild_replaces_rows_per_turret_type() {
        let rebuilt = TurretTables::new()
            .expect("tables")
            .rebuild(PAGE, &feed())
            .expect("rebuild");
        assert_eq!(
            rebuilt,
            "Intro\n{| class=\"wikitable sortable\"\n! Name !! Size\n|-\n| Small Mining Laser\n| Small\n| 0.5000\n| 12\n| 2500\n| 1.50\n| 8\n| 4.00\n|}\nMiddle\n{| class=\"wikitable sortable\"\n! Name !! Size\n|-\n| Small Phaser\n| Small\n| 0.5000\n| 12\n| 2500\n| 1.50\n| 8\n| 8.13\n|}\nEnd"
        );
    }

    #[test]
    fn extract_rejects_missing_or_excess_tables() {
        let tables = TurretTables::new().expect("tables");
        assert!(tables.extract("no tables").is_err());

        let crowded = "{| class=\"wikitable sortable\"\n|}\n".repeat(8);
        assert!(tables.extract(&crowded).is_err());
        assert_eq!(tables.extract(&crowded[..crowded.len() / 8 * 7]).expect("seven").len(), 7);
    }

    #[test]
    fn general_format_matches_five_significant_digits() {
        assert_eq!(general(0.0), "0");
        assert_eq!(general(12.5), "12.5");
        assert_eq!(general(2500.0), "2500");
        assert_eq!(general(1.234567), "1.2346");
        assert_eq!(general(123456.0), "1.2346E+05");
        assert_eq!(general(0.000001234), "1.234E-06");
        assert_eq!(general(-0.25), "-0.25");
    }

    #[test]
    fn cargo_store_uses_defaults_for_missing_values() {
        let mut turrets = TurretFeed::new();
        turrets.insert("1".to_string(), TurretData::default());
        assert_eq!(
            render_cargo_store(&turrets),
            "{{#cargo_store:_table=TurretData|name=Unknown|size=Unknown|class=Unknown|turretsize=Unknown|dps=0|mass=0|distance=0|damage=0|reload=0|beamsize=0|override=False|maxcycle=0|numbarrels=0|baseaccuracy=0|accuracyindex=0|rampingstrength=0|speeddenominator=0}}"
        );
    }

    #[test]
    fn updater_edits_changed_pages_and_skips_current_ones() {
        let wiki = MockWiki::default();
        let cargo = render_cargo_store(&feed());
        {
            let mut pages = wiki.pages.lock().expect("lock");
            pages.insert("Turrets".to_string(), PAGE.to_string());
            pages.insert("Template:TurretData".to_string(), cargo);
        }
        let updater = TurretUpdater::new(
            &wiki,
            &NoFeed,
            TurretOptions {
                turret_page: "Turrets".to_string(),
                data_page: "Template:TurretData".to_string(),
                dry_run: false,
            },
        )
        .expect("updater");

        let report = updater
            .update(Some(feed()), &CancellationToken::new())
            .expect("update");
        assert_eq!(report.pages[0].status, RecordStatus::Updated);
        assert_eq!(report.pages[1].status, RecordStatus::UpToDate);
        assert_eq!(report.failed(), 0);

        let edits = wiki.edits.lock().expect("lock");
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].0, "Turrets");
    }

    #[test]
    fn updater_reports_missing_page_and_feed_outage() {
        let wiki = MockWiki::default();
        let updater = TurretUpdater::new(
            &wiki,
            &NoFeed,
            TurretOptions {
                turret_page: "Turrets".to_string(),
                data_page: "Template:TurretData".to_string(),
                dry_run: true,
            },
        )
        .expect("updater");

        assert!(updater.update(None, &CancellationToken::new()).is_err());

        let report = updater
            .update(Some(feed()), &CancellationToken::new())
            .expect("update");
        assert_eq!(report.failed(), 2);
        assert!(
            report.pages[0]
                .detail
                .as_deref()
                .is_some_and(|detail| detail.contains(&UpdateError::PageNotFound("Turrets".to_string()).to_string()))
        );
    }
}
