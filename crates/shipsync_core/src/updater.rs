use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use anyhow::Result;
use log::{debug, error, info, warn};
use serde::Serialize;
use similar::TextDiff;

use crate::cancel::CancellationToken;
use crate::error::{UpdateError, classify};
use crate::feed::{FeedApi, FeedCache, FeedPayload, FeedSource};
use crate::mediawiki::WikiApi;
use crate::parser::ParameterMap;
use crate::reconcile::{PageChange, Reconciler, Reconciliation};

/// Width of the record name column in log lines.
pub const RECORD_LABEL_WIDTH: usize = 12;

#[derive(Debug, Clone)]
pub struct UpdateOptions {
    pub dry_run: bool,
    /// Worker threads; 1 runs sequentially, 0 uses available parallelism.
    pub threads: usize,
    pub show_diff: bool,
    /// Fetch all pages up front in batches instead of one request per record.
    pub prefetch_pages: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            threads: 1,
            show_diff: false,
            prefetch_pages: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSelection {
    All,
    Named(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Updated,
    UpToDate,
    Skipped,
    Failed,
}

impl RecordStatus {
    pub fn describe(self, dry_run: bool) -> &'static str {
        match (self, dry_run) {
            (Self::Updated, true) => "would update",
            (Self::Updated, false) => "updated",
            (Self::UpToDate, _) => "up-to-date",
            (Self::Skipped, _) => "skipped",
            (Self::Failed, _) => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordReport {
    pub name: String,
    pub page_title: String,
    pub status: RecordStatus,
    pub detail: Option<String>,
    pub updated_keys: Vec<String>,
    pub removed_keys: Vec<String>,
    pub summary: Option<String>,
    pub diff: Option<String>,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub dry_run: bool,
    pub feed_source: FeedSource,
    pub attempted: usize,
    pub updated: usize,
    pub up_to_date: usize,
    pub skipped: usize,
    pub failed: usize,
    pub elapsed_ms: u128,
    pub records: Vec<RecordReport>,
}

impl BatchReport {
    fn from_records(
        dry_run: bool,
        feed_source: FeedSource,
        records: Vec<RecordReport>,
        started: Instant,
    ) -> Self {
        let count = |status: RecordStatus| {
            records
                .iter()
                .filter(|record| record.status == status)
                .count()
        };
        Self {
            dry_run,
            feed_source,
            attempted: records.len(),
            updated: count(RecordStatus::Updated),
            up_to_date: count(RecordStatus::UpToDate),
            skipped: count(RecordStatus::Skipped),
            failed: count(RecordStatus::Failed),
            elapsed_ms: started.elapsed().as_millis(),
            records,
        }
    }
}

/// Fans ship records out over a bounded pool of worker threads.
///
/// Owns the feed cache, so one updater reused across scheduled runs keeps
/// serving the last good feed through an outage.
pub struct ShipUpdater<'a> {
    wiki: &'a dyn WikiApi,
    feed: &'a dyn FeedApi,
    cache: FeedCache,
    reconciler: Reconciler,
    title_overrides: BTreeMap<String, String>,
    options: UpdateOptions,
}

enum RecordOutcome {
    UpToDate,
    Changed(PageChange),
}

impl<'a> ShipUpdater<'a> {
    pub fn new(
        wiki: &'a dyn WikiApi,
        feed: &'a dyn FeedApi,
        reconciler: Reconciler,
        title_overrides: BTreeMap<String, String>,
        options: UpdateOptions,
    ) -> Self {
        Self {
            wiki,
            feed,
            cache: FeedCache::new(),
            reconciler,
            title_overrides,
            options,
        }
    }

    pub fn cache(&self) -> &FeedCache {
        &self.cache
    }

    pub fn page_title<'n>(&'n self, name: &'n str) -> &'n str {
        self.title_overrides
            .get(name)
            .map(String::as_str)
            .unwrap_or(name)
    }

    /// Update the selected records. Fails only when there is no feed data at
    /// all; every per-record problem lands in the report instead.
    pub fn update_batch(
        &self,
        selection: &RecordSelection,
        supplied: Option<FeedPayload>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        let started = Instant::now();
        let (payload, feed_source) = match supplied {
            Some(payload) => (Arc::new(payload), FeedSource::Supplied),
            None => self.cache.fetch_with_fallback(self.feed)?,
        };

        let names: Vec<String> = match selection {
            RecordSelection::All => payload.keys().cloned().collect(),
            RecordSelection::Named(names) => names.clone(),
        };
        info!(
            "updating {} ship(s) with {} worker(s){}",
            names.len(),
            worker_count(self.options.threads, names.len()),
            if self.options.dry_run { " (dry run)" } else { "" }
        );

        let pages = if self.options.prefetch_pages {
            let titles: Vec<String> = names
                .iter()
                .map(|name| self.page_title(name).to_string())
                .collect();
            self.prefetch_pages(&titles, cancel)
        } else {
            BTreeMap::new()
        };

        let records = run_pool(&names, self.options.threads, |name| {
            let title = self.page_title(name);
            self.update_record(name, payload.get(name), pages.get(title), cancel)
        });

        let report = BatchReport::from_records(self.options.dry_run, feed_source, records, started);
        info!(
            "batch finished in {}ms: {} updated, {} up-to-date, {} skipped, {} failed",
            report.elapsed_ms, report.updated, report.up_to_date, report.skipped, report.failed
        );
        Ok(report)
    }

    fn prefetch_pages(&self, titles: &[String], cancel: &CancellationToken) -> BTreeMap<String, String> {
        if titles.is_empty() || cancel.is_cancelled() {
            return BTreeMap::new();
        }
        let started = Instant::now();
        match self.wiki.get_pages(titles) {
            Ok(pages) => {
                debug!(
                    "prefetched {}/{} pages in {}ms",
                    pages.len(),
                    titles.len(),
                    started.elapsed().as_millis()
                );
                pages
            }
            Err(error) => {
                warn!("page prefetch failed, fetching pages individually: {error:#}");
                BTreeMap::new()
            }
        }
    }

    /// Run one record to completion. Never panics or returns an error: every
    /// outcome becomes a report entry.
    pub fn update_record(
        &self,
        name: &str,
        incoming: Option<&ParameterMap>,
        prefetched: Option<&String>,
        cancel: &CancellationToken,
    ) -> RecordReport {
        let started = Instant::now();
        let title = self.page_title(name);
        let label = record_label(title);
        info!("{label} Updating ship...");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.process_record(name, title, &label, incoming, prefetched, cancel)
        }));

        let mut report = RecordReport {
            name: name.to_string(),
            page_title: title.to_string(),
            status: RecordStatus::Failed,
            detail: None,
            updated_keys: Vec::new(),
            removed_keys: Vec::new(),
            summary: None,
            diff: None,
            elapsed_ms: 0,
        };

        match outcome {
            Ok(Ok(RecordOutcome::UpToDate)) => {
                report.status = RecordStatus::UpToDate;
                info!("{label} Ship is up-to-date");
            }
            Ok(Ok(RecordOutcome::Changed(change))) => {
                report.status = RecordStatus::Updated;
                if self.options.show_diff {
                    report.diff = Some(unified_diff(&change.old_block, &change.new_block));
                }
                report.updated_keys = change.updated_keys.into_iter().collect();
                report.removed_keys = change.removed_keys.into_iter().collect();
                report.summary = Some(change.summary);
                info!(
                    "{label} {} ship in {}ms",
                    if self.options.dry_run { "Would update" } else { "Updated" },
                    started.elapsed().as_millis()
                );
            }
            Ok(Err(failure)) => match classify(&failure) {
                Some(reason) if reason.is_skip() => {
                    report.status = RecordStatus::Skipped;
                    report.detail = Some(reason.to_string());
                    warn!("{label} Skipped: {reason}");
                }
                _ => {
                    report.detail = Some(format!("{failure:#}"));
                    error!("{label} Failed to update ship: {failure:#}");
                }
            },
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                report.detail = Some(format!("update panicked: {message}"));
                error!("{label} Update panicked: {message}");
            }
        }

        report.elapsed_ms = started.elapsed().as_millis();
        report
    }

    fn process_record(
        &self,
        name: &str,
        title: &str,
        label: &str,
        incoming: Option<&ParameterMap>,
        prefetched: Option<&String>,
        cancel: &CancellationToken,
    ) -> Result<RecordOutcome> {
        let incoming = incoming.ok_or_else(|| UpdateError::MissingRecord(name.to_string()))?;

        let page = match prefetched {
            Some(text) => text.clone(),
            None => {
                cancel.checkpoint()?;
                let fetch_started = Instant::now();
                let page = self.wiki.get_page(title)?;
                debug!("{label} Fetched article in {}ms", fetch_started.elapsed().as_millis());
                page
            }
        };

        let reconcile_started = Instant::now();
        let reconciliation = self.reconciler.reconcile(&page, incoming)?;
        debug!("{label} Reconciled infobox in {}ms", reconcile_started.elapsed().as_millis());

        let change = match reconciliation {
            Reconciliation::UpToDate => return Ok(RecordOutcome::UpToDate),
            Reconciliation::Changed(change) => change,
        };

        if !self.options.dry_run {
            cancel.checkpoint()?;
            let edit_started = Instant::now();
            self.wiki.edit_page(title, &change.new_text, &change.summary)?;
            debug!("{label} Edited page in {}ms", edit_started.elapsed().as_millis());
        }
        Ok(RecordOutcome::Changed(change))
    }
}

/// `name` padded or cut to a fixed column so log lines align.
pub fn record_label(name: &str) -> String {
    let truncated: String = name.chars().take(RECORD_LABEL_WIDTH).collect();
    format!("[{truncated:<width$}]", width = RECORD_LABEL_WIDTH)
}

pub fn worker_count(requested: usize, jobs: usize) -> usize {
    let requested = if requested == 0 {
        thread::available_parallelism()
            .map(|parallelism| parallelism.get())
            .unwrap_or(4)
    } else {
        requested
    };
    requested.min(jobs).max(1)
}

/// Process `names` on at most `threads` workers, returning results in input order.
fn run_pool<F>(names: &[String], threads: usize, work: F) -> Vec<RecordReport>
where
    F: Fn(&str) -> RecordReport + Sync,
{
    let workers = worker_count(threads, names.len());
    if workers == 1 {
        return names.iter().map(|name| work(name)).collect();
    }

    let cursor = AtomicUsize::new(0);
    let results = Mutex::new(Vec::with_capacity(names.len()));
    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                loop {
                    let index = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(name) = names.get(index) else {
                        break;
                    };
                    let report = work(name);
                    results
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push((index, report));
                }
            });
        }
    });

    let mut results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, report)| report).collect()
}

fn unified_diff(old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(2)
        .header("current", "proposed")
        .to_string()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{
        RecordSelection, RecordStatus, ShipUpdater, UpdateOptions, record_label, worker_count,
    };
    use crate::cancel::CancellationToken;
    use crate::error::{UpdateError, classify};
    use crate::feed::{FeedApi, FeedPayload, FeedSource};
    use crate::mediawiki::WikiApi;
    use crate::parser::{DEFAULT_TEMPLATE_NAME, InfoboxTemplate, ParameterMap};
    use crate::policy::ExclusionPolicy;
    use crate::reconcile::{DEFAULT_IGNORE_MARKER, Reconciler};
    use crate::turrets::TurretFeed;

    #[derive(Default)]
    struct MockWiki {
        pages: Mutex<BTreeMap<String, String>>,
        edits: Mutex<Vec<(String, String, String)>>,
        fail_prefetch: bool,
        panic_on: Option<String>,
        request_count: AtomicUsize,
    }

    impl MockWiki {
        fn with_pages(pages: &[(&str, &str)]) -> Self {
            let wiki = Self::default();
            {
                let mut stored = wiki.pages.lock().expect("lock");
                for (title, text) in pages {
                    stored.insert(title.to_string(), text.to_string());
                }
            }
            wiki
        }

        fn edited_titles(&self) -> Vec<String> {
            let mut titles: Vec<String> = self
                .edits
                .lock()
                .expect("lock")
                .iter()
                .map(|(title, _, _)| title.clone())
                .collect();
            titles.sort();
            titles
        }
    }

    impl WikiApi for MockWiki {
        fn login(&self, _username: &str, _password: &str) -> anyhow::Result<()> {
            Ok(())
        }

        fn is_authenticated(&self) -> anyhow::Result<bool> {
            Ok(true)
        }

        fn get_pages(&self, titles: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
            self.request_count.fetch_add(1, Ordering::Relaxed);
            if self.fail_prefetch && titles.len() > 1 {
                anyhow::bail!("HTTP 503");
            }
            if let Some(target) = &self.panic_on
                && titles.iter().any(|title| title == target)
            {
                panic!("simulated crash for {target}");
            }
            let pages = self.pages.lock().expect("lock");
            Ok(titles
                .iter()
                .filter_map(|title| pages.get(title).map(|text| (title.clone(), text.clone())))
                .collect())
        }

        fn edit_page(&self, title: &str, content: &str, summary: &str) -> anyhow::Result<()> {
            self.request_count.fetch_add(1, Ordering::Relaxed);
            self.edits.lock().expect("lock").push((
                title.to_string(),
                content.to_string(),
                summary.to_string(),
            ));
            self.pages
                .lock()
                .expect("lock")
                .insert(title.to_string(), content.to_string());
            Ok(())
        }

        fn request_count(&self) -> usize {
            self.request_count.load(Ordering::Relaxed)
        }
    }

    struct MockFeed {
        responses: Mutex<Vec<anyhow::Result<FeedPayload>>>,
    }

    impl MockFeed {
        fn serving(payloads: Vec<anyhow::Result<FeedPayload>>) -> Self {
            Self {
                responses: Mutex::new(payloads),
            }
        }
    }

    impl FeedApi for MockFeed {
        fn fetch_ships(&self) -> anyhow::Result<FeedPayload> {
            let mut responses = self.responses.lock().expect("lock");
            if responses.is_empty() {
                anyhow::bail!("feed offline");
            }
            responses.remove(0)
        }

        fn fetch_turrets(&self) -> anyhow::Result<TurretFeed> {
            anyhow::bail!("not used")
        }
    }

    fn record(pairs: &[(&str, &str)]) -> ParameterMap {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn feed_payload() -> FeedPayload {
        let mut payload = FeedPayload::new();
        payload.insert(
            "Deity".to_string(),
            record(&[("hull", "38000"), ("shields", "40000"), ("title", "Deity")]),
        );
        payload.insert("Hasatan".to_string(), record(&[("hull", "5000")]));
        payload.insert("yname".to_string(), record(&[("hull", "900")]));
        payload.insert("Nova".to_string(), record(&[("hull", "100")]));
        payload
    }

    fn pages() -> Vec<(&'static str, &'static str)> {
        vec![
            (
                "Deity",
                "Lead.\n{{Ship Infobox\n|hull = 30,000\n|title = Deity\n}}\nBody.",
            ),
            ("Hasatan", "{{Ship Infobox\n|hull = 5,000\n}}"),
            (
                "Yname (ship)",
                "<!-- ketchupbot-ignore -->\n{{Ship Infobox\n|hull = 1\n}}",
            ),
            ("Nova", "No infobox on this page."),
        ]
    }

    fn updater<'a>(wiki: &'a MockWiki, feed: &'a MockFeed, options: UpdateOptions) -> ShipUpdater<'a> {
        let reconciler = Reconciler::new(
            InfoboxTemplate::new(DEFAULT_TEMPLATE_NAME).expect("template"),
            ExclusionPolicy::default(),
            DEFAULT_IGNORE_MARKER,
        )
        .expect("reconciler");
        let overrides = [("yname".to_string(), "Yname (ship)".to_string())]
            .into_iter()
            .collect();
        ShipUpdater::new(wiki, feed, reconciler, overrides, options)
    }

    #[test]
    fn batch_isolates_each_record_outcome() {
        let wiki = MockWiki::with_pages(&pages());
        let feed = MockFeed::serving(vec![Ok(feed_payload())]);
        let updater = updater(
            &wiki,
            &feed,
            UpdateOptions {
                threads: 3,
                ..UpdateOptions::default()
            },
        );

        let report = updater
            .update_batch(&RecordSelection::All, None, &CancellationToken::new())
            .expect("batch");

        assert_eq!(report.feed_source, FeedSource::Fresh);
        assert_eq!(report.attempted, 4);
        assert_eq!(report.updated, 1);
        assert_eq!(report.up_to_date, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);

        let names: Vec<&str> = report.records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Deity", "Hasatan", "Nova", "yname"]);
        assert_eq!(report.records[0].updated_keys, vec!["hull", "shields"]);
        assert_eq!(report.records[3].page_title, "Yname (ship)");
        assert_eq!(report.records[3].status, RecordStatus::Skipped);
        assert!(
            report.records[2]
                .detail
                .as_deref()
                .is_some_and(|detail| detail.contains("no Ship Infobox found"))
        );

        assert_eq!(wiki.edited_titles(), vec!["Deity"]);
        let edits = wiki.edits.lock().expect("lock");
        assert_eq!(
            edits[0].1,
            "Lead.\n{{Ship Infobox\n|hull = 38,000\n|shields = 40,000\n|title = The Deity\n}}\nBody."
        );
        assert_eq!(
            edits[0].2,
            "Automated ship data update. Updated parameters: hull, shields."
        );
    }

    #[test]
    fn second_run_is_idempotent() {
        let wiki = MockWiki::with_pages(&pages());
        let feed = MockFeed::serving(vec![Ok(feed_payload()), Ok(feed_payload())]);
        let updater = updater(&wiki, &feed, UpdateOptions::default());
        let cancel = CancellationToken::new();

        updater
            .update_batch(&RecordSelection::All, None, &cancel)
            .expect("first");
        let second = updater
            .update_batch(&RecordSelection::All, None, &cancel)
            .expect("second");

        assert_eq!(second.updated, 0);
        assert_eq!(second.up_to_date, 2);
        assert_eq!(wiki.edited_titles(), vec!["Deity"]);
    }

    #[test]
    fn dry_run_reports_changes_without_editing() {
        let wiki = MockWiki::with_pages(&pages());
        let feed = MockFeed::serving(vec![Ok(feed_payload())]);
        let updater = updater(
            &wiki,
            &feed,
            UpdateOptions {
                dry_run: true,
                show_diff: true,
                ..UpdateOptions::default()
            },
        );

        let report = updater
            .update_batch(
                &RecordSelection::Named(vec!["Deity".to_string()]),
                None,
                &CancellationToken::new(),
            )
            .expect("batch");

        assert!(report.dry_run);
        assert_eq!(report.updated, 1);
        assert!(wiki.edited_titles().is_empty());
        let diff = report.records[0].diff.as_deref().expect("diff");
        assert!(diff.contains("-|hull = 30,000"));
        assert!(diff.contains("+|hull = 38,000"));
    }

    #[test]
    fn outage_falls_back_to_cached_feed() {
        let wiki = MockWiki::with_pages(&pages());
        let feed = MockFeed::serving(vec![Ok(feed_payload())]);
        let updater = updater(&wiki, &feed, UpdateOptions::default());
        let cancel = CancellationToken::new();

        updater
            .update_batch(&RecordSelection::All, None, &cancel)
            .expect("first");
        let second = updater
            .update_batch(&RecordSelection::All, None, &cancel)
            .expect("cached run");
        assert_eq!(second.feed_source, FeedSource::Cached);
        assert_eq!(second.attempted, 4);
    }

    #[test]
    fn cold_outage_aborts_batch() {
        let wiki = MockWiki::with_pages(&pages());
        let feed = MockFeed::serving(Vec::new());
        let updater = updater(&wiki, &feed, UpdateOptions::default());

        let error = updater
            .update_batch(&RecordSelection::All, None, &CancellationToken::new())
            .expect_err("must fail");
        assert!(matches!(
            classify(&error),
            Some(UpdateError::UpstreamUnavailable(_))
        ));
    }

    #[test]
    fn supplied_data_skips_feed_and_missing_records_fail() {
        let wiki = MockWiki::with_pages(&pages());
        let feed = MockFeed::serving(Vec::new());
        let updater = updater(&wiki, &feed, UpdateOptions::default());

        let report = updater
            .update_batch(
                &RecordSelection::Named(vec!["Hasatan".to_string(), "Ghost".to_string()]),
                Some(feed_payload()),
                &CancellationToken::new(),
            )
            .expect("batch");

        assert_eq!(report.feed_source, FeedSource::Supplied);
        assert_eq!(report.up_to_date, 1);
        assert_eq!(report.failed, 1);
        assert!(
            report.records[1]
                .detail
                .as_deref()
                .is_some_and(|detail| detail.contains("Ghost"))
        );
    }

    #[test]
    fn failed_prefetch_falls_back_to_single_fetches() {
        let wiki = MockWiki {
            fail_prefetch: true,
            ..MockWiki::with_pages(&pages())
        };
        let feed = MockFeed::serving(vec![Ok(feed_payload())]);
        let updater = updater(&wiki, &feed, UpdateOptions::default());

        let report = updater
            .update_batch(&RecordSelection::All, None, &CancellationToken::new())
            .expect("batch");
        assert_eq!(report.updated, 1);
        assert_eq!(report.up_to_date, 1);
    }

    #[test]
    fn panic_in_one_record_does_not_sink_the_batch() {
        let wiki = MockWiki {
            panic_on: Some("Deity".to_string()),
            ..MockWiki::with_pages(&pages())
        };
        let feed = MockFeed::serving(vec![Ok(feed_payload())]);
        let updater = updater(
            &wiki,
            &feed,
            UpdateOptions {
                threads: 2,
                prefetch_pages: false,
                ..UpdateOptions::default()
            },
        );

        let report = updater
            .update_batch(&RecordSelection::All, None, &CancellationToken::new())
            .expect("batch");
        assert_eq!(report.records[0].status, RecordStatus::Failed);
        assert!(
            report.records[0]
                .detail
                .as_deref()
                .is_some_and(|detail| detail.contains("simulated crash"))
        );
        assert_eq!(report.up_to_date, 1);
    }

    #[test]
    fn cancelled_batch_fails_records_individually() {
        let wiki = MockWiki::with_pages(&pages());
        let feed = MockFeed::serving(vec![Ok(feed_payload())]);
        let updater = updater(&wiki, &feed, UpdateOptions::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = updater
            .update_batch(&RecordSelection::All, None, &cancel)
            .expect("batch");
        assert_eq!(report.failed, 4);
        assert!(
            report
                .records
                .iter()
                .all(|record| record.detail.as_deref() == Some("batch cancelled"))
        );
        assert!(wiki.edited_titles().is_empty());
    }

    #[test]
    fn record_label_pads_and_truncates() {
        assert_eq!(record_label("Deity"), "[Deity       ]");
        assert_eq!(record_label("Prototype X-2 Mk II"), "[Prototype X-]");
    }

    #[test]
    fn worker_count_is_bounded_by_jobs() {
        assert_eq!(worker_count(8, 3), 3);
        assert_eq!(worker_count(1, 10), 1);
        assert_eq!(worker_count(4, 0), 1);
        assert!(worker_count(0, 100) >= 1);
    }
}
