use std::fs;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use log::{error, info};
use shipsync_core::cancel::CancellationToken;
use shipsync_core::config::{DEFAULT_CONFIG_FILENAME, SyncConfig, load_config};
use shipsync_core::feed::{FeedClient, FeedClientConfig, FeedPayload, parse_ship_payload};
use shipsync_core::mediawiki::{MediaWikiClient, MediaWikiClientConfig, WikiApi};
use shipsync_core::parser::InfoboxTemplate;
use shipsync_core::reconcile::{Reconciler, Reconciliation};
use shipsync_core::turrets::{TurretOptions, TurretReport, TurretUpdater};
use shipsync_core::updater::{
    BatchReport, RecordSelection, RecordStatus, ShipUpdater, UpdateOptions,
};

#[derive(Debug, Parser)]
#[command(
    name = "shipsync",
    version,
    about = "Keep wiki ship infoboxes and turret tables in sync with the upstream stats feed"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Config file (default: shipsync.toml)")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Update ship infoboxes and/or turret pages")]
    Update(UpdateArgs),
    #[command(about = "Parse the infobox of a local page file (no network)")]
    Inspect(InspectArgs),
    #[command(about = "Print the resolved configuration")]
    Config,
}

#[derive(Debug, Args)]
struct UpdateArgs {
    #[arg(
        short = 's',
        long,
        value_name = "NAME",
        num_args = 1..,
        default_value = "all",
        help = "Ships to update: all, none, or one or more names"
    )]
    ships: Vec<String>,
    #[arg(short = 't', long, help = "Also update the turret page and turret Cargo data")]
    turrets: bool,
    #[arg(long, help = "Compute changes without editing any page")]
    dry_run: bool,
    #[arg(long, value_name = "N", help = "Worker threads (0 = available parallelism)")]
    threads: Option<usize>,
    #[arg(long, value_name = "PATH", help = "Read the ship feed from a JSON file")]
    data: Option<PathBuf>,
    #[arg(long, help = "Show a diff of every changed infobox")]
    show_diff: bool,
    #[arg(long, value_name = "SECS", help = "Cancel each run after this many seconds")]
    timeout_secs: Option<u64>,
    #[arg(long, value_name = "SECS", help = "Repeat the update on this interval")]
    every: Option<u64>,
    #[arg(long, help = "Print reports as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct InspectArgs {
    #[arg(value_name = "FILE")]
    page: PathBuf,
    #[arg(long, value_name = "PATH", help = "Feed JSON to reconcile the page against")]
    data: Option<PathBuf>,
    #[arg(long, value_name = "NAME", help = "Feed record to use with --data")]
    name: Option<String>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
    let config = load_config(&config_path)?;

    match cli.command {
        Some(Commands::Update(args)) => run_update(&config, args),
        Some(Commands::Inspect(args)) => run_inspect(&config, args),
        Some(Commands::Config) => run_config(&config, &config_path),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_update(config: &SyncConfig, args: UpdateArgs) -> Result<()> {
    let selection = parse_selection(&args.ships);
    if selection.is_none() && !args.turrets {
        bail!("nothing to update: pass --ships or --turrets");
    }
    let dry_run = args.dry_run || config.dry_run();
    let supplied = args.data.as_deref().map(load_payload).transpose()?;

    if config.feed_api_url().is_none() && (supplied.is_none() || args.turrets) {
        bail!("FEED_API_URL is not configured (set it in the environment or [feed] api_url)");
    }
    let feed = FeedClient::new(FeedClientConfig::from_config(config))?;
    let wiki = MediaWikiClient::new(MediaWikiClientConfig::from_config(config))?;

    if dry_run {
        info!("dry run: no pages will be edited");
    } else {
        let Some((username, password)) = config.credentials() else {
            bail!("WIKI_BOT_USER and WIKI_BOT_PASS are required unless --dry-run is set");
        };
        wiki.login(&username, &password)
            .context("failed to log in to the wiki")?;
        if !wiki.is_authenticated()? {
            bail!("wiki session is not authenticated after login as {username}");
        }
        info!("logged in as {username}");
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nCancelling after in-flight requests...");
            cancel.cancel();
        })
        .context("failed to install Ctrl-C handler")?;
    }

    let reconciler = Reconciler::new(
        InfoboxTemplate::new(config.template_name())?,
        config.policy.clone(),
        config.ignore_marker(),
    )?;
    let ship_updater = ShipUpdater::new(
        &wiki,
        &feed,
        reconciler,
        config.pages.title_overrides.clone(),
        UpdateOptions {
            dry_run,
            threads: args.threads.unwrap_or_else(|| config.threads()),
            show_diff: args.show_diff,
            prefetch_pages: true,
        },
    );
    let turret_updater = TurretUpdater::new(
        &wiki,
        &feed,
        TurretOptions {
            turret_page: config.turret_page().to_string(),
            data_page: config.turret_data_page().to_string(),
            dry_run,
        },
    )?;

    loop {
        let run_cancel = match args.timeout_secs {
            Some(seconds) => cancel.with_deadline(Duration::from_secs(seconds)),
            None => cancel.clone(),
        };

        if let Some(selection) = &selection {
            match ship_updater.update_batch(selection, supplied.clone(), &run_cancel) {
                Ok(report) => print_batch_report(&report, args.json)?,
                Err(error) if args.every.is_some() => error!("ship update failed: {error:#}"),
                Err(error) => return Err(error),
            }
        }
        if args.turrets {
            match turret_updater.update(None, &run_cancel) {
                Ok(report) => print_turret_report(&report, args.json)?,
                Err(error) if args.every.is_some() => error!("turret update failed: {error:#}"),
                Err(error) => return Err(error),
            }
        }

        let Some(every) = args.every else {
            break;
        };
        info!("next run in {every}s (Ctrl-C to stop)");
        if !wait_unless_cancelled(&cancel, Duration::from_secs(every)) {
            break;
        }
    }

    info!("{} wiki requests made", wiki.request_count());
    Ok(())
}

fn parse_selection(ships: &[String]) -> Option<RecordSelection> {
    match ships {
        [only] if only.eq_ignore_ascii_case("none") => None,
        [only] if only.eq_ignore_ascii_case("all") => Some(RecordSelection::All),
        names => Some(RecordSelection::Named(names.to_vec())),
    }
}

/// Sleep for `interval`; returns false if cancelled first.
fn wait_unless_cancelled(cancel: &CancellationToken, interval: Duration) -> bool {
    let deadline = Instant::now() + interval;
    while Instant::now() < deadline {
        if cancel.is_cancelled() {
            return false;
        }
        sleep(Duration::from_millis(250).min(deadline.saturating_duration_since(Instant::now())));
    }
    !cancel.is_cancelled()
}

fn load_payload(path: &Path) -> Result<FeedPayload> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    parse_ship_payload(value)
}

fn run_inspect(config: &SyncConfig, args: InspectArgs) -> Result<()> {
    let page = fs::read_to_string(&args.page)
        .with_context(|| format!("failed to read {}", args.page.display()))?;
    let template = InfoboxTemplate::new(config.template_name())?;
    let block = template.extract_block(&page)?;
    let parsed = template.parse(block)?;

    let Some(data_path) = args.data else {
        println!("{}", serde_json::to_string_pretty(&parsed)?);
        return Ok(());
    };

    let payload = load_payload(&data_path)?;
    let name = match args.name {
        Some(name) => name,
        None => args
            .page
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .context("cannot infer record name; pass --name")?,
    };
    let incoming = payload
        .get(&name)
        .with_context(|| format!("record {name} not found in {}", data_path.display()))?;

    let reconciler = Reconciler::new(template, config.policy.clone(), config.ignore_marker())?;
    match reconciler.reconcile(&page, incoming)? {
        Reconciliation::UpToDate => println!("{name}: up-to-date"),
        Reconciliation::Changed(change) => {
            println!("{name}: would update");
            println!("summary: {}", change.summary);
            println!("{}", change.new_block);
        }
    }
    Ok(())
}

fn run_config(config: &SyncConfig, config_path: &Path) -> Result<()> {
    println!("resolved configuration");
    println!("config_path: {}", config_path.display());
    println!("config_exists: {}", format_flag(config_path.exists()));
    println!(
        "wiki.api_url: {}",
        config.wiki_api_url().as_deref().unwrap_or("<unset>")
    );
    println!("wiki.user_agent: {}", config.user_agent());
    println!(
        "wiki.credentials: {}",
        if config.credentials().is_some() { "<set>" } else { "<unset>" }
    );
    println!(
        "feed.api_url: {}",
        config.feed_api_url().as_deref().unwrap_or("<unset>")
    );
    println!(
        "feed.token: {}",
        if config.feed_token().is_some() { "<set>" } else { "<unset>" }
    );
    println!("feed.ships_path: {}", config.ships_path());
    println!("feed.turrets_path: {}", config.turrets_path());
    println!("pages.template: {}", config.template_name());
    println!("pages.ignore_marker: {}", config.ignore_marker());
    println!("pages.turret_page: {}", config.turret_page());
    println!("pages.turret_data_page: {}", config.turret_data_page());
    for (name, title) in &config.pages.title_overrides {
        println!("pages.title_overrides.{name}: {title}");
    }
    println!("policy.excluded: {}", join_keys(&config.policy.excluded));
    println!("policy.keep_if_no: {}", join_keys(&config.policy.keep_if_no));
    println!("policy.delete_if_yes: {}", join_keys(&config.policy.delete_if_yes));
    println!("runner.threads: {}", config.threads());
    println!("runner.dry_run: {}", format_flag(config.dry_run()));
    Ok(())
}

fn print_batch_report(report: &BatchReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("ship update");
    println!("dry_run: {}", format_flag(report.dry_run));
    println!("feed_source: {}", report.feed_source.as_str());
    println!("attempted: {}", report.attempted);
    println!("updated: {}", report.updated);
    println!("up_to_date: {}", report.up_to_date);
    println!("skipped: {}", report.skipped);
    println!("failed: {}", report.failed);
    println!("elapsed_ms: {}", report.elapsed_ms);
    for record in &report.records {
        match record.status {
            RecordStatus::UpToDate => {}
            RecordStatus::Updated => {
                println!(
                    "  - {}: {} ({})",
                    record.page_title,
                    record.status.describe(report.dry_run),
                    record.summary.as_deref().unwrap_or("")
                );
                if let Some(diff) = &record.diff {
                    print!("{diff}");
                }
            }
            RecordStatus::Skipped | RecordStatus::Failed => println!(
                "  - {}: {} ({})",
                record.page_title,
                record.status.describe(report.dry_run),
                record.detail.as_deref().unwrap_or("")
            ),
        }
    }
    Ok(())
}

fn print_turret_report(report: &TurretReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("turret update");
    println!("dry_run: {}", format_flag(report.dry_run));
    println!("turrets: {}", report.turret_count);
    for page in &report.pages {
        match &page.detail {
            Some(detail) => println!(
                "  - {}: {} ({detail})",
                page.title,
                page.status.describe(report.dry_run)
            ),
            None => println!("  - {}: {}", page.title, page.status.describe(report.dry_run)),
        }
    }
    Ok(())
}

fn join_keys(keys: &std::collections::BTreeSet<String>) -> String {
    if keys.is_empty() {
        return "<none>".to_string();
    }
    keys.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use shipsync_core::updater::RecordSelection;

    use super::{Cli, Commands, parse_selection};

    #[test]
    fn selection_parses_keywords_and_names() {
        assert_eq!(parse_selection(&["all".to_string()]), Some(RecordSelection::All));
        assert_eq!(parse_selection(&["NONE".to_string()]), None);
        assert_eq!(
            parse_selection(&["Deity".to_string(), "Nova".to_string()]),
            Some(RecordSelection::Named(vec![
                "Deity".to_string(),
                "Nova".to_string()
            ]))
        );
    }

    #[test]
    fn update_defaults_to_all_ships() {
        let cli = Cli::try_parse_from(["shipsync", "update", "--dry-run"]).expect("parse");
        let Some(Commands::Update(args)) = cli.command else {
            panic!("expected update");
        };
        assert_eq!(args.ships, vec!["all"]);
        assert!(args.dry_run);
        assert!(!args.turrets);
    }

    #[test]
    fn update_accepts_ship_list_and_scheduling() {
        let cli = Cli::try_parse_from([
            "shipsync", "update", "--ships", "Deity", "Nova", "--turrets", "--every", "3600",
            "--threads", "8",
        ])
        .expect("parse");
        let Some(Commands::Update(args)) = cli.command else {
            panic!("expected update");
        };
        assert_eq!(args.ships, vec!["Deity", "Nova"]);
        assert!(args.turrets);
        assert_eq!(args.every, Some(3600));
        assert_eq!(args.threads, Some(8));
    }
}
