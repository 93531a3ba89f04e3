use anyhow::{bail, Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use pac_alignment::db::{count_rows, insert_interest_group_committee, insert_interest_group_keyword};
use pac_alignment::{
    AlignmentConfig, AlignmentService, AnomalyKind, ConfigStore, ConnectionPool, InterestGroupConfig,
    JsonConfigStore, ScoreCache, VERSION,
};

const DB_ENV: &str = "PAC_ALIGNMENT_DB";
const CONFIG_ENV: &str = "PAC_ALIGNMENT_CONFIG";
const INTEREST_GROUPS_ENV: &str = "PAC_ALIGNMENT_INTEREST_GROUPS";
const DEFAULT_DB: &str = "alignment.db";

fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");
    let arg = args.get(2).map(String::as_str);

    let db_path = PathBuf::from(env::var(DB_ENV).unwrap_or_else(|_| DEFAULT_DB.to_string()));
    let config = load_config()?;

    match command {
        "init" => run_init(&db_path, &config, arg),
        "populate" => run_populate(&db_path, config),
        "score" => run_score(&db_path, config, required(arg, "score <person_id>")?),
        "coverage" => run_coverage(&db_path, config),
        "stats" => run_stats(&db_path, &config),
        "stale" => run_stale(&db_path, &config),
        "invalidate" => run_invalidate(&db_path, config, required(arg, "invalidate <person_id>")?),
        "export" => run_export(&db_path, &config, required(arg, "export <file.csv>")?),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn required<'a>(arg: Option<&'a str>, usage: &str) -> Result<&'a str> {
    match arg {
        Some(value) => Ok(value),
        None => bail!("usage: pac-alignment {}", usage),
    }
}

fn load_config() -> Result<AlignmentConfig> {
    let mut config = match env::var(CONFIG_ENV) {
        Ok(path) => AlignmentConfig::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        Err(_) => AlignmentConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("Invalid PAC_ALIGNMENT_* override")?;
    Ok(config)
}

fn open_service(db_path: &Path, config: AlignmentConfig) -> Result<AlignmentService> {
    let config_store: Option<Arc<dyn ConfigStore>> = env::var(INTEREST_GROUPS_ENV)
        .ok()
        .map(|path| Arc::new(JsonConfigStore::new(path)) as Arc<dyn ConfigStore>);
    AlignmentService::open_sqlite(db_path, config, config_store)
}

fn open_cache(db_path: &Path, config: &AlignmentConfig) -> Result<ScoreCache> {
    let pool = ConnectionPool::open(
        db_path,
        1,
        Duration::from_millis(config.job.checkout_timeout_ms),
    )?;
    Ok(ScoreCache::new(Arc::new(pool), config.cache.clone()))
}

fn run_init(db_path: &Path, config: &AlignmentConfig, interest_groups: Option<&str>) -> Result<()> {
    println!("🗄️  Initializing database: {:?}", db_path);

    let pool = ConnectionPool::open(
        db_path,
        1,
        Duration::from_millis(config.job.checkout_timeout_ms),
    )?;
    let conn = pool.checkout()?;
    println!("✓ Schema ready (WAL mode)");

    if let Some(path) = interest_groups {
        let ig = InterestGroupConfig::from_file(path)
            .with_context(|| format!("Failed to load interest groups from {}", path))?;

        for committee_id in &ig.committee_ids {
            insert_interest_group_committee(&conn, committee_id, "")?;
        }
        for keyword in &ig.keywords {
            insert_interest_group_keyword(&conn, keyword, "")?;
        }
        println!(
            "✓ Interest groups loaded: {} committees, {} keywords",
            ig.committee_ids.len(),
            ig.keywords.len()
        );
    }

    println!("\n📊 Table counts:");
    for table in [
        "persons",
        "candidate_records",
        "committees",
        "transactions",
        "cfg_interest_group_committees",
        "cfg_interest_group_keywords",
        "score_cache",
    ] {
        println!("   {:<32} {}", table, count_rows(&conn, table)?);
    }

    Ok(())
}

fn run_populate(db_path: &Path, config: AlignmentConfig) -> Result<()> {
    println!("🏭 PAC Alignment v{} - population run", VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let service = open_service(db_path, config)?;
    let summary = service.run_population()?;

    println!("\nRun {}", summary.run_id);
    println!("   Election year:     {}", summary.election_year);
    println!("   Attempted:         {}", summary.attempted);
    println!("   Succeeded:         {}", summary.succeeded);
    println!("   Skipped (ambig.):  {}", summary.skipped_ambiguous);
    println!("   Failed:            {}", summary.failed);
    println!(
        "   Coverage:          {}/{} ({:.1}%)",
        summary.coverage.cached_count, summary.coverage.expected_count, summary.coverage.coverage_percent
    );
    if summary.cancelled {
        println!("   ⚠️  Run was cancelled before every person was dispatched");
    }

    let failures: Vec<_> = summary
        .anomalies
        .iter()
        .filter(|a| matches!(a.kind, AnomalyKind::ComputeFailed | AnomalyKind::WriteFailed))
        .collect();
    if !failures.is_empty() {
        println!("\n❌ Failures:");
        for anomaly in failures {
            println!("   {} - {}", anomaly.person_id, anomaly.detail);
        }
    }

    let ambiguous: Vec<_> = summary.anomalies_of(AnomalyKind::AmbiguousMapping).collect();
    if !ambiguous.is_empty() {
        println!("\n⚠️  Ambiguous identities (not scored):");
        for anomaly in ambiguous {
            println!("   {} - {}", anomaly.person_id, anomaly.detail);
        }
    }

    Ok(())
}

fn run_score(db_path: &Path, config: AlignmentConfig, person_id: &str) -> Result<()> {
    let service = open_service(db_path, config)?;

    match service.get_score(person_id)? {
        Some(view) => {
            println!("👤 {}", view.person_id);
            println!("   Score:           {:.1}", view.score);
            println!("   Grade:           {} ({})", view.grade, view.category);
            println!("   Humanity score:  {}/5", view.humanity_score);
            println!("   Total funding:   ${:.2}", view.total_funding);
            println!("   Last calculated: {}", view.last_calculated.to_rfc3339());
            if view.is_stale {
                println!("   ⚠️  Stale - a recompute is pending or failed");
            }
        }
        None => println!("👤 {}: score not yet available", person_id),
    }

    Ok(())
}

fn run_coverage(db_path: &Path, config: AlignmentConfig) -> Result<()> {
    let service = open_service(db_path, config)?;
    let coverage = service.get_coverage()?;

    println!(
        "📈 Coverage: {}/{} ({:.1}%)",
        coverage.cached_count, coverage.expected_count, coverage.coverage_percent
    );
    if coverage.coverage_percent < pac_alignment::job::COVERAGE_WARNING_PERCENT {
        println!("   ⚠️  Below {}% - run `pac-alignment populate`", pac_alignment::job::COVERAGE_WARNING_PERCENT);
    }
    Ok(())
}

fn run_stats(db_path: &Path, config: &AlignmentConfig) -> Result<()> {
    let cache = open_cache(db_path, config)?;
    let stats = cache.stats()?;

    println!("📊 Score cache");
    println!("   Entries:        {}", stats.entry_count);
    println!(
        "   Stale (>{}d):   {}",
        config.cache.stale_after_days, stats.stale_count
    );
    println!("   Average score:  {:.1}", stats.average_score);
    println!("   Avg. humanity:  {:.2}", stats.average_humanity_score);
    println!("   Total funding:  ${:.2}", stats.total_funding);
    if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
        println!("   Oldest:         {}", oldest.to_rfc3339());
        println!("   Newest:         {}", newest.to_rfc3339());
    }
    Ok(())
}

fn run_stale(db_path: &Path, config: &AlignmentConfig) -> Result<()> {
    let cache = open_cache(db_path, config)?;
    let stale = cache.stale_entries(config.cache.stale_after_days)?;

    println!(
        "⏳ {} entries older than {} days",
        stale.len(),
        config.cache.stale_after_days
    );
    for entry in stale {
        println!(
            "   {:<20} {:>6.1}  {}/5  {}",
            entry.person_id,
            entry.score,
            entry.humanity_score,
            entry.last_calculated.to_rfc3339()
        );
    }
    Ok(())
}

fn run_invalidate(db_path: &Path, config: AlignmentConfig, person_id: &str) -> Result<()> {
    let service = open_service(db_path, config)?;

    if service.invalidate(person_id)? {
        println!("🗑️  Invalidated {}", person_id);
    } else {
        println!("No cached score for {}", person_id);
    }
    Ok(())
}

fn run_export(db_path: &Path, config: &AlignmentConfig, csv_path: &str) -> Result<()> {
    let cache = open_cache(db_path, config)?;
    let rows = cache.export_csv(csv_path)?;

    println!("💾 Exported {} scores to {}", rows, csv_path);
    Ok(())
}

fn print_usage() {
    println!("pac-alignment v{}", VERSION);
    println!();
    println!("Usage: pac-alignment <command>");
    println!();
    println!("Commands:");
    println!("  init [interest_groups.json]   Create schema, optionally load interest groups");
    println!("  populate                      Score every person and fill the cache");
    println!("  score <person_id>             Show (and refresh if needed) one score");
    println!("  coverage                      Cached persons vs. expected population");
    println!("  stats                         Cache statistics");
    println!("  stale                         List entries past the staleness threshold");
    println!("  invalidate <person_id>        Drop one cached score");
    println!("  export <file.csv>             Write every cached score to CSV");
    println!();
    println!("Environment:");
    println!("  {:<32} SQLite file (default {})", DB_ENV, DEFAULT_DB);
    println!("  {:<32} JSON config file", CONFIG_ENV);
    println!("  {:<32} JSON interest-group file (default: cfg_* tables)", INTEREST_GROUPS_ENV);
    println!("  {:<32} Log filter (default info)", "RUST_LOG");
}
