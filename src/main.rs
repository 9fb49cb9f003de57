use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use procache::cache::{Scope, SqliteSnapshot, UnifiedCache};
use procache::config::{CacheConfig, Config};
use procache::filters::{DateRange, FilterSet, ProductSearch, SearchMode};
use procache::invoice::{InvoiceLine, InvoiceLines};
use procache::logging::{self, LogTarget};

#[derive(Parser, Debug)]
#[command(name = "procache")]
#[command(about = "Filter-aware cache and cursor paginator for invoice line listings")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/procache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log directory
  #[arg(long, global = true)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Load invoice lines, from the cache when possible
  Fetch(FetchArgs),
  /// Show what the persisted cache holds
  Stats,
  /// Remove persisted cache entries
  Clear {
    /// Only remove keys matching this regular expression
    #[arg(long)]
    pattern: Option<String>,
  },
}

#[derive(ClapArgs, Debug)]
struct FetchArgs {
  /// Organization id
  #[arg(long)]
  org: String,

  /// Business unit id
  #[arg(long)]
  business_unit: Option<String>,

  /// First invoice date (YYYY-MM-DD)
  #[arg(long, requires = "end")]
  start: Option<String>,

  /// Last invoice date (YYYY-MM-DD)
  #[arg(long, requires = "start")]
  end: Option<String>,

  #[arg(long = "location")]
  locations: Vec<String>,

  #[arg(long = "supplier")]
  suppliers: Vec<String>,

  #[arg(long = "category")]
  categories: Vec<String>,

  /// Product search term; repeat for several
  #[arg(long = "search")]
  search: Vec<String>,

  /// Require every search term instead of any
  #[arg(long)]
  all: bool,

  /// Serve rows from a JSON file instead of the backend
  #[arg(long)]
  fixture: Option<PathBuf>,

  /// Re-request with this start date afterwards
  #[arg(long, requires = "then_end")]
  then_start: Option<String>,

  /// Re-request with this end date afterwards
  #[arg(long, requires = "then_start")]
  then_end: Option<String>,

  /// Re-request limited to these locations afterwards
  #[arg(long = "then-location")]
  then_locations: Vec<String>,

  /// Print the rows as JSON
  #[arg(long)]
  json: bool,
}

fn date_range(start: &Option<String>, end: &Option<String>) -> Result<Option<DateRange>> {
  match (start, end) {
    (Some(start), Some(end)) => DateRange::parse(start, end)
      .map(Some)
      .ok_or_else(|| eyre!("Invalid date range {}..{}", start, end)),
    _ => Ok(None),
  }
}

impl FetchArgs {
  fn filters(&self) -> Result<FilterSet> {
    let mut filters = FilterSet::new();
    if let Some(range) = date_range(&self.start, &self.end)? {
      filters = filters.with_date_range(range);
    }
    if !self.locations.is_empty() {
      filters = filters.with_locations(self.locations.iter().cloned());
    }
    if !self.suppliers.is_empty() {
      filters = filters.with_suppliers(self.suppliers.iter().cloned());
    }
    if !self.categories.is_empty() {
      filters = filters.with_categories(self.categories.iter().cloned());
    }
    if !self.search.is_empty() {
      filters = filters.with_product_search(ProductSearch {
        terms: self.search.clone(),
        mode: if self.all { SearchMode::And } else { SearchMode::Or },
      });
    }
    Ok(filters)
  }

  /// The follow-up request, if any narrowing flag was given.
  fn narrowed(&self, filters: &FilterSet) -> Result<Option<FilterSet>> {
    let range = date_range(&self.then_start, &self.then_end)?;
    if range.is_none() && self.then_locations.is_empty() {
      return Ok(None);
    }

    let mut narrowed = filters.clone();
    if let Some(range) = range {
      narrowed = narrowed.with_date_range(range);
    }
    if !self.then_locations.is_empty() {
      narrowed = narrowed.with_locations(self.then_locations.iter().cloned());
    }
    Ok(Some(narrowed))
  }
}

fn read_fixture(path: &Path) -> Result<Vec<InvoiceLine>> {
  let contents = std::fs::read_to_string(path)
    .map_err(|e| eyre!("Failed to read fixture {}: {}", path.display(), e))?;
  serde_json::from_str(&contents)
    .map_err(|e| eyre!("Failed to parse fixture {}: {}", path.display(), e))
}

/// Open the snapshot when persistence is enabled and restore it into `cache`.
fn open_snapshot(settings: &CacheConfig, cache: &UnifiedCache) -> Result<Option<SqliteSnapshot>> {
  if !settings.persist.enabled {
    return Ok(None);
  }

  let path = match &settings.persist.path {
    Some(p) => p.clone(),
    None => SqliteSnapshot::default_path()?,
  };
  let snapshot = SqliteSnapshot::open(&path)?.with_max_bytes(settings.persist.max_bytes);
  snapshot.load(cache);
  Ok(Some(snapshot))
}

async fn fetch(config: Option<Config>, args: FetchArgs) -> Result<()> {
  let settings = config.as_ref().map(|c| c.cache.clone()).unwrap_or_default();
  let paging = config.as_ref().map(|c| c.paging.clone()).unwrap_or_default();

  let cache = UnifiedCache::new().with_default_ttl(settings.default_ttl());
  let snapshot = open_snapshot(&settings, &cache)?;

  let lines = match (&args.fixture, config) {
    (Some(path), _) => InvoiceLines::fixture(cache.clone(), paging.page_size, read_fixture(path)?),
    (None, Some(config)) => InvoiceLines::rpc(cache.clone(), paging.page_size, config.backend),
    (None, None) => return Err(eyre!("No backend configured; pass --fixture or create a config file")),
  };

  let scope = Scope::new(&args.org, args.business_unit.clone());
  let filters = args.filters()?;

  let mut requests = vec![filters.clone()];
  if let Some(narrowed) = args.narrowed(&filters)? {
    requests.push(narrowed);
  }

  for request in &requests {
    let result = lines.load(&scope, request).await?;
    let source = if result.is_cached() { "cache" } else { "network" };
    println!("{} lines from {}", result.data.len(), source);

    if args.json {
      println!("{}", serde_json::to_string_pretty(&result.data)?);
    }
  }

  if let Some(snapshot) = snapshot {
    snapshot.save(&cache)?;
  }
  Ok(())
}

fn persisted_cache(config: Option<Config>) -> Result<(UnifiedCache, SqliteSnapshot)> {
  let settings = config.map(|c| c.cache).unwrap_or_default();
  let cache = UnifiedCache::new().with_default_ttl(settings.default_ttl());

  match open_snapshot(&settings, &cache)? {
    Some(snapshot) => Ok((cache, snapshot)),
    None => Err(eyre!(
      "Cache persistence is disabled; set cache.persist.enabled in the config file"
    )),
  }
}

fn stats(config: Option<Config>) -> Result<()> {
  let (cache, _) = persisted_cache(config)?;
  let stats = cache.stats();

  println!(
    "{} entries ({} expired)",
    stats.total_entries, stats.expired_entries
  );
  for entry in &stats.entries {
    println!(
      "  {}  age {}s  ttl {}s  {} bytes{}",
      entry.key,
      entry.age_ms / 1000,
      entry.ttl_ms / 1000,
      entry.size_bytes,
      if entry.filter_aware { "  [filters]" } else { "" }
    );
  }
  Ok(())
}

fn clear(config: Option<Config>, pattern: Option<String>) -> Result<()> {
  let (cache, snapshot) = persisted_cache(config)?;

  let removed = match pattern {
    Some(pattern) => {
      let re = Regex::new(&pattern).map_err(|e| eyre!("Invalid pattern {}: {}", pattern, e))?;
      cache.clear_pattern(&re)
    }
    None => {
      let count = cache.keys().len();
      cache.clear();
      count
    }
  };

  snapshot.save(&cache)?;
  info!(removed, "Cleared cache entries");
  println!("Removed {} entries", removed);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let target = if args.log_stderr {
    LogTarget::Stderr
  } else {
    LogTarget::default_directory()
  };
  let _guard = logging::init(target)?;

  // A fixture run or a persisted-cache command can do without a config file
  let needs_backend = matches!(&args.command, Command::Fetch(f) if f.fixture.is_none());
  let config = match Config::load(args.config.as_deref()) {
    Ok(config) => Some(config),
    Err(e) if !needs_backend && args.config.is_none() => {
      warn!(error = %e, "Continuing with default settings");
      None
    }
    Err(e) => return Err(e),
  };

  match args.command {
    Command::Fetch(fetch_args) => fetch(config, fetch_args).await,
    Command::Stats => stats(config),
    Command::Clear { pattern } => clear(config, pattern),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fetch_flags_build_filters() {
    let args = Args::parse_from([
      "procache",
      "fetch",
      "--org",
      "org-1",
      "--start",
      "2024-01-01",
      "--end",
      "2024-01-31",
      "--location",
      "L1",
      "--location",
      "L2",
      "--then-location",
      "L1",
    ]);
    let Command::Fetch(fetch_args) = args.command else {
      panic!("expected fetch");
    };

    let filters = fetch_args.filters().unwrap();
    assert_eq!(filters.locations.as_ref().map(|l| l.len()), Some(2));
    assert!(filters.suppliers.is_none());

    let narrowed = fetch_args.narrowed(&filters).unwrap().unwrap();
    assert_eq!(narrowed.date_range, filters.date_range);
    assert_eq!(narrowed.locations.as_ref().map(|l| l.len()), Some(1));
  }

  #[test]
  fn test_bad_date_is_an_error() {
    let args = Args::parse_from([
      "procache", "fetch", "--org", "o", "--start", "2024-13-01", "--end", "2024-01-31",
    ]);
    let Command::Fetch(fetch_args) = args.command else {
      panic!("expected fetch");
    };
    assert!(fetch_args.filters().is_err());
  }

  #[test]
  fn test_no_narrowing_flags() {
    let args = Args::parse_from(["procache", "fetch", "--org", "o"]);
    let Command::Fetch(fetch_args) = args.command else {
      panic!("expected fetch");
    };
    assert!(fetch_args.narrowed(&FilterSet::new()).unwrap().is_none());
  }
}
