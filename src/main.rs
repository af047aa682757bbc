mod analyze;
mod config;
mod fetch;
mod harvest;
mod merge;
mod parser;
mod render;
mod resolver;
mod sanitize;
mod store;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::analyze::{ChatAnalyst, ChatConfig};
use crate::config::{FetchConfig, HarvestConfig, RetryPolicy, SearchConfig};
use crate::harvest::Harvester;
use crate::render::Renderer;
use crate::resolver::{HttpSearch, Resolver};
use crate::sanitize::truncate;
use crate::store::{Layout, Paper};

#[derive(Parser)]
#[command(name = "conf_papers", about = "Conference paper scraper with arXiv link resolution")]
struct Cli {
    /// Directory for scraped files, checkpoints and the log
    #[arg(long, global = true, env = "PAPERS_DATA_DIR", default_value = config::DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch venue listing pages and extract paper records
    Fetch(FetchArgs),
    /// Derive clean titles for scraped papers
    Clean {
        /// Scraped file (default: <data-dir>/all_papers.csv)
        #[arg(long)]
        input: Option<PathBuf>,
        /// Output file (default: <data-dir>/cleaned_papers.csv)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Resolve arXiv links chunk by chunk, then merge the checkpoints
    Search {
        /// Cleaned file (default: <data-dir>/cleaned_papers.csv)
        #[arg(long)]
        input: Option<PathBuf>,
        #[command(flatten)]
        harvest: HarvestArgs,
    },
    /// Merge checkpoint chunks into the final dataset
    Merge,
    /// Resolve a single title and print the outcome
    Lookup {
        title: String,
        #[command(flatten)]
        harvest: HarvestArgs,
    },
    /// Annotate papers with an overview and a relevance rating
    Analyze(AnalyzeArgs),
    /// Fetch + clean + search in one pipeline
    Run {
        #[command(flatten)]
        fetch: FetchArgs,
        #[command(flatten)]
        harvest: HarvestArgs,
    },
}

#[derive(Args)]
struct FetchArgs {
    /// Listing page to fetch (repeatable; default: built-in NeurIPS pages)
    #[arg(long = "url")]
    urls: Vec<String>,
    /// File with one listing URL per line
    #[arg(long)]
    urls_file: Option<PathBuf>,
    /// Max pages fetched at once
    #[arg(long, env = "PAPERS_CONCURRENCY")]
    concurrency: Option<usize>,
    /// spider.cloud key enabling the rendered-page fallback
    #[arg(long, env = "SPIDER_API_KEY", hide_env_values = true)]
    render_key: Option<String>,
}

#[derive(Args)]
struct HarvestArgs {
    /// Rows per checkpoint file
    #[arg(long, env = "PAPERS_CHUNK_SIZE")]
    chunk_size: Option<usize>,
    /// Lower bound of the pause between rows, in seconds
    #[arg(long, env = "PAPERS_DELAY_MIN")]
    delay_min: Option<f64>,
    /// Upper bound of the pause between rows, in seconds
    #[arg(long, env = "PAPERS_DELAY_MAX")]
    delay_max: Option<f64>,
    /// Search attempts per title
    #[arg(long, env = "PAPERS_RETRIES")]
    retries: Option<u32>,
    /// Search site origin
    #[arg(long, env = "PAPERS_SEARCH_ENDPOINT")]
    endpoint: Option<String>,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Input file (default: merged file if present, else cleaned file)
    #[arg(long)]
    input: Option<PathBuf>,
    /// Output file (default: <data-dir>/papers_analyzed.csv)
    #[arg(long)]
    output: Option<PathBuf>,
    /// Analyse a random sample of N rows
    #[arg(long)]
    sample: Option<usize>,
    #[arg(long, env = "DEEPSEEK_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    /// Research direction the relevance is judged against
    #[arg(long)]
    topic: Option<String>,
    /// Chat-completions endpoint
    #[arg(long, env = "DEEPSEEK_ENDPOINT")]
    endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let t0 = Instant::now();
    let cli = Cli::parse();
    init_tracing(&cli.data_dir);

    let data_dir = cli.data_dir;
    let result = match cli.command {
        Commands::Fetch(args) => {
            let papers = run_fetch(&data_dir, &args).await?;
            println!("Saved {} papers to {}", papers.len(), data_dir.join(store::SCRAPED_FILE).display());
            Ok(())
        }
        Commands::Clean { input, output } => {
            let input = input.unwrap_or_else(|| data_dir.join(store::SCRAPED_FILE));
            let output = output.unwrap_or_else(|| data_dir.join(store::CLEANED_FILE));
            let papers = run_clean(&input, &output)?;
            println!("Cleaned {} titles into {}", papers.len(), output.display());
            Ok(())
        }
        Commands::Search { input, harvest } => {
            let input = input.unwrap_or_else(|| data_dir.join(store::CLEANED_FILE));
            let rows = read_input(&input)?;
            run_search(&data_dir, &rows, &harvest).await
        }
        Commands::Merge => {
            let (_, report) = merge::merge(&data_dir)?;
            print_merge(&report);
            Ok(())
        }
        Commands::Lookup { title, harvest } => {
            let resolver = build_resolver(&harvest)?;
            let clean = sanitize::clean(&title);
            let outcome = resolver.resolve(&clean).await;
            println!("{} -> {}", truncate(&clean, 60), outcome);
            Ok(())
        }
        Commands::Analyze(args) => run_analyze(&data_dir, args).await,
        Commands::Run { fetch, harvest } => {
            // Phase 1: Fetch
            let t_fetch = Instant::now();
            let scraped = run_fetch(&data_dir, &fetch).await?;
            println!("Fetched {} papers in {:.1}s", scraped.len(), t_fetch.elapsed().as_secs_f64());
            if scraped.is_empty() {
                println!("Nothing to search (no papers extracted).");
                return Ok(());
            }

            // Phase 2: Clean
            let cleaned = run_clean(
                &data_dir.join(store::SCRAPED_FILE),
                &data_dir.join(store::CLEANED_FILE),
            )?;

            // Phase 3: Search
            run_search(&data_dir, &cleaned, &harvest).await
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Stderr logging plus an append-only log file in the data directory.
fn init_tracing(data_dir: &Path) {
    let log_path = data_dir.join(store::LOG_FILE);
    let file = fs::create_dir_all(data_dir)
        .and_then(|_| OpenOptions::new().create(true).append(true).open(&log_path));
    let (file_layer, file_error) = match file {
        Ok(f) => (Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(f))), None),
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        warn!("Logging to stderr only, cannot open {}: {}", log_path.display(), e);
    }
}

// ── Stages ──

async fn run_fetch(data_dir: &Path, args: &FetchArgs) -> Result<Vec<Paper>> {
    let urls = source_urls(args)?;
    let mut config = FetchConfig::default();
    if let Some(n) = args.concurrency {
        config.concurrency = n;
    }
    let renderer = match &args.render_key {
        Some(key) if !key.is_empty() => Some(Renderer::new(key.clone())?),
        _ => None,
    };

    fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    info!("Fetching {} listing pages", urls.len());
    let pages = fetch::collect_papers(&urls, &config, renderer.as_ref()).await?;

    let all = save_pages(data_dir, pages)?;
    store::write_papers(&data_dir.join(store::SCRAPED_FILE), Layout::Scraped, &all)?;
    Ok(all)
}

/// One `neurips_papers_<n>.csv` per listing page that produced records. `n`
/// is the page's position in the URL list, so numbering has gaps where a
/// page came back empty.
fn save_pages(data_dir: &Path, pages: Vec<fetch::PageRecords>) -> Result<Vec<Paper>> {
    let mut all = Vec::new();
    for (i, page) in pages.into_iter().enumerate() {
        if page.papers.is_empty() {
            warn!("No papers from {}, nothing saved", page.url);
            continue;
        }
        let path = store::page_path(data_dir, i + 1);
        store::write_papers(&path, Layout::Scraped, &page.papers)?;
        info!(
            "Saved {} papers from {} to {}{}",
            page.papers.len(),
            page.url,
            path.display(),
            if page.rendered { " (rendered)" } else { "" }
        );
        all.extend(page.papers);
    }
    Ok(all)
}

fn source_urls(args: &FetchArgs) -> Result<Vec<String>> {
    let mut urls = args.urls.clone();
    if let Some(path) = &args.urls_file {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read URL list {}", path.display()))?;
        urls.extend(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string),
        );
        if urls.is_empty() {
            bail!("{} lists no URLs", path.display());
        }
    }
    if urls.is_empty() {
        urls = config::DEFAULT_SOURCE_URLS.iter().map(|u| u.to_string()).collect();
    }
    Ok(urls)
}

fn run_clean(input: &Path, output: &Path) -> Result<Vec<Paper>> {
    let mut papers = read_input(input)?;
    let empty_before = papers.iter().filter(|p| p.title.trim().is_empty()).count();

    for paper in &mut papers {
        paper.clean_title = sanitize::clean(&paper.title);
    }
    let empty_after = papers.iter().filter(|p| p.clean_title.is_empty()).count();

    for paper in papers.iter().take(5) {
        info!("{:?} -> {:?}", truncate(&paper.title, 60), paper.clean_title);
    }
    info!(
        "Cleaned {} titles ({} empty before, {} empty after)",
        papers.len(),
        empty_before,
        empty_after
    );

    if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    store::write_papers(output, Layout::Cleaned, &papers)?;
    Ok(papers)
}

async fn run_search(data_dir: &Path, rows: &[Paper], args: &HarvestArgs) -> Result<()> {
    if rows.is_empty() {
        bail!("No papers to search");
    }
    let resolver = build_resolver(args)?;
    let harvester = Harvester::new(harvest_config(data_dir, args)?, resolver)?;

    info!("==== Search started at {} ====", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    info!("{} papers in input", rows.len());
    let stats = harvester.run(rows).await?;
    println!(
        "Resolved {} papers ({} skipped, {} failed) into {} new checkpoint files",
        stats.resolved, stats.skipped, stats.failed, stats.chunks_written
    );

    let (_, report) = merge::merge(data_dir)?;
    print_merge(&report);
    info!("==== Search finished at {} ====", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    Ok(())
}

async fn run_analyze(data_dir: &Path, args: AnalyzeArgs) -> Result<()> {
    let Some(api_key) = args.api_key.filter(|k| !k.is_empty()) else {
        bail!("An API key is required: pass --api-key or set DEEPSEEK_API_KEY");
    };

    let input = args.input.unwrap_or_else(|| {
        let merged = data_dir.join(store::MERGED_FILE);
        if merged.exists() {
            merged
        } else {
            data_dir.join(store::CLEANED_FILE)
        }
    });
    let output = args.output.unwrap_or_else(|| data_dir.join(store::ANALYZED_FILE));

    let mut papers = read_input(&input)?;
    info!("Read {} papers from {}", papers.len(), input.display());
    if let Some(n) = args.sample.filter(|n| *n > 0) {
        papers = analyze::sample(papers, n);
        info!("Analysing a random sample of {} papers", papers.len());
    }

    let mut chat = ChatConfig::new(api_key);
    if let Some(topic) = args.topic {
        chat.topic = topic;
    }
    if let Some(endpoint) = args.endpoint {
        chat.endpoint = endpoint;
    }
    let analyst = ChatAnalyst::new(chat)?;
    let papers = analyze::analyze_papers(&analyst, papers, Duration::from_secs(1)).await;

    if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    store::write_papers(&output, Layout::Analyzed, &papers)?;
    println!("Saved {} analysed papers to {}", papers.len(), output.display());

    let high: Vec<&Paper> = papers.iter().filter(|p| analyze::is_high_relevance(p)).collect();
    println!("\n--- High relevance ({}) ---", high.len());
    for p in high {
        let title = if p.clean_title.is_empty() { &p.title } else { &p.clean_title };
        println!("  {}", truncate(title, 80));
        println!("    {}", p.relevance);
    }
    Ok(())
}

// ── Helpers ──

fn read_input(path: &Path) -> Result<Vec<Paper>> {
    if !path.exists() {
        bail!("Input file {} not found; run the previous stage first", path.display());
    }
    store::read_papers(path)
}

fn harvest_config(data_dir: &Path, args: &HarvestArgs) -> Result<HarvestConfig> {
    let mut config = HarvestConfig::new(data_dir);
    if let Some(n) = args.chunk_size {
        config.chunk_size = n;
    }
    if let Some(s) = args.delay_min {
        config.delay_min = seconds("delay-min", s)?;
    }
    if let Some(s) = args.delay_max {
        config.delay_max = seconds("delay-max", s)?;
    }
    Ok(config)
}

fn seconds(name: &str, secs: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) => Ok(d),
        Err(e) => bail!("--{} must be a finite, non-negative number of seconds (got {}): {}", name, secs, e),
    }
}

fn build_resolver(args: &HarvestArgs) -> Result<Resolver<HttpSearch>> {
    let mut search = SearchConfig::default();
    if let Some(endpoint) = &args.endpoint {
        search.endpoint = endpoint.clone();
    }
    let mut retry = RetryPolicy::default();
    if let Some(n) = args.retries {
        if n == 0 {
            bail!("retries must be at least 1");
        }
        retry.attempts = n;
    }
    Resolver::new(HttpSearch::new(&search)?, &search, retry)
}

fn print_merge(report: &merge::MergeReport) {
    println!(
        "Merged {} papers from {} checkpoint files into {}",
        report.rows,
        report.files_read,
        report.output.display()
    );
    if report.files_skipped > 0 {
        println!("Skipped {} unreadable checkpoint files", report.files_skipped);
    }
    println!("Found arXiv links for {}/{} papers", report.found, report.rows);
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harvest_args(cli: Cli) -> HarvestArgs {
        match cli.command {
            Commands::Search { harvest, .. } => harvest,
            _ => panic!("expected the search command"),
        }
    }

    #[test]
    fn delay_flags_override_defaults() {
        let cli = Cli::try_parse_from(["conf_papers", "search", "--delay-min", "0.5", "--delay-max", "2"]).unwrap();
        let config = harvest_config(Path::new("data"), &harvest_args(cli)).unwrap();
        assert_eq!(config.delay_min, Duration::from_millis(500));
        assert_eq!(config.delay_max, Duration::from_secs(2));
        assert_eq!(config.chunk_size, 5);
    }

    #[test]
    fn unrepresentable_delays_are_rejected() {
        for bad in ["inf", "NaN", "-1", "1e300"] {
            let flag = format!("--delay-max={}", bad);
            let cli = Cli::try_parse_from(["conf_papers", "search", flag.as_str()]).unwrap();
            let err = harvest_config(Path::new("data"), &harvest_args(cli));
            assert!(err.is_err(), "accepted --delay-max {}", bad);
        }
    }

    #[test]
    fn empty_pages_get_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let pages = vec![
            fetch::PageRecords {
                url: "https://a.example/".into(),
                papers: vec![Paper::new("One"), Paper::new("Two")],
                rendered: false,
            },
            fetch::PageRecords {
                url: "https://b.example/".into(),
                papers: Vec::new(),
                rendered: false,
            },
            fetch::PageRecords {
                url: "https://c.example/".into(),
                papers: vec![Paper::new("Three")],
                rendered: true,
            },
        ];

        let all = save_pages(dir.path(), pages).unwrap();

        assert_eq!(all.len(), 3);
        assert!(store::page_path(dir.path(), 1).exists());
        assert!(!store::page_path(dir.path(), 2).exists());
        let third = store::read_papers(&store::page_path(dir.path(), 3)).unwrap();
        assert_eq!(third[0].title, "Three");
    }
}
