//! certscore: fetch HTTPS certificate chains and score them against root programs.

use anyhow::{Context, Result};
use certscore_lib::trust::StoreSummary;
use certscore_lib::{
    validate_optional, AppContext, BatchFile, BatchUrlParser, CertscoreConfig, Link,
    OrchestratorError, Submission, SubmissionReport,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Exit code when at least one URL in a submission failed.
const EXIT_PARTIAL_FAILURE: i32 = 2;

#[derive(Parser)]
#[command(
    name = "certscore",
    about = "Score the TLS certificate chains of HTTPS endpoints against several root programs",
    long_about = "certscore connects to each HTTPS URL, captures the certificate chain the\n\
                  server presents, and scores it independently against the Microsoft,\n\
                  Chrome and Mozilla root programs (or the trust stores named in the\n\
                  config file). Every endpoint whose chain was fetched is recorded.\n\n\
                  Scores: 0 untrusted, 1 partially trusted, 2 trusted, 3 trusted and\n\
                  clean under the strict profile. Set RUST_LOG for diagnostics.",
    after_help = "EXAMPLES:\n\
                  \n  certscore submit --url https://example.com\
                  \n  certscore submit --file urls.txt --workers 16 --deadline 5m\
                  \n  certscore submit --url https://example.com --json\
                  \n  certscore list\
                  \n  certscore clear\
                  \n  certscore --config certscore.toml stores"
)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, value_name = "FILE", env = "CERTSCORE_CONFIG")]
    config: Option<PathBuf>,
    /// Link store file, or ":memory:" for a throwaway store (overrides config)
    #[arg(long, global = true, value_name = "FILE")]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, score and record one URL and/or a file of URLs (exit 2 = some failed)
    #[command(after_help = "FILE must be a .txt file with one https:// URL per line.\n\
                      \nDURATION FORMAT:\n\
                      \n  Plain numbers are treated as seconds. You can also use humantime\
                      \n  notation: 500ms, 10s, 2m, 1h30m.\
                      \n\nEXAMPLES:\n\
                      \n  certscore submit --url https://example.com\
                      \n  certscore submit --file urls.txt --timeout 5s\
                      \n  certscore submit --url https://a.example --file more.txt --json")]
    Submit {
        /// A single https:// URL
        #[arg(long)]
        url: Option<String>,
        /// Text file with one URL per line
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,
        /// Output the full report as JSON
        #[arg(long)]
        json: bool,
        /// Per-URL fetch timeout
        #[arg(long, value_name = "DUR", value_parser = parse_duration)]
        timeout: Option<Duration>,
        /// Bound on the whole submission
        #[arg(long, value_name = "DUR", value_parser = parse_duration)]
        deadline: Option<Duration>,
        /// Maximum concurrent fetches
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
        workers: Option<u16>,
    },
    /// List recorded links
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Delete every recorded link
    Clear,
    /// Show the configured trust stores and how many roots each loaded
    Stores {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

/// Parse a duration string using humantime format.
///
/// Plain integers are treated as seconds (e.g., `"30"` = 30 seconds).
fn parse_duration(s: &str) -> Result<Duration> {
    let d = if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
        Duration::from_secs(s.parse().context("Invalid duration value")?)
    } else {
        humantime::parse_duration(s).with_context(|| format!("Invalid duration: '{s}'"))?
    };
    if d.is_zero() {
        anyhow::bail!("Duration must be greater than zero");
    }
    Ok(d)
}

/// Warn by default; `RUST_LOG` takes precedence. Logs go to stderr so JSON
/// on stdout stays clean.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<CertscoreConfig> {
    let mut config = match &cli.config {
        Some(path) => CertscoreConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => CertscoreConfig::default(),
    };
    if let Some(store) = &cli.store {
        config.store_path = store.clone();
    }
    tracing::debug!(
        store = %config.store_path.display(),
        workers = config.max_workers,
        trust_stores = config.programs().len(),
        "configuration loaded"
    );
    Ok(config)
}

/// Media type as an upload form would declare it, from the file extension.
fn media_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

fn read_batch_file(path: &Path) -> Result<BatchFile> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(BatchFile::new(name, media_type_for(path), bytes))
}

fn build_submission(
    url: Option<&str>,
    file: Option<&Path>,
    config: &CertscoreConfig,
) -> Result<Submission> {
    let url = validate_optional(url)?;
    let batch = match file {
        Some(path) => {
            let batch = read_batch_file(path)?;
            Some(BatchUrlParser::new(config.batch_limits()).parse(&batch)?)
        }
        None => None,
    };
    if url.is_none() && batch.is_none() {
        anyhow::bail!(certscore_lib::ValidationError::EmptySubmission);
    }
    Ok(Submission { url, batch })
}

fn print_report(report: &SubmissionReport) {
    for outcome in &report.outcomes {
        println!("{}", outcome.url);
        println!("  leaf:   {}", outcome.certificate.subject);
        println!("  issuer: {}", outcome.certificate.issuer);
        println!("  expiry: {}", outcome.certificate.not_after);
        for (store, eval) in &outcome.verdicts {
            let score = eval
                .score
                .map_or_else(|| "-".to_string(), |s| s.to_string());
            println!(
                "  {:<16} {:<18} score {}",
                store.display_name(),
                eval.verdict.label(),
                score
            );
            for finding in &eval.findings {
                println!("    - {}", finding);
            }
        }
    }
    for failure in &report.failures {
        eprintln!("{}: FAIL ({})", failure.url, failure.message);
    }
    println!(
        "{} accepted, {} failed in {}ms",
        report.accepted,
        report.failures.len(),
        report.elapsed_ms
    );
}

fn print_links(links: &[Link]) {
    if links.is_empty() {
        println!("No links recorded.");
        return;
    }
    for link in links {
        let created = link
            .created_at
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        println!("{}  {}  {}", link.id, created, link.url);
    }
}

fn print_stores(stores: &[StoreSummary]) {
    for store in stores {
        match (store.roots, &store.error) {
            (Some(n), _) => println!("{:<16} {:>5} roots", store.name, n),
            (None, Some(e)) => println!("{:<16} unavailable ({})", store.name, e),
            (None, None) => println!("{:<16} unavailable", store.name),
        }
        if store.policy.require_sct {
            println!("{:<16} requires embedded SCTs", "");
        }
    }
}

/// Command-line flags win over the config file.
fn apply_submit_overrides(
    config: &mut CertscoreConfig,
    timeout: Option<Duration>,
    deadline: Option<Duration>,
    workers: Option<u16>,
) {
    if let Some(t) = timeout {
        config.fetch_timeout = t;
    }
    if let Some(d) = deadline {
        config.submission_deadline = d;
    }
    if let Some(n) = workers {
        config.max_workers = usize::from(n);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();
    let mut config = load_config(&cli)?;

    match &cli.command {
        Commands::Submit {
            url,
            file,
            json,
            timeout,
            deadline,
            workers,
        } => {
            apply_submit_overrides(&mut config, *timeout, *deadline, *workers);
            let submission = build_submission(url.as_deref(), file.as_deref(), &config)?;

            let ctx = AppContext::new(config).context("Failed to initialize")?;
            let report = match ctx.orchestrator().submit(submission).await {
                Ok(report) => report,
                Err(OrchestratorError::AllFailed { failures }) => {
                    for failure in &failures {
                        eprintln!("{}: FAIL ({})", failure.url, failure.message);
                    }
                    std::process::exit(EXIT_PARTIAL_FAILURE);
                }
                Err(e) => return Err(e.into()),
            };

            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            if !report.is_complete_success() {
                std::process::exit(EXIT_PARTIAL_FAILURE);
            }
        }
        Commands::List { json } => {
            let store = certscore_lib::config::open_store(&config.store_path)?;
            let links = store.list_all()?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&links)?);
            } else {
                print_links(&links);
            }
        }
        Commands::Clear => {
            let store = certscore_lib::config::open_store(&config.store_path)?;
            let deleted = store.delete_all()?;
            println!("Deleted {} link(s).", deleted);
        }
        Commands::Stores { json } => {
            let evaluator = certscore_lib::TrustStoreEvaluator::new(&config.programs());
            let summaries = evaluator.store_summaries();
            if *json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                print_stores(&summaries);
            }
        }
    }

    Ok(())
}
