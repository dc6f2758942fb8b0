//! CLI binary for parallex.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ParallexConfig` and prints the ordered document.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use parallex::{
    parallex, BatchGranularity, BatchProgressCallback, OrderedDocument, PageSeparator,
    ParallexConfig, PollPolicy, ProgressCallback,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const MIB: u64 = 1024 * 1024;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar counting pages, advanced a whole job
/// at a time as jobs finish (in any order).
struct CliProgressCallback {
    bar: ProgressBar,
    failed_jobs: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_run_start` reports how many pages there are.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rendering PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            failed_jobs: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total_pages: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Waiting");
        self.bar.set_message("");
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize, total_jobs: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Submitting {total_pages} pages in {total_jobs} batch job(s)…"
            ))
        ));
    }

    fn on_job_submitted(&self, job_id: &str, pages: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            cyan("↑"),
            job_id,
            dim(&format!("{pages} pages"))
        ));
    }

    fn on_job_complete(&self, job_id: &str, pages: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            job_id,
            dim(&format!("{pages} pages"))
        ));
        self.bar.inc(pages as u64);
    }

    fn on_job_error(&self, job_id: &str, error: &str) {
        self.failed_jobs.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), job_id, red(&msg)));
    }

    fn on_run_complete(&self, total_pages: usize, success: bool) {
        self.bar.finish_and_clear();
        if success {
            eprintln!(
                "{} {} pages converted successfully",
                green("✔"),
                bold(&total_pages.to_string())
            );
        } else {
            eprintln!(
                "{} run failed ({} job(s) failed); cleaning up remote files…",
                red("✘"),
                self.failed_jobs.load(Ordering::SeqCst)
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Basic conversion (stdout)
  parallex document.pdf

  # Convert to file
  parallex document.pdf -o output.md

  # One batch job per page, at most 5 in flight
  parallex --per-page -c 5 report.pdf -o report.md

  # Convert from URL
  parallex https://arxiv.org/pdf/1706.03762 -o attention.md

  # JSON output with per-page metadata and stats
  parallex --json document.pdf > output.json

ENVIRONMENT VARIABLES:
  AZURE_OPENAI_ENDPOINT        Azure OpenAI resource endpoint
  AZURE_OPENAI_API_KEY         Azure OpenAI key
  AZURE_OPENAI_API_VERSION     API version (default 2024-10-21)
  AZURE_OPENAI_API_DEPLOYMENT  Batch deployment name (same as --model)
  OPENAI_API_KEY               OpenAI key, used when the Azure pair is unset
  OPENAI_BASE_URL              OpenAI-compatible base URL
  PDFIUM_LIB_PATH              Path to libpdfium or its directory
  RUST_LOG                     Overrides --log-level

NOTES:
  Batch jobs complete within a 24h window; the CLI waits until every job
  finishes. All uploaded and generated remote files are deleted on exit,
  whether the run succeeds or fails.
"#;

/// Convert PDF files and URLs to Markdown through remote batch jobs.
#[derive(Parser, Debug)]
#[command(
    name = "parallex",
    version,
    about = "Convert PDF files and URLs to Markdown through remote batch jobs",
    long_about = "Convert PDF documents (local files or URLs) to Markdown by rendering every \
page, packing the pages into size-bounded batch jobs for an Azure OpenAI or OpenAI batch \
deployment, and reassembling the answers in page order.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write Markdown to this file instead of stdout.
    #[arg(short, long, env = "PARALLEX_OUTPUT")]
    output: Option<PathBuf>,

    /// Batch deployment or model name written into every request.
    #[arg(long, env = "AZURE_OPENAI_API_DEPLOYMENT")]
    model: Option<String>,

    /// Maximum remote operations in flight per phase.
    #[arg(short, long, env = "PARALLEX_CONCURRENCY", default_value_t = 20)]
    concurrency: usize,

    /// Path to a text file containing a custom page prompt.
    #[arg(long, env = "PARALLEX_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Advisory size ceiling of one upload unit, in MiB.
    #[arg(long, env = "PARALLEX_MAX_UNIT_MB", default_value_t = 150)]
    max_unit_mb: u64,

    /// Submit one batch job per page instead of packing pages together.
    #[arg(long, env = "PARALLEX_PER_PAGE")]
    per_page: bool,

    /// Max output tokens per page.
    #[arg(long, env = "PARALLEX_MAX_TOKENS", default_value_t = 2000)]
    max_tokens: u32,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PARALLEX_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PARALLEX_PASSWORD")]
    password: Option<String>,

    /// Page separator: none, hr, comment, or custom string.
    #[arg(long, env = "PARALLEX_SEPARATOR", default_value = "none")]
    separator: String,

    /// Seconds before the first status poll is repeated; grows ×1.5 up to 60s.
    #[arg(long, env = "PARALLEX_POLL_INTERVAL", default_value_t = 10)]
    poll_interval: u64,

    /// Output the ordered document as JSON instead of Markdown.
    #[arg(long, env = "PARALLEX_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PARALLEX_NO_PROGRESS")]
    no_progress: bool,

    /// Log level when RUST_LOG is unset: error, warn, info, debug, trace.
    #[arg(long, env = "PARALLEX_LOG_LEVEL", default_value = "error")]
    log_level: String,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PARALLEX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PARALLEX_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PARALLEX_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        cli.log_level.as_str()
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Run ──────────────────────────────────────────────────────────────
    let document = parallex(&cli.input, &config)
        .await
        .context("Conversion failed")?;

    let rendered = if cli.json {
        let mut json =
            serde_json::to_string_pretty(&document).context("Failed to serialise output")?;
        json.push('\n');
        json
    } else {
        document.to_markdown(&config.page_separator)
    };

    match cli.output {
        Some(ref path) => {
            write_atomically(path, &rendered).await?;
            if !cli.quiet {
                print_summary(&document, Some(path));
            }
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(rendered.as_bytes())
                .context("Failed to write to stdout")?;
            if !cli.quiet && !cli.json {
                print_summary(&document, None);
            }
        }
    }

    Ok(())
}

/// Map CLI args to `ParallexConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ParallexConfig> {
    let default_poll = PollPolicy::default();
    let initial_poll = Duration::from_secs(cli.poll_interval);

    let mut builder = ParallexConfig::builder()
        .concurrency(cli.concurrency)
        .max_unit_bytes(cli.max_unit_mb * MIB)
        .upload_limit_bytes(ParallexConfig::default().upload_limit_bytes.max(cli.max_unit_mb * MIB))
        .max_tokens(cli.max_tokens)
        .dpi(cli.dpi)
        .download_timeout_secs(cli.download_timeout)
        .page_separator(parse_separator(&cli.separator))
        .poll(PollPolicy {
            initial_interval: initial_poll,
            max_interval: default_poll.max_interval.max(initial_poll),
            ..default_poll
        });

    if cli.per_page {
        builder = builder.granularity(BatchGranularity::PerPage);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(ref path) = cli.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.prompt_text(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--separator` string into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "none" => PageSeparator::None,
        "hr" | "---" => PageSeparator::HorizontalRule,
        "comment" => PageSeparator::Comment,
        _ => PageSeparator::Custom(s.to_string()),
    }
}

/// Write to a sibling temp file, then rename over `path`.
async fn write_atomically(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to move output into {}", path.display()))?;
    Ok(())
}

fn print_summary(document: &OrderedDocument, path: Option<&Path>) {
    let stats = &document.stats;
    let target = path
        .map(|p| format!("  →  {}", bold(&p.display().to_string())))
        .unwrap_or_default();
    eprintln!(
        "{}  {} pages  {} job(s)  {}ms{}",
        green("✔"),
        stats.total_pages,
        stats.upload_units,
        stats.total_duration_ms,
        target,
    );
    eprintln!(
        "   {} tokens in  /  {} tokens out  —  trace {}",
        dim(&stats.total_input_tokens.to_string()),
        dim(&stats.total_output_tokens.to_string()),
        document.trace_id,
    );
}
