//! CLI binary for casedx.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractConfig` / `DiagnosisConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use casedx::{
    extract_cases, run_diagnosis, CaseDxError, CaseId, DiagnosisConfig, ExtractConfig,
    LlmVisionClient, ProgressCallback, Provider, RunProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

/// Terminal progress callback: one bar over all case slots, one log line per
/// finished or skipped case.
struct CliProgressCallback {
    bar: ProgressBar,
    /// What a slot is called in the bar ("cases" or "samples").
    unit: &'static str,
    /// Start of the case currently in flight.
    started: Mutex<Option<Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new(unit: &'static str) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            unit,
            started: Mutex::new(None),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed(&self) -> String {
        let secs = self
            .started
            .lock()
            .ok()
            .and_then(|mut s| s.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        dim(&format!("{secs:.1}s"))
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_cases: usize) {
        let style = ProgressStyle::with_template(&format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  \
             [{{bar:42.green/238}}] {{pos:>4}}/{{len}} {}  \
             ⏱ {{elapsed_precise}}  ETA {{eta_precise}}  {{msg}}",
            self.unit
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_cases as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Working");
        self.bar.reset_eta();
    }

    fn on_case_start(&self, case: CaseId, label: &str) {
        if let Ok(mut s) = self.started.lock() {
            *s = Some(Instant::now());
        }
        self.bar.set_message(format!("{case} {}", dim(label)));
    }

    fn on_case_skipped(&self, case: CaseId, reason: &str) {
        self.bar
            .println(format!("  {} {:<10} {}", dim("·"), case, dim(reason)));
        self.bar.inc(1);
    }

    fn on_case_complete(&self, case: CaseId, bytes: usize) {
        self.bar.println(format!(
            "  {} {:<10} {:<12} {}",
            green("✓"),
            case,
            dim(&format!("{bytes:>6} bytes")),
            self.elapsed(),
        ));
        self.bar.inc(1);
    }

    fn on_case_error(&self, case: CaseId, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<10} {}  {}",
            red("✗"),
            case,
            red(&msg),
            self.elapsed(),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_cases: usize, succeeded: usize) {
        self.bar.finish_and_clear();
        let errors = self.errors.load(Ordering::SeqCst);
        let mark = if errors == 0 { green("✔") } else { yellow("⚠") };
        eprintln!(
            "{} {}/{} {} done  ({} failed)",
            mark,
            bold(&succeeded.to_string()),
            total_cases,
            self.unit,
            if errors == 0 {
                errors.to_string()
            } else {
                red(&errors.to_string())
            },
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract every case PDF in ./pdfs into ./output
  casedx extract

  # Extract a subset
  casedx extract --input pdfs --output output --start 1 --end 20

  # Query GPT-4o: 3 temperatures × 5 tries × cases 1-318
  casedx diagnose --provider openai

  # One quick sample with Gemini
  casedx diagnose --provider gemini --temperatures 0 --tries 1 --start 1 --end 5

  # Machine-readable summary
  casedx diagnose --provider openai --json > run.json

RESULT LAYOUT:
  <results>/<prefix>_result/<prefix>_result_temp_<t>_try<i>/case-<n>.txt
  prefix: gpt4v (openai), gemini (gemini); t: 0, 0_5, 1
  Existing result files are never overwritten: rerunning resumes the batch.
  Cases with no accepted answer are listed in <results>/process_log.txt.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  GEMINI_API_KEY          Google Gemini API key
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  RUST_LOG                Override the log filter (e.g. casedx=debug)
"#;

/// Extract medical-case PDFs and collect differential diagnoses from Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "casedx",
    version,
    about = "Extract medical-case PDFs and collect differential diagnoses from Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Load environment variables (API keys) from this file.
    #[arg(long, global = true, env = "CASEDX_ENV_FILE")]
    env_file: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "CASEDX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "CASEDX_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "CASEDX_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render pages, save embedded images and pull history/legend text from case PDFs.
    Extract(ExtractArgs),
    /// Query a vision model for differential diagnoses of extracted cases.
    Diagnose(DiagnoseArgs),
}

#[derive(Args, Debug, Clone, Copy)]
struct RangeArgs {
    /// First case number.
    #[arg(long, env = "CASEDX_START", default_value_t = 1)]
    start: u32,

    /// Last case number (inclusive).
    #[arg(long, env = "CASEDX_END", default_value_t = 318)]
    end: u32,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Folder holding case-<n>.pdf.
    #[arg(short, long, env = "CASEDX_INPUT", default_value = "pdfs")]
    input: PathBuf,

    /// Folder receiving case-<n>/.
    #[arg(short, long, env = "CASEDX_OUTPUT", default_value = "output")]
    output: PathBuf,

    #[command(flatten)]
    range: RangeArgs,

    /// Page render scale.
    #[arg(long, env = "CASEDX_RENDER_SCALE", default_value_t = 0.9)]
    scale: f32,

    /// JPEG quality of page renders (1-100).
    #[arg(long, env = "CASEDX_JPEG_QUALITY", default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,
}

#[derive(Args, Debug)]
struct DiagnoseArgs {
    /// Vision model provider.
    #[arg(long, env = "CASEDX_PROVIDER", value_enum)]
    provider: ProviderArg,

    /// Model ID (default: gpt-4o for openai, gemini-1.5-pro for gemini).
    #[arg(long, env = "CASEDX_MODEL")]
    model: Option<String>,

    /// Comma-separated sampling temperatures.
    #[arg(long, env = "CASEDX_TEMPERATURES", default_value = "0,0.5,1",
          value_parser = parse_temperatures)]
    temperatures: Temperatures,

    /// Independent samples per temperature.
    #[arg(long, env = "CASEDX_TRIES", default_value_t = 5)]
    tries: u32,

    #[command(flatten)]
    range: RangeArgs,

    /// Folder holding the extracted case-<n>/ folders.
    #[arg(long, env = "CASEDX_CASES", default_value = "output")]
    cases: PathBuf,

    /// Folder under which <prefix>_result/ is created.
    #[arg(long, env = "CASEDX_RESULTS", default_value = ".")]
    results: PathBuf,

    /// Override the result folder prefix.
    #[arg(long, env = "CASEDX_PREFIX")]
    prefix: Option<String>,

    /// Provider calls per case before giving up.
    #[arg(long, env = "CASEDX_MAX_ATTEMPTS", default_value_t = 10)]
    max_attempts: u32,

    /// Delay before the second attempt in ms, doubled after each further one.
    #[arg(long, env = "CASEDX_RETRY_BACKOFF_MS", default_value_t = 0)]
    retry_backoff_ms: u64,

    /// Max output tokens (default: 1024 for openai, provider default for gemini).
    #[arg(long, env = "CASEDX_MAX_TOKENS")]
    max_tokens: Option<usize>,

    /// Per-call timeout in seconds.
    #[arg(long, env = "CASEDX_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Print the run summary as JSON on stdout.
    #[arg(long, env = "CASEDX_JSON")]
    json: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ProviderArg {
    Openai,
    Gemini,
}

impl From<ProviderArg> for Provider {
    fn from(v: ProviderArg) -> Self {
        match v {
            ProviderArg::Openai => Provider::OpenAi,
            ProviderArg::Gemini => Provider::Gemini,
        }
    }
}

#[derive(Debug, Clone)]
struct Temperatures(Vec<f32>);

/// Parse `--temperatures` ("0,0.5,1").
fn parse_temperatures(s: &str) -> Result<Temperatures, String> {
    s.split(',')
        .map(|t| {
            t.trim()
                .parse::<f32>()
                .map_err(|e| format!("invalid temperature '{}': {e}", t.trim()))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Temperatures)
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", red("error:"), e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // ── Environment ──────────────────────────────────────────────────────
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("Failed to load env file {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let json = matches!(&cli.command, Command::Diagnose(a) if a.json);
    let show_progress = !cli.quiet && !cli.no_progress && !json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Extract(ref args) => extract(args, show_progress, cli.quiet).await,
        Command::Diagnose(ref args) => diagnose(args, show_progress, cli.quiet).await,
    }
}

async fn extract(args: &ExtractArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let mut builder = ExtractConfig::builder()
        .input_dir(&args.input)
        .output_dir(&args.output)
        .cases(args.range.start, args.range.end)
        .render_scale(args.scale)
        .jpeg_quality(args.jpeg_quality);
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new("cases");
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid configuration")?;

    let summary = extract_cases(&config).await.context("Extraction failed")?;

    if !quiet && !show_progress {
        eprintln!(
            "Extracted {} cases in {}ms ({} missing, {} failed)",
            summary.extracted.len(),
            summary.total_duration_ms,
            summary.missing.len(),
            summary.failed.len()
        );
    }
    Ok(())
}

async fn diagnose(args: &DiagnoseArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let provider: Provider = args.provider.into();
    let mut builder = DiagnosisConfig::builder(provider)
        .cases_dir(&args.cases)
        .results_root(&args.results)
        .cases(args.range.start, args.range.end)
        .temperatures(args.temperatures.0.clone())
        .tries(args.tries)
        .max_attempts(args.max_attempts)
        .retry_backoff_ms(args.retry_backoff_ms)
        .api_timeout_secs(args.api_timeout);
    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref prefix) = args.prefix {
        builder = builder.result_prefix(prefix);
    }
    if args.max_tokens.is_some() {
        builder = builder.max_tokens(args.max_tokens);
    }
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new("samples");
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid configuration")?;

    let client = LlmVisionClient::from_config(&config)?;

    let summary = match run_diagnosis(&client, &config).await {
        Ok(summary) => summary,
        Err(e @ CaseDxError::QuotaExceeded { .. }) => {
            return Err(anyhow::Error::new(e).context("Run aborted; rerun later to resume"));
        }
        Err(e) => return Err(anyhow::Error::new(e).context("Diagnosis run failed")),
    };

    if args.json {
        let json = serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?;
        println!("{json}");
    } else if !quiet {
        eprintln!(
            "{}  {} saved, {} already present, {} missing input, {} failed  {}ms",
            if summary.failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&summary.saved.to_string()),
            summary.skipped_existing,
            summary.skipped_missing,
            summary.failed,
            summary.total_duration_ms,
        );
        eprintln!(
            "   {} tokens in  /  {} tokens out",
            dim(&summary.total_input_tokens.to_string()),
            dim(&summary.total_output_tokens.to_string()),
        );
    }
    Ok(())
}
