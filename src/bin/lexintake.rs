//! CLI binary for lexintake.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `AnalysisConfig`, runs one analysis and prints the case record as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use lexintake::{
    AnalysisConfig, AnalysisInputs, Analyzer, CanonicalRecord, ClientContext, NoopObserver,
    PipelineObserver, PipelineStage, ResponseFormat,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

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

// ── Spinner observer ─────────────────────────────────────────────────────────

/// Renders pipeline stages on a single spinner line and logs failed
/// attempts above it.
struct SpinnerObserver {
    bar: ProgressBar,
}

impl SpinnerObserver {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Analysing");
        bar.set_message("starting…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }
}

impl PipelineObserver for SpinnerObserver {
    fn on_stage(&self, stage: PipelineStage) {
        if stage.is_terminal() {
            self.bar.finish_and_clear();
        } else {
            self.bar.set_message(format!("{stage}…"));
        }
    }

    fn on_attempt_failed(&self, attempt: u32, max_attempts: u32, error: &str, will_retry: bool) {
        let msg: String = if error.chars().count() > 80 {
            format!("{}…", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        let tail = if will_retry { "retrying" } else { "giving up" };
        self.bar.println(format!(
            "  {} attempt {attempt}/{max_attempts}  {}  {}",
            red("✗"),
            red(&msg),
            dim(tail),
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyse a scanned report (JSON on stdout)
  lexintake tutanak.pdf

  # With photos and client context, written to a file
  lexintake tutanak.pdf --photo front.jpg --photo rear.jpg \
      --client-name "Ayşe Yılmaz" --notes "Hit from behind at a red light" \
      -o case.json

  # Ask for a JSON object instead of the tagged format
  lexintake --format structured tutanak.jpg

  # Offline run with canned output
  lexintake --mock tutanak.pdf

  # Report from a URL
  lexintake https://example.com/files/tutanak.pdf

SUPPORTED INPUTS:
  Report:  .pdf, .jpg, .jpeg, .png, .gif, .bmp, .tif, .tiff
  Photos:  any of the image formats above (at most 5 are sent)

EXIT STATUS:
  0 whenever a record was written, including degraded records
  (extraction_confidence = 0.0). Non-zero only for usage or I/O errors.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium when it is not installed system-wide
"#;

/// Extract a structured case record from a traffic accident report.
#[derive(Parser, Debug)]
#[command(
    name = "lexintake",
    version,
    about = "Extract a structured case record from a traffic accident report using Vision LLMs",
    long_about = "Read a scanned accident report (PDF or image, local file or URL) plus optional \
photos, ask a Vision Language Model for the case facts and print one JSON case record. \
The record is always complete: when anything fails, a degraded record with \
extraction_confidence = 0.0 explains why.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Report: local file path or HTTP/HTTPS URL.
    input: String,

    /// Ancillary photo (path or URL). Repeat for several.
    #[arg(long = "photo", value_name = "PHOTO")]
    photos: Vec<String>,

    /// Client name passed to the model as context.
    #[arg(long, env = "LEXINTAKE_CLIENT_NAME")]
    client_name: Option<String>,

    /// Free-text notes passed to the model as context.
    #[arg(long, env = "LEXINTAKE_NOTES")]
    notes: Option<String>,

    /// Session identifier stamped on the record. Default: random UUID.
    #[arg(long, env = "LEXINTAKE_SESSION_ID")]
    session_id: Option<String>,

    /// Write the JSON record to this file instead of stdout.
    #[arg(short, long, env = "LEXINTAKE_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Reply format requested from the model.
    #[arg(long, env = "LEXINTAKE_FORMAT", value_enum, default_value = "tagged")]
    format: FormatArg,

    /// Serve canned output instead of calling a model.
    #[arg(long, env = "LEXINTAKE_MOCK")]
    mock: bool,

    /// Path to a text file replacing the built-in instructions.
    #[arg(long, env = "LEXINTAKE_INSTRUCTIONS")]
    instructions: Option<PathBuf>,

    /// Max LLM output tokens.
    #[arg(long, env = "LEXINTAKE_MAX_TOKENS", default_value_t = 8000)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "LEXINTAKE_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Total model call attempts (transport failures only).
    #[arg(long, env = "LEXINTAKE_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Base retry delay in milliseconds; doubles per attempt.
    #[arg(long, env = "LEXINTAKE_RETRY_BACKOFF_MS", default_value_t = 1000)]
    retry_backoff_ms: u64,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "LEXINTAKE_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "LEXINTAKE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Compact JSON instead of pretty-printed.
    #[arg(long)]
    compact: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "LEXINTAKE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "LEXINTAKE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "LEXINTAKE_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum FormatArg {
    Tagged,
    Structured,
}

impl From<FormatArg> for ResponseFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Tagged => ResponseFormat::Tagged,
            FormatArg::Structured => ResponseFormat::Structured,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner carries the feedback; library INFO logs would tear it.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    // ── Build config ─────────────────────────────────────────────────────
    let config = build_config(&cli).await?;
    let analyzer = Analyzer::new(config);

    let inputs = AnalysisInputs {
        session_id: cli
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        report: cli.input.clone(),
        photos: cli.photos.clone(),
        context: ClientContext {
            client_name: cli.client_name.clone(),
            notes: cli.notes.clone(),
        },
    };

    // ── Run analysis ─────────────────────────────────────────────────────
    let record = if show_progress {
        let observer = SpinnerObserver::new();
        analyzer.analyze_inputs(&inputs, &observer).await
    } else {
        analyzer.analyze_inputs(&inputs, &NoopObserver).await
    };

    let json = if cli.compact {
        serde_json::to_string(&record)
    } else {
        serde_json::to_string_pretty(&record)
    }
    .context("Failed to serialise record")?;

    match cli.output {
        Some(ref path) => {
            write_atomic(path, &json).await?;
            if !cli.quiet {
                eprintln!("{}  →  {}", summary(&record), bold(&path.display().to_string()));
            }
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            writeln!(handle, "{json}").context("Failed to write to stdout")?;
            if !cli.quiet {
                eprintln!("{}", summary(&record));
            }
        }
    }

    Ok(())
}

/// Map CLI args to `AnalysisConfig`.
async fn build_config(cli: &Cli) -> Result<AnalysisConfig> {
    let mut builder = AnalysisConfig::builder()
        .mock(cli.mock)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .max_attempts(cli.max_attempts)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .response_format(cli.format.clone().into());

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref path) = cli.instructions {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read instructions from {:?}", path))?;
        builder = builder.instructions(text);
    }

    builder.build().context("Invalid configuration")
}

/// One-line outcome for stderr.
fn summary(record: &CanonicalRecord) -> String {
    if record.is_degraded() {
        let reason = record
            .data_inconsistencies
            .first()
            .map(String::as_str)
            .unwrap_or("unknown failure");
        format!("{}  degraded record  {}", red("✘"), dim(reason))
    } else {
        format!(
            "{}  session {}  confidence {:.2}",
            green("✔"),
            record.session_id,
            record.extraction_confidence
        )
    }
}

/// Atomic write: temp file next to the target, then rename.
async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
