//! CLI binary for judgment-analyzer.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `AnalysisConfig` and prints JSON results.

use anyhow::{Context, Result};
use clap::Parser;
use judgment_analyzer::analyze::write_json_atomic;
use judgment_analyzer::pipeline::input::load_input;
use judgment_analyzer::{
    extract_only, inspect, AnalysisConfig, AnalysisProgressCallback, Analyzer, ExtractionMethod, JudgmentAnalysis,
    ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while extracting, then a bar over the analysis steps.
struct CliProgressCallback {
    bar: ProgressBar,
    step_started: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening judgment…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            step_started: Mutex::new(None),
        })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>2}/{len} steps  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Analysing");
        self.bar.reset_eta();
    }

    fn step_elapsed(&self) -> String {
        let secs = self
            .step_started
            .lock()
            .ok()
            .and_then(|mut started| started.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        dim(&format!("{secs:.1}s"))
    }
}

impl AnalysisProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self) {
        self.bar.set_prefix("Extracting");
        self.bar.set_message("reading text layer…");
    }

    fn on_extraction_complete(&self, total_pages: usize, method: ExtractionMethod) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracted {total_pages} pages ({})", method.as_str()))
        ));
    }

    fn on_chunking_complete(&self, total_chunks: usize) {
        self.bar.println(format!("{} {}", cyan("◆"), bold(&format!("{total_chunks} chunks"))));
    }

    fn on_step_start(&self, step: &str, index: usize, total: usize) {
        if index == 0 {
            self.activate_bar(total);
        }
        if let Ok(mut started) = self.step_started.lock() {
            *started = Some(Instant::now());
        }
        self.bar.set_message(step.to_string());
    }

    fn on_step_retry(&self, step: &str, attempt: u32) {
        self.bar.println(format!("  {} {:<11} retry, attempt {}", cyan("↻"), step, attempt));
    }

    fn on_step_complete(&self, step: &str, index: usize, total: usize, tokens_used: u64) {
        self.bar.println(format!(
            "  {} Step {:>2}/{:<2} {:<11} {}  {}",
            green("✓"),
            index + 1,
            total,
            step,
            dim(&format!("{tokens_used:>6} tokens")),
            self.step_elapsed(),
        ));
        self.bar.inc(1);
        if index + 1 == total {
            self.bar.finish_and_clear();
        }
    }

    fn on_step_error(&self, step: &str, index: usize, total: usize, error: &str) {
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Step {:>2}/{:<2} {:<11} {}  {}",
            red("✗"),
            index + 1,
            total,
            step,
            red(&msg),
            self.step_elapsed(),
        ));
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Full analysis, JSON on stdout
  judgment-analyze judgment.pdf

  # Write to a file
  judgment-analyze judgment.pdf -o analysis.json

  # No API key: heuristic offline generator
  judgment-analyze --offline judgment.pdf

  # Only the extracted pages, or only the chunks
  judgment-analyze --extract-only judgment.pdf
  judgment-analyze --chunks-only --judgment-id 2019-SC-441 judgment.pdf

  # Page count, document info and text-layer density (no API key needed)
  judgment-analyze --inspect-only judgment.pdf

  # Use a specific model
  judgment-analyze --provider anthropic --model claude-sonnet-4-20250514 judgment.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  JUDGMENT_LLM_PROVIDER   Provider used when --provider is not given
  JUDGMENT_MODEL          Model used together with JUDGMENT_LLM_PROVIDER
  PDFIUM_LIB_PATH         Path to libpdfium, used to rasterise scanned pages
  RUST_LOG                Log filter (default: warn)
"#;

/// Anchored structured analysis of legal judgments.
#[derive(Parser, Debug)]
#[command(
    name = "judgment-analyze",
    version,
    about = "Anchored structured analysis of legal judgment PDFs",
    long_about = "Extract a judgment PDF (digital or scanned), split it into page/paragraph \
anchored chunks and run the metadata → facts → timeline → issues → arguments → ratio → \
obiter → statutes → precedents → summary steps against an LLM or the offline generator.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Judgment id used in chunk ids. Default: the input file stem.
    #[arg(long)]
    judgment_id: Option<String>,

    /// Answer the steps with the deterministic offline generator.
    #[arg(long, env = "JUDGMENT_OFFLINE")]
    offline: bool,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long)]
    provider: Option<String>,

    /// LLM model ID (e.g. gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long)]
    model: Option<String>,

    /// Write JSON to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Stop after extraction and print the pages.
    #[arg(long, conflicts_with = "chunks_only")]
    extract_only: bool,

    /// Stop after chunking and print the chunks.
    #[arg(long)]
    chunks_only: bool,

    /// Print page count, document info and text density only.
    #[arg(long, conflicts_with_all = ["extract_only", "chunks_only"])]
    inspect_only: bool,

    /// Generation attempts per step, including the first.
    #[arg(long, env = "JUDGMENT_MAX_ATTEMPTS", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..=10))]
    max_attempts: u32,

    /// Rendering DPI for scanned pages (72–600).
    #[arg(long, default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Disable progress output.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let show_progress = !cli.no_progress && !cli.verbose;
    let analysing = !(cli.inspect_only || cli.extract_only || cli.chunks_only);
    let progress_cb: Option<ProgressCallback> = if show_progress && analysing {
        let cb = CliProgressCallback::new();
        Some(cb as Arc<dyn AnalysisProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Inspect / extract-only modes ─────────────────────────────────────
    if cli.inspect_only {
        let report = inspect(&cli.input, &config).await.context("Failed to inspect PDF")?;
        return emit(&report, cli.output.as_deref()).await;
    }
    if cli.extract_only {
        let extraction = extract_only(&cli.input, &config).await.context("Extraction failed")?;
        return emit(&extraction, cli.output.as_deref()).await;
    }

    // ── Load input ───────────────────────────────────────────────────────
    let loaded = load_input(&cli.input, config.download_timeout_secs)
        .await
        .with_context(|| format!("Failed to load '{}'", cli.input))?;
    let judgment_id = cli.judgment_id.clone().unwrap_or(loaded.name);

    let analyzer = if cli.offline || cli.chunks_only {
        Analyzer::offline(config)
    } else {
        Analyzer::from_config(config).context("Failed to set up the LLM provider (try --offline)")?
    };

    // ── Chunks-only mode ─────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    if cli.chunks_only {
        let extraction = analyzer.extract(&loaded.bytes, &cancel).await.context("Extraction failed")?;
        let chunking = analyzer.chunk(&judgment_id, &extraction);
        return emit(&chunking, cli.output.as_deref()).await;
    }

    // ── Full analysis ────────────────────────────────────────────────────
    let start = Instant::now();
    let analysis = analyzer
        .analyze_bytes(&judgment_id, &loaded.bytes, &cancel)
        .await
        .context("Analysis failed")?;
    emit(&analysis, cli.output.as_deref()).await?;
    print_summary(&analysis, start.elapsed(), cli.output.as_deref());
    Ok(())
}

/// Map CLI args to `AnalysisConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<AnalysisConfig> {
    let mut builder = AnalysisConfig::builder()
        .max_attempts(cli.max_attempts)
        .ocr_dpi(cli.dpi);
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

/// Pretty JSON to `output` (atomically) or stdout.
async fn emit<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => write_json_atomic(path, value)
            .await
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let json = serde_json::to_string_pretty(value).context("Failed to serialise output")?;
            println!("{json}");
            Ok(())
        }
    }
}

fn print_summary(analysis: &JudgmentAnalysis, elapsed: Duration, output: Option<&Path>) {
    let target = output
        .map(|p| format!("  →  {}", bold(&p.display().to_string())))
        .unwrap_or_default();
    eprintln!(
        "{}  {} steps  {} chunks  {}ms{}",
        green("✔"),
        analysis.analysis.steps.len(),
        analysis.chunking.total_chunks,
        elapsed.as_millis(),
        target,
    );
    let warnings = analysis
        .analysis
        .steps
        .iter()
        .filter(|s| s.validation_warning.is_some())
        .count();
    eprintln!(
        "   {} tokens  /  {} validation warning(s)",
        dim(&analysis.analysis.total_tokens_used.to_string()),
        dim(&warnings.to_string()),
    );
}
