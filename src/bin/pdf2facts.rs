//! CLI binary for edgequake-pdf2facts.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, runs one extraction session and prints the result.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2facts::{
    CacheEntry, CategoryTable, CoordinatorState, CostBudget, Document, ExtractionConfig,
    ExtractionProgressCallback, ExtractionSession, OcrConfig, ProgressCallback, SelectionPlan,
    StubVisionClient, TokenPrice,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: [&str; 11] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while text is extracted, then one bar per vision pass. Page
/// events arrive out of order within a pass.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Reading");
        bar.set_message("extracting page text…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_text_extracted(&self, total_pages: usize, pages_with_text: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{pages_with_text}/{total_pages} pages have extractable text"))
        ));
    }

    fn on_selection(&self, selected: &[usize], used_fallback: bool) {
        let how = if used_fallback { " (structural fallback)" } else { "" };
        self.bar.println(format!(
            "{} Strategic pages {:?}{}",
            cyan("◆"),
            selected,
            dim(how)
        ));
    }

    fn on_pass_start(&self, pass: usize, pages: &[usize]) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>2}/{len} pages  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&TICKS);
        self.bar.set_style(style);
        self.bar.set_length(pages.len() as u64);
        self.bar.set_position(0);
        self.bar.set_prefix(format!("Pass {pass}"));
    }

    fn on_page_complete(&self, page: usize, _pass: usize, new_pages: usize) {
        self.bar.println(format!(
            "  {} Page {:>3}  {}",
            green("✓"),
            page,
            dim(&format!("+{new_pages} covered"))
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page: usize, _pass: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} Page {:>3}  {}", red("✗"), page, red(&msg)));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, state: CoordinatorState, passes: usize) {
        self.bar.finish_and_clear();
        let mark = match state {
            CoordinatorState::Converged => green("✔"),
            CoordinatorState::Cancelled => red("✘"),
            _ => cyan("⚠"),
        };
        eprintln!(
            "{} {} after {} pass(es), {} page error(s)",
            mark,
            bold(&state.to_string()),
            passes,
            self.errors.load(Ordering::SeqCst)
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract facts, human-readable
  pdf2facts deck.pdf

  # Full JSON (merged result, selection plan, page profiles, metadata)
  pdf2facts --json deck.pdf > deck.facts.json

  # Cap spend at 5 vision calls
  pdf2facts --budget 5 deck.pdf

  # Token budget: 60k tokens, 6k reserved per call
  pdf2facts --budget 60000 --budget-unit tokens --cost-per-call 6000 deck.pdf

  # Which pages would be sent to the model? (no API key needed)
  pdf2facts --inspect-only deck.pdf

  # Custom category table for another vertical
  pdf2facts --categories biotech.json report.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory); system library otherwise
"#;

/// Extract structured facts from PDF decks and reports.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2facts",
    version,
    about = "Extract structured facts from PDF decks and reports",
    long_about = "Extract structured, page-cited facts (financials, competition, market, \
traction, team, risks) from PDF documents. Every page is read as text; only the few \
strategic pages are sent to a vision model, under a hard budget.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write JSON output to this file instead of stdout.
    #[arg(short, long, env = "PDF2FACTS_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Maximum strategic pages sent to the vision model.
    #[arg(long, env = "PDF2FACTS_PAGE_CAP", default_value_t = 7)]
    page_cap: usize,

    /// Minimum strategic pages (structural fallback tops up to this).
    #[arg(long, env = "PDF2FACTS_MIN_PAGES", default_value_t = 3)]
    min_pages: usize,

    /// Maximum vision passes.
    #[arg(long, env = "PDF2FACTS_MAX_PASSES", default_value_t = 3)]
    max_passes: usize,

    /// Per-page vision timeout in seconds.
    #[arg(long, env = "PDF2FACTS_PAGE_TIMEOUT", default_value_t = 30)]
    page_timeout: u64,

    /// Wall-clock limit per document in seconds; partial results are kept.
    #[arg(long, env = "PDF2FACTS_SESSION_TIMEOUT")]
    session_timeout: Option<u64>,

    /// Concurrent vision calls within a pass.
    #[arg(short, long, env = "PDF2FACTS_CONCURRENCY", default_value_t = 3)]
    concurrency: usize,

    /// Budget ceiling, in --budget-unit units.
    #[arg(long, env = "PDF2FACTS_BUDGET", default_value_t = 20)]
    budget: u64,

    /// What the budget counts.
    #[arg(long, env = "PDF2FACTS_BUDGET_UNIT", value_enum, default_value = "calls")]
    budget_unit: BudgetUnitArg,

    /// Units charged per vision call (ignored for --budget-unit calls).
    #[arg(long, env = "PDF2FACTS_COST_PER_CALL")]
    cost_per_call: Option<u64>,

    /// Micro-USD per 1000 input tokens; with --price-out, settles
    /// --budget-unit micro-usd charges to the reported usage.
    #[arg(long, env = "PDF2FACTS_PRICE_IN", requires = "price_out")]
    price_in: Option<u64>,

    /// Micro-USD per 1000 output tokens.
    #[arg(long, env = "PDF2FACTS_PRICE_OUT", requires = "price_in")]
    price_out: Option<u64>,

    /// JSON category table (`{"categories": [...]}`) replacing the built-in one.
    #[arg(long, env = "PDF2FACTS_CATEGORIES")]
    categories: Option<PathBuf>,

    /// Disable the tesseract OCR text tier.
    #[arg(long, env = "PDF2FACTS_NO_OCR")]
    no_ocr: bool,

    /// Tesseract language code(s).
    #[arg(long, env = "PDF2FACTS_OCR_LANG", default_value = "eng")]
    ocr_lang: String,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2FACTS_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2FACTS_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF2FACTS_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per page.
    #[arg(long, env = "PDF2FACTS_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2FACTS_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2FACTS_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Output the full JSON cache entry.
    #[arg(long, env = "PDF2FACTS_JSON")]
    json: bool,

    /// Print only the one-line summary.
    #[arg(long)]
    summary: bool,

    /// Show the selection plan only; no vision calls.
    #[arg(long)]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2FACTS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2FACTS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2FACTS_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BudgetUnitArg {
    Calls,
    Tokens,
    MicroUsd,
}

impl BudgetUnitArg {
    fn budget(self, ceiling: u64, per_call: Option<u64>, price: Option<TokenPrice>) -> CostBudget {
        match self {
            BudgetUnitArg::Calls => CostBudget::calls(ceiling),
            BudgetUnitArg::Tokens => CostBudget::tokens(ceiling, per_call.unwrap_or(6_000)),
            BudgetUnitArg::MicroUsd => {
                let budget = CostBudget::micro_usd(ceiling, per_call.unwrap_or(1_000));
                match price {
                    Some(price) => budget.with_price(price),
                    None => budget,
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
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

    let config = build_config(&cli).await?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        // No model is consulted, so no provider needs to be configured.
        let session = ExtractionSession::builder(config.clone())
            .vision_client(Arc::new(StubVisionClient::new()))
            .build()
            .context("Failed to set up session")?;
        let document = Document::open(&cli.input, &config)
            .await
            .context("Failed to open PDF")?;
        let plan = session.plan(&document).await.context("Failed to analyse PDF")?;
        if cli.json {
            emit_json(&cli, &plan)?;
        } else {
            print_plan(&cli.input, &plan);
        }
        return Ok(());
    }

    // ── Run extraction ───────────────────────────────────────────────────
    let mut builder = ExtractionSession::builder(config);
    if show_progress {
        builder = builder.progress_callback(CliProgressCallback::new() as ProgressCallback);
    }
    let session = Arc::new(builder.build().context("Failed to set up session")?);

    {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", red("Interrupted: finishing with results so far"));
                session.cancel();
            }
        });
    }

    let entry = session
        .extract_path(&cli.input)
        .await
        .context("Extraction failed")?;

    if cli.json || cli.output.is_some() {
        emit_json(&cli, entry.as_ref())?;
    }
    if cli.summary {
        println!("{}", entry.summary());
    } else if !cli.json && cli.output.is_none() {
        print_entry(&entry);
    }
    if !cli.quiet && !cli.summary {
        eprintln!(
            "   {} tokens in  /  {} tokens out  /  {}ms total",
            dim(&entry.metadata.input_tokens.to_string()),
            dim(&entry.metadata.output_tokens.to_string()),
            entry.metadata.elapsed_ms,
        );
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli) -> Result<ExtractionConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let ocr = if cli.no_ocr {
        OcrConfig::disabled()
    } else {
        OcrConfig {
            language: cli.ocr_lang.clone(),
            ..OcrConfig::default()
        }
    };

    let price = cli.price_in.zip(cli.price_out).map(|(input_per_1k, output_per_1k)| TokenPrice {
        input_per_1k,
        output_per_1k,
    });
    let mut builder = ExtractionConfig::builder()
        .page_cap(cli.page_cap)
        .min_pages(cli.min_pages)
        .max_passes(cli.max_passes)
        .page_timeout_secs(cli.page_timeout)
        .concurrency(cli.concurrency)
        .budget(cli.budget_unit.budget(cli.budget, cli.cost_per_call, price))
        .ocr(ocr)
        .dpi(cli.dpi)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .download_timeout_secs(cli.download_timeout);

    if let Some(secs) = cli.session_timeout {
        builder = builder.session_timeout_secs(secs);
    }
    if let Some(ref path) = cli.categories {
        let table = CategoryTable::from_json_file(path).context("Invalid category table")?;
        builder = builder.categories(table);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}

fn emit_json<T: serde::Serialize>(cli: &Cli, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialise output")?;
    match cli.output {
        Some(ref path) => {
            std::fs::write(path, json.as_bytes())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !cli.quiet {
                eprintln!("{} wrote {}", green("✔"), bold(&path.display().to_string()));
            }
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn print_plan(input: &str, plan: &SelectionPlan) {
    println!("File:        {}", input);
    println!("Pages:       {}", plan.selection.total_pages);
    println!("Text pages:  {}", plan.pages.iter().filter(|p| !p.text.is_empty()).count());
    println!("Selected:    {:?}", plan.selection.pages());
    for d in &plan.selection.decisions {
        println!(
            "  page {:>3}  {:<12} {:>7.2}  {}",
            d.page,
            d.category.as_deref().unwrap_or("-"),
            d.score,
            d.reason
        );
    }
}

fn print_entry(entry: &CacheEntry) {
    let r = &entry.result;
    println!("{}", bold(&entry.summary()));

    if !r.company.is_empty() {
        println!("\n{}", bold("Company"));
        for (k, v) in &r.company {
            println!("  {:<14} {}  {}", k, v.value, dim(&format!("p.{}", v.page)));
        }
    }
    if !r.financials.is_empty() {
        println!("\n{}", bold("Financials"));
        for f in &r.financials {
            let period = f.period.as_deref().map(|p| format!(" ({p})")).unwrap_or_default();
            let page = f.page.map(|p| format!("p.{p}")).unwrap_or_default();
            println!("  {:<24} {}{}  {}", f.metric, f.value, period, dim(&page));
        }
    }
    for (category, items) in &r.narrative {
        println!("\n{}", bold(category));
        for item in items {
            println!("  - {item}");
        }
    }
    if !r.text_fallback.is_empty() {
        println!(
            "\n{} pages {:?} kept text-only results",
            cyan("⚠"),
            r.text_fallback.keys().collect::<Vec<_>>()
        );
    }
    if entry.metadata.budget_exhausted {
        println!(
            "{} budget exhausted: {}/{} {}",
            red("!"),
            entry.metadata.budget.consumed,
            entry.metadata.budget.ceiling,
            entry.metadata.budget.unit
        );
    }
}
