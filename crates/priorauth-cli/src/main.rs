//! priorauth CLI
//!
//! Extracts prior-authorization rules from payer documents and answers
//! authorization questions against the extracted rules.

mod display;
mod ingest;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use priorauth_core::{Config, PromptKind};
use priorauth_engine::{EvaluationEngine, EvaluationQuery, RuleRepository};
use priorauth_extract::Pipeline;
use priorauth_store::RuleFile;
use priorauth_sync::NarrativeClient;
use tracing::info;

#[derive(Parser)]
#[command(name = "priorauth")]
#[command(about = "Prior-authorization rule extraction and evaluation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true, env = "PRIORAUTH_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract rules from a document or a directory of documents
    Ingest {
        /// Text document, or directory of .md/.txt documents
        input: PathBuf,

        /// Rule file to write
        #[arg(short, long, default_value = "rules.json")]
        out: PathBuf,

        /// Also export the rules as hyperedges to this file
        #[arg(long)]
        hyperedges: Option<PathBuf>,

        /// Override the payer name from the config
        #[arg(long)]
        payer: Option<String>,
    },

    /// Decide whether a procedure needs prior authorization
    Evaluate {
        /// Rule file produced by `ingest`
        #[arg(short, long, default_value = "rules.json")]
        rules: PathBuf,

        /// Procedure code (repeatable)
        #[arg(long = "code", required = true)]
        codes: Vec<String>,

        /// Diagnosis code (repeatable)
        #[arg(long = "dx")]
        diagnosis: Vec<String>,

        /// Patient age in years
        #[arg(long)]
        age: Option<u32>,

        /// Two-letter state code
        #[arg(long)]
        state: Option<String>,

        /// Place-of-service code
        #[arg(long)]
        pos: Option<String>,

        /// Provider specialty
        #[arg(long)]
        specialty: Option<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show extracted rules
    Show {
        #[arg(short, long, default_value = "rules.json")]
        rules: PathBuf,

        /// Show one rule as a card instead of the summary table
        #[arg(long)]
        rule_id: Option<String>,
    },

    /// Send narrative rules for structuring and fold the answers back in
    Narrative {
        #[arg(short, long, default_value = "rules.json")]
        rules: PathBuf,

        /// Base URL of the structuring service
        #[arg(long, env = "PRIORAUTH_NARRATIVE_URL")]
        url: String,

        #[arg(long, value_enum, default_value = "clinical-criteria")]
        prompt: PromptArg,

        /// Rules per request
        #[arg(long, default_value_t = 20)]
        batch_size: usize,

        /// Requests in flight at once
        #[arg(long, default_value_t = 4)]
        concurrency: usize,

        /// Write the updated rules here instead of in place
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PromptArg {
    ClinicalCriteria,
    StateExceptions,
    ComplexRule,
}

impl From<PromptArg> for PromptKind {
    fn from(arg: PromptArg) -> Self {
        match arg {
            PromptArg::ClinicalCriteria => PromptKind::ClinicalCriteria,
            PromptArg::StateExceptions => PromptKind::StateExceptions,
            PromptArg::ComplexRule => PromptKind::ComplexRule,
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load_or_default(cli.config.as_deref()).context("loading config")?;
    info!(version = env!("CARGO_PKG_VERSION"), payer = %config.payer, "priorauth");

    match cli.command {
        Commands::Ingest {
            input,
            out,
            hyperedges,
            payer,
        } => cmd_ingest(config, &input, &out, hyperedges.as_deref(), payer),
        Commands::Evaluate {
            rules,
            codes,
            diagnosis,
            age,
            state,
            pos,
            specialty,
            json,
        } => {
            let query = EvaluationQuery {
                procedure_codes: codes,
                diagnosis_codes: diagnosis,
                age,
                state,
                place_of_service: pos,
                provider_specialty: specialty,
            };
            cmd_evaluate(&config, &rules, &query, json)
        }
        Commands::Show { rules, rule_id } => cmd_show(&rules, rule_id.as_deref()),
        Commands::Narrative {
            rules,
            url,
            prompt,
            batch_size,
            concurrency,
            out,
        } => {
            let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
            runtime.block_on(cmd_narrative(
                &rules,
                url,
                prompt.into(),
                batch_size,
                concurrency,
                out.as_deref(),
            ))
        }
    }
}

fn cmd_ingest(
    mut config: Config,
    input: &Path,
    out: &Path,
    hyperedges: Option<&Path>,
    payer: Option<String>,
) -> anyhow::Result<()> {
    if let Some(payer) = payer {
        config.payer = payer;
        config.validate().context("invalid --payer")?;
    }
    let inputs = ingest::collect_inputs(input)?;
    if inputs.is_empty() {
        bail!("no text documents found at {}", input.display());
    }
    let pipeline = Pipeline::new(config).context("compiling extraction patterns")?;
    let (file, stats) = ingest::run_ingest(&pipeline, &inputs);

    file.save(out)
        .with_context(|| format!("writing {}", out.display()))?;
    if let Some(path) = hyperedges {
        priorauth_store::export_hyperedges(&file.rules, path)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    eprintln!(
        "  {} rules from {} documents ({} unreadable, {} warnings) in {:.2}s -> {}",
        stats.rules,
        stats.documents,
        stats.unreadable,
        stats.warnings,
        stats.elapsed_secs,
        out.display()
    );
    Ok(())
}

fn cmd_evaluate(
    config: &Config,
    rules_path: &Path,
    query: &EvaluationQuery,
    json: bool,
) -> anyhow::Result<()> {
    let file = RuleFile::load(rules_path)
        .with_context(|| format!("loading {}", rules_path.display()))?;
    let repository = RuleRepository::default();
    repository
        .reload(file.rules)
        .with_context(|| format!("indexing {}", rules_path.display()))?;
    let engine = EvaluationEngine::new(&config.evaluation);

    let result = engine.evaluate(&repository.snapshot(), query)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        display::print_evaluation(&result);
    }
    Ok(())
}

fn cmd_show(rules_path: &Path, rule_id: Option<&str>) -> anyhow::Result<()> {
    let file = RuleFile::load(rules_path)
        .with_context(|| format!("loading {}", rules_path.display()))?;
    match rule_id {
        Some(id) => {
            let rule = file
                .find(id)
                .with_context(|| format!("no rule with id {id}"))?;
            display::print_rule_card(rule);
        }
        None => {
            println!(
                "{} rules from {}",
                file.rules.len(),
                file.source_files.join(", ")
            );
            println!();
            display::print_rule_summary(&file.rules);
        }
    }
    Ok(())
}

async fn cmd_narrative(
    rules_path: &Path,
    url: String,
    kind: PromptKind,
    batch_size: usize,
    concurrency: usize,
    out: Option<&Path>,
) -> anyhow::Result<()> {
    let mut file = RuleFile::load(rules_path)
        .with_context(|| format!("loading {}", rules_path.display()))?;
    let requests = priorauth_sync::pending_requests(&file.rules, kind);
    if requests.is_empty() {
        eprintln!("  No rules need narrative review");
        return Ok(());
    }

    let client = NarrativeClient::new(url);
    let responses = client
        .submit_batched(&requests, batch_size, concurrency)
        .await
        .context("submitting narrative rules")?;
    let summary = priorauth_sync::apply_responses(&mut file.rules, &responses);

    let target = out.unwrap_or(rules_path);
    file.save(target)
        .with_context(|| format!("writing {}", target.display()))?;
    eprintln!(
        "  Structured {} of {} narrative rules ({} unmatched responses) -> {}",
        summary.applied,
        requests.len(),
        summary.unmatched.len(),
        target.display()
    );
    Ok(())
}
