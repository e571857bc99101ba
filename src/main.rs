use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use walkdir::WalkDir;

use squab::{
    baseline::TemplateQueryGenerator,
    config::RunConfig,
    connector::SqliteConnector,
    evaluate::{self, Evaluator, Prediction},
    llm::{CachedCompletion, CompletionProvider, EmbeddingProvider, LlmClient},
    logger::init_tracing,
    orchestrator::Generator,
    output::{self, FailureSummary},
    Category,
};

#[derive(Parser)]
#[command(
    name = "squab",
    version,
    about = "Generate ambiguous and unanswerable text-to-SQL tests from SQLite databases."
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the generation pipeline over one database or a directory of them
    Generate(GenerateArgs),
    /// Score model predictions against a generated dataset
    Evaluate(EvaluateArgs),
}

#[derive(Args)]
struct GenerateArgs {
    #[arg(long, help = "SQLite file, or a directory searched for *.sqlite / *.db")]
    db: PathBuf,

    #[arg(long, value_delimiter = ',', help = "Only these tables (closest names are used)")]
    tables: Vec<String>,

    #[arg(
        long,
        value_delimiter = ',',
        help = "Categories to generate, e.g. scope,attachment (default: all)"
    )]
    categories: Vec<String>,

    #[arg(long, help = "TOML config file (default: the per-user config if present)")]
    config: Option<PathBuf>,

    #[arg(long, help = "Override the configured seed")]
    seed: Option<u64>,

    #[arg(long, help = "Where to write the dataset JSON")]
    out: PathBuf,
}

#[derive(Args)]
struct EvaluateArgs {
    #[arg(long, help = "JSON array of test cases carrying `predicted_sql`")]
    input: PathBuf,

    #[arg(long, help = "TOML config file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Where to write scored predictions (default: stdout)")]
    out: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    match Cli::parse().command {
        CliCommand::Generate(args) => run_generate(args),
        CliCommand::Evaluate(args) => run_evaluate(args),
    }
}

/* ============================================================
   generate
   ============================================================ */

fn is_database(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("sqlite") | Some("db")
    )
}

fn discover_databases(root: &Path) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }

    let mut found: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && is_database(e.path()))
        .map(|e| e.into_path())
        .collect();
    found.sort();
    found
}

fn run_generate(args: GenerateArgs) -> Result<(), Box<dyn Error>> {
    let mut cfg = RunConfig::load(args.config.as_deref())?;
    if let Some(seed) = args.seed {
        cfg.seed = seed;
    }

    let categories = args
        .categories
        .iter()
        .map(|c| c.parse::<Category>())
        .collect::<Result<Vec<_>, _>>()?;
    let tables = (!args.tables.is_empty()).then_some(args.tables.as_slice());

    let databases = discover_databases(&args.db);
    if databases.is_empty() {
        return Err(format!("no SQLite databases found under {}", args.db.display()).into());
    }

    let namespace = format!("{}|{}", cfg.llm.model, cfg.embedding.model);
    let client = CachedCompletion::new(
        LlmClient::new(cfg.llm.clone(), cfg.embedding.clone())?,
        namespace,
        cfg.cache_dir.clone(),
    );

    let completion: Option<&dyn CompletionProvider> = if cfg.llm.api_key.is_empty() {
        warn!("no LLM api key configured; LLM-backed stages will record failures");
        None
    } else {
        Some(&client)
    };
    let embedder: Option<&dyn EmbeddingProvider> = if cfg.embedding.api_key.is_empty() {
        warn!("no embedding api key configured; column ambiguity will record failures");
        None
    } else {
        Some(&client)
    };

    let mut dataset = Vec::new();
    for path in &databases {
        let connector = SqliteConnector::open(path)?;
        let generator = Generator {
            connector: &connector,
            completion,
            embedder,
            baseline: &TemplateQueryGenerator,
            config: &cfg,
        };
        let lines = generator.generate(tables, &categories)?;
        info!(db = %path.display(), records = lines.len(), "database done");
        dataset.extend(lines);
    }

    output::write_dataset(&args.out, &dataset)?;
    eprint!("{}", FailureSummary::from_lines(&dataset).render());
    Ok(())
}

/* ============================================================
   evaluate
   ============================================================ */

fn run_evaluate(args: EvaluateArgs) -> Result<(), Box<dyn Error>> {
    let cfg = RunConfig::load(args.config.as_deref())?;

    let raw = fs::read_to_string(&args.input)?;
    let predictions: Vec<Prediction> = serde_json::from_str(&raw)?;

    let mut evaluator = Evaluator::new(
        cfg.evaluation.clone(),
        Duration::from_secs(cfg.query_timeout_secs),
    );
    let scored = evaluator.evaluate_all(predictions);

    let text = serde_json::to_string_pretty(&scored)?;
    match &args.out {
        Some(path) => {
            fs::write(path, text)?;
            info!(path = %path.display(), records = scored.len(), "scores written");
        }
        None => println!("{text}"),
    }

    for (category, metrics) in evaluate::summarize(&scored) {
        let shown: Vec<String> = metrics.iter().map(|(m, v)| format!("{m}={v:.3}")).collect();
        eprintln!("{category:<26} {}", shown.join(" "));
    }
    Ok(())
}
