use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tollflow_bench::comparator::{check_equivalence, PlanComparator};
use tollflow_bench::db::{init_pool, PgBackend};
use tollflow_bench::execution::{PlanSample, QueryRunner, VariantRun};
use tollflow_bench::generator::{DataLoader, FlowGenerator};
use tollflow_bench::report::{BenchReport, RunSettings};
use tollflow_bench::schema::{flow_table, loader::SchemaLoader, TableDef};
use tollflow_bench::variants::{builtin_variants, load_variants, select, DEPARTMENT_INTENT};
use tollflow_bench::HarnessConfig;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tollflow")]
#[command(about = "Query optimization benchmark over a synthetic toll traffic table")]
struct Cli {
    /// Postgres connection string (or set DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Namespace holding the flow table (or set TOLLFLOW_SCHEMA)
    #[arg(long, global = true)]
    schema: Option<String>,

    /// Rows to generate (or set TOLLFLOW_ROWS)
    #[arg(long, global = true)]
    rows: Option<u64>,

    /// Seed for the data generator (or set TOLLFLOW_SEED)
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Rows per INSERT statement (or set TOLLFLOW_BATCH_SIZE)
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Unmeasured executions before each EXPLAIN ANALYZE (or set TOLLFLOW_WARMUP)
    #[arg(long, global = true)]
    warmup: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drop and recreate the table with derived columns and indexes
    Setup,
    /// Fill the existing table with synthetic rows and refresh statistics
    Generate,
    /// Run query variants against the current table state
    Run(RunArgs),
    /// Compare captured text-format plans without a database
    Compare(CompareArgs),
    /// Setup, generate, run every variant and report
    Bench(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Variant to run, in order; repeat for several (default: all)
    #[arg(long = "variant")]
    variants: Vec<String>,

    /// JSON file with variant definitions replacing the built-in ones
    #[arg(long)]
    variants_file: Option<PathBuf>,

    /// Write the report as JSON to this path
    #[arg(long)]
    report_json: Option<PathBuf>,
}

#[derive(Args)]
struct CompareArgs {
    /// Text plan files; the first one is the baseline
    #[arg(long = "plan-file", required = true)]
    plan_files: Vec<PathBuf>,

    /// Logical question every plan answers
    #[arg(long, default_value = DEPARTMENT_INTENT)]
    intent: String,

    /// Write the report as JSON to this path
    #[arg(long)]
    report_json: Option<PathBuf>,
}

impl Cli {
    /// Environment first, flags on top, one validation over the result.
    fn config(&self) -> Result<HarnessConfig> {
        let mut config = HarnessConfig::load_env()?;
        if let Some(url) = &self.database_url {
            config.database_url = url.clone();
        }
        if let Some(schema) = &self.schema {
            config.schema = schema.clone();
        }
        if let Some(rows) = self.rows {
            config.rows = rows;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(warmup) = self.warmup {
            config.warmup = warmup;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Command::Compare(args) => compare(args),
        Command::Setup => {
            let config = cli.config()?;
            setup(&config).await
        }
        Command::Generate => {
            let config = cli.config()?;
            generate(&config).await
        }
        Command::Run(args) => {
            let config = cli.config()?;
            run(&config, args).await
        }
        Command::Bench(args) => {
            let config = cli.config()?;
            bench(&config, args).await
        }
    }
}

async fn setup(config: &HarnessConfig) -> Result<()> {
    let pool = init_pool(config).await?;
    let table = flow_table(&config.schema);
    SchemaLoader::new(pool).load(&table).await?;
    println!("✅ {} ready", table.qualified_name());
    Ok(())
}

async fn generate(config: &HarnessConfig) -> Result<()> {
    let pool = init_pool(config).await?;
    let table = flow_table(&config.schema);
    let loader = SchemaLoader::new(pool.clone());

    if !loader.table_exists(&table).await? {
        bail!("{} does not exist, run `tollflow setup` first", table.qualified_name());
    }

    let generator = FlowGenerator::from_config(config)?;
    let inserted = DataLoader::new(pool, config.batch_size)
        .insert_all(&table, generator)
        .await?;
    loader.analyze(&table).await?;

    println!("✅ {} rows in {}", inserted, table.qualified_name());
    Ok(())
}

async fn run(config: &HarnessConfig, args: &RunArgs) -> Result<()> {
    let pool = init_pool(config).await?;
    let table = flow_table(&config.schema);
    let variants = resolve_variants(args)?;

    let backend = PgBackend::new(pool);
    let mut runner = QueryRunner::new(&backend, &table, config.warmup);
    let runs = runner.run_all(&variants).await?;

    report_runs(config, &table, runs, args.report_json.as_deref())
}

/// Full pipeline on a disposable table.
async fn bench(config: &HarnessConfig, args: &RunArgs) -> Result<()> {
    let variants = resolve_variants(args)?;
    let pool = init_pool(config).await?;
    let table = flow_table(&config.schema);
    let loader = SchemaLoader::new(pool.clone());

    println!("🏗️  Creating {}", table.qualified_name());
    loader.apply(&table).await?;

    println!("🎲 Generating {} rows (seed {})", config.rows, config.seed);
    let generator = FlowGenerator::from_config(config)?;
    DataLoader::new(pool.clone(), config.batch_size)
        .insert_all(&table, generator)
        .await?;

    // Every variant sees the same columns and indexes, including those only later variants use.
    println!("📐 Adding derived columns and indexes");
    loader.apply_derived_columns(&table).await?;
    loader.apply_indexes(&table).await?;
    loader.analyze(&table).await?;

    let backend = PgBackend::new(pool);
    let state = loader.fingerprint(&backend, &table).await?;
    info!(
        "State: {} rows, {} indexes, {} columns",
        state.row_count,
        state.indexes.len(),
        state.columns.len()
    );

    println!("⏱️  Running {} variants", variants.len());
    let mut runner = QueryRunner::new(&backend, &table, config.warmup);
    let runs = runner.run_all(&variants).await?;

    report_runs(config, &table, runs, args.report_json.as_deref())
}

fn compare(args: &CompareArgs) -> Result<()> {
    let mut samples = Vec::with_capacity(args.plan_files.len());
    for path in &args.plan_files {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading plan {}", path.display()))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        samples.push(PlanSample::from_text(&name, &args.intent, &text)?);
    }

    let comparison = PlanComparator::compare(&samples)?;
    let report = BenchReport::new(None, samples, comparison, None);
    println!("{}", report.render_text());

    if let Some(path) = &args.report_json {
        report.write_json(path)?;
        println!("📝 Report written to {}", path.display());
    }
    Ok(())
}

fn resolve_variants(args: &RunArgs) -> Result<Vec<tollflow_bench::QueryVariant>> {
    let defined = match &args.variants_file {
        Some(path) => load_variants(path)?,
        None => builtin_variants(),
    };
    Ok(select(defined, &args.variants)?)
}

fn report_runs(
    config: &HarnessConfig,
    table: &TableDef,
    runs: Vec<VariantRun>,
    report_json: Option<&Path>,
) -> Result<()> {
    let results: Vec<_> = runs.iter().map(|r| r.result.clone()).collect();
    let samples: Vec<_> = runs.into_iter().map(|r| r.sample).collect();

    if samples.len() < 2 {
        for s in &samples {
            println!(
                "{}: {} scan, cost {:.1}, planning {:.3} ms, execution {:.3} ms on {}",
                s.variant,
                s.scan_strategy,
                s.estimated_cost,
                s.planning_ms,
                s.execution_ms,
                table.qualified_name()
            );
        }
        return Ok(());
    }

    let equivalence = check_equivalence(&results)?;
    if !equivalence.equivalent() {
        warn!("Variants returned different results");
    }

    let comparison = PlanComparator::compare(&samples)?;
    let report = BenchReport::new(
        Some(RunSettings::from(config)),
        samples,
        comparison,
        Some(equivalence),
    );
    println!("\n{}", report.render_text());

    if let Some(path) = report_json {
        report.write_json(path)?;
        println!("📝 Report written to {}", path.display());
    }

    if let Some(eq) = &report.equivalence {
        if !eq.equivalent() {
            bail!("{} variant(s) disagree with {}", eq.mismatches.len(), eq.reference);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_overrides_invalid_env_value() {
        std::env::set_var("TOLLFLOW_SCHEMA", "Bad-Schema");
        let fixed = Cli::try_parse_from(["tollflow", "--schema", "lab", "setup"])
            .unwrap()
            .config();
        let unfixed = Cli::try_parse_from(["tollflow", "setup"]).unwrap().config();
        std::env::remove_var("TOLLFLOW_SCHEMA");

        assert_eq!(fixed.unwrap().schema, "lab");
        assert!(unfixed.is_err());
    }

    #[test]
    fn test_batch_size_flag_is_validated() {
        let cli = Cli::try_parse_from(["tollflow", "--batch-size", "922337203685477581", "generate"])
            .unwrap();
        assert!(cli.config().is_err());
    }
}
