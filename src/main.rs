use anyhow::Result;
use cb_dataset::{
    alias_conflicts, MappingTables, Pipeline, PipelineConfig, ReconciliationReport,
    VerificationReport, Verifier,
};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

#[derive(Debug, Parser)]
#[command(name = "cb-dataset")]
#[command(about = "Normalize, reconcile and verify the community builder membership dataset")]
#[command(version)]
struct Cli {
    /// Pipeline configuration file (JSON)
    #[arg(long, global = true, env = "CB_DATASET_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    paths: PathOverrides,

    #[command(subcommand)]
    command: Command,
}

/// Flags that take precedence over the config file
#[derive(Debug, Args)]
struct PathOverrides {
    #[arg(long, global = true)]
    raw: Option<PathBuf>,

    #[arg(long, global = true)]
    canonical: Option<PathBuf>,

    #[arg(long, global = true)]
    coordinates: Option<PathBuf>,

    #[arg(long, global = true)]
    coordinates_out: Option<PathBuf>,

    #[arg(long, global = true)]
    mappings: Option<PathBuf>,

    #[arg(long, global = true)]
    manual_coordinates: Option<PathBuf>,

    #[arg(long, global = true)]
    report: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Raw yearly export → canonical dataset
    Normalize,

    /// Compare per-country counts against the coordinate table
    Reconcile {
        /// How many countries to list by member count
        #[arg(long, default_value_t = 10)]
        top: usize,
    },

    /// Fill missing coordinates from the manual coordinate file
    Augment,

    /// Audit the canonical dataset and apply the publish gate
    Verify {
        /// Print a profile for this country (repeatable)
        #[arg(long = "country")]
        countries: Vec<String>,
    },

    /// Full pipeline: normalize, reconcile/augment, verify, gate
    Run,

    /// List aliases that map to different countries in two mapping files
    DiffMappings { old: PathBuf, new: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let passed = match cli.command {
        Command::Normalize => run_normalize(&config)?,
        Command::Reconcile { top } => run_reconcile(&config, top)?,
        Command::Augment => run_augment(&config)?,
        Command::Verify { countries } => run_verify(&config, &countries)?,
        Command::Run => run_pipeline(&config)?,
        Command::DiffMappings { old, new } => run_diff_mappings(&old, &new)?,
    };

    if !passed {
        std::process::exit(1);
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::new(),
    };

    let paths = &cli.paths;
    override_path(&mut config.raw_path, &paths.raw);
    override_path(&mut config.canonical_path, &paths.canonical);
    override_path(&mut config.coordinates_path, &paths.coordinates);
    override_path(&mut config.coordinates_output_path, &paths.coordinates_out);
    override_path(&mut config.mappings_path, &paths.mappings);
    override_path(&mut config.manual_coordinates_path, &paths.manual_coordinates);
    override_path(&mut config.report_path, &paths.report);

    Ok(config)
}

fn override_path(slot: &mut Option<PathBuf>, flag: &Option<PathBuf>) {
    if let Some(path) = flag {
        *slot = Some(path.clone());
    }
}

fn run_normalize(config: &PipelineConfig) -> Result<bool> {
    println!("🧹 Normalize - raw export → canonical dataset");
    println!("{}", RULE);

    let pipeline = Pipeline::new(config)?;
    let stage = pipeline.normalize()?;

    println!("\n📂 Source: {}", stage.source);
    if stage.header_repaired {
        println!("✓ Header delimiter repaired to '{}'", stage.delimiter);
    }
    println!("✓ {}", stage.summary());
    for (marker, count) in &stage.dropped_invalid {
        println!("  dropped {} row(s) with category '{}'", count, marker);
    }
    for (country, count) in &stage.unknown_regions {
        println!("  ⚠️  {} ({} records) has no region", country, count);
    }
    println!(
        "\n💾 Wrote {} (sha256 {})",
        stage.canonical_path.display(),
        stage.canonical_sha256
    );

    Ok(true)
}

fn print_reconciliation(report: &ReconciliationReport, top: usize) {
    println!("✓ {}", report.summary());

    println!("\n🏆 Top {} countries by members:", top);
    for point in report.top_countries(top) {
        println!("  {:<30} {:>6}", point.country, point.count);
    }

    if !report.is_complete() {
        println!("\n⚠️  Countries without coordinates:");
        for missing in &report.missing_coordinates {
            println!("  {:<30} {:>6}", missing.country, missing.count);
        }
    }
}

fn run_reconcile(config: &PipelineConfig, top: usize) -> Result<bool> {
    println!("⚖️  Reconcile - member counts vs. coordinates");
    println!("{}", RULE);

    let pipeline = Pipeline::new(config)?;
    let dataset = pipeline.load_canonical()?;
    let stage = pipeline.reconcile(&dataset.records)?;

    print_reconciliation(&stage.reconciliation, top);

    Ok(true)
}

fn run_augment(config: &PipelineConfig) -> Result<bool> {
    println!("➕ Augment - fill missing coordinates");
    println!("{}", RULE);

    let pipeline = Pipeline::new(config)?;
    let dataset = pipeline.load_canonical()?;
    let stage = pipeline.augment(&dataset.records)?;

    println!("✓ {}", stage.summary());
    for entry in &stage.added {
        println!("  + {} ({}, {})", entry.country, entry.latitude, entry.longitude);
    }
    for country in &stage.needs_manual_resolution {
        println!("  ⚠️  {} needs manual resolution", country);
    }
    match &stage.saved_to {
        Some(path) => println!("\n💾 Saved coordinate table to {}", path.display()),
        None if stage.save_refused => println!(
            "\n❌ Not saved: {} has rows that could not be parsed; fix them first",
            stage.coordinates_path.display()
        ),
        None => println!("\n✓ Coordinate table unchanged"),
    }

    Ok(true)
}

fn print_verification(report: &VerificationReport) {
    println!("✓ Total records: {}", report.total_records);
    println!("\n🔍 Missing values:");
    for (column, count) in &report.missing_values {
        println!("  {:<10} {}", column, count);
    }
    println!("\n📊 Distinct values:");
    println!("  categories {}", report.categories.distinct);
    println!("  cohorts    {}", report.cohorts.distinct);
    println!("  countries  {}", report.countries.distinct);
    println!("  regions    {} ({})", report.regions.distinct, report.regions.values.join(", "));
    println!("\n📅 Records per cohort:");
    for (cohort, count) in &report.cohort_distribution {
        println!("  {:<10} {}", cohort, count);
    }
    if !report.non_canonical_categories.is_empty() {
        println!(
            "\n⚠️  Categories outside the canonical set: {}",
            report.non_canonical_categories.join(", ")
        );
    }
}

fn run_verify(config: &PipelineConfig, countries: &[String]) -> Result<bool> {
    println!("✅ Verify - canonical dataset audit");
    println!("{}", RULE);

    let pipeline = Pipeline::new(config)?;
    let dataset = pipeline.load_canonical()?;
    let report = pipeline.verify(&dataset.records);

    print_verification(&report);

    let verifier = Verifier::with_mappings(pipeline.tables());
    for country in countries {
        let profile = verifier.country_profile(&dataset.records, country);
        println!("\n🌍 {} - {} records", profile.country, profile.records);
        println!("  cohorts:    {}", profile.cohorts.join(", "));
        println!("  categories: {}", profile.categories.join(", "));
    }

    let reconciliation = if config.publish.require_full_coordinates {
        Some(pipeline.reconcile(&dataset.records)?.reconciliation)
    } else {
        None
    };
    let gate = config.publish.evaluate(&report, reconciliation.as_ref());

    println!("\n{}", RULE);
    if gate.passed {
        println!("🎉 Publish gate passed");
    } else {
        println!("❌ Publish gate failed:");
        for failure in &gate.failures {
            println!("  - {}", failure);
        }
    }

    Ok(gate.passed)
}

fn run_pipeline(config: &PipelineConfig) -> Result<bool> {
    println!("🔄 Community Builder Dataset Pipeline v{}", cb_dataset::VERSION);
    println!("{}", RULE);

    let pipeline = Pipeline::new(config)?;
    let report = pipeline.run()?;

    println!("\n🧹 {}", report.normalize.summary());
    println!("📍 {}", report.coordinates.summary());
    println!("\n⚖️  Reconciliation");
    print_reconciliation(&report.coordinates.reconciliation, 10);
    println!("\n✅ Verification");
    print_verification(&report.verification);

    println!("\n{}", RULE);
    println!("Run {} (mappings {} {})", report.run_id, report.mapping_version, report.mapping_fingerprint.chars().take(12).collect::<String>());
    if report.passed() {
        println!("🎉 Dataset ready to publish: {}", report.normalize.canonical_path.display());
    } else {
        println!("❌ Publish gate failed:");
        for failure in &report.gate.failures {
            println!("  - {}", failure);
        }
    }

    Ok(report.passed())
}

fn run_diff_mappings(old: &Path, new: &Path) -> Result<bool> {
    println!("🗺️  Mapping diff - {} → {}", old.display(), new.display());
    println!("{}", RULE);

    let older = MappingTables::from_file(old)?;
    let newer = MappingTables::from_file(new)?;
    let conflicts = alias_conflicts(&older, &newer);

    println!("  {} → {}", older.version, newer.version);
    if conflicts.is_empty() {
        println!("\n✓ No alias conflicts");
    } else {
        println!("\n⚠️  {} alias conflict(s):", conflicts.len());
        for conflict in &conflicts {
            println!(
                "  [{}] '{}': '{}' → '{}'",
                conflict.table, conflict.key, conflict.older, conflict.newer
            );
        }
    }

    Ok(true)
}
