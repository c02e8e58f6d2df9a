use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};

use refeedrs::batch::{group_by_user, BatchProcessor, UserHistory};
use refeedrs::config::AppConfig;
use refeedrs::database::Database;
use refeedrs::export::{csv::export_snapshot, json::export_json, ExportFormat};
use refeedrs::import::csv::CsvImporter;
use refeedrs::logging::init_logging;
use refeedrs::models::{RefeedTargets, ScoreRecord};
use refeedrs::recompute::{decide_recommendation, latest_weight, DecisionInput, RecommendationAction, ScoreEngine};
use refeedrs::targets::compute_refeed_targets;

/// refeedrs - Refeed readiness scoring CLI
///
/// Scores daily biometrics for metabolic adaptation and refeed readiness,
/// recomputes score histories in bulk and derives refeed-day macro targets.
#[derive(Parser)]
#[command(name = "refeedrs")]
#[command(version)]
#[command(about = "Refeed readiness scoring CLI", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score one user's recent days from CSV files
    Score {
        /// Metrics CSV
        #[arg(short, long)]
        metrics: PathBuf,

        /// Refeed executions CSV
        #[arg(short, long)]
        executions: Option<PathBuf>,

        /// User to score (required when the file holds several users)
        #[arg(short, long)]
        user: Option<String>,

        /// Number of recent days to show
        #[arg(short, long, default_value = "7")]
        days: usize,
    },

    /// Recompute every user's score history and write a snapshot
    Recompute {
        /// Metrics CSV; the store given by --database is read when omitted
        #[arg(short, long)]
        metrics: Option<PathBuf>,

        /// Refeed executions CSV
        #[arg(short, long)]
        executions: Option<PathBuf>,

        /// Snapshot output path (.csv snapshot or .json score rows)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// SQLite store to upsert inputs and scores into
        #[arg(long)]
        database: Option<PathBuf>,

        /// Score users one at a time
        #[arg(long)]
        sequential: bool,

        /// Worker threads
        #[arg(short = 'j', long)]
        threads: Option<usize>,
    },

    /// Print refeed-day macro targets
    Targets {
        /// Estimated total daily energy expenditure (kcal)
        #[arg(short, long)]
        tdee: f64,

        /// Body weight (kg)
        #[arg(short, long)]
        weight: Option<f64>,

        /// Fraction of TDEE to add
        #[arg(short, long)]
        multiplier: Option<f64>,
    },

    /// Show or initialize the configuration file
    Config {
        /// Write a default configuration file
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_or_default(cli.config.as_deref())?;
    init_logging(&config.logging.clone().with_verbosity(cli.verbose))?;

    match cli.command {
        Commands::Score {
            metrics,
            executions,
            user,
            days,
        } => score(&config, &metrics, executions.as_deref(), user.as_deref(), days),

        Commands::Recompute {
            metrics,
            executions,
            output,
            database,
            sequential,
            threads,
        } => {
            let mut settings = config.batch.clone();
            settings.metrics_csv = metrics.or(settings.metrics_csv);
            settings.executions_csv = executions.or(settings.executions_csv);
            settings.snapshot_csv = output.unwrap_or(settings.snapshot_csv);
            settings.database_path = database.or(settings.database_path);
            settings.parallel = settings.parallel && !sequential;
            settings.num_threads = threads.or(settings.num_threads);

            let mut effective = config.clone();
            effective.batch = settings;
            effective.validate()?;
            recompute(&effective)
        }

        Commands::Targets {
            tdee,
            weight,
            multiplier,
        } => {
            let mut request = config.targets.request(Some(tdee), weight);
            if let Some(m) = multiplier {
                request = request.with_multiplier(m);
            }
            let targets = compute_refeed_targets(&request)
                .ok_or_else(|| anyhow!("TDEE must be a positive number, got {}", tdee))?;

            println!("{}", "Refeed-day targets".green().bold());
            print_targets(&targets);
            Ok(())
        }

        Commands::Config { init, force } => {
            let path = match cli.config {
                Some(p) => p,
                None => AppConfig::default_path().ok_or_else(|| anyhow!("No configuration directory available"))?,
            };

            if init {
                if path.exists() && !force {
                    bail!("{} already exists (use --force to overwrite)", path.display());
                }
                AppConfig::default().save(&path)?;
                println!("{} {}", "✓ Wrote default configuration to".green(), path.display());
            } else {
                println!("{} {}", "Configuration:".bold(), path.display().to_string().dimmed());
                println!("{}", toml::to_string_pretty(&config).context("Failed to render configuration")?);
            }
            Ok(())
        }
    }
}

fn load_users(metrics: &Path, executions: Option<&Path>) -> Result<Vec<UserHistory>> {
    let importer = CsvImporter::new();
    let metric_rows = importer
        .import_metrics(metrics)
        .with_context(|| format!("Failed to import metrics from {}", metrics.display()))?;
    let execution_rows = match executions {
        Some(path) => importer
            .import_executions(path)
            .with_context(|| format!("Failed to import executions from {}", path.display()))?,
        None => Vec::new(),
    };
    Ok(group_by_user(metric_rows, execution_rows))
}

#[derive(Tabled)]
struct DayRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "MAS")]
    mas: String,
    #[tabled(rename = "RRS v1")]
    rrs: String,
    #[tabled(rename = "RRS v2")]
    rrs_v2: String,
    #[tabled(rename = "Display")]
    display: String,
    #[tabled(rename = "Cooldown")]
    cooldown: String,
    #[tabled(rename = "Response")]
    response: String,
    #[tabled(rename = "Deficit")]
    deficit_streak: u32,
    #[tabled(rename = "Plateau")]
    plateau: &'static str,
    #[tabled(rename = "Locked")]
    locked: &'static str,
}

impl From<&ScoreRecord> for DayRow {
    fn from(record: &ScoreRecord) -> Self {
        let yes_no = |flag: bool| if flag { "yes" } else { "" };
        DayRow {
            date: record.date.to_string(),
            mas: format!("{:+.3}", record.mas),
            rrs: format!("{:.3}", record.rrs),
            rrs_v2: format!("{:.3}", record.rrs_v2),
            display: format!("{:.3}", record.display_rrs),
            cooldown: format!("{:.3}", record.cooldown),
            response: format!("{:+.3}", record.response),
            deficit_streak: record.deficit_streak,
            plateau: yes_no(record.plateau_flag),
            locked: yes_no(record.hard_locked),
        }
    }
}

fn score(config: &AppConfig, metrics: &Path, executions: Option<&Path>, user: Option<&str>, days: usize) -> Result<()> {
    let users = load_users(metrics, executions)?;
    let history = match user {
        Some(id) => users
            .into_iter()
            .find(|u| u.user_id == id)
            .ok_or_else(|| anyhow!("No metrics for user '{}'", id))?,
        None => match <[UserHistory; 1]>::try_from(users) {
            Ok([only]) => only,
            Err(users) => bail!("{} users in {}; pick one with --user", users.len(), metrics.display()),
        },
    };

    let engine = ScoreEngine::with_config(config.targets.engine_config());
    let records = engine.score_history(&history.metrics, &history.executions);
    let Some(latest) = records.last() else {
        bail!("User '{}' has no metric rows", history.user_id);
    };

    let shown: Vec<DayRow> = records[records.len().saturating_sub(days)..]
        .iter()
        .map(DayRow::from)
        .collect();
    println!("{} {}", "Readiness for".bold(), history.user_id.cyan().bold());
    println!("{}", Table::new(shown).with(Style::rounded()));

    let state = if latest.hard_locked {
        "hard-locked".red().bold()
    } else if latest.cooldown > 0.0 {
        "cooling down".yellow().bold()
    } else {
        "open".green().bold()
    };
    println!("Refeed window: {} (effective window {} days)", state, latest.effective_window);

    let day = engine
        .recompute_from_date(&history.metrics, latest.date)
        .pop()
        .ok_or_else(|| anyhow!("Latest day could not be rescored"))?;
    let mut input =
        DecisionInput::from_day(&day, config.targets.estimated_tdee).with_body_weight(latest_weight(&history.metrics));
    input.multiplier = config.targets.multiplier;

    match decide_recommendation(&input) {
        RecommendationAction::Upsert(recommendation) => {
            println!("{}", "✓ Refeed recommended".green().bold());
            print_targets(&recommendation.targets);
        }
        RecommendationAction::Keep => {
            println!(
                "{}",
                "Readiness qualifies, but no TDEE is known; set targets.estimated_tdee".yellow()
            );
        }
        RecommendationAction::Delete => {
            let reason = if day.guards.fever_like {
                "fever-like temperature"
            } else if day.guards.acute_weight_gain {
                "acute weight gain"
            } else {
                "readiness below threshold"
            };
            println!("{} ({})", "No refeed recommended".dimmed(), reason);
        }
    }

    Ok(())
}

fn recompute(config: &AppConfig) -> Result<()> {
    let settings = &config.batch;
    let mut database = match &settings.database_path {
        Some(path) => Some(
            Database::new(path).with_context(|| format!("Failed to open database {}", path.display()))?,
        ),
        None => None,
    };

    let incoming = match &settings.metrics_csv {
        Some(metrics) => load_users(metrics, settings.executions_csv.as_deref())?,
        None if database.is_some() => Vec::new(),
        None => bail!("No metrics input: pass --metrics or --database, or set batch.metrics_csv"),
    };

    println!("{}", "Recomputing score histories...".blue().bold());
    let processor = BatchProcessor::with_config(settings.batch_config(true))
        .with_engine(ScoreEngine::with_config(config.targets.engine_config()));
    let output = match database.as_mut() {
        Some(db) => processor.run_store(db, &incoming)?,
        None => processor.run(&incoming)?,
    };

    let target = &settings.snapshot_csv;
    match ExportFormat::from_path(target) {
        ExportFormat::Json => export_json(&output.score_rows, target)?,
        ExportFormat::Csv => export_snapshot(&output.snapshot, target)?,
    }
    println!("{} {}", "✓ Wrote".green(), target.display());

    if let Some(db) = &database {
        let stats = db.get_stats()?;
        println!(
            "{} {} score rows for {} users",
            "✓ Stored".green(),
            stats.score_rows,
            stats.user_count
        );
    }

    println!("{}", output.summary.to_string_pretty());
    Ok(())
}

fn print_targets(targets: &RefeedTargets) {
    println!("  Calories: {} kcal", targets.kcal_total.to_string().bold());
    println!("  Carbs:    {} g", targets.carb_g);
    println!("  Protein:  {} g", targets.protein_g);
    println!("  Fat:      {} g", targets.fat_g);
}
