//! extree CLI: view and edit a day's exercise tree against the activities API.

use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use exercise_tree::client::{ExerciseStore, MemoryStore};
use exercise_tree::completion::{CompletionShade, week_ratios};
use exercise_tree::config::SyncConfig;
use exercise_tree::exercise::{Exercise, ExerciseDraft, ExerciseId};
use exercise_tree::paths::ExTreePaths;
use exercise_tree::sync::{Outcome, Synchronizer};

#[derive(Parser)]
#[command(name = "extree", version, about = "Exercise tree synchronizer")]
struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/extree/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// API base URL, overriding the config file and environment.
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Bearer token, overriding the config file and environment.
    #[arg(long, global = true)]
    token: Option<String>,

    /// Work against an empty in-memory store instead of the API.
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the exercise tree of a day.
    Show {
        /// Day to show (YYYY-MM-DD, default today).
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Flip completion of an exercise and its sub-exercises.
    Toggle {
        id: u64,
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Add an exercise at the top level of a day or under a parent.
    Add {
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Parent exercise id.
        #[arg(long)]
        parent: Option<u64>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },

    /// Change name, description or notes of an exercise.
    Edit {
        id: u64,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Edit the metrics of an exercise.
    Metric {
        #[command(subcommand)]
        action: MetricAction,
    },

    /// Delete an exercise and everything under it.
    Delete {
        id: u64,
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Completion ratio for the seven days starting at a date.
    Week {
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Inspect or create the config file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum MetricAction {
    /// Add or overwrite a metric.
    Set {
        id: u64,
        key: String,
        #[arg(default_value = "")]
        value: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Remove a metric.
    Rm {
        id: u64,
        key: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Write a default config file if none exists.
    Init,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => {
            let paths = ExTreePaths::resolve()?;
            if matches!(cli.command, Commands::Config { action: ConfigAction::Init }) {
                paths.ensure_dirs()?;
            }
            paths.config_file()
        }
    };
    let mut config = SyncConfig::load_or_default(&config_path)?.with_env();
    if let Some(url) = &cli.api_url {
        config.api_url = url.clone();
    }
    if let Some(token) = &cli.token {
        config.token = Some(token.clone());
    }

    if let Commands::Config { action } = &cli.command {
        return match action {
            ConfigAction::Show => {
                let mut shown = config.clone();
                if shown.token.is_some() {
                    shown.token = Some("<redacted>".into());
                }
                println!("# {}", config_path.display());
                print!("{}", toml::to_string_pretty(&shown).into_diagnostic()?);
                Ok(())
            }
            ConfigAction::Init => {
                if config_path.exists() {
                    println!("Config already exists at {}", config_path.display());
                } else {
                    SyncConfig::default().save(&config_path)?;
                    println!("Wrote default config to {}", config_path.display());
                }
                Ok(())
            }
        };
    }

    let store: Box<dyn ExerciseStore> = if cli.offline {
        Box::new(MemoryStore::new())
    } else {
        Box::new(config.remote_store())
    };
    let mut sync = Synchronizer::new(store);
    let today = Local::now().date_naive();

    match cli.command {
        Commands::Show { date } => {
            let date = date.unwrap_or(today);
            sync.load_day(date)?;
            print_day(&sync, date);
        }

        Commands::Toggle { id, date } => {
            let date = date.unwrap_or(today);
            sync.load_day(date)?;
            let outcome = sync.toggle(ExerciseId::Saved(id));
            finish(&mut sync, date, outcome)?;
        }

        Commands::Add {
            date,
            parent,
            name,
            description,
        } => {
            let date = date.unwrap_or(today);
            sync.load_day(date)?;
            let mut draft = name.as_deref().map(ExerciseDraft::named).unwrap_or_default();
            if let Some(description) = description {
                draft.description = description;
            }
            let outcome = sync.add(parent.map(ExerciseId::Saved), date, draft);
            finish(&mut sync, date, outcome)?;
        }

        Commands::Edit {
            id,
            date,
            name,
            description,
            notes,
        } => {
            let date = date.unwrap_or(today);
            sync.load_day(date)?;
            let Some(mut updated) = lookup(&sync, id, date) else {
                return Ok(());
            };
            if let Some(name) = name {
                updated.name = name;
            }
            if let Some(description) = description {
                updated.description = description;
            }
            if let Some(notes) = notes {
                updated.notes = notes;
            }
            let outcome = sync.edit(updated);
            finish(&mut sync, date, outcome)?;
        }

        Commands::Metric { action } => {
            let (id, date) = match &action {
                MetricAction::Set { id, date, .. } | MetricAction::Rm { id, date, .. } => {
                    (*id, date.unwrap_or(today))
                }
            };
            sync.load_day(date)?;
            let Some(mut updated) = lookup(&sync, id, date) else {
                return Ok(());
            };
            match action {
                MetricAction::Set { key, value, .. } => updated.set_metric(&key, &value),
                MetricAction::Rm { key, .. } => {
                    updated.remove_metric(&key);
                }
            }
            let outcome = sync.edit(updated);
            finish(&mut sync, date, outcome)?;
        }

        Commands::Delete { id, date } => {
            let date = date.unwrap_or(today);
            sync.load_day(date)?;
            let outcome = sync.delete(ExerciseId::Saved(id));
            finish(&mut sync, date, outcome)?;
        }

        Commands::Week { date } => {
            let start = date.unwrap_or(today);
            let days: Vec<NaiveDate> = start.iter_days().take(7).collect();
            for day in &days {
                sync.load_day(*day)?;
            }
            let ratios = week_ratios(sync.tree(), start);
            for (day, ratio) in days.iter().zip(ratios) {
                let shade = CompletionShade::from_ratio(ratio);
                println!(
                    "{} {}  {} {:>3.0}%  {shade}",
                    day.format("%a"),
                    day,
                    shade.glyph(),
                    ratio * 100.0
                );
            }
        }

        Commands::Config { .. } => unreachable!("handled above"),
    }

    Ok(())
}

fn lookup<S: ExerciseStore>(sync: &Synchronizer<S>, id: u64, date: NaiveDate) -> Option<Exercise> {
    let found = sync.tree().find(ExerciseId::Saved(id)).cloned();
    if found.is_none() {
        println!("No exercise {id} on {date}");
    }
    found
}

/// Print the day and any notices, then surface the mutation's error.
fn finish<S: ExerciseStore>(
    sync: &mut Synchronizer<S>,
    date: NaiveDate,
    outcome: exercise_tree::error::SyncResult<Outcome>,
) -> Result<()> {
    for notice in sync.take_notices() {
        match notice.retry_after {
            Some(wait) => eprintln!("! {} (retry in {}s)", notice.message, wait.as_secs()),
            None => eprintln!("! {}", notice.message),
        }
    }
    match outcome? {
        Outcome::Unchanged => println!("Nothing to change"),
        Outcome::Persisted => {}
        Outcome::Created { id, .. } => println!("Created exercise {id}"),
    }
    print_day(sync, date);
    Ok(())
}

fn print_day<S: ExerciseStore>(sync: &Synchronizer<S>, date: NaiveDate) {
    println!("{date}");
    let roots: Vec<&Exercise> = sync.tree().roots_on(date).collect();
    if roots.is_empty() {
        println!("  (no exercises)");
    }
    for root in roots {
        print_node(root, 1);
    }
}

fn print_node(node: &Exercise, depth: usize) {
    let mark = if node.completed { 'x' } else { ' ' };
    let mut line = format!("{:indent$}[{mark}] {} {}", "", node.id, node.name, indent = depth * 2);
    if !node.metrics.is_empty() {
        let metrics: Vec<String> = node.metrics.iter().map(|(k, v)| format!("{k}={v}")).collect();
        line.push_str(&format!(" ({})", metrics.join(", ")));
    }
    println!("{line}");
    if !node.notes.is_empty() {
        println!("{:indent$}  {}", "", node.notes, indent = depth * 2);
    }
    for child in &node.children {
        print_node(child, depth + 1);
    }
}
