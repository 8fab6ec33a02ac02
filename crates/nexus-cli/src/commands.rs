use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use nexus_sdk::{InitReport, LogEntry, Nexus, NexusConfig, PlanReport};
use nexus_store::{DocumentCollection, InMemoryDriver};
use nexus_types::{CollectionName, Document};
use serde_json::{json, Value};
use tracing::info;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Migrate(args) => cmd_migrate(args, cli.format).await,
        Command::Config(args) => cmd_config(args, cli.format),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<NexusConfig> {
    let config = match path {
        Some(path) => NexusConfig::load(path)?,
        None => NexusConfig::default(),
    };
    Ok(config.with_process_env())
}

/// Read a JSON array of documents.
fn read_fixture(path: &Path) -> anyhow::Result<Vec<Document>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value: Value = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    let Value::Array(items) = value else {
        bail!("{} must contain a JSON array of documents", path.display());
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            Document::from_value(item).with_context(|| format!("{} entry {i}", path.display()))
        })
        .collect()
}

async fn seed(driver: &InMemoryDriver, database: &str, collection: CollectionName, docs: Vec<Document>) -> anyhow::Result<usize> {
    let target = driver.database(database).collection_handle(&collection);
    let count = docs.len();
    for doc in docs {
        target.insert_one(doc).await?;
    }
    Ok(count)
}

struct MigrateOutput {
    result: Result<InitReport, String>,
    history: Vec<LogEntry>,
    users: Vec<Document>,
    organizations: Vec<Document>,
}

async fn run_migration(args: &MigrateArgs) -> anyhow::Result<MigrateOutput> {
    let mut config = load_config(args.config.as_deref())?;
    config.schema_enforcement_enabled = true;
    if args.secondary {
        config.secondary_database_enabled = true;
    }

    let driver = Arc::new(InMemoryDriver::new());
    let users_db = config.databases.primary.clone();
    let orgs_db = config.databases.resolve(config.org_database()).to_string();
    if let Some(path) = &args.users {
        seed(&driver, &users_db, CollectionName::users(), read_fixture(path)?).await?;
    }
    if let Some(path) = &args.orgs {
        seed(&driver, &orgs_db, CollectionName::organizations(), read_fixture(path)?).await?;
    }

    let nexus = Nexus::new(config, driver.clone())?;
    let result = nexus.initialize().await.map_err(|e| e.to_string());
    nexus.collect_garbage();

    Ok(MigrateOutput {
        result,
        history: nexus.history(),
        users: driver.database(&users_db).collection_handle(&CollectionName::users()).documents(),
        organizations: driver
            .database(&orgs_db)
            .collection_handle(&CollectionName::organizations())
            .documents(),
    })
}

fn write_collections(dir: &Path, output: &MigrateOutput) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    for (file, docs) in [("users.json", &output.users), ("organizations.json", &output.organizations)] {
        let path = dir.join(file);
        std::fs::write(&path, serde_json::to_string_pretty(docs)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

async fn cmd_migrate(args: MigrateArgs, format: OutputFormat) -> anyhow::Result<()> {
    let output = run_migration(&args).await?;

    match format {
        OutputFormat::Text => print_migration(&output),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&migration_json(&output))?),
    }

    if let Some(dir) = &args.out {
        write_collections(dir, &output)?;
        info!(dir = %dir.display(), users = output.users.len(), organizations = output.organizations.len(), "collections written");
        if format == OutputFormat::Text {
            println!("\nWrote collections to {}", dir.display().to_string().bold());
        }
    }

    match &output.result {
        Ok(report) if report.is_clean() => Ok(()),
        Ok(_) => bail!("migration finished with failures"),
        Err(e) => bail!("migration aborted: {e}"),
    }
}

fn print_migration(output: &MigrateOutput) {
    match &output.result {
        Ok(report) => {
            for (key, e) in &report.failed {
                println!("{} {} database: {}", "✗".red().bold(), key, e);
            }
            if let Some(plan) = &report.migrations {
                print_plan(plan);
            }
        }
        Err(e) => println!("{} {}", "✗ aborted:".red().bold(), e),
    }

    println!("\n{}", "History:".bold());
    for entry in &output.history {
        let line = entry.to_string();
        if entry.is_error() {
            println!("  {}", line.red());
        } else {
            println!("  {}", line.dimmed());
        }
    }
    println!(
        "\n{} users, {} organizations",
        output.users.len().to_string().bold(),
        output.organizations.len().to_string().bold()
    );
}

fn print_plan(plan: &PlanReport) {
    for step in &plan.steps {
        let attempts = if step.attempts == 1 {
            String::new()
        } else {
            format!(" ({} attempts)", step.attempts)
        };
        match &step.outcome {
            Ok(outcome) => println!("{} {}  {}{}", "✓".green().bold(), step.name.yellow(), outcome, attempts),
            Err(e) => println!("{} {}  {}{}", "✗".red().bold(), step.name.yellow(), e, attempts),
        }
    }
    for name in &plan.skipped {
        println!("{} {}  skipped", "-".dimmed(), name.dimmed());
    }
}

fn migration_json(output: &MigrateOutput) -> Value {
    let (steps, skipped, failed, error) = match &output.result {
        Ok(report) => {
            let failed: Vec<Value> = report
                .failed
                .iter()
                .map(|(key, e)| json!({"database": key, "error": e.to_string()}))
                .collect();
            match &report.migrations {
                Some(plan) => (steps_json(plan), plan.skipped.clone(), failed, None),
                None => (Vec::new(), Vec::new(), failed, None),
            }
        }
        Err(e) => (Vec::new(), Vec::new(), Vec::new(), Some(e.clone())),
    };
    json!({
        "error": error,
        "failed_databases": failed,
        "steps": steps,
        "skipped": skipped,
        "history": output.history,
        "users": output.users,
        "organizations": output.organizations,
    })
}

fn steps_json(plan: &PlanReport) -> Vec<Value> {
    plan.steps
        .iter()
        .map(|step| {
            let mut value = json!({
                "name": step.name,
                "passed": step.passed(),
                "attempts": step.attempts,
                "elapsed_ms": step.elapsed.as_millis() as u64,
            });
            match &step.outcome {
                Ok(outcome) => value["outcome"] = json!(outcome),
                Err(e) => value["error"] = json!(e.to_string()),
            }
            value
        })
        .collect()
}

fn cmd_config(args: ConfigArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    config.validate()?;
    match format {
        OutputFormat::Text => print!("{}", config.to_toml_string()?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
    }
    Ok(())
}
