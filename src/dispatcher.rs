//! Command dispatcher that routes parsed clap commands to their handlers.
//!
//! Handlers load inputs, call into the engine and the ledger database, and
//! print either tables or JSON depending on `json_output`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use colored::Colorize;
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::formatters;
use crate::cli::Commands;
use crate::config::load_config;
use crate::db;
use crate::engine::{calculate_return, ConsolidatedBreakdown, ReturnRecords};
use crate::money::format_usd;
use crate::tax::CarryoverLedger;
use crate::validation::validate_records;

/// Route a parsed command to its handler
pub async fn dispatch_command(command: Commands, json_output: bool) -> Result<()> {
    match command {
        Commands::Calculate {
            file,
            config,
            db,
            commit,
        } => dispatch_calculate(&file, config.as_deref(), db, commit, json_output).await,
        Commands::Batch { files, config } => dispatch_batch(files, config, json_output).await,
        Commands::Validate { file, config } => dispatch_validate(&file, config.as_deref(), json_output),
        Commands::Carryovers { year, db } => dispatch_carryovers(year, db, json_output),
        Commands::Runs { year, db } => dispatch_runs(year, db, json_output),
        Commands::Config { year, config } => dispatch_config(year, config.as_deref(), json_output),
    }
}

/// Read a JSON records file
pub fn load_records(path: &Path) -> Result<ReturnRecords> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read records file {:?}", path))?;
    let records: ReturnRecords =
        serde_json::from_str(&contents).with_context(|| format!("Failed to parse records file {:?}", path))?;
    Ok(records)
}

/// Prior-year ledger: the stored snapshot, else the carryovers in the file
fn prior_ledger(conn: &rusqlite::Connection, records: &ReturnRecords) -> Result<CarryoverLedger> {
    let stored = db::load_carryovers(conn, records.tax_year)?;
    if !stored.entries.is_empty() {
        if !records.prior_carryovers.is_empty() {
            warn!(
                "Ignoring {} carryovers in the records file; using the stored {} snapshot",
                records.prior_carryovers.len(),
                records.tax_year
            );
        }
        return Ok(stored);
    }
    Ok(CarryoverLedger::new(records.prior_carryovers.clone()))
}

async fn dispatch_calculate(
    file: &Path,
    config_path: Option<&Path>,
    db_path: Option<PathBuf>,
    commit: bool,
    json_output: bool,
) -> Result<()> {
    info!("Calculating return from: {:?}", file);

    let records = load_records(file)?;
    let config = load_config(records.tax_year, config_path)?;

    // Only a commit creates the database
    let conn = if commit {
        Some(db::init_database(db_path)?)
    } else {
        db::open_existing(db_path)?
    };
    let prior = match &conn {
        Some(conn) => prior_ledger(conn, &records)?,
        None => CarryoverLedger::new(records.prior_carryovers.clone()),
    };

    let breakdown = calculate_return(&records, &prior, &config)?;

    let run_id = match conn {
        Some(mut conn) if commit => Some(db::commit_return(&mut conn, &breakdown)?),
        _ => None,
    };

    if json_output {
        println!("{}", formatters::format_json(&breakdown));
        return Ok(());
    }

    print!("{}", formatters::format_breakdown_table(&breakdown));
    if let Some(id) = run_id {
        println!(
            "\n{} Committed as run {}; {} carryover entries stored for {}",
            "✓".green().bold(),
            id,
            breakdown.next_year_carryovers.entries.len(),
            breakdown.tax_year + 1
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct BatchItem {
    file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    breakdown: Option<ConsolidatedBreakdown>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn calculate_file(path: &Path, config_path: Option<&Path>) -> Result<ConsolidatedBreakdown> {
    let records = load_records(path)?;
    let config = load_config(records.tax_year, config_path)?;
    let prior = CarryoverLedger::new(records.prior_carryovers.clone());
    Ok(calculate_return(&records, &prior, &config)?)
}

/// Independent returns run on the blocking pool; the ledger database is not touched
async fn dispatch_batch(files: Vec<PathBuf>, config_path: Option<PathBuf>, json_output: bool) -> Result<()> {
    info!("Calculating {} returns", files.len());

    let handles: Vec<_> = files
        .into_iter()
        .map(|path| {
            let config_path = config_path.clone();
            tokio::task::spawn_blocking(move || {
                let result = calculate_file(&path, config_path.as_deref());
                (path, result)
            })
        })
        .collect();

    let mut items = Vec::with_capacity(handles.len());
    for handle in handles {
        let (path, result) = handle.await.context("Batch worker panicked")?;
        let file = path.display().to_string();
        items.push(match result {
            Ok(breakdown) => BatchItem {
                file,
                breakdown: Some(breakdown),
                error: None,
            },
            Err(e) => BatchItem {
                file,
                breakdown: None,
                error: Some(format!("{:#}", e)),
            },
        });
    }

    let failed = items.iter().filter(|i| i.error.is_some()).count();

    if json_output {
        println!("{}", formatters::format_json(&items));
    } else {
        use tabled::{settings::Style, Table, Tabled};

        #[derive(Tabled)]
        struct BatchRow {
            #[tabled(rename = "File")]
            file: String,
            #[tabled(rename = "Year")]
            year: String,
            #[tabled(rename = "Taxable Income")]
            taxable_income: String,
            #[tabled(rename = "Total Tax")]
            total_tax: String,
            #[tabled(rename = "Result")]
            result: String,
        }

        let rows: Vec<BatchRow> = items
            .iter()
            .map(|item| match (&item.breakdown, &item.error) {
                (Some(b), _) => BatchRow {
                    file: item.file.clone(),
                    year: b.tax_year.to_string(),
                    taxable_income: format_usd(b.taxable_income),
                    total_tax: format_usd(b.total_tax),
                    result: "ok".green().to_string(),
                },
                (None, error) => BatchRow {
                    file: item.file.clone(),
                    year: "-".to_string(),
                    taxable_income: "-".to_string(),
                    total_tax: "-".to_string(),
                    result: error.clone().unwrap_or_default().red().to_string(),
                },
            })
            .collect();

        let table = Table::new(rows).with(Style::rounded()).to_string();
        println!("{}", table);
    }

    if failed > 0 {
        bail!("{} of {} returns failed", failed, items.len());
    }
    Ok(())
}

fn dispatch_validate(file: &Path, config_path: Option<&Path>, json_output: bool) -> Result<()> {
    let records = load_records(file)?;
    let issues = validate_records(&records);

    let config_problem = load_config(records.tax_year, config_path)
        .and_then(|config| config.check_complete(records.filing_status).map_err(Into::into))
        .err()
        .map(|e| format!("{:#}", e));

    if json_output {
        #[derive(Serialize)]
        struct ValidationReport<'a> {
            valid: bool,
            issues: &'a [crate::validation::ValidationIssue],
            configuration: Option<String>,
        }
        let report = ValidationReport {
            valid: issues.is_empty() && config_problem.is_none(),
            issues: &issues,
            configuration: config_problem.clone(),
        };
        println!("{}", formatters::format_json(&report));
    } else {
        print!("{}", formatters::format_validation_issues(&issues));
        if let Some(problem) = &config_problem {
            println!("{} {}", "✗".red().bold(), problem);
        }
    }

    if !issues.is_empty() || config_problem.is_some() {
        bail!("{} is not ready to calculate", file.display());
    }
    Ok(())
}

fn dispatch_carryovers(year: i32, db_path: Option<PathBuf>, json_output: bool) -> Result<()> {
    let conn = db::init_database(db_path)?;
    let ledger = db::load_carryovers(&conn, year)?;

    if json_output {
        println!("{}", formatters::format_json(&ledger));
    } else {
        print!("{}", formatters::format_ledger_table(year, &ledger));
    }
    Ok(())
}

fn dispatch_runs(year: i32, db_path: Option<PathBuf>, json_output: bool) -> Result<()> {
    let conn = db::init_database(db_path)?;
    let runs = db::list_runs(&conn, year)?;

    if json_output {
        println!("{}", formatters::format_json(&runs));
    } else {
        print!("{}", formatters::format_runs_table(year, &runs));
    }
    Ok(())
}

fn dispatch_config(year: i32, config_path: Option<&Path>, json_output: bool) -> Result<()> {
    let config = load_config(year, config_path)?;

    if json_output {
        println!("{}", formatters::format_json(&config));
    } else {
        print!("{}", formatters::format_config_table(&config));
    }
    Ok(())
}
