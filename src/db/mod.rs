// Database module - SQLite storage for the carryover ledger

pub mod models;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OpenFlags};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};

use crate::engine::ConsolidatedBreakdown;
use crate::tax::{CarryoverCategory, CarryoverEntry, CarryoverKind, CarryoverLedger};
pub use models::CalculationRun;

fn fedtax_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".fedtax"))
}

/// Get the default database path (~/.fedtax/ledger.db)
pub fn get_default_db_path() -> Result<PathBuf> {
    let fedtax_dir = fedtax_dir()?;

    std::fs::create_dir_all(&fedtax_dir).context("Failed to create .fedtax directory")?;

    Ok(fedtax_dir.join("ledger.db"))
}

/// Open an existing database read-only; `None` when the file does not exist yet
pub fn open_existing(db_path: Option<PathBuf>) -> Result<Option<Connection>> {
    let path = match db_path {
        Some(path) => path,
        None => fedtax_dir()?.join("ledger.db"),
    };
    if !path.exists() {
        debug!("No ledger database at {:?}", path);
        return Ok(None);
    }

    let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .context(format!("Failed to open database at {:?}", path))?;
    Ok(Some(conn))
}

/// Open database connection
pub fn open_db(db_path: Option<PathBuf>) -> Result<Connection> {
    let path = match db_path {
        Some(path) => path,
        None => get_default_db_path()?,
    };
    let conn = Connection::open(&path).context(format!("Failed to open database at {:?}", path))?;

    conn.execute("PRAGMA foreign_keys = ON", [])
        .context("Failed to enable foreign keys")?;

    Ok(conn)
}

/// Create tables and indexes if missing
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(include_str!("schema.sql"))
        .context("Failed to execute schema")?;
    Ok(())
}

/// Open the database at `db_path` (or the default) with the schema in place
pub fn init_database(db_path: Option<PathBuf>) -> Result<Connection> {
    let conn = open_db(db_path)?;
    debug!("Initializing ledger schema");
    init_schema(&conn)?;
    Ok(conn)
}

/// Helper to read Decimal from SQLite (handles both TEXT and INTEGER/REAL storage)
pub fn get_decimal_value(row: &rusqlite::Row, idx: usize) -> Result<Decimal, rusqlite::Error> {
    use rusqlite::types::ValueRef;

    match row.get_ref(idx)? {
        ValueRef::Text(bytes) => {
            let s = std::str::from_utf8(bytes)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))?;
            Decimal::from_str(s)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
        }
        ValueRef::Integer(i) => Ok(Decimal::from(i)),
        ValueRef::Real(f) => Decimal::try_from(f)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Real, Box::new(e))),
        _ => Err(rusqlite::Error::InvalidColumnType(
            idx,
            "decimal".to_string(),
            rusqlite::types::Type::Null,
        )),
    }
}

fn insert_snapshot(conn: &Connection, tax_year: i32, ledger: &CarryoverLedger) -> Result<usize> {
    conn.execute("DELETE FROM carryovers WHERE tax_year = ?1", params![tax_year])?;

    let mut stmt = conn.prepare(
        "INSERT INTO carryovers (
            tax_year, category, kind, origin_year,
            original_amount, remaining_amount, expires_after_years
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for entry in &ledger.entries {
        stmt.execute(params![
            tax_year,
            entry.category.as_str(),
            entry.kind.as_str(),
            entry.origin_year,
            entry.original_amount.to_string(),
            entry.remaining_amount.to_string(),
            entry.expires_after_years,
        ])?;
    }

    Ok(ledger.entries.len())
}

/// Replace the snapshot that starts `tax_year`.
///
/// All rows change in one transaction; a failure leaves the old snapshot.
pub fn save_carryovers(conn: &mut Connection, tax_year: i32, ledger: &CarryoverLedger) -> Result<usize> {
    let tx = conn.transaction()?;
    let count = insert_snapshot(&tx, tax_year, ledger)?;
    tx.commit().context("Failed to commit carryover snapshot")?;

    info!("Saved {} carryover entries for {}", count, tax_year);
    Ok(count)
}

/// Load the snapshot that starts `tax_year` (empty when none is stored)
pub fn load_carryovers(conn: &Connection, tax_year: i32) -> Result<CarryoverLedger> {
    let mut stmt = conn.prepare(
        "SELECT category, kind, origin_year, original_amount, remaining_amount, expires_after_years
         FROM carryovers
         WHERE tax_year = ?1
         ORDER BY category, origin_year, id",
    )?;

    let rows = stmt.query_map(params![tax_year], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i32>(2)?,
            get_decimal_value(row, 3)?,
            get_decimal_value(row, 4)?,
            row.get::<_, Option<u32>>(5)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (category, kind, origin_year, original_amount, remaining_amount, expires_after_years) = row?;
        let category = CarryoverCategory::from_str(&category)
            .map_err(|_| anyhow!("Unknown carryover category '{}'", category))?;
        let kind =
            CarryoverKind::from_str(&kind).map_err(|_| anyhow!("Unknown carryover kind '{}'", kind))?;
        entries.push(CarryoverEntry {
            origin_year,
            category,
            kind,
            original_amount,
            remaining_amount,
            expires_after_years,
        });
    }

    debug!("Loaded {} carryover entries for {}", entries.len(), tax_year);
    Ok(CarryoverLedger::new(entries))
}

/// Tax years with a stored snapshot
pub fn snapshot_years(conn: &Connection) -> Result<Vec<i32>> {
    let mut stmt = conn.prepare("SELECT DISTINCT tax_year FROM carryovers ORDER BY tax_year")?;
    let years = stmt
        .query_map([], |row| row.get::<_, i32>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(years)
}

/// Write the next-year snapshot and the run record together
pub fn commit_return(conn: &mut Connection, breakdown: &ConsolidatedBreakdown) -> Result<i64> {
    let fingerprint = breakdown.fingerprint()?;
    let next_year = breakdown.tax_year + 1;

    let tx = conn.transaction()?;
    let count = insert_snapshot(&tx, next_year, &breakdown.next_year_carryovers)?;
    tx.execute(
        "INSERT INTO calculation_runs (tax_year, filing_status, fingerprint, total_tax)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            breakdown.tax_year,
            breakdown.filing_status.as_str(),
            fingerprint,
            breakdown.total_tax.to_string(),
        ],
    )?;
    let run_id = tx.last_insert_rowid();
    tx.commit().context("Failed to commit calculation")?;

    info!(
        "Committed {} return (run {}), {} carryover entries into {}",
        breakdown.tax_year, run_id, count, next_year
    );
    Ok(run_id)
}

/// Committed runs for a year, newest first
pub fn list_runs(conn: &Connection, tax_year: i32) -> Result<Vec<CalculationRun>> {
    let mut stmt = conn.prepare(
        "SELECT id, tax_year, filing_status, fingerprint, total_tax, created_at
         FROM calculation_runs
         WHERE tax_year = ?1
         ORDER BY id DESC",
    )?;

    let runs = stmt
        .query_map(params![tax_year], |row| {
            Ok(CalculationRun {
                id: Some(row.get(0)?),
                tax_year: row.get(1)?,
                filing_status: row.get(2)?,
                fingerprint: row.get(3)?,
                total_tax: get_decimal_value(row, 4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_decimal_column_accepts_integer_and_real() {
        let conn = memory_db();
        conn.execute(
            "INSERT INTO carryovers (tax_year, category, kind, origin_year, original_amount, remaining_amount)
             VALUES (2025, 'CAPITAL_LOSS', 'LOSS', 2023, 5000, 1250.5)",
            [],
        )
        .unwrap();

        let ledger = load_carryovers(&conn, 2025).unwrap();
        assert_eq!(ledger.entries[0].original_amount, dec!(5000));
        assert_eq!(ledger.entries[0].remaining_amount, dec!(1250.5));
        assert_eq!(ledger.entries[0].expires_after_years, None);
    }

    #[test]
    fn test_unknown_category_is_reported() {
        let conn = memory_db();
        conn.execute(
            "INSERT INTO carryovers (tax_year, category, kind, origin_year, original_amount, remaining_amount)
             VALUES (2025, 'PASSIVE_LOSS', 'LOSS', 2023, '1', '1')",
            [],
        )
        .unwrap();

        let err = load_carryovers(&conn, 2025).unwrap_err();
        assert!(err.to_string().contains("PASSIVE_LOSS"));
    }
}
