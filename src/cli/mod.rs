use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod formatters;

#[derive(Parser)]
#[command(name = "fedtax")]
#[command(
    version,
    about = "Multi-form federal tax adjustment and limitation engine"
)]
#[command(
    long_about = "Compute Forms 4797, 1116, 8606, 5329, 982 and 6251 for one return, consolidate them into a single tax figure and carry unused losses and credits into the next year."
)]
pub struct Cli {
    /// Disable colorized/ANSI output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Output results in JSON format
    #[arg(long = "json", global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Calculate one return from a JSON records file
    Calculate {
        /// Path to the return records (JSON)
        file: PathBuf,

        /// Tax-year constants file (TOML) overriding the lookup
        #[arg(long)]
        config: Option<PathBuf>,

        /// Carryover ledger database (defaults to ~/.fedtax/ledger.db)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Store next year's carryovers and record the run
        #[arg(long)]
        commit: bool,
    },

    /// Calculate several independent returns concurrently
    Batch {
        /// Paths to return records (JSON)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Tax-year constants file (TOML) used for every return
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Check a records file without calculating
    Validate {
        /// Path to the return records (JSON)
        file: PathBuf,

        /// Tax-year constants file (TOML) overriding the lookup
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show the carryover snapshot that starts a tax year
    Carryovers {
        /// Tax year the snapshot is available in
        year: i32,

        /// Carryover ledger database (defaults to ~/.fedtax/ledger.db)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Show committed calculations for a tax year
    Runs {
        /// Tax year of the committed returns
        year: i32,

        /// Carryover ledger database (defaults to ~/.fedtax/ledger.db)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Show the resolved constants for a tax year
    Config {
        /// Tax year
        year: i32,

        /// Tax-year constants file (TOML) overriding the lookup
        #[arg(long)]
        config: Option<PathBuf>,
    },
}
