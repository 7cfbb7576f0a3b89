use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Local;
use clap::{Parser, Subcommand};

use inboxledger::{
    ensure_partitions_current, run_import, split_entry, Config, EmlMailStore, Error,
    SqliteLedgerStore,
};

#[derive(Parser)]
#[command(name = "inboxledger", version, about = "Payment alert mail to ledger rows")]
struct Cli {
    /// Directory holding settings.json and attribution.csv
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    /// SQLite ledger database
    #[arg(long, default_value = "ledger.db")]
    ledger: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify alert mail and place receipts into partitions
    Import {
        /// Directory tree of .eml files
        #[arg(long)]
        mail_dir: PathBuf,

        /// Leave threads unmarked even when they processed cleanly
        #[arg(long)]
        no_mark: bool,
    },
    /// Create partitions until the newest window covers today
    CatchUp,
    /// Split one recorded row into two
    Split {
        #[arg(long)]
        partition: String,

        #[arg(long)]
        row: usize,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    let config = Config::load(&cli.config_dir)?;
    let ledger = SqliteLedgerStore::open(&cli.ledger)?;
    let today = Local::now().date_naive();

    match cli.command {
        Command::Import { mail_dir, no_mark } => {
            let mail = EmlMailStore::open(mail_dir)?;
            let summary = run_import(&mail, &ledger, &config, today, !no_mark)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.errors > 0 {
                println!(
                    "{} message(s) could not be processed; details are on the placed rows",
                    summary.errors
                );
            }
        }
        Command::CatchUp => {
            let created = ensure_partitions_current(&ledger, &config, today)?;
            println!("created {created} partition(s)");
        }
        Command::Split { partition, row } => {
            let range = split_entry(&ledger, &config, &partition, row)?;
            println!("split rows {}..={} in {partition}", range.start, range.end);
        }
    }
    Ok(())
}
