use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use strata_migrate::Target;
use strata_store::JournalMode;

mod commands;

/// strata: Versioned migrations for SQLite databases.
///
/// Applies, reverts and inspects `<version>_<name>.up.sql` / `.down.sql`
/// migrations, one transaction per migration.
#[derive(Parser)]
#[command(name = "strata", version, about, long_about = None)]
struct Cli {
    /// Path to the SQLite database file.
    #[arg(long, env = "STRATA_DB", global = true)]
    db: Option<PathBuf>,

    /// Directory holding the migration scripts.
    #[arg(long, env = "STRATA_MIGRATIONS", default_value = "migrations", global = true)]
    dir: PathBuf,

    /// Table that records the current version.
    #[arg(long, env = "STRATA_TABLE", default_value = "schema_migrations", global = true)]
    table: String,

    /// Switch the database to this journal mode. Left unchanged when omitted.
    #[arg(long, value_enum, global = true)]
    journal_mode: Option<JournalArg>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace). `RUST_LOG` wins.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum JournalArg {
    Wal,
    Delete,
    Memory,
}

impl From<JournalArg> for JournalMode {
    fn from(arg: JournalArg) -> Self {
        match arg {
            JournalArg::Wal => JournalMode::Wal,
            JournalArg::Delete => JournalMode::Delete,
            JournalArg::Memory => JournalMode::Memory,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Apply migrations up to a target version.
    Up {
        /// Version to reach: a number, `latest` or `oldest`.
        #[arg(long, default_value = "latest", value_parser = commands::parse_target)]
        target: Target,

        /// Print the outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Revert migrations down to a target version.
    Down {
        /// Version to reach: a number, `latest` or `oldest`.
        #[arg(long, default_value = "oldest", value_parser = commands::parse_target)]
        target: Target,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Print the outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the current version and which migrations are applied.
    Status {
        /// Print the status as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Scaffold the next up/down script pair.
    New {
        /// Migration name, e.g. `add_users_email`.
        name: String,
    },
}

fn init_logging(verbose: u8, format: LogFormat) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    match format {
        LogFormat::Text => fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init()
            .ok(),
        LogFormat::Json => fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .with_writer(std::io::stderr)
            .try_init()
            .ok(),
    };
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let settings = commands::Settings {
        db: cli.db,
        dir: cli.dir,
        table: cli.table,
        journal_mode: cli.journal_mode.map(JournalMode::from),
    };

    let result: commands::Result = match cli.command {
        Commands::Up { target, json } => commands::up(&settings, target, json).await,
        Commands::Down { target, yes, json } => commands::down(&settings, target, yes, json).await,
        Commands::Status { json } => commands::status(&settings, json),
        Commands::New { name } => commands::new(&settings, &name),
    };

    if let Err(e) = result {
        eprintln!("{} {e}", console::style("error:").red().bold());
        process::exit(1);
    }
}
