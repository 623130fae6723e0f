use std::fs;
use std::path::{Path, PathBuf};

use console::style;
use serde::Serialize;
use strata_migrate::{Context, Direction, MigrationOutcome, Migrator, Target};
use strata_store::{JournalMode, ScriptMigration, SqliteConfig, SqliteStore, SqliteTx};
use tracing::{info, warn};

pub type Result<T = ()> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Options shared by every command.
#[derive(Debug, Clone)]
pub struct Settings {
    pub db: Option<PathBuf>,
    pub dir: PathBuf,
    pub table: String,
    /// Journal mode to switch the database to; `None` leaves it unchanged.
    pub journal_mode: Option<JournalMode>,
}

impl Settings {
    fn db(&self) -> Result<&Path> {
        self.db
            .as_deref()
            .ok_or_else(|| "no database given: pass --db or set STRATA_DB".into())
    }

    fn config(&self) -> SqliteConfig {
        let config = SqliteConfig::default().version_table(self.table.as_str());
        match self.journal_mode {
            Some(mode) => config.journal_mode(mode),
            None => config.keep_journal_mode(),
        }
    }

    /// Open the database, creating it if needed. Only `up` does this.
    fn open_store(&self) -> Result<SqliteStore> {
        Ok(SqliteStore::open_with_config(self.db()?, self.config())?)
    }

    /// Open a database that must already exist.
    fn open_existing_store(&self) -> Result<SqliteStore> {
        let db = self.db()?;
        if !db.is_file() {
            return Err(format!("database not found: {}", db.display()).into());
        }
        Ok(SqliteStore::open_existing(db, self.config())?)
    }

    fn load_migrations(&self) -> Result<Vec<ScriptMigration>> {
        if !self.dir.is_dir() {
            return Err(format!("migrations directory not found: {}", self.dir.display()).into());
        }
        Ok(ScriptMigration::load_dir(&self.dir)?)
    }
}

/// Parse `latest`, `oldest` or an integer version.
pub fn parse_target(s: &str) -> std::result::Result<Target, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "latest" => Ok(Target::Latest),
        "oldest" => Ok(Target::Oldest),
        other => other
            .parse::<i64>()
            .map(Target::Version)
            .map_err(|_| format!("expected a version number, `latest` or `oldest`, got `{s}`")),
    }
}

/// `strata up` — Apply migrations.
pub async fn up(settings: &Settings, target: Target, json: bool) -> Result {
    let outcome = run(settings.clone(), Direction::Up, target).await?;
    report(&outcome, json)
}

/// `strata down` — Revert migrations, after confirmation.
pub async fn down(settings: &Settings, target: Target, yes: bool, json: bool) -> Result {
    if !yes {
        let store = settings.open_existing_store()?;
        let migrations = settings.load_migrations()?;
        let versions: Vec<i64> = migrations.iter().map(|m| m.version()).collect();
        let pending = revert_plan(&versions, store.current_version()?, target);

        if pending.is_empty() {
            println!("Nothing to revert.");
            return Ok(());
        }

        let prompt = format!(
            "Revert {} migration(s) ({}) in {}?",
            pending.len(),
            join(&pending),
            settings.db()?.display()
        );
        let confirmed = inquire::Confirm::new(&prompt)
            .with_default(false)
            .prompt()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let outcome = run(settings.clone(), Direction::Down, target).await?;
    report(&outcome, json)
}

/// Run the migrator on a blocking thread.
///
/// Ctrl-C cancels the context and interrupts the statement in flight, so the
/// current step rolls back without waiting for its script to finish.
async fn run(settings: Settings, direction: Direction, target: Target) -> Result<MigrationOutcome> {
    let ctx = Context::new();
    let store = match direction {
        Direction::Up => settings.open_store()?,
        Direction::Down => settings.open_existing_store()?,
    };
    let migrations = settings.load_migrations()?;
    info!(count = migrations.len(), dir = %settings.dir.display(), "loaded migrations");

    let interrupt = {
        let ctx = ctx.clone();
        let handle = store.interrupt_handle()?;
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, rolling back the current step");
                ctx.cancel();
                handle.interrupt();
            }
        })
    };

    let task = tokio::task::spawn_blocking(move || -> Result<MigrationOutcome> {
        let migrator = Migrator::new(
            &store,
            migrations.into_iter().map(ScriptMigration::boxed::<SqliteTx>),
        )?;
        let outcome = match direction {
            Direction::Up => migrator.up(&ctx, target)?,
            Direction::Down => migrator.down(&ctx, target)?,
        };
        Ok(outcome)
    });

    let result = task.await;
    interrupt.abort();
    result?
}

fn report(outcome: &MigrationOutcome, json: bool) -> Result {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    if outcome.is_noop() {
        println!("Already at version {}.", outcome.version);
        return Ok(());
    }

    let verb = match outcome.direction {
        Direction::Up => "Applied",
        Direction::Down => "Reverted",
    };
    println!(
        "{} {} migration(s): {}",
        style(verb).green().bold(),
        outcome.applied.len(),
        join(&outcome.applied)
    );
    println!("Version {} -> {}", outcome.from_version, outcome.version);
    Ok(())
}

#[derive(Serialize)]
struct StatusReport<'a> {
    database: String,
    journal_mode: String,
    size_bytes: u64,
    version_table: &'a str,
    current_version: i64,
    migrations: Vec<MigrationState<'a>>,
}

#[derive(Serialize)]
struct MigrationState<'a> {
    version: i64,
    name: &'a str,
    applied: bool,
}

/// `strata status` — Show the current version and migration states.
pub fn status(settings: &Settings, json: bool) -> Result {
    let store = settings.open_existing_store()?;
    let migrations = settings.load_migrations()?;
    let current = store.current_version()?;

    let report = StatusReport {
        database: settings.db()?.display().to_string(),
        journal_mode: store.journal_mode()?,
        size_bytes: store.file_size()?,
        version_table: store.version_table(),
        current_version: current,
        migrations: migrations
            .iter()
            .map(|m| MigrationState {
                version: m.version(),
                name: m.name(),
                applied: m.version() <= current,
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Database: {} (SQLite, {} mode)",
        report.database, report.journal_mode
    );
    println!("Size: {}", format_bytes(report.size_bytes));
    println!("Version table: {}", report.version_table);
    println!("Current version: {}", report.current_version);
    println!();

    if report.migrations.is_empty() {
        println!("  (no migrations in {})", settings.dir.display());
        return Ok(());
    }

    println!("  {:>10}  {:<32}  {}", "Version", "Name", "State");
    println!("  {}", "-".repeat(54));
    for m in &report.migrations {
        let state = if m.applied {
            style("applied").green()
        } else {
            style("pending").yellow()
        };
        println!("  {:>10}  {:<32}  {}", m.version, truncate(m.name, 32), state);
    }

    let pending = report.migrations.iter().filter(|m| !m.applied).count();
    println!("  {}", "-".repeat(54));
    println!("  {pending} pending");
    Ok(())
}

/// `strata new <name>` — Scaffold the next up/down pair.
pub fn new(settings: &Settings, name: &str) -> Result {
    let name = sanitize_name(name)?;
    fs::create_dir_all(&settings.dir)?;

    let next = ScriptMigration::load_dir(&settings.dir)?
        .last()
        .map_or(1, |m| m.version() + 1);

    let (up, down) = scaffold(&settings.dir, next, &name)?;
    println!("  Created: {}", up.display());
    println!("  Created: {}", down.display());
    Ok(())
}

fn scaffold(dir: &Path, version: i64, name: &str) -> Result<(PathBuf, PathBuf)> {
    let up = dir.join(format!("{version}_{name}.up.sql"));
    let down = dir.join(format!("{version}_{name}.down.sql"));
    fs::write(&up, format!("-- {version} {name}: apply\n"))?;
    fs::write(&down, format!("-- {version} {name}: revert\n"))?;
    Ok((up, down))
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Versions `down` would revert, highest first.
fn revert_plan(versions: &[i64], current: i64, target: Target) -> Vec<i64> {
    let Some(target) = target.resolve(versions) else {
        return Vec::new();
    };
    let mut plan: Vec<i64> = versions
        .iter()
        .copied()
        .filter(|&v| v > target && v <= current)
        .collect();
    plan.reverse();
    plan
}

fn sanitize_name(name: &str) -> Result<String> {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect();

    if cleaned.is_empty() || !cleaned.chars().all(|c| c == '_' || c.is_ascii_alphanumeric()) {
        return Err(format!("invalid migration name `{name}`: use letters, digits and underscores").into());
    }
    Ok(cleaned)
}

fn join(versions: &[i64]) -> String {
    versions
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max - 3).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(dir: &Path) -> Settings {
        Settings {
            db: Some(dir.join("app.db")),
            dir: dir.join("migrations"),
            table: "schema_migrations".to_string(),
            journal_mode: None,
        }
    }

    #[test]
    fn parses_targets() {
        assert_eq!(parse_target("latest").unwrap(), Target::Latest);
        assert_eq!(parse_target("OLDEST").unwrap(), Target::Oldest);
        assert_eq!(parse_target("42").unwrap(), Target::Version(42));
        assert_eq!(parse_target("-1").unwrap(), Target::Version(-1));
        assert!(parse_target("newest").is_err());
    }

    #[test]
    fn revert_plan_counts_down_from_current() {
        let versions = [1, 3, 4, 5];
        assert_eq!(revert_plan(&versions, 5, Target::Oldest), vec![5, 4, 3]);
        assert_eq!(revert_plan(&versions, 4, Target::Version(3)), vec![4]);
        assert!(revert_plan(&versions, 1, Target::Oldest).is_empty());
        assert!(revert_plan(&[], 3, Target::Oldest).is_empty());
    }

    #[test]
    fn sanitizes_names() {
        assert_eq!(sanitize_name("Add users-email").unwrap(), "add_users_email");
        assert!(sanitize_name("  ").is_err());
        assert!(sanitize_name("drop;table").is_err());
    }

    #[test]
    fn new_numbers_after_highest_version() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());

        new(&settings, "create users").unwrap();
        new(&settings, "add_email").unwrap();

        let loaded = ScriptMigration::load_dir(&settings.dir).unwrap();
        let versions: Vec<i64> = loaded.iter().map(|m| m.version()).collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(loaded[0].name(), "create_users");
        assert!(settings.dir.join("2_add_email.down.sql").exists());
    }

    #[test]
    fn status_on_fresh_database() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        new(&settings, "init").unwrap();
        drop(settings.open_store().unwrap());

        status(&settings, true).unwrap();
        assert_eq!(settings.open_existing_store().unwrap().current_version().unwrap(), 0);
    }

    #[test]
    fn status_on_missing_database_creates_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = settings(tmp.path());
        settings.db = Some(tmp.path().join("typo.db"));
        new(&settings, "init").unwrap();

        let err = status(&settings, true).unwrap_err();
        assert!(err.to_string().contains("database not found"), "{err}");
        assert!(!tmp.path().join("typo.db").exists());
    }

    #[test]
    fn status_keeps_journal_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = settings(tmp.path());
        new(&settings, "init").unwrap();

        settings.journal_mode = Some(JournalMode::Delete);
        drop(settings.open_store().unwrap());

        settings.journal_mode = None;
        status(&settings, true).unwrap();
        let store = settings.open_existing_store().unwrap();
        assert_eq!(store.journal_mode().unwrap(), "delete");
    }

    #[tokio::test]
    async fn down_on_missing_database_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        new(&settings, "init").unwrap();

        let err = run(settings.clone(), Direction::Down, Target::Oldest)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("database not found"), "{err}");
        assert!(!tmp.path().join("app.db").exists());
    }

    #[test]
    fn missing_database_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = settings(tmp.path());
        settings.db = None;
        let err = status(&settings, false).unwrap_err();
        assert!(err.to_string().contains("--db"));
    }

    #[tokio::test]
    async fn up_then_down_with_scripts() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        fs::create_dir_all(&settings.dir).unwrap();
        scaffold(&settings.dir, 1, "users").unwrap();
        fs::write(
            settings.dir.join("1_users.up.sql"),
            "CREATE TABLE users (id INTEGER PRIMARY KEY);",
        )
        .unwrap();
        fs::write(settings.dir.join("2_posts.up.sql"), "CREATE TABLE posts (id INTEGER);").unwrap();
        fs::write(settings.dir.join("2_posts.down.sql"), "DROP TABLE posts;").unwrap();

        let outcome = run(settings.clone(), Direction::Up, Target::Latest)
            .await
            .unwrap();
        assert_eq!(outcome.applied, vec![1, 2]);

        let outcome = run(settings.clone(), Direction::Down, Target::Oldest)
            .await
            .unwrap();
        assert_eq!(outcome.applied, vec![2]);
        assert_eq!(settings.open_store().unwrap().current_version().unwrap(), 1);
    }

    #[test]
    fn truncates_long_names() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a_very_long_migration_name", 10), "a_very_...");
    }
}
