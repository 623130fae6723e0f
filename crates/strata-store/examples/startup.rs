//! # Startup migrations — bring a SQLite file up to date on boot
//!
//! Demonstrates the usual application flow: at startup the binary knows a
//! set of migrations, opens its database and converges on the latest one.
//! A later release ships one more migration; the next boot applies only
//! that one.
//!
//! ```text
//! release 1 boots:  0 → 1 → 2
//! release 2 boots:  2 → 3          (1 and 2 are already recorded)
//! rollback:         3 → 2 → 1
//! ```
//!
//! Run: `cargo run -p strata-store --features sqlite --example startup`

use strata_migrate::{migration, BoxError, Context, Migrator, Target};
use strata_store::{ScriptMigration, SqliteStore, SqliteTx};

// ── Code migrations ─────────────────────────────────────────────────

#[migration(version = 2, down = forget_admin)]
fn seed_admin(_ctx: &Context, tx: &mut SqliteTx) -> Result<(), BoxError> {
    tx.connection()
        .execute("INSERT INTO users (name) VALUES (?1)", ["admin"])?;
    Ok(())
}

fn forget_admin(_ctx: &Context, tx: &mut SqliteTx) -> Result<(), BoxError> {
    tx.connection()
        .execute("DELETE FROM users WHERE name = ?1", ["admin"])?;
    Ok(())
}

#[migration(version = 3, name = "add_email", down = drop_email)]
fn add_email(_ctx: &Context, tx: &mut SqliteTx) -> Result<(), BoxError> {
    tx.connection()
        .execute_batch("ALTER TABLE users ADD COLUMN email TEXT")?;
    Ok(())
}

fn drop_email(_ctx: &Context, tx: &mut SqliteTx) -> Result<(), BoxError> {
    tx.connection()
        .execute_batch("ALTER TABLE users DROP COLUMN email")?;
    Ok(())
}

fn release_one() -> Result<Vec<Box<dyn strata_migrate::Migration<SqliteTx>>>, BoxError> {
    let create_users = ScriptMigration::new(
        1,
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        "DROP TABLE users",
    )?
    .named("create_users");
    Ok(vec![create_users.boxed(), register_seed_admin()])
}

// ── Main ────────────────────────────────────────────────────────────

fn main() -> Result<(), BoxError> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("app.db");
    let ctx = Context::new();

    println!("=== Release 1 ===\n");
    {
        let store = SqliteStore::open(&path)?;
        let migrator = Migrator::new(&store, release_one()?)?;
        let outcome = migrator.up(&ctx, Target::Latest)?;
        println!(
            "  {} -> {} (applied {:?})",
            outcome.from_version, outcome.version, outcome.applied
        );
    }

    println!("\n=== Release 2 ===\n");
    let store = SqliteStore::open(&path)?;
    let mut migrations = release_one()?;
    migrations.push(register_add_email());
    let migrator = Migrator::new(&store, migrations)?;

    let outcome = migrator.up(&ctx, Target::Latest)?;
    println!(
        "  {} -> {} (applied {:?})",
        outcome.from_version, outcome.version, outcome.applied
    );

    let again = migrator.up(&ctx, Target::Latest)?;
    println!("  second boot is a no-op: {}", again.is_noop());

    println!("\n=== Roll back to the oldest release ===\n");
    let outcome = migrator.down(&ctx, Target::Oldest)?;
    println!(
        "  {} -> {} (reverted {:?})",
        outcome.from_version, outcome.version, outcome.applied
    );
    println!("  recorded version: {}", store.current_version()?);

    Ok(())
}
