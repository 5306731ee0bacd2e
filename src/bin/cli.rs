use sqlx::Row;
use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use axum::http::Method;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use enquiry_desk::routes;

#[derive(Parser, Debug)]
#[command(author, version, about = "enquiry-desk operator tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the route permission registry in match order
    Routes,
    /// Show which rule a request would match and what it requires
    Check { method: String, path: String },
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Routes => print_routes(),
        Commands::Check { method, path } => check_route(&method, &path)?,
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
    }

    Ok(())
}

fn print_routes() {
    let registry = routes::registry();
    println!("{:<8} {:<32} {:<6} {:<6} {:<18} {}", "Method", "Path", "Auth", "Check", "Slug", "Permissions");
    for rule in registry.rules() {
        println!(
            "{:<8} {:<32} {:<6} {:<6} {:<18} {}",
            rule.method.as_str(),
            rule.pattern.as_str(),
            rule.authenticate,
            rule.authorize,
            rule.slug.as_deref().unwrap_or("-"),
            rule.permissions
        );
    }
}

fn check_route(method: &str, path: &str) -> anyhow::Result<()> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid method: {}", method))?;
    let registry = routes::registry();

    match registry.match_route(path, &method) {
        Some(rule) => {
            println!("matched {} {}", rule.method, rule.pattern.as_str());
            println!("  authenticate: {}", rule.authenticate);
            println!("  authorize:    {}", rule.authorize);
            println!("  permissions:  {}", rule.permissions);
            if let Some(slug) = &rule.slug {
                println!("  slug:         {}", slug);
            }
            if let Some(params) = rule.pattern.captures(path) {
                for (name, value) in params {
                    println!("  :{} = {}", name, value);
                }
            }
        }
        None => println!("no rule matches {} {}; request would be denied", method, path),
    }
    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let db_applied = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
        .fetch_optional(pool)
        .await?;
    let applied_versions: HashSet<i64> = if db_applied.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Prefer ./migrations; containers may run from a different CWD.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}
