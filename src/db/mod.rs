mod models;
pub mod users;

pub use models::*;

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

use crate::config::DatabaseConfig;

pub type DbPool = SqlitePool;

/// Split a schema file into statements, dropping `--` comment lines
fn schema_statements(sql: &str) -> impl Iterator<Item = String> + '_ {
    sql.split(';').filter_map(|chunk| {
        let statement = chunk
            .lines()
            .filter(|line| !line.trim_start().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let statement = statement.trim();
        (!statement.is_empty()).then(|| statement.to_string())
    })
}

/// Apply every statement of a schema file in order
async fn apply_schema(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in schema_statements(sql) {
        sqlx::query(&statement).execute(pool).await?;
    }
    Ok(())
}

pub async fn init(config: &DatabaseConfig) -> Result<DbPool> {
    info!("Initializing database at {}", config.url);

    let pool = connect(&config.url, config.max_connections)
        .await
        .with_context(|| format!("Failed to open database: {}", config.url))?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// Open a pool and make sure the schema exists.
pub async fn connect(url: &str, max_connections: u32) -> Result<DbPool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;

    // Enable WAL mode for better concurrency
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: Users table
    apply_schema(pool, include_str!("../../migrations/001_users.sql"))
        .await
        .context("Failed to apply users schema")?;

    info!("Migrations completed");
    Ok(())
}
