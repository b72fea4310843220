use std::str::FromStr;

use chrono::{NaiveDateTime, Timelike, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

const CREATE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        name TEXT NOT NULL,
        currency TEXT NOT NULL,
        initial_balance REAL NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        name TEXT NOT NULL,
        lower_cased_name TEXT NOT NULL,
        entry_type TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id),
        account_id INTEGER NOT NULL REFERENCES accounts(id),
        category_id INTEGER NOT NULL REFERENCES categories(id),
        name TEXT NOT NULL,
        amount REAL NOT NULL,
        entry_type TEXT NOT NULL,
        date TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS suggested_categories (
        transaction_id INTEGER NOT NULL REFERENCES transactions(id) ON DELETE CASCADE,
        category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
        PRIMARY KEY (transaction_id, category_id)
    )
    "#,
];

pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for stmt in CREATE_TABLES {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}

/// Pre-fills the reserved rows on an empty database: user 1 plus the
/// "Unknown" fallback bucket and the credit/debit "Transfer" pair.
pub async fn seed_reserved_rows(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    if users > 0 {
        return Ok(());
    }

    tracing::info!("empty database, seeding reserved rows");
    sqlx::query("INSERT INTO users (created_at) VALUES (?)")
        .bind(utc_now_ms())
        .execute(pool)
        .await?;
    for (name, entry_type) in [
        ("Unknown", "unknown"),
        ("Transfer", "credit"),
        ("Transfer", "debit"),
    ] {
        sqlx::query(
            "INSERT INTO categories (user_id, name, lower_cased_name, entry_type) VALUES (1, ?, ?, ?)",
        )
        .bind(name)
        .bind(name.to_lowercase())
        .bind(entry_type)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Current UTC time truncated to millisecond precision. SQLite's date
/// functions reject fractional seconds longer than three digits, so every
/// timestamp we persist goes through this.
pub fn utc_now_ms() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    let millis = now.nanosecond() / 1_000_000;
    now.with_nanosecond(millis * 1_000_000).unwrap_or(now)
}

/// Renders a stored timestamp the way the public API exposes dates.
pub fn public_date(date: NaiveDateTime) -> String {
    date.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// In-memory database shared across the pool's single connection.
    pub async fn memory_pool() -> SqlitePool {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .expect("memory url")
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .expect("connect in-memory sqlite");
        migrate(&pool).await.expect("migrate");
        seed_reserved_rows(&pool).await.expect("seed");
        pool
    }
}
