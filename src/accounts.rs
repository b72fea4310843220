use axum::extract::State;
use axum::Json;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::ApiError;
use crate::inference::AccountRef;
use crate::routes::AppState;
use crate::schema::utc_now_ms;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountRow {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub currency: String,
    pub initial_balance: f64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Deserialize)]
pub struct AccountCreate {
    pub user_id: i64,
    pub name: String,
    pub currency: String,
    pub initial_balance: f64,
}

#[derive(Debug, Deserialize)]
pub struct AccountRequest {
    pub user_id: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AccountPublic {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub currency: String,
    pub initial_balance: f64,
    pub latest_balance: f64,
}

pub async fn create_account(
    pool: &SqlitePool,
    req: &AccountCreate,
) -> Result<AccountRow, ApiError> {
    let row = sqlx::query_as::<_, AccountRow>(
        r#"
        INSERT INTO accounts (user_id, name, currency, initial_balance, created_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id, user_id, name, currency, initial_balance, created_at
        "#,
    )
    .bind(req.user_id)
    .bind(&req.name)
    .bind(&req.currency)
    .bind(req.initial_balance)
    .bind(utc_now_ms())
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Accounts for a user, each with its derived latest balance. The initial
/// balance is the anchor; the current value is never stored.
pub async fn list_accounts(
    pool: &SqlitePool,
    user_id: i64,
) -> Result<Vec<AccountPublic>, ApiError> {
    let rows = sqlx::query_as::<_, AccountPublic>(
        r#"
        SELECT
            a.id, a.user_id, a.name, a.currency, a.initial_balance,
            a.initial_balance + COALESCE(SUM(
                CASE t.entry_type
                    WHEN 'credit' THEN t.amount
                    WHEN 'debit' THEN -t.amount
                    ELSE 0.0
                END
            ), 0.0) AS latest_balance
        FROM accounts a
        LEFT JOIN transactions t ON t.account_id = a.id
        WHERE a.user_id = ?
        GROUP BY a.id
        ORDER BY a.id
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Compact id/name pairs handed to the inference adapter so it can resolve
/// transfer endpoints.
pub async fn account_refs(pool: &SqlitePool, user_id: i64) -> Result<Vec<AccountRef>, ApiError> {
    let rows = sqlx::query_as::<_, AccountRef>(
        "SELECT id, name FROM accounts WHERE user_id = ? ORDER BY id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn create_account_handler(
    State(state): State<AppState>,
    Json(req): Json<AccountCreate>,
) -> Result<Json<AccountPublic>, ApiError> {
    let row = create_account(&state.pool, &req).await?;
    Ok(Json(AccountPublic {
        id: row.id,
        user_id: row.user_id,
        name: row.name,
        currency: row.currency,
        initial_balance: row.initial_balance,
        latest_balance: row.initial_balance,
    }))
}

pub async fn list_accounts_handler(
    State(state): State<AppState>,
    Json(req): Json<AccountRequest>,
) -> Result<Json<Vec<AccountPublic>>, ApiError> {
    let rows = list_accounts(&state.pool, req.user_id).await?;
    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::test_support::memory_pool;

    #[tokio::test]
    async fn latest_balance_reflects_signed_entries() {
        let pool = memory_pool().await;
        let account = create_account(
            &pool,
            &AccountCreate {
                user_id: 1,
                name: "Chequing".into(),
                currency: "CAD".into(),
                initial_balance: 100.0,
            },
        )
        .await
        .unwrap();

        sqlx::query(
            "INSERT INTO transactions (user_id, account_id, category_id, name, amount, entry_type, date)
             VALUES (1, ?, 1, 'Pay', 50.0, 'credit', ?), (1, ?, 1, 'Lunch', 30.0, 'debit', ?)",
        )
        .bind(account.id)
        .bind(utc_now_ms())
        .bind(account.id)
        .bind(utc_now_ms())
        .execute(&pool)
        .await
        .unwrap();

        let listed = list_accounts(&pool, 1).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].latest_balance, 120.0);
        assert_eq!(listed[0].initial_balance, 100.0);
    }
}
