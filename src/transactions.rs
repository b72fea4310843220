use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::ApiError;
use crate::routes::AppState;
use crate::schema::{public_date, utc_now_ms};

/// Sign of a ledger entry's contribution to its account balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum EntryType {
    Credit,
    Debit,
    Unknown,
}

impl EntryType {
    /// Contribution to a running balance. Anything outside credit/debit
    /// counts as zero.
    pub fn signed(self, amount: f64) -> f64 {
        match self {
            EntryType::Credit => amount,
            EntryType::Debit => -amount,
            EntryType::Unknown => 0.0,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransactionRow {
    pub id: i64,
    pub user_id: i64,
    pub account_id: i64,
    pub category_id: i64,
    pub name: String,
    pub amount: f64,
    pub entry_type: EntryType,
    pub date: NaiveDateTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionCreate {
    pub user_id: i64,
    pub account_id: i64,
    pub category_id: i64,
    pub name: String,
    pub amount: f64,
    pub entry_type: EntryType,
    /// `YYYY-MM-DD`; the stored timestamp takes the current UTC time of day.
    /// Defaults to now when absent.
    pub date: Option<String>,
    #[serde(default)]
    pub suggested_categories: Vec<i64>,
}

/// Exactly the fields an edit may touch, each optional. Applied
/// all-or-nothing inside a single transaction.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionEditRequest {
    pub category_id: Option<i64>,
    pub account_id: Option<i64>,
    /// Fixed format `%Y-%m-%dT%H:%M:%S%.3fZ`.
    pub date: Option<String>,
    pub name: Option<String>,
    pub amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionGetByUserRequest {
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TransactionGetByIdRequest {
    pub user_id: i64,
    pub transaction_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TransactionDeleteRequest {
    pub user_id: i64,
    pub transaction_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedCategoryPublic {
    pub category_id: i64,
    pub category_name: String,
}

/// Fully enriched public view of a ledger entry, including the derived
/// running balance of its account at that point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionPublic {
    pub id: i64,
    pub user_id: i64,
    pub account_id: i64,
    pub category_id: i64,
    pub name: String,
    pub amount: f64,
    pub entry_type: EntryType,
    pub date: String,
    pub category_name: String,
    pub account_name: String,
    pub currency: String,
    pub running_balance: f64,
    pub suggested_categories: Vec<SuggestedCategoryPublic>,
}

#[derive(Debug, sqlx::FromRow)]
struct EnrichedRow {
    id: i64,
    user_id: i64,
    account_id: i64,
    category_id: i64,
    name: String,
    amount: f64,
    entry_type: EntryType,
    date: NaiveDateTime,
    category_name: Option<String>,
    account_name: Option<String>,
    currency: Option<String>,
    running_balance: f64,
}

impl EnrichedRow {
    fn into_public(self, suggested: Vec<SuggestedCategoryPublic>) -> TransactionPublic {
        TransactionPublic {
            id: self.id,
            user_id: self.user_id,
            account_id: self.account_id,
            category_id: self.category_id,
            name: self.name,
            amount: self.amount,
            entry_type: self.entry_type,
            date: public_date(self.date),
            category_name: self.category_name.unwrap_or_default(),
            account_name: self.account_name.unwrap_or_default(),
            currency: self.currency.unwrap_or_default(),
            running_balance: self.running_balance,
            suggested_categories: suggested,
        }
    }
}

/// Unions a synthetic per-account "Initial Balance" row (id `-account_id`,
/// dated at account creation) with the real entries, then computes the
/// cumulative signed sum per account. Ordering is date then id, so the
/// synthetic row sorts before real entries sharing the creation timestamp.
const RUNNING_BALANCE_CTE: &str = r#"
WITH combined AS (
    SELECT
        -a.id AS id,
        a.user_id AS user_id,
        a.id AS account_id,
        1 AS category_id,
        'Initial Balance' AS name,
        a.initial_balance AS amount,
        'credit' AS entry_type,
        a.created_at AS date,
        'Initial Balance' AS category_name,
        a.name AS account_name,
        a.currency AS currency
    FROM accounts a
    WHERE a.user_id = ?
    UNION ALL
    SELECT
        t.id, t.user_id, t.account_id, t.category_id, t.name, t.amount,
        t.entry_type, t.date,
        c.name AS category_name,
        a.name AS account_name,
        a.currency AS currency
    FROM transactions t
    LEFT JOIN accounts a ON a.id = t.account_id
    LEFT JOIN categories c ON c.id = t.category_id
    WHERE t.user_id = ?
),
running AS (
    SELECT
        combined.*,
        SUM(
            CASE entry_type
                WHEN 'credit' THEN amount
                WHEN 'debit' THEN -amount
                ELSE 0.0
            END
        ) OVER (
            PARTITION BY account_id
            ORDER BY date, id
            ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW
        ) AS running_balance
    FROM combined
)
"#;

/// Persists a new ledger entry. Category and every suggested-category id are
/// validated first; the whole insert is one transaction.
pub async fn create_transaction(
    pool: &SqlitePool,
    create: &TransactionCreate,
) -> Result<TransactionRow, ApiError> {
    let mut tx = pool.begin().await?;

    let category: Option<i64> = sqlx::query_scalar("SELECT id FROM categories WHERE id = ?")
        .bind(create.category_id)
        .fetch_optional(&mut *tx)
        .await?;
    if category.is_none() {
        return Err(ApiError::NotFound("category"));
    }
    for suggested_id in &create.suggested_categories {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM categories WHERE id = ?")
            .bind(suggested_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(ApiError::NotFound("suggested category"));
        }
    }

    let now = utc_now_ms();
    let date = match &create.date {
        Some(value) => {
            let day = NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map_err(|_| ApiError::Validation(format!("invalid date `{value}`")))?;
            day.and_time(now.time())
        }
        None => now,
    };

    let row = sqlx::query_as::<_, TransactionRow>(
        r#"
        INSERT INTO transactions (user_id, account_id, category_id, name, amount, entry_type, date)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING id, user_id, account_id, category_id, name, amount, entry_type, date
        "#,
    )
    .bind(create.user_id)
    .bind(create.account_id)
    .bind(create.category_id)
    .bind(&create.name)
    .bind(create.amount)
    .bind(create.entry_type)
    .bind(date)
    .fetch_one(&mut *tx)
    .await?;

    for suggested_id in &create.suggested_categories {
        sqlx::query("INSERT INTO suggested_categories (transaction_id, category_id) VALUES (?, ?)")
            .bind(row.id)
            .bind(suggested_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(row)
}

/// One enriched entry. The suggested-category shortlist is resolved only when
/// the entry sits in the unknown bucket; it is always a list, never absent.
pub async fn get_transaction(
    pool: &SqlitePool,
    user_id: i64,
    transaction_id: i64,
) -> Result<TransactionPublic, ApiError> {
    let sql = format!("{RUNNING_BALANCE_CTE} SELECT * FROM running WHERE id = ?");
    let row = sqlx::query_as::<_, EnrichedRow>(&sql)
        .bind(user_id)
        .bind(user_id)
        .bind(transaction_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::NotFound("transaction"))?;

    let mut suggested = Vec::new();
    if row
        .category_name
        .as_deref()
        .is_some_and(|n| n.eq_ignore_ascii_case(crate::categories::UNKNOWN))
    {
        suggested = suggestions_for(pool, &[row.id]).await?.remove(&row.id).unwrap_or_default();
    }
    Ok(row.into_public(suggested))
}

/// All of a user's entries across accounts, newest first, each carrying the
/// running balance scoped to its own account. Includes the synthetic initial
/// rows. Suggested categories resolve through one batched query.
pub async fn list_transactions(
    pool: &SqlitePool,
    user_id: i64,
) -> Result<Vec<TransactionPublic>, ApiError> {
    let sql = format!("{RUNNING_BALANCE_CTE} SELECT * FROM running ORDER BY date DESC, id DESC");
    let rows = sqlx::query_as::<_, EnrichedRow>(&sql)
        .bind(user_id)
        .bind(user_id)
        .fetch_all(pool)
        .await?;

    let real_ids: Vec<i64> = rows.iter().map(|r| r.id).filter(|id| *id > 0).collect();
    let mut suggested_map = suggestions_for(pool, &real_ids).await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let suggested = suggested_map.remove(&row.id).unwrap_or_default();
            row.into_public(suggested)
        })
        .collect())
}

async fn suggestions_for(
    pool: &SqlitePool,
    transaction_ids: &[i64],
) -> Result<HashMap<i64, Vec<SuggestedCategoryPublic>>, ApiError> {
    if transaction_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT sc.transaction_id, sc.category_id, c.name
         FROM suggested_categories sc
         JOIN categories c ON c.id = sc.category_id
         WHERE sc.transaction_id IN (",
    );
    let mut separated = qb.separated(", ");
    for id in transaction_ids {
        separated.push_bind(id);
    }
    qb.push(") ORDER BY sc.transaction_id, sc.category_id");

    let rows: Vec<(i64, i64, String)> = qb.build_query_as().fetch_all(pool).await?;
    let mut map: HashMap<i64, Vec<SuggestedCategoryPublic>> = HashMap::new();
    for (transaction_id, category_id, category_name) in rows {
        map.entry(transaction_id).or_default().push(SuggestedCategoryPublic {
            category_id,
            category_name,
        });
    }
    Ok(map)
}

/// Applies only the provided fields. Fails as a whole on a missing category
/// or a malformed date; nothing is written in that case.
pub async fn edit_transaction(
    pool: &SqlitePool,
    transaction_id: i64,
    edit: &TransactionEditRequest,
) -> Result<TransactionRow, ApiError> {
    let mut tx = pool.begin().await?;

    let existing = sqlx::query_as::<_, TransactionRow>(
        "SELECT id, user_id, account_id, category_id, name, amount, entry_type, date
         FROM transactions WHERE id = ?",
    )
    .bind(transaction_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(ApiError::NotFound("transaction"))?;

    if let Some(category_id) = edit.category_id {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM categories WHERE id = ?")
            .bind(category_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(ApiError::NotFound("category"));
        }
    }

    let parsed_date = match &edit.date {
        Some(value) => Some(
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.3fZ")
                .map_err(|_| ApiError::Validation(format!("invalid date `{value}`")))?,
        ),
        None => None,
    };

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE transactions SET ");
    let mut any = false;
    {
        let mut separated = qb.separated(", ");
        if let Some(category_id) = edit.category_id {
            separated.push("category_id = ").push_bind_unseparated(category_id);
            any = true;
        }
        if let Some(account_id) = edit.account_id {
            separated.push("account_id = ").push_bind_unseparated(account_id);
            any = true;
        }
        if let Some(date) = parsed_date {
            separated.push("date = ").push_bind_unseparated(date);
            any = true;
        }
        if let Some(name) = &edit.name {
            separated.push("name = ").push_bind_unseparated(name);
            any = true;
        }
        if let Some(amount) = edit.amount {
            separated.push("amount = ").push_bind_unseparated(amount);
            any = true;
        }
    }
    if !any {
        return Ok(existing);
    }
    qb.push(" WHERE id = ").push_bind(transaction_id);
    qb.build().execute(&mut *tx).await?;

    let updated = sqlx::query_as::<_, TransactionRow>(
        "SELECT id, user_id, account_id, category_id, name, amount, entry_type, date
         FROM transactions WHERE id = ?",
    )
    .bind(transaction_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(updated)
}

/// Deletes only when the entry belongs to the user; a miss on either count is
/// a NotFound, never a silent no-op.
pub async fn delete_transaction(
    pool: &SqlitePool,
    transaction_id: i64,
    user_id: i64,
) -> Result<bool, ApiError> {
    let result = sqlx::query("DELETE FROM transactions WHERE id = ? AND user_id = ?")
        .bind(transaction_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("transaction"));
    }
    Ok(true)
}

pub async fn list_transactions_handler(
    State(state): State<AppState>,
    Json(req): Json<TransactionGetByUserRequest>,
) -> Result<Json<Vec<TransactionPublic>>, ApiError> {
    let rows = list_transactions(&state.pool, req.user_id).await?;
    Ok(Json(rows))
}

pub async fn get_transaction_handler(
    State(state): State<AppState>,
    Json(req): Json<TransactionGetByIdRequest>,
) -> Result<Json<TransactionPublic>, ApiError> {
    let row = get_transaction(&state.pool, req.user_id, req.transaction_id).await?;
    Ok(Json(row))
}

pub async fn create_transaction_handler(
    State(state): State<AppState>,
    Json(req): Json<TransactionCreate>,
) -> Result<Json<TransactionPublic>, ApiError> {
    let row = create_transaction(&state.pool, &req).await?;
    let public = get_transaction(&state.pool, row.user_id, row.id).await?;
    Ok(Json(public))
}

pub async fn edit_transaction_handler(
    State(state): State<AppState>,
    Path(transaction_id): Path<i64>,
    Json(req): Json<TransactionEditRequest>,
) -> Result<Json<TransactionPublic>, ApiError> {
    let row = edit_transaction(&state.pool, transaction_id, &req).await?;
    let public = get_transaction(&state.pool, row.user_id, row.id).await?;
    Ok(Json(public))
}

pub async fn delete_transaction_handler(
    State(state): State<AppState>,
    Json(req): Json<TransactionDeleteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    delete_transaction(&state.pool, req.transaction_id, req.user_id).await?;
    Ok(Json(json!({ "message": "Transaction deleted successfully" })))
}
