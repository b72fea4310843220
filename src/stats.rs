use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::ApiError;
use crate::routes::AppState;

/// Glance endpoints are pinned to the first user/account for now; the UI has
/// no multi-profile switcher yet.
const GLANCE_USER_ID: i64 = 1;
const GLANCE_ACCOUNT_ID: i64 = 1;

/// Window selector shared by the time-series queries. `All` anchors the
/// window at the earliest relevant date instead of a relative offset.
#[derive(Debug, Clone, Deserialize)]
pub struct DurationModel {
    #[serde(default = "default_duration")]
    pub duration: String,
    pub account_ids: Vec<i64>,
}

fn default_duration() -> String {
    "1W".to_string()
}

impl DurationModel {
    /// SQLite date-modifier for the window start, or `None` for all-time.
    fn offset(&self) -> Result<Option<&'static str>, ApiError> {
        match self.duration.as_str() {
            "1W" => Ok(Some("-7 days")),
            "1M" => Ok(Some("-31 days")),
            "3M" => Ok(Some("-91 days")),
            "6M" => Ok(Some("-186 days")),
            "1Y" => Ok(Some("-367 days")),
            "All" => Ok(None),
            other => Err(ApiError::Validation(format!("unknown duration `{other}`"))),
        }
    }
}

/// One day of a time series, `YYYY-MM-DD`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DailyAmount {
    pub date: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CategorySpend {
    pub category_id: i64,
    pub category_name: String,
    pub total_amount: f64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ExpenseAverages {
    pub past_7_days_avg: Option<f64>,
    pub past_14_days_avg: Option<f64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AccountGlance {
    pub account_name: String,
    pub account_id: i64,
    pub end_of_last_month_account_balance: f64,
    pub current_account_balance: f64,
}

fn push_account_ids(qb: &mut QueryBuilder<'_, Sqlite>, account_ids: &[i64]) {
    // `IN ()` is a syntax error; `IN (NULL)` matches nothing.
    if account_ids.is_empty() {
        qb.push("NULL");
        return;
    }
    let mut separated = qb.separated(", ");
    for id in account_ids {
        separated.push_bind(*id);
    }
}

/// Per-day debit totals for the chosen accounts over the window, zero-filled
/// via a recursive day calendar, newest day first.
pub async fn expenses_over_duration(
    pool: &SqlitePool,
    model: &DurationModel,
) -> Result<Vec<DailyAmount>, ApiError> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("WITH RECURSIVE days(date) AS (SELECT ");
    match model.offset()? {
        Some(offset) => {
            qb.push("date('now', ").push_bind(offset).push(")");
        }
        // All-time starts at the oldest entry; an empty ledger collapses the
        // calendar to today.
        None => {
            qb.push("COALESCE((SELECT date(MIN(date)) FROM transactions), date('now'))");
        }
    }
    qb.push(
        " UNION ALL SELECT date(date, '+1 day') FROM days WHERE date < date('now'))
        SELECT days.date AS date, COALESCE(SUM(t.amount), 0.0) AS amount
        FROM days
        LEFT JOIN transactions t
            ON substr(t.date, 1, 10) = days.date
            AND t.entry_type = 'debit'
            AND t.account_id IN (",
    );
    push_account_ids(&mut qb, &model.account_ids);
    qb.push(") GROUP BY days.date ORDER BY days.date DESC");

    let rows = qb.build_query_as::<DailyAmount>().fetch_all(pool).await?;
    Ok(rows)
}

/// Per-day total balance across the chosen accounts: the balance carried into
/// the window plus the cumulative signed change inside it, summed across
/// accounts, newest day first.
pub async fn net_worth_over_duration(
    pool: &SqlitePool,
    model: &DurationModel,
) -> Result<Vec<DailyAmount>, ApiError> {
    let offset = model.offset()?;

    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("WITH RECURSIVE filtered_accounts AS (
            SELECT id, initial_balance, created_at FROM accounts WHERE id IN (");
    push_account_ids(&mut qb, &model.account_ids);
    qb.push(")), days(date) AS (SELECT ");
    match offset {
        Some(offset) => {
            qb.push("date('now', ").push_bind(offset).push(")");
        }
        None => {
            qb.push(
                "COALESCE((SELECT date(MIN(created_at)) FROM filtered_accounts), date('now'))",
            );
        }
    }
    qb.push(
        " UNION ALL SELECT date(date, '+1 day') FROM days WHERE date < date('now')),
        pre_window AS (
            SELECT fa.id AS account_id,
                   fa.initial_balance + COALESCE(SUM(
                       CASE t.entry_type
                           WHEN 'credit' THEN t.amount
                           WHEN 'debit' THEN -t.amount
                           ELSE 0.0
                       END
                   ), 0.0) AS start_balance
            FROM filtered_accounts fa
            LEFT JOIN transactions t
                ON t.account_id = fa.id",
    );
    if let Some(offset) = offset {
        qb.push(" AND date(t.date) < date('now', ").push_bind(offset).push(")");
    } else {
        // All-time: nothing precedes the window.
        qb.push(" AND 0");
    }
    qb.push(
        " GROUP BY fa.id
        ),
        daily_net AS (
            SELECT days.date AS date, fa.id AS account_id,
                   COALESCE(SUM(
                       CASE t.entry_type
                           WHEN 'credit' THEN t.amount
                           WHEN 'debit' THEN -t.amount
                           ELSE 0.0
                       END
                   ), 0.0) AS daily_change
            FROM days
            CROSS JOIN filtered_accounts fa
            LEFT JOIN transactions t
                ON t.account_id = fa.id AND date(t.date) = days.date
            GROUP BY days.date, fa.id
        ),
        account_running AS (
            SELECT date, account_id,
                   SUM(daily_change) OVER (
                       PARTITION BY account_id ORDER BY date
                   ) AS running_change
            FROM daily_net
        )
        SELECT ar.date AS date, SUM(pw.start_balance + ar.running_change) AS amount
        FROM account_running ar
        JOIN pre_window pw ON pw.account_id = ar.account_id
        GROUP BY ar.date
        ORDER BY ar.date DESC",
    );

    let rows = qb.build_query_as::<DailyAmount>().fetch_all(pool).await?;
    Ok(rows)
}

/// Debit totals per category since the start of the current calendar month,
/// smallest total first.
pub async fn category_spend_this_month(pool: &SqlitePool) -> Result<Vec<CategorySpend>, ApiError> {
    let rows = sqlx::query_as::<_, CategorySpend>(
        "SELECT t.category_id AS category_id, c.name AS category_name,
                SUM(t.amount) AS total_amount
         FROM transactions t
         JOIN categories c ON c.id = t.category_id
         WHERE t.user_id = ?
           AND date(t.date) >= date('now', 'start of month')
           AND t.entry_type = 'debit'
         GROUP BY t.category_id
         ORDER BY total_amount ASC",
    )
    .bind(GLANCE_USER_ID)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Average daily debit total over the trailing 7 days versus the 8-to-14-days
/// window before it, zero-filled, rounded to 2 decimals.
pub async fn average_expenses_at_a_glance(pool: &SqlitePool) -> Result<ExpenseAverages, ApiError> {
    let row = sqlx::query_as::<_, ExpenseAverages>(
        "WITH RECURSIVE calendar(day) AS (
            SELECT date('now', '-14 days')
            UNION ALL
            SELECT date(day, '+1 day') FROM calendar WHERE day < date('now')
        ),
        daily_sums AS (
            SELECT date(t.date) AS day, SUM(t.amount) AS total
            FROM transactions t
            WHERE t.entry_type = 'debit' AND date(t.date) >= date('now', '-14 days')
            GROUP BY date(t.date)
        ),
        joined AS (
            SELECT calendar.day AS day, COALESCE(daily_sums.total, 0.0) AS total
            FROM calendar
            LEFT JOIN daily_sums ON daily_sums.day = calendar.day
        )
        SELECT
            round(AVG(CASE WHEN day >= date('now', '-7 days') THEN total END), 2)
                AS past_7_days_avg,
            round(AVG(CASE WHEN day BETWEEN date('now', '-14 days') AND date('now', '-7 days')
                      THEN total END), 2)
                AS past_14_days_avg
        FROM joined",
    )
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Balance of the glance account at the end of the previous calendar month
/// and right now, both derived from the initial balance.
pub async fn account_balance_at_a_glance(pool: &SqlitePool) -> Result<AccountGlance, ApiError> {
    let row = sqlx::query_as::<_, AccountGlance>(
        "SELECT a.name AS account_name, a.id AS account_id,
                a.initial_balance + COALESCE(SUM(
                    CASE WHEN date(t.date) < date('now', 'start of month') THEN
                        CASE t.entry_type
                            WHEN 'credit' THEN t.amount
                            WHEN 'debit' THEN -t.amount
                            ELSE 0.0
                        END
                    ELSE 0.0 END
                ), 0.0) AS end_of_last_month_account_balance,
                a.initial_balance + COALESCE(SUM(
                    CASE WHEN date(t.date) <= date('now') THEN
                        CASE t.entry_type
                            WHEN 'credit' THEN t.amount
                            WHEN 'debit' THEN -t.amount
                            ELSE 0.0
                        END
                    ELSE 0.0 END
                ), 0.0) AS current_account_balance
         FROM accounts a
         LEFT JOIN transactions t ON t.account_id = a.id
         WHERE a.id = ?
         GROUP BY a.id, a.initial_balance",
    )
    .bind(GLANCE_ACCOUNT_ID)
    .fetch_optional(pool)
    .await?
    .ok_or(ApiError::NotFound("account"))?;
    Ok(row)
}

pub async fn expenses_handler(
    State(state): State<AppState>,
    Json(model): Json<DurationModel>,
) -> Result<Json<Vec<DailyAmount>>, ApiError> {
    let rows = expenses_over_duration(&state.pool, &model).await?;
    Ok(Json(rows))
}

pub async fn net_worth_handler(
    State(state): State<AppState>,
    Json(model): Json<DurationModel>,
) -> Result<Json<Vec<DailyAmount>>, ApiError> {
    let rows = net_worth_over_duration(&state.pool, &model).await?;
    Ok(Json(rows))
}

pub async fn category_spend_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<CategorySpend>>, ApiError> {
    let rows = category_spend_this_month(&state.pool).await?;
    Ok(Json(rows))
}

pub async fn expense_averages_handler(
    State(state): State<AppState>,
) -> Result<Json<ExpenseAverages>, ApiError> {
    let row = average_expenses_at_a_glance(&state.pool).await?;
    Ok(Json(row))
}

pub async fn account_glance_handler(
    State(state): State<AppState>,
) -> Result<Json<AccountGlance>, ApiError> {
    let row = account_balance_at_a_glance(&state.pool).await?;
    Ok(Json(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    use crate::accounts::{create_account, AccountCreate};
    use crate::categories::{create_categories, CategoryCreate};
    use crate::schema::test_support::memory_pool;
    use crate::transactions::{create_transaction, EntryType, TransactionCreate};

    fn days_ago(n: i64) -> String {
        (Utc::now().date_naive() - Duration::days(n))
            .format("%Y-%m-%d")
            .to_string()
    }

    async fn seed_account(pool: &SqlitePool, name: &str, initial_balance: f64) -> i64 {
        create_account(
            pool,
            &AccountCreate {
                user_id: 1,
                name: name.into(),
                currency: "CAD".into(),
                initial_balance,
            },
        )
        .await
        .unwrap()
        .id
    }

    async fn seed_category(pool: &SqlitePool, name: &str, entry_type: EntryType) -> i64 {
        create_categories(
            pool,
            &[CategoryCreate {
                user_id: 1,
                name: name.into(),
                entry_type,
            }],
        )
        .await
        .unwrap()[0]
            .id
    }

    async fn seed_entry(
        pool: &SqlitePool,
        account_id: i64,
        category_id: i64,
        amount: f64,
        entry_type: EntryType,
        date: String,
    ) {
        create_transaction(
            pool,
            &TransactionCreate {
                user_id: 1,
                account_id,
                category_id,
                name: "entry".into(),
                amount,
                entry_type,
                date: Some(date),
                suggested_categories: Vec::new(),
            },
        )
        .await
        .unwrap();
    }

    fn window(duration: &str, account_ids: Vec<i64>) -> DurationModel {
        DurationModel {
            duration: duration.into(),
            account_ids,
        }
    }

    #[tokio::test]
    async fn expenses_zero_fill_covers_every_day() {
        let pool = memory_pool().await;
        let account = seed_account(&pool, "Chequing", 0.0).await;

        let rows = expenses_over_duration(&pool, &window("1W", vec![account]))
            .await
            .unwrap();
        // -7 days through today inclusive.
        assert_eq!(rows.len(), 8);
        assert!(rows.iter().all(|r| r.amount == 0.0));
        assert_eq!(rows[0].date, days_ago(0));
        assert_eq!(rows[7].date, days_ago(7));
    }

    #[tokio::test]
    async fn expenses_count_debits_for_selected_accounts_only() {
        let pool = memory_pool().await;
        let chequing = seed_account(&pool, "Chequing", 0.0).await;
        let savings = seed_account(&pool, "Savings", 0.0).await;
        let food = seed_category(&pool, "Food", EntryType::Debit).await;
        let salary = seed_category(&pool, "Salary", EntryType::Credit).await;

        seed_entry(&pool, chequing, food, 30.0, EntryType::Debit, days_ago(3)).await;
        seed_entry(&pool, chequing, salary, 50.0, EntryType::Credit, days_ago(3)).await;
        seed_entry(&pool, savings, food, 99.0, EntryType::Debit, days_ago(3)).await;

        let rows = expenses_over_duration(&pool, &window("1W", vec![chequing]))
            .await
            .unwrap();
        let that_day = rows.iter().find(|r| r.date == days_ago(3)).unwrap();
        assert_eq!(that_day.amount, 30.0);
        let total: f64 = rows.iter().map(|r| r.amount).sum();
        assert_eq!(total, 30.0);
    }

    #[tokio::test]
    async fn all_time_expenses_start_at_oldest_entry() {
        let pool = memory_pool().await;
        let account = seed_account(&pool, "Chequing", 0.0).await;
        let food = seed_category(&pool, "Food", EntryType::Debit).await;
        seed_entry(&pool, account, food, 10.0, EntryType::Debit, days_ago(5)).await;
        seed_entry(&pool, account, food, 20.0, EntryType::Debit, days_ago(0)).await;

        let rows = expenses_over_duration(&pool, &window("All", vec![account]))
            .await
            .unwrap();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].amount, 20.0);
        assert_eq!(rows[5].amount, 10.0);
        // Days between the entries are present with zero spend.
        assert!(rows[1..5].iter().all(|r| r.amount == 0.0));
    }

    #[tokio::test]
    async fn unknown_duration_is_rejected() {
        let pool = memory_pool().await;
        let result = expenses_over_duration(&pool, &window("2W", vec![1])).await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn net_worth_carries_pre_window_balance_forward() {
        let pool = memory_pool().await;
        let account = seed_account(&pool, "Chequing", 100.0).await;
        let salary = seed_category(&pool, "Salary", EntryType::Credit).await;
        let food = seed_category(&pool, "Food", EntryType::Debit).await;

        // Before the 1W window: folded into the starting balance.
        seed_entry(&pool, account, salary, 50.0, EntryType::Credit, days_ago(10)).await;
        // Inside the window.
        seed_entry(&pool, account, food, 30.0, EntryType::Debit, days_ago(3)).await;

        let rows = net_worth_over_duration(&pool, &window("1W", vec![account]))
            .await
            .unwrap();
        assert_eq!(rows.len(), 8);
        assert_eq!(rows[0].date, days_ago(0));
        assert_eq!(rows[0].amount, 120.0);
        let before_debit = rows.iter().find(|r| r.date == days_ago(5)).unwrap();
        assert_eq!(before_debit.amount, 150.0);
    }

    #[tokio::test]
    async fn net_worth_sums_across_accounts() {
        let pool = memory_pool().await;
        let chequing = seed_account(&pool, "Chequing", 100.0).await;
        let savings = seed_account(&pool, "Savings", 200.0).await;

        let rows = net_worth_over_duration(&pool, &window("1W", vec![chequing, savings]))
            .await
            .unwrap();
        assert_eq!(rows.len(), 8);
        assert!(rows.iter().all(|r| r.amount == 300.0));
    }

    #[tokio::test]
    async fn category_spend_orders_ascending_by_total() {
        let pool = memory_pool().await;
        let account = seed_account(&pool, "Chequing", 0.0).await;
        let food = seed_category(&pool, "Food", EntryType::Debit).await;
        let rent = seed_category(&pool, "Rent", EntryType::Debit).await;
        let salary = seed_category(&pool, "Salary", EntryType::Credit).await;

        seed_entry(&pool, account, rent, 700.0, EntryType::Debit, days_ago(0)).await;
        seed_entry(&pool, account, food, 12.0, EntryType::Debit, days_ago(0)).await;
        seed_entry(&pool, account, food, 8.0, EntryType::Debit, days_ago(0)).await;
        seed_entry(&pool, account, salary, 5000.0, EntryType::Credit, days_ago(0)).await;

        let rows = category_spend_this_month(&pool).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].category_name, "Food");
        assert_eq!(rows[0].total_amount, 20.0);
        assert_eq!(rows[1].category_name, "Rent");
        assert_eq!(rows[1].total_amount, 700.0);
    }

    #[tokio::test]
    async fn averages_zero_fill_quiet_days() {
        let pool = memory_pool().await;
        let account = seed_account(&pool, "Chequing", 0.0).await;
        let food = seed_category(&pool, "Food", EntryType::Debit).await;
        seed_entry(&pool, account, food, 10.0, EntryType::Debit, days_ago(2)).await;

        let averages = average_expenses_at_a_glance(&pool).await.unwrap();
        // 8 calendar days in the trailing bucket, one with spend.
        assert_eq!(averages.past_7_days_avg, Some(1.25));
        assert_eq!(averages.past_14_days_avg, Some(0.0));
    }

    #[tokio::test]
    async fn account_glance_splits_last_month_from_now() {
        let pool = memory_pool().await;
        let account = seed_account(&pool, "Chequing", 100.0).await;
        assert_eq!(account, GLANCE_ACCOUNT_ID);
        let salary = seed_category(&pool, "Salary", EntryType::Credit).await;
        let food = seed_category(&pool, "Food", EntryType::Debit).await;

        // 40 days back always lands before the start of the current month.
        seed_entry(&pool, account, salary, 50.0, EntryType::Credit, days_ago(40)).await;
        seed_entry(&pool, account, food, 20.0, EntryType::Debit, days_ago(0)).await;

        let glance = account_balance_at_a_glance(&pool).await.unwrap();
        assert_eq!(glance.account_name, "Chequing");
        assert_eq!(glance.end_of_last_month_account_balance, 150.0);
        assert_eq!(glance.current_account_balance, 130.0);
    }

    #[tokio::test]
    async fn account_glance_without_account_is_not_found() {
        let pool = memory_pool().await;
        let result = account_balance_at_a_glance(&pool).await;
        assert!(matches!(result, Err(ApiError::NotFound("account"))));
    }
}
