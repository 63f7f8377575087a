use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    Extension,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::routes::AppState;

/// Spent/income figures are recomputed on every read by joining the owner's
/// transactions on `category = name`. The join key is free text: a typo or
/// case mismatch silently keeps a transaction out of the budget's figures.
const BUDGET_SUMMARY_SELECT: &str = "SELECT b.id, b.name, b.budget_limit, b.color, b.period, b.created_at, \
         COALESCE(SUM(t.amount) FILTER (WHERE t.kind = 'expense'), 0) AS spent, \
         COALESCE(SUM(t.amount) FILTER (WHERE t.kind = 'income'), 0) AS income \
     FROM budgets b \
     LEFT JOIN transactions t ON t.user_id = b.user_id AND t.category = b.name \
     WHERE b.user_id = $1";

const BUDGET_NAME_CONSTRAINT: &str = "budgets_user_id_name_key";

/// Remaining balance of an envelope: the owner's total income across ALL
/// categories counts as freely available inflow for every budget, so the sum
/// of all remaining figures double-counts income. Intentional; keep it.
pub fn remaining_balance(limit: Decimal, owner_income: Decimal, spent: Decimal) -> Decimal {
    limit + owner_income - spent
}

pub async fn list_budgets_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<BudgetDto>>, AppError> {
    let rows = list_budget_summaries_db(&state.pool, user.user_id)
        .await
        .map_err(AppError::Store)?;
    let owner_income = owner_income_db(&state.pool, user.user_id)
        .await
        .map_err(AppError::Store)?;
    Ok(Json(
        rows.into_iter().map(|r| r.into_dto(owner_income)).collect(),
    ))
}

pub async fn list_budget_summaries_db(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Vec<BudgetSummaryRow>, sqlx::Error> {
    let sql = format!("{BUDGET_SUMMARY_SELECT} GROUP BY b.id ORDER BY b.created_at, b.id");
    sqlx::query_as::<_, BudgetSummaryRow>(&sql)
        .bind(user_id)
        .fetch_all(pool)
        .await
}

pub async fn load_budget_summary_db(
    pool: &PgPool,
    user_id: Uuid,
    budget_id: i64,
) -> Result<BudgetSummaryRow, sqlx::Error> {
    let sql = format!("{BUDGET_SUMMARY_SELECT} AND b.id = $2 GROUP BY b.id");
    sqlx::query_as::<_, BudgetSummaryRow>(&sql)
        .bind(user_id)
        .bind(budget_id)
        .fetch_one(pool)
        .await
}

/// Income summed over the owner's whole ledger, not one category.
pub async fn owner_income_db(pool: &PgPool, user_id: Uuid) -> Result<Decimal, sqlx::Error> {
    sqlx::query_scalar::<_, Decimal>(
        "SELECT COALESCE(SUM(amount), 0) FROM transactions \
         WHERE user_id = $1 AND kind = 'income'",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
}

pub async fn create_budget_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateBudgetReq>,
) -> Result<(StatusCode, Json<BudgetDto>), AppError> {
    let budget_id: i64 = sqlx::query_scalar(
        "INSERT INTO budgets (user_id, name, budget_limit, color, period) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING id",
    )
    .bind(user.user_id)
    .bind(&req.name)
    .bind(req.budget_limit)
    .bind(&req.color)
    .bind(&req.period)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.constraint() == Some(BUDGET_NAME_CONSTRAINT) => {
            AppError::Conflict(format!("budget '{}' already exists", req.name))
        }
        e => AppError::Store(e),
    })?;

    let dto = budget_dto_db(&state.pool, user.user_id, budget_id)
        .await
        .map_err(AppError::Store)?;
    Ok((StatusCode::CREATED, Json(dto)))
}

pub async fn update_budget_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(budget_id): Path<i64>,
    Json(req): Json<UpdateBudgetReq>,
) -> Result<Json<BudgetDto>, AppError> {
    sqlx::query_scalar::<_, i64>(
        "UPDATE budgets SET \
             name = COALESCE($3, name), \
             budget_limit = COALESCE($4, budget_limit), \
             color = COALESCE($5, color), \
             period = COALESCE($6, period) \
         WHERE id = $1 AND user_id = $2 \
         RETURNING id",
    )
    .bind(budget_id)
    .bind(user.user_id)
    .bind(&req.name)
    .bind(req.budget_limit)
    .bind(&req.color)
    .bind(&req.period)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::RowNotFound => AppError::NotFound("budget not found".to_string()),
        sqlx::Error::Database(ref db) if db.constraint() == Some(BUDGET_NAME_CONSTRAINT) => {
            AppError::Conflict("another budget already uses that name".to_string())
        }
        e => AppError::Store(e),
    })?;

    let dto = budget_dto_db(&state.pool, user.user_id, budget_id)
        .await
        .map_err(AppError::Store)?;
    Ok(Json(dto))
}

pub async fn delete_budget_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(budget_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    delete_budget_db(&state.pool, user.user_id, budget_id)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => AppError::NotFound("budget not found".to_string()),
            e => AppError::Store(e),
        })?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_budget_db(
    pool: &PgPool,
    user_id: Uuid,
    budget_id: i64,
) -> Result<(), sqlx::Error> {
    let result = sqlx::query("DELETE FROM budgets WHERE id = $1 AND user_id = $2")
        .bind(budget_id)
        .bind(user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(sqlx::Error::RowNotFound);
    }

    Ok(())
}

/// Budget names double as the category list for transaction forms.
pub async fn list_categories_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<String>>, AppError> {
    let names = sqlx::query_scalar::<_, String>(
        "SELECT name FROM budgets WHERE user_id = $1 ORDER BY name",
    )
    .bind(user.user_id)
    .fetch_all(&state.pool)
    .await
    .map_err(AppError::Store)?;
    Ok(Json(names))
}

async fn budget_dto_db(
    pool: &PgPool,
    user_id: Uuid,
    budget_id: i64,
) -> Result<BudgetDto, sqlx::Error> {
    let summary = load_budget_summary_db(pool, user_id, budget_id).await?;
    let owner_income = owner_income_db(pool, user_id).await?;
    Ok(summary.into_dto(owner_income))
}

pub async fn list_budget_rows_db(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Vec<BudgetRow>, sqlx::Error> {
    sqlx::query_as::<_, BudgetRow>(
        "SELECT id, user_id, name, budget_limit, color, period, created_at \
         FROM budgets WHERE user_id = $1 \
         ORDER BY created_at, id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

#[derive(Debug, Deserialize)]
pub struct CreateBudgetReq {
    pub name: String,
    #[serde(rename = "budgetLimit")]
    pub budget_limit: Decimal,
    pub color: String,
    #[serde(default = "default_period")]
    pub period: String,
}

fn default_period() -> String {
    "Monthly".to_string()
}

#[derive(Debug, Deserialize)]
pub struct UpdateBudgetReq {
    pub name: Option<String>,
    #[serde(rename = "budgetLimit")]
    pub budget_limit: Option<Decimal>,
    pub color: Option<String>,
    pub period: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct BudgetRow {
    pub id: i64,
    pub user_id: Uuid,
    pub name: String,
    pub budget_limit: Decimal, // NUMERIC(14,2)
    pub color: String,
    pub period: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct BudgetSummaryRow {
    pub id: i64,
    pub name: String,
    pub budget_limit: Decimal,
    pub color: String,
    pub period: String,
    pub created_at: DateTime<Utc>,
    pub spent: Decimal,
    pub income: Decimal, // category-scoped, unlike the remaining formula
}

impl BudgetSummaryRow {
    pub fn into_dto(self, owner_income: Decimal) -> BudgetDto {
        let remaining = remaining_balance(self.budget_limit, owner_income, self.spent);
        BudgetDto {
            id: self.id,
            name: self.name,
            budget_limit: self.budget_limit,
            spent: self.spent,
            income: self.income,
            remaining,
            color: self.color,
            period: self.period,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BudgetDto {
    pub id: i64,
    pub name: String,
    #[serde(rename = "budgetLimit", with = "rust_decimal::serde::float")]
    pub budget_limit: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub spent: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub income: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub remaining: Decimal,
    pub color: String,
    pub period: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(limit: Decimal, spent: Decimal, income: Decimal) -> BudgetSummaryRow {
        BudgetSummaryRow {
            id: 1,
            name: "Groceries".to_string(),
            budget_limit: limit,
            color: "#10b981".to_string(),
            period: "Monthly".to_string(),
            created_at: Utc::now(),
            spent,
            income,
        }
    }

    #[test]
    fn remaining_adds_owner_wide_income() {
        // Groceries: limit 500, one 125.50 expense in-category, a 3500.00
        // salary in a different category.
        let remaining = remaining_balance(
            Decimal::new(500, 0),
            Decimal::new(350000, 2),
            Decimal::new(12550, 2),
        );
        assert_eq!(remaining, Decimal::new(387450, 2));
    }

    #[test]
    fn remaining_with_no_matching_transactions_is_the_limit() {
        let remaining = remaining_balance(Decimal::new(150, 0), Decimal::ZERO, Decimal::ZERO);
        assert_eq!(remaining, Decimal::new(150, 0));
    }

    #[test]
    fn overspent_budget_goes_negative() {
        let remaining = remaining_balance(
            Decimal::new(200, 0),
            Decimal::ZERO,
            Decimal::new(25075, 2),
        );
        assert_eq!(remaining, Decimal::new(-5075, 2));
    }

    #[test]
    fn dto_keeps_category_income_separate_from_remaining() {
        // Category income shows up in `income` but the remaining figure uses
        // the owner-wide total passed in.
        let row = summary(
            Decimal::new(500, 0),
            Decimal::new(12550, 2),
            Decimal::new(50, 0),
        );
        let dto = row.into_dto(Decimal::new(350000, 2));
        assert_eq!(dto.income, Decimal::new(50, 0));
        assert_eq!(dto.remaining, Decimal::new(387450, 2));
    }

    #[test]
    fn budget_names_are_unique_per_owner_not_globally() {
        // Two owners may each have a "Food" budget; only a second "Food" for
        // the same owner conflicts.
        let ddl = include_str!("../migrations/0001_init.sql");
        assert!(ddl.contains(&format!(
            "CONSTRAINT {BUDGET_NAME_CONSTRAINT} UNIQUE (user_id, name)"
        )));
        assert!(!ddl.contains("name TEXT UNIQUE"));
    }

    #[test]
    fn dto_serializes_limit_as_camel_case_number() {
        let dto = summary(
            Decimal::new(500, 0),
            Decimal::ZERO,
            Decimal::ZERO,
        )
        .into_dto(Decimal::ZERO);
        let json = serde_json::to_value(&dto).unwrap();
        assert_eq!(json["budgetLimit"], 500.0);
        assert_eq!(json["spent"], 0.0);
        assert_eq!(json["remaining"], 500.0);
        assert!(json.get("budget_limit").is_none());
    }
}
