use axum::{extract::State, Extension, Json};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::auth::AuthUser;
use crate::budgets::{self, BudgetRow};
use crate::error::AppError;
use crate::routes::AppState;
use crate::transactions::{self, TransactionDto, TransactionRow};

const RECENT_LIMIT: usize = 5;

pub async fn dashboard_stats_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<DashboardStats>, AppError> {
    let txs = transactions::list_transactions_db(&state.pool, user.user_id)
        .await
        .map_err(AppError::Store)?;
    let buds = budgets::list_budget_rows_db(&state.pool, user.user_id)
        .await
        .map_err(AppError::Store)?;
    Ok(Json(summarize(&txs, &buds)))
}

/// Account-wide figures, recomputed from the raw rows on every read.
/// Kinds other than "income"/"expense" count toward the cardinality only.
pub fn summarize(transactions: &[TransactionRow], budgets: &[BudgetRow]) -> DashboardStats {
    let mut total_income = Decimal::ZERO;
    let mut total_expenses = Decimal::ZERO;
    for t in transactions {
        match t.kind.as_str() {
            "income" => total_income += t.amount,
            "expense" => total_expenses += t.amount,
            _ => {}
        }
    }
    let total_budget_limit: Decimal = budgets.iter().map(|b| b.budget_limit).sum();

    // Most recently created, not most recent transaction date; id breaks ties.
    let mut by_creation: Vec<&TransactionRow> = transactions.iter().collect();
    by_creation.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    let recent_transactions = by_creation
        .into_iter()
        .take(RECENT_LIMIT)
        .cloned()
        .map(TransactionDto::from)
        .collect();

    DashboardStats {
        total_income,
        total_expenses,
        total_budget_limit,
        remaining_budget: total_budget_limit + total_income - total_expenses,
        net_income: total_income - total_expenses,
        transaction_count: transactions.len() as i64,
        budget_count: budgets.len() as i64,
        recent_transactions,
    }
}

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    #[serde(with = "rust_decimal::serde::float")]
    pub total_income: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_expenses: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_budget_limit: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub remaining_budget: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub net_income: Decimal,
    pub transaction_count: i64,
    pub budget_count: i64,
    pub recent_transactions: Vec<TransactionDto>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate, Utc};
    use uuid::Uuid;

    fn owner() -> Uuid {
        Uuid::nil()
    }

    fn tx(id: i64, kind: &str, amount: Decimal, category: &str, created_secs: i64) -> TransactionRow {
        TransactionRow {
            id,
            user_id: owner(),
            date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            title: format!("tx-{id}"),
            kind: kind.to_string(),
            amount,
            category: category.to_string(),
            notes: String::new(),
            created_at: DateTime::from_timestamp(1_700_000_000 + created_secs, 0).unwrap(),
        }
    }

    fn budget(id: i64, name: &str, limit: Decimal) -> BudgetRow {
        BudgetRow {
            id,
            user_id: owner(),
            name: name.to_string(),
            budget_limit: limit,
            color: "#3b82f6".to_string(),
            period: "Monthly".to_string(),
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn empty_ledger_yields_zeroes_not_an_error() {
        let stats = summarize(&[], &[]);
        assert_eq!(stats.total_income, Decimal::ZERO);
        assert_eq!(stats.total_expenses, Decimal::ZERO);
        assert_eq!(stats.net_income, Decimal::ZERO);
        assert_eq!(stats.remaining_budget, Decimal::ZERO);
        assert_eq!(stats.transaction_count, 0);
        assert_eq!(stats.budget_count, 0);
        assert!(stats.recent_transactions.is_empty());
    }

    #[test]
    fn net_income_is_income_minus_expenses() {
        let txs = vec![
            tx(1, "income", Decimal::new(350000, 2), "Salary", 0),
            tx(2, "expense", Decimal::new(12550, 2), "Groceries", 1),
            tx(3, "expense", Decimal::new(450, 2), "Food", 2),
        ];
        let stats = summarize(&txs, &[]);
        assert_eq!(stats.total_income, Decimal::new(350000, 2));
        assert_eq!(stats.total_expenses, Decimal::new(13000, 2));
        assert_eq!(
            stats.net_income,
            stats.total_income - stats.total_expenses
        );
    }

    #[test]
    fn remaining_budget_adds_limits_and_income_minus_expenses() {
        let txs = vec![
            tx(1, "income", Decimal::new(1000, 0), "Salary", 0),
            tx(2, "expense", Decimal::new(300, 0), "Food", 1),
        ];
        let buds = vec![
            budget(1, "Food", Decimal::new(200, 0)),
            budget(2, "Transport", Decimal::new(150, 0)),
        ];
        let stats = summarize(&txs, &buds);
        assert_eq!(stats.total_budget_limit, Decimal::new(350, 0));
        assert_eq!(stats.remaining_budget, Decimal::new(1050, 0));
        assert_eq!(stats.budget_count, 2);
    }

    #[test]
    fn unknown_kinds_count_only_toward_cardinality() {
        let txs = vec![
            tx(1, "income", Decimal::new(100, 0), "Salary", 0),
            tx(2, "transfer", Decimal::new(9999, 0), "Misc", 1),
        ];
        let stats = summarize(&txs, &[]);
        assert_eq!(stats.total_income, Decimal::new(100, 0));
        assert_eq!(stats.total_expenses, Decimal::ZERO);
        assert_eq!(stats.transaction_count, 2);
    }

    #[test]
    fn recent_is_capped_at_five_newest_created_first() {
        let txs: Vec<TransactionRow> = (1..=7)
            .map(|i| tx(i, "expense", Decimal::new(i, 0), "Food", i))
            .collect();
        let stats = summarize(&txs, &[]);
        assert_eq!(stats.recent_transactions.len(), 5);
        let ids: Vec<i64> = stats.recent_transactions.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![7, 6, 5, 4, 3]);
    }

    #[test]
    fn recent_ties_on_created_at_break_by_id() {
        let txs = vec![
            tx(1, "expense", Decimal::ONE, "Food", 5),
            tx(2, "expense", Decimal::ONE, "Food", 5),
            tx(3, "expense", Decimal::ONE, "Food", 5),
        ];
        let stats = summarize(&txs, &[]);
        let ids: Vec<i64> = stats.recent_transactions.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }
}
