use crate::cart::round_money;
use crate::db::decimal_column;
use crate::error::{PosError, Result};
use crate::models::{CreateExpense, Expense, ExpenseCategoryTotal, UpdateExpense};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::info;

const EXPENSE_COLUMNS: &str =
    "id, category, amount, description, expense_date, branch_id, created_by, created_at";

fn map_expense(row: &Row<'_>) -> rusqlite::Result<Expense> {
    Ok(Expense {
        id: row.get(0)?,
        category: row.get(1)?,
        amount: decimal_column(row, 2)?,
        description: row.get(3)?,
        expense_date: row.get(4)?,
        branch_id: row.get(5)?,
        created_by: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn validate(category: &str, amount: Decimal) -> Result<()> {
    if category.trim().is_empty() {
        return Err(PosError::validation("Expense category is required"));
    }
    if amount <= Decimal::ZERO {
        return Err(PosError::validation("Expense amount must be greater than zero"));
    }
    Ok(())
}

pub fn create_expense(conn: &Connection, expense: CreateExpense) -> Result<Expense> {
    validate(&expense.category, expense.amount)?;

    conn.execute(
        "INSERT INTO expenses (category, amount, description, expense_date, branch_id, created_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            expense.category.trim(),
            round_money(expense.amount).to_string(),
            expense.description,
            expense.expense_date,
            expense.branch_id,
            expense.created_by
        ],
    )?;

    let id = conn.last_insert_rowid();
    info!(expense_id = id, category = %expense.category.trim(), "Expense recorded");

    get_expense(conn, id)
}

pub fn update_expense(conn: &Connection, expense: UpdateExpense) -> Result<Expense> {
    validate(&expense.category, expense.amount)?;

    conn.execute(
        "UPDATE expenses SET category = ?1, amount = ?2, description = ?3, expense_date = ?4
         WHERE id = ?5",
        params![
            expense.category.trim(),
            round_money(expense.amount).to_string(),
            expense.description,
            expense.expense_date,
            expense.id
        ],
    )?;

    if conn.changes() == 0 {
        return Err(PosError::not_found(format!("Expense {}", expense.id)));
    }

    get_expense(conn, expense.id)
}

pub fn delete_expense(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM expenses WHERE id = ?1", [id])?;
    if conn.changes() == 0 {
        return Err(PosError::not_found(format!("Expense {}", id)));
    }
    Ok(())
}

pub fn get_expense(conn: &Connection, id: i64) -> Result<Expense> {
    conn.query_row(
        &format!("SELECT {} FROM expenses WHERE id = ?1", EXPENSE_COLUMNS),
        [id],
        map_expense,
    )
    .optional()?
    .ok_or_else(|| PosError::not_found(format!("Expense {}", id)))
}

/// Expenses dated within `from..=to`, newest first. Either bound may be open.
pub fn list_expenses(
    conn: &Connection,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    category: Option<&str>,
) -> Result<Vec<Expense>> {
    let mut sql = format!("SELECT {} FROM expenses WHERE 1 = 1", EXPENSE_COLUMNS);
    let mut values: Vec<Value> = Vec::new();

    if let Some(from) = from {
        values.push(Value::Text(from.to_string()));
        sql.push_str(&format!(" AND expense_date >= ?{}", values.len()));
    }
    if let Some(to) = to {
        values.push(Value::Text(to.to_string()));
        sql.push_str(&format!(" AND expense_date <= ?{}", values.len()));
    }
    if let Some(category) = category.map(str::trim).filter(|c| !c.is_empty()) {
        values.push(Value::Text(category.to_string()));
        sql.push_str(&format!(" AND category = ?{}", values.len()));
    }

    sql.push_str(" ORDER BY expense_date DESC, id DESC");

    let mut stmt = conn.prepare(&sql)?;
    let expenses = stmt
        .query_map(params_from_iter(values), map_expense)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(expenses)
}

/// Totals per category, largest first.
pub fn expense_summary(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<ExpenseCategoryTotal>> {
    let mut by_category: BTreeMap<String, (Decimal, i64)> = BTreeMap::new();

    for expense in list_expenses(conn, Some(from), Some(to), None)? {
        let entry = by_category.entry(expense.category).or_insert((Decimal::ZERO, 0));
        entry.0 += expense.amount;
        entry.1 += 1;
    }

    let mut totals: Vec<ExpenseCategoryTotal> = by_category
        .into_iter()
        .map(|(category, (total, count))| ExpenseCategoryTotal {
            category,
            total,
            count,
        })
        .collect();

    totals.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.category.cmp(&b.category)));

    Ok(totals)
}

pub fn total_expenses(conn: &Connection, from: NaiveDate, to: NaiveDate) -> Result<Decimal> {
    Ok(list_expenses(conn, Some(from), Some(to), None)?
        .iter()
        .map(|e| e.amount)
        .sum())
}
