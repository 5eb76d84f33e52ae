use super::{acting_user, with_conn};
use crate::expenses;
use crate::models::{CreateExpense, Expense, ExpenseCategoryTotal, UpdateExpense};
use chrono::NaiveDate;
use tauri::AppHandle;

const TITLE: &str = "Expenses";

#[tauri::command]
pub fn get_expenses(
    app: AppHandle,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    category: Option<String>,
) -> Result<Vec<Expense>, String> {
    with_conn(&app, TITLE, |conn| {
        expenses::list_expenses(conn, from, to, category.as_deref())
    })
}

#[tauri::command]
pub fn create_expense(app: AppHandle, mut expense: CreateExpense) -> Result<Expense, String> {
    with_conn(&app, TITLE, |conn| {
        if expense.created_by.is_none() {
            expense.created_by = acting_user(conn);
        }
        expenses::create_expense(conn, expense)
    })
}

#[tauri::command]
pub fn update_expense(app: AppHandle, expense: UpdateExpense) -> Result<Expense, String> {
    with_conn(&app, TITLE, |conn| expenses::update_expense(conn, expense))
}

#[tauri::command]
pub fn delete_expense(app: AppHandle, id: i64) -> Result<(), String> {
    with_conn(&app, TITLE, |conn| expenses::delete_expense(conn, id))
}

#[tauri::command]
pub fn get_expense_summary(
    app: AppHandle,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<ExpenseCategoryTotal>, String> {
    with_conn(&app, TITLE, |conn| expenses::expense_summary(conn, from, to))
}
