use super::with_conn;
use crate::config::AppConfig;
use crate::inventory;
use crate::models::{DailySales, DashboardSummary, TopMedicine};
use crate::reports;
use chrono::NaiveDate;
use tauri::{AppHandle, Manager};

const TITLE: &str = "Reports";

#[tauri::command]
pub fn get_dashboard(app: AppHandle) -> Result<DashboardSummary, String> {
    let config = app.state::<AppConfig>();
    with_conn(&app, TITLE, |conn| reports::dashboard(conn, inventory::today(), &config))
}

#[tauri::command]
pub fn get_sales_report(
    app: AppHandle,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<DailySales>, String> {
    with_conn(&app, TITLE, |conn| reports::sales_report(conn, from, to))
}

#[tauri::command]
pub fn get_top_medicines(
    app: AppHandle,
    from: NaiveDate,
    to: NaiveDate,
    limit: Option<usize>,
) -> Result<Vec<TopMedicine>, String> {
    with_conn(&app, TITLE, |conn| {
        reports::top_medicines(conn, from, to, limit.unwrap_or(10))
    })
}
