use super::{acting_user, with_conn};
use crate::inventory;
use crate::models::{DayClosing, Sale, SaleUpdate, SaleWithItems, SalesFilter};
use crate::sales;
use chrono::NaiveDate;
use tauri::AppHandle;

const TITLE: &str = "Sales";

#[tauri::command]
pub fn get_sales(app: AppHandle, filter: Option<SalesFilter>) -> Result<Vec<Sale>, String> {
    let filter = filter.unwrap_or_default();
    with_conn(&app, TITLE, |conn| sales::list_sales(conn, &filter))
}

#[tauri::command]
pub fn get_sale(app: AppHandle, id: i64) -> Result<SaleWithItems, String> {
    with_conn(&app, TITLE, |conn| sales::get_sale(conn, id))
}

#[tauri::command]
pub fn update_sale(app: AppHandle, update: SaleUpdate) -> Result<SaleWithItems, String> {
    with_conn(&app, TITLE, |conn| sales::update_sale(conn, update, acting_user(conn)))
}

/// Voids the sale; its stock goes back on the shelf.
#[tauri::command]
pub fn delete_sale(app: AppHandle, id: i64) -> Result<(), String> {
    with_conn(&app, TITLE, |conn| sales::delete_sale(conn, id, acting_user(conn)))
}

#[tauri::command]
pub fn close_day(app: AppHandle, date: Option<NaiveDate>) -> Result<DayClosing, String> {
    let date = date.unwrap_or_else(inventory::today);
    with_conn(&app, TITLE, |conn| sales::close_day(conn, date))
}

#[tauri::command]
pub fn get_sales_history(app: AppHandle, limit: Option<i64>) -> Result<Vec<DayClosing>, String> {
    with_conn(&app, TITLE, |conn| sales::sales_history(conn, limit))
}
