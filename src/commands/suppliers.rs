use super::with_conn;
use crate::models::{
    CreateLedgerEntry, CreateSupplier, LedgerEntry, Supplier, SupplierBalance, UpdateSupplier,
};
use crate::suppliers;
use tauri::AppHandle;

const TITLE: &str = "Suppliers";

#[tauri::command]
pub fn get_suppliers(app: AppHandle) -> Result<Vec<Supplier>, String> {
    with_conn(&app, TITLE, suppliers::list_suppliers)
}

#[tauri::command]
pub fn create_supplier(app: AppHandle, supplier: CreateSupplier) -> Result<Supplier, String> {
    with_conn(&app, TITLE, |conn| suppliers::create_supplier(conn, supplier))
}

#[tauri::command]
pub fn update_supplier(app: AppHandle, supplier: UpdateSupplier) -> Result<Supplier, String> {
    with_conn(&app, TITLE, |conn| suppliers::update_supplier(conn, supplier))
}

#[tauri::command]
pub fn deactivate_supplier(app: AppHandle, id: i64) -> Result<(), String> {
    with_conn(&app, TITLE, |conn| suppliers::deactivate_supplier(conn, id))
}

#[tauri::command]
pub fn add_ledger_entry(app: AppHandle, entry: CreateLedgerEntry) -> Result<LedgerEntry, String> {
    with_conn(&app, TITLE, |conn| suppliers::add_ledger_entry(conn, entry))
}

#[tauri::command]
pub fn get_supplier_ledger(app: AppHandle, supplier_id: i64) -> Result<Vec<LedgerEntry>, String> {
    with_conn(&app, TITLE, |conn| suppliers::ledger(conn, supplier_id))
}

#[tauri::command]
pub fn get_supplier_balance(app: AppHandle, supplier_id: i64) -> Result<SupplierBalance, String> {
    with_conn(&app, TITLE, |conn| suppliers::supplier_balance(conn, supplier_id))
}

#[tauri::command]
pub fn get_payables(app: AppHandle) -> Result<Vec<SupplierBalance>, String> {
    with_conn(&app, TITLE, suppliers::payables)
}
