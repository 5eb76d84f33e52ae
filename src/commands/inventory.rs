use super::{acting_user, with_conn};
use crate::config::AppConfig;
use crate::inventory;
use crate::models::{
    CreateMedicine, InventoryItem, LowStockItem, Medicine, ReceiveStock, UpdateMedicine,
};
use tauri::{AppHandle, Manager};

const TITLE: &str = "Inventory";

// ===== Medicines =====

#[tauri::command]
pub fn get_medicines(app: AppHandle, search: Option<String>) -> Result<Vec<Medicine>, String> {
    with_conn(&app, TITLE, |conn| inventory::list_medicines(conn, search.as_deref()))
}

#[tauri::command]
pub fn get_medicine(app: AppHandle, id: i64) -> Result<Medicine, String> {
    with_conn(&app, TITLE, |conn| inventory::get_medicine(conn, id))
}

#[tauri::command]
pub fn create_medicine(app: AppHandle, medicine: CreateMedicine) -> Result<Medicine, String> {
    let threshold = app.state::<AppConfig>().low_stock_threshold;
    with_conn(&app, TITLE, |conn| inventory::create_medicine(conn, medicine, threshold))
}

#[tauri::command]
pub fn update_medicine(app: AppHandle, medicine: UpdateMedicine) -> Result<Medicine, String> {
    with_conn(&app, TITLE, |conn| inventory::update_medicine(conn, medicine))
}

#[tauri::command]
pub fn deactivate_medicine(app: AppHandle, id: i64) -> Result<(), String> {
    with_conn(&app, TITLE, |conn| {
        inventory::deactivate_medicine(conn, id, acting_user(conn))
    })
}

// ===== Batches =====

#[tauri::command]
pub fn receive_stock(app: AppHandle, stock: ReceiveStock) -> Result<InventoryItem, String> {
    with_conn(&app, TITLE, |conn| {
        inventory::receive_stock(conn, stock, acting_user(conn))
    })
}

#[tauri::command]
pub fn get_batches(app: AppHandle, medicine_id: i64) -> Result<Vec<InventoryItem>, String> {
    with_conn(&app, TITLE, |conn| inventory::list_batches(conn, medicine_id))
}

#[tauri::command]
pub fn adjust_batch_quantity(
    app: AppHandle,
    batch_id: i64,
    quantity: i64,
    reason: String,
) -> Result<InventoryItem, String> {
    with_conn(&app, TITLE, |conn| {
        inventory::adjust_batch_quantity(conn, batch_id, quantity, &reason, acting_user(conn))
    })
}

#[tauri::command]
pub fn get_low_stock(app: AppHandle) -> Result<Vec<LowStockItem>, String> {
    with_conn(&app, TITLE, inventory::low_stock)
}

#[tauri::command]
pub fn get_expiring_batches(
    app: AppHandle,
    within_days: Option<i64>,
) -> Result<Vec<InventoryItem>, String> {
    let days = within_days.unwrap_or(app.state::<AppConfig>().expiry_warning_days);
    with_conn(&app, TITLE, |conn| inventory::expiring_batches(conn, days))
}

