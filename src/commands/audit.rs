use super::with_conn;
use crate::audit;
use crate::models::{ActionCount, AuditFilter, AuditRecord, DispensingRecord};
use chrono::NaiveDate;
use tauri::AppHandle;

const TITLE: &str = "Audit";

#[tauri::command]
pub fn get_audit_log(
    app: AppHandle,
    filter: Option<AuditFilter>,
) -> Result<Vec<AuditRecord>, String> {
    let filter = filter.unwrap_or_default();
    with_conn(&app, TITLE, |conn| audit::list(conn, &filter))
}

#[tauri::command]
pub fn get_action_summary(
    app: AppHandle,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<ActionCount>, String> {
    with_conn(&app, TITLE, |conn| audit::action_summary(conn, from, to))
}

#[tauri::command]
pub fn get_prescription_dispensing(
    app: AppHandle,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<DispensingRecord>, String> {
    with_conn(&app, TITLE, |conn| audit::prescription_dispensing(conn, from, to))
}
