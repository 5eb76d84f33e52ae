use super::with_conn;
use crate::auth;
use crate::error::PosError;
use crate::models::{
    CreatePatient, CreditPayment, CreditRecord, CreditStatementEntry, Patient, PaymentMethod,
    UpdatePatient,
};
use crate::patients;
use rust_decimal::Decimal;
use tauri::AppHandle;

const TITLE: &str = "Patients";

#[tauri::command]
pub fn get_patients(app: AppHandle, search: Option<String>) -> Result<Vec<Patient>, String> {
    with_conn(&app, TITLE, |conn| patients::list_patients(conn, search.as_deref()))
}

#[tauri::command]
pub fn get_patient(app: AppHandle, id: i64) -> Result<Patient, String> {
    with_conn(&app, TITLE, |conn| patients::get_patient(conn, id))
}

#[tauri::command]
pub fn create_patient(app: AppHandle, patient: CreatePatient) -> Result<Patient, String> {
    with_conn(&app, TITLE, |conn| patients::create_patient(conn, patient))
}

#[tauri::command]
pub fn update_patient(app: AppHandle, patient: UpdatePatient) -> Result<Patient, String> {
    with_conn(&app, TITLE, |conn| patients::update_patient(conn, patient))
}

#[tauri::command]
pub fn delete_patient(app: AppHandle, id: i64) -> Result<(), String> {
    with_conn(&app, TITLE, |conn| patients::delete_patient(conn, id))
}

// ===== Credit =====

#[tauri::command]
pub fn get_credit_record(app: AppHandle, patient_id: i64) -> Result<Option<CreditRecord>, String> {
    with_conn(&app, TITLE, |conn| patients::credit_record(conn, patient_id))
}

#[tauri::command]
pub fn approve_credit(
    app: AppHandle,
    patient_id: i64,
    credit_limit: Decimal,
) -> Result<CreditRecord, String> {
    with_conn(&app, TITLE, |conn| {
        let approver = auth::current_session(conn)?;
        if !approver.role.can_approve_credit() {
            return Err(PosError::Unauthorized(format!(
                "{} cannot approve credit",
                approver.username
            )));
        }
        patients::approve_credit(conn, patient_id, credit_limit, Some(approver.id))
    })
}

#[tauri::command]
pub fn record_credit_payment(
    app: AppHandle,
    patient_id: i64,
    amount: Decimal,
    method: PaymentMethod,
) -> Result<CreditRecord, String> {
    with_conn(&app, TITLE, |conn| {
        patients::record_credit_payment(conn, patient_id, amount, method)
    })
}

#[tauri::command]
pub fn get_credit_payments(app: AppHandle, patient_id: i64) -> Result<Vec<CreditPayment>, String> {
    with_conn(&app, TITLE, |conn| patients::credit_payments(conn, patient_id))
}

#[tauri::command]
pub fn get_credit_statement(
    app: AppHandle,
    patient_id: i64,
) -> Result<Vec<CreditStatementEntry>, String> {
    with_conn(&app, TITLE, |conn| patients::credit_statement(conn, patient_id))
}
