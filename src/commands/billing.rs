use super::with_conn;
use crate::auth;
use crate::billing::{
    self, BillingSession, BillingSnapshot, BillingState, CheckoutOutcome, CheckoutPlan,
    CheckoutRequest, PaymentInput,
};
use crate::cart::{Discount, TaxSettings};
use crate::config::AppConfig;
use crate::error::Result;
use crate::models::PendingBillSummary;
use crate::notifications::NotificationCenter;
use rusqlite::Connection;
use rust_decimal::Decimal;
use tauri::{AppHandle, Manager};

const TITLE: &str = "Billing";

/// Locks the billing session before the database, always in that order.
fn with_session<T>(
    app: &AppHandle,
    f: impl FnOnce(&mut BillingSession, &Connection, &TaxSettings) -> Result<T>,
) -> std::result::Result<T, String> {
    let state = app.state::<BillingState>();
    let mut session = state.session.lock().map_err(|e| e.to_string())?;
    let config = app.state::<AppConfig>();

    with_conn(app, TITLE, |conn| {
        let tax = config.effective_tax(conn)?;
        f(&mut *session, conn, &tax)
    })
}

fn checkout_request(
    conn: &Connection,
    payment: PaymentInput,
    tax: &TaxSettings,
) -> Result<CheckoutRequest> {
    let cashier = auth::current_session(conn)?;
    Ok(CheckoutRequest {
        payment,
        tax: tax.clone(),
        user_id: Some(cashier.id),
        branch_id: cashier.branch_id,
    })
}

fn announce(app: &AppHandle, outcome: &CheckoutOutcome) {
    if let CheckoutOutcome::Completed { sale } = outcome {
        app.state::<NotificationCenter>().success(
            "Sale completed",
            &format!("Sale #{} recorded for {}", sale.sale.id, sale.sale.total),
        );
    }
}

// ===== Bill =====

#[tauri::command]
pub fn get_bill(app: AppHandle) -> Result<BillingSnapshot, String> {
    with_session(&app, |session, _, tax| Ok(session.snapshot(tax)))
}

#[tauri::command]
pub fn add_to_cart(
    app: AppHandle,
    medicine_id: i64,
    quantity: i64,
) -> Result<BillingSnapshot, String> {
    with_session(&app, |session, conn, tax| {
        session.add_to_cart(conn, medicine_id, quantity)?;
        Ok(session.snapshot(tax))
    })
}

#[tauri::command]
pub fn update_cart_quantity(
    app: AppHandle,
    cart_key: String,
    quantity: i64,
) -> Result<BillingSnapshot, String> {
    with_session(&app, |session, conn, tax| {
        session.update_quantity(conn, &cart_key, quantity)?;
        Ok(session.snapshot(tax))
    })
}

#[tauri::command]
pub fn remove_from_cart(app: AppHandle, cart_key: String) -> Result<BillingSnapshot, String> {
    with_session(&app, |session, conn, tax| {
        session.remove_item(conn, &cart_key)?;
        Ok(session.snapshot(tax))
    })
}

#[tauri::command]
pub fn clear_cart(app: AppHandle) -> Result<BillingSnapshot, String> {
    with_session(&app, |session, conn, tax| {
        session.clear_cart(conn)?;
        Ok(session.snapshot(tax))
    })
}

#[tauri::command]
pub fn set_discount(app: AppHandle, discount: Discount) -> Result<BillingSnapshot, String> {
    with_session(&app, |session, _, tax| {
        session.set_discount(discount)?;
        Ok(session.snapshot(tax))
    })
}

#[tauri::command]
pub fn set_bill_patient(
    app: AppHandle,
    patient_id: Option<i64>,
) -> Result<BillingSnapshot, String> {
    with_session(&app, |session, conn, tax| {
        session.set_patient(conn, patient_id)?;
        Ok(session.snapshot(tax))
    })
}

#[tauri::command]
pub fn set_bill_details(
    app: AppHandle,
    prescription_ref: Option<String>,
    notes: Option<String>,
) -> Result<BillingSnapshot, String> {
    with_session(&app, |session, _, tax| {
        session.set_prescription_ref(prescription_ref);
        session.set_notes(notes);
        Ok(session.snapshot(tax))
    })
}

// ===== Checkout =====

#[tauri::command]
pub fn plan_checkout(app: AppHandle, payment: PaymentInput) -> Result<CheckoutPlan, String> {
    with_session(&app, |session, conn, tax| session.plan_checkout(conn, &payment, tax))
}

#[tauri::command]
pub fn checkout(app: AppHandle, payment: PaymentInput) -> Result<CheckoutOutcome, String> {
    let outcome = with_session(&app, |session, conn, tax| {
        let request = checkout_request(conn, payment, tax)?;
        session.checkout(conn, &request)
    })?;
    announce(&app, &outcome);
    Ok(outcome)
}

#[tauri::command]
pub fn approve_credit_and_checkout(
    app: AppHandle,
    payment: PaymentInput,
    credit_limit: Decimal,
) -> Result<CheckoutOutcome, String> {
    let outcome = with_session(&app, |session, conn, tax| {
        let approver = auth::current_session(conn)?;
        let request = checkout_request(conn, payment, tax)?;
        session.approve_credit_and_checkout(conn, &request, credit_limit, &approver)
    })?;
    announce(&app, &outcome);
    Ok(outcome)
}

// ===== Pending bills =====

#[tauri::command]
pub fn hold_bill(app: AppHandle, label: String) -> Result<i64, String> {
    with_session(&app, |session, conn, _| {
        let created_by = super::acting_user(conn);
        session.save_pending(conn, &label, created_by)
    })
}

#[tauri::command]
pub fn resume_bill(app: AppHandle, id: i64) -> Result<BillingSnapshot, String> {
    with_session(&app, |session, conn, tax| {
        session.resume_pending(conn, id)?;
        Ok(session.snapshot(tax))
    })
}

#[tauri::command]
pub fn get_pending_bills(app: AppHandle) -> Result<Vec<PendingBillSummary>, String> {
    with_conn(&app, TITLE, billing::list_pending)
}

#[tauri::command]
pub fn discard_pending_bill(app: AppHandle, id: i64) -> Result<(), String> {
    with_conn(&app, TITLE, |conn| billing::discard_pending(conn, id))
}
