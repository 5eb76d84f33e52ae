pub mod admin;
pub mod audit;
pub mod auth;
pub mod billing;
pub mod cart;
pub mod config;
pub mod db;
pub mod error;
pub mod error_boundary;
pub mod expenses;
pub mod inventory;
pub mod models;
pub mod notifications;
pub mod patients;
pub mod reports;
pub mod sales;
pub mod suppliers;
pub mod token_refresh;

#[cfg(feature = "desktop")]
mod commands;

#[cfg(test)]
mod tests;

use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pharmacy_console_lib=debug"));

    // A second call (tests, re-entry) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use billing::BillingState;
    use config::AppConfig;
    use db::Database;
    use notifications::NotificationCenter;
    use std::sync::{Arc, Mutex};
    use tauri::{Manager, RunEvent};
    use token_refresh::TokenRefresher;
    use tracing::{error, info};

    init_tracing();

    let app = tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .setup(|app| {
            let app_dir = app.path().app_data_dir()?;
            let config = AppConfig::load(&app_dir)?;

            let db = Arc::new(Database::open(&app_dir.join(&config.database_file))?);
            db.initialize()?;
            {
                let conn = db.conn()?;
                billing::reconcile_reservations(&conn)?;
            }

            let refresher = TokenRefresher::from_config(db.clone(), config.clone());

            app.manage(db);
            app.manage(config);
            app.manage(NotificationCenter::new());
            app.manage(BillingState::default());
            app.manage(Mutex::new(refresher));

            info!(dir = %app_dir.display(), "Pharmacy console ready");
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Auth & settings
            commands::auth::login,
            commands::auth::logout,
            commands::auth::get_current_user,
            commands::auth::get_tax_settings,
            commands::auth::save_tax_settings,
            // Billing
            commands::billing::get_bill,
            commands::billing::add_to_cart,
            commands::billing::update_cart_quantity,
            commands::billing::remove_from_cart,
            commands::billing::clear_cart,
            commands::billing::set_discount,
            commands::billing::set_bill_patient,
            commands::billing::set_bill_details,
            commands::billing::plan_checkout,
            commands::billing::checkout,
            commands::billing::approve_credit_and_checkout,
            commands::billing::hold_bill,
            commands::billing::resume_bill,
            commands::billing::get_pending_bills,
            commands::billing::discard_pending_bill,
            // Inventory
            commands::inventory::get_medicines,
            commands::inventory::get_medicine,
            commands::inventory::create_medicine,
            commands::inventory::update_medicine,
            commands::inventory::deactivate_medicine,
            commands::inventory::receive_stock,
            commands::inventory::get_batches,
            commands::inventory::adjust_batch_quantity,
            commands::inventory::get_low_stock,
            commands::inventory::get_expiring_batches,
            // Sales
            commands::sales::get_sales,
            commands::sales::get_sale,
            commands::sales::update_sale,
            commands::sales::delete_sale,
            commands::sales::close_day,
            commands::sales::get_sales_history,
            // Patients
            commands::patients::get_patients,
            commands::patients::get_patient,
            commands::patients::create_patient,
            commands::patients::update_patient,
            commands::patients::delete_patient,
            commands::patients::get_credit_record,
            commands::patients::approve_credit,
            commands::patients::record_credit_payment,
            commands::patients::get_credit_payments,
            commands::patients::get_credit_statement,
            // Suppliers
            commands::suppliers::get_suppliers,
            commands::suppliers::create_supplier,
            commands::suppliers::update_supplier,
            commands::suppliers::deactivate_supplier,
            commands::suppliers::add_ledger_entry,
            commands::suppliers::get_supplier_ledger,
            commands::suppliers::get_supplier_balance,
            commands::suppliers::get_payables,
            // Expenses
            commands::expenses::get_expenses,
            commands::expenses::create_expense,
            commands::expenses::update_expense,
            commands::expenses::delete_expense,
            commands::expenses::get_expense_summary,
            // Administration
            commands::admin::get_branches,
            commands::admin::create_branch,
            commands::admin::update_branch,
            commands::admin::deactivate_branch,
            commands::admin::get_users,
            commands::admin::create_user,
            commands::admin::update_user,
            commands::admin::deactivate_user,
            commands::admin::change_password,
            // Reports
            commands::reports::get_dashboard,
            commands::reports::get_sales_report,
            commands::reports::get_top_medicines,
            commands::audit::get_audit_log,
            commands::audit::get_action_summary,
            commands::audit::get_prescription_dispensing,
            // Notifications
            commands::notifications::get_notifications,
            commands::notifications::get_unread_count,
            commands::notifications::notify,
            commands::notifications::mark_notification_read,
            commands::notifications::mark_all_notifications_read,
            commands::notifications::clear_notifications,
        ])
        .build(tauri::generate_context!());

    let app = match app {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "Failed to start pharmacy console");
            return;
        }
    };

    app.run(|handle, event| {
        if let RunEvent::Exit = event {
            if let Ok(mut refresher) = handle.state::<Mutex<TokenRefresher>>().lock() {
                refresher.stop();
            }
        }
    });
}
