use super::with_conn;
use crate::auth;
use crate::cart::TaxSettings;
use crate::config::{self, AppConfig};
use crate::error::PosError;
use crate::models::{CurrentUser, LoginResponse, Role};
use tauri::{AppHandle, Manager};

const TITLE: &str = "Sign in";

#[tauri::command]
pub fn login(app: AppHandle, username: String, password: String) -> Result<LoginResponse, String> {
    let config = app.state::<AppConfig>();
    with_conn(&app, TITLE, |conn| auth::login(conn, &username, &password, &config))
}

#[tauri::command]
pub fn logout(app: AppHandle) -> Result<(), String> {
    with_conn(&app, TITLE, auth::logout)
}

#[tauri::command]
pub fn get_current_user(app: AppHandle) -> Result<CurrentUser, String> {
    with_conn(&app, TITLE, auth::current_session)
}

// ===== Settings =====

#[tauri::command]
pub fn get_tax_settings(app: AppHandle) -> Result<TaxSettings, String> {
    let config = app.state::<AppConfig>();
    with_conn(&app, "Settings", |conn| config.effective_tax(conn))
}

#[tauri::command]
pub fn save_tax_settings(app: AppHandle, tax: TaxSettings) -> Result<TaxSettings, String> {
    with_conn(&app, "Settings", |conn| {
        let user = auth::current_session(conn)?;
        if !matches!(user.role, Role::Admin | Role::Manager) {
            return Err(PosError::Unauthorized(
                "Only managers can change tax settings".to_string(),
            ));
        }
        config::save_tax_settings(conn, &tax)?;
        Ok(tax)
    })
}
