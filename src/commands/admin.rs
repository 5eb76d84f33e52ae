use super::with_conn;
use crate::admin;
use crate::auth;
use crate::error::{PosError, Result};
use crate::models::{Branch, CreateBranch, CreateUser, Role, UpdateBranch, UpdateUser, User};
use rusqlite::Connection;
use tauri::AppHandle;

const TITLE: &str = "Administration";

/// Admins only, except on a fresh install where the first account is
/// created before anyone can sign in.
fn require_admin(conn: &Connection) -> Result<()> {
    if admin::list_users(conn, None)?.is_empty() {
        return Ok(());
    }

    let user = auth::current_session(conn)?;
    if user.role != Role::Admin {
        return Err(PosError::Unauthorized(
            "Only administrators can manage branches and users".to_string(),
        ));
    }
    Ok(())
}

// ===== Branches =====

#[tauri::command]
pub fn get_branches(app: AppHandle, include_inactive: Option<bool>) -> Result<Vec<Branch>, String> {
    with_conn(&app, TITLE, |conn| {
        admin::list_branches(conn, include_inactive.unwrap_or(false))
    })
}

#[tauri::command]
pub fn create_branch(app: AppHandle, branch: CreateBranch) -> Result<Branch, String> {
    with_conn(&app, TITLE, |conn| {
        require_admin(conn)?;
        admin::create_branch(conn, branch)
    })
}

#[tauri::command]
pub fn update_branch(app: AppHandle, branch: UpdateBranch) -> Result<Branch, String> {
    with_conn(&app, TITLE, |conn| {
        require_admin(conn)?;
        admin::update_branch(conn, branch)
    })
}

#[tauri::command]
pub fn deactivate_branch(app: AppHandle, id: i64) -> Result<(), String> {
    with_conn(&app, TITLE, |conn| {
        require_admin(conn)?;
        admin::deactivate_branch(conn, id)
    })
}

// ===== Users =====

#[tauri::command]
pub fn get_users(app: AppHandle, branch_id: Option<i64>) -> Result<Vec<User>, String> {
    with_conn(&app, TITLE, |conn| admin::list_users(conn, branch_id))
}

#[tauri::command]
pub fn create_user(app: AppHandle, user: CreateUser) -> Result<User, String> {
    with_conn(&app, TITLE, |conn| {
        require_admin(conn)?;
        admin::create_user(conn, user)
    })
}

#[tauri::command]
pub fn update_user(app: AppHandle, user: UpdateUser) -> Result<User, String> {
    with_conn(&app, TITLE, |conn| {
        require_admin(conn)?;
        admin::update_user(conn, user)
    })
}

#[tauri::command]
pub fn deactivate_user(app: AppHandle, id: i64) -> Result<(), String> {
    with_conn(&app, TITLE, |conn| {
        require_admin(conn)?;
        admin::deactivate_user(conn, id)
    })
}

#[tauri::command]
pub fn change_password(
    app: AppHandle,
    current: String,
    new_password: String,
) -> Result<(), String> {
    with_conn(&app, TITLE, |conn| {
        let user = auth::current_session(conn)?;
        admin::change_password(conn, user.id, &current, &new_password)
    })
}
