pub mod admin;
pub mod audit;
pub mod auth;
pub mod billing;
pub mod expenses;
pub mod inventory;
pub mod notifications;
pub mod patients;
pub mod reports;
pub mod sales;
pub mod suppliers;

use crate::db::DatabaseExt;
use crate::error::Result;
use crate::error_boundary::guard_command;
use crate::notifications::NotificationCenter;
use rusqlite::Connection;
use tauri::{AppHandle, Manager};

/// Runs `f` on the shared connection behind an error boundary. Errors
/// and panics are pushed to the notification center under `title` before
/// they reach the window.
pub(crate) fn with_conn<T>(
    app: &AppHandle,
    title: &str,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> std::result::Result<T, String> {
    let db = app.db();
    let notifications = app.state::<NotificationCenter>();
    guard_command(&notifications, title, || db.conn().and_then(|conn| f(&conn)))
}

/// Id of the signed-in user for audit entries. Anonymous when nobody is.
pub(crate) fn acting_user(conn: &Connection) -> Option<i64> {
    crate::auth::current_session(conn).ok().map(|user| user.id)
}
