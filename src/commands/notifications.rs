use crate::notifications::{Notification, NotificationCenter, NotificationKind};
use tauri::{AppHandle, Manager};

#[tauri::command]
pub fn get_notifications(app: AppHandle) -> Vec<Notification> {
    app.state::<NotificationCenter>().list()
}

#[tauri::command]
pub fn get_unread_count(app: AppHandle) -> usize {
    app.state::<NotificationCenter>().unread_count()
}

#[tauri::command]
pub fn notify(app: AppHandle, kind: NotificationKind, title: String, message: String) -> u64 {
    app.state::<NotificationCenter>().add(kind, &title, &message)
}

#[tauri::command]
pub fn mark_notification_read(app: AppHandle, id: u64) -> bool {
    app.state::<NotificationCenter>().mark_read(id)
}

#[tauri::command]
pub fn mark_all_notifications_read(app: AppHandle) {
    app.state::<NotificationCenter>().mark_all_read()
}

#[tauri::command]
pub fn clear_notifications(app: AppHandle) {
    app.state::<NotificationCenter>().clear()
}
