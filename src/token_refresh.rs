//! Background refresh of the stored session tokens.
//!
//! Failures are swallowed: an expired or revoked session is left for the
//! sign-in guard to notice on the next authenticated call.

use crate::auth::{self, LocalStorage, REFRESH_TOKEN_KEY};
use crate::config::AppConfig;
use crate::db::Database;
use crate::error::Result;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    Refreshed,
    NoToken,
    Failed,
}

pub struct TokenRefresher {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TokenRefresher {
    pub fn start(db: Arc<Database>, config: AppConfig, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("token-refresh".to_string())
            .spawn(move || {
                info!(interval_secs = interval.as_secs(), "Token refresh started");
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            tick_once(&db, &config);
                        }
                        // Stop requested or the owner went away.
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Token refresh stopped");
            })
            .ok();

        if handle.is_none() {
            warn!("Could not spawn token refresh thread");
        }

        Self {
            stop: Some(stop_tx),
            handle,
        }
    }

    pub fn from_config(db: Arc<Database>, config: AppConfig) -> Self {
        let interval = Duration::from_secs(config.token_refresh_minutes.max(1) * 60);
        Self::start(db, config, interval)
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TokenRefresher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One refresh attempt. Never fails; the outcome is only reported.
pub fn tick_once(db: &Database, config: &AppConfig) -> TickResult {
    match try_refresh(db, config) {
        Ok(true) => TickResult::Refreshed,
        Ok(false) => TickResult::NoToken,
        Err(e) => {
            warn!(error = %e, "Token refresh failed");
            TickResult::Failed
        }
    }
}

fn try_refresh(db: &Database, config: &AppConfig) -> Result<bool> {
    let conn = db.conn()?;

    let refresh_token = match LocalStorage::new(&conn).get(REFRESH_TOKEN_KEY)? {
        Some(token) => token,
        None => {
            debug!("No refresh token stored, skipping refresh");
            return Ok(false);
        }
    };

    auth::refresh(&conn, &refresh_token, config)?;
    Ok(true)
}
