//! Sign-in, bearer tokens and the console's local key/value storage.

use crate::admin::{map_user, USER_COLUMNS};
use crate::config::AppConfig;
use crate::error::{PosError, Result};
use crate::models::{AuthTokens, CurrentUser, LoginResponse, User};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const LEGACY_TOKEN_KEY: &str = "token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const CURRENT_USER_KEY: &str = "currentUser";

/// Key/value storage shared by every screen of the console.
pub struct LocalStorage<'a> {
    conn: &'a Connection,
}

impl<'a> LocalStorage<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO local_storage (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM local_storage WHERE key = ?1", [key])?;
        Ok(())
    }

    /// `access_token`, falling back to the older `token` key.
    pub fn bearer_token(&self) -> Result<Option<String>> {
        match self.get(ACCESS_TOKEN_KEY)? {
            Some(token) => Ok(Some(token)),
            None => self.get(LEGACY_TOKEN_KEY),
        }
    }

    pub fn current_user(&self) -> Result<Option<CurrentUser>> {
        match self.get(CURRENT_USER_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn store_session(&self, tokens: &AuthTokens, user: &CurrentUser) -> Result<()> {
        self.set(ACCESS_TOKEN_KEY, &tokens.access_token)?;
        self.set(REFRESH_TOKEN_KEY, &tokens.refresh_token)?;
        self.set(CURRENT_USER_KEY, &serde_json::to_string(user)?)?;
        self.remove(LEGACY_TOKEN_KEY)?;
        Ok(())
    }

    fn clear_session(&self) -> Result<()> {
        for key in [ACCESS_TOKEN_KEY, LEGACY_TOKEN_KEY, REFRESH_TOKEN_KEY, CURRENT_USER_KEY] {
            self.remove(key)?;
        }
        Ok(())
    }
}

impl From<&User> for CurrentUser {
    fn from(user: &User) -> Self {
        CurrentUser {
            id: user.id,
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            role: user.role,
            branch_id: user.branch_id,
        }
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PosError::validation(format!("Invalid timestamp {}: {}", raw, e)))
}

fn issue_tokens(conn: &Connection, user_id: i64, config: &AppConfig) -> Result<AuthTokens> {
    let now = Utc::now();
    let tokens = AuthTokens {
        access_token: Uuid::new_v4().simple().to_string(),
        refresh_token: Uuid::new_v4().simple().to_string(),
        access_expires_at: timestamp(now + Duration::minutes(config.access_token_ttl_minutes)),
        refresh_expires_at: timestamp(now + Duration::days(config.refresh_token_ttl_days)),
    };

    conn.execute(
        "INSERT INTO sessions (user_id, access_token, refresh_token, access_expires_at, refresh_expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user_id,
            tokens.access_token,
            tokens.refresh_token,
            tokens.access_expires_at,
            tokens.refresh_expires_at
        ],
    )?;

    Ok(tokens)
}

pub fn login(
    conn: &Connection,
    username: &str,
    password: &str,
    config: &AppConfig,
) -> Result<LoginResponse> {
    let username = username.trim().to_lowercase();

    let found: Option<(i64, String, bool)> = conn
        .query_row(
            "SELECT id, password_hash, is_active FROM users WHERE username = ?1",
            [&username],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let (user_id, password_hash, is_active) = match found {
        Some(found) => found,
        None => return Err(PosError::Unauthorized("Invalid username or password".to_string())),
    };

    if !bcrypt::verify(password, &password_hash).unwrap_or(false) {
        return Err(PosError::Unauthorized("Invalid username or password".to_string()));
    }
    if !is_active {
        return Err(PosError::Unauthorized("Account is disabled".to_string()));
    }

    let user = conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        [user_id],
        map_user,
    )?;
    let current = CurrentUser::from(&user);

    let tx = conn.unchecked_transaction()?;
    let tokens = issue_tokens(&tx, user_id, config)?;
    LocalStorage::new(&tx).store_session(&tokens, &current)?;
    tx.commit()?;

    info!(user_id, "User signed in");

    Ok(LoginResponse {
        tokens,
        user: current,
    })
}

/// Exchanges a refresh token for a new token pair. The old pair is revoked.
pub fn refresh(conn: &Connection, refresh_token: &str, config: &AppConfig) -> Result<AuthTokens> {
    let found: Option<(i64, i64, String, bool)> = conn
        .query_row(
            "SELECT s.id, s.user_id, s.refresh_expires_at, u.is_active
             FROM sessions s
             JOIN users u ON s.user_id = u.id
             WHERE s.refresh_token = ?1 AND s.revoked = 0",
            [refresh_token],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    let (session_id, user_id, refresh_expires_at, is_active) = found
        .ok_or_else(|| PosError::Unauthorized("Refresh token is invalid".to_string()))?;

    if !is_active {
        return Err(PosError::Unauthorized("Account is disabled".to_string()));
    }
    if parse_timestamp(&refresh_expires_at)? <= Utc::now() {
        return Err(PosError::Unauthorized("Refresh token has expired".to_string()));
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute("UPDATE sessions SET revoked = 1 WHERE id = ?1", [session_id])?;
    let tokens = issue_tokens(&tx, user_id, config)?;

    let storage = LocalStorage::new(&tx);
    storage.set(ACCESS_TOKEN_KEY, &tokens.access_token)?;
    storage.set(REFRESH_TOKEN_KEY, &tokens.refresh_token)?;
    tx.commit()?;

    debug!(user_id, "Session refreshed");

    Ok(tokens)
}

/// Resolves a bearer token to the signed-in user.
pub fn authenticate(conn: &Connection, access_token: &str) -> Result<CurrentUser> {
    let found: Option<(i64, String)> = conn
        .query_row(
            "SELECT user_id, access_expires_at FROM sessions WHERE access_token = ?1 AND revoked = 0",
            [access_token],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (user_id, access_expires_at) =
        found.ok_or_else(|| PosError::Unauthorized("Not signed in".to_string()))?;

    if parse_timestamp(&access_expires_at)? <= Utc::now() {
        return Err(PosError::Unauthorized("Session has expired".to_string()));
    }

    let user = conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        [user_id],
        map_user,
    )?;

    if !user.is_active {
        return Err(PosError::Unauthorized("Account is disabled".to_string()));
    }

    Ok(CurrentUser::from(&user))
}

/// The user behind the token currently held in local storage.
pub fn current_session(conn: &Connection) -> Result<CurrentUser> {
    let token = LocalStorage::new(conn)
        .bearer_token()?
        .ok_or_else(|| PosError::Unauthorized("Not signed in".to_string()))?;
    authenticate(conn, &token)
}

pub fn logout(conn: &Connection) -> Result<()> {
    let storage = LocalStorage::new(conn);
    if let Some(token) = storage.bearer_token()? {
        conn.execute("UPDATE sessions SET revoked = 1 WHERE access_token = ?1", [token])?;
    }
    storage.clear_session()?;
    Ok(())
}
