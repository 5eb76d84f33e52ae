use crate::error::{PosError, Result};
use crate::models::{Branch, CreateBranch, CreateUser, Role, UpdateBranch, UpdateUser, User};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

#[cfg(not(test))]
const BCRYPT_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const BCRYPT_COST: u32 = 4;

const MIN_PASSWORD_LEN: usize = 8;

fn map_branch(row: &Row<'_>) -> rusqlite::Result<Branch> {
    Ok(Branch {
        id: row.get(0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        phone: row.get(3)?,
        is_active: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub(crate) fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let raw_role: String = row.get(3)?;
    let role = Role::parse(&raw_role).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown role {}", raw_role).into(),
        )
    })?;

    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        full_name: row.get(2)?,
        role,
        branch_id: row.get(4)?,
        is_active: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub(crate) const USER_COLUMNS: &str = "id, username, full_name, role, branch_id, is_active, created_at";

fn map_unique_violation(e: rusqlite::Error, message: String) -> PosError {
    match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            PosError::Conflict(message)
        }
        other => PosError::Database(other),
    }
}

// ===== Branches =====

pub fn create_branch(conn: &Connection, branch: CreateBranch) -> Result<Branch> {
    if branch.name.trim().is_empty() {
        return Err(PosError::validation("Branch name is required"));
    }

    conn.execute(
        "INSERT INTO branches (name, address, phone) VALUES (?1, ?2, ?3)",
        params![branch.name.trim(), branch.address, branch.phone],
    )
    .map_err(|e| map_unique_violation(e, format!("Branch {} already exists", branch.name.trim())))?;

    get_branch(conn, conn.last_insert_rowid())
}

pub fn update_branch(conn: &Connection, branch: UpdateBranch) -> Result<Branch> {
    conn.execute(
        "UPDATE branches SET name = ?1, address = ?2, phone = ?3 WHERE id = ?4",
        params![branch.name, branch.address, branch.phone, branch.id],
    )?;

    if conn.changes() == 0 {
        return Err(PosError::not_found(format!("Branch {}", branch.id)));
    }

    get_branch(conn, branch.id)
}

pub fn get_branch(conn: &Connection, id: i64) -> Result<Branch> {
    conn.query_row(
        "SELECT id, name, address, phone, is_active, created_at FROM branches WHERE id = ?1",
        [id],
        map_branch,
    )
    .optional()?
    .ok_or_else(|| PosError::not_found(format!("Branch {}", id)))
}

pub fn list_branches(conn: &Connection, include_inactive: bool) -> Result<Vec<Branch>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, address, phone, is_active, created_at FROM branches
         WHERE is_active = 1 OR ?1
         ORDER BY name",
    )?;

    let branches = stmt
        .query_map([include_inactive], map_branch)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(branches)
}

/// A branch with active users cannot be closed.
pub fn deactivate_branch(conn: &Connection, id: i64) -> Result<()> {
    let active_users: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE branch_id = ?1 AND is_active = 1",
        [id],
        |row| row.get(0),
    )?;

    if active_users > 0 {
        return Err(PosError::Conflict(
            "Cannot deactivate a branch with active users".to_string(),
        ));
    }

    conn.execute("UPDATE branches SET is_active = 0 WHERE id = ?1", [id])?;
    if conn.changes() == 0 {
        return Err(PosError::not_found(format!("Branch {}", id)));
    }

    Ok(())
}

// ===== Users =====

fn hash_password(password: &str) -> Result<String> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(PosError::validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    bcrypt::hash(password, BCRYPT_COST)
        .map_err(|e| PosError::validation(format!("Failed to hash password: {}", e)))
}

pub fn create_user(conn: &Connection, user: CreateUser) -> Result<User> {
    let username = user.username.trim().to_lowercase();
    if username.is_empty() {
        return Err(PosError::validation("Username is required"));
    }
    if let Some(branch_id) = user.branch_id {
        get_branch(conn, branch_id)?;
    }

    let password_hash = hash_password(&user.password)?;

    conn.execute(
        "INSERT INTO users (username, password_hash, full_name, role, branch_id) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![username, password_hash, user.full_name, user.role.as_str(), user.branch_id],
    )
    .map_err(|e| map_unique_violation(e, format!("User {} already exists", username)))?;

    let id = conn.last_insert_rowid();
    info!(user_id = id, role = user.role.as_str(), "User created");

    get_user(conn, id)
}

pub fn get_user(conn: &Connection, id: i64) -> Result<User> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        [id],
        map_user,
    )
    .optional()?
    .ok_or_else(|| PosError::not_found(format!("User {}", id)))
}

pub fn list_users(conn: &Connection, branch_id: Option<i64>) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users WHERE ?1 IS NULL OR branch_id = ?1 ORDER BY username",
        USER_COLUMNS
    ))?;

    let users = stmt
        .query_map([branch_id], map_user)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(users)
}

pub fn update_user(conn: &Connection, user: UpdateUser) -> Result<User> {
    if let Some(branch_id) = user.branch_id {
        get_branch(conn, branch_id)?;
    }

    conn.execute(
        "UPDATE users SET full_name = ?1, role = ?2, branch_id = ?3 WHERE id = ?4",
        params![user.full_name, user.role.as_str(), user.branch_id, user.id],
    )?;

    if conn.changes() == 0 {
        return Err(PosError::not_found(format!("User {}", user.id)));
    }

    get_user(conn, user.id)
}

/// Deactivating a user also revokes their sessions.
pub fn deactivate_user(conn: &Connection, id: i64) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("UPDATE users SET is_active = 0 WHERE id = ?1", [id])?;
    if tx.changes() == 0 {
        return Err(PosError::not_found(format!("User {}", id)));
    }
    tx.execute("UPDATE sessions SET revoked = 1 WHERE user_id = ?1", [id])?;
    tx.commit()?;

    info!(user_id = id, "User deactivated");
    Ok(())
}

pub fn change_password(
    conn: &Connection,
    id: i64,
    current: &str,
    new_password: &str,
) -> Result<()> {
    let stored: String = conn
        .query_row("SELECT password_hash FROM users WHERE id = ?1", [id], |row| row.get(0))
        .optional()?
        .ok_or_else(|| PosError::not_found(format!("User {}", id)))?;

    if !bcrypt::verify(current, &stored).unwrap_or(false) {
        return Err(PosError::Unauthorized("Current password is incorrect".to_string()));
    }

    let password_hash = hash_password(new_password)?;
    conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE id = ?2",
        params![password_hash, id],
    )?;

    Ok(())
}
