//! Audit trail and compliance views.

use crate::error::Result;
use crate::models::{ActionCount, AuditEntry, AuditFilter, AuditRecord, DispensingRecord};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};

pub fn record(conn: &Connection, entry: &AuditEntry) -> Result<i64> {
    let details = entry
        .details
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO audit_log (user_id, action, entity_type, entity_id, details) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![entry.user_id, entry.action, entry.entity_type, entry.entity_id, details],
    )?;

    Ok(conn.last_insert_rowid())
}

pub fn list(conn: &Connection, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
    let mut sql = String::from(
        "SELECT a.id, a.user_id, u.username, a.action, a.entity_type, a.entity_id, a.details, a.created_at
         FROM audit_log a
         LEFT JOIN users u ON a.user_id = u.id
         WHERE 1 = 1",
    );
    let mut values: Vec<Value> = Vec::new();

    if let Some(user_id) = filter.user_id {
        values.push(Value::Integer(user_id));
        sql.push_str(&format!(" AND a.user_id = ?{}", values.len()));
    }
    if let Some(action) = &filter.action {
        values.push(Value::Text(action.clone()));
        sql.push_str(&format!(" AND a.action = ?{}", values.len()));
    }
    if let Some(entity_type) = &filter.entity_type {
        values.push(Value::Text(entity_type.clone()));
        sql.push_str(&format!(" AND a.entity_type = ?{}", values.len()));
    }
    if let Some(from) = filter.from {
        values.push(Value::Text(from.to_string()));
        sql.push_str(&format!(" AND date(a.created_at, 'localtime') >= ?{}", values.len()));
    }
    if let Some(to) = filter.to {
        values.push(Value::Text(to.to_string()));
        sql.push_str(&format!(" AND date(a.created_at, 'localtime') <= ?{}", values.len()));
    }

    values.push(Value::Integer(filter.limit.unwrap_or(200)));
    sql.push_str(&format!(" ORDER BY a.id DESC LIMIT ?{}", values.len()));

    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params_from_iter(values), |row| {
            let details: Option<String> = row.get(6)?;
            Ok(AuditRecord {
                id: row.get(0)?,
                user_id: row.get(1)?,
                username: row.get(2)?,
                action: row.get(3)?,
                entity_type: row.get(4)?,
                entity_id: row.get(5)?,
                details: details.and_then(|raw| serde_json::from_str(&raw).ok()),
                created_at: row.get(7)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(records)
}

pub fn action_summary(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<ActionCount>> {
    let mut stmt = conn.prepare(
        "SELECT action, COUNT(*) FROM audit_log
         WHERE date(created_at, 'localtime') BETWEEN ?1 AND ?2
         GROUP BY action
         ORDER BY COUNT(*) DESC, action ASC",
    )?;

    let counts = stmt
        .query_map(params![from, to], |row| {
            Ok(ActionCount {
                action: row.get(0)?,
                count: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(counts)
}

/// Prescription-only medicines dispensed in completed sales.
pub fn prescription_dispensing(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<DispensingRecord>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, si.medicine_id, m.name, si.batch_number, si.quantity, s.patient_id, s.prescription_ref, s.created_at
         FROM sale_items si
         JOIN sales s ON si.sale_id = s.id
         JOIN medicines m ON si.medicine_id = m.id
         WHERE m.requires_prescription = 1
           AND s.status = 'completed'
           AND date(s.created_at, 'localtime') BETWEEN ?1 AND ?2
         ORDER BY s.created_at ASC, si.id ASC",
    )?;

    let records = stmt
        .query_map(params![from, to], |row| {
            Ok(DispensingRecord {
                sale_id: row.get(0)?,
                medicine_id: row.get(1)?,
                medicine_name: row.get(2)?,
                batch_number: row.get(3)?,
                quantity: row.get(4)?,
                patient_id: row.get(5)?,
                prescription_ref: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(records)
}
