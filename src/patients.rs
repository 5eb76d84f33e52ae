use crate::audit;
use crate::db::decimal_column;
use crate::error::{PosError, Result};
use crate::models::{
    AuditEntry, CreatePatient, CreditPayment, CreditRecord, CreditStatementEntry, Patient,
    PaymentMethod, UpdatePatient,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::info;

const PATIENT_COLUMNS: &str = "id, name, phone, email, address, date_of_birth, created_at";

fn map_patient(row: &Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        email: row.get(3)?,
        address: row.get(4)?,
        date_of_birth: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn map_credit(row: &Row<'_>) -> rusqlite::Result<CreditRecord> {
    let credit_limit = decimal_column(row, 1)?;
    let balance = decimal_column(row, 2)?;
    Ok(CreditRecord {
        patient_id: row.get(0)?,
        credit_limit,
        balance,
        available: (credit_limit - balance).max(Decimal::ZERO),
        approved_by: row.get(3)?,
        approved_at: row.get(4)?,
    })
}

// ===== Directory =====

pub fn create_patient(conn: &Connection, patient: CreatePatient) -> Result<Patient> {
    if patient.name.trim().is_empty() {
        return Err(PosError::validation("Patient name is required"));
    }

    conn.execute(
        "INSERT INTO patients (name, phone, email, address, date_of_birth) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            patient.name.trim(),
            patient.phone,
            patient.email,
            patient.address,
            patient.date_of_birth
        ],
    )?;

    get_patient(conn, conn.last_insert_rowid())
}

pub fn update_patient(conn: &Connection, patient: UpdatePatient) -> Result<Patient> {
    if patient.name.trim().is_empty() {
        return Err(PosError::validation("Patient name is required"));
    }

    conn.execute(
        "UPDATE patients SET name = ?1, phone = ?2, email = ?3, address = ?4, date_of_birth = ?5 WHERE id = ?6",
        params![
            patient.name.trim(),
            patient.phone,
            patient.email,
            patient.address,
            patient.date_of_birth,
            patient.id
        ],
    )?;

    if conn.changes() == 0 {
        return Err(PosError::not_found(format!("Patient {}", patient.id)));
    }

    get_patient(conn, patient.id)
}

pub fn get_patient(conn: &Connection, id: i64) -> Result<Patient> {
    conn.query_row(
        &format!("SELECT {} FROM patients WHERE id = ?1", PATIENT_COLUMNS),
        [id],
        map_patient,
    )
    .optional()?
    .ok_or_else(|| PosError::not_found(format!("Patient {}", id)))
}

/// Customer directory lookup by name or phone number.
pub fn list_patients(conn: &Connection, search: Option<&str>) -> Result<Vec<Patient>> {
    let pattern = format!("%{}%", search.unwrap_or("").trim());

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM patients
         WHERE name LIKE ?1 OR COALESCE(phone, '') LIKE ?1
         ORDER BY name",
        PATIENT_COLUMNS
    ))?;

    let patients = stmt
        .query_map([pattern], map_patient)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(patients)
}

pub fn delete_patient(conn: &Connection, id: i64) -> Result<()> {
    if let Some(credit) = credit_record(conn, id)? {
        if credit.balance > Decimal::ZERO {
            return Err(PosError::Conflict(
                "Cannot delete a patient with outstanding credit".to_string(),
            ));
        }
    }

    let sale_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sales WHERE patient_id = ?1",
        [id],
        |row| row.get(0),
    )?;
    if sale_count > 0 {
        return Err(PosError::Conflict(
            "Cannot delete a patient with recorded sales".to_string(),
        ));
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM credit_payments WHERE patient_id = ?1", [id])?;
    tx.execute("DELETE FROM patient_credit WHERE patient_id = ?1", [id])?;
    tx.execute("DELETE FROM patients WHERE id = ?1", [id])?;
    if tx.changes() == 0 {
        return Err(PosError::not_found(format!("Patient {}", id)));
    }
    tx.commit()?;

    Ok(())
}

// ===== Credit =====

pub fn credit_record(conn: &Connection, patient_id: i64) -> Result<Option<CreditRecord>> {
    let record = conn
        .query_row(
            "SELECT patient_id, credit_limit, balance, approved_by, approved_at
             FROM patient_credit WHERE patient_id = ?1",
            [patient_id],
            map_credit,
        )
        .optional()?;
    Ok(record)
}

/// Opens a credit account or changes its limit. The limit can never be set
/// below what the patient already owes.
pub fn approve_credit(
    conn: &Connection,
    patient_id: i64,
    credit_limit: Decimal,
    approved_by: Option<i64>,
) -> Result<CreditRecord> {
    get_patient(conn, patient_id)?;

    if credit_limit < Decimal::ZERO {
        return Err(PosError::validation("Credit limit cannot be negative"));
    }

    let existing = credit_record(conn, patient_id)?;
    if let Some(existing) = &existing {
        if credit_limit < existing.balance {
            return Err(PosError::validation(format!(
                "Credit limit cannot be below the outstanding balance of {}",
                existing.balance
            )));
        }
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO patient_credit (patient_id, credit_limit, balance, approved_by)
         VALUES (?1, ?2, '0', ?3)
         ON CONFLICT(patient_id) DO UPDATE SET
             credit_limit = excluded.credit_limit,
             approved_by = excluded.approved_by,
             approved_at = CURRENT_TIMESTAMP",
        params![patient_id, credit_limit.to_string(), approved_by],
    )?;
    audit::record(
        &tx,
        &AuditEntry {
            user_id: approved_by,
            action: "credit_approved".to_string(),
            entity_type: "patient".to_string(),
            entity_id: Some(patient_id),
            details: Some(serde_json::json!({
                "previous_limit": existing.map(|c| c.credit_limit.to_string()),
                "credit_limit": credit_limit.to_string(),
            })),
        },
    )?;
    tx.commit()?;

    info!(patient_id, credit_limit = %credit_limit, "Credit approved");

    credit_record(conn, patient_id)?
        .ok_or_else(|| PosError::not_found(format!("Credit record for patient {}", patient_id)))
}

/// Adds a credit sale to the patient's balance. Runs inside the caller's
/// transaction; the limit check is the caller's responsibility.
pub(crate) fn add_to_balance(conn: &Connection, patient_id: i64, amount: Decimal) -> Result<()> {
    let record = credit_record(conn, patient_id)?.ok_or_else(|| {
        PosError::CreditApprovalRequired {
            patient_id,
            credit_amount: amount,
        }
    })?;

    set_balance(conn, patient_id, record.balance + amount)
}

pub(crate) fn reduce_balance(conn: &Connection, patient_id: i64, amount: Decimal) -> Result<()> {
    if let Some(record) = credit_record(conn, patient_id)? {
        set_balance(conn, patient_id, (record.balance - amount).max(Decimal::ZERO))?;
    }
    Ok(())
}

fn set_balance(conn: &Connection, patient_id: i64, balance: Decimal) -> Result<()> {
    conn.execute(
        "UPDATE patient_credit SET balance = ?1 WHERE patient_id = ?2",
        params![balance.to_string(), patient_id],
    )?;
    Ok(())
}

pub fn record_credit_payment(
    conn: &Connection,
    patient_id: i64,
    amount: Decimal,
    method: PaymentMethod,
) -> Result<CreditRecord> {
    if amount <= Decimal::ZERO {
        return Err(PosError::validation("Payment amount must be positive"));
    }

    let record = credit_record(conn, patient_id)?
        .ok_or_else(|| PosError::not_found(format!("Credit record for patient {}", patient_id)))?;

    if amount > record.balance {
        return Err(PosError::validation(format!(
            "Payment of {} exceeds the outstanding balance of {}",
            amount, record.balance
        )));
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO credit_payments (patient_id, amount, method) VALUES (?1, ?2, ?3)",
        params![patient_id, amount.to_string(), method.as_str()],
    )?;
    set_balance(&tx, patient_id, record.balance - amount)?;
    tx.commit()?;

    info!(patient_id, amount = %amount, "Credit payment recorded");

    credit_record(conn, patient_id)?
        .ok_or_else(|| PosError::not_found(format!("Credit record for patient {}", patient_id)))
}

pub fn credit_payments(conn: &Connection, patient_id: i64) -> Result<Vec<CreditPayment>> {
    let mut stmt = conn.prepare(
        "SELECT id, patient_id, amount, method, created_at FROM credit_payments
         WHERE patient_id = ?1 ORDER BY id ASC",
    )?;

    let payments = stmt
        .query_map([patient_id], |row| {
            let method: String = row.get(3)?;
            Ok(CreditPayment {
                id: row.get(0)?,
                patient_id: row.get(1)?,
                amount: decimal_column(row, 2)?,
                method: PaymentMethod::parse(&method).unwrap_or(PaymentMethod::Cash),
                created_at: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(payments)
}

/// Credit sales and repayments in chronological order.
pub fn credit_statement(conn: &Connection, patient_id: i64) -> Result<Vec<CreditStatementEntry>> {
    get_patient(conn, patient_id)?;

    let mut stmt = conn.prepare(
        "SELECT id, credit_amount, created_at FROM sales
         WHERE patient_id = ?1 AND status = 'completed'
         ORDER BY id ASC",
    )?;

    let mut entries: Vec<CreditStatementEntry> = stmt
        .query_map([patient_id], |row| {
            Ok((row.get::<_, i64>(0)?, decimal_column(row, 1)?, row.get::<_, String>(2)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .filter(|(_, amount, _)| *amount > Decimal::ZERO)
        .map(|(sale_id, amount, created_at)| CreditStatementEntry::Sale {
            sale_id,
            amount,
            created_at,
        })
        .collect();

    for payment in credit_payments(conn, patient_id)? {
        entries.push(CreditStatementEntry::Payment {
            payment_id: payment.id,
            amount: payment.amount,
            created_at: payment.created_at,
        });
    }

    entries.sort_by(|a, b| statement_time(a).cmp(statement_time(b)));

    Ok(entries)
}

fn statement_time(entry: &CreditStatementEntry) -> &str {
    match entry {
        CreditStatementEntry::Sale { created_at, .. } => created_at,
        CreditStatementEntry::Payment { created_at, .. } => created_at,
    }
}

pub fn total_outstanding_credit(conn: &Connection) -> Result<Decimal> {
    let mut stmt = conn.prepare("SELECT balance FROM patient_credit")?;
    let total = stmt
        .query_map([], |row| decimal_column(row, 0))?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .sum();
    Ok(total)
}
