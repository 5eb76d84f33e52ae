use crate::db::decimal_column;
use crate::error::{PosError, Result};
use crate::models::{
    CreateLedgerEntry, CreateSupplier, LedgerEntry, LedgerEntryType, Supplier, SupplierBalance,
    UpdateSupplier,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::info;

const SUPPLIER_COLUMNS: &str =
    "id, name, contact_person, phone, email, address, is_active, created_at";

fn map_supplier(row: &Row<'_>) -> rusqlite::Result<Supplier> {
    Ok(Supplier {
        id: row.get(0)?,
        name: row.get(1)?,
        contact_person: row.get(2)?,
        phone: row.get(3)?,
        email: row.get(4)?,
        address: row.get(5)?,
        is_active: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn map_entry(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let raw_type: String = row.get(2)?;
    let entry_type = LedgerEntryType::parse(&raw_type).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown ledger entry type {}", raw_type).into(),
        )
    })?;

    Ok(LedgerEntry {
        id: row.get(0)?,
        supplier_id: row.get(1)?,
        entry_type,
        amount: decimal_column(row, 3)?,
        reference: row.get(4)?,
        notes: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub fn create_supplier(conn: &Connection, supplier: CreateSupplier) -> Result<Supplier> {
    if supplier.name.trim().is_empty() {
        return Err(PosError::validation("Supplier name is required"));
    }

    conn.execute(
        "INSERT INTO suppliers (name, contact_person, phone, email, address) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            supplier.name.trim(),
            supplier.contact_person,
            supplier.phone,
            supplier.email,
            supplier.address
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            PosError::Conflict(format!("Supplier {} already exists", supplier.name.trim()))
        }
        other => PosError::Database(other),
    })?;

    get_supplier(conn, conn.last_insert_rowid())
}

pub fn update_supplier(conn: &Connection, supplier: UpdateSupplier) -> Result<Supplier> {
    conn.execute(
        "UPDATE suppliers SET name = ?1, contact_person = ?2, phone = ?3, email = ?4, address = ?5 WHERE id = ?6",
        params![
            supplier.name,
            supplier.contact_person,
            supplier.phone,
            supplier.email,
            supplier.address,
            supplier.id
        ],
    )?;

    if conn.changes() == 0 {
        return Err(PosError::not_found(format!("Supplier {}", supplier.id)));
    }

    get_supplier(conn, supplier.id)
}

pub fn get_supplier(conn: &Connection, id: i64) -> Result<Supplier> {
    conn.query_row(
        &format!("SELECT {} FROM suppliers WHERE id = ?1", SUPPLIER_COLUMNS),
        [id],
        map_supplier,
    )
    .optional()?
    .ok_or_else(|| PosError::not_found(format!("Supplier {}", id)))
}

pub fn list_suppliers(conn: &Connection) -> Result<Vec<Supplier>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM suppliers WHERE is_active = 1 ORDER BY name",
        SUPPLIER_COLUMNS
    ))?;

    let suppliers = stmt
        .query_map([], map_supplier)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(suppliers)
}

/// Suppliers with an outstanding balance cannot be deactivated.
pub fn deactivate_supplier(conn: &Connection, id: i64) -> Result<()> {
    let balance = supplier_balance(conn, id)?;
    if balance.balance > Decimal::ZERO {
        return Err(PosError::Conflict(format!(
            "Cannot deactivate {} with an outstanding balance of {}",
            balance.name, balance.balance
        )));
    }

    conn.execute("UPDATE suppliers SET is_active = 0 WHERE id = ?1", [id])?;
    Ok(())
}

pub fn add_ledger_entry(conn: &Connection, entry: CreateLedgerEntry) -> Result<LedgerEntry> {
    get_supplier(conn, entry.supplier_id)?;

    if entry.entry_type != LedgerEntryType::Purchase {
        let balance = supplier_balance(conn, entry.supplier_id)?;
        if entry.amount > balance.balance {
            return Err(PosError::validation(format!(
                "{} of {} exceeds the outstanding balance of {}",
                entry.entry_type.as_str(),
                entry.amount,
                balance.balance
            )));
        }
    }

    let id = insert_ledger_entry(conn, &entry)?;
    info!(
        supplier_id = entry.supplier_id,
        entry_type = entry.entry_type.as_str(),
        amount = %entry.amount,
        "Supplier ledger entry recorded"
    );

    conn.query_row(
        "SELECT id, supplier_id, entry_type, amount, reference, notes, created_at FROM supplier_ledger WHERE id = ?1",
        [id],
        map_entry,
    )
    .map_err(PosError::from)
}

pub(crate) fn insert_ledger_entry(conn: &Connection, entry: &CreateLedgerEntry) -> Result<i64> {
    if entry.amount <= Decimal::ZERO {
        return Err(PosError::validation("Ledger amount must be positive"));
    }

    conn.execute(
        "INSERT INTO supplier_ledger (supplier_id, entry_type, amount, reference, notes) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            entry.supplier_id,
            entry.entry_type.as_str(),
            entry.amount.to_string(),
            entry.reference,
            entry.notes
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

pub fn ledger(conn: &Connection, supplier_id: i64) -> Result<Vec<LedgerEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, supplier_id, entry_type, amount, reference, notes, created_at
         FROM supplier_ledger
         WHERE supplier_id = ?1
         ORDER BY id ASC",
    )?;

    let entries = stmt
        .query_map([supplier_id], map_entry)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(entries)
}

pub fn supplier_balance(conn: &Connection, supplier_id: i64) -> Result<SupplierBalance> {
    let supplier = get_supplier(conn, supplier_id)?;
    let entries = ledger(conn, supplier_id)?;
    Ok(summarise(supplier.id, supplier.name, &entries))
}

/// Active suppliers the pharmacy still owes money to.
pub fn payables(conn: &Connection) -> Result<Vec<SupplierBalance>> {
    let mut balances = Vec::new();
    for supplier in list_suppliers(conn)? {
        let entries = ledger(conn, supplier.id)?;
        let balance = summarise(supplier.id, supplier.name, &entries);
        if balance.balance > Decimal::ZERO {
            balances.push(balance);
        }
    }
    balances.sort_by(|a, b| b.balance.cmp(&a.balance));
    Ok(balances)
}

fn summarise(supplier_id: i64, name: String, entries: &[LedgerEntry]) -> SupplierBalance {
    let mut purchases = Decimal::ZERO;
    let mut payments = Decimal::ZERO;
    let mut returns = Decimal::ZERO;

    for entry in entries {
        match entry.entry_type {
            LedgerEntryType::Purchase => purchases += entry.amount,
            LedgerEntryType::Payment => payments += entry.amount,
            LedgerEntryType::Return => returns += entry.amount,
        }
    }

    SupplierBalance {
        supplier_id,
        name,
        purchases,
        payments,
        returns,
        balance: purchases - payments - returns,
    }
}
