use crate::audit;
use crate::cart::{CartItem, Totals};
use crate::db::decimal_column;
use crate::error::{PosError, Result};
use crate::inventory;
use crate::models::{
    AuditEntry, DayClosing, NewSale, PaymentMethod, Sale, SaleItem, SalePayment, SaleUpdate,
    SaleWithItems, SalesFilter,
};
use crate::patients;
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::{info, warn};

const SALE_COLUMNS: &str = "s.id, s.idempotency_key, s.patient_id, p.name, s.user_id, s.branch_id,
    s.subtotal, s.tax_amount, s.discount_amount, s.total, s.paid_amount, s.credit_amount, s.change_due,
    s.status, s.prescription_ref, s.notes, s.created_at";

fn map_sale(row: &Row<'_>) -> rusqlite::Result<Sale> {
    Ok(Sale {
        id: row.get(0)?,
        idempotency_key: row.get(1)?,
        patient_id: row.get(2)?,
        patient_name: row.get(3)?,
        user_id: row.get(4)?,
        branch_id: row.get(5)?,
        subtotal: decimal_column(row, 6)?,
        tax_amount: decimal_column(row, 7)?,
        discount_amount: decimal_column(row, 8)?,
        total: decimal_column(row, 9)?,
        paid_amount: decimal_column(row, 10)?,
        credit_amount: decimal_column(row, 11)?,
        change_due: decimal_column(row, 12)?,
        status: row.get(13)?,
        prescription_ref: row.get(14)?,
        notes: row.get(15)?,
        created_at: row.get(16)?,
    })
}

/// A cart line re-priced from the batches it was allocated from.
struct PricedLine {
    item: CartItem,
    requires_prescription: bool,
}

fn price_lines(conn: &Connection, items: &[CartItem]) -> Result<Vec<PricedLine>> {
    let mut lines = Vec::with_capacity(items.len());

    for item in items {
        if item.quantity <= 0 {
            return Err(PosError::validation(format!(
                "Quantity for {} must be greater than zero",
                item.name
            )));
        }
        if item.allocated_quantity() != item.quantity {
            return Err(PosError::validation(format!(
                "{}: {} units in the bill but {} allocated",
                item.name,
                item.quantity,
                item.allocated_quantity()
            )));
        }

        let medicine = inventory::get_medicine(conn, item.medicine_id)?;
        let mut batch_info = Vec::with_capacity(item.batch_info.len());

        for allocation in &item.batch_info {
            let batch = inventory::get_batch(conn, allocation.inventory_item_id)?;
            if batch.medicine_id != item.medicine_id {
                return Err(PosError::validation(format!(
                    "Batch {} does not belong to {}",
                    batch.batch_number, medicine.name
                )));
            }

            let mut priced = allocation.clone();
            priced.selling_price = batch.selling_price;
            batch_info.push(priced);
        }

        // Lines are per price point; the batch price is authoritative.
        let price = batch_info
            .first()
            .map(|b| b.selling_price)
            .unwrap_or(item.price);

        lines.push(PricedLine {
            item: CartItem {
                cart_key: item.cart_key.clone(),
                medicine_id: item.medicine_id,
                name: medicine.name.clone(),
                price,
                quantity: item.quantity,
                batch_info,
            },
            requires_prescription: medicine.requires_prescription,
        });
    }

    Ok(lines)
}

pub fn find_by_idempotency_key(conn: &Connection, key: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM sales WHERE idempotency_key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Records a sale. Totals are recomputed here from batch prices; the
/// submitted amounts are only the payments. Submitting the same
/// idempotency key twice returns the first sale.
pub fn create_sale(conn: &Connection, sale: NewSale) -> Result<SaleWithItems> {
    if sale.idempotency_key.trim().is_empty() {
        return Err(PosError::validation("Idempotency key is required"));
    }

    if let Some(existing) = find_by_idempotency_key(conn, &sale.idempotency_key)? {
        info!(sale_id = existing, "Duplicate checkout submission, returning existing sale");
        return get_sale(conn, existing);
    }

    if sale.items.is_empty() {
        return Err(PosError::validation("Cannot check out an empty bill"));
    }

    sale.discount.validate()?;
    sale.tax.validate()?;

    if sale.payments.iter().any(|p| p.amount < Decimal::ZERO) {
        return Err(PosError::validation("Payment amounts cannot be negative"));
    }

    let lines = price_lines(conn, &sale.items)?;

    let prescription_ref = sale
        .prescription_ref
        .as_ref()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    if lines.iter().any(|l| l.requires_prescription) && prescription_ref.is_none() {
        return Err(PosError::validation(
            "A prescription reference is required for prescription-only medicines",
        ));
    }

    let items: Vec<CartItem> = lines.into_iter().map(|l| l.item).collect();
    let paid: Decimal = sale.payments.iter().map(|p| p.amount).sum();
    let totals = Totals::compute(&items, &sale.discount, &sale.tax, paid);

    if totals.credit_amount > Decimal::ZERO {
        let patient_id = sale.patient_id.ok_or_else(|| {
            PosError::validation("Select a patient before selling on credit")
        })?;

        let credit = patients::credit_record(conn, patient_id)?;
        match credit {
            Some(record) if record.available >= totals.credit_amount => {}
            _ => {
                return Err(PosError::CreditApprovalRequired {
                    patient_id,
                    credit_amount: totals.credit_amount,
                })
            }
        }
    }

    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "INSERT INTO sales (idempotency_key, patient_id, user_id, branch_id, subtotal, tax_amount, discount_amount,
                            total, paid_amount, credit_amount, change_due, status, prescription_ref, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'completed', ?12, ?13)",
        params![
            sale.idempotency_key,
            sale.patient_id,
            sale.user_id,
            sale.branch_id,
            totals.subtotal.to_string(),
            totals.tax_amount.to_string(),
            totals.discount_amount.to_string(),
            totals.total.to_string(),
            totals.paid_amount.to_string(),
            totals.credit_amount.to_string(),
            totals.change_due.to_string(),
            prescription_ref,
            sale.notes
        ],
    )?;
    let sale_id = tx.last_insert_rowid();

    for item in &items {
        for allocation in &item.batch_info {
            tx.execute(
                "INSERT INTO sale_items (sale_id, medicine_id, inventory_item_id, batch_number, quantity, unit_price)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    sale_id,
                    item.medicine_id,
                    allocation.inventory_item_id,
                    allocation.batch_number,
                    allocation.allocated_quantity,
                    allocation.selling_price.to_string()
                ],
            )?;
        }
        inventory::commit_allocations(&tx, &item.batch_info)?;
    }

    for payment in sale.payments.iter().filter(|p| !p.amount.is_zero()) {
        tx.execute(
            "INSERT INTO sale_payments (sale_id, method, amount) VALUES (?1, ?2, ?3)",
            params![sale_id, payment.method.as_str(), payment.amount.to_string()],
        )?;
    }

    if let (Some(patient_id), true) = (sale.patient_id, totals.credit_amount > Decimal::ZERO) {
        patients::add_to_balance(&tx, patient_id, totals.credit_amount)?;
    }

    audit::record(
        &tx,
        &AuditEntry {
            user_id: sale.user_id,
            action: "sale_created".to_string(),
            entity_type: "sale".to_string(),
            entity_id: Some(sale_id),
            details: Some(serde_json::json!({
                "total": totals.total.to_string(),
                "credit": totals.credit_amount.to_string(),
            })),
        },
    )?;

    tx.commit()?;

    info!(sale_id, total = %totals.total, credit = %totals.credit_amount, "Sale recorded");

    get_sale(conn, sale_id)
}

pub fn get_sale(conn: &Connection, id: i64) -> Result<SaleWithItems> {
    let sale = conn
        .query_row(
            &format!(
                "SELECT {} FROM sales s LEFT JOIN patients p ON s.patient_id = p.id WHERE s.id = ?1",
                SALE_COLUMNS
            ),
            [id],
            map_sale,
        )
        .optional()?
        .ok_or_else(|| PosError::not_found(format!("Sale {}", id)))?;

    let mut item_stmt = conn.prepare(
        "SELECT si.id, si.sale_id, si.medicine_id, m.name, si.inventory_item_id, si.batch_number, si.quantity, si.unit_price
         FROM sale_items si
         LEFT JOIN medicines m ON si.medicine_id = m.id
         WHERE si.sale_id = ?1
         ORDER BY si.id ASC",
    )?;

    let items = item_stmt
        .query_map([id], |row| {
            Ok(SaleItem {
                id: row.get(0)?,
                sale_id: row.get(1)?,
                medicine_id: row.get(2)?,
                medicine_name: row.get(3)?,
                inventory_item_id: row.get(4)?,
                batch_number: row.get(5)?,
                quantity: row.get(6)?,
                unit_price: decimal_column(row, 7)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut payment_stmt =
        conn.prepare("SELECT method, amount FROM sale_payments WHERE sale_id = ?1 ORDER BY id ASC")?;

    let payments = payment_stmt
        .query_map([id], |row| {
            let method: String = row.get(0)?;
            Ok(SalePayment {
                method: PaymentMethod::parse(&method).unwrap_or(PaymentMethod::Cash),
                amount: decimal_column(row, 1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(SaleWithItems {
        sale,
        items,
        payments,
    })
}

pub fn list_sales(conn: &Connection, filter: &SalesFilter) -> Result<Vec<Sale>> {
    let mut sql = format!(
        "SELECT {} FROM sales s LEFT JOIN patients p ON s.patient_id = p.id WHERE 1 = 1",
        SALE_COLUMNS
    );
    let mut values: Vec<Value> = Vec::new();

    if !filter.include_void {
        sql.push_str(" AND s.status = 'completed'");
    }
    if let Some(from) = filter.from {
        values.push(Value::Text(from.to_string()));
        sql.push_str(&format!(" AND date(s.created_at, 'localtime') >= ?{}", values.len()));
    }
    if let Some(to) = filter.to {
        values.push(Value::Text(to.to_string()));
        sql.push_str(&format!(" AND date(s.created_at, 'localtime') <= ?{}", values.len()));
    }
    if let Some(patient_id) = filter.patient_id {
        values.push(Value::Integer(patient_id));
        sql.push_str(&format!(" AND s.patient_id = ?{}", values.len()));
    }

    values.push(Value::Integer(filter.limit.unwrap_or(100)));
    sql.push_str(&format!(" ORDER BY s.id DESC LIMIT ?{}", values.len()));

    let mut stmt = conn.prepare(&sql)?;
    let sales = stmt
        .query_map(params_from_iter(values), map_sale)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(sales)
}

pub fn update_sale(
    conn: &Connection,
    update: SaleUpdate,
    user_id: Option<i64>,
) -> Result<SaleWithItems> {
    let existing = get_sale(conn, update.id)?.sale;

    if existing.status != "completed" {
        return Err(PosError::Conflict("Cannot edit a voided sale".to_string()));
    }
    if existing.credit_amount > Decimal::ZERO && existing.patient_id != update.patient_id {
        return Err(PosError::Conflict(
            "Cannot move a credit sale to another patient".to_string(),
        ));
    }
    if let Some(patient_id) = update.patient_id {
        patients::get_patient(conn, patient_id)?;
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE sales SET patient_id = ?1, prescription_ref = ?2, notes = ?3 WHERE id = ?4",
        params![update.patient_id, update.prescription_ref, update.notes, update.id],
    )?;
    audit::record(
        &tx,
        &AuditEntry {
            user_id,
            action: "sale_updated".to_string(),
            entity_type: "sale".to_string(),
            entity_id: Some(update.id),
            details: None,
        },
    )?;
    tx.commit()?;

    get_sale(conn, update.id)
}

/// Voids a sale: stock goes back to its batches and any credit is
/// reversed. The sale row is kept for the audit trail.
pub fn delete_sale(conn: &Connection, id: i64, user_id: Option<i64>) -> Result<()> {
    let SaleWithItems { sale, items, .. } = get_sale(conn, id)?;

    if sale.status == "void" {
        return Err(PosError::Conflict(format!("Sale {} is already void", id)));
    }

    let tx = conn.unchecked_transaction()?;

    for item in &items {
        inventory::restore_stock(&tx, item.inventory_item_id, item.quantity)?;
    }

    if let Some(patient_id) = sale.patient_id {
        if sale.credit_amount > Decimal::ZERO {
            patients::reduce_balance(&tx, patient_id, sale.credit_amount)?;
        }
    }

    tx.execute("UPDATE sales SET status = 'void' WHERE id = ?1", [id])?;

    audit::record(
        &tx,
        &AuditEntry {
            user_id,
            action: "sale_voided".to_string(),
            entity_type: "sale".to_string(),
            entity_id: Some(id),
            details: Some(serde_json::json!({ "total": sale.total.to_string() })),
        },
    )?;

    tx.commit()?;

    warn!(sale_id = id, "Sale voided");

    Ok(())
}

// ===== Day closing =====

pub fn close_day(conn: &Connection, date: NaiveDate) -> Result<DayClosing> {
    let date_str = date.format("%Y-%m-%d").to_string();

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM day_closings WHERE date = ?1",
            [&date_str],
            |row| row.get(0),
        )
        .optional()?;

    if existing.is_some() {
        return Err(PosError::Conflict("Day has already been closed".to_string()));
    }

    let sales = list_sales(
        conn,
        &SalesFilter {
            from: Some(date),
            to: Some(date),
            limit: Some(i64::MAX),
            ..Default::default()
        },
    )?;

    let total_revenue: Decimal = sales.iter().map(|s| s.total).sum();
    let total_sales = sales.len() as i64;

    conn.execute(
        "INSERT INTO day_closings (date, total_revenue, total_sales) VALUES (?1, ?2, ?3)",
        params![date_str, total_revenue.to_string(), total_sales],
    )?;

    let id = conn.last_insert_rowid();

    let closed_at: String = conn.query_row(
        "SELECT closed_at FROM day_closings WHERE id = ?1",
        [id],
        |row| row.get(0),
    )?;

    info!(date = %date_str, total_sales, "Day closed");

    Ok(DayClosing {
        id,
        date: date_str,
        total_revenue,
        total_sales,
        closed_at,
    })
}

pub fn sales_history(conn: &Connection, limit: Option<i64>) -> Result<Vec<DayClosing>> {
    let limit = limit.unwrap_or(30);

    let mut stmt = conn.prepare(
        "SELECT id, date, total_revenue, total_sales, closed_at
         FROM day_closings
         ORDER BY date DESC
         LIMIT ?1",
    )?;

    let closings = stmt
        .query_map([limit], |row| {
            Ok(DayClosing {
                id: row.get(0)?,
                date: row.get(1)?,
                total_revenue: decimal_column(row, 2)?,
                total_sales: row.get(3)?,
                closed_at: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(closings)
}
