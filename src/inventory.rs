use crate::audit;
use crate::cart::{round_money, BatchAllocation};
use crate::db::decimal_column;
use crate::error::{PosError, Result};
use crate::models::{
    AllocationRequest, AuditEntry, CreateLedgerEntry, CreateMedicine, DeallocationRequest,
    InventoryItem, LedgerEntryType, LowStockItem, Medicine, ReceiveStock, UpdateMedicine,
};
use crate::suppliers;
use chrono::{Duration, Local, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::{debug, info};

const MEDICINE_COLUMNS: &str = "m.id, m.name, m.generic_name, m.category, m.unit, m.barcode,
    m.requires_prescription, m.low_stock_threshold, m.is_active, m.created_at,
    COALESCE((SELECT SUM(i.quantity - i.reserved_quantity) FROM inventory_items i
              WHERE i.medicine_id = m.id AND i.expiry_date >= ?1), 0)";

const BATCH_COLUMNS: &str = "i.id, i.medicine_id, m.name, i.batch_number, i.expiry_date, i.quantity,
    i.reserved_quantity, i.cost_price, i.selling_price, i.supplier_id, i.branch_id, i.received_at";

pub const MAX_EXPIRY_WINDOW_DAYS: i64 = 3650;

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn today_str() -> String {
    today().format("%Y-%m-%d").to_string()
}

fn map_medicine(row: &Row<'_>) -> rusqlite::Result<Medicine> {
    Ok(Medicine {
        id: row.get(0)?,
        name: row.get(1)?,
        generic_name: row.get(2)?,
        category: row.get(3)?,
        unit: row.get(4)?,
        barcode: row.get(5)?,
        requires_prescription: row.get(6)?,
        low_stock_threshold: row.get(7)?,
        is_active: row.get(8)?,
        created_at: row.get(9)?,
        available_quantity: row.get(10)?,
    })
}

fn map_batch(row: &Row<'_>) -> rusqlite::Result<InventoryItem> {
    Ok(InventoryItem {
        id: row.get(0)?,
        medicine_id: row.get(1)?,
        medicine_name: row.get(2)?,
        batch_number: row.get(3)?,
        expiry_date: row.get(4)?,
        quantity: row.get(5)?,
        reserved_quantity: row.get(6)?,
        cost_price: decimal_column(row, 7)?,
        selling_price: decimal_column(row, 8)?,
        supplier_id: row.get(9)?,
        branch_id: row.get(10)?,
        received_at: row.get(11)?,
    })
}

// ===== Medicines =====

pub fn create_medicine(
    conn: &Connection,
    medicine: CreateMedicine,
    default_threshold: i64,
) -> Result<Medicine> {
    if medicine.name.trim().is_empty() {
        return Err(PosError::validation("Medicine name is required"));
    }

    let threshold = medicine.low_stock_threshold.unwrap_or(default_threshold);
    let unit = medicine.unit.unwrap_or_else(|| "unit".to_string());

    conn.execute(
        "INSERT INTO medicines (name, generic_name, category, unit, barcode, requires_prescription, low_stock_threshold)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            medicine.name.trim(),
            medicine.generic_name,
            medicine.category,
            unit,
            medicine.barcode,
            medicine.requires_prescription,
            threshold
        ],
    )?;

    get_medicine(conn, conn.last_insert_rowid())
}

pub fn update_medicine(conn: &Connection, medicine: UpdateMedicine) -> Result<Medicine> {
    conn.execute(
        "UPDATE medicines SET name = ?1, generic_name = ?2, category = ?3, unit = ?4, barcode = ?5,
             requires_prescription = ?6, low_stock_threshold = ?7
         WHERE id = ?8",
        params![
            medicine.name,
            medicine.generic_name,
            medicine.category,
            medicine.unit,
            medicine.barcode,
            medicine.requires_prescription,
            medicine.low_stock_threshold,
            medicine.id
        ],
    )?;

    if conn.changes() == 0 {
        return Err(PosError::not_found(format!("Medicine {}", medicine.id)));
    }

    get_medicine(conn, medicine.id)
}

pub fn get_medicine(conn: &Connection, id: i64) -> Result<Medicine> {
    conn.query_row(
        &format!("SELECT {} FROM medicines m WHERE m.id = ?2", MEDICINE_COLUMNS),
        params![today_str(), id],
        map_medicine,
    )
    .optional()?
    .ok_or_else(|| PosError::not_found(format!("Medicine {}", id)))
}

/// Active medicines, optionally filtered by name, generic name or barcode.
pub fn list_medicines(conn: &Connection, search: Option<&str>) -> Result<Vec<Medicine>> {
    let pattern = format!("%{}%", search.unwrap_or("").trim());

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM medicines m
         WHERE m.is_active = 1
           AND (m.name LIKE ?2 OR COALESCE(m.generic_name, '') LIKE ?2 OR COALESCE(m.barcode, '') LIKE ?2)
         ORDER BY m.name",
        MEDICINE_COLUMNS
    ))?;

    let medicines = stmt
        .query_map(params![today_str(), pattern], map_medicine)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(medicines)
}

pub fn deactivate_medicine(conn: &Connection, id: i64, user_id: Option<i64>) -> Result<()> {
    conn.execute("UPDATE medicines SET is_active = 0 WHERE id = ?1", [id])?;
    if conn.changes() == 0 {
        return Err(PosError::not_found(format!("Medicine {}", id)));
    }

    audit::record(
        conn,
        &AuditEntry {
            user_id,
            action: "medicine_deactivated".to_string(),
            entity_type: "medicine".to_string(),
            entity_id: Some(id),
            details: None,
        },
    )?;

    Ok(())
}

// ===== Batches =====

pub fn receive_stock(
    conn: &Connection,
    stock: ReceiveStock,
    user_id: Option<i64>,
) -> Result<InventoryItem> {
    if stock.quantity <= 0 {
        return Err(PosError::validation("Received quantity must be positive"));
    }
    if stock.cost_price < Decimal::ZERO || stock.selling_price < Decimal::ZERO {
        return Err(PosError::validation("Prices cannot be negative"));
    }
    // Cart lines are keyed and matched on two-decimal prices.
    if round_money(stock.cost_price) != stock.cost_price
        || round_money(stock.selling_price) != stock.selling_price
    {
        return Err(PosError::validation(
            "Prices cannot have more than two decimal places",
        ));
    }
    if stock.batch_number.trim().is_empty() {
        return Err(PosError::validation("Batch number is required"));
    }

    let medicine = get_medicine(conn, stock.medicine_id)?;

    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "INSERT INTO inventory_items (medicine_id, batch_number, expiry_date, quantity, cost_price, selling_price, supplier_id, branch_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            stock.medicine_id,
            stock.batch_number.trim(),
            stock.expiry_date,
            stock.quantity,
            stock.cost_price.to_string(),
            stock.selling_price.to_string(),
            stock.supplier_id,
            stock.branch_id
        ],
    )?;
    let batch_id = tx.last_insert_rowid();

    if let Some(supplier_id) = stock.supplier_id {
        suppliers::insert_ledger_entry(
            &tx,
            &CreateLedgerEntry {
                supplier_id,
                entry_type: LedgerEntryType::Purchase,
                amount: stock.cost_price * Decimal::from(stock.quantity),
                reference: stock.reference.clone(),
                notes: Some(format!("Batch {} of {}", stock.batch_number.trim(), medicine.name)),
            },
        )?;
    }

    audit::record(
        &tx,
        &AuditEntry {
            user_id,
            action: "stock_received".to_string(),
            entity_type: "inventory_item".to_string(),
            entity_id: Some(batch_id),
            details: Some(serde_json::json!({
                "medicine_id": stock.medicine_id,
                "quantity": stock.quantity,
            })),
        },
    )?;

    tx.commit()?;

    info!(medicine_id = stock.medicine_id, batch_id, quantity = stock.quantity, "Stock received");

    get_batch(conn, batch_id)
}

pub fn get_batch(conn: &Connection, id: i64) -> Result<InventoryItem> {
    conn.query_row(
        &format!(
            "SELECT {} FROM inventory_items i LEFT JOIN medicines m ON i.medicine_id = m.id WHERE i.id = ?1",
            BATCH_COLUMNS
        ),
        [id],
        map_batch,
    )
    .optional()?
    .ok_or_else(|| PosError::not_found(format!("Inventory item {}", id)))
}

pub fn list_batches(conn: &Connection, medicine_id: i64) -> Result<Vec<InventoryItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM inventory_items i
         LEFT JOIN medicines m ON i.medicine_id = m.id
         WHERE i.medicine_id = ?1
         ORDER BY i.expiry_date ASC, i.id ASC",
        BATCH_COLUMNS
    ))?;

    let batches = stmt
        .query_map([medicine_id], map_batch)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(batches)
}

/// Stock count correction. The new quantity cannot drop below what is
/// currently reserved by open carts.
pub fn adjust_batch_quantity(
    conn: &Connection,
    batch_id: i64,
    new_quantity: i64,
    reason: &str,
    user_id: Option<i64>,
) -> Result<InventoryItem> {
    let batch = get_batch(conn, batch_id)?;

    if new_quantity < batch.reserved_quantity {
        return Err(PosError::validation(format!(
            "Cannot set quantity below the {} units reserved in open bills",
            batch.reserved_quantity
        )));
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE inventory_items SET quantity = ?1 WHERE id = ?2",
        params![new_quantity, batch_id],
    )?;
    audit::record(
        &tx,
        &AuditEntry {
            user_id,
            action: "stock_adjusted".to_string(),
            entity_type: "inventory_item".to_string(),
            entity_id: Some(batch_id),
            details: Some(serde_json::json!({
                "from": batch.quantity,
                "to": new_quantity,
                "reason": reason,
            })),
        },
    )?;
    tx.commit()?;

    get_batch(conn, batch_id)
}

pub fn available_quantity(conn: &Connection, medicine_id: i64) -> Result<i64> {
    let available: i64 = conn.query_row(
        "SELECT COALESCE(SUM(quantity - reserved_quantity), 0) FROM inventory_items
         WHERE medicine_id = ?1 AND expiry_date >= ?2",
        params![medicine_id, today_str()],
        |row| row.get(0),
    )?;
    Ok(available)
}

pub fn low_stock(conn: &Connection) -> Result<Vec<LowStockItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, low_stock_threshold, available FROM (
             SELECT m.id, m.name, m.low_stock_threshold,
                    COALESCE((SELECT SUM(i.quantity - i.reserved_quantity) FROM inventory_items i
                              WHERE i.medicine_id = m.id AND i.expiry_date >= ?1), 0) AS available
             FROM medicines m
             WHERE m.is_active = 1
         )
         WHERE available <= low_stock_threshold
         ORDER BY available ASC, name ASC",
    )?;

    let items = stmt
        .query_map([today_str()], |row| {
            Ok(LowStockItem {
                medicine_id: row.get(0)?,
                name: row.get(1)?,
                low_stock_threshold: row.get(2)?,
                available_quantity: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(items)
}

/// Unexpired batches with stock that expire within `within_days`.
pub fn expiring_batches(conn: &Connection, within_days: i64) -> Result<Vec<InventoryItem>> {
    if !(0..=MAX_EXPIRY_WINDOW_DAYS).contains(&within_days) {
        return Err(PosError::validation(format!(
            "Expiry window must be between 0 and {} days",
            MAX_EXPIRY_WINDOW_DAYS
        )));
    }

    let today = today();
    let horizon = today
        .checked_add_signed(Duration::days(within_days))
        .ok_or_else(|| PosError::validation("Expiry window is out of range"))?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM inventory_items i
         LEFT JOIN medicines m ON i.medicine_id = m.id
         WHERE i.quantity > 0 AND i.expiry_date >= ?1 AND i.expiry_date <= ?2
         ORDER BY i.expiry_date ASC",
        BATCH_COLUMNS
    ))?;

    let batches = stmt
        .query_map(params![today, horizon], map_batch)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(batches)
}

// ===== Allocation =====

/// Reserves stock for a cart, earliest expiry first. Either the whole
/// quantity is reserved or nothing is.
pub fn allocate_stock(
    conn: &Connection,
    request: &AllocationRequest,
) -> Result<Vec<BatchAllocation>> {
    if request.quantity <= 0 {
        return Err(PosError::validation("Quantity must be greater than zero"));
    }

    let medicine = get_medicine(conn, request.medicine_id)?;
    if !medicine.is_active {
        return Err(PosError::validation(format!("{} is no longer sold", medicine.name)));
    }

    let tx = conn.unchecked_transaction()?;

    let candidates: Vec<(i64, String, i64, Decimal)> = {
        let mut stmt = tx.prepare(
            "SELECT id, batch_number, quantity - reserved_quantity, selling_price
             FROM inventory_items
             WHERE medicine_id = ?1 AND expiry_date >= ?2 AND quantity - reserved_quantity > 0
             ORDER BY expiry_date ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![request.medicine_id, today_str()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, decimal_column(row, 3)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    let candidates: Vec<_> = candidates
        .into_iter()
        .filter(|(_, _, _, price)| request.selling_price.map_or(true, |p| p == *price))
        .collect();

    let available: i64 = candidates.iter().map(|(_, _, qty, _)| qty).sum();
    if available < request.quantity {
        return Err(PosError::InsufficientStock {
            name: medicine.name,
            requested: request.quantity,
            available,
        });
    }

    let mut remaining = request.quantity;
    let mut allocations = Vec::new();

    for (batch_id, batch_number, batch_available, price) in candidates {
        if remaining == 0 {
            break;
        }

        let take = remaining.min(batch_available);
        tx.execute(
            "UPDATE inventory_items SET reserved_quantity = reserved_quantity + ?1
             WHERE id = ?2 AND quantity - reserved_quantity >= ?1",
            params![take, batch_id],
        )?;
        if tx.changes() == 0 {
            return Err(PosError::Conflict(format!(
                "Batch {} changed during allocation",
                batch_number
            )));
        }

        allocations.push(BatchAllocation {
            inventory_item_id: batch_id,
            batch_number,
            allocated_quantity: take,
            selling_price: price,
        });
        remaining -= take;
    }

    tx.commit()?;

    debug!(
        medicine_id = request.medicine_id,
        quantity = request.quantity,
        batches = allocations.len(),
        "Stock allocated"
    );

    Ok(allocations)
}

/// Releases `quantity` units from a line's allocations, latest expiry
/// first, and returns what is still allocated.
pub fn deallocate_stock(
    conn: &Connection,
    request: &DeallocationRequest,
) -> Result<Vec<BatchAllocation>> {
    if request.quantity <= 0 {
        return Err(PosError::validation("Quantity to release must be greater than zero"));
    }

    let allocated: i64 = request.allocations.iter().map(|a| a.allocated_quantity).sum();
    if request.quantity > allocated {
        return Err(PosError::validation(format!(
            "Cannot release {} units, only {} allocated",
            request.quantity, allocated
        )));
    }

    let tx = conn.unchecked_transaction()?;

    let mut order: Vec<(usize, NaiveDate)> = Vec::with_capacity(request.allocations.len());
    for (idx, allocation) in request.allocations.iter().enumerate() {
        let expiry: NaiveDate = tx
            .query_row(
                "SELECT expiry_date FROM inventory_items WHERE id = ?1",
                [allocation.inventory_item_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| {
                PosError::not_found(format!("Inventory item {}", allocation.inventory_item_id))
            })?;
        order.push((idx, expiry));
    }
    order.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));

    let mut remaining_allocations = request.allocations.clone();
    let mut to_release = request.quantity;

    for (idx, _) in order {
        if to_release == 0 {
            break;
        }

        let allocation = &mut remaining_allocations[idx];
        let release = to_release.min(allocation.allocated_quantity);
        if release == 0 {
            continue;
        }

        release_reservation(&tx, allocation.inventory_item_id, release)?;
        allocation.allocated_quantity -= release;
        to_release -= release;
    }

    tx.commit()?;

    Ok(remaining_allocations
        .into_iter()
        .filter(|a| a.allocated_quantity > 0)
        .collect())
}

/// Releases every reservation held by the given allocations.
pub fn release_allocations(conn: &Connection, allocations: &[BatchAllocation]) -> Result<()> {
    if allocations.is_empty() {
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    for allocation in allocations {
        release_reservation(&tx, allocation.inventory_item_id, allocation.allocated_quantity)?;
    }
    tx.commit()?;

    Ok(())
}

fn release_reservation(conn: &Connection, inventory_item_id: i64, quantity: i64) -> Result<()> {
    conn.execute(
        "UPDATE inventory_items SET reserved_quantity = reserved_quantity - ?1
         WHERE id = ?2 AND reserved_quantity >= ?1",
        params![quantity, inventory_item_id],
    )?;
    if conn.changes() == 0 {
        return Err(PosError::Conflict(format!(
            "Inventory item {} does not hold {} reserved units",
            inventory_item_id, quantity
        )));
    }
    Ok(())
}

/// Converts reservations into a stock deduction. Runs inside the caller's
/// transaction.
pub(crate) fn commit_allocations(conn: &Connection, allocations: &[BatchAllocation]) -> Result<()> {
    for allocation in allocations {
        conn.execute(
            "UPDATE inventory_items
             SET quantity = quantity - ?1, reserved_quantity = reserved_quantity - ?1
             WHERE id = ?2 AND reserved_quantity >= ?1",
            params![allocation.allocated_quantity, allocation.inventory_item_id],
        )?;
        if conn.changes() == 0 {
            return Err(PosError::Conflict(format!(
                "Reservation for batch {} is no longer held",
                allocation.batch_number
            )));
        }
    }
    Ok(())
}

/// Puts sold units back on their batch. Runs inside the caller's
/// transaction.
pub(crate) fn restore_stock(
    conn: &Connection,
    inventory_item_id: i64,
    quantity: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE inventory_items SET quantity = quantity + ?1 WHERE id = ?2",
        params![quantity, inventory_item_id],
    )?;
    Ok(())
}
