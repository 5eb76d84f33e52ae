//! Point-of-sale billing session.
//!
//! A session owns the cart, the discount, the selected patient and the
//! idempotency key of the bill being rung up. Every quantity change goes
//! through the inventory allocator, so the cart only ever reflects stock
//! that is actually reserved for it.

use crate::cart::{parse_amount, Cart, Discount, TaxSettings, Totals};
use crate::error::{PosError, Result};
use crate::inventory;
use crate::models::{
    AllocationRequest, CurrentUser, DeallocationRequest, NewSale, PaymentMethod,
    PendingBillSummary, SalePayment, SaleWithItems,
};
use crate::patients;
use crate::sales;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SplitEntry {
    pub method: PaymentMethod,
    pub amount: String,
}

/// Payment as typed at the till: amounts are the raw input strings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PaymentInput {
    Single { method: PaymentMethod, amount: String },
    Split { entries: Vec<SplitEntry> },
}

impl PaymentInput {
    pub fn cash(amount: &str) -> Self {
        PaymentInput::Single {
            method: PaymentMethod::Cash,
            amount: amount.to_string(),
        }
    }

    pub fn resolve(&self) -> Result<Vec<SalePayment>> {
        match self {
            PaymentInput::Single { method, amount } => Ok(vec![SalePayment {
                method: *method,
                amount: parse_amount(amount)?,
            }]),
            PaymentInput::Split { entries } => {
                if entries.is_empty() {
                    return Err(PosError::validation("Add at least one payment to split"));
                }
                entries
                    .iter()
                    .map(|entry| {
                        Ok(SalePayment {
                            method: entry.method,
                            amount: parse_amount(&entry.amount)?,
                        })
                    })
                    .collect()
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CreditApprovalReason {
    NoCreditRecord,
    ExceedsLimit { available: Decimal },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum CheckoutDecision {
    Proceed,
    NeedsCreditApproval {
        patient_id: i64,
        credit_amount: Decimal,
        reason: CreditApprovalReason,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CheckoutPlan {
    pub totals: Totals,
    pub payments: Vec<SalePayment>,
    pub decision: CheckoutDecision,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CheckoutRequest {
    pub payment: PaymentInput,
    pub tax: TaxSettings,
    pub user_id: Option<i64>,
    pub branch_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckoutOutcome {
    Completed { sale: SaleWithItems },
    NeedsCreditApproval {
        patient_id: i64,
        credit_amount: Decimal,
        reason: CreditApprovalReason,
    },
}

/// What the billing screen renders.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BillingSnapshot {
    pub cart: Cart,
    pub discount: Discount,
    pub patient_id: Option<i64>,
    pub prescription_ref: Option<String>,
    pub notes: Option<String>,
    pub totals: Totals,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct PendingBill {
    cart: Cart,
    discount: Discount,
    patient_id: Option<i64>,
    prescription_ref: Option<String>,
    notes: Option<String>,
}

#[derive(Debug)]
pub struct BillingSession {
    cart: Cart,
    discount: Discount,
    patient_id: Option<i64>,
    prescription_ref: Option<String>,
    notes: Option<String>,
    idempotency_key: String,
}

impl Default for BillingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl BillingSession {
    pub fn new() -> Self {
        Self {
            cart: Cart::default(),
            discount: Discount::None,
            patient_id: None,
            prescription_ref: None,
            notes: None,
            idempotency_key: Uuid::new_v4().to_string(),
        }
    }

    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    pub fn patient_id(&self) -> Option<i64> {
        self.patient_id
    }

    /// Key sent with the next checkout. Stays the same across retries of
    /// one bill and changes once that bill is recorded or abandoned.
    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    pub fn set_discount(&mut self, discount: Discount) -> Result<()> {
        discount.validate()?;
        self.discount = discount;
        Ok(())
    }

    pub fn set_patient(&mut self, conn: &Connection, patient_id: Option<i64>) -> Result<()> {
        if let Some(id) = patient_id {
            patients::get_patient(conn, id)?;
        }
        self.patient_id = patient_id;
        Ok(())
    }

    pub fn set_prescription_ref(&mut self, prescription_ref: Option<String>) {
        self.prescription_ref = prescription_ref;
    }

    pub fn set_notes(&mut self, notes: Option<String>) {
        self.notes = notes;
    }

    pub fn totals(&self, tax: &TaxSettings, paid: Decimal) -> Totals {
        Totals::compute(&self.cart.items, &self.discount, tax, paid)
    }

    pub fn snapshot(&self, tax: &TaxSettings) -> BillingSnapshot {
        BillingSnapshot {
            cart: self.cart.clone(),
            discount: self.discount.clone(),
            patient_id: self.patient_id,
            prescription_ref: self.prescription_ref.clone(),
            notes: self.notes.clone(),
            totals: self.totals(tax, Decimal::ZERO),
        }
    }

    // ===== Cart =====

    /// Reserves `quantity` units and merges them into the cart, one line per
    /// selling price. Returns the cart keys touched.
    pub fn add_to_cart(
        &mut self,
        conn: &Connection,
        medicine_id: i64,
        quantity: i64,
    ) -> Result<Vec<String>> {
        if quantity <= 0 {
            return Err(PosError::validation("Quantity must be greater than zero"));
        }

        let medicine = inventory::get_medicine(conn, medicine_id)?;
        let allocations = inventory::allocate_stock(
            conn,
            &AllocationRequest {
                medicine_id,
                quantity,
                selling_price: None,
            },
        )?;

        let keys = self.cart.merge_allocations(medicine_id, &medicine.name, allocations);
        debug!(medicine_id, quantity, lines = ?keys, "Added to cart");

        Ok(keys)
    }

    pub fn update_quantity(
        &mut self,
        conn: &Connection,
        cart_key: &str,
        new_quantity: i64,
    ) -> Result<()> {
        if new_quantity < 0 {
            return Err(PosError::validation("Quantity cannot be negative"));
        }

        let line = self
            .cart
            .get(cart_key)
            .cloned()
            .ok_or_else(|| PosError::not_found(format!("Cart line {}", cart_key)))?;

        if new_quantity == 0 {
            return self.remove_item(conn, cart_key);
        }

        if new_quantity > line.quantity {
            let allocations = inventory::allocate_stock(
                conn,
                &AllocationRequest {
                    medicine_id: line.medicine_id,
                    quantity: new_quantity - line.quantity,
                    selling_price: Some(line.price),
                },
            )?;
            self.cart.merge_allocations(line.medicine_id, &line.name, allocations);
        } else if new_quantity < line.quantity {
            let remaining = inventory::deallocate_stock(
                conn,
                &DeallocationRequest {
                    allocations: line.batch_info.clone(),
                    quantity: line.quantity - new_quantity,
                },
            )?;
            self.cart.replace_allocations(cart_key, remaining);
        }

        Ok(())
    }

    pub fn remove_item(&mut self, conn: &Connection, cart_key: &str) -> Result<()> {
        let line = self
            .cart
            .get(cart_key)
            .ok_or_else(|| PosError::not_found(format!("Cart line {}", cart_key)))?;

        inventory::release_allocations(conn, &line.batch_info)?;
        self.cart.remove(cart_key);
        Ok(())
    }

    /// Abandons the bill: reservations are released and a fresh
    /// idempotency key is issued.
    pub fn clear_cart(&mut self, conn: &Connection) -> Result<()> {
        inventory::release_allocations(conn, &self.cart.all_allocations())?;
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    // ===== Checkout =====

    /// Works out what checkout would do with the current bill. Nothing is
    /// written; the decision is recomputed on every call.
    pub fn plan_checkout(
        &self,
        conn: &Connection,
        payment: &PaymentInput,
        tax: &TaxSettings,
    ) -> Result<CheckoutPlan> {
        if self.cart.is_empty() {
            return Err(PosError::validation("Cart is empty"));
        }

        let payments = payment.resolve()?;
        let paid: Decimal = payments.iter().map(|p| p.amount).sum();
        let totals = self.totals(tax, paid);

        let decision = if totals.credit_amount.is_zero() {
            CheckoutDecision::Proceed
        } else {
            let patient_id = self.patient_id.ok_or_else(|| {
                PosError::validation("Select a patient before selling on credit")
            })?;

            match patients::credit_record(conn, patient_id)? {
                None => CheckoutDecision::NeedsCreditApproval {
                    patient_id,
                    credit_amount: totals.credit_amount,
                    reason: CreditApprovalReason::NoCreditRecord,
                },
                Some(record) if record.available < totals.credit_amount => {
                    CheckoutDecision::NeedsCreditApproval {
                        patient_id,
                        credit_amount: totals.credit_amount,
                        reason: CreditApprovalReason::ExceedsLimit {
                            available: record.available,
                        },
                    }
                }
                Some(_) => CheckoutDecision::Proceed,
            }
        };

        Ok(CheckoutPlan {
            totals,
            payments,
            decision,
        })
    }

    /// Submits the bill. On success the session starts a new bill; on
    /// failure everything, including the idempotency key, is kept so the
    /// same bill can be retried without being recorded twice.
    pub fn checkout(
        &mut self,
        conn: &Connection,
        request: &CheckoutRequest,
    ) -> Result<CheckoutOutcome> {
        let plan = self.plan_checkout(conn, &request.payment, &request.tax)?;

        if let CheckoutDecision::NeedsCreditApproval {
            patient_id,
            credit_amount,
            reason,
        } = plan.decision
        {
            info!(patient_id, credit = %credit_amount, "Checkout waiting on credit approval");
            return Ok(CheckoutOutcome::NeedsCreditApproval {
                patient_id,
                credit_amount,
                reason,
            });
        }

        let sale = sales::create_sale(
            conn,
            NewSale {
                idempotency_key: self.idempotency_key.clone(),
                patient_id: self.patient_id,
                user_id: request.user_id,
                branch_id: request.branch_id,
                items: self.cart.items.clone(),
                discount: self.discount.clone(),
                tax: request.tax.clone(),
                payments: plan.payments,
                prescription_ref: self.prescription_ref.clone(),
                notes: self.notes.clone(),
            },
        )?;

        // Reservations were consumed by the sale; nothing to release.
        self.reset();

        Ok(CheckoutOutcome::Completed { sale })
    }

    /// Opens or raises the patient's credit limit and then checks out.
    pub fn approve_credit_and_checkout(
        &mut self,
        conn: &Connection,
        request: &CheckoutRequest,
        credit_limit: Decimal,
        approver: &CurrentUser,
    ) -> Result<CheckoutOutcome> {
        if !approver.role.can_approve_credit() {
            return Err(PosError::Unauthorized(format!(
                "{} cannot approve credit",
                approver.username
            )));
        }

        let plan = self.plan_checkout(conn, &request.payment, &request.tax)?;
        let patient_id = match plan.decision {
            CheckoutDecision::Proceed => return self.checkout(conn, request),
            CheckoutDecision::NeedsCreditApproval { patient_id, .. } => patient_id,
        };

        let balance = patients::credit_record(conn, patient_id)?
            .map(|record| record.balance)
            .unwrap_or(Decimal::ZERO);
        let required = balance + plan.totals.credit_amount;
        if credit_limit < required {
            return Err(PosError::validation(format!(
                "Credit limit must be at least {} to cover this bill",
                required
            )));
        }

        patients::approve_credit(conn, patient_id, credit_limit, Some(approver.id))?;
        self.checkout(conn, request)
    }

    // ===== Pending bills =====

    /// Parks the current bill. Its stock stays reserved until the bill is
    /// resumed and sold, or discarded.
    pub fn save_pending(
        &mut self,
        conn: &Connection,
        label: &str,
        created_by: Option<i64>,
    ) -> Result<i64> {
        if self.cart.is_empty() {
            return Err(PosError::validation("Cannot hold an empty bill"));
        }

        let label = if label.trim().is_empty() {
            format!("Bill of {} item(s)", self.cart.items.len())
        } else {
            label.trim().to_string()
        };

        let pending = PendingBill {
            cart: self.cart.clone(),
            discount: self.discount.clone(),
            patient_id: self.patient_id,
            prescription_ref: self.prescription_ref.clone(),
            notes: self.notes.clone(),
        };

        conn.execute(
            "INSERT INTO pending_bills (label, patient_id, cart_json, created_by) VALUES (?1, ?2, ?3, ?4)",
            params![label, self.patient_id, serde_json::to_string(&pending)?, created_by],
        )?;
        let id = conn.last_insert_rowid();

        self.reset();
        info!(pending_bill_id = id, "Bill put on hold");

        Ok(id)
    }

    pub fn resume_pending(&mut self, conn: &Connection, id: i64) -> Result<()> {
        if !self.cart.is_empty() {
            return Err(PosError::Conflict(
                "Finish or hold the current bill before resuming another".to_string(),
            ));
        }

        let pending = load_pending(conn, id)?;
        conn.execute("DELETE FROM pending_bills WHERE id = ?1", [id])?;

        *self = Self {
            cart: pending.cart,
            discount: pending.discount,
            patient_id: pending.patient_id,
            prescription_ref: pending.prescription_ref,
            notes: pending.notes,
            idempotency_key: Uuid::new_v4().to_string(),
        };

        Ok(())
    }
}

fn load_pending(conn: &Connection, id: i64) -> Result<PendingBill> {
    let raw: String = conn
        .query_row(
            "SELECT cart_json FROM pending_bills WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| PosError::not_found(format!("Pending bill {}", id)))?;

    Ok(serde_json::from_str(&raw)?)
}

pub fn list_pending(conn: &Connection) -> Result<Vec<PendingBillSummary>> {
    let mut stmt = conn.prepare(
        "SELECT id, label, patient_id, cart_json, created_at FROM pending_bills ORDER BY id ASC",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(id, label, patient_id, raw, created_at)| {
            let pending: PendingBill = serde_json::from_str(&raw)?;
            Ok(PendingBillSummary {
                id,
                label,
                patient_id,
                line_count: pending.cart.items.len(),
                subtotal: pending.cart.subtotal(),
                created_at,
            })
        })
        .collect()
}

pub fn discard_pending(conn: &Connection, id: i64) -> Result<()> {
    let pending = load_pending(conn, id)?;
    inventory::release_allocations(conn, &pending.cart.all_allocations())?;
    conn.execute("DELETE FROM pending_bills WHERE id = ?1", [id])?;
    info!(pending_bill_id = id, "Held bill discarded");
    Ok(())
}

/// Rebuilds batch reservations from held bills. In-memory carts do not
/// survive a restart, so anything else reserved is stale.
pub fn reconcile_reservations(conn: &Connection) -> Result<()> {
    let mut held = Vec::new();
    for summary in list_pending(conn)? {
        held.extend(load_pending(conn, summary.id)?.cart.all_allocations());
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute("UPDATE inventory_items SET reserved_quantity = 0", [])?;
    for allocation in &held {
        tx.execute(
            "UPDATE inventory_items
             SET reserved_quantity = MIN(quantity, reserved_quantity + ?1)
             WHERE id = ?2",
            params![allocation.allocated_quantity, allocation.inventory_item_id],
        )?;
    }
    tx.commit()?;

    info!(held_allocations = held.len(), "Stock reservations reconciled");
    Ok(())
}

/// Billing session of the console window.
#[derive(Default)]
pub struct BillingState {
    pub session: Mutex<BillingSession>,
}
