//! Cart lines, batch allocations and the derived bill totals.
//!
//! Quantities in the cart are never decided here: lines are built from
//! allocations handed back by the inventory allocator, and a line's quantity
//! is always the sum of its batch allocations.

use crate::error::{PosError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BatchAllocation {
    pub inventory_item_id: i64,
    pub batch_number: String,
    pub allocated_quantity: i64,
    pub selling_price: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CartItem {
    pub cart_key: String,
    pub medicine_id: i64,
    pub name: String,
    pub price: Decimal,
    pub quantity: i64,
    pub batch_info: Vec<BatchAllocation>,
}

impl CartItem {
    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }

    pub fn allocated_quantity(&self) -> i64 {
        self.batch_info.iter().map(|b| b.allocated_quantity).sum()
    }
}

/// `"{medicine_id}_{price}"` with the price fixed to two decimals, so that
/// 25.5 and 25.50 land on the same line.
pub fn cart_key(medicine_id: i64, price: Decimal) -> String {
    format!("{}_{:.2}", medicine_id, round_money(price))
}

pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Parses a payment amount typed into the console. Blank input means zero.
pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Decimal::ZERO);
    }

    let amount = trimmed
        .parse::<Decimal>()
        .map_err(|_| PosError::validation(format!("Invalid amount: {}", trimmed)))?;

    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(PosError::validation("Amount cannot be negative"));
    }

    Ok(amount)
}

/// Groups allocations by selling price, keeping first-seen order.
pub fn group_by_price(allocations: Vec<BatchAllocation>) -> Vec<(Decimal, Vec<BatchAllocation>)> {
    let mut groups: Vec<(Decimal, Vec<BatchAllocation>)> = Vec::new();

    for allocation in allocations {
        match groups
            .iter_mut()
            .find(|(price, _)| *price == allocation.selling_price)
        {
            Some((_, group)) => group.push(allocation),
            None => groups.push((allocation.selling_price, vec![allocation])),
        }
    }

    groups
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Cart {
    pub items: Vec<CartItem>,
}

impl Cart {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&CartItem> {
        self.items.iter().find(|item| item.cart_key == key)
    }

    /// Merges freshly allocated batches into the cart, one line per price
    /// point. Returns the keys of the lines touched.
    pub fn merge_allocations(
        &mut self,
        medicine_id: i64,
        name: &str,
        allocations: Vec<BatchAllocation>,
    ) -> Vec<String> {
        let mut touched = Vec::new();

        for (price, group) in group_by_price(allocations) {
            let key = cart_key(medicine_id, price);

            match self.items.iter_mut().find(|item| item.cart_key == key) {
                Some(line) => {
                    for allocation in group {
                        merge_batch(&mut line.batch_info, allocation);
                    }
                    line.quantity = line.allocated_quantity();
                }
                None => {
                    let mut batch_info = Vec::new();
                    for allocation in group {
                        merge_batch(&mut batch_info, allocation);
                    }
                    let quantity = batch_info.iter().map(|b| b.allocated_quantity).sum();
                    self.items.push(CartItem {
                        cart_key: key.clone(),
                        medicine_id,
                        name: name.to_string(),
                        price: round_money(price),
                        quantity,
                        batch_info,
                    });
                }
            }

            touched.push(key);
        }

        touched
    }

    /// Replaces a line's batches with what the allocator reports. A line
    /// left with nothing allocated is dropped.
    pub fn replace_allocations(&mut self, key: &str, allocations: Vec<BatchAllocation>) {
        let remaining: Vec<BatchAllocation> = allocations
            .into_iter()
            .filter(|a| a.allocated_quantity > 0)
            .collect();

        if remaining.is_empty() {
            self.remove(key);
            return;
        }

        if let Some(line) = self.items.iter_mut().find(|item| item.cart_key == key) {
            line.batch_info = remaining;
            line.quantity = line.allocated_quantity();
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<CartItem> {
        let index = self.items.iter().position(|item| item.cart_key == key)?;
        Some(self.items.remove(index))
    }

    pub fn clear(&mut self) -> Vec<CartItem> {
        std::mem::take(&mut self.items)
    }

    pub fn subtotal(&self) -> Decimal {
        round_money(self.items.iter().map(CartItem::line_total).sum())
    }

    pub fn all_allocations(&self) -> Vec<BatchAllocation> {
        self.items
            .iter()
            .flat_map(|item| item.batch_info.iter().cloned())
            .collect()
    }
}

fn merge_batch(batches: &mut Vec<BatchAllocation>, allocation: BatchAllocation) {
    match batches
        .iter_mut()
        .find(|b| b.inventory_item_id == allocation.inventory_item_id)
    {
        Some(existing) => existing.allocated_quantity += allocation.allocated_quantity,
        None => batches.push(allocation),
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Discount {
    #[default]
    None,
    Percent(Decimal),
    Amount(Decimal),
}

impl Discount {
    pub fn validate(&self) -> Result<()> {
        match self {
            Discount::None => Ok(()),
            Discount::Percent(p) if *p < Decimal::ZERO || *p > Decimal::ONE_HUNDRED => Err(
                PosError::validation("Discount percentage must be between 0 and 100"),
            ),
            Discount::Amount(a) if *a < Decimal::ZERO => {
                Err(PosError::validation("Discount amount cannot be negative"))
            }
            _ => Ok(()),
        }
    }

    fn amount_for(&self, subtotal: Decimal) -> Decimal {
        match self {
            Discount::None => Decimal::ZERO,
            Discount::Percent(p) => round_money(subtotal * *p / Decimal::ONE_HUNDRED),
            Discount::Amount(a) => round_money(*a),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct TaxSettings {
    pub rate_percent: Decimal,
    /// Tax is added to the bill only when this is set.
    pub inclusive: bool,
}

impl TaxSettings {
    pub fn applies(&self) -> bool {
        self.inclusive && self.rate_percent > Decimal::ZERO
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate_percent < Decimal::ZERO || self.rate_percent > Decimal::ONE_HUNDRED {
            return Err(PosError::validation("Tax rate must be between 0 and 100"));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total: Decimal,
    pub paid_amount: Decimal,
    pub credit_amount: Decimal,
    pub change_due: Decimal,
}

impl Totals {
    pub fn compute(
        items: &[CartItem],
        discount: &Discount,
        tax: &TaxSettings,
        paid: Decimal,
    ) -> Totals {
        let subtotal = round_money(items.iter().map(CartItem::line_total).sum());

        let tax_amount = if tax.applies() {
            round_money(subtotal * tax.rate_percent / Decimal::ONE_HUNDRED)
        } else {
            Decimal::ZERO
        };

        // Discount can never push the bill below zero.
        let discount_amount = discount
            .amount_for(subtotal)
            .max(Decimal::ZERO)
            .min(subtotal + tax_amount);

        let total = subtotal + tax_amount - discount_amount;
        let paid_amount = round_money(paid);

        Totals {
            subtotal,
            tax_amount,
            discount_amount,
            total,
            paid_amount,
            credit_amount: (total - paid_amount).max(Decimal::ZERO),
            change_due: (paid_amount - total).max(Decimal::ZERO),
        }
    }
}
