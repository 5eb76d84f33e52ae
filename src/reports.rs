//! Read-only figures for the dashboard and the reports screen.

use crate::config::AppConfig;
use crate::db::decimal_column;
use crate::error::{PosError, Result};
use crate::models::{DailySales, DashboardSummary, SalesFilter, TopMedicine};
use crate::{expenses, inventory, patients, sales, suppliers};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

fn check_range(from: NaiveDate, to: NaiveDate) -> Result<()> {
    if from > to {
        return Err(PosError::validation("Report start date is after its end date"));
    }
    Ok(())
}

pub fn dashboard(
    conn: &Connection,
    today: NaiveDate,
    config: &AppConfig,
) -> Result<DashboardSummary> {
    let todays_sales = sales::list_sales(
        conn,
        &SalesFilter {
            from: Some(today),
            to: Some(today),
            limit: Some(i64::MAX),
            ..Default::default()
        },
    )?;

    let supplier_payables: Decimal = suppliers::payables(conn)?.iter().map(|s| s.balance).sum();

    Ok(DashboardSummary {
        date: today,
        revenue: todays_sales.iter().map(|s| s.total).sum(),
        sale_count: todays_sales.len() as i64,
        low_stock_count: inventory::low_stock(conn)?.len() as i64,
        expiring_batch_count: inventory::expiring_batches(conn, config.expiry_warning_days)?.len()
            as i64,
        outstanding_credit: patients::total_outstanding_credit(conn)?,
        supplier_payables,
        expenses: expenses::total_expenses(conn, today, today)?,
    })
}

/// One row per day that had completed sales, oldest first.
pub fn sales_report(conn: &Connection, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailySales>> {
    check_range(from, to)?;

    let mut stmt = conn.prepare(
        "SELECT date(created_at, 'localtime'), total, tax_amount, discount_amount, credit_amount
         FROM sales
         WHERE status = 'completed'
           AND date(created_at, 'localtime') >= ?1
           AND date(created_at, 'localtime') <= ?2",
    )?;

    let rows = stmt
        .query_map(params![from.to_string(), to.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                decimal_column(row, 1)?,
                decimal_column(row, 2)?,
                decimal_column(row, 3)?,
                decimal_column(row, 4)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut days: BTreeMap<String, DailySales> = BTreeMap::new();
    for (date, total, tax, discount, credit) in rows {
        let day = days.entry(date.clone()).or_insert_with(|| DailySales {
            date,
            sale_count: 0,
            gross: Decimal::ZERO,
            tax: Decimal::ZERO,
            discount: Decimal::ZERO,
            credit: Decimal::ZERO,
        });
        day.sale_count += 1;
        day.gross += total;
        day.tax += tax;
        day.discount += discount;
        day.credit += credit;
    }

    Ok(days.into_values().collect())
}

/// Best sellers by quantity over completed sales.
pub fn top_medicines(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
    limit: usize,
) -> Result<Vec<TopMedicine>> {
    check_range(from, to)?;

    let mut stmt = conn.prepare(
        "SELECT si.medicine_id, m.name, si.quantity, si.unit_price
         FROM sale_items si
         JOIN sales s ON si.sale_id = s.id
         JOIN medicines m ON si.medicine_id = m.id
         WHERE s.status = 'completed'
           AND date(s.created_at, 'localtime') >= ?1
           AND date(s.created_at, 'localtime') <= ?2",
    )?;

    let rows = stmt
        .query_map(params![from.to_string(), to.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                decimal_column(row, 3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut by_medicine: HashMap<i64, TopMedicine> = HashMap::new();
    for (medicine_id, name, quantity, unit_price) in rows {
        let entry = by_medicine.entry(medicine_id).or_insert_with(|| TopMedicine {
            medicine_id,
            name,
            quantity: 0,
            revenue: Decimal::ZERO,
        });
        entry.quantity += quantity;
        entry.revenue += unit_price * Decimal::from(quantity);
    }

    let mut top: Vec<TopMedicine> = by_medicine.into_values().collect();
    top.sort_by(|a, b| {
        b.quantity
            .cmp(&a.quantity)
            .then_with(|| b.revenue.cmp(&a.revenue))
            .then_with(|| a.name.cmp(&b.name))
    });
    top.truncate(limit);

    Ok(top)
}
