use crate::cart::{BatchAllocation, CartItem, Discount, TaxSettings};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ===== Branches & users =====

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Branch {
    pub id: i64,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateBranch {
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateBranch {
    pub id: i64,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Pharmacist,
    Cashier,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Pharmacist => "pharmacist",
            Role::Cashier => "cashier",
        }
    }

    pub fn parse(raw: &str) -> Option<Role> {
        match raw {
            "admin" => Some(Role::Admin),
            "manager" => Some(Role::Manager),
            "pharmacist" => Some(Role::Pharmacist),
            "cashier" => Some(Role::Cashier),
            _ => None,
        }
    }

    /// Roles allowed to approve customer credit.
    pub fn can_approve_credit(&self) -> bool {
        matches!(self, Role::Admin | Role::Manager | Role::Pharmacist)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub full_name: String,
    pub role: Role,
    pub branch_id: Option<i64>,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateUser {
    pub username: String,
    pub password: String,
    pub full_name: String,
    pub role: Role,
    pub branch_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateUser {
    pub id: i64,
    pub full_name: String,
    pub role: Role,
    pub branch_id: Option<i64>,
}

/// The signed-in user as cached in local storage under `currentUser`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub id: i64,
    pub username: String,
    pub full_name: String,
    pub role: Role,
    pub branch_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: String,
    pub refresh_expires_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoginResponse {
    pub tokens: AuthTokens,
    pub user: CurrentUser,
}

// ===== Catalogue & inventory =====

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Medicine {
    pub id: i64,
    pub name: String,
    pub generic_name: Option<String>,
    pub category: Option<String>,
    pub unit: String,
    pub barcode: Option<String>,
    pub requires_prescription: bool,
    pub low_stock_threshold: i64,
    pub is_active: bool,
    pub available_quantity: i64,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateMedicine {
    pub name: String,
    pub generic_name: Option<String>,
    pub category: Option<String>,
    pub unit: Option<String>,
    pub barcode: Option<String>,
    pub requires_prescription: bool,
    pub low_stock_threshold: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateMedicine {
    pub id: i64,
    pub name: String,
    pub generic_name: Option<String>,
    pub category: Option<String>,
    pub unit: String,
    pub barcode: Option<String>,
    pub requires_prescription: bool,
    pub low_stock_threshold: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InventoryItem {
    pub id: i64,
    pub medicine_id: i64,
    pub medicine_name: Option<String>,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    pub quantity: i64,
    pub reserved_quantity: i64,
    pub cost_price: Decimal,
    pub selling_price: Decimal,
    pub supplier_id: Option<i64>,
    pub branch_id: Option<i64>,
    pub received_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub medicine_id: i64,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    pub quantity: i64,
    pub cost_price: Decimal,
    pub selling_price: Decimal,
    pub supplier_id: Option<i64>,
    pub branch_id: Option<i64>,
    pub reference: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LowStockItem {
    pub medicine_id: i64,
    pub name: String,
    pub available_quantity: i64,
    pub low_stock_threshold: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AllocationRequest {
    pub medicine_id: i64,
    pub quantity: i64,
    /// Restrict allocation to batches sold at this price.
    pub selling_price: Option<Decimal>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeallocationRequest {
    pub allocations: Vec<BatchAllocation>,
    pub quantity: i64,
}

// ===== Suppliers =====

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Supplier {
    pub id: i64,
    pub name: String,
    pub contact_person: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSupplier {
    pub name: String,
    pub contact_person: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateSupplier {
    pub id: i64,
    pub name: String,
    pub contact_person: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LedgerEntryType {
    Purchase,
    Payment,
    Return,
}

impl LedgerEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryType::Purchase => "purchase",
            LedgerEntryType::Payment => "payment",
            LedgerEntryType::Return => "return",
        }
    }

    pub fn parse(raw: &str) -> Option<LedgerEntryType> {
        match raw {
            "purchase" => Some(LedgerEntryType::Purchase),
            "payment" => Some(LedgerEntryType::Payment),
            "return" => Some(LedgerEntryType::Return),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerEntry {
    pub id: i64,
    pub supplier_id: i64,
    pub entry_type: LedgerEntryType,
    pub amount: Decimal,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateLedgerEntry {
    pub supplier_id: i64,
    pub entry_type: LedgerEntryType,
    pub amount: Decimal,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SupplierBalance {
    pub supplier_id: i64,
    pub name: String,
    pub purchases: Decimal,
    pub payments: Decimal,
    pub returns: Decimal,
    pub balance: Decimal,
}

// ===== Patients & credit =====

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Patient {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub date_of_birth: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatePatient {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub date_of_birth: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdatePatient {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub date_of_birth: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CreditRecord {
    pub patient_id: i64,
    pub credit_limit: Decimal,
    pub balance: Decimal,
    pub available: Decimal,
    pub approved_by: Option<i64>,
    pub approved_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CreditPayment {
    pub id: i64,
    pub patient_id: i64,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CreditStatementEntry {
    Sale {
        sale_id: i64,
        amount: Decimal,
        created_at: String,
    },
    Payment {
        payment_id: i64,
        amount: Decimal,
        created_at: String,
    },
}

// ===== Sales =====

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Mobile,
    Insurance,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Mobile => "mobile",
            PaymentMethod::Insurance => "insurance",
        }
    }

    pub fn parse(raw: &str) -> Option<PaymentMethod> {
        match raw {
            "cash" => Some(PaymentMethod::Cash),
            "card" => Some(PaymentMethod::Card),
            "mobile" => Some(PaymentMethod::Mobile),
            "insurance" => Some(PaymentMethod::Insurance),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SalePayment {
    pub method: PaymentMethod,
    pub amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Sale {
    pub id: i64,
    pub idempotency_key: String,
    pub patient_id: Option<i64>,
    pub patient_name: Option<String>,
    pub user_id: Option<i64>,
    pub branch_id: Option<i64>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub discount_amount: Decimal,
    pub total: Decimal,
    pub paid_amount: Decimal,
    pub credit_amount: Decimal,
    pub change_due: Decimal,
    pub status: String, // "completed" or "void"
    pub prescription_ref: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SaleItem {
    pub id: i64,
    pub sale_id: i64,
    pub medicine_id: i64,
    pub medicine_name: Option<String>,
    pub inventory_item_id: i64,
    pub batch_number: String,
    pub quantity: i64,
    pub unit_price: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SaleWithItems {
    pub sale: Sale,
    pub items: Vec<SaleItem>,
    pub payments: Vec<SalePayment>,
}

/// Checkout payload submitted by the billing session.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NewSale {
    pub idempotency_key: String,
    pub patient_id: Option<i64>,
    pub user_id: Option<i64>,
    pub branch_id: Option<i64>,
    pub items: Vec<CartItem>,
    pub discount: Discount,
    pub tax: TaxSettings,
    pub payments: Vec<SalePayment>,
    pub prescription_ref: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SalesFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub patient_id: Option<i64>,
    pub include_void: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaleUpdate {
    pub id: i64,
    pub patient_id: Option<i64>,
    pub prescription_ref: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DayClosing {
    pub id: i64,
    pub date: String,
    pub total_revenue: Decimal,
    pub total_sales: i64,
    pub closed_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PendingBillSummary {
    pub id: i64,
    pub label: String,
    pub patient_id: Option<i64>,
    pub line_count: usize,
    pub subtotal: Decimal,
    pub created_at: String,
}

// ===== Expenses =====

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Expense {
    pub id: i64,
    pub category: String,
    pub amount: Decimal,
    pub description: Option<String>,
    pub expense_date: NaiveDate,
    pub branch_id: Option<i64>,
    pub created_by: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateExpense {
    pub category: String,
    pub amount: Decimal,
    pub description: Option<String>,
    pub expense_date: NaiveDate,
    pub branch_id: Option<i64>,
    pub created_by: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateExpense {
    pub id: i64,
    pub category: String,
    pub amount: Decimal,
    pub description: Option<String>,
    pub expense_date: NaiveDate,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExpenseCategoryTotal {
    pub category: String,
    pub total: Decimal,
    pub count: i64,
}

// ===== Audit =====

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditEntry {
    pub user_id: Option<i64>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditRecord {
    pub id: i64,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub details: Option<serde_json::Value>,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AuditFilter {
    pub user_id: Option<i64>,
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ActionCount {
    pub action: String,
    pub count: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DispensingRecord {
    pub sale_id: i64,
    pub medicine_id: i64,
    pub medicine_name: String,
    pub batch_number: String,
    pub quantity: i64,
    pub patient_id: Option<i64>,
    pub prescription_ref: Option<String>,
    pub created_at: String,
}

// ===== Reports =====

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DashboardSummary {
    pub date: NaiveDate,
    pub revenue: Decimal,
    pub sale_count: i64,
    pub low_stock_count: i64,
    pub expiring_batch_count: i64,
    pub outstanding_credit: Decimal,
    pub supplier_payables: Decimal,
    pub expenses: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DailySales {
    pub date: String,
    pub sale_count: i64,
    pub gross: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub credit: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TopMedicine {
    pub medicine_id: i64,
    pub name: String,
    pub quantity: i64,
    pub revenue: Decimal,
}
