//! Integration tests for the store and the billing engine.
//! These tests use an in-memory SQLite database to test business logic

#[cfg(test)]
mod tests {
    use crate::admin;
    use crate::audit;
    use crate::auth::{self, LocalStorage, ACCESS_TOKEN_KEY, LEGACY_TOKEN_KEY, REFRESH_TOKEN_KEY};
    use crate::billing::{
        self, BillingSession, CheckoutDecision, CheckoutOutcome, CheckoutRequest,
        CreditApprovalReason, PaymentInput, SplitEntry,
    };
    use crate::cart::{cart_key, parse_amount, round_money, CartItem, Discount, TaxSettings, Totals};
    use crate::config::{self, AppConfig};
    use crate::db::{initialize_schema, Database};
    use crate::error::PosError;
    use crate::error_boundary::{guard_command, ErrorBoundary, Rendered};
    use crate::expenses;
    use crate::inventory;
    use crate::models::*;
    use crate::notifications::{NotificationCenter, NotificationKind, MAX_NOTIFICATIONS};
    use crate::patients;
    use crate::reports;
    use crate::sales;
    use crate::suppliers;
    use crate::token_refresh::{self, TickResult, TokenRefresher};
    use chrono::{Duration, NaiveDate};
    use rusqlite::Connection;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Create a test database with schema
    fn setup_test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
        initialize_schema(&conn).expect("Failed to create schema");
        conn
    }

    fn dec(raw: &str) -> Decimal {
        raw.parse().unwrap()
    }

    fn today() -> NaiveDate {
        inventory::today()
    }

    fn add_medicine(conn: &Connection, name: &str, requires_prescription: bool) -> i64 {
        inventory::create_medicine(
            conn,
            CreateMedicine {
                name: name.to_string(),
                generic_name: None,
                category: None,
                unit: None,
                barcode: None,
                requires_prescription,
                low_stock_threshold: Some(5),
            },
            10,
        )
        .unwrap()
        .id
    }

    fn add_batch(
        conn: &Connection,
        medicine_id: i64,
        batch_number: &str,
        expires_in_days: i64,
        quantity: i64,
        price: &str,
    ) -> i64 {
        inventory::receive_stock(
            conn,
            ReceiveStock {
                medicine_id,
                batch_number: batch_number.to_string(),
                expiry_date: today() + Duration::days(expires_in_days),
                quantity,
                cost_price: dec("1.00"),
                selling_price: dec(price),
                supplier_id: None,
                branch_id: None,
                reference: None,
            },
            None,
        )
        .unwrap()
        .id
    }

    /// (quantity, reserved_quantity)
    fn batch_state(conn: &Connection, batch_id: i64) -> (i64, i64) {
        let batch = inventory::get_batch(conn, batch_id).unwrap();
        (batch.quantity, batch.reserved_quantity)
    }

    fn add_patient(conn: &Connection, name: &str) -> i64 {
        patients::create_patient(
            conn,
            CreatePatient {
                name: name.to_string(),
                phone: Some("0700000000".to_string()),
                email: None,
                address: None,
                date_of_birth: None,
            },
        )
        .unwrap()
        .id
    }

    fn seed_user(conn: &Connection, username: &str, role: Role) -> User {
        admin::create_user(
            conn,
            CreateUser {
                username: username.to_string(),
                password: "correct-horse".to_string(),
                full_name: format!("{} user", username),
                role,
                branch_id: None,
            },
        )
        .unwrap()
    }

    /// One medicine with ten units at 25.50 in a single batch.
    fn seed_stocked_medicine(conn: &Connection) -> (i64, i64) {
        let medicine_id = add_medicine(conn, "Amoxicillin 500mg", false);
        let batch_id = add_batch(conn, medicine_id, "AMX-01", 180, 10, "25.50");
        (medicine_id, batch_id)
    }

    fn request(payment: PaymentInput) -> CheckoutRequest {
        CheckoutRequest {
            payment,
            tax: TaxSettings::default(),
            user_id: None,
            branch_id: None,
        }
    }

    fn completed(outcome: CheckoutOutcome) -> SaleWithItems {
        match outcome {
            CheckoutOutcome::Completed { sale } => sale,
            other => panic!("expected a completed sale, got {:?}", other),
        }
    }

    fn line(medicine_id: i64, price: &str, quantity: i64) -> CartItem {
        CartItem {
            cart_key: cart_key(medicine_id, dec(price)),
            medicine_id,
            name: "Paracetamol".to_string(),
            price: dec(price),
            quantity,
            batch_info: vec![],
        }
    }

    // ===== SCHEMA TESTS =====

    #[test]
    fn test_initialize_schema_is_repeatable() {
        let conn = setup_test_db();
        initialize_schema(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'inventory_items'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_migration_adds_missing_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE sales (id INTEGER PRIMARY KEY AUTOINCREMENT, idempotency_key TEXT);
            CREATE TABLE medicines (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL);
            ",
        )
        .unwrap();

        initialize_schema(&conn).unwrap();

        let has_column = |table: &str, column: &str| -> bool {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table)).unwrap();
            let names: Vec<String> = stmt
                .query_map([], |row| row.get(1))
                .unwrap()
                .map(|r| r.unwrap())
                .collect();
            names.iter().any(|n| n == column)
        };

        assert!(has_column("sales", "prescription_ref"));
        assert!(has_column("medicines", "barcode"));
    }

    #[test]
    fn test_database_file_created_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("pharmacy.db");

        let db = Database::open(&path).unwrap();
        db.initialize().unwrap();
        add_medicine(&db.conn().unwrap(), "Paracetamol", false);
        drop(db);

        assert!(path.exists());
        let reopened = Database::open(&path).unwrap();
        reopened.initialize().unwrap();
        let medicines = inventory::list_medicines(&reopened.conn().unwrap(), None).unwrap();
        assert_eq!(medicines.len(), 1);
    }

    #[test]
    fn test_reserved_quantity_cannot_exceed_quantity() {
        let conn = setup_test_db();
        let (_, batch_id) = seed_stocked_medicine(&conn);

        let result = conn.execute(
            "UPDATE inventory_items SET reserved_quantity = 11 WHERE id = ?1",
            [batch_id],
        );
        assert!(result.is_err());
    }

    // ===== CART & TOTALS TESTS =====

    #[test]
    fn test_cart_key_normalizes_price() {
        assert_eq!(cart_key(7, dec("25.5")), "7_25.50");
        assert_eq!(cart_key(7, dec("25.50")), cart_key(7, dec("25.500")));
        assert_ne!(cart_key(7, dec("25.50")), cart_key(7, dec("25.51")));
    }

    #[test]
    fn test_round_money_rounds_half_away_from_zero() {
        assert_eq!(round_money(dec("1.005")), dec("1.01"));
        assert_eq!(round_money(dec("1.004")), dec("1.00"));
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("").unwrap(), Decimal::ZERO);
        assert_eq!(parse_amount("   ").unwrap(), Decimal::ZERO);
        assert_eq!(parse_amount(" 50 ").unwrap(), dec("50"));
        assert!(matches!(parse_amount("abc"), Err(PosError::Validation(_))));
        assert!(matches!(parse_amount("-5"), Err(PosError::Validation(_))));
    }

    #[test]
    fn test_totals_partial_payment_becomes_credit() {
        let items = vec![line(1, "25.50", 4)];

        let totals = Totals::compute(&items, &Discount::None, &TaxSettings::default(), dec("50"));

        assert_eq!(totals.subtotal, dec("102.00"));
        assert_eq!(totals.tax_amount, Decimal::ZERO);
        assert_eq!(totals.total, dec("102.00"));
        assert_eq!(totals.credit_amount, dec("52.00"));
        assert_eq!(totals.change_due, Decimal::ZERO);
    }

    #[test]
    fn test_totals_overpayment_gives_change() {
        let items = vec![line(1, "25.50", 4)];

        let totals = Totals::compute(&items, &Discount::None, &TaxSettings::default(), dec("120"));

        assert_eq!(totals.credit_amount, Decimal::ZERO);
        assert_eq!(totals.change_due, dec("18.00"));
    }

    #[test]
    fn test_tax_only_added_when_inclusive_flag_set() {
        let items = vec![line(1, "25.50", 4)];
        let off = TaxSettings {
            rate_percent: dec("10"),
            inclusive: false,
        };
        let on = TaxSettings {
            rate_percent: dec("10"),
            inclusive: true,
        };

        let without = Totals::compute(&items, &Discount::None, &off, Decimal::ZERO);
        let with = Totals::compute(&items, &Discount::None, &on, Decimal::ZERO);

        assert_eq!(without.tax_amount, Decimal::ZERO);
        assert_eq!(with.tax_amount, dec("10.20"));
        assert_eq!(with.total, dec("112.20"));
    }

    #[test]
    fn test_percent_discount() {
        let items = vec![line(1, "25.50", 4)];

        let totals = Totals::compute(
            &items,
            &Discount::Percent(dec("10")),
            &TaxSettings::default(),
            Decimal::ZERO,
        );

        assert_eq!(totals.discount_amount, dec("10.20"));
        assert_eq!(totals.total, dec("91.80"));
    }

    #[test]
    fn test_discount_clamped_to_bill() {
        let items = vec![line(1, "25.50", 4)];

        let totals = Totals::compute(
            &items,
            &Discount::Amount(dec("500")),
            &TaxSettings::default(),
            Decimal::ZERO,
        );

        assert_eq!(totals.discount_amount, dec("102.00"));
        assert_eq!(totals.total, Decimal::ZERO);
        assert_eq!(totals.credit_amount, Decimal::ZERO);
    }

    #[test]
    fn test_discount_validation() {
        assert!(Discount::Percent(dec("150")).validate().is_err());
        assert!(Discount::Amount(dec("-1")).validate().is_err());
        assert!(Discount::Percent(dec("100")).validate().is_ok());
    }

    // ===== INVENTORY TESTS =====

    #[test]
    fn test_allocate_earliest_expiry_first() {
        let conn = setup_test_db();
        let medicine_id = add_medicine(&conn, "Paracetamol", false);
        let late = add_batch(&conn, medicine_id, "LATE", 60, 10, "10.00");
        let early = add_batch(&conn, medicine_id, "EARLY", 30, 5, "10.00");

        let allocations = inventory::allocate_stock(
            &conn,
            &AllocationRequest {
                medicine_id,
                quantity: 8,
                selling_price: None,
            },
        )
        .unwrap();

        assert_eq!(allocations.len(), 2);
        assert_eq!(allocations[0].inventory_item_id, early);
        assert_eq!(allocations[0].allocated_quantity, 5);
        assert_eq!(allocations[1].inventory_item_id, late);
        assert_eq!(allocations[1].allocated_quantity, 3);

        assert_eq!(batch_state(&conn, early), (5, 5));
        assert_eq!(batch_state(&conn, late), (10, 3));
        assert_eq!(inventory::available_quantity(&conn, medicine_id).unwrap(), 7);
    }

    #[test]
    fn test_allocation_is_all_or_nothing_and_skips_expired() {
        let conn = setup_test_db();
        let medicine_id = add_medicine(&conn, "Paracetamol", false);
        let expired = add_batch(&conn, medicine_id, "OLD", -1, 10, "10.00");
        let fresh = add_batch(&conn, medicine_id, "NEW", 30, 2, "10.00");

        let err = inventory::allocate_stock(
            &conn,
            &AllocationRequest {
                medicine_id,
                quantity: 3,
                selling_price: None,
            },
        )
        .unwrap_err();

        match err {
            PosError::InsufficientStock {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, 3);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected error {:?}", other),
        }

        assert_eq!(batch_state(&conn, expired), (10, 0));
        assert_eq!(batch_state(&conn, fresh), (2, 0));
    }

    #[test]
    fn test_allocate_restricted_to_price() {
        let conn = setup_test_db();
        let medicine_id = add_medicine(&conn, "Ibuprofen", false);
        add_batch(&conn, medicine_id, "CHEAP", 30, 5, "8.00");
        let dear = add_batch(&conn, medicine_id, "DEAR", 60, 5, "9.00");

        let allocations = inventory::allocate_stock(
            &conn,
            &AllocationRequest {
                medicine_id,
                quantity: 2,
                selling_price: Some(dec("9.00")),
            },
        )
        .unwrap();

        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].inventory_item_id, dear);
        assert_eq!(allocations[0].selling_price, dec("9.00"));
    }

    #[test]
    fn test_allocate_rejects_zero_quantity() {
        let conn = setup_test_db();
        let (medicine_id, _) = seed_stocked_medicine(&conn);

        let result = inventory::allocate_stock(
            &conn,
            &AllocationRequest {
                medicine_id,
                quantity: 0,
                selling_price: None,
            },
        );
        assert!(matches!(result, Err(PosError::Validation(_))));
    }

    #[test]
    fn test_deallocate_releases_latest_expiry_first() {
        let conn = setup_test_db();
        let medicine_id = add_medicine(&conn, "Paracetamol", false);
        let early = add_batch(&conn, medicine_id, "EARLY", 30, 5, "10.00");
        let late = add_batch(&conn, medicine_id, "LATE", 60, 10, "10.00");

        let allocations = inventory::allocate_stock(
            &conn,
            &AllocationRequest {
                medicine_id,
                quantity: 8,
                selling_price: None,
            },
        )
        .unwrap();

        let remaining = inventory::deallocate_stock(
            &conn,
            &DeallocationRequest {
                allocations,
                quantity: 4,
            },
        )
        .unwrap();

        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].inventory_item_id, early);
        assert_eq!(remaining[0].allocated_quantity, 4);
        assert_eq!(batch_state(&conn, early), (5, 4));
        assert_eq!(batch_state(&conn, late), (10, 0));
    }

    #[test]
    fn test_deallocate_more_than_allocated_rejected() {
        let conn = setup_test_db();
        let (medicine_id, batch_id) = seed_stocked_medicine(&conn);

        let allocations = inventory::allocate_stock(
            &conn,
            &AllocationRequest {
                medicine_id,
                quantity: 2,
                selling_price: None,
            },
        )
        .unwrap();

        let result = inventory::deallocate_stock(
            &conn,
            &DeallocationRequest {
                allocations,
                quantity: 3,
            },
        );

        assert!(matches!(result, Err(PosError::Validation(_))));
        assert_eq!(batch_state(&conn, batch_id), (10, 2));
    }

    #[test]
    fn test_release_allocations() {
        let conn = setup_test_db();
        let (medicine_id, batch_id) = seed_stocked_medicine(&conn);

        let allocations = inventory::allocate_stock(
            &conn,
            &AllocationRequest {
                medicine_id,
                quantity: 6,
                selling_price: None,
            },
        )
        .unwrap();
        inventory::release_allocations(&conn, &allocations).unwrap();

        assert_eq!(batch_state(&conn, batch_id), (10, 0));
    }

    #[test]
    fn test_adjust_batch_cannot_drop_below_reserved() {
        let conn = setup_test_db();
        let (medicine_id, batch_id) = seed_stocked_medicine(&conn);

        inventory::allocate_stock(
            &conn,
            &AllocationRequest {
                medicine_id,
                quantity: 4,
                selling_price: None,
            },
        )
        .unwrap();

        let result = inventory::adjust_batch_quantity(&conn, batch_id, 3, "count", None);
        assert!(matches!(result, Err(PosError::Validation(_))));

        let adjusted = inventory::adjust_batch_quantity(&conn, batch_id, 8, "count", None).unwrap();
        assert_eq!(adjusted.quantity, 8);
        assert_eq!(adjusted.reserved_quantity, 4);
    }

    #[test]
    fn test_low_stock_and_expiring_batches() {
        let conn = setup_test_db();
        let stocked = add_medicine(&conn, "Cetirizine", false);
        add_batch(&conn, stocked, "CT-1", 200, 50, "3.00");
        let short = add_medicine(&conn, "Insulin", true);
        add_batch(&conn, short, "IN-1", 20, 2, "40.00");

        let low = inventory::low_stock(&conn).unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].medicine_id, short);
        assert_eq!(low[0].available_quantity, 2);

        let expiring = inventory::expiring_batches(&conn, 30).unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].batch_number, "IN-1");
    }

    #[test]
    fn test_deactivated_medicine_cannot_be_allocated() {
        let conn = setup_test_db();
        let (medicine_id, _) = seed_stocked_medicine(&conn);
        inventory::deactivate_medicine(&conn, medicine_id, None).unwrap();

        let result = inventory::allocate_stock(
            &conn,
            &AllocationRequest {
                medicine_id,
                quantity: 1,
                selling_price: None,
            },
        );
        assert!(matches!(result, Err(PosError::Validation(_))));
        assert!(inventory::list_medicines(&conn, None).unwrap().is_empty());
    }

    #[test]
    fn test_list_medicines_search_matches_barcode() {
        let conn = setup_test_db();
        inventory::create_medicine(
            &conn,
            CreateMedicine {
                name: "Omeprazole".to_string(),
                generic_name: None,
                category: None,
                unit: Some("capsule".to_string()),
                barcode: Some("5012345678900".to_string()),
                requires_prescription: false,
                low_stock_threshold: None,
            },
            10,
        )
        .unwrap();
        add_medicine(&conn, "Aspirin", false);

        let found = inventory::list_medicines(&conn, Some("50123")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Omeprazole");
        assert_eq!(found[0].low_stock_threshold, 10);
    }

    #[test]
    fn test_receive_stock_rejects_sub_cent_prices() {
        let conn = setup_test_db();
        let medicine_id = add_medicine(&conn, "Amoxicillin", true);
        let stock = |cost: &str, selling: &str| ReceiveStock {
            medicine_id,
            batch_number: "AM-1".to_string(),
            expiry_date: today() + Duration::days(90),
            quantity: 10,
            cost_price: dec(cost),
            selling_price: dec(selling),
            supplier_id: None,
            branch_id: None,
            reference: None,
        };

        let result = inventory::receive_stock(&conn, stock("1.00", "10.005"), None);
        assert!(matches!(result, Err(PosError::Validation(_))));
        let result = inventory::receive_stock(&conn, stock("1.005", "10.00"), None);
        assert!(matches!(result, Err(PosError::Validation(_))));
        assert!(inventory::list_batches(&conn, medicine_id).unwrap().is_empty());

        // Trailing zeros are still two-decimal prices
        let batch = inventory::receive_stock(&conn, stock("1.000", "10.500"), None).unwrap();
        assert_eq!(batch.selling_price, dec("10.50"));
    }

    #[test]
    fn test_expiring_batches_rejects_out_of_range_window() {
        let conn = setup_test_db();
        let (medicine_id, _) = seed_stocked_medicine(&conn);
        add_batch(&conn, medicine_id, "LONG", 3000, 5, "4.00");

        for days in [-1, inventory::MAX_EXPIRY_WINDOW_DAYS + 1, 200_000_000, i64::MAX] {
            let result = inventory::expiring_batches(&conn, days);
            assert!(matches!(result, Err(PosError::Validation(_))), "window {}", days);
        }

        let all = inventory::expiring_batches(&conn, inventory::MAX_EXPIRY_WINDOW_DAYS).unwrap();
        assert!(all.iter().any(|batch| batch.batch_number == "LONG"));
    }

    // ===== BILLING SESSION TESTS =====

    #[test]
    fn test_add_to_cart_splits_lines_by_price() {
        let conn = setup_test_db();
        let medicine_id = add_medicine(&conn, "Paracetamol", false);
        add_batch(&conn, medicine_id, "A", 30, 2, "10.00");
        add_batch(&conn, medicine_id, "B", 60, 5, "12.00");

        let mut session = BillingSession::new();
        let keys = session.add_to_cart(&conn, medicine_id, 4).unwrap();

        assert_eq!(
            keys,
            vec![format!("{}_10.00", medicine_id), format!("{}_12.00", medicine_id)]
        );

        let cart = session.cart();
        assert_eq!(cart.items.len(), 2);
        for item in &cart.items {
            assert_eq!(item.quantity, item.allocated_quantity());
            assert_eq!(item.quantity, 2);
        }
        assert_eq!(cart.subtotal(), dec("44.00"));
    }

    #[test]
    fn test_adding_same_medicine_merges_into_line() {
        let conn = setup_test_db();
        let (medicine_id, batch_id) = seed_stocked_medicine(&conn);

        let mut session = BillingSession::new();
        session.add_to_cart(&conn, medicine_id, 1).unwrap();
        session.add_to_cart(&conn, medicine_id, 2).unwrap();

        let cart = session.cart();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 3);
        assert_eq!(cart.items[0].batch_info.len(), 1);
        assert_eq!(batch_state(&conn, batch_id), (10, 3));
    }

    #[test]
    fn test_update_quantity_goes_through_allocator() {
        let conn = setup_test_db();
        let medicine_id = add_medicine(&conn, "Paracetamol", false);
        let a = add_batch(&conn, medicine_id, "A", 30, 2, "10.00");
        let b = add_batch(&conn, medicine_id, "B", 60, 5, "12.00");

        let mut session = BillingSession::new();
        session.add_to_cart(&conn, medicine_id, 4).unwrap();
        let dear_key = format!("{}_12.00", medicine_id);
        let cheap_key = format!("{}_10.00", medicine_id);

        session.update_quantity(&conn, &dear_key, 4).unwrap();
        assert_eq!(session.cart().get(&dear_key).unwrap().quantity, 4);
        assert_eq!(batch_state(&conn, b), (5, 4));

        session.update_quantity(&conn, &dear_key, 1).unwrap();
        let dear = session.cart().get(&dear_key).unwrap();
        assert_eq!(dear.quantity, 1);
        assert_eq!(dear.quantity, dear.allocated_quantity());
        assert_eq!(batch_state(&conn, b), (5, 1));

        // No more stock at 10.00
        let result = session.update_quantity(&conn, &cheap_key, 3);
        assert!(matches!(result, Err(PosError::InsufficientStock { .. })));
        assert_eq!(session.cart().get(&cheap_key).unwrap().quantity, 2);
        assert_eq!(batch_state(&conn, a), (2, 2));
    }

    #[test]
    fn test_update_quantity_on_line_priced_with_trailing_zeros() {
        let conn = setup_test_db();
        let medicine_id = add_medicine(&conn, "Ibuprofen", false);
        let batch_id = add_batch(&conn, medicine_id, "IB-1", 60, 10, "10.500");

        let mut session = BillingSession::new();
        let keys = session.add_to_cart(&conn, medicine_id, 1).unwrap();
        assert_eq!(keys, vec![format!("{}_10.50", medicine_id)]);

        session.update_quantity(&conn, &keys[0], 3).unwrap();
        let item = session.cart().get(&keys[0]).unwrap();
        assert_eq!(item.quantity, 3);
        assert_eq!(item.quantity, item.allocated_quantity());
        assert_eq!(item.line_total(), dec("31.50"));
        assert_eq!(batch_state(&conn, batch_id), (10, 3));
    }

    #[test]
    fn test_update_quantity_to_zero_removes_line() {
        let conn = setup_test_db();
        let (medicine_id, batch_id) = seed_stocked_medicine(&conn);

        let mut session = BillingSession::new();
        let keys = session.add_to_cart(&conn, medicine_id, 3).unwrap();
        session.update_quantity(&conn, &keys[0], 0).unwrap();

        assert!(session.cart().is_empty());
        assert_eq!(batch_state(&conn, batch_id), (10, 0));
    }

    #[test]
    fn test_update_unknown_line_not_found() {
        let conn = setup_test_db();
        let mut session = BillingSession::new();

        let result = session.update_quantity(&conn, "99_1.00", 2);
        assert!(matches!(result, Err(PosError::NotFound(_))));
    }

    #[test]
    fn test_clear_cart_releases_and_rotates_key() {
        let conn = setup_test_db();
        let (medicine_id, batch_id) = seed_stocked_medicine(&conn);

        let mut session = BillingSession::new();
        let key_before = session.idempotency_key().to_string();
        session.add_to_cart(&conn, medicine_id, 5).unwrap();

        session.clear_cart(&conn).unwrap();

        assert!(session.cart().is_empty());
        assert_ne!(session.idempotency_key(), key_before);
        assert_eq!(batch_state(&conn, batch_id), (10, 0));
    }

    #[test]
    fn test_checkout_cash_sale() {
        let conn = setup_test_db();
        let (medicine_id, batch_id) = seed_stocked_medicine(&conn);

        let mut session = BillingSession::new();
        let key = session.idempotency_key().to_string();
        session.add_to_cart(&conn, medicine_id, 4).unwrap();

        let sale = completed(session.checkout(&conn, &request(PaymentInput::cash("102"))).unwrap());

        assert_eq!(sale.sale.idempotency_key, key);
        assert_eq!(sale.sale.total, dec("102.00"));
        assert_eq!(sale.sale.credit_amount, Decimal::ZERO);
        assert_eq!(sale.items.len(), 1);
        assert_eq!(sale.items[0].quantity, 4);
        assert_eq!(sale.payments.len(), 1);

        assert_eq!(batch_state(&conn, batch_id), (6, 0));
        assert!(session.cart().is_empty());
        assert_ne!(session.idempotency_key(), key);
    }

    #[test]
    fn test_checkout_without_credit_record_needs_approval() {
        let conn = setup_test_db();
        let (medicine_id, batch_id) = seed_stocked_medicine(&conn);
        let patient_id = add_patient(&conn, "Jane Doe");

        let mut session = BillingSession::new();
        session.set_patient(&conn, Some(patient_id)).unwrap();
        session.add_to_cart(&conn, medicine_id, 4).unwrap();
        let key = session.idempotency_key().to_string();

        let outcome = session.checkout(&conn, &request(PaymentInput::cash("50"))).unwrap();

        match outcome {
            CheckoutOutcome::NeedsCreditApproval {
                patient_id: pid,
                credit_amount,
                reason,
            } => {
                assert_eq!(pid, patient_id);
                assert_eq!(credit_amount, dec("52.00"));
                assert_eq!(reason, CreditApprovalReason::NoCreditRecord);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        // Nothing was recorded and the bill is still open.
        assert_eq!(session.idempotency_key(), key);
        assert_eq!(session.cart().items.len(), 1);
        assert_eq!(batch_state(&conn, batch_id), (10, 4));
        let sale_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sales", [], |row| row.get(0))
            .unwrap();
        assert_eq!(sale_count, 0);
    }

    #[test]
    fn test_credit_without_patient_rejected() {
        let conn = setup_test_db();
        let (medicine_id, _) = seed_stocked_medicine(&conn);

        let mut session = BillingSession::new();
        session.add_to_cart(&conn, medicine_id, 4).unwrap();

        let result = session.checkout(&conn, &request(PaymentInput::cash("50")));
        assert!(matches!(result, Err(PosError::Validation(_))));
    }

    #[test]
    fn test_plan_checkout_reports_exceeded_limit() {
        let conn = setup_test_db();
        let (medicine_id, _) = seed_stocked_medicine(&conn);
        let patient_id = add_patient(&conn, "Jane Doe");
        patients::approve_credit(&conn, patient_id, dec("20"), None).unwrap();

        let mut session = BillingSession::new();
        session.set_patient(&conn, Some(patient_id)).unwrap();
        session.add_to_cart(&conn, medicine_id, 4).unwrap();

        let plan = session
            .plan_checkout(&conn, &PaymentInput::cash("50"), &TaxSettings::default())
            .unwrap();

        assert_eq!(plan.totals.credit_amount, dec("52.00"));
        assert_eq!(
            plan.decision,
            CheckoutDecision::NeedsCreditApproval {
                patient_id,
                credit_amount: dec("52.00"),
                reason: CreditApprovalReason::ExceedsLimit {
                    available: dec("20")
                },
            }
        );
    }

    #[test]
    fn test_credit_sale_within_limit_proceeds() {
        let conn = setup_test_db();
        let (medicine_id, _) = seed_stocked_medicine(&conn);
        let patient_id = add_patient(&conn, "Jane Doe");
        patients::approve_credit(&conn, patient_id, dec("100"), None).unwrap();

        let mut session = BillingSession::new();
        session.set_patient(&conn, Some(patient_id)).unwrap();
        session.add_to_cart(&conn, medicine_id, 4).unwrap();

        let sale = completed(session.checkout(&conn, &request(PaymentInput::cash("50"))).unwrap());

        assert_eq!(sale.sale.credit_amount, dec("52.00"));
        let credit = patients::credit_record(&conn, patient_id).unwrap().unwrap();
        assert_eq!(credit.balance, dec("52.00"));
        assert_eq!(credit.available, dec("48.00"));
    }

    #[test]
    fn test_approve_credit_and_checkout() {
        let conn = setup_test_db();
        let (medicine_id, _) = seed_stocked_medicine(&conn);
        let patient_id = add_patient(&conn, "Jane Doe");
        let pharmacist = seed_user(&conn, "pharma", Role::Pharmacist);

        let mut session = BillingSession::new();
        session.set_patient(&conn, Some(patient_id)).unwrap();
        session.add_to_cart(&conn, medicine_id, 4).unwrap();

        let outcome = session
            .approve_credit_and_checkout(
                &conn,
                &request(PaymentInput::cash("50")),
                dec("100"),
                &CurrentUser::from(&pharmacist),
            )
            .unwrap();
        let sale = completed(outcome);

        assert_eq!(sale.sale.patient_id, Some(patient_id));
        let credit = patients::credit_record(&conn, patient_id).unwrap().unwrap();
        assert_eq!(credit.credit_limit, dec("100"));
        assert_eq!(credit.balance, dec("52.00"));
        assert_eq!(credit.approved_by, Some(pharmacist.id));
    }

    #[test]
    fn test_cashier_cannot_approve_credit() {
        let conn = setup_test_db();
        let (medicine_id, _) = seed_stocked_medicine(&conn);
        let patient_id = add_patient(&conn, "Jane Doe");
        let cashier = seed_user(&conn, "till", Role::Cashier);

        let mut session = BillingSession::new();
        session.set_patient(&conn, Some(patient_id)).unwrap();
        session.add_to_cart(&conn, medicine_id, 4).unwrap();

        let result = session.approve_credit_and_checkout(
            &conn,
            &request(PaymentInput::cash("50")),
            dec("100"),
            &CurrentUser::from(&cashier),
        );

        assert!(matches!(result, Err(PosError::Unauthorized(_))));
        assert!(patients::credit_record(&conn, patient_id).unwrap().is_none());
    }

    #[test]
    fn test_approved_limit_must_cover_bill() {
        let conn = setup_test_db();
        let (medicine_id, _) = seed_stocked_medicine(&conn);
        let patient_id = add_patient(&conn, "Jane Doe");
        let manager = seed_user(&conn, "boss", Role::Manager);

        let mut session = BillingSession::new();
        session.set_patient(&conn, Some(patient_id)).unwrap();
        session.add_to_cart(&conn, medicine_id, 4).unwrap();

        let result = session.approve_credit_and_checkout(
            &conn,
            &request(PaymentInput::cash("50")),
            dec("40"),
            &CurrentUser::from(&manager),
        );

        assert!(matches!(result, Err(PosError::Validation(_))));
    }

    #[test]
    fn test_split_payment() {
        let conn = setup_test_db();
        let (medicine_id, _) = seed_stocked_medicine(&conn);

        let mut session = BillingSession::new();
        session.add_to_cart(&conn, medicine_id, 4).unwrap();

        let payment = PaymentInput::Split {
            entries: vec![
                SplitEntry {
                    method: PaymentMethod::Cash,
                    amount: "50".to_string(),
                },
                SplitEntry {
                    method: PaymentMethod::Card,
                    amount: "52".to_string(),
                },
                SplitEntry {
                    method: PaymentMethod::Mobile,
                    amount: "".to_string(),
                },
            ],
        };

        let sale = completed(session.checkout(&conn, &request(payment)).unwrap());

        assert_eq!(sale.sale.paid_amount, dec("102"));
        assert_eq!(sale.sale.credit_amount, Decimal::ZERO);
        // Zero-amount entries are not recorded
        assert_eq!(sale.payments.len(), 2);
        assert_eq!(sale.payments[1].method, PaymentMethod::Card);
    }

    #[test]
    fn test_empty_split_rejected() {
        let payment = PaymentInput::Split { entries: vec![] };
        assert!(matches!(payment.resolve(), Err(PosError::Validation(_))));
    }

    #[test]
    fn test_checkout_empty_cart_rejected() {
        let conn = setup_test_db();
        let mut session = BillingSession::new();

        let result = session.checkout(&conn, &request(PaymentInput::cash("10")));
        assert!(matches!(result, Err(PosError::Validation(_))));
    }

    #[test]
    fn test_prescription_required_and_retry_keeps_key() {
        let conn = setup_test_db();
        let medicine_id = add_medicine(&conn, "Morphine 10mg", true);
        let batch_id = add_batch(&conn, medicine_id, "MO-1", 90, 10, "15.00");

        let mut session = BillingSession::new();
        session.add_to_cart(&conn, medicine_id, 2).unwrap();
        let key = session.idempotency_key().to_string();

        let result = session.checkout(&conn, &request(PaymentInput::cash("30")));
        assert!(matches!(result, Err(PosError::Validation(_))));
        assert_eq!(session.idempotency_key(), key);
        assert_eq!(batch_state(&conn, batch_id), (10, 2));

        session.set_prescription_ref(Some("RX-2024-001".to_string()));
        let sale = completed(session.checkout(&conn, &request(PaymentInput::cash("30"))).unwrap());

        assert_eq!(sale.sale.idempotency_key, key);
        assert_eq!(sale.sale.prescription_ref.as_deref(), Some("RX-2024-001"));
        assert_eq!(batch_state(&conn, batch_id), (8, 0));
    }

    #[test]
    fn test_discount_and_tax_flow_into_sale() {
        let conn = setup_test_db();
        let (medicine_id, _) = seed_stocked_medicine(&conn);

        let mut session = BillingSession::new();
        session.add_to_cart(&conn, medicine_id, 4).unwrap();
        session.set_discount(Discount::Amount(dec("2"))).unwrap();

        let mut checkout = request(PaymentInput::cash("110.20"));
        checkout.tax = TaxSettings {
            rate_percent: dec("10"),
            inclusive: true,
        };
        let sale = completed(session.checkout(&conn, &checkout).unwrap());

        assert_eq!(sale.sale.subtotal, dec("102.00"));
        assert_eq!(sale.sale.tax_amount, dec("10.20"));
        assert_eq!(sale.sale.discount_amount, dec("2"));
        assert_eq!(sale.sale.total, dec("110.20"));
        assert_eq!(sale.sale.change_due, Decimal::ZERO);
    }

    // ===== SALES TESTS =====

    fn new_sale(key: &str, items: Vec<CartItem>, paid: &str) -> NewSale {
        NewSale {
            idempotency_key: key.to_string(),
            patient_id: None,
            user_id: None,
            branch_id: None,
            items,
            discount: Discount::None,
            tax: TaxSettings::default(),
            payments: vec![SalePayment {
                method: PaymentMethod::Cash,
                amount: dec(paid),
            }],
            prescription_ref: None,
            notes: None,
        }
    }

    #[test]
    fn test_duplicate_submission_returns_existing_sale() {
        let conn = setup_test_db();
        let (medicine_id, batch_id) = seed_stocked_medicine(&conn);

        let mut session = BillingSession::new();
        session.add_to_cart(&conn, medicine_id, 4).unwrap();
        let items = session.cart().items.clone();

        let first = sales::create_sale(&conn, new_sale("same-key", items.clone(), "102")).unwrap();
        let second = sales::create_sale(&conn, new_sale("same-key", items, "102")).unwrap();

        assert_eq!(first.sale.id, second.sale.id);
        assert_eq!(batch_state(&conn, batch_id), (6, 0));
        let sale_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sales", [], |row| row.get(0))
            .unwrap();
        assert_eq!(sale_count, 1);
    }

    #[test]
    fn test_sale_is_priced_from_batches() {
        let conn = setup_test_db();
        let (medicine_id, _) = seed_stocked_medicine(&conn);

        let mut session = BillingSession::new();
        session.add_to_cart(&conn, medicine_id, 4).unwrap();
        let mut items = session.cart().items.clone();
        items[0].price = dec("1.00");
        for batch in items[0].batch_info.iter_mut() {
            batch.selling_price = dec("1.00");
        }

        let sale = sales::create_sale(&conn, new_sale("tampered", items, "102")).unwrap();

        assert_eq!(sale.sale.subtotal, dec("102.00"));
        assert_eq!(sale.items[0].unit_price, dec("25.50"));
        assert_eq!(sale.sale.credit_amount, Decimal::ZERO);
    }

    #[test]
    fn test_sale_with_mismatched_allocation_rejected() {
        let conn = setup_test_db();
        let (medicine_id, _) = seed_stocked_medicine(&conn);

        let mut session = BillingSession::new();
        session.add_to_cart(&conn, medicine_id, 4).unwrap();
        let mut items = session.cart().items.clone();
        items[0].quantity = 5;

        let result = sales::create_sale(&conn, new_sale("mismatch", items, "200"));
        assert!(matches!(result, Err(PosError::Validation(_))));
    }

    #[test]
    fn test_void_sale_restores_stock_and_credit() {
        let conn = setup_test_db();
        let (medicine_id, batch_id) = seed_stocked_medicine(&conn);
        let patient_id = add_patient(&conn, "Jane Doe");
        patients::approve_credit(&conn, patient_id, dec("100"), None).unwrap();

        let mut session = BillingSession::new();
        session.set_patient(&conn, Some(patient_id)).unwrap();
        session.add_to_cart(&conn, medicine_id, 4).unwrap();
        let sale = completed(session.checkout(&conn, &request(PaymentInput::cash("50"))).unwrap());
        assert_eq!(batch_state(&conn, batch_id), (6, 0));

        sales::delete_sale(&conn, sale.sale.id, None).unwrap();

        assert_eq!(batch_state(&conn, batch_id), (10, 0));
        let credit = patients::credit_record(&conn, patient_id).unwrap().unwrap();
        assert_eq!(credit.balance, Decimal::ZERO);
        assert_eq!(sales::get_sale(&conn, sale.sale.id).unwrap().sale.status, "void");
        assert!(sales::list_sales(&conn, &SalesFilter::default()).unwrap().is_empty());

        let with_void = sales::list_sales(
            &conn,
            &SalesFilter {
                include_void: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(with_void.len(), 1);

        let again = sales::delete_sale(&conn, sale.sale.id, None);
        assert!(matches!(again, Err(PosError::Conflict(_))));
    }

    #[test]
    fn test_update_sale_cannot_move_credit() {
        let conn = setup_test_db();
        let (medicine_id, _) = seed_stocked_medicine(&conn);
        let jane = add_patient(&conn, "Jane Doe");
        let john = add_patient(&conn, "John Roe");
        patients::approve_credit(&conn, jane, dec("100"), None).unwrap();

        let mut session = BillingSession::new();
        session.set_patient(&conn, Some(jane)).unwrap();
        session.add_to_cart(&conn, medicine_id, 4).unwrap();
        let sale = completed(session.checkout(&conn, &request(PaymentInput::cash("50"))).unwrap());

        let moved = sales::update_sale(
            &conn,
            SaleUpdate {
                id: sale.sale.id,
                patient_id: Some(john),
                prescription_ref: None,
                notes: None,
            },
            None,
        );
        assert!(matches!(moved, Err(PosError::Conflict(_))));

        let noted = sales::update_sale(
            &conn,
            SaleUpdate {
                id: sale.sale.id,
                patient_id: Some(jane),
                prescription_ref: None,
                notes: Some("Collected by daughter".to_string()),
            },
            None,
        )
        .unwrap();
        assert_eq!(noted.sale.notes.as_deref(), Some("Collected by daughter"));
    }

    #[test]
    fn test_close_day_once() {
        let conn = setup_test_db();
        let (medicine_id, _) = seed_stocked_medicine(&conn);

        let mut session = BillingSession::new();
        session.add_to_cart(&conn, medicine_id, 2).unwrap();
        completed(session.checkout(&conn, &request(PaymentInput::cash("51"))).unwrap());

        let closing = sales::close_day(&conn, today()).unwrap();
        assert_eq!(closing.total_sales, 1);
        assert_eq!(closing.total_revenue, dec("51.00"));

        let again = sales::close_day(&conn, today());
        assert!(matches!(again, Err(PosError::Conflict(_))));

        let history = sales::sales_history(&conn, None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, closing.id);
    }

    // ===== PENDING BILL TESTS =====

    #[test]
    fn test_hold_and_resume_bill() {
        let conn = setup_test_db();
        let (medicine_id, batch_id) = seed_stocked_medicine(&conn);
        let patient_id = add_patient(&conn, "Jane Doe");

        let mut session = BillingSession::new();
        session.set_patient(&conn, Some(patient_id)).unwrap();
        session.add_to_cart(&conn, medicine_id, 3).unwrap();

        let id = session.save_pending(&conn, "", None).unwrap();
        assert!(session.cart().is_empty());
        assert_eq!(session.patient_id(), None);
        assert_eq!(batch_state(&conn, batch_id), (10, 3));

        let pending = billing::list_pending(&conn).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].label, "Bill of 1 item(s)");
        assert_eq!(pending[0].subtotal, dec("76.50"));

        // A bill in progress blocks resuming another
        session.add_to_cart(&conn, medicine_id, 1).unwrap();
        let blocked = session.resume_pending(&conn, id);
        assert!(matches!(blocked, Err(PosError::Conflict(_))));
        session.clear_cart(&conn).unwrap();

        session.resume_pending(&conn, id).unwrap();
        assert_eq!(session.patient_id(), Some(patient_id));
        assert_eq!(session.cart().items[0].quantity, 3);
        assert!(billing::list_pending(&conn).unwrap().is_empty());

        let sale = completed(session.checkout(&conn, &request(PaymentInput::cash("76.50"))).unwrap());
        assert_eq!(sale.sale.total, dec("76.50"));
        assert_eq!(batch_state(&conn, batch_id), (7, 0));
    }

    #[test]
    fn test_discard_pending_releases_stock() {
        let conn = setup_test_db();
        let (medicine_id, batch_id) = seed_stocked_medicine(&conn);

        let mut session = BillingSession::new();
        session.add_to_cart(&conn, medicine_id, 3).unwrap();
        let id = session.save_pending(&conn, "Counter 2", None).unwrap();

        billing::discard_pending(&conn, id).unwrap();

        assert_eq!(batch_state(&conn, batch_id), (10, 0));
        let missing = billing::discard_pending(&conn, id);
        assert!(matches!(missing, Err(PosError::NotFound(_))));
    }

    #[test]
    fn test_reconcile_keeps_only_held_reservations() {
        let conn = setup_test_db();
        let (medicine_id, batch_id) = seed_stocked_medicine(&conn);

        // Left behind by a cart that never checked out
        inventory::allocate_stock(
            &conn,
            &AllocationRequest {
                medicine_id,
                quantity: 3,
                selling_price: None,
            },
        )
        .unwrap();

        let mut session = BillingSession::new();
        session.add_to_cart(&conn, medicine_id, 2).unwrap();
        session.save_pending(&conn, "Held", None).unwrap();
        assert_eq!(batch_state(&conn, batch_id), (10, 5));

        billing::reconcile_reservations(&conn).unwrap();

        assert_eq!(batch_state(&conn, batch_id), (10, 2));
    }

    // ===== PATIENT TESTS =====

    #[test]
    fn test_credit_payment_reduces_balance() {
        let conn = setup_test_db();
        let (medicine_id, _) = seed_stocked_medicine(&conn);
        let patient_id = add_patient(&conn, "Jane Doe");
        patients::approve_credit(&conn, patient_id, dec("100"), None).unwrap();

        let mut session = BillingSession::new();
        session.set_patient(&conn, Some(patient_id)).unwrap();
        session.add_to_cart(&conn, medicine_id, 4).unwrap();
        completed(session.checkout(&conn, &request(PaymentInput::cash("50"))).unwrap());

        let too_much = patients::record_credit_payment(&conn, patient_id, dec("60"), PaymentMethod::Cash);
        assert!(matches!(too_much, Err(PosError::Validation(_))));

        let record =
            patients::record_credit_payment(&conn, patient_id, dec("20"), PaymentMethod::Mobile).unwrap();
        assert_eq!(record.balance, dec("32.00"));

        let statement = patients::credit_statement(&conn, patient_id).unwrap();
        assert_eq!(statement.len(), 2);
        assert!(statement
            .iter()
            .any(|e| matches!(e, CreditStatementEntry::Payment { amount, .. } if *amount == dec("20"))));

        assert_eq!(patients::total_outstanding_credit(&conn).unwrap(), dec("32.00"));
    }

    #[test]
    fn test_credit_limit_cannot_drop_below_balance() {
        let conn = setup_test_db();
        let (medicine_id, _) = seed_stocked_medicine(&conn);
        let patient_id = add_patient(&conn, "Jane Doe");
        patients::approve_credit(&conn, patient_id, dec("100"), None).unwrap();

        let mut session = BillingSession::new();
        session.set_patient(&conn, Some(patient_id)).unwrap();
        session.add_to_cart(&conn, medicine_id, 4).unwrap();
        completed(session.checkout(&conn, &request(PaymentInput::cash("50"))).unwrap());

        let result = patients::approve_credit(&conn, patient_id, dec("40"), None);
        assert!(matches!(result, Err(PosError::Validation(_))));
    }

    #[test]
    fn test_delete_patient_guards() {
        let conn = setup_test_db();
        let (medicine_id, _) = seed_stocked_medicine(&conn);
        let debtor = add_patient(&conn, "Jane Doe");
        let walk_in = add_patient(&conn, "John Roe");
        patients::approve_credit(&conn, debtor, dec("100"), None).unwrap();

        let mut session = BillingSession::new();
        session.set_patient(&conn, Some(debtor)).unwrap();
        session.add_to_cart(&conn, medicine_id, 4).unwrap();
        completed(session.checkout(&conn, &request(PaymentInput::cash("50"))).unwrap());

        let result = patients::delete_patient(&conn, debtor);
        assert!(matches!(result, Err(PosError::Conflict(_))));

        patients::delete_patient(&conn, walk_in).unwrap();
        assert!(matches!(
            patients::get_patient(&conn, walk_in),
            Err(PosError::NotFound(_))
        ));
    }

    #[test]
    fn test_search_patients_by_phone() {
        let conn = setup_test_db();
        add_patient(&conn, "Jane Doe");
        patients::create_patient(
            &conn,
            CreatePatient {
                name: "John Roe".to_string(),
                phone: Some("0711222333".to_string()),
                email: None,
                address: None,
                date_of_birth: None,
            },
        )
        .unwrap();

        let found = patients::list_patients(&conn, Some("0711")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "John Roe");
    }

    // ===== SUPPLIER TESTS =====

    #[test]
    fn test_receiving_stock_builds_supplier_balance() {
        let conn = setup_test_db();
        let medicine_id = add_medicine(&conn, "Paracetamol", false);
        let supplier = suppliers::create_supplier(
            &conn,
            CreateSupplier {
                name: "Medisupply Ltd".to_string(),
                contact_person: None,
                phone: None,
                email: None,
                address: None,
            },
        )
        .unwrap();

        inventory::receive_stock(
            &conn,
            ReceiveStock {
                medicine_id,
                batch_number: "PC-7".to_string(),
                expiry_date: today() + Duration::days(365),
                quantity: 10,
                cost_price: dec("4.00"),
                selling_price: dec("6.00"),
                supplier_id: Some(supplier.id),
                branch_id: None,
                reference: Some("INV-100".to_string()),
            },
            None,
        )
        .unwrap();

        let balance = suppliers::supplier_balance(&conn, supplier.id).unwrap();
        assert_eq!(balance.purchases, dec("40.00"));
        assert_eq!(balance.balance, dec("40.00"));

        suppliers::add_ledger_entry(
            &conn,
            CreateLedgerEntry {
                supplier_id: supplier.id,
                entry_type: LedgerEntryType::Payment,
                amount: dec("15"),
                reference: None,
                notes: None,
            },
        )
        .unwrap();

        let overpay = suppliers::add_ledger_entry(
            &conn,
            CreateLedgerEntry {
                supplier_id: supplier.id,
                entry_type: LedgerEntryType::Payment,
                amount: dec("100"),
                reference: None,
                notes: None,
            },
        );
        assert!(matches!(overpay, Err(PosError::Validation(_))));

        let payables = suppliers::payables(&conn).unwrap();
        assert_eq!(payables.len(), 1);
        assert_eq!(payables[0].balance, dec("25.00"));

        let deactivate = suppliers::deactivate_supplier(&conn, supplier.id);
        assert!(matches!(deactivate, Err(PosError::Conflict(_))));
        assert_eq!(suppliers::ledger(&conn, supplier.id).unwrap().len(), 2);
    }

    #[test]
    fn test_supplier_name_unique() {
        let conn = setup_test_db();
        let create = || CreateSupplier {
            name: "Medisupply Ltd".to_string(),
            contact_person: None,
            phone: None,
            email: None,
            address: None,
        };

        suppliers::create_supplier(&conn, create()).unwrap();
        let duplicate = suppliers::create_supplier(&conn, create());
        assert!(matches!(duplicate, Err(PosError::Conflict(_))));
    }

    // ===== EXPENSE TESTS =====

    fn expense(category: &str, amount: &str, date: NaiveDate) -> CreateExpense {
        CreateExpense {
            category: category.to_string(),
            amount: dec(amount),
            description: None,
            expense_date: date,
            branch_id: None,
            created_by: None,
        }
    }

    #[test]
    fn test_expense_crud_and_summary() {
        let conn = setup_test_db();
        let yesterday = today() - Duration::days(1);

        let rent = expenses::create_expense(&conn, expense("Rent", "500", yesterday)).unwrap();
        expenses::create_expense(&conn, expense("Utilities", "80", today())).unwrap();
        expenses::create_expense(&conn, expense("Utilities", "20", today())).unwrap();

        let updated = expenses::update_expense(
            &conn,
            UpdateExpense {
                id: rent.id,
                category: "Rent".to_string(),
                amount: dec("550"),
                description: Some("March".to_string()),
                expense_date: yesterday,
            },
        )
        .unwrap();
        assert_eq!(updated.amount, dec("550"));

        let todays = expenses::list_expenses(&conn, Some(today()), Some(today()), None).unwrap();
        assert_eq!(todays.len(), 2);

        let utilities = expenses::list_expenses(&conn, None, None, Some("Utilities")).unwrap();
        assert_eq!(utilities.len(), 2);

        let summary = expenses::expense_summary(&conn, yesterday, today()).unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].category, "Rent");
        assert_eq!(summary[1].total, dec("100"));
        assert_eq!(summary[1].count, 2);

        expenses::delete_expense(&conn, rent.id).unwrap();
        assert!(matches!(
            expenses::delete_expense(&conn, rent.id),
            Err(PosError::NotFound(_))
        ));
    }

    #[test]
    fn test_expense_amount_must_be_positive() {
        let conn = setup_test_db();

        let result = expenses::create_expense(&conn, expense("Rent", "0", today()));
        assert!(matches!(result, Err(PosError::Validation(_))));

        let result = expenses::create_expense(&conn, expense("  ", "10", today()));
        assert!(matches!(result, Err(PosError::Validation(_))));
    }

    // ===== ADMIN TESTS =====

    #[test]
    fn test_usernames_are_unique_case_insensitive() {
        let conn = setup_test_db();
        seed_user(&conn, "Alice", Role::Cashier);

        let duplicate = admin::create_user(
            &conn,
            CreateUser {
                username: "alice".to_string(),
                password: "another-password".to_string(),
                full_name: "Alice Again".to_string(),
                role: Role::Cashier,
                branch_id: None,
            },
        );
        assert!(matches!(duplicate, Err(PosError::Conflict(_))));
    }

    #[test]
    fn test_short_password_rejected() {
        let conn = setup_test_db();

        let result = admin::create_user(
            &conn,
            CreateUser {
                username: "bob".to_string(),
                password: "short".to_string(),
                full_name: "Bob".to_string(),
                role: Role::Cashier,
                branch_id: None,
            },
        );
        assert!(matches!(result, Err(PosError::Validation(_))));
    }

    #[test]
    fn test_branch_with_active_users_cannot_close() {
        let conn = setup_test_db();
        let branch = admin::create_branch(
            &conn,
            CreateBranch {
                name: "Main Street".to_string(),
                address: None,
                phone: None,
            },
        )
        .unwrap();

        let user = admin::create_user(
            &conn,
            CreateUser {
                username: "carol".to_string(),
                password: "correct-horse".to_string(),
                full_name: "Carol".to_string(),
                role: Role::Pharmacist,
                branch_id: Some(branch.id),
            },
        )
        .unwrap();

        let blocked = admin::deactivate_branch(&conn, branch.id);
        assert!(matches!(blocked, Err(PosError::Conflict(_))));

        admin::deactivate_user(&conn, user.id).unwrap();
        admin::deactivate_branch(&conn, branch.id).unwrap();

        assert!(admin::list_branches(&conn, false).unwrap().is_empty());
        assert_eq!(admin::list_branches(&conn, true).unwrap().len(), 1);
    }

    #[test]
    fn test_change_password() {
        let conn = setup_test_db();
        let config = AppConfig::default();
        let user = seed_user(&conn, "dave", Role::Cashier);

        let wrong = admin::change_password(&conn, user.id, "not-it", "new-password-1");
        assert!(matches!(wrong, Err(PosError::Unauthorized(_))));

        admin::change_password(&conn, user.id, "correct-horse", "new-password-1").unwrap();

        assert!(auth::login(&conn, "dave", "correct-horse", &config).is_err());
        assert!(auth::login(&conn, "dave", "new-password-1", &config).is_ok());
    }

    // ===== AUTH TESTS =====

    #[test]
    fn test_login_stores_session() {
        let conn = setup_test_db();
        let config = AppConfig::default();
        let user = seed_user(&conn, "erin", Role::Pharmacist);

        let response = auth::login(&conn, "  ERIN ", "correct-horse", &config).unwrap();
        assert_eq!(response.user.id, user.id);

        let storage = LocalStorage::new(&conn);
        assert_eq!(
            storage.get(ACCESS_TOKEN_KEY).unwrap(),
            Some(response.tokens.access_token.clone())
        );
        assert_eq!(
            storage.get(REFRESH_TOKEN_KEY).unwrap(),
            Some(response.tokens.refresh_token.clone())
        );
        assert_eq!(storage.current_user().unwrap(), Some(response.user.clone()));

        let current = auth::current_session(&conn).unwrap();
        assert_eq!(current.username, "erin");
        assert_eq!(current.role, Role::Pharmacist);
    }

    #[test]
    fn test_login_wrong_password() {
        let conn = setup_test_db();
        let config = AppConfig::default();
        seed_user(&conn, "erin", Role::Pharmacist);

        let result = auth::login(&conn, "erin", "wrong-password", &config);
        assert!(matches!(result, Err(PosError::Unauthorized(_))));

        let unknown = auth::login(&conn, "nobody", "correct-horse", &config);
        assert!(matches!(unknown, Err(PosError::Unauthorized(_))));
    }

    #[test]
    fn test_bearer_token_falls_back_to_legacy_key() {
        let conn = setup_test_db();
        let config = AppConfig::default();
        seed_user(&conn, "frank", Role::Cashier);
        let response = auth::login(&conn, "frank", "correct-horse", &config).unwrap();

        let storage = LocalStorage::new(&conn);
        storage.remove(ACCESS_TOKEN_KEY).unwrap();
        assert_eq!(storage.bearer_token().unwrap(), None);

        storage.set(LEGACY_TOKEN_KEY, &response.tokens.access_token).unwrap();
        assert_eq!(
            storage.bearer_token().unwrap(),
            Some(response.tokens.access_token.clone())
        );
        assert_eq!(auth::current_session(&conn).unwrap().username, "frank");
    }

    #[test]
    fn test_refresh_rotates_tokens() {
        let conn = setup_test_db();
        let config = AppConfig::default();
        seed_user(&conn, "grace", Role::Manager);
        let response = auth::login(&conn, "grace", "correct-horse", &config).unwrap();

        let refreshed = auth::refresh(&conn, &response.tokens.refresh_token, &config).unwrap();
        assert_ne!(refreshed.access_token, response.tokens.access_token);
        assert_ne!(refreshed.refresh_token, response.tokens.refresh_token);

        let storage = LocalStorage::new(&conn);
        assert_eq!(
            storage.get(ACCESS_TOKEN_KEY).unwrap(),
            Some(refreshed.access_token.clone())
        );

        let reused = auth::refresh(&conn, &response.tokens.refresh_token, &config);
        assert!(matches!(reused, Err(PosError::Unauthorized(_))));

        let old_access = auth::authenticate(&conn, &response.tokens.access_token);
        assert!(matches!(old_access, Err(PosError::Unauthorized(_))));
        assert!(auth::authenticate(&conn, &refreshed.access_token).is_ok());
    }

    #[test]
    fn test_expired_access_token_rejected() {
        let conn = setup_test_db();
        let config = AppConfig::default();
        seed_user(&conn, "heidi", Role::Cashier);
        let response = auth::login(&conn, "heidi", "correct-horse", &config).unwrap();

        conn.execute(
            "UPDATE sessions SET access_expires_at = '2000-01-01T00:00:00+00:00'",
            [],
        )
        .unwrap();

        let result = auth::authenticate(&conn, &response.tokens.access_token);
        assert!(matches!(result, Err(PosError::Unauthorized(_))));
    }

    #[test]
    fn test_deactivated_user_cannot_refresh() {
        let conn = setup_test_db();
        let config = AppConfig::default();
        let user = seed_user(&conn, "ivan", Role::Cashier);
        let response = auth::login(&conn, "ivan", "correct-horse", &config).unwrap();

        admin::deactivate_user(&conn, user.id).unwrap();

        let result = auth::refresh(&conn, &response.tokens.refresh_token, &config);
        assert!(matches!(result, Err(PosError::Unauthorized(_))));
        let login = auth::login(&conn, "ivan", "correct-horse", &config);
        assert!(matches!(login, Err(PosError::Unauthorized(_))));
    }

    #[test]
    fn test_logout_clears_storage() {
        let conn = setup_test_db();
        let config = AppConfig::default();
        seed_user(&conn, "judy", Role::Cashier);
        let response = auth::login(&conn, "judy", "correct-horse", &config).unwrap();

        auth::logout(&conn).unwrap();

        let storage = LocalStorage::new(&conn);
        assert_eq!(storage.bearer_token().unwrap(), None);
        assert_eq!(storage.current_user().unwrap(), None);
        assert!(auth::authenticate(&conn, &response.tokens.access_token).is_err());
        assert!(matches!(
            auth::current_session(&conn),
            Err(PosError::Unauthorized(_))
        ));
    }

    // ===== TOKEN REFRESH TESTS =====

    fn signed_in_database() -> (Database, AppConfig) {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let config = AppConfig::default();
        {
            let conn = db.conn().unwrap();
            seed_user(&conn, "kate", Role::Pharmacist);
            auth::login(&conn, "kate", "correct-horse", &config).unwrap();
        }
        (db, config)
    }

    fn stored_refresh_token(db: &Database) -> Option<String> {
        let conn = db.conn().unwrap();
        let token = LocalStorage::new(&conn).get(REFRESH_TOKEN_KEY).unwrap();
        token
    }

    #[test]
    fn test_tick_without_token_does_nothing() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        assert_eq!(
            token_refresh::tick_once(&db, &AppConfig::default()),
            TickResult::NoToken
        );
    }

    #[test]
    fn test_tick_refreshes_stored_token() {
        let (db, config) = signed_in_database();
        let before = stored_refresh_token(&db);

        assert_eq!(token_refresh::tick_once(&db, &config), TickResult::Refreshed);
        assert_ne!(stored_refresh_token(&db), before);
    }

    #[test]
    fn test_tick_swallows_revoked_token() {
        let (db, config) = signed_in_database();
        {
            let conn = db.conn().unwrap();
            conn.execute("UPDATE sessions SET revoked = 1", []).unwrap();
        }

        assert_eq!(token_refresh::tick_once(&db, &config), TickResult::Failed);
    }

    #[test]
    fn test_refresher_runs_until_stopped() {
        let (db, config) = signed_in_database();
        let db = Arc::new(db);
        let before = stored_refresh_token(&db);

        let mut refresher =
            TokenRefresher::start(db.clone(), config, std::time::Duration::from_millis(20));
        std::thread::sleep(std::time::Duration::from_millis(200));
        refresher.stop();

        assert_ne!(stored_refresh_token(&db), before);

        // Stopped: nothing changes any more
        let after_stop = stored_refresh_token(&db);
        std::thread::sleep(std::time::Duration::from_millis(60));
        assert_eq!(stored_refresh_token(&db), after_stop);
    }

    // ===== NOTIFICATION TESTS =====

    #[test]
    fn test_notifications_are_capped() {
        let center = NotificationCenter::new();
        for i in 0..105 {
            center.add(NotificationKind::Info, "Stock", &format!("message {}", i));
        }

        let list = center.list();
        assert_eq!(list.len(), MAX_NOTIFICATIONS);
        assert_eq!(list[0].id, 105);
        assert_eq!(list[list.len() - 1].id, 6);
        assert_eq!(center.unread_count(), 100);
    }

    #[test]
    fn test_notification_read_state() {
        let center = NotificationCenter::new();
        let first = center.success("Sale completed", "Sale #1");
        center.error("Billing", "Insufficient stock");
        center.add(NotificationKind::Warning, "Expiry", "3 batches expire soon");

        assert!(center.mark_read(first));
        assert!(!center.mark_read(999));
        assert_eq!(center.unread_count(), 2);

        center.mark_all_read();
        assert_eq!(center.unread_count(), 0);

        center.clear();
        assert!(center.list().is_empty());
    }

    // ===== ERROR BOUNDARY TESTS =====

    #[test]
    fn test_error_boundary_catches_errors() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut boundary =
            ErrorBoundary::new().on_error(move |message| sink.lock().unwrap().push(message.to_string()));

        assert_eq!(boundary.run(|| Ok::<_, PosError>(5)), Rendered::Content(5));
        assert!(!boundary.has_error());

        let failed = boundary.run(|| Err::<i32, _>(PosError::validation("Cart is empty")));
        assert_eq!(
            failed,
            Rendered::Fallback {
                message: "Cart is empty".to_string()
            }
        );
        assert!(boundary.has_error());
        assert_eq!(seen.lock().unwrap().len(), 1);

        // Tripped: work is not attempted again until retry
        let calls = AtomicUsize::new(0);
        let skipped = boundary.run(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, PosError>(1)
        });
        assert!(matches!(skipped, Rendered::Fallback { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        boundary.retry();
        assert_eq!(boundary.run(|| Ok::<_, PosError>(7)), Rendered::Content(7));
    }

    #[test]
    fn test_error_boundary_catches_panics_and_reloads() {
        let reloads = Arc::new(AtomicUsize::new(0));
        let counter = reloads.clone();
        let mut boundary = ErrorBoundary::new().on_reload(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let result = boundary.run(|| -> Result<i32, String> { panic!("render failed") });
        assert_eq!(
            result,
            Rendered::Fallback {
                message: "render failed".to_string()
            }
        );
        assert_eq!(boundary.error(), Some("render failed"));

        boundary.reload();
        assert!(!boundary.has_error());
        assert_eq!(reloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_guard_command_reports_failures_to_notifications() {
        let center = NotificationCenter::new();

        let ok = guard_command(&center, "Inventory", || Ok::<_, PosError>(3));
        assert_eq!(ok, Ok(3));
        assert!(center.list().is_empty());

        let failed = guard_command(&center, "Billing", || {
            Err::<i32, _>(PosError::validation("Cart is empty"))
        });
        assert_eq!(failed, Err("Cart is empty".to_string()));

        let panicked = guard_command(&center, "Reports", || -> Result<i32, PosError> {
            panic!("report query failed")
        });
        assert_eq!(panicked, Err("report query failed".to_string()));

        let list = center.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].kind, NotificationKind::Error);
        assert_eq!(list[0].title, "Reports");
        assert_eq!(list[1].title, "Billing");
        assert_eq!(list[1].message, "Cart is empty");
    }

    #[test]
    fn test_database_usable_after_panicked_command() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let center = NotificationCenter::new();

        let result = guard_command(&center, "Inventory", || -> Result<(), PosError> {
            let _conn = db.conn()?;
            panic!("lost connection state")
        });
        assert!(result.is_err());

        let conn = db.conn().unwrap();
        let medicine_id = add_medicine(&conn, "Paracetamol", false);
        assert_eq!(inventory::get_medicine(&conn, medicine_id).unwrap().name, "Paracetamol");
    }

    // ===== AUDIT TESTS =====

    #[test]
    fn test_sales_and_voids_are_audited() {
        let conn = setup_test_db();
        let (medicine_id, _) = seed_stocked_medicine(&conn);
        let cashier = seed_user(&conn, "liam", Role::Cashier);

        let mut session = BillingSession::new();
        session.add_to_cart(&conn, medicine_id, 1).unwrap();
        let mut checkout = request(PaymentInput::cash("25.50"));
        checkout.user_id = Some(cashier.id);
        let sale = completed(session.checkout(&conn, &checkout).unwrap());
        sales::delete_sale(&conn, sale.sale.id, Some(cashier.id)).unwrap();

        let voids = audit::list(
            &conn,
            &AuditFilter {
                action: Some("sale_voided".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(voids.len(), 1);
        assert_eq!(voids[0].entity_id, Some(sale.sale.id));
        assert_eq!(voids[0].username.as_deref(), Some("liam"));

        let by_user = audit::list(
            &conn,
            &AuditFilter {
                user_id: Some(cashier.id),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(by_user.len(), 2);
        assert_eq!(by_user[0].action, "sale_voided");

        let summary = audit::action_summary(&conn, today(), today()).unwrap();
        let count_of = |action: &str| {
            summary
                .iter()
                .find(|c| c.action == action)
                .map(|c| c.count)
                .unwrap_or(0)
        };
        assert_eq!(count_of("sale_created"), 1);
        assert_eq!(count_of("stock_received"), 1);
    }

    #[test]
    fn test_prescription_dispensing_log() {
        let conn = setup_test_db();
        let rx = add_medicine(&conn, "Diazepam 5mg", true);
        add_batch(&conn, rx, "DZ-1", 120, 20, "2.00");
        let (otc, _) = seed_stocked_medicine(&conn);

        let mut session = BillingSession::new();
        session.add_to_cart(&conn, rx, 10).unwrap();
        session.add_to_cart(&conn, otc, 1).unwrap();
        session.set_prescription_ref(Some("RX-77".to_string()));
        completed(session.checkout(&conn, &request(PaymentInput::cash("45.50"))).unwrap());

        let log = audit::prescription_dispensing(&conn, today(), today()).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].medicine_id, rx);
        assert_eq!(log[0].quantity, 10);
        assert_eq!(log[0].prescription_ref.as_deref(), Some("RX-77"));
    }

    // ===== REPORT TESTS =====

    #[test]
    fn test_dashboard_and_reports() {
        let conn = setup_test_db();
        let (medicine_id, _) = seed_stocked_medicine(&conn);
        add_medicine(&conn, "Out Of Stock Syrup", false);
        let patient_id = add_patient(&conn, "Jane Doe");
        patients::approve_credit(&conn, patient_id, dec("100"), None).unwrap();
        expenses::create_expense(&conn, expense("Utilities", "30", today())).unwrap();

        let supplier = suppliers::create_supplier(
            &conn,
            CreateSupplier {
                name: "Medisupply Ltd".to_string(),
                contact_person: None,
                phone: None,
                email: None,
                address: None,
            },
        )
        .unwrap();
        suppliers::add_ledger_entry(
            &conn,
            CreateLedgerEntry {
                supplier_id: supplier.id,
                entry_type: LedgerEntryType::Purchase,
                amount: dec("75"),
                reference: None,
                notes: None,
            },
        )
        .unwrap();

        let mut session = BillingSession::new();
        session.set_patient(&conn, Some(patient_id)).unwrap();
        session.add_to_cart(&conn, medicine_id, 4).unwrap();
        completed(session.checkout(&conn, &request(PaymentInput::cash("50"))).unwrap());

        let dashboard = reports::dashboard(&conn, today(), &AppConfig::default()).unwrap();
        assert_eq!(dashboard.revenue, dec("102.00"));
        assert_eq!(dashboard.sale_count, 1);
        assert_eq!(dashboard.low_stock_count, 1);
        assert_eq!(dashboard.expiring_batch_count, 0);
        assert_eq!(dashboard.outstanding_credit, dec("52.00"));
        assert_eq!(dashboard.supplier_payables, dec("75"));
        assert_eq!(dashboard.expenses, dec("30"));

        let daily = reports::sales_report(&conn, today(), today()).unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].sale_count, 1);
        assert_eq!(daily[0].gross, dec("102.00"));
        assert_eq!(daily[0].credit, dec("52.00"));

        let top = reports::top_medicines(&conn, today(), today(), 5).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].medicine_id, medicine_id);
        assert_eq!(top[0].quantity, 4);
        assert_eq!(top[0].revenue, dec("102.00"));
    }

    #[test]
    fn test_report_range_must_be_ordered() {
        let conn = setup_test_db();
        let result = reports::sales_report(&conn, today(), today() - Duration::days(1));
        assert!(matches!(result, Err(PosError::Validation(_))));
    }

    // ===== CONFIG TESTS =====

    #[test]
    fn test_config_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();

        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.low_stock_threshold = 25;
        config.tax = TaxSettings {
            rate_percent: dec("16"),
            inclusive: true,
        };

        config.save(dir.path()).unwrap();
        assert_eq!(AppConfig::load(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_partial_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(config::CONFIG_FILE),
            r#"{ "expiry_warning_days": 30 }"#,
        )
        .unwrap();

        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(config.expiry_warning_days, 30);
        assert_eq!(config.database_file, "pharmacy.db");
    }

    #[test]
    fn test_config_rejects_out_of_range_expiry_window() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(config::CONFIG_FILE),
            r#"{ "expiry_warning_days": 200000000 }"#,
        )
        .unwrap();

        let result = AppConfig::load(dir.path());
        assert!(matches!(result, Err(PosError::Validation(_))));
    }

    #[test]
    fn test_stored_tax_settings_override_file() {
        let conn = setup_test_db();
        let config = AppConfig::default();
        assert_eq!(config.effective_tax(&conn).unwrap(), config.tax);

        let stored = TaxSettings {
            rate_percent: dec("8"),
            inclusive: true,
        };
        config::save_tax_settings(&conn, &stored).unwrap();
        assert_eq!(config.effective_tax(&conn).unwrap(), stored);

        let invalid = config::save_tax_settings(
            &conn,
            &TaxSettings {
                rate_percent: dec("150"),
                inclusive: true,
            },
        );
        assert!(matches!(invalid, Err(PosError::Validation(_))));

        conn.execute(
            "UPDATE settings SET value = 'not json' WHERE key = 'tax_settings'",
            [],
        )
        .unwrap();
        assert_eq!(config.effective_tax(&conn).unwrap(), config.tax);
    }
}
