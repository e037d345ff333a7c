// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Property-based tests for the ledger.
//!
//! These tests verify invariants that hold for any sequence of operations,
//! accepted or rejected.

use chrono::NaiveDate;
use clinic_ledger::{
    Adjustment, Deduction, Dispense, InMemoryBilling, InMemoryRegistry, Ledger, LedgerConfig,
    LedgerError, LineItem, LineRef, NewMedicineItem, NewPackage, PackageKey, PackageStatus,
    PatientId, UsageType,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

fn day(offset: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 1).unwrap() + chrono::Days::new(u64::from(offset))
}

// =============================================================================
// Arbitrary Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum PackageOp {
    Deduct(u32),
    TopUp(u32),
    Override(u32),
}

fn arb_package_op() -> impl Strategy<Value = PackageOp> {
    prop_oneof![
        6 => (0u32..6).prop_map(PackageOp::Deduct),
        2 => (0u32..6).prop_map(PackageOp::TopUp),
        1 => (0u32..20).prop_map(PackageOp::Override),
    ]
}

fn arb_balance_op() -> impl Strategy<Value = PackageOp> {
    prop_oneof![
        3 => (0u32..6).prop_map(PackageOp::Deduct),
        1 => (0u32..6).prop_map(PackageOp::TopUp),
    ]
}

fn apply(
    ledger: &Ledger,
    key: PackageKey,
    op: &PackageOp,
    date: NaiveDate,
) -> Result<(), LedgerError> {
    match *op {
        PackageOp::Deduct(count) => ledger
            .packages()
            .deduct(Deduction::one(key, date).with_count(count))
            .map(|_| ()),
        PackageOp::TopUp(count) => ledger.packages().top_up(key, count, date, None).map(|_| ()),
        PackageOp::Override(remaining) => ledger
            .packages()
            .adjust(key, Adjustment::remaining(remaining))
            .map(|_| ()),
    }
}

fn herbal(ledger: &Ledger, total: u32) -> PackageKey {
    ledger
        .create_package(NewPackage::herbal(PatientId(1), "A", total, day(0)))
        .unwrap()
        .key()
}

// =============================================================================
// Package Invariant Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// remaining == total - used, and status follows the balance.
    #[test]
    fn balance_identity_holds(
        total in 1u32..20,
        ops in prop::collection::vec(arb_package_op(), 0..30),
    ) {
        let ledger = Ledger::default();
        let key = herbal(&ledger, total);

        for (i, op) in ops.iter().enumerate() {
            let before = ledger.packages().get(key).unwrap();
            let result = apply(&ledger, key, op, day(i as u32 + 1));
            let after = ledger.packages().get(key).unwrap();

            prop_assert_eq!(after.remaining_units, after.total_units - after.used_units);
            prop_assert_eq!(
                after.status == PackageStatus::Completed,
                after.remaining_units == 0
            );
            if result.is_err() {
                prop_assert_eq!(&before, &after);
            }
        }
    }

    /// Without overrides, the usage records explain the balance exactly.
    #[test]
    fn usage_records_sum_to_balance(
        total in 1u32..20,
        ops in prop::collection::vec(arb_balance_op(), 0..30),
    ) {
        let ledger = Ledger::default();
        let key = herbal(&ledger, total);
        for (i, op) in ops.iter().enumerate() {
            let _ = apply(&ledger, key, op, day(i as u32 + 1));
        }

        let package = ledger.packages().get(key).unwrap();
        let records = ledger.packages().usage_records(key).unwrap();
        let sum = |kind: UsageType| -> u32 {
            records.iter().filter(|r| r.usage_type == kind).map(|r| r.count).sum()
        };
        prop_assert_eq!(sum(UsageType::Add), package.total_units);
        prop_assert_eq!(sum(UsageType::Deduct), package.used_units);
    }

    /// Deductions never take more than the balance, whatever the order.
    #[test]
    fn cannot_overdraw(
        total in 1u32..10,
        counts in prop::collection::vec(1u32..5, 1..10),
    ) {
        let ledger = Ledger::default();
        let key = herbal(&ledger, total);

        let mut expected_used = 0u32;
        for (i, count) in counts.iter().enumerate() {
            let result = ledger
                .packages()
                .deduct(Deduction::one(key, day(i as u32 + 1)).with_count(*count));
            if expected_used + count <= total {
                prop_assert!(result.is_ok());
                expected_used += count;
            } else {
                prop_assert!(result.is_err());
            }
        }
        prop_assert_eq!(ledger.packages().get(key).unwrap().used_units, expected_used);
    }
}

// =============================================================================
// Inventory Invariant Tests
// =============================================================================

#[derive(Debug, Clone)]
enum StockOp {
    Batch(u32),
    Dispense(u32),
    Cancel(usize),
}

fn arb_stock_op() -> impl Strategy<Value = StockOp> {
    prop_oneof![
        (0u32..30).prop_map(StockOp::Batch),
        (0u32..30).prop_map(StockOp::Dispense),
        (0usize..8).prop_map(StockOp::Cancel),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// 0 <= current <= total after any batch, dispense or cancellation.
    #[test]
    fn stock_stays_within_bounds(
        initial in 0u32..20,
        ops in prop::collection::vec(arb_stock_op(), 0..40),
    ) {
        let ledger = Ledger::default();
        let inventory = ledger.inventory();
        let item = inventory
            .add_item(NewMedicineItem::named("공진단").with_stock(initial, initial))
            .unwrap();

        let mut dispensed = Vec::new();
        for (i, op) in ops.iter().enumerate() {
            match *op {
                StockOp::Batch(packs) => {
                    let _ = inventory.produce_batch(item.id, packs, packs, day(i as u32), None);
                }
                StockOp::Dispense(quantity) => {
                    if let Ok(record) = inventory.dispense(Dispense {
                        item: item.id,
                        patient_id: PatientId(1),
                        quantity,
                        usage_date: day(i as u32),
                        purpose: None,
                        memo: None,
                    }) {
                        dispensed.push(record.id);
                    }
                }
                StockOp::Cancel(index) => {
                    if let Some(id) = dispensed.get(index) {
                        let _ = inventory.cancel_dispense(*id);
                    }
                }
            }
            let item = inventory.get(item.id).unwrap();
            prop_assert!(item.current_stock <= item.total_stock);
        }
    }
}

// =============================================================================
// Link Uniqueness Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// A line item ends up referenced by at most one package.
    #[test]
    fn line_item_has_one_holder(
        attempts in prop::collection::vec((0usize..4, 1u64..5), 1..20),
    ) {
        let billing = Arc::new(InMemoryBilling::new());
        let ledger = Ledger::new(
            LedgerConfig::default(),
            Arc::new(InMemoryRegistry::new()),
            billing.clone(),
        );
        for line_ref in 1..5 {
            billing.insert(PatientId(1), day(0), LineItem {
                line_ref: LineRef(line_ref),
                label: "한약".into(),
                amount: Decimal::new(100_000, 0),
            });
        }
        let keys: Vec<PackageKey> = (0..4).map(|_| herbal(&ledger, 5)).collect();

        for (package, line_ref) in attempts {
            let _ = ledger.link(keys[package], LineRef(line_ref));
        }

        let mut holders: HashMap<LineRef, usize> = HashMap::new();
        for key in &keys {
            if let Some(line_ref) = ledger.packages().get(*key).unwrap().external_line_ref {
                *holders.entry(line_ref).or_default() += 1;
                prop_assert_eq!(
                    ledger.packages().links().holder(line_ref).map(|c| c.holder),
                    Some(*key)
                );
            }
        }
        prop_assert!(holders.values().all(|count| *count == 1));
    }
}
