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

//! Integration tests for package lifecycle, history and administrative
//! overrides.

use chrono::NaiveDate;
use clinic_ledger::{
    Adjustment, AuditAction, Deduction, Entity, HistoryEntry, HerbalPeriod, Ledger, LedgerError,
    NewPackage, PackageId, PackageKey, PackageKind, PackagePatch, PackageStatus, PatientId,
    StatusFilter, UsageType,
};

fn date(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, m, d).unwrap()
}

// =============================================================================
// Creation and listing
// =============================================================================

#[test]
fn create_writes_opening_record() {
    let ledger = Ledger::default();
    let package = ledger
        .create_package(NewPackage::nokryong(PatientId(3), "녹용 30회분", 30, date(5, 1)))
        .unwrap();

    assert_eq!(package.kind(), PackageKind::Nokryong);
    assert_eq!(package.name(), "녹용 30회분");
    assert_eq!(package.status, PackageStatus::Active);
    assert_eq!(package.remaining_units, 30);

    let records = ledger.packages().usage_records(package.key()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].usage_type, UsageType::Add);
    assert_eq!(records[0].count, 30);
    assert_eq!(records[0].usage_date, date(5, 1));
}

#[test]
fn herbal_period_sizes_package() {
    let ledger = Ledger::default();
    let package = ledger
        .create_package(NewPackage::herbal_for_period(
            PatientId(1),
            "귀비탕",
            HerbalPeriod::OneMonth,
            date(5, 1),
        ))
        .unwrap();
    assert_eq!(package.total_units, HerbalPeriod::OneMonth.rounds());
}

#[test]
fn invalid_requests_are_rejected() {
    let ledger = Ledger::default();
    let cases = [
        NewPackage::herbal(PatientId(1), "  ", 4, date(5, 1)),
        NewPackage::treatment(PatientId(1), "약침", 0, date(5, 1)),
        NewPackage::nokryong(PatientId(1), "녹용", 4, date(5, 10)).with_expire_date(date(5, 1)),
        NewPackage::membership(PatientId(1), "멤버십", 0, date(5, 1)),
    ];
    for new in cases {
        assert!(matches!(
            ledger.create_package(new),
            Err(LedgerError::Validation(_))
        ));
    }
    assert!(ledger.packages().snapshot().is_empty());
}

#[test]
fn listing_filters_by_status_and_kind() {
    let ledger = Ledger::default();
    let patient = PatientId(9);
    let active = ledger
        .create_package(NewPackage::herbal(patient, "A", 3, date(5, 1)))
        .unwrap()
        .key();
    let completed = ledger
        .create_package(NewPackage::treatment(patient, "B", 1, date(5, 1)))
        .unwrap()
        .key();
    let deleted = ledger
        .create_package(NewPackage::treatment(patient, "C", 2, date(5, 1)))
        .unwrap()
        .key();
    ledger
        .packages()
        .deduct(Deduction::one(completed, date(5, 2)))
        .unwrap();
    ledger.packages().delete(deleted).unwrap();

    let keys = |filter| -> Vec<PackageKey> {
        ledger
            .packages()
            .list(patient, filter)
            .iter()
            .map(|p| p.key())
            .collect()
    };
    assert_eq!(keys(StatusFilter::ACTIVE), vec![active]);
    assert_eq!(keys(StatusFilter::LIVE), vec![active, completed]);
    assert_eq!(keys(StatusFilter::ALL), vec![active, completed, deleted]);

    assert!(ledger
        .packages()
        .list_by_kind(patient, PackageKind::Treatment)
        .is_empty());
    assert!(ledger.packages().list_active(PatientId(10)).is_empty());
}

#[test]
fn lookup_with_wrong_kind_is_not_found() {
    let ledger = Ledger::default();
    let key = ledger
        .create_package(NewPackage::herbal(PatientId(1), "A", 3, date(5, 1)))
        .unwrap()
        .key();
    let wrong = PackageKey::new(PackageKind::Nokryong, key.id);
    assert_eq!(
        ledger.packages().get(wrong),
        Err(LedgerError::NotFound(Entity::Package(wrong)))
    );
    let missing = PackageKey::new(PackageKind::Herbal, PackageId(999));
    assert!(ledger.packages().history(missing).is_err());
}

// =============================================================================
// Cosmetic updates and tags
// =============================================================================

#[test]
fn patch_never_touches_balance() {
    let ledger = Ledger::default();
    let key = ledger
        .create_package(NewPackage::treatment(PatientId(1), "약침 10회", 10, date(5, 1)))
        .unwrap()
        .key();
    ledger
        .packages()
        .deduct(Deduction::one(key, date(5, 2)))
        .unwrap();

    let package = ledger
        .packages()
        .update(
            key,
            PackagePatch {
                name: Some("약침 10회 (연장)".into()),
                memo: Some("허리".into()),
                expire_date: Some(date(8, 1)),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(package.name(), "약침 10회 (연장)");
    assert_eq!(package.expire_date, Some(date(8, 1)));
    assert_eq!(package.remaining_units, 9);
    assert_eq!(ledger.packages().usage_records(key).unwrap().len(), 2);
    assert!(ledger.packages().audit_entries(key).unwrap().is_empty());
}

#[test]
fn membership_dates_move_only_by_override() {
    let ledger = Ledger::default();
    let key = ledger
        .create_package(
            NewPackage::membership(PatientId(1), "멤버십", 1, date(5, 1))
                .with_expire_date(date(5, 31)),
        )
        .unwrap()
        .key();

    let err = ledger
        .packages()
        .update(
            key,
            PackagePatch {
                expire_date: Some(date(6, 30)),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::KindMismatch { .. }));

    let before = ledger.packages().get(key).unwrap();
    let err = ledger
        .packages()
        .update(
            key,
            PackagePatch {
                label: Some("VIP".into()),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::KindMismatch {
            operation: "label patch",
            ..
        }
    ));
    assert_eq!(ledger.packages().get(key).unwrap(), before);

    let package = ledger
        .packages()
        .adjust(
            key,
            Adjustment::Period {
                start_date: date(5, 1),
                expire_date: date(6, 30),
            },
        )
        .unwrap();
    assert_eq!(package.total_units, 61);
    let audit = ledger.packages().audit_entries(key).unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(
        audit[0].description,
        "period 2020-05-01~2020-05-31 → 2020-05-01~2020-06-30"
    );
}

#[test]
fn disease_tags_are_shared_vocabulary() {
    let ledger = Ledger::default();
    let first = ledger
        .create_package(
            NewPackage::herbal(PatientId(1), "A", 4, date(5, 1))
                .with_disease_tags(["불면", "소화불량", "불면"]),
        )
        .unwrap()
        .key();
    let second = ledger
        .create_package(
            NewPackage::herbal(PatientId(2), "B", 4, date(5, 1)).with_disease_tags([" 불면 "]),
        )
        .unwrap()
        .key();

    let tags = ledger.packages().disease_tags(first).unwrap();
    assert_eq!(tags.len(), 2);
    let shared = ledger.packages().disease_tags(second).unwrap();
    assert_eq!(shared.len(), 1);
    assert!(tags.contains(&shared[0]));

    ledger
        .packages()
        .set_disease_tags(first, &[shared[0].id])
        .unwrap();
    assert_eq!(ledger.packages().disease_tags(first).unwrap(), shared);
}

// =============================================================================
// History and audit
// =============================================================================

#[test]
fn history_merges_both_streams_newest_first() {
    let ledger = Ledger::default();
    let key = ledger
        .create_package(NewPackage::herbal(PatientId(1), "시함마농", 6, date(3, 2)))
        .unwrap()
        .key();
    ledger
        .packages()
        .deduct(Deduction::one(key, date(3, 5)))
        .unwrap();
    ledger
        .packages()
        .deduct(Deduction::one(key, date(3, 4)))
        .unwrap();
    ledger
        .packages()
        .adjust(key, Adjustment::remaining(3))
        .unwrap();

    let history = ledger.packages().history(key).unwrap();
    assert_eq!(history.len(), 4);
    // The audit entry is stamped with the wall clock, later than any usage date.
    let HistoryEntry::Audit(entry) = &history[0] else {
        panic!("expected audit entry first");
    };
    assert_eq!(entry.action, AuditAction::Edit);
    assert_eq!(entry.description, "4 → 3 rounds remaining");

    let dates: Vec<NaiveDate> = history[1..].iter().map(|e| e.event_date()).collect();
    assert_eq!(dates, vec![date(3, 5), date(3, 4), date(3, 2)]);
}

#[test]
fn same_day_entries_keep_insertion_order_reversed() {
    let ledger = Ledger::default();
    let key = ledger
        .create_package(NewPackage::herbal(PatientId(1), "A", 6, date(3, 2)))
        .unwrap()
        .key();
    ledger
        .packages()
        .deduct(Deduction::one(key, date(3, 2)).with_memo("first"))
        .unwrap();
    ledger
        .packages()
        .deduct(Deduction::one(key, date(3, 2)).with_memo("second"))
        .unwrap();

    let memos: Vec<Option<String>> = ledger
        .packages()
        .history(key)
        .unwrap()
        .into_iter()
        .map(|entry| match entry {
            HistoryEntry::Usage(record) => record.memo,
            HistoryEntry::Audit(_) => None,
        })
        .collect();
    assert_eq!(
        memos,
        vec![Some("second".into()), Some("first".into()), None]
    );
}

#[test]
fn override_bounds() {
    let ledger = Ledger::default();
    let key = ledger
        .create_package(NewPackage::nokryong(PatientId(1), "녹용", 10, date(5, 1)))
        .unwrap()
        .key();

    let err = ledger
        .packages()
        .adjust(key, Adjustment::remaining(11))
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAdjustment { .. }));
    assert!(ledger.packages().audit_entries(key).unwrap().is_empty());

    let package = ledger
        .packages()
        .adjust(key, Adjustment::remaining(0))
        .unwrap();
    assert_eq!(package.status, PackageStatus::Completed);

    let package = ledger
        .packages()
        .adjust(
            key,
            Adjustment::Balance {
                remaining_units: 5,
                total_units: Some(15),
            },
        )
        .unwrap();
    assert_eq!(package.status, PackageStatus::Active);
    assert_eq!(
        (package.total_units, package.used_units, package.remaining_units),
        (15, 10, 5)
    );
    let audit = ledger.packages().audit_entries(key).unwrap();
    assert_eq!(audit[1].description, "total 10 → 15, 0 → 5 doses remaining");
}

#[test]
fn delete_is_soft_and_audited() {
    let ledger = Ledger::default();
    let key = ledger
        .create_package(NewPackage::treatment(PatientId(1), "추나 5회", 5, date(5, 1)))
        .unwrap()
        .key();

    let package = ledger.packages().delete(key).unwrap();
    assert_eq!(package.status, PackageStatus::Deleted);
    assert_eq!(ledger.packages().usage_records(key).unwrap().len(), 1);
    let audit = ledger.packages().audit_entries(key).unwrap();
    assert_eq!(audit[0].action, AuditAction::Delete);
    assert_eq!(audit[0].description, "추나 5회 deleted");

    assert!(matches!(
        ledger.packages().delete(key),
        Err(LedgerError::PackageNotActive { .. })
    ));
}

#[test]
fn close_out_keeps_balance_and_is_audited() {
    let ledger = Ledger::default();
    let key = ledger
        .create_package(NewPackage::herbal(PatientId(1), "시함마농", 6, date(5, 1)))
        .unwrap()
        .key();
    ledger
        .packages()
        .deduct(Deduction::one(key, date(5, 2)).with_count(2))
        .unwrap();

    let package = ledger.packages().complete(key).unwrap();
    assert_eq!(package.status, PackageStatus::Completed);
    assert_eq!(
        (package.total_units, package.used_units, package.remaining_units),
        (6, 2, 4)
    );
    let audit = ledger.packages().audit_entries(key).unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::Edit);
    assert_eq!(audit[0].description, "closed with 4 rounds remaining");
    assert_eq!(ledger.packages().usage_records(key).unwrap().len(), 2);

    assert!(matches!(
        ledger.packages().complete(key),
        Err(LedgerError::PackageNotActive { .. })
    ));
    assert!(matches!(
        ledger.packages().deduct(Deduction::one(key, date(5, 3))),
        Err(LedgerError::PackageNotActive { .. })
    ));
    assert!(ledger.packages().list_active(PatientId(1)).is_empty());

    let reopened = ledger.packages().top_up(key, 1, date(5, 4), None).unwrap();
    assert_eq!(reopened.status, PackageStatus::Active);
    assert_eq!(reopened.remaining_units, 5);
}

#[test]
fn deleted_package_cannot_be_closed_out() {
    let ledger = Ledger::default();
    let key = ledger
        .create_package(NewPackage::treatment(PatientId(1), "추나 5회", 5, date(5, 1)))
        .unwrap()
        .key();
    ledger.packages().delete(key).unwrap();
    assert!(matches!(
        ledger.packages().complete(key),
        Err(LedgerError::PackageNotActive {
            status: PackageStatus::Deleted,
            ..
        })
    ));
}

// =============================================================================
// Review sessions
// =============================================================================

#[test]
fn review_commit_applies_deletions_then_overrides() {
    let ledger = Ledger::default();
    let a = ledger
        .create_package(NewPackage::nokryong(PatientId(1), "A", 10, date(5, 1)))
        .unwrap()
        .key();
    let b = ledger
        .create_package(NewPackage::nokryong(PatientId(1), "B", 10, date(5, 1)))
        .unwrap()
        .key();

    let mut session = ledger.packages().review(PackageKind::Nokryong);
    session.stage(a.id, Adjustment::remaining(7));
    session.stage(b.id, Adjustment::remaining(2));
    session.mark_for_deletion(b.id);
    assert!(session.is_marked(b.id));

    let outcome = session.commit().unwrap();
    assert_eq!(outcome.deleted.len(), 1);
    assert_eq!(outcome.adjusted.len(), 1);
    assert_eq!(ledger.packages().get(a).unwrap().remaining_units, 7);
    let b_after = ledger.packages().get(b).unwrap();
    assert_eq!(b_after.status, PackageStatus::Deleted);
    assert_eq!(b_after.remaining_units, 10);
}

#[test]
fn review_with_invalid_value_writes_nothing() {
    let ledger = Ledger::default();
    let a = ledger
        .create_package(NewPackage::treatment(PatientId(1), "A", 5, date(5, 1)))
        .unwrap()
        .key();
    let b = ledger
        .create_package(NewPackage::treatment(PatientId(1), "B", 5, date(5, 1)))
        .unwrap()
        .key();

    let mut session = ledger.packages().review(PackageKind::Treatment);
    session.mark_for_deletion(a.id);
    session.stage(b.id, Adjustment::remaining(6));
    assert!(matches!(
        session.commit(),
        Err(LedgerError::InvalidAdjustment { .. })
    ));
    assert_eq!(ledger.packages().get(a).unwrap().status, PackageStatus::Active);
    assert_eq!(ledger.packages().get(b).unwrap().remaining_units, 5);
}

#[test]
fn cancelled_review_discards_changes() {
    let ledger = Ledger::default();
    let a = ledger
        .create_package(NewPackage::treatment(PatientId(1), "A", 5, date(5, 1)))
        .unwrap()
        .key();

    let mut session = ledger.packages().review(PackageKind::Treatment);
    session.stage(a.id, Adjustment::remaining(1));
    session.cancel();

    assert_eq!(ledger.packages().get(a).unwrap().remaining_units, 5);
    assert!(ledger.packages().audit_entries(a).unwrap().is_empty());
}
