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

//! Deduction engine: the only path that moves a package balance in normal
//! use.
//!
//! Each operation runs inside [`PackageStore::transact`], so the balance
//! change, the status transition, the usage record and any line-item claim
//! are committed together or not at all.

use crate::base::{LineRef, PackageId, PackageKey, PackageKind};
use crate::error::LedgerError;
use crate::journal::UsageType;
use crate::link_registry::{Claim, ClaimKind};
use crate::package::{Package, PackageDetails};
use crate::store::PackageStore;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// A request to consume units of a count package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deduction {
    pub package: PackageKey,
    #[serde(default = "Deduction::default_count")]
    pub count: u32,
    pub usage_date: NaiveDate,
    #[serde(default)]
    pub external_line_ref: Option<LineRef>,
    #[serde(default)]
    pub memo: Option<String>,
}

impl Deduction {
    fn default_count() -> u32 {
        1
    }

    /// A single-unit deduction.
    pub fn one(package: PackageKey, usage_date: NaiveDate) -> Self {
        Self {
            package,
            count: 1,
            usage_date,
            external_line_ref: None,
            memo: None,
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_line_ref(mut self, line_ref: LineRef) -> Self {
        self.external_line_ref = Some(line_ref);
        self
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }
}

impl PackageStore {
    /// Consumes `count` units.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - unknown package.
    /// - [`LedgerError::KindMismatch`] - the package is a membership.
    /// - [`LedgerError::PackageNotActive`] - completed or deleted.
    /// - [`LedgerError::InsufficientBalance`] - fewer than `count` units left.
    /// - [`LedgerError::AlreadyLinked`] - the tagged line item is already held.
    ///
    /// On any error the package, its journal and the claim index are unchanged.
    #[instrument(skip(self, deduction), fields(package = %deduction.package, count = deduction.count))]
    pub fn deduct(&self, deduction: Deduction) -> Result<Package, LedgerError> {
        let Deduction {
            package: key,
            count,
            usage_date,
            external_line_ref,
            memo,
        } = deduction;

        let result = self.transact(key, |tx| {
            tx.package.deduct(count)?;
            tx.record_usage(usage_date, UsageType::Deduct, count, external_line_ref, memo);
            // Last fallible step: once the claim is in, the commit cannot fail.
            if let Some(line_ref) = external_line_ref {
                self.links().claim(
                    line_ref,
                    Claim {
                        holder: key,
                        kind: ClaimKind::Deduction,
                    },
                )?;
            }
            Ok(tx.package.clone())
        });

        match &result {
            Ok(package) => info!(
                package = %key,
                remaining = package.remaining_units,
                status = %package.status,
                "Deduction applied"
            ),
            Err(err) => warn!(package = %key, error = %err, "Deduction rejected"),
        }
        result
    }

    /// Adds `count` units to a count package, reopening it if completed.
    #[instrument(skip(self, memo), fields(package = %key))]
    pub fn top_up(
        &self,
        key: PackageKey,
        count: u32,
        usage_date: NaiveDate,
        memo: Option<String>,
    ) -> Result<Package, LedgerError> {
        let package = self.transact(key, |tx| {
            tx.package.top_up(count)?;
            tx.record_usage(usage_date, UsageType::Add, count, None, memo);
            Ok(tx.package.clone())
        })?;
        info!(package = %key, total = package.total_units, "Top-up applied");
        Ok(package)
    }

    /// Records a membership entitlement against a billing line item.
    ///
    /// The balance is untouched. At most `daily_quantity` applies may be
    /// recorded per usage date.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::PackageNotActive`] - completed or deleted membership.
    /// - [`LedgerError::MembershipExpired`] - `usage_date` is past the expiry.
    /// - [`LedgerError::Validation`] - `usage_date` is before the start date.
    /// - [`LedgerError::InsufficientBalance`] - the day's quota is used up.
    /// - [`LedgerError::AlreadyLinked`] - the line item already has a package.
    #[instrument(skip(self, memo), fields(membership = %membership, line_ref = %line_ref))]
    pub fn apply_membership(
        &self,
        membership: PackageId,
        line_ref: LineRef,
        usage_date: NaiveDate,
        memo: Option<String>,
    ) -> Result<Package, LedgerError> {
        let key = PackageKey::new(PackageKind::Membership, membership);

        let result = self.transact(key, |tx| {
            tx.package.ensure_active()?;
            if let Some(expired_on) = tx.package.expire_date.filter(|e| usage_date > *e) {
                return Err(LedgerError::MembershipExpired {
                    package: key,
                    expired_on,
                });
            }
            if usage_date < tx.package.start_date {
                return Err(LedgerError::Validation(format!(
                    "membership starts on {}, not yet valid on {usage_date}",
                    tx.package.start_date
                )));
            }
            let daily_quantity = match tx.package.details {
                PackageDetails::Membership { daily_quantity, .. } => daily_quantity,
                _ => 0,
            };
            let used_today = tx.journal().applies_on(usage_date);
            if used_today >= daily_quantity {
                return Err(LedgerError::InsufficientBalance {
                    package: key,
                    requested: 1,
                    available: daily_quantity.saturating_sub(used_today),
                });
            }

            tx.record_usage(usage_date, UsageType::Apply, 1, Some(line_ref), memo);
            self.links().claim(
                line_ref,
                Claim {
                    holder: key,
                    kind: ClaimKind::Apply,
                },
            )?;
            Ok(tx.package.clone())
        });

        match &result {
            Ok(_) => info!(membership = %key, line_ref = %line_ref, "Membership applied"),
            Err(err) => warn!(membership = %key, error = %err, "Membership apply rejected"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::PatientId;
    use crate::collaborators::PatientInfo;
    use crate::config::LedgerConfig;
    use crate::error::LinkConflict;
    use crate::package::{NewPackage, PackageStatus};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, d).unwrap()
    }

    fn setup() -> PackageStore {
        PackageStore::new(&LedgerConfig::default())
    }

    fn herbal(store: &PackageStore, total: u32) -> PackageKey {
        store
            .create(
                &PatientInfo::unknown(PatientId(1)),
                NewPackage::herbal(PatientId(1), "시함마농", total, date(1)),
            )
            .unwrap()
            .key()
    }

    fn membership(store: &PackageStore, daily: u32) -> PackageId {
        store
            .create(
                &PatientInfo::unknown(PatientId(1)),
                NewPackage::membership(PatientId(1), "경근멤버십", daily, date(1))
                    .with_expire_date(date(31)),
            )
            .unwrap()
            .id
    }

    #[test]
    fn batch_deduction_consumes_count() {
        let store = setup();
        let key = herbal(&store, 6);
        let package = store
            .deduct(Deduction::one(key, date(2)).with_count(4))
            .unwrap();
        assert_eq!(package.remaining_units, 2);
        assert_eq!(package.used_units, 4);
    }

    #[test]
    fn tagged_deduction_claims_line_item() {
        let store = setup();
        let first = herbal(&store, 6);
        let second = herbal(&store, 6);
        store
            .deduct(Deduction::one(first, date(2)).with_line_ref(LineRef(77)))
            .unwrap();

        let result = store.deduct(Deduction::one(second, date(2)).with_line_ref(LineRef(77)));
        assert_eq!(
            result,
            Err(LedgerError::AlreadyLinked(LinkConflict::LineItem {
                line_ref: LineRef(77),
                holder: first,
            }))
        );
        // The rejected deduction left no trace.
        assert_eq!(store.get(second).unwrap().remaining_units, 6);
        assert_eq!(store.usage_records(second).unwrap().len(), 1);
    }

    #[test]
    fn top_up_writes_add_record() {
        let store = setup();
        let key = herbal(&store, 1);
        store.deduct(Deduction::one(key, date(2))).unwrap();
        assert_eq!(store.get(key).unwrap().status, PackageStatus::Completed);

        let package = store.top_up(key, 2, date(3), None).unwrap();
        assert_eq!(package.status, PackageStatus::Active);
        assert_eq!(package.remaining_units, 2);
        let records = store.usage_records(key).unwrap();
        assert_eq!(records.last().unwrap().usage_type, UsageType::Add);
        assert_eq!(records.last().unwrap().count, 2);
    }

    #[test]
    fn membership_apply_respects_daily_quantity() {
        let store = setup();
        let id = membership(&store, 1);
        store
            .apply_membership(id, LineRef(1), date(5), None)
            .unwrap();
        let result = store.apply_membership(id, LineRef(2), date(5), None);
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientBalance { available: 0, .. })
        ));
        store
            .apply_membership(id, LineRef(2), date(6), None)
            .unwrap();

        let key = PackageKey::new(PackageKind::Membership, id);
        let package = store.get(key).unwrap();
        assert_eq!(package.remaining_units, package.total_units);
    }

    #[test]
    fn membership_apply_after_expiry_is_rejected() {
        let store = setup();
        let id = membership(&store, 2);
        let late = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let result = store.apply_membership(id, LineRef(3), late, None);
        assert_eq!(
            result,
            Err(LedgerError::MembershipExpired {
                package: PackageKey::new(PackageKind::Membership, id),
                expired_on: date(31),
            })
        );
        assert!(!store.links().is_claimed(LineRef(3)));
    }

    #[test]
    fn membership_apply_rejects_linked_line_item() {
        let store = setup();
        let id = membership(&store, 3);
        store
            .apply_membership(id, LineRef(4), date(5), None)
            .unwrap();
        let result = store.apply_membership(id, LineRef(4), date(6), None);
        assert!(matches!(result, Err(LedgerError::AlreadyLinked(_))));
        let key = PackageKey::new(PackageKind::Membership, id);
        assert_eq!(store.usage_records(key).unwrap().len(), 2);
    }

    #[test]
    fn apply_on_count_package_key_is_not_found() {
        let store = setup();
        let key = herbal(&store, 2);
        let result = store.apply_membership(key.id, LineRef(5), date(5), None);
        assert!(matches!(result, Err(LedgerError::NotFound(_))));
    }
}
