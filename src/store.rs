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

//! Package store.
//!
//! Typed CRUD for the four package kinds plus the disease-tag join. Each
//! package row owns its journal and sits behind a [`RwLock`]; every write
//! goes through [`PackageStore::transact`], which stages the change on a copy
//! of the row and commits package and journal rows together only when the
//! whole operation succeeds.
//!
//! # Thread Safety
//!
//! Rows live in a [`DashMap`]. Operations on different packages proceed in
//! parallel; operations on the same package serialize on its row lock, which
//! is what makes two concurrent deductions of a last unit impossible.

use crate::base::{DiseaseTagId, LineRef, PackageId, PackageKey, PackageKind, PatientId};
use crate::collaborators::PatientInfo;
use crate::config::LedgerConfig;
use crate::error::{Entity, LedgerError};
use crate::journal::{
    AuditAction, AuditLogEntry, HistoryEntry, PackageJournal, Sequence, UsageRecord, UsageType,
};
use crate::link_registry::LinkRegistry;
use crate::package::{
    NewPackage, Package, PackageDetails, PackagePatch, PackageStatus, PackageTerms,
    default_expiry,
};
use crate::tags::{DiseaseTag, TagVocabulary};
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, instrument};

#[derive(Debug)]
struct Slot {
    package: Package,
    journal: PackageJournal,
}

/// Which lifecycle states a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFilter {
    pub active: bool,
    pub completed: bool,
    pub deleted: bool,
}

impl StatusFilter {
    pub const ACTIVE: Self = Self {
        active: true,
        completed: false,
        deleted: false,
    };

    /// Active and completed rows.
    pub const LIVE: Self = Self {
        active: true,
        completed: true,
        deleted: false,
    };

    pub const ALL: Self = Self {
        active: true,
        completed: true,
        deleted: true,
    };

    pub fn accepts(&self, status: PackageStatus) -> bool {
        match status {
            PackageStatus::Active => self.active,
            PackageStatus::Completed => self.completed,
            PackageStatus::Deleted => self.deleted,
        }
    }
}

/// A staged change to one package row.
///
/// Mutations happen on a copy of the package; usage and audit rows are
/// buffered. Nothing is visible to other callers until the enclosing
/// [`PackageStore::transact`] commits.
pub(crate) struct RowTx<'a> {
    pub(crate) package: Package,
    journal: &'a PackageJournal,
    sequence: &'a Sequence,
    usage: Vec<UsageRecord>,
    audit: Vec<AuditLogEntry>,
}

impl RowTx<'_> {
    pub(crate) fn journal(&self) -> &PackageJournal {
        self.journal
    }

    pub(crate) fn record_usage(
        &mut self,
        usage_date: NaiveDate,
        usage_type: UsageType,
        count: u32,
        external_line_ref: Option<LineRef>,
        memo: Option<String>,
    ) {
        self.usage.push(UsageRecord {
            seq: self.sequence.next(),
            package_kind: self.package.kind(),
            package_id: self.package.id,
            patient_id: self.package.patient_id,
            usage_date,
            usage_type,
            count,
            external_line_ref,
            memo,
        });
    }

    pub(crate) fn record_audit(&mut self, action: AuditAction, description: String) {
        self.audit.push(AuditLogEntry {
            seq: self.sequence.next(),
            package_kind: self.package.kind(),
            package_id: self.package.id,
            action,
            description,
            timestamp: Utc::now(),
        });
    }
}

/// Storage for prepaid packages and their history.
#[derive(Debug)]
pub struct PackageStore {
    /// Package rows indexed by id.
    rows: DashMap<PackageId, RwLock<Slot>>,
    /// Package ids per patient, in creation order.
    by_patient: DashMap<PatientId, Vec<PackageId>>,
    tags: TagVocabulary,
    links: LinkRegistry,
    sequence: Sequence,
    next_id: AtomicU64,
    default_membership_months: u32,
}

impl PackageStore {
    pub fn new(config: &LedgerConfig) -> Self {
        Self {
            rows: DashMap::new(),
            by_patient: DashMap::new(),
            tags: TagVocabulary::new(),
            links: LinkRegistry::new(),
            sequence: Sequence::default(),
            next_id: AtomicU64::new(0),
            default_membership_months: config.default_membership_months,
        }
    }

    pub fn tags(&self) -> &TagVocabulary {
        &self.tags
    }

    pub fn links(&self) -> &LinkRegistry {
        &self.links
    }

    /// Creates a package with its full balance and writes the opening
    /// `add` usage record.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] - empty name, zero units, or reversed dates.
    #[instrument(skip(self, patient, new), fields(patient = %patient.id, kind = %new.kind()))]
    pub fn create(&self, patient: &PatientInfo, new: NewPackage) -> Result<Package, LedgerError> {
        new.validate()?;

        let NewPackage {
            terms,
            total_units,
            start_date,
            expire_date,
            memo,
            ..
        } = new;

        let expire_date = match (&terms, expire_date) {
            (PackageTerms::Membership { .. }, None) => {
                default_expiry(start_date, self.default_membership_months)
            }
            (_, expire) => expire,
        };

        let details = match terms {
            PackageTerms::Herbal {
                herbal_name,
                purpose_label,
                disease_tags,
                period,
            } => {
                let mut ids: Vec<DiseaseTagId> = disease_tags
                    .iter()
                    .filter_map(|name| self.tags.find_or_create(name))
                    .map(|tag| tag.id)
                    .collect();
                ids.sort();
                ids.dedup();
                PackageDetails::Herbal {
                    herbal_name,
                    purpose_label,
                    disease_tags: ids,
                    period,
                }
            }
            PackageTerms::Nokryong {
                package_name,
                type_label,
            } => PackageDetails::Nokryong {
                package_name,
                type_label,
            },
            PackageTerms::Treatment {
                package_name,
                includes,
            } => PackageDetails::Treatment {
                package_name,
                includes,
            },
            PackageTerms::Membership {
                membership_type,
                daily_quantity,
            } => PackageDetails::Membership {
                membership_type,
                daily_quantity,
            },
        };

        let id = PackageId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let package = Package::open(
            id,
            patient,
            details,
            total_units,
            start_date,
            expire_date,
            memo,
        );

        let mut journal = PackageJournal::default();
        journal.append_usage(UsageRecord {
            seq: self.sequence.next(),
            package_kind: package.kind(),
            package_id: id,
            patient_id: package.patient_id,
            usage_date: start_date,
            usage_type: UsageType::Add,
            count: package.total_units,
            external_line_ref: None,
            memo: None,
        });

        self.rows.insert(
            id,
            RwLock::new(Slot {
                package: package.clone(),
                journal,
            }),
        );
        self.by_patient.entry(package.patient_id).or_default().push(id);

        info!(
            package = %package.key(),
            total = package.total_units,
            "Package created"
        );
        Ok(package)
    }

    /// Runs `op` against a staged copy of the row and commits it atomically.
    ///
    /// The row's write lock is held for the whole read-validate-write cycle.
    /// If `op` fails, neither the package nor its journal changes.
    pub(crate) fn transact<R>(
        &self,
        key: PackageKey,
        op: impl FnOnce(&mut RowTx<'_>) -> Result<R, LedgerError>,
    ) -> Result<R, LedgerError> {
        let row = self
            .rows
            .get(&key.id)
            .ok_or(LedgerError::NotFound(Entity::Package(key)))?;
        let mut guard = row.write();
        let slot: &mut Slot = &mut guard;
        if slot.package.kind() != key.kind {
            return Err(LedgerError::NotFound(Entity::Package(key)));
        }

        let mut tx = RowTx {
            package: slot.package.clone(),
            journal: &slot.journal,
            sequence: &self.sequence,
            usage: Vec::new(),
            audit: Vec::new(),
        };
        let output = op(&mut tx)?;

        let RowTx {
            package,
            usage,
            audit,
            ..
        } = tx;
        slot.package = package;
        for record in usage {
            slot.journal.append_usage(record);
        }
        for entry in audit {
            slot.journal.append_audit(entry);
        }
        Ok(output)
    }

    fn read<R>(&self, key: PackageKey, f: impl FnOnce(&Slot) -> R) -> Result<R, LedgerError> {
        let row = self
            .rows
            .get(&key.id)
            .ok_or(LedgerError::NotFound(Entity::Package(key)))?;
        let slot = row.read();
        if slot.package.kind() != key.kind {
            return Err(LedgerError::NotFound(Entity::Package(key)));
        }
        Ok(f(&slot))
    }

    /// Returns a snapshot of the package, whatever its status.
    pub fn get(&self, key: PackageKey) -> Result<Package, LedgerError> {
        self.read(key, |slot| slot.package.clone())
    }

    /// Cosmetic edit of name, memo, dates or label.
    ///
    /// Balance fields are untouched and no usage record is written.
    #[instrument(skip(self, patch), fields(package = %key))]
    pub fn update(&self, key: PackageKey, patch: PackagePatch) -> Result<Package, LedgerError> {
        let package = self.transact(key, |tx| {
            tx.package.apply_patch(patch)?;
            Ok(tx.package.clone())
        })?;
        debug!(package = %key, "Package updated");
        Ok(package)
    }

    /// Soft-deletes a package.
    ///
    /// The `delete` audit entry is written in the same commit as the status
    /// change. History rows are kept; the package's line-item claim is
    /// released so the line item can be linked again.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - unknown package.
    /// - [`LedgerError::PackageNotActive`] - already deleted.
    #[instrument(skip(self), fields(package = %key))]
    pub fn delete(&self, key: PackageKey) -> Result<Package, LedgerError> {
        let package = self.transact(key, |tx| {
            let description = format!("{} deleted", tx.package.name());
            tx.record_audit(AuditAction::Delete, description);
            tx.package.mark_deleted()?;
            Ok(tx.package.clone())
        })?;

        if let Some(line_ref) = package.external_line_ref {
            self.links.release(line_ref, key);
        }
        info!(package = %key, "Package deleted");
        Ok(package)
    }

    /// Marks an active package completed without touching its balance.
    ///
    /// Staff use this when a patient stops early and the rest of the balance
    /// is forfeited. Writes an `edit` audit entry; reopen with a top-up or an
    /// override.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - unknown package.
    /// - [`LedgerError::PackageNotActive`] - completed or deleted.
    #[instrument(skip(self), fields(package = %key))]
    pub fn complete(&self, key: PackageKey) -> Result<Package, LedgerError> {
        let package = self.transact(key, |tx| {
            let description = tx.package.close_out()?;
            tx.record_audit(AuditAction::Edit, description);
            Ok(tx.package.clone())
        })?;
        info!(
            package = %key,
            remaining = package.remaining_units,
            "Package closed out"
        );
        Ok(package)
    }

    /// Packages of a patient whose status passes `filter`, oldest first.
    pub fn list(&self, patient_id: PatientId, filter: StatusFilter) -> Vec<Package> {
        let ids = self
            .by_patient
            .get(&patient_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();

        ids.into_iter()
            .filter_map(|id| self.rows.get(&id).map(|row| row.read().package.clone()))
            .filter(|package| filter.accepts(package.status))
            .collect()
    }

    pub fn list_active(&self, patient_id: PatientId) -> Vec<Package> {
        self.list(patient_id, StatusFilter::ACTIVE)
    }

    pub fn list_by_kind(&self, patient_id: PatientId, kind: PackageKind) -> Vec<Package> {
        self.list(patient_id, StatusFilter::ACTIVE)
            .into_iter()
            .filter(|package| package.kind() == kind)
            .collect()
    }

    /// Every package in the store, ordered by id.
    pub fn snapshot(&self) -> Vec<Package> {
        let mut packages: Vec<Package> = self
            .rows
            .iter()
            .map(|row| row.value().read().package.clone())
            .collect();
        packages.sort_by_key(|package| package.id);
        packages
    }

    pub fn disease_tags(&self, key: PackageKey) -> Result<Vec<DiseaseTag>, LedgerError> {
        let ids = self.read(key, |slot| slot.package.disease_tags().to_vec())?;
        Ok(ids.into_iter().filter_map(|id| self.tags.get(id)).collect())
    }

    /// Replaces the package's tag set with `tag_ids` (clear-then-insert).
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - unknown package or tag id.
    /// - [`LedgerError::KindMismatch`] - not a herbal package.
    pub fn set_disease_tags(
        &self,
        key: PackageKey,
        tag_ids: &[DiseaseTagId],
    ) -> Result<(), LedgerError> {
        if let Some(missing) = tag_ids.iter().find(|id| self.tags.get(**id).is_none()) {
            return Err(LedgerError::NotFound(Entity::DiseaseTag(*missing)));
        }
        let mut ids = tag_ids.to_vec();
        ids.sort();
        ids.dedup();

        self.transact(key, |tx| tx.package.set_disease_tags(ids))?;
        debug!(package = %key, tags = tag_ids.len(), "Disease tags replaced");
        Ok(())
    }

    /// Usage and audit rows of one package, newest first.
    pub fn history(&self, key: PackageKey) -> Result<Vec<HistoryEntry>, LedgerError> {
        self.read(key, |slot| slot.journal.history())
    }

    /// Usage records of one package in insertion order.
    pub fn usage_records(&self, key: PackageKey) -> Result<Vec<UsageRecord>, LedgerError> {
        self.read(key, |slot| slot.journal.usage().to_vec())
    }

    /// Audit entries of one package in insertion order.
    pub fn audit_entries(&self, key: PackageKey) -> Result<Vec<AuditLogEntry>, LedgerError> {
        self.read(key, |slot| slot.journal.audit().to_vec())
    }
}
