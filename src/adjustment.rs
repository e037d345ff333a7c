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

//! Administrative overrides.
//!
//! Staff corrections that the add/deduct flow cannot express. Every override
//! writes an `edit` audit entry in the same commit as the field change, and
//! out-of-range values are rejected rather than clamped.

use crate::base::{PackageId, PackageKey, PackageKind};
use crate::error::LedgerError;
use crate::journal::AuditAction;
use crate::package::Package;
use crate::store::PackageStore;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Adjustment {
    /// Sets the remaining balance of a count package. A new total may be
    /// given alongside, which is how a completed package is reopened.
    Balance {
        remaining_units: u32,
        #[serde(default)]
        total_units: Option<u32>,
    },
    /// Moves a membership's period.
    Period {
        start_date: NaiveDate,
        expire_date: NaiveDate,
    },
}

impl Adjustment {
    pub fn remaining(remaining_units: u32) -> Self {
        Self::Balance {
            remaining_units,
            total_units: None,
        }
    }

    fn apply_to(&self, package: &mut Package) -> Result<String, LedgerError> {
        match *self {
            Self::Balance {
                remaining_units,
                total_units,
            } => package.override_balance(remaining_units, total_units),
            Self::Period {
                start_date,
                expire_date,
            } => package.override_period(start_date, expire_date),
        }
    }

    /// Dry run against a snapshot.
    pub fn check(&self, package: &Package) -> Result<(), LedgerError> {
        self.apply_to(&mut package.clone()).map(|_| ())
    }
}

impl PackageStore {
    /// Applies an administrative override and records it in the audit log.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAdjustment`] - value outside `[0, total]`, zero
    ///   total, or reversed period.
    /// - [`LedgerError::KindMismatch`] - balance override on a membership or
    ///   period override on a count package.
    /// - [`LedgerError::PackageNotActive`] - the package is deleted.
    #[instrument(skip(self), fields(package = %key))]
    pub fn adjust(&self, key: PackageKey, adjustment: Adjustment) -> Result<Package, LedgerError> {
        let result = self.transact(key, |tx| {
            let description = adjustment.apply_to(&mut tx.package)?;
            tx.record_audit(AuditAction::Edit, description);
            Ok(tx.package.clone())
        });

        match &result {
            Ok(package) => info!(
                package = %key,
                remaining = package.remaining_units,
                total = package.total_units,
                "Override applied"
            ),
            Err(err) => warn!(package = %key, error = %err, "Override rejected"),
        }
        result
    }

    /// Opens a review of the packages of one kind.
    pub fn review(&self, kind: PackageKind) -> ReviewSession<'_> {
        ReviewSession {
            store: self,
            kind,
            adjustments: BTreeMap::new(),
            deletions: BTreeSet::new(),
        }
    }
}

/// What a committed review changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewOutcome {
    pub deleted: Vec<Package>,
    pub adjusted: Vec<Package>,
}

/// Staged corrections for packages of one kind.
///
/// Nothing is written until [`commit`](Self::commit). Dropping the session,
/// or calling [`cancel`](Self::cancel), discards every staged change.
#[derive(Debug)]
pub struct ReviewSession<'a> {
    store: &'a PackageStore,
    kind: PackageKind,
    adjustments: BTreeMap<PackageId, Adjustment>,
    deletions: BTreeSet<PackageId>,
}

impl ReviewSession<'_> {
    pub fn kind(&self) -> PackageKind {
        self.kind
    }

    /// Stages an override, replacing any earlier one for the same package.
    pub fn stage(&mut self, id: PackageId, adjustment: Adjustment) {
        self.adjustments.insert(id, adjustment);
    }

    pub fn unstage(&mut self, id: PackageId) -> Option<Adjustment> {
        self.adjustments.remove(&id)
    }

    pub fn mark_for_deletion(&mut self, id: PackageId) {
        self.deletions.insert(id);
    }

    pub fn unmark(&mut self, id: PackageId) -> bool {
        self.deletions.remove(&id)
    }

    pub fn is_marked(&self, id: PackageId) -> bool {
        self.deletions.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.adjustments.is_empty() && self.deletions.is_empty()
    }

    /// Validates every staged override, then applies deletions followed by
    /// overrides. A package marked for deletion drops its staged override.
    ///
    /// If validation fails nothing is written. A concurrent change between
    /// validation and apply can still make an individual write fail; earlier
    /// writes of the batch are kept in that case.
    pub fn commit(self) -> Result<ReviewOutcome, LedgerError> {
        let Self {
            store,
            kind,
            mut adjustments,
            deletions,
        } = self;
        adjustments.retain(|id, _| !deletions.contains(id));

        for id in &deletions {
            store.get(PackageKey::new(kind, *id))?;
        }
        for (id, adjustment) in &adjustments {
            let package = store.get(PackageKey::new(kind, *id))?;
            adjustment.check(&package)?;
        }

        let mut outcome = ReviewOutcome::default();
        for id in deletions {
            outcome.deleted.push(store.delete(PackageKey::new(kind, id))?);
        }
        for (id, adjustment) in adjustments {
            outcome
                .adjusted
                .push(store.adjust(PackageKey::new(kind, id), adjustment)?);
        }
        info!(
            kind = %kind,
            deleted = outcome.deleted.len(),
            adjusted = outcome.adjusted.len(),
            "Review committed"
        );
        Ok(outcome)
    }

    pub fn cancel(self) {}
}
