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

//! Ledger facade.
//!
//! The [`Ledger`] wires the package store, the inventory and the two
//! external collaborators together behind one handle that is cheap to share
//! between threads.
//!
//! # Operations
//!
//! - **Packages**: create, patch, soft-delete, list and history through
//!   [`Ledger::packages`].
//! - **Balance**: deduct, top up, membership apply and overrides, either
//!   directly on the store or as [`Operation`]s through [`Ledger::process`].
//! - **Inventory**: batches, dispensing and bulk import through
//!   [`Ledger::inventory`].
//! - **Reconciliation**: proposals and links against the billing system.
//!
//! # Thread Safety
//!
//! All state lives in [`DashMap`](dashmap::DashMap)s of individually locked
//! rows, so operations on different packages and items run in parallel.

use crate::base::{LineRef, PackageKey, PatientId};
use crate::collaborators::{
    BillingSource, InMemoryBilling, InMemoryRegistry, PatientInfo, PatientRegistry,
};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::inventory::Inventory;
use crate::link_registry::LinkEvent;
use crate::operation::Operation;
use crate::package::{NewPackage, Package};
use crate::reconcile::{MatchProposal, Reconciler};
use crate::store::PackageStore;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, warn};

/// Clinic package and inventory ledger.
///
/// # Invariants
///
/// - Count packages keep `remaining == total - used` after every operation.
/// - Every balance change has exactly one usage record, committed with it.
/// - A billing line item is referenced by at most one package.
/// - Inventory `current_stock` never exceeds `total_stock` and never goes
///   below zero.
pub struct Ledger {
    config: LedgerConfig,
    packages: PackageStore,
    inventory: Inventory,
    registry: Arc<dyn PatientRegistry>,
    billing: Arc<dyn BillingSource>,
}

impl Ledger {
    pub fn new(
        config: LedgerConfig,
        registry: Arc<dyn PatientRegistry>,
        billing: Arc<dyn BillingSource>,
    ) -> Self {
        Ledger {
            packages: PackageStore::new(&config),
            inventory: Inventory::new(&config),
            config,
            registry,
            billing,
        }
    }

    /// A ledger with empty in-memory collaborators.
    pub fn in_memory(config: LedgerConfig) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryRegistry::new()),
            Arc::new(InMemoryBilling::new()),
        )
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn packages(&self) -> &PackageStore {
        &self.packages
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Creates a package, copying the patient's display fields from the
    /// registry. Unknown patients are accepted with blank display fields.
    pub fn create_package(&self, new: NewPackage) -> Result<Package, LedgerError> {
        let patient = self.patient(new.patient_id);
        self.packages.create(&patient, new)
    }

    fn patient(&self, patient_id: PatientId) -> PatientInfo {
        self.registry.lookup(patient_id).unwrap_or_else(|| {
            warn!(patient = %patient_id, "Patient not in registry; display fields left blank");
            PatientInfo::unknown(patient_id)
        })
    }

    pub fn reconciler(&self) -> Reconciler<'_> {
        Reconciler::new(&self.packages, &*self.billing, &self.config.match_rules)
    }

    pub fn propose_matches(
        &self,
        patient_id: PatientId,
        date: NaiveDate,
    ) -> Result<Vec<MatchProposal>, LedgerError> {
        self.reconciler().propose_matches(patient_id, date)
    }

    pub fn link(&self, key: PackageKey, line_ref: LineRef) -> Result<Package, LedgerError> {
        self.reconciler().link(key, line_ref)
    }

    /// Applies one package operation.
    ///
    /// | Operation | Behavior |
    /// |-----------|----------|
    /// | Create | New active package with an opening `add` record |
    /// | Deduct | Consumes units; completes the package at zero |
    /// | TopUp | Adds units; reopens a completed package |
    /// | Apply | Records a membership use against a line item |
    /// | Adjust | Administrative override with an audit entry |
    /// | Update | Cosmetic patch; no usage record |
    /// | Delete | Soft delete with an audit entry |
    /// | Link | Sets the package's billing line reference |
    ///
    /// # Errors
    ///
    /// Whatever the underlying operation returns; on error nothing changed.
    pub fn process(&self, operation: Operation) -> Result<Package, LedgerError> {
        debug!(op = operation.name(), package = ?operation.package(), "Processing operation");
        match operation {
            Operation::Create(new) => self.create_package(new),
            Operation::Deduct(deduction) => self.packages.deduct(deduction),
            Operation::TopUp {
                package,
                count,
                usage_date,
                memo,
            } => self.packages.top_up(package, count, usage_date, memo),
            Operation::Apply {
                membership,
                line_ref,
                usage_date,
                memo,
            } => self
                .packages
                .apply_membership(membership, line_ref, usage_date, memo),
            Operation::Adjust {
                package,
                adjustment,
            } => self.packages.adjust(package, adjustment),
            Operation::Update { package, patch } => self.packages.update(package, patch),
            Operation::Complete { package } => self.packages.complete(package),
            Operation::Delete { package } => self.packages.delete(package),
            Operation::Link { package, line_ref } => self.link(package, line_ref),
        }
    }

    /// Takes pending line-item claim changes, oldest first.
    pub fn drain_link_events(&self) -> Vec<LinkEvent> {
        self.packages.links().drain_events()
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::in_memory(LedgerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{PackageKind, PatientId};
    use crate::deduction::Deduction;
    use crate::link_registry::ClaimKind;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, d).unwrap()
    }

    #[test]
    fn registry_fields_are_denormalized() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.insert(PatientInfo {
            id: PatientId(7),
            name: "이영희".into(),
            chart_number: "0007".into(),
        });
        let ledger = Ledger::new(
            LedgerConfig::default(),
            registry,
            Arc::new(InMemoryBilling::new()),
        );

        let known = ledger
            .create_package(NewPackage::treatment(PatientId(7), "약침 10회", 10, date(1)))
            .unwrap();
        assert_eq!(known.patient_name, "이영희");
        assert_eq!(known.chart_number, "0007");

        let unknown = ledger
            .create_package(NewPackage::treatment(PatientId(8), "약침 10회", 10, date(1)))
            .unwrap();
        assert_eq!(unknown.patient_name, "");
    }

    #[test]
    fn process_routes_operations() {
        let ledger = Ledger::default();
        let package = ledger
            .process(Operation::Create(NewPackage::herbal(
                PatientId(1),
                "시함마농",
                3,
                date(1),
            )))
            .unwrap();
        let key = package.key();
        assert_eq!(key.kind, PackageKind::Herbal);

        let package = ledger
            .process(Operation::Deduct(Deduction::one(key, date(2))))
            .unwrap();
        assert_eq!(package.remaining_units, 2);

        let package = ledger.process(Operation::Delete { package: key }).unwrap();
        assert!(!package.is_active());
        assert!(ledger.packages().list_active(PatientId(1)).is_empty());
    }

    #[test]
    fn link_events_are_drained_in_order() {
        let billing = Arc::new(InMemoryBilling::new());
        let ledger = Ledger::new(
            LedgerConfig::default(),
            Arc::new(InMemoryRegistry::new()),
            billing.clone(),
        );
        let key = ledger
            .create_package(NewPackage::herbal(PatientId(1), "A", 2, date(1)))
            .unwrap()
            .key();
        billing.insert(
            PatientId(1),
            date(1),
            crate::collaborators::LineItem {
                line_ref: LineRef(1),
                label: "한약".into(),
                amount: rust_decimal::Decimal::new(300000, 0),
            },
        );
        ledger.link(key, LineRef(1)).unwrap();
        ledger.packages().delete(key).unwrap();

        let events = ledger.drain_link_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            LinkEvent::Claimed { claim, .. } if claim.kind == ClaimKind::Purchase
        ));
        assert!(matches!(events[1], LinkEvent::Released { .. }));
    }
}
