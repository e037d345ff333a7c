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

//! # Clinic Ledger
//!
//! Prepaid package and medicine inventory ledger for a clinic.
//!
//! Patients buy packages up front (herbal rounds, nokryong doses, treatment
//! sessions, time-bound memberships) and draw them down visit by visit. The
//! ledger keeps every balance change as an append-only usage record, every
//! staff correction as an audit entry, and links packages to the billing
//! line items they were paid with.
//!
//! ## Core Components
//!
//! - [`Ledger`]: facade wiring packages, inventory and collaborators
//! - [`PackageStore`]: package CRUD, deductions, overrides and history
//! - [`Inventory`]: medicine stock, decoction batches, dispensing, bulk import
//! - [`Reconciler`]: proposes and executes links to billing line items
//! - [`LedgerError`]: error taxonomy shared by every operation
//!
//! ## Example
//!
//! ```
//! use chrono::NaiveDate;
//! use clinic_ledger::{Deduction, Ledger, NewPackage, PackageStatus, PatientId};
//!
//! let ledger = Ledger::default();
//! let start = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
//!
//! let package = ledger
//!     .create_package(NewPackage::herbal(PatientId(1), "시함마농", 2, start))
//!     .unwrap();
//! let package = ledger
//!     .packages()
//!     .deduct(Deduction::one(package.key(), start).with_count(2))
//!     .unwrap();
//!
//! assert_eq!(package.remaining_units, 0);
//! assert_eq!(package.status, PackageStatus::Completed);
//! ```
//!
//! ## Thread Safety
//!
//! Package rows and inventory items are individually locked inside
//! [`DashMap`](dashmap::DashMap)s. A balance change holds its row's write
//! lock from validation to journal append, so two terminals racing for the
//! last unit of a package cannot both succeed.

mod adjustment;
mod base;
pub mod collaborators;
pub mod config;
mod deduction;
pub mod error;
pub mod import;
pub mod inventory;
pub mod journal;
mod ledger;
mod link_registry;
mod operation;
pub mod package;
mod reconcile;
mod store;
mod tags;

pub use adjustment::{Adjustment, ReviewOutcome, ReviewSession};
pub use base::{
    DiseaseTagId, InventoryItemId, LineRef, MedicineUsageId, PackageId, PackageKey, PackageKind,
    PatientId,
};
pub use collaborators::{
    BillingSource, InMemoryBilling, InMemoryRegistry, LineItem, PatientInfo, PatientRegistry,
};
pub use config::{LedgerConfig, MatchRule};
pub use deduction::Deduction;
pub use error::{Entity, LedgerError, LinkConflict};
pub use import::{ImportMode, ImportReport, ImportRow, RowError, RowOutcome, RowReport};
pub use inventory::{
    DecoctionBatch, Dispense, DispenseCancellation, Inventory, ItemPatch, MedicineItem,
    MedicineUsageRecord, NewMedicineItem,
};
pub use journal::{AuditAction, AuditLogEntry, HistoryEntry, UsageRecord, UsageType};
pub use ledger::Ledger;
pub use link_registry::{Claim, ClaimKind, LinkEvent, LinkRegistry};
pub use operation::Operation;
pub use package::{
    HerbalPeriod, NewPackage, Package, PackageDetails, PackagePatch, PackageStatus, PackageTerms,
};
pub use reconcile::{MatchConfidence, MatchProposal, Reconciler};
pub use store::{PackageStore, StatusFilter};
pub use tags::{DiseaseTag, TagVocabulary};
