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

//! Interfaces to the systems the ledger reads from but does not own.
//!
//! The billing system and the patient registry live outside this crate. The
//! in-memory implementations here back the CLI, the demo server and tests.

use crate::base::{LineRef, PatientId};
use crate::error::LedgerError;
use chrono::NaiveDate;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Display fields denormalized onto packages at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientInfo {
    pub id: PatientId,
    pub name: String,
    pub chart_number: String,
}

impl PatientInfo {
    /// Placeholder used when the registry does not know the patient.
    pub fn unknown(id: PatientId) -> Self {
        Self {
            id,
            name: String::new(),
            chart_number: String::new(),
        }
    }
}

/// A billable, non-insurance entry in the external billing system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub line_ref: LineRef,
    pub label: String,
    pub amount: Decimal,
}

pub trait PatientRegistry: Send + Sync {
    fn lookup(&self, patient_id: PatientId) -> Option<PatientInfo>;
}

/// Read-only view of the billing system.
pub trait BillingSource: Send + Sync {
    /// Uncovered line items billed to `patient_id` on `date`.
    fn fetch_uncovered_line_items(
        &self,
        patient_id: PatientId,
        date: NaiveDate,
    ) -> Result<Vec<LineItem>, LedgerError>;

    /// Resolves a line reference. `None` once the line item is gone.
    fn resolve(&self, line_ref: LineRef) -> Result<Option<LineItem>, LedgerError>;
}

/// Registry backed by a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    patients: DashMap<PatientId, PatientInfo>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, patient: PatientInfo) {
        self.patients.insert(patient.id, patient);
    }
}

impl PatientRegistry for InMemoryRegistry {
    fn lookup(&self, patient_id: PatientId) -> Option<PatientInfo> {
        self.patients.get(&patient_id).map(|p| p.value().clone())
    }
}

#[derive(Debug, Clone)]
struct BilledLine {
    patient_id: PatientId,
    date: NaiveDate,
    item: LineItem,
}

/// Billing source backed by a concurrent map of line items.
#[derive(Debug, Default)]
pub struct InMemoryBilling {
    lines: DashMap<LineRef, BilledLine>,
}

impl InMemoryBilling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, patient_id: PatientId, date: NaiveDate, item: LineItem) {
        self.lines.insert(
            item.line_ref,
            BilledLine {
                patient_id,
                date,
                item,
            },
        );
    }

    /// Drops a line item, as the billing system may do at any time.
    pub fn remove(&self, line_ref: LineRef) -> Option<LineItem> {
        self.lines.remove(&line_ref).map(|(_, line)| line.item)
    }
}

impl BillingSource for InMemoryBilling {
    fn fetch_uncovered_line_items(
        &self,
        patient_id: PatientId,
        date: NaiveDate,
    ) -> Result<Vec<LineItem>, LedgerError> {
        let mut items: Vec<LineItem> = self
            .lines
            .iter()
            .filter(|line| line.patient_id == patient_id && line.date == date)
            .map(|line| line.item.clone())
            .collect();
        items.sort_by_key(|item| item.line_ref);
        Ok(items)
    }

    fn resolve(&self, line_ref: LineRef) -> Result<Option<LineItem>, LedgerError> {
        Ok(self.lines.get(&line_ref).map(|line| line.item.clone()))
    }
}
