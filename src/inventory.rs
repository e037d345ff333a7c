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

//! Medicine inventory ledger.
//!
//! Physical stock counterpart of the package ledger. Production batches add
//! to both `current_stock` and `total_stock`; dispensing takes from
//! `current_stock` only and never below zero.
//!
//! # Locking
//!
//! Lock order is: commit gate, then item row, then the usage and
//! cancellation maps. Single-item operations hold the gate shared; bulk
//! import holds it exclusively so its valid rows land together.

use crate::base::{InventoryItemId, MedicineUsageId, PatientId};
use crate::config::LedgerConfig;
use crate::error::{Entity, LedgerError};
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::{debug, info, instrument, warn};

/// Unit used when none is given.
pub const DEFAULT_UNIT: &str = "개";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicineItem {
    pub id: InventoryItemId,
    pub name: String,
    pub alias: Option<String>,
    pub category: Option<String>,
    pub unit: String,
    pub current_stock: u32,
    /// Cumulative produced stock. Never decreases through normal flow.
    pub total_stock: u32,
    pub doses_per_batch: Option<u32>,
    pub packs_per_batch: Option<u32>,
    pub last_decoction_date: Option<NaiveDate>,
    pub is_active: bool,
}

impl MedicineItem {
    fn assert_invariants(&self) {
        debug_assert!(
            self.current_stock <= self.total_stock,
            "Invariant violated: current stock {} exceeds total {}",
            self.current_stock,
            self.total_stock
        );
    }
}

/// Request to register an inventory item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMedicineItem {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub current_stock: u32,
    #[serde(default)]
    pub total_stock: u32,
    #[serde(default)]
    pub doses_per_batch: Option<u32>,
    #[serde(default)]
    pub packs_per_batch: Option<u32>,
    #[serde(default)]
    pub last_decoction_date: Option<NaiveDate>,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
}

fn active_by_default() -> bool {
    true
}

impl NewMedicineItem {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            category: None,
            unit: None,
            current_stock: 0,
            total_stock: 0,
            doses_per_batch: None,
            packs_per_batch: None,
            last_decoction_date: None,
            is_active: true,
        }
    }

    pub fn with_stock(mut self, current_stock: u32, total_stock: u32) -> Self {
        self.current_stock = current_stock;
        self.total_stock = total_stock;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_batch_size(mut self, doses: u32, packs: u32) -> Self {
        self.doses_per_batch = Some(doses);
        self.packs_per_batch = Some(packs);
        self
    }

    fn validate(&self) -> Result<(), LedgerError> {
        if self.name.trim().is_empty() {
            return Err(LedgerError::Validation("medicine name is required".into()));
        }
        if self.current_stock > self.total_stock {
            return Err(LedgerError::Validation(format!(
                "current stock {} exceeds cumulative stock {}",
                self.current_stock, self.total_stock
            )));
        }
        Ok(())
    }

    fn into_item(self, id: InventoryItemId) -> MedicineItem {
        MedicineItem {
            id,
            name: self.name.trim().to_string(),
            alias: self.alias,
            category: self.category,
            unit: self.unit.unwrap_or_else(|| DEFAULT_UNIT.to_string()),
            current_stock: self.current_stock,
            total_stock: self.total_stock,
            doses_per_batch: self.doses_per_batch,
            packs_per_batch: self.packs_per_batch,
            last_decoction_date: self.last_decoction_date,
            is_active: self.is_active,
        }
    }
}

/// Configuration edit. Stock fields move only through batches and
/// dispensing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub doses_per_batch: Option<u32>,
    #[serde(default)]
    pub packs_per_batch: Option<u32>,
}

/// Immutable record of one production run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoctionBatch {
    pub inventory_item_id: InventoryItemId,
    pub doses: u32,
    pub packs: u32,
    pub decoction_date: NaiveDate,
    pub memo: Option<String>,
}

/// Request to hand stock to a patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispense {
    pub item: InventoryItemId,
    pub patient_id: PatientId,
    pub quantity: u32,
    pub usage_date: NaiveDate,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub memo: Option<String>,
}

/// Immutable record of one dispensing event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicineUsageRecord {
    pub id: MedicineUsageId,
    /// `None` for medicines not tracked in inventory.
    pub inventory_item_id: Option<InventoryItemId>,
    pub medicine_name: String,
    pub patient_id: PatientId,
    pub quantity: u32,
    pub usage_date: NaiveDate,
    pub purpose: Option<String>,
    pub memo: Option<String>,
}

/// Reversal of a dispensing event. The usage record itself is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispenseCancellation {
    pub usage_id: MedicineUsageId,
    pub inventory_item_id: Option<InventoryItemId>,
    pub restored: u32,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug)]
struct ItemRow {
    item: MedicineItem,
    batches: Vec<DecoctionBatch>,
}

/// Concurrent inventory store.
#[derive(Debug)]
pub struct Inventory {
    gate: RwLock<()>,
    items: DashMap<InventoryItemId, RwLock<ItemRow>>,
    /// Exact name to id. Names are unique.
    names: DashMap<String, InventoryItemId>,
    usage: DashMap<MedicineUsageId, MedicineUsageRecord>,
    cancellations: DashMap<MedicineUsageId, DispenseCancellation>,
    next_item_id: AtomicU32,
    next_usage_id: AtomicU64,
    low_stock_threshold: u32,
}

impl Inventory {
    pub fn new(config: &LedgerConfig) -> Self {
        Self {
            gate: RwLock::new(()),
            items: DashMap::new(),
            names: DashMap::new(),
            usage: DashMap::new(),
            cancellations: DashMap::new(),
            next_item_id: AtomicU32::new(0),
            next_usage_id: AtomicU64::new(0),
            low_stock_threshold: config.low_stock_threshold,
        }
    }

    /// Registers a new item.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] - blank or duplicate name, or current
    ///   stock above cumulative stock.
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub fn add_item(&self, new: NewMedicineItem) -> Result<MedicineItem, LedgerError> {
        new.validate()?;
        let _gate = self.gate.read();
        let item = self.insert_item(new)?;
        info!(item = %item.id, name = %item.name, "Inventory item added");
        Ok(item)
    }

    /// Inserts under an already held gate.
    pub(crate) fn insert_item(&self, new: NewMedicineItem) -> Result<MedicineItem, LedgerError> {
        let name = new.name.trim().to_string();
        match self.names.entry(name) {
            Entry::Occupied(entry) => Err(LedgerError::Validation(format!(
                "medicine '{}' already exists",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                let id = InventoryItemId(self.next_item_id.fetch_add(1, Ordering::Relaxed) + 1);
                let item = new.into_item(id);
                item.assert_invariants();
                self.items.insert(
                    id,
                    RwLock::new(ItemRow {
                        item: item.clone(),
                        batches: Vec::new(),
                    }),
                );
                entry.insert(id);
                Ok(item)
            }
        }
    }

    pub fn get(&self, id: InventoryItemId) -> Result<MedicineItem, LedgerError> {
        self.items
            .get(&id)
            .map(|row| row.read().item.clone())
            .ok_or(LedgerError::NotFound(Entity::InventoryItem(id)))
    }

    /// Items sorted by name.
    pub fn list(&self, active_only: bool) -> Vec<MedicineItem> {
        let mut items: Vec<MedicineItem> = self
            .items
            .iter()
            .map(|row| row.value().read().item.clone())
            .filter(|item| !active_only || item.is_active)
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items
    }

    /// Exact-match lookup. Names that do not exist are left out.
    pub fn find_by_names<S: AsRef<str>>(&self, names: &[S]) -> Vec<MedicineItem> {
        names
            .iter()
            .filter_map(|name| self.names.get(name.as_ref()).map(|id| *id))
            .filter_map(|id| self.get(id).ok())
            .collect()
    }

    pub(crate) fn id_by_name(&self, name: &str) -> Option<InventoryItemId> {
        self.names.get(name).map(|id| *id)
    }

    /// Active items at or below the low-stock threshold.
    pub fn low_stock(&self) -> Vec<MedicineItem> {
        self.list(true)
            .into_iter()
            .filter(|item| item.current_stock <= self.low_stock_threshold)
            .collect()
    }

    pub(crate) fn lock_exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write()
    }

    fn with_row<R>(
        &self,
        id: InventoryItemId,
        f: impl FnOnce(&mut ItemRow) -> Result<R, LedgerError>,
    ) -> Result<R, LedgerError> {
        let row = self
            .items
            .get(&id)
            .ok_or(LedgerError::NotFound(Entity::InventoryItem(id)))?;
        let mut row = row.write();
        let output = f(&mut row)?;
        row.item.assert_invariants();
        Ok(output)
    }

    /// Edits configuration fields, renaming if asked.
    ///
    /// Runs with the gate held exclusively: a rename touches the name index
    /// while holding the item row, the reverse of the order `add_item` uses.
    #[instrument(skip(self, patch), fields(item = %id))]
    pub fn update_item(
        &self,
        id: InventoryItemId,
        patch: ItemPatch,
    ) -> Result<MedicineItem, LedgerError> {
        let _gate = self.gate.write();
        let item = self.with_row(id, |row| {
            if let Some(name) = &patch.name {
                let name = name.trim();
                if name.is_empty() {
                    return Err(LedgerError::Validation("medicine name is required".into()));
                }
                if name != row.item.name {
                    match self.names.entry(name.to_string()) {
                        Entry::Occupied(_) => {
                            return Err(LedgerError::Validation(format!(
                                "medicine '{name}' already exists"
                            )));
                        }
                        Entry::Vacant(entry) => {
                            entry.insert(id);
                        }
                    }
                    self.names.remove(&row.item.name);
                    row.item.name = name.to_string();
                }
            }
            if let Some(alias) = patch.alias {
                row.item.alias = Some(alias);
            }
            if let Some(category) = patch.category {
                row.item.category = Some(category);
            }
            if let Some(unit) = patch.unit {
                row.item.unit = unit;
            }
            if let Some(doses) = patch.doses_per_batch {
                row.item.doses_per_batch = Some(doses);
            }
            if let Some(packs) = patch.packs_per_batch {
                row.item.packs_per_batch = Some(packs);
            }
            Ok(row.item.clone())
        })?;
        debug!(item = %id, "Inventory item updated");
        Ok(item)
    }

    pub fn set_active(&self, id: InventoryItemId, active: bool) -> Result<MedicineItem, LedgerError> {
        let _gate = self.gate.read();
        self.with_row(id, |row| {
            row.item.is_active = active;
            Ok(row.item.clone())
        })
    }

    /// Overwrites stock and configuration from an import row. Caller holds
    /// the gate exclusively.
    pub(crate) fn overwrite_item(
        &self,
        id: InventoryItemId,
        new: NewMedicineItem,
    ) -> Result<MedicineItem, LedgerError> {
        self.with_row(id, |row| {
            let item = &mut row.item;
            item.current_stock = new.current_stock;
            item.total_stock = new.total_stock;
            item.category = new.category.or(item.category.take());
            item.doses_per_batch = new.doses_per_batch.or(item.doses_per_batch);
            item.packs_per_batch = new.packs_per_batch.or(item.packs_per_batch);
            item.last_decoction_date = new.last_decoction_date.or(item.last_decoction_date);
            item.is_active = new.is_active;
            Ok(item.clone())
        })
    }

    /// Records a production run.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::ItemInactive`] - the item is deactivated.
    /// - [`LedgerError::Validation`] - zero packs.
    #[instrument(skip(self, memo), fields(item = %id))]
    pub fn produce_batch(
        &self,
        id: InventoryItemId,
        doses: u32,
        packs: u32,
        decoction_date: NaiveDate,
        memo: Option<String>,
    ) -> Result<DecoctionBatch, LedgerError> {
        let _gate = self.gate.read();
        let result = self.with_row(id, |row| {
            if !row.item.is_active {
                return Err(LedgerError::ItemInactive(id));
            }
            if packs == 0 {
                return Err(LedgerError::Validation("batch must produce at least one pack".into()));
            }
            let current = row.item.current_stock.checked_add(packs);
            let total = row.item.total_stock.checked_add(packs);
            let (Some(current), Some(total)) = (current, total) else {
                return Err(LedgerError::Validation("stock overflow".into()));
            };

            let batch = DecoctionBatch {
                inventory_item_id: id,
                doses,
                packs,
                decoction_date,
                memo,
            };
            row.item.current_stock = current;
            row.item.total_stock = total;
            row.item.last_decoction_date = row
                .item
                .last_decoction_date
                .max(Some(decoction_date));
            row.batches.push(batch.clone());
            Ok(batch)
        });

        match &result {
            Ok(batch) => info!(item = %id, packs = batch.packs, "Batch produced"),
            Err(err) => warn!(item = %id, error = %err, "Batch rejected"),
        }
        result
    }

    /// Hands stock to a patient.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InsufficientStock`] - `quantity` above current stock.
    /// - [`LedgerError::Validation`] - zero quantity.
    #[instrument(skip(self, dispense), fields(item = %dispense.item, quantity = dispense.quantity))]
    pub fn dispense(&self, dispense: Dispense) -> Result<MedicineUsageRecord, LedgerError> {
        let Dispense {
            item: id,
            patient_id,
            quantity,
            usage_date,
            purpose,
            memo,
        } = dispense;
        if quantity == 0 {
            return Err(LedgerError::Validation("dispense quantity must be positive".into()));
        }

        let _gate = self.gate.read();
        let result = self.with_row(id, |row| {
            if quantity > row.item.current_stock {
                return Err(LedgerError::InsufficientStock {
                    item: id,
                    requested: quantity,
                    available: row.item.current_stock,
                });
            }
            row.item.current_stock -= quantity;
            let record = MedicineUsageRecord {
                id: self.next_usage_id(),
                inventory_item_id: Some(id),
                medicine_name: row.item.name.clone(),
                patient_id,
                quantity,
                usage_date,
                purpose,
                memo,
            };
            self.usage.insert(record.id, record.clone());
            Ok(record)
        });

        match &result {
            Ok(record) => info!(item = %id, usage = %record.id, "Medicine dispensed"),
            Err(err) => warn!(item = %id, error = %err, "Dispense rejected"),
        }
        result
    }

    /// Records dispensing of a medicine that inventory does not track.
    pub fn record_untracked_usage(
        &self,
        patient_id: PatientId,
        medicine_name: impl Into<String>,
        quantity: u32,
        usage_date: NaiveDate,
        purpose: Option<String>,
    ) -> Result<MedicineUsageRecord, LedgerError> {
        let medicine_name = medicine_name.into();
        if medicine_name.trim().is_empty() {
            return Err(LedgerError::Validation("medicine name is required".into()));
        }
        if quantity == 0 {
            return Err(LedgerError::Validation("dispense quantity must be positive".into()));
        }
        let record = MedicineUsageRecord {
            id: self.next_usage_id(),
            inventory_item_id: None,
            medicine_name,
            patient_id,
            quantity,
            usage_date,
            purpose,
            memo: None,
        };
        self.usage.insert(record.id, record.clone());
        debug!(usage = %record.id, "Untracked usage recorded");
        Ok(record)
    }

    /// Reverses a dispensing event and restores its stock.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - unknown usage record.
    /// - [`LedgerError::Validation`] - already cancelled, or the restore would
    ///   push current stock above cumulative stock.
    #[instrument(skip(self), fields(usage = %usage_id))]
    pub fn cancel_dispense(
        &self,
        usage_id: MedicineUsageId,
    ) -> Result<DispenseCancellation, LedgerError> {
        let record = self
            .usage
            .get(&usage_id)
            .map(|record| record.value().clone())
            .ok_or(LedgerError::NotFound(Entity::MedicineUsage(usage_id)))?;

        let _gate = self.gate.read();
        let cancel = |restored: u32| -> Result<DispenseCancellation, LedgerError> {
            match self.cancellations.entry(usage_id) {
                Entry::Occupied(_) => Err(LedgerError::Validation(format!(
                    "usage {usage_id} is already cancelled"
                ))),
                Entry::Vacant(entry) => {
                    let cancellation = DispenseCancellation {
                        usage_id,
                        inventory_item_id: record.inventory_item_id,
                        restored,
                        cancelled_at: Utc::now(),
                    };
                    entry.insert(cancellation.clone());
                    Ok(cancellation)
                }
            }
        };

        let result = match record.inventory_item_id {
            None => cancel(0),
            Some(id) => self.with_row(id, |row| {
                let restored = row
                    .item
                    .current_stock
                    .checked_add(record.quantity)
                    .filter(|stock| *stock <= row.item.total_stock)
                    .ok_or_else(|| {
                        LedgerError::Validation(format!(
                            "restoring {} would exceed cumulative stock of item {id}",
                            record.quantity
                        ))
                    })?;
                let cancellation = cancel(record.quantity)?;
                row.item.current_stock = restored;
                Ok(cancellation)
            }),
        };

        match &result {
            Ok(c) => info!(usage = %usage_id, restored = c.restored, "Dispense cancelled"),
            Err(err) => warn!(usage = %usage_id, error = %err, "Cancel rejected"),
        }
        result
    }

    pub fn cancellation(&self, usage_id: MedicineUsageId) -> Option<DispenseCancellation> {
        self.cancellations.get(&usage_id).map(|c| c.value().clone())
    }

    /// Production runs of an item, oldest first.
    pub fn batches(&self, id: InventoryItemId) -> Result<Vec<DecoctionBatch>, LedgerError> {
        self.items
            .get(&id)
            .map(|row| row.read().batches.clone())
            .ok_or(LedgerError::NotFound(Entity::InventoryItem(id)))
    }

    /// Dispensing records of a patient, most recent first.
    pub fn usage_for_patient(&self, patient_id: PatientId) -> Vec<MedicineUsageRecord> {
        let mut records: Vec<MedicineUsageRecord> = self
            .usage
            .iter()
            .filter(|record| record.patient_id == patient_id)
            .map(|record| record.value().clone())
            .collect();
        records.sort_by_key(|record| Reverse((record.usage_date, record.id)));
        records
    }

    fn next_usage_id(&self) -> MedicineUsageId {
        MedicineUsageId(self.next_usage_id.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
