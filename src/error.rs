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

//! Error types for ledger operations.

use crate::base::{DiseaseTagId, InventoryItemId, LineRef, MedicineUsageId, PackageKey};
use crate::package::PackageStatus;
use chrono::NaiveDate;
use std::fmt;
use thiserror::Error;

/// Record a [`LedgerError::NotFound`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Package(PackageKey),
    InventoryItem(InventoryItemId),
    DiseaseTag(DiseaseTagId),
    MedicineUsage(MedicineUsageId),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Package(key) => write!(f, "package {key}"),
            Self::InventoryItem(id) => write!(f, "inventory item {id}"),
            Self::DiseaseTag(id) => write!(f, "disease tag {id}"),
            Self::MedicineUsage(id) => write!(f, "medicine usage record {id}"),
        }
    }
}

/// Which side of a link already holds a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkConflict {
    /// The line item is already claimed by another package.
    LineItem { line_ref: LineRef, holder: PackageKey },
    /// The package already points at a resolvable line item.
    Package { package: PackageKey, line_ref: LineRef },
}

impl fmt::Display for LinkConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LineItem { line_ref, holder } => {
                write!(f, "line item {line_ref} is already claimed by {holder}")
            }
            Self::Package { package, line_ref } => {
                write!(f, "{package} is already linked to line item {line_ref}")
            }
        }
    }
}

/// Ledger operation errors.
///
/// Every balance-changing operation validates before it writes, so any of
/// these leaves storage untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Referenced record does not exist
    #[error("{0} not found")]
    NotFound(Entity),

    /// Operation attempted on a completed or deleted package
    #[error("{package} is {status}, not active")]
    PackageNotActive {
        package: PackageKey,
        status: PackageStatus,
    },

    /// Deduction exceeds the remaining balance
    #[error("insufficient balance on {package}: requested {requested}, available {available}")]
    InsufficientBalance {
        package: PackageKey,
        requested: u32,
        available: u32,
    },

    /// Dispense exceeds current stock
    #[error("insufficient stock for inventory item {item}: requested {requested}, available {available}")]
    InsufficientStock {
        item: InventoryItemId,
        requested: u32,
        available: u32,
    },

    /// Administrative override outside the valid range
    #[error("invalid adjustment on {package}: {reason}")]
    InvalidAdjustment { package: PackageKey, reason: String },

    /// Double-link attempt
    #[error("already linked: {0}")]
    AlreadyLinked(LinkConflict),

    /// Production against a deactivated inventory item
    #[error("inventory item {0} is inactive")]
    ItemInactive(InventoryItemId),

    /// Malformed input
    #[error("validation error: {0}")]
    Validation(String),

    /// Operation not valid for the package's kind
    #[error("{operation} is not supported for {package}")]
    KindMismatch {
        package: PackageKey,
        operation: &'static str,
    },

    /// Membership applied after its expiry date
    #[error("{package} expired on {expired_on}")]
    MembershipExpired {
        package: PackageKey,
        expired_on: NaiveDate,
    },

    /// Billing collaborator failure
    #[error("billing system error: {0}")]
    Billing(String),
}

impl LedgerError {
    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::PackageNotActive { .. } => "PACKAGE_NOT_ACTIVE",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            Self::InvalidAdjustment { .. } => "INVALID_ADJUSTMENT",
            Self::AlreadyLinked(_) => "ALREADY_LINKED",
            Self::ItemInactive(_) => "ITEM_INACTIVE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::KindMismatch { .. } => "KIND_MISMATCH",
            Self::MembershipExpired { .. } => "MEMBERSHIP_EXPIRED",
            Self::Billing(_) => "BILLING_ERROR",
        }
    }
}
