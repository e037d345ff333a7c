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

//! Core identifier types for patients, packages, inventory and billing lines.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Patient identifier as issued by the patient registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct PatientId(pub u32);

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a prepaid package.
///
/// Assigned by the store at creation. One id space is shared by all four
/// package kinds, but every operation still addresses a package by
/// [`PackageKey`] so a kind/id mix-up is caught instead of silently
/// operating on the wrong row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct PackageId(pub u64);

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a medicine inventory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct InventoryItemId(pub u32);

impl fmt::Display for InventoryItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct DiseaseTagId(pub u32);

impl fmt::Display for DiseaseTagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a dispensing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct MedicineUsageId(pub u64);

impl fmt::Display for MedicineUsageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to a line item in the external billing system.
///
/// The ledger never owns the line item; the reference may stop resolving
/// at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct LineRef(pub u64);

impl fmt::Display for LineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The four prepaid package kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageKind {
    /// Herbal-medicine rounds.
    Herbal,
    /// Antler-tonic doses.
    Nokryong,
    /// Treatment mileage counts.
    Treatment,
    /// Time-bound membership.
    Membership,
}

impl PackageKind {
    pub const ALL: [PackageKind; 4] = [
        PackageKind::Herbal,
        PackageKind::Nokryong,
        PackageKind::Treatment,
        PackageKind::Membership,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Herbal => "herbal",
            Self::Nokryong => "nokryong",
            Self::Treatment => "treatment",
            Self::Membership => "membership",
        }
    }

    /// Returns `true` for kinds whose balance is a discrete unit count.
    pub fn is_count_based(&self) -> bool {
        !matches!(self, Self::Membership)
    }

    /// Unit label used in audit descriptions.
    pub fn unit_label(&self) -> &'static str {
        match self {
            Self::Herbal => "rounds",
            Self::Nokryong => "doses",
            Self::Treatment => "sessions",
            Self::Membership => "days",
        }
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "herbal" => Ok(Self::Herbal),
            "nokryong" => Ok(Self::Nokryong),
            "treatment" => Ok(Self::Treatment),
            "membership" => Ok(Self::Membership),
            other => Err(format!("unknown package kind '{other}'")),
        }
    }
}

/// Address of a package: its kind plus its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct PackageKey {
    pub kind: PackageKind,
    pub id: PackageId,
}

impl PackageKey {
    pub fn new(kind: PackageKind, id: PackageId) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for PackageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_kind_parses_case_insensitively() {
        assert_eq!(" Herbal ".parse::<PackageKind>(), Ok(PackageKind::Herbal));
        assert_eq!("NOKRYONG".parse::<PackageKind>(), Ok(PackageKind::Nokryong));
        assert!("voucher".parse::<PackageKind>().is_err());
    }

    #[test]
    fn package_key_display() {
        let key = PackageKey::new(PackageKind::Treatment, PackageId(42));
        assert_eq!(key.to_string(), "treatment#42");
    }

    #[test]
    fn only_membership_is_time_based() {
        for kind in PackageKind::ALL {
            assert_eq!(kind.is_count_based(), kind != PackageKind::Membership);
        }
    }
}
