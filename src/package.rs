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

//! Prepaid packages and their balance state machine.
//!
//! ```text
//!  Active ──deduct last unit──► Completed
//!    ▲                            │
//!    └──top-up / override─────────┘
//!
//!  Active | Completed ──delete──► Deleted (terminal)
//! ```
//!
//! For the three count kinds `remaining_units == total_units - used_units`
//! holds after every mutation. Memberships express their period in days and
//! are never count-deducted.
//!
//! # Example
//!
//! ```
//! use chrono::NaiveDate;
//! use clinic_ledger::{NewPackage, PackageKind, PatientId};
//!
//! let start = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
//! let new = NewPackage::herbal(PatientId(1), "궁귀교애탕", 6, start);
//! assert_eq!(new.kind(), PackageKind::Herbal);
//! ```

use crate::base::{DiseaseTagId, LineRef, PackageId, PackageKey, PackageKind, PatientId};
use crate::collaborators::PatientInfo;
use crate::error::LedgerError;
use chrono::{Months, NaiveDate};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::Deserialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Active,
    Completed,
    Deleted,
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Deleted => "deleted",
        })
    }
}

/// Prepaid herbal period. Each round is a 15-day supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HerbalPeriod {
    HalfMonth,
    OneMonth,
    TwoMonths,
    ThreeMonths,
    SixMonths,
}

impl HerbalPeriod {
    pub fn rounds(&self) -> u32 {
        match self {
            Self::HalfMonth => 1,
            Self::OneMonth => 2,
            Self::TwoMonths => 4,
            Self::ThreeMonths => 6,
            Self::SixMonths => 12,
        }
    }
}

/// Kind-specific attributes of a stored package.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PackageDetails {
    Herbal {
        herbal_name: String,
        purpose_label: Option<String>,
        disease_tags: Vec<DiseaseTagId>,
        period: Option<HerbalPeriod>,
    },
    Nokryong {
        package_name: String,
        type_label: Option<String>,
    },
    Treatment {
        package_name: String,
        includes: Option<String>,
    },
    Membership {
        membership_type: String,
        /// Free uses allowed per visit day.
        daily_quantity: u32,
    },
}

impl PackageDetails {
    pub fn kind(&self) -> PackageKind {
        match self {
            Self::Herbal { .. } => PackageKind::Herbal,
            Self::Nokryong { .. } => PackageKind::Nokryong,
            Self::Treatment { .. } => PackageKind::Treatment,
            Self::Membership { .. } => PackageKind::Membership,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Herbal { herbal_name, .. } => herbal_name,
            Self::Nokryong { package_name, .. } | Self::Treatment { package_name, .. } => {
                package_name
            }
            Self::Membership {
                membership_type, ..
            } => membership_type,
        }
    }

    fn set_name(&mut self, name: String) {
        match self {
            Self::Herbal { herbal_name, .. } => *herbal_name = name,
            Self::Nokryong { package_name, .. } | Self::Treatment { package_name, .. } => {
                *package_name = name
            }
            Self::Membership {
                membership_type, ..
            } => *membership_type = name,
        }
    }
}

/// Kind-specific attributes supplied at creation.
///
/// Herbal disease tags are given by name and resolved find-or-create by the
/// store.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PackageTerms {
    Herbal {
        herbal_name: String,
        #[serde(default)]
        purpose_label: Option<String>,
        #[serde(default)]
        disease_tags: Vec<String>,
        #[serde(default)]
        period: Option<HerbalPeriod>,
    },
    Nokryong {
        package_name: String,
        #[serde(default)]
        type_label: Option<String>,
    },
    Treatment {
        package_name: String,
        #[serde(default)]
        includes: Option<String>,
    },
    Membership {
        membership_type: String,
        daily_quantity: u32,
    },
}

impl PackageTerms {
    pub fn kind(&self) -> PackageKind {
        match self {
            Self::Herbal { .. } => PackageKind::Herbal,
            Self::Nokryong { .. } => PackageKind::Nokryong,
            Self::Treatment { .. } => PackageKind::Treatment,
            Self::Membership { .. } => PackageKind::Membership,
        }
    }
}

/// Request to create a package.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct NewPackage {
    pub patient_id: PatientId,
    pub terms: PackageTerms,
    /// Ignored for memberships, whose size is their period.
    #[serde(default)]
    pub total_units: u32,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub expire_date: Option<NaiveDate>,
    #[serde(default)]
    pub memo: Option<String>,
}

impl NewPackage {
    pub fn herbal(
        patient_id: PatientId,
        herbal_name: impl Into<String>,
        total_units: u32,
        start_date: NaiveDate,
    ) -> Self {
        Self {
            patient_id,
            terms: PackageTerms::Herbal {
                herbal_name: herbal_name.into(),
                purpose_label: None,
                disease_tags: Vec::new(),
                period: None,
            },
            total_units,
            start_date,
            expire_date: None,
            memo: None,
        }
    }

    /// Herbal package sized from a prepaid period.
    pub fn herbal_for_period(
        patient_id: PatientId,
        herbal_name: impl Into<String>,
        period: HerbalPeriod,
        start_date: NaiveDate,
    ) -> Self {
        let mut new = Self::herbal(patient_id, herbal_name, period.rounds(), start_date);
        if let PackageTerms::Herbal { period: p, .. } = &mut new.terms {
            *p = Some(period);
        }
        new
    }

    pub fn nokryong(
        patient_id: PatientId,
        package_name: impl Into<String>,
        total_units: u32,
        start_date: NaiveDate,
    ) -> Self {
        Self {
            patient_id,
            terms: PackageTerms::Nokryong {
                package_name: package_name.into(),
                type_label: None,
            },
            total_units,
            start_date,
            expire_date: None,
            memo: None,
        }
    }

    pub fn treatment(
        patient_id: PatientId,
        package_name: impl Into<String>,
        total_units: u32,
        start_date: NaiveDate,
    ) -> Self {
        Self {
            patient_id,
            terms: PackageTerms::Treatment {
                package_name: package_name.into(),
                includes: None,
            },
            total_units,
            start_date,
            expire_date: None,
            memo: None,
        }
    }

    pub fn membership(
        patient_id: PatientId,
        membership_type: impl Into<String>,
        daily_quantity: u32,
        start_date: NaiveDate,
    ) -> Self {
        Self {
            patient_id,
            terms: PackageTerms::Membership {
                membership_type: membership_type.into(),
                daily_quantity,
            },
            total_units: 0,
            start_date,
            expire_date: None,
            memo: None,
        }
    }

    pub fn with_expire_date(mut self, expire_date: NaiveDate) -> Self {
        self.expire_date = Some(expire_date);
        self
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    pub fn with_purpose(mut self, label: impl Into<String>) -> Self {
        if let PackageTerms::Herbal { purpose_label, .. } = &mut self.terms {
            *purpose_label = Some(label.into());
        }
        self
    }

    pub fn with_disease_tags<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let PackageTerms::Herbal { disease_tags, .. } = &mut self.terms {
            *disease_tags = names.into_iter().map(Into::into).collect();
        }
        self
    }

    pub fn with_type_label(mut self, label: impl Into<String>) -> Self {
        if let PackageTerms::Nokryong { type_label, .. } = &mut self.terms {
            *type_label = Some(label.into());
        }
        self
    }

    pub fn with_includes(mut self, text: impl Into<String>) -> Self {
        if let PackageTerms::Treatment { includes, .. } = &mut self.terms {
            *includes = Some(text.into());
        }
        self
    }

    pub fn kind(&self) -> PackageKind {
        self.terms.kind()
    }

    /// Checks the request before any storage is touched.
    pub(crate) fn validate(&self) -> Result<(), LedgerError> {
        let name = match &self.terms {
            PackageTerms::Herbal { herbal_name, .. } => herbal_name,
            PackageTerms::Nokryong { package_name, .. }
            | PackageTerms::Treatment { package_name, .. } => package_name,
            PackageTerms::Membership {
                membership_type,
                daily_quantity,
            } => {
                if *daily_quantity == 0 {
                    return Err(LedgerError::Validation(
                        "membership daily quantity must be positive".into(),
                    ));
                }
                membership_type
            }
        };
        if name.trim().is_empty() {
            return Err(LedgerError::Validation("package name is required".into()));
        }
        if self.kind().is_count_based() && self.total_units == 0 {
            return Err(LedgerError::Validation(
                "total units must be positive".into(),
            ));
        }
        if let Some(expire) = self.expire_date {
            if expire < self.start_date {
                return Err(LedgerError::Validation(format!(
                    "expire date {expire} is before start date {}",
                    self.start_date
                )));
            }
        }
        Ok(())
    }
}

/// Cosmetic edit. Never touches balance fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct PackagePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub expire_date: Option<NaiveDate>,
    /// Purpose, type label or includes text. Memberships have none.
    #[serde(default)]
    pub label: Option<String>,
}

impl PackagePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Number of calendar days in `[start, expire]`.
pub(crate) fn period_days(start: NaiveDate, expire: NaiveDate) -> u32 {
    u32::try_from((expire - start).num_days() + 1).unwrap_or(0)
}

pub(crate) fn default_expiry(start: NaiveDate, months: u32) -> Option<NaiveDate> {
    start.checked_add_months(Months::new(months))
}

/// Snapshot of a stored package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub id: PackageId,
    pub patient_id: PatientId,
    pub patient_name: String,
    pub chart_number: String,
    pub total_units: u32,
    pub used_units: u32,
    pub remaining_units: u32,
    pub start_date: NaiveDate,
    pub expire_date: Option<NaiveDate>,
    pub status: PackageStatus,
    pub external_line_ref: Option<LineRef>,
    pub memo: Option<String>,
    pub details: PackageDetails,
}

impl Package {
    /// Builds a fresh active package. `details` must already carry resolved
    /// tag ids and, for memberships, `expire_date` must be set.
    pub(crate) fn open(
        id: PackageId,
        patient: &PatientInfo,
        details: PackageDetails,
        total_units: u32,
        start_date: NaiveDate,
        expire_date: Option<NaiveDate>,
        memo: Option<String>,
    ) -> Self {
        let total_units = match (details.kind(), expire_date) {
            (PackageKind::Membership, Some(expire)) => period_days(start_date, expire),
            _ => total_units,
        };
        let package = Self {
            id,
            patient_id: patient.id,
            patient_name: patient.name.clone(),
            chart_number: patient.chart_number.clone(),
            total_units,
            used_units: 0,
            remaining_units: total_units,
            start_date,
            expire_date,
            status: PackageStatus::Active,
            external_line_ref: None,
            memo,
            details,
        };
        package.assert_invariants();
        package
    }

    pub fn kind(&self) -> PackageKind {
        self.details.kind()
    }

    pub fn key(&self) -> PackageKey {
        PackageKey::new(self.kind(), self.id)
    }

    pub fn name(&self) -> &str {
        self.details.name()
    }

    pub fn is_active(&self) -> bool {
        self.status == PackageStatus::Active
    }

    pub fn is_expired_on(&self, date: NaiveDate) -> bool {
        self.expire_date.is_some_and(|expire| date > expire)
    }

    pub fn disease_tags(&self) -> &[DiseaseTagId] {
        match &self.details {
            PackageDetails::Herbal { disease_tags, .. } => disease_tags,
            _ => &[],
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.used_units <= self.total_units,
            "Invariant violated: used {} exceeds total {}",
            self.used_units,
            self.total_units
        );
        debug_assert_eq!(
            self.remaining_units,
            self.total_units - self.used_units,
            "Invariant violated: remaining out of step with total - used"
        );
    }

    pub(crate) fn ensure_active(&self) -> Result<(), LedgerError> {
        if self.status != PackageStatus::Active {
            return Err(LedgerError::PackageNotActive {
                package: self.key(),
                status: self.status,
            });
        }
        Ok(())
    }

    fn ensure_count_based(&self, operation: &'static str) -> Result<(), LedgerError> {
        if !self.kind().is_count_based() {
            return Err(LedgerError::KindMismatch {
                package: self.key(),
                operation,
            });
        }
        Ok(())
    }

    /// Consumes `count` units.
    pub(crate) fn deduct(&mut self, count: u32) -> Result<(), LedgerError> {
        self.ensure_count_based("deduct")?;
        if count == 0 {
            return Err(LedgerError::Validation("deduction count must be positive".into()));
        }
        self.ensure_active()?;
        if self.remaining_units < count {
            return Err(LedgerError::InsufficientBalance {
                package: self.key(),
                requested: count,
                available: self.remaining_units,
            });
        }
        self.used_units += count;
        self.remaining_units = self.total_units - self.used_units;
        if self.remaining_units == 0 {
            self.status = PackageStatus::Completed;
        }
        self.assert_invariants();
        Ok(())
    }

    /// Adds `count` units, reopening a completed package.
    pub(crate) fn top_up(&mut self, count: u32) -> Result<(), LedgerError> {
        self.ensure_count_based("top-up")?;
        if count == 0 {
            return Err(LedgerError::Validation("top-up count must be positive".into()));
        }
        if self.status == PackageStatus::Deleted {
            return Err(LedgerError::PackageNotActive {
                package: self.key(),
                status: self.status,
            });
        }
        let total = self
            .total_units
            .checked_add(count)
            .ok_or_else(|| LedgerError::Validation("total units overflow".into()))?;
        self.total_units = total;
        self.remaining_units = self.total_units - self.used_units;
        self.status = PackageStatus::Active;
        self.assert_invariants();
        Ok(())
    }

    /// Sets the remaining balance directly, optionally with a new total.
    ///
    /// Out-of-range values are rejected, never clamped. Returns the audit
    /// description of the change.
    pub(crate) fn override_balance(
        &mut self,
        remaining: u32,
        total: Option<u32>,
    ) -> Result<String, LedgerError> {
        self.ensure_count_based("balance override")?;
        if self.status == PackageStatus::Deleted {
            return Err(LedgerError::PackageNotActive {
                package: self.key(),
                status: self.status,
            });
        }
        let new_total = total.unwrap_or(self.total_units);
        if new_total == 0 {
            return Err(LedgerError::InvalidAdjustment {
                package: self.key(),
                reason: "total must be positive".into(),
            });
        }
        if remaining > new_total {
            return Err(LedgerError::InvalidAdjustment {
                package: self.key(),
                reason: format!("remaining {remaining} exceeds total {new_total}"),
            });
        }

        let unit = self.kind().unit_label();
        let description = if new_total != self.total_units {
            format!(
                "total {} → {new_total}, {} → {remaining} {unit} remaining",
                self.total_units, self.remaining_units
            )
        } else {
            format!("{} → {remaining} {unit} remaining", self.remaining_units)
        };

        self.total_units = new_total;
        self.remaining_units = remaining;
        self.used_units = new_total - remaining;
        self.status = if remaining == 0 {
            PackageStatus::Completed
        } else {
            PackageStatus::Active
        };
        self.assert_invariants();
        Ok(description)
    }

    /// Moves a membership's period. Returns the audit description.
    pub(crate) fn override_period(
        &mut self,
        start: NaiveDate,
        expire: NaiveDate,
    ) -> Result<String, LedgerError> {
        if self.kind().is_count_based() {
            return Err(LedgerError::KindMismatch {
                package: self.key(),
                operation: "period override",
            });
        }
        if self.status == PackageStatus::Deleted {
            return Err(LedgerError::PackageNotActive {
                package: self.key(),
                status: self.status,
            });
        }
        if expire < start {
            return Err(LedgerError::InvalidAdjustment {
                package: self.key(),
                reason: format!("expire date {expire} is before start date {start}"),
            });
        }

        let before = match self.expire_date {
            Some(old) => format!("{}~{old}", self.start_date),
            None => format!("{}~", self.start_date),
        };
        let description = format!("period {before} → {start}~{expire}");

        self.start_date = start;
        self.expire_date = Some(expire);
        self.total_units = period_days(start, expire);
        self.used_units = 0;
        self.remaining_units = self.total_units;
        self.status = PackageStatus::Active;
        self.assert_invariants();
        Ok(description)
    }

    pub(crate) fn apply_patch(&mut self, patch: PackagePatch) -> Result<(), LedgerError> {
        if self.status == PackageStatus::Deleted {
            return Err(LedgerError::PackageNotActive {
                package: self.key(),
                status: self.status,
            });
        }
        if !self.kind().is_count_based()
            && (patch.start_date.is_some() || patch.expire_date.is_some())
        {
            // A membership's dates are its balance; they move through the override.
            return Err(LedgerError::KindMismatch {
                package: self.key(),
                operation: "date patch",
            });
        }
        if !self.kind().is_count_based() && patch.label.is_some() {
            return Err(LedgerError::KindMismatch {
                package: self.key(),
                operation: "label patch",
            });
        }
        let start = patch.start_date.unwrap_or(self.start_date);
        let expire = patch.expire_date.or(self.expire_date);
        if let Some(expire) = expire {
            if expire < start {
                return Err(LedgerError::Validation(format!(
                    "expire date {expire} is before start date {start}"
                )));
            }
        }
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(LedgerError::Validation("package name is required".into()));
            }
        }

        if let Some(name) = patch.name {
            self.details.set_name(name);
        }
        if let Some(memo) = patch.memo {
            self.memo = Some(memo);
        }
        self.start_date = start;
        self.expire_date = expire;
        if let Some(label) = patch.label {
            match &mut self.details {
                PackageDetails::Herbal { purpose_label, .. } => *purpose_label = Some(label),
                PackageDetails::Nokryong { type_label, .. } => *type_label = Some(label),
                PackageDetails::Treatment { includes, .. } => *includes = Some(label),
                // Rejected above.
                PackageDetails::Membership { .. } => {}
            }
        }
        Ok(())
    }

    pub(crate) fn set_disease_tags(&mut self, tags: Vec<DiseaseTagId>) -> Result<(), LedgerError> {
        match &mut self.details {
            PackageDetails::Herbal { disease_tags, .. } => {
                *disease_tags = tags;
                Ok(())
            }
            _ => Err(LedgerError::KindMismatch {
                package: self.key(),
                operation: "disease tags",
            }),
        }
    }

    /// Closes an active package early, keeping its balance. Returns the audit
    /// description.
    pub(crate) fn close_out(&mut self) -> Result<String, LedgerError> {
        self.ensure_active()?;
        self.status = PackageStatus::Completed;
        Ok(format!(
            "closed with {} {} remaining",
            self.remaining_units,
            self.kind().unit_label()
        ))
    }

    pub(crate) fn mark_deleted(&mut self) -> Result<(), LedgerError> {
        if self.status == PackageStatus::Deleted {
            return Err(LedgerError::PackageNotActive {
                package: self.key(),
                status: self.status,
            });
        }
        self.status = PackageStatus::Deleted;
        Ok(())
    }
}

impl Serialize for Package {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Package", 13)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("kind", &self.kind())?;
        state.serialize_field("patient", &self.patient_id)?;
        state.serialize_field("patient_name", &self.patient_name)?;
        state.serialize_field("chart_number", &self.chart_number)?;
        state.serialize_field("name", self.name())?;
        state.serialize_field("total", &self.total_units)?;
        state.serialize_field("used", &self.used_units)?;
        state.serialize_field("remaining", &self.remaining_units)?;
        state.serialize_field("start_date", &self.start_date)?;
        state.serialize_field("expire_date", &self.expire_date)?;
        state.serialize_field("status", &self.status)?;
        state.serialize_field("line_ref", &self.external_line_ref)?;
        state.end()
    }
}
