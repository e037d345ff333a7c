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

//! Package operations as data.
//!
//! Every package mutation the ledger accepts, in one enum, so a stream of
//! them can be replayed from a file or received over the wire.

use crate::adjustment::Adjustment;
use crate::base::{LineRef, PackageId, PackageKey, PackageKind, PatientId};
use crate::deduction::Deduction;
use crate::package::{NewPackage, PackagePatch};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Create(NewPackage),
    Deduct(Deduction),
    TopUp {
        package: PackageKey,
        count: u32,
        usage_date: NaiveDate,
        #[serde(default)]
        memo: Option<String>,
    },
    Apply {
        membership: PackageId,
        line_ref: LineRef,
        usage_date: NaiveDate,
        #[serde(default)]
        memo: Option<String>,
    },
    Adjust {
        package: PackageKey,
        adjustment: Adjustment,
    },
    Update {
        package: PackageKey,
        patch: PackagePatch,
    },
    Complete {
        package: PackageKey,
    },
    Delete {
        package: PackageKey,
    },
    Link {
        package: PackageKey,
        line_ref: LineRef,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Deduct(_) => "deduct",
            Self::TopUp { .. } => "top_up",
            Self::Apply { .. } => "apply",
            Self::Adjust { .. } => "adjust",
            Self::Update { .. } => "update",
            Self::Complete { .. } => "complete",
            Self::Delete { .. } => "delete",
            Self::Link { .. } => "link",
        }
    }

    /// Target package. `None` for creation, whose id is not yet assigned.
    pub fn package(&self) -> Option<PackageKey> {
        match self {
            Self::Create(_) => None,
            Self::Deduct(deduction) => Some(deduction.package),
            Self::Apply { membership, .. } => {
                Some(PackageKey::new(PackageKind::Membership, *membership))
            }
            Self::TopUp { package, .. }
            | Self::Adjust { package, .. }
            | Self::Update { package, .. }
            | Self::Complete { package }
            | Self::Delete { package }
            | Self::Link { package, .. } => Some(*package),
        }
    }

    /// Patient named by a creation.
    pub fn patient_id(&self) -> Option<PatientId> {
        match self {
            Self::Create(new) => Some(new.patient_id),
            _ => None,
        }
    }
}
