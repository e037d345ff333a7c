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

//! Thread-safe claim index for external billing line items.
//!
//! Guarantees that at most one package references a given line item, while
//! keeping an ordered outbox of claim changes for downstream consumers.

use crate::base::{LineRef, PackageKey};
use crate::error::{LedgerError, LinkConflict};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

/// Why a package holds a line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    /// The package was bought with this line item.
    Purchase,
    /// A deduction was tagged with this line item.
    Deduction,
    /// A membership entitlement was applied to this line item.
    Apply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub holder: PackageKey,
    pub kind: ClaimKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    Claimed { line_ref: LineRef, claim: Claim },
    Released { line_ref: LineRef, holder: PackageKey },
}

/// Combines a [`DashMap`] for O(1) ownership checks with a [`SegQueue`]
/// outbox preserving the order claims changed.
#[derive(Debug, Default)]
pub struct LinkRegistry {
    /// Current holder of each claimed line item.
    claims: DashMap<LineRef, Claim>,

    /// Claim changes in FIFO order, drained by consumers.
    events: SegQueue<LinkEvent>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `line_ref` for `claim.holder`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::AlreadyLinked`] if the line item is already held.
    pub fn claim(&self, line_ref: LineRef, claim: Claim) -> Result<(), LedgerError> {
        // Check and insert under one shard lock.
        match self.claims.entry(line_ref) {
            Entry::Occupied(entry) => Err(LedgerError::AlreadyLinked(LinkConflict::LineItem {
                line_ref,
                holder: entry.get().holder,
            })),
            Entry::Vacant(entry) => {
                entry.insert(claim);
                self.events.push(LinkEvent::Claimed { line_ref, claim });
                Ok(())
            }
        }
    }

    /// Releases `line_ref` if, and only if, `holder` holds it.
    pub fn release(&self, line_ref: LineRef, holder: PackageKey) -> bool {
        let removed = self
            .claims
            .remove_if(&line_ref, |_, claim| claim.holder == holder)
            .is_some();
        if removed {
            self.events.push(LinkEvent::Released { line_ref, holder });
        }
        removed
    }

    pub fn holder(&self, line_ref: LineRef) -> Option<Claim> {
        self.claims.get(&line_ref).map(|claim| *claim)
    }

    pub fn is_claimed(&self, line_ref: LineRef) -> bool {
        self.claims.contains_key(&line_ref)
    }

    /// Takes every pending event, oldest first.
    pub fn drain_events(&self) -> Vec<LinkEvent> {
        std::iter::from_fn(|| self.events.pop()).collect()
    }
}
