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

//! Receipt-link reconciliation.
//!
//! Pairs a patient's unlinked packages with the same day's uncovered billing
//! line items. A package whose line reference no longer resolves in the
//! billing system counts as unlinked again.

use crate::base::{LineRef, PackageKey, PackageKind, PatientId};
use crate::collaborators::{BillingSource, LineItem};
use crate::config::MatchRule;
use crate::error::{LedgerError, LinkConflict};
use crate::link_registry::{Claim, ClaimKind};
use crate::package::{Package, PackageStatus};
use crate::store::PackageStore;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    /// Exactly one unlinked candidate; safe to link without asking.
    Auto,
    /// Several candidates; the operator picks one.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchProposal {
    pub line_item: LineItem,
    pub kind: PackageKind,
    /// Unlinked candidates, oldest first.
    pub candidates: Vec<Package>,
    pub confidence: MatchConfidence,
}

impl MatchProposal {
    /// The package an automatic link would use.
    pub fn suggested(&self) -> Option<&Package> {
        self.candidates.first()
    }
}

pub struct Reconciler<'a> {
    store: &'a PackageStore,
    billing: &'a dyn BillingSource,
    rules: &'a [MatchRule],
}

impl<'a> Reconciler<'a> {
    pub fn new(
        store: &'a PackageStore,
        billing: &'a dyn BillingSource,
        rules: &'a [MatchRule],
    ) -> Self {
        Self {
            store,
            billing,
            rules,
        }
    }

    fn is_unlinked(&self, package: &Package) -> Result<bool, LedgerError> {
        match package.external_line_ref {
            None => Ok(true),
            Some(line_ref) => Ok(self.billing.resolve(line_ref)?.is_none()),
        }
    }

    /// Proposes links for the patient's line items billed on `date`.
    ///
    /// A line item may match several rules and then yields one proposal per
    /// kind. Line items already held by a package are not proposed.
    #[instrument(skip(self))]
    pub fn propose_matches(
        &self,
        patient_id: PatientId,
        date: NaiveDate,
    ) -> Result<Vec<MatchProposal>, LedgerError> {
        let line_items = self.billing.fetch_uncovered_line_items(patient_id, date)?;

        let mut unlinked = Vec::new();
        for package in self.store.list_active(patient_id) {
            if self.is_unlinked(&package)? {
                unlinked.push(package);
            }
        }

        let mut proposals = Vec::new();
        for line_item in line_items {
            if self.store.links().is_claimed(line_item.line_ref) {
                continue;
            }
            for rule in self.rules.iter().filter(|rule| rule.matches(&line_item.label)) {
                let candidates: Vec<Package> = unlinked
                    .iter()
                    .filter(|package| package.kind() == rule.kind)
                    .cloned()
                    .collect();
                if candidates.is_empty() {
                    continue;
                }
                let confidence = if candidates.len() == 1 {
                    MatchConfidence::Auto
                } else {
                    MatchConfidence::Manual
                };
                proposals.push(MatchProposal {
                    line_item: line_item.clone(),
                    kind: rule.kind,
                    candidates,
                    confidence,
                });
            }
        }

        debug!(patient = %patient_id, proposals = proposals.len(), "Match proposals built");
        Ok(proposals)
    }

    /// Links a package to the line item it was bought with.
    ///
    /// This is the only path that sets a package's line reference.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::AlreadyLinked`] - the package holds a live link, or the
    ///   line item is held by another package.
    /// - [`LedgerError::Validation`] - the line item does not exist.
    /// - [`LedgerError::PackageNotActive`] - the package is deleted.
    #[instrument(skip(self), fields(package = %key, line_ref = %line_ref))]
    pub fn link(&self, key: PackageKey, line_ref: LineRef) -> Result<Package, LedgerError> {
        if self.billing.resolve(line_ref)?.is_none() {
            return Err(LedgerError::Validation(format!(
                "line item {line_ref} does not exist"
            )));
        }

        let snapshot = self.store.get(key)?;
        let dangling = match snapshot.external_line_ref {
            Some(existing) if !self.is_unlinked(&snapshot)? => {
                return Err(LedgerError::AlreadyLinked(LinkConflict::Package {
                    package: key,
                    line_ref: existing,
                }));
            }
            other => other,
        };

        let result = self.store.transact(key, |tx| {
            if tx.package.status == PackageStatus::Deleted {
                return Err(LedgerError::PackageNotActive {
                    package: key,
                    status: tx.package.status,
                });
            }
            if tx.package.external_line_ref != dangling {
                // Linked by someone else since the snapshot.
                if let Some(existing) = tx.package.external_line_ref {
                    return Err(LedgerError::AlreadyLinked(LinkConflict::Package {
                        package: key,
                        line_ref: existing,
                    }));
                }
            }
            self.store.links().claim(
                line_ref,
                Claim {
                    holder: key,
                    kind: ClaimKind::Purchase,
                },
            )?;
            if let Some(stale) = tx.package.external_line_ref {
                self.store.links().release(stale, key);
            }
            tx.package.external_line_ref = Some(line_ref);
            Ok(tx.package.clone())
        });

        match &result {
            Ok(_) => info!(package = %key, line_ref = %line_ref, "Package linked"),
            Err(err) => warn!(package = %key, line_ref = %line_ref, error = %err, "Link rejected"),
        }
        result
    }
}
