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

//! Usage ledger and audit log.
//!
//! Both streams are append-only. A [`PackageJournal`] lives next to its
//! package row and is only appended to while the row's write guard is held,
//! so a journal row is never visible without its balance change.

use crate::base::{LineRef, PackageId, PackageKind, PatientId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global insertion order shared by both streams.
#[derive(Debug, Default)]
pub(crate) struct Sequence(AtomicU64);

impl Sequence {
    pub(crate) fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageType {
    Add,
    Deduct,
    Apply,
}

/// One balance-changing event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub seq: u64,
    pub package_kind: PackageKind,
    pub package_id: PackageId,
    pub patient_id: PatientId,
    pub usage_date: NaiveDate,
    pub usage_type: UsageType,
    pub count: u32,
    pub external_line_ref: Option<LineRef>,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Edit,
    Delete,
}

/// One administrative correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub seq: u64,
    pub package_kind: PackageKind,
    pub package_id: PackageId,
    pub action: AuditAction,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// A history row tagged with the stream it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum HistoryEntry {
    Usage(UsageRecord),
    Audit(AuditLogEntry),
}

impl HistoryEntry {
    pub fn event_date(&self) -> NaiveDate {
        match self {
            Self::Usage(record) => record.usage_date,
            Self::Audit(entry) => entry.timestamp.date_naive(),
        }
    }

    pub fn seq(&self) -> u64 {
        match self {
            Self::Usage(record) => record.seq,
            Self::Audit(entry) => entry.seq,
        }
    }
}

/// Append-only event streams of one package.
#[derive(Debug, Default, Clone)]
pub(crate) struct PackageJournal {
    usage: Vec<UsageRecord>,
    audit: Vec<AuditLogEntry>,
}

impl PackageJournal {
    pub(crate) fn append_usage(&mut self, record: UsageRecord) {
        self.usage.push(record);
    }

    pub(crate) fn append_audit(&mut self, entry: AuditLogEntry) {
        self.audit.push(entry);
    }

    pub(crate) fn usage(&self) -> &[UsageRecord] {
        &self.usage
    }

    pub(crate) fn audit(&self) -> &[AuditLogEntry] {
        &self.audit
    }

    /// Count of `apply` records on `date`.
    pub(crate) fn applies_on(&self, date: NaiveDate) -> u32 {
        self.usage
            .iter()
            .filter(|r| r.usage_type == UsageType::Apply && r.usage_date == date)
            .map(|r| r.count)
            .sum()
    }

    /// Both streams merged, most recent event date first; ties go to the
    /// later insertion.
    pub(crate) fn history(&self) -> Vec<HistoryEntry> {
        let mut entries: Vec<HistoryEntry> = self
            .usage
            .iter()
            .cloned()
            .map(HistoryEntry::Usage)
            .chain(self.audit.iter().cloned().map(HistoryEntry::Audit))
            .collect();
        entries.sort_by_key(|entry| Reverse((entry.event_date(), entry.seq())));
        entries
    }
}
