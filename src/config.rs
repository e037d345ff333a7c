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

//! Ledger configuration.

use crate::base::PackageKind;
use serde::{Deserialize, Serialize};

/// Keyword rule used to pair billing line items with a package kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRule {
    pub kind: PackageKind,
    /// A line item matches when its label contains any of these.
    pub keywords: Vec<String>,
}

impl MatchRule {
    pub fn new<I, S>(kind: PackageKind, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, label: &str) -> bool {
        self.keywords.iter().any(|kw| label.contains(kw.as_str()))
    }
}

/// Ledger-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Active items at or below this stock are reported by `low_stock`.
    pub low_stock_threshold: u32,
    /// Membership length when none is given at creation.
    pub default_membership_months: u32,
    /// Reconciliation keyword rules, evaluated in order.
    pub match_rules: Vec<MatchRule>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            low_stock_threshold: 10,
            default_membership_months: 12,
            match_rules: vec![
                MatchRule::new(PackageKind::Herbal, ["한약", "보약", "탕", "선결", "환약"]),
                MatchRule::new(PackageKind::Nokryong, ["녹용"]),
            ],
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("CLINIC_LEDGER_LOW_STOCK") {
            if let Ok(threshold) = value.trim().parse() {
                config.low_stock_threshold = threshold;
            }
        }

        if let Ok(value) = std::env::var("CLINIC_LEDGER_MEMBERSHIP_MONTHS") {
            if let Ok(months) = value.trim().parse() {
                config.default_membership_months = months;
            }
        }

        if let Ok(value) = std::env::var("CLINIC_LEDGER_HERBAL_KEYWORDS") {
            config.set_keywords(PackageKind::Herbal, split_keywords(&value));
        }

        if let Ok(value) = std::env::var("CLINIC_LEDGER_NOKRYONG_KEYWORDS") {
            config.set_keywords(PackageKind::Nokryong, split_keywords(&value));
        }

        config
    }

    /// Replaces the keyword list for `kind`, adding a rule if none exists.
    pub fn set_keywords(&mut self, kind: PackageKind, keywords: Vec<String>) {
        match self.match_rules.iter_mut().find(|rule| rule.kind == kind) {
            Some(rule) => rule.keywords = keywords,
            None => self.match_rules.push(MatchRule { kind, keywords }),
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_membership_months == 0 {
            return Err("Default membership length cannot be 0 months".to_string());
        }

        for rule in &self.match_rules {
            if rule.kind == PackageKind::Membership {
                return Err("Memberships are linked through apply, not reconciliation".to_string());
            }
            if rule.keywords.iter().any(|kw| kw.trim().is_empty()) {
                return Err(format!("Empty keyword in {} match rule", rule.kind));
            }
        }

        Ok(())
    }
}

fn split_keywords(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|kw| !kw.is_empty())
        .map(String::from)
        .collect()
}
