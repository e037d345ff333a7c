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

//! Shared disease-tag vocabulary for herbal packages.

use crate::base::DiseaseTagId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiseaseTag {
    pub id: DiseaseTagId,
    pub name: String,
}

/// Name-unique tag table with find-or-create semantics.
#[derive(Debug, Default)]
pub struct TagVocabulary {
    by_name: DashMap<String, DiseaseTagId>,
    by_id: DashMap<DiseaseTagId, String>,
    next_id: AtomicU32,
}

impl TagVocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tag named `name`, creating it on first use.
    ///
    /// Names are trimmed; empty names yield `None`.
    pub fn find_or_create(&self, name: &str) -> Option<DiseaseTag> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        // The entry guard makes concurrent first uses agree on one id.
        let id = *self.by_name.entry(name.to_string()).or_insert_with(|| {
            let id = DiseaseTagId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
            self.by_id.insert(id, name.to_string());
            id
        });
        Some(DiseaseTag {
            id,
            name: name.to_string(),
        })
    }

    pub fn get(&self, id: DiseaseTagId) -> Option<DiseaseTag> {
        self.by_id.get(&id).map(|name| DiseaseTag {
            id,
            name: name.value().clone(),
        })
    }

    pub fn find(&self, name: &str) -> Option<DiseaseTag> {
        let name = name.trim();
        self.by_name.get(name).map(|id| DiseaseTag {
            id: *id,
            name: name.to_string(),
        })
    }

    /// All tags ordered by name.
    pub fn all(&self) -> Vec<DiseaseTag> {
        let mut tags: Vec<DiseaseTag> = self
            .by_id
            .iter()
            .map(|entry| DiseaseTag {
                id: *entry.key(),
                name: entry.value().clone(),
            })
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        tags
    }
}
