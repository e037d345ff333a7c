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

//! Bulk inventory import.
//!
//! Rows arrive as raw text from a spreadsheet export. Each row is validated
//! on its own; a bad row is reported and left out while the valid rows are
//! classified and committed together under the inventory's exclusive gate.
//!
//! Headers may be English (`name`, `current_stock`, ...) or the clinic's
//! Korean sheet headers (`상비약 이름`, `현재재고`, ...).

use crate::base::InventoryItemId;
use crate::error::LedgerError;
use crate::inventory::{Inventory, NewMedicineItem};
use chrono::{Days, NaiveDate};
use csv::{ReaderBuilder, Trim};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// One spreadsheet row, every cell still text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImportRow {
    #[serde(default, alias = "상비약 이름")]
    pub name: Option<String>,
    #[serde(default, alias = "최근탕전일자")]
    pub last_decoction_date: Option<String>,
    #[serde(default, alias = "누적사용량")]
    pub total_stock: Option<String>,
    #[serde(default, alias = "현재재고")]
    pub current_stock: Option<String>,
    #[serde(default, alias = "탕전시-첩수")]
    pub doses_per_batch: Option<String>,
    #[serde(default, alias = "탕전시-팩수")]
    pub packs_per_batch: Option<String>,
    #[serde(default, alias = "분류")]
    pub category: Option<String>,
    #[serde(default, alias = "사용여부")]
    pub active: Option<String>,
}

impl ImportRow {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_stock(mut self, current: &str, total: &str) -> Self {
        self.current_stock = Some(current.into());
        self.total_stock = Some(total.into());
        self
    }
}

/// How rows whose name already exists are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportMode {
    /// Update the existing row's stock and configuration in place.
    #[default]
    Overwrite,
    /// Leave the existing row alone.
    NewOnly,
}

impl FromStr for ImportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "new-only" | "new_only" | "newonly" => Ok(Self::NewOnly),
            other => Err(format!("unknown import mode: {other}")),
        }
    }
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Overwrite => "overwrite",
            Self::NewOnly => "new-only",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("medicine name is missing")]
    MissingName,

    #[error("{field} is not a whole number: '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("unrecognised date: '{0}'")]
    InvalidDate(String),

    #[error("unrecognised active flag: '{0}'")]
    InvalidFlag(String),

    #[error("current stock {current} exceeds cumulative stock {total}")]
    StockExceedsTotal { current: u32, total: u32 },

    #[error("'{0}' appears more than once in this import")]
    DuplicateName(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Inserted(InventoryItemId),
    Updated(InventoryItemId),
    Skipped,
    Failed(RowError),
}

impl RowOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Inserted(_) => "insert",
            Self::Updated(_) => "update",
            Self::Skipped => "skip",
            Self::Failed(_) => "error",
        }
    }
}

/// Outcome of one row. `row` is the 1-based position in the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowReport {
    pub row: usize,
    pub name: Option<String>,
    pub outcome: RowOutcome,
}

impl Serialize for RowReport {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let item = match self.outcome {
            RowOutcome::Inserted(id) | RowOutcome::Updated(id) => Some(id),
            _ => None,
        };
        let error = match &self.outcome {
            RowOutcome::Failed(err) => Some(err.to_string()),
            _ => None,
        };
        let mut state = serializer.serialize_struct("RowReport", 5)?;
        state.serialize_field("row", &self.row)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("outcome", self.outcome.label())?;
        state.serialize_field("item", &item)?;
        state.serialize_field("error", &error)?;
        state.end()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub rows: Vec<RowReport>,
}

impl ImportReport {
    fn push(&mut self, row: usize, name: Option<String>, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Inserted(_) => self.inserted += 1,
            RowOutcome::Updated(_) => self.updated += 1,
            RowOutcome::Skipped => self.skipped += 1,
            RowOutcome::Failed(_) => self.failed += 1,
        }
        self.rows.push(RowReport { row, name, outcome });
    }
}

/// Reads import rows from CSV. Unknown columns are ignored.
pub fn read_rows<R: io::Read>(reader: R) -> Result<Vec<ImportRow>, csv::Error> {
    ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader)
        .deserialize()
        .collect()
}

fn cell(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_count(field: &'static str, value: Option<&str>) -> Result<Option<u32>, RowError> {
    let Some(raw) = value else {
        return Ok(None);
    };
    let digits: String = raw.chars().filter(|c| *c != ',').collect();
    // Spreadsheets export whole numbers as "12.0".
    let digits = digits.strip_suffix(".0").unwrap_or(&digits);
    digits
        .parse::<u32>()
        .map(Some)
        .map_err(|_| RowError::InvalidNumber {
            field,
            value: raw.to_string(),
        })
}

/// Smallest accepted spreadsheet serial (1950-01-01). Bare years and small
/// counts fall below it.
const MIN_SERIAL: u64 = 18_264;
/// Largest accepted spreadsheet serial (9999-12-31).
const MAX_SERIAL: u64 = 2_958_465;

/// Accepts `YYYY-MM-DD`, `YYYY.MM.DD`, `YYYY/MM/DD`, `YYYYMMDD` and
/// spreadsheet serial day numbers from 1950 on.
pub fn parse_date(raw: &str) -> Result<NaiveDate, RowError> {
    let value = raw.trim().trim_end_matches('.');
    let invalid = || RowError::InvalidDate(raw.to_string());
    for format in ["%Y-%m-%d", "%Y.%m.%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Ok(date);
        }
    }
    if value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()) {
        let field = |range: std::ops::Range<usize>| value[range].parse::<u32>().ok();
        let year = field(0..4).and_then(|y| i32::try_from(y).ok());
        return match (year, field(4..6), field(6..8)) {
            (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y, m, d).ok_or_else(invalid),
            _ => Err(invalid()),
        };
    }
    let serial = value.strip_suffix(".0").unwrap_or(value);
    serial
        .parse::<u64>()
        .ok()
        .filter(|days| (MIN_SERIAL..=MAX_SERIAL).contains(days))
        .and_then(|days| {
            // Serial 1 is 1900-01-01; the epoch absorbs the 1900 leap-day bug.
            NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_days(Days::new(days))
        })
        .ok_or_else(invalid)
}

fn parse_flag(raw: &str) -> Result<bool, RowError> {
    match raw.trim() {
        "Y" | "y" | "O" | "o" | "사용" | "예" => Ok(true),
        "N" | "n" | "X" | "x" | "미사용" | "아니오" => Ok(false),
        other if other.eq_ignore_ascii_case("true") => Ok(true),
        other if other.eq_ignore_ascii_case("false") => Ok(false),
        _ => Err(RowError::InvalidFlag(raw.to_string())),
    }
}

impl ImportRow {
    /// Validates the row into an item request.
    pub fn validate(&self) -> Result<NewMedicineItem, RowError> {
        let name = cell(&self.name).ok_or(RowError::MissingName)?;
        let current = parse_count("current_stock", cell(&self.current_stock))?.unwrap_or(0);
        let total = parse_count("total_stock", cell(&self.total_stock))?.unwrap_or(current);
        if current > total {
            return Err(RowError::StockExceedsTotal { current, total });
        }
        let doses = parse_count("doses_per_batch", cell(&self.doses_per_batch))?;
        let packs = parse_count("packs_per_batch", cell(&self.packs_per_batch))?;
        let last_decoction_date = cell(&self.last_decoction_date)
            .map(parse_date)
            .transpose()?;
        let is_active = cell(&self.active).map(parse_flag).transpose()?.unwrap_or(true);

        let mut item = NewMedicineItem::named(name).with_stock(current, total);
        item.category = cell(&self.category).map(str::to_string);
        item.doses_per_batch = doses;
        item.packs_per_batch = packs;
        item.last_decoction_date = last_decoction_date;
        item.is_active = is_active;
        Ok(item)
    }
}

enum Planned {
    Insert(NewMedicineItem),
    Update(InventoryItemId, NewMedicineItem),
}

impl Inventory {
    /// Reconciles a name-keyed payload against the inventory.
    ///
    /// Every row is classified as insert, update, skip or error before
    /// anything is written. Error rows are excluded; the remaining rows
    /// commit together while the gate is held exclusively.
    #[instrument(skip(self, rows))]
    pub fn bulk_upsert<I>(&self, rows: I, mode: ImportMode) -> ImportReport
    where
        I: IntoIterator<Item = ImportRow>,
    {
        let mut seen = HashSet::new();
        let validated: Vec<(usize, Option<String>, Result<NewMedicineItem, RowError>)> = rows
            .into_iter()
            .enumerate()
            .map(|(index, row)| {
                let name = cell(&row.name).map(str::to_string);
                // Only valid rows take a name; a rejected row leaves it free.
                let result = row.validate().and_then(|item| {
                    if seen.insert(item.name.clone()) {
                        Ok(item)
                    } else {
                        Err(RowError::DuplicateName(item.name))
                    }
                });
                (index + 1, name, result)
            })
            .collect();

        let _gate = self.lock_exclusive();

        let mut plan = Vec::with_capacity(validated.len());
        for (row, name, result) in validated {
            let outcome = match result {
                Err(err) => {
                    warn!(row, error = %err, "Import row rejected");
                    Err(RowOutcome::Failed(err))
                }
                Ok(item) => match (self.id_by_name(&item.name), mode) {
                    (None, _) => Ok(Planned::Insert(item)),
                    (Some(id), ImportMode::Overwrite) => Ok(Planned::Update(id, item)),
                    (Some(_), ImportMode::NewOnly) => Err(RowOutcome::Skipped),
                },
            };
            plan.push((row, name, outcome));
        }

        let mut report = ImportReport::default();
        for (row, name, planned) in plan {
            let outcome = match planned {
                Err(outcome) => outcome,
                Ok(Planned::Insert(item)) => match self.insert_item(item) {
                    Ok(item) => RowOutcome::Inserted(item.id),
                    Err(err) => RowOutcome::Failed(err.into()),
                },
                Ok(Planned::Update(id, item)) => match self.overwrite_item(id, item) {
                    Ok(item) => RowOutcome::Updated(item.id),
                    Err(err) => RowOutcome::Failed(err.into()),
                },
            };
            report.push(row, name, outcome);
        }

        info!(
            mode = %mode,
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            "Import committed"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use chrono::Datelike;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn dates_in_every_accepted_shape() {
        assert_eq!(parse_date("2026-03-15").unwrap(), date(2026, 3, 15));
        assert_eq!(parse_date("2026.03.15").unwrap(), date(2026, 3, 15));
        assert_eq!(parse_date("2026.03.15.").unwrap(), date(2026, 3, 15));
        assert_eq!(parse_date("2026/3/5").unwrap(), date(2026, 3, 5));
        assert_eq!(parse_date("46096").unwrap(), date(2026, 3, 15));
        assert_eq!(parse_date("45658").unwrap().year(), 2025);
        assert_eq!(parse_date("20260315").unwrap(), date(2026, 3, 15));
        assert_eq!(parse_date("2958465").unwrap(), date(9999, 12, 31));
        assert!(parse_date("15/03/2026").is_err());
        assert!(parse_date("99999999").is_err());
        assert!(parse_date("20261315").is_err());
    }

    #[test]
    fn implausible_serials_are_rejected() {
        assert!(parse_date("2958466").is_err());
        assert!(parse_date("2026").is_err());
        assert!(parse_date("0").is_err());
        assert!(parse_date("18263").is_err());
        assert_eq!(parse_date("18264").unwrap(), date(1950, 1, 1));

        let mut row = ImportRow::named("공진단").with_stock("1", "1");
        row.last_decoction_date = Some("2026".into());
        assert_eq!(row.validate(), Err(RowError::InvalidDate("2026".into())));
        row.last_decoction_date = Some("20260315".into());
        assert_eq!(
            row.validate().unwrap().last_decoction_date,
            Some(date(2026, 3, 15))
        );
    }

    #[test]
    fn flags_follow_sheet_conventions() {
        for yes in ["Y", "O", "사용", "예", "true", "TRUE"] {
            assert_eq!(parse_flag(yes), Ok(true), "{yes}");
        }
        for no in ["N", "X", "미사용", "아니오", "false"] {
            assert_eq!(parse_flag(no), Ok(false), "{no}");
        }
        assert!(parse_flag("maybe").is_err());
    }

    #[test]
    fn korean_headers_are_read() {
        let data = "상비약 이름,현재재고,누적사용량,사용여부,최근탕전일자,탕전시-첩수,탕전시-팩수,분류\n\
                    공진단, 5 ,20,Y,2026.01.10,20,30,환\n";
        let rows = read_rows(data.as_bytes()).unwrap();
        let item = rows[0].validate().unwrap();
        assert_eq!(item.name, "공진단");
        assert_eq!(item.current_stock, 5);
        assert_eq!(item.total_stock, 20);
        assert_eq!(item.doses_per_batch, Some(20));
        assert_eq!(item.packs_per_batch, Some(30));
        assert_eq!(item.category.as_deref(), Some("환"));
        assert_eq!(item.last_decoction_date, Some(date(2026, 1, 10)));
    }

    #[test]
    fn missing_total_defaults_to_current() {
        let row = ImportRow {
            name: Some("경옥고".into()),
            current_stock: Some("7".into()),
            ..Default::default()
        };
        let item = row.validate().unwrap();
        assert_eq!((item.current_stock, item.total_stock), (7, 7));
        assert!(item.is_active);
    }

    #[test]
    fn row_errors() {
        assert_eq!(ImportRow::default().validate(), Err(RowError::MissingName));
        assert_eq!(
            ImportRow::named("A").with_stock("many", "10").validate(),
            Err(RowError::InvalidNumber {
                field: "current_stock",
                value: "many".into(),
            })
        );
        assert_eq!(
            ImportRow::named("A").with_stock("11", "10").validate(),
            Err(RowError::StockExceedsTotal {
                current: 11,
                total: 10,
            })
        );
    }

    #[test]
    fn new_only_skips_existing_names() {
        let inv = Inventory::new(&LedgerConfig::default());
        inv.add_item(NewMedicineItem::named("A").with_stock(1, 1))
            .unwrap();
        let report = inv.bulk_upsert(
            vec![
                ImportRow::named("A").with_stock("9", "9"),
                ImportRow::named("B").with_stock("2", "2"),
            ],
            ImportMode::NewOnly,
        );
        assert_eq!((report.inserted, report.skipped), (1, 1));
        assert_eq!(inv.find_by_names(&["A"])[0].current_stock, 1);
    }

    #[test]
    fn duplicate_name_in_payload_fails_later_row() {
        let inv = Inventory::new(&LedgerConfig::default());
        let report = inv.bulk_upsert(
            vec![
                ImportRow::named("A").with_stock("1", "1"),
                ImportRow::named("A").with_stock("2", "2"),
            ],
            ImportMode::Overwrite,
        );
        assert_eq!((report.inserted, report.failed), (1, 1));
        assert_eq!(
            report.rows[1].outcome,
            RowOutcome::Failed(RowError::DuplicateName("A".into()))
        );
        assert_eq!(inv.find_by_names(&["A"])[0].current_stock, 1);
    }

    #[test]
    fn mode_parses_from_cli_spelling() {
        assert_eq!("new-only".parse::<ImportMode>(), Ok(ImportMode::NewOnly));
        assert_eq!("Overwrite".parse::<ImportMode>(), Ok(ImportMode::Overwrite));
        assert!("merge".parse::<ImportMode>().is_err());
    }
}
