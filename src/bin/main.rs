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

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use clinic_ledger::{
    Adjustment, Deduction, ImportMode, ImportReport, Ledger, LedgerConfig, LineRef, NewPackage,
    Operation, PackageId, PackageKey, PackageKind, PatientId, import,
};
use csv::{ReaderBuilder, Trim, Writer};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Clinic Ledger - replay package operations and import inventory sheets
///
/// Results are written to stdout as CSV; logs go to stderr (`RUST_LOG`).
#[derive(Parser, Debug)]
#[command(name = "clinic-ledger")]
#[command(about = "Prepaid package and medicine inventory ledger", long_about = None)]
struct Args {
    /// Low-stock threshold for inventory reports
    #[arg(long, env = "CLINIC_LEDGER_LOW_STOCK")]
    low_stock: Option<u32>,

    /// Membership length in months when no expiry is given
    #[arg(long, env = "CLINIC_LEDGER_MEMBERSHIP_MONTHS")]
    membership_months: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a package-operation CSV and print the resulting packages
    ///
    /// Expected format: op,kind,package,patient,name,count,date,line_ref,remaining,total
    Replay {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
    /// Bulk-import an inventory sheet exported as CSV and print per-row outcomes
    Import {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// overwrite | new-only
        #[arg(long, default_value = "overwrite")]
        mode: ImportMode,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = LedgerConfig::from_env();
    if let Some(threshold) = args.low_stock {
        config.low_stock_threshold = threshold;
    }
    if let Some(months) = args.membership_months {
        config.default_membership_months = months;
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        process::exit(2);
    }

    let ledger = Ledger::in_memory(config);

    let result = match &args.command {
        Command::Replay { input } => open(input)
            .and_then(|file| replay(&ledger, BufReader::new(file)))
            .and_then(|()| write_packages(&ledger, std::io::stdout())),
        Command::Import { input, mode } => open(input)
            .and_then(|file| import_inventory(&ledger, BufReader::new(file), *mode))
            .and_then(|report| write_report(&report, std::io::stdout())),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn open(path: &PathBuf) -> Result<File, csv::Error> {
    File::open(path).map_err(|e| {
        eprintln!("Error opening file '{}'", path.display());
        csv::Error::from(e)
    })
}

/// Raw CSV record of a package operation.
///
/// Fields: `op, kind, package, patient, name, count, date, line_ref, remaining, total`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    kind: Option<PackageKind>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    package: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    patient: Option<u32>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    count: Option<u32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    line_ref: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    remaining: Option<u32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    total: Option<u32>,
}

impl CsvRecord {
    /// Converts the record into an operation.
    ///
    /// Returns `None` for unknown ops or missing required fields.
    fn into_operation(self) -> Option<Operation> {
        let key = || Some(PackageKey::new(self.kind?, PackageId(self.package?)));

        match self.op.to_lowercase().as_str() {
            "create" => {
                let patient = PatientId(self.patient?);
                let name = self.name.clone()?;
                let count = self.count?;
                let date = self.date?;
                let new = match self.kind? {
                    PackageKind::Herbal => NewPackage::herbal(patient, name, count, date),
                    PackageKind::Nokryong => NewPackage::nokryong(patient, name, count, date),
                    PackageKind::Treatment => NewPackage::treatment(patient, name, count, date),
                    PackageKind::Membership => NewPackage::membership(patient, name, count, date),
                };
                Some(Operation::Create(new))
            }
            "deduct" => {
                let mut deduction = Deduction::one(key()?, self.date?)
                    .with_count(self.count.unwrap_or(1));
                deduction.external_line_ref = self.line_ref.map(LineRef);
                Some(Operation::Deduct(deduction))
            }
            "top_up" | "topup" => Some(Operation::TopUp {
                package: key()?,
                count: self.count?,
                usage_date: self.date?,
                memo: None,
            }),
            "apply" => Some(Operation::Apply {
                membership: PackageId(self.package?),
                line_ref: LineRef(self.line_ref?),
                usage_date: self.date?,
                memo: None,
            }),
            "adjust" => Some(Operation::Adjust {
                package: key()?,
                adjustment: Adjustment::Balance {
                    remaining_units: self.remaining?,
                    total_units: self.total,
                },
            }),
            "complete" => Some(Operation::Complete { package: key()? }),
            "delete" => Some(Operation::Delete { package: key()? }),
            _ => None,
        }
    }
}

/// Replays package operations from a CSV reader.
///
/// Rows are streamed. Malformed rows and rejected operations are logged and
/// skipped, so one bad row never stops the replay.
///
/// # CSV Format
///
/// ```csv
/// op,kind,package,patient,name,count,date,line_ref,remaining,total
/// create,herbal,,1,시함마농,6,2026-03-02,,,
/// deduct,herbal,1,,,1,2026-03-05,,,
/// adjust,herbal,1,,,,,,3,
/// ```
///
/// Package ids are assigned in creation order starting at 1.
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn replay<R: Read>(ledger: &Ledger, reader: R) -> Result<(), csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (index, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let line = index + 2;
        match result {
            Ok(record) => {
                let Some(operation) = record.into_operation() else {
                    warn!(line, "Skipping incomplete operation record");
                    continue;
                };
                let name = operation.name();
                if let Err(e) = ledger.process(operation) {
                    warn!(line, op = name, error = %e, code = e.code(), "Skipping rejected operation");
                }
            }
            Err(e) => {
                warn!(line, error = %e, "Skipping malformed row");
            }
        }
    }

    Ok(())
}

/// Reads an inventory sheet and upserts it.
pub fn import_inventory<R: Read>(
    ledger: &Ledger,
    reader: R,
    mode: ImportMode,
) -> Result<ImportReport, csv::Error> {
    let rows = import::read_rows(reader)?;
    let report = ledger.inventory().bulk_upsert(rows, mode);
    info!(
        inserted = report.inserted,
        updated = report.updated,
        skipped = report.skipped,
        failed = report.failed,
        "Import finished"
    );
    Ok(report)
}

/// Writes every package as CSV.
///
/// Columns: `id, kind, patient, patient_name, chart_number, name, total,
/// used, remaining, start_date, expire_date, status, line_ref`
pub fn write_packages<W: Write>(ledger: &Ledger, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for package in ledger.packages().snapshot() {
        wtr.serialize(&package)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes the per-row import outcomes as CSV.
pub fn write_report<W: Write>(report: &ImportReport, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for row in &report.rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}
