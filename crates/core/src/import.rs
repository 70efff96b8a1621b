//! Reading batch calculation input from CSV.
//!
//! Expected header: `creatinine,nhs_number,dob,gender,is_black` with optional trailing
//! `email,name,surname` columns. Column order does not matter; names do.

use crate::measurement::BulkEntry;
use crate::models::{flexible_date, Gender};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, thiserror::Error)]
pub enum BulkCsvError {
    /// `row` counts data rows from 1, not including the header.
    #[error("row {row}: {message}")]
    Row { row: usize, message: String },
    #[error("failed to read CSV header: {0}")]
    Header(#[source] csv::Error),
}

pub type BulkCsvResult<T> = std::result::Result<T, BulkCsvError>;

#[derive(Debug, Deserialize)]
struct CsvRow {
    creatinine: f64,
    nhs_number: i64,
    dob: String,
    gender: String,
    is_black: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    surname: Option<String>,
}

/// Parse every data row into a [`BulkEntry`].
///
/// # Errors
///
/// Stops at the first row that cannot be read or converted.
pub fn parse_bulk_csv<R: Read>(reader: R) -> BulkCsvResult<Vec<BulkEntry>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    csv_reader.headers().map_err(BulkCsvError::Header)?;

    let mut entries = Vec::new();
    for (index, record) in csv_reader.deserialize::<CsvRow>().enumerate() {
        let row = index + 1;
        let raw = record.map_err(|e| BulkCsvError::Row {
            row,
            message: e.to_string(),
        })?;
        entries.push(into_entry(raw).map_err(|message| BulkCsvError::Row { row, message })?);
    }
    Ok(entries)
}

fn into_entry(raw: CsvRow) -> Result<BulkEntry, String> {
    Ok(BulkEntry {
        creatinine: raw.creatinine,
        nhs_number: raw.nhs_number,
        date_of_birth: flexible_date::parse(&raw.dob)?,
        gender: raw.gender.parse::<Gender>()?,
        is_black: parse_flag(&raw.is_black)?,
        email: non_blank(raw.email),
        name: non_blank(raw.name),
        surname: non_blank(raw.surname),
    })
}

fn parse_flag(raw: &str) -> Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" | "" => Ok(false),
        other => Err(format!("is_black must be true or false, got {other:?}")),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn parses_required_and_optional_columns() {
        let data = "\
creatinine,nhs_number,dob,gender,is_black,email,name,surname
66,1000000001,1981-10-07,Female,false,ada@example.com,Ada,King
80.5,1000000002,1950-01-01T00:00:00Z,0,1,,,
";
        let entries = parse_bulk_csv(data.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].gender, Gender::Female);
        assert_eq!(entries[0].email.as_deref(), Some("ada@example.com"));
        assert_eq!(entries[0].date_of_birth, NaiveDate::from_ymd_opt(1981, 10, 7).unwrap());

        assert_eq!(entries[1].creatinine, 80.5);
        assert_eq!(entries[1].gender, Gender::Male);
        assert!(entries[1].is_black);
        assert!(entries[1].name.is_none());
    }

    #[test]
    fn optional_columns_may_be_absent_from_header() {
        let data = "creatinine,nhs_number,dob,gender,is_black\n70,1000000001,1970-05-05,male,no\n";
        let entries = parse_bulk_csv(data.as_bytes()).unwrap();
        assert_eq!(entries[0].gender, Gender::Male);
        assert!(entries[0].surname.is_none());
    }

    #[test]
    fn bad_row_is_reported_by_data_row_number() {
        let data = "\
creatinine,nhs_number,dob,gender,is_black
70,1000000001,1970-05-05,Male,false
abc,1000000002,1970-05-05,Male,false
";
        match parse_bulk_csv(data.as_bytes()) {
            Err(BulkCsvError::Row { row, .. }) => assert_eq!(row, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_gender_and_flag_are_rejected() {
        let gender = "creatinine,nhs_number,dob,gender,is_black\n70,1000000001,1970-05-05,X,false\n";
        assert!(parse_bulk_csv(gender.as_bytes()).is_err());

        let flag = "creatinine,nhs_number,dob,gender,is_black\n70,1000000001,1970-05-05,Male,maybe\n";
        assert!(matches!(
            parse_bulk_csv(flag.as_bytes()),
            Err(BulkCsvError::Row { row: 1, .. })
        ));
    }
}
