//! Header-addressed CSV tables.
//!
//! Every input of the pipeline (Comtrade extracts, EM-DAT, GeoMet, World
//! Bank and UN DESA exports) is a delimited text file whose column order
//! varies between vintages, so rows are addressed by header name.

use crate::model::{PipelineError, Result};
use csv::{ReaderBuilder, StringRecord};
use std::fs;
use std::path::Path;

/// Reads a text file as UTF-8, falling back to Latin-1 for legacy extracts.
/// A leading byte-order mark is stripped.
pub fn read_text(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(PipelineError::MissingFile(path.to_path_buf()));
    }
    let bytes = fs::read(path)?;
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        // Latin-1 maps each byte to the code point of the same value.
        Err(err) => err.into_bytes().iter().map(|&b| b as char).collect(),
    };
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

/// Picks the most frequent of `,`, `;` and tab in the header line.
pub fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or_default();
    [b',', b';', b'\t']
        .into_iter()
        .max_by_key(|d| header.bytes().filter(|b| b == d).count())
        .unwrap_or(b',')
}

/// Parses a numeric cell. Blank cells and the usual NA spellings are `None`.
pub fn parse_number(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    match cell.to_ascii_lowercase().as_str() {
        "na" | "nan" | "null" | "none" | "n/a" => None,
        _ => cell.parse::<f64>().ok(),
    }
}

/// Parses a boolean cell: `True/False`, `1/0`, `yes/no`.
pub fn parse_bool(cell: &str) -> Option<bool> {
    match cell.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "1.0" | "yes" => Some(true),
        "false" | "0" | "0.0" | "no" => Some(false),
        _ => None,
    }
}

/// Parses a year cell, accepting `1990` and `1990.0`.
pub fn parse_year(cell: &str) -> Option<i32> {
    let value = parse_number(cell)?;
    if value.fract() != 0.0 || !(1000.0..=9999.0).contains(&value) {
        return None;
    }
    Some(value as i32)
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<StringRecord>,
}

impl Table {
    pub fn read(path: &Path) -> Result<Self> {
        let text = read_text(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(sniff_delimiter(text))
            .flexible(true)
            .from_reader(text.as_bytes());
        let headers = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?);
        }
        Ok(Self { headers, rows })
    }

    pub fn index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// First header present among `names`.
    pub fn index_any(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|n| self.index(n))
    }

    /// Indices of `names`, or a `MissingColumns` error listing every absent one.
    pub fn require(&self, dataset: &str, names: &[&str]) -> Result<Vec<usize>> {
        let missing: Vec<String> = names
            .iter()
            .filter(|n| self.index(n).is_none())
            .map(|n| n.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::MissingColumns {
                dataset: dataset.to_string(),
                columns: missing,
            });
        }
        Ok(names.iter().filter_map(|n| self.index(n)).collect())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Cell accessor tolerant of short (flexible) records.
pub fn cell(record: &StringRecord, idx: usize) -> &str {
    record.get(idx).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delimiter_sniffing() {
        assert_eq!(sniff_delimiter("a;b;c\n1;2;3"), b';');
        assert_eq!(sniff_delimiter("a,b,c"), b',');
        assert_eq!(sniff_delimiter("a\tb\tc"), b'\t');
    }

    #[test]
    fn test_semicolon_table_is_addressed_by_header() {
        let table = Table::parse("refYear;reporterISO;fobvalue\n1990;FRA;12.5\n").unwrap();
        assert_eq!(table.len(), 1);
        let idx = table.index("fobvalue").unwrap();
        assert_eq!(parse_number(cell(&table.rows[0], idx)), Some(12.5));
    }

    #[test]
    fn test_require_reports_all_missing_columns() {
        let table = Table::parse("ISO,Year\nFRA,1990\n").unwrap();
        match table.require("emdat", &["ISO", "Total Deaths", "Disaster Type"]) {
            Err(PipelineError::MissingColumns { dataset, columns }) => {
                assert_eq!(dataset, "emdat");
                assert_eq!(columns, vec!["Total Deaths", "Disaster Type"]);
            }
            other => panic!("expected MissingColumns, got {:?}", other),
        }
    }

    #[test]
    fn test_number_bool_and_year_parsing() {
        assert_eq!(parse_number(" 3.5 "), Some(3.5));
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_bool("True"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_year("1990.0"), Some(1990));
        assert_eq!(parse_year("#date +occurred"), None);
        assert_eq!(parse_year("1990.5"), None);
    }

    #[test]
    fn test_latin1_file_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin1.csv");
        // "Côte" in Latin-1: 0xF4 is not valid UTF-8 on its own.
        std::fs::write(&path, b"Country\nC\xf4te d'Ivoire\n").unwrap();
        let table = Table::read(&path).unwrap();
        assert_eq!(cell(&table.rows[0], 0), "Côte d'Ivoire");
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = Table::read(Path::new("/no/such/file.csv")).unwrap_err();
        assert!(matches!(err, PipelineError::MissingFile(_)));
    }
}
