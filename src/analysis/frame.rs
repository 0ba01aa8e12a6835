//! Column access over a dataset written by the panel step.

use crate::model::{PipelineError, Result};
use crate::table::{self, Table, cell};
use std::path::Path;

/// A CSV dataset addressed by column name.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    table: Table,
}

/// Numeric value of a cell: numbers as-is, booleans as 1/0, anything
/// else (blank, NA) as NaN.
pub fn cell_value(text: &str) -> f64 {
    table::parse_number(text)
        .or_else(|| table::parse_bool(text).map(|b| if b { 1.0 } else { 0.0 }))
        .unwrap_or(f64::NAN)
}

impl Frame {
    pub fn read(path: &Path) -> Result<Self> {
        Ok(Self::from_table(Table::read(path)?))
    }

    pub fn from_table(table: Table) -> Self {
        Self { table }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.table.headers
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.table.index(name).is_some()
    }

    fn index(&self, name: &str) -> Result<usize> {
        self.table
            .index(name)
            .ok_or_else(|| PipelineError::UnknownColumn(name.to_string()))
    }

    pub fn numeric(&self, name: &str) -> Result<Vec<f64>> {
        let idx = self.index(name)?;
        Ok(self.table.rows.iter().map(|r| cell_value(cell(r, idx))).collect())
    }

    pub fn text(&self, name: &str) -> Result<Vec<String>> {
        let idx = self.index(name)?;
        Ok(self
            .table
            .rows
            .iter()
            .map(|r| cell(r, idx).trim().to_string())
            .collect())
    }

    /// Element-wise interaction of several text columns (`a|b`), used to
    /// build fixed-effect and cluster keys.
    pub fn keys(&self, names: &[&str]) -> Result<Vec<String>> {
        let columns = names
            .iter()
            .map(|n| self.text(n))
            .collect::<Result<Vec<_>>>()?;
        Ok((0..self.len())
            .map(|i| {
                columns
                    .iter()
                    .map(|c| c[i].as_str())
                    .collect::<Vec<_>>()
                    .join("|")
            })
            .collect())
    }

    /// Count of finite values in `name` among rows where `mask` holds.
    pub fn count_finite(&self, name: &str, mask: &[bool]) -> Result<usize> {
        Ok(self
            .numeric(name)?
            .iter()
            .zip(mask)
            .filter(|(v, keep)| **keep && v.is_finite())
            .count())
    }
}
