use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::Deserialize;

/// Tabular source that maps song titles to source document ids.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    async fn read_range(&self, sheet: &str, range: &str) -> anyhow::Result<Vec<Vec<String>>>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum A1RangeError {
    #[error("empty range")]
    Empty,
    #[error("invalid cell reference: {0:?}")]
    InvalidCell(String),
    #[error("range end {end:?} precedes start {start:?}")]
    Reversed { start: String, end: String },
}

/// A rectangular A1-notation range. Indices are zero-based; an open row bound
/// extends to the last row of the sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct A1Range {
    pub start_col: usize,
    pub start_row: Option<usize>,
    pub end_col: usize,
    pub end_row: Option<usize>,
}

impl FromStr for A1Range {
    type Err = A1RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(A1RangeError::Empty);
        }
        let (start, end) = s.split_once(':').unwrap_or((s, s));
        let (start_col, start_row) = parse_cell(start)?;
        let (end_col, mut end_row) = parse_cell(end)?;
        if !s.contains(':') {
            end_row = start_row;
        }

        let rows_reversed = matches!((start_row, end_row), (Some(a), Some(b)) if b < a);
        if end_col < start_col || rows_reversed {
            return Err(A1RangeError::Reversed {
                start: start.to_owned(),
                end: end.to_owned(),
            });
        }

        Ok(Self {
            start_col,
            start_row,
            end_col,
            end_row,
        })
    }
}

fn parse_cell(cell: &str) -> Result<(usize, Option<usize>), A1RangeError> {
    let invalid = || A1RangeError::InvalidCell(cell.to_owned());
    let cell = cell.trim();
    let split = cell
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(cell.len());
    let (letters, digits) = cell.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(invalid());
    }

    let mut col = 0usize;
    for c in letters.chars() {
        let value = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        col = col
            .checked_mul(26)
            .and_then(|v| v.checked_add(value))
            .ok_or_else(invalid)?;
    }

    let row = if digits.is_empty() {
        None
    } else {
        let row: usize = digits.parse().map_err(|_| invalid())?;
        if row == 0 {
            return Err(invalid());
        }
        Some(row - 1)
    };

    Ok((col - 1, row))
}

impl A1Range {
    /// Cuts the range out of `grid`, padding short rows with empty cells.
    /// Bounds past the last row or the widest row are clamped to the sheet.
    pub fn slice(&self, grid: &[Vec<String>]) -> Vec<Vec<String>> {
        let Some(last_row) = grid.len().checked_sub(1) else {
            return Vec::new();
        };
        let widest = grid.iter().map(Vec::len).max().unwrap_or(0);
        let Some(last_col) = widest.checked_sub(1) else {
            return Vec::new();
        };

        let start_row = self.start_row.unwrap_or(0);
        let end_row = self.end_row.map_or(last_row, |end| end.min(last_row));
        let end_col = self.end_col.min(last_col);
        if start_row > end_row || self.start_col > end_col {
            return Vec::new();
        }

        grid[start_row..=end_row]
            .iter()
            .map(|cells| {
                (self.start_col..=end_col)
                    .map(|col| cells.get(col).cloned().unwrap_or_default())
                    .collect()
            })
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
struct Workbook {
    #[serde(default)]
    sheets: HashMap<String, Vec<Vec<serde_yaml::Value>>>,
}

/// Ledger backed by a YAML workbook: `sheets: {<name>: [[cell, ...], ...]}`.
#[derive(Debug, Clone)]
pub struct LocalFsLedger {
    path: PathBuf,
}

impl LocalFsLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load_sheet(&self, contents: &str, sheet: &str) -> anyhow::Result<Vec<Vec<String>>> {
        let workbook: Workbook = serde_yaml::from_str(contents)
            .with_context(|| format!("parse ledger: {}", self.path.display()))?;
        let rows = workbook
            .sheets
            .get(sheet)
            .ok_or_else(|| anyhow::anyhow!("sheet not found in ledger: {sheet}"))?;
        Ok(rows
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect())
    }
}

#[async_trait]
impl LedgerReader for LocalFsLedger {
    async fn read_range(&self, sheet: &str, range: &str) -> anyhow::Result<Vec<Vec<String>>> {
        let range: A1Range = range
            .parse()
            .with_context(|| format!("parse range: {range}"))?;
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("read ledger: {}", self.path.display()))?;
        let grid = self.load_sheet(&contents, sheet)?;
        Ok(range.slice(&grid))
    }
}

fn cell_text(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Null => String::new(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_owned())
            .unwrap_or_default(),
    }
}
